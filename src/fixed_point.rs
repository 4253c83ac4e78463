//! Fixed-point arithmetic shared by every control stage.
//!
//! All values carry the same binary point (`SHIFT` fractional bits). Products
//! are taken on a 64-bit intermediate and shifted back, never divided.

use fixed::types::I16F16;

/// The one fixed-point type of the controller.
pub type Fp = I16F16;

/// Fractional bits of [`Fp`].
pub const SHIFT: u32 = 16;

pub const ZERO: Fp = Fp::ZERO;
pub const ONE: Fp = Fp::ONE;
pub const HALF: Fp = Fp::lit("0.5");
/// 1/50 s, truncated like every other constant derived by division.
pub const ONE_FIFTIETH: Fp = Fp::from_bits((1 << SHIFT) / 50);

/// `(a * b) >> SHIFT`, saturated to the 32-bit range.
#[inline]
pub fn mul(a: Fp, b: Fp) -> Fp {
    let wide = (a.to_bits() as i64 * b.to_bits() as i64) >> SHIFT;
    Fp::from_bits(wide.clamp(i32::MIN as i64, i32::MAX as i64) as i32)
}

/// Arithmetic right shift of the raw representation.
#[inline]
pub fn shr(value: Fp, bits: u32) -> Fp {
    Fp::from_bits(value.to_bits() >> bits)
}

/// First-order low-pass step: `var += (target - var) * dt * one_over_period`.
///
/// `one_over_period` is the filter's inverse time constant in 1/s, so the
/// step stays a multiply even though the period is a duration. The step gain
/// is capped at 1.
#[inline]
pub fn low_pass(var: &mut Fp, target: Fp, dt: Fp, one_over_period: Fp) {
    let gain = mul(dt, one_over_period).min(ONE);
    *var = var.saturating_add(mul(target.saturating_sub(*var), gain));
}
