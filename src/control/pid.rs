//! Attitude PID with anti-windup and throttle gain scheduling.
//!
//! Multiply-then-shift only: this runs every iteration on all three axes.

use crate::config::AirframeProfile;
use crate::fixed_point::{low_pass, mul, shr, Fp, HALF, ONE, ZERO};
use crate::settings::PidGains;
use crate::state::{Axes, Axis};

/// Integrator clamp, in angle-error seconds.
pub const INTEGRATED_ANGLE_ERROR_LIMIT: Fp = Fp::lit("1000");
/// Inverse time constant of the on-ground bleed-off (1/4 s).
pub const GROUND_BLEED_RATE: Fp = Fp::lit("4");
/// Inverse time constant of the gyro-rate filter (1/160 s).
pub const GYRO_FILTER_RATE: Fp = Fp::lit("160");
/// Right shift applied to the I term.
const I_TERM_SHIFT: u32 = 4;

#[derive(Debug, Clone, Copy)]
pub struct PidInput {
    pub angle_error: Axes,
    pub gyro_rate: Axes,
    pub dt: Fp,
    /// Throttle already mapped to `[0, 1]`.
    pub throttle_output: Fp,
    /// Throttle stick below the low threshold.
    pub grounded: bool,
}

/// `(throttle - 0.5) * factor + 1`.
pub fn gain_schedule_multiplier(throttle_output: Fp, factor: Fp) -> Fp {
    mul(throttle_output - HALF, factor) + ONE
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AttitudePid {
    integrated_angle_error: Axes,
    /// Smoothed body rate, readout only. The D term works on the raw rate.
    filtered_gyro_rate: Axes,
}

impl AttitudePid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn integrated_angle_error(&self) -> Axes {
        self.integrated_angle_error
    }

    pub fn filtered_gyro_rate(&self) -> Axes {
        self.filtered_gyro_rate
    }

    pub fn update(&mut self, input: &PidInput, gains: &PidGains, profile: &AirframeProfile) -> Axes {
        let multiplier =
            gain_schedule_multiplier(input.throttle_output, profile.gain_scheduling_factor);
        let mut output = [ZERO; 3];

        for axis in Axis::ALL {
            let x = axis.index();
            let integrated = &mut self.integrated_angle_error[x];

            if input.grounded {
                // Can't correct anything on the ground: bleed the integrator off.
                low_pass(integrated, ZERO, input.dt, GROUND_BLEED_RATE);
                low_pass(&mut self.filtered_gyro_rate[x], ZERO, input.dt, GROUND_BLEED_RATE);
            } else {
                *integrated = integrated.saturating_add(mul(input.angle_error[x], input.dt));
                low_pass(
                    &mut self.filtered_gyro_rate[x],
                    input.gyro_rate[x],
                    input.dt,
                    GYRO_FILTER_RATE,
                );
            }
            *integrated = (*integrated).clamp(-INTEGRATED_ANGLE_ERROR_LIMIT, INTEGRATED_ANGLE_ERROR_LIMIT);

            let p = mul(input.angle_error[x], gains.p[x]);
            let d = mul(input.gyro_rate[x], gains.d[x]);
            let i = shr(mul(*integrated, gains.i[x]), I_TERM_SHIFT);
            let raw = p.saturating_sub(d).saturating_add(i);

            output[x] = mul(multiplier, raw);
        }

        if profile.invert_yaw_output {
            output[Axis::Yaw.index()] = output[Axis::Yaw.index()].saturating_neg();
        }
        output
    }
}
