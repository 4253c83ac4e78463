//! Per-iteration time base.

use crate::fixed_point::{Fp, ONE_FIFTIETH};

/// `(1 << SHIFT) * (1 << SHIFT) * 1e-6`: microseconds to seconds, pre-shift.
pub const MICROS_TO_SECONDS: u64 = 4295;

/// Converts an elapsed microsecond count to fixed-point seconds, capped at 1/50 s.
pub fn timesliver_from_micros(elapsed_us: u32) -> Fp {
    let raw = (elapsed_us as u64 * MICROS_TO_SECONDS) >> crate::fixed_point::SHIFT;
    if raw > ONE_FIFTIETH.to_bits() as u64 {
        ONE_FIFTIETH
    } else {
        Fp::from_bits(raw as i32)
    }
}

/// Measures the time slice since the previous iteration.
///
/// A stalled iteration (debugger halt, blocking calibration) never produces
/// more than 1/50 s, so a single step cannot kick the integrators.
#[derive(Debug, Clone, Copy)]
pub struct TimeSliverClock {
    last_us: u32,
    dt: Fp,
}

impl TimeSliverClock {
    pub fn new(now_us: u32) -> Self {
        Self {
            last_us: now_us,
            dt: Fp::ZERO,
        }
    }

    /// Call exactly once per iteration.
    pub fn tick(&mut self, now_us: u32) -> Fp {
        let elapsed = now_us.wrapping_sub(self.last_us);
        self.last_us = now_us;
        self.dt = timesliver_from_micros(elapsed);
        self.dt
    }

    /// Time slice produced by the last [`tick`](Self::tick).
    pub fn dt(&self) -> Fp {
        self.dt
    }
}
