//! Seams to the hardware and to the collaborators outside the control core.
//!
//! Pin-level work goes through `embedded-hal`; everything else the loop needs
//! from the board is one of these traits.

use crate::fixed_point::Fp;
use crate::state::{Axes, FlightMode, PilotInput};

/// Free-running microsecond counter. Wraps at `u32::MAX`; callers subtract
/// with `wrapping_sub`.
pub trait MicrosClock {
    fn now_us(&self) -> u32;
}

/// Motor driver. `value` is already clamped to `[MIN_MOTOR_OUTPUT, 1.0]`.
pub trait MotorOutput {
    fn set_motor(&mut self, index: usize, value: Fp);

    fn set_all(&mut self, value: Fp) {
        for index in 0..crate::control::mixer::MOTOR_COUNT {
            self.set_motor(index, value);
        }
    }
}

/// Bias offsets measured while the airframe sits still.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CalibrationBiases {
    pub gyro: Axes,
    pub accel: Axes,
}

/// Blocking gyro/accelerometer bias measurement.
///
/// Runs to completion inside the iteration that requested it.
pub trait SensorCalibration {
    fn calibrate_gyro_and_accel(&mut self) -> CalibrationBiases;
}

/// Attitude estimator and pilot-control mapping.
pub trait AttitudeSource {
    /// Body rates from the gyro, bias removed.
    fn gyro_rate(&self) -> Axes;

    /// Advances the attitude estimate by this iteration's time slice.
    fn advance(&mut self, dt: Fp);

    /// Difference between desired and estimated attitude for this iteration.
    fn angle_error(&mut self, pilot: &PilotInput, mode: FlightMode, dt: Fp) -> Axes;

    /// Forget accumulated pilot targets while sitting on the ground.
    fn reset_pilot_control(&mut self);

    /// New biases from a calibration run.
    fn apply_calibration(&mut self, biases: &CalibrationBiases);
}
