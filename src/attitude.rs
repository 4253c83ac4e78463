//! Gyro-only attitude source used by the firmware.
//!
//! Integrates bias-corrected body rates into an angle estimate and turns
//! stick positions into the angle error the PID consumes. While grounded the
//! estimate is assumed level.

use crate::fixed_point::{mul, Fp, ZERO};
use crate::hal::{AttitudeSource, CalibrationBiases};
use crate::settings::UserSettings;
use crate::state::{Axes, Axis, FlightMode, PilotInput};

/// ICM-42688 at ±2000 dps: 16.4 LSB per deg/s.
pub const GYRO_DPS_PER_LSB: Fp = Fp::lit("0.0609756");

/// Tilt at full stick in level mode, degrees.
pub const LEVEL_MODE_MAX_TILT: Fp = Fp::lit("55");

/// Estimated angles stay inside ±this, degrees.
const ANGLE_LIMIT: Fp = Fp::lit("180");

#[derive(Debug, Clone)]
pub struct GyroAttitude {
    gyro_bias: Axes,
    gyro_rate: Axes,
    angle: Axes,
    /// Accumulated rate error for axes flown in rate mode.
    rate_error: Axes,
    max_pitch_and_roll_rate: Fp,
    max_yaw_rate: Fp,
}

impl GyroAttitude {
    pub fn new(settings: &UserSettings) -> Self {
        Self {
            gyro_bias: settings.gyro_calibration,
            gyro_rate: [ZERO; 3],
            angle: [ZERO; 3],
            rate_error: [ZERO; 3],
            max_pitch_and_roll_rate: settings.max_pitch_and_roll_rate,
            max_yaw_rate: settings.max_yaw_rate,
        }
    }

    /// Latches one raw gyro sample. The angle moves on the next
    /// [`AttitudeSource::advance`].
    pub fn update_gyro(&mut self, raw: [i16; 3]) {
        for axis in Axis::ALL {
            let n = axis.index();
            let counts = Fp::from_num(raw[n]).saturating_sub(self.gyro_bias[n]);
            self.gyro_rate[n] = mul(counts, GYRO_DPS_PER_LSB);
        }
    }

    pub fn angle(&self) -> Axes {
        self.angle
    }

    fn max_rate(&self, axis: Axis) -> Fp {
        match axis {
            Axis::Yaw => self.max_yaw_rate,
            Axis::Roll | Axis::Pitch => self.max_pitch_and_roll_rate,
        }
    }

    fn stick(pilot: &PilotInput, axis: Axis) -> Fp {
        match axis {
            Axis::Roll => pilot.roll(),
            Axis::Pitch => pilot.pitch(),
            Axis::Yaw => pilot.yaw(),
        }
    }
}

impl AttitudeSource for GyroAttitude {
    fn gyro_rate(&self) -> Axes {
        self.gyro_rate
    }

    fn advance(&mut self, dt: Fp) {
        for n in 0..3 {
            self.angle[n] = self.angle[n]
                .saturating_add(mul(self.gyro_rate[n], dt))
                .clamp(-ANGLE_LIMIT, ANGLE_LIMIT);
        }
    }

    fn angle_error(&mut self, pilot: &PilotInput, mode: FlightMode, dt: Fp) -> Axes {
        let mut error = [ZERO; 3];
        for axis in Axis::ALL {
            let n = axis.index();
            let stick = Self::stick(pilot, axis);
            let level = mode == FlightMode::Level && axis != Axis::Yaw;

            error[n] = if level {
                mul(stick, LEVEL_MODE_MAX_TILT).saturating_sub(self.angle[n])
            } else {
                let rate_error = mul(stick, self.max_rate(axis)).saturating_sub(self.gyro_rate[n]);
                self.rate_error[n] = self.rate_error[n].saturating_add(mul(rate_error, dt));
                self.rate_error[n]
            };
        }
        error
    }

    fn reset_pilot_control(&mut self) {
        self.rate_error = [ZERO; 3];
        self.angle = [ZERO; 3];
    }

    fn apply_calibration(&mut self, biases: &CalibrationBiases) {
        self.gyro_bias = biases.gyro;
    }
}
