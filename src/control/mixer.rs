//! Quad-X motor mixing and the arming safety override.

use crate::config::AirframeProfile;
use crate::control::arming::ArmingStateMachine;
use crate::fixed_point::{shr, Fp, HALF, ONE, ZERO};
use crate::hal::MotorOutput;
use crate::state::{Axes, Axis};

pub const MOTOR_COUNT: usize = 4;

pub type MotorCommands = [Fp; MOTOR_COUNT];

/// Roll, pitch and yaw signs per motor, in driver index order.
const QUAD_X: [[i8; 3]; MOTOR_COUNT] = [
    [-1, 1, -1],
    [-1, -1, 1],
    [1, 1, 1],
    [1, -1, -1],
];

/// Maps the throttle stick from `[-1, 1)` to `[0, 1]` plus the idle offset.
pub fn throttle_output(throttle_stick: Fp, idle_offset: Fp) -> Fp {
    (shr(throttle_stick, 1) + HALF)
        .saturating_add(idle_offset)
        .clamp(ZERO, ONE)
}

#[derive(Debug, Clone, Copy)]
pub struct MotorMixer {
    min_output: Fp,
}

impl MotorMixer {
    pub fn new(profile: &AirframeProfile) -> Self {
        Self {
            min_output: profile.min_motor_output,
        }
    }

    pub fn min_output(&self) -> Fp {
        self.min_output
    }

    /// Plain mix, clamped to `[min_output, 1]`. No safety gate.
    pub fn mix(&self, throttle_output: Fp, pid: &Axes) -> MotorCommands {
        QUAD_X.map(|signs| {
            let value = Axis::ALL.iter().fold(throttle_output, |acc, &axis| {
                let term = pid[axis.index()];
                if signs[axis.index()] > 0 {
                    acc.saturating_add(term)
                } else {
                    acc.saturating_sub(term)
                }
            });
            value.clamp(self.min_output, ONE)
        })
    }

    /// Mix with the arming override applied. Anything but a started, armed
    /// session with throttle up yields `min_output` on every motor.
    pub fn commands(
        &self,
        arming: &ArmingStateMachine,
        profile: &AirframeProfile,
        throttle_stick: Fp,
        throttle_output: Fp,
        pid: &Axes,
    ) -> MotorCommands {
        if arming.motors_enabled(throttle_stick, profile) {
            self.mix(throttle_output, pid)
        } else {
            [self.min_output; MOTOR_COUNT]
        }
    }

    /// Computes the gated commands and hands them to the motor driver.
    pub fn drive<M: MotorOutput>(
        &self,
        arming: &ArmingStateMachine,
        profile: &AirframeProfile,
        throttle_stick: Fp,
        throttle_output: Fp,
        pid: &Axes,
        motors: &mut M,
    ) -> MotorCommands {
        let commands = self.commands(arming, profile, throttle_stick, throttle_output, pid);
        if arming.motors_enabled(throttle_stick, profile) {
            for (index, &value) in commands.iter().enumerate() {
                motors.set_motor(index, value);
            }
        } else {
            motors.set_all(self.min_output);
        }
        commands
    }
}
