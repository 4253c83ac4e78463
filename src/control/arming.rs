//! Arm/disarm transitions and flight-mode selection.

use crate::config::{AirframeProfile, ArmYaw};
use crate::control::gesture::{classify, StickSide};
use crate::fixed_point::Fp;
use crate::hal::{CalibrationBiases, SensorCalibration};
use crate::state::{ArmState, FlightMode, PilotInput};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmingEvent {
    Armed {
        mode: FlightMode,
        biases: CalibrationBiases,
    },
    Disarmed,
    Started,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ArmingStateMachine {
    state: ArmState,
    mode: FlightMode,
}

impl ArmingStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ArmState {
        self.state
    }

    pub fn flight_mode(&self) -> FlightMode {
        self.mode
    }

    /// Mode picked from roll deflection at the moment of arming.
    pub fn select_mode(roll: Fp, profile: &AirframeProfile) -> FlightMode {
        match classify(roll, profile.stick_extreme_low, profile.stick_extreme_high) {
            StickSide::Low => FlightMode::FullAcro,
            StickSide::High => FlightMode::SemiAcro,
            StickSide::Center => FlightMode::Level,
        }
    }

    /// Advances the state machine by one iteration.
    ///
    /// The arming edge runs the sensor calibration to completion before
    /// returning; no other transition touches the sensors.
    pub fn update<C: SensorCalibration>(
        &mut self,
        pilot: &PilotInput,
        profile: &AirframeProfile,
        calibration: &mut C,
    ) -> Option<ArmingEvent> {
        let throttle_low = pilot.throttle() < profile.stick_low;
        let yaw = classify(pilot.yaw(), profile.stick_extreme_low, profile.stick_extreme_high);
        let (arm_side, disarm_side) = match profile.arm_yaw {
            ArmYaw::High => (StickSide::High, StickSide::Low),
            ArmYaw::Low => (StickSide::Low, StickSide::High),
        };

        match self.state {
            ArmState::Disarmed => {
                if throttle_low && yaw == arm_side {
                    self.mode = Self::select_mode(pilot.roll(), profile);
                    self.state = ArmState::ArmedNotStarted;
                    let biases = calibration.calibrate_gyro_and_accel();
                    info!("armed, mode {}", self.mode);
                    return Some(ArmingEvent::Armed {
                        mode: self.mode,
                        biases,
                    });
                }
            }
            ArmState::ArmedNotStarted | ArmState::ArmedStarted => {
                if throttle_low && yaw == disarm_side {
                    self.state = ArmState::Disarmed;
                    info!("disarmed");
                    return Some(ArmingEvent::Disarmed);
                }
                if self.state == ArmState::ArmedNotStarted && pilot.throttle() > profile.stick_low {
                    self.state = ArmState::ArmedStarted;
                    debug!("started");
                    return Some(ArmingEvent::Started);
                }
            }
        }
        None
    }

    /// The motor-enable gate: started inside an armed session and throttle up.
    pub fn motors_enabled(&self, throttle: Fp, profile: &AirframeProfile) -> bool {
        self.state == ArmState::ArmedStarted && throttle >= profile.stick_low
    }
}
