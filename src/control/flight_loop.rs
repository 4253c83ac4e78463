//! The control-loop aggregate.
//!
//! One `FlightController` owns every piece of mutable controller state (time
//! base, arming, gesture, integrators, live settings). The loop that calls
//! [`FlightController::iterate`] is its only writer.

use crate::config::{preset_gains, AirframeProfile};
use crate::control::arming::{ArmingEvent, ArmingStateMachine};
use crate::control::clock::TimeSliverClock;
use crate::control::gesture::StickGestureDetector;
use crate::control::mixer::{throttle_output, MotorCommands, MotorMixer};
use crate::control::pid::{AttitudePid, PidInput};
use crate::fixed_point::Fp;
use crate::hal::{AttitudeSource, CalibrationBiases, MotorOutput, SensorCalibration};
use crate::settings::{CheckboxItem, SettingsStore, UserSettings};
use crate::state::{ArmState, ControllerStatus, FlightMode, PilotInput};

/// Borrowed collaborators for one iteration.
pub struct LoopIo<'a, A, C, S, M> {
    pub attitude: &'a mut A,
    pub calibration: &'a mut C,
    pub store: &'a mut S,
    pub motors: &'a mut M,
}

pub struct FlightController {
    profile: AirframeProfile,
    settings: UserSettings,
    clock: TimeSliverClock,
    arming: ArmingStateMachine,
    calibration_gesture: StickGestureDetector,
    pid: AttitudePid,
    mixer: MotorMixer,
    status: ControllerStatus,
}

impl FlightController {
    pub fn new(profile: AirframeProfile, settings: UserSettings, now_us: u32) -> Self {
        Self {
            profile,
            settings,
            clock: TimeSliverClock::new(now_us),
            arming: ArmingStateMachine::new(),
            calibration_gesture: StickGestureDetector::new(profile.gesture),
            pid: AttitudePid::new(),
            mixer: MotorMixer::new(&profile),
            status: ControllerStatus::default(),
        }
    }

    /// Boots with persisted settings, falling back to defaults.
    pub fn from_store<S: SettingsStore>(profile: AirframeProfile, store: &mut S, now_us: u32) -> Self {
        let settings = match store.load() {
            Ok(settings) => {
                info!("user settings loaded");
                settings
            }
            Err(e) => {
                warn!("using default settings: {}", e);
                UserSettings::default()
            }
        };
        Self::new(profile, settings, now_us)
    }

    pub fn profile(&self) -> &AirframeProfile {
        &self.profile
    }

    pub fn settings(&self) -> &UserSettings {
        &self.settings
    }

    pub fn status(&self) -> ControllerStatus {
        self.status
    }

    pub fn arm_state(&self) -> ArmState {
        self.arming.state()
    }

    pub fn flight_mode(&self) -> FlightMode {
        self.arming.flight_mode()
    }

    pub fn pid(&self) -> &AttitudePid {
        &self.pid
    }

    pub fn dt(&self) -> Fp {
        self.clock.dt()
    }

    /// Runs one complete control iteration and returns what went to the motors.
    pub fn iterate<A, C, S, M>(
        &mut self,
        now_us: u32,
        pilot: &PilotInput,
        failsafe: bool,
        io: &mut LoopIo<'_, A, C, S, M>,
    ) -> MotorCommands
    where
        A: AttitudeSource,
        C: SensorCalibration,
        S: SettingsStore,
        M: MotorOutput,
    {
        let dt = self.clock.tick(now_us);
        io.attitude.advance(dt);
        let throttle = pilot.throttle();
        let grounded = throttle < self.profile.stick_low;

        if !self.arming.state().is_armed() && grounded {
            self.detect_stick_command(pilot, now_us, io);
        }

        match self.arming.update(pilot, &self.profile, io.calibration) {
            Some(ArmingEvent::Armed { mode, biases }) => {
                self.settings.pid = preset_gains(mode);
                self.apply_biases(&biases, io.attitude);
                self.calibration_gesture.reset();
            }
            Some(ArmingEvent::Disarmed) | Some(ArmingEvent::Started) | None => {}
        }

        let angle_error = io.attitude.angle_error(pilot, self.arming.flight_mode(), dt);
        if grounded {
            io.attitude.reset_pilot_control();
        }

        let throttle_output = throttle_output(throttle, self.profile.throttle_idle_offset);
        let pid_output = self.pid.update(
            &PidInput {
                angle_error,
                gyro_rate: io.attitude.gyro_rate(),
                dt,
                throttle_output,
                grounded,
            },
            &self.settings.pid,
            &self.profile,
        );

        let commands = self.mixer.drive(
            &self.arming,
            &self.profile,
            throttle,
            throttle_output,
            &pid_output,
            io.motors,
        );

        self.status = ControllerStatus {
            arm_state: self.arming.state(),
            flight_mode: self.arming.flight_mode(),
            failsafe,
            active_items: self.active_items(pilot),
        };
        commands
    }

    /// Six alternating roll-stick crossings while disarmed with throttle low:
    /// recalibrate and persist.
    fn detect_stick_command<A, C, S, M>(
        &mut self,
        pilot: &PilotInput,
        now_us: u32,
        io: &mut LoopIo<'_, A, C, S, M>,
    ) where
        A: AttitudeSource,
        C: SensorCalibration,
        S: SettingsStore,
    {
        if !self.calibration_gesture.update(pilot.roll(), now_us) {
            return;
        }

        info!("calibration gesture");
        let biases = io.calibration.calibrate_gyro_and_accel();
        self.apply_biases(&biases, io.attitude);
        match io.store.save(&self.settings) {
            Ok(()) => info!("user settings saved"),
            Err(e) => warn!("saving user settings failed: {}", e),
        }
    }

    fn apply_biases<A: AttitudeSource>(&mut self, biases: &CalibrationBiases, attitude: &mut A) {
        self.settings.gyro_calibration = biases.gyro;
        self.settings.acc_calibration = biases.accel;
        attitude.apply_calibration(biases);
    }

    fn active_items(&self, pilot: &PilotInput) -> u16 {
        let mut items = self.settings.active_items(pilot);
        if self.arming.state().is_armed() {
            let acro = CheckboxItem::FullAcro.mask() | CheckboxItem::SemiAcro.mask();
            items &= !acro;
            match self.arming.flight_mode() {
                FlightMode::FullAcro => items |= CheckboxItem::FullAcro.mask(),
                FlightMode::SemiAcro => items |= CheckboxItem::SemiAcro.mask(),
                FlightMode::Level => {}
            }
        }
        items
    }
}
