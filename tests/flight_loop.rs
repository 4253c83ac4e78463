//! Whole-controller behaviour driven through mock sensors and motors.

use std::cell::RefCell;
use std::convert::Infallible;
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType, OutputPin};

use x4_flight::config::{preset_gains, Airframe, AirframeProfile};
use x4_flight::control::mixer::MOTOR_COUNT;
use x4_flight::drivers::vtx::{VtxTransmitter, FRAME_TABLE};
use x4_flight::fixed_point::{Fp, HALF, ONE, ZERO};
use x4_flight::hal::{AttitudeSource, CalibrationBiases, MotorOutput, SensorCalibration};
use x4_flight::settings::{CheckboxItem, RamSettingsStore, SettingsStore, UserSettings};
use x4_flight::state::{ArmState, Axes, FlightMode, PilotInput, RcChannel};
use x4_flight::{FlightController, LoopIo};

const STEP_US: u32 = 2_000;
const STICK_MAX: Fp = Fp::lit("0.999");

#[derive(Default)]
struct MockAttitude {
    error: Axes,
    gyro: Axes,
    resets: u32,
    biases: Option<CalibrationBiases>,
    advanced: Vec<Fp>,
}

impl AttitudeSource for MockAttitude {
    fn gyro_rate(&self) -> Axes {
        self.gyro
    }

    fn advance(&mut self, dt: Fp) {
        self.advanced.push(dt);
    }

    fn angle_error(&mut self, _pilot: &PilotInput, _mode: FlightMode, dt: Fp) -> Axes {
        // The estimate must already have moved by the same slice.
        assert_eq!(self.advanced.last(), Some(&dt));
        self.error
    }

    fn reset_pilot_control(&mut self) {
        self.resets += 1;
    }

    fn apply_calibration(&mut self, biases: &CalibrationBiases) {
        self.biases = Some(*biases);
    }
}

#[derive(Default)]
struct MockCalibration {
    runs: u32,
}

impl SensorCalibration for MockCalibration {
    fn calibrate_gyro_and_accel(&mut self) -> CalibrationBiases {
        self.runs += 1;
        CalibrationBiases {
            gyro: [Fp::lit("1"), Fp::lit("2"), Fp::lit("3")],
            accel: [ZERO, ZERO, Fp::lit("-4")],
        }
    }
}

#[derive(Default)]
struct RecordingMotors {
    outputs: [Fp; MOTOR_COUNT],
    writes: u32,
}

impl MotorOutput for RecordingMotors {
    fn set_motor(&mut self, index: usize, value: Fp) {
        self.outputs[index] = value;
        self.writes += 1;
    }
}

struct Rig {
    controller: FlightController,
    attitude: MockAttitude,
    calibration: MockCalibration,
    store: RamSettingsStore,
    motors: RecordingMotors,
    now: u32,
}

impl Rig {
    fn new(airframe: Airframe) -> Self {
        Self::starting_at(airframe, 0)
    }

    fn starting_at(airframe: Airframe, now: u32) -> Self {
        let mut store = RamSettingsStore::new();
        let controller = FlightController::from_store(AirframeProfile::new(airframe), &mut store, now);
        Self {
            controller,
            attitude: MockAttitude::default(),
            calibration: MockCalibration::default(),
            store,
            motors: RecordingMotors::default(),
            now,
        }
    }

    fn step(&mut self, pilot: &PilotInput, failsafe: bool) -> [Fp; MOTOR_COUNT] {
        self.step_after(STEP_US, pilot, failsafe)
    }

    fn step_after(&mut self, gap_us: u32, pilot: &PilotInput, failsafe: bool) -> [Fp; MOTOR_COUNT] {
        self.now = self.now.wrapping_add(gap_us);
        let mut io = LoopIo {
            attitude: &mut self.attitude,
            calibration: &mut self.calibration,
            store: &mut self.store,
            motors: &mut self.motors,
        };
        self.controller.iterate(self.now, pilot, failsafe, &mut io)
    }

    fn hold(&mut self, pilot: &PilotInput, steps: usize) -> [Fp; MOTOR_COUNT] {
        let mut last = [ZERO; MOTOR_COUNT];
        for _ in 0..steps {
            last = self.step(pilot, false);
        }
        last
    }

    fn arm(&mut self, roll: Fp) {
        self.step(&sticks(-ONE, roll, STICK_MAX), false);
        self.step(&sticks(-ONE, ZERO, ZERO), false);
    }
}

fn sticks(throttle: Fp, roll: Fp, yaw: Fp) -> PilotInput {
    let mut p = PilotInput::default();
    p.set(RcChannel::Throttle, throttle);
    p.set(RcChannel::Roll, roll);
    p.set(RcChannel::Yaw, yaw);
    p
}

#[test]
fn test_arm_start_disarm_sequence() {
    let mut rig = Rig::new(Airframe::HubsanH107L);

    let idle = rig.hold(&sticks(-ONE, ZERO, ZERO), 5);
    assert_eq!(idle, [ZERO; MOTOR_COUNT]);
    assert_eq!(rig.controller.arm_state(), ArmState::Disarmed);

    rig.arm(ZERO);
    assert_eq!(rig.controller.arm_state(), ArmState::ArmedNotStarted);
    assert_eq!(rig.controller.flight_mode(), FlightMode::Level);
    assert_eq!(rig.calibration.runs, 1);
    assert_eq!(rig.controller.settings().pid, preset_gains(FlightMode::Level));
    assert_eq!(rig.attitude.biases.map(|b| b.gyro[2]), Some(Fp::lit("3")));
    assert_eq!(rig.controller.settings().gyro_calibration[1], Fp::lit("2"));

    // Armed but not started: still idle.
    assert_eq!(rig.step(&sticks(-ONE, ZERO, ZERO), false), [ZERO; MOTOR_COUNT]);

    // Mid throttle with no error: every motor gets the throttle.
    let flying = rig.step(&sticks(ZERO, ZERO, ZERO), false);
    assert_eq!(rig.controller.arm_state(), ArmState::ArmedStarted);
    assert_eq!(flying, [HALF; MOTOR_COUNT]);
    assert_eq!(rig.motors.outputs, [HALF; MOTOR_COUNT]);

    // Throttle back below the low threshold: motors gated while still armed.
    let gated = rig.step(&sticks(-ONE, ZERO, ZERO), false);
    assert_eq!(gated, [ZERO; MOTOR_COUNT]);
    assert!(rig.controller.arm_state().is_armed());

    rig.step(&sticks(-ONE, ZERO, -STICK_MAX), false);
    assert_eq!(rig.controller.arm_state(), ArmState::Disarmed);
    assert_eq!(rig.step(&sticks(ZERO, ZERO, ZERO), false), [ZERO; MOTOR_COUNT]);
    assert_eq!(rig.motors.outputs, [ZERO; MOTOR_COUNT]);
}

#[test]
fn test_motors_never_spin_while_disarmed() {
    let mut rig = Rig::new(Airframe::JxdJd385);
    rig.attitude.error = [Fp::lit("20"), Fp::lit("-15"), Fp::lit("5")];
    rig.attitude.gyro = [Fp::lit("100"), ZERO, Fp::lit("-50")];

    let mut throttle = -ONE;
    while throttle < ONE - Fp::lit("0.1") {
        let out = rig.step(&sticks(throttle, ZERO, ZERO), false);
        assert_eq!(out, [ZERO; MOTOR_COUNT], "throttle {}", throttle);
        throttle += Fp::lit("0.1");
    }
    assert_eq!(rig.calibration.runs, 0);
}

#[test]
fn test_roll_at_arming_selects_mode_and_gains() {
    let mut rig = Rig::new(Airframe::HubsanH107L);
    rig.arm(-STICK_MAX);
    assert_eq!(rig.controller.flight_mode(), FlightMode::FullAcro);
    assert_eq!(rig.controller.settings().pid, preset_gains(FlightMode::FullAcro));
    let full = CheckboxItem::FullAcro.mask();
    assert_eq!(rig.controller.status().active_items & full, full);

    rig.step(&sticks(-ONE, ZERO, -STICK_MAX), false);
    rig.arm(STICK_MAX);
    assert_eq!(rig.controller.flight_mode(), FlightMode::SemiAcro);
    let status = rig.controller.status();
    assert_ne!(status.active_items & CheckboxItem::SemiAcro.mask(), 0);
    assert_eq!(status.active_items & full, 0);
}

#[test]
fn test_attitude_error_moves_motors_in_opposite_pairs() {
    let mut rig = Rig::new(Airframe::HubsanH107L);
    rig.arm(ZERO);
    rig.step(&sticks(ZERO, ZERO, ZERO), false);

    rig.attitude.error = [Fp::lit("10"), ZERO, ZERO];
    let out = rig.hold(&sticks(ZERO, ZERO, ZERO), 3);
    // Roll sign is negative on motors 0 and 1.
    assert!(out[0] < HALF && out[1] < HALF);
    assert!(out[2] > HALF && out[3] > HALF);
    assert_eq!(out[0], out[1]);
    assert_eq!(out[2], out[3]);
}

#[test]
fn test_calibration_gesture_saves_settings_once() {
    let mut rig = Rig::new(Airframe::HubsanH107L);
    let low = sticks(-ONE, Fp::lit("-0.8"), ZERO);
    let high = sticks(-ONE, Fp::lit("0.8"), ZERO);

    for n in 0..6 {
        let pilot = if n % 2 == 0 { &low } else { &high };
        rig.hold(pilot, 10);
    }
    assert_eq!(rig.calibration.runs, 1);
    assert_eq!(rig.store.save_count(), 1);
    assert_eq!(rig.controller.arm_state(), ArmState::Disarmed);

    let saved = rig.store.load().unwrap();
    assert_eq!(saved.gyro_calibration, [Fp::lit("1"), Fp::lit("2"), Fp::lit("3")]);
    assert_eq!(saved.acc_calibration[2], Fp::lit("-4"));

    // Holding the stick at one end does not fire again.
    rig.hold(&high, 50);
    assert_eq!(rig.store.save_count(), 1);
}

#[test]
fn test_gesture_not_evaluated_while_armed() {
    let mut rig = Rig::new(Airframe::HubsanH107L);
    rig.arm(ZERO);
    assert_eq!(rig.calibration.runs, 1);

    let low = sticks(-ONE, Fp::lit("-0.8"), ZERO);
    let high = sticks(-ONE, Fp::lit("0.8"), ZERO);
    for n in 0..10 {
        rig.hold(if n % 2 == 0 { &low } else { &high }, 10);
    }
    assert!(rig.controller.arm_state().is_armed());
    assert_eq!(rig.calibration.runs, 1);
    assert_eq!(rig.store.save_count(), 0);
}

#[test]
fn test_slow_wiggle_is_ignored() {
    let mut rig = Rig::new(Airframe::HubsanH107L);
    let low = sticks(-ONE, Fp::lit("-0.8"), ZERO);
    let high = sticks(-ONE, Fp::lit("0.8"), ZERO);

    // 1.2 s between crossings is past the gesture timeout.
    for n in 0..12 {
        let pilot = if n % 2 == 0 { &low } else { &high };
        rig.hold(pilot, 600);
    }
    assert_eq!(rig.store.save_count(), 0);
}

#[test]
fn test_gesture_ignored_with_throttle_up() {
    let mut rig = Rig::new(Airframe::HubsanH107L);
    let low = sticks(ZERO, Fp::lit("-0.8"), ZERO);
    let high = sticks(ZERO, Fp::lit("0.8"), ZERO);
    for n in 0..8 {
        rig.hold(if n % 2 == 0 { &low } else { &high }, 10);
    }
    assert_eq!(rig.store.save_count(), 0);
}

#[test]
fn test_boot_uses_persisted_settings() {
    let mut store = RamSettingsStore::new();
    let mut settings = UserSettings::default();
    settings.max_yaw_rate = Fp::lit("720");
    store.save(&settings).unwrap();

    let controller = FlightController::from_store(AirframeProfile::new(Airframe::HubsanH107L), &mut store, 0);
    assert_eq!(controller.settings().max_yaw_rate, Fp::lit("720"));

    let fresh = Rig::new(Airframe::HubsanH107L);
    assert_eq!(*fresh.controller.settings(), UserSettings::default());
}

#[test]
fn test_failsafe_is_reported_but_does_not_disarm() {
    let mut rig = Rig::new(Airframe::HubsanH107L);
    rig.arm(ZERO);
    rig.step(&sticks(ZERO, ZERO, ZERO), false);

    let out = rig.step(&sticks(ZERO, ZERO, ZERO), true);
    let status = rig.controller.status();
    assert!(status.failsafe);
    assert_eq!(status.arm_state, ArmState::ArmedStarted);
    assert_eq!(out, [HALF; MOTOR_COUNT]);

    rig.step(&sticks(ZERO, ZERO, ZERO), false);
    assert!(!rig.controller.status().failsafe);
}

#[test]
fn test_grounded_resets_pilot_control_and_bleeds_integrator() {
    let mut rig = Rig::new(Airframe::HubsanH107L);
    rig.arm(ZERO);
    rig.step(&sticks(ZERO, ZERO, ZERO), false);

    rig.attitude.error = [Fp::lit("50"), ZERO, ZERO];
    rig.hold(&sticks(ZERO, ZERO, ZERO), 100);
    let wound = rig.controller.pid().integrated_angle_error()[0];
    assert!(wound > ZERO);

    let resets = rig.attitude.resets;
    rig.hold(&sticks(-ONE, ZERO, ZERO), 100);
    assert_eq!(rig.attitude.resets, resets + 100);
    assert!(rig.controller.pid().integrated_angle_error()[0] < wound);
}

#[test]
fn test_attitude_advances_by_this_iterations_slice() {
    let mut rig = Rig::new(Airframe::HubsanH107L);
    rig.step(&sticks(-ONE, ZERO, ZERO), false);
    // A skipped tick leaves a double-length gap before the next iteration.
    rig.step_after(2 * STEP_US, &sticks(-ONE, ZERO, ZERO), false);

    let expected = x4_flight::control::clock::timesliver_from_micros(2 * STEP_US);
    assert_eq!(rig.attitude.advanced.len(), 2);
    assert_eq!(rig.attitude.advanced[1], expected);
    assert_eq!(rig.controller.dt(), expected);
}

#[test]
fn test_loop_survives_counter_wrap() {
    let mut rig = Rig::starting_at(Airframe::HubsanH107L, u32::MAX - 3 * STEP_US);
    rig.arm(ZERO);
    rig.hold(&sticks(ZERO, ZERO, ZERO), 10);
    assert_eq!(rig.controller.dt(), x4_flight::control::clock::timesliver_from_micros(STEP_US));
    assert_eq!(rig.motors.outputs, [HALF; MOTOR_COUNT]);
}

// ── Video transmitter ─────────────────────────────────────────────────────────

#[derive(Clone, Default)]
struct Wire(Rc<RefCell<Vec<(u8, bool)>>>);

struct WirePin {
    id: u8,
    wire: Wire,
}

impl ErrorType for WirePin {
    type Error = Infallible;
}

impl OutputPin for WirePin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.wire.0.borrow_mut().push((self.id, false));
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.wire.0.borrow_mut().push((self.id, true));
        Ok(())
    }
}

struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

const CS: u8 = 0;
const CLK: u8 = 1;
const DATA: u8 = 2;

fn frames_on(wire: &Wire) -> Vec<u32> {
    let mut frames = Vec::new();
    let (mut data, mut value) = (false, 0u32);
    for &(id, level) in wire.0.borrow().iter() {
        match (id, level) {
            (CS, false) => value = 0,
            (CS, true) => frames.push(value),
            (CLK, true) => value = (value << 1) | data as u32,
            (DATA, level) => data = level,
            _ => {}
        }
    }
    frames
}

#[test]
fn test_vtx_retunes_only_on_change() {
    let wire = Wire::default();
    let pin = |id| WirePin { id, wire: wire.clone() };
    let mut vtx = VtxTransmitter::new(pin(CS), pin(CLK), pin(DATA), NoDelay);
    vtx.init().unwrap();

    for _ in 0..5 {
        vtx.set_frequency(5865).unwrap();
    }
    vtx.set_frequency(5730).unwrap();
    vtx.set_frequency(5730).unwrap();

    let frames = frames_on(&wire);
    // The first CS-high is the idle level before the init frame.
    assert_eq!(&frames[2..], &[FRAME_TABLE[28], FRAME_TABLE[1]]);
    assert_eq!(frames.len(), 4);
}
