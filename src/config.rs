//! Airframe profiles and gain presets.
//!
//! The profile is chosen once at startup and handed to the controller; the
//! control path reads it, never the board identity.

use crate::fixed_point::{Fp, ZERO};
use crate::settings::PidGains;
use crate::state::FlightMode;

/// Below this the throttle counts as "low" for arming, start latch and motor stop.
pub const FP_STICK_LOW: Fp = Fp::lit("-0.9");
/// Stick extremes used by the arm/disarm and mode-select gestures.
pub const FP_STICK_X4_HIGH: Fp = Fp::lit("0.5");
pub const FP_STICK_X4_LOW: Fp = Fp::lit("-0.5");
/// Roll stick deadband for the calibration gesture.
pub const FP_RX_MOVE_LOW: Fp = Fp::lit("-0.2");
pub const FP_RX_MOVE_HIGH: Fp = Fp::lit("0.2");

pub const GESTURE_TIMEOUT_US: u32 = 1_000_000;
pub const CALIBRATION_GESTURE_CROSSINGS: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Airframe {
    HubsanH107L,
    HubsanH107D,
    JxdJd385,
}

/// Which yaw extreme arms the aircraft; the opposite one disarms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ArmYaw {
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GestureThresholds {
    pub move_low: Fp,
    pub move_high: Fp,
    pub timeout_us: u32,
    pub required_crossings: u8,
}

impl Default for GestureThresholds {
    fn default() -> Self {
        Self {
            move_low: FP_RX_MOVE_LOW,
            move_high: FP_RX_MOVE_HIGH,
            timeout_us: GESTURE_TIMEOUT_US,
            required_crossings: CALIBRATION_GESTURE_CROSSINGS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AirframeProfile {
    pub airframe: Airframe,
    pub stick_low: Fp,
    pub stick_extreme_high: Fp,
    pub stick_extreme_low: Fp,
    pub arm_yaw: ArmYaw,
    /// Flip the yaw PID output for the airframe's propeller rotation.
    pub invert_yaw_output: bool,
    pub throttle_idle_offset: Fp,
    pub min_motor_output: Fp,
    /// 1.0 gives 0.5x authority at zero throttle and 1.5x at full throttle.
    pub gain_scheduling_factor: Fp,
    pub gesture: GestureThresholds,
    pub has_vtx_camera: bool,
}

impl AirframeProfile {
    pub fn new(airframe: Airframe) -> Self {
        let base = Self {
            airframe,
            stick_low: FP_STICK_LOW,
            stick_extreme_high: FP_STICK_X4_HIGH,
            stick_extreme_low: FP_STICK_X4_LOW,
            arm_yaw: ArmYaw::High,
            invert_yaw_output: true,
            throttle_idle_offset: ZERO,
            min_motor_output: ZERO,
            gain_scheduling_factor: Fp::lit("1.0"),
            gesture: GestureThresholds::default(),
            has_vtx_camera: false,
        };

        match airframe {
            Airframe::HubsanH107L => base,
            Airframe::HubsanH107D => Self {
                has_vtx_camera: true,
                ..base
            },
            // Props turn the other way round on this frame.
            Airframe::JxdJd385 => Self {
                invert_yaw_output: false,
                throttle_idle_offset: Fp::lit("0.05"),
                ..base
            },
        }
    }
}

/// Gains loaded on the arming edge for the selected flight mode.
pub fn preset_gains(mode: FlightMode) -> PidGains {
    match mode {
        FlightMode::Level => PidGains::from_raw([180, 200, 300], [64, 64, 0], [90, 100, 15]),
        FlightMode::SemiAcro | FlightMode::FullAcro => {
            PidGains::from_raw([300, 300, 300], [32, 32, 0], [90, 90, 90])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Axis;

    #[test]
    fn test_profiles_differ_only_where_airframes_do() {
        let l = AirframeProfile::new(Airframe::HubsanH107L);
        let d = AirframeProfile::new(Airframe::HubsanH107D);
        let j = AirframeProfile::new(Airframe::JxdJd385);

        assert!(!l.has_vtx_camera);
        assert!(d.has_vtx_camera);
        assert!(l.invert_yaw_output && d.invert_yaw_output);
        assert!(!j.invert_yaw_output);
        assert_eq!(l.stick_low, j.stick_low);
        assert!(j.throttle_idle_offset > ZERO);
    }

    #[test]
    fn test_level_preset_is_softer_on_roll() {
        let level = preset_gains(FlightMode::Level);
        let acro = preset_gains(FlightMode::FullAcro);
        assert!(level.p[Axis::Roll.index()] < acro.p[Axis::Roll.index()]);
        assert_eq!(level.i[Axis::Yaw.index()], ZERO);
        assert_eq!(acro, preset_gains(FlightMode::SemiAcro));
    }
}
