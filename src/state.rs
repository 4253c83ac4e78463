//! Shared state types passed between the receiver, the estimator and the
//! control loop.
//!
//! All types are `Copy`; the control loop is the only writer of controller
//! state, everything here is either an input snapshot or a status readout.

use crate::fixed_point::{Fp, ZERO};

// ── Axes ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Axis {
    Roll = 0,
    Pitch = 1,
    Yaw = 2,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::Roll, Axis::Pitch, Axis::Yaw];

    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Per-axis value triple, indexed by [`Axis::index`].
pub type Axes = [Fp; 3];

// ── Pilot input ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RcChannel {
    Throttle = 0,
    Roll = 1,
    Pitch = 2,
    Yaw = 3,
    Aux1 = 4,
    Aux2 = 5,
    Aux3 = 6,
    Aux4 = 7,
}

pub const RC_CHANNEL_COUNT: usize = 8;

/// Normalised stick positions in `[-1, 1)`, one snapshot per iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PilotInput {
    pub channels: [Fp; RC_CHANNEL_COUNT],
}

impl Default for PilotInput {
    fn default() -> Self {
        Self {
            channels: [ZERO; RC_CHANNEL_COUNT],
        }
    }
}

impl PilotInput {
    pub fn get(&self, channel: RcChannel) -> Fp {
        self.channels[channel as usize]
    }

    pub fn set(&mut self, channel: RcChannel, value: Fp) {
        self.channels[channel as usize] = value;
    }

    pub fn throttle(&self) -> Fp {
        self.get(RcChannel::Throttle)
    }

    pub fn roll(&self) -> Fp {
        self.get(RcChannel::Roll)
    }

    pub fn pitch(&self) -> Fp {
        self.get(RcChannel::Pitch)
    }

    pub fn yaw(&self) -> Fp {
        self.get(RcChannel::Yaw)
    }
}

// ── Controller state ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlightMode {
    #[default]
    Level,
    SemiAcro,
    FullAcro,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ArmState {
    #[default]
    Disarmed,
    ArmedNotStarted,
    ArmedStarted,
}

impl ArmState {
    pub fn is_armed(self) -> bool {
        !matches!(self, ArmState::Disarmed)
    }
}

/// Readout for indicator logic. Written once per iteration by the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControllerStatus {
    pub arm_state: ArmState,
    pub flight_mode: FlightMode,
    pub failsafe: bool,
    pub active_items: u16,
}

/// Heartbeat LED half-periods, microseconds.
const LED_SLOW_HALF_PERIOD_US: u32 = 500_000;
const LED_FAST_HALF_PERIOD_US: u32 = 100_000;

impl ControllerStatus {
    /// Indicator level at `now_us`: fast blink on link loss, solid while
    /// armed, slow blink otherwise.
    pub fn led_on(&self, now_us: u32) -> bool {
        if self.failsafe {
            (now_us / LED_FAST_HALF_PERIOD_US) % 2 == 0
        } else if self.arm_state.is_armed() {
            true
        } else {
            (now_us / LED_SLOW_HALF_PERIOD_US) % 2 == 0
        }
    }
}
