//! Debounced stick-gesture detection.

use crate::config::GestureThresholds;
use crate::fixed_point::Fp;

/// Where a stick sits relative to a pair of thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StickSide {
    Low,
    Center,
    High,
}

pub fn classify(value: Fp, low: Fp, high: Fp) -> StickSide {
    if value < low {
        StickSide::Low
    } else if value > high {
        StickSide::High
    } else {
        StickSide::Center
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GestureState {
    /// No movement seen, or the last one timed out.
    #[default]
    Start,
    Low,
    High,
}

/// Counts alternating threshold crossings of one stick axis.
///
/// Every crossing to the side opposite the last recorded one bumps the
/// counter and restarts the deadline. Missing the deadline drops back to
/// [`GestureState::Start`]; the count restarts with the next movement.
#[derive(Debug, Clone, Copy)]
pub struct StickGestureDetector {
    thresholds: GestureThresholds,
    state: GestureState,
    crossings: u8,
    last_crossing_us: u32,
}

impl StickGestureDetector {
    pub fn new(thresholds: GestureThresholds) -> Self {
        Self {
            thresholds,
            state: GestureState::Start,
            crossings: 0,
            last_crossing_us: 0,
        }
    }

    pub fn state(&self) -> GestureState {
        self.state
    }

    pub fn crossings(&self) -> u8 {
        self.crossings
    }

    pub fn reset(&mut self) {
        self.state = GestureState::Start;
        self.crossings = 0;
    }

    /// Feeds one stick sample. Returns `true` on the sample that completes
    /// the required number of crossings; the detector is then back at `Start`.
    pub fn update(&mut self, value: Fp, now_us: u32) -> bool {
        if self.state != GestureState::Start
            && now_us.wrapping_sub(self.last_crossing_us) > self.thresholds.timeout_us
        {
            self.state = GestureState::Start;
        }

        let side = classify(value, self.thresholds.move_low, self.thresholds.move_high);
        let next = match (self.state, side) {
            (GestureState::Start, StickSide::Low) => Some((1, GestureState::Low)),
            (GestureState::Start, StickSide::High) => Some((1, GestureState::High)),
            (GestureState::High, StickSide::Low) => Some((self.crossings + 1, GestureState::Low)),
            (GestureState::Low, StickSide::High) => Some((self.crossings + 1, GestureState::High)),
            _ => None,
        };

        if let Some((crossings, state)) = next {
            self.crossings = crossings;
            self.state = state;
            self.last_crossing_us = now_us;
            trace!("gesture crossing {=u8}", crossings);
        }

        if self.crossings >= self.thresholds.required_crossings {
            self.reset();
            return true;
        }
        false
    }
}
