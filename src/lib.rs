#![cfg_attr(not(test), no_std)]

// Declared first so every module below sees the logging macros.
pub(crate) mod fmt;

pub mod attitude;
pub mod config;
pub mod control;
pub mod drivers;
pub mod fixed_point;
pub mod hal;
pub mod settings;
pub mod state;

#[cfg(feature = "firmware")]
pub mod board;
#[cfg(feature = "firmware")]
pub mod tasks;

pub use control::flight_loop::{FlightController, LoopIo};
