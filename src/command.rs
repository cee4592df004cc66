//! Motor controller commands and the tilt-to-steer mapping
//!
//! The controller understands a single integer per request:
//!
//! ```text
//!  20 ───────── 60 ───────── 100     120        240
//!  full left   straight   full right  brake    accelerate
//! ```
//!
//! These values are shared with the controller firmware and must not change.

use std::fmt;

/// Tilt is clamped to this magnitude before mapping
pub const TILT_LIMIT: f32 = 5.0;
/// Steer steps per tilt unit
pub const STEER_SLOPE: f32 = 8.0;
pub const STEER_CENTER: u8 = 60;
pub const STEER_MIN: u8 = 20;
pub const STEER_MAX: u8 = 100;
pub const BRAKE_VALUE: u8 = 120;
pub const ACCELERATE_VALUE: u8 = 240;

/// One axis of an accelerometer sample, unbounded as delivered by the sensor
pub type TiltReading = f32;

/// A command understood by the motor controller
///
/// `Steer` carries a value in `STEER_MIN..=STEER_MAX`. The field is private so
/// the only ways to build one are [`map_tilt`] and [`Command::steer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Brake,
    Accelerate,
    Steer(SteerValue),
}

/// Steering position guaranteed to lie in `STEER_MIN..=STEER_MAX`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SteerValue(u8);

impl SteerValue {
    pub fn get(self) -> u8 {
        self.0
    }
}

impl Command {
    /// Builds a steer command, rejecting values outside the steering range
    pub fn steer(value: u8) -> Option<Self> {
        (STEER_MIN..=STEER_MAX)
            .contains(&value)
            .then_some(Command::Steer(SteerValue(value)))
    }

    /// Integer sent to the controller for this command
    pub fn wire_value(&self) -> u8 {
        match self {
            Command::Brake => BRAKE_VALUE,
            Command::Accelerate => ACCELERATE_VALUE,
            Command::Steer(value) => value.get(),
        }
    }

    pub fn is_steer(&self) -> bool {
        matches!(self, Command::Steer(_))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Brake => write!(f, "Brake ({})", BRAKE_VALUE),
            Command::Accelerate => write!(f, "Accelerate ({})", ACCELERATE_VALUE),
            Command::Steer(value) => write!(f, "Steer ({})", value.get()),
        }
    }
}

/// Maps a tilt reading onto a steer command
///
/// The reading is clamped to `±TILT_LIMIT` and mapped linearly, so -5 is full
/// left (20), 0 is straight (60) and 5 is full right (100). NaN counts as
/// centred.
pub fn map_tilt(y: TiltReading) -> Command {
    let y = if y.is_nan() {
        0.0
    } else {
        y.clamp(-TILT_LIMIT, TILT_LIMIT)
    };

    let steps = (y * STEER_SLOPE + STEER_CENTER as f32).round();
    // Clamped input keeps steps inside the range; the clamp guards float edge cases.
    let steps = (steps as i32).clamp(STEER_MIN as i32, STEER_MAX as i32) as u8;

    Command::Steer(SteerValue(steps))
}
