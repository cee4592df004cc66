//! Input subsystem standing in for the touch screen and accelerometer
//!
//! Collectors produce [`InputEvent`]s:
//!
//! 1. [`gamepad`] - gilrs gamepad: one stick axis as tilt, buttons as controls
//! 2. [`console`] - line commands from stdin
//!
//! The [`InputRouter`] splits them: tilt values go to the sampled sensor
//! feed, buttons go through the [`GestureTracker`] to the dispatcher.
//!
//! ```text
//! Collector ──► InputRouter ──► TiltFeed (sensor)
//!                    │
//!                    └──► GestureTracker ──► DispatchSender
//! ```

pub mod console;
pub mod gamepad;
pub mod gesture;

pub use gesture::GestureTracker;

use crate::command::TiltReading;
use crate::dispatch::{DispatchError, DispatchSender};
use crate::sensor::TiltFeed;
use chrono::{DateTime, Local};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

/// Raw input with the time it was captured
#[derive(Debug, Clone)]
pub enum InputEvent {
    Tilt {
        value: TiltReading,
        timestamp: DateTime<Local>,
    },
    Button {
        role: ButtonRole,
        state: ButtonState,
        timestamp: DateTime<Local>,
    },
    Quit,
}

impl InputEvent {
    pub fn tilt(value: TiltReading) -> Self {
        InputEvent::Tilt {
            value,
            timestamp: Local::now(),
        }
    }

    pub fn button(role: ButtonRole, state: ButtonState) -> Self {
        InputEvent::Button {
            role,
            state,
            timestamp: Local::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ButtonRole {
    Brake,
    Accelerate,
    PauseToggle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonState {
    Pressed,
    Released,
}

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("Failed to initialize input: {0}")]
    InitializationError(String),

    #[error("Failed to read input: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Unrecognised input line: {0:?}")]
    Unrecognised(String),

    #[error("Dispatcher unavailable: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Routes collector output to the sensor feed and the dispatcher
pub struct InputRouter {
    input: mpsc::Receiver<InputEvent>,
    feed: TiltFeed,
    dispatch: DispatchSender,
    gestures: GestureTracker,
}

impl InputRouter {
    pub fn new(
        input: mpsc::Receiver<InputEvent>,
        feed: TiltFeed,
        dispatch: DispatchSender,
        gestures: GestureTracker,
    ) -> Self {
        Self {
            input,
            feed,
            dispatch,
            gestures,
        }
    }

    /// Runs until the collector quits or closes its channel
    pub async fn run(mut self) -> Result<(), InputError> {
        info!("Input router started");

        loop {
            let deadline = self.gestures.next_deadline();

            tokio::select! {
                event = self.input.recv() => {
                    match event {
                        Some(InputEvent::Tilt { value, .. }) => self.feed.publish(value),
                        Some(InputEvent::Button { role, state, timestamp }) => {
                            debug!(
                                "{:?} {:?} at {}",
                                role,
                                state,
                                timestamp.format("%H:%M:%S.%3f")
                            );
                            if self.gestures.is_paused() && role != ButtonRole::PauseToggle {
                                debug!("Paused, dropping {:?}", role);
                                continue;
                            }
                            if let Some(event) = self.gestures.on_button(role, state, Instant::now()) {
                                self.dispatch.send(event).await?;
                            }
                        }
                        Some(InputEvent::Quit) => {
                            info!("Quit requested");
                            return Ok(());
                        }
                        None => {
                            info!("Input collector closed");
                            return Ok(());
                        }
                    }
                }

                _ = sleep_until_deadline(deadline) => {
                    if let Some(event) = self.gestures.poll(Instant::now()) {
                        self.dispatch.send(event).await?;
                    }
                }
            }
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
