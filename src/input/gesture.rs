use super::{ButtonRole, ButtonState};
use crate::dispatch::DispatchEvent;
use std::time::Duration;
use tokio::time::Instant;

/// Turns button presses and releases into dispatcher gestures
///
/// A press of the accelerate button is a tap until it has been held for
/// `long_press`; from then on it is a hold. The pause button toggles between
/// pause and resume on each press.
#[derive(Debug, Clone)]
pub struct GestureTracker {
    long_press: Duration,
    accelerate_since: Option<Instant>,
    hold_reported: bool,
    paused: bool,
}

impl GestureTracker {
    pub fn new(long_press: Duration) -> Self {
        Self {
            long_press,
            accelerate_since: None,
            hold_reported: false,
            paused: false,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn on_button(
        &mut self,
        role: ButtonRole,
        state: ButtonState,
        now: Instant,
    ) -> Option<DispatchEvent> {
        match (role, state) {
            (ButtonRole::Brake, ButtonState::Pressed) => Some(DispatchEvent::BrakePressed),
            (ButtonRole::Brake, ButtonState::Released) => None,

            (ButtonRole::Accelerate, ButtonState::Pressed) => {
                if self.accelerate_since.is_some() {
                    return None;
                }
                self.accelerate_since = Some(now);
                self.hold_reported = false;
                Some(DispatchEvent::AcceleratePressed)
            }
            (ButtonRole::Accelerate, ButtonState::Released) => self
                .accelerate_since
                .take()
                .map(|_| DispatchEvent::AccelerateReleased),

            (ButtonRole::PauseToggle, ButtonState::Pressed) => {
                self.paused = !self.paused;
                if self.paused {
                    // The dispatcher drops the hold itself; forget the press here too
                    self.accelerate_since = None;
                    Some(DispatchEvent::Pause)
                } else {
                    Some(DispatchEvent::Resume)
                }
            }
            (ButtonRole::PauseToggle, ButtonState::Released) => None,
        }
    }

    /// When the current accelerate press turns into a hold, if one is pending
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.accelerate_since, self.hold_reported) {
            (Some(since), false) => Some(since + self.long_press),
            _ => None,
        }
    }

    /// Reports the hold once the press has lasted long enough
    pub fn poll(&mut self, now: Instant) -> Option<DispatchEvent> {
        let deadline = self.next_deadline()?;
        if now >= deadline {
            self.hold_reported = true;
            Some(DispatchEvent::AccelerateHeld)
        } else {
            None
        }
    }
}
