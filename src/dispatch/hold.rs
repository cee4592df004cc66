/// Whether an accelerate hold gesture is active
///
/// ```text
/// Idle ──press──► Held ──release/pause──► Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HoldState {
    #[default]
    Idle,
    Held,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldEvent {
    Press,
    Release,
    Pause,
}

impl HoldState {
    pub fn transition(self, event: HoldEvent) -> Self {
        match (self, event) {
            (_, HoldEvent::Press) => HoldState::Held,
            (_, HoldEvent::Release) | (_, HoldEvent::Pause) => HoldState::Idle,
        }
    }

    pub fn is_held(self) -> bool {
        self == HoldState::Held
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_press_then_release() {
        let state = HoldState::default();
        assert_eq!(state, HoldState::Idle);

        let state = state.transition(HoldEvent::Press);
        assert!(state.is_held());

        let state = state.transition(HoldEvent::Release);
        assert_eq!(state, HoldState::Idle);
    }

    #[test]
    fn test_pause_and_release_always_idle() {
        for state in [HoldState::Idle, HoldState::Held] {
            assert_eq!(state.transition(HoldEvent::Pause), HoldState::Idle);
            assert_eq!(state.transition(HoldEvent::Release), HoldState::Idle);
        }
    }

    #[test]
    fn test_press_while_held_stays_held() {
        assert_eq!(
            HoldState::Held.transition(HoldEvent::Press),
            HoldState::Held
        );
    }
}
