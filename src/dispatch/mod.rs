//! Command dispatcher subsystem
//!
//! Turns sensor readings and button gestures into controller commands:
//!
//! 1. [`dispatcher`] - event loop and lifecycle (running / paused)
//! 2. [`hold`] - accelerate hold state
//! 3. [`repeater`] - cancellable fixed-rate repeat of a command
//!
//! # Architecture
//!
//! ```text
//! DispatchSender ──► CommandDispatcher ──► Transport
//! TiltSubscription ──┘    │      ▲
//!                         └─► HoldRepeater (while held)
//! ```

pub mod dispatcher;
pub mod hold;
pub mod repeater;

pub use dispatcher::{
    run_dispatcher, CommandDispatcher, DispatchError, DispatchSender, DispatcherHandle,
    DispatcherSettings,
};
pub use hold::{HoldEvent, HoldState};
pub use repeater::HoldRepeater;

use crate::command::TiltReading;

/// Discrete input handled by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DispatchEvent {
    Tilt(TiltReading),
    BrakePressed,
    AcceleratePressed,
    AccelerateHeld,
    AccelerateReleased,
    Pause,
    Resume,
    Shutdown,
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::command::Command;
    use crate::sensor::{SensorSource, TiltSubscription};
    use crate::transport::Transport;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    /// Transport that records every command with the time it was sent
    #[derive(Default)]
    pub struct RecordingTransport {
        sent: Mutex<Vec<(Instant, Command)>>,
    }

    impl RecordingTransport {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn commands(&self) -> Vec<Command> {
            self.sent.lock().unwrap().iter().map(|(_, c)| *c).collect()
        }

        pub fn count(&self, command: Command) -> usize {
            self.commands().into_iter().filter(|c| *c == command).count()
        }

        pub fn steer_count(&self) -> usize {
            self.commands().into_iter().filter(|c| c.is_steer()).count()
        }

        /// Milliseconds since `start` for every recorded command
        pub fn offsets_ms(&self, start: Instant) -> Vec<u64> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(at, _)| (at.duration_since(start).as_secs_f64() * 1000.0).round() as u64)
                .collect()
        }

        pub fn offsets_of(&self, command: Command, start: Instant) -> Vec<u64> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, c)| *c == command)
                .map(|(at, _)| (at.duration_since(start).as_secs_f64() * 1000.0).round() as u64)
                .collect()
        }
    }

    impl Transport for RecordingTransport {
        fn send(&self, command: Command) {
            self.sent.lock().unwrap().push((Instant::now(), command));
        }
    }

    /// Sensor whose subscriptions are fed by hand from the test
    #[derive(Default)]
    pub struct ManualSensor {
        current: Mutex<Option<mpsc::Sender<f32>>>,
        subscriptions: AtomicUsize,
    }

    impl ManualSensor {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Delivers a reading to the live subscription; false if there is none
        pub fn emit(&self, reading: f32) -> bool {
            match self.current.lock().unwrap().as_ref() {
                Some(tx) => tx.try_send(reading).is_ok(),
                None => false,
            }
        }

        pub fn subscriptions(&self) -> usize {
            self.subscriptions.load(Ordering::SeqCst)
        }
    }

    impl SensorSource for ManualSensor {
        fn subscribe(&self) -> TiltSubscription {
            let (tx, rx) = mpsc::channel(16);
            *self.current.lock().unwrap() = Some(tx);
            self.subscriptions.fetch_add(1, Ordering::SeqCst);
            TiltSubscription::new(rx, CancellationToken::new())
        }
    }

    pub fn assert_offsets(actual: &[u64], expected: &[u64]) {
        assert_eq!(
            actual.len(),
            expected.len(),
            "emissions at {:?}, expected {:?}",
            actual,
            expected
        );
        for (a, e) in actual.iter().zip(expected) {
            assert!(
                a.abs_diff(*e) <= 2,
                "emissions at {:?}, expected {:?}",
                actual,
                expected
            );
        }
    }
}
