//! Outbound command transport
//!
//! A [`Transport`] accepts commands without blocking the caller. Delivery
//! happens in the background; failures are logged and counted, never retried
//! and never reported back to the dispatcher.

pub mod http;

use crate::command::Command;
use chrono::{DateTime, Local};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;

pub use http::HttpTransport;

/// Fire-and-forget command sink
///
/// Implementations must return immediately. The outcome of a send is only
/// observable through logs and [`TransportStats`].
pub trait Transport: Send + Sync + 'static {
    fn send(&self, command: Command);
}

/// Transport-level send failure
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Controller answered with status {0}")]
    Status(reqwest::StatusCode),

    #[error("Failed to build transport: {0}")]
    InitializationError(String),
}

/// Counters for requests handed to a transport
#[derive(Debug, Default)]
pub struct TransportStats {
    sent: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    last_activity: Mutex<Option<DateTime<Local>>>,
}

/// Point-in-time copy of [`TransportStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub sent: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub last_activity: Option<DateTime<Local>>,
}

impl TransportStats {
    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            last_activity: self.last_activity.lock().ok().and_then(|guard| *guard),
        }
    }

    fn touch(&self) {
        if let Ok(mut guard) = self.last_activity.lock() {
            *guard = Some(Local::now());
        }
    }
}
