//! Tilt sensor sources
//!
//! A source hands out [`TiltSubscription`]s. Readings flow while the
//! subscription is alive; dropping it unsubscribes and stops the producer.

use crate::command::TiltReading;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

const SUBSCRIPTION_BUFFER: usize = 16;

pub trait SensorSource: Send + Sync + 'static {
    /// Starts delivering readings; must be called from within a tokio runtime
    fn subscribe(&self) -> TiltSubscription;
}

/// Live stream of tilt readings, unsubscribed on drop
pub struct TiltSubscription {
    receiver: mpsc::Receiver<TiltReading>,
    _guard: DropGuard,
}

impl TiltSubscription {
    pub fn new(receiver: mpsc::Receiver<TiltReading>, token: CancellationToken) -> Self {
        Self {
            receiver,
            _guard: token.drop_guard(),
        }
    }

    /// Next reading, or `None` once the producer has gone away
    pub async fn recv(&mut self) -> Option<TiltReading> {
        self.receiver.recv().await
    }
}

/// Writer side of a [`SampledSensor`]
#[derive(Clone)]
pub struct TiltFeed {
    latest: watch::Sender<Option<TiltReading>>,
}

impl TiltFeed {
    pub fn publish(&self, reading: TiltReading) {
        self.latest.send_replace(Some(reading));
    }
}

/// Delivers the most recent published reading at a fixed cadence
///
/// Models an accelerometer that reports continuously: once a first value has
/// been published, each subscription receives one reading per interval, even
/// when the value has not changed.
pub struct SampledSensor {
    latest: watch::Receiver<Option<TiltReading>>,
    interval: Duration,
}

impl SampledSensor {
    pub fn new(interval: Duration) -> (Self, TiltFeed) {
        let (tx, rx) = watch::channel(None);
        (
            Self {
                latest: rx,
                interval,
            },
            TiltFeed { latest: tx },
        )
    }
}

impl SensorSource for SampledSensor {
    fn subscribe(&self) -> TiltSubscription {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let token = CancellationToken::new();
        let child = token.clone();
        let latest = self.latest.clone();
        let interval = self.interval;

        debug!("Sensor subscribed, sampling every {:?}", interval);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        let reading = *latest.borrow();
                        let Some(reading) = reading else { continue };
                        if let Err(e) = tx.try_send(reading) {
                            if tx.is_closed() {
                                break;
                            }
                            debug!("Dropping tilt sample: {}", e);
                        }
                    }
                }
            }
            debug!("Sensor sampling stopped");
        });

        TiltSubscription::new(rx, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_nothing_delivered_before_first_value() {
        let (sensor, feed) = SampledSensor::new(Duration::from_millis(200));
        let mut subscription = sensor.subscribe();

        let early = tokio::time::timeout(Duration::from_millis(500), subscription.recv()).await;
        assert!(early.is_err());

        feed.publish(1.5);
        assert_eq!(subscription.recv().await, Some(1.5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeats_latest_value_each_interval() {
        let (sensor, feed) = SampledSensor::new(Duration::from_millis(200));
        feed.publish(-2.0);
        let mut subscription = sensor.subscribe();

        assert_eq!(subscription.recv().await, Some(-2.0));
        assert_eq!(subscription.recv().await, Some(-2.0));

        feed.publish(3.0);
        assert_eq!(subscription.recv().await, Some(3.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_subscription_is_independent() {
        let (sensor, feed) = SampledSensor::new(Duration::from_millis(100));
        feed.publish(0.5);

        let first = sensor.subscribe();
        let mut second = sensor.subscribe();
        drop(first);

        assert_eq!(second.recv().await, Some(0.5));
    }
}
