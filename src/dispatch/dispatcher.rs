//! Command dispatcher with statum lifecycle
//!
//! The dispatcher owns the hold state, the hold repeater and the sensor
//! subscription. It is driven by [`DispatchEvent`]s and by the readings of
//! its subscription, and forwards the resulting commands to a [`Transport`]
//! without waiting for delivery.
//!
//! # State Machine
//!
//! ```text
//! Running ──pause──► Paused ──resume──► Running
//!    │                  │
//!    └────shutdown──────┴──► Stopped
//! ```
//!
//! Pausing drops the sensor subscription and forces the hold state to idle.
//! Resuming subscribes again.

use super::{DispatchEvent, HoldEvent, HoldRepeater, HoldState};
use crate::command::{map_tilt, Command, TiltReading};
use crate::sensor::{SensorSource, TiltSubscription};
use crate::transport::Transport;
use statum::{machine, state};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Dispatcher event channel closed")]
    ChannelClosed,

    #[error("Dispatcher task failed: {0}")]
    TaskError(String),
}

#[derive(Clone, Debug)]
pub struct DispatcherSettings {
    /// Interval between accelerate commands while a hold is active
    pub repeat_interval: Duration,
    pub event_buffer: usize,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            repeat_interval: Duration::from_millis(50),
            event_buffer: 100,
        }
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum DispatcherState {
    Running,
    Paused,
    Stopped,
}

#[machine]
pub struct CommandDispatcher<S: DispatcherState> {
    events: mpsc::Receiver<DispatchEvent>,
    transport: Arc<dyn Transport>,
    sensor: Arc<dyn SensorSource>,
    subscription: Option<TiltSubscription>,
    hold: HoldState,
    repeater: Option<HoldRepeater>,
    // When the current press emitted its accelerate
    pressed_at: Option<Instant>,
    repeat_interval: Duration,
    last_steer: watch::Sender<Option<Command>>,
}

/// Result of running until the next lifecycle change
pub enum RunOutcome {
    Paused(CommandDispatcher<Paused>),
    Stopped(CommandDispatcher<Stopped>),
}

pub enum ResumeOutcome {
    Resumed(CommandDispatcher<Running>),
    Stopped(CommandDispatcher<Stopped>),
}

impl<S: DispatcherState> CommandDispatcher<S> {
    pub fn hold_state(&self) -> HoldState {
        self.hold
    }

    fn emit(&self, command: Command) {
        debug!("Emitting {}", command);
        self.transport.send(command);
    }

    fn cancel_hold(&mut self, event: HoldEvent) {
        self.hold = self.hold.transition(event);
        self.pressed_at = None;
        if let Some(repeater) = self.repeater.take() {
            repeater.stop();
        }
    }
}

impl CommandDispatcher<Running> {
    /// Creates a dispatcher that is already subscribed to `sensor`
    pub fn start(
        events: mpsc::Receiver<DispatchEvent>,
        transport: Arc<dyn Transport>,
        sensor: Arc<dyn SensorSource>,
        repeat_interval: Duration,
        last_steer: watch::Sender<Option<Command>>,
    ) -> Self {
        info!(
            "Starting command dispatcher, hold repeat every {:?}",
            repeat_interval
        );
        let subscription = sensor.subscribe();

        Self::new(
            events,
            transport,
            sensor,
            Some(subscription),
            HoldState::Idle,
            None,
            None,
            repeat_interval,
            last_steer,
        )
    }

    pub fn on_tilt(&mut self, reading: TiltReading) {
        let command = map_tilt(reading);
        debug!("Tilt {:.3} -> {}", reading, command);
        self.emit(command);
        self.last_steer.send_replace(Some(command));
    }

    pub fn on_brake_pressed(&mut self) {
        info!("Brake");
        self.emit(Command::Brake);
    }

    pub fn on_accelerate_pressed(&mut self) {
        self.hold = self.hold.transition(HoldEvent::Press);
        self.emit(Command::Accelerate);
        self.pressed_at = Some(Instant::now());
    }

    pub fn on_accelerate_held(&mut self) {
        if !self.hold.is_held() {
            debug!("Hold reported without an active press, ignoring");
            return;
        }
        if self.repeater.as_ref().is_some_and(|r| r.is_running()) {
            debug!("Hold repeat already active");
            return;
        }

        info!("Accelerate hold started");
        // The repeat cadence starts now, unless the press has only just emitted
        let pressed_recently = self
            .pressed_at
            .is_some_and(|at| at.elapsed() < self.repeat_interval);
        if !pressed_recently {
            self.emit(Command::Accelerate);
        }
        self.repeater = Some(HoldRepeater::start(
            self.transport.clone(),
            Command::Accelerate,
            self.repeat_interval,
        ));
    }

    pub fn on_accelerate_released(&mut self) {
        if self.hold.is_held() {
            info!("Accelerate released");
        }
        self.cancel_hold(HoldEvent::Release);
    }

    /// Handles events and sensor readings until paused or stopped
    pub async fn run_until_pause(mut self) -> Result<RunOutcome, DispatchError> {
        loop {
            tokio::select! {
                event = self.events.recv() => {
                    match event {
                        Some(DispatchEvent::Tilt(reading)) => self.on_tilt(reading),
                        Some(DispatchEvent::BrakePressed) => self.on_brake_pressed(),
                        Some(DispatchEvent::AcceleratePressed) => self.on_accelerate_pressed(),
                        Some(DispatchEvent::AccelerateHeld) => self.on_accelerate_held(),
                        Some(DispatchEvent::AccelerateReleased) => self.on_accelerate_released(),
                        Some(DispatchEvent::Pause) => return Ok(RunOutcome::Paused(self.pause())),
                        Some(DispatchEvent::Resume) => debug!("Resume while running, ignoring"),
                        Some(DispatchEvent::Shutdown) => return Ok(RunOutcome::Stopped(self.stop())),
                        None => {
                            error!("Dispatcher event channel closed");
                            return Err(DispatchError::ChannelClosed);
                        }
                    }
                }

                reading = next_reading(&mut self.subscription) => {
                    match reading {
                        Some(reading) => self.on_tilt(reading),
                        None => {
                            warn!("Sensor subscription ended");
                            self.subscription = None;
                        }
                    }
                }
            }
        }
    }

    pub fn pause(mut self) -> CommandDispatcher<Paused> {
        info!("Pausing dispatcher");
        self.cancel_hold(HoldEvent::Pause);
        self.subscription = None;
        self.transition()
    }

    pub fn stop(mut self) -> CommandDispatcher<Stopped> {
        info!("Stopping dispatcher");
        self.cancel_hold(HoldEvent::Pause);
        self.subscription = None;
        self.transition()
    }
}

impl CommandDispatcher<Paused> {
    /// Waits for a resume, ignoring everything else
    pub async fn wait_for_resume(mut self) -> Result<ResumeOutcome, DispatchError> {
        loop {
            match self.events.recv().await {
                Some(DispatchEvent::Resume) => return Ok(ResumeOutcome::Resumed(self.resume())),
                Some(DispatchEvent::Shutdown) => {
                    info!("Stopping paused dispatcher");
                    return Ok(ResumeOutcome::Stopped(self.transition()));
                }
                Some(event) => debug!("Ignoring {:?} while paused", event),
                None => {
                    error!("Dispatcher event channel closed");
                    return Err(DispatchError::ChannelClosed);
                }
            }
        }
    }

    pub fn resume(mut self) -> CommandDispatcher<Running> {
        info!("Resuming dispatcher");
        self.subscription = Some(self.sensor.subscribe());
        self.transition()
    }
}

async fn next_reading(subscription: &mut Option<TiltSubscription>) -> Option<TiltReading> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

/// Drives a dispatcher through pause/resume cycles until it stops
pub async fn run_dispatcher(
    mut dispatcher: CommandDispatcher<Running>,
) -> Result<(), DispatchError> {
    loop {
        match dispatcher.run_until_pause().await? {
            RunOutcome::Paused(paused) => match paused.wait_for_resume().await? {
                ResumeOutcome::Resumed(running) => dispatcher = running,
                ResumeOutcome::Stopped(_) => break,
            },
            RunOutcome::Stopped(_) => break,
        }
    }
    info!("Dispatcher stopped");
    Ok(())
}

/// Cloneable entry point for feeding events into the dispatcher
#[derive(Clone, Debug)]
pub struct DispatchSender {
    sender: mpsc::Sender<DispatchEvent>,
}

impl DispatchSender {
    pub async fn send(&self, event: DispatchEvent) -> Result<(), DispatchError> {
        self.sender
            .send(event)
            .await
            .map_err(|_| DispatchError::ChannelClosed)
    }

    pub async fn on_tilt(&self, reading: TiltReading) -> Result<(), DispatchError> {
        self.send(DispatchEvent::Tilt(reading)).await
    }

    pub async fn on_brake_pressed(&self) -> Result<(), DispatchError> {
        self.send(DispatchEvent::BrakePressed).await
    }

    pub async fn on_accelerate_pressed(&self) -> Result<(), DispatchError> {
        self.send(DispatchEvent::AcceleratePressed).await
    }

    pub async fn on_accelerate_held(&self) -> Result<(), DispatchError> {
        self.send(DispatchEvent::AccelerateHeld).await
    }

    pub async fn on_accelerate_released(&self) -> Result<(), DispatchError> {
        self.send(DispatchEvent::AccelerateReleased).await
    }

    pub async fn pause(&self) -> Result<(), DispatchError> {
        self.send(DispatchEvent::Pause).await
    }

    pub async fn resume(&self) -> Result<(), DispatchError> {
        self.send(DispatchEvent::Resume).await
    }
}

/// Owns the dispatcher task
pub struct DispatcherHandle {
    sender: DispatchSender,
    last_steer: watch::Receiver<Option<Command>>,
    task: JoinHandle<Result<(), DispatchError>>,
}

impl DispatcherHandle {
    pub fn spawn(
        transport: Arc<dyn Transport>,
        sensor: Arc<dyn SensorSource>,
        settings: Option<DispatcherSettings>,
    ) -> Self {
        let settings = settings.unwrap_or_default();
        debug!("Spawning dispatcher with settings: {:?}", settings);

        let (event_tx, event_rx) = mpsc::channel(settings.event_buffer);
        let (steer_tx, steer_rx) = watch::channel(None);

        let dispatcher = CommandDispatcher::<Running>::start(
            event_rx,
            transport,
            sensor,
            settings.repeat_interval,
            steer_tx,
        );
        let task = tokio::spawn(run_dispatcher(dispatcher));

        Self {
            sender: DispatchSender { sender: event_tx },
            last_steer: steer_rx,
            task,
        }
    }

    pub fn sender(&self) -> DispatchSender {
        self.sender.clone()
    }

    /// Last steer command derived from a tilt reading
    pub fn subscribe_steer(&self) -> watch::Receiver<Option<Command>> {
        self.last_steer.clone()
    }

    /// Stops the dispatcher and waits for its task to finish
    pub async fn shutdown(self) -> Result<(), DispatchError> {
        if self.sender.send(DispatchEvent::Shutdown).await.is_err() {
            warn!("Dispatcher already terminated");
        }
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                error!("Dispatcher task panicked: {}", e);
                Err(DispatchError::TaskError(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::testing::{assert_offsets, ManualSensor, RecordingTransport};
    use crate::sensor::SampledSensor;
    use tokio::time::{sleep, sleep_until, Instant};

    fn spawn(
        transport: &Arc<RecordingTransport>,
        sensor: Arc<dyn SensorSource>,
    ) -> DispatcherHandle {
        DispatcherHandle::spawn(transport.clone(), sensor, None)
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_repeats_every_interval_until_release() {
        let transport = RecordingTransport::new();
        let handle = spawn(&transport, ManualSensor::new());
        let tx = handle.sender();
        let start = Instant::now();

        tx.on_accelerate_pressed().await.unwrap();
        tx.on_accelerate_held().await.unwrap();
        sleep_until(start + ms(120)).await;
        tx.on_accelerate_released().await.unwrap();
        sleep(ms(500)).await;

        assert_offsets(
            &transport.offsets_of(Command::Accelerate, start),
            &[0, 50, 100],
        );
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_hold_emits_when_detected() {
        let transport = RecordingTransport::new();
        let handle = spawn(&transport, ManualSensor::new());
        let tx = handle.sender();
        let start = Instant::now();

        tx.on_accelerate_pressed().await.unwrap();
        sleep_until(start + ms(500)).await;
        tx.on_accelerate_held().await.unwrap();
        sleep_until(start + ms(620)).await;
        tx.on_accelerate_released().await.unwrap();
        sleep(ms(500)).await;

        assert_offsets(
            &transport.offsets_of(Command::Accelerate, start),
            &[0, 500, 550, 600],
        );
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_after_release_plus_interval() {
        let transport = RecordingTransport::new();
        let handle = spawn(&transport, ManualSensor::new());
        let tx = handle.sender();
        let start = Instant::now();

        tx.on_accelerate_pressed().await.unwrap();
        tx.on_accelerate_held().await.unwrap();
        sleep_until(start + ms(120)).await;
        tx.on_accelerate_released().await.unwrap();
        sleep(ms(2000)).await;

        let offsets = transport.offsets_of(Command::Accelerate, start);
        assert!(offsets.iter().all(|t| *t <= 150), "late emission: {:?}", offsets);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_brake_and_press_emit_exactly_once() {
        let transport = RecordingTransport::new();
        let handle = spawn(&transport, ManualSensor::new());
        let tx = handle.sender();

        tx.on_brake_pressed().await.unwrap();
        tx.on_accelerate_pressed().await.unwrap();
        tx.on_accelerate_released().await.unwrap();
        sleep(ms(1000)).await;

        assert_eq!(
            transport.commands(),
            vec![Command::Brake, Command::Accelerate]
        );
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_held_without_press_is_ignored() {
        let transport = RecordingTransport::new();
        let handle = spawn(&transport, ManualSensor::new());
        let tx = handle.sender();

        tx.on_accelerate_held().await.unwrap();
        sleep(ms(300)).await;

        assert!(transport.commands().is_empty());
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_held_does_not_double_rate() {
        let transport = RecordingTransport::new();
        let handle = spawn(&transport, ManualSensor::new());
        let tx = handle.sender();
        let start = Instant::now();

        tx.on_accelerate_pressed().await.unwrap();
        tx.on_accelerate_held().await.unwrap();
        tx.on_accelerate_held().await.unwrap();
        sleep_until(start + ms(120)).await;
        tx.on_accelerate_released().await.unwrap();
        sleep(ms(200)).await;

        assert_eq!(transport.count(Command::Accelerate), 3);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_tilt_emits_steer_and_publishes_last_value() {
        let transport = RecordingTransport::new();
        let handle = spawn(&transport, ManualSensor::new());
        let steer = handle.subscribe_steer();
        let tx = handle.sender();

        tx.on_tilt(1.25).await.unwrap();
        tx.on_tilt(-9.0).await.unwrap();
        sleep(ms(10)).await;

        assert_eq!(
            transport.commands(),
            vec![Command::steer(70).unwrap(), Command::steer(20).unwrap()]
        );
        assert_eq!(*steer.borrow(), Command::steer(20));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sensor_readings_are_not_rate_limited() {
        let transport = RecordingTransport::new();
        let sensor = ManualSensor::new();
        let handle = spawn(&transport, sensor.clone());
        sleep(ms(1)).await;

        for _ in 0..10 {
            assert!(sensor.emit(0.0));
        }
        sleep(ms(1)).await;

        assert_eq!(transport.count(Command::steer(60).unwrap()), 10);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_during_hold_stops_repeats_and_tilt() {
        let transport = RecordingTransport::new();
        let (sensor, feed) = SampledSensor::new(ms(200));
        feed.publish(0.0);
        let handle = spawn(&transport, Arc::new(sensor));
        let tx = handle.sender();
        let start = Instant::now();

        tx.on_accelerate_pressed().await.unwrap();
        tx.on_accelerate_held().await.unwrap();
        sleep_until(start + ms(510)).await;
        tx.pause().await.unwrap();
        sleep(ms(10)).await;

        let accelerate_before = transport.count(Command::Accelerate);
        let steer_before = transport.steer_count();
        assert!(accelerate_before >= 10);
        assert!(steer_before >= 2);

        // Events while paused are ignored
        tx.on_brake_pressed().await.unwrap();
        tx.on_accelerate_held().await.unwrap();
        sleep(ms(2000)).await;

        assert_eq!(transport.count(Command::Accelerate), accelerate_before);
        assert_eq!(transport.steer_count(), steer_before);
        assert_eq!(transport.count(Command::Brake), 0);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_resubscribes_and_hold_needs_new_press() {
        let transport = RecordingTransport::new();
        let sensor = ManualSensor::new();
        let handle = spawn(&transport, sensor.clone());
        let tx = handle.sender();
        sleep(ms(1)).await;
        assert_eq!(sensor.subscriptions(), 1);

        tx.on_accelerate_pressed().await.unwrap();
        tx.pause().await.unwrap();
        sleep(ms(1)).await;
        assert!(!sensor.emit(1.0));

        tx.resume().await.unwrap();
        sleep(ms(1)).await;
        assert_eq!(sensor.subscriptions(), 2);
        assert!(sensor.emit(0.0));

        // Hold state was reset by the pause
        tx.on_accelerate_held().await.unwrap();
        sleep(ms(500)).await;

        assert_eq!(transport.count(Command::Accelerate), 1);
        assert_eq!(transport.count(Command::steer(60).unwrap()), 1);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_forces_idle_and_resume_keeps_it() {
        let transport = RecordingTransport::new();
        let sensor = ManualSensor::new();
        let (_events_tx, events_rx) = mpsc::channel(4);
        let (steer_tx, _steer_rx) = watch::channel(None);

        let mut running = CommandDispatcher::<Running>::start(
            events_rx,
            transport.clone(),
            sensor.clone(),
            ms(50),
            steer_tx,
        );
        assert_eq!(running.hold_state(), HoldState::Idle);

        running.on_accelerate_pressed();
        assert_eq!(running.hold_state(), HoldState::Held);

        let paused = running.pause();
        assert_eq!(paused.hold_state(), HoldState::Idle);

        let running = paused.resume();
        assert_eq!(running.hold_state(), HoldState::Idle);
        assert_eq!(sensor.subscriptions(), 2);
        assert_eq!(transport.commands(), vec![Command::Accelerate]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_while_paused() {
        let transport = RecordingTransport::new();
        let handle = spawn(&transport, ManualSensor::new());
        handle.sender().pause().await.unwrap();
        sleep(ms(1)).await;

        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sender_fails_after_shutdown() {
        let transport = RecordingTransport::new();
        let handle = spawn(&transport, ManualSensor::new());
        let tx = handle.sender();

        handle.shutdown().await.unwrap();
        assert!(matches!(
            tx.on_brake_pressed().await,
            Err(DispatchError::ChannelClosed)
        ));
    }
}
