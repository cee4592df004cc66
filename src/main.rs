pub mod command;
pub mod config;
pub mod dispatch;
pub mod input;
pub mod sensor;
pub mod transport;

use crate::config::{Config, InputSource, LoggingConfig};
use crate::dispatch::{DispatcherHandle, DispatcherSettings};
use crate::input::console::ConsoleCollector;
use crate::input::gamepad::GamepadHandle;
use crate::input::{GestureTracker, InputRouter};
use crate::sensor::SampledSensor;
use crate::transport::{HttpTransport, TransportStats};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

const STATS_LOG_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load_or_create(config_path.as_deref())
        .await
        .map_err(|e| eyre!("Failed to load configuration: {}", e))?;

    setup_logging(&config.logging)?;
    info!("Configuration: {:?}", config);

    let transport = HttpTransport::new(&config.controller)?;
    let stats = transport.stats();

    let (sensor, feed) = SampledSensor::new(config.sensor.sample_interval());

    info!("Starting command dispatcher");
    let dispatcher = DispatcherHandle::spawn(
        Arc::new(transport),
        Arc::new(sensor),
        Some(DispatcherSettings {
            repeat_interval: config.dispatch.repeat_interval(),
            ..DispatcherSettings::default()
        }),
    );

    let display_task = spawn_steer_display(dispatcher.subscribe_steer());
    let stats_task = spawn_stats_log(stats.clone());

    let (input_tx, input_rx) = mpsc::channel(1000);
    match config.input.source {
        InputSource::Gamepad => {
            GamepadHandle::spawn(config.input.clone(), input_tx)
                .await
                .map_err(|e| eyre!("Failed to start gamepad input: {}", e))?;
        }
        InputSource::Console => {
            ConsoleCollector::spawn(input_tx)
                .map_err(|e| eyre!("Failed to start console input: {}", e))?;
        }
    }

    let router = InputRouter::new(
        input_rx,
        feed,
        dispatcher.sender(),
        GestureTracker::new(config.dispatch.long_press()),
    );
    let router_task = tokio::spawn(router.run());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
        result = router_task => match result {
            Ok(Ok(())) => info!("Input finished, shutting down"),
            Ok(Err(e)) => error!("Input router failed: {}", e),
            Err(e) => error!("Input router panicked: {}", e),
        },
    }

    dispatcher
        .shutdown()
        .await
        .map_err(|e| eyre!("Dispatcher shutdown failed: {}", e))?;
    display_task.abort();
    stats_task.abort();

    log_stats(&stats);
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    Ok(())
}

fn setup_logging(config: &LoggingConfig) -> Result<()> {
    // RUST_LOG wins over the configured level when it names a plain level
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|value| value.parse::<Level>().ok())
        .map(Ok)
        .unwrap_or_else(|| config.level.parse::<Level>())
        .map_err(|e| eyre!("Invalid log level {:?}: {}", config.level, e))?;

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
    Ok(())
}

/// Logs the steer value whenever it changes, standing in for the on-screen readout
fn spawn_steer_display(
    mut last_steer: watch::Receiver<Option<crate::command::Command>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut shown = None;
        while last_steer.changed().await.is_ok() {
            let current = *last_steer.borrow_and_update();
            if current != shown {
                if let Some(command) = current {
                    info!("Steering: {}", command.wire_value());
                }
                shown = current;
            }
        }
    })
}

fn spawn_stats_log(stats: Arc<TransportStats>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STATS_LOG_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            log_stats(&stats);
        }
    })
}

fn log_stats(stats: &TransportStats) {
    let snapshot = stats.snapshot();
    info!(
        "Transport stats: {} sent, {} acknowledged, {} failed, last activity {}",
        snapshot.sent,
        snapshot.succeeded,
        snapshot.failed,
        snapshot
            .last_activity
            .map(|t| t.format("%H:%M:%S%.3f").to_string())
            .unwrap_or_else(|| "never".to_string())
    );
}
