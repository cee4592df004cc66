//! Line-based input from stdin
//!
//! Each line is one of:
//!
//! | line      | meaning                      |
//! |-----------|------------------------------|
//! | `<float>` | tilt reading                 |
//! | `b`       | brake                        |
//! | `a`       | press accelerate (and keep)  |
//! | `r`       | release accelerate           |
//! | `p`       | toggle pause                 |
//! | `q`       | quit                         |
//!
//! Holding is expressed by sending `a` and no `r` for longer than the long
//! press threshold.

use super::{ButtonRole, ButtonState, InputError, InputEvent};
use std::io::BufRead;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Parses one console line into input events
pub fn parse_line(line: &str) -> Result<Vec<InputEvent>, InputError> {
    let line = line.trim();
    let events = match line.to_ascii_lowercase().as_str() {
        "" => Vec::new(),
        "b" | "brake" => tap(ButtonRole::Brake),
        "a" | "accelerate" => vec![InputEvent::button(
            ButtonRole::Accelerate,
            ButtonState::Pressed,
        )],
        "r" | "release" => vec![InputEvent::button(
            ButtonRole::Accelerate,
            ButtonState::Released,
        )],
        "p" | "pause" => tap(ButtonRole::PauseToggle),
        "q" | "quit" => vec![InputEvent::Quit],
        other => match other.parse::<f32>() {
            Ok(value) if value.is_finite() => vec![InputEvent::tilt(value)],
            _ => return Err(InputError::Unrecognised(line.to_string())),
        },
    };
    Ok(events)
}

fn tap(role: ButtonRole) -> Vec<InputEvent> {
    vec![
        InputEvent::button(role, ButtonState::Pressed),
        InputEvent::button(role, ButtonState::Released),
    ]
}

/// Forwards parsed lines from `reader` until EOF, `q`, or a closed channel
///
/// Blocks the calling thread; must not run on a tokio worker.
pub fn forward_lines<R: BufRead>(
    reader: R,
    sender: mpsc::Sender<InputEvent>,
) -> Result<(), InputError> {
    for line in reader.lines() {
        if sender.is_closed() {
            debug!("Input channel closed, stopping console reader");
            return Ok(());
        }

        let events = match parse_line(&line?) {
            Ok(events) => events,
            Err(e) => {
                warn!("{}", e);
                continue;
            }
        };

        for event in events {
            let quit = matches!(event, InputEvent::Quit);
            if sender.blocking_send(event).is_err() {
                debug!("Input channel closed, stopping console reader");
                return Ok(());
            }
            if quit {
                return Ok(());
            }
        }
    }

    info!("Console input reached end of file");
    let _ = sender.blocking_send(InputEvent::Quit);
    Ok(())
}

pub struct ConsoleCollector;

impl ConsoleCollector {
    /// Starts reading stdin on a dedicated thread
    ///
    /// A blocking read on a tokio blocking-pool thread would hold up runtime
    /// shutdown until the next line arrives; a detached thread does not.
    pub fn spawn(sender: mpsc::Sender<InputEvent>) -> Result<Self, InputError> {
        info!("Reading commands from stdin: <tilt> | b | a | r | p | q");

        std::thread::Builder::new()
            .name("console".to_string())
            .spawn(move || {
                if let Err(e) = forward_lines(std::io::stdin().lock(), sender) {
                    error!("Console reader stopped: {}", e);
                }
            })
            .map_err(|e| InputError::InitializationError(e.to_string()))?;

        Ok(Self)
    }
}
