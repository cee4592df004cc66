use super::{ButtonRole, ButtonState, InputError, InputEvent};
use crate::config::{InputConfig, PadButton, TiltAxis};
use gilrs::{Axis, Button, Event, EventType, GamepadId, Gilrs};
use statum::{machine, state};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

// Axis movements smaller than this are not forwarded
const AXIS_EPSILON: f32 = 0.01;
const POLL_INTERVAL: Duration = Duration::from_millis(2);

#[state]
#[derive(Debug, Clone)]
pub enum CollectionState {
    Initializing,
    Collecting,
}

#[machine]
#[derive(Debug)]
pub struct GamepadCollector<S: CollectionState> {
    gilrs: Gilrs,

    active_gamepad: Option<GamepadId>,

    settings: InputConfig,

    event_sender: mpsc::Sender<InputEvent>,

    // Last forwarded tilt, before scaling
    last_axis_value: f32,
}

impl GamepadCollector<Initializing> {
    pub fn create(
        settings: InputConfig,
        event_sender: mpsc::Sender<InputEvent>,
    ) -> Result<Self, InputError> {
        info!("Initializing gilrs gamepad interface");
        let gilrs = Gilrs::new().map_err(|e| {
            error!("Failed to initialize gilrs: {}", e);
            InputError::InitializationError(e.to_string())
        })?;

        Ok(Self::new(gilrs, None, settings, event_sender, 0.0))
    }

    pub fn initialize(mut self) -> GamepadCollector<Collecting> {
        let gamepads: Vec<_> = self.gilrs.gamepads().collect();

        if gamepads.is_empty() {
            warn!("No gamepad connected, waiting for one to appear");
        } else {
            for (id, gamepad) in gamepads.iter() {
                info!("Found gamepad {}: {}", id, gamepad.name());
            }
            let (id, gamepad) = &gamepads[0];
            self.active_gamepad = Some(*id);
            info!("Selected gamepad: {} ({})", gamepad.name(), id);
        }

        info!(
            "Tilt from {:?} (scale {}, deadzone {}), brake {:?}, accelerate {:?}, pause {:?}",
            self.settings.axis,
            self.settings.axis_scale,
            self.settings.deadzone,
            self.settings.brake_button,
            self.settings.accelerate_button,
            self.settings.pause_button
        );
        self.transition()
    }
}

impl GamepadCollector<Collecting> {
    /// Polls gilrs until the receiving side goes away
    pub fn run_collection_loop(&mut self) {
        info!("Starting gamepad collection loop");

        loop {
            while let Some(Event { id, event, .. }) = self.gilrs.next_event() {
                let connected = matches!(event, EventType::Connected);
                match source_decision(self.active_gamepad, id, connected) {
                    SourceDecision::Forward => {}
                    SourceDecision::Select(id) => {
                        info!("Gamepad {} connected, selecting it", id);
                        self.active_gamepad = Some(id);
                    }
                    SourceDecision::Drop => {
                        debug!("Skipping event from non-active gamepad: {:?}", id);
                        continue;
                    }
                }

                let Some(input) = self.convert_event(event) else {
                    continue;
                };
                if self.event_sender.blocking_send(input).is_err() {
                    info!("Input channel closed, stopping gamepad collector");
                    return;
                }
            }

            if self.event_sender.is_closed() {
                info!("Input channel closed, stopping gamepad collector");
                return;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn convert_event(&mut self, event: EventType) -> Option<InputEvent> {
        match event {
            EventType::AxisChanged(axis, value, _) => {
                if axis != gilrs_axis(self.settings.axis) {
                    return None;
                }
                let value = apply_deadzone(value, self.settings.deadzone);
                if (value - self.last_axis_value).abs() < AXIS_EPSILON {
                    return None;
                }
                self.last_axis_value = value;
                let tilt = scale_axis(value, &self.settings);
                debug!("Axis {:?} = {:.4} -> tilt {:.3}", axis, value, tilt);
                Some(InputEvent::tilt(tilt))
            }
            EventType::ButtonPressed(button, _) => {
                let role = role_for(button, &self.settings)?;
                Some(InputEvent::button(role, ButtonState::Pressed))
            }
            EventType::ButtonReleased(button, _) => {
                let role = role_for(button, &self.settings)?;
                Some(InputEvent::button(role, ButtonState::Released))
            }
            EventType::Disconnected => {
                warn!("Gamepad disconnected");
                self.active_gamepad = None;
                // A hold must not outlive the pad
                self.last_axis_value = 0.0;
                Some(InputEvent::button(
                    ButtonRole::Accelerate,
                    ButtonState::Released,
                ))
            }
            _ => None,
        }
    }
}

pub struct GamepadHandle;

impl GamepadHandle {
    /// Starts the collector on a dedicated thread
    ///
    /// gilrs polling is blocking, so it runs outside the tokio runtime. The
    /// call returns once gilrs has been initialized.
    pub async fn spawn(
        settings: InputConfig,
        event_sender: mpsc::Sender<InputEvent>,
    ) -> Result<Self, InputError> {
        let (ready_tx, ready_rx) = oneshot::channel();

        std::thread::Builder::new()
            .name("gamepad".to_string())
            .spawn(move || match GamepadCollector::<Initializing>::create(settings, event_sender) {
                Ok(collector) => {
                    let _ = ready_tx.send(Ok(()));
                    collector.initialize().run_collection_loop();
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| InputError::InitializationError(e.to_string()))?;

        ready_rx
            .await
            .map_err(|_| InputError::InitializationError("gamepad thread exited".to_string()))??;

        info!("Gamepad collector started");
        Ok(Self)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SourceDecision<T> {
    Forward,
    Select(T),
    Drop,
}

/// Only the active pad is listened to; with none active, the next one to connect is taken
fn source_decision<T: PartialEq>(
    active: Option<T>,
    id: T,
    connected: bool,
) -> SourceDecision<T> {
    match active {
        Some(active) if active == id => SourceDecision::Forward,
        Some(_) => SourceDecision::Drop,
        None if connected => SourceDecision::Select(id),
        None => SourceDecision::Drop,
    }
}

fn gilrs_axis(axis: TiltAxis) -> Axis {
    match axis {
        TiltAxis::LeftStickX => Axis::LeftStickX,
        TiltAxis::LeftStickY => Axis::LeftStickY,
        TiltAxis::RightStickX => Axis::RightStickX,
        TiltAxis::RightStickY => Axis::RightStickY,
    }
}

fn pad_button(button: Button) -> Option<PadButton> {
    match button {
        Button::South => Some(PadButton::South),
        Button::East => Some(PadButton::East),
        Button::North => Some(PadButton::North),
        Button::West => Some(PadButton::West),
        Button::LeftTrigger => Some(PadButton::LeftTrigger),
        Button::LeftTrigger2 => Some(PadButton::LeftTrigger2),
        Button::RightTrigger => Some(PadButton::RightTrigger),
        Button::RightTrigger2 => Some(PadButton::RightTrigger2),
        Button::Start => Some(PadButton::Start),
        Button::Select => Some(PadButton::Select),
        _ => None,
    }
}

fn role_for(button: Button, settings: &InputConfig) -> Option<ButtonRole> {
    let button = pad_button(button)?;
    if button == settings.brake_button {
        Some(ButtonRole::Brake)
    } else if button == settings.accelerate_button {
        Some(ButtonRole::Accelerate)
    } else if button == settings.pause_button {
        Some(ButtonRole::PauseToggle)
    } else {
        None
    }
}

fn scale_axis(value: f32, settings: &InputConfig) -> f32 {
    let sign = if settings.invert_axis { -1.0 } else { 1.0 };
    sign * value * settings.axis_scale
}

fn apply_deadzone(value: f32, deadzone: f32) -> f32 {
    if value.abs() < deadzone {
        0.0
    } else {
        // Rescale the value to the range outside the deadzone
        let sign = if value < 0.0 { -1.0 } else { 1.0 };
        sign * (value.abs() - deadzone) / (1.0 - deadzone)
    }
}
