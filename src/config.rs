//! TOML configuration
//!
//! Every section and field has a default, so a missing or partial file still
//! yields a usable configuration. The default location is
//! `<config dir>/tiltdrive/config.toml`; a default file is written there on
//! first start.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const CONFIG_DIR: &str = "tiltdrive";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No configuration directory available on this platform")]
    NoConfigDir,

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub controller: ControllerConfig,
    pub dispatch: DispatchConfig,
    pub sensor: SensorConfig,
    pub input: InputConfig,
    pub logging: LoggingConfig,
}

/// Where commands are sent
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    pub endpoint: String,
    pub query_key: String,
    pub request_timeout_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://10.145.152.165/api".to_string(),
            query_key: "val".to_string(),
            request_timeout_ms: 2000,
        }
    }
}

/// Timing of the accelerate hold gesture
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DispatchConfig {
    /// Interval between repeated accelerate commands while held
    pub repeat_interval_ms: u64,
    /// Press duration after which a press counts as a hold
    pub long_press_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            repeat_interval_ms: 50,
            long_press_ms: 500,
        }
    }
}

impl DispatchConfig {
    pub fn repeat_interval(&self) -> Duration {
        Duration::from_millis(self.repeat_interval_ms)
    }

    pub fn long_press(&self) -> Duration {
        Duration::from_millis(self.long_press_ms)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SensorConfig {
    /// Cadence at which tilt readings are delivered
    pub sample_interval_ms: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 200,
        }
    }
}

impl SensorConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InputSource {
    #[default]
    Gamepad,
    Console,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TiltAxis {
    LeftStickX,
    LeftStickY,
    RightStickX,
    RightStickY,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PadButton {
    South,
    East,
    North,
    West,
    LeftTrigger,
    LeftTrigger2,
    RightTrigger,
    RightTrigger2,
    Start,
    Select,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct InputConfig {
    pub source: InputSource,
    pub axis: TiltAxis,
    /// Tilt units produced by full stick deflection
    pub axis_scale: f32,
    pub invert_axis: bool,
    pub deadzone: f32,
    pub brake_button: PadButton,
    pub accelerate_button: PadButton,
    pub pause_button: PadButton,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            source: InputSource::Gamepad,
            axis: TiltAxis::LeftStickY,
            axis_scale: 5.0,
            invert_axis: false,
            deadzone: 0.05,
            brake_button: PadButton::South,
            accelerate_button: PadButton::RightTrigger2,
            pause_button: PadButton::Start,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let mut path = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        Ok(path)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch.repeat_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.repeat_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.sensor.sample_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "sensor.sample_interval_ms must be greater than 0".to_string(),
            ));
        }
        if !(self.input.axis_scale > 0.0) {
            return Err(ConfigError::Invalid(
                "input.axis_scale must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.input.deadzone) {
            return Err(ConfigError::Invalid(
                "input.deadzone must be in [0, 1)".to_string(),
            ));
        }
        let buttons = [
            self.input.brake_button,
            self.input.accelerate_button,
            self.input.pause_button,
        ];
        if buttons[0] == buttons[1] || buttons[0] == buttons[2] || buttons[1] == buttons[2] {
            return Err(ConfigError::Invalid(
                "brake, accelerate and pause buttons must differ".to_string(),
            ));
        }
        if self.controller.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "controller.endpoint must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Loads the configuration, writing a default file first if none exists
    pub async fn load_or_create(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;

        if !exists {
            info!("No configuration at {}, writing defaults", path.display());
            let config = Config::default();
            config.save(&path).await?;
            return Ok(config);
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
        let config = Self::from_toml(&content)?;
        debug!("Loaded configuration from {}: {:?}", path.display(), config);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ConfigError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
    }
}
