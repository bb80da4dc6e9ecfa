//! Settings type definitions.
//!
//! Every struct uses `#[serde(rename_all = "camelCase", default)]` so a user
//! file only needs the keys it overrides.

mod control;
mod sensor;
mod server;

pub use control::{ActuatorSettings, CommandSettings, QueueFullPolicy};
pub use sensor::{ClockSettings, SensorSettings};
pub use server::ServerSettings;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings for the hub process.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Listener and connection limits.
    pub server: ServerSettings,
    /// Command queue behaviour.
    pub commands: CommandSettings,
    /// Actuator bank limits.
    pub actuators: ActuatorSettings,
    /// Sensor source.
    pub sensor: SensorSettings,
    /// `time` heartbeat.
    pub clock: ClockSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl HubSettings {
    /// Reject combinations the hub cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.commands.queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "commands.queueCapacity must be at least 1".into(),
            ));
        }
        if self.server.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.sendQueueCapacity must be at least 1".into(),
            ));
        }
        if self.actuators.count == 0 {
            return Err(SettingsError::InvalidValue(
                "actuators.count must be at least 1".into(),
            ));
        }
        if self.actuators.min_position >= self.actuators.max_position {
            return Err(SettingsError::InvalidValue(format!(
                "actuators.minPosition ({}) must be below maxPosition ({})",
                self.actuators.min_position, self.actuators.max_position
            )));
        }
        if self.actuators.min_pulse_us >= self.actuators.max_pulse_us {
            return Err(SettingsError::InvalidValue(format!(
                "actuators.minPulseUs ({}) must be below maxPulseUs ({})",
                self.actuators.min_pulse_us, self.actuators.max_pulse_us
            )));
        }
        if self.sensor.sample_rate == 0 {
            return Err(SettingsError::InvalidValue(
                "sensor.sampleRate must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
