//! Command queue and actuator settings.

use serde::{Deserialize, Serialize};

/// What a producer does when the command queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueueFullPolicy {
    /// The producing session waits for room. Back-pressures only that client.
    #[default]
    Block,
    /// The new command is rejected and logged.
    DropNewest,
}

/// Command queue settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommandSettings {
    /// Bounded queue capacity.
    pub queue_capacity: usize,
    /// Full-queue policy.
    pub full_policy: QueueFullPolicy,
    /// Republish commands no controller handles under their own name.
    pub relay_unhandled: bool,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            full_policy: QueueFullPolicy::Block,
            relay_unhandled: false,
        }
    }
}

/// Servo bank limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActuatorSettings {
    /// Number of actuators, addressed `1..=count`.
    pub count: u32,
    /// Lowest accepted position.
    pub min_position: f64,
    /// Highest accepted position.
    pub max_position: f64,
    /// Pulse width at `min_position`, in microseconds.
    pub min_pulse_us: u32,
    /// Pulse width at `max_position`, in microseconds.
    pub max_pulse_us: u32,
}

impl Default for ActuatorSettings {
    fn default() -> Self {
        Self {
            count: 4,
            min_position: 0.0,
            max_position: 1.0,
            min_pulse_us: 1000,
            max_pulse_us: 2000,
        }
    }
}
