//! Control error types.

use thiserror::Error;

/// Failures reported by an [`Actuator`](crate::Actuator).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ActuatorError {
    /// No actuator with this id.
    #[error("invalid actuator {id} (bank has {count})")]
    InvalidActuator {
        /// Requested id.
        id: u32,
        /// Number of actuators, addressed `1..=count`.
        count: u32,
    },
    /// Position outside the configured limits.
    #[error("position {position} out of range [{min}, {max}]")]
    PositionOutOfRange {
        /// Requested position.
        position: f64,
        /// Lowest accepted position.
        min: f64,
        /// Highest accepted position.
        max: f64,
    },
    /// The driver itself failed.
    #[error("actuator hardware error: {0}")]
    Hardware(String),
}

/// Failures while accepting or decoding a command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The payload does not describe a valid command.
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    /// The queue is full and the policy is to drop.
    #[error("command queue full")]
    QueueFull,
    /// The consumer has gone away.
    #[error("command queue closed")]
    QueueClosed,
}
