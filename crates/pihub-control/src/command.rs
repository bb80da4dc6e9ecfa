//! Command values carried on the queue.

use std::time::Duration;

use pihub_core::ConnectionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::CommandError;

/// An inbound non-control message, as submitted by a connection session.
#[derive(Clone, Debug, PartialEq)]
pub struct HubCommand {
    /// Event name, e.g. `move-servo`.
    pub event: String,
    /// Raw payload; interpretation is up to the controller.
    pub payload: Value,
    /// Connection that sent it, if any.
    pub origin: Option<ConnectionId>,
}

impl HubCommand {
    /// Build a command with no originating connection.
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
            origin: None,
        }
    }

    /// Attach the originating connection.
    #[must_use]
    pub fn from_connection(mut self, origin: ConnectionId) -> Self {
        self.origin = Some(origin);
        self
    }
}

/// Longest accepted sticky window.
pub const MAX_STICKY: Duration = Duration::from_secs(24 * 60 * 60);

/// Wire shape of a `move-servo` payload.
#[derive(Debug, Deserialize)]
struct MovePayload {
    #[serde(alias = "actuator")]
    n: u32,
    position: f64,
    #[serde(default)]
    sticky: Option<f64>,
}

/// A decoded `move-servo` command.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MoveCommand {
    /// Actuator id, `1..=count`.
    pub actuator: u32,
    /// Target position.
    pub position: f64,
    /// Optional debounce window opened by this command.
    pub sticky: Option<Duration>,
}

impl MoveCommand {
    /// Decode from a `move-servo` payload.
    ///
    /// `sticky` is in seconds; a negative, non-finite or longer than
    /// [`MAX_STICKY`] value is rejected.
    pub fn from_payload(payload: &Value) -> Result<Self, CommandError> {
        let raw: MovePayload = serde_json::from_value(payload.clone())
            .map_err(|e| CommandError::InvalidCommand(e.to_string()))?;
        if !raw.position.is_finite() {
            return Err(CommandError::InvalidCommand(
                "position must be a finite number".into(),
            ));
        }
        let sticky = raw
            .sticky
            .map(|secs| {
                Duration::try_from_secs_f64(secs).map_err(|_| {
                    CommandError::InvalidCommand(format!("sticky must be non-negative seconds, got {secs}"))
                })
            })
            .transpose()?;
        if let Some(window) = sticky.filter(|w| *w > MAX_STICKY) {
            return Err(CommandError::InvalidCommand(format!(
                "sticky must be at most {}s, got {}s",
                MAX_STICKY.as_secs(),
                window.as_secs_f64()
            )));
        }
        Ok(Self {
            actuator: raw.n,
            position: raw.position,
            sticky,
        })
    }
}

/// Payload of a `servo-position` echo.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ServoPosition {
    /// Actuator id.
    pub n: u32,
    /// Applied position.
    pub position: f64,
    /// Hub clock seconds at which it was applied.
    pub time: f64,
}
