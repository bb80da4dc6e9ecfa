//! Wire protocol.
//!
//! Inbound frames are JSON in one of these shapes:
//! - `{"action": "subscribe" | "unsubscribe", "event": name}`: control
//! - `["subscribe" | "unsubscribe", name]`: control, array framing
//! - `[name, payload]`: command
//! - `{"event": name, "payload"?: value}`: command
//!
//! Outbound broadcasts are always `[event, payload]`.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// A control message that mutates the registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlMessage {
    /// Start receiving `event`.
    Subscribe {
        /// Event name.
        event: String,
    },
    /// Stop receiving `event`.
    Unsubscribe {
        /// Event name.
        event: String,
    },
}

/// One decoded inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    /// Registry mutation.
    Control(ControlMessage),
    /// Anything else with an event name, forwarded to the command queue.
    Command {
        /// Event name.
        event: String,
        /// Payload, `null` if absent.
        payload: Value,
    },
}

/// Protocol violations. Each one terminates only the offending connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Not JSON (or not UTF-8).
    #[error("malformed message: {0}")]
    Malformed(String),
    /// `action` is not one the hub understands.
    #[error("unknown action {action:?}")]
    UnknownAction {
        /// The offending action.
        action: String,
    },
    /// JSON, but no event name can be derived from it.
    #[error("invalid message: {reason}")]
    InvalidControl {
        /// What was wrong.
        reason: String,
    },
}

impl ProtocolError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::UnknownAction { .. } => "unknown_action",
            Self::InvalidControl { .. } => "invalid",
        }
    }
}

fn invalid(reason: impl Into<String>) -> ProtocolError {
    ProtocolError::InvalidControl {
        reason: reason.into(),
    }
}

/// Decode one inbound text frame.
pub fn decode(text: &str) -> Result<Inbound, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    match value {
        Value::Object(mut obj) => {
            if let Some(action) = obj.remove("action") {
                let Value::String(action) = action else {
                    return Err(invalid("action must be a string"));
                };
                let event = match obj.remove("event") {
                    Some(Value::String(event)) => event,
                    _ => return Err(invalid("control message needs a string event")),
                };
                return control(action, event);
            }
            match obj.remove("event") {
                Some(Value::String(event)) => Ok(Inbound::Command {
                    event,
                    payload: obj.remove("payload").unwrap_or(Value::Null),
                }),
                Some(_) => Err(invalid("event must be a string")),
                None => Err(invalid("object has neither action nor event")),
            }
        }
        Value::Array(items) => {
            let [name, payload]: [Value; 2] = items
                .try_into()
                .map_err(|_| invalid("array messages must be [event, data]"))?;
            let Value::String(name) = name else {
                return Err(invalid("array message must start with an event name"));
            };
            match name.as_str() {
                "subscribe" | "unsubscribe" => {
                    let Value::String(event) = payload else {
                        return Err(invalid("control message needs a string event"));
                    };
                    control(name, event)
                }
                _ => Ok(Inbound::Command {
                    event: name,
                    payload,
                }),
            }
        }
        _ => Err(invalid("expected a JSON object or array")),
    }
}

fn control(action: String, event: String) -> Result<Inbound, ProtocolError> {
    match action.as_str() {
        "subscribe" => Ok(Inbound::Control(ControlMessage::Subscribe { event })),
        "unsubscribe" => Ok(Inbound::Control(ControlMessage::Unsubscribe { event })),
        _ => Err(ProtocolError::UnknownAction { action }),
    }
}

/// Encode a broadcast frame `[event, payload]`.
pub fn encode_broadcast<P: Serialize + ?Sized>(
    event: &str,
    payload: &P,
) -> Result<String, serde_json::Error> {
    serde_json::to_string(&(event, payload))
}
