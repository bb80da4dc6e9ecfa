//! `/health` endpoint body.

use std::time::Instant;

use serde::Serialize;

use crate::server::HubState;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while serving, `"unavailable"` otherwise.
    pub status: &'static str,
    /// Lifecycle state.
    pub state: HubState,
    /// Seconds since the server was created.
    pub uptime_secs: u64,
    /// Live WebSocket connections.
    pub connections: usize,
    /// Event names with at least one subscriber.
    pub events: usize,
}

impl HealthResponse {
    /// Whether the hub accepts connections.
    pub fn is_ok(&self) -> bool {
        self.state == HubState::Serving
    }
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    state: HubState,
    connections: usize,
    events: usize,
) -> HealthResponse {
    HealthResponse {
        status: if state == HubState::Serving {
            "ok"
        } else {
            "unavailable"
        },
        state,
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        events,
    }
}
