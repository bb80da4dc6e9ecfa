//! WebSocket connection state, fan-out, heartbeat and sessions.

pub mod broadcast;
pub mod connection;
pub mod heartbeat;
pub mod session;
