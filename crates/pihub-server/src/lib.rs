//! # pihub-server
//!
//! Axum `WebSocket` event hub.
//!
//! - Subscription registry: connection ↔ event name index with leak-free cleanup
//! - Event hub: snapshot fan-out over per-connection bounded outbound queues
//! - Connection sessions: receive loop, control/command decoding, ordered writer
//! - Lifecycle: `Stopped → Serving → Draining → Stopped` with session draining
//! - HTTP endpoints: `/health`, `/metrics`
//! - Operator console: a `stop` line triggers graceful shutdown

#![deny(unsafe_code)]

pub mod config;
pub mod console;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::ServerError;
pub use server::{HubServer, HubState};
pub use websocket::broadcast::EventHub;
