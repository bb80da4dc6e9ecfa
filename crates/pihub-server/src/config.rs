//! Server configuration.

use std::time::Duration;

use pihub_settings::ServerSettings;
use serde::{Deserialize, Serialize};

/// Configuration for the hub server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Outbound queue capacity per connection.
    pub send_queue_capacity: usize,
    /// Cumulative drops after which a slow client is disconnected.
    pub max_send_drops: u64,
    /// Interval between server pings in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Close a connection that has not ponged for this long, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// How long to wait for sessions to finish after `stop`, in milliseconds.
    pub drain_timeout_ms: u64,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl ServerConfig {
    /// Ping interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    /// Pong deadline.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms.max(1))
    }

    /// Session drain deadline.
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// `host:port` as configured.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 64,
            send_queue_capacity: 256,
            max_send_drops: 100,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            drain_timeout_ms: 5_000,
            max_message_size: 1024 * 1024,
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            max_connections: s.max_connections,
            send_queue_capacity: s.send_queue_capacity,
            max_send_drops: s.max_send_drops,
            heartbeat_interval_ms: s.heartbeat_interval_ms,
            heartbeat_timeout_ms: s.heartbeat_timeout_ms,
            drain_timeout_ms: s.drain_timeout_ms,
            max_message_size: s.max_message_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_loopback_on_any_port() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
        assert_eq!(cfg.bind_addr(), "127.0.0.1:0");
    }

    #[test]
    fn from_settings_keeps_production_bind() {
        let cfg = ServerConfig::from(&ServerSettings::default());
        assert_eq!(cfg.bind_addr(), "0.0.0.0:45223");
        assert_eq!(cfg.max_send_drops, 100);
    }

    #[test]
    fn durations() {
        let cfg = ServerConfig {
            heartbeat_interval_ms: 250,
            drain_timeout_ms: 0,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.heartbeat_interval(), Duration::from_millis(250));
        assert_eq!(cfg.drain_timeout(), Duration::ZERO);
    }

    #[test]
    fn zero_heartbeat_is_clamped() {
        let cfg = ServerConfig {
            heartbeat_interval_ms: 0,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.heartbeat_interval(), Duration::from_millis(1));
    }

    #[test]
    fn deserialize_from_json_string() {
        let json = r#"{"host":"10.0.0.1","port":3000,"max_connections":5,"send_queue_capacity":8,"max_send_drops":2,"heartbeat_interval_ms":10,"heartbeat_timeout_ms":30,"drain_timeout_ms":100,"max_message_size":512}"#;
        let cfg: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.host, "10.0.0.1");
        assert_eq!(cfg.max_connections, 5);
        assert_eq!(cfg.send_queue_capacity, 8);
    }
}
