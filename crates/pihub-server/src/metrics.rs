//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Fails if a recorder is
/// already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter, labels: outcome).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connections terminated for protocol errors (counter, labels: kind).
pub const WS_PROTOCOL_ERRORS_TOTAL: &str = "ws_protocol_errors_total";
/// Connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Upgrades refused with 503 (counter, labels: reason).
pub const WS_REJECTED_TOTAL: &str = "ws_rejected_total";
/// Publishes with at least one subscriber (counter).
pub const HUB_PUBLISH_TOTAL: &str = "hub_publish_total";
/// Messages placed on outbound queues (counter).
pub const HUB_DELIVERIES_TOTAL: &str = "hub_deliveries_total";
/// Messages dropped on full outbound queues (counter).
pub const HUB_SEND_DROPS_TOTAL: &str = "hub_send_drops_total";
pub use pihub_control::controller::{
    HUB_COMMANDS_DEBOUNCED_TOTAL, HUB_COMMANDS_REJECTED_TOTAL, HUB_COMMANDS_TOTAL,
};
