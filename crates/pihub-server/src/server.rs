//! `HubServer`: listener, lifecycle state machine and session draining.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use pihub_control::CommandSender;
use pihub_core::ConnectionId;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::metrics::WS_REJECTED_TOTAL;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::broadcast::EventHub;
use crate::websocket::connection::Connection;
use crate::websocket::session::{SessionSettings, run_session};

/// Lifecycle state: `Stopped → Serving → Draining → Stopped`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HubState {
    /// Not listening.
    Stopped,
    /// Accepting connections and dispatching events.
    Serving,
    /// Refusing new connections while sessions wind down.
    Draining,
}

/// The hub server. Runs once: after it reaches `Stopped` it cannot serve
/// again.
pub struct HubServer {
    config: ServerConfig,
    hub: Arc<EventHub>,
    commands: Option<CommandSender>,
    shutdown: ShutdownCoordinator,
    state: watch::Sender<HubState>,
    sessions: TaskTracker,
    started: AtomicBool,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl HubServer {
    /// Create a server. Inbound commands go to `commands` when given and
    /// are dropped otherwise.
    pub fn new(config: ServerConfig, commands: Option<CommandSender>) -> Self {
        let hub = Arc::new(EventHub::new(config.max_send_drops));
        let (state, _) = watch::channel(HubState::Stopped);
        Self {
            config,
            hub,
            commands,
            shutdown: ShutdownCoordinator::new(),
            state,
            sessions: TaskTracker::new(),
            started: AtomicBool::new(false),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from this recorder handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// The event hub, for publishers.
    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> HubState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<HubState> {
        self.state.subscribe()
    }

    /// Sessions still running.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            ping_interval: self.config.heartbeat_interval(),
            pong_timeout: self.config.heartbeat_timeout(),
        }
    }

    /// Build the router. Every path other than `/health` and `/metrics`
    /// accepts WebSocket upgrades.
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/", get(ws_handler))
            .route("/{*path}", get(ws_handler))
            .with_state(Arc::clone(self))
    }

    async fn bind(&self) -> Result<TcpListener, ServerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyStarted);
        }
        let addr = self.config.bind_addr();
        TcpListener::bind((self.config.host.as_str(), self.config.port))
            .await
            .map_err(|source| {
                error!(%addr, error = %source, "failed to bind listener");
                ServerError::Bind { addr, source }
            })
    }

    /// Bind, serve until [`stop`](Self::stop) or a listener failure, then
    /// drain sessions for up to the drain timeout.
    pub async fn serve_forever(self: &Arc<Self>) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        Arc::clone(self).run(listener).await
    }

    /// Bind and serve in the background. Returns the bound address and the
    /// handle resolving when the server reaches `Stopped`.
    pub async fn listen(
        self: &Arc<Self>,
    ) -> Result<(SocketAddr, JoinHandle<Result<(), ServerError>>), ServerError> {
        let listener = self.bind().await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(Arc::clone(self).run(listener));
        Ok((addr, handle))
    }

    /// Request a graceful stop. Idempotent and callable from any task.
    pub fn stop(&self) {
        let _ = self.state.send_if_modified(|state| {
            if *state == HubState::Serving {
                *state = HubState::Draining;
                true
            } else {
                false
            }
        });
        if !self.shutdown.is_shutting_down() {
            info!("stop requested");
            self.shutdown.shutdown();
        }
    }

    async fn run(self: Arc<Self>, listener: TcpListener) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        let _ = self.state.send_if_modified(|state| {
            if self.shutdown.is_shutting_down() {
                false
            } else {
                *state = HubState::Serving;
                true
            }
        });
        info!(%addr, "hub serving");

        let token = self.shutdown.token();
        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await;
        if let Err(ref e) = served {
            error!(error = %e, "listener failed");
        }

        // Propagates to every session's close token.
        self.shutdown.shutdown();
        let _ = self.state.send_replace(HubState::Draining);
        info!(sessions = self.sessions.len(), "hub draining");
        self.sessions.close();
        if tokio::time::timeout(self.config.drain_timeout(), self.sessions.wait())
            .await
            .is_err()
        {
            warn!(
                remaining = self.sessions.len(),
                "drain timed out, abandoning sessions"
            );
        }
        let _ = self.state.send_replace(HubState::Stopped);
        info!("hub stopped");
        served.map_err(ServerError::Serve)
    }
}

/// GET /{*path} with a WebSocket upgrade.
async fn ws_handler(
    State(server): State<Arc<HubServer>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    uri: Uri,
    ws: WebSocketUpgrade,
) -> Response {
    if server.state() != HubState::Serving {
        counter!(WS_REJECTED_TOTAL, "reason" => "not_serving").increment(1);
        debug!(%remote, "hub not serving, rejecting connection");
        return (StatusCode::SERVICE_UNAVAILABLE, "hub is not serving").into_response();
    }
    let limit = server.config.max_connections;
    if server.hub.connection_count() >= limit {
        counter!(WS_REJECTED_TOTAL, "reason" => "max_connections").increment(1);
        warn!(%remote, limit, "connection limit reached, rejecting connection");
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    }

    let (tx, rx) = mpsc::channel(server.config.send_queue_capacity.max(1));
    let conn = Arc::new(Connection::new(
        ConnectionId::new(),
        remote,
        uri.path(),
        tx,
        server.shutdown.child_token(),
    ));
    let hub = Arc::clone(&server.hub);
    let commands = server.commands.clone();
    let settings = server.session_settings();
    let tracker = server.sessions.clone();
    ws.max_message_size(server.config.max_message_size)
        .on_upgrade(move |socket| {
            tracker.track_future(run_session(socket, conn, rx, hub, commands, settings))
        })
}

/// GET /health
async fn health_handler(State(server): State<Arc<HubServer>>) -> (StatusCode, Json<HealthResponse>) {
    let resp = health::health_check(
        server.start_time,
        server.state(),
        server.hub.connection_count(),
        server.hub.event_count(),
    );
    let status = if resp.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(resp))
}

/// GET /metrics
async fn metrics_handler(State(server): State<Arc<HubServer>>) -> Response {
    match &server.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    fn make_server() -> Arc<HubServer> {
        Arc::new(HubServer::new(ServerConfig::default(), None))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or_default())
    }

    #[test]
    fn starts_stopped() {
        let server = make_server();
        assert_eq!(server.state(), HubState::Stopped);
        assert_eq!(server.hub().connection_count(), 0);
    }

    #[tokio::test]
    async fn health_unavailable_before_serving() {
        let server = make_server();
        let (status, body) = get_json(server.router(), "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["state"], "stopped");
        assert_eq!(body["connections"], 0);
    }

    #[tokio::test]
    async fn metrics_not_found_without_recorder() {
        let server = make_server();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_rendered_with_recorder() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let server = Arc::new(HubServer::new(ServerConfig::default(), None).with_metrics(handle));
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn listen_serve_and_stop() {
        let server = make_server();
        let mut states = server.subscribe_state();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        let _ = states.wait_for(|s| *s == HubState::Serving).await.unwrap();

        server.stop();
        assert_ne!(server.state(), HubState::Serving);
        handle.await.unwrap().unwrap();
        assert_eq!(server.state(), HubState::Stopped);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let server = make_server();
        let (_addr, handle) = server.listen().await.unwrap();
        server.stop();
        server.stop();
        handle.await.unwrap().unwrap();
        server.stop();
        assert_eq!(server.state(), HubState::Stopped);
    }

    #[tokio::test]
    async fn single_use() {
        let server = make_server();
        let (_addr, handle) = server.listen().await.unwrap();
        server.stop();
        handle.await.unwrap().unwrap();
        assert_matches!(server.serve_forever().await, Err(ServerError::AlreadyStarted));
    }

    #[tokio::test]
    async fn bind_failure_is_fatal() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let server = Arc::new(HubServer::new(
            ServerConfig {
                port,
                ..ServerConfig::default()
            },
            None,
        ));
        assert_matches!(
            server.serve_forever().await,
            Err(ServerError::Bind { addr, .. }) if addr == format!("127.0.0.1:{port}")
        );
        assert_eq!(server.state(), HubState::Stopped);
    }

    #[tokio::test]
    async fn stop_before_serving_never_reports_serving() {
        let server = make_server();
        server.stop();
        server.serve_forever().await.unwrap();
        assert_eq!(server.state(), HubState::Stopped);
    }
}
