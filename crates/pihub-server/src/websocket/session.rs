//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use pihub_control::{CommandError, CommandSender, HubCommand};
use pihub_core::ConnectionId;
use tokio::sync::mpsc;
use tracing::{Instrument, Span, debug, info, instrument, warn};

use super::broadcast::EventHub;
use super::connection::Connection;
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL, WS_PROTOCOL_ERRORS_TOTAL,
};
use crate::protocol::{ControlMessage, Inbound, ProtocolError, decode};

/// Per-session timing.
#[derive(Clone, Copy, Debug)]
pub struct SessionSettings {
    /// Interval between server pings.
    pub ping_interval: Duration,
    /// Silence after which the client is considered dead.
    pub pong_timeout: Duration,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client closed the socket.
    ClientClosed,
    /// The hub asked the connection to close (shutdown, eviction, heartbeat).
    ServerClosed,
    /// The client broke the protocol.
    Protocol(ProtocolError),
    /// The socket failed.
    Transport(String),
}

impl SessionEnd {
    /// Whether this is a normal disconnect.
    pub fn is_graceful(&self) -> bool {
        matches!(self, Self::ClientClosed | Self::ServerClosed)
    }

    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::ServerClosed => "server_closed",
            Self::Protocol(_) => "protocol_error",
            Self::Transport(_) => "transport_error",
        }
    }
}

/// Removes the connection from the hub when the session ends, however it
/// ends (return, panic or task abort).
struct Registration {
    hub: Arc<EventHub>,
    id: ConnectionId,
    started: Instant,
}

impl Registration {
    fn new(hub: Arc<EventHub>, conn: &Arc<Connection>) -> Self {
        hub.register(Arc::clone(conn));
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
        Self {
            hub,
            id: conn.id().clone(),
            started: Instant::now(),
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let events = self.hub.drop_connection(&self.id);
        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        histogram!(WS_CONNECTION_DURATION_SECONDS).record(self.started.elapsed().as_secs_f64());
        debug!(conn_id = %self.id, subscriptions = events.len(), "connection unregistered");
    }
}

/// Run a WebSocket session for a connected client.
///
/// 1. Registers the connection with the hub
/// 2. Spawns the writer (outbound queue + pings) and the heartbeat monitor
/// 3. Reads frames until the client leaves, the protocol is violated or a
///    close is requested
/// 4. Flushes queued messages, sends Close, unregisters and logs the outcome
#[instrument(skip_all, fields(conn_id = %conn.id()))]
pub async fn run_session(
    ws: WebSocket,
    conn: Arc<Connection>,
    outbound: mpsc::Receiver<Arc<str>>,
    hub: Arc<EventHub>,
    commands: Option<CommandSender>,
    settings: SessionSettings,
) {
    let _registration = Registration::new(hub.clone(), &conn);
    info!(remote = %conn.remote(), path = conn.path(), "client connected");

    let (ws_tx, mut ws_rx) = ws.split();
    let writer = tokio::spawn(
        write_loop(ws_tx, outbound, conn.clone(), settings.ping_interval).instrument(Span::current()),
    );
    let heartbeat = tokio::spawn({
        let conn = conn.clone();
        async move {
            let result = run_heartbeat(
                conn.clone(),
                settings.ping_interval,
                settings.pong_timeout,
                conn.close_token(),
            )
            .await;
            if result == HeartbeatResult::TimedOut {
                let silent_ms = u64::try_from(conn.last_pong_elapsed().as_millis()).unwrap_or(u64::MAX);
                warn!(silent_ms, "client unresponsive, disconnecting");
                conn.close();
            }
        }
        .instrument(Span::current())
    });

    let end = read_loop(&mut ws_rx, &conn, &hub, commands.as_ref()).await;

    conn.close();
    let _ = heartbeat.await;
    let writer_abort = writer.abort_handle();
    if tokio::time::timeout(settings.pong_timeout, writer).await.is_err() {
        warn!("writer did not finish flushing, aborting");
        writer_abort.abort();
    }

    let duration_ms = u64::try_from(conn.age().as_millis()).unwrap_or(u64::MAX);
    counter!(WS_DISCONNECTIONS_TOTAL, "outcome" => end.label()).increment(1);
    match &end {
        SessionEnd::Protocol(e) => {
            warn!(remote = %conn.remote(), path = conn.path(), duration_ms, error = %e, "client disconnected with error");
        }
        SessionEnd::Transport(e) => {
            warn!(remote = %conn.remote(), path = conn.path(), duration_ms, error = %e, "client disconnected with error");
        }
        SessionEnd::ClientClosed | SessionEnd::ServerClosed => {
            info!(remote = %conn.remote(), path = conn.path(), duration_ms, reason = end.label(), "client disconnected");
        }
    }
}

async fn read_loop(
    ws_rx: &mut SplitStream<WebSocket>,
    conn: &Arc<Connection>,
    hub: &EventHub,
    commands: Option<&CommandSender>,
) -> SessionEnd {
    loop {
        let frame = tokio::select! {
            biased;
            () = conn.closed() => return SessionEnd::ServerClosed,
            frame = ws_rx.next() => frame,
        };
        let msg = match frame {
            None => return SessionEnd::ClientClosed,
            Some(Err(e)) => return SessionEnd::Transport(e.to_string()),
            Some(Ok(msg)) => msg,
        };
        conn.mark_alive();

        let decoded = match &msg {
            Message::Text(text) => decode(text.as_str()),
            Message::Binary(data) => std::str::from_utf8(data)
                .map_err(|e| ProtocolError::Malformed(e.to_string()))
                .and_then(decode),
            Message::Close(_) => return SessionEnd::ClientClosed,
            Message::Ping(_) | Message::Pong(_) => continue,
        };
        match decoded {
            Ok(inbound) => handle_inbound(inbound, conn, hub, commands).await,
            Err(e) => {
                counter!(WS_PROTOCOL_ERRORS_TOTAL, "kind" => e.kind()).increment(1);
                warn!(remote = %conn.remote(), error = %e, "protocol error, closing connection");
                return SessionEnd::Protocol(e);
            }
        }
    }
}

async fn handle_inbound(
    inbound: Inbound,
    conn: &Arc<Connection>,
    hub: &EventHub,
    commands: Option<&CommandSender>,
) {
    match inbound {
        Inbound::Control(ControlMessage::Subscribe { event }) => {
            if hub.subscribe(conn, &event) {
                debug!(event, "subscribed");
            }
        }
        Inbound::Control(ControlMessage::Unsubscribe { event }) => {
            match hub.unsubscribe(conn.id(), &event) {
                Ok(()) => debug!(event, "unsubscribed"),
                Err(e) => warn!(error = %e, "ignoring unsubscribe"),
            }
        }
        Inbound::Command { event, payload } => {
            let Some(commands) = commands else {
                debug!(event, "no command queue, dropping command");
                return;
            };
            let command = HubCommand::new(event, payload).from_connection(conn.id().clone());
            // A blocking queue back-pressures only this client.
            let submitted = tokio::select! {
                biased;
                () = conn.closed() => return,
                submitted = commands.submit(command) => submitted,
            };
            match submitted {
                Ok(()) | Err(CommandError::QueueFull) => {}
                Err(e) => debug!(error = %e, "command not queued"),
            }
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Arc<str>>,
    conn: Arc<Connection>,
    ping_interval: Duration,
) {
    let mut ping = tokio::time::interval(ping_interval);
    // Skip the immediate first tick
    let _ = ping.tick().await;

    loop {
        tokio::select! {
            biased;
            () = conn.closed() => break,
            next = outbound.recv() => {
                let Some(text) = next else { break };
                if sink.send(Message::Text(text.to_string().into())).await.is_err() {
                    conn.close();
                    return;
                }
            }
            _ = ping.tick() => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    conn.close();
                    return;
                }
            }
        }
    }

    // Flush whatever was queued before the close request.
    outbound.close();
    while let Some(text) = outbound.recv().await {
        if sink.send(Message::Text(text.to_string().into())).await.is_err() {
            return;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
}
