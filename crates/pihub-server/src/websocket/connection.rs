//! WebSocket client connection state.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pihub_core::ConnectionId;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Result of handing one message to a connection's outbound queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Queued for the writer task.
    Queued,
    /// The queue was full; the message was dropped for this connection only.
    Full,
    /// The writer task is gone.
    Closed,
}

/// A connected WebSocket client, as seen by the registry and dispatcher.
///
/// The owning session holds the receiving end of the outbound queue and
/// writes it to the socket in order.
pub struct Connection {
    id: ConnectionId,
    remote: SocketAddr,
    path: String,
    tx: mpsc::Sender<Arc<str>>,
    close: CancellationToken,
    connected_at: Instant,
    is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl Connection {
    /// Create a connection. Cancelling `close` (or calling
    /// [`close`](Self::close)) asks the session to shut the socket down.
    pub fn new(
        id: ConnectionId,
        remote: SocketAddr,
        path: impl Into<String>,
        tx: mpsc::Sender<Arc<str>>,
        close: CancellationToken,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            remote,
            path: path.into(),
            tx,
            close,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Connection id.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Remote peer address.
    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// URL path the client connected on.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Queue a serialized message without waiting.
    pub fn send(&self, message: Arc<str>) -> SendOutcome {
        match self.tx.try_send(message) {
            Ok(()) => SendOutcome::Queued,
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                SendOutcome::Full
            }
            Err(TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Ask the session to close this connection. Idempotent.
    pub fn close(&self) {
        self.close.cancel();
    }

    /// Whether a close was requested (by the hub, heartbeat or shutdown).
    pub fn is_closing(&self) -> bool {
        self.close.is_cancelled()
    }

    /// Resolves once a close is requested.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.close.cancelled()
    }

    /// The close token, for tasks that outlive a borrow of the connection.
    pub fn close_token(&self) -> CancellationToken {
        self.close.clone()
    }

    /// Mark the connection as alive (pong or any inbound frame).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn make_connection(id: &str, capacity: usize) -> (Arc<Connection>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = Connection::new(
            ConnectionId::from(id),
            "127.0.0.1:40000".parse().unwrap(),
            "/",
            tx,
            CancellationToken::new(),
        );
        (Arc::new(conn), rx)
    }

    #[tokio::test]
    async fn send_preserves_order() {
        let (conn, mut rx) = make_connection("c1", 8);
        for i in 0..5 {
            assert_eq!(conn.send(Arc::from(format!("msg_{i}"))), SendOutcome::Queued);
        }
        for i in 0..5 {
            assert_eq!(&*rx.recv().await.unwrap(), format!("msg_{i}"));
        }
    }

    #[test]
    fn full_queue_drops_and_counts() {
        let (conn, _rx) = make_connection("c2", 1);
        assert_eq!(conn.send(Arc::from("a")), SendOutcome::Queued);
        assert_eq!(conn.send(Arc::from("b")), SendOutcome::Full);
        assert_eq!(conn.send(Arc::from("c")), SendOutcome::Full);
        assert_eq!(conn.drop_count(), 2);
    }

    #[test]
    fn closed_queue_is_not_a_drop() {
        let (conn, rx) = make_connection("c3", 4);
        drop(rx);
        assert_eq!(conn.send(Arc::from("a")), SendOutcome::Closed);
        assert_eq!(conn.drop_count(), 0);
    }

    #[test]
    fn close_is_idempotent() {
        let (conn, _rx) = make_connection("c4", 4);
        assert!(!conn.is_closing());
        conn.close();
        conn.close();
        assert!(conn.is_closing());
        assert!(conn.close_token().is_cancelled());
    }

    #[test]
    fn mark_alive_and_check() {
        let (conn, _rx) = make_connection("c5", 4);
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
    }

    #[test]
    fn exposes_peer_details() {
        let (conn, _rx) = make_connection("c6", 4);
        assert_eq!(conn.id().as_str(), "c6");
        assert_eq!(conn.remote().port(), 40000);
        assert_eq!(conn.path(), "/");
    }
}
