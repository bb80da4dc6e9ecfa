//! Operator console: line commands read from stdin.
//!
//! `stop` triggers a graceful shutdown, `status` logs a summary.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::server::HubServer;

/// A parsed console line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Graceful shutdown.
    Stop,
    /// Log the hub state.
    Status,
    /// Blank line.
    Empty,
    /// Anything else.
    Unknown(String),
}

impl ConsoleCommand {
    /// Parse one line (case-insensitive, surrounding whitespace ignored).
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        match line.to_ascii_lowercase().as_str() {
            "" => Self::Empty,
            "stop" | "quit" | "exit" => Self::Stop,
            "status" => Self::Status,
            _ => Self::Unknown(line.to_owned()),
        }
    }
}

/// Read stdin lines on a plain thread and forward them.
///
/// Blocking stdin reads stay off the runtime, so shutdown never waits on
/// a pending read.
pub fn spawn_stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    let spawned = std::thread::Builder::new()
        .name("pihub-console".into())
        .spawn(move || {
            for line in std::io::stdin().lines() {
                let Ok(line) = line else { break };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "failed to start console reader");
    }
    rx
}

/// Handle console lines until `stop`, end of input or `cancel`.
pub async fn run_console(
    mut lines: mpsc::Receiver<String>,
    server: Arc<HubServer>,
    cancel: CancellationToken,
) {
    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => break,
            line = lines.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };
        match ConsoleCommand::parse(&line) {
            ConsoleCommand::Stop => {
                info!("stop requested from console");
                server.stop();
                break;
            }
            ConsoleCommand::Status => {
                let hub = server.hub();
                info!(
                    state = ?server.state(),
                    connections = hub.connection_count(),
                    events = hub.event_count(),
                    sessions = server.active_sessions(),
                    "hub status"
                );
            }
            ConsoleCommand::Empty => {}
            ConsoleCommand::Unknown(command) => {
                warn!(command, "unknown console command (try: stop, status)");
            }
        }
    }
}
