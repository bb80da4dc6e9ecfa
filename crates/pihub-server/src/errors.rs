//! Server error types.

use thiserror::Error;

/// Fatal lifecycle errors, returned from `serve_forever`.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be bound. Aborts startup.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The accept loop failed.
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
    /// A hub server runs once; build a new one to serve again.
    #[error("hub server already started")]
    AlreadyStarted,
}
