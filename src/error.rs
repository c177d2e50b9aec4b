//! Error types for procpool.

use std::time::Duration;

use thiserror::Error;

/// Main error type for all pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// I/O error during spawn or on the child's pipes.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed frame on a pipe (bad length prefix, EOF mid-message).
    #[error("framing error: {0}")]
    Frame(String),

    /// Payload could not be decoded (truncated or inconsistent message).
    #[error("codec error: {0}")]
    Codec(String),

    /// Child did not greet with `ok` on stdout; carries what it wrote
    /// instead.
    #[error("worker handshake failed: {0}")]
    Handshake(String),

    /// No reply before the deadline. The worker has already been
    /// force-restarted when this is returned.
    #[error("worker timed out: PID {pid}, after {elapsed:?}")]
    TimedOut { pid: u32, elapsed: Duration },

    /// Child exited with a non-success status during a graceful stop.
    #[error("worker exited with {0}")]
    Exited(std::process::ExitStatus),

    /// Lifecycle call on a worker or pool that is already running.
    #[error("already started")]
    AlreadyStarted,

    /// Lifecycle call on a worker or pool that is not running.
    #[error("not running")]
    NotRunning,

    /// The submission queue has been closed.
    #[error("queue closed")]
    QueueClosed,
}

/// Result type alias using PoolError.
pub type Result<T> = std::result::Result<T, PoolError>;
