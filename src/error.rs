//! Error types for the session engine.

use thiserror::Error;

/// Errors surfaced by session operations.
///
/// Synchronous operations return these at the call site; asynchronous
/// handles resolve with them; unsolicited link failures are additionally
/// delivered through the `error` event before the session tears down.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The connect handshake failed: unreachable broker, rejected
    /// credentials, or a handshake that never completed in time.
    #[error("connect failed: {0}")]
    ConnectFailure(String),
    /// A topic operation was attempted outside the Connected state.
    #[error("not connected")]
    NotConnected,
    /// The broker did not acknowledge an operation within the session's
    /// timeout budget.
    #[error("operation timed out")]
    OperationTimeout,
    /// The transport reported an I/O failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// The broker responded outside the protocol contract.
    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;
