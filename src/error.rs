//! Client Error Types
//!
//! Every failure the engine can hand to a caller is a [`RedisError`].
//! The type is `Clone` because a single event (an aborted EXEC, a dropped
//! socket) frequently has to be delivered to many pending completions at once.
//!
//! ## Taxonomy
//!
//! - **Protocol** errors are always fatal for the connection.
//! - **Server** errors (`-ERR ...` replies and expectation mismatches) only
//!   fail the command that caused them, unless that command was critical.
//! - **Cancelled**, **Aborted** and **ConnectionTerminated** describe commands
//!   that never received a reply.
//! - **Timeout** belongs to the waiting side only; the request itself keeps
//!   running.

use crate::protocol::ParseError;
use std::sync::Arc;
use thiserror::Error;

/// Result type used throughout the client.
pub type Result<T> = std::result::Result<T, RedisError>;

/// Errors surfaced by the client.
#[derive(Debug, Clone, Error)]
pub enum RedisError {
    /// The server replied with an error, or the reply did not match the
    /// acknowledgment the command requires.
    #[error("server error: {0}")]
    Server(String),

    /// The reply variant cannot provide the requested shape.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// The reply had the right variant but its payload could not be parsed.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// Malformed or unexpected data on the wire
    #[error("protocol error: {0}")]
    Protocol(#[from] ParseError),

    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// The caller cancelled the command before it was written.
    #[error("the command was cancelled")]
    Cancelled,

    /// The connection was aborted while the command was still queued.
    #[error("the system aborted before this message was sent")]
    Aborted,

    /// The connection went away before a reply arrived.
    #[error("connection terminated: {0}")]
    ConnectionTerminated(String),

    /// The outbound queue no longer accepts messages.
    #[error("the queue is closed")]
    QueueClosed,

    /// A synchronous wait ran out of time.
    #[error("{}", timeout_message(.pending))]
    Timeout { pending: Option<String> },

    /// A message can only carry one completion.
    #[error("a completion is already assigned to this message")]
    CompletionAssigned,

    /// A must-succeed command failed; the connection cannot be trusted.
    #[error("critical command {command} failed: {message}")]
    CriticalFailure { command: String, message: String },

    /// MULTI/EXEC did not unpack cleanly.
    #[error("transaction failed: {0}")]
    Transaction(String),

    /// The operation is not valid in the current connection state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
}

fn timeout_message(pending: &Option<String>) -> String {
    match pending {
        Some(oldest) => format!("the operation timed out; oldest pending request: {}", oldest),
        None => "the operation timed out".to_string(),
    }
}

impl From<std::io::Error> for RedisError {
    fn from(err: std::io::Error) -> Self {
        RedisError::Io(Arc::new(err))
    }
}

impl RedisError {
    /// Returns true for errors reported by the server for one command.
    pub fn is_server_error(&self) -> bool {
        matches!(self, RedisError::Server(_))
    }

    /// Returns true if the command was cancelled by its caller.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RedisError::Cancelled)
    }

    /// Returns true for errors that only concern the waiting side.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RedisError::Timeout { .. })
    }
}
