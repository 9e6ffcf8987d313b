//! Error types for the Event Store client
//!
//! Provides a unified error type for all operations.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::OperationResult;

/// Result type alias using EventStoreError
pub type Result<T> = std::result::Result<T, EventStoreError>;

/// Unified error type for client operations
#[derive(Debug, Error)]
pub enum EventStoreError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Protocol Errors
    // -------------------------------------------------------------------------
    /// Malformed length prefix; fatal to the connection
    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Unexpected reply: expected {0}")]
    UnexpectedReply(&'static str),

    // -------------------------------------------------------------------------
    // Server Errors
    // -------------------------------------------------------------------------
    /// The server answered with a non-success operation result
    #[error("{kind}: {message}")]
    Operation {
        kind: OperationResult,
        message: String,
    },

    #[error("Subscription dropped: {0}")]
    SubscriptionDropped(String),

    // -------------------------------------------------------------------------
    // Connection Errors
    // -------------------------------------------------------------------------
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EventStoreError {
    /// Whether retrying the connection attempt may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            EventStoreError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::Interrupted
            ),
            EventStoreError::ConnectionClosed | EventStoreError::Timeout(_) => true,
            _ => false,
        }
    }
}
