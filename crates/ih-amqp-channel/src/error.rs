//! AMQP channel error types.

use thiserror::Error;

/// Errors that can occur during transport operations.
#[derive(Debug, Error)]
pub enum AmqpError {
    #[error("connection error: {0}")]
    Connect(String),

    #[error("session error: {0}")]
    Session(String),

    #[error("link error: {0}")]
    Link(String),

    #[error("send error: {0}")]
    Send(String),

    #[error("receive error: {0}")]
    Receive(String),

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("{0} is closed")]
    Closed(&'static str),

    #[error("{0}")]
    Other(String),
}

/// Convenience alias for transport results.
pub type AmqpResult<T> = Result<T, AmqpError>;
