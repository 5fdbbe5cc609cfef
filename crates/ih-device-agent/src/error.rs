//! Device session error types.

use thiserror::Error;

use ih_amqp_channel::AmqpError;
use ih_protocol::TokenError;

use crate::session::SessionState;

/// Terminal error delivered to observers when the device session ends
/// unexpectedly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("session closed: {description}")]
pub struct SessionClosedError {
    pub description: String,
}

impl SessionClosedError {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
        }
    }
}

/// Errors surfaced by device session operations.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("invalid device key: {0}")]
    InvalidKey(#[from] TokenError),

    #[error("transport connect failed: {0}")]
    TransportConnect(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("device session not connected (state: {state})")]
    NotConnected { state: SessionState },

    #[error(transparent)]
    SessionClosed(#[from] SessionClosedError),

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("transport error: {0}")]
    Transport(AmqpError),

    #[error("invalid session options: {0}")]
    InvalidOptions(String),
}

impl From<AmqpError> for DeviceError {
    fn from(e: AmqpError) -> Self {
        match e {
            AmqpError::Connect(reason) => Self::TransportConnect(reason),
            AmqpError::Timeout {
                operation,
                timeout_ms,
            } => Self::Timeout {
                operation,
                timeout_ms,
            },
            other => Self::Transport(other),
        }
    }
}

/// Convenience alias for device session results.
pub type DeviceResult<T> = Result<T, DeviceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_map_to_taxonomy() {
        let e: DeviceError = AmqpError::Connect("refused".into()).into();
        assert!(matches!(e, DeviceError::TransportConnect(ref r) if r == "refused"));

        let e: DeviceError = AmqpError::Timeout {
            operation: "put-token",
            timeout_ms: 30_000,
        }
        .into();
        assert_eq!(e.to_string(), "put-token timed out after 30000ms");

        let e: DeviceError = AmqpError::Closed("session").into();
        assert!(matches!(e, DeviceError::Transport(_)));
    }

    #[test]
    fn not_connected_names_state() {
        let e = DeviceError::NotConnected {
            state: SessionState::Closed,
        };
        assert_eq!(e.to_string(), "device session not connected (state: closed)");
    }
}
