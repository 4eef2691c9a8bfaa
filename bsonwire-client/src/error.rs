//! Client error types.

use bsonwire_bson::BsonError;
use bsonwire_protocol::ProtocolError;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("BSON error: {0}")]
    Bson(#[from] BsonError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("reconnect in progress")]
    ReconnectInProgress,

    #[error("cursor is closed")]
    CursorClosed,

    #[error("query already executed; sort, limit, skip and batch size can no longer change")]
    QueryAlreadyExecuted,

    #[error("cursor {0} not found on server")]
    CursorNotFound(i64),

    #[error("no primary server available")]
    NoMasterAvailable,

    #[error("server error: {message}")]
    ServerError { code: Option<i32>, message: String },

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("connect timeout")]
    Timeout,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid connection string: {0}")]
    InvalidUri(String),
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_)
                | ClientError::Timeout
                | ClientError::ConnectionClosed
                | ClientError::ReconnectInProgress
        )
    }

    pub(crate) fn server(code: Option<i32>, message: impl Into<String>) -> Self {
        ClientError::ServerError {
            code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(ClientError::ConnectionClosed.is_retryable());
        assert!(ClientError::ReconnectInProgress.is_retryable());
        assert!(ClientError::Io(std::io::Error::other("reset")).is_retryable());
        assert!(!ClientError::CursorClosed.is_retryable());
        assert!(!ClientError::NoMasterAvailable.is_retryable());
        assert!(!ClientError::server(Some(11000), "duplicate key").is_retryable());
    }

    #[test]
    fn test_display() {
        let err = ClientError::server(Some(59), "no such cmd: frobnicate");
        assert!(err.to_string().contains("frobnicate"));
        assert_ne!(
            ClientError::CursorClosed.to_string(),
            ClientError::QueryAlreadyExecuted.to_string()
        );
    }
}
