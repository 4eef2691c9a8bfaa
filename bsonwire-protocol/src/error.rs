//! Protocol error types.

use crate::header::OpCode;
use bsonwire_bson::BsonError;
use thiserror::Error;

/// Errors raised while building, framing or parsing wire messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("BSON error: {0}")]
    Bson(#[from] BsonError),

    #[error("invalid opcode: {0}")]
    InvalidOpCode(i32),

    #[error("unexpected opcode: expected {expected:?}, got {actual:?}")]
    UnexpectedOpCode { expected: OpCode, actual: OpCode },

    #[error("invalid message length: {0}")]
    InvalidMessageLength(i64),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("incomplete reply: expected {expected} documents, got {actual}")]
    IncompleteReply { expected: usize, actual: usize },

    #[error("invalid reply: {0}")]
    InvalidReply(String),

    #[error("truncated message: need {needed} more bytes")]
    Truncated { needed: usize },

    #[error("invalid namespace: '{0}'")]
    InvalidNamespace(String),

    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),
}

impl ProtocolError {
    /// Returns whether the byte stream this error came from can no longer be
    /// trusted to be aligned on message boundaries.
    pub fn is_framing_error(&self) -> bool {
        matches!(
            self,
            ProtocolError::InvalidMessageLength(_) | ProtocolError::MessageTooLarge { .. }
        )
    }
}
