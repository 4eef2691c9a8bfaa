//! BSON error types.

use thiserror::Error;

/// Errors raised while encoding, decoding or converting BSON values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BsonError {
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("'{0}' contains a null byte and cannot be written as a cstring")]
    NullInCString(String),

    #[error("document too large: {size} bytes (max {max})")]
    DocumentTooLarge { size: usize, max: usize },

    #[error("malformed document: {0}")]
    MalformedDocument(String),

    #[error("unknown element type {tag:#04x} for key '{key}'")]
    UnknownElementType { tag: u8, key: String },

    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("invalid ObjectId: {0}")]
    InvalidObjectId(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("invalid radix: {0}")]
    InvalidRadix(u32),

    #[error("invalid number '{input}' for radix {radix}")]
    InvalidNumber { input: String, radix: u32 },
}

impl BsonError {
    /// Returns whether this error was raised on the encode path.
    pub fn is_encode_error(&self) -> bool {
        matches!(
            self,
            BsonError::InvalidKey { .. }
                | BsonError::NullInCString(_)
                | BsonError::DocumentTooLarge { .. }
        )
    }

    /// Returns whether this error was raised while decoding bytes.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            BsonError::MalformedDocument(_)
                | BsonError::UnknownElementType { .. }
                | BsonError::InvalidUtf8(_)
        )
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        BsonError::MalformedDocument(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let err = BsonError::InvalidKey {
            key: "$bad".to_string(),
            reason: "must not start with '$'",
        };
        assert!(err.is_encode_error());
        assert!(!err.is_decode_error());

        let err = BsonError::malformed("truncated");
        assert!(err.is_decode_error());
        assert!(!err.is_encode_error());

        assert!(!BsonError::DivisionByZero.is_encode_error());
        assert!(!BsonError::DivisionByZero.is_decode_error());
    }

    #[test]
    fn test_error_display() {
        let err = BsonError::UnknownElementType {
            tag: 0x42,
            key: "field".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("0x42"));
        assert!(msg.contains("field"));

        let err = BsonError::DocumentTooLarge { size: 100, max: 50 };
        assert!(err.to_string().contains("100"));
    }
}
