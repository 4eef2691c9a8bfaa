//! OP_REPLY parsing.
//!
//! Reply layout after the standard header:
//!
//! ```text
//! +-----------------+-----------+---------------+-----------------+-----------+
//! | response_flags  | cursor_id | starting_from | number_returned | documents |
//! | 4 bytes         | 8 bytes   | 4 bytes       | 4 bytes         | ...       |
//! +-----------------+-----------+---------------+-----------------+-----------+
//! ```

use crate::error::ProtocolError;
use crate::header::{next_request_id, MessageHeader, OpCode, HEADER_SIZE};
use crate::message::encode_message;
use crate::reader::BodyReader;
use bsonwire_bson::{serialize_into, Document, Long, Value};
use bytes::{BufMut, BytesMut};

/// Size of the fixed reply fields that follow the header.
pub const REPLY_PREFIX_SIZE: usize = 20;

/// Reply status bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseFlags(u32);

impl ResponseFlags {
    /// A GetMore named a cursor the server no longer has.
    pub const CURSOR_NOT_FOUND: u32 = 1 << 0;
    /// The query failed; the single returned document has an `$err` field.
    pub const QUERY_FAILURE: u32 = 1 << 1;
    pub const SHARD_CONFIG_STALE: u32 = 1 << 2;
    pub const AWAIT_CAPABLE: u32 = 1 << 3;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn with(mut self, flag: u32) -> Self {
        self.0 |= flag;
        self
    }

    pub fn is_cursor_not_found(&self) -> bool {
        self.0 & Self::CURSOR_NOT_FOUND != 0
    }

    pub fn is_query_failure(&self) -> bool {
        self.0 & Self::QUERY_FAILURE != 0
    }

    pub fn is_shard_config_stale(&self) -> bool {
        self.0 & Self::SHARD_CONFIG_STALE != 0
    }

    pub fn is_await_capable(&self) -> bool {
        self.0 & Self::AWAIT_CAPABLE != 0
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }
}

/// A parsed server reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub request_id: i32,
    pub response_to: i32,
    pub flags: ResponseFlags,
    pub cursor_id: Long,
    pub starting_from: i32,
    pub number_returned: i32,
    pub documents: Vec<Document>,
}

impl Reply {
    /// Builds a reply to `response_to` carrying `documents` and no cursor.
    pub fn new(response_to: i32, documents: Vec<Document>) -> Self {
        Self {
            request_id: next_request_id(),
            response_to,
            flags: ResponseFlags::new(),
            cursor_id: Long::ZERO,
            starting_from: 0,
            number_returned: documents.len() as i32,
            documents,
        }
    }

    pub fn with_cursor_id(mut self, cursor_id: Long) -> Self {
        self.cursor_id = cursor_id;
        self
    }

    pub fn with_starting_from(mut self, starting_from: i32) -> Self {
        self.starting_from = starting_from;
        self
    }

    pub fn with_flags(mut self, flags: ResponseFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Parses one complete OP_REPLY message.
    ///
    /// The message must hold exactly `number_returned` documents; fewer is
    /// reported as [`ProtocolError::IncompleteReply`].
    pub fn parse(message: &[u8]) -> Result<Self, ProtocolError> {
        let header = MessageHeader::decode(message)?;
        if header.op_code != OpCode::Reply {
            return Err(ProtocolError::UnexpectedOpCode {
                expected: OpCode::Reply,
                actual: header.op_code,
            });
        }
        if header.length as usize != message.len() {
            return Err(ProtocolError::InvalidMessageLength(header.length as i64));
        }

        let mut body = BodyReader::new(&message[HEADER_SIZE..]);
        let flags = ResponseFlags::from_bits(body.u32()?);
        let cursor_id = body.long()?;
        let starting_from = body.i32()?;
        let number_returned = body.i32()?;
        let expected = usize::try_from(number_returned).map_err(|_| {
            ProtocolError::InvalidReply(format!("negative document count {}", number_returned))
        })?;

        let mut documents = Vec::with_capacity(expected.min(1024));
        while documents.len() < expected {
            match body.peek_document_len() {
                Some(len) if len <= body.remaining() => documents.push(body.document()?),
                _ => {
                    return Err(ProtocolError::IncompleteReply {
                        expected,
                        actual: documents.len(),
                    })
                }
            }
        }
        if !body.is_empty() {
            return Err(ProtocolError::InvalidReply(format!(
                "{} bytes after {} documents",
                body.remaining(),
                expected
            )));
        }

        Ok(Self {
            request_id: header.request_id,
            response_to: header.response_to,
            flags,
            cursor_id,
            starting_from,
            number_returned,
            documents,
        })
    }

    /// Encodes the reply as a server would send it.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        encode_message(OpCode::Reply, self.request_id, self.response_to, |buf| {
            buf.put_u32_le(self.flags.bits());
            buf.put_i32_le(self.cursor_id.low_bits());
            buf.put_i32_le(self.cursor_id.high_bits());
            buf.put_i32_le(self.starting_from);
            buf.put_i32_le(self.number_returned);
            for doc in &self.documents {
                serialize_into(buf, doc, false)?;
            }
            Ok(())
        })
    }

    /// True exactly when one document came back and its `ok` field is not 1.
    pub fn is_error(&self) -> bool {
        match self.documents.as_slice() {
            [doc] => !is_ok(doc.get("ok")),
            _ => false,
        }
    }

    /// The server's error text: `errmsg`, or `$err` for failed queries.
    pub fn error_message(&self) -> Option<&str> {
        let doc = self.documents.first()?;
        doc.get_str("errmsg").or_else(|| doc.get_str("$err"))
    }

    /// The server's numeric error code, if it sent one.
    pub fn error_code(&self) -> Option<i32> {
        let doc = self.documents.first()?;
        doc.get_f64("code").map(|code| code as i32)
    }

    /// Whether the server still holds a cursor for more results.
    pub fn has_more(&self) -> bool {
        !self.cursor_id.is_zero()
    }

    pub fn first_document(&self) -> Option<&Document> {
        self.documents.first()
    }
}

fn is_ok(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Boolean(b)) => *b,
        Some(v) => v.as_f64() == Some(1.0),
        None => false,
    }
}
