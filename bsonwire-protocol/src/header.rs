//! Standard message header and opcodes.
//!
//! Every message starts with a 16 byte little-endian header:
//!
//! ```text
//! +-----------+------------+------------+---------+
//! | length    | request_id | response_to| op_code |
//! | 4 bytes   | 4 bytes    | 4 bytes    | 4 bytes |
//! +-----------+------------+------------+---------+
//! ```
//!
//! `length` counts the whole message, header included.

use crate::error::ProtocolError;
use bytes::{BufMut, BytesMut};
use std::sync::atomic::{AtomicI32, Ordering};

/// Size of the message header in bytes.
pub const HEADER_SIZE: usize = 16;

static NEXT_REQUEST_ID: AtomicI32 = AtomicI32::new(1);

/// Returns the next request id from the process-wide counter shared by all
/// message types and connections. Wraps on overflow.
pub fn next_request_id() -> i32 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// Legacy wire protocol opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum OpCode {
    Reply = 1,
    Update = 2001,
    Insert = 2002,
    Query = 2004,
    GetMore = 2005,
    Delete = 2006,
    KillCursors = 2007,
}

impl TryFrom<i32> for OpCode {
    type Error = ProtocolError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(OpCode::Reply),
            2001 => Ok(OpCode::Update),
            2002 => Ok(OpCode::Insert),
            2004 => Ok(OpCode::Query),
            2005 => Ok(OpCode::GetMore),
            2006 => Ok(OpCode::Delete),
            2007 => Ok(OpCode::KillCursors),
            _ => Err(ProtocolError::InvalidOpCode(value)),
        }
    }
}

/// Parsed message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub op_code: OpCode,
}

impl MessageHeader {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.length);
        buf.put_i32_le(self.request_id);
        buf.put_i32_le(self.response_to);
        buf.put_i32_le(self.op_code as i32);
    }

    /// Parses the header at the front of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                needed: HEADER_SIZE - bytes.len(),
            });
        }
        let word = |i: usize| i32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        let length = word(0);
        if length < HEADER_SIZE as i32 {
            return Err(ProtocolError::InvalidMessageLength(length as i64));
        }
        Ok(Self {
            length,
            request_id: word(4),
            response_to: word(8),
            op_code: OpCode::try_from(word(12))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_values() {
        assert_eq!(OpCode::Update as i32, 2001);
        assert_eq!(OpCode::Insert as i32, 2002);
        assert_eq!(OpCode::Query as i32, 2004);
        assert_eq!(OpCode::GetMore as i32, 2005);
        assert_eq!(OpCode::Delete as i32, 2006);
        assert_eq!(OpCode::KillCursors as i32, 2007);
        assert_eq!(OpCode::try_from(1).unwrap(), OpCode::Reply);
        assert!(OpCode::try_from(2003).is_err());
    }

    #[test]
    fn test_header_roundtrip() {
        let header = MessageHeader {
            length: 36,
            request_id: 7,
            response_to: 3,
            op_code: OpCode::Reply,
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_SIZE);
        assert_eq!(&buf[12..16], &[1, 0, 0, 0]);
        assert_eq!(MessageHeader::decode(&buf).unwrap(), header);
    }

    #[test]
    fn test_header_rejects_short_length() {
        let mut buf = BytesMut::new();
        MessageHeader {
            length: 8,
            request_id: 1,
            response_to: 0,
            op_code: OpCode::Query,
        }
        .encode(&mut buf);
        assert!(matches!(
            MessageHeader::decode(&buf),
            Err(ProtocolError::InvalidMessageLength(8))
        ));
        assert!(MessageHeader::decode(&buf[..10]).is_err());
    }

    #[test]
    fn test_request_ids_increase() {
        let a = next_request_id();
        let b = next_request_id();
        assert!(b > a);
    }
}
