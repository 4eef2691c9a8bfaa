//! Reassembly of length-prefixed messages from a byte stream.

use crate::error::ProtocolError;
use crate::MAX_MESSAGE_SIZE;
use bytes::{Bytes, BytesMut};

/// Size of the length prefix every message starts with.
const LENGTH_PREFIX: usize = 4;

/// Accumulates bytes read from one socket and cuts them into messages.
///
/// The first four bytes of each message are its total length (little-endian,
/// prefix included). Bytes are held until a whole message is present; any
/// bytes after it are kept as the start of the next one.
pub struct MessageBuffer {
    buffer: BytesMut,
    max_message_size: usize,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::with_max_message_size(MAX_MESSAGE_SIZE)
    }

    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            max_message_size,
        }
    }

    /// Feeds bytes read off the socket; nothing is parsed until the next
    /// `next_message` or `push`.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Appends `data` and drains every message it completes.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>, ProtocolError> {
        self.extend(data);
        let mut messages = Vec::new();
        while let Some(message) = self.next_message()? {
            messages.push(message);
        }
        Ok(messages)
    }

    /// Returns `Ok(Some(message))` if a complete message is buffered,
    /// `Ok(None)` if more data is needed, or `Err` if the declared length is
    /// invalid. After an error the stream is no longer aligned.
    pub fn next_message(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        if self.buffer.len() < LENGTH_PREFIX {
            return Ok(None);
        }
        let declared =
            u32::from_le_bytes([self.buffer[0], self.buffer[1], self.buffer[2], self.buffer[3]])
                as usize;
        if declared < LENGTH_PREFIX {
            return Err(ProtocolError::InvalidMessageLength(declared as i64));
        }
        if declared > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                size: declared,
                max: self.max_message_size,
            });
        }
        if self.buffer.len() < declared {
            return Ok(None);
        }
        Ok(Some(self.buffer.split_to(declared).freeze()))
    }

    /// Bytes held back waiting for the rest of a message.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drops any partial message, e.g. after the socket is replaced.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new()
    }
}
