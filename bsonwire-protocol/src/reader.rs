//! Bounds-checked reader for message bodies.

use crate::error::ProtocolError;
use bsonwire_bson::{deserialize_prefix, Document, Long};
use bytes::Buf;

pub(crate) struct BodyReader<'a> {
    bytes: &'a [u8],
}

impl<'a> BodyReader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.bytes.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn require(&self, len: usize) -> Result<(), ProtocolError> {
        if self.bytes.len() < len {
            return Err(ProtocolError::Truncated {
                needed: len - self.bytes.len(),
            });
        }
        Ok(())
    }

    pub(crate) fn i32(&mut self) -> Result<i32, ProtocolError> {
        self.require(4)?;
        Ok(self.bytes.get_i32_le())
    }

    pub(crate) fn u32(&mut self) -> Result<u32, ProtocolError> {
        self.require(4)?;
        Ok(self.bytes.get_u32_le())
    }

    pub(crate) fn long(&mut self) -> Result<Long, ProtocolError> {
        let low = self.i32()?;
        let high = self.i32()?;
        Ok(Long::from_bits(low, high))
    }

    pub(crate) fn cstring(&mut self, what: &'static str) -> Result<&'a str, ProtocolError> {
        let nul = self
            .bytes
            .iter()
            .position(|b| *b == 0)
            .ok_or(ProtocolError::Truncated { needed: 1 })?;
        let s = std::str::from_utf8(&self.bytes[..nul])
            .map_err(|_| ProtocolError::InvalidUtf8(what))?;
        self.bytes.advance(nul + 1);
        Ok(s)
    }

    /// Declared length of the next document, if its length prefix is present.
    pub(crate) fn peek_document_len(&self) -> Option<usize> {
        if self.bytes.len() < 4 {
            return None;
        }
        let len = i32::from_le_bytes([self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3]]);
        usize::try_from(len).ok()
    }

    pub(crate) fn document(&mut self) -> Result<Document, ProtocolError> {
        let (doc, used) = deserialize_prefix(self.bytes)?;
        self.bytes.advance(used);
        Ok(doc)
    }
}
