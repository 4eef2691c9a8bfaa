//! Growable binary payload for the BSON Binary element type.

use std::fmt;
use uuid::Uuid;

pub const SUBTYPE_DEFAULT: u8 = 0x00;
pub const SUBTYPE_FUNCTION: u8 = 0x01;
/// Legacy byte array: the payload carries its own inner int32 length.
pub const SUBTYPE_BYTE_ARRAY: u8 = 0x02;
pub const SUBTYPE_UUID_OLD: u8 = 0x03;
pub const SUBTYPE_UUID: u8 = 0x04;
pub const SUBTYPE_MD5: u8 = 0x05;
pub const SUBTYPE_USER_DEFINED: u8 = 0x80;

const INITIAL_SIZE: usize = 256;

/// Append-oriented byte buffer tagged with a BSON binary subtype.
///
/// The backing allocation doubles when a write runs past it, so appending
/// byte by byte stays amortized O(1). Only bytes up to the write position
/// are part of the value.
#[derive(Clone)]
pub struct Binary {
    subtype: u8,
    buffer: Vec<u8>,
    position: usize,
}

impl Binary {
    pub fn new(subtype: u8) -> Self {
        Self {
            subtype,
            buffer: vec![0; INITIAL_SIZE],
            position: 0,
        }
    }

    pub fn from_bytes(subtype: u8, bytes: impl Into<Vec<u8>>) -> Self {
        let buffer = bytes.into();
        Self {
            subtype,
            position: buffer.len(),
            buffer,
        }
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self::from_bytes(SUBTYPE_UUID, uuid.as_bytes().to_vec())
    }

    /// Interprets the payload as a UUID when the subtype and length allow it.
    pub fn to_uuid(&self) -> Option<Uuid> {
        match self.subtype {
            SUBTYPE_UUID | SUBTYPE_UUID_OLD => Uuid::from_slice(self.value()).ok(),
            _ => None,
        }
    }

    pub fn subtype(&self) -> u8 {
        self.subtype
    }

    /// Appends one byte at the write position.
    pub fn put(&mut self, byte: u8) {
        self.ensure_size(self.position + 1);
        self.buffer[self.position] = byte;
        self.position += 1;
    }

    /// Writes `bytes` at `offset` (default: the write position). The write
    /// position moves to the end of the written range if that is further.
    pub fn write(&mut self, bytes: &[u8], offset: Option<usize>) {
        let start = offset.unwrap_or(self.position);
        let end = start + bytes.len();
        self.ensure_size(end);
        self.buffer[start..end].copy_from_slice(bytes);
        self.position = self.position.max(end);
    }

    /// Reads up to `len` bytes starting at `pos`, clamped to the written range.
    pub fn read(&self, pos: usize, len: usize) -> &[u8] {
        let start = pos.min(self.position);
        let end = pos.saturating_add(len).min(self.position);
        &self.buffer[start..end]
    }

    pub fn value(&self) -> &[u8] {
        &self.buffer[..self.position]
    }

    pub fn len(&self) -> usize {
        self.position
    }

    pub fn is_empty(&self) -> bool {
        self.position == 0
    }

    /// Size of the backing allocation.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    fn ensure_size(&mut self, required: usize) {
        if required <= self.buffer.len() {
            return;
        }
        let mut size = self.buffer.len().max(1);
        while size < required {
            size *= 2;
        }
        self.buffer.resize(size, 0);
    }
}

impl PartialEq for Binary {
    fn eq(&self, other: &Self) -> bool {
        self.subtype == other.subtype && self.value() == other.value()
    }
}

impl fmt::Debug for Binary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binary")
            .field("subtype", &self.subtype)
            .field("len", &self.position)
            .finish()
    }
}
