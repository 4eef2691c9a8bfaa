//! Document deserialization.
//!
//! Decoding never scans for a document's end: every length-prefixed payload
//! is sliced by its declared length, and a declared length that runs past
//! the enclosing buffer is a [`BsonError::MalformedDocument`].

use crate::binary::{Binary, SUBTYPE_BYTE_ARRAY};
use crate::document::Document;
use crate::error::BsonError;
use crate::long::Long;
use crate::oid::{ObjectId, OBJECT_ID_LEN};
use crate::types::{Code, DbRef, Regex, UtcDateTime};
use crate::value::{ElementType, Value};

/// Smallest possible document: length prefix plus terminator.
const MIN_DOCUMENT_SIZE: usize = 5;

/// Bounds-checked little-endian reader over a byte slice.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], BsonError> {
        if len > self.remaining() {
            return Err(BsonError::malformed(format!(
                "needed {} bytes at offset {}, only {} left",
                len,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], BsonError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, BsonError> {
        Ok(self.take(1)?[0])
    }

    fn read_i32(&mut self) -> Result<i32, BsonError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    fn read_i64(&mut self) -> Result<i64, BsonError> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    fn read_f64(&mut self) -> Result<f64, BsonError> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    fn read_long(&mut self) -> Result<Long, BsonError> {
        let low = self.read_i32()?;
        let high = self.read_i32()?;
        Ok(Long::from_bits(low, high))
    }

    /// Reads a declared length and checks it fits in what is left.
    fn read_length(&mut self, what: &str) -> Result<usize, BsonError> {
        let len = self.read_i32()?;
        if len < 0 || len as usize > self.remaining() {
            return Err(BsonError::malformed(format!(
                "{} length {} exceeds remaining {} bytes",
                what,
                len,
                self.remaining()
            )));
        }
        Ok(len as usize)
    }

    fn read_cstring(&mut self, what: &'static str) -> Result<String, BsonError> {
        let rest = &self.bytes[self.pos..];
        let nul = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| BsonError::malformed(format!("unterminated {}", what)))?;
        let s = std::str::from_utf8(&rest[..nul]).map_err(|_| BsonError::InvalidUtf8(what))?;
        self.pos += nul + 1;
        Ok(s.to_string())
    }

    fn read_string(&mut self) -> Result<String, BsonError> {
        let len = self.read_length("string")?;
        if len == 0 {
            return Err(BsonError::malformed("string length must include terminator"));
        }
        let bytes = self.take(len)?;
        if bytes[len - 1] != 0 {
            return Err(BsonError::malformed("string is not null-terminated"));
        }
        let s = std::str::from_utf8(&bytes[..len - 1])
            .map_err(|_| BsonError::InvalidUtf8("string"))?;
        Ok(s.to_string())
    }

    /// Splits off the next length-prefixed document as its own reader,
    /// positioned after the length prefix.
    fn sub_document(&mut self) -> Result<Reader<'a>, BsonError> {
        let start = self.pos;
        let len = self.read_i32()?;
        if len < MIN_DOCUMENT_SIZE as i32 || (len as usize) > self.bytes.len() - start {
            return Err(BsonError::malformed(format!(
                "document length {} at offset {} is out of bounds",
                len, start
            )));
        }
        let end = start + len as usize;
        let sub = Reader {
            bytes: &self.bytes[..end],
            pos: self.pos,
        };
        self.pos = end;
        Ok(sub)
    }
}

/// Deserializes a single document occupying the whole buffer.
pub fn deserialize(bytes: &[u8]) -> Result<Document, BsonError> {
    let (doc, used) = deserialize_prefix(bytes)?;
    if used != bytes.len() {
        return Err(BsonError::malformed(format!(
            "{} trailing bytes after document",
            bytes.len() - used
        )));
    }
    Ok(doc)
}

/// Deserializes the document at the front of `bytes`, returning it together
/// with the number of bytes it occupied.
pub fn deserialize_prefix(bytes: &[u8]) -> Result<(Document, usize), BsonError> {
    let mut reader = Reader::new(bytes);
    let mut sub = reader.sub_document()?;
    let doc = read_elements(&mut sub, false)?.into_iter().collect();
    Ok((doc, reader.pos))
}

/// Deserializes an array document into its values, in index order.
pub fn deserialize_array(bytes: &[u8]) -> Result<Vec<Value>, BsonError> {
    let mut reader = Reader::new(bytes);
    let mut sub = reader.sub_document()?;
    let items = read_elements(&mut sub, true)?;
    if reader.pos != bytes.len() {
        return Err(BsonError::malformed("trailing bytes after array"));
    }
    Ok(items.into_iter().map(|(_, v)| v).collect())
}

/// Deserializes `count` consecutive documents from the front of `bytes`,
/// returning them and the number of bytes consumed.
pub fn deserialize_stream(
    bytes: &[u8],
    count: usize,
) -> Result<(Vec<Document>, usize), BsonError> {
    let mut docs = Vec::with_capacity(count.min(1024));
    let mut offset = 0;
    for _ in 0..count {
        let (doc, used) = deserialize_prefix(&bytes[offset..])?;
        docs.push(doc);
        offset += used;
    }
    Ok((docs, offset))
}

fn read_elements(reader: &mut Reader<'_>, is_array: bool) -> Result<Vec<(String, Value)>, BsonError> {
    let mut entries = Vec::new();
    loop {
        let tag = reader.read_u8()?;
        if tag == 0 {
            if reader.remaining() != 0 {
                return Err(BsonError::malformed(format!(
                    "terminator found {} bytes before declared end",
                    reader.remaining()
                )));
            }
            return Ok(entries);
        }
        let key = reader.read_cstring(if is_array { "array index" } else { "key" })?;
        let value = read_value(reader, tag, &key)?;
        entries.push((key, value));
    }
}

fn read_value(reader: &mut Reader<'_>, tag: u8, key: &str) -> Result<Value, BsonError> {
    let element_type = ElementType::from_u8(tag).ok_or_else(|| BsonError::UnknownElementType {
        tag,
        key: key.to_string(),
    })?;

    let value = match element_type {
        ElementType::Double => Value::Double(reader.read_f64()?),
        ElementType::String | ElementType::Symbol => Value::String(reader.read_string()?),
        ElementType::Document => {
            let mut sub = reader.sub_document()?;
            embedded_document(read_elements(&mut sub, false)?.into_iter().collect())
        }
        ElementType::Array => {
            let mut sub = reader.sub_document()?;
            let items = read_elements(&mut sub, true)?;
            Value::Array(items.into_iter().map(|(_, v)| v).collect())
        }
        ElementType::Binary => Value::Binary(read_binary(reader)?),
        ElementType::Undefined | ElementType::Null => Value::Null,
        ElementType::ObjectId => {
            Value::ObjectId(ObjectId::from_bytes(reader.take_array::<OBJECT_ID_LEN>()?))
        }
        ElementType::Boolean => Value::Boolean(reader.read_u8()? != 0),
        ElementType::DateTime => Value::DateTime(UtcDateTime::from_millis(reader.read_i64()?)),
        ElementType::RegExp => {
            let pattern = reader.read_cstring("regex pattern")?;
            let options = reader.read_cstring("regex options")?;
            Value::RegExp(Regex::new(pattern, &options))
        }
        ElementType::Code => Value::Code(Code::new(reader.read_string()?)),
        ElementType::CodeWithScope => {
            let start = reader.pos;
            let total = reader.read_length("code with scope")?;
            let code = reader.read_string()?;
            let mut sub = reader.sub_document()?;
            let scope = read_elements(&mut sub, false)?.into_iter().collect();
            if reader.pos - start != total {
                return Err(BsonError::malformed(format!(
                    "code with scope declared {} bytes, read {}",
                    total,
                    reader.pos - start
                )));
            }
            Value::Code(Code::with_scope(code, scope))
        }
        ElementType::Int32 => Value::Int32(reader.read_i32()?),
        ElementType::Timestamp => Value::Timestamp(reader.read_long()?),
        ElementType::Int64 => Value::Int64(reader.read_long()?),
    };
    Ok(value)
}

fn read_binary(reader: &mut Reader<'_>) -> Result<Binary, BsonError> {
    let len = reader.read_i32()?;
    let subtype = reader.read_u8()?;
    if len < 0 || len as usize > reader.remaining() {
        return Err(BsonError::malformed(format!("binary length {} out of bounds", len)));
    }
    let mut len = len as usize;
    if subtype == SUBTYPE_BYTE_ARRAY {
        let inner = reader.read_i32()?;
        if len < 4 || inner < 0 || inner as usize != len - 4 {
            return Err(BsonError::malformed(format!(
                "byte array inner length {} does not match total {}",
                inner, len
            )));
        }
        len -= 4;
    }
    Ok(Binary::from_bytes(subtype, reader.take(len)?.to_vec()))
}

/// Embedded documents shaped as `{$ref: string, $id: ObjectId[, $db: string]}`
/// become [`DbRef`] values, dropping any other fields; anything else stays
/// a document.
fn embedded_document(doc: Document) -> Value {
    if let (Some(namespace), Some(oid)) = (doc.get_str("$ref"), doc.get_object_id("$id")) {
        let mut dbref = DbRef::new(namespace, oid);
        if let Some(db) = doc.get_str("$db") {
            dbref = dbref.with_db(db);
        }
        return Value::DbRef(dbref);
    }
    Value::Document(doc)
}
