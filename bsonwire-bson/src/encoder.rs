//! Document serialization.
//!
//! Every document is written as `int32 length | elements | 0x00`, each element
//! as `type | cstring key | payload`. The length prefix is written as a
//! placeholder and patched once the document body is complete.

use crate::binary::{Binary, SUBTYPE_BYTE_ARRAY};
use crate::document::Document;
use crate::error::BsonError;
use crate::long::Long;
use crate::types::Code;
use crate::value::Value;
use bytes::{BufMut, BytesMut};

/// Largest document the server accepts.
pub const MAX_DOCUMENT_SIZE: usize = 16 * 1024 * 1024;

/// Serializes a document.
///
/// With `check_keys` set, keys starting with `$` or containing `.` are
/// rejected at every nesting level. Command documents sent to `$cmd` are
/// serialized with `check_keys` off.
pub fn serialize(doc: &Document, check_keys: bool) -> Result<Vec<u8>, BsonError> {
    let mut buf = BytesMut::with_capacity(calculate_size(doc));
    serialize_into(&mut buf, doc, check_keys)?;
    Ok(buf.to_vec())
}

/// Appends a serialized document to `buf`, returning the number of bytes
/// written. On error `buf` is left as it was.
pub fn serialize_into(
    buf: &mut BytesMut,
    doc: &Document,
    check_keys: bool,
) -> Result<usize, BsonError> {
    let start = buf.len();
    if let Err(e) = write_document(buf, doc, check_keys) {
        buf.truncate(start);
        return Err(e);
    }
    let size = buf.len() - start;
    if size > MAX_DOCUMENT_SIZE {
        buf.truncate(start);
        return Err(BsonError::DocumentTooLarge {
            size,
            max: MAX_DOCUMENT_SIZE,
        });
    }
    Ok(size)
}

/// Encoded size of a document in bytes, without encoding it.
pub fn calculate_size(doc: &Document) -> usize {
    4 + doc
        .iter()
        .map(|(key, value)| element_size(key.len(), value))
        .sum::<usize>()
        + 1
}

fn calculate_array_size(items: &[Value]) -> usize {
    4 + items
        .iter()
        .enumerate()
        .map(|(i, value)| element_size(decimal_len(i), value))
        .sum::<usize>()
        + 1
}

fn element_size(key_len: usize, value: &Value) -> usize {
    1 + key_len + 1 + value_size(value)
}

fn value_size(value: &Value) -> usize {
    match value {
        Value::Null => 0,
        Value::Boolean(_) => 1,
        Value::Int32(_) => 4,
        Value::Int64(_) | Value::Timestamp(_) | Value::Double(_) | Value::DateTime(_) => 8,
        Value::String(s) => string_size(s),
        Value::Document(doc) => calculate_size(doc),
        Value::Array(items) => calculate_array_size(items),
        Value::Binary(bin) => binary_size(bin),
        Value::ObjectId(_) => 12,
        Value::RegExp(re) => re.pattern().len() + 1 + re.options().len() + 1,
        Value::Code(Code { code, scope: None }) => string_size(code),
        Value::Code(Code {
            code,
            scope: Some(scope),
        }) => 4 + string_size(code) + calculate_size(scope),
        Value::DbRef(dbref) => calculate_size(&dbref.to_document()),
    }
}

fn string_size(s: &str) -> usize {
    4 + s.len() + 1
}

fn binary_size(bin: &Binary) -> usize {
    let inner = if bin.subtype() == SUBTYPE_BYTE_ARRAY { 4 } else { 0 };
    4 + 1 + inner + bin.len()
}

fn decimal_len(mut n: usize) -> usize {
    let mut len = 1;
    while n >= 10 {
        n /= 10;
        len += 1;
    }
    len
}

fn begin_length(buf: &mut BytesMut) -> usize {
    let start = buf.len();
    buf.put_i32_le(0);
    start
}

fn patch_length(buf: &mut BytesMut, start: usize) {
    let len = (buf.len() - start) as i32;
    buf[start..start + 4].copy_from_slice(&len.to_le_bytes());
}

fn write_document(buf: &mut BytesMut, doc: &Document, check_keys: bool) -> Result<(), BsonError> {
    let start = begin_length(buf);
    for (key, value) in doc.iter() {
        check_key(key, check_keys)?;
        write_element(buf, key, value, check_keys)?;
    }
    buf.put_u8(0);
    patch_length(buf, start);
    Ok(())
}

fn write_array(buf: &mut BytesMut, items: &[Value], check_keys: bool) -> Result<(), BsonError> {
    let start = begin_length(buf);
    for (i, value) in items.iter().enumerate() {
        write_element(buf, &i.to_string(), value, check_keys)?;
    }
    buf.put_u8(0);
    patch_length(buf, start);
    Ok(())
}

fn check_key(key: &str, check_keys: bool) -> Result<(), BsonError> {
    let reason = if key.contains('\0') {
        "must not contain a null byte"
    } else if check_keys && key.starts_with('$') {
        "must not start with '$'"
    } else if check_keys && key.contains('.') {
        "must not contain '.'"
    } else {
        return Ok(());
    };
    Err(BsonError::InvalidKey {
        key: key.to_string(),
        reason,
    })
}

fn write_element(
    buf: &mut BytesMut,
    key: &str,
    value: &Value,
    check_keys: bool,
) -> Result<(), BsonError> {
    buf.put_u8(value.element_type() as u8);
    buf.put_slice(key.as_bytes());
    buf.put_u8(0);

    match value {
        Value::Null => {}
        Value::Boolean(b) => buf.put_u8(u8::from(*b)),
        Value::Int32(v) => buf.put_i32_le(*v),
        Value::Int64(v) | Value::Timestamp(v) => write_long(buf, v),
        Value::Double(v) => buf.put_f64_le(*v),
        Value::String(s) => write_string(buf, s),
        Value::Document(doc) => write_document(buf, doc, check_keys)?,
        Value::Array(items) => write_array(buf, items, check_keys)?,
        Value::Binary(bin) => write_binary(buf, bin),
        Value::ObjectId(oid) => buf.put_slice(&oid.bytes()),
        Value::DateTime(dt) => buf.put_i64_le(dt.timestamp_millis()),
        Value::RegExp(re) => {
            write_cstring(buf, re.pattern())?;
            write_cstring(buf, re.options())?;
        }
        Value::Code(Code { code, scope: None }) => write_string(buf, code),
        Value::Code(Code {
            code,
            scope: Some(scope),
        }) => {
            let start = begin_length(buf);
            write_string(buf, code);
            write_document(buf, scope, false)?;
            patch_length(buf, start);
        }
        Value::DbRef(dbref) => write_document(buf, &dbref.to_document(), false)?,
    }
    Ok(())
}

/// Low word first, then high word.
fn write_long(buf: &mut BytesMut, value: &Long) {
    buf.put_i32_le(value.low_bits());
    buf.put_i32_le(value.high_bits());
}

fn write_string(buf: &mut BytesMut, s: &str) {
    buf.put_i32_le((s.len() + 1) as i32);
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

fn write_cstring(buf: &mut BytesMut, s: &str) -> Result<(), BsonError> {
    if s.contains('\0') {
        return Err(BsonError::NullInCString(s.to_string()));
    }
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
    Ok(())
}

fn write_binary(buf: &mut BytesMut, bin: &Binary) {
    let data = bin.value();
    if bin.subtype() == SUBTYPE_BYTE_ARRAY {
        buf.put_i32_le((data.len() + 4) as i32);
        buf.put_u8(bin.subtype());
        buf.put_i32_le(data.len() as i32);
    } else {
        buf.put_i32_le(data.len() as i32);
        buf.put_u8(bin.subtype());
    }
    buf.put_slice(data);
}
