//! The closed set of values a document field can hold.

use crate::binary::Binary;
use crate::document::Document;
use crate::long::Long;
use crate::oid::ObjectId;
use crate::types::{Code, DbRef, Regex, UtcDateTime};
use serde_json::json;

/// BSON element type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ElementType {
    Double = 0x01,
    String = 0x02,
    Document = 0x03,
    Array = 0x04,
    Binary = 0x05,
    /// Deprecated; decoded as null.
    Undefined = 0x06,
    ObjectId = 0x07,
    Boolean = 0x08,
    DateTime = 0x09,
    Null = 0x0A,
    RegExp = 0x0B,
    Code = 0x0D,
    /// Deprecated; decoded as a string.
    Symbol = 0x0E,
    CodeWithScope = 0x0F,
    Int32 = 0x10,
    Timestamp = 0x11,
    Int64 = 0x12,
}

impl ElementType {
    pub fn from_u8(tag: u8) -> Option<Self> {
        let element_type = match tag {
            0x01 => ElementType::Double,
            0x02 => ElementType::String,
            0x03 => ElementType::Document,
            0x04 => ElementType::Array,
            0x05 => ElementType::Binary,
            0x06 => ElementType::Undefined,
            0x07 => ElementType::ObjectId,
            0x08 => ElementType::Boolean,
            0x09 => ElementType::DateTime,
            0x0A => ElementType::Null,
            0x0B => ElementType::RegExp,
            0x0D => ElementType::Code,
            0x0E => ElementType::Symbol,
            0x0F => ElementType::CodeWithScope,
            0x10 => ElementType::Int32,
            0x11 => ElementType::Timestamp,
            0x12 => ElementType::Int64,
            _ => return None,
        };
        Some(element_type)
    }
}

/// Largest magnitude an integral double can have and still be exact.
const TWO_PWR_63: f64 = 9_223_372_036_854_775_808.0;

/// A typed BSON value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(Long),
    Timestamp(Long),
    Double(f64),
    String(String),
    Document(Document),
    Array(Vec<Value>),
    Binary(Binary),
    ObjectId(ObjectId),
    DateTime(UtcDateTime),
    RegExp(Regex),
    Code(Code),
    DbRef(DbRef),
}

impl Value {
    /// Picks the numeric element type for a double the way untyped numbers
    /// are stored: integral values in the 32-bit range become Int32, other
    /// integral values in the 64-bit range Int64, everything else Double.
    pub fn number(value: f64) -> Value {
        if value.is_finite() && value.fract() == 0.0 {
            if value >= i32::MIN as f64 && value <= i32::MAX as f64 {
                return Value::Int32(value as i32);
            }
            if (-TWO_PWR_63..TWO_PWR_63).contains(&value) {
                return Value::Int64(Long::from_i64(value as i64));
            }
        }
        Value::Double(value)
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            Value::Null => ElementType::Null,
            Value::Boolean(_) => ElementType::Boolean,
            Value::Int32(_) => ElementType::Int32,
            Value::Int64(_) => ElementType::Int64,
            Value::Timestamp(_) => ElementType::Timestamp,
            Value::Double(_) => ElementType::Double,
            Value::String(_) => ElementType::String,
            Value::Document(_) | Value::DbRef(_) => ElementType::Document,
            Value::Array(_) => ElementType::Array,
            Value::Binary(_) => ElementType::Binary,
            Value::ObjectId(_) => ElementType::ObjectId,
            Value::DateTime(_) => ElementType::DateTime,
            Value::RegExp(_) => ElementType::RegExp,
            Value::Code(code) if code.scope.is_some() => ElementType::CodeWithScope,
            Value::Code(_) => ElementType::Code,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(v) => Some(*v as i64),
            Value::Int64(v) => Some(v.to_i64()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Int32(v) => Some(*v as f64),
            Value::Int64(v) => Some(v.to_f64()),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object_id(&self) -> Option<ObjectId> {
        match self {
            Value::ObjectId(oid) => Some(*oid),
            _ => None,
        }
    }

    /// Relaxed JSON view of the value, for logging and display. Types
    /// without a JSON counterpart become `$`-tagged objects.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => json!(b),
            Value::Int32(v) => json!(v),
            Value::Int64(v) => json!(v.to_i64()),
            Value::Timestamp(v) => json!({
                "$timestamp": { "t": v.high_bits() as u32, "i": v.low_bits() as u32 }
            }),
            Value::Double(v) => json!(v),
            Value::String(s) => json!(s),
            Value::Document(doc) => document_to_json(doc),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Binary(bin) => json!({
                "$binary": hex::encode(bin.value()),
                "$type": format!("{:02x}", bin.subtype()),
            }),
            Value::ObjectId(oid) => json!({ "$oid": oid.to_hex() }),
            Value::DateTime(dt) => json!({ "$date": dt.timestamp_millis() }),
            Value::RegExp(re) => json!({
                "$regex": re.pattern(),
                "$options": re.options(),
            }),
            Value::Code(code) => match &code.scope {
                Some(scope) => json!({ "$code": code.code, "$scope": document_to_json(scope) }),
                None => json!({ "$code": code.code }),
            },
            Value::DbRef(dbref) => document_to_json(&dbref.to_document()),
        }
    }
}

/// JSON object view of a document.
pub fn document_to_json(doc: &Document) -> serde_json::Value {
    serde_json::Value::Object(
        doc.iter()
            .map(|(k, v)| (k.to_string(), v.to_json()))
            .collect(),
    )
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::from(i),
                None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Document(map.into_iter().collect()),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int32(value)
    }
}

/// Integral values in the 32-bit range become Int32, others Int64.
impl From<i64> for Value {
    fn from(value: i64) -> Self {
        match i32::try_from(value) {
            Ok(small) => Value::Int32(small),
            Err(_) => Value::Int64(Long::from_i64(value)),
        }
    }
}

impl From<Long> for Value {
    fn from(value: Long) -> Self {
        Value::Int64(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Document> for Value {
    fn from(value: Document) -> Self {
        Value::Document(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::Array(value.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<Binary> for Value {
    fn from(value: Binary) -> Self {
        Value::Binary(value)
    }
}

impl From<ObjectId> for Value {
    fn from(value: ObjectId) -> Self {
        Value::ObjectId(value)
    }
}

impl From<UtcDateTime> for Value {
    fn from(value: UtcDateTime) -> Self {
        Value::DateTime(value)
    }
}

impl From<Regex> for Value {
    fn from(value: Regex) -> Self {
        Value::RegExp(value)
    }
}

impl From<Code> for Value {
    fn from(value: Code) -> Self {
        Value::Code(value)
    }
}

impl From<DbRef> for Value {
    fn from(value: DbRef) -> Self {
        Value::DbRef(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_number_selection() {
        assert_eq!(Value::number(2147483647.0), Value::Int32(i32::MAX));
        assert_eq!(
            Value::number(2147483648.0),
            Value::Int64(Long::from_i64(2147483648))
        );
        assert_eq!(
            Value::number(-2147483649.0),
            Value::Int64(Long::from_i64(-2147483649))
        );
        assert_eq!(Value::number(1.5), Value::Double(1.5));
        assert_eq!(Value::number(1e300), Value::Double(1e300));
        assert_eq!(Value::number(f64::NAN).element_type(), ElementType::Double);
    }

    #[test]
    fn test_number_large_integrals_stay_int64() {
        assert_eq!(
            Value::number(1e18),
            Value::Int64(Long::from_i64(1_000_000_000_000_000_000))
        );
        assert_eq!(Value::number(-TWO_PWR_63), Value::Int64(Long::MIN));
        assert_eq!(Value::number(TWO_PWR_63), Value::Double(TWO_PWR_63));
        assert_eq!(Value::number(f64::INFINITY).element_type(), ElementType::Double);
    }

    #[test]
    fn test_from_i64_range() {
        assert_eq!(Value::from(2147483647i64), Value::Int32(i32::MAX));
        assert_eq!(Value::from(2147483648i64).element_type(), ElementType::Int64);
        assert_eq!(Value::from(-2147483649i64).element_type(), ElementType::Int64);
    }

    #[test]
    fn test_element_type_tags() {
        assert_eq!(Value::Code(Code::new("f()")).element_type() as u8, 0x0D);
        assert_eq!(
            Value::Code(Code::with_scope("f()", doc! {})).element_type() as u8,
            0x0F
        );
        assert_eq!(ElementType::from_u8(0x12), Some(ElementType::Int64));
        assert_eq!(ElementType::from_u8(0x0C), None);
    }

    #[test]
    fn test_json_interop() {
        let json = serde_json::json!({ "name": "a", "n": 5, "big": 1i64 << 40, "tags": ["x"] });
        let value = Value::from(json);
        let doc = value.as_document().unwrap();
        assert_eq!(doc.get("n"), Some(&Value::Int32(5)));
        assert_eq!(doc.get_i64("big"), Some(1 << 40));
        assert_eq!(doc.get_array("tags").map(|a| a.len()), Some(1));

        let oid = ObjectId::from_time(0);
        let rendered = Value::from(doc! { "_id" => oid }).to_json();
        assert_eq!(rendered["_id"]["$oid"], serde_json::json!(oid.to_hex()));
    }
}
