//! BSON codec for bsonwire.
//!
//! This crate implements the binary document format spoken on the wire:
//! - Ordered [`Document`]s of typed [`Value`]s
//! - Serialization with optional key validation, and bounded deserialization
//! - [`Long`] and arbitrary precision [`Integer`] numerics
//! - Auxiliary value kinds: [`ObjectId`], [`Binary`], [`Code`], [`DbRef`], [`Regex`]
//!
//! # Example
//!
//! ```
//! use bsonwire_bson::{deserialize, doc, serialize, Value};
//!
//! let doc = doc! { "name" => "a", "count" => 5 };
//! let bytes = serialize(&doc, true).unwrap();
//! let decoded = deserialize(&bytes).unwrap();
//! assert_eq!(decoded.get("count"), Some(&Value::Int32(5)));
//! ```

pub mod binary;
pub mod decoder;
pub mod document;
pub mod encoder;
pub mod error;
pub mod integer;
pub mod long;
pub mod oid;
pub mod types;
pub mod value;

pub use binary::Binary;
pub use decoder::{deserialize, deserialize_array, deserialize_prefix, deserialize_stream};
pub use document::Document;
pub use encoder::{calculate_size, serialize, serialize_into, MAX_DOCUMENT_SIZE};
pub use error::BsonError;
pub use integer::Integer;
pub use long::Long;
pub use oid::ObjectId;
pub use types::{Code, DbRef, Regex, UtcDateTime};
pub use value::{document_to_json, ElementType, Value};
