//! Auxiliary value kinds carried by documents.

use crate::document::Document;
use crate::oid::ObjectId;
use chrono::{DateTime, TimeZone, Utc};
use std::fmt;

/// Regex option flags the encoder keeps, in emission order.
const REGEX_FLAGS: [char; 3] = ['i', 'm', 'x'];

/// A regular expression: pattern plus option flags.
///
/// Flags are filtered to `i`, `m` and `x`, deduplicated, and always emitted
/// in that order regardless of the order they were supplied in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Regex {
    pattern: String,
    options: String,
}

impl Regex {
    pub fn new(pattern: impl Into<String>, flags: &str) -> Self {
        Self {
            pattern: pattern.into(),
            options: REGEX_FLAGS
                .iter()
                .filter(|flag| flags.contains(**flag))
                .collect(),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn options(&self) -> &str {
        &self.options
    }
}

impl fmt::Display for Regex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.pattern, self.options)
    }
}

/// JavaScript source, optionally with a scope document.
#[derive(Debug, Clone, PartialEq)]
pub struct Code {
    pub code: String,
    pub scope: Option<Document>,
}

impl Code {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            scope: None,
        }
    }

    pub fn with_scope(code: impl Into<String>, scope: Document) -> Self {
        Self {
            code: code.into(),
            scope: Some(scope),
        }
    }
}

/// A reference to a document in another collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbRef {
    pub namespace: String,
    pub oid: ObjectId,
    pub db: Option<String>,
}

impl DbRef {
    pub fn new(namespace: impl Into<String>, oid: ObjectId) -> Self {
        Self {
            namespace: namespace.into(),
            oid,
            db: None,
        }
    }

    pub fn with_db(mut self, db: impl Into<String>) -> Self {
        self.db = Some(db.into());
        self
    }

    /// The `{$ref, $id[, $db]}` document this reference encodes as.
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert("$ref", self.namespace.clone());
        doc.insert("$id", self.oid);
        if let Some(db) = &self.db {
            doc.insert("$db", db.clone());
        }
        doc
    }
}

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UtcDateTime(i64);

impl UtcDateTime {
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    pub fn timestamp_millis(&self) -> i64 {
        self.0
    }

    pub fn to_chrono(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.0).single().unwrap_or_default()
    }
}

impl From<DateTime<Utc>> for UtcDateTime {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value.timestamp_millis())
    }
}

impl fmt::Display for UtcDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_chrono().to_rfc3339())
    }
}
