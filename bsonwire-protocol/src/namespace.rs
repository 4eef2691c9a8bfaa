//! `<database>.<collection>` namespace strings.

use crate::error::ProtocolError;
use std::fmt;
use std::str::FromStr;

/// Collection name commands are addressed to.
pub const COMMAND_COLLECTION: &str = "$cmd";

/// A fully qualified collection name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    pub db: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(db: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            collection: collection.into(),
        }
    }

    /// The `<db>.$cmd` namespace.
    pub fn command(db: impl Into<String>) -> Self {
        Self::new(db, COMMAND_COLLECTION)
    }

    pub fn is_command(&self) -> bool {
        self.collection == COMMAND_COLLECTION
    }

    /// Splits at the first `.`; the collection part may itself contain dots.
    pub fn parse(full_name: &str) -> Result<Self, ProtocolError> {
        let invalid = || ProtocolError::InvalidNamespace(full_name.to_string());
        if full_name.contains('\0') {
            return Err(invalid());
        }
        let (db, collection) = full_name.split_once('.').ok_or_else(invalid)?;
        if db.is_empty() || collection.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(db, collection))
    }
}

impl FromStr for Namespace {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.collection)
    }
}
