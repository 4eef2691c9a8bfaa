//! Ordered BSON documents.

use crate::oid::ObjectId;
use crate::value::Value;

/// An ordered mapping from field name to [`Value`]. Keys are unique:
/// inserting an existing key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    entries: Vec<(String, Value)>,
}

/// Builds a [`Document`] with fields in the order written.
///
/// ```
/// use bsonwire_bson::{doc, Value};
///
/// let d = doc! { "name" => "a", "count" => 5 };
/// assert_eq!(d.get("count"), Some(&Value::Int32(5)));
/// ```
#[macro_export]
macro_rules! doc {
    () => {
        $crate::Document::new()
    };
    ( $( $key:expr => $value:expr ),+ $(,)? ) => {{
        let mut doc = $crate::Document::new();
        $( doc.insert($key, $value); )+
        doc
    }};
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Inserts a field, returning the previous value for the key if any.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Removes a field, keeping the order of the remaining ones.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn first_key(&self) -> Option<&str> {
        self.entries.first().map(|(k, _)| k.as_str())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn get_i32(&self, key: &str) -> Option<i32> {
        self.get(key).and_then(Value::as_i32)
    }

    /// Int32 or Int64 widened to `i64`.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    /// Any numeric element as `f64`.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    pub fn get_document(&self, key: &str) -> Option<&Document> {
        self.get(key).and_then(Value::as_document)
    }

    pub fn get_array(&self, key: &str) -> Option<&[Value]> {
        self.get(key).and_then(Value::as_array)
    }

    pub fn get_object_id(&self, key: &str) -> Option<ObjectId> {
        self.get(key).and_then(Value::as_object_id)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Document {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut doc = Document::new();
        for (k, v) in iter {
            doc.insert(k, v);
        }
        doc
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::long::Long;

    #[test]
    fn test_insert_preserves_order_and_replaces() {
        let mut doc = doc! { "b" => 1, "a" => 2, "c" => 3 };
        assert_eq!(doc.insert("a", "two"), Some(Value::Int32(2)));
        let keys: Vec<&str> = doc.keys().collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
        assert_eq!(doc.get_str("a"), Some("two"));
    }

    #[test]
    fn test_remove() {
        let mut doc = doc! { "x" => 1, "y" => 2, "z" => 3 };
        assert_eq!(doc.remove("y"), Some(Value::Int32(2)));
        assert_eq!(doc.remove("y"), None);
        assert_eq!(doc.keys().collect::<Vec<_>>(), vec!["x", "z"]);
    }

    #[test]
    fn test_numeric_getters_widen() {
        let doc = doc! {
            "small" => 1,
            "big" => Long::from_i64(1 << 40),
            "float" => 1.5,
        };
        assert_eq!(doc.get_i64("small"), Some(1));
        assert_eq!(doc.get_i64("big"), Some(1 << 40));
        assert_eq!(doc.get_f64("small"), Some(1.0));
        assert_eq!(doc.get_f64("float"), Some(1.5));
        assert_eq!(doc.get_i32("big"), None);
    }

    #[test]
    fn test_from_iterator() {
        let doc: Document = vec![("a", 1), ("b", 2)].into_iter().collect();
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.first_key(), Some("a"));
    }
}
