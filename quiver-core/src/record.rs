//! Records, record handles and normalized nodes.

use crate::collection::Collection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Stable address of a record inside a store's arena.
///
/// Handles are allocated from a monotonic counter and never reused, so a
/// handle held across `reset()` can never alias a newer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordHandle(u64);

impl RecordHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A cached, typed representation of one API resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Normalized type name.
    pub record_type: String,
    /// Resource id. Records without an id are never indexed.
    pub id: Option<String>,
    /// Normalized base type, when the payload declares one.
    pub base_type: Option<String>,
    /// Field values; typeify targets hold nested nodes, the rest stay plain.
    pub fields: BTreeMap<String, Node>,
    /// Link names requested through `include` on any fetch of this record.
    pub included_keys: Vec<String>,
}

impl Record {
    pub fn new(record_type: impl Into<String>, id: Option<String>) -> Self {
        Self {
            record_type: record_type.into(),
            id,
            base_type: None,
            fields: BTreeMap::new(),
            included_keys: Vec::new(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Node> {
        self.fields.get(field)
    }

    /// Plain JSON value of a field, if the field was not normalized.
    pub fn get_plain(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).and_then(Node::as_plain)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get_plain(field).and_then(Value::as_str)
    }

    /// Overwrite this record's contents with a fresh copy of the same resource.
    ///
    /// Keys missing from `fresh` are dropped. Identity and the accumulated
    /// `included_keys` are kept.
    pub fn replace_with(&mut self, fresh: Record) {
        self.fields = fresh.fields;
        self.base_type = fresh.base_type;
        for key in fresh.included_keys {
            if !self.included_keys.contains(&key) {
                self.included_keys.push(key);
            }
        }
    }

    /// Record a set of included link names, keeping the list unique.
    pub fn note_included(&mut self, keys: &[String]) {
        for key in keys {
            if !self.included_keys.contains(key) {
                self.included_keys.push(key.clone());
            }
        }
    }
}

/// Live view over every record of one type in a store.
///
/// The view holds no records itself; each read goes to the store's current
/// cache group, so it observes later additions and removals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveView {
    pub record_type: String,
}

impl LiveView {
    pub fn new(record_type: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
        }
    }
}

/// A normalized value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Node {
    /// Scalars and untyped objects, passed through untouched.
    Plain(Value),
    /// A record indexed in the store.
    Record(RecordHandle),
    /// A typed record that was not indexed (no usable id, or store updates off).
    Detached(Box<Record>),
    /// A collection shared by every holder of the same result.
    Collection(Arc<Collection>),
    /// An array, normalized element-wise.
    List(Vec<Node>),
    /// A live view over all records of a type.
    Live(LiveView),
}

impl Node {
    pub fn null() -> Self {
        Node::Plain(Value::Null)
    }

    pub fn as_plain(&self) -> Option<&Value> {
        match self {
            Node::Plain(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<RecordHandle> {
        match self {
            Node::Record(handle) => Some(*handle),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&Arc<Collection>> {
        match self {
            Node::Collection(collection) => Some(collection),
            _ => None,
        }
    }

    pub fn as_live(&self) -> Option<&LiveView> {
        match self {
            Node::Live(view) => Some(view),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Node::Plain(Value::Null))
    }
}

/// Extract a usable id from a JSON value.
///
/// Strings must be non-empty; integers are rendered in decimal. Anything
/// else is not an id.
pub fn id_from_value(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_id_from_value_variants() {
        assert_eq!(id_from_value(Some(&json!("42"))), Some("42".to_string()));
        assert_eq!(id_from_value(Some(&json!(7))), Some("7".to_string()));
        assert_eq!(id_from_value(Some(&json!(""))), None);
        assert_eq!(id_from_value(Some(&json!(null))), None);
        assert_eq!(id_from_value(Some(&json!({"a": 1}))), None);
        assert_eq!(id_from_value(None), None);
    }

    #[test]
    fn test_replace_with_drops_stale_keys_and_keeps_includes() {
        let mut record = Record::new("widget", Some("1".to_string()));
        record
            .fields
            .insert("name".to_string(), Node::Plain(json!("a")));
        record
            .fields
            .insert("color".to_string(), Node::Plain(json!("red")));
        record.note_included(&["owner".to_string()]);

        let mut fresh = Record::new("widget", Some("1".to_string()));
        fresh
            .fields
            .insert("name".to_string(), Node::Plain(json!("b")));

        record.replace_with(fresh);
        assert_eq!(record.get_str("name"), Some("b"));
        assert!(record.get("color").is_none());
        assert_eq!(record.included_keys, vec!["owner".to_string()]);
    }

    #[test]
    fn test_note_included_is_unique() {
        let mut record = Record::new("widget", None);
        record.note_included(&["a".to_string(), "b".to_string()]);
        record.note_included(&["b".to_string(), "c".to_string()]);
        assert_eq!(record.included_keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_node_accessors() {
        let handle = RecordHandle::new(3);
        assert_eq!(Node::Record(handle).as_record(), Some(handle));
        assert!(Node::null().is_null());
        assert_eq!(Node::Plain(json!(1)).as_plain(), Some(&json!(1)));
        assert!(Node::Live(LiveView::new("widget")).as_live().is_some());
        assert_eq!(handle.to_string(), "#3");
    }
}
