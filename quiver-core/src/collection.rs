//! Collections assembled from (possibly paginated) list payloads.

use crate::record::{Node, RecordHandle};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

const PAGINATION_KEY: &str = "pagination";
const NEXT_KEY: &str = "next";

/// An ordered set of normalized members plus the payload's metadata fields.
///
/// Members are referenced, not owned: a record member is a handle into the
/// store's cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub members: Vec<Node>,
    /// Allow-listed metadata copied verbatim from the payload.
    pub meta: BTreeMap<String, Value>,
}

impl Collection {
    pub fn new(members: Vec<Node>, meta: BTreeMap<String, Value>) -> Self {
        Self { members, meta }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.members.iter()
    }

    /// Handles of every record member, in order.
    pub fn records(&self) -> impl Iterator<Item = RecordHandle> + '_ {
        self.members.iter().filter_map(Node::as_record)
    }

    pub fn includes(&self, handle: RecordHandle) -> bool {
        self.records().any(|member| member == handle)
    }

    pub fn meta(&self, key: &str) -> Option<&Value> {
        self.meta.get(key)
    }

    /// The next-page link, if the payload indicates more pages.
    pub fn next_page(&self) -> Option<&str> {
        self.meta
            .get(PAGINATION_KEY)
            .and_then(|pagination| pagination.get(NEXT_KEY))
            .and_then(Value::as_str)
            .filter(|next| !next.is_empty())
    }

    /// Drop the next-page link so the collection reads as complete.
    pub fn clear_next_page(&mut self) {
        if let Some(Value::Object(pagination)) = self.meta.get_mut(PAGINATION_KEY) {
            pagination.remove(NEXT_KEY);
        }
    }

    /// Append a fetched page and adopt its pagination block.
    pub fn absorb_page(&mut self, page: Collection) {
        let Collection { members, mut meta } = page;
        self.members.extend(members);
        match meta.remove(PAGINATION_KEY) {
            Some(pagination) => {
                self.meta.insert(PAGINATION_KEY.to_string(), pagination);
            }
            None => self.clear_next_page(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page(handles: &[u64], next: Option<&str>) -> Collection {
        let mut meta = BTreeMap::new();
        meta.insert("pagination".to_string(), json!({ "next": next, "limit": 2 }));
        Collection::new(
            handles
                .iter()
                .map(|h| Node::Record(RecordHandle::new(*h)))
                .collect(),
            meta,
        )
    }

    #[test]
    fn test_next_page_reads_pagination_link() {
        assert_eq!(page(&[1], Some("/v1/widgets?marker=2")).next_page(), Some("/v1/widgets?marker=2"));
        assert_eq!(page(&[1], None).next_page(), None);
        assert_eq!(page(&[1], Some("")).next_page(), None);
        assert_eq!(Collection::default().next_page(), None);
    }

    #[test]
    fn test_absorb_page_appends_and_adopts_pagination() {
        let mut first = page(&[1, 2], Some("/p2"));
        first.absorb_page(page(&[3], None));
        assert_eq!(first.len(), 3);
        assert!(first.includes(RecordHandle::new(3)));
        assert_eq!(first.next_page(), None);
    }

    #[test]
    fn test_absorb_page_without_pagination_clears_next() {
        let mut first = page(&[1], Some("/p2"));
        first.absorb_page(Collection::new(vec![Node::Plain(json!(5))], BTreeMap::new()));
        assert_eq!(first.len(), 2);
        assert_eq!(first.next_page(), None);
        assert_eq!(first.records().count(), 1);
    }
}
