//! Rendering normalized nodes back into plain JSON.

use crate::cache::CacheState;
use crate::store::Store;
use quiver_core::{Node, Record, RecordHandle, COLLECTION_TYPE};
use serde_json::{Map, Value};

fn render_node(cache: &CacheState, node: &Node, stack: &mut Vec<RecordHandle>) -> Value {
    match node {
        Node::Plain(value) => value.clone(),
        Node::Record(handle) => render_handle(cache, *handle, stack),
        Node::Detached(record) => render_record(cache, record, stack),
        Node::List(items) => Value::Array(items.iter().map(|item| render_node(cache, item, stack)).collect()),
        Node::Collection(collection) => {
            let mut out: Map<String, Value> = collection
                .meta
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            out.insert("type".to_string(), Value::String(COLLECTION_TYPE.to_string()));
            out.insert(
                "data".to_string(),
                Value::Array(
                    collection
                        .iter()
                        .map(|member| render_node(cache, member, stack))
                        .collect(),
                ),
            );
            Value::Object(out)
        }
        Node::Live(view) => Value::Array(
            cache
                .group(&view.record_type)
                .iter()
                .map(|handle| render_handle(cache, *handle, stack))
                .collect(),
        ),
    }
}

fn render_handle(cache: &CacheState, handle: RecordHandle, stack: &mut Vec<RecordHandle>) -> Value {
    let Some(record) = cache.record(handle) else {
        return Value::Null;
    };
    // A record reachable from itself renders as a reference on the second visit.
    if stack.contains(&handle) {
        let mut reference = Map::new();
        reference.insert("type".to_string(), Value::String(record.record_type.clone()));
        if let Some(id) = &record.id {
            reference.insert("id".to_string(), Value::String(id.clone()));
        }
        return Value::Object(reference);
    }
    stack.push(handle);
    let out = render_record(cache, record, stack);
    stack.pop();
    out
}

fn render_record(cache: &CacheState, record: &Record, stack: &mut Vec<RecordHandle>) -> Value {
    Value::Object(
        record
            .fields
            .iter()
            .map(|(key, node)| (key.clone(), render_node(cache, node, stack)))
            .collect(),
    )
}

impl Store {
    /// Plain JSON for a node, with records expanded from the cache.
    ///
    /// Records that are gone from the cache render as `null`.
    pub fn to_json(&self, node: &Node) -> Value {
        let state = self.lock();
        render_node(&state.cache, node, &mut Vec::new())
    }
}
