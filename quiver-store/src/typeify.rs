//! Normalization of raw JSON into records and collections.
//!
//! A pass walks a decoded payload once, under the store lock:
//!
//! - scalars, untyped objects and non-target fields stay plain
//! - arrays are normalized element by element
//! - `type: "collection"` objects become a [`Collection`]
//! - every other typed object becomes a record and is merged into the cache
//!
//! Merging keeps identity: a payload whose `(type, id)` is already cached
//! overwrites that record behind its existing handle.

use crate::events::StoreEvent;
use crate::store::{Store, StoreState};
use quiver_core::{
    id_from_value, normalize_type, Collection, ModelDescriptor, ModelRegistry, Node, Record,
    SchemaView, StoreConfig, StoreResult, TypeifyOptions, ValidationError, COLLECTION_TYPE,
    SCHEMA_TYPE,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::trace;

pub(crate) struct Typeifier<'a> {
    config: &'a StoreConfig,
    registry: &'a ModelRegistry,
    state: &'a mut StoreState,
    opts: &'a TypeifyOptions,
    events: Vec<StoreEvent>,
}

impl<'a> Typeifier<'a> {
    pub(crate) fn new(
        config: &'a StoreConfig,
        registry: &'a ModelRegistry,
        state: &'a mut StoreState,
        opts: &'a TypeifyOptions,
    ) -> Self {
        Self {
            config,
            registry,
            state,
            opts,
            events: Vec::new(),
        }
    }

    pub(crate) fn into_events(self) -> Vec<StoreEvent> {
        self.events
    }

    pub(crate) fn node(&mut self, value: &Value) -> Node {
        match value {
            Value::Array(items) => Node::List(items.iter().map(|item| self.node(item)).collect()),
            Value::Object(map) => match map.get("type").and_then(Value::as_str) {
                Some(raw) if normalize_type(raw) == COLLECTION_TYPE => self.collection(map),
                Some(raw) if !normalize_type(raw).is_empty() => self.record(map.clone()),
                _ => Node::Plain(value.clone()),
            },
            _ => Node::Plain(value.clone()),
        }
    }

    pub(crate) fn collection(&mut self, map: &Map<String, Value>) -> Node {
        let members = match map.get(&self.opts.collection_key) {
            Some(Value::Array(items)) => items.iter().map(|item| self.node(item)).collect(),
            _ => Vec::new(),
        };
        let meta: BTreeMap<String, Value> = self
            .config
            .meta_keys
            .iter()
            .filter_map(|key| map.get(key).map(|value| (key.clone(), value.clone())))
            .collect();
        trace!(members = members.len(), "Built collection");
        Node::Collection(Arc::new(Collection::new(members, meta)))
    }

    fn class_for(&mut self, record_type: &str) -> Arc<ModelDescriptor> {
        let registry = self.registry;
        Arc::clone(
            self.state
                .class_cache
                .entry(record_type.to_string())
                .or_insert_with_key(|key| registry.class_for(key)),
        )
    }

    pub(crate) fn record(&mut self, mut map: Map<String, Value>) -> Node {
        let record_type = normalize_type(map.get("type").and_then(Value::as_str).unwrap_or_default());

        if let Some(target) = &self.config.replace_actions {
            if let Some(actions) = map.remove("actions") {
                map.insert(target.clone(), actions);
            }
        }

        let schema = self
            .state
            .cache
            .get_by_id(SCHEMA_TYPE, &record_type)
            .and_then(|handle| self.state.cache.record(handle));
        let typeify_fields = schema
            .map(|schema| SchemaView::new(schema).typeify_fields())
            .unwrap_or_default();
        if self.opts.apply_defaults {
            if let Some(schema) = schema {
                map = SchemaView::new(schema).create_defaults(map);
            }
        }

        let model = self.class_for(&record_type);
        if let Some(mangle_in) = &model.mangle_in {
            map = mangle_in(map, &self.state.cache);
        }

        let mut id = id_from_value(map.get("id"));
        if record_type == SCHEMA_TYPE {
            if let Some(raw) = id.clone() {
                let normalized = normalize_type(&raw);
                if normalized != raw {
                    map.insert("_id".to_string(), Value::String(raw));
                    map.insert("id".to_string(), Value::String(normalized.clone()));
                }
                id = Some(normalized);
            }
        }
        let base_type = map
            .get("baseType")
            .and_then(Value::as_str)
            .map(normalize_type)
            .filter(|base| !base.is_empty());

        let mut fields = BTreeMap::new();
        for name in typeify_fields.iter().rev() {
            if let Some(value) = map.remove(name) {
                fields.insert(name.clone(), self.node(&value));
            }
        }
        for (key, value) in map {
            fields.insert(key, Node::Plain(value));
        }

        let mut record = Record::new(record_type.clone(), id.clone());
        record.base_type = base_type.clone();
        record.fields = fields;

        let Some(id) = id.filter(|_| self.opts.update_store) else {
            return Node::Detached(Box::new(record));
        };
        let distinct_base = base_type.filter(|base| *base != record_type);

        let handle = match self.state.cache.get_by_id(&record_type, &id) {
            Some(existing) => {
                let previous_base = self
                    .state
                    .cache
                    .record_mut(existing)
                    .and_then(|current| {
                        let previous = current.base_type.clone();
                        current.replace_with(record);
                        previous
                    })
                    .filter(|base| *base != record_type && Some(base) != distinct_base.as_ref());
                if let Some(base) = previous_base {
                    if self.state.cache.remove(&base, existing) {
                        self.events.push(StoreEvent::Removed {
                            record_type: base,
                            handle: existing,
                        });
                    }
                }
                trace!(record_type = %record_type, id = %id, "Updated record in place");
                existing
            }
            None => {
                let handle = self.state.cache.insert(record);
                self.state.cache.add(&record_type, handle);
                self.events.push(StoreEvent::Added {
                    record_type: record_type.clone(),
                    handle,
                });
                trace!(record_type = %record_type, id = %id, handle = %handle, "Added record");
                handle
            }
        };
        if let Some(base) = &distinct_base {
            if self.state.cache.add(base, handle) {
                self.events.push(StoreEvent::Added {
                    record_type: base.clone(),
                    handle,
                });
            }
        }

        if !self.config.never_missing.contains(&record_type) {
            self.state
                .deferred
                .push_back((record_type.clone(), id.clone()));
            if let Some(base) = distinct_base {
                self.state.deferred.push_back((base, id));
            }
        }

        Node::Record(handle)
    }
}

impl Store {
    /// Normalize a decoded payload and merge its records into the cache.
    ///
    /// Missing-reference notifications for the records it touched are
    /// delivered after the pass completes.
    pub fn typeify(&self, value: &Value, opts: &TypeifyOptions) -> Node {
        let (node, events) = {
            let mut state = self.lock();
            let mut pass = Typeifier::new(&self.config, &self.registry, &mut state, opts);
            let node = pass.node(value);
            (node, pass.into_events())
        };
        self.emit_all(events);
        self.run_deferred();
        node
    }

    /// Create a record from client-side data.
    ///
    /// The payload must be an object naming its type.
    pub fn create_record(&self, data: &Value, opts: &TypeifyOptions) -> StoreResult<Node> {
        let Value::Object(map) = data else {
            return Err(ValidationError::InvalidValue {
                field: "data".to_string(),
                reason: "must be an object".to_string(),
            }
            .into());
        };
        let typed = map
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|t| !normalize_type(t).is_empty() && normalize_type(t) != COLLECTION_TYPE);
        if !typed {
            return Err(ValidationError::TypeNotSpecified.into());
        }

        let (node, events) = {
            let mut state = self.lock();
            let mut pass = Typeifier::new(&self.config, &self.registry, &mut state, opts);
            let node = pass.record(map.clone());
            (node, pass.into_events())
        };
        self.emit_all(events);
        self.run_deferred();
        Ok(node)
    }

    /// Build a collection from a list payload or a bare array.
    pub fn create_collection(&self, input: &Value, opts: &TypeifyOptions) -> Node {
        let wrapped;
        let map = match input {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("type".to_string(), Value::String(COLLECTION_TYPE.to_string()));
                map.insert(opts.collection_key.clone(), other.clone());
                wrapped = map;
                &wrapped
            }
        };

        let (node, events) = {
            let mut state = self.lock();
            let mut pass = Typeifier::new(&self.config, &self.registry, &mut state, opts);
            let node = pass.collection(map);
            (node, pass.into_events())
        };
        self.emit_all(events);
        self.run_deferred();
        node
    }
}
