//! The store context object and its cache operations.

use crate::cache::CacheState;
use crate::coalesce::FindQueue;
use crate::events::{StoreEvent, EVENT_CAPACITY};
use crate::missing::MissingMap;
use quiver_core::{
    id_from_value, normalize_type, LiveView, ModelDescriptor, ModelRegistry, Node, Record,
    RecordHandle, RequestOptions, StoreConfig, Transport, SCHEMA_TYPE,
};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, watch};
use tracing::{debug, trace};

/// Rewrites a request just before it is sent.
pub type RequestHook = Arc<dyn Fn(RequestOptions) -> RequestOptions + Send + Sync>;

/// Everything the store mutates. Guarded by one mutex that is never held
/// across an await point.
#[derive(Debug, Default)]
pub(crate) struct StoreState {
    pub(crate) cache: CacheState,
    pub(crate) class_cache: HashMap<String, Arc<ModelDescriptor>>,
    pub(crate) find_queue: FindQueue,
    pub(crate) missing: MissingMap,
    /// `(type, id)` pairs whose missing-reference notification is pending.
    pub(crate) deferred: VecDeque<(String, String)>,
    /// Set by the first `find`; state can no longer be hydrated after that.
    pub(crate) find_issued: bool,
}

/// Client-side cache of typed API records.
///
/// One store serves any number of concurrent callers; share it behind an
/// `Arc`.
pub struct Store {
    pub(crate) config: StoreConfig,
    pub(crate) registry: ModelRegistry,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) request_hook: Option<RequestHook>,
    state: Mutex<StoreState>,
    generation: watch::Sender<u64>,
    events: broadcast::Sender<StoreEvent>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

impl Store {
    pub fn new(config: StoreConfig, registry: ModelRegistry, transport: Arc<dyn Transport>) -> Self {
        let (generation, _) = watch::channel(0);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            registry,
            transport,
            request_hook: None,
            state: Mutex::new(StoreState::default()),
            generation,
            events,
        }
    }

    /// Install a hook that may rewrite every outgoing request.
    pub fn with_request_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(RequestOptions) -> RequestOptions + Send + Sync + 'static,
    {
        self.request_hook = Some(Arc::new(hook));
        self
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn emit(&self, event: StoreEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    pub(crate) fn emit_all(&self, events: Vec<StoreEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Subscribe to cache change events.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Number of full wipes so far.
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Watch the generation counter; it changes on every `reset()`.
    pub fn watch_generation(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    pub(crate) fn set_generation(&self, generation: u64) {
        self.generation.send_replace(generation);
    }

    /// Model descriptor for a type, resolved once and cached.
    pub fn class_for(&self, record_type: &str) -> Arc<ModelDescriptor> {
        let record_type = normalize_type(record_type);
        let mut state = self.lock();
        Arc::clone(
            state
                .class_cache
                .entry(record_type)
                .or_insert_with_key(|key| self.registry.class_for(key)),
        )
    }

    // ========================================================================
    // Cache reads
    // ========================================================================

    pub fn get_by_id(&self, record_type: &str, id: &str) -> Option<RecordHandle> {
        self.lock().cache.get_by_id(&normalize_type(record_type), id)
    }

    pub fn has_record_for(&self, record_type: &str, id: &str) -> bool {
        self.get_by_id(record_type, id).is_some()
    }

    /// Whether `handle` is the cached record for its own `(type, id)`.
    pub fn has_record(&self, handle: RecordHandle) -> bool {
        self.lock().cache.has_record(handle)
    }

    /// A live view over every cached record of a type.
    pub fn all(&self, record_type: &str) -> LiveView {
        LiveView::new(normalize_type(record_type))
    }

    /// Current members of a live view, in arrival order.
    pub fn view_records(&self, view: &LiveView) -> Vec<RecordHandle> {
        self.lock().cache.group(&view.record_type).to_vec()
    }

    /// Whether a complete unfiltered fetch of the type has finished.
    pub fn have_all(&self, record_type: &str) -> bool {
        self.lock().cache.found_all(&normalize_type(record_type))
    }

    /// A copy of a record as it is now.
    pub fn record(&self, handle: RecordHandle) -> Option<Record> {
        self.lock().cache.record(handle).cloned()
    }

    /// Borrow a record for the duration of `f`. `f` must not call back into the store.
    pub fn with_record<R>(&self, handle: RecordHandle, f: impl FnOnce(&Record) -> R) -> Option<R> {
        self.lock().cache.record(handle).map(f)
    }

    /// Borrow the record behind a node, cached or detached.
    pub fn with_node_record<R>(&self, node: &Node, f: impl FnOnce(&Record) -> R) -> Option<R> {
        match node {
            Node::Record(handle) => self.with_record(*handle, f),
            Node::Detached(record) => Some(f(record)),
            _ => None,
        }
    }

    /// Types with at least one cached record.
    pub fn cached_types(&self) -> Vec<String> {
        let state = self.lock();
        let mut types: Vec<String> = state
            .cache
            .types()
            .filter(|t| !state.cache.group(t).is_empty())
            .map(str::to_string)
            .collect();
        types.sort();
        types
    }

    // ========================================================================
    // Cache writes
    // ========================================================================

    /// Index a cached record in another type's group.
    pub fn add(&self, record_type: &str, handle: RecordHandle) -> bool {
        let record_type = normalize_type(record_type);
        let added = self.lock().cache.add(&record_type, handle);
        if added {
            self.emit(StoreEvent::Added {
                record_type,
                handle,
            });
        }
        added
    }

    /// Drop a record from a type's group.
    pub fn remove(&self, record_type: &str, handle: RecordHandle) -> bool {
        let record_type = normalize_type(record_type);
        let removed = self.lock().cache.remove(&record_type, handle);
        if removed {
            self.emit(StoreEvent::Removed {
                record_type,
                handle,
            });
        }
        removed
    }

    /// Load plain objects straight into a type's group.
    ///
    /// No nested normalization, no events, no missing-reference
    /// notifications. Schema ids are normalized; the raw id is kept as `_id`.
    pub fn bulk_add(&self, record_type: &str, objects: Vec<Value>) -> Vec<RecordHandle> {
        let record_type = normalize_type(record_type);
        let mut handles = Vec::with_capacity(objects.len());
        let mut state = self.lock();
        for object in objects {
            let Value::Object(mut map) = object else {
                continue;
            };
            let Some(mut id) = id_from_value(map.get("id")) else {
                continue;
            };
            if record_type == SCHEMA_TYPE {
                map.insert("_id".to_string(), Value::String(id.clone()));
                id = normalize_type(&id);
                map.insert("id".to_string(), Value::String(id.clone()));
            }
            let mut record = Record::new(record_type.clone(), Some(id.clone()));
            record.fields = map
                .into_iter()
                .map(|(key, value)| (key, Node::Plain(value)))
                .collect();

            let handle = match state.cache.get_by_id(&record_type, &id) {
                Some(existing) => {
                    if let Some(current) = state.cache.record_mut(existing) {
                        current.replace_with(record);
                    }
                    existing
                }
                None => {
                    let handle = state.cache.insert(record);
                    state.cache.add(&record_type, handle);
                    handle
                }
            };
            handles.push(handle);
        }
        debug!(record_type = %record_type, count = handles.len(), "Bulk added records");
        handles
    }

    /// Forget one type: its records, id index and found-all flag.
    pub fn reset_type(&self, record_type: &str) {
        let record_type = normalize_type(record_type);
        let dropped = self.lock().cache.reset_type(&record_type);
        debug!(record_type = %record_type, count = dropped.len(), "Reset type");
    }

    /// Forget everything and bump the generation counter.
    ///
    /// In-flight requests are not aborted; when they complete they may
    /// repopulate the cache.
    pub fn reset(&self) {
        {
            let mut state = self.lock();
            state.cache.clear();
            state.class_cache.clear();
            state.find_queue.clear();
            state.missing.clear();
            state.deferred.clear();
        }
        self.generation.send_modify(|generation| *generation += 1);
        let generation = self.generation();
        debug!(generation, "Store reset");
        self.emit(StoreEvent::Reset { generation });
    }

    /// Add `keys` to the included links of every record in `node`.
    pub(crate) fn note_included(&self, node: &Node, keys: &[String]) {
        let handles: Vec<RecordHandle> = match node {
            Node::Record(handle) => vec![*handle],
            Node::Collection(collection) => collection.records().collect(),
            Node::List(items) => items.iter().filter_map(Node::as_record).collect(),
            _ => return,
        };
        let mut state = self.lock();
        for handle in handles {
            if let Some(record) = state.cache.record_mut(handle) {
                record.note_included(keys);
            }
        }
        trace!(keys = ?keys, "Noted included keys");
    }
}
