//! Missing-reference tracker.
//!
//! A dependent that reads a reference to a record which is not cached yet
//! registers itself here under the target's `(type, id)`. When that record is
//! upserted, every pending dependent is told to recompute the named field and
//! the list is cleared. Notifications are queued during a normalization pass
//! and delivered once the pass is over, outside the store lock.

use crate::events::StoreEvent;
use crate::store::Store;
use quiver_core::{normalize_type, RecordHandle};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Process-local receiver of field invalidations.
pub trait FieldObserver: Send + Sync {
    fn field_invalidated(&self, field: &str);
}

/// Who is waiting on a missing record.
#[derive(Clone)]
pub enum Dependent {
    /// A cached record; notified through [`StoreEvent::FieldInvalidated`].
    Record(RecordHandle),
    /// An arbitrary observer, called directly. Never transferred with state.
    Observer(Arc<dyn FieldObserver>),
}

impl fmt::Debug for Dependent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dependent::Record(handle) => f.debug_tuple("Record").field(handle).finish(),
            Dependent::Observer(_) => f.write_str("Observer(<dyn>)"),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MissingEntry {
    pub(crate) dependent: Dependent,
    pub(crate) field: String,
}

/// type -> id -> pending dependents.
#[derive(Debug, Default)]
pub(crate) struct MissingMap {
    pending: HashMap<String, HashMap<String, Vec<MissingEntry>>>,
}

impl MissingMap {
    pub(crate) fn register(&mut self, record_type: &str, id: &str, dependent: Dependent, field: &str) {
        self.pending
            .entry(record_type.to_string())
            .or_default()
            .entry(id.to_string())
            .or_default()
            .push(MissingEntry {
                dependent,
                field: field.to_string(),
            });
    }

    /// Remove and return everything pending on `(type, id)`.
    pub(crate) fn take(&mut self, record_type: &str, id: &str) -> Vec<MissingEntry> {
        let Some(by_id) = self.pending.get_mut(record_type) else {
            return Vec::new();
        };
        let entries = by_id.remove(id).unwrap_or_default();
        if by_id.is_empty() {
            self.pending.remove(record_type);
        }
        entries
    }

    pub(crate) fn pending_count(&self, record_type: &str, id: &str) -> usize {
        self.pending
            .get(record_type)
            .and_then(|by_id| by_id.get(id))
            .map_or(0, Vec::len)
    }

    pub(crate) fn clear(&mut self) {
        self.pending.clear();
    }

    /// Every `(type, id, entry)` triple, for state transfer.
    pub(crate) fn entries(&self) -> impl Iterator<Item = (&str, &str, &MissingEntry)> {
        self.pending.iter().flat_map(|(record_type, by_id)| {
            by_id.iter().flat_map(move |(id, entries)| {
                entries
                    .iter()
                    .map(move |entry| (record_type.as_str(), id.as_str(), entry))
            })
        })
    }
}

impl Store {
    /// Wait for `(type, id)` to arrive; `dependent` will be told to recompute `field`.
    pub fn register_missing(&self, record_type: &str, id: &str, dependent: Dependent, field: &str) {
        let record_type = normalize_type(record_type);
        trace!(record_type = %record_type, id = %id, field = %field, "Registered missing reference");
        self.lock()
            .missing
            .register(&record_type, id, dependent, field);
    }

    /// Number of dependents currently waiting on `(type, id)`.
    pub fn pending_missing(&self, record_type: &str, id: &str) -> usize {
        self.lock()
            .missing
            .pending_count(&normalize_type(record_type), id)
    }

    /// Notify and clear every dependent waiting on `(type, id)`.
    ///
    /// Returns the number of notifications delivered. A second call with no
    /// registration in between delivers nothing.
    pub fn notify_missing(&self, record_type: &str, id: &str) -> usize {
        let entries = self.lock().missing.take(&normalize_type(record_type), id);
        self.deliver(entries)
    }

    /// Drain notifications queued by normalization passes.
    pub(crate) fn run_deferred(&self) -> usize {
        let entries: Vec<MissingEntry> = {
            let mut state = self.lock();
            let queued: Vec<(String, String)> = state.deferred.drain(..).collect();
            queued
                .iter()
                .flat_map(|(record_type, id)| state.missing.take(record_type, id))
                .collect()
        };
        self.deliver(entries)
    }

    fn deliver(&self, entries: Vec<MissingEntry>) -> usize {
        let count = entries.len();
        for entry in entries {
            match entry.dependent {
                Dependent::Record(handle) => self.emit(StoreEvent::FieldInvalidated {
                    handle,
                    field: entry.field,
                }),
                Dependent::Observer(observer) => observer.field_invalidated(&entry.field),
            }
        }
        if count > 0 {
            debug!(count, "Delivered missing-reference notifications");
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_core::{ModelRegistry, StoreConfig, TypeifyOptions};
    use quiver_test_utils::MockTransport;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        fields: Mutex<Vec<String>>,
    }

    impl FieldObserver for Recorder {
        fn field_invalidated(&self, field: &str) {
            self.fields
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(field.to_string());
        }
    }

    impl Recorder {
        fn seen(&self) -> Vec<String> {
            self.fields.lock().unwrap().clone()
        }
    }

    fn store() -> Store {
        Store::new(
            StoreConfig::default(),
            ModelRegistry::new(),
            Arc::new(MockTransport::new()),
        )
    }

    #[test]
    fn test_map_take_clears_entries() {
        let mut map = MissingMap::default();
        map.register("foo", "x", Dependent::Record(RecordHandle::new(1)), "bar");
        map.register("foo", "x", Dependent::Record(RecordHandle::new(2)), "baz");
        assert_eq!(map.pending_count("foo", "x"), 2);
        assert_eq!(map.take("foo", "x").len(), 2);
        assert!(map.take("foo", "x").is_empty());
        assert_eq!(map.entries().count(), 0);
    }

    #[test]
    fn test_upsert_notifies_exactly_once() {
        let store = store();
        let recorder = Arc::new(Recorder::default());
        store.register_missing("Foo", "x", Dependent::Observer(recorder.clone()), "bar");

        store.typeify(&json!({"type": "foo", "id": "x"}), &TypeifyOptions::default());
        assert_eq!(recorder.seen(), vec!["bar".to_string()]);

        store.typeify(&json!({"type": "foo", "id": "x", "n": 2}), &TypeifyOptions::default());
        assert_eq!(recorder.seen().len(), 1);
    }

    #[test]
    fn test_notify_is_idempotent() {
        let store = store();
        let recorder = Arc::new(Recorder::default());
        store.register_missing("foo", "x", Dependent::Observer(recorder.clone()), "bar");
        assert_eq!(store.notify_missing("foo", "x"), 1);
        assert_eq!(store.notify_missing("foo", "x"), 0);
        assert_eq!(recorder.seen(), vec!["bar".to_string()]);
    }

    #[test]
    fn test_record_dependent_receives_event() {
        let store = store();
        let mut events = store.subscribe();
        let holder = RecordHandle::new(99);
        store.register_missing("foo", "x", Dependent::Record(holder), "owner");
        assert_eq!(store.pending_missing("foo", "x"), 1);

        store.notify_missing("foo", "x");
        assert_eq!(
            events.try_recv().ok(),
            Some(StoreEvent::FieldInvalidated {
                handle: holder,
                field: "owner".to_string(),
            })
        );
    }

    #[test]
    fn test_never_missing_types_are_not_notified() {
        let store = store();
        let recorder = Arc::new(Recorder::default());
        store.register_missing("error", "e1", Dependent::Observer(recorder.clone()), "detail");
        store.typeify(&json!({"type": "error", "id": "e1"}), &TypeifyOptions::default());
        assert!(recorder.seen().is_empty());
        assert_eq!(store.pending_missing("error", "e1"), 1);
    }

    #[test]
    fn test_base_type_arrival_notifies_base_dependents() {
        let store = store();
        let recorder = Arc::new(Recorder::default());
        store.register_missing("instance", "c1", Dependent::Observer(recorder.clone()), "host");
        store.typeify(
            &json!({"type": "container", "baseType": "instance", "id": "c1"}),
            &TypeifyOptions::default(),
        );
        assert_eq!(recorder.seen(), vec!["host".to_string()]);
    }
}
