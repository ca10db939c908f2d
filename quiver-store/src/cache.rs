//! Record arena and per-type cache groups.
//!
//! Records live in an arena addressed by [`RecordHandle`]. Each type has a
//! group: an ordered list of handles (arrival order) plus an id index. A
//! record declared with a distinct base type is indexed in both groups under
//! the same handle.
//!
//! # Invariant
//!
//! For every type, the group list and the id index hold exactly the same set
//! of handles, and each id appears at most once.

use quiver_core::{CacheLookup, Record, RecordHandle};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub(crate) struct CacheState {
    pub(crate) records: HashMap<RecordHandle, Record>,
    pub(crate) groups: HashMap<String, Vec<RecordHandle>>,
    pub(crate) maps: HashMap<String, HashMap<String, RecordHandle>>,
    pub(crate) found_all: HashMap<String, bool>,
    pub(crate) next_handle: u64,
}

impl CacheState {
    pub(crate) fn get_by_id(&self, record_type: &str, id: &str) -> Option<RecordHandle> {
        self.maps.get(record_type).and_then(|map| map.get(id)).copied()
    }

    pub(crate) fn record(&self, handle: RecordHandle) -> Option<&Record> {
        self.records.get(&handle)
    }

    pub(crate) fn record_mut(&mut self, handle: RecordHandle) -> Option<&mut Record> {
        self.records.get_mut(&handle)
    }

    /// Whether this exact handle is the cached entry for its `(type, id)`.
    pub(crate) fn has_record(&self, handle: RecordHandle) -> bool {
        let Some(record) = self.records.get(&handle) else {
            return false;
        };
        let Some(id) = record.id.as_deref() else {
            return false;
        };
        self.get_by_id(&record.record_type, id) == Some(handle)
    }

    pub(crate) fn group(&self, record_type: &str) -> &[RecordHandle] {
        self.groups
            .get(record_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Move a record into the arena and return its new handle.
    pub(crate) fn insert(&mut self, record: Record) -> RecordHandle {
        self.next_handle += 1;
        let handle = RecordHandle::new(self.next_handle);
        self.records.insert(handle, record);
        handle
    }

    /// Index an arena record in a type's group.
    ///
    /// A record without an id cannot be indexed. Re-adding a handle already
    /// indexed under its id is a no-op; a different handle under the same id
    /// replaces the old one in both list and index.
    pub(crate) fn add(&mut self, record_type: &str, handle: RecordHandle) -> bool {
        let Some(id) = self.records.get(&handle).and_then(|r| r.id.clone()) else {
            return false;
        };
        let map = self.maps.entry(record_type.to_string()).or_default();
        let group = self.groups.entry(record_type.to_string()).or_default();
        match map.insert(id, handle) {
            Some(previous) if previous == handle => return false,
            Some(previous) => group.retain(|h| *h != previous),
            None => {}
        }
        group.push(handle);
        true
    }

    /// Drop a handle from one type's group.
    ///
    /// The arena slot is freed once the record is no longer indexed anywhere.
    pub(crate) fn remove(&mut self, record_type: &str, handle: RecordHandle) -> bool {
        let Some(group) = self.groups.get_mut(record_type) else {
            return false;
        };
        let before = group.len();
        group.retain(|h| *h != handle);
        let removed = group.len() != before;
        if let Some(map) = self.maps.get_mut(record_type) {
            map.retain(|_, h| *h != handle);
        }
        if removed && !self.is_indexed(handle) {
            self.records.remove(&handle);
        }
        removed
    }

    /// Whether any type's id index still points at `handle`.
    fn is_indexed(&self, handle: RecordHandle) -> bool {
        let Some(id) = self.records.get(&handle).and_then(|record| record.id.as_deref()) else {
            return false;
        };
        self.maps.values().any(|map| map.get(id) == Some(&handle))
    }

    pub(crate) fn found_all(&self, record_type: &str) -> bool {
        self.found_all.get(record_type).copied().unwrap_or(false)
    }

    pub(crate) fn set_found_all(&mut self, record_type: &str, value: bool) {
        self.found_all.insert(record_type.to_string(), value);
    }

    /// Forget one type: flag, index and list.
    pub(crate) fn reset_type(&mut self, record_type: &str) -> Vec<RecordHandle> {
        self.found_all.insert(record_type.to_string(), false);
        self.maps.remove(record_type);
        let handles = self.groups.remove(record_type).unwrap_or_default();
        for handle in &handles {
            if !self.is_indexed(*handle) {
                self.records.remove(handle);
            }
        }
        handles
    }

    /// Forget everything. The handle counter keeps running.
    pub(crate) fn clear(&mut self) {
        self.records.clear();
        self.groups.clear();
        self.maps.clear();
        for flag in self.found_all.values_mut() {
            *flag = false;
        }
    }

    pub(crate) fn types(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }
}

impl CacheLookup for CacheState {
    fn lookup_id(&self, record_type: &str, id: &str) -> Option<RecordHandle> {
        self.get_by_id(record_type, id)
    }

    fn lookup_record(&self, handle: RecordHandle) -> Option<&Record> {
        self.record(handle)
    }
}

// ============================================================================
// TESTS
// ============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
