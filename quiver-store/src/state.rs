//! State transfer between cooperating processes.
//!
//! A store's whole cache can be captured as a [`StoreSnapshot`], placed in a
//! [`StateBox`] under the store's namespace, shipped as JSON text and
//! hydrated into a fresh store before it issues its first `find`.

use crate::missing::Dependent;
use crate::store::Store;
use quiver_core::{Record, RecordHandle, StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// A pending missing reference held by a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingSnapshot {
    pub record_type: String,
    pub id: String,
    pub dependent: RecordHandle,
    pub field: String,
}

/// Serializable image of a store's state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub generation: u64,
    pub next_handle: u64,
    pub records: Vec<(RecordHandle, Record)>,
    /// Per type, handles in arrival order. Id indexes are rebuilt from these.
    pub groups: BTreeMap<String, Vec<RecordHandle>>,
    pub found_all: BTreeMap<String, bool>,
    /// Types whose model descriptor had been resolved.
    pub class_cache: Vec<String>,
    /// Signatures that were in flight when the snapshot was taken.
    pub find_queue: Vec<String>,
    pub missing: Vec<MissingSnapshot>,
}

/// Namespaced container of serialized states.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateBox {
    entries: BTreeMap<String, Value>,
}

impl StateBox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, namespace: impl Into<String>, value: Value) {
        self.entries.insert(namespace.into(), value);
    }

    pub fn get(&self, namespace: &str) -> Option<&Value> {
        self.entries.get(namespace)
    }

    pub fn remove(&mut self, namespace: &str) -> Option<Value> {
        self.entries.remove(namespace)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn to_json_string(&self) -> StoreResult<String> {
        serde_json::to_string(self).map_err(|e| StoreError::State {
            reason: e.to_string(),
        })
    }

    pub fn from_json_str(text: &str) -> StoreResult<Self> {
        serde_json::from_str(text).map_err(|e| StoreError::State {
            reason: e.to_string(),
        })
    }
}

impl Store {
    /// Capture the current state.
    pub fn snapshot(&self) -> StoreSnapshot {
        let generation = self.generation();
        let state = self.lock();

        let mut records: Vec<(RecordHandle, Record)> = state
            .cache
            .records
            .iter()
            .map(|(handle, record)| (*handle, record.clone()))
            .collect();
        records.sort_by_key(|(handle, _)| *handle);

        let mut class_cache: Vec<String> = state.class_cache.keys().cloned().collect();
        class_cache.sort();
        let mut find_queue: Vec<String> = state.find_queue.keys().map(str::to_string).collect();
        find_queue.sort();

        let missing = state
            .missing
            .entries()
            .filter_map(|(record_type, id, entry)| match &entry.dependent {
                Dependent::Record(handle) => Some(MissingSnapshot {
                    record_type: record_type.to_string(),
                    id: id.to_string(),
                    dependent: *handle,
                    field: entry.field.clone(),
                }),
                Dependent::Observer(_) => None,
            })
            .collect();

        StoreSnapshot {
            generation,
            next_handle: state.cache.next_handle,
            records,
            groups: state
                .cache
                .groups
                .iter()
                .map(|(record_type, handles)| (record_type.clone(), handles.clone()))
                .collect(),
            found_all: state
                .cache
                .found_all
                .iter()
                .map(|(record_type, flag)| (record_type.clone(), *flag))
                .collect(),
            class_cache,
            find_queue,
            missing,
        }
    }

    /// Replace this store's state with a snapshot.
    ///
    /// Only allowed before the first `find`. In-flight requests of the
    /// source store cannot be resumed here and are dropped.
    pub fn restore(&self, snapshot: StoreSnapshot) -> StoreResult<()> {
        let StoreSnapshot {
            generation,
            next_handle,
            records,
            groups,
            found_all,
            class_cache,
            find_queue,
            missing,
        } = snapshot;

        {
            let mut state = self.lock();
            if state.find_issued {
                return Err(StoreError::State {
                    reason: "state must be hydrated before the first find".to_string(),
                });
            }

            let records: HashMap<RecordHandle, Record> = records.into_iter().collect();
            let mut maps: HashMap<String, HashMap<String, RecordHandle>> = HashMap::new();
            let mut kept_groups: HashMap<String, Vec<RecordHandle>> = HashMap::new();
            for (record_type, handles) in groups {
                let map = maps.entry(record_type.clone()).or_default();
                let group = kept_groups.entry(record_type).or_default();
                for handle in handles {
                    let Some(id) = records.get(&handle).and_then(|r| r.id.clone()) else {
                        continue;
                    };
                    if map.insert(id, handle).is_none() {
                        group.push(handle);
                    }
                }
            }

            let highest = records.keys().map(RecordHandle::as_u64).max().unwrap_or(0);
            state.cache.next_handle = next_handle.max(highest);
            state.cache.records = records;
            state.cache.groups = kept_groups;
            state.cache.maps = maps;
            state.cache.found_all = found_all.into_iter().collect();

            state.class_cache = class_cache
                .into_iter()
                .map(|record_type| {
                    let model = self.registry.class_for(&record_type);
                    (record_type, model)
                })
                .collect();

            state.missing.clear();
            for entry in missing {
                state.missing.register(
                    &entry.record_type,
                    &entry.id,
                    Dependent::Record(entry.dependent),
                    &entry.field,
                );
            }
            state.deferred.clear();
        }

        if !find_queue.is_empty() {
            warn!(count = find_queue.len(), "Dropping in-flight requests from transferred state");
        }
        self.set_generation(generation);
        debug!(generation, "Store state restored");
        Ok(())
    }

    /// Serialize this store's state into `state_box` under its namespace.
    pub fn put_state(&self, state_box: &mut StateBox) -> StoreResult<()> {
        let value = serde_json::to_value(self.snapshot()).map_err(|e| StoreError::State {
            reason: e.to_string(),
        })?;
        state_box.put(self.config.state_namespace.clone(), value);
        Ok(())
    }

    /// Restore from `state_box`. Returns `false` when it holds nothing for this store.
    pub fn hydrate(&self, state_box: &StateBox) -> StoreResult<bool> {
        let Some(value) = state_box.get(&self.config.state_namespace) else {
            return Ok(false);
        };
        let snapshot: StoreSnapshot = serde_json::from_value(value.clone()).map_err(|e| StoreError::State {
            reason: e.to_string(),
        })?;
        self.restore(snapshot)?;
        Ok(true)
    }
}
