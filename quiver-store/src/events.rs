//! Change notifications broadcast by a store.

use quiver_core::RecordHandle;

/// Capacity of the broadcast channel. Slow subscribers lag rather than block.
pub(crate) const EVENT_CAPACITY: usize = 256;

/// Something observable happened to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A record was indexed in a type's group for the first time.
    Added {
        record_type: String,
        handle: RecordHandle,
    },
    /// A record left a type's group.
    Removed {
        record_type: String,
        handle: RecordHandle,
    },
    /// A missing reference held by `handle` under `field` can now be resolved.
    FieldInvalidated { handle: RecordHandle, field: String },
    /// Every cache structure was wiped.
    Reset { generation: u64 },
}

impl StoreEvent {
    pub fn handle(&self) -> Option<RecordHandle> {
        match self {
            StoreEvent::Added { handle, .. }
            | StoreEvent::Removed { handle, .. }
            | StoreEvent::FieldInvalidated { handle, .. } => Some(*handle),
            StoreEvent::Reset { .. } => None,
        }
    }
}
