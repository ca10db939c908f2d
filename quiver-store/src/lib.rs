//! QUIVER Store - Caching and Normalization Engine
//!
//! An in-memory cache of typed API records sitting in front of a REST API.
//!
//! - Records are cached by `(type, id)` and updated in place on re-fetch, so
//!   a [`RecordHandle`](quiver_core::RecordHandle) stays valid for its whole
//!   lifetime.
//! - Concurrent identical finds share a single transport call.
//! - Nested and paginated JSON is normalized into records and collections.
//! - Dependents waiting on a record that is not cached yet are notified when
//!   it arrives.
//!
//! Everything hangs off one explicit [`Store`] context object.

mod cache;
mod coalesce;
mod depaginate;
pub mod events;
mod find;
pub mod missing;
mod render;
mod request;
pub mod state;
mod store;
mod typeify;

pub use events::StoreEvent;
pub use missing::{Dependent, FieldObserver};
pub use state::{StateBox, StoreSnapshot};
pub use store::{RequestHook, Store};

pub use quiver_core::{
    ApiError, Collection, FindOptions, GenericError, Headers, LiveView, Method, ModelDescriptor,
    ModelRegistry, Node, Record, RecordHandle, RequestOptions, StoreConfig, StoreError,
    StoreResult, TransportError, TypeifyOptions, ValidationError,
};
