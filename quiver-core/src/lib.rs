//! QUIVER Core - Record and Transport Types
//!
//! Data structures shared by every quiver crate: records and their handles,
//! normalized nodes, collections, the error taxonomy, store configuration,
//! the transport contract and the model registry.
//! Engine behavior lives in `quiver-store`.

pub mod collection;
pub mod config;
pub mod error;
pub mod headers;
pub mod model;
pub mod options;
pub mod record;
pub mod transport;
pub mod url_options;

pub use collection::Collection;
pub use config::{ConfigError, StoreConfig, DEFAULT_META_KEYS, DEFAULT_NEVER_MISSING};
pub use error::{
    ApiError, GenericError, StoreError, StoreResult, TransportError, TransportMeta,
    ValidationError,
};
pub use headers::Headers;
pub use model::{CacheLookup, MangleFn, ModelDescriptor, ModelRegistry, SchemaView};
pub use options::{FindOptions, RequestBody, RequestOptions, TypeifyOptions};
pub use record::{id_from_value, LiveView, Node, Record, RecordHandle};
pub use transport::{
    FailureKind, Method, Transport, TransportFailure, TransportRequest, TransportResponse,
};
pub use url_options::url_options;

/// Type name used for schema records.
pub const SCHEMA_TYPE: &str = "schema";

/// Type name that marks a payload as a collection.
pub const COLLECTION_TYPE: &str = "collection";

/// Canonical form of a type name: trimmed and ASCII-lowercased.
pub fn normalize_type(record_type: &str) -> String {
    record_type.trim().to_ascii_lowercase()
}

/// Percent-encode a single URL path or query component.
pub fn encode_component(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}
