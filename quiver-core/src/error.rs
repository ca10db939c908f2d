//! Error types for quiver store operations
//!
//! Every error is `Clone` so a coalesced request can hand the same failure to
//! all of its waiters.

use crate::record::RecordHandle;
use crate::transport::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Caller mistakes, rejected before any network activity.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("type not specified")]
    TypeNotSpecified,

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Schema for {record_type} has no {relation} link")]
    MissingSchemaLink {
        record_type: String,
        relation: String,
    },
}

/// Request metadata kept on every failure for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportMeta {
    pub method: Method,
    pub url: String,
    pub status: Option<u16>,
}

impl TransportMeta {
    pub fn new(method: Method, url: impl Into<String>, status: Option<u16>) -> Self {
        Self {
            method,
            url: url.into(),
            status,
        }
    }
}

/// Timeout or network failure reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub code: Option<String>,
    pub status: Option<u16>,
    pub message: String,
    pub detail: Option<String>,
    pub meta: TransportMeta,
}

impl TransportError {
    /// Build the structured timeout error for a request.
    pub fn timeout(meta: TransportMeta, timeout_ms: u64) -> Self {
        let seconds = timeout_ms as f64 / 1000.0;
        Self {
            code: Some("Timeout".to_string()),
            status: meta.status,
            message: format!("API request timeout ({} sec)", seconds),
            detail: Some(format!("{} {}", meta.method, meta.url)),
            meta,
        }
    }

    pub fn network(meta: TransportMeta, message: impl Into<String>) -> Self {
        Self {
            code: None,
            status: meta.status,
            message: message.into(),
            detail: None,
            meta,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.code.as_deref() == Some("Timeout")
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = &self.code {
            write!(f, "{}: ", code)?;
        }
        write!(f, "{}", self.message)?;
        if let Some(detail) = &self.detail {
            write!(f, " ({})", detail)?;
        }
        Ok(())
    }
}

impl std::error::Error for TransportError {}

/// Structured error body returned by the API, normalized into a typed record.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub status: Option<u16>,
    pub code: Option<String>,
    pub message: Option<String>,
    pub detail: Option<String>,
    /// Handle of the error record when the body carried an id and was cached.
    pub record: Option<RecordHandle>,
    /// The error record's fields as plain JSON.
    pub fields: Map<String, Value>,
    pub meta: TransportMeta,
}

impl ApiError {
    /// Build an API error from the fields of a normalized error body.
    ///
    /// The body's own `status` wins over the transport status.
    pub fn from_fields(
        fields: Map<String, Value>,
        record: Option<RecordHandle>,
        meta: TransportMeta,
    ) -> Self {
        let text = |key: &str| fields.get(key).and_then(Value::as_str).map(str::to_string);
        let status = fields
            .get("status")
            .and_then(Value::as_u64)
            .and_then(|s| u16::try_from(s).ok())
            .or(meta.status);
        Self {
            status,
            code: text("code"),
            message: text("message"),
            detail: text("detail"),
            record,
            fields,
            meta,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {}", status)?,
            None => write!(f, "HTTP ?")?,
        }
        if let Some(code) = &self.code {
            write!(f, " {}", code)?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

/// Failure whose body could not be interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericError {
    pub status: Option<u16>,
    pub message: String,
    pub meta: TransportMeta,
}

impl fmt::Display for GenericError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {}: {}", status, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for GenericError {}

/// Master error type for all store operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Request failed: {0}")]
    Generic(#[from] GenericError),

    #[error("State transfer failed: {reason}")]
    State { reason: String },
}

impl StoreError {
    /// Transport metadata of the failed request, when there was one.
    pub fn meta(&self) -> Option<&TransportMeta> {
        match self {
            StoreError::Transport(err) => Some(&err.meta),
            StoreError::Api(err) => Some(&err.meta),
            StoreError::Generic(err) => Some(&err.meta),
            StoreError::Validation(_) | StoreError::State { .. } => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            StoreError::Transport(err) => err.status,
            StoreError::Api(err) => err.status,
            StoreError::Generic(err) => err.status,
            StoreError::Validation(_) | StoreError::State { .. } => None,
        }
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// TESTS
// =============================================================================
