//! Transport contract between the store and the network.
//!
//! The transport performs exactly one HTTP exchange and hands back the raw
//! response text. It never decodes bodies: the store decides when and how a
//! body is normalized.

use crate::headers::Headers;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully resolved request handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub url: String,
    pub method: Method,
    pub headers: Headers,
    pub timeout: Duration,
    /// Already-serialized request body.
    pub body: Option<String>,
}

/// A successful (2xx) response with its undecoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Option<String>,
}

impl TransportResponse {
    pub fn new(status: u16, body: Option<String>) -> Self {
        Self { status, body }
    }
}

/// Why a transport exchange failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The request did not complete within its timeout.
    Timeout,
    /// Connection-level failure with the transport's message.
    Network(String),
    /// The server answered with a non-success status.
    Status,
}

/// A failed exchange, carrying whatever the server sent back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
    pub status: Option<u16>,
    pub kind: FailureKind,
    pub body: Option<String>,
}

impl TransportFailure {
    pub fn timeout() -> Self {
        Self {
            status: None,
            kind: FailureKind::Timeout,
            body: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            kind: FailureKind::Network(message.into()),
            body: None,
        }
    }

    pub fn status(status: u16, body: Option<String>) -> Self {
        Self {
            status: Some(status),
            kind: FailureKind::Status,
            body,
        }
    }
}

/// Performs HTTP exchanges on behalf of the store.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one request.
    ///
    /// # Returns
    /// * `Ok(TransportResponse)` - 2xx status with the raw body
    /// * `Err(TransportFailure)` - timeout, network failure or non-2xx status
    async fn perform(&self, request: TransportRequest) -> Result<TransportResponse, TransportFailure>;
}
