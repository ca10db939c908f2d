//! Option types for find, request and normalization calls.

use crate::headers::Headers;
use crate::transport::Method;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Options recognized by `find` and `find_all`.
#[derive(Debug, Clone, PartialEq)]
pub struct FindOptions {
    /// Filter by fields; each value becomes one `key=value` query pair.
    pub filter: BTreeMap<String, Vec<String>>,
    /// Link names to include in the response.
    pub include: Vec<String>,
    /// Ask the server even if the answer is already cached.
    pub force_reload: bool,
    /// Records per page. Defaults to the store page size for list fetches.
    pub limit: Option<u32>,
    /// Follow pagination links and assemble every page.
    pub depaginate: bool,
    pub headers: Headers,
    /// Fetch this URL instead of resolving one from the type's schema.
    pub url: Option<String>,
    /// After a complete list fetch, evict cached records the server no longer returns.
    pub remove_missing: bool,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            filter: BTreeMap::new(),
            include: Vec::new(),
            force_reload: false,
            limit: None,
            depaginate: true,
            headers: Headers::new(),
            url: None,
            remove_missing: false,
            sort_by: None,
            sort_order: None,
        }
    }
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn force_reload(mut self) -> Self {
        self.force_reload = true;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn no_depaginate(mut self) -> Self {
        self.depaginate = false;
        self
    }

    pub fn filter(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter
            .entry(field.into())
            .or_default()
            .push(value.into());
        self
    }

    pub fn include(mut self, link: impl Into<String>) -> Self {
        self.include.push(link.into());
        self
    }

    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn remove_missing(mut self) -> Self {
        self.remove_missing = true;
        self
    }

    pub fn sort(mut self, by: impl Into<String>, order: Option<&str>) -> Self {
        self.sort_by = Some(by.into());
        self.sort_order = order.map(str::to_string);
        self
    }

    /// Whether a result for these options may be answered from cache.
    ///
    /// Filtered or include-augmented fetches, and fetches that stop at the
    /// first page, are never cacheable.
    pub fn is_cacheable(&self) -> bool {
        self.depaginate && self.filter.is_empty() && self.include.is_empty()
    }
}

/// Body of an outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Serialized to JSON text before it reaches the transport.
    Json(Value),
    /// Sent verbatim.
    Text(String),
}

/// Options for a single store request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    pub url: String,
    pub method: Method,
    pub headers: Headers,
    pub body: Option<RequestBody>,
    /// `None` uses the store default.
    pub timeout: Option<Duration>,
    pub depaginate: bool,
    pub include: Vec<String>,
}

impl RequestOptions {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::Get,
            headers: Headers::new(),
            body: None,
            timeout: None,
            depaginate: true,
            include: Vec::new(),
        }
    }

    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            ..Self::get(url)
        }
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    pub fn with_text(mut self, body: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Text(body.into()));
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn without_depaginate(mut self) -> Self {
        self.depaginate = false;
        self
    }
}

/// Normalization switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeifyOptions {
    /// Fill missing fields from the schema's create defaults.
    pub apply_defaults: bool,
    /// Merge typed records into the cache.
    pub update_store: bool,
    /// Member array key of a collection payload.
    pub collection_key: String,
}

impl Default for TypeifyOptions {
    fn default() -> Self {
        Self {
            apply_defaults: false,
            update_store: true,
            collection_key: "data".to_string(),
        }
    }
}
