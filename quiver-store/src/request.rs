//! Request orchestration: URL and header preparation, the timed transport
//! call, and classification of the outcome.

use crate::store::Store;
use futures_util::future::{BoxFuture, FutureExt};
use quiver_core::{
    ApiError, FailureKind, GenericError, Headers, Node, RequestBody, RequestOptions, StoreError,
    StoreResult, TransportError, TransportFailure, TransportMeta, TransportRequest,
    TransportResponse, TypeifyOptions, ValidationError,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

fn is_absolute(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

impl Store {
    /// Resolve a request URL.
    ///
    /// With `including_absolute`, absolute URLs under the configured origin
    /// become root-relative. Relative URLs are placed under the base path.
    pub fn normalize_url(&self, url: &str, including_absolute: bool) -> String {
        let mut url = url.to_string();

        if including_absolute {
            if let Some(origin) = self.config.origin.as_deref().map(|o| o.trim_end_matches('/')) {
                if let Some(rest) = url.strip_prefix(origin) {
                    if rest.is_empty() || rest.starts_with('/') || rest.starts_with('?') {
                        url = format!("/{}", rest.trim_start_matches('/'));
                    }
                }
            }
        }

        if !is_absolute(&url) && !url.starts_with('/') {
            url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), url);
        }
        url
    }

    /// JSON defaults, then store-wide headers, then `extra`; later wins.
    pub fn merged_headers(&self, extra: &Headers) -> Headers {
        let mut headers = Headers::json_defaults();
        headers.merge(&self.config.headers);
        headers.merge(extra);
        headers
    }

    /// Canonical request signature: merged headers followed by the URL.
    pub(crate) fn signature(&self, headers: &Headers, url: &str) -> String {
        format!(
            "{}{}",
            self.merged_headers(headers).canonical(),
            self.normalize_url(url, false)
        )
    }

    /// Turn request options into exactly what the transport will send.
    pub fn prepare_request(&self, opts: &RequestOptions) -> StoreResult<TransportRequest> {
        let body = match &opts.body {
            None => None,
            Some(RequestBody::Text(text)) => Some(text.clone()),
            Some(RequestBody::Json(value)) => {
                Some(serde_json::to_string(value).map_err(|e| ValidationError::InvalidValue {
                    field: "body".to_string(),
                    reason: e.to_string(),
                })?)
            }
        };
        Ok(TransportRequest {
            url: self.normalize_url(&opts.url, false),
            method: opts.method,
            headers: self.merged_headers(&opts.headers),
            timeout: opts.timeout.unwrap_or_else(|| self.config.default_timeout()),
            body,
        })
    }

    /// One transport exchange, bounded by the request's timeout.
    ///
    /// The body is returned undecoded.
    pub async fn raw_request(&self, request: TransportRequest) -> Result<TransportResponse, TransportFailure> {
        let limit = request.timeout;
        match tokio::time::timeout(limit, self.transport.perform(request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(TransportFailure::timeout()),
        }
    }

    /// Issue a request and normalize whatever comes back.
    ///
    /// Not coalesced; `find` is.
    pub fn request(&self, opts: RequestOptions) -> BoxFuture<'_, StoreResult<Node>> {
        self.request_inner(opts).boxed()
    }

    async fn request_inner(&self, opts: RequestOptions) -> StoreResult<Node> {
        let mut opts = opts;
        opts.url = self.normalize_url(&opts.url, false);
        if let Some(hook) = &self.request_hook {
            opts = hook(opts);
        }

        let prepared = self.prepare_request(&opts)?;
        let timeout = prepared.timeout;
        let meta = TransportMeta::new(prepared.method, prepared.url.clone(), None);
        debug!(method = %meta.method, url = %meta.url, "Request started");

        match self.raw_request(prepared).await {
            Ok(response) => self.request_succeeded(response, &opts, meta).await,
            Err(failure) => {
                let err = self.request_failed(failure, timeout, meta);
                warn!(error = %err, "Request failed");
                Err(err)
            }
        }
    }

    async fn request_succeeded(
        &self,
        response: TransportResponse,
        opts: &RequestOptions,
        mut meta: TransportMeta,
    ) -> StoreResult<Node> {
        meta.status = Some(response.status);
        if response.status == 204 {
            debug!(url = %meta.url, "Request returned no content");
            return Ok(Node::null());
        }

        let body = response.body.unwrap_or_default();
        let value = match serde_json::from_str::<Value>(&body) {
            Ok(value) => value,
            Err(_) if body.is_empty() => return Ok(Node::null()),
            Err(_) => return Ok(Node::Plain(Value::String(body))),
        };
        if !value.is_object() && !value.is_array() {
            return Ok(Node::Plain(value));
        }

        let node = self.typeify(&value, &TypeifyOptions::default());
        if !opts.include.is_empty() {
            self.note_included(&node, &opts.include);
        }

        if opts.depaginate {
            if let Node::Collection(collection) = &node {
                if collection.next_page().is_some() {
                    return self.depaginate(Arc::clone(collection), opts).await;
                }
            }
        }
        debug!(url = %meta.url, status = response.status, "Request succeeded");
        Ok(node)
    }

    fn request_failed(&self, failure: TransportFailure, timeout: Duration, mut meta: TransportMeta) -> StoreError {
        meta.status = failure.status;
        match failure.kind {
            FailureKind::Timeout => {
                let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                TransportError::timeout(meta, millis).into()
            }
            FailureKind::Network(message) => TransportError::network(meta, message).into(),
            FailureKind::Status => {
                let body = failure.body.unwrap_or_default();
                match serde_json::from_str::<Value>(&body) {
                    Ok(value @ Value::Object(_)) => {
                        let node = self.typeify(&value, &TypeifyOptions::default());
                        self.api_error(&node, meta).into()
                    }
                    _ => GenericError {
                        status: failure.status,
                        message: body,
                        meta,
                    }
                    .into(),
                }
            }
        }
    }

    fn api_error(&self, node: &Node, meta: TransportMeta) -> ApiError {
        let fields = match self.to_json(node) {
            Value::Object(fields) => fields,
            _ => Map::new(),
        };
        ApiError::from_fields(fields, node.as_record(), meta)
    }
}
