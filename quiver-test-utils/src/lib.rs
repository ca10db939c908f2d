//! QUIVER Test Utilities
//!
//! Shared test infrastructure for the QUIVER workspace:
//! - A scripted mock transport with a call log
//! - JSON fixtures for schemas, records, collections and error bodies
//! - Proptest generators
//! - Assertions for store results

pub use quiver_core::{
    Headers, Method, StoreError, StoreResult, Transport, TransportFailure, TransportRequest,
    TransportResponse,
};

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// MOCK TRANSPORT
// ============================================================================

/// A scripted reply.
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    /// JSON body with a status. Statuses >= 400 are failures.
    Json(u16, Value),
    /// Raw text body with a status. Statuses >= 400 are failures.
    Text(u16, String),
    /// 204 with no body.
    NoContent,
    Timeout,
    Network(String),
    /// Wait, then reply.
    Delayed(Duration, Box<MockReply>),
}

impl MockReply {
    pub fn json(status: u16, body: Value) -> Self {
        MockReply::Json(status, body)
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        MockReply::Text(status, body.into())
    }
}

fn respond(status: u16, body: String) -> Result<TransportResponse, TransportFailure> {
    if status >= 400 {
        Err(TransportFailure::status(status, Some(body)))
    } else {
        Ok(TransportResponse::new(status, Some(body)))
    }
}

/// In-memory transport keyed by `(method, url)`.
///
/// Routes are sticky: a route answers every call with the same reply. Each
/// call yields to the runtime once before answering, so concurrently started
/// requests are all in flight together. Unknown routes answer 404.
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<(Method, String), MockReply>>,
    calls: Mutex<Vec<TransportRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, method: Method, url: impl Into<String>, reply: MockReply) -> Self {
        self.set_route(method, url, reply);
        self
    }

    /// Add or replace a route on a shared transport.
    pub fn set_route(&self, method: Method, url: impl Into<String>, reply: MockReply) {
        self.routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((method, url.into()), reply);
    }

    /// Every request received so far, in order.
    pub fn calls(&self) -> Vec<TransportRequest> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Number of requests received for one URL, any method.
    pub fn calls_to(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|call| call.url == url)
            .count()
    }

    async fn answer(reply: MockReply) -> Result<TransportResponse, TransportFailure> {
        let mut reply = reply;
        while let MockReply::Delayed(delay, inner) = reply {
            tokio::time::sleep(delay).await;
            reply = *inner;
        }
        match reply {
            MockReply::Json(status, body) => respond(status, body.to_string()),
            MockReply::Text(status, body) => respond(status, body),
            MockReply::NoContent => Ok(TransportResponse::new(204, None)),
            MockReply::Timeout => Err(TransportFailure::timeout()),
            MockReply::Network(message) => Err(TransportFailure::network(message)),
            MockReply::Delayed(..) => Err(TransportFailure::network("unreachable delayed reply")),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn perform(&self, request: TransportRequest) -> Result<TransportResponse, TransportFailure> {
        let reply = self
            .routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(request.method, request.url.clone()))
            .cloned();
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        tokio::task::yield_now().await;

        match reply {
            Some(reply) => Self::answer(reply).await,
            None => respond(
                404,
                json!({
                    "type": "error",
                    "status": 404,
                    "code": "NotFound",
                    "message": format!("no route for {} {}", request.method, request.url),
                })
                .to_string(),
            ),
        }
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! JSON payloads shaped like the API's responses.

    use super::*;

    /// A schema record whose `collection` link is `collection_url`.
    pub fn schema_json(record_type: &str, collection_url: &str) -> Value {
        json!({
            "type": "schema",
            "id": record_type,
            "links": {"collection": collection_url},
            "resourceFields": {},
        })
    }

    /// A schema record with an explicit list of fields to normalize.
    pub fn schema_with_typeify(record_type: &str, collection_url: &str, fields: &[&str]) -> Value {
        let mut schema = schema_json(record_type, collection_url);
        schema["typeifyFields"] = json!(fields);
        schema
    }

    /// A record payload; `extra` must be an object and is merged in.
    pub fn record_json(record_type: &str, id: &str, extra: Value) -> Value {
        let mut record = json!({"type": record_type, "id": id});
        if let (Some(out), Value::Object(extra)) = (record.as_object_mut(), extra) {
            out.extend(extra);
        }
        record
    }

    /// A collection page of `members`, linking to `next` when given.
    pub fn collection_json(resource_type: &str, members: Vec<Value>, next: Option<&str>) -> Value {
        json!({
            "type": "collection",
            "resourceType": resource_type,
            "pagination": {"next": next},
            "data": members,
        })
    }

    /// A structured API error body.
    pub fn error_json(status: u16, code: &str, message: &str) -> Value {
        json!({
            "type": "error",
            "status": status,
            "code": code,
            "message": message,
        })
    }
}

pub use fixtures::{collection_json, error_json, record_json, schema_json, schema_with_typeify};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for payloads.

    use proptest::prelude::*;
    use serde_json::{Map, Value};

    /// A non-empty record id.
    pub fn arb_record_id() -> impl Strategy<Value = String> {
        "[a-z0-9]{1,12}"
    }

    /// A lowercase type name.
    pub fn arb_type_name() -> impl Strategy<Value = String> {
        "[a-z]{3,10}".prop_filter("reserved type", |name| name != "schema" && name != "collection" && name != "error")
    }

    /// A scalar JSON value.
    pub fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(|n| Value::from(n)),
            "[a-zA-Z0-9 ]{0,16}".prop_map(Value::String),
        ]
    }

    /// Plain record fields, never touching keys the store interprets.
    pub fn arb_plain_fields() -> impl Strategy<Value = Map<String, Value>> {
        prop::collection::btree_map("[a-z]{1,6}", arb_scalar(), 0..6).prop_map(|fields| {
            fields
                .into_iter()
                .filter(|(key, _)| key != "id" && key != "type")
                .collect()
        })
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for store results.

    use super::*;

    pub fn assert_ok<T: std::fmt::Debug>(result: &StoreResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    pub fn assert_err<T: std::fmt::Debug>(result: &StoreResult<T>) {
        assert!(result.is_err(), "Expected Err, got Ok: {:?}", result);
    }

    pub fn assert_validation_error<T: std::fmt::Debug>(result: &StoreResult<T>) {
        assert!(
            matches!(result, Err(StoreError::Validation(_))),
            "Expected ValidationError, got: {:?}",
            result
        );
    }

    pub fn assert_transport_error<T: std::fmt::Debug>(result: &StoreResult<T>) {
        assert!(
            matches!(result, Err(StoreError::Transport(_))),
            "Expected TransportError, got: {:?}",
            result
        );
    }

    pub fn assert_api_error<T: std::fmt::Debug>(result: &StoreResult<T>, status: u16) {
        match result {
            Err(StoreError::Api(err)) => {
                assert_eq!(err.status, Some(status), "Wrong API error status")
            }
            other => panic!("Expected ApiError, got: {:?}", other),
        }
    }

    /// The headers of a recorded call contain `name: value`.
    pub fn assert_header(request: &TransportRequest, name: &str, value: &str) {
        assert_eq!(
            request.headers.get(name),
            Some(value),
            "Header {} on {} {}",
            name,
            request.method,
            request.url
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(url: &str) -> TransportRequest {
        TransportRequest {
            url: url.to_string(),
            method: Method::Get,
            headers: Headers::json_defaults(),
            timeout: Duration::from_secs(1),
            body: None,
        }
    }

    #[tokio::test]
    async fn test_mock_routes_and_call_log() {
        let mock = MockTransport::new()
            .route(Method::Get, "/v1/a", MockReply::json(200, json!({"ok": true})))
            .route(Method::Get, "/v1/b", MockReply::text(500, "boom"));

        let ok = mock.perform(get("/v1/a")).await.unwrap();
        assert_eq!(ok.status, 200);
        assert_eq!(ok.body.as_deref(), Some(r#"{"ok":true}"#));

        let failed = mock.perform(get("/v1/b")).await.unwrap_err();
        assert_eq!(failed.status, Some(500));
        assert_eq!(failed.body.as_deref(), Some("boom"));

        let missing = mock.perform(get("/v1/c")).await.unwrap_err();
        assert_eq!(missing.status, Some(404));

        assert_eq!(mock.call_count(), 3);
        assert_eq!(mock.calls_to("/v1/a"), 1);
    }

    #[test]
    fn test_fixtures_shape() {
        let record = record_json("widget", "1", json!({"name": "a"}));
        assert_eq!(record, json!({"type": "widget", "id": "1", "name": "a"}));
        let schema = schema_with_typeify("widget", "/v1/widgets", &["owner"]);
        assert_eq!(schema["typeifyFields"], json!(["owner"]));
        let page = collection_json("widget", vec![record], Some("/v1/widgets?page=2"));
        assert_eq!(page["pagination"]["next"], json!("/v1/widgets?page=2"));
    }
}
