//! End-to-end find, request and cache behavior against a scripted transport.

use quiver_store::{FindOptions, Method, ModelDescriptor, ModelRegistry, Node, Store, StoreConfig, StoreError, StoreEvent, StoreResult, ValidationError};
use quiver_test_utils::assertions::{assert_api_error, assert_header, assert_validation_error};
use quiver_test_utils::{collection_json, error_json, record_json, schema_json, MockReply, MockTransport, Transport};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn transport(mock: &Arc<MockTransport>) -> Arc<dyn Transport> {
    mock.clone()
}

fn store_with(mock: &Arc<MockTransport>) -> Store {
    Store::new(StoreConfig::default(), ModelRegistry::new(), transport(mock))
}

fn widget_ids(store: &Store) -> Vec<String> {
    let mut ids: Vec<String> = store
        .view_records(&store.all("widget"))
        .into_iter()
        .filter_map(|handle| store.record(handle).and_then(|r| r.id))
        .collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn test_concurrent_finds_share_one_request() -> StoreResult<()> {
    let mock = Arc::new(
        MockTransport::new()
            .route(Method::Get, "/v1/schemas/widget", MockReply::json(200, schema_json("widget", "/widgets")))
            .route(
                Method::Get,
                "/widgets/42",
                MockReply::json(200, record_json("widget", "42", json!({"name": "a"}))),
            ),
    );
    let store = store_with(&mock);

    let (first, second) = tokio::join!(
        store.find("widget", Some("42"), FindOptions::new().force_reload()),
        store.find("widget", Some("42"), FindOptions::new()),
    );
    let first = first?;
    assert_eq!(first, second?);
    assert_eq!(mock.calls_to("/widgets/42"), 1);
    assert_eq!(mock.calls_to("/v1/schemas/widget"), 1);
    assert_eq!(store.in_flight(), 0);

    let handle = first.as_record().expect("record result");
    let record = store.record(handle).expect("cached");
    assert_eq!(record.id.as_deref(), Some("42"));
    assert_eq!(record.get_str("name"), Some("a"));
    assert_eq!(store.to_json(&first), json!({"type": "widget", "id": "42", "name": "a"}));
    Ok(())
}

#[tokio::test]
async fn test_cached_record_answers_without_network() -> StoreResult<()> {
    let mock = Arc::new(
        MockTransport::new()
            .route(Method::Get, "/v1/schemas/widget", MockReply::json(200, schema_json("widget", "/v1/widgets")))
            .route(Method::Get, "/v1/widgets/1", MockReply::json(200, record_json("widget", "1", json!({})))),
    );
    let store = store_with(&mock);

    let fetched = store.find("widget", Some("1"), FindOptions::new()).await?;
    let cached = store.find("Widget", Some("1"), FindOptions::new()).await?;
    assert_eq!(fetched, cached);
    assert_eq!(mock.calls_to("/v1/widgets/1"), 1);

    let reloaded = store.find("widget", Some("1"), FindOptions::new().force_reload()).await?;
    assert_eq!(reloaded, fetched);
    assert_eq!(mock.calls_to("/v1/widgets/1"), 2);
    Ok(())
}

#[tokio::test]
async fn test_refetch_updates_record_in_place() -> StoreResult<()> {
    let mock = Arc::new(
        MockTransport::new()
            .route(Method::Get, "/v1/schemas/widget", MockReply::json(200, schema_json("widget", "/v1/widgets")))
            .route(Method::Get, "/v1/widgets/1", MockReply::json(200, record_json("widget", "1", json!({"name": "old"})))),
    );
    let store = store_with(&mock);
    let before = store.find("widget", Some("1"), FindOptions::new()).await?;

    mock.set_route(
        Method::Get,
        "/v1/widgets/1",
        MockReply::json(200, record_json("widget", "1", json!({"name": "new"}))),
    );
    let after = store.find("widget", Some("1"), FindOptions::new().force_reload()).await?;

    assert_eq!(before, after);
    let handle = before.as_record().expect("record");
    assert_eq!(store.with_record(handle, |r| r.get_str("name").map(str::to_string)), Some(Some("new".to_string())));
    assert_eq!(widget_ids(&store), vec!["1"]);
    Ok(())
}

#[tokio::test]
async fn test_three_pages_assemble_into_one_collection() -> StoreResult<()> {
    let page = |ids: [&str; 2], next: Option<&str>| {
        collection_json(
            "widget",
            ids.iter().map(|id| record_json("widget", id, json!({}))).collect(),
            next,
        )
    };
    let mock = Arc::new(
        MockTransport::new()
            .route(Method::Get, "/v1/widgets?limit=1000", MockReply::json(200, page(["1", "2"], Some("/v1/widgets?limit=1000&marker=2"))))
            .route(Method::Get, "/v1/widgets?limit=1000&marker=2", MockReply::json(200, page(["3", "4"], Some("/v1/widgets?limit=1000&marker=4"))))
            .route(Method::Get, "/v1/widgets?limit=1000&marker=4", MockReply::json(200, page(["5", "6"], None))),
    );
    let store = store_with(&mock);
    store.bulk_add("schema", vec![schema_json("widget", "/v1/widgets")]);

    let result = store.find("widget", None, FindOptions::new()).await?;
    let collection = result.as_collection().expect("collection result");
    assert_eq!(collection.len(), 6);
    assert_eq!(collection.next_page(), None);
    assert_eq!(mock.call_count(), 3);
    assert!(store.have_all("widget"));

    let again = store.find("widget", None, FindOptions::new()).await?;
    assert_eq!(again, Node::Live(store.all("widget")));
    assert_eq!(mock.call_count(), 3);
    assert_eq!(widget_ids(&store), vec!["1", "2", "3", "4", "5", "6"]);
    Ok(())
}

#[tokio::test]
async fn test_no_depaginate_stops_at_first_page() -> StoreResult<()> {
    let mock = Arc::new(MockTransport::new().route(
        Method::Get,
        "/v1/widgets?limit=2",
        MockReply::json(
            200,
            collection_json("widget", vec![record_json("widget", "1", json!({}))], Some("/v1/widgets?limit=2&marker=1")),
        ),
    ));
    let store = store_with(&mock);
    store.bulk_add("schema", vec![schema_json("widget", "/v1/widgets")]);

    let result = store.find("widget", None, FindOptions::new().limit(2).no_depaginate()).await?;
    let collection = result.as_collection().expect("collection");
    assert_eq!(collection.len(), 1);
    assert_eq!(collection.next_page(), Some("/v1/widgets?limit=2&marker=1"));
    assert!(!store.have_all("widget"));
    assert_eq!(mock.call_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_pagination_loop_is_cut() -> StoreResult<()> {
    let mock = Arc::new(
        MockTransport::new()
            .route(
                Method::Get,
                "/v1/widgets?limit=1000",
                MockReply::json(200, collection_json("widget", vec![record_json("widget", "1", json!({}))], Some("/v1/widgets?page=2"))),
            )
            .route(
                Method::Get,
                "/v1/widgets?page=2",
                MockReply::json(200, collection_json("widget", vec![record_json("widget", "2", json!({}))], Some("/v1/widgets?page=2"))),
            ),
    );
    let store = store_with(&mock);
    store.bulk_add("schema", vec![schema_json("widget", "/v1/widgets")]);

    let result = store.find("widget", None, FindOptions::new()).await?;
    assert_eq!(result.as_collection().map(|c| c.len()), Some(2));
    assert_eq!(mock.call_count(), 2);
    Ok(())
}

#[tokio::test]
async fn test_remove_missing_evicts_stale_records() -> StoreResult<()> {
    let mock = Arc::new(MockTransport::new().route(
        Method::Get,
        "/v1/containers?limit=1000",
        MockReply::json(
            200,
            collection_json(
                "container",
                vec![
                    record_json("container", "1", json!({"baseType": "instance"})),
                    record_json("container", "2", json!({"baseType": "instance"})),
                ],
                None,
            ),
        ),
    ));
    let store = store_with(&mock);
    store.bulk_add("schema", vec![schema_json("container", "/v1/containers")]);
    for id in ["1", "2", "3"] {
        store.typeify(
            &record_json("container", id, json!({"baseType": "instance"})),
            &Default::default(),
        );
    }
    let stale = store.get_by_id("container", "3").expect("seeded");
    let mut events = store.subscribe();

    store.find_all("container", FindOptions::new().remove_missing()).await?;

    assert!(store.get_by_id("container", "1").is_some());
    assert!(store.get_by_id("container", "2").is_some());
    assert!(store.get_by_id("container", "3").is_none());
    assert!(store.get_by_id("instance", "3").is_none());
    assert!(store.get_by_id("instance", "1").is_some());
    assert!(store.record(stale).is_none());

    let mut removed = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let StoreEvent::Removed { record_type, handle } = event {
            removed.push((record_type, handle));
        }
    }
    assert_eq!(
        removed,
        vec![("container".to_string(), stale), ("instance".to_string(), stale)]
    );
    Ok(())
}

#[tokio::test]
async fn test_filtered_find_is_not_a_full_fetch() -> StoreResult<()> {
    let mock = Arc::new(MockTransport::new().route(
        Method::Get,
        "/v1/widgets?state=active&limit=1000",
        MockReply::json(200, collection_json("widget", vec![], None)),
    ));
    let store = store_with(&mock);
    store.bulk_add("schema", vec![schema_json("widget", "/v1/widgets")]);

    store.find("widget", None, FindOptions::new().filter("state", "active")).await?;
    store.find("widget", None, FindOptions::new().filter("state", "active")).await?;
    assert!(!store.have_all("widget"));
    assert_eq!(mock.call_count(), 2);
    Ok(())
}

#[tokio::test]
async fn test_model_headers_and_defaults_reach_the_wire() -> StoreResult<()> {
    let mock = Arc::new(
        MockTransport::new()
            .route(
                Method::Get,
                "/v1/widgets?limit=1000&sort=name",
                MockReply::json(200, collection_json("widget", vec![], None)),
            )
            .route(
                Method::Get,
                "/v1/widgets?limit=25&sort=name",
                MockReply::json(200, collection_json("widget", vec![], None)),
            ),
    );
    let registry = ModelRegistry::new().with_model(
        ModelDescriptor::new("widget")
            .with_header("X-Kind", "widget")
            .with_default_limit(25)
            .with_default_sort("name", None),
    );
    let store = Store::new(
        StoreConfig::default().with_header("x-kind", "store").with_header("x-tenant", "t1"),
        registry,
        transport(&mock),
    );
    store.bulk_add("schema", vec![schema_json("widget", "/v1/widgets")]);

    store.find("widget", None, FindOptions::new().header("x-trace", "abc")).await?;
    let calls = mock.calls();
    assert_eq!(calls.len(), 1);
    assert_header(&calls[0], "x-kind", "widget");
    assert_header(&calls[0], "x-tenant", "t1");
    assert_header(&calls[0], "x-trace", "abc");
    assert_header(&calls[0], "accept", "application/json");

    // The store page size wins over the model default for lists; an explicit
    // limit wins over both.
    assert_eq!(mock.calls_to("/v1/widgets?limit=1000&sort=name"), 1);
    store
        .find("widget", None, FindOptions::new().limit(25).force_reload())
        .await?;
    assert_eq!(mock.calls_to("/v1/widgets?limit=25&sort=name"), 1);
    Ok(())
}

#[tokio::test]
async fn test_dropped_leader_hands_the_request_to_its_waiter() -> StoreResult<()> {
    let mock = Arc::new(MockTransport::new().route(
        Method::Get,
        "/v1/widgets/1",
        MockReply::Delayed(
            Duration::from_millis(40),
            Box::new(MockReply::json(200, record_json("widget", "1", json!({"name": "a"})))),
        ),
    ));
    let store = store_with(&mock);
    store.bulk_add("schema", vec![schema_json("widget", "/v1/widgets")]);

    let (leader, waiter) = tokio::join!(
        tokio::time::timeout(
            Duration::from_millis(5),
            store.find("widget", Some("1"), FindOptions::new()),
        ),
        async {
            tokio::task::yield_now().await;
            store.find("widget", Some("1"), FindOptions::new()).await
        },
    );
    assert!(leader.is_err(), "leader should have timed out");

    let node = waiter?;
    assert_eq!(node.as_record(), store.get_by_id("widget", "1"));
    assert_eq!(store.to_json(&node), json!({"type": "widget", "id": "1", "name": "a"}));
    assert_eq!(mock.calls_to("/v1/widgets/1"), 2);
    assert_eq!(store.in_flight(), 0);
    Ok(())
}

#[tokio::test]
async fn test_explicit_url_skips_schema_lookup() -> StoreResult<()> {
    let mock = Arc::new(MockTransport::new().route(
        Method::Get,
        "/v1/settings/ui",
        MockReply::json(200, record_json("setting", "ui", json!({"value": "dark"}))),
    ));
    let store = store_with(&mock);
    let node = store
        .find("setting", Some("ui"), FindOptions::new().url("settings/ui"))
        .await?;
    assert_eq!(node.as_record(), store.get_by_id("setting", "ui"));
    assert_eq!(mock.call_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_find_without_type_is_rejected() {
    let mock = Arc::new(MockTransport::new());
    let store = store_with(&mock);
    let result = store.find("  ", Some("1"), FindOptions::new()).await;
    assert_validation_error(&result);
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn test_schema_without_collection_link() {
    let mock = Arc::new(MockTransport::new().route(
        Method::Get,
        "/v1/schemas/widget",
        MockReply::json(200, json!({"type": "schema", "id": "widget", "links": {}})),
    ));
    let store = store_with(&mock);
    let result = store.find("widget", Some("1"), FindOptions::new()).await;
    assert!(matches!(
        result,
        Err(StoreError::Validation(ValidationError::MissingSchemaLink { ref relation, .. })) if relation == "collection"
    ));
}

#[tokio::test]
async fn test_failure_reaches_every_waiter() {
    let mock = Arc::new(MockTransport::new().route(
        Method::Get,
        "/v1/widgets/9",
        MockReply::json(404, error_json(404, "NotFound", "no widget 9")),
    ));
    let store = store_with(&mock);
    store.bulk_add("schema", vec![schema_json("widget", "/v1/widgets")]);

    let (a, b, c) = tokio::join!(
        store.find("widget", Some("9"), FindOptions::new()),
        store.find("widget", Some("9"), FindOptions::new()),
        store.find("widget", Some("9"), FindOptions::new()),
    );
    assert_api_error(&a, 404);
    assert_eq!(a, b);
    assert_eq!(b, c);
    assert_eq!(mock.calls_to("/v1/widgets/9"), 1);
    assert_eq!(store.in_flight(), 0);

    // The failed entry is gone: a retry goes back to the network.
    let retry = store.find("widget", Some("9"), FindOptions::new()).await;
    assert_api_error(&retry, 404);
    assert_eq!(mock.calls_to("/v1/widgets/9"), 2);
}

#[tokio::test]
async fn test_timeout_error_names_request() {
    let mock = Arc::new(MockTransport::new().route(Method::Get, "/widgets/42", MockReply::Timeout));
    let store = store_with(&mock);
    store.bulk_add("schema", vec![schema_json("widget", "/widgets")]);

    let err = store
        .find("widget", Some("42"), FindOptions::new())
        .await
        .expect_err("timeout");
    let StoreError::Transport(err) = err else {
        panic!("expected transport error");
    };
    assert_eq!(err.code.as_deref(), Some("Timeout"));
    assert_eq!(err.message, "API request timeout (30 sec)");
    assert_eq!(err.detail.as_deref(), Some("GET /widgets/42"));
}

#[tokio::test]
async fn test_reset_wipes_cache_but_not_in_flight_work() -> StoreResult<()> {
    let mock = Arc::new(MockTransport::new().route(
        Method::Get,
        "/v1/widgets/1",
        MockReply::Delayed(
            Duration::from_millis(20),
            Box::new(MockReply::json(200, record_json("widget", "1", json!({})))),
        ),
    ));
    let store = store_with(&mock);
    store.bulk_add("schema", vec![schema_json("widget", "/v1/widgets")]);
    store.typeify(&record_json("gadget", "g", json!({})), &Default::default());

    let (leader, waiter, _) = tokio::join!(
        store.find("widget", Some("1"), FindOptions::new()),
        store.find("widget", Some("1"), FindOptions::new()),
        async {
            tokio::task::yield_now().await;
            store.reset();
            assert!(store.get_by_id("gadget", "g").is_none());
            assert_eq!(store.in_flight(), 0);
        },
    );

    assert_eq!(leader?, waiter?);
    assert_eq!(store.generation(), 1);
    assert!(store.get_by_id("widget", "1").is_some(), "completed request repopulates the cache");
    assert_eq!(mock.calls_to("/v1/widgets/1"), 1);
    Ok(())
}
