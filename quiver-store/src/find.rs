//! `find`: cache short-circuit, schema-driven URL resolution and the
//! coalesced fetch.

use crate::events::StoreEvent;
use crate::store::Store;
use futures_util::future::{BoxFuture, FutureExt};
use quiver_core::{
    encode_component, normalize_type, url_options, FindOptions, LiveView, Method, Node,
    RecordHandle, RequestOptions, SchemaView, StoreResult, ValidationError,
    SCHEMA_TYPE,
};
use tracing::{debug, trace};

impl Store {
    /// Find one record (`id` given) or a list of records of a type.
    ///
    /// Answers from the cache when it can, otherwise resolves the type's
    /// collection URL from its schema and fetches. Concurrent finds with the
    /// same headers and URL share one transport call and one outcome.
    ///
    /// A list find without an explicit limit asks for the store's default
    /// page size, ahead of any model `default_limit`.
    pub fn find<'a>(
        &'a self,
        record_type: &'a str,
        id: Option<&'a str>,
        opts: FindOptions,
    ) -> BoxFuture<'a, StoreResult<Node>> {
        self.find_inner(record_type, id, opts).boxed()
    }

    /// Fetch (unless already complete) and return a live view of the whole type.
    pub async fn find_all(&self, record_type: &str, opts: FindOptions) -> StoreResult<LiveView> {
        self.find(record_type, None, opts).await?;
        Ok(self.all(record_type))
    }

    async fn find_inner(&self, record_type: &str, id: Option<&str>, opts: FindOptions) -> StoreResult<Node> {
        let record_type = normalize_type(record_type);
        if record_type.is_empty() {
            return Err(ValidationError::TypeNotSpecified.into());
        }
        let id = id.filter(|id| !id.is_empty());

        let mut opts = opts;
        if id.is_none() && opts.limit.is_none() {
            opts.limit = Some(self.config.default_page_size);
        }
        let cacheable = opts.is_cacheable();
        let for_all = id.is_none() && cacheable;

        self.lock().find_issued = true;

        if !opts.force_reload {
            if let Some(hit) = self.cached_answer(&record_type, id, cacheable, for_all) {
                return Ok(hit);
            }
        }

        let model = self.class_for(&record_type);
        let base = match &opts.url {
            Some(url) => url.clone(),
            None => {
                let collection = self.collection_url(&record_type).await?;
                match id {
                    Some(id) => format!("{}/{}", collection.trim_end_matches('/'), encode_component(id)),
                    None => collection,
                }
            }
        };
        let url = self.normalize_url(&url_options(&base, &opts, Some(&model)), false);

        // The schema lookup may have let a concurrent fetch of this record settle.
        if !opts.force_reload {
            if let Some(hit) = self.cached_answer(&record_type, id, cacheable, for_all) {
                return Ok(hit);
            }
        }

        let mut headers = model.headers.clone();
        headers.merge(&opts.headers);
        let key = self.signature(&headers, &url);
        let request = RequestOptions {
            url,
            method: Method::Get,
            headers,
            body: None,
            timeout: None,
            depaginate: opts.depaginate,
            include: opts.include.clone(),
        };

        debug!(record_type = %record_type, id = ?id, url = %request.url, "Find");
        let remove_missing = opts.remove_missing;
        let work = async {
            let node = self.request(request).await?;
            if for_all {
                self.found_all_settled(&record_type, remove_missing, &node);
            }
            Ok(node)
        };
        self.coalesced(key, work).await
    }

    fn cached_answer(&self, record_type: &str, id: Option<&str>, cacheable: bool, for_all: bool) -> Option<Node> {
        let state = self.lock();
        if for_all && state.cache.found_all(record_type) {
            trace!(record_type = %record_type, "Find answered by found-all");
            return Some(Node::Live(LiveView::new(record_type)));
        }
        if cacheable {
            if let Some(handle) = id.and_then(|id| state.cache.get_by_id(record_type, id)) {
                trace!(record_type = %record_type, handle = %handle, "Find answered from cache");
                return Some(Node::Record(handle));
            }
        }
        None
    }

    /// The `collection` link of a type's schema, fetching the schema if needed.
    async fn collection_url(&self, record_type: &str) -> StoreResult<String> {
        let schema_url = format!("schemas/{}", encode_component(record_type));
        let schema = self
            .find(SCHEMA_TYPE, Some(record_type), FindOptions::new().url(schema_url))
            .await?;
        self.with_node_record(&schema, |record| {
            SchemaView::new(record)
                .link_for("collection")
                .map(str::to_string)
        })
        .flatten()
        .ok_or_else(|| {
            ValidationError::MissingSchemaLink {
                record_type: record_type.to_string(),
                relation: "collection".to_string(),
            }
            .into()
        })
    }

    /// Mark a complete list fetch; optionally evict records it no longer lists.
    fn found_all_settled(&self, record_type: &str, remove_missing: bool, node: &Node) {
        let mut removed: Vec<(String, RecordHandle)> = Vec::new();
        {
            let mut state = self.lock();
            state.cache.set_found_all(record_type, true);

            if let (true, Node::Collection(fresh)) = (remove_missing, node) {
                let stale: Vec<RecordHandle> = state
                    .cache
                    .group(record_type)
                    .iter()
                    .copied()
                    .filter(|handle| !fresh.includes(*handle))
                    .collect();
                for handle in stale {
                    let base = state
                        .cache
                        .record(handle)
                        .and_then(|record| record.base_type.clone())
                        .filter(|base| base != record_type);
                    if state.cache.remove(record_type, handle) {
                        removed.push((record_type.to_string(), handle));
                    }
                    if let Some(base) = base {
                        if state.cache.remove(&base, handle) {
                            removed.push((base, handle));
                        }
                    }
                }
            }
        }

        if !removed.is_empty() {
            debug!(record_type = %record_type, count = removed.len(), "Evicted records missing from full fetch");
        }
        self.emit_all(
            removed
                .into_iter()
                .map(|(record_type, handle)| StoreEvent::Removed { record_type, handle })
                .collect(),
        );
    }
}
