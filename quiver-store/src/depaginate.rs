//! Depagination: follow `pagination.next` links until the set is complete.

use crate::store::Store;
use quiver_core::{Collection, Method, Node, RequestOptions, StoreResult};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

impl Store {
    /// Fetch every remaining page of `first` and return the assembled collection.
    ///
    /// Each page is its own coalesced request with depagination off. A link
    /// that was already fetched ends the walk. A failed page fails the whole
    /// request.
    pub(crate) async fn depaginate(
        &self,
        first: Arc<Collection>,
        opts: &RequestOptions,
    ) -> StoreResult<Node> {
        let mut assembled = Arc::unwrap_or_clone(first);
        let mut visited = HashSet::new();
        visited.insert(self.normalize_url(&opts.url, true));
        let mut pages = 1usize;

        while let Some(next) = assembled.next_page().map(str::to_string) {
            let url = self.normalize_url(&next, true);
            if !visited.insert(url.clone()) {
                warn!(url = %url, "Pagination loops back to a fetched page; stopping");
                assembled.clear_next_page();
                break;
            }

            let page_opts = RequestOptions {
                url: url.clone(),
                method: Method::Get,
                headers: opts.headers.clone(),
                body: None,
                timeout: opts.timeout,
                depaginate: false,
                include: opts.include.clone(),
            };
            let key = self.signature(&page_opts.headers, &url);
            let page = self.coalesced(key, self.request(page_opts)).await?;
            pages += 1;

            match page {
                Node::Collection(page) => assembled.absorb_page(Arc::unwrap_or_clone(page)),
                _ => {
                    warn!(url = %url, "Next page was not a collection; stopping");
                    assembled.clear_next_page();
                }
            }
        }

        debug!(pages, members = assembled.len(), "Depaginated collection");
        Ok(Node::Collection(Arc::new(assembled)))
    }
}
