//! Search, scroll and count.

use elasticsearch::{ClearScrollParts, CountParts, ScrollParts, SearchParts};
use serde_json::{Value, json};

use crate::error::BackendError;
use crate::transport::{SearchRequest, SearchResponse};

use super::backend::{BACKEND_NAME, ElasticsearchTransport, json_body};

impl ElasticsearchTransport {
    pub(crate) async fn search_documents(
        &self,
        request: SearchRequest,
    ) -> Result<SearchResponse, BackendError> {
        let response = self
            .execute("search", self.request_timeout, move |client, timeout| {
                let request = request.clone();
                async move {
                    let indices = [request.index.as_str()];
                    let mut search = client
                        .search(SearchParts::Index(&indices))
                        .body(request.body)
                        .request_timeout(timeout);

                    if let Some(from) = request.from {
                        search = search.from(from as i64);
                    }
                    if let Some(size) = request.size {
                        search = search.size(size as i64);
                    }
                    if let Some(keep_alive) = request.scroll.as_deref() {
                        search = search.scroll(keep_alive);
                    }
                    if request.request_cache {
                        search = search.request_cache(true);
                    }

                    search.send().await
                }
            })
            .await?;

        SearchResponse::from_json(&json_body(response, "search").await?)
    }

    pub(crate) async fn scroll_page(
        &self,
        scroll_id: &str,
        keep_alive: &str,
    ) -> Result<SearchResponse, BackendError> {
        let body = json!({ "scroll": keep_alive, "scroll_id": scroll_id });

        let response = self
            .execute("scroll", self.request_timeout, move |client, timeout| {
                let body = body.clone();
                async move {
                    client
                        .scroll(ScrollParts::None)
                        .body(body)
                        .request_timeout(timeout)
                        .send()
                        .await
                }
            })
            .await?;

        SearchResponse::from_json(&json_body(response, "scroll").await?)
    }

    pub(crate) async fn release_scroll(&self, scroll_id: &str) -> Result<(), BackendError> {
        let body = json!({ "scroll_id": [scroll_id] });

        let response = self
            .execute("clear_scroll", self.request_timeout, move |client, timeout| {
                let body = body.clone();
                async move {
                    client
                        .clear_scroll(ClearScrollParts::None)
                        .body(body)
                        .request_timeout(timeout)
                        .send()
                        .await
                }
            })
            .await?;

        // an expired cursor is already gone
        if response.status_code().as_u16() == 404 {
            return Ok(());
        }
        json_body(response, "clear_scroll").await.map(|_| ())
    }

    pub(crate) async fn count_documents(
        &self,
        index: &str,
        body: Value,
    ) -> Result<u64, BackendError> {
        let index = index.to_string();

        let response = self
            .execute("count", self.request_timeout, move |client, timeout| {
                let index = index.clone();
                let body = body.clone();
                async move {
                    let indices = [index.as_str()];
                    client
                        .count(CountParts::Index(&indices))
                        .body(body)
                        .request_timeout(timeout)
                        .send()
                        .await
                }
            })
            .await?;

        let body = json_body(response, "count").await?;
        body.get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| BackendError::Internal {
                backend_name: BACKEND_NAME.to_string(),
                message: "count response has no count".to_string(),
                source: None,
            })
    }
}
