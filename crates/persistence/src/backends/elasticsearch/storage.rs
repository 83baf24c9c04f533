//! Document reads and bulk writes.

use elasticsearch::http::request::JsonBody;
use elasticsearch::params::Refresh;
use elasticsearch::{BulkParts, MgetParts};
use serde_json::{Value, json};

use crate::error::BackendError;
use crate::transport::{BulkAction, BulkResponse, DocRef, MgetItem};

use super::backend::{ElasticsearchTransport, json_body};

impl ElasticsearchTransport {
    pub(crate) async fn mget_documents(
        &self,
        docs: Vec<DocRef>,
    ) -> Result<Vec<MgetItem>, BackendError> {
        let body = json!({
            "docs": docs
                .iter()
                .map(|d| json!({ "_index": d.index, "_id": d.id }))
                .collect::<Vec<_>>()
        });

        let response = self
            .execute("mget", self.request_timeout, move |client, timeout| {
                let body = body.clone();
                async move {
                    client
                        .mget(MgetParts::None)
                        .body(body)
                        .request_timeout(timeout)
                        .send()
                        .await
                }
            })
            .await?;

        MgetItem::list_from_json(&json_body(response, "mget").await?)
    }

    pub(crate) async fn bulk_write(
        &self,
        actions: Vec<BulkAction>,
        refresh: bool,
    ) -> Result<BulkResponse, BackendError> {
        let lines: Vec<Value> = actions.iter().flat_map(BulkAction::to_lines).collect();

        let response = self
            .execute("bulk", self.request_timeout, move |client, timeout| {
                let body: Vec<JsonBody<Value>> =
                    lines.iter().cloned().map(JsonBody::new).collect();
                async move {
                    client
                        .bulk(BulkParts::None)
                        .body(body)
                        .refresh(if refresh { Refresh::True } else { Refresh::False })
                        .request_timeout(timeout)
                        .send()
                        .await
                }
            })
            .await?;

        BulkResponse::from_json(&json_body(response, "bulk").await?)
    }
}
