//! Cluster health and index provisioning.

use elasticsearch::indices::IndicesCreateParts;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::BackendError;

use super::backend::{BACKEND_NAME, ElasticsearchTransport, json_body};

impl ElasticsearchTransport {
    pub(crate) async fn ping_cluster(&self) -> Result<(), BackendError> {
        let response = self
            .execute("ping", self.ping_timeout, |client, timeout| async move {
                client.ping().request_timeout(timeout).send().await
            })
            .await?;

        let status = response.status_code();
        if !status.is_success() {
            return Err(BackendError::Status {
                backend_name: BACKEND_NAME.to_string(),
                status: status.as_u16(),
                message: "ping failed".to_string(),
            });
        }
        Ok(())
    }

    /// Creates `name` with default settings. An existing index counts as success.
    pub(crate) async fn create_index_named(&self, name: &str) -> Result<Value, BackendError> {
        let index = name.to_string();

        let response = self
            .execute("create_index", self.request_timeout, move |client, timeout| {
                let index = index.clone();
                async move {
                    client
                        .indices()
                        .create(IndicesCreateParts::Index(&index))
                        .request_timeout(timeout)
                        .send()
                        .await
                }
            })
            .await?;

        let status = response.status_code();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // 400 with "resource_already_exists_exception" is OK
            if body.contains("resource_already_exists_exception") {
                debug!(index = %name, "Index already exists");
                return Ok(json!({ "acknowledged": true, "index": name, "already_exists": true }));
            }
            return Err(BackendError::Status {
                backend_name: BACKEND_NAME.to_string(),
                status: status.as_u16(),
                message: format!("Failed to create index {}: {}", name, body),
            });
        }

        json_body(response, "create_index").await
    }
}
