//! Elasticsearch transport.

use std::fmt::{self, Debug};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use elasticsearch::Elasticsearch;
use elasticsearch::http::response::Response;
use elasticsearch::http::transport::{SingleNodeConnectionPool, TransportBuilder};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::error::{BackendError, StorageError, StorageResult};
use crate::transport::{
    BulkAction, BulkResponse, DocRef, MgetItem, SearchRequest, SearchResponse, SearchTransport,
};

pub(crate) const BACKEND_NAME: &str = "elasticsearch";

/// One cluster node and its liveness.
struct Node {
    url: String,
    client: Elasticsearch,
    dead_until: RwLock<Option<Instant>>,
}

impl Node {
    fn is_alive(&self, now: Instant) -> bool {
        match *self.dead_until.read() {
            Some(until) => now >= until,
            None => true,
        }
    }

    fn mark_dead(&self, dead_timeout: Duration) {
        *self.dead_until.write() = Some(Instant::now() + dead_timeout);
    }

    fn mark_alive(&self) {
        let mut dead_until = self.dead_until.write();
        if dead_until.is_some() {
            debug!(node = %self.url, "Node resurrected");
            *dead_until = None;
        }
    }
}

/// [`SearchTransport`] over the official Elasticsearch client.
///
/// Each configured node gets its own client. Requests rotate over living
/// nodes; a node failing at the connection level is skipped for
/// `dead_timeout`. When no attempt succeeds the request fails with
/// [`BackendError::NoLivingConnections`]. Timeouts are reported as
/// [`BackendError::RequestTimeout`] without trying another node.
pub struct ElasticsearchTransport {
    nodes: Vec<Node>,
    cursor: AtomicUsize,
    max_retries: u32,
    dead_timeout: Duration,
    pub(crate) request_timeout: Duration,
    pub(crate) ping_timeout: Duration,
}

impl Debug for ElasticsearchTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let urls: Vec<&str> = self.nodes.iter().map(|n| n.url.as_str()).collect();
        f.debug_struct("ElasticsearchTransport")
            .field("nodes", &urls)
            .field("max_retries", &self.max_retries)
            .field("dead_timeout", &self.dead_timeout)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl ElasticsearchTransport {
    /// Creates a transport for the nodes in `config`.
    pub fn new(config: &StoreConfig) -> StorageResult<Self> {
        let urls = config.node_urls();
        if urls.is_empty() {
            return Err(StorageError::server_failure([
                "supplied empty or invalid configuration parameter",
            ]));
        }

        let nodes = urls
            .into_iter()
            .map(|url| {
                let client = Self::build_client(&url, config.request_timeout())?;
                Ok(Node {
                    url,
                    client,
                    dead_until: RwLock::new(None),
                })
            })
            .collect::<StorageResult<Vec<_>>>()?;

        Ok(Self {
            nodes,
            cursor: AtomicUsize::new(0),
            max_retries: config.max_retries,
            dead_timeout: config.dead_timeout(),
            request_timeout: config.request_timeout(),
            ping_timeout: config.ping_timeout(),
        })
    }

    /// Builds the client for one node.
    fn build_client(url: &str, timeout: Duration) -> StorageResult<Elasticsearch> {
        let parsed_url: elasticsearch::http::Url = url.parse().map_err(|e| {
            StorageError::Backend(BackendError::ConnectionFailed {
                backend_name: BACKEND_NAME.to_string(),
                message: format!("Invalid URL {}: {}", url, e),
            })
        })?;

        let transport = TransportBuilder::new(SingleNodeConnectionPool::new(parsed_url))
            .timeout(timeout)
            .build()
            .map_err(|e| {
                StorageError::Backend(BackendError::ConnectionFailed {
                    backend_name: BACKEND_NAME.to_string(),
                    message: format!("Failed to build transport: {}", e),
                })
            })?;

        Ok(Elasticsearch::new(transport))
    }

    /// Returns the configured node URLs.
    pub fn node_urls(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.url.as_str()).collect()
    }

    /// Returns the number of nodes not currently marked dead.
    pub fn living_nodes(&self) -> usize {
        let now = Instant::now();
        self.nodes.iter().filter(|n| n.is_alive(now)).count()
    }

    fn next_living(&self) -> Option<&Node> {
        let now = Instant::now();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        (0..self.nodes.len())
            .map(|offset| &self.nodes[(start + offset) % self.nodes.len()])
            .find(|node| node.is_alive(now))
    }

    /// Sends a request through the node pool.
    pub(crate) async fn execute<F, Fut>(
        &self,
        operation: &'static str,
        timeout: Duration,
        call: F,
    ) -> Result<Response, BackendError>
    where
        F: Fn(Elasticsearch, Duration) -> Fut + Send + Sync,
        Fut: Future<Output = Result<Response, elasticsearch::Error>> + Send,
    {
        let mut last_error = None;

        for _ in 0..=self.max_retries {
            let Some(node) = self.next_living() else {
                break;
            };

            match call(node.client.clone(), timeout).await {
                Ok(response) => {
                    node.mark_alive();
                    return Ok(response);
                }
                Err(e) if e.is_timeout() => {
                    return Err(BackendError::RequestTimeout {
                        backend_name: BACKEND_NAME.to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
                Err(e) => {
                    warn!(
                        node = %node.url,
                        operation,
                        error = %e,
                        "Request failed, marking node dead"
                    );
                    node.mark_dead(self.dead_timeout);
                    last_error = Some(e.to_string());
                }
            }
        }

        Err(BackendError::NoLivingConnections {
            backend_name: BACKEND_NAME.to_string(),
            message: last_error.unwrap_or_else(|| "every node is marked dead".to_string()),
        })
    }
}

/// Reads a successful response body, turning other statuses into errors.
pub(crate) async fn json_body(response: Response, operation: &str) -> Result<Value, BackendError> {
    let status = response.status_code();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BackendError::Status {
            backend_name: BACKEND_NAME.to_string(),
            status: status.as_u16(),
            message: format!("{} failed: {}", operation, body),
        });
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| BackendError::SerializationError {
            message: format!("Failed to parse {} response: {}", operation, e),
        })
}

#[async_trait]
impl SearchTransport for ElasticsearchTransport {
    async fn ping(&self) -> Result<(), BackendError> {
        self.ping_cluster().await
    }

    async fn mget(&self, docs: Vec<DocRef>) -> Result<Vec<MgetItem>, BackendError> {
        self.mget_documents(docs).await
    }

    async fn bulk(
        &self,
        actions: Vec<BulkAction>,
        refresh: bool,
    ) -> Result<BulkResponse, BackendError> {
        self.bulk_write(actions, refresh).await
    }

    async fn search(&self, request: SearchRequest) -> Result<SearchResponse, BackendError> {
        self.search_documents(request).await
    }

    async fn scroll(
        &self,
        scroll_id: &str,
        keep_alive: &str,
    ) -> Result<SearchResponse, BackendError> {
        self.scroll_page(scroll_id, keep_alive).await
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<(), BackendError> {
        self.release_scroll(scroll_id).await
    }

    async fn count(&self, index: &str, body: Value) -> Result<u64, BackendError> {
        self.count_documents(index, body).await
    }

    async fn create_index(&self, name: &str) -> Result<Value, BackendError> {
        self.create_index_named(name).await
    }
}
