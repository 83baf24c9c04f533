//! Store configuration.
//!
//! Every field except the host list has a default, so a minimal JSON file is
//! just `{"hosts": ["http://localhost:9200"]}`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};
use crate::index::DEFAULT_INDEX_PREFIX;

/// Configuration for the object store and its cluster connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Cluster node URLs.
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Single node URL, used when `hosts` is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Physical index prefix (default: `"nexxus"`).
    #[serde(default = "default_index_prefix")]
    pub index_prefix: String,

    /// Subscription page limit handed to upstream callers (default: 64).
    #[serde(default = "default_subscribe_limit")]
    pub subscribe_limit: u32,

    /// Lookup page limit handed to upstream callers (default: 384).
    #[serde(default = "default_get_limit")]
    pub get_limit: u32,

    /// Node attempts per request before giving up (default: 10).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// How long a failed node is skipped, in milliseconds (default: 10000).
    #[serde(default = "default_dead_timeout_ms")]
    pub dead_timeout_ms: u64,

    /// Health probe timeout in milliseconds (default: 3000).
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,

    /// Request timeout in milliseconds (default: 30000).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Delay between connection attempts in milliseconds (default: 2000).
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// Page size for streaming searches (default: 1024).
    #[serde(default = "default_scroll_page_size")]
    pub scroll_page_size: u64,

    /// Cursor keep-alive for streaming searches (default: `"10s"`).
    #[serde(default = "default_scroll_keep_alive")]
    pub scroll_keep_alive: String,

    /// Cap on optimistic update rounds. Unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_update_rounds: Option<u32>,
}

fn default_index_prefix() -> String {
    DEFAULT_INDEX_PREFIX.to_string()
}

fn default_subscribe_limit() -> u32 {
    64
}

fn default_get_limit() -> u32 {
    384
}

fn default_max_retries() -> u32 {
    10
}

fn default_dead_timeout_ms() -> u64 {
    10_000
}

fn default_ping_timeout_ms() -> u64 {
    3000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_reconnect_interval_ms() -> u64 {
    2000
}

fn default_scroll_page_size() -> u64 {
    1024
}

fn default_scroll_keep_alive() -> String {
    "10s".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            hosts: vec!["http://localhost:9200".to_string()],
            host: None,
            index_prefix: default_index_prefix(),
            subscribe_limit: default_subscribe_limit(),
            get_limit: default_get_limit(),
            max_retries: default_max_retries(),
            dead_timeout_ms: default_dead_timeout_ms(),
            ping_timeout_ms: default_ping_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            scroll_page_size: default_scroll_page_size(),
            scroll_keep_alive: default_scroll_keep_alive(),
            max_update_rounds: None,
        }
    }
}

impl StoreConfig {
    /// Creates a configuration for the given nodes with default tuning.
    pub fn with_hosts<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hosts: hosts.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Loads a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            StorageError::server_failure([format!(
                "failed to read configuration {}: {}",
                path.display(),
                e
            )])
        })?;
        let config: StoreConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the configuration can back a store.
    pub fn validate(&self) -> StorageResult<()> {
        if self.node_urls().is_empty() {
            return Err(StorageError::server_failure([
                "supplied empty or invalid configuration parameter",
            ]));
        }
        if self.scroll_page_size == 0 {
            return Err(StorageError::server_failure([
                "scroll_page_size must be greater than zero",
            ]));
        }
        Ok(())
    }

    /// Returns the configured node URLs: `hosts`, or `host` when `hosts` is empty.
    pub fn node_urls(&self) -> Vec<String> {
        let hosts: Vec<String> = self
            .hosts
            .iter()
            .filter(|h| !h.trim().is_empty())
            .cloned()
            .collect();
        if !hosts.is_empty() {
            return hosts;
        }
        self.host
            .iter()
            .filter(|h| !h.trim().is_empty())
            .cloned()
            .collect()
    }

    /// Delay between connection attempts.
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Health probe timeout.
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    /// How long a failed node is skipped.
    pub fn dead_timeout(&self) -> Duration {
        Duration::from_millis(self.dead_timeout_ms)
    }
}
