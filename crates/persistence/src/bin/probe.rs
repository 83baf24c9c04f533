//! Connectivity probe for the Nexxus object store.
//!
//! Connects to the configured cluster, waits for the connection to become
//! ready and prints the number of objects of one model.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use nexxus_persistence::query::FilterBuilder;
use nexxus_persistence::types::CountOptions;
use nexxus_persistence::{ObjectStore, StoreConfig, init_logging};
use tracing::info;

/// Probe configuration.
#[derive(Debug, Parser)]
#[command(name = "nexxus-probe")]
#[command(about = "Checks connectivity to the object store and counts a model")]
struct ProbeConfig {
    /// JSON configuration file; overrides --hosts and --index-prefix.
    #[arg(long, env = "NEXXUS_CONFIG")]
    config: Option<String>,

    /// Comma-separated cluster node URLs.
    #[arg(
        long,
        env = "NEXXUS_ES_HOSTS",
        default_value = "http://localhost:9200",
        value_delimiter = ','
    )]
    hosts: Vec<String>,

    /// Physical index prefix.
    #[arg(long, env = "NEXXUS_INDEX_PREFIX", default_value = "nexxus")]
    index_prefix: String,

    /// Log level.
    #[arg(long, env = "NEXXUS_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Model to count.
    #[arg(long, default_value = "application")]
    model: String,

    /// Application owning the model.
    #[arg(long)]
    application_id: Option<String>,

    /// Filter in generic JSON form, e.g. '{"and":[{"is":{"status":"open"}}]}'.
    #[arg(long)]
    filter: Option<String>,

    /// Seconds to wait for the cluster before giving up.
    #[arg(long, default_value = "30")]
    connect_timeout: u64,
}

impl ProbeConfig {
    fn store_config(&self) -> anyhow::Result<StoreConfig> {
        match &self.config {
            Some(path) => StoreConfig::from_file(path)
                .with_context(|| format!("failed to load configuration from {}", path)),
            None => Ok(StoreConfig {
                index_prefix: self.index_prefix.clone(),
                ..StoreConfig::with_hosts(self.hosts.iter().cloned())
            }),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let probe = ProbeConfig::parse();
    init_logging(&probe.log_level);

    let config = probe.store_config()?;
    info!(hosts = ?config.node_urls(), prefix = %config.index_prefix, "Starting probe");

    let store = ObjectStore::elasticsearch(config)?;
    tokio::time::timeout(
        Duration::from_secs(probe.connect_timeout),
        store.connection().connect(),
    )
    .await
    .context("timed out waiting for the cluster")??;

    let mut options = CountOptions::new();
    options.application_id = probe.application_id.clone();
    if let Some(filter) = &probe.filter {
        let value: serde_json::Value =
            serde_json::from_str(filter).context("filter is not valid JSON")?;
        options.filters = Some(FilterBuilder::from_json(&value)?);
    }

    let result = store.count_objects(&probe.model, &options).await?;
    info!(model = %probe.model, count = result.count, "Count complete");
    println!("{}", serde_json::to_string(&result)?);

    Ok(())
}
