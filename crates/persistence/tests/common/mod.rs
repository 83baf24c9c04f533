//! Test infrastructure for the persistence layer.
//!
//! Integration tests run the real [`ObjectStore`] against [`MemoryTransport`],
//! an in-process stand-in for the search cluster.

#![allow(dead_code)]

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use nexxus_persistence::{ConnectionManager, ObjectStore, ScanHandler, StorageResult, StoreConfig};
use serde_json::{Map, Value};

pub use memory::{Fault, MemoryTransport};

/// Builds a store over a fresh in-memory transport with default configuration.
pub fn memory_store() -> (ObjectStore, Arc<MemoryTransport>) {
    memory_store_with(StoreConfig::default())
}

/// Builds a store over a fresh in-memory transport.
pub fn memory_store_with(config: StoreConfig) -> (ObjectStore, Arc<MemoryTransport>) {
    let transport = Arc::new(MemoryTransport::new());
    let connection = ConnectionManager::from_config(&config, transport.clone());
    (ObjectStore::new(connection, config), transport)
}

/// Scan handler that keeps every page it receives.
#[derive(Debug, Default)]
pub struct CollectingHandler {
    pub pages: Vec<Vec<Map<String, Value>>>,
}

impl CollectingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// All objects across pages, in delivery order.
    pub fn objects(&self) -> Vec<Map<String, Value>> {
        self.pages.iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl ScanHandler for CollectingHandler {
    async fn handle(&mut self, objects: Vec<Map<String, Value>>) -> StorageResult<()> {
        self.pages.push(objects);
        Ok(())
    }
}
