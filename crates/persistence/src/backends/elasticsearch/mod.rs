//! Elasticsearch backend implementation.
//!
//! [`ElasticsearchTransport`] implements
//! [`SearchTransport`](crate::transport::SearchTransport) with the official
//! client. Each configured node gets its own single-node client; the transport
//! rotates over them and tracks dead nodes itself, which is how connectivity
//! loss surfaces as "no living connections".
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use nexxus_persistence::backends::elasticsearch::ElasticsearchTransport;
//! use nexxus_persistence::{ConnectionManager, ObjectStore, StoreConfig};
//!
//! let config = StoreConfig::with_hosts(["http://localhost:9200"]);
//! let transport = ElasticsearchTransport::new(&config)?;
//! let connection = ConnectionManager::from_config(&config, Arc::new(transport));
//! connection.connect().await?;
//! let store = ObjectStore::new(connection, config);
//! ```

mod backend;
mod schema;
mod search_impl;
mod storage;

pub use backend::ElasticsearchTransport;
