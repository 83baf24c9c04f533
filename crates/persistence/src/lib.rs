//! Nexxus persistence layer.
//!
//! This crate provides a uniform object-store contract (get, search, count,
//! create, update, delete) over an Elasticsearch cluster. Objects are typed
//! records partitioned by application and model type.
//!
//! # Features
//!
//! - **Resilient connections**: the [`ConnectionManager`] heals lost
//!   connectivity in the background and reports lifecycle events
//! - **Generic filters**: [`FilterBuilder`](query::FilterBuilder) trees are
//!   translated into the native query DSL by [`QueryTranslator`](query::QueryTranslator)
//! - **Optimistic updates**: patches are applied under version control and
//!   retried on conflict
//! - **Streaming search**: large result sets are paged through a scroll cursor
//!
//! # Backend Features
//!
//! - `elasticsearch` (default) - the Elasticsearch transport
//! - `cli` - the `nexxus-probe` connectivity binary
//!
//! # Architecture
//!
//! - [`error`] - Error kinds and the error hierarchy
//! - [`types`] - Objects, patches and option types
//! - [`index`] - Physical index naming
//! - [`query`] - Filter trees and translation
//! - [`transport`] - The wire contract to the cluster
//! - [`connection`] - Connection state machine
//! - [`store`] - The object store
//! - [`update`] - Optimistic-concurrency update engine
//! - [`patch`] - Patch application
//! - [`backends`] - Transport implementations
//!
//! # Quick Start
//!
//! ```no_run
//! use nexxus_persistence::{ObjectStore, StoreConfig};
//! use nexxus_persistence::types::{DatabaseObject, Patch};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = ObjectStore::elasticsearch(StoreConfig::with_hosts(["http://localhost:9200"]))?;
//! store.connection().connect().await?;
//!
//! let comment = DatabaseObject::new("comment", "c-1")
//!     .with_application("app-1")
//!     .with_attribute("likes", json!(0));
//! store.create_objects(vec![comment]).await?;
//!
//! let outcome = store
//!     .update_objects(vec![Patch::increment("comment/c-1/likes", json!(1)).with_application("app-1")])
//!     .await?;
//! assert!(outcome.errors.is_empty());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod config;
pub mod connection;
pub mod error;
pub mod index;
pub mod patch;
pub mod query;
pub mod store;
pub mod transport;
pub mod types;
pub mod update;

// Re-export commonly used types at crate root
pub use config::StoreConfig;
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState};
pub use error::{BackendError, ErrorKind, StorageError, StorageResult};
pub use index::IndexResolver;
pub use patch::{FieldPatcher, ObjectDiff, PatchProcessor};
pub use store::{ObjectStore, ScanHandler};
pub use transport::SearchTransport;
pub use update::OptimisticUpdater;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initializes the tracing subscriber.
///
/// `RUST_LOG` takes precedence over `level`.
#[cfg(feature = "cli")]
pub fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "nexxus_persistence={},nexxus_probe={}",
            level, level
        ))
    });

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}
