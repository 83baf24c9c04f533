//! Transport implementations.
//!
//! Each backend is gated behind a feature flag.
//!
//! | Backend | Feature | Description |
//! |---------|---------|-------------|
//! | Elasticsearch | `elasticsearch` | Official client with a per-node pool |

#[cfg(feature = "elasticsearch")]
pub mod elasticsearch;
