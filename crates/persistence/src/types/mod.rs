//! Core types for the persistence layer.
//!
//! - [`DatabaseObject`], [`ObjectRef`], [`DocumentVersion`] - Stored objects and addressing
//! - [`Patch`], [`PatchOp`] - Field mutations
//! - [`SearchOptions`], [`CountOptions`], [`SortField`] - Query options
//! - [`BatchResult`], [`GetObjectsResult`], [`DeleteRequest`] - Batch inputs and outcomes
//!
//! # Examples
//!
//! ```
//! use nexxus_persistence::types::{Patch, SearchOptions, SortField};
//! use serde_json::json;
//!
//! let search = SearchOptions::new("comment")
//!     .with_application("app-1")
//!     .with_sort(SortField::desc("created_at"))
//!     .with_limit(20);
//! assert_eq!(search.sort.len(), 1);
//!
//! let patch = Patch::increment("comment/c-1/likes", json!(1)).with_application("app-1");
//! assert_eq!(patch.target().unwrap().field, "likes");
//! ```

mod batch;
mod object;
mod patch;
mod search;

pub use batch::{BatchResult, DeleteRequest, GetObjectsResult};
pub use object::{DatabaseObject, DocumentVersion, GLOBAL_MODELS, ObjectRef, is_global_model};
pub use patch::{Patch, PatchOp, PatchTarget};
pub use search::{
    CountOptions, CountResult, GeoPoint, SearchObjectsResult, SearchOptions, SortField, SortOrder,
};
