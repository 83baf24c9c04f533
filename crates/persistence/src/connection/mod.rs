//! Connection lifecycle for the search cluster.
//!
//! [`ConnectionManager`] owns the single logical connection. Every backend
//! call made by the store passes through it, so connectivity faults are seen
//! in one place and healed in the background.

mod manager;

pub use manager::{ConnectionEvent, ConnectionManager, ConnectionState};
