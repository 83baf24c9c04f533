//! Batch request and result types.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{StorageError, StorageResult};
use crate::types::{DatabaseObject, DocumentVersion};

/// Outcome of a batch write.
///
/// Per-item failures land in `errors`; the call itself only fails for
/// argument validation or connectivity problems.
#[derive(Debug)]
pub struct BatchResult<T> {
    /// Per-item failures.
    pub errors: Vec<StorageError>,
    /// Per-item successes.
    pub results: Vec<T>,
}

impl<T> Default for BatchResult<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BatchResult<T> {
    /// Creates an empty result.
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            results: Vec::new(),
        }
    }

    /// Returns true if no item failed.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Outcome of [`ObjectStore::get_objects`](crate::ObjectStore::get_objects).
#[derive(Debug, Default)]
pub struct GetObjectsResult {
    /// One `ObjectNotFound` per missing id.
    pub errors: Vec<StorageError>,
    /// Found objects, in request order.
    pub results: Vec<DatabaseObject>,
    /// Version metadata per found id.
    pub versions: HashMap<String, DocumentVersion>,
}

/// A keyed batch of objects to delete.
///
/// Keys are kept as JSON values so that non-string keys coming from loosely
/// typed callers can be reported per item instead of failing the batch.
#[derive(Debug, Clone, Default)]
pub struct DeleteRequest {
    entries: Vec<(Value, DatabaseObject)>,
}

impl DeleteRequest {
    /// Creates an empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a request from raw key/object pairs.
    pub fn from_entries(entries: Vec<(Value, DatabaseObject)>) -> Self {
        Self { entries }
    }

    /// Adds an object keyed by its id.
    pub fn insert(&mut self, id: impl Into<String>, object: DatabaseObject) {
        self.entries.push((Value::String(id.into()), object));
    }

    /// Parses the JSON form of a keyed map.
    ///
    /// Accepts either an object (`{id: object}`) or an array of
    /// `[key, object]` pairs. Anything else is rejected.
    pub fn from_json(value: &Value) -> StorageResult<Self> {
        match value {
            Value::Object(map) => {
                let mut entries = Vec::with_capacity(map.len());
                for (key, object) in map {
                    entries.push((Value::String(key.clone()), parse_object(object)?));
                }
                Ok(Self { entries })
            }
            Value::Array(pairs) => {
                let mut entries = Vec::with_capacity(pairs.len());
                for pair in pairs {
                    match pair.as_array().map(Vec::as_slice) {
                        Some([key, object]) => entries.push((key.clone(), parse_object(object)?)),
                        _ => return Err(not_a_map()),
                    }
                }
                Ok(Self { entries })
            }
            _ => Err(not_a_map()),
        }
    }

    /// Returns the entries.
    pub fn entries(&self) -> &[(Value, DatabaseObject)] {
        &self.entries
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the request has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn not_a_map() -> StorageError {
    StorageError::invalid_field_value(["deleteObjects must be supplied a Map"])
}

fn parse_object(value: &Value) -> StorageResult<DatabaseObject> {
    DatabaseObject::from_document(value.clone(), 0).map_err(|_| not_a_map())
}

impl From<HashMap<String, DatabaseObject>> for DeleteRequest {
    fn from(map: HashMap<String, DatabaseObject>) -> Self {
        Self {
            entries: map
                .into_iter()
                .map(|(id, object)| (Value::String(id), object))
                .collect(),
        }
    }
}

impl FromIterator<(String, DatabaseObject)> for DeleteRequest {
    fn from_iter<I: IntoIterator<Item = (String, DatabaseObject)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(id, object)| (Value::String(id), object))
                .collect(),
        }
    }
}
