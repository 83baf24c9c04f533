//! Patch types.
//!
//! A [`Patch`] targets one field of one object through a `type/id/field`
//! path. Paths are validated before any backend call.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{StorageError, StorageResult};

/// The mutation a patch applies to its target field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchOp {
    /// Set the field to `value`.
    Replace,
    /// Add `value` to a numeric field.
    Increment,
    /// Push `value` onto an array field.
    Append,
    /// Remove `value` from an array field, or clear the field when `value` is null.
    Remove,
}

/// A single field mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    /// The operation.
    pub op: PatchOp,
    /// Target path, `type/id/field`.
    #[serde(default)]
    pub path: String,
    /// Operand.
    #[serde(default)]
    pub value: Value,
    /// Application owning the target object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
}

/// The parsed segments of a patch path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchTarget<'a> {
    /// Model type of the target object.
    pub object_type: &'a str,
    /// Id of the target object.
    pub id: &'a str,
    /// Field to mutate.
    pub field: &'a str,
}

impl Patch {
    /// Creates a patch.
    pub fn new(op: PatchOp, path: impl Into<String>, value: Value) -> Self {
        Self {
            op,
            path: path.into(),
            value,
            application_id: None,
        }
    }

    /// Creates a `replace` patch.
    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self::new(PatchOp::Replace, path, value)
    }

    /// Creates an `increment` patch.
    pub fn increment(path: impl Into<String>, value: Value) -> Self {
        Self::new(PatchOp::Increment, path, value)
    }

    /// Creates an `append` patch.
    pub fn append(path: impl Into<String>, value: Value) -> Self {
        Self::new(PatchOp::Append, path, value)
    }

    /// Creates a `remove` patch.
    pub fn remove(path: impl Into<String>, value: Value) -> Self {
        Self::new(PatchOp::Remove, path, value)
    }

    /// Sets the owning application.
    pub fn with_application(mut self, application_id: impl Into<String>) -> Self {
        self.application_id = Some(application_id.into());
        self
    }

    /// Parses the path into its three segments.
    ///
    /// An empty path is treated as missing. Anything that does not split into
    /// exactly three non-empty segments is malformed.
    pub fn target(&self) -> StorageResult<PatchTarget<'_>> {
        if self.path.is_empty() {
            return Err(StorageError::invalid_patch(["path is missing or invalid"]));
        }

        let segments: Vec<&str> = self.path.split('/').collect();
        match segments.as_slice() {
            &[object_type, id, field]
                if !object_type.is_empty() && !id.is_empty() && !field.is_empty() =>
            {
                Ok(PatchTarget {
                    object_type,
                    id,
                    field,
                })
            }
            _ => Err(StorageError::invalid_patch(["the path is malformed"])),
        }
    }
}
