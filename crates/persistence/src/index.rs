//! Physical index naming.
//!
//! Global models live in `{prefix}-{type}`; everything else lives in
//! `{prefix}-{application_id}-{type}`. Names are used verbatim, without case
//! folding, so resolution is a pure function of its inputs.

use crate::error::{StorageError, StorageResult};
use crate::types::{DatabaseObject, ObjectRef, is_global_model};

/// Default index name prefix.
pub const DEFAULT_INDEX_PREFIX: &str = "nexxus";

/// Maps `(type, application_id)` to a physical index name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexResolver {
    prefix: String,
}

impl Default for IndexResolver {
    fn default() -> Self {
        Self::new(DEFAULT_INDEX_PREFIX)
    }
}

impl IndexResolver {
    /// Creates a resolver with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Returns the prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Resolves the index for a model type.
    ///
    /// Fails with `InvalidFieldValue` when a non-global type has no application.
    pub fn resolve(
        &self,
        object_type: &str,
        application_id: Option<&str>,
    ) -> StorageResult<String> {
        if is_global_model(object_type) {
            return Ok(format!("{}-{}", self.prefix, object_type));
        }

        match application_id {
            Some(app) if !app.is_empty() => Ok(format!("{}-{}-{}", self.prefix, app, object_type)),
            _ => Err(StorageError::invalid_field_value([format!(
                "missing application_id for model \"{}\"",
                object_type
            )])),
        }
    }

    /// Resolves the index holding `object`.
    pub fn for_object(&self, object: &DatabaseObject) -> StorageResult<String> {
        self.resolve(&object.object_type, object.application_id.as_deref())
    }

    /// Resolves the index addressed by `reference`.
    pub fn for_ref(&self, reference: &ObjectRef) -> StorageResult<String> {
        self.resolve(&reference.object_type, reference.application_id.as_deref())
    }

    /// Returns the index holding an application's own records.
    pub fn application_index(&self, application_id: &str) -> String {
        format!("{}-{}-application", self.prefix, application_id)
    }

    /// Returns the index for one of an application's models.
    pub fn model_index(&self, application_id: &str, model: &str) -> String {
        format!("{}-{}-{}", self.prefix, application_id, model)
    }
}
