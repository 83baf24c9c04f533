//! Stored object types.
//!
//! This module defines [`DatabaseObject`], the typed record the store persists,
//! together with the addressing triple [`ObjectRef`] and the backend version
//! metadata [`DocumentVersion`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StorageResult;

/// Model types that live outside any application partition.
pub const GLOBAL_MODELS: [&str; 2] = ["application", "admin"];

/// Returns true if `object_type` is a global model.
pub fn is_global_model(object_type: &str) -> bool {
    GLOBAL_MODELS.contains(&object_type)
}

/// A typed record partitioned by application and model type.
///
/// The object is stored as a flat JSON document: `id`, `type`,
/// `application_id` and every attribute sit at the top level. The `version`
/// is backend metadata and never part of the document body.
///
/// # Examples
///
/// ```
/// use nexxus_persistence::types::DatabaseObject;
/// use serde_json::json;
///
/// let object = DatabaseObject::new("comment", "c-1")
///     .with_application("app-1")
///     .with_attribute("text", json!("hello"));
///
/// assert_eq!(object.object_type, "comment");
/// assert!(!object.is_global());
/// assert_eq!(object.get("text"), Some(&json!("hello")));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseObject {
    /// Unique identifier within the physical index.
    #[serde(default)]
    pub id: String,

    /// Model type name.
    #[serde(rename = "type", default)]
    pub object_type: String,

    /// Owning application; absent for global models.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,

    /// Remaining document fields.
    #[serde(flatten)]
    pub attributes: Map<String, Value>,

    /// Backend version number (`_version`).
    #[serde(skip)]
    pub version: i64,
}

impl DatabaseObject {
    /// Creates an object with no attributes.
    pub fn new(object_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            object_type: object_type.into(),
            application_id: None,
            attributes: Map::new(),
            version: 0,
        }
    }

    /// Sets the owning application.
    pub fn with_application(mut self, application_id: impl Into<String>) -> Self {
        self.application_id = Some(application_id.into());
        self
    }

    /// Adds or replaces an attribute.
    pub fn with_attribute(mut self, field: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(field.into(), value);
        self
    }

    /// Returns true if this object belongs to a global model.
    pub fn is_global(&self) -> bool {
        is_global_model(&self.object_type)
    }

    /// Returns an attribute value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.attributes.get(field)
    }

    /// Returns the model names declared in an application's `schema`.
    ///
    /// Accepts either a list of names or a mapping keyed by model name.
    /// Anything else yields an empty list.
    pub fn schema_models(&self) -> Vec<String> {
        match self.attributes.get("schema") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(Value::Object(map)) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Serializes the object into its backend document form.
    pub fn to_document(&self) -> StorageResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Rebuilds an object from a backend document and its version.
    pub fn from_document(document: Value, version: i64) -> StorageResult<Self> {
        let mut object: DatabaseObject = serde_json::from_value(document)?;
        object.version = version;
        Ok(object)
    }
}

/// Addresses a single object for lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Object id.
    pub id: String,
    /// Model type name.
    #[serde(rename = "type")]
    pub object_type: String,
    /// Owning application.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
}

impl ObjectRef {
    /// Creates a reference with no application.
    pub fn new(object_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            object_type: object_type.into(),
            application_id: None,
        }
    }

    /// Sets the owning application.
    pub fn with_application(mut self, application_id: impl Into<String>) -> Self {
        self.application_id = Some(application_id.into());
        self
    }
}

impl From<&DatabaseObject> for ObjectRef {
    fn from(object: &DatabaseObject) -> Self {
        Self {
            id: object.id.clone(),
            object_type: object.object_type.clone(),
            application_id: object.application_id.clone(),
        }
    }
}

/// Version metadata recorded for a fetched document.
///
/// `seq_no` and `primary_term` are present when the cluster reports them and
/// are preferred for conditional writes; `version` is used otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DocumentVersion {
    /// The document's `_version`.
    pub version: i64,
    /// The document's `_seq_no`.
    pub seq_no: Option<i64>,
    /// The document's `_primary_term`.
    pub primary_term: Option<i64>,
}

impl DocumentVersion {
    /// Creates version metadata carrying only `_version`.
    pub fn new(version: i64) -> Self {
        Self {
            version,
            seq_no: None,
            primary_term: None,
        }
    }

    /// Returns the sequence-number pair if both halves are known.
    pub fn sequence(&self) -> Option<(i64, i64)> {
        match (self.seq_no, self.primary_term) {
            (Some(seq_no), Some(primary_term)) => Some((seq_no, primary_term)),
            _ => None,
        }
    }
}
