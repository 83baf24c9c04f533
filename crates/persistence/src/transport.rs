//! The wire contract between the store and the search cluster.
//!
//! [`SearchTransport`] exposes the handful of primitives the store needs.
//! Requests and responses are typed; the `from_json` parsers accept the
//! cluster's native response bodies so every implementation shares one
//! decoding path.

use std::fmt::Debug;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::error::BackendError;
use crate::types::DocumentVersion;

/// Addresses one document for a multi-get.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocRef {
    /// Physical index.
    pub index: String,
    /// Document id.
    pub id: String,
}

/// One entry of a multi-get response.
#[derive(Debug, Clone, PartialEq)]
pub struct MgetItem {
    /// Physical index.
    pub index: String,
    /// Document id.
    pub id: String,
    /// Whether the document exists.
    pub found: bool,
    /// Document body, when found.
    pub source: Option<Value>,
    /// Version metadata, when found.
    pub version: Option<DocumentVersion>,
    /// Per-document error reported by the cluster (for example a missing index).
    pub error: Option<String>,
}

/// Kind of a bulk operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkOp {
    /// Index (create or overwrite) a document.
    Index,
    /// Partially update a document.
    Update,
    /// Delete a document.
    Delete,
}

impl BulkOp {
    /// Returns the native action keyword.
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkOp::Index => "index",
            BulkOp::Update => "update",
            BulkOp::Delete => "delete",
        }
    }

    fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "index" | "create" => Some(BulkOp::Index),
            "update" => Some(BulkOp::Update),
            "delete" => Some(BulkOp::Delete),
            _ => None,
        }
    }
}

/// One action of a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkAction {
    /// Index `document` under `id`.
    Index {
        /// Physical index.
        index: String,
        /// Document id.
        id: String,
        /// Full document body.
        document: Value,
    },
    /// Merge `doc` into the document, conditioned on `version` when given.
    Update {
        /// Physical index.
        index: String,
        /// Document id.
        id: String,
        /// Partial document to merge.
        doc: Value,
        /// Version the write is conditioned on.
        version: Option<DocumentVersion>,
    },
    /// Delete the document.
    Delete {
        /// Physical index.
        index: String,
        /// Document id.
        id: String,
    },
}

impl BulkAction {
    /// Returns the operation kind.
    pub fn op(&self) -> BulkOp {
        match self {
            BulkAction::Index { .. } => BulkOp::Index,
            BulkAction::Update { .. } => BulkOp::Update,
            BulkAction::Delete { .. } => BulkOp::Delete,
        }
    }

    /// Returns the target index.
    pub fn index(&self) -> &str {
        match self {
            BulkAction::Index { index, .. }
            | BulkAction::Update { index, .. }
            | BulkAction::Delete { index, .. } => index,
        }
    }

    /// Returns the target id.
    pub fn id(&self) -> &str {
        match self {
            BulkAction::Index { id, .. }
            | BulkAction::Update { id, .. }
            | BulkAction::Delete { id, .. } => id,
        }
    }

    /// Encodes the action as bulk body lines.
    pub fn to_lines(&self) -> Vec<Value> {
        let mut meta = Map::new();
        meta.insert("_index".to_string(), json!(self.index()));
        meta.insert("_id".to_string(), json!(self.id()));

        match self {
            BulkAction::Index { document, .. } => {
                vec![json!({ "index": meta }), document.clone()]
            }
            BulkAction::Update { doc, version, .. } => {
                match version.as_ref().map(|v| (v.sequence(), v.version)) {
                    Some((Some((seq_no, primary_term)), _)) => {
                        meta.insert("if_seq_no".to_string(), json!(seq_no));
                        meta.insert("if_primary_term".to_string(), json!(primary_term));
                    }
                    Some((None, version)) => {
                        meta.insert("version".to_string(), json!(version));
                    }
                    None => {}
                }
                vec![json!({ "update": meta }), json!({ "doc": doc })]
            }
            BulkAction::Delete { .. } => vec![json!({ "delete": meta })],
        }
    }
}

/// Outcome of a bulk request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BulkResponse {
    /// True if any item failed.
    pub errors: bool,
    /// Per-action outcomes, in request order.
    pub items: Vec<BulkItem>,
}

/// Outcome of one bulk action.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItem {
    /// Operation kind.
    pub op: BulkOp,
    /// Physical index.
    pub index: String,
    /// Document id.
    pub id: String,
    /// HTTP status of the item.
    pub status: u16,
    /// Result keyword (`created`, `updated`, `deleted`, `not_found`, ...).
    pub result: Option<String>,
    /// Error description, for failed items.
    pub error: Option<String>,
}

impl BulkItem {
    /// Returns true if the item succeeded.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && (200..300).contains(&self.status)
    }

    /// Returns true if the item failed an optimistic concurrency check.
    pub fn is_conflict(&self) -> bool {
        self.status == 409
    }

    /// Returns true if the addressed document did not exist.
    pub fn is_not_found(&self) -> bool {
        self.result.as_deref() == Some("not_found")
    }
}

/// A search request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchRequest {
    /// Physical index.
    pub index: String,
    /// Query body.
    pub body: Value,
    /// Hits to skip.
    pub from: Option<u64>,
    /// Page size.
    pub size: Option<u64>,
    /// Scroll keep-alive; opens a cursor when set.
    pub scroll: Option<String>,
    /// Whether the shard request cache may serve the request.
    pub request_cache: bool,
}

/// One search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Physical index.
    pub index: String,
    /// Document id.
    pub id: String,
    /// Document body, unless suppressed.
    pub source: Option<Value>,
    /// Projected field values.
    pub fields: Option<Map<String, Value>>,
    /// Document version, when requested.
    pub version: Option<i64>,
}

impl SearchHit {
    /// Flattens projected fields, keeping the first value of each.
    pub fn flat_fields(&self) -> Map<String, Value> {
        let mut object = Map::new();
        if let Some(fields) = &self.fields {
            for (name, value) in fields {
                let first = match value {
                    Value::Array(values) => values.first().cloned().unwrap_or(Value::Null),
                    other => other.clone(),
                };
                object.insert(name.clone(), first);
            }
        }
        object
    }
}

/// A page of search results.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchResponse {
    /// Cursor for the next page.
    pub scroll_id: Option<String>,
    /// Total number of matching documents.
    pub total: u64,
    /// Hits on this page.
    pub hits: Vec<SearchHit>,
    /// Aggregation results.
    pub aggregations: Option<Value>,
}

fn malformed(what: &str) -> BackendError {
    BackendError::SerializationError {
        message: format!("malformed {what} response"),
    }
}

fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Renders an error object as `type: reason`.
pub fn describe_error(error: &Value) -> String {
    match (
        error.get("type").and_then(Value::as_str),
        error.get("reason").and_then(Value::as_str),
    ) {
        (Some(kind), Some(reason)) => format!("{kind}: {reason}"),
        (Some(kind), None) => kind.to_string(),
        _ => match error {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    }
}

impl MgetItem {
    /// Parses the `docs` of a multi-get response.
    pub fn list_from_json(body: &Value) -> Result<Vec<MgetItem>, BackendError> {
        let docs = body
            .get("docs")
            .and_then(Value::as_array)
            .ok_or_else(|| malformed("mget"))?;

        Ok(docs
            .iter()
            .map(|doc| {
                let found = doc.get("found").and_then(Value::as_bool).unwrap_or(false);
                let version = doc
                    .get("_version")
                    .and_then(Value::as_i64)
                    .map(|version| DocumentVersion {
                        version,
                        seq_no: doc.get("_seq_no").and_then(Value::as_i64),
                        primary_term: doc.get("_primary_term").and_then(Value::as_i64),
                    });
                MgetItem {
                    index: string_field(doc, "_index"),
                    id: string_field(doc, "_id"),
                    found,
                    source: if found { doc.get("_source").cloned() } else { None },
                    version: if found { version } else { None },
                    error: doc.get("error").map(describe_error),
                }
            })
            .collect())
    }
}

impl BulkResponse {
    /// Parses a bulk response body.
    pub fn from_json(body: &Value) -> Result<Self, BackendError> {
        let items = body
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| malformed("bulk"))?;

        let mut parsed = Vec::with_capacity(items.len());
        for item in items {
            let (keyword, detail) = item
                .as_object()
                .and_then(|map| map.iter().next())
                .ok_or_else(|| malformed("bulk item"))?;
            let op = BulkOp::from_keyword(keyword).ok_or_else(|| malformed("bulk item"))?;

            parsed.push(BulkItem {
                op,
                index: string_field(detail, "_index"),
                id: string_field(detail, "_id"),
                status: detail
                    .get("status")
                    .and_then(Value::as_u64)
                    .and_then(|s| u16::try_from(s).ok())
                    .unwrap_or(0),
                result: detail
                    .get("result")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                error: detail.get("error").map(describe_error),
            });
        }

        Ok(BulkResponse {
            errors: body.get("errors").and_then(Value::as_bool).unwrap_or(false),
            items: parsed,
        })
    }
}

/// Reads `hits.total`, which is a number on old clusters and `{value}` on new ones.
pub fn parse_total(total: Option<&Value>) -> u64 {
    match total {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::Object(o)) => o.get("value").and_then(Value::as_u64).unwrap_or(0),
        _ => 0,
    }
}

impl SearchResponse {
    /// Parses a search or scroll response body.
    pub fn from_json(body: &Value) -> Result<Self, BackendError> {
        let hits = body.get("hits").ok_or_else(|| malformed("search"))?;

        let parsed = hits
            .get("hits")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|hit| SearchHit {
                        index: string_field(hit, "_index"),
                        id: string_field(hit, "_id"),
                        source: hit.get("_source").cloned(),
                        fields: hit.get("fields").and_then(Value::as_object).cloned(),
                        version: hit.get("_version").and_then(Value::as_i64),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(SearchResponse {
            scroll_id: body
                .get("_scroll_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            total: parse_total(hits.get("total")),
            hits: parsed,
            aggregations: body.get("aggregations").cloned(),
        })
    }
}

/// Primitives the store needs from the search cluster.
///
/// Implementations report connectivity faults as
/// [`BackendError::NoLivingConnections`] or [`BackendError::RequestTimeout`];
/// every other failure uses the remaining variants.
#[async_trait]
pub trait SearchTransport: Send + Sync + Debug {
    /// Lightweight health probe.
    async fn ping(&self) -> Result<(), BackendError>;

    /// Fetches several documents in one round trip.
    async fn mget(&self, docs: Vec<DocRef>) -> Result<Vec<MgetItem>, BackendError>;

    /// Executes a bulk request, optionally refreshing the touched indexes.
    async fn bulk(&self, actions: Vec<BulkAction>, refresh: bool)
    -> Result<BulkResponse, BackendError>;

    /// Runs a search.
    async fn search(&self, request: SearchRequest) -> Result<SearchResponse, BackendError>;

    /// Fetches the next page of a cursor.
    async fn scroll(&self, scroll_id: &str, keep_alive: &str)
    -> Result<SearchResponse, BackendError>;

    /// Releases a cursor.
    async fn clear_scroll(&self, scroll_id: &str) -> Result<(), BackendError>;

    /// Counts documents matching `body`.
    async fn count(&self, index: &str, body: Value) -> Result<u64, BackendError>;

    /// Creates an index; an index that already exists is not an error.
    async fn create_index(&self, name: &str) -> Result<Value, BackendError>;
}
