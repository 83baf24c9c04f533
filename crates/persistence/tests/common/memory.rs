//! In-memory search cluster.
//!
//! Documents live per index with a version and a sequence number, so
//! conditional updates behave like the real cluster: a stale `if_seq_no`
//! fails the item with status 409. Tests can inject concurrent writers and
//! connectivity faults, and inspect every request the store sent.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use nexxus_persistence::error::BackendError;
use nexxus_persistence::transport::{
    BulkAction, BulkItem, BulkOp, BulkResponse, DocRef, MgetItem, SearchHit, SearchRequest,
    SearchResponse, SearchTransport,
};
use nexxus_persistence::types::DocumentVersion;
use parking_lot::{Mutex, MutexGuard};
use regex::Regex;
use serde_json::{Map, Value, json};

const BACKEND: &str = "memory";

/// A failure the transport can be told to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    NoLivingConnections,
    Timeout,
    Status(u16),
}

impl Fault {
    fn to_error(self) -> BackendError {
        match self {
            Fault::NoLivingConnections => BackendError::NoLivingConnections {
                backend_name: BACKEND.to_string(),
                message: "all nodes are down".to_string(),
            },
            Fault::Timeout => BackendError::RequestTimeout {
                backend_name: BACKEND.to_string(),
                timeout_ms: 30_000,
            },
            Fault::Status(status) => BackendError::Status {
                backend_name: BACKEND.to_string(),
                status,
                message: "injected failure".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone)]
struct StoredDoc {
    source: Value,
    version: i64,
    seq_no: i64,
}

/// A write made by "another client" just before one of ours.
#[derive(Debug, Clone)]
enum Interference {
    Write(Map<String, Value>),
    Delete,
}

#[derive(Debug)]
struct ScrollCursor {
    hits: Vec<SearchHit>,
    position: usize,
    page_size: usize,
}

#[derive(Debug, Default)]
struct State {
    indices: HashMap<String, BTreeMap<String, StoredDoc>>,
    next_seq: i64,
    offline: bool,
    total_skew: u64,
    faults: HashMap<&'static str, VecDeque<Fault>>,
    interference: HashMap<String, VecDeque<Interference>>,
    scrolls: HashMap<String, ScrollCursor>,
    next_scroll: u64,
    calls: Vec<&'static str>,
    bulks: Vec<(Vec<BulkAction>, bool)>,
    searches: Vec<SearchRequest>,
    created_indexes: Vec<String>,
    cleared_scrolls: Vec<String>,
}

impl State {
    fn next_seq(&mut self) -> i64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Writes a full document; returns true if it was created.
    fn write(&mut self, index: &str, id: &str, source: Value) -> bool {
        let seq_no = self.next_seq();
        let docs = self.indices.entry(index.to_string()).or_default();
        match docs.get_mut(id) {
            Some(doc) => {
                doc.source = source;
                doc.version += 1;
                doc.seq_no = seq_no;
                false
            }
            None => {
                docs.insert(
                    id.to_string(),
                    StoredDoc {
                        source,
                        version: 1,
                        seq_no,
                    },
                );
                true
            }
        }
    }

    fn merge(&mut self, index: &str, id: &str, changes: &Map<String, Value>) {
        let seq_no = self.next_seq();
        if let Some(doc) = self.indices.get_mut(index).and_then(|docs| docs.get_mut(id)) {
            if let Value::Object(source) = &mut doc.source {
                for (field, value) in changes {
                    source.insert(field.clone(), value.clone());
                }
            }
            doc.version += 1;
            doc.seq_no = seq_no;
        }
    }

    fn update(
        &mut self,
        index: &str,
        id: &str,
        doc: &Value,
        version: Option<&DocumentVersion>,
    ) -> BulkItem {
        match self.interference.get_mut(id).and_then(VecDeque::pop_front) {
            Some(Interference::Write(changes)) => self.merge(index, id, &changes),
            Some(Interference::Delete) => {
                if let Some(docs) = self.indices.get_mut(index) {
                    docs.remove(id);
                }
            }
            None => {}
        }

        let Some(current) = self.indices.get(index).and_then(|docs| docs.get(id)) else {
            return bulk_item(
                BulkOp::Update,
                index,
                id,
                404,
                None,
                Some("document_missing_exception: document missing"),
            );
        };

        let stale = match version {
            Some(expected) => match expected.sequence() {
                Some((seq_no, _)) => seq_no != current.seq_no,
                None => expected.version != current.version,
            },
            None => false,
        };
        if stale {
            return bulk_item(
                BulkOp::Update,
                index,
                id,
                409,
                None,
                Some("version_conflict_engine_exception: version conflict"),
            );
        }

        let changes = doc.as_object().cloned().unwrap_or_default();
        self.merge(index, id, &changes);
        bulk_item(BulkOp::Update, index, id, 200, Some("updated"), None)
    }
}

fn bulk_item(
    op: BulkOp,
    index: &str,
    id: &str,
    status: u16,
    result: Option<&str>,
    error: Option<&str>,
) -> BulkItem {
    BulkItem {
        op,
        index: index.to_string(),
        id: id.to_string(),
        status,
        result: result.map(str::to_string),
        error: error.map(str::to_string),
    }
}

fn index_not_found(index: &str) -> BackendError {
    BackendError::Status {
        backend_name: BACKEND.to_string(),
        status: 404,
        message: format!("index_not_found_exception: no such index [{index}]"),
    }
}

/// In-process [`SearchTransport`].
#[derive(Debug, Default)]
pub struct MemoryTransport {
    state: Mutex<State>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a document directly, bypassing the call log.
    pub fn seed(&self, index: &str, id: &str, source: Value) {
        self.state.lock().write(index, id, source);
    }

    /// Returns the stored document body.
    pub fn document(&self, index: &str, id: &str) -> Option<Value> {
        self.state
            .lock()
            .indices
            .get(index)
            .and_then(|docs| docs.get(id))
            .map(|doc| doc.source.clone())
    }

    /// Returns the stored document version.
    pub fn version(&self, index: &str, id: &str) -> Option<i64> {
        self.state
            .lock()
            .indices
            .get(index)
            .and_then(|docs| docs.get(id))
            .map(|doc| doc.version)
    }

    /// Makes every request, pings included, fail with no living connections.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Fails the next call of `op` with `fault`.
    pub fn fail_next(&self, op: &'static str, fault: Fault) {
        self.state.lock().faults.entry(op).or_default().push_back(fault);
    }

    /// Applies `changes` to `id` right before the next update of it is checked,
    /// as if another writer got there first.
    pub fn concurrent_write(&self, id: &str, changes: Value) {
        let changes = changes.as_object().cloned().unwrap_or_default();
        self.interfere(id, Interference::Write(changes));
    }

    /// Deletes `id` right before the next update of it is checked.
    pub fn concurrent_delete(&self, id: &str) {
        self.interfere(id, Interference::Delete);
    }

    fn interfere(&self, id: &str, interference: Interference) {
        self.state
            .lock()
            .interference
            .entry(id.to_string())
            .or_default()
            .push_back(interference);
    }

    /// Over-reports search totals by `extra`.
    pub fn skew_totals(&self, extra: u64) {
        self.state.lock().total_skew = extra;
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| **c == op).count()
    }

    pub fn bulks(&self) -> Vec<(Vec<BulkAction>, bool)> {
        self.state.lock().bulks.clone()
    }

    pub fn searches(&self) -> Vec<SearchRequest> {
        self.state.lock().searches.clone()
    }

    pub fn created_indexes(&self) -> Vec<String> {
        self.state.lock().created_indexes.clone()
    }

    pub fn cleared_scrolls(&self) -> Vec<String> {
        self.state.lock().cleared_scrolls.clone()
    }

    pub fn open_scrolls(&self) -> usize {
        self.state.lock().scrolls.len()
    }

    fn begin(&self, op: &'static str) -> Result<MutexGuard<'_, State>, BackendError> {
        let mut state = self.state.lock();
        state.calls.push(op);
        if state.offline {
            return Err(Fault::NoLivingConnections.to_error());
        }
        if let Some(fault) = state.faults.get_mut(op).and_then(VecDeque::pop_front) {
            return Err(fault.to_error());
        }
        Ok(state)
    }
}

#[async_trait]
impl SearchTransport for MemoryTransport {
    async fn ping(&self) -> Result<(), BackendError> {
        self.begin("ping").map(|_| ())
    }

    async fn mget(&self, docs: Vec<DocRef>) -> Result<Vec<MgetItem>, BackendError> {
        let state = self.begin("mget")?;

        Ok(docs
            .into_iter()
            .map(|doc| {
                let Some(stored) = state.indices.get(&doc.index) else {
                    return MgetItem {
                        error: Some(format!(
                            "index_not_found_exception: no such index [{}]",
                            doc.index
                        )),
                        index: doc.index,
                        id: doc.id,
                        found: false,
                        source: None,
                        version: None,
                    };
                };
                match stored.get(&doc.id) {
                    Some(found) => MgetItem {
                        found: true,
                        source: Some(found.source.clone()),
                        version: Some(DocumentVersion {
                            version: found.version,
                            seq_no: Some(found.seq_no),
                            primary_term: Some(1),
                        }),
                        index: doc.index,
                        id: doc.id,
                        error: None,
                    },
                    None => MgetItem {
                        index: doc.index,
                        id: doc.id,
                        found: false,
                        source: None,
                        version: None,
                        error: None,
                    },
                }
            })
            .collect())
    }

    async fn bulk(
        &self,
        actions: Vec<BulkAction>,
        refresh: bool,
    ) -> Result<BulkResponse, BackendError> {
        let mut guard = self.begin("bulk")?;
        let state = &mut *guard;
        state.bulks.push((actions.clone(), refresh));

        let mut items = Vec::with_capacity(actions.len());
        for action in &actions {
            let item = match action {
                BulkAction::Index {
                    index,
                    id,
                    document,
                } => {
                    if state.write(index, id, document.clone()) {
                        bulk_item(BulkOp::Index, index, id, 201, Some("created"), None)
                    } else {
                        bulk_item(BulkOp::Index, index, id, 200, Some("updated"), None)
                    }
                }
                BulkAction::Update {
                    index,
                    id,
                    doc,
                    version,
                } => state.update(index, id, doc, version.as_ref()),
                BulkAction::Delete { index, id } => {
                    let removed = state
                        .indices
                        .get_mut(index)
                        .and_then(|docs| docs.remove(id))
                        .is_some();
                    if removed {
                        bulk_item(BulkOp::Delete, index, id, 200, Some("deleted"), None)
                    } else {
                        bulk_item(BulkOp::Delete, index, id, 404, Some("not_found"), None)
                    }
                }
            };
            items.push(item);
        }

        Ok(BulkResponse {
            errors: items.iter().any(|item| !item.is_success()),
            items,
        })
    }

    async fn search(&self, request: SearchRequest) -> Result<SearchResponse, BackendError> {
        let mut guard = self.begin("search")?;
        let state = &mut *guard;
        state.searches.push(request.clone());

        let docs = state
            .indices
            .get(&request.index)
            .ok_or_else(|| index_not_found(&request.index))?;

        let query = request
            .body
            .get("query")
            .cloned()
            .unwrap_or_else(|| json!({ "match_all": {} }));
        let mut matched: Vec<(&String, &StoredDoc)> = docs
            .iter()
            .filter(|(_, doc)| matches(&query, &doc.source))
            .collect();
        sort_matches(request.body.get("sort"), &mut matched);

        let total = matched.len() as u64 + state.total_skew;
        let aggregations = request
            .body
            .get("aggs")
            .map(|aggs| aggregate(aggs, &matched));
        let projection = projected_fields(&request.body);
        let with_version = request.body.get("version") == Some(&Value::Bool(true));
        let hits: Vec<SearchHit> = matched
            .iter()
            .map(|(id, doc)| to_hit(&request.index, id, doc, projection.as_deref(), with_version))
            .collect();

        let size = request
            .size
            .or_else(|| request.body.get("size").and_then(Value::as_u64))
            .unwrap_or(10) as usize;

        if request.scroll.is_some() {
            let first: Vec<SearchHit> = hits.iter().take(size).cloned().collect();
            state.next_scroll += 1;
            let scroll_id = format!("scroll-{}", state.next_scroll);
            state.scrolls.insert(
                scroll_id.clone(),
                ScrollCursor {
                    position: first.len(),
                    hits,
                    page_size: size,
                },
            );
            return Ok(SearchResponse {
                scroll_id: Some(scroll_id),
                total,
                hits: first,
                aggregations,
            });
        }

        let from = request.from.unwrap_or(0) as usize;
        Ok(SearchResponse {
            scroll_id: None,
            total,
            hits: hits.into_iter().skip(from).take(size).collect(),
            aggregations,
        })
    }

    async fn scroll(
        &self,
        scroll_id: &str,
        _keep_alive: &str,
    ) -> Result<SearchResponse, BackendError> {
        let mut guard = self.begin("scroll")?;
        let state = &mut *guard;
        let skew = state.total_skew;

        let cursor = state
            .scrolls
            .get_mut(scroll_id)
            .ok_or_else(|| BackendError::Status {
                backend_name: BACKEND.to_string(),
                status: 404,
                message: "search_context_missing_exception: no search context".to_string(),
            })?;

        let page: Vec<SearchHit> = cursor
            .hits
            .iter()
            .skip(cursor.position)
            .take(cursor.page_size)
            .cloned()
            .collect();
        cursor.position += page.len();

        Ok(SearchResponse {
            scroll_id: Some(scroll_id.to_string()),
            total: cursor.hits.len() as u64 + skew,
            hits: page,
            aggregations: None,
        })
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<(), BackendError> {
        let mut state = self.begin("clear_scroll")?;
        state.scrolls.remove(scroll_id);
        state.cleared_scrolls.push(scroll_id.to_string());
        Ok(())
    }

    async fn count(&self, index: &str, body: Value) -> Result<u64, BackendError> {
        let state = self.begin("count")?;
        let docs = state.indices.get(index).ok_or_else(|| index_not_found(index))?;
        let query = body
            .get("query")
            .cloned()
            .unwrap_or_else(|| json!({ "match_all": {} }));
        Ok(docs.values().filter(|doc| matches(&query, &doc.source)).count() as u64)
    }

    async fn create_index(&self, name: &str) -> Result<Value, BackendError> {
        let mut state = self.begin("create_index")?;
        state.indices.entry(name.to_string()).or_default();
        state.created_indexes.push(name.to_string());
        Ok(json!({ "acknowledged": true, "index": name }))
    }
}

// ============================================================================
// Query evaluation
// ============================================================================

fn lookup<'a>(source: &'a Value, field: &str) -> Option<&'a Value> {
    field
        .split('.')
        .try_fold(source, |value, segment| value.get(segment))
}

fn field_entry(body: &Value) -> Option<(&str, &Value)> {
    body.as_object()
        .and_then(|map| map.iter().next())
        .map(|(field, value)| (field.as_str(), value))
}

fn scalar_eq(actual: &Value, expected: &Value) -> bool {
    match (actual.as_f64(), expected.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => actual == expected,
    }
}

fn term_eq(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::Array(items) => items.iter().any(|item| scalar_eq(item, expected)),
        other => scalar_eq(other, expected),
    }
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => match (a.as_str(), b.as_str()) {
                (Some(x), Some(y)) => x.cmp(y),
                _ => Ordering::Equal,
            },
        },
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

fn in_range(actual: &Value, bounds: &Value) -> bool {
    let check = |key: &str, accept: fn(Ordering) -> bool| {
        bounds
            .get(key)
            .is_none_or(|bound| accept(compare(Some(actual), Some(bound))))
    };
    check("gte", |o| o != Ordering::Less)
        && check("gt", |o| o == Ordering::Greater)
        && check("lte", |o| o != Ordering::Greater)
        && check("lt", |o| o == Ordering::Less)
}

/// Converts a Lucene regexp into an anchored Rust regex.
fn to_rust_regex(pattern: &str) -> String {
    let mut out = String::from("^(?:");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(next) if next.is_ascii_alphanumeric() => {
                out.push('\\');
                out.push(next);
            }
            Some(next) => out.push_str(&regex::escape(&next.to_string())),
            None => out.push_str("\\\\"),
        }
    }
    out.push_str(")$");
    out
}

fn regexp_matches(actual: &Value, pattern: &Value) -> bool {
    let Some(pattern) = pattern
        .as_str()
        .or_else(|| pattern.get("value").and_then(Value::as_str))
    else {
        return false;
    };
    let Ok(regex) = Regex::new(&to_rust_regex(pattern)) else {
        return false;
    };
    match actual {
        Value::String(s) => regex.is_match(s),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .any(|s| regex.is_match(s)),
        other => regex.is_match(&other.to_string()),
    }
}

fn bool_matches(body: &Value, source: &Value) -> bool {
    let clauses = |key: &str| {
        body.get(key)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    };

    let required = clauses("filter").into_iter().chain(clauses("must"));
    if !required.into_iter().all(|q| matches(&q, source)) {
        return false;
    }
    if clauses("must_not").iter().any(|q| matches(q, source)) {
        return false;
    }

    let should = clauses("should");
    if should.is_empty() {
        return true;
    }
    let minimum = body
        .get("minimum_should_match")
        .and_then(Value::as_u64)
        .unwrap_or(1) as usize;
    should.iter().filter(|q| matches(q, source)).count() >= minimum
}

fn matches(query: &Value, source: &Value) -> bool {
    let Some((kind, body)) = query.as_object().and_then(|map| map.iter().next()) else {
        return true;
    };

    match kind.as_str() {
        "match_all" => true,
        "bool" => bool_matches(body, source),
        "term" => field_entry(body).is_some_and(|(field, expected)| {
            lookup(source, field).is_some_and(|actual| term_eq(actual, expected))
        }),
        "terms" => field_entry(body).is_some_and(|(field, expected)| {
            let (Some(actual), Some(candidates)) = (lookup(source, field), expected.as_array())
            else {
                return false;
            };
            candidates.iter().any(|candidate| term_eq(actual, candidate))
        }),
        "exists" => body
            .get("field")
            .and_then(Value::as_str)
            .and_then(|field| lookup(source, field))
            .is_some_and(|value| !value.is_null()),
        "range" => field_entry(body).is_some_and(|(field, bounds)| {
            lookup(source, field).is_some_and(|actual| in_range(actual, bounds))
        }),
        "regexp" => field_entry(body).is_some_and(|(field, pattern)| {
            lookup(source, field).is_some_and(|actual| regexp_matches(actual, pattern))
        }),
        _ => false,
    }
}

fn sort_matches(sort: Option<&Value>, matched: &mut [(&String, &StoredDoc)]) {
    let Some(clauses) = sort.and_then(Value::as_array) else {
        return;
    };

    // stable sorts applied last-key-first give lexicographic order
    for clause in clauses.iter().rev() {
        let Some((field, spec)) = field_entry(clause) else {
            continue;
        };
        if field.starts_with('_') {
            continue;
        }
        let descending = spec.get("order").and_then(Value::as_str) == Some("desc");
        matched.sort_by(|a, b| {
            let ordering = compare(lookup(&a.1.source, field), lookup(&b.1.source, field));
            if descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }
}

fn aggregate(aggs: &Value, matched: &[(&String, &StoredDoc)]) -> Value {
    let mut out = Map::new();
    let Some(aggs) = aggs.as_object() else {
        return Value::Object(out);
    };

    for (name, spec) in aggs {
        let value = field_entry(spec)
            .map(|(kind, body)| {
                let field = body.get("field").and_then(Value::as_str).unwrap_or_default();
                let numbers: Vec<f64> = matched
                    .iter()
                    .filter_map(|(_, doc)| lookup(&doc.source, field))
                    .filter_map(Value::as_f64)
                    .collect();
                let sum: f64 = numbers.iter().sum();
                match kind {
                    "sum" => json!(sum),
                    "max" => numbers
                        .iter()
                        .copied()
                        .reduce(f64::max)
                        .map_or(Value::Null, |v| json!(v)),
                    "min" => numbers
                        .iter()
                        .copied()
                        .reduce(f64::min)
                        .map_or(Value::Null, |v| json!(v)),
                    "avg" if !numbers.is_empty() => json!(sum / numbers.len() as f64),
                    "value_count" => json!(numbers.len()),
                    _ => Value::Null,
                }
            })
            .unwrap_or(Value::Null);
        out.insert(name.clone(), json!({ "value": value }));
    }
    Value::Object(out)
}

fn projected_fields(body: &Value) -> Option<Vec<String>> {
    if body.get("_source") != Some(&Value::Bool(false)) {
        return None;
    }
    Some(
        body.get("fields")
            .and_then(Value::as_array)
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    )
}

fn to_hit(
    index: &str,
    id: &str,
    doc: &StoredDoc,
    projection: Option<&[String]>,
    with_version: bool,
) -> SearchHit {
    let version = with_version.then_some(doc.version);
    match projection {
        Some(fields) => {
            let mut projected = Map::new();
            for field in fields {
                if let Some(value) = lookup(&doc.source, field) {
                    let values = match value {
                        Value::Array(items) => items.clone(),
                        other => vec![other.clone()],
                    };
                    projected.insert(field.clone(), Value::Array(values));
                }
            }
            SearchHit {
                index: index.to_string(),
                id: id.to_string(),
                source: None,
                fields: Some(projected),
                version,
            }
        }
        None => SearchHit {
            index: index.to_string(),
            id: id.to_string(),
            source: Some(doc.source.clone()),
            fields: None,
            version,
        },
    }
}
