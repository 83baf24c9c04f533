//! Generic filter trees.
//!
//! A [`FilterBuilder`] holds a tree of boolean combinators ([`BuilderNode`])
//! whose leaves are single-key mappings `{operator: payload}`, for example
//! `{"is": {"status": "open"}}`. The builder is backend-neutral; operator names
//! are rewritten into the native vocabulary by
//! [`QueryTranslator`](super::QueryTranslator) before [`FilterBuilder::build`]
//! assembles the native query.
//!
//! # Examples
//!
//! ```
//! use nexxus_persistence::query::FilterBuilder;
//! use serde_json::json;
//!
//! // status == "open" AND (likes in range OR author exists)
//! let filter = FilterBuilder::new()
//!     .add_filter("is", "status", json!("open"))
//!     .or()
//!     .add_filter("range", "likes", json!({"gte": 10}))
//!     .add_filter("exists", "field", json!("author"))
//!     .end();
//!
//! assert!(!filter.is_empty());
//! ```

use serde_json::{Map, Value, json};

use crate::error::{StorageError, StorageResult};

/// Boolean relation of a composite node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Relation {
    /// Every child must match.
    #[default]
    And,
    /// At least one child must match.
    Or,
}

impl Relation {
    fn keyword(&self) -> &'static str {
        match self {
            Relation::And => "and",
            Relation::Or => "or",
        }
    }

    fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "and" => Some(Relation::And),
            "or" => Some(Relation::Or),
            _ => None,
        }
    }
}

/// A composite node of the filter tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BuilderNode {
    /// How children combine.
    pub relation: Relation,
    /// Nested nodes and leaves, in insertion order.
    pub children: Vec<FilterChild>,
}

/// A child of a [`BuilderNode`].
#[derive(Debug, Clone, PartialEq)]
pub enum FilterChild {
    /// A nested combinator.
    Node(BuilderNode),
    /// A single-key mapping `{operator: payload}`.
    Leaf(Map<String, Value>),
}

impl BuilderNode {
    /// Creates an empty node.
    pub fn new(relation: Relation) -> Self {
        Self {
            relation,
            children: Vec::new(),
        }
    }

    fn build(&self) -> Value {
        let clauses: Vec<Value> = self.children.iter().map(FilterChild::build).collect();
        match self.relation {
            Relation::And => json!({"bool": {"filter": clauses}}),
            Relation::Or => json!({"bool": {"should": clauses, "minimum_should_match": 1}}),
        }
    }

    fn to_json(&self) -> Value {
        let children: Vec<Value> = self
            .children
            .iter()
            .map(|child| match child {
                FilterChild::Node(node) => node.to_json(),
                FilterChild::Leaf(leaf) => Value::Object(leaf.clone()),
            })
            .collect();
        let mut map = Map::new();
        map.insert(self.relation.keyword().to_string(), Value::Array(children));
        Value::Object(map)
    }
}

impl FilterChild {
    fn build(&self) -> Value {
        match self {
            FilterChild::Node(node) => node.build(),
            FilterChild::Leaf(leaf) => match leaf.get("not") {
                Some(inner) if leaf.len() == 1 => json!({"bool": {"must_not": [inner]}}),
                _ => Value::Object(leaf.clone()),
            },
        }
    }
}

/// Builds a filter tree.
///
/// Groups opened with [`and`](Self::and) / [`or`](Self::or) collect the
/// following filters until [`end`](Self::end) attaches them to their parent.
/// Groups left open are closed implicitly when the tree is built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterBuilder {
    /// The root combinator.
    pub root: BuilderNode,
    open: Vec<BuilderNode>,
}

impl FilterBuilder {
    /// Creates an empty builder whose root is an `and` node.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty builder with the given root relation.
    pub fn with_relation(relation: Relation) -> Self {
        Self {
            root: BuilderNode::new(relation),
            open: Vec::new(),
        }
    }

    fn current_mut(&mut self) -> &mut BuilderNode {
        match self.open.last_mut() {
            Some(node) => node,
            None => &mut self.root,
        }
    }

    /// Adds the leaf `{operator: {field: value}}` to the current group.
    pub fn add_filter(self, operator: &str, field: &str, value: Value) -> Self {
        self.add_leaf(leaf_for(operator, field, value))
    }

    /// Adds the negated leaf `{not: {operator: {field: value}}}` to the current group.
    pub fn add_not(self, operator: &str, field: &str, value: Value) -> Self {
        let mut leaf = Map::new();
        leaf.insert("not".to_string(), Value::Object(leaf_for(operator, field, value)));
        self.add_leaf(leaf)
    }

    /// Adds a raw leaf to the current group.
    pub fn add_leaf(mut self, leaf: Map<String, Value>) -> Self {
        self.current_mut().children.push(FilterChild::Leaf(leaf));
        self
    }

    /// Opens a nested `and` group.
    pub fn and(mut self) -> Self {
        self.open.push(BuilderNode::new(Relation::And));
        self
    }

    /// Opens a nested `or` group.
    pub fn or(mut self) -> Self {
        self.open.push(BuilderNode::new(Relation::Or));
        self
    }

    /// Closes the innermost open group. Does nothing at the root.
    pub fn end(mut self) -> Self {
        if let Some(node) = self.open.pop() {
            self.current_mut().children.push(FilterChild::Node(node));
        }
        self
    }

    /// Closes every open group.
    pub fn close(mut self) -> Self {
        while !self.open.is_empty() {
            self = self.end();
        }
        self
    }

    /// Returns true if the tree has no leaves or groups at all.
    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty() && self.open.iter().all(|n| n.children.is_empty())
    }

    /// Assembles the native boolean query.
    ///
    /// Leaves are emitted verbatim, so operator names must already be in the
    /// native vocabulary.
    pub fn build(&self) -> Value {
        if self.open.is_empty() {
            self.root.build()
        } else {
            self.clone().close().root.build()
        }
    }

    /// Returns the tree in its generic JSON form (`{"and": [...]}`).
    pub fn to_json(&self) -> Value {
        self.clone().close().root.to_json()
    }

    /// Parses the generic JSON form.
    ///
    /// The top level is either a group (`{"and": [...]}` or `{"or": [...]}`)
    /// or a single leaf, which is wrapped in an `and` root.
    pub fn from_json(value: &Value) -> StorageResult<Self> {
        let map = single_key(value)?;
        let (key, payload) = first_entry(map)?;

        match (Relation::from_keyword(key), payload) {
            (Some(relation), Value::Array(_)) => Ok(Self {
                root: parse_node(relation, payload)?,
                open: Vec::new(),
            }),
            _ => {
                let mut root = BuilderNode::new(Relation::And);
                root.children.push(FilterChild::Leaf(map.clone()));
                Ok(Self {
                    root,
                    open: Vec::new(),
                })
            }
        }
    }
}

fn leaf_for(operator: &str, field: &str, value: Value) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert(field.to_string(), value);
    let mut leaf = Map::new();
    leaf.insert(operator.to_string(), Value::Object(payload));
    leaf
}

fn invalid(message: &str) -> StorageError {
    StorageError::invalid_field_value([format!("invalid filter: {message}")])
}

fn single_key(value: &Value) -> StorageResult<&Map<String, Value>> {
    match value {
        Value::Object(map) if map.len() == 1 => Ok(map),
        Value::Object(_) => Err(invalid("expected exactly one key per filter")),
        _ => Err(invalid("expected an object")),
    }
}

fn first_entry(map: &Map<String, Value>) -> StorageResult<(&str, &Value)> {
    map.iter()
        .next()
        .map(|(k, v)| (k.as_str(), v))
        .ok_or_else(|| invalid("expected exactly one key per filter"))
}

fn parse_node(relation: Relation, payload: &Value) -> StorageResult<BuilderNode> {
    let items = payload
        .as_array()
        .ok_or_else(|| invalid("group must be an array"))?;

    let mut node = BuilderNode::new(relation);
    for item in items {
        let map = single_key(item)?;
        let (key, child) = first_entry(map)?;
        match (Relation::from_keyword(key), child) {
            (Some(nested), Value::Array(_)) => {
                node.children.push(FilterChild::Node(parse_node(nested, child)?))
            }
            _ => node.children.push(FilterChild::Leaf(map.clone())),
        }
    }
    Ok(node)
}
