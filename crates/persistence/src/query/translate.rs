//! Translation of generic filter operators into the native query DSL.
//!
//! | generic    | native   |
//! |------------|----------|
//! | `is`       | `term`   |
//! | `not`      | `not`    |
//! | `exists`   | `exists` |
//! | `range`    | `range`  |
//! | `in_array` | `terms`  |
//! | `like`     | `regexp` |
//!
//! `like` payloads are escaped and wrapped as `.*value.*`. Translation never
//! touches the caller's tree: a copy is rewritten and then built.

use serde_json::{Map, Value};

use super::filter::{BuilderNode, FilterBuilder, FilterChild};

const TRANSLATIONS: [(&str, &str); 6] = [
    ("is", "term"),
    ("not", "not"),
    ("exists", "exists"),
    ("range", "range"),
    ("in_array", "terms"),
    ("like", "regexp"),
];

/// Characters escaped inside `like` patterns.
const REGEX_RESERVED: &[char] = &[
    '-', '[', ']', '/', '{', '}', '(', ')', '*', '+', '?', '.', '\\', '^', '$', '|', '"', '#', '@',
    '&', '<', '>', '~',
];

/// Returns the native name for a generic operator.
pub fn native_operator(operator: &str) -> Option<&'static str> {
    TRANSLATIONS
        .iter()
        .find(|(generic, _)| *generic == operator)
        .map(|(_, native)| *native)
}

/// Escapes every regular-expression metacharacter in `text`.
pub fn escape_regex(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() * 2);
    for c in text.chars() {
        if REGEX_RESERVED.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Rewrites filter trees into the native vocabulary.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryTranslator;

impl QueryTranslator {
    /// Translates `builder` and assembles the native query.
    pub fn translate(builder: &FilterBuilder) -> Value {
        Self::translate_tree(builder).build()
    }

    /// Returns a translated copy of `builder`.
    ///
    /// Translating an already translated tree changes nothing.
    pub fn translate_tree(builder: &FilterBuilder) -> FilterBuilder {
        let mut tree = builder.clone().close();
        rewrite_node(&mut tree.root);
        tree
    }
}

fn rewrite_node(node: &mut BuilderNode) {
    for child in node.children.iter_mut() {
        match child {
            FilterChild::Node(nested) => rewrite_node(nested),
            FilterChild::Leaf(leaf) => rewrite_leaf(leaf),
        }
    }
}

fn rewrite_leaf(leaf: &mut Map<String, Value>) {
    let Some(operator) = leaf.keys().next().cloned() else {
        return;
    };

    if operator == "not" {
        // the negated filter is one level down
        if let Some(Value::Object(inner)) = leaf.get_mut("not") {
            if let Some(inner_operator) = inner.keys().next().cloned() {
                rewrite_entry(inner, &inner_operator);
            }
        }
        return;
    }

    rewrite_entry(leaf, &operator);
}

fn rewrite_entry(map: &mut Map<String, Value>, operator: &str) {
    let Some(native) = native_operator(operator) else {
        return;
    };
    if native == operator {
        return;
    }
    let Some(payload) = map.remove(operator) else {
        return;
    };

    let payload = if operator == "like" {
        like_to_regexp(payload)
    } else {
        payload
    };
    map.insert(native.to_string(), payload);
}

fn like_to_regexp(payload: Value) -> Value {
    match payload {
        Value::Object(fields) => Value::Object(
            fields
                .into_iter()
                .map(|(field, value)| {
                    let text = match value {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (field, Value::String(format!(".*{}.*", escape_regex(&text))))
                })
                .collect(),
        ),
        other => other,
    }
}
