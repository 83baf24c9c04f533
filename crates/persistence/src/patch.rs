//! Patch application.
//!
//! A [`PatchProcessor`] turns the pending patches of one object into the
//! partial document sent as the backend update. [`FieldPatcher`] is the
//! default implementation.

use std::fmt::Debug;

use serde_json::{Map, Number, Value};

use crate::error::{StorageError, StorageResult};
use crate::types::{DatabaseObject, Patch, PatchOp};

/// Fields that identify an object and can never be patched.
const PROTECTED_FIELDS: [&str; 3] = ["id", "type", "application_id"];

/// The field-level delta for one object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectDiff {
    /// Changed fields and their new values.
    pub diff: Map<String, Value>,
}

impl ObjectDiff {
    /// Returns true if no field changes.
    pub fn is_empty(&self) -> bool {
        self.diff.is_empty()
    }
}

/// Computes the delta an ordered list of patches makes to an object.
pub trait PatchProcessor: Send + Sync + Debug {
    /// Applies `patches` to `current`, in order.
    ///
    /// Fails with `InvalidPatch` if any patch cannot be applied.
    fn process_object(
        &self,
        patches: &[Patch],
        current: &DatabaseObject,
    ) -> StorageResult<ObjectDiff>;
}

/// Applies `replace`, `increment`, `append` and `remove` to top-level fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldPatcher;

impl PatchProcessor for FieldPatcher {
    fn process_object(
        &self,
        patches: &[Patch],
        current: &DatabaseObject,
    ) -> StorageResult<ObjectDiff> {
        let mut diff = Map::new();

        for patch in patches {
            let target = patch.target()?;
            let field = target.field;

            if PROTECTED_FIELDS.contains(&field) {
                return Err(StorageError::invalid_patch([format!(
                    "field \"{field}\" cannot be patched"
                )]));
            }

            let existing = diff.get(field).or_else(|| current.get(field)).cloned();

            match patch.op {
                PatchOp::Replace => {
                    diff.insert(field.to_string(), patch.value.clone());
                }
                PatchOp::Increment => {
                    let sum = add_numbers(field, existing.as_ref(), &patch.value)?;
                    diff.insert(field.to_string(), sum);
                }
                PatchOp::Append => {
                    let mut items = match existing {
                        None | Some(Value::Null) => Vec::new(),
                        Some(Value::Array(items)) => items,
                        Some(_) => {
                            return Err(StorageError::invalid_patch([format!(
                                "cannot append to non-array field \"{field}\""
                            )]));
                        }
                    };
                    items.push(patch.value.clone());
                    diff.insert(field.to_string(), Value::Array(items));
                }
                PatchOp::Remove => {
                    if patch.value.is_null() {
                        diff.insert(field.to_string(), Value::Null);
                        continue;
                    }
                    match existing {
                        None | Some(Value::Null) => {}
                        Some(Value::Array(mut items)) => {
                            items.retain(|item| item != &patch.value);
                            diff.insert(field.to_string(), Value::Array(items));
                        }
                        Some(_) => {
                            return Err(StorageError::invalid_patch([format!(
                                "cannot remove from non-array field \"{field}\""
                            )]));
                        }
                    }
                }
            }
        }

        Ok(ObjectDiff { diff })
    }
}

fn add_numbers(field: &str, existing: Option<&Value>, delta: &Value) -> StorageResult<Value> {
    let not_numeric =
        || StorageError::invalid_patch([format!("cannot increment \"{field}\" by a non-number")]);

    let delta = match delta {
        Value::Number(n) => n,
        _ => return Err(not_numeric()),
    };
    let base = match existing {
        None | Some(Value::Null) => Number::from(0),
        Some(Value::Number(n)) => n.clone(),
        Some(_) => {
            return Err(StorageError::invalid_patch([format!(
                "field \"{field}\" is not a number"
            )]));
        }
    };

    if let (Some(a), Some(b)) = (base.as_i64(), delta.as_i64()) {
        if let Some(sum) = a.checked_add(b) {
            return Ok(Value::Number(sum.into()));
        }
    }

    let sum = base.as_f64().unwrap_or(0.0) + delta.as_f64().unwrap_or(0.0);
    Number::from_f64(sum)
        .map(Value::Number)
        .ok_or_else(not_numeric)
}
