//! Patch application
//!
//! Applies an ordered batch of JSON-Patch style operations to a document.
//! Application is all-or-nothing: operations run against a working copy and
//! the copy is only returned when every operation succeeded.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::pointer::Pointer;

/// Errors raised while applying a patch batch
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PatchError {
    /// The operation itself is malformed or not allowed at this location
    #[error("Invalid operation at '{path}': {reason}")]
    InvalidOperation { path: String, reason: String },

    /// A segment of the path does not resolve (missing key, index out of range)
    #[error("Path not found: '{path}'")]
    PathNotFound { path: Pointer },

    /// A segment traverses into a scalar
    #[error("Type mismatch at '{path}': cannot index into a {found}")]
    TypeMismatch { path: Pointer, found: &'static str },

    /// A `test` operation compared unequal
    #[error("Test failed at '{path}'")]
    TestFailed { path: Pointer },
}

impl PatchError {
    fn invalid(path: &Pointer, reason: impl Into<String>) -> Self {
        PatchError::InvalidOperation {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// A single patch operation, in its wire format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Add { path: Pointer, value: Value },
    Remove { path: Pointer },
    Replace { path: Pointer, value: Value },
    Move { from: Pointer, path: Pointer },
    Copy { from: Pointer, path: Pointer },
    Test { path: Pointer, value: Value },
}

impl PatchOp {
    /// The path this operation targets
    pub fn path(&self) -> &Pointer {
        match self {
            PatchOp::Add { path, .. }
            | PatchOp::Remove { path }
            | PatchOp::Replace { path, .. }
            | PatchOp::Move { path, .. }
            | PatchOp::Copy { path, .. }
            | PatchOp::Test { path, .. } => path,
        }
    }

    /// Short name of the operation, as used on the wire
    pub fn name(&self) -> &'static str {
        match self {
            PatchOp::Add { .. } => "add",
            PatchOp::Remove { .. } => "remove",
            PatchOp::Replace { .. } => "replace",
            PatchOp::Move { .. } => "move",
            PatchOp::Copy { .. } => "copy",
            PatchOp::Test { .. } => "test",
        }
    }
}

/// An ordered sequence of operations applied as one unit
pub type PatchBatch = Vec<PatchOp>;

/// Decode the operation objects of one stream message
///
/// `items` is the already parsed JSON array; an element that is not a valid
/// operation object fails the whole batch.
pub fn decode_ops(items: Vec<Value>) -> Result<PatchBatch, PatchError> {
    items
        .into_iter()
        .map(|item| {
            let path = item
                .get("path")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            serde_json::from_value::<PatchOp>(item).map_err(|e| PatchError::InvalidOperation {
                path,
                reason: e.to_string(),
            })
        })
        .collect()
}

/// Apply `batch` to a copy of `document`
///
/// Returns the patched copy, or the first error. `document` is never touched.
pub fn apply(document: &Value, batch: &[PatchOp]) -> Result<Value, PatchError> {
    let mut working = document.clone();
    for op in batch {
        apply_op(&mut working, op)?;
    }
    Ok(working)
}

fn apply_op(doc: &mut Value, op: &PatchOp) -> Result<(), PatchError> {
    match op {
        PatchOp::Add { path, value } => add(doc, path, value.clone()),
        PatchOp::Remove { path } => remove(doc, path).map(|_| ()),
        PatchOp::Replace { path, value } => {
            let target = resolve_mut(doc, path)?;
            *target = value.clone();
            Ok(())
        }
        PatchOp::Move { from, path } => {
            if from == path {
                return Ok(());
            }
            if from.is_proper_prefix_of(path) {
                return Err(PatchError::invalid(path, "cannot move a value into itself"));
            }
            let value = remove(doc, from)?;
            add(doc, path, value)
        }
        PatchOp::Copy { from, path } => {
            let value = resolve(doc, from)?.clone();
            add(doc, path, value)
        }
        PatchOp::Test { path, value } => {
            if resolve(doc, path)? == value {
                Ok(())
            } else {
                Err(PatchError::TestFailed { path: path.clone() })
            }
        }
    }
}

fn add(doc: &mut Value, path: &Pointer, value: Value) -> Result<(), PatchError> {
    let Some((parent_path, key)) = path.split_last() else {
        *doc = value;
        return Ok(());
    };
    match resolve_mut(doc, &parent_path)? {
        Value::Object(map) => {
            map.insert(key.to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            if key == "-" {
                items.push(value);
                return Ok(());
            }
            let index = parse_index(path, key)?;
            if index > items.len() {
                return Err(PatchError::PathNotFound { path: path.clone() });
            }
            items.insert(index, value);
            Ok(())
        }
        other => Err(PatchError::TypeMismatch {
            path: parent_path.clone(),
            found: kind(other),
        }),
    }
}

fn remove(doc: &mut Value, path: &Pointer) -> Result<Value, PatchError> {
    let Some((parent_path, key)) = path.split_last() else {
        return Err(PatchError::invalid(path, "cannot remove the document root"));
    };
    match resolve_mut(doc, &parent_path)? {
        Value::Object(map) => map
            .remove(key)
            .ok_or_else(|| PatchError::PathNotFound { path: path.clone() }),
        Value::Array(items) => {
            let index = parse_index(path, key)?;
            if index >= items.len() {
                return Err(PatchError::PathNotFound { path: path.clone() });
            }
            Ok(items.remove(index))
        }
        other => Err(PatchError::TypeMismatch {
            path: parent_path.clone(),
            found: kind(other),
        }),
    }
}

fn resolve<'a>(doc: &'a Value, path: &Pointer) -> Result<&'a Value, PatchError> {
    let mut current = doc;
    for (depth, segment) in path.segments().iter().enumerate() {
        current = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => items.get(parse_index(path, segment)?),
            other => {
                return Err(PatchError::TypeMismatch {
                    path: Pointer::from_segments(path.segments()[..depth].iter().cloned()),
                    found: kind(other),
                })
            }
        }
        .ok_or_else(|| PatchError::PathNotFound { path: path.clone() })?;
    }
    Ok(current)
}

fn resolve_mut<'a>(doc: &'a mut Value, path: &Pointer) -> Result<&'a mut Value, PatchError> {
    let mut current = doc;
    for (depth, segment) in path.segments().iter().enumerate() {
        current = match current {
            Value::Object(map) => map.get_mut(segment),
            Value::Array(items) => {
                let index = parse_index(path, segment)?;
                items.get_mut(index)
            }
            other => {
                return Err(PatchError::TypeMismatch {
                    path: Pointer::from_segments(path.segments()[..depth].iter().cloned()),
                    found: kind(other),
                })
            }
        }
        .ok_or_else(|| PatchError::PathNotFound { path: path.clone() })?;
    }
    Ok(current)
}

/// Array indices are plain decimal without leading zeros
fn parse_index(path: &Pointer, segment: &str) -> Result<usize, PatchError> {
    let well_formed = !segment.is_empty()
        && segment.bytes().all(|b| b.is_ascii_digit())
        && (segment == "0" || !segment.starts_with('0'));
    if !well_formed {
        return Err(PatchError::invalid(
            path,
            format!("'{}' is not a valid array index", segment),
        ));
    }
    segment
        .parse()
        .map_err(|_| PatchError::PathNotFound { path: path.clone() })
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
