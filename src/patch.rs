//! Minimal RFC 6902 JSON Patch support: just enough to apply the operations a
//! streaming handler emits to an accumulator, per spec.md §3/§4.3.
//!
//! Handlers are expected to only ever emit `add`/`replace`/`remove` against
//! paths into an array or object accumulator; this is not a general-purpose
//! JSON Patch library.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single RFC 6902 patch operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum JsonPatchOp {
    Add { path: String, value: Value },
    Replace { path: String, value: Value },
    Remove { path: String },
}

/// Applies a single patch operation to `target`, which starts life as
/// `Value::Null` for a fresh accumulator (spec.md §4.3 step 6).
///
/// Supports the two path shapes handlers in this crate actually need:
/// appending to the root array (`"/<index>"`) and replacing/removing the
/// whole document (`"" `/ `"/"`). A handler that needs deeper JSON Pointer
/// paths should pre-flatten its patches before yielding them.
pub fn apply(target: &mut Value, op: &JsonPatchOp) -> Result<(), PatchError> {
    match op {
        JsonPatchOp::Add { path, value } => apply_add(target, path, value.clone()),
        JsonPatchOp::Replace { path, value } => apply_replace(target, path, value.clone()),
        JsonPatchOp::Remove { path } => apply_remove(target, path),
    }
}

fn apply_add(target: &mut Value, path: &str, value: Value) -> Result<(), PatchError> {
    if path.is_empty() || path == "/" {
        *target = value;
        return Ok(());
    }
    if target.is_null() {
        *target = Value::Array(Vec::new());
    }
    let arr = target.as_array_mut().ok_or_else(|| PatchError::NotAnArray(path.to_owned()))?;
    let index = parse_array_index(path, arr.len())?;
    if index >= arr.len() {
        arr.push(value);
    } else {
        arr.insert(index, value);
    }
    Ok(())
}

fn apply_replace(target: &mut Value, path: &str, value: Value) -> Result<(), PatchError> {
    if path.is_empty() || path == "/" {
        *target = value;
        return Ok(());
    }
    let arr = target.as_array_mut().ok_or_else(|| PatchError::NotAnArray(path.to_owned()))?;
    let index = parse_array_index(path, arr.len())?;
    let slot = arr.get_mut(index).ok_or_else(|| PatchError::IndexOutOfBounds(index))?;
    *slot = value;
    Ok(())
}

fn apply_remove(target: &mut Value, path: &str) -> Result<(), PatchError> {
    if path.is_empty() || path == "/" {
        *target = Value::Null;
        return Ok(());
    }
    let arr = target.as_array_mut().ok_or_else(|| PatchError::NotAnArray(path.to_owned()))?;
    let index = parse_array_index(path, arr.len())?;
    if index >= arr.len() {
        return Err(PatchError::IndexOutOfBounds(index));
    }
    arr.remove(index);
    Ok(())
}

fn parse_array_index(path: &str, len: usize) -> Result<usize, PatchError> {
    let rest = path.strip_prefix('/').ok_or_else(|| PatchError::MalformedPath(path.to_owned()))?;
    if rest == "-" {
        return Ok(len);
    }
    rest.parse::<usize>().map_err(|_| PatchError::MalformedPath(path.to_owned()))
}

/// Folds a sequence of patch operations into a single aggregated value,
/// starting from `Value::Null`, as described in spec.md §3 and §6
/// (`$/partialResult` clients reconstruct exactly this aggregate).
pub fn fold<'a>(ops: impl IntoIterator<Item = &'a JsonPatchOp>) -> Result<Value, PatchError> {
    let mut acc = Value::Null;
    for op in ops {
        apply(&mut acc, op)?;
    }
    Ok(acc)
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PatchError {
    #[error("patch path `{0}` does not address an array element")]
    NotAnArray(String),
    #[error("malformed patch path `{0}`")]
    MalformedPath(String),
    #[error("patch index {0} out of bounds")]
    IndexOutOfBounds(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn add(path: &str, value: Value) -> JsonPatchOp {
        JsonPatchOp::Add { path: path.to_owned(), value }
    }

    #[test]
    fn folds_appended_patches_into_array() {
        let ops = vec![add("/0", json!("A")), add("/1", json!("B"))];
        let result = fold(&ops).unwrap();
        assert_eq!(result, json!(["A", "B"]));
    }

    #[test]
    fn streaming_fold_matches_non_streaming_single_shot_result() {
        // The property from spec.md §8: applying the stream of emitted patches
        // reconstructs the same aggregate a non-streaming client receives.
        let streamed_ops = vec![add("/0", json!("A")), add("/1", json!("B"))];
        let streamed = fold(&streamed_ops).unwrap();

        let mut non_streaming_acc = Value::Null;
        for op in &streamed_ops {
            apply(&mut non_streaming_acc, op).unwrap();
        }

        assert_eq!(streamed, non_streaming_acc);
    }

    #[test]
    fn replace_whole_document() {
        let mut acc = json!(["A"]);
        apply(&mut acc, &JsonPatchOp::Replace { path: "".into(), value: json!(42) }).unwrap();
        assert_eq!(acc, json!(42));
    }

    #[test]
    fn remove_rejects_out_of_bounds_index() {
        let mut acc = json!(["A"]);
        let err = apply(&mut acc, &JsonPatchOp::Remove { path: "/5".into() }).unwrap_err();
        assert_eq!(err, PatchError::IndexOutOfBounds(5));
    }
}
