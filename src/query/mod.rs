//! Query validation and typed update-operation decoding.

pub mod update;
pub mod validate;

pub use update::{Pointer, UpdateMap, UpdateOperation, UpdateValue};
pub use validate::{validate_nested_keys, validate_query, validate_write_key};

use serde_json::Value;

use crate::JsonMap;

/// Resolves a possibly dotted key path inside an object.
pub(crate) fn lookup_path<'a>(object: &'a JsonMap, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = object.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Sets a value at a possibly dotted key path, creating intermediate objects.
pub(crate) fn set_path(object: &mut JsonMap, path: &str, value: Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let last = segments.pop().expect("key paths are never empty");
    let mut current = object;
    for segment in segments {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(JsonMap::new()));
        if !entry.is_object() {
            *entry = Value::Object(JsonMap::new());
        }
        current = entry.as_object_mut().expect("just ensured an object");
    }
    current.insert(last.to_string(), value);
}

/// Removes the value at a possibly dotted key path.
pub(crate) fn remove_path(object: &mut JsonMap, path: &str) -> Option<Value> {
    let mut segments: Vec<&str> = path.split('.').collect();
    let last = segments.pop()?;
    let mut current = object;
    for segment in segments {
        current = current.get_mut(segment)?.as_object_mut()?;
    }
    current.remove(last)
}
