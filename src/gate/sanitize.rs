//! Conversions between the REST object shape and the storage row shape, and
//! re-expansion of atomic-operation results.

use serde_json::Value;

use crate::error::{DataGateError, DataGateResult};
use crate::query::update::{UpdateMap, UpdateOperation, UpdateValue};
use crate::query::{lookup_path, set_path};
use crate::JsonMap;

fn acl_principals(acl: &Value) -> DataGateResult<(Vec<Value>, Vec<Value>)> {
    let acl = acl
        .as_object()
        .ok_or_else(|| DataGateError::IncorrectType("invalid ACL value".to_string()))?;
    let mut readers = Vec::new();
    let mut writers = Vec::new();
    for (principal, grants) in acl {
        let grants = grants
            .as_object()
            .ok_or_else(|| DataGateError::IncorrectType("invalid ACL value".to_string()))?;
        if grants.get("read").and_then(Value::as_bool) == Some(true) {
            readers.push(Value::String(principal.clone()));
        }
        if grants.get("write").and_then(Value::as_bool) == Some(true) {
            writers.push(Value::String(principal.clone()));
        }
    }
    Ok((readers, writers))
}

/// Replaces a REST `ACL` mapping with the parallel `_rperm`/`_wperm` id lists
/// the storage engine persists.
pub fn transform_object_acl(object: JsonMap) -> DataGateResult<JsonMap> {
    let mut object = object;
    let Some(acl) = object.remove("ACL") else {
        return Ok(object);
    };
    let (readers, writers) = acl_principals(&acl)?;
    object.insert("_rperm".to_string(), Value::Array(readers));
    object.insert("_wperm".to_string(), Value::Array(writers));
    Ok(object)
}

/// The update-shaped counterpart of [`transform_object_acl`]: a literal `ACL`
/// replacement becomes literal `_rperm`/`_wperm` replacements.
pub fn transform_acl_update(update: UpdateMap) -> DataGateResult<UpdateMap> {
    let mut update = update;
    let Some(value) = update.remove("ACL") else {
        return Ok(update);
    };
    let UpdateValue::Set(acl) = value else {
        return Err(DataGateError::IncorrectType(
            "ACL can only be replaced, not operated on".to_string(),
        ));
    };
    let (readers, writers) = acl_principals(&acl)?;
    update.insert(
        "_rperm".to_string(),
        UpdateValue::Set(Value::Array(readers)),
    );
    update.insert(
        "_wperm".to_string(),
        UpdateValue::Set(Value::Array(writers)),
    );
    Ok(update)
}

/// Rebuilds the REST `ACL` mapping from the stored `_rperm`/`_wperm` lists.
/// Objects stored before ACLs existed carry neither list and come back
/// without an `ACL` key.
pub fn untransform_object_acl(object: JsonMap) -> JsonMap {
    let mut object = object;
    let readers = object.remove("_rperm");
    let writers = object.remove("_wperm");
    if readers.is_none() && writers.is_none() {
        return object;
    }

    let mut acl = JsonMap::new();
    if let Some(Value::Array(readers)) = readers {
        for principal in readers.iter().filter_map(Value::as_str) {
            acl.insert(
                principal.to_string(),
                serde_json::json!({ "read": true }),
            );
        }
    }
    if let Some(Value::Array(writers)) = writers {
        for principal in writers.iter().filter_map(Value::as_str) {
            match acl.get_mut(principal) {
                Some(Value::Object(grants)) => {
                    grants.insert("write".to_string(), Value::Bool(true));
                }
                _ => {
                    acl.insert(
                        principal.to_string(),
                        serde_json::json!({ "write": true }),
                    );
                }
            }
        }
    }
    object.insert("ACL".to_string(), Value::Object(acl));
    object
}

/// Reconstitutes the results of atomic field operations onto their original
/// (possibly dotted) key paths, so a caller incrementing `stats.score` gets
/// the post-increment value back under that same path.
pub fn sanitize_database_result(original: &UpdateMap, result: Option<&JsonMap>) -> JsonMap {
    let mut response = JsonMap::new();
    let Some(result) = result else {
        return response;
    };
    for (key, value) in original {
        let reconstituted = matches!(
            value,
            UpdateValue::Op(UpdateOperation::Increment { .. })
                | UpdateValue::Op(UpdateOperation::Add { .. })
                | UpdateValue::Op(UpdateOperation::AddUnique { .. })
                | UpdateValue::Op(UpdateOperation::Remove { .. })
        );
        if reconstituted {
            if let Some(updated) = lookup_path(result, key) {
                set_path(&mut response, key, updated.clone());
            }
        }
    }
    response
}
