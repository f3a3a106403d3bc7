//! Query and update-key validation.
//!
//! `validate_query` also restructures top-level `$or` queries for
//! index-friendliness: storage engines cannot use per-branch indexes when a
//! `$or` shares the top level with other predicates, so every other predicate
//! is hoisted into each branch. The transform must never change query
//! semantics, which is why predicates already constrained in some branch and
//! geo-proximity predicates are left alone.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::constants::SPECIAL_QUERY_KEYS;
use crate::error::{DataGateError, DataGateResult};
use crate::JsonMap;

static FIELD_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_.]*$").expect("static regex"));
static WRITE_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*$").expect("static regex"));
static REGEX_OPTIONS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[imxs]+$").expect("static regex"));
static AUTH_DATA_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^authData\.[a-zA-Z0-9_]+\.id$").expect("static regex"));

fn has_near_operator(constraint: &Value) -> bool {
    constraint
        .as_object()
        .map_or(false, |c| c.contains_key("$near") || c.contains_key("$nearSphere"))
}

/// Validates a query and returns its index-friendly restructuring.
///
/// Fails with `InvalidQuery` on a literal ACL constraint, malformed
/// `$or`/`$and`/`$nor`, or invalid `$options`; with `InvalidKeyName` on field
/// names outside the identifier grammar.
pub fn validate_query(query: &JsonMap) -> DataGateResult<JsonMap> {
    let mut query = query.clone();

    if query.contains_key("ACL") {
        return Err(DataGateError::InvalidQuery("Cannot query on ACL.".to_string()));
    }

    if let Some(or_value) = query.remove("$or") {
        let branches = match or_value {
            Value::Array(branches) => branches,
            _ => {
                return Err(DataGateError::InvalidQuery(
                    "Bad $or format - use an array value.".to_string(),
                ))
            }
        };
        let mut branches: Vec<JsonMap> = branches
            .into_iter()
            .map(|b| {
                b.as_object().cloned().ok_or_else(|| {
                    DataGateError::InvalidQuery("Bad $or format - use an array value.".to_string())
                })
            })
            .collect::<DataGateResult<_>>()?;

        // Hoist every other top-level predicate into each branch, unless some
        // branch already constrains that key or the predicate is a
        // geo-proximity constraint.
        let top_keys: Vec<String> = query.keys().cloned().collect();
        for key in top_keys {
            let constrained_in_branch = branches.iter().any(|b| b.contains_key(&key));
            if constrained_in_branch || has_near_operator(&query[&key]) {
                continue;
            }
            let predicate = query.remove(&key).expect("key came from the map");
            for branch in &mut branches {
                branch.insert(key.clone(), predicate.clone());
            }
        }

        let validated: Vec<Value> = branches
            .iter()
            .map(|b| validate_query(b).map(Value::Object))
            .collect::<DataGateResult<_>>()?;
        query.insert("$or".to_string(), Value::Array(validated));
    }

    if let Some(and_value) = query.remove("$and") {
        let branches = and_value.as_array().ok_or_else(|| {
            DataGateError::InvalidQuery("Bad $and format - use an array value.".to_string())
        })?;
        let validated: Vec<Value> = branches
            .iter()
            .map(|b| {
                let branch = b.as_object().ok_or_else(|| {
                    DataGateError::InvalidQuery("Bad $and format - use an array value.".to_string())
                })?;
                validate_query(branch).map(Value::Object)
            })
            .collect::<DataGateResult<_>>()?;
        query.insert("$and".to_string(), Value::Array(validated));
    }

    if let Some(nor_value) = query.remove("$nor") {
        let branches = nor_value.as_array().filter(|b| !b.is_empty()).ok_or_else(|| {
            DataGateError::InvalidQuery(
                "Bad $nor format - use an array of at least 1 value.".to_string(),
            )
        })?;
        let validated: Vec<Value> = branches
            .iter()
            .map(|b| {
                let branch = b.as_object().ok_or_else(|| {
                    DataGateError::InvalidQuery(
                        "Bad $nor format - use an array of at least 1 value.".to_string(),
                    )
                })?;
                validate_query(branch).map(Value::Object)
            })
            .collect::<DataGateResult<_>>()?;
        query.insert("$nor".to_string(), Value::Array(validated));
    }

    for (key, value) in &query {
        if let Some(constraint) = value.as_object() {
            if constraint.contains_key("$regex") {
                if let Some(Value::String(options)) = constraint.get("$options") {
                    if !REGEX_OPTIONS.is_match(options) {
                        return Err(DataGateError::InvalidQuery(format!(
                            "Invalid $options value for query: {}",
                            options
                        )));
                    }
                }
            }
        }
        if !SPECIAL_QUERY_KEYS.contains(&key.as_str()) && !FIELD_NAME.is_match(key) {
            return Err(DataGateError::InvalidKeyName(format!(
                "Invalid key name: {}",
                key
            )));
        }
    }

    Ok(query)
}

/// Validates a field name used in a create or update payload.
///
/// Internal underscore-prefixed storage fields are writable (the mediation
/// layer itself produces them), but the reserved `authData.<provider>.id`
/// sub-paths of the user class are not updatable and operator characters are
/// never allowed.
pub fn validate_write_key(class_name: &str, key: &str) -> DataGateResult<()> {
    if class_name == "_User" && AUTH_DATA_ID.is_match(key) {
        return Err(DataGateError::InvalidKeyName(format!(
            "Invalid field name for update: {}",
            key
        )));
    }
    if !WRITE_KEY.is_match(key) {
        return Err(DataGateError::InvalidKeyName(format!(
            "Invalid field name: {}",
            key
        )));
    }
    Ok(())
}

/// Rejects operator characters inside nested keys of a stored value.
pub fn validate_nested_keys(value: &Value) -> DataGateResult<()> {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                if key.contains('$') || key.contains('.') {
                    return Err(DataGateError::InvalidNestedKey(
                        "Nested keys should not contain the '$' or '.' characters".to_string(),
                    ));
                }
                validate_nested_keys(nested)?;
            }
        }
        Value::Array(items) => {
            for item in items {
                validate_nested_keys(item)?;
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(value: Value) -> JsonMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_or_hoisting() {
        let query = as_map(json!({"$or": [{"a": 1}, {"a": 2}], "b": 2}));
        let validated = validate_query(&query).unwrap();
        assert_eq!(
            Value::Object(validated),
            json!({"$or": [{"a": 1, "b": 2}, {"a": 2, "b": 2}]})
        );
    }

    #[test]
    fn test_or_hoisting_skips_near() {
        let query = as_map(json!({
            "$or": [{"a": 1}, {"a": 2}],
            "b": {"$near": {"__type": "GeoPoint", "latitude": 0.0, "longitude": 0.0}}
        }));
        let validated = validate_query(&query).unwrap();
        assert!(validated.contains_key("b"));
        let or = validated.get("$or").and_then(Value::as_array).unwrap();
        assert!(or.iter().all(|b| !b.as_object().unwrap().contains_key("b")));
    }

    #[test]
    fn test_or_hoisting_skips_constrained_branches() {
        let query = as_map(json!({"$or": [{"a": 1}, {"b": 5}], "b": 2}));
        let validated = validate_query(&query).unwrap();
        // Some branch already constrains b, so b stays at the top level.
        assert_eq!(validated.get("b"), Some(&json!(2)));
    }

    #[test]
    fn test_acl_query_rejected() {
        let query = as_map(json!({"ACL": {"u1": {"read": true}}}));
        assert!(matches!(
            validate_query(&query),
            Err(DataGateError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_bad_or_shape_rejected() {
        let query = as_map(json!({"$or": {"a": 1}}));
        assert!(matches!(
            validate_query(&query),
            Err(DataGateError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_empty_nor_rejected() {
        let query = as_map(json!({"$nor": []}));
        assert!(matches!(
            validate_query(&query),
            Err(DataGateError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_bad_regex_options_rejected() {
        let query = as_map(json!({"name": {"$regex": "^a", "$options": "g"}}));
        assert!(matches!(
            validate_query(&query),
            Err(DataGateError::InvalidQuery(_))
        ));
        let query = as_map(json!({"name": {"$regex": "^a", "$options": "im"}}));
        assert!(validate_query(&query).is_ok());
    }

    #[test]
    fn test_bad_key_name_rejected() {
        let query = as_map(json!({"bad key": 1}));
        assert!(matches!(
            validate_query(&query),
            Err(DataGateError::InvalidKeyName(_))
        ));
        // Reserved keys are exempt from the grammar.
        let query = as_map(json!({"_rperm": {"$in": [null, "*"]}}));
        assert!(validate_query(&query).is_ok());
    }

    #[test]
    fn test_auth_data_id_update_rejected() {
        assert!(matches!(
            validate_write_key("_User", "authData.github.id"),
            Err(DataGateError::InvalidKeyName(_))
        ));
        assert!(validate_write_key("_User", "authData").is_ok());
        assert!(validate_write_key("Game", "score").is_ok());
    }

    #[test]
    fn test_nested_operator_keys_rejected() {
        assert!(matches!(
            validate_nested_keys(&json!({"outer": {"$inner": 1}})),
            Err(DataGateError::InvalidNestedKey(_))
        ));
        assert!(matches!(
            validate_nested_keys(&json!([{"a.b": 1}])),
            Err(DataGateError::InvalidNestedKey(_))
        ));
        assert!(validate_nested_keys(&json!({"outer": {"inner": [1, 2]}})).is_ok());
    }
}
