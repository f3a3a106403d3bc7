//! Permission-aware query rewriting.
//!
//! This is the security-critical part of the mediation layer. Every function
//! here is a pure transform: it takes a query (plus the caller's ACL group and
//! the relevant schema) and returns a new, narrower query, so stages can be
//! reordered and tested independently without hidden aliasing.
//!
//! A master caller never reaches these functions; the entry points skip the
//! rewrites entirely when no ACL group was supplied.

use serde_json::{json, Value};

use crate::constants::USER_SENSITIVE_FIELDS;
use crate::permissions::types::{Caller, Operation};
use crate::schema::types::{Schema, SchemaSet};
use crate::JsonMap;

/// Intersects the query with the read-permission membership constraint:
/// `_rperm ∈ {null, "*", ...acl_group}`.
///
/// `null` means "no read restriction was ever stored" and must always be part
/// of the membership set: an object saved before ACLs existed stays visible.
pub fn add_read_acl(query: &JsonMap, acl_group: &[String]) -> JsonMap {
    let mut membership = vec![Value::Null, Value::String("*".to_string())];
    membership.extend(acl_group.iter().map(|p| Value::String(p.clone())));
    let mut rewritten = query.clone();
    rewritten.insert("_rperm".to_string(), json!({ "$in": membership }));
    rewritten
}

/// Intersects the query with the write-permission membership constraint:
/// `_wperm ∈ {null, ...acl_group}`. Unlike reads, `"*"` is never implicit for
/// writes.
pub fn add_write_acl(query: &JsonMap, acl_group: &[String]) -> JsonMap {
    let mut membership = vec![Value::Null];
    membership.extend(acl_group.iter().map(|p| Value::String(p.clone())));
    let mut rewritten = query.clone();
    rewritten.insert("_wperm".to_string(), json!({ "$in": membership }));
    rewritten
}

/// Narrows a query with the pointer-permission constraints configured on the
/// class, for callers whose ACL group does not already carry a class-level
/// grant.
///
/// Returns `None` when the caller has no access at all: the class configures
/// pointer fields for this operation but the ACL group does not contain exactly
/// one user id. Callers must treat `None` as "matches nothing" for destructive
/// operations and as not-found for `get`.
pub fn add_pointer_permissions(
    schema: &SchemaSet,
    class_name: &str,
    operation: Operation,
    query: &JsonMap,
    acl_group: &[String],
) -> Option<JsonMap> {
    let permissions = schema.class_permissions(class_name);
    // An existing class-level grant (wildcard or an explicit principal) makes
    // pointer constraints redundant.
    if permissions.test_permissions(operation, acl_group) {
        return Some(query.clone());
    }
    let user_fields = permissions.user_fields(operation);
    if user_fields.is_empty() {
        return Some(query.clone());
    }

    let user_ids: Vec<&String> = acl_group
        .iter()
        .filter(|p| !p.starts_with("role:") && p.as_str() != "*")
        .collect();
    // Pointer ownership is only meaningful for exactly one user.
    if user_ids.len() != 1 {
        return None;
    }
    let user_pointer = json!({
        "__type": "Pointer",
        "className": "_User",
        "objectId": user_ids[0],
    });

    let alternatives: Vec<JsonMap> = user_fields
        .iter()
        .map(|field| {
            if query.contains_key(field) {
                // The field is already constrained; conjoin rather than clobber.
                let mut ownership = JsonMap::new();
                ownership.insert(field.clone(), user_pointer.clone());
                let mut conjunction = JsonMap::new();
                conjunction.insert(
                    "$and".to_string(),
                    json!([Value::Object(ownership), Value::Object(query.clone())]),
                );
                conjunction
            } else {
                let mut merged = query.clone();
                merged.insert(field.clone(), user_pointer.clone());
                merged
            }
        })
        .collect();

    if alternatives.len() == 1 {
        alternatives.into_iter().next()
    } else {
        // Any configured ownership alternative grants access.
        let mut disjunction = JsonMap::new();
        disjunction.insert(
            "$or".to_string(),
            Value::Array(alternatives.into_iter().map(Value::Object).collect()),
        );
        Some(disjunction)
    }
}

/// Computes the list of fields to strip from results for this caller, or `None`
/// when no filtering applies.
///
/// The exposed set starts as the union of every configured protected-field list
/// and is narrowed by intersection with each list configured for a role the
/// caller holds: a field stays protected only if every matching role list
/// protects it, so role membership only ever widens visibility.
pub fn add_protected_fields(
    schema: &Schema,
    query: &JsonMap,
    caller: &Caller,
) -> Option<Vec<String>> {
    let configured = &schema.permissions.protected_fields;
    if configured.is_empty() {
        return None;
    }
    // Querying one's own object is never filtered.
    if let Some(Value::String(object_id)) = query.get("objectId") {
        if caller.has_principal(object_id) {
            return None;
        }
    }
    // An authenticated group member browsing with no filter is not filtered
    // either; anonymous callers always are.
    if query.is_empty() && !caller.user_ids().is_empty() {
        return None;
    }

    let mut protected: Vec<String> = Vec::new();
    for fields in configured.values() {
        for field in fields {
            if !protected.contains(field) {
                protected.push(field.clone());
            }
        }
    }
    protected.sort();

    for role in caller.roles() {
        if let Some(fields) = configured.get(role) {
            protected.retain(|f| fields.contains(f));
        }
    }
    Some(protected)
}

/// Strips protected and internal fields from a result row.
///
/// For the privileged user class the hashed-password storage field is always
/// promoted to `password` and the session token removed; non-master callers
/// that do not own the row additionally lose the internal bookkeeping fields
/// and the auth-provider map.
pub fn filter_sensitive_data(
    caller: &Caller,
    protected_fields: Option<&[String]>,
    class_name: &str,
    object: JsonMap,
) -> JsonMap {
    let mut object = object;
    if let Some(fields) = protected_fields {
        for field in fields {
            object.remove(field);
        }
    }
    if class_name != "_User" {
        return object;
    }

    if let Some(hashed) = object.remove("_hashed_password") {
        object.insert("password".to_string(), hashed);
    }
    object.remove("sessionToken");

    if caller.is_master() {
        return object;
    }
    let is_owner = object
        .get("objectId")
        .and_then(Value::as_str)
        .map_or(false, |id| caller.has_principal(id));
    if !is_owner {
        for field in USER_SENSITIVE_FIELDS {
            object.remove(*field);
        }
    }
    object
}
