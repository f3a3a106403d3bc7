//! Merging resolved relation ids into `objectId` constraints.
//!
//! Inclusion merges intersect with whatever `objectId` constraint the query
//! already carries; exclusion merges union into the `$nin` list. Intersection
//! switches to a hash-based algorithm above a fixed combined-id threshold; the
//! two paths must produce the same result set regardless of input size.

use serde_json::Value;
use std::collections::HashSet;

use crate::constants::ID_INTERSECTION_THRESHOLD;
use crate::JsonMap;

fn intersect_linear(lists: &[Vec<String>]) -> Vec<String> {
    let Some((first, rest)) = lists.split_first() else {
        return Vec::new();
    };
    let mut result = Vec::new();
    for id in first {
        if !result.contains(id) && rest.iter().all(|list| list.contains(id)) {
            result.push(id.clone());
        }
    }
    result
}

fn intersect_hashed(lists: &[Vec<String>]) -> Vec<String> {
    let Some((first, rest)) = lists.split_first() else {
        return Vec::new();
    };
    let sets: Vec<HashSet<&str>> = rest
        .iter()
        .map(|list| list.iter().map(String::as_str).collect())
        .collect();
    let mut seen = HashSet::new();
    let mut result = Vec::new();
    for id in first {
        if seen.insert(id.as_str()) && sets.iter().all(|set| set.contains(id.as_str())) {
            result.push(id.clone());
        }
    }
    result
}

/// Intersects all id lists, picking the algorithm by combined size.
pub(crate) fn intersect_id_lists(lists: &[Vec<String>]) -> Vec<String> {
    let combined: usize = lists.iter().map(Vec::len).sum();
    if combined > ID_INTERSECTION_THRESHOLD {
        intersect_hashed(lists)
    } else {
        intersect_linear(lists)
    }
}

fn existing_id_lists(query: &JsonMap) -> Vec<Vec<String>> {
    let mut lists = Vec::new();
    match query.get("objectId") {
        Some(Value::String(id)) => lists.push(vec![id.clone()]),
        Some(Value::Object(constraint)) => {
            if let Some(Value::String(id)) = constraint.get("$eq") {
                lists.push(vec![id.clone()]);
            }
            if let Some(Value::Array(ids)) = constraint.get("$in") {
                lists.push(
                    ids.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect(),
                );
            }
        }
        _ => {}
    }
    lists
}

/// Narrows the query's `objectId` constraint to the intersection of `ids` with
/// any pre-existing equality/`$eq`/`$in` constraint.
pub fn add_in_object_ids(ids: &[String], query: &JsonMap) -> JsonMap {
    let mut lists = existing_id_lists(query);
    lists.push(ids.to_vec());
    let intersection = intersect_id_lists(&lists);

    let mut rewritten = query.clone();
    let mut constraint = match rewritten.remove("objectId") {
        // A shorthand string equality is preserved as `$eq` next to the
        // membership constraint.
        Some(Value::String(id)) => {
            let mut c = JsonMap::new();
            c.insert("$eq".to_string(), Value::String(id));
            c
        }
        Some(Value::Object(c)) => c,
        _ => JsonMap::new(),
    };
    constraint.insert(
        "$in".to_string(),
        Value::Array(intersection.into_iter().map(Value::String).collect()),
    );
    rewritten.insert("objectId".to_string(), Value::Object(constraint));
    rewritten
}

/// Widens the query's `objectId` exclusion list with `ids` (set union).
pub fn add_not_in_object_ids(ids: &[String], query: &JsonMap) -> JsonMap {
    let mut rewritten = query.clone();
    let mut constraint = match rewritten.remove("objectId") {
        Some(Value::String(id)) => {
            let mut c = JsonMap::new();
            c.insert("$eq".to_string(), Value::String(id));
            c
        }
        Some(Value::Object(c)) => c,
        _ => JsonMap::new(),
    };

    let mut excluded: Vec<String> = constraint
        .get("$nin")
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    for id in ids {
        if !excluded.contains(id) {
            excluded.push(id.clone());
        }
    }
    constraint.insert(
        "$nin".to_string(),
        Value::Array(excluded.into_iter().map(Value::String).collect()),
    );
    rewritten.insert("objectId".to_string(), Value::Object(constraint));
    rewritten
}
