//! In-memory storage adapter used by tests and examples.
//!
//! Implements the operator subset the mediation layer emits. This is test
//! tooling, not a storage engine: durability, indexing and aggregation are out
//! of scope.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{DataGateError, DataGateResult};
use crate::query::update::{UpdateMap, UpdateOperation, UpdateValue};
use crate::query::{lookup_path, remove_path, set_path};
use crate::schema::types::Schema;
use crate::storage::{FindOptions, SortOrder, StorageAdapter};
use crate::JsonMap;

/// A non-durable adapter keeping every class as a vector of rows.
#[derive(Default)]
pub struct MemoryStorageAdapter {
    classes: Mutex<HashMap<String, Vec<JsonMap>>>,
    unique_indexes: Mutex<HashMap<String, Vec<Vec<String>>>>,
}

impl MemoryStorageAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_uniqueness(
        &self,
        class_name: &str,
        rows: &[JsonMap],
        candidate: &JsonMap,
    ) -> DataGateResult<()> {
        let indexes = self.unique_indexes.lock().expect("poisoned lock");
        let Some(field_sets) = indexes.get(class_name) else {
            return Ok(());
        };
        for fields in field_sets {
            let candidate_values: Vec<Option<&Value>> =
                fields.iter().map(|f| lookup_path(candidate, f)).collect();
            if candidate_values.iter().all(Option::is_none) {
                continue;
            }
            for row in rows {
                let row_values: Vec<Option<&Value>> =
                    fields.iter().map(|f| lookup_path(row, f)).collect();
                if row_values == candidate_values {
                    return Err(DataGateError::DuplicateValue(format!(
                        "a duplicate value for a field with unique values was provided on {}",
                        class_name
                    )));
                }
            }
        }
        Ok(())
    }
}

fn equals(actual: &Value, expected: &Value) -> bool {
    actual == expected
}

fn in_operand(actual: Option<&Value>, operand: &Value) -> bool {
    let Some(candidates) = operand.as_array() else {
        return false;
    };
    match actual {
        // A missing or null field matches when null is in the membership set.
        None | Some(Value::Null) => candidates.iter().any(Value::is_null),
        Some(Value::Array(items)) => items
            .iter()
            .any(|item| candidates.iter().any(|c| equals(item, c))),
        Some(value) => candidates.iter().any(|c| equals(value, c)),
    }
}

fn regex_matches(actual: Option<&Value>, constraint: &JsonMap) -> bool {
    let (Some(Value::String(pattern)), Some(Value::String(text))) =
        (constraint.get("$regex"), actual)
    else {
        return false;
    };
    let pattern = match constraint.get("$options").and_then(Value::as_str) {
        Some(options) if !options.is_empty() => format!("(?{}){}", options, pattern),
        _ => pattern.clone(),
    };
    Regex::new(&pattern).map_or(false, |re| re.is_match(text))
}

fn constraint_matches(actual: Option<&Value>, constraint: &JsonMap) -> bool {
    constraint.iter().all(|(operator, operand)| match operator.as_str() {
        "$in" => in_operand(actual, operand),
        "$nin" => !in_operand(actual, operand),
        "$eq" => actual.map_or(operand.is_null(), |a| equals(a, operand)),
        "$ne" => actual.map_or(!operand.is_null(), |a| !equals(a, operand)),
        "$exists" => operand.as_bool().map_or(false, |want| actual.is_some() == want),
        "$regex" => regex_matches(actual, constraint),
        "$options" => true,
        _ => false,
    })
}

fn field_matches(object: &JsonMap, key: &str, expected: &Value) -> bool {
    let actual = lookup_path(object, key);
    match expected {
        Value::Object(map) if map.keys().any(|k| k.starts_with('$')) => {
            constraint_matches(actual, map)
        }
        other => actual.map_or(other.is_null(), |a| equals(a, other)),
    }
}

fn matches(query: &JsonMap, object: &JsonMap) -> bool {
    query.iter().all(|(key, value)| match key.as_str() {
        "$or" => value.as_array().map_or(false, |branches| {
            branches
                .iter()
                .any(|b| b.as_object().map_or(false, |m| matches(m, object)))
        }),
        "$and" => value.as_array().map_or(false, |branches| {
            branches
                .iter()
                .all(|b| b.as_object().map_or(false, |m| matches(m, object)))
        }),
        "$nor" => value.as_array().map_or(false, |branches| {
            !branches
                .iter()
                .any(|b| b.as_object().map_or(false, |m| matches(m, object)))
        }),
        _ => field_matches(object, key, value),
    })
}

fn add_numbers(a: &Number, b: &Number) -> Number {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return Number::from(x + y);
    }
    Number::from_f64(a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0))
        .unwrap_or_else(|| Number::from(0))
}

fn apply_operation(object: &mut JsonMap, key: &str, op: &UpdateOperation) -> DataGateResult<()> {
    match op {
        UpdateOperation::Increment { amount } => {
            let current = match lookup_path(object, key) {
                Some(Value::Number(n)) => n.clone(),
                _ => Number::from(0),
            };
            set_path(object, key, Value::Number(add_numbers(&current, amount)));
        }
        UpdateOperation::Add { objects } => {
            let mut items = match lookup_path(object, key) {
                Some(Value::Array(items)) => items.clone(),
                _ => Vec::new(),
            };
            items.extend(objects.iter().cloned());
            set_path(object, key, Value::Array(items));
        }
        UpdateOperation::AddUnique { objects } => {
            let mut items = match lookup_path(object, key) {
                Some(Value::Array(items)) => items.clone(),
                _ => Vec::new(),
            };
            for item in objects {
                if !items.contains(item) {
                    items.push(item.clone());
                }
            }
            set_path(object, key, Value::Array(items));
        }
        UpdateOperation::Remove { objects } => {
            if let Some(Value::Array(items)) = lookup_path(object, key) {
                let remaining: Vec<Value> = items
                    .iter()
                    .filter(|item| !objects.contains(item))
                    .cloned()
                    .collect();
                set_path(object, key, Value::Array(remaining));
            }
        }
        UpdateOperation::Delete => {
            remove_path(object, key);
        }
        UpdateOperation::Batch { ops } => {
            for op in ops {
                apply_operation(object, key, op)?;
            }
        }
        UpdateOperation::AddRelation { .. } | UpdateOperation::RemoveRelation { .. } => {
            return Err(DataGateError::CommandUnavailable(
                "relation operations must be resolved before reaching storage".to_string(),
            ))
        }
    }
    Ok(())
}

fn apply_update(object: &mut JsonMap, update: &UpdateMap) -> DataGateResult<()> {
    for (key, value) in update {
        match value {
            UpdateValue::Set(v) => set_path(object, key, v.clone()),
            UpdateValue::Op(op) => apply_operation(object, key, op)?,
        }
    }
    Ok(())
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

fn apply_options(mut rows: Vec<JsonMap>, options: &FindOptions) -> Vec<JsonMap> {
    if !options.sort.is_empty() {
        rows.sort_by(|a, b| {
            for (key, order) in &options.sort {
                let ordering = compare_values(lookup_path(a, key), lookup_path(b, key));
                let ordering = match order {
                    SortOrder::Ascending => ordering,
                    SortOrder::Descending => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
    }
    let skip = options.skip.unwrap_or(0) as usize;
    let rows: Vec<JsonMap> = rows.into_iter().skip(skip).collect();
    let rows: Vec<JsonMap> = match options.limit {
        Some(limit) => rows.into_iter().take(limit as usize).collect(),
        None => rows,
    };
    match &options.keys {
        Some(keys) => rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .filter(|(k, _)| keys.iter().any(|key| key == k))
                    .collect()
            })
            .collect(),
        None => rows,
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorageAdapter {
    async fn find(
        &self,
        class_name: &str,
        _schema: &Schema,
        query: &JsonMap,
        options: &FindOptions,
    ) -> DataGateResult<Vec<JsonMap>> {
        let classes = self.classes.lock().expect("poisoned lock");
        let rows = classes
            .get(class_name)
            .map(|rows| {
                rows.iter()
                    .filter(|row| matches(query, row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(apply_options(rows, options))
    }

    async fn create_object(
        &self,
        class_name: &str,
        _schema: &Schema,
        object: &JsonMap,
    ) -> DataGateResult<()> {
        let mut classes = self.classes.lock().expect("poisoned lock");
        let rows = classes.entry(class_name.to_string()).or_default();
        self.check_uniqueness(class_name, rows, object)?;
        rows.push(object.clone());
        Ok(())
    }

    async fn update_objects_by_query(
        &self,
        class_name: &str,
        _schema: &Schema,
        query: &JsonMap,
        update: &UpdateMap,
    ) -> DataGateResult<Option<JsonMap>> {
        let mut classes = self.classes.lock().expect("poisoned lock");
        let Some(rows) = classes.get_mut(class_name) else {
            return Ok(None);
        };
        let mut last = None;
        for row in rows.iter_mut() {
            if matches(query, row) {
                apply_update(row, update)?;
                last = Some(row.clone());
            }
        }
        Ok(last)
    }

    async fn find_one_and_update(
        &self,
        class_name: &str,
        _schema: &Schema,
        query: &JsonMap,
        update: &UpdateMap,
    ) -> DataGateResult<Option<JsonMap>> {
        let mut classes = self.classes.lock().expect("poisoned lock");
        let Some(rows) = classes.get_mut(class_name) else {
            return Ok(None);
        };
        for row in rows.iter_mut() {
            if matches(query, row) {
                apply_update(row, update)?;
                return Ok(Some(row.clone()));
            }
        }
        Ok(None)
    }

    async fn upsert_one_object(
        &self,
        class_name: &str,
        _schema: &Schema,
        query: &JsonMap,
        update: &UpdateMap,
    ) -> DataGateResult<()> {
        let mut classes = self.classes.lock().expect("poisoned lock");
        let rows = classes.entry(class_name.to_string()).or_default();
        for row in rows.iter_mut() {
            if matches(query, row) {
                return apply_update(row, update);
            }
        }
        // Nothing matched: seed a fresh row from the query's equality
        // constraints, then apply the update.
        let mut fresh = JsonMap::new();
        for (key, value) in query {
            if !key.starts_with('$') && !value.as_object().map_or(false, |o| {
                o.keys().any(|k| k.starts_with('$'))
            }) {
                fresh.insert(key.clone(), value.clone());
            }
        }
        apply_update(&mut fresh, update)?;
        self.check_uniqueness(class_name, rows, &fresh)?;
        rows.push(fresh);
        Ok(())
    }

    async fn delete_objects_by_query(
        &self,
        class_name: &str,
        _schema: &Schema,
        query: &JsonMap,
    ) -> DataGateResult<()> {
        let mut classes = self.classes.lock().expect("poisoned lock");
        let Some(rows) = classes.get_mut(class_name) else {
            return Err(DataGateError::ObjectNotFound("Object not found.".to_string()));
        };
        let before = rows.len();
        rows.retain(|row| !matches(query, row));
        if rows.len() == before {
            return Err(DataGateError::ObjectNotFound("Object not found.".to_string()));
        }
        Ok(())
    }

    async fn count(
        &self,
        class_name: &str,
        _schema: &Schema,
        query: &JsonMap,
    ) -> DataGateResult<u64> {
        let classes = self.classes.lock().expect("poisoned lock");
        Ok(classes
            .get(class_name)
            .map(|rows| rows.iter().filter(|row| matches(query, row)).count() as u64)
            .unwrap_or(0))
    }

    async fn distinct(
        &self,
        class_name: &str,
        _schema: &Schema,
        query: &JsonMap,
        field_name: &str,
    ) -> DataGateResult<Vec<Value>> {
        let classes = self.classes.lock().expect("poisoned lock");
        let mut values = Vec::new();
        if let Some(rows) = classes.get(class_name) {
            for row in rows.iter().filter(|row| matches(query, row)) {
                if let Some(value) = lookup_path(row, field_name) {
                    if !values.contains(value) {
                        values.push(value.clone());
                    }
                }
            }
        }
        Ok(values)
    }

    async fn aggregate(
        &self,
        _class_name: &str,
        _schema: &Schema,
        _pipeline: &[Value],
    ) -> DataGateResult<Vec<JsonMap>> {
        Err(DataGateError::CommandUnavailable(
            "aggregate is not supported by the in-memory adapter".to_string(),
        ))
    }

    async fn ensure_uniqueness(
        &self,
        class_name: &str,
        _schema: &Schema,
        field_names: &[String],
    ) -> DataGateResult<()> {
        {
            let classes = self.classes.lock().expect("poisoned lock");
            if let Some(rows) = classes.get(class_name) {
                for (i, row) in rows.iter().enumerate() {
                    let values: Vec<Option<&Value>> =
                        field_names.iter().map(|f| lookup_path(row, f)).collect();
                    if values.iter().all(Option::is_none) {
                        continue;
                    }
                    for other in &rows[i + 1..] {
                        let other_values: Vec<Option<&Value>> =
                            field_names.iter().map(|f| lookup_path(other, f)).collect();
                        if values == other_values {
                            return Err(DataGateError::DuplicateValue(format!(
                                "cannot ensure uniqueness on {}: duplicates exist",
                                class_name
                            )));
                        }
                    }
                }
            }
        }
        let mut indexes = self.unique_indexes.lock().expect("poisoned lock");
        let field_sets = indexes.entry(class_name.to_string()).or_default();
        let fields = field_names.to_vec();
        if !field_sets.contains(&fields) {
            field_sets.push(fields);
        }
        Ok(())
    }

    async fn class_exists(&self, class_name: &str) -> DataGateResult<bool> {
        let classes = self.classes.lock().expect("poisoned lock");
        Ok(classes.contains_key(class_name))
    }

    async fn delete_class(&self, class_name: &str) -> DataGateResult<()> {
        let mut classes = self.classes.lock().expect("poisoned lock");
        classes.remove(class_name);
        Ok(())
    }

    async fn delete_all_classes(&self) -> DataGateResult<()> {
        self.classes.lock().expect("poisoned lock").clear();
        self.unique_indexes.lock().expect("poisoned lock").clear();
        Ok(())
    }

    fn can_sort_on_join_tables(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(value: Value) -> JsonMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_in_matches_missing_field_via_null() {
        let object = as_map(json!({"objectId": "o1"}));
        let query = as_map(json!({"_rperm": {"$in": [null, "*", "u1"]}}));
        assert!(matches(&query, &object));
        let query = as_map(json!({"_rperm": {"$in": ["u1"]}}));
        assert!(!matches(&query, &object));
    }

    #[test]
    fn test_in_intersects_array_fields() {
        let object = as_map(json!({"_rperm": ["u2", "role:Admin"]}));
        let query = as_map(json!({"_rperm": {"$in": [null, "*", "u1"]}}));
        assert!(!matches(&query, &object));
        let query = as_map(json!({"_rperm": {"$in": [null, "*", "u2"]}}));
        assert!(matches(&query, &object));
    }

    #[test]
    fn test_compound_operators() {
        let object = as_map(json!({"score": 10, "name": "kay"}));
        assert!(matches(
            &as_map(json!({"$or": [{"score": 10}, {"score": 20}]})),
            &object
        ));
        assert!(matches(
            &as_map(json!({"$and": [{"score": 10}, {"name": "kay"}]})),
            &object
        ));
        assert!(!matches(&as_map(json!({"$nor": [{"score": 10}]})), &object));
    }

    #[test]
    fn test_regex_with_options() {
        let object = as_map(json!({"name": "Kay"}));
        assert!(matches(
            &as_map(json!({"name": {"$regex": "^kay$", "$options": "i"}})),
            &object
        ));
        assert!(!matches(
            &as_map(json!({"name": {"$regex": "^kay$"}})),
            &object
        ));
    }

    #[test]
    fn test_dotted_path_lookup() {
        let object = as_map(json!({"stats": {"wins": 3}}));
        assert!(matches(&as_map(json!({"stats.wins": 3})), &object));
    }
}
