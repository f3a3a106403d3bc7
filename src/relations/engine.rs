//! Extraction and application of relation-mutating operations, and rewriting
//! of relation-referencing query constraints into plain id-membership
//! constraints.

use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use log::debug;
use serde_json::Value;
use std::sync::Arc;

use crate::constants::join_class_name;
use crate::error::{DataGateError, DataGateResult};
use crate::query::update::{Pointer, UpdateMap, UpdateOperation, UpdateValue};
use crate::relations::ids::{add_in_object_ids, add_not_in_object_ids};
use crate::schema::types::{Schema, SchemaSet};
use crate::storage::{FindOptions, StorageAdapter};
use crate::JsonMap;

/// One extracted relation mutation: add or remove edges on a relation field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationUpdate {
    pub field: String,
    pub add: bool,
    pub objects: Vec<Pointer>,
}

/// The schema of every synthetic join collection.
fn relation_schema(join_class: &str) -> Schema {
    let mut schema = Schema::empty(join_class);
    schema
        .fields
        .insert("relatedId".to_string(), crate::schema::FieldType::String);
    schema
        .fields
        .insert("owningId".to_string(), crate::schema::FieldType::String);
    schema
}

fn edge_row(owning_id: &str, related_id: &str) -> JsonMap {
    let mut row = JsonMap::new();
    row.insert("owningId".to_string(), Value::String(owning_id.to_string()));
    row.insert(
        "relatedId".to_string(),
        Value::String(related_id.to_string()),
    );
    row
}

/// Walks an update, extracting every `AddRelation`/`RemoveRelation` operation
/// (including those nested inside `Batch` entries) and removing them from the
/// update in place; relation edges are not ordinary stored fields.
pub fn collect_relation_updates(update: &mut UpdateMap) -> Vec<RelationUpdate> {
    let mut collected = Vec::new();
    let keys: Vec<String> = update.keys().cloned().collect();
    for key in keys {
        match update.get(&key) {
            Some(UpdateValue::Op(UpdateOperation::AddRelation { .. }))
            | Some(UpdateValue::Op(UpdateOperation::RemoveRelation { .. })) => {
                let Some(UpdateValue::Op(op)) = update.remove(&key) else {
                    continue;
                };
                match op {
                    UpdateOperation::AddRelation { objects } => collected.push(RelationUpdate {
                        field: key,
                        add: true,
                        objects,
                    }),
                    UpdateOperation::RemoveRelation { objects } => collected.push(RelationUpdate {
                        field: key,
                        add: false,
                        objects,
                    }),
                    _ => unreachable!("matched above"),
                }
            }
            Some(UpdateValue::Op(UpdateOperation::Batch { .. })) => {
                let Some(UpdateValue::Op(UpdateOperation::Batch { ops })) = update.remove(&key)
                else {
                    continue;
                };
                let mut remaining = Vec::new();
                for op in ops {
                    match op {
                        UpdateOperation::AddRelation { objects } => {
                            collected.push(RelationUpdate {
                                field: key.clone(),
                                add: true,
                                objects,
                            })
                        }
                        UpdateOperation::RemoveRelation { objects } => {
                            collected.push(RelationUpdate {
                                field: key.clone(),
                                add: false,
                                objects,
                            })
                        }
                        other => remaining.push(other),
                    }
                }
                if !remaining.is_empty() {
                    update.insert(
                        key,
                        UpdateValue::Op(UpdateOperation::Batch { ops: remaining }),
                    );
                }
            }
            _ => {}
        }
    }
    collected
}

/// Applies relation mutations against the synthetic join collections and
/// resolves relation-referencing query constraints.
#[derive(Clone)]
pub struct RelationEngine {
    adapter: Arc<dyn StorageAdapter>,
}

impl RelationEngine {
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self { adapter }
    }

    /// Applies every extracted relation operation for one update. All edge
    /// mutations run as one unordered concurrent batch; a failure in any edge
    /// fails the whole update. No partial rollback is attempted.
    pub async fn handle_relation_updates(
        &self,
        class_name: &str,
        object_id: &str,
        ops: Vec<RelationUpdate>,
    ) -> DataGateResult<()> {
        let mut edges: Vec<BoxFuture<'_, DataGateResult<()>>> = Vec::new();
        for op in ops {
            let RelationUpdate {
                field,
                add,
                objects,
            } = op;
            for target in objects {
                let field = field.clone();
                edges.push(
                    async move {
                        if add {
                            self.add_relation(&field, class_name, object_id, &target.object_id)
                                .await
                        } else {
                            self.remove_relation(&field, class_name, object_id, &target.object_id)
                                .await
                        }
                    }
                    .boxed(),
                );
            }
        }
        debug!(
            "applying {} relation edge mutations for {}:{}",
            edges.len(),
            class_name,
            object_id
        );
        try_join_all(edges).await?;
        Ok(())
    }

    /// Upserts one `{owningId, relatedId}` edge. Adding an existing edge is a
    /// storage-level no-op.
    async fn add_relation(
        &self,
        field: &str,
        from_class: &str,
        from_id: &str,
        to_id: &str,
    ) -> DataGateResult<()> {
        let join_class = join_class_name(field, from_class);
        let row = edge_row(from_id, to_id);
        let update: UpdateMap = row
            .iter()
            .map(|(k, v)| (k.clone(), UpdateValue::Set(v.clone())))
            .collect();
        self.adapter
            .upsert_one_object(&join_class, &relation_schema(&join_class), &row, &update)
            .await
    }

    /// Deletes one edge, tolerating an already-absent edge as success.
    async fn remove_relation(
        &self,
        field: &str,
        from_class: &str,
        from_id: &str,
        to_id: &str,
    ) -> DataGateResult<()> {
        let join_class = join_class_name(field, from_class);
        let row = edge_row(from_id, to_id);
        match self
            .adapter
            .delete_objects_by_query(&join_class, &relation_schema(&join_class), &row)
            .await
        {
            Ok(()) | Err(DataGateError::ObjectNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Ids of objects related to `owning_id` through `key` on `class_name`.
    ///
    /// When the outer query sorts on `createdAt` and the adapter can sort join
    /// tables, pagination is pushed down into the join lookup.
    async fn related_ids(
        &self,
        class_name: &str,
        key: &str,
        owning_id: &str,
        options: &mut FindOptions,
    ) -> DataGateResult<Vec<String>> {
        let join_class = join_class_name(key, class_name);
        let mut find_options = FindOptions::default();
        if self.adapter.can_sort_on_join_tables() {
            if let Some((_, order)) = options.sort.iter().find(|(f, _)| f == "createdAt") {
                find_options.sort = vec![("_id".to_string(), *order)];
                find_options.limit = options.limit;
                find_options.skip = options.skip;
                options.skip = None;
            }
        }
        let mut query = JsonMap::new();
        query.insert("owningId".to_string(), Value::String(owning_id.to_string()));
        let rows = self
            .adapter
            .find(&join_class, &relation_schema(&join_class), &query, &find_options)
            .await?;
        Ok(rows
            .iter()
            .filter_map(|r| r.get("relatedId").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    /// Ids of objects whose `key` relation contains any of `related_ids`.
    async fn owning_ids(
        &self,
        class_name: &str,
        key: &str,
        related_ids: &[String],
    ) -> DataGateResult<Vec<String>> {
        let join_class = join_class_name(key, class_name);
        let mut query = JsonMap::new();
        query.insert(
            "relatedId".to_string(),
            serde_json::json!({ "$in": related_ids }),
        );
        let rows = self
            .adapter
            .find(
                &join_class,
                &relation_schema(&join_class),
                &query,
                &FindOptions::default(),
            )
            .await?;
        Ok(rows
            .iter()
            .filter_map(|r| r.get("owningId").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    /// Resolves every `$relatedTo` constraint into an `objectId` membership
    /// constraint, recursing through `$or` branches.
    pub fn reduce_relation_keys<'a>(
        &'a self,
        class_name: &'a str,
        query: JsonMap,
        options: &'a mut FindOptions,
    ) -> BoxFuture<'a, DataGateResult<JsonMap>> {
        async move {
            let mut query = query;
            if let Some(Value::Array(branches)) = query.remove("$or") {
                let mut reduced = Vec::with_capacity(branches.len());
                for branch in branches {
                    match branch {
                        Value::Object(branch) => {
                            let branch = self
                                .reduce_relation_keys(class_name, branch, options)
                                .await?;
                            reduced.push(Value::Object(branch));
                        }
                        other => reduced.push(other),
                    }
                }
                query.insert("$or".to_string(), Value::Array(reduced));
            }

            let Some(related_to) = query.remove("$relatedTo") else {
                return Ok(query);
            };
            let constraint = related_to.as_object().ok_or_else(|| {
                DataGateError::InvalidQuery("improper usage of $relatedTo".to_string())
            })?;
            let object = constraint
                .get("object")
                .and_then(|o| Pointer::from_value(o));
            let key = constraint.get("key").and_then(Value::as_str);
            let (Some(object), Some(key)) = (object, key) else {
                return Err(DataGateError::InvalidQuery(
                    "improper usage of $relatedTo".to_string(),
                ));
            };
            let ids = self
                .related_ids(&object.class_name, key, &object.object_id, options)
                .await?;
            let query = add_in_object_ids(&ids, &query);
            self.reduce_relation_keys(class_name, query, options).await
        }
        .boxed()
    }

    /// Rewrites every constraint on a Relation-typed field into an `objectId`
    /// membership constraint via the join collection, recursing through `$or`
    /// branches. Constraint shapes with no recognized operator resolve to "no
    /// related ids", so that clause matches nothing.
    pub fn reduce_in_relation<'a>(
        &'a self,
        class_name: &'a str,
        query: JsonMap,
        schema: &'a SchemaSet,
    ) -> BoxFuture<'a, DataGateResult<JsonMap>> {
        async move {
            let mut query = query;
            if let Some(Value::Array(branches)) = query.remove("$or") {
                let mut reduced = Vec::with_capacity(branches.len());
                for branch in branches {
                    match branch {
                        Value::Object(branch) => {
                            let branch =
                                self.reduce_in_relation(class_name, branch, schema).await?;
                            reduced.push(Value::Object(branch));
                        }
                        other => reduced.push(other),
                    }
                }
                query.insert("$or".to_string(), Value::Array(reduced));
            }

            let keys: Vec<String> = query.keys().cloned().collect();
            for key in keys {
                let is_relation = schema
                    .expected_type(class_name, &key)
                    .map_or(false, |t| t.is_relation());
                if !is_relation {
                    continue;
                }
                let constraint = query.remove(&key).expect("key came from the map");
                // (negated, related ids) clauses to resolve against the join
                // collection.
                let clauses = relation_clauses(&constraint);
                for (negated, related_ids) in clauses {
                    let ids = self.owning_ids(class_name, &key, &related_ids).await?;
                    query = if negated {
                        add_not_in_object_ids(&ids, &query)
                    } else {
                        add_in_object_ids(&ids, &query)
                    };
                }
            }
            Ok(query)
        }
        .boxed()
    }
}

/// Decomposes a relation-field constraint into (negated, target ids) clauses.
fn relation_clauses(constraint: &Value) -> Vec<(bool, Vec<String>)> {
    let Some(map) = constraint.as_object() else {
        return vec![(false, Vec::new())];
    };
    let recognized = map.contains_key("$in")
        || map.contains_key("$nin")
        || map.contains_key("$ne")
        || map.get("__type").and_then(Value::as_str) == Some("Pointer");
    if !recognized {
        return vec![(false, Vec::new())];
    }

    let pointer_ids = |value: &Value| -> Vec<String> {
        value
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(Pointer::from_value)
                    .map(|p| p.object_id)
                    .collect()
            })
            .unwrap_or_default()
    };

    let mut clauses = Vec::new();
    for (operator, operand) in map {
        match operator.as_str() {
            "objectId" => {
                if let Some(id) = operand.as_str() {
                    clauses.push((false, vec![id.to_string()]));
                }
            }
            "$in" => clauses.push((false, pointer_ids(operand))),
            "$nin" => clauses.push((true, pointer_ids(operand))),
            "$ne" => {
                let ids = Pointer::from_value(operand)
                    .map(|p| vec![p.object_id])
                    .unwrap_or_default();
                clauses.push((true, ids));
            }
            _ => {}
        }
    }
    clauses
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collect_extracts_relation_ops() {
        let update = json!({
            "name": "team",
            "members": {"__op": "AddRelation", "objects": [
                {"__type": "Pointer", "className": "_User", "objectId": "u1"}]}
        });
        let mut update = crate::query::update::decode_update(update.as_object().unwrap()).unwrap();
        let ops = collect_relation_updates(&mut update);
        assert_eq!(ops.len(), 1);
        assert!(ops[0].add);
        assert_eq!(ops[0].field, "members");
        assert_eq!(ops[0].objects, vec![Pointer::new("_User", "u1")]);
        assert!(!update.contains_key("members"));
        assert!(update.contains_key("name"));
    }

    #[test]
    fn test_collect_unwraps_batches() {
        let update = json!({"members": {"__op": "Batch", "ops": [
            {"__op": "AddRelation", "objects": [
                {"__type": "Pointer", "className": "_User", "objectId": "u1"}]},
            {"__op": "RemoveRelation", "objects": [
                {"__type": "Pointer", "className": "_User", "objectId": "u2"}]}
        ]}});
        let mut update = crate::query::update::decode_update(update.as_object().unwrap()).unwrap();
        let ops = collect_relation_updates(&mut update);
        assert_eq!(ops.len(), 2);
        assert!(update.is_empty());
    }

    #[test]
    fn test_relation_clauses_for_pointer_equality() {
        let constraint = json!({"__type": "Pointer", "className": "_User", "objectId": "u1"});
        let clauses = relation_clauses(&constraint);
        assert_eq!(clauses, vec![(false, vec!["u1".to_string()])]);
    }

    #[test]
    fn test_relation_clauses_degenerate_without_operator() {
        let constraint = json!({"$exists": true});
        assert_eq!(relation_clauses(&constraint), vec![(false, Vec::new())]);
    }
}
