//! The mediation entry points.
//!
//! [`DataGate`] is the central coordinator: every reading or mutating entry
//! point obtains the current schema set from the cache, runs the permission
//! rewriter (consulting the relation engine to resolve relation-based
//! constraints), validates the final query, delegates to the storage adapter,
//! and sanitizes the result.

pub mod sanitize;

use chrono::{SecondsFormat, Utc};
use log::{info, warn};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::DataGateConfig;
use crate::constants::{join_class_name, SCHEMA_CLASS, VOLATILE_CLASSES};
use crate::error::{DataGateError, DataGateResult};
use crate::permissions::rewriter::{
    add_pointer_permissions, add_protected_fields, add_read_acl, add_write_acl,
    filter_sensitive_data,
};
use crate::permissions::types::{Caller, Operation};
use crate::query::update::{
    decode_update, flatten_batches, materialize_create, UpdateMap, UpdateOperation, UpdateValue,
};
use crate::query::validate::{validate_nested_keys, validate_query, validate_write_key};
use crate::relations::engine::{collect_relation_updates, RelationEngine, RelationUpdate};
use crate::schema::cache::SchemaCache;
use crate::schema::store::SchemaStore;
use crate::schema::types::{FieldType, Schema};
use crate::storage::{FindOptions, StorageAdapter};
use crate::JsonMap;
use sanitize::{
    sanitize_database_result, transform_acl_update, transform_object_acl, untransform_object_acl,
};

/// Options for [`DataGate::update`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    /// Update every matching object instead of one.
    pub many: bool,
    /// Insert a fresh object when nothing matches.
    pub upsert: bool,
}

/// The mediation layer over one storage adapter.
pub struct DataGate {
    adapter: Arc<dyn StorageAdapter>,
    schema: SchemaCache,
    relations: RelationEngine,
    config: DataGateConfig,
}

fn new_object_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Infers the schema type of a field from the first value written to it.
fn infer_field_type(value: &UpdateValue) -> Option<FieldType> {
    match value {
        UpdateValue::Set(Value::Null) => None,
        UpdateValue::Set(Value::String(_)) => Some(FieldType::String),
        UpdateValue::Set(Value::Number(_)) => Some(FieldType::Number),
        UpdateValue::Set(Value::Bool(_)) => Some(FieldType::Boolean),
        UpdateValue::Set(Value::Array(_)) => Some(FieldType::Array),
        UpdateValue::Set(Value::Object(object)) => {
            match object.get("__type").and_then(Value::as_str) {
                Some("Pointer") => object
                    .get("className")
                    .and_then(Value::as_str)
                    .map(|target| FieldType::Pointer {
                        target_class: target.to_string(),
                    }),
                Some("Date") => Some(FieldType::Date),
                Some("GeoPoint") => Some(FieldType::GeoPoint),
                Some("File") => Some(FieldType::File),
                Some("Bytes") => Some(FieldType::Bytes),
                Some("Polygon") => Some(FieldType::Polygon),
                _ => Some(FieldType::Object),
            }
        }
        UpdateValue::Op(UpdateOperation::Increment { .. }) => Some(FieldType::Number),
        UpdateValue::Op(UpdateOperation::Add { .. })
        | UpdateValue::Op(UpdateOperation::AddUnique { .. })
        | UpdateValue::Op(UpdateOperation::Remove { .. }) => Some(FieldType::Array),
        _ => None,
    }
}

impl DataGate {
    pub fn new(adapter: Arc<dyn StorageAdapter>, config: DataGateConfig) -> Self {
        let schema = SchemaCache::new(SchemaStore::new(adapter.clone()));
        let relations = RelationEngine::new(adapter.clone());
        Self {
            adapter,
            schema,
            relations,
            config,
        }
    }

    pub fn schema(&self) -> &SchemaCache {
        &self.schema
    }

    /// The class schema, or an empty one when the class does not exist yet.
    /// Class absence behaves as an empty class on read, update and delete
    /// paths.
    async fn class_schema_or_empty(&self, class_name: &str) -> DataGateResult<Schema> {
        match self.schema.get_one_schema(class_name, true).await {
            Ok(schema) => Ok(schema),
            Err(DataGateError::NotFound(_)) => Ok(Schema::empty(class_name)),
            Err(e) => Err(e),
        }
    }

    /// Registers schema entries for fields this write introduces. Non-master
    /// callers need the `addField` class-level grant.
    async fn enforce_fields(
        &self,
        class_name: &str,
        update: &UpdateMap,
        relation_ops: &[RelationUpdate],
        caller: &Caller,
    ) -> DataGateResult<()> {
        let set = self.schema.load().await?;
        let mut new_fields: Vec<(String, FieldType)> = Vec::new();
        for (key, value) in update {
            if key.contains('.') || key.starts_with('_') || key == "ACL" || key == "objectId" {
                continue;
            }
            if set.expected_type(class_name, key).is_some() {
                continue;
            }
            if let Some(field_type) = infer_field_type(value) {
                new_fields.push((key.clone(), field_type));
            }
        }
        for op in relation_ops {
            if set.expected_type(class_name, &op.field).is_none() {
                if let Some(target) = op.objects.first() {
                    new_fields.push((
                        op.field.clone(),
                        FieldType::Relation {
                            target_class: target.class_name.clone(),
                        },
                    ));
                }
            }
        }
        if new_fields.is_empty() {
            return Ok(());
        }
        if !caller.is_master() {
            self.schema
                .validate_permission(class_name, caller, Operation::AddField)
                .await?;
        }
        for (field_name, field_type) in new_fields {
            self.schema
                .add_field_if_not_exists(class_name, &field_name, &field_type)
                .await?;
        }
        Ok(())
    }

    /// Finds objects the caller may see. A query that is exactly an `objectId`
    /// equality is a `get`: it fails with `ObjectNotFound` instead of
    /// returning an empty list.
    pub async fn find(
        &self,
        class_name: &str,
        query: JsonMap,
        options: FindOptions,
        caller: &Caller,
    ) -> DataGateResult<Vec<Value>> {
        let mut options = options;
        if let Some(max) = self.config.max_limit {
            options.limit = Some(options.limit.map_or(max, |limit| limit.min(max)));
        }
        let is_get = query.len() == 1 && matches!(query.get("objectId"), Some(Value::String(_)));
        let operation = if is_get { Operation::Get } else { Operation::Find };
        if !caller.is_master() {
            self.schema
                .validate_permission(class_name, caller, operation)
                .await?;
        }
        let set = self.schema.load().await?;
        let class_schema = set
            .get(class_name)
            .cloned()
            .unwrap_or_else(|| Schema::empty(class_name));

        let query = self
            .relations
            .reduce_relation_keys(class_name, query, &mut options)
            .await?;
        let query = self
            .relations
            .reduce_in_relation(class_name, query, &set)
            .await?;

        let (query, protected) = if caller.is_master() {
            (query, None)
        } else {
            let protected = add_protected_fields(&class_schema, &query, caller);
            let query = match add_pointer_permissions(
                &set,
                class_name,
                operation,
                &query,
                caller.acl_group(),
            ) {
                Some(query) => query,
                None if is_get => {
                    return Err(DataGateError::ObjectNotFound("Object not found.".to_string()))
                }
                None => return Ok(Vec::new()),
            };
            (add_read_acl(&query, caller.acl_group()), protected)
        };

        let query = validate_query(&query)?;
        let rows = self
            .adapter
            .find(class_name, &class_schema, &query, &options)
            .await?;
        if is_get && rows.is_empty() {
            return Err(DataGateError::ObjectNotFound("Object not found.".to_string()));
        }
        Ok(rows
            .into_iter()
            .map(|row| {
                let row = untransform_object_acl(row);
                let row = filter_sensitive_data(caller, protected.as_deref(), class_name, row);
                Value::Object(row)
            })
            .collect())
    }

    /// Counts objects the caller may see.
    pub async fn count(
        &self,
        class_name: &str,
        query: JsonMap,
        caller: &Caller,
    ) -> DataGateResult<u64> {
        let query = self.readable_query(class_name, query, caller).await?;
        let Some(query) = query else {
            return Ok(0);
        };
        let schema = self.class_schema_or_empty(class_name).await?;
        self.adapter.count(class_name, &schema, &query).await
    }

    /// Distinct values of one field over objects the caller may see.
    pub async fn distinct(
        &self,
        class_name: &str,
        query: JsonMap,
        field_name: &str,
        caller: &Caller,
    ) -> DataGateResult<Vec<Value>> {
        let query = self.readable_query(class_name, query, caller).await?;
        let Some(query) = query else {
            return Ok(Vec::new());
        };
        let schema = self.class_schema_or_empty(class_name).await?;
        self.adapter
            .distinct(class_name, &schema, &query, field_name)
            .await
    }

    /// The shared read pipeline for scalar queries: CLP check, relation
    /// reduction, pointer permissions and read ACL. `None` means the caller
    /// can match nothing.
    async fn readable_query(
        &self,
        class_name: &str,
        query: JsonMap,
        caller: &Caller,
    ) -> DataGateResult<Option<JsonMap>> {
        if !caller.is_master() {
            self.schema
                .validate_permission(class_name, caller, Operation::Find)
                .await?;
        }
        let set = self.schema.load().await?;
        let mut options = FindOptions::default();
        let query = self
            .relations
            .reduce_relation_keys(class_name, query, &mut options)
            .await?;
        let query = self
            .relations
            .reduce_in_relation(class_name, query, &set)
            .await?;
        let query = if caller.is_master() {
            query
        } else {
            match add_pointer_permissions(
                &set,
                class_name,
                Operation::Find,
                &query,
                caller.acl_group(),
            ) {
                Some(query) => add_read_acl(&query, caller.acl_group()),
                None => return Ok(None),
            }
        };
        Ok(Some(validate_query(&query)?))
    }

    /// Creates an object, registering any new fields in the schema and
    /// applying relation operations it carries.
    pub async fn create(
        &self,
        class_name: &str,
        object: JsonMap,
        caller: &Caller,
    ) -> DataGateResult<JsonMap> {
        if !caller.is_master() {
            self.schema
                .validate_permission(class_name, caller, Operation::Create)
                .await?;
            if !self.config.allow_client_class_creation {
                let set = self.schema.load().await?;
                if !set.contains(class_name) && !VOLATILE_CLASSES.contains(&class_name) {
                    return Err(DataGateError::PermissionDenied(format!(
                        "this user is not allowed to access non-existent class: {}",
                        class_name
                    )));
                }
            }
        }
        for (key, value) in &object {
            validate_write_key(class_name, key)?;
            validate_nested_keys(value)?;
        }

        let mut update = decode_update(&object)?;
        let relation_ops = collect_relation_updates(&mut update);
        let update = flatten_batches(update)?;
        self.enforce_fields(class_name, &update, &relation_ops, caller)
            .await?;

        let mut object = materialize_create(update)?;
        let object_id = match object.get("objectId").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                let id = new_object_id();
                object.insert("objectId".to_string(), Value::String(id.clone()));
                id
            }
        };
        let now = now_iso();
        object
            .entry("createdAt".to_string())
            .or_insert_with(|| Value::String(now.clone()));
        object.insert("updatedAt".to_string(), Value::String(now));
        let object = transform_object_acl(object)?;

        let schema = self.class_schema_or_empty(class_name).await?;
        self.adapter
            .create_object(class_name, &schema, &object)
            .await?;
        if !relation_ops.is_empty() {
            self.relations
                .handle_relation_updates(class_name, &object_id, relation_ops)
                .await?;
        }
        info!("created object {} in class {}", object_id, class_name);
        Ok(untransform_object_acl(object))
    }

    /// Updates objects matching the query. Returns the reconstituted results
    /// of any atomic operations in the update.
    pub async fn update(
        &self,
        class_name: &str,
        query: JsonMap,
        update: JsonMap,
        options: UpdateOptions,
        caller: &Caller,
    ) -> DataGateResult<JsonMap> {
        for (key, value) in &update {
            validate_write_key(class_name, key)?;
            if !value.as_object().map_or(false, |o| o.contains_key("__op")) {
                validate_nested_keys(value)?;
            }
        }
        let original = decode_update(&update)?;
        let mut update = original.clone();
        let relation_ops = collect_relation_updates(&mut update);
        let mut update = flatten_batches(update)?;

        let queried_object_id = query
            .get("objectId")
            .and_then(Value::as_str)
            .map(str::to_string);
        let mut query = query;
        if !caller.is_master() {
            self.schema
                .validate_permission(class_name, caller, Operation::Update)
                .await?;
            let set = self.schema.load().await?;
            query = match add_pointer_permissions(
                &set,
                class_name,
                Operation::Update,
                &query,
                caller.acl_group(),
            ) {
                Some(query) => query,
                None => {
                    return Err(DataGateError::ObjectNotFound("Object not found.".to_string()))
                }
            };
            query = add_write_acl(&query, caller.acl_group());
        }
        let query = validate_query(&query)?;

        self.enforce_fields(class_name, &update, &relation_ops, caller)
            .await?;
        update.insert(
            "updatedAt".to_string(),
            UpdateValue::Set(Value::String(now_iso())),
        );
        let update = transform_acl_update(update)?;

        let schema = self.class_schema_or_empty(class_name).await?;
        let result = if options.many {
            self.adapter
                .update_objects_by_query(class_name, &schema, &query, &update)
                .await?
        } else if options.upsert {
            self.adapter
                .upsert_one_object(class_name, &schema, &query, &update)
                .await?;
            Some(JsonMap::new())
        } else {
            self.adapter
                .find_one_and_update(class_name, &schema, &query, &update)
                .await?
        };
        let result = result
            .ok_or_else(|| DataGateError::ObjectNotFound("Object not found.".to_string()))?;

        if !relation_ops.is_empty() {
            let owning_id = queried_object_id
                .or_else(|| {
                    result
                        .get("objectId")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .ok_or_else(|| {
                    DataGateError::InvalidQuery(
                        "relation operations require an objectId-constrained update".to_string(),
                    )
                })?;
            self.relations
                .handle_relation_updates(class_name, &owning_id, relation_ops)
                .await?;
        }
        Ok(sanitize_database_result(&original, Some(&result)))
    }

    /// Deletes objects matching the query. Reports `ObjectNotFound` when
    /// nothing the caller may write matched.
    pub async fn destroy(
        &self,
        class_name: &str,
        query: JsonMap,
        caller: &Caller,
    ) -> DataGateResult<()> {
        let mut query = query;
        if !caller.is_master() {
            self.schema
                .validate_permission(class_name, caller, Operation::Delete)
                .await?;
            let set = self.schema.load().await?;
            query = match add_pointer_permissions(
                &set,
                class_name,
                Operation::Delete,
                &query,
                caller.acl_group(),
            ) {
                Some(query) => query,
                None => {
                    return Err(DataGateError::ObjectNotFound("Object not found.".to_string()))
                }
            };
            query = add_write_acl(&query, caller.acl_group());
        }
        let query = validate_query(&query)?;
        let schema = self.class_schema_or_empty(class_name).await?;
        self.adapter
            .delete_objects_by_query(class_name, &schema, &query)
            .await
    }

    /// Drops a class's schema, its rows' collection and every join collection
    /// derived from its relation fields. Refuses while the class still holds
    /// objects.
    pub async fn delete_schema(&self, class_name: &str) -> DataGateResult<()> {
        let schema = match self.schema.get_one_schema(class_name, true).await {
            Ok(schema) => Some(schema),
            Err(DataGateError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        if let Some(schema) = &schema {
            let count = self
                .adapter
                .count(class_name, schema, &JsonMap::new())
                .await?;
            if count > 0 {
                return Err(DataGateError::ClassNotEmpty(format!(
                    "class {} is not empty, contains {} objects, cannot drop schema",
                    class_name, count
                )));
            }
            self.adapter.delete_class(class_name).await?;
            for (field_name, _) in schema.relation_fields() {
                self.adapter
                    .delete_class(&join_class_name(field_name, class_name))
                    .await?;
            }
        }
        self.schema.delete_class(class_name).await?;
        info!("deleted schema for class {}", class_name);
        Ok(())
    }

    /// Ensures the unique indexes the object model relies on.
    pub async fn perform_initialization(&self) -> DataGateResult<()> {
        info!("performing initialization");
        let mut meta = Schema::empty(SCHEMA_CLASS);
        meta.fields
            .insert("className".to_string(), FieldType::String);
        self.adapter
            .ensure_uniqueness(SCHEMA_CLASS, &meta, &["className".to_string()])
            .await
            .map_err(|e| {
                warn!("unable to ensure uniqueness for schema class names: {}", e);
                e
            })?;

        let user_schema = self.class_schema_or_empty("_User").await?;
        for field in ["username", "email"] {
            self.adapter
                .ensure_uniqueness("_User", &user_schema, &[field.to_string()])
                .await
                .map_err(|e| {
                    warn!("unable to ensure uniqueness for user {}s: {}", field, e);
                    e
                })?;
        }
        let role_schema = self.class_schema_or_empty("_Role").await?;
        self.adapter
            .ensure_uniqueness("_Role", &role_schema, &["name".to_string()])
            .await
            .map_err(|e| {
                warn!("unable to ensure uniqueness for role names: {}", e);
                e
            })?;
        Ok(())
    }
}
