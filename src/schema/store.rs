//! Schema rows in the reserved `_SCHEMA` collection.

use log::debug;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::constants::SCHEMA_CLASS;
use crate::error::{DataGateError, DataGateResult};
use crate::query::update::{UpdateValue, UpdateMap};
use crate::schema::codec;
use crate::schema::types::{FieldType, Schema};
use crate::storage::{FindOptions, StorageAdapter};
use crate::JsonMap;

/// The schema of the `_SCHEMA` collection itself.
fn meta_schema() -> Schema {
    let mut schema = Schema::empty(SCHEMA_CLASS);
    schema
        .fields
        .insert("className".to_string(), FieldType::String);
    schema
}

/// Typed operations over the stored schema rows.
#[derive(Clone)]
pub struct SchemaStore {
    adapter: Arc<dyn StorageAdapter>,
}

impl SchemaStore {
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self { adapter }
    }

    /// Fetches and decodes every stored class schema.
    pub async fn fetch_all(&self) -> DataGateResult<Vec<Schema>> {
        let rows = self
            .adapter
            .find(
                SCHEMA_CLASS,
                &meta_schema(),
                &JsonMap::new(),
                &FindOptions::default(),
            )
            .await?;
        debug!("loaded {} schema rows", rows.len());
        rows.iter().map(codec::decode_class).collect()
    }

    /// Fetches one class schema; absence is a `NotFound` signal, not data.
    pub async fn fetch_one(&self, class_name: &str) -> DataGateResult<Schema> {
        let mut query = JsonMap::new();
        query.insert(
            "className".to_string(),
            Value::String(class_name.to_string()),
        );
        let rows = self
            .adapter
            .find(SCHEMA_CLASS, &meta_schema(), &query, &FindOptions::default())
            .await?;
        match rows.first() {
            Some(row) => codec::decode_class(row),
            None => Err(DataGateError::NotFound(format!(
                "schema {} not found",
                class_name
            ))),
        }
    }

    /// Inserts a new class schema row; an existing row with the same class
    /// name is a duplicate-class error.
    pub async fn insert(&self, schema: &Schema) -> DataGateResult<()> {
        match self.fetch_one(&schema.class_name).await {
            Ok(_) => {
                return Err(DataGateError::DuplicateValue(format!(
                    "class {} already exists",
                    schema.class_name
                )))
            }
            Err(DataGateError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        let row = codec::encode_class(schema)?;
        // The storage engine's unique index on the class-name key is the
        // authoritative duplicate guard under concurrent inserts.
        self.adapter
            .create_object(SCHEMA_CLASS, &meta_schema(), &row)
            .await
            .map_err(|e| match e {
                DataGateError::DuplicateValue(_) => DataGateError::DuplicateValue(format!(
                    "class {} already exists",
                    schema.class_name
                )),
                other => other,
            })
    }

    /// Adds a field to a class schema unless it already exists.
    ///
    /// The final write is guarded on the field still being absent: a
    /// concurrent caller may add the same field between the read and the
    /// write, in which case the guarded write matches nothing and the
    /// operation still succeeds.
    pub async fn add_field_if_not_exists(
        &self,
        class_name: &str,
        field_name: &str,
        field_type: &FieldType,
    ) -> DataGateResult<()> {
        let schema = self.fetch_one(class_name).await?;
        if schema.fields.contains_key(field_name) {
            return Ok(());
        }
        if field_type.is_geo_point() {
            if let Some(existing) = schema.geo_point_field() {
                return Err(DataGateError::IncorrectType(format!(
                    "currently, only one GeoPoint field may exist in an object. \
                     Adding {} when {} already exists.",
                    field_name, existing
                )));
            }
        }

        let mut guard = JsonMap::new();
        guard.insert(
            "className".to_string(),
            Value::String(class_name.to_string()),
        );
        guard.insert(field_name.to_string(), json!({ "$exists": false }));
        let update: UpdateMap = [(
            field_name.to_string(),
            UpdateValue::Set(Value::String(codec::encode_field_type(field_type))),
        )]
        .into_iter()
        .collect();
        debug!(
            "adding field {} ({:?}) to class {}",
            field_name, field_type, class_name
        );
        // A conditional update, not an upsert: the row exists (fetched above),
        // so a no-match here only ever means the field appeared concurrently.
        self.adapter
            .update_objects_by_query(SCHEMA_CLASS, &meta_schema(), &guard, &update)
            .await?;
        Ok(())
    }

    /// Removes a class's schema row. Absence is tolerated.
    pub async fn delete_row(&self, class_name: &str) -> DataGateResult<()> {
        let mut query = JsonMap::new();
        query.insert(
            "className".to_string(),
            Value::String(class_name.to_string()),
        );
        match self
            .adapter
            .delete_objects_by_query(SCHEMA_CLASS, &meta_schema(), &query)
            .await
        {
            Ok(()) | Err(DataGateError::ObjectNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
