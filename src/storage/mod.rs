//! The storage capability interface consumed by the mediation layer.
//!
//! The actual storage engine is an external collaborator; this crate only
//! composes queries for it and interprets its results. Retry semantics, if
//! any, belong to the adapter.

#[cfg(feature = "mock")]
pub mod memory;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::DataGateResult;
use crate::query::update::UpdateMap;
use crate::schema::types::Schema;
use crate::JsonMap;

/// Sort direction for one find key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Options threaded through to the storage engine on reads.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    /// Ordered sort keys.
    pub sort: Vec<(String, SortOrder)>,
    /// Projection: return only these keys when set.
    pub keys: Option<Vec<String>>,
    /// Passed through opaquely to engines that support replica routing.
    pub read_preference: Option<String>,
}

/// The async capability interface a storage backend must implement.
///
/// Queries handed to the adapter are fully rewritten: ACL constraints are
/// ordinary `_rperm`/`_wperm` membership constraints, relation constraints
/// have been reduced to `objectId` membership, and updates arrive as the
/// decoded [`UpdateMap`] representation.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn find(
        &self,
        class_name: &str,
        schema: &Schema,
        query: &JsonMap,
        options: &FindOptions,
    ) -> DataGateResult<Vec<JsonMap>>;

    async fn create_object(
        &self,
        class_name: &str,
        schema: &Schema,
        object: &JsonMap,
    ) -> DataGateResult<()>;

    /// Updates every object matching the query. Returns the last updated
    /// object, or `None` when nothing matched.
    async fn update_objects_by_query(
        &self,
        class_name: &str,
        schema: &Schema,
        query: &JsonMap,
        update: &UpdateMap,
    ) -> DataGateResult<Option<JsonMap>>;

    /// Updates one matching object and returns it post-update, or `None` when
    /// nothing matched.
    async fn find_one_and_update(
        &self,
        class_name: &str,
        schema: &Schema,
        query: &JsonMap,
        update: &UpdateMap,
    ) -> DataGateResult<Option<JsonMap>>;

    /// Updates one matching object, inserting a fresh one seeded from the
    /// query's equality constraints when nothing matches.
    async fn upsert_one_object(
        &self,
        class_name: &str,
        schema: &Schema,
        query: &JsonMap,
        update: &UpdateMap,
    ) -> DataGateResult<()>;

    /// Deletes every object matching the query; reports `ObjectNotFound` when
    /// nothing matched.
    async fn delete_objects_by_query(
        &self,
        class_name: &str,
        schema: &Schema,
        query: &JsonMap,
    ) -> DataGateResult<()>;

    async fn count(
        &self,
        class_name: &str,
        schema: &Schema,
        query: &JsonMap,
    ) -> DataGateResult<u64>;

    async fn distinct(
        &self,
        class_name: &str,
        schema: &Schema,
        query: &JsonMap,
        field_name: &str,
    ) -> DataGateResult<Vec<Value>>;

    async fn aggregate(
        &self,
        class_name: &str,
        schema: &Schema,
        pipeline: &[Value],
    ) -> DataGateResult<Vec<JsonMap>>;

    /// Ensures a unique index over the given fields.
    async fn ensure_uniqueness(
        &self,
        class_name: &str,
        schema: &Schema,
        field_names: &[String],
    ) -> DataGateResult<()>;

    async fn class_exists(&self, class_name: &str) -> DataGateResult<bool>;

    async fn delete_class(&self, class_name: &str) -> DataGateResult<()>;

    async fn delete_all_classes(&self) -> DataGateResult<()>;

    /// Whether relation pagination may be pushed down into join-table finds.
    fn can_sort_on_join_tables(&self) -> bool;
}
