//! The memoized schema set and the permission checks answered from it.
//!
//! Loading the full schema set is the most frequent storage read in the
//! system, so it is memoized behind a single-flight slot: concurrent callers
//! during a load all await one shared fetch instead of issuing duplicates. The
//! pending future is discarded as soon as it settles, success or failure; a
//! successful settlement populates the schema-set cache, which only an
//! explicit clear (or a schema mutation) discards.

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use log::{debug, info};
use std::sync::{Arc, Mutex};

use crate::constants::VOLATILE_CLASSES;
use crate::error::{DataGateError, DataGateResult};
use crate::permissions::types::{Caller, Operation};
use crate::permissions::ClassPermissions;
use crate::schema::store::SchemaStore;
use crate::schema::types::{FieldType, Schema, SchemaSet};

type SharedLoad = Shared<BoxFuture<'static, Result<Arc<SchemaSet>, DataGateError>>>;

pub struct SchemaCache {
    store: SchemaStore,
    cached: Mutex<(u64, Option<Arc<SchemaSet>>)>,
    pending: Mutex<Option<SharedLoad>>,
}

impl SchemaCache {
    pub fn new(store: SchemaStore) -> Self {
        Self {
            store,
            cached: Mutex::new((0, None)),
            pending: Mutex::new(None),
        }
    }

    /// Returns the current schema set, loading it at most once concurrently.
    pub async fn load(&self) -> DataGateResult<Arc<SchemaSet>> {
        let generation = {
            let cached = self.cached.lock().expect("poisoned lock");
            if let Some(set) = &cached.1 {
                return Ok(set.clone());
            }
            cached.0
        };

        let load = {
            let mut pending = self.pending.lock().expect("poisoned lock");
            match &*pending {
                Some(load) => load.clone(),
                None => {
                    debug!("loading schema set");
                    let store = self.store.clone();
                    let load = async move {
                        store
                            .fetch_all()
                            .await
                            .map(|schemas| Arc::new(SchemaSet::new(schemas)))
                    }
                    .boxed()
                    .shared();
                    *pending = Some(load.clone());
                    load
                }
            }
        };

        let result = load.await;
        // Discard the memo on settlement so the next caller re-evaluates.
        *self.pending.lock().expect("poisoned lock") = None;
        let set = result?;
        let mut cached = self.cached.lock().expect("poisoned lock");
        // A clear that raced the load wins; do not resurrect stale data.
        if cached.0 == generation {
            cached.1 = Some(set.clone());
        }
        Ok(set)
    }

    /// Forces a fresh load on next use.
    pub fn clear_cache(&self) {
        let mut cached = self.cached.lock().expect("poisoned lock");
        cached.0 += 1;
        cached.1 = None;
    }

    /// Returns one class schema. Unknown volatile classes resolve to an empty
    /// schema when `allow_volatile` is set; everything else is `NotFound`.
    pub async fn get_one_schema(
        &self,
        class_name: &str,
        allow_volatile: bool,
    ) -> DataGateResult<Schema> {
        let set = self.load().await?;
        match set.get(class_name) {
            Some(schema) => Ok(schema.clone()),
            None if allow_volatile && VOLATILE_CLASSES.contains(&class_name) => {
                Ok(Schema::empty(class_name))
            }
            None => Err(DataGateError::NotFound(format!(
                "schema {} not found",
                class_name
            ))),
        }
    }

    pub async fn get_expected_type(
        &self,
        class_name: &str,
        field_name: &str,
    ) -> DataGateResult<Option<FieldType>> {
        let set = self.load().await?;
        Ok(set.expected_type(class_name, field_name).cloned())
    }

    pub async fn get_class_level_permissions(
        &self,
        class_name: &str,
    ) -> DataGateResult<ClassPermissions> {
        let set = self.load().await?;
        Ok(set.class_permissions(class_name))
    }

    /// Non-throwing probe: does the caller's ACL group carry a class-level
    /// grant for this operation?
    pub async fn test_permissions_for_class_name(
        &self,
        class_name: &str,
        acl_group: &[String],
        operation: Operation,
    ) -> DataGateResult<bool> {
        let permissions = self.get_class_level_permissions(class_name).await?;
        Ok(permissions.test_permissions(operation, acl_group))
    }

    /// Fails with `PermissionDenied` unless the operation is granted to `"*"`,
    /// to some principal in the caller's group, or deferred to configured
    /// pointer permissions. Pointer fields never grant `create`.
    pub async fn validate_permission(
        &self,
        class_name: &str,
        caller: &Caller,
        operation: Operation,
    ) -> DataGateResult<()> {
        if caller.is_master() {
            return Ok(());
        }
        let permissions = self.get_class_level_permissions(class_name).await?;
        if permissions.test_permissions(operation, caller.acl_group()) {
            return Ok(());
        }
        if operation != Operation::Create && !permissions.user_fields(operation).is_empty() {
            // The pointer-permission rewrite will constrain the query instead.
            return Ok(());
        }
        Err(DataGateError::PermissionDenied(format!(
            "permission denied for action {} on class {}",
            operation.as_str(),
            class_name
        )))
    }

    /// Makes sure a class exists, creating an empty schema row when missing.
    pub async fn enforce_class_exists(&self, class_name: &str) -> DataGateResult<()> {
        let set = self.load().await?;
        if set.contains(class_name) {
            return Ok(());
        }
        info!("creating class {}", class_name);
        match self.store.insert(&Schema::empty(class_name)).await {
            // A concurrent creation of the same class is success.
            Ok(()) | Err(DataGateError::DuplicateValue(_)) => {
                self.clear_cache();
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Registers a new class schema.
    pub async fn add_class(&self, schema: &Schema) -> DataGateResult<()> {
        self.store.insert(schema).await?;
        self.clear_cache();
        Ok(())
    }

    /// Adds a field to a class, creating the class first when needed. The
    /// underlying write is existence-guarded, so concurrent callers adding the
    /// same field all succeed.
    pub async fn add_field_if_not_exists(
        &self,
        class_name: &str,
        field_name: &str,
        field_type: &FieldType,
    ) -> DataGateResult<()> {
        self.enforce_class_exists(class_name).await?;
        self.store
            .add_field_if_not_exists(class_name, field_name, field_type)
            .await?;
        self.clear_cache();
        Ok(())
    }

    /// Removes a class's schema row and forgets the cached set.
    pub async fn delete_class(&self, class_name: &str) -> DataGateResult<()> {
        self.store.delete_row(class_name).await?;
        self.clear_cache();
        Ok(())
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorageAdapter;
    use crate::storage::StorageAdapter;

    fn cache_over(adapter: Arc<MemoryStorageAdapter>) -> SchemaCache {
        SchemaCache::new(SchemaStore::new(adapter))
    }

    #[tokio::test]
    async fn test_single_flight_shares_one_fetch() {
        let adapter = Arc::new(MemoryStorageAdapter::new());
        let cache = Arc::new(cache_over(adapter.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.load().await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        // Settled memo is discarded; a cleared cache reloads.
        cache.clear_cache();
        assert!(cache.load().await.is_ok());
    }

    #[tokio::test]
    async fn test_permission_probe_is_non_throwing() {
        let adapter = Arc::new(MemoryStorageAdapter::new());
        let cache = cache_over(adapter);
        // Unknown classes answer the permissive default.
        assert!(cache
            .test_permissions_for_class_name("Game", &[], Operation::Find)
            .await
            .unwrap());
        assert!(cache
            .validate_permission("Game", &Caller::with_acl(vec![]), Operation::Delete)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_get_one_schema_not_found_vs_volatile() {
        let adapter = Arc::new(MemoryStorageAdapter::new());
        let cache = cache_over(adapter);
        assert!(matches!(
            cache.get_one_schema("Missing", false).await,
            Err(DataGateError::NotFound(_))
        ));
        let schema = cache.get_one_schema("_Hooks", true).await.unwrap();
        assert_eq!(schema.class_name, "_Hooks");
    }

    #[tokio::test]
    async fn test_add_field_is_idempotent_and_visible() {
        let adapter = Arc::new(MemoryStorageAdapter::new());
        let cache = cache_over(adapter);
        cache
            .add_field_if_not_exists("Game", "score", &FieldType::Number)
            .await
            .unwrap();
        cache
            .add_field_if_not_exists("Game", "score", &FieldType::Number)
            .await
            .unwrap();
        let field = cache.get_expected_type("Game", "score").await.unwrap();
        assert_eq!(field, Some(FieldType::Number));
    }

    #[tokio::test]
    async fn test_second_geo_point_rejected() {
        let adapter = Arc::new(MemoryStorageAdapter::new());
        let cache = cache_over(adapter);
        cache
            .add_field_if_not_exists("Place", "location", &FieldType::GeoPoint)
            .await
            .unwrap();
        assert!(matches!(
            cache
                .add_field_if_not_exists("Place", "altLocation", &FieldType::GeoPoint)
                .await,
            Err(DataGateError::IncorrectType(_))
        ));
    }

    #[tokio::test]
    async fn test_cache_cleared_after_external_write() {
        let adapter = Arc::new(MemoryStorageAdapter::new());
        let cache = cache_over(adapter.clone());
        assert!(!cache.load().await.unwrap().contains("Game"));

        // A write that bypasses the cache is invisible until the cache is
        // cleared.
        let row = crate::schema::codec::encode_class(&Schema::empty("Game")).unwrap();
        adapter
            .create_object(
                crate::constants::SCHEMA_CLASS,
                &Schema::empty(crate::constants::SCHEMA_CLASS),
                &row,
            )
            .await
            .unwrap();
        assert!(!cache.load().await.unwrap().contains("Game"));
        cache.clear_cache();
        assert!(cache.load().await.unwrap().contains("Game"));
    }
}
