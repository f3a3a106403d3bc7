//! # DataGate Library
//!
//! This library implements the query/update mediation layer of a generic object
//! database. It sits between a REST-style object model (classes, objects,
//! pointers, relations, ACLs) and a concrete storage backend.
//!
//! ## Core Components
//!
//! * `schema` - Field-type codec, schema persistence, and the memoized schema cache
//! * `permissions` - Class-level permissions, ACL groups, and query rewriting
//! * `query` - Query validation and typed update-operation decoding
//! * `relations` - Many-to-many relation maintenance over synthetic join collections
//! * `storage` - The async storage capability trait consumed by the mediation layer
//! * `gate` - The mediation entry points (`find`, `create`, `update`, `destroy`, ...)
//! * `error` - Error types and handling
//!
//! ## Architecture
//!
//! Every entry point first obtains the current schema set from the schema cache,
//! then rewrites the incoming query or update so that class-level and object-level
//! access control is enforced (consulting the relation engine to resolve
//! relation-based constraints), validates the final query, delegates to the storage
//! adapter, and finally sanitizes the result back into its REST shape.
//!
//! The storage engine itself, the HTTP/REST routing layer, and authentication are
//! external collaborators: storage is consumed through the [`StorageAdapter`]
//! capability trait, and callers identify themselves with a [`Caller`] value that
//! is either master (unrestricted) or carries an ACL group of principals.

pub mod config;
pub mod constants;
pub mod error;
pub mod gate;
pub mod permissions;
pub mod query;
pub mod relations;
pub mod schema;
pub mod storage;

/// Dynamic JSON object payload used for objects, queries and storage rows.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

// Re-export main types for convenience
pub use config::DataGateConfig;
pub use error::{DataGateError, DataGateResult};
pub use gate::{DataGate, UpdateOptions};
pub use permissions::{Caller, ClassPermissions, Operation};
pub use query::{UpdateMap, UpdateOperation, UpdateValue};
pub use schema::{FieldType, Schema, SchemaCache, SchemaSet};
pub use storage::{FindOptions, SortOrder, StorageAdapter};

#[cfg(feature = "mock")]
pub use storage::memory::MemoryStorageAdapter;
