//! Schema definition, codec, persistence and caching.
//!
//! - `types` - Field types and per-class schema records
//! - `codec` - Bidirectional mapping to the storage engine's native encoding
//! - `store` - Schema rows in the reserved `_SCHEMA` collection
//! - `cache` - Memoized schema set behind a single-flight load

pub mod cache;
pub mod codec;
pub mod store;
pub mod types;

pub use cache::SchemaCache;
pub use store::SchemaStore;
pub use types::{FieldType, Schema, SchemaSet};
