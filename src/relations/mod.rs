//! Many-to-many relation maintenance and query reduction.
//!
//! The storage engine has no native relation support; every relation field is
//! materialized as `{owningId, relatedId}` rows in a synthetic join collection
//! named `_Join:<fieldName>:<className>`.

pub mod engine;
pub mod ids;

pub use engine::{RelationEngine, RelationUpdate};
pub use ids::{add_in_object_ids, add_not_in_object_ids};
