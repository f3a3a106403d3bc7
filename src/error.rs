//! # DataGate Error Handling
//!
//! Unified error handling for the mediation layer, providing structured error
//! information that preserves context while enabling better debugging.
//!
//! This error system is designed to:
//! - Provide specific error variants for each failure category
//! - Preserve error context for debugging and error reporting
//! - Support conversion from common underlying error types
//! - Enable consistent error handling across all modules

use thiserror::Error;

/// Unified error type for mediation-layer operations.
///
/// Every variant carries a human-readable message. Variants are `Clone` so that a
/// single failed schema load can be shared between all callers waiting on the same
/// in-flight fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataGateError {
    /// A schema (or other named resource) was not found. Call sites that treat a
    /// missing class as an empty class catch this variant locally.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The query is malformed: literal ACL constraint, bad `$or`/`$and`/`$nor`
    /// shape, or invalid regex options.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// A field name does not match the identifier grammar, or a reserved key path
    /// was used where it is not allowed.
    #[error("Invalid key name: {0}")]
    InvalidKeyName(String),

    /// A nested key contains operator characters (`$` or `.`).
    #[error("Invalid nested key: {0}")]
    InvalidNestedKey(String),

    /// A unique constraint was violated, on a class name or a declared-unique field.
    #[error("Duplicate value: {0}")]
    DuplicateValue(String),

    /// A field was declared with a type the class cannot accept, e.g. a second
    /// GeoPoint field.
    #[error("Incorrect type: {0}")]
    IncorrectType(String),

    /// The caller is not granted the requested operation by class-level or
    /// pointer permissions.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// An update or delete target does not exist, or a `get` matched nothing the
    /// caller may see.
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// An unrecognized atomic-operation kind, or an operation the storage adapter
    /// does not support.
    #[error("Command unavailable: {0}")]
    CommandUnavailable(String),

    /// A schema cannot be deleted while its class still holds objects.
    #[error("Class not empty: {0}")]
    ClassNotEmpty(String),

    /// A failure reported by the storage adapter.
    #[error("Storage error: {0}")]
    Storage(String),

    /// JSON encoding or decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DataGateError {
    fn from(err: serde_json::Error) -> Self {
        DataGateError::Serialization(err.to_string())
    }
}

/// Result type alias for mediation-layer operations.
pub type DataGateResult<T> = Result<T, DataGateError>;
