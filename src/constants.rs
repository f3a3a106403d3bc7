/// Common constants used across the DataGate project.
///
/// These are part of the persisted-state contract with existing data and must not
/// change between releases.

/// Reserved collection holding one row per class schema.
pub const SCHEMA_CLASS: &str = "_SCHEMA";

/// Reserved metadata key inside a stored schema row carrying class-level
/// permissions and index definitions.
pub const SCHEMA_METADATA_KEY: &str = "_metadata";

/// Classes that resolve to an empty schema when they have never been written.
pub const VOLATILE_CLASSES: &[&str] = &[
    "_Hooks",
    "_GlobalConfig",
    "_JobStatus",
    "_JobSchedule",
    "_Audience",
    "_Idempotency",
];

/// Query keys exempt from the field-name identifier grammar.
pub const SPECIAL_QUERY_KEYS: &[&str] = &[
    "$and",
    "$or",
    "$nor",
    "$relatedTo",
    "_rperm",
    "_wperm",
    "_perishable_token",
    "_email_verify_token",
    "_email_verify_token_expires_at",
    "_account_lockout_expires_at",
    "_failed_login_count",
];

/// Internal `_User` bookkeeping fields hidden from non-master, non-owner callers.
pub const USER_SENSITIVE_FIELDS: &[&str] = &[
    "_email_verify_token",
    "_email_verify_token_expires_at",
    "_perishable_token",
    "_perishable_token_expires_at",
    "_failed_login_count",
    "_account_lockout_expires_at",
    "_password_changed_at",
    "_password_history",
    "authData",
];

/// Combined-id count above which objectId intersection switches from the linear
/// algorithm to the hash-based one.
pub const ID_INTERSECTION_THRESHOLD: usize = 125;

/// Builds the synthetic join-collection name for a relation field. The format is
/// part of the persisted-state contract and must be reproduced exactly.
pub fn join_class_name(field_name: &str, class_name: &str) -> String {
    format!("_Join:{}:{}", field_name, class_name)
}
