//! Access control: class-level permissions, caller identity, and the
//! permission-aware query rewriting that enforces both.

pub mod rewriter;
pub mod types;

pub use rewriter::{
    add_pointer_permissions, add_protected_fields, add_read_acl, add_write_acl,
    filter_sensitive_data,
};
pub use types::{Caller, ClassPermissions, Operation};
