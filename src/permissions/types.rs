use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The operations class-level permissions are keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Find,
    Get,
    Create,
    Update,
    Delete,
    AddField,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Find => "find",
            Operation::Get => "get",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::AddField => "addField",
        }
    }

    /// Read operations consult `readUserFields`; everything else consults
    /// `writeUserFields`.
    pub fn is_read(&self) -> bool {
        matches!(self, Operation::Find | Operation::Get)
    }
}

/// Class-level permissions: per-operation grant maps keyed by principal, plus
/// protected fields and the pointer-field lists that implicitly grant access.
///
/// A grant map maps a principal (`"*"`, `"role:<name>"`, or a user id) to a
/// boolean. The default for a class with no stored permissions grants every
/// operation to `"*"`; a stored permissions object with a missing operation key
/// completes to an empty map, which denies that operation to everyone. Partial
/// permission objects from storage are never interpreted directly; deserializing
/// through this struct is the completion step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassPermissions {
    #[serde(default)]
    pub find: HashMap<String, bool>,
    #[serde(default)]
    pub get: HashMap<String, bool>,
    #[serde(default)]
    pub create: HashMap<String, bool>,
    #[serde(default)]
    pub update: HashMap<String, bool>,
    #[serde(default)]
    pub delete: HashMap<String, bool>,
    #[serde(default, rename = "addField")]
    pub add_field: HashMap<String, bool>,
    /// Per-principal lists of field names to hide from query results.
    #[serde(default, rename = "protectedFields", skip_serializing_if = "HashMap::is_empty")]
    pub protected_fields: HashMap<String, Vec<String>>,
    /// Pointer fields that grant read operations when equal to the requesting
    /// user.
    #[serde(default, rename = "readUserFields", skip_serializing_if = "Vec::is_empty")]
    pub read_user_fields: Vec<String>,
    /// Pointer fields that grant write operations when equal to the requesting
    /// user.
    #[serde(default, rename = "writeUserFields", skip_serializing_if = "Vec::is_empty")]
    pub write_user_fields: Vec<String>,
}

impl ClassPermissions {
    /// The default for classes without stored permissions: every operation
    /// granted to everyone.
    pub fn permissive_default() -> Self {
        let everyone: HashMap<String, bool> = [("*".to_string(), true)].into_iter().collect();
        Self {
            find: everyone.clone(),
            get: everyone.clone(),
            create: everyone.clone(),
            update: everyone.clone(),
            delete: everyone.clone(),
            add_field: everyone,
            ..Default::default()
        }
    }

    pub fn operation(&self, op: Operation) -> &HashMap<String, bool> {
        match op {
            Operation::Find => &self.find,
            Operation::Get => &self.get,
            Operation::Create => &self.create,
            Operation::Update => &self.update,
            Operation::Delete => &self.delete,
            Operation::AddField => &self.add_field,
        }
    }

    /// True when the operation is granted to `"*"` or to some principal in the
    /// caller's ACL group.
    pub fn test_permissions(&self, op: Operation, acl_group: &[String]) -> bool {
        let grants = self.operation(op);
        if grants.get("*").copied().unwrap_or(false) {
            return true;
        }
        acl_group
            .iter()
            .any(|principal| grants.get(principal).copied().unwrap_or(false))
    }

    /// The pointer-field list consulted for `op`.
    pub fn user_fields(&self, op: Operation) -> &[String] {
        if op.is_read() {
            &self.read_user_fields
        } else {
            &self.write_user_fields
        }
    }
}

/// The identity a mediation entry point runs under.
///
/// A master caller carries no ACL group and bypasses all permission
/// enforcement. A restricted caller carries a list of principal strings: its
/// user id, one `"role:<name>"` entry per role it holds, and optionally `"*"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    acl: Option<Vec<String>>,
}

impl Caller {
    /// An unrestricted caller bypassing ACL and class-level enforcement.
    pub fn master() -> Self {
        Self { acl: None }
    }

    /// A caller restricted to the given ACL group.
    pub fn with_acl(acl_group: Vec<String>) -> Self {
        Self {
            acl: Some(acl_group),
        }
    }

    pub fn is_master(&self) -> bool {
        self.acl.is_none()
    }

    pub fn acl_group(&self) -> &[String] {
        self.acl.as_deref().unwrap_or(&[])
    }

    /// The non-role, non-wildcard principals in the group (normally zero or one
    /// user id).
    pub fn user_ids(&self) -> Vec<&str> {
        self.acl_group()
            .iter()
            .filter(|p| !p.starts_with("role:") && p.as_str() != "*")
            .map(String::as_str)
            .collect()
    }

    /// The `"role:<name>"` principals in the group.
    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.acl_group()
            .iter()
            .map(String::as_str)
            .filter(|p| p.starts_with("role:"))
    }

    pub fn has_principal(&self, principal: &str) -> bool {
        self.acl_group().iter().any(|p| p == principal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_grants_everyone() {
        let clp = ClassPermissions::permissive_default();
        assert!(clp.test_permissions(Operation::Find, &[]));
        assert!(clp.test_permissions(Operation::Delete, &["user1".to_string()]));
    }

    #[test]
    fn test_empty_denies_everyone() {
        let clp = ClassPermissions::default();
        assert!(!clp.test_permissions(Operation::Find, &["user1".to_string()]));
        assert!(!clp.test_permissions(Operation::Create, &["*".to_string()]));
    }

    #[test]
    fn test_principal_grant() {
        let mut clp = ClassPermissions::default();
        clp.update.insert("role:Admin".to_string(), true);
        assert!(clp.test_permissions(
            Operation::Update,
            &["u1".to_string(), "role:Admin".to_string()]
        ));
        assert!(!clp.test_permissions(Operation::Update, &["u1".to_string()]));
    }

    #[test]
    fn test_caller_principal_partition() {
        let caller = Caller::with_acl(vec![
            "u1".to_string(),
            "role:Admin".to_string(),
            "*".to_string(),
        ]);
        assert_eq!(caller.user_ids(), vec!["u1"]);
        assert_eq!(caller.roles().collect::<Vec<_>>(), vec!["role:Admin"]);
        assert!(!caller.is_master());
        assert!(Caller::master().is_master());
    }
}
