use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::permissions::ClassPermissions;

/// The generic field-type vocabulary of the object model.
///
/// `Pointer` and `Relation` carry their target class as required associated data.
/// `Acl` exists only as the type of the implicit `ACL` field; it is never declared
/// explicitly but participates in the codec so that every schema field has a total
/// encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    Object,
    Array,
    GeoPoint,
    File,
    Bytes,
    Polygon,
    #[serde(rename = "ACL")]
    Acl,
    Pointer {
        #[serde(rename = "targetClass")]
        target_class: String,
    },
    Relation {
        #[serde(rename = "targetClass")]
        target_class: String,
    },
}

impl FieldType {
    pub fn is_geo_point(&self) -> bool {
        matches!(self, FieldType::GeoPoint)
    }

    pub fn is_relation(&self) -> bool {
        matches!(self, FieldType::Relation { .. })
    }
}

/// A single class schema: field types, class-level permissions and secondary
/// indexes.
///
/// Every schema implicitly carries `objectId`, `createdAt`, `updatedAt` and `ACL`
/// even though these are not persisted as ordinary fields; constructors and the
/// codec are responsible for keeping that invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(rename = "className")]
    pub class_name: String,
    pub fields: HashMap<String, FieldType>,
    #[serde(rename = "classLevelPermissions")]
    pub permissions: ClassPermissions,
    #[serde(default)]
    pub indexes: HashMap<String, Value>,
}

impl Schema {
    /// Creates an empty schema for `class_name`: just the implicit fields, the
    /// class's default columns, and the permissive default permissions.
    pub fn empty(class_name: &str) -> Self {
        let mut schema = Self {
            class_name: class_name.to_string(),
            fields: HashMap::new(),
            permissions: ClassPermissions::permissive_default(),
            indexes: HashMap::new(),
        };
        super::codec::inject_default_fields(&mut schema);
        schema
    }

    pub fn expected_type(&self, field_name: &str) -> Option<&FieldType> {
        self.fields.get(field_name)
    }

    /// The name of this class's GeoPoint field, if one is declared. A class may
    /// hold at most one.
    pub fn geo_point_field(&self) -> Option<&str> {
        self.fields
            .iter()
            .find(|(_, t)| t.is_geo_point())
            .map(|(name, _)| name.as_str())
    }

    /// Names of all Relation-typed fields together with their target classes.
    pub fn relation_fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().filter_map(|(name, t)| match t {
            FieldType::Relation { target_class } => Some((name.as_str(), target_class.as_str())),
            _ => None,
        })
    }
}

/// The full decoded set of class schemas, as produced by one schema load.
#[derive(Debug, Clone, Default)]
pub struct SchemaSet {
    classes: HashMap<String, Schema>,
}

impl SchemaSet {
    pub fn new(schemas: Vec<Schema>) -> Self {
        let classes = schemas
            .into_iter()
            .map(|s| (s.class_name.clone(), s))
            .collect();
        Self { classes }
    }

    pub fn get(&self, class_name: &str) -> Option<&Schema> {
        self.classes.get(class_name)
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.classes.contains_key(class_name)
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    pub fn expected_type(&self, class_name: &str, field_name: &str) -> Option<&FieldType> {
        self.classes
            .get(class_name)
            .and_then(|s| s.expected_type(field_name))
    }

    /// Class-level permissions for `class_name`. An unknown class answers the
    /// permissive default, matching the empty-class recovery on read paths.
    pub fn class_permissions(&self, class_name: &str) -> ClassPermissions {
        self.classes
            .get(class_name)
            .map(|s| s.permissions.clone())
            .unwrap_or_else(ClassPermissions::permissive_default)
    }
}
