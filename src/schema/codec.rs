//! Bidirectional mapping between the generic field-type vocabulary and the
//! storage engine's compact native encoding.
//!
//! A stored schema row looks like:
//!
//! ```json
//! {
//!   "className": "Game",
//!   "score": "number",
//!   "owner": "*_User",
//!   "players": "relation<_User>",
//!   "_metadata": { "class_permissions": { ... }, "indexes": { ... } }
//! }
//! ```
//!
//! Decoding synthesizes the four implicit fields and, for built-in system
//! classes, their default columns; encoding drops the implicit fields again.

use serde_json::Value;

use crate::constants::SCHEMA_METADATA_KEY;
use crate::error::{DataGateError, DataGateResult};
use crate::permissions::ClassPermissions;
use crate::schema::types::{FieldType, Schema};
use crate::JsonMap;

/// Encodes a field type into the storage engine's compact token.
pub fn encode_field_type(field_type: &FieldType) -> String {
    match field_type {
        FieldType::Pointer { target_class } => format!("*{}", target_class),
        FieldType::Relation { target_class } => format!("relation<{}>", target_class),
        FieldType::String => "string".to_string(),
        FieldType::Number => "number".to_string(),
        FieldType::Boolean => "boolean".to_string(),
        FieldType::Date => "date".to_string(),
        FieldType::Object => "object".to_string(),
        FieldType::Array => "array".to_string(),
        FieldType::GeoPoint => "geopoint".to_string(),
        FieldType::File => "file".to_string(),
        FieldType::Bytes => "bytes".to_string(),
        FieldType::Polygon => "polygon".to_string(),
        FieldType::Acl => "acl".to_string(),
    }
}

/// Decodes a compact token back into a field type. Inverse of
/// [`encode_field_type`] over the whole vocabulary.
pub fn decode_field_type(token: &str) -> DataGateResult<FieldType> {
    if let Some(target) = token.strip_prefix('*') {
        return Ok(FieldType::Pointer {
            target_class: target.to_string(),
        });
    }
    if let Some(inner) = token
        .strip_prefix("relation<")
        .and_then(|rest| rest.strip_suffix('>'))
    {
        return Ok(FieldType::Relation {
            target_class: inner.to_string(),
        });
    }
    match token {
        "string" => Ok(FieldType::String),
        "number" => Ok(FieldType::Number),
        "boolean" => Ok(FieldType::Boolean),
        "date" => Ok(FieldType::Date),
        "object" => Ok(FieldType::Object),
        "array" => Ok(FieldType::Array),
        "geopoint" => Ok(FieldType::GeoPoint),
        "file" => Ok(FieldType::File),
        "bytes" => Ok(FieldType::Bytes),
        "polygon" => Ok(FieldType::Polygon),
        "acl" => Ok(FieldType::Acl),
        other => Err(DataGateError::IncorrectType(format!(
            "unknown field type encoding '{}'",
            other
        ))),
    }
}

/// Inserts the implicit fields every class carries, plus the default columns of
/// the built-in system classes. Existing entries are not overwritten, except the
/// implicit four which are authoritative.
pub fn inject_default_fields(schema: &mut Schema) {
    schema
        .fields
        .insert("objectId".to_string(), FieldType::String);
    schema.fields.insert("createdAt".to_string(), FieldType::Date);
    schema.fields.insert("updatedAt".to_string(), FieldType::Date);
    schema.fields.insert("ACL".to_string(), FieldType::Acl);

    let defaults: Vec<(&str, FieldType)> = match schema.class_name.as_str() {
        "_User" => vec![
            ("username", FieldType::String),
            ("password", FieldType::String),
            ("email", FieldType::String),
            ("emailVerified", FieldType::Boolean),
            ("authData", FieldType::Object),
        ],
        // users/roles relations are built below; name is the only plain column
        "_Role" => vec![("name", FieldType::String)],
        _ => Vec::new(),
    };
    for (name, field_type) in defaults {
        schema.fields.entry(name.to_string()).or_insert(field_type);
    }
    if schema.class_name == "_Role" {
        schema.fields.entry("users".to_string()).or_insert_with(|| {
            FieldType::Relation {
                target_class: "_User".to_string(),
            }
        });
        schema.fields.entry("roles".to_string()).or_insert_with(|| {
            FieldType::Relation {
                target_class: "_Role".to_string(),
            }
        });
    }
}

fn is_implicit_field(name: &str) -> bool {
    matches!(name, "objectId" | "createdAt" | "updatedAt" | "ACL")
}

/// Decodes a stored `_SCHEMA` row into a [`Schema`], synthesizing implicit
/// fields and completing the class-level permissions against the default
/// template.
pub fn decode_class(row: &JsonMap) -> DataGateResult<Schema> {
    let class_name = row
        .get("className")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            DataGateError::Serialization("schema row is missing a className".to_string())
        })?
        .to_string();

    let mut schema = Schema {
        class_name,
        fields: Default::default(),
        permissions: ClassPermissions::permissive_default(),
        indexes: Default::default(),
    };

    for (key, value) in row {
        if key == "className" || key == SCHEMA_METADATA_KEY || is_implicit_field(key) {
            continue;
        }
        let token = value.as_str().ok_or_else(|| {
            DataGateError::Serialization(format!(
                "field '{}' of class '{}' has a non-string type encoding",
                key, schema.class_name
            ))
        })?;
        schema
            .fields
            .insert(key.clone(), decode_field_type(token)?);
    }

    if let Some(metadata) = row.get(SCHEMA_METADATA_KEY).and_then(Value::as_object) {
        if let Some(clp) = metadata.get("class_permissions") {
            // Partial CLPs are completed by serde defaults: a present CLP with a
            // missing operation denies that operation.
            schema.permissions = serde_json::from_value(clp.clone())?;
        }
        if let Some(indexes) = metadata.get("indexes").and_then(Value::as_object) {
            schema.indexes = indexes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
        }
    }

    inject_default_fields(&mut schema);
    Ok(schema)
}

/// Encodes a [`Schema`] into its stored `_SCHEMA` row shape. Implicit fields are
/// dropped; permissions and indexes live under the reserved metadata key.
pub fn encode_class(schema: &Schema) -> DataGateResult<JsonMap> {
    let mut row = JsonMap::new();
    row.insert(
        "className".to_string(),
        Value::String(schema.class_name.clone()),
    );
    for (name, field_type) in &schema.fields {
        if is_implicit_field(name) {
            continue;
        }
        row.insert(name.clone(), Value::String(encode_field_type(field_type)));
    }

    let mut metadata = JsonMap::new();
    metadata.insert(
        "class_permissions".to_string(),
        serde_json::to_value(&schema.permissions)?,
    );
    if !schema.indexes.is_empty() {
        metadata.insert(
            "indexes".to_string(),
            Value::Object(schema.indexes.clone().into_iter().collect()),
        );
    }
    row.insert(SCHEMA_METADATA_KEY.to_string(), Value::Object(metadata));
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn all_field_types() -> Vec<FieldType> {
        vec![
            FieldType::String,
            FieldType::Number,
            FieldType::Boolean,
            FieldType::Date,
            FieldType::Object,
            FieldType::Array,
            FieldType::GeoPoint,
            FieldType::File,
            FieldType::Bytes,
            FieldType::Polygon,
            FieldType::Acl,
            FieldType::Pointer {
                target_class: "_User".to_string(),
            },
            FieldType::Relation {
                target_class: "Team".to_string(),
            },
        ]
    }

    #[test]
    fn test_field_type_round_trip() {
        for field_type in all_field_types() {
            let token = encode_field_type(&field_type);
            let decoded = decode_field_type(&token).unwrap();
            assert_eq!(decoded, field_type, "round trip failed for {}", token);
        }
    }

    #[test]
    fn test_decode_unknown_token() {
        assert!(matches!(
            decode_field_type("varchar"),
            Err(DataGateError::IncorrectType(_))
        ));
    }

    #[test]
    fn test_decode_class_synthesizes_implicit_fields() {
        let row = json!({"className": "Game", "score": "number"});
        let schema = decode_class(row.as_object().unwrap()).unwrap();
        assert_eq!(schema.expected_type("score"), Some(&FieldType::Number));
        assert_eq!(schema.expected_type("objectId"), Some(&FieldType::String));
        assert_eq!(schema.expected_type("createdAt"), Some(&FieldType::Date));
        assert_eq!(schema.expected_type("updatedAt"), Some(&FieldType::Date));
        assert_eq!(schema.expected_type("ACL"), Some(&FieldType::Acl));
    }

    #[test]
    fn test_class_round_trip_drops_implicit_fields() {
        let mut schema = Schema::empty("Game");
        schema.fields.insert("score".to_string(), FieldType::Number);
        let row = encode_class(&schema).unwrap();
        assert!(!row.contains_key("objectId"));
        assert!(!row.contains_key("ACL"));
        let decoded = decode_class(&row).unwrap();
        assert_eq!(decoded, schema);
    }

    #[test]
    fn test_missing_clp_defaults_to_permissive() {
        let row = json!({"className": "Game"});
        let schema = decode_class(row.as_object().unwrap()).unwrap();
        assert_eq!(schema.permissions.find.get("*"), Some(&true));
        assert_eq!(schema.permissions.add_field.get("*"), Some(&true));
    }

    #[test]
    fn test_partial_clp_denies_missing_operations() {
        let row = json!({
            "className": "Game",
            "_metadata": {"class_permissions": {"find": {"*": true}}}
        });
        let schema = decode_class(row.as_object().unwrap()).unwrap();
        assert_eq!(schema.permissions.find.get("*"), Some(&true));
        assert!(schema.permissions.update.is_empty());
        assert!(schema.permissions.delete.is_empty());
    }

    #[test]
    fn test_role_default_columns() {
        let schema = Schema::empty("_Role");
        assert!(matches!(
            schema.expected_type("users"),
            Some(FieldType::Relation { target_class }) if target_class == "_User"
        ));
        assert_eq!(schema.expected_type("name"), Some(&FieldType::String));
    }
}
