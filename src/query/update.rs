//! Typed update-operation decoding.
//!
//! Incoming updates arrive as JSON objects whose field values are either
//! literal replacements or atomic-operation descriptors tagged with `__op`.
//! They are decoded once, at the ingress boundary, into a closed tagged union;
//! everything downstream dispatches on the enum instead of re-inspecting JSON.

use serde_json::{json, Number, Value};
use std::collections::HashMap;

use crate::error::{DataGateError, DataGateResult};
use crate::JsonMap;

/// A reference to an object of a named class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pointer {
    pub class_name: String,
    pub object_id: String,
}

impl Pointer {
    pub fn new(class_name: &str, object_id: &str) -> Self {
        Self {
            class_name: class_name.to_string(),
            object_id: object_id.to_string(),
        }
    }

    /// Parses the REST pointer shape
    /// `{"__type": "Pointer", "className": ..., "objectId": ...}`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        if object.get("__type")?.as_str()? != "Pointer" {
            return None;
        }
        Some(Self {
            class_name: object.get("className")?.as_str()?.to_string(),
            object_id: object.get("objectId")?.as_str()?.to_string(),
        })
    }

    pub fn to_value(&self) -> Value {
        json!({
            "__type": "Pointer",
            "className": self.class_name,
            "objectId": self.object_id,
        })
    }
}

/// The closed set of atomic operation kinds an update may carry per field.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOperation {
    Increment { amount: Number },
    Add { objects: Vec<Value> },
    AddUnique { objects: Vec<Value> },
    Remove { objects: Vec<Value> },
    Delete,
    AddRelation { objects: Vec<Pointer> },
    RemoveRelation { objects: Vec<Pointer> },
    Batch { ops: Vec<UpdateOperation> },
}

/// One decoded update entry: a literal replacement or an atomic operation.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateValue {
    Set(Value),
    Op(UpdateOperation),
}

/// A fully decoded update, keyed by (possibly dotted) field name.
pub type UpdateMap = HashMap<String, UpdateValue>;

fn required_array(object: &JsonMap, kind: &str) -> DataGateResult<Vec<Value>> {
    object
        .get("objects")
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| {
            DataGateError::IncorrectType(format!("objects to {} must be an array", kind))
        })
}

fn required_pointers(object: &JsonMap, kind: &str) -> DataGateResult<Vec<Pointer>> {
    required_array(object, kind)?
        .iter()
        .map(|v| {
            Pointer::from_value(v).ok_or_else(|| {
                DataGateError::IncorrectType(format!("objects to {} must be pointers", kind))
            })
        })
        .collect()
}

fn decode_operation(kind: &str, object: &JsonMap) -> DataGateResult<UpdateOperation> {
    match kind {
        "Increment" => {
            let amount = object
                .get("amount")
                .and_then(Value::as_number)
                .cloned()
                .ok_or_else(|| {
                    DataGateError::IncorrectType(
                        "incrementing must provide a number amount".to_string(),
                    )
                })?;
            Ok(UpdateOperation::Increment { amount })
        }
        "Add" => Ok(UpdateOperation::Add {
            objects: required_array(object, "add")?,
        }),
        "AddUnique" => Ok(UpdateOperation::AddUnique {
            objects: required_array(object, "add")?,
        }),
        "Remove" => Ok(UpdateOperation::Remove {
            objects: required_array(object, "remove")?,
        }),
        "Delete" => Ok(UpdateOperation::Delete),
        "AddRelation" => Ok(UpdateOperation::AddRelation {
            objects: required_pointers(object, "add a relation")?,
        }),
        "RemoveRelation" => Ok(UpdateOperation::RemoveRelation {
            objects: required_pointers(object, "remove a relation")?,
        }),
        "Batch" => {
            let ops = object
                .get("ops")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    DataGateError::IncorrectType("batch ops must be an array".to_string())
                })?;
            let ops = ops
                .iter()
                .map(|op| {
                    let descriptor = op.as_object().and_then(|o| {
                        o.get("__op").and_then(Value::as_str).map(|k| (k, o))
                    });
                    match descriptor {
                        Some((kind, object)) => decode_operation(kind, object),
                        None => Err(DataGateError::IncorrectType(
                            "batch ops must be operation descriptors".to_string(),
                        )),
                    }
                })
                .collect::<DataGateResult<_>>()?;
            Ok(UpdateOperation::Batch { ops })
        }
        other => Err(DataGateError::CommandUnavailable(format!(
            "the {} operator is not supported",
            other
        ))),
    }
}

/// Decodes one update entry.
pub fn decode_update_value(value: &Value) -> DataGateResult<UpdateValue> {
    let descriptor = value
        .as_object()
        .and_then(|o| o.get("__op").and_then(Value::as_str).map(|k| (k, o)));
    match descriptor {
        Some((kind, object)) => Ok(UpdateValue::Op(decode_operation(kind, object)?)),
        None => Ok(UpdateValue::Set(value.clone())),
    }
}

/// Decodes a whole update payload at the ingress boundary.
pub fn decode_update(update: &JsonMap) -> DataGateResult<UpdateMap> {
    update
        .iter()
        .map(|(key, value)| Ok((key.clone(), decode_update_value(value)?)))
        .collect()
}

/// Flattens `Batch` entries before persistence. By the time this runs the
/// relation operations have been extracted, so a batch normally collapses to
/// nothing or to a single remaining operation.
pub fn flatten_batches(update: UpdateMap) -> DataGateResult<UpdateMap> {
    let mut flattened = UpdateMap::new();
    for (key, value) in update {
        match value {
            UpdateValue::Op(UpdateOperation::Batch { mut ops }) => match ops.len() {
                0 => {}
                1 => {
                    flattened.insert(key, UpdateValue::Op(ops.remove(0)));
                }
                _ => {
                    return Err(DataGateError::CommandUnavailable(format!(
                        "cannot flatten a batch of {} operations onto field {}",
                        ops.len(),
                        key
                    )))
                }
            },
            other => {
                flattened.insert(key, other);
            }
        }
    }
    Ok(flattened)
}

/// Materializes an update into the literal object shape a create expects:
/// increments seed their amount, array operations seed their element list,
/// deletes drop the field.
pub fn materialize_create(update: UpdateMap) -> DataGateResult<JsonMap> {
    let mut object = JsonMap::new();
    for (key, value) in update {
        match value {
            UpdateValue::Set(v) => {
                object.insert(key, v);
            }
            UpdateValue::Op(UpdateOperation::Increment { amount }) => {
                object.insert(key, Value::Number(amount));
            }
            UpdateValue::Op(UpdateOperation::Add { objects })
            | UpdateValue::Op(UpdateOperation::AddUnique { objects }) => {
                object.insert(key, Value::Array(objects));
            }
            UpdateValue::Op(UpdateOperation::Remove { .. })
            | UpdateValue::Op(UpdateOperation::Delete) => {}
            UpdateValue::Op(op) => {
                return Err(DataGateError::CommandUnavailable(format!(
                    "operation {:?} cannot be applied when creating field {}",
                    op, key
                )))
            }
        }
    }
    Ok(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_literal_and_increment() {
        let update = json!({"name": "kay", "score": {"__op": "Increment", "amount": 5}});
        let decoded = decode_update(update.as_object().unwrap()).unwrap();
        assert_eq!(decoded["name"], UpdateValue::Set(json!("kay")));
        assert!(matches!(
            decoded["score"],
            UpdateValue::Op(UpdateOperation::Increment { .. })
        ));
    }

    #[test]
    fn test_unknown_operation_is_unavailable() {
        let update = json!({"score": {"__op": "Multiply", "amount": 2}});
        assert!(matches!(
            decode_update(update.as_object().unwrap()),
            Err(DataGateError::CommandUnavailable(_))
        ));
    }

    #[test]
    fn test_decode_batch_of_relations() {
        let update = json!({"members": {"__op": "Batch", "ops": [
            {"__op": "AddRelation", "objects": [
                {"__type": "Pointer", "className": "_User", "objectId": "u1"}]},
            {"__op": "RemoveRelation", "objects": [
                {"__type": "Pointer", "className": "_User", "objectId": "u2"}]}
        ]}});
        let decoded = decode_update(update.as_object().unwrap()).unwrap();
        match &decoded["members"] {
            UpdateValue::Op(UpdateOperation::Batch { ops }) => assert_eq!(ops.len(), 2),
            other => panic!("expected a batch, got {:?}", other),
        }
    }

    #[test]
    fn test_increment_requires_number() {
        let update = json!({"score": {"__op": "Increment", "amount": "5"}});
        assert!(matches!(
            decode_update(update.as_object().unwrap()),
            Err(DataGateError::IncorrectType(_))
        ));
    }

    #[test]
    fn test_flatten_single_op_batch() {
        let update: UpdateMap = [(
            "tags".to_string(),
            UpdateValue::Op(UpdateOperation::Batch {
                ops: vec![UpdateOperation::Add {
                    objects: vec![json!("a")],
                }],
            }),
        )]
        .into_iter()
        .collect();
        let flattened = flatten_batches(update).unwrap();
        assert!(matches!(
            flattened["tags"],
            UpdateValue::Op(UpdateOperation::Add { .. })
        ));
    }

    #[test]
    fn test_materialize_create_seeds_values() {
        let update: UpdateMap = [
            (
                "score".to_string(),
                UpdateValue::Op(UpdateOperation::Increment {
                    amount: Number::from(5),
                }),
            ),
            (
                "tags".to_string(),
                UpdateValue::Op(UpdateOperation::Add {
                    objects: vec![json!("a"), json!("b")],
                }),
            ),
            ("gone".to_string(), UpdateValue::Op(UpdateOperation::Delete)),
        ]
        .into_iter()
        .collect();
        let object = materialize_create(update).unwrap();
        assert_eq!(object.get("score"), Some(&json!(5)));
        assert_eq!(object.get("tags"), Some(&json!(["a", "b"])));
        assert!(!object.contains_key("gone"));
    }
}
