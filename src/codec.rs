//! Conversion between typed models and the loosely-typed configuration tree.
//!
//! The host hands the provider JSON trees whose shape only loosely follows the
//! schema: numbers may arrive as strings, single nested blocks may be wrapped
//! in one-element lists, optional keys may be absent or null. [`conform`]
//! reshapes such a tree so it matches the schema exactly. [`decode`] and
//! [`encode`] put serde on either side of it, so resource code only ever
//! handles typed structs.
//!
//! Rules applied by [`conform`]:
//!
//! - keys not declared in the block are dropped
//! - declared attributes that are absent become `null`
//! - absent or null list, set and map attributes become empty collections
//! - scalars are coerced to the declared type where the conversion is lossless
//! - sets keep the first occurrence of each element
//! - single nested blocks accept an object or a list of at most one object
//! - list and set blocks accept a list, a lone object, or null (empty list)

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ProviderError;
use crate::schema::{AttributeType, Block, BlockNestingMode, NestedBlock};
use crate::validation::{as_int64, value_type_name};

/// Conform `value` to `block` and deserialize it into `T`.
pub fn decode<T: DeserializeOwned>(block: &Block, value: &Value) -> Result<T, ProviderError> {
    let conformed = conform(block, value)?;
    serde_json::from_value(conformed)
        .map_err(|e| ProviderError::Validation(format!("cannot decode configuration: {}", e)))
}

/// Serialize `model` and conform the result to `block`.
pub fn encode<T: Serialize>(block: &Block, model: &T) -> Result<Value, ProviderError> {
    let raw = serde_json::to_value(model)?;
    conform(block, &raw)
}

/// Reshape `value` so it matches `block` exactly.
pub fn conform(block: &Block, value: &Value) -> Result<Value, ProviderError> {
    conform_block(block, value, "")
}

/// Whether a value counts as "not set": null, empty string, empty list or empty map.
pub fn is_zero(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Compare two conformed values, treating all zero values as equal.
///
/// A numeric zero also matches null: the platform reports `0` for integers
/// that were never set.
pub fn equivalent(a: &Value, b: &Value) -> bool {
    match (a, b) {
        _ if is_zero(a) && is_zero(b) => true,
        (Value::Null, Value::Number(n)) | (Value::Number(n), Value::Null) => {
            n.as_f64() == Some(0.0)
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| equivalent(l, r))
        },
        (Value::Object(x), Value::Object(y)) => {
            x.keys().chain(y.keys()).all(|k| {
                equivalent(
                    x.get(k).unwrap_or(&Value::Null),
                    y.get(k).unwrap_or(&Value::Null),
                )
            })
        },
        (Value::Number(_), Value::Number(_)) => match (as_int64(a), as_int64(b)) {
            (Some(x), Some(y)) => x == y,
            _ => a.as_f64() == b.as_f64(),
        },
        _ => a == b,
    }
}

fn conform_block(block: &Block, value: &Value, path: &str) -> Result<Value, ProviderError> {
    let empty = Map::new();
    let obj = match value {
        Value::Object(map) => map,
        Value::Null => &empty,
        other => return Err(mismatch(path, "object", other)),
    };

    let mut out = Map::new();
    for (name, attr) in &block.attributes {
        let attr_path = join_path(path, name);
        let raw = obj.get(name).unwrap_or(&Value::Null);
        let conformed = match conform_attribute(&attr.attr_type, raw, &attr_path)? {
            Value::Null => empty_collection(&attr.attr_type),
            v => v,
        };
        out.insert(name.clone(), conformed);
    }
    for (name, nested) in &block.blocks {
        let block_path = join_path(path, name);
        let raw = obj.get(name).unwrap_or(&Value::Null);
        out.insert(name.clone(), conform_nested(nested, raw, &block_path)?);
    }
    Ok(Value::Object(out))
}

fn conform_nested(nested: &NestedBlock, value: &Value, path: &str) -> Result<Value, ProviderError> {
    match nested.nesting_mode {
        BlockNestingMode::Single => match value {
            Value::Null => Ok(Value::Null),
            Value::Array(items) => match items.as_slice() {
                [] => Ok(Value::Null),
                [only] => conform_block(&nested.block, only, path),
                _ => Err(ProviderError::Validation(format!(
                    "block '{}' allows a single item, got {}",
                    path,
                    items.len()
                ))),
            },
            other => conform_block(&nested.block, other, path),
        },
        BlockNestingMode::List | BlockNestingMode::Set => {
            let items = match value {
                Value::Null => Vec::new(),
                Value::Array(items) => items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| conform_block(&nested.block, item, &format!("{}.{}", path, i)))
                    .collect::<Result<Vec<_>, _>>()?,
                Value::Object(_) => {
                    vec![conform_block(&nested.block, value, &format!("{}.0", path))?]
                },
                other => return Err(mismatch(path, "list", other)),
            };
            if nested.nesting_mode == BlockNestingMode::Set {
                Ok(Value::Array(dedup(items)))
            } else {
                Ok(Value::Array(items))
            }
        },
        BlockNestingMode::Map => match value {
            Value::Null => Ok(Value::Object(Map::new())),
            Value::Object(entries) => {
                let mut out = Map::new();
                for (key, item) in entries {
                    let item_path = format!("{}.{}", path, key);
                    out.insert(key.clone(), conform_block(&nested.block, item, &item_path)?);
                }
                Ok(Value::Object(out))
            },
            other => Err(mismatch(path, "map", other)),
        },
    }
}

fn conform_attribute(
    ty: &AttributeType,
    value: &Value,
    path: &str,
) -> Result<Value, ProviderError> {
    if value.is_null() {
        return Ok(Value::Null);
    }

    match ty {
        AttributeType::String => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            other => Err(mismatch(path, "string", other)),
        },
        AttributeType::Int64 => match value {
            Value::Number(_) => as_int64(value)
                .map(Value::from)
                .ok_or_else(|| mismatch(path, "int64", value)),
            Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| mismatch(path, "int64", value)),
            other => Err(mismatch(path, "int64", other)),
        },
        AttributeType::Float64 => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| mismatch(path, "float64", value)),
            other => Err(mismatch(path, "float64", other)),
        },
        AttributeType::Bool => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) => match s.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(mismatch(path, "bool", value)),
            },
            other => Err(mismatch(path, "bool", other)),
        },
        AttributeType::List(elem) | AttributeType::Set(elem) => {
            let items = match value {
                Value::Array(items) => items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| conform_attribute(elem, item, &format!("{}.{}", path, i)))
                    .collect::<Result<Vec<_>, _>>()?,
                other => return Err(mismatch(path, "list", other)),
            };
            if matches!(ty, AttributeType::Set(_)) {
                Ok(Value::Array(dedup(items)))
            } else {
                Ok(Value::Array(items))
            }
        },
        AttributeType::Map(elem) => match value {
            Value::Object(entries) => {
                let mut out = Map::new();
                for (key, item) in entries {
                    let item_path = format!("{}.{}", path, key);
                    out.insert(key.clone(), conform_attribute(elem, item, &item_path)?);
                }
                Ok(Value::Object(out))
            },
            other => Err(mismatch(path, "map", other)),
        },
        AttributeType::Object(members) => match value {
            Value::Object(entries) => {
                let mut out = Map::new();
                for (name, member_type) in members {
                    let member_path = join_path(path, name);
                    let raw = entries.get(name).unwrap_or(&Value::Null);
                    out.insert(name.clone(), conform_attribute(member_type, raw, &member_path)?);
                }
                Ok(Value::Object(out))
            },
            other => Err(mismatch(path, "object", other)),
        },
        AttributeType::Dynamic => Ok(value.clone()),
    }
}

fn empty_collection(ty: &AttributeType) -> Value {
    match ty {
        AttributeType::List(_) | AttributeType::Set(_) => Value::Array(Vec::new()),
        AttributeType::Map(_) => Value::Object(Map::new()),
        _ => Value::Null,
    }
}

fn dedup(items: Vec<Value>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", base, name)
    }
}

fn mismatch(path: &str, expected: &str, got: &Value) -> ProviderError {
    let at = if path.is_empty() { "<root>" } else { path };
    ProviderError::Validation(format!(
        "attribute '{}': expected {}, got {}",
        at,
        expected,
        value_type_name(got)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, AttributeFlags, Schema};
    use serde::Deserialize;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn timeslot_schema() -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("schedule_id", Attribute::required_int64())
            .with_attribute("name", Attribute::required_string())
            .with_attribute(
                "email_on",
                Attribute::new(
                    AttributeType::set(AttributeType::String),
                    AttributeFlags::optional(),
                ),
            )
            .with_attribute(
                "tags",
                Attribute::new(
                    AttributeType::map(AttributeType::String),
                    AttributeFlags::optional(),
                ),
            )
            .with_attribute("is_cname", Attribute::optional_bool())
            .with_block(
                "shift_timeslots",
                NestedBlock::list(
                    Block::new()
                        .with_attribute("start_hour", Attribute::required_int64())
                        .with_attribute("day_of_week", Attribute::optional_string()),
                ),
            )
            .with_block(
                "owner",
                NestedBlock::single(
                    Block::new().with_attribute("id", Attribute::required_string()),
                ),
            )
    }

    #[test]
    fn test_conform_fills_absent_and_drops_unknown() {
        let schema = timeslot_schema();
        let out = conform(&schema.block, &json!({"name": "primary", "bogus": 1})).unwrap();

        assert_eq!(out["name"], "primary");
        assert!(out.get("bogus").is_none());
        assert_eq!(out["id"], Value::Null);
        assert_eq!(out["schedule_id"], Value::Null);
        assert_eq!(out["email_on"], json!([]));
        assert_eq!(out["tags"], json!({}));
        assert_eq!(out["shift_timeslots"], json!([]));
        assert_eq!(out["owner"], Value::Null);
    }

    #[test]
    fn test_conform_scalar_coercion() {
        let schema = timeslot_schema();
        let out = conform(
            &schema.block,
            &json!({
                "id": 42,
                "schedule_id": "17",
                "name": "primary",
                "is_cname": "true",
                "tags": {"env": "prod"}
            }),
        )
        .unwrap();

        assert_eq!(out["id"], "42");
        assert_eq!(out["schedule_id"], 17);
        assert_eq!(out["is_cname"], true);

        let out = conform(&schema.block, &json!({"schedule_id": 17.0})).unwrap();
        assert_eq!(out["schedule_id"], 17);

        let out = conform(&schema.block, &json!({"schedule_id": ""})).unwrap();
        assert_eq!(out["schedule_id"], Value::Null);
    }

    #[test]
    fn test_conform_rejects_irreconcilable_values() {
        let schema = timeslot_schema();

        let err = conform(&schema.block, &json!({"schedule_id": "seventeen"})).unwrap_err();
        assert!(err.to_string().contains("schedule_id"));

        let err = conform(&schema.block, &json!({"schedule_id": 1.5})).unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));

        let err = conform(&schema.block, &json!({"is_cname": "yes"})).unwrap_err();
        assert!(err.to_string().contains("is_cname"));

        let err = conform(
            &schema.block,
            &json!({"shift_timeslots": [{"start_hour": 1}, {"start_hour": "x"}]}),
        )
        .unwrap_err();
        assert!(err.to_string().contains("shift_timeslots.1.start_hour"));
    }

    #[test]
    fn test_conform_set_deduplicates() {
        let schema = timeslot_schema();
        let out = conform(
            &schema.block,
            &json!({"email_on": ["triggered", "resolved", "triggered"]}),
        )
        .unwrap();
        assert_eq!(out["email_on"], json!(["triggered", "resolved"]));
    }

    #[test]
    fn test_conform_flattens_single_block() {
        let schema = timeslot_schema();

        let out = conform(&schema.block, &json!({"owner": [{"id": "abc", "extra": 1}]})).unwrap();
        assert_eq!(out["owner"], json!({"id": "abc"}));

        let out = conform(&schema.block, &json!({"owner": []})).unwrap();
        assert_eq!(out["owner"], Value::Null);

        let err =
            conform(&schema.block, &json!({"owner": [{"id": "a"}, {"id": "b"}]})).unwrap_err();
        assert!(err.to_string().contains("single item"));
    }

    #[test]
    fn test_conform_wraps_lone_object_in_list_block() {
        let schema = timeslot_schema();
        let out = conform(&schema.block, &json!({"shift_timeslots": {"start_hour": 9}})).unwrap();
        assert_eq!(
            out["shift_timeslots"],
            json!([{"start_hour": 9, "day_of_week": null}])
        );
    }

    #[test]
    fn test_conform_map_block() {
        let schema = Schema::v0().with_block(
            "routes",
            NestedBlock::map(Block::new().with_attribute("weight", Attribute::optional_int64())),
        );
        let out = conform(&schema.block, &json!({"routes": {"a": {"weight": "2"}}})).unwrap();
        assert_eq!(out["routes"], json!({"a": {"weight": 2}}));

        let out = conform(&schema.block, &json!({})).unwrap();
        assert_eq!(out["routes"], json!({}));
    }

    #[test]
    fn test_conform_object_attribute() {
        let mut members = BTreeMap::new();
        members.insert("key".to_string(), AttributeType::String);
        members.insert("count".to_string(), AttributeType::Int64);
        let schema = Schema::v0().with_attribute(
            "meta",
            Attribute::new(AttributeType::Object(members), AttributeFlags::optional()),
        );

        let out = conform(&schema.block, &json!({"meta": {"key": 5, "other": true}})).unwrap();
        assert_eq!(out["meta"], json!({"key": "5", "count": null}));
    }

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    struct Timeslot {
        start_hour: i64,
        day_of_week: Option<String>,
    }

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    struct Rotation {
        id: Option<String>,
        schedule_id: i64,
        name: String,
        email_on: Vec<String>,
        tags: BTreeMap<String, String>,
        is_cname: Option<bool>,
        shift_timeslots: Vec<Timeslot>,
    }

    #[test]
    fn test_decode_into_typed_model() {
        let schema = timeslot_schema();
        let model: Rotation = decode(
            &schema.block,
            &json!({
                "schedule_id": "3",
                "name": "primary",
                "shift_timeslots": [{"start_hour": 9.0}]
            }),
        )
        .unwrap();

        assert_eq!(model.schedule_id, 3);
        assert!(model.email_on.is_empty());
        assert!(model.tags.is_empty());
        assert_eq!(model.is_cname, None);
        assert_eq!(
            model.shift_timeslots,
            vec![Timeslot {
                start_hour: 9,
                day_of_week: None
            }]
        );
    }

    #[test]
    fn test_decode_missing_required_field_is_validation_error() {
        let schema = timeslot_schema();
        let err = decode::<Rotation>(&schema.block, &json!({"name": "primary"})).unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
    }

    #[test]
    fn test_encode_conforms_model() {
        let schema = timeslot_schema();
        let model = Rotation {
            id: Some("9".to_string()),
            schedule_id: 3,
            name: "primary".to_string(),
            email_on: vec![],
            tags: BTreeMap::new(),
            is_cname: None,
            shift_timeslots: vec![],
        };
        let value = encode(&schema.block, &model).unwrap();
        assert_eq!(value["id"], "9");
        assert_eq!(value["owner"], Value::Null);
        assert_eq!(value["email_on"], json!([]));
    }

    #[test]
    fn test_is_zero_and_equivalent() {
        assert!(is_zero(&Value::Null));
        assert!(is_zero(&json!("")));
        assert!(is_zero(&json!([])));
        assert!(is_zero(&json!({})));
        assert!(!is_zero(&json!(0)));
        assert!(!is_zero(&json!(false)));

        assert!(equivalent(&json!(null), &json!("")));
        assert!(equivalent(&json!(3), &json!(3.0)));
        assert!(equivalent(
            &json!({"a": null, "b": [1]}),
            &json!({"b": [1.0]})
        ));
        assert!(equivalent(&json!(0), &Value::Null));
        assert!(equivalent(&Value::Null, &json!(0.0)));
        assert!(!equivalent(&json!(1), &Value::Null));
        assert!(!equivalent(&json!(false), &Value::Null));
        assert!(!equivalent(&json!(["a", "b"]), &json!(["b", "a"])));
    }
}
