//! Schema validation.
//!
//! Validates a `serde_json::Value` against a [`Schema`] and reports problems as
//! [`Diagnostic`]s with dotted attribute paths (`shift_timeslots.0.start_hour`).
//!
//! # Example
//!
//! ```
//! use hemmer_provider_squadcast::schema::{Attribute, Schema, Validator};
//! use hemmer_provider_squadcast::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("name", Attribute::required_string())
//!     .with_attribute(
//!         "start_hour",
//!         Attribute::required_int64().with_validator(Validator::IntBetween(0, 23)),
//!     );
//!
//! assert!(validate(&schema, &json!({"name": "primary", "start_hour": 9})).is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"name": "primary", "start_hour": 24}));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("start_hour".to_string()));
//! ```

use crate::schema::{
    Attribute, AttributeType, Block, BlockNestingMode, Diagnostic, NestedBlock, Schema, Validator,
};
use serde_json::Value;
use std::collections::BTreeMap;

/// Validate a JSON value against a schema.
///
/// - Required attributes must be present and non-null
/// - Computed-only attributes are skipped (the provider sets these)
/// - Attribute types must match the schema
/// - Validators run on present values (on each element for lists and sets)
/// - Nested blocks are validated recursively with min/max item constraints
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    validate_block(&schema.block, value, "", &mut diagnostics);
    diagnostics
}

/// Like [`validate`], but returns `Err` with the diagnostics when any were produced.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

/// Check if a JSON value is valid against a schema.
pub fn is_valid(schema: &Schema, value: &Value) -> bool {
    validate(schema, value).is_empty()
}

/// Run a single validator against a present value.
///
/// Returns a human-readable problem description when the value is rejected.
/// Values of the wrong JSON type are left to the type checks.
pub fn check_validator(validator: &Validator, value: &Value) -> Option<String> {
    match validator {
        Validator::OneOf(allowed) => {
            let s = value.as_str()?;
            if allowed.iter().any(|a| a == s) {
                None
            } else {
                Some(format!(
                    "expected one of [{}], got \"{}\"",
                    allowed.join(", "),
                    s
                ))
            }
        },
        Validator::IntBetween(min, max) => {
            let n = as_int64(value)?;
            if n < *min || n > *max {
                Some(format!("expected a value between {} and {}, got {}", min, max, n))
            } else {
                None
            }
        },
        Validator::StringLength(min, max) => {
            let len = value.as_str()?.chars().count();
            if len < *min || len > *max {
                Some(format!(
                    "expected length between {} and {}, got {}",
                    min, max, len
                ))
            } else {
                None
            }
        },
        Validator::ObjectId => {
            let s = value.as_str()?;
            if is_object_id(s) {
                None
            } else {
                Some(format!("\"{}\" is not a valid object id", s))
            }
        },
    }
}

/// Whether the string is a 24 character hexadecimal object id.
pub fn is_object_id(s: &str) -> bool {
    s.len() == 24 && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn validate_block(block: &Block, value: &Value, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    let obj = match value {
        Value::Object(map) => map,
        Value::Null => return,
        _ => {
            diagnostics.push(with_path(
                Diagnostic::error("Expected object")
                    .with_detail(format!("Got {}", value_type_name(value))),
                path,
            ));
            return;
        },
    };

    for (name, attr) in &block.attributes {
        let attr_path = join_path(path, name);
        validate_attribute(attr, obj.get(name), &attr_path, diagnostics);
    }

    for (name, nested) in &block.blocks {
        let block_path = join_path(path, name);
        validate_nested_block(nested, obj.get(name), &block_path, diagnostics);
    }
}

fn validate_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if attr.flags.is_computed_only() {
        return;
    }

    match value {
        None | Some(Value::Null) => {
            if attr.flags.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
        },
        Some(v) => {
            let before = diagnostics.len();
            validate_attribute_type(&attr.attr_type, v, path, diagnostics);
            if diagnostics.len() == before {
                apply_validators(attr, v, path, diagnostics);
            }
        },
    }
}

fn apply_validators(
    attr: &Attribute,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if attr.validators.is_empty() {
        return;
    }

    let targets: Vec<(String, &Value)> = match (&attr.attr_type, value) {
        (AttributeType::List(_) | AttributeType::Set(_), Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| (format!("{}.{}", path, i), item))
            .collect(),
        _ => vec![(path.to_string(), value)],
    };

    for (target_path, target) in targets {
        for validator in &attr.validators {
            if let Some(problem) = check_validator(validator, target) {
                diagnostics.push(
                    Diagnostic::error(format!("Invalid value for attribute '{}'", target_path))
                        .with_detail(problem)
                        .with_attribute(target_path.clone()),
                );
            }
        }
    }
}

fn validate_attribute_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match attr_type {
        AttributeType::String => {
            if !value.is_string() {
                diagnostics.push(type_error(path, "string", value));
            }
        },
        AttributeType::Int64 => {
            if as_int64(value).is_none() {
                diagnostics.push(type_error(path, "int64", value));
            }
        },
        AttributeType::Float64 => {
            if !value.is_number() {
                diagnostics.push(type_error(path, "float64", value));
            }
        },
        AttributeType::Bool => {
            if !value.is_boolean() {
                diagnostics.push(type_error(path, "bool", value));
            }
        },
        AttributeType::List(element_type) | AttributeType::Set(element_type) => {
            if let Some(arr) = value.as_array() {
                for (i, elem) in arr.iter().enumerate() {
                    let elem_path = format!("{}.{}", path, i);
                    validate_attribute_type(element_type, elem, &elem_path, diagnostics);
                }
            } else {
                let expected = if matches!(attr_type, AttributeType::Set(_)) {
                    "set"
                } else {
                    "list"
                };
                diagnostics.push(type_error(path, expected, value));
            }
        },
        AttributeType::Map(value_type) => {
            if let Some(obj) = value.as_object() {
                for (key, val) in obj {
                    let key_path = format!("{}.{}", path, key);
                    validate_attribute_type(value_type, val, &key_path, diagnostics);
                }
            } else {
                diagnostics.push(type_error(path, "map", value));
            }
        },
        AttributeType::Object(attrs) => {
            if let Some(obj) = value.as_object() {
                validate_object_type(attrs, obj, path, diagnostics);
            } else {
                diagnostics.push(type_error(path, "object", value));
            }
        },
        AttributeType::Dynamic => {},
    }
}

fn validate_object_type(
    attrs: &BTreeMap<String, AttributeType>,
    obj: &serde_json::Map<String, Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    // Object members carry no presence flags, so only types are checked.
    for (name, attr_type) in attrs {
        if let Some(value) = obj.get(name) {
            validate_attribute_type(attr_type, value, &join_path(path, name), diagnostics);
        }
    }
}

fn validate_nested_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match nested.nesting_mode {
        BlockNestingMode::Single => match value {
            None | Some(Value::Null) => {
                if nested.min_items > 0 {
                    diagnostics.push(
                        Diagnostic::error(format!("Missing required block '{}'", path))
                            .with_detail("At least one block is required")
                            .with_attribute(path),
                    );
                }
            },
            // A one-element list is the flattened form of a single block.
            Some(Value::Array(arr)) if arr.len() <= 1 => {
                if let Some(item) = arr.first() {
                    validate_block(&nested.block, item, path, diagnostics);
                } else if nested.min_items > 0 {
                    diagnostics.push(
                        Diagnostic::error(format!("Missing required block '{}'", path))
                            .with_attribute(path),
                    );
                }
            },
            Some(v) => validate_block(&nested.block, v, path, diagnostics),
        },
        BlockNestingMode::List | BlockNestingMode::Set => match value {
            None | Some(Value::Null) => check_count(nested, 0, path, diagnostics),
            Some(Value::Array(arr)) => {
                check_count(nested, arr.len(), path, diagnostics);
                for (i, item) in arr.iter().enumerate() {
                    let item_path = format!("{}.{}", path, i);
                    validate_block(&nested.block, item, &item_path, diagnostics);
                }
            },
            Some(v) => diagnostics.push(
                Diagnostic::error(format!("Expected list for block '{}'", path))
                    .with_detail(format!("Got {}", value_type_name(v)))
                    .with_attribute(path),
            ),
        },
        BlockNestingMode::Map => match value {
            None | Some(Value::Null) => check_count(nested, 0, path, diagnostics),
            Some(Value::Object(obj)) => {
                check_count(nested, obj.len(), path, diagnostics);
                for (key, item) in obj {
                    let item_path = format!("{}.{}", path, key);
                    validate_block(&nested.block, item, &item_path, diagnostics);
                }
            },
            Some(v) => diagnostics.push(
                Diagnostic::error(format!("Expected map for block '{}'", path))
                    .with_detail(format!("Got {}", value_type_name(v)))
                    .with_attribute(path),
            ),
        },
    }
}

fn check_count(nested: &NestedBlock, len: usize, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    let len = len as u32;
    if len < nested.min_items {
        diagnostics.push(
            Diagnostic::error(format!(
                "Block '{}' requires at least {} item(s), got {}",
                path, nested.min_items, len
            ))
            .with_attribute(path),
        );
    }
    if nested.max_items > 0 && len > nested.max_items {
        diagnostics.push(
            Diagnostic::error(format!(
                "Block '{}' allows at most {} item(s), got {}",
                path, nested.max_items, len
            ))
            .with_attribute(path),
        );
    }
}

// Helper functions

fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", base, name)
    }
}

fn with_path(diagnostic: Diagnostic, path: &str) -> Diagnostic {
    if path.is_empty() {
        diagnostic
    } else {
        diagnostic.with_attribute(path)
    }
}

pub(crate) fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Integer view of a number, accepting floats without a fractional part.
pub(crate) fn as_int64(value: &Value) -> Option<i64> {
    let Value::Number(n) = value else {
        return None;
    };
    if let Some(i) = n.as_i64() {
        return Some(i);
    }
    let f = n.as_f64()?;
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic::error(format!("Invalid type for attribute '{}'", path))
        .with_detail(format!("Expected {}, got {}", expected, value_type_name(got)))
        .with_attribute(path)
}
