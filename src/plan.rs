//! Drift detection: compares prior state with the proposed configuration.
//!
//! Both sides are first conformed to the resource schema so that cosmetic
//! differences (`"17"` vs `17`, absent vs empty list, a single block wrapped in
//! a list) never show up as changes. Computed-only attributes are owned by the
//! provider: they are carried over from prior state on update, left unknown
//! (null) on create, and ignored when comparing nested blocks.

use serde_json::{Map, Value};

use crate::codec::{conform, equivalent, is_zero};
use crate::error::ProviderError;
use crate::schema::{Block, BlockNestingMode, Schema};
use crate::types::{AttributeChange, PlanResult};

/// Plan the changes needed to move from `prior` to `proposed`.
///
/// - `prior == None` plans a create
/// - `proposed == null` plans a destroy
/// - anything else plans an in-place update or a replacement
pub fn plan(
    schema: &Schema,
    prior: Option<&Value>,
    proposed: &Value,
) -> Result<PlanResult, ProviderError> {
    match (prior, proposed) {
        (None, Value::Null) => Ok(PlanResult::no_change(Value::Null)),
        (None, proposed) => plan_create(schema, proposed),
        (Some(prior), Value::Null) => plan_destroy(schema, prior),
        (Some(prior), proposed) => plan_update(schema, prior, proposed),
    }
}

fn plan_create(schema: &Schema, proposed: &Value) -> Result<PlanResult, ProviderError> {
    let mut planned = with_defaults(&schema.block, conform(&schema.block, proposed)?);

    let mut changes = Vec::new();
    if let Value::Object(map) = &mut planned {
        for (name, attr) in &schema.block.attributes {
            if attr.flags.is_computed_only() {
                map.insert(name.clone(), Value::Null);
                continue;
            }
            if let Some(value) = map.get(name).filter(|v| !is_zero(v)) {
                changes.push(AttributeChange::added(name.clone(), value.clone()));
            }
        }
        for name in schema.block.blocks.keys() {
            if let Some(value) = map.get(name).filter(|v| !is_zero(v)) {
                changes.push(AttributeChange::added(name.clone(), value.clone()));
            }
        }
    }

    Ok(PlanResult::with_changes(planned, changes, false))
}

fn plan_destroy(schema: &Schema, prior: &Value) -> Result<PlanResult, ProviderError> {
    let prior = conform(&schema.block, prior)?;
    let mut changes = Vec::new();
    if let Value::Object(map) = &prior {
        for (name, value) in map {
            if !is_zero(value) {
                changes.push(AttributeChange::removed(name.clone(), value.clone()));
            }
        }
    }
    Ok(PlanResult::with_changes(Value::Null, changes, false))
}

fn plan_update(
    schema: &Schema,
    prior: &Value,
    proposed: &Value,
) -> Result<PlanResult, ProviderError> {
    let prior = conform(&schema.block, prior)?;
    let proposed = with_defaults(&schema.block, conform(&schema.block, proposed)?);

    let empty = Map::new();
    let prior_map = prior.as_object().unwrap_or(&empty);
    let proposed_map = proposed.as_object().unwrap_or(&empty);

    let mut planned = Map::new();
    let mut changes = Vec::new();
    let mut requires_replace = false;

    for (name, attr) in &schema.block.attributes {
        let before = prior_map.get(name).unwrap_or(&Value::Null);
        let after = proposed_map.get(name).unwrap_or(&Value::Null);

        if attr.flags.is_computed_only() {
            planned.insert(name.clone(), before.clone());
            continue;
        }
        if equivalent(before, after) {
            planned.insert(name.clone(), before.clone());
        } else {
            requires_replace |= attr.force_new;
            changes.push(AttributeChange::modified(name.clone(), before.clone(), after.clone()));
            planned.insert(name.clone(), after.clone());
        }
    }

    for (name, nested) in &schema.block.blocks {
        let before = prior_map.get(name).unwrap_or(&Value::Null);
        let after = proposed_map.get(name).unwrap_or(&Value::Null);

        let before_cmp = strip_computed_nested(&nested.block, nested.nesting_mode, before);
        let after_cmp = strip_computed_nested(&nested.block, nested.nesting_mode, after);
        if equivalent(&before_cmp, &after_cmp) {
            planned.insert(name.clone(), before.clone());
        } else {
            requires_replace |= nested.force_new;
            changes.push(AttributeChange::modified(name.clone(), before.clone(), after.clone()));
            planned.insert(name.clone(), after.clone());
        }
    }

    if changes.is_empty() {
        return Ok(PlanResult::no_change(Value::Object(planned)));
    }
    Ok(PlanResult::with_changes(Value::Object(planned), changes, requires_replace))
}

/// Fill null attributes that declare a default.
fn with_defaults(block: &Block, mut value: Value) -> Value {
    if let Value::Object(map) = &mut value {
        for (name, attr) in &block.attributes {
            if let Some(default) = &attr.default {
                let slot = map.entry(name.clone()).or_insert(Value::Null);
                if slot.is_null() {
                    *slot = default.clone();
                }
            }
        }
    }
    value
}

fn strip_computed(block: &Block, value: &Value) -> Value {
    let Value::Object(map) = value else {
        return value.clone();
    };
    let mut out = Map::new();
    for (key, item) in map {
        if let Some(attr) = block.attributes.get(key) {
            if !attr.flags.is_computed_only() {
                out.insert(key.clone(), item.clone());
            }
        } else if let Some(nested) = block.blocks.get(key) {
            out.insert(
                key.clone(),
                strip_computed_nested(&nested.block, nested.nesting_mode, item),
            );
        }
    }
    Value::Object(out)
}

fn strip_computed_nested(block: &Block, mode: BlockNestingMode, value: &Value) -> Value {
    match (mode, value) {
        (BlockNestingMode::Single, v) => strip_computed(block, v),
        (BlockNestingMode::List | BlockNestingMode::Set, Value::Array(items)) => {
            Value::Array(items.iter().map(|i| strip_computed(block, i)).collect())
        },
        (BlockNestingMode::Map, Value::Object(entries)) => Value::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), strip_computed(block, v)))
                .collect(),
        ),
        (_, v) => v.clone(),
    }
}
