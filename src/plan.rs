//! Schema-driven planning.
//!
//! The planned state is the proposed configuration with the gaps filled:
//! read-only attributes carry their prior value, optional attributes that
//! Kong computes keep what Kong last reported, and unset attributes with a
//! default take it. The planned state is then diffed against the prior state
//! to produce attribute changes and the replacement decision.

use serde_json::{Map, Value};

use crate::schema::{Block, BlockNestingMode, NestedBlock, Schema};
use crate::types::{AttributeChange, PlanResult};

/// Plan a resource change.
///
/// `prior` is `None` when the resource does not exist yet. A `Null`
/// proposal plans a destroy.
pub fn plan_resource(schema: &Schema, prior: Option<&Value>, proposed: &Value) -> PlanResult {
    let prior = prior.filter(|p| !p.is_null());

    if proposed.is_null() {
        let changes = prior
            .and_then(Value::as_object)
            .map(|obj| {
                obj.iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, v)| AttributeChange::removed(k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        return PlanResult::with_changes(Value::Null, changes, false);
    }

    let mut planned = plan_block(&schema.block, prior, proposed);
    let requires_replace = prior.is_some_and(|p| needs_replacement(schema, p, &planned));

    if requires_replace {
        clear_computed(&schema.block, &mut planned);
    }

    let mut changes = Vec::new();
    diff_block(&schema.block, "", prior, &planned, &mut changes);

    if changes.is_empty() && !requires_replace {
        PlanResult::no_change(planned)
    } else {
        PlanResult::with_changes(planned, changes, requires_replace)
    }
}

fn field<'a>(value: Option<&'a Value>, name: &str) -> Option<&'a Value> {
    value.and_then(|v| v.get(name)).filter(|v| !v.is_null())
}

fn plan_block(block: &Block, prior: Option<&Value>, proposed: &Value) -> Value {
    let mut planned = Map::new();

    for (name, attr) in &block.attributes {
        let prior_value = field(prior, name);
        let value = if attr.flags.is_computed_only() {
            prior_value.cloned()
        } else if let Some(configured) = field(Some(proposed), name) {
            Some(configured.clone())
        } else if let Some(default) = &attr.default {
            Some(default.clone())
        } else if attr.flags.computed {
            prior_value.cloned()
        } else {
            None
        };
        planned.insert(name.clone(), value.unwrap_or(Value::Null));
    }

    for (name, nested) in &block.blocks {
        let value = plan_nested(nested, field(prior, name), field(Some(proposed), name));
        planned.insert(name.clone(), value);
    }

    Value::Object(planned)
}

fn plan_nested(nested: &NestedBlock, prior: Option<&Value>, proposed: Option<&Value>) -> Value {
    match (nested.nesting_mode, proposed) {
        (BlockNestingMode::Single, Some(value)) => plan_block(&nested.block, prior, value),
        (BlockNestingMode::List, Some(Value::Array(items))) => Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    let prior_item = prior.and_then(|p| p.get(i));
                    plan_block(&nested.block, prior_item, item)
                })
                .collect(),
        ),
        (_, Some(other)) => other.clone(),
        (_, None) if nested.computed => prior.cloned().unwrap_or(Value::Null),
        (_, None) => Value::Null,
    }
}

fn needs_replacement(schema: &Schema, prior: &Value, planned: &Value) -> bool {
    schema.block.attributes.iter().any(|(name, attr)| {
        attr.force_new && field(Some(prior), name) != field(Some(planned), name)
    })
}

fn clear_computed(block: &Block, planned: &mut Value) {
    if let Some(obj) = planned.as_object_mut() {
        for (name, attr) in &block.attributes {
            if attr.flags.is_computed_only() {
                obj.insert(name.clone(), Value::Null);
            }
        }
    }
}

fn join(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", base, name)
    }
}

fn diff_block(
    block: &Block,
    path: &str,
    prior: Option<&Value>,
    planned: &Value,
    changes: &mut Vec<AttributeChange>,
) {
    for (name, attr) in &block.attributes {
        if attr.flags.is_computed_only() {
            continue;
        }
        diff_value(&join(path, name), field(prior, name), field(Some(planned), name), changes);
    }

    for (name, nested) in &block.blocks {
        let at = join(path, name);
        let before = field(prior, name);
        let after = field(Some(planned), name);
        match (nested.nesting_mode, before, after) {
            (BlockNestingMode::Single, Some(b), Some(a)) if b.is_object() && a.is_object() => {
                diff_block(&nested.block, &at, Some(b), a, changes);
            }
            _ => diff_value(&at, before, after, changes),
        }
    }
}

fn diff_value(
    path: &str,
    before: Option<&Value>,
    after: Option<&Value>,
    changes: &mut Vec<AttributeChange>,
) {
    match (before, after) {
        (None, None) => {}
        (None, Some(a)) => changes.push(AttributeChange::added(path, a.clone())),
        (Some(b), None) => changes.push(AttributeChange::removed(path, b.clone())),
        (Some(b), Some(a)) if without_nulls(b) != without_nulls(a) => {
            changes.push(AttributeChange::modified(path, b.clone(), a.clone()))
        }
        _ => {}
    }
}

// Kong omits unset keys inside nested objects where the plan has nulls, and
// answers whole-valued floats as `1.0` where the configuration says `1`.
fn without_nulls(value: &Value) -> Value {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                Value::from(f as i64)
            }
            _ => value.clone(),
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), without_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(without_nulls).collect()),
        other => other.clone(),
    }
}
