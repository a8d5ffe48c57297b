//! Display projection: a settled tree with typing wrappers collapsed into
//! plain JSON for UI rendering.

use serde_json::{json, Map, Value};

use crate::errors::EngineResult;
use crate::micheline::format_inline;
use crate::michelson::{TypeKind, TypeNode};
use crate::projection::{member_names, selected_branch, settled_members, shape_error};
use crate::settle::{Scalar, SettledNode, SettledValue, TypedAst};

pub fn miguel_ast(ast: &TypedAst) -> EngineResult<Value> {
    let (schema, settled) = ast.parts()?;
    miguel(schema, settled)
}

/// Project `settled`, bound to `schema`, into its display form.
///
/// Pairs become objects keyed by member name, `or` values become a
/// single-key object naming the branch, options collapse to `null` or their
/// content, and big maps render as their pointer plus whatever entries were
/// attached.
pub fn miguel(schema: &TypeNode, settled: &SettledNode) -> EngineResult<Value> {
    match (&schema.kind, &settled.value) {
        (_, SettledValue::Scalar { value, .. }) => Ok(scalar(value)),
        (TypeKind::Pair(..), SettledValue::Pair(..)) => {
            let members = settled_members(schema, settled)?;
            let types: Vec<&TypeNode> = members.iter().map(|(ty, _)| *ty).collect();
            let mut obj = Map::new();
            for (name, (ty, value)) in member_names(&types).into_iter().zip(&members) {
                obj.insert(name, miguel(ty, value)?);
            }
            Ok(Value::Object(obj))
        }
        (TypeKind::Or(..), SettledValue::Or { .. }) => {
            let (branch, value) = selected_branch(schema, settled)?;
            let mut obj = Map::new();
            obj.insert(branch.name(), miguel(branch, value)?);
            Ok(Value::Object(obj))
        }
        (TypeKind::Option(_), SettledValue::Option(None)) => Ok(Value::Null),
        (TypeKind::Option(inner), SettledValue::Option(Some(value))) => miguel(inner, value),
        (TypeKind::List(elem), SettledValue::List(items))
        | (TypeKind::Set(elem), SettledValue::Set(items)) => Ok(Value::Array(
            items
                .iter()
                .map(|item| miguel(elem, item))
                .collect::<EngineResult<_>>()?,
        )),
        (TypeKind::Map(key, val), SettledValue::Map(entries)) => entries_value(key, val, entries),
        (TypeKind::BigMap(key, val), SettledValue::BigMap(big_map)) => {
            let entries = match &big_map.entries {
                Some(entries) => entries_value(key, val, entries)?,
                None => Value::Null,
            };
            Ok(json!({
                "ptr": big_map.ptr.as_ref().map(|p| p.to_string()),
                "resolved": big_map.is_resolved(),
                "entries": entries,
            }))
        }
        (TypeKind::Contract(_), SettledValue::Contract(address)) => Ok(Value::String(address.clone())),
        (
            TypeKind::Ticket(inner),
            SettledValue::Ticket {
                ticketer,
                value,
                amount,
            },
        ) => Ok(json!({
            "ticketer": ticketer,
            "value": miguel(inner, value)?,
            "amount": amount.to_string(),
        })),
        (_, SettledValue::Opaque(node)) => Ok(Value::String(format_inline(node))),
        _ => Err(shape_error(schema, settled)),
    }
}

fn scalar(value: &Scalar) -> Value {
    match value {
        Scalar::Unit => Value::Null,
        Scalar::Bool(b) => Value::Bool(*b),
        other => Value::String(other.display()),
    }
}

/// Objects when keys have a plain string form, arrays of key/value pairs
/// otherwise.
fn entries_value(
    key: &TypeNode,
    val: &TypeNode,
    entries: &[(SettledNode, SettledNode)],
) -> EngineResult<Value> {
    let string_keys = key.scalar().is_some_and(|s| s.is_string_like());
    if string_keys {
        let mut obj = Map::new();
        for (k, v) in entries {
            let name = k.scalar().map(Scalar::display).unwrap_or_default();
            obj.insert(name, miguel(val, v)?);
        }
        return Ok(Value::Object(obj));
    }
    Ok(Value::Array(
        entries
            .iter()
            .map(|(k, v)| -> EngineResult<Value> {
                Ok(json!({ "key": miguel(key, k)?, "value": miguel(val, v)? }))
            })
            .collect::<EngineResult<_>>()?,
    ))
}
