//! Execution payloads: entrypoint arguments built from a flat model.

use std::collections::HashMap;

use num_bigint::{BigInt, Sign};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::errors::{EngineError, EngineResult};
use crate::micheline::{encode, from_json, parse_expr, to_json, Node};
use crate::michelson::{find_entrypoint, SaplingKind, ScalarType, TypeKind, TypeNode};
use crate::projection::{flattens, member_names, or_branches, pair_members, SCHEMA_KEY};

/// An entrypoint argument ready for submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Payload {
    pub entrypoint: String,
    #[serde(serialize_with = "serialize_node")]
    pub value: Node,
}

fn serialize_node<S: serde::Serializer>(node: &Node, serializer: S) -> Result<S::Ok, S::Error> {
    to_json(node).serialize(serializer)
}

impl Payload {
    /// Binary encoding of the value, as forged into a transaction.
    pub fn to_bytes(&self) -> EngineResult<Vec<u8>> {
        encode(&self.value)
    }

    /// `{"entrypoint": ..., "value": ...}` as accepted by node RPCs.
    pub fn to_json(&self) -> Value {
        json!({ "entrypoint": self.entrypoint, "value": to_json(&self.value) })
    }
}

/// Build the argument of `entrypoint` from a flat map of member names to
/// values, in the shape of [`crate::projection::current_model`].
pub fn build_parameters(
    root: &TypeNode,
    entrypoint: &str,
    input: &Map<String, Value>,
) -> EngineResult<Payload> {
    let ep = find_entrypoint(root, entrypoint)?;
    let value = build_members(ep.node, input)?;
    Ok(Payload {
        entrypoint: ep.name,
        value,
    })
}

/// A pair reads its flattened members from `input`; any other node reads
/// the value stored under its own name.
fn build_members(node: &TypeNode, input: &Map<String, Value>) -> EngineResult<Node> {
    if !matches!(node.kind, TypeKind::Pair(..)) {
        return build_member(node, &node.name(), input);
    }
    let members = pair_members(node);
    let mut names = member_names(&members);
    if binds_by_position(&members, &names, input) {
        names = input.keys().cloned().collect();
    }
    let names: HashMap<usize, String> = members.iter().map(|m| m.ordinal).zip(names).collect();
    build_pair(node, &names, input)
}

/// Members without field annotations have only derived names. When the
/// input does not use them but supplies one value per member, its keys are
/// taken in order.
fn binds_by_position(members: &[&TypeNode], names: &[String], input: &Map<String, Value>) -> bool {
    input.len() == members.len()
        && members.iter().all(|m| m.annots.field().is_none())
        && !names.iter().all(|name| input.contains_key(name))
}

fn build_pair(
    node: &TypeNode,
    names: &HashMap<usize, String>,
    input: &Map<String, Value>,
) -> EngineResult<Node> {
    let TypeKind::Pair(left, right) = &node.kind else {
        return Err(EngineError::malformed("expected a pair schema"));
    };
    let mut parts = Vec::with_capacity(2);
    for child in [left, right] {
        let part = if flattens(child) {
            build_pair(child, names, input)?
        } else {
            let name = names
                .get(&child.ordinal)
                .cloned()
                .unwrap_or_else(|| child.name());
            build_member(child, &name, input)?
        };
        parts.push(part);
    }
    Ok(Node::prim_with("Pair", parts))
}

fn build_member(member: &TypeNode, name: &str, input: &Map<String, Value>) -> EngineResult<Node> {
    match input.get(name) {
        Some(value) => build_value(member, name, value),
        None => match member.kind {
            TypeKind::Option(_) => Ok(Node::prim("None")),
            TypeKind::Scalar(ScalarType::Unit) => Ok(Node::prim("Unit")),
            _ => Err(EngineError::MissingField(name.to_string())),
        },
    }
}

fn build_value(node: &TypeNode, field: &str, value: &Value) -> EngineResult<Node> {
    match &node.kind {
        TypeKind::Scalar(ty) => build_scalar(*ty, field, value),
        TypeKind::Pair(..) => {
            let obj = as_object(field, value)?;
            build_members(node, obj)
        }
        TypeKind::Or(..) => {
            let obj = as_object(field, value)?;
            let selected = obj
                .get(SCHEMA_KEY)
                .and_then(Value::as_str)
                .ok_or_else(|| EngineError::MissingField(format!("{field}.{SCHEMA_KEY}")))?;
            let (sides, branch) = or_branches(node)
                .into_iter()
                .find(|(_, branch)| branch.name() == selected)
                .ok_or_else(|| {
                    EngineError::invalid_field(field, format!("unknown branch {selected:?}"))
                })?;
            let mut built = build_members(branch, obj)?;
            for side in sides.iter().rev() {
                built = Node::prim_with(side.prim(), vec![built]);
            }
            Ok(built)
        }
        TypeKind::Option(inner) => match value {
            Value::Null => Ok(Node::prim("None")),
            other => Ok(Node::prim_with("Some", vec![build_value(inner, field, other)?])),
        },
        TypeKind::List(elem) | TypeKind::Set(elem) => Ok(Node::Seq(
            as_array(field, value)?
                .iter()
                .map(|item| build_value(elem, field, item))
                .collect::<EngineResult<_>>()?,
        )),
        TypeKind::Map(key, val) => build_entries(key, val, field, value),
        TypeKind::BigMap(key, val) => match value {
            Value::Number(_) => Ok(Node::Int(parse_int(field, value)?)),
            _ => build_entries(key, val, field, value),
        },
        TypeKind::Lambda(..) => match value {
            Value::String(code) => parse_expr(code),
            other => from_json(other),
        },
        TypeKind::Contract(_) => Ok(Node::String(as_str(field, value)?.to_string())),
        TypeKind::Ticket(_) => Err(EngineError::invalid_field(
            field,
            "tickets cannot be created from parameters",
        )),
        TypeKind::Sapling {
            kind: SaplingKind::State,
            ..
        } => Ok(Node::Int(parse_int(field, value)?)),
        TypeKind::Sapling { .. } => Ok(Node::Bytes(parse_bytes(field, value)?)),
    }
}

/// Entries as `[{"key": k, "value": v}, ...]` or, for string-like keys, an
/// object.
fn build_entries(key: &TypeNode, val: &TypeNode, field: &str, value: &Value) -> EngineResult<Node> {
    let elt = |k: Node, v: Node| Node::prim_with("Elt", vec![k, v]);
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| {
                let obj = as_object(field, item)?;
                let k = obj
                    .get("key")
                    .ok_or_else(|| EngineError::MissingField(format!("{field}.key")))?;
                let v = obj
                    .get("value")
                    .ok_or_else(|| EngineError::MissingField(format!("{field}.value")))?;
                Ok(elt(build_value(key, field, k)?, build_value(val, field, v)?))
            })
            .collect::<EngineResult<Vec<_>>>()
            .map(Node::Seq),
        Value::Object(obj) => obj
            .iter()
            .map(|(k, v)| {
                Ok(elt(
                    build_value(key, field, &Value::String(k.clone()))?,
                    build_value(val, field, v)?,
                ))
            })
            .collect::<EngineResult<Vec<_>>>()
            .map(Node::Seq),
        _ => Err(EngineError::invalid_field(field, "expected an array of entries")),
    }
}

fn build_scalar(ty: ScalarType, field: &str, value: &Value) -> EngineResult<Node> {
    match ty {
        ScalarType::Unit => Ok(Node::prim("Unit")),
        ScalarType::Bool => match value {
            Value::Bool(true) => Ok(Node::prim("True")),
            Value::Bool(false) => Ok(Node::prim("False")),
            Value::String(s) if s == "true" => Ok(Node::prim("True")),
            Value::String(s) if s == "false" => Ok(Node::prim("False")),
            _ => Err(EngineError::invalid_field(field, "expected a boolean")),
        },
        ScalarType::Int => Ok(Node::Int(parse_int(field, value)?)),
        ScalarType::Nat | ScalarType::Mutez => {
            let n = parse_int(field, value)?;
            if n.sign() == Sign::Minus {
                return Err(EngineError::invalid_field(field, "must be non-negative"));
            }
            Ok(Node::Int(n))
        }
        ScalarType::Timestamp => match value {
            Value::Number(_) => Ok(Node::Int(parse_int(field, value)?)),
            _ => Ok(Node::String(as_str(field, value)?.to_string())),
        },
        ScalarType::Bls12381Fr if value.is_number() => Ok(Node::Int(parse_int(field, value)?)),
        ScalarType::Bytes
        | ScalarType::Bls12381G1
        | ScalarType::Bls12381G2
        | ScalarType::Bls12381Fr
        | ScalarType::Chest
        | ScalarType::ChestKey => Ok(Node::Bytes(parse_bytes(field, value)?)),
        ScalarType::String
        | ScalarType::Address
        | ScalarType::Key
        | ScalarType::KeyHash
        | ScalarType::Signature
        | ScalarType::ChainId
        | ScalarType::TxRollupL2Address => Ok(Node::String(as_str(field, value)?.to_string())),
        ScalarType::Operation | ScalarType::Never => Err(EngineError::invalid_field(
            field,
            format!("{} values cannot be supplied", ty.prim()),
        )),
    }
}

fn as_object<'a>(field: &str, value: &'a Value) -> EngineResult<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| EngineError::invalid_field(field, "expected an object"))
}

fn as_array<'a>(field: &str, value: &'a Value) -> EngineResult<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| EngineError::invalid_field(field, "expected an array"))
}

fn as_str<'a>(field: &str, value: &'a Value) -> EngineResult<&'a str> {
    value
        .as_str()
        .ok_or_else(|| EngineError::invalid_field(field, "expected a string"))
}

fn parse_int(field: &str, value: &Value) -> EngineResult<BigInt> {
    let text = match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return Err(EngineError::invalid_field(field, "expected an integer")),
    };
    text.parse()
        .map_err(|_| EngineError::invalid_field(field, format!("invalid integer {text:?}")))
}

fn parse_bytes(field: &str, value: &Value) -> EngineResult<Vec<u8>> {
    let text = as_str(field, value)?;
    let digits = text.strip_prefix("0x").unwrap_or(text);
    hex::decode(digits).map_err(|e| EngineError::invalid_field(field, format!("invalid hex: {e}")))
}
