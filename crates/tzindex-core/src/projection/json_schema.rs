//! JSON Schema projection and the models that fill it.

use num_bigint::BigInt;
use num_traits::ToPrimitive;
use serde_json::{json, Map, Value};

use crate::errors::EngineResult;
use crate::micheline::format_inline;
use crate::michelson::{find_entrypoint, SaplingKind, ScalarType, TypeKind, TypeNode};
use crate::projection::{
    member_names, or_branches, pair_members, selected_branch, settled_members, shape_error,
    SCHEMA_KEY,
};
use crate::settle::forge::timestamp_to_rfc3339;
use crate::settle::{Scalar, SettledNode, SettledValue};

const DRAFT: &str = "http://json-schema.org/draft-07/schema#";

/// JSON Schema document for values of `schema`.
pub fn json_schema(schema: &TypeNode) -> Value {
    let mut doc = node_schema(schema);
    if let Value::Object(obj) = &mut doc {
        obj.insert("$schema".to_string(), Value::String(DRAFT.to_string()));
    }
    doc
}

/// Schema of one entrypoint's argument.
pub fn entrypoint_schema(root: &TypeNode, entrypoint: &str) -> EngineResult<Value> {
    let ep = find_entrypoint(root, entrypoint)?;
    Ok(json_schema(ep.node))
}

fn titled(node: &TypeNode, mut body: Map<String, Value>) -> Value {
    body.insert("title".to_string(), Value::String(node.name()));
    Value::Object(body)
}

fn object_of(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(obj) => obj,
        _ => Map::new(),
    }
}

/// `properties`/`required` for a pair's members, or for a single non-pair
/// node wrapped as one property.
fn member_properties(node: &TypeNode) -> (Map<String, Value>, Vec<Value>) {
    let members = pair_members(node);
    let mut properties = Map::new();
    let mut required = Vec::new();
    for (name, member) in member_names(&members).into_iter().zip(&members) {
        if !matches!(member.kind, TypeKind::Option(_) | TypeKind::Scalar(ScalarType::Unit)) {
            required.push(Value::String(name.clone()));
        }
        properties.insert(name, node_schema(member));
    }
    (properties, required)
}

fn node_schema(node: &TypeNode) -> Value {
    let body = match &node.kind {
        TypeKind::Scalar(ty) => scalar_schema(*ty),
        TypeKind::Pair(..) => {
            let (properties, required) = member_properties(node);
            object_of(json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }))
        }
        TypeKind::Or(..) => {
            let one_of: Vec<Value> = or_branches(node)
                .into_iter()
                .map(|(_, branch)| {
                    let (mut properties, mut required) = member_properties(branch);
                    properties.insert(
                        SCHEMA_KEY.to_string(),
                        json!({ "type": "string", "const": branch.name() }),
                    );
                    required.insert(0, Value::String(SCHEMA_KEY.to_string()));
                    json!({
                        "title": branch.name(),
                        "type": "object",
                        "properties": properties,
                        "required": required,
                    })
                })
                .collect();
            object_of(json!({ "type": "object", "oneOf": one_of }))
        }
        TypeKind::Option(inner) => object_of(json!({
            "oneOf": [
                { "title": "None", "type": "null" },
                node_schema(inner),
            ],
        })),
        TypeKind::List(elem) => object_of(json!({ "type": "array", "items": node_schema(elem) })),
        TypeKind::Set(elem) => object_of(json!({
            "type": "array",
            "uniqueItems": true,
            "items": node_schema(elem),
        })),
        TypeKind::Map(key, val) | TypeKind::BigMap(key, val) => object_of(json!({
            "type": "array",
            "items": {
                "type": "object",
                "properties": { "key": node_schema(key), "value": node_schema(val) },
                "required": ["key", "value"],
            },
        })),
        TypeKind::Lambda(..) => object_of(json!({ "type": "string", "format": "michelson" })),
        TypeKind::Contract(_) => object_of(json!({ "type": "string", "format": "address" })),
        TypeKind::Ticket(inner) => object_of(json!({
            "type": "object",
            "readOnly": true,
            "properties": {
                "ticketer": { "type": "string", "format": "address" },
                "value": node_schema(inner),
                "amount": { "type": "integer", "minimum": 0 },
            },
        })),
        TypeKind::Sapling {
            kind: SaplingKind::State,
            ..
        } => object_of(json!({ "type": "integer", "readOnly": true })),
        TypeKind::Sapling { .. } => object_of(json!({ "type": "string", "format": "bytes" })),
    };
    titled(node, body)
}

fn scalar_schema(ty: ScalarType) -> Map<String, Value> {
    let value = match ty {
        ScalarType::Unit => json!({ "type": "null" }),
        ScalarType::Bool => json!({ "type": "boolean" }),
        ScalarType::Int => json!({ "type": "integer" }),
        ScalarType::Nat | ScalarType::Mutez => json!({ "type": "integer", "minimum": 0 }),
        ScalarType::String => json!({ "type": "string" }),
        ScalarType::Timestamp => json!({ "type": "string", "format": "date-time" }),
        ScalarType::Bytes
        | ScalarType::Bls12381G1
        | ScalarType::Bls12381G2
        | ScalarType::Bls12381Fr
        | ScalarType::Chest
        | ScalarType::ChestKey => {
            json!({ "type": "string", "format": "bytes", "pattern": "^([0-9a-fA-F]{2})*$" })
        }
        ScalarType::Address | ScalarType::TxRollupL2Address => {
            json!({ "type": "string", "format": "address" })
        }
        ScalarType::Key | ScalarType::KeyHash | ScalarType::Signature | ScalarType::ChainId => {
            json!({ "type": "string", "format": ty.prim() })
        }
        ScalarType::Operation => json!({ "type": "string", "format": "bytes", "readOnly": true }),
        ScalarType::Never => json!({ "not": {} }),
    };
    object_of(value)
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

/// Zero-valued model shaped like [`json_schema`], for prefilling forms.
pub fn default_model(schema: &TypeNode) -> Value {
    match &schema.kind {
        TypeKind::Scalar(ty) => match ty {
            ScalarType::Unit | ScalarType::Never | ScalarType::Operation => Value::Null,
            ScalarType::Bool => Value::Bool(false),
            ScalarType::Int | ScalarType::Nat | ScalarType::Mutez => json!(0),
            ScalarType::Timestamp => Value::String(timestamp_to_rfc3339(&BigInt::from(0))),
            _ => Value::String(String::new()),
        },
        TypeKind::Pair(..) => {
            let members = pair_members(schema);
            let mut obj = Map::new();
            for (name, member) in member_names(&members).into_iter().zip(&members) {
                obj.insert(name, default_model(member));
            }
            Value::Object(obj)
        }
        TypeKind::Or(..) => match or_branches(schema).into_iter().next() {
            Some((_, branch)) => branch_model(branch, default_model),
            None => Value::Null,
        },
        TypeKind::Option(_) | TypeKind::Ticket(_) => Value::Null,
        TypeKind::List(_) | TypeKind::Set(_) | TypeKind::Map(..) | TypeKind::BigMap(..) => {
            Value::Array(Vec::new())
        }
        TypeKind::Lambda(..) => Value::String("{}".to_string()),
        TypeKind::Contract(_) => Value::String(String::new()),
        TypeKind::Sapling {
            kind: SaplingKind::State,
            ..
        } => json!(0),
        TypeKind::Sapling { .. } => Value::String(String::new()),
    }
}

/// `{"schemaKey": name, ...fields}` for one branch of an `or`.
fn branch_model(branch: &TypeNode, fill: impl Fn(&TypeNode) -> Value) -> Value {
    let mut obj = Map::new();
    obj.insert(SCHEMA_KEY.to_string(), Value::String(branch.name()));
    if matches!(branch.kind, TypeKind::Pair(..)) {
        if let Value::Object(fields) = fill(branch) {
            obj.extend(fields);
        }
    } else {
        obj.insert(branch.name(), fill(branch));
    }
    Value::Object(obj)
}

/// Model filled with the settled values, in the shape the payload builder
/// accepts.
pub fn current_model(schema: &TypeNode, settled: &SettledNode) -> EngineResult<Value> {
    let value = match (&schema.kind, &settled.value) {
        (_, SettledValue::Scalar { value, .. }) => scalar_model(value),
        (TypeKind::Pair(..), SettledValue::Pair(..)) => {
            let members = settled_members(schema, settled)?;
            let types: Vec<&TypeNode> = members.iter().map(|(ty, _)| *ty).collect();
            let mut obj = Map::new();
            for (name, (ty, value)) in member_names(&types).into_iter().zip(&members) {
                obj.insert(name, current_model(ty, value)?);
            }
            Value::Object(obj)
        }
        (TypeKind::Or(..), SettledValue::Or { .. }) => {
            let (branch, value) = selected_branch(schema, settled)?;
            let mut obj = Map::new();
            obj.insert(SCHEMA_KEY.to_string(), Value::String(branch.name()));
            match current_model(branch, value)? {
                Value::Object(fields) if matches!(branch.kind, TypeKind::Pair(..)) => obj.extend(fields),
                other => {
                    obj.insert(branch.name(), other);
                }
            }
            Value::Object(obj)
        }
        (TypeKind::Option(_), SettledValue::Option(None)) => Value::Null,
        (TypeKind::Option(inner), SettledValue::Option(Some(value))) => current_model(inner, value)?,
        (TypeKind::List(elem), SettledValue::List(items))
        | (TypeKind::Set(elem), SettledValue::Set(items)) => Value::Array(
            items
                .iter()
                .map(|item| current_model(elem, item))
                .collect::<EngineResult<_>>()?,
        ),
        (TypeKind::Map(key, val), SettledValue::Map(entries)) => entries_model(key, val, entries)?,
        (TypeKind::BigMap(key, val), SettledValue::BigMap(big_map)) => match &big_map.entries {
            Some(entries) => entries_model(key, val, entries)?,
            None => Value::Array(Vec::new()),
        },
        (TypeKind::Contract(_), SettledValue::Contract(address)) => Value::String(address.clone()),
        (TypeKind::Ticket(_), SettledValue::Ticket { .. }) => Value::Null,
        (_, SettledValue::Opaque(node)) => Value::String(format_inline(node)),
        _ => return Err(shape_error(schema, settled)),
    };
    Ok(value)
}

fn entries_model(
    key: &TypeNode,
    val: &TypeNode,
    entries: &[(SettledNode, SettledNode)],
) -> EngineResult<Value> {
    entries
        .iter()
        .map(|(k, v)| -> EngineResult<Value> {
            Ok(json!({ "key": current_model(key, k)?, "value": current_model(val, v)? }))
        })
        .collect::<EngineResult<Vec<_>>>()
        .map(Value::Array)
}

/// Integers that fit in 64 bits are JSON numbers, larger ones strings.
fn int_model(value: &BigInt) -> Value {
    match value.to_i64() {
        Some(small) => json!(small),
        None => Value::String(value.to_string()),
    }
}

fn scalar_model(value: &Scalar) -> Value {
    match value {
        Scalar::Unit => Value::Null,
        Scalar::Bool(b) => Value::Bool(*b),
        Scalar::Int(i) => int_model(i),
        other => Value::String(other.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::EngineError;
    use crate::micheline::parse_expr;
    use crate::michelson::build;
    use crate::settle::settle;

    fn schema(src: &str) -> TypeNode {
        build(&parse_expr(src).unwrap()).unwrap()
    }

    #[test]
    fn pair_becomes_object_with_required_fields() {
        let doc = json_schema(&schema("pair (address %to) (pair (nat %amount) (option %memo string))"));
        assert_eq!(doc["$schema"], DRAFT);
        assert_eq!(doc["type"], "object");
        assert_eq!(doc["properties"]["to"]["format"], "address");
        assert_eq!(doc["properties"]["amount"]["minimum"], 0);
        assert_eq!(doc["required"], json!(["to", "amount"]));
        assert_eq!(doc["properties"]["memo"]["oneOf"][0]["type"], "null");
    }

    #[test]
    fn or_becomes_one_of_with_schema_key() {
        let doc = json_schema(&schema("or (pair %transfer (address %to) (nat %value)) (unit %pause)"));
        let one_of = doc["oneOf"].as_array().unwrap();
        assert_eq!(one_of.len(), 2);
        assert_eq!(one_of[0]["properties"][SCHEMA_KEY]["const"], "transfer");
        assert_eq!(one_of[0]["properties"]["value"]["type"], "integer");
        assert_eq!(one_of[1]["title"], "pause");
    }

    #[test]
    fn containers_and_timestamps() {
        let doc = json_schema(&schema("pair (set %s nat) (map %m string timestamp)"));
        assert_eq!(doc["properties"]["s"]["uniqueItems"], true);
        assert_eq!(
            doc["properties"]["m"]["items"]["properties"]["value"]["format"],
            "date-time"
        );
    }

    #[test]
    fn entrypoint_schema_selects_branch() {
        let root = schema("or (nat %mint) (address %burn)");
        let doc = entrypoint_schema(&root, "burn").unwrap();
        assert_eq!(doc["format"], "address");
        assert!(matches!(
            entrypoint_schema(&root, "nope"),
            Err(EngineError::UnknownEntrypoint(_))
        ));
    }

    #[test]
    fn default_model_has_zero_values() {
        let model = default_model(&schema(
            "pair (nat %n) (pair (bool %b) (pair (list %l nat) (or %o (unit %x) (nat %y))))",
        ));
        assert_eq!(
            model,
            json!({"n": 0, "b": false, "l": [], "o": {"schemaKey": "x", "x": null}})
        );
    }

    #[test]
    fn current_model_reflects_settled_values() {
        let ty = schema("pair (nat %n) (or %o (unit %x) (pair %y (string %a) (int %b)))");
        let settled = settle(&ty, &parse_expr(r#"Pair 5 (Right (Pair "s" -2))"#).unwrap()).unwrap();
        let model = current_model(&ty, &settled).unwrap();
        assert_eq!(
            model,
            json!({"n": 5, "o": {"schemaKey": "y", "a": "s", "b": -2}})
        );
    }

    #[test]
    fn huge_ints_stay_strings() {
        let ty = schema("nat");
        let settled = settle(&ty, &parse_expr("123456789012345678901234567890").unwrap()).unwrap();
        assert_eq!(
            current_model(&ty, &settled).unwrap(),
            json!("123456789012345678901234567890")
        );
    }
}
