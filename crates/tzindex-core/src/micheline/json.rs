//! Micheline JSON codec, the shape node RPCs serve scripts and storage in.

use num_bigint::BigInt;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};

use crate::errors::{EngineError, EngineResult};
use crate::micheline::node::Node;
use crate::micheline::primitives::is_known;
use crate::query::guards::DEFAULT_MAX_DEPTH;

pub fn to_json(node: &Node) -> Value {
    match node {
        Node::Int(value) => json!({ "int": value.to_string() }),
        Node::String(value) => json!({ "string": value }),
        Node::Bytes(value) => json!({ "bytes": hex::encode(value) }),
        Node::Seq(items) => Value::Array(items.iter().map(to_json).collect()),
        Node::Prim { prim, args, annots } => {
            let mut obj = Map::new();
            obj.insert("prim".to_string(), Value::String(prim.clone()));
            if !args.is_empty() {
                obj.insert(
                    "args".to_string(),
                    Value::Array(args.iter().map(to_json).collect()),
                );
            }
            if !annots.is_empty() {
                obj.insert(
                    "annots".to_string(),
                    Value::Array(annots.iter().cloned().map(Value::String).collect()),
                );
            }
            Value::Object(obj)
        }
    }
}

pub fn to_json_bytes(node: &Node) -> EngineResult<Vec<u8>> {
    Ok(serde_json::to_vec(&to_json(node))?)
}

pub fn from_json(value: &Value) -> EngineResult<Node> {
    from_json_at(value, 0, DEFAULT_MAX_DEPTH)
}

pub fn from_json_bytes(bytes: &[u8]) -> EngineResult<Node> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| EngineError::malformed(format!("invalid micheline json: {e}")))?;
    from_json(&value)
}

fn from_json_at(value: &Value, depth: usize, max_depth: usize) -> EngineResult<Node> {
    if depth >= max_depth {
        return Err(EngineError::DepthExceeded(max_depth));
    }
    match value {
        Value::Array(items) => Ok(Node::Seq(
            items
                .iter()
                .map(|item| from_json_at(item, depth + 1, max_depth))
                .collect::<EngineResult<_>>()?,
        )),
        Value::Object(obj) => {
            if let Some(raw) = obj.get("int") {
                let text = raw
                    .as_str()
                    .ok_or_else(|| EngineError::malformed("int literal must be a string"))?;
                let parsed: BigInt = text
                    .parse()
                    .map_err(|_| EngineError::malformed(format!("invalid int literal {text:?}")))?;
                return Ok(Node::Int(parsed));
            }
            if let Some(raw) = obj.get("string") {
                let text = raw
                    .as_str()
                    .ok_or_else(|| EngineError::malformed("string literal must be a string"))?;
                return Ok(Node::String(text.to_string()));
            }
            if let Some(raw) = obj.get("bytes") {
                let text = raw
                    .as_str()
                    .ok_or_else(|| EngineError::malformed("bytes literal must be a string"))?;
                let decoded = hex::decode(text)
                    .map_err(|e| EngineError::malformed(format!("invalid bytes literal: {e}")))?;
                return Ok(Node::Bytes(decoded));
            }
            let prim = obj
                .get("prim")
                .and_then(Value::as_str)
                .ok_or_else(|| EngineError::malformed("object without prim, int, string or bytes"))?;
            if !is_known(prim) {
                return Err(EngineError::malformed(format!("unknown primitive {prim}")));
            }
            let args = match obj.get("args") {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(items)) => items
                    .iter()
                    .map(|item| from_json_at(item, depth + 1, max_depth))
                    .collect::<EngineResult<_>>()?,
                Some(_) => return Err(EngineError::malformed("prim args must be an array")),
            };
            let annots = match obj.get("annots") {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(items)) => items
                    .iter()
                    .map(|item| {
                        item.as_str()
                            .map(str::to_string)
                            .ok_or_else(|| EngineError::malformed("annotation must be a string"))
                    })
                    .collect::<EngineResult<_>>()?,
                Some(_) => return Err(EngineError::malformed("prim annots must be an array")),
            };
            Ok(Node::Prim {
                prim: prim.to_string(),
                args,
                annots,
            })
        }
        other => Err(EngineError::malformed(format!(
            "unexpected json value {other} in micheline expression"
        ))),
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        to_json(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        from_json(&value).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rpc_storage() {
        let raw = br#"{"prim":"Pair","args":[{"int":"42"},[{"prim":"Elt","args":[{"string":"a"},{"bytes":"00ff"}]}]]}"#;
        let node = from_json_bytes(raw).unwrap();
        assert_eq!(
            node,
            Node::pair(
                Node::int(42),
                Node::Seq(vec![Node::prim_with(
                    "Elt",
                    vec![Node::string("a"), Node::Bytes(vec![0x00, 0xff])]
                )])
            )
        );
    }

    #[test]
    fn json_round_trip_keeps_annotations() {
        let node = Node::prim_annotated(
            "or",
            vec![
                Node::prim_annotated("nat", vec![], &["%mint"]),
                Node::prim_annotated("unit", vec![], &["%burn"]),
            ],
            &[":action"],
        );
        let value = to_json(&node);
        assert_eq!(value["annots"][0], ":action");
        assert_eq!(from_json(&value).unwrap(), node);
    }

    #[test]
    fn omits_empty_args_and_annots() {
        let value = to_json(&Node::prim("Unit"));
        assert_eq!(value, json!({"prim": "Unit"}));
    }

    #[test]
    fn rejects_malformed_json() {
        for raw in [
            r#"{"int": 5}"#,
            r#"{"prim": "NotAPrim"}"#,
            r#"{"bytes": "zz"}"#,
            r#"{"foo": 1}"#,
            r#"true"#,
        ] {
            let err = from_json_bytes(raw.as_bytes()).unwrap_err();
            assert!(matches!(err, EngineError::MalformedInput(_)), "{raw}");
        }
    }

    #[test]
    fn serde_impls_use_micheline_json() {
        let node: Node = serde_json::from_str(r#"{"prim":"Some","args":[{"int":"-3"}]}"#).unwrap();
        assert_eq!(node, Node::prim_with("Some", vec![Node::int(-3)]));
        let text = serde_json::to_string(&node).unwrap();
        assert_eq!(text, r#"{"prim":"Some","args":[{"int":"-3"}]}"#);
    }
}
