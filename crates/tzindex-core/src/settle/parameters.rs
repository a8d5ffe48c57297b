//! Operation parameters: an entrypoint name and its argument value.

use serde::Deserialize;
use serde_json::Value;

use crate::errors::{EngineError, EngineResult};
use crate::micheline::{from_json, Node};
use crate::michelson::{entrypoints, find_entrypoint, PathStep, TypeNode, TypePath};
use crate::settle::settler::Settler;
use crate::settle::value::{SettledNode, SettledValue, Side};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Parameters {
    pub entrypoint: String,
    pub value: Node,
}

#[derive(Deserialize)]
struct RawParameters {
    #[serde(default)]
    entrypoint: Option<String>,
    value: Value,
}

/// Parameters settled against the entrypoint they reached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettledParameters {
    pub entrypoint: String,
    /// Path of the entrypoint's sub-schema in the parameter schema.
    pub path: TypePath,
    pub settled: SettledNode,
}

impl SettledParameters {
    pub fn schema<'a>(&self, root: &'a TypeNode) -> Option<&'a TypeNode> {
        root.find(&self.path)
    }
}

impl Parameters {
    pub fn new(entrypoint: impl Into<String>, value: Node) -> Self {
        Self {
            entrypoint: entrypoint.into(),
            value,
        }
    }

    /// Parse the `{"entrypoint": ..., "value": ...}` object found in
    /// operation receipts. A bare Micheline value is a `default` call.
    pub fn from_json(raw: &Value) -> EngineResult<Self> {
        if raw.get("value").is_some() {
            let parsed: RawParameters = serde_json::from_value(raw.clone())?;
            return Ok(Self {
                entrypoint: parsed.entrypoint.unwrap_or_else(|| "default".to_string()),
                value: from_json(&parsed.value)?,
            });
        }
        Ok(Self::new("default", from_json(raw)?))
    }

    /// Settle against the parameter schema `root`.
    ///
    /// A `default` call carries the whole `or` tree; its `Left`/`Right`
    /// chain is followed down to the entrypoint it selects.
    pub fn settle(&self, root: &TypeNode, settler: &Settler) -> EngineResult<SettledParameters> {
        if self.entrypoint != "default" || entrypoints(root).iter().any(|e| e.name == "default") {
            let ep = find_entrypoint(root, &self.entrypoint)?;
            let settled = settler.settle(ep.node, &self.value)?;
            return Ok(SettledParameters {
                entrypoint: ep.name,
                path: ep.node.path.clone(),
                settled,
            });
        }

        let whole = settler.settle(root, &self.value)?;
        let known = entrypoints(root);
        let mut branch: Vec<PathStep> = Vec::new();
        let mut current = &whole;
        loop {
            if let Some(ep) = known.iter().find(|e| !branch.is_empty() && e.branch == branch) {
                return Ok(SettledParameters {
                    entrypoint: ep.name.clone(),
                    path: ep.node.path.clone(),
                    settled: current.clone(),
                });
            }
            match &current.value {
                SettledValue::Or { side, branch: next } => {
                    branch.push(side.step());
                    current = &**next;
                }
                _ => break,
            }
        }
        Ok(SettledParameters {
            entrypoint: "default".to_string(),
            path: root.path.clone(),
            settled: whole,
        })
    }

    /// Wrap the value in the `Left`/`Right` chain that selects its
    /// entrypoint, so it can be submitted to `default`.
    pub fn wrapped(&self, root: &TypeNode) -> EngineResult<Node> {
        let ep = find_entrypoint(root, &self.entrypoint)?;
        let mut node = self.value.clone();
        for step in ep.branch.iter().rev() {
            let side = match step {
                PathStep::Left => Side::Left,
                PathStep::Right => Side::Right,
                other => {
                    return Err(EngineError::malformed(format!(
                        "entrypoint branch contains non-or step {}",
                        other.code()
                    )))
                }
            };
            node = Node::prim_with(side.prim(), vec![node]);
        }
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::micheline::parse_expr;
    use crate::michelson::build;
    use crate::settle::value::Scalar;
    use serde_json::json;

    fn root() -> TypeNode {
        build(&parse_expr("or (or (nat %mint) (pair %transfer address nat)) (unit %pause)").unwrap())
            .unwrap()
    }

    #[test]
    fn named_entrypoint_settles_sub_schema() {
        let params = Parameters::new("mint", parse_expr("7").unwrap());
        let settled = params.settle(&root(), &Settler::default()).unwrap();
        assert_eq!(settled.entrypoint, "mint");
        assert_eq!(settled.path.to_string(), "$/0/0");
        assert_eq!(settled.settled.scalar(), Some(&Scalar::Int(7.into())));
    }

    #[test]
    fn default_call_is_unwrapped() {
        let params = Parameters::new("default", parse_expr("Left (Right (Pair \"tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZSx\" 3))").unwrap());
        let root = root();
        let settled = params.settle(&root, &Settler::default()).unwrap();
        assert_eq!(settled.entrypoint, "transfer");
        assert_eq!(settled.schema(&root).unwrap().name(), "transfer");
        assert!(matches!(settled.settled.value, SettledValue::Pair(..)));
    }

    #[test]
    fn wrapped_rebuilds_default_call() {
        let value = parse_expr("Pair \"tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZSx\" 3").unwrap();
        let wrapped = Parameters::new("transfer", value).wrapped(&root()).unwrap();
        assert_eq!(
            wrapped,
            parse_expr("Left (Right (Pair \"tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZSx\" 3))").unwrap()
        );
    }

    #[test]
    fn unknown_entrypoint_is_an_error() {
        let params = Parameters::new("burn", parse_expr("1").unwrap());
        assert!(matches!(
            params.settle(&root(), &Settler::default()),
            Err(EngineError::UnknownEntrypoint(_))
        ));
    }

    #[test]
    fn parses_receipt_json() {
        let params = Parameters::from_json(&json!({
            "entrypoint": "pause",
            "value": {"prim": "Unit"}
        }))
        .unwrap();
        assert_eq!(params, Parameters::new("pause", Node::prim("Unit")));
        let bare = Parameters::from_json(&json!({"int": "5"})).unwrap();
        assert_eq!(bare.entrypoint, "default");
    }
}
