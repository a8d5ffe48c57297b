//! Contract-level views: storage display and schema, entrypoint docs and
//! schemas, default models and execution payloads.
//!
//! Schemas come from a shared [`SchemaCache`] keyed by protocol version and
//! script section.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::bigmap::{enrich, Reconstruction};
use crate::config::EngineConfig;
use crate::errors::{EngineError, EngineResult};
use crate::micheline::Node;
use crate::michelson::{entrypoints, find_entrypoint, script_section, SchemaCache, TypeNode};
use crate::projection::{
    build_parameters, current_model, default_model, json_schema, miguel_ast, type_text, Payload,
};
use crate::settle::{Parameters, Settler, TypedAst};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StorageSchema {
    pub schema: Value,
    /// Present when a current storage value was supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EntrypointDoc {
    pub name: String,
    /// Michelson type of the argument.
    pub parameters: String,
    pub schema: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EntrypointSchema {
    pub entrypoint: String,
    pub schema: Value,
    pub default_model: Value,
}

pub struct ContractQuery {
    cache: Arc<SchemaCache>,
    config: EngineConfig,
}

impl ContractQuery {
    pub fn new(cache: Arc<SchemaCache>, config: EngineConfig) -> Self {
        Self {
            cache,
            config: config.clamped(),
        }
    }

    /// Schema of a `parameter` or `storage` section of `code`.
    pub fn section_schema(&self, version: &str, code: &Node, section: &str) -> EngineResult<Arc<TypeNode>> {
        self.cache.get_or_build(version, script_section(code, section)?)
    }

    /// Display projection of `storage`. When `big_maps` is given, every
    /// pointer it knows is filled in with its active entries.
    pub fn storage_view(
        &self,
        version: &str,
        code: &Node,
        storage: &Node,
        big_maps: Option<&Reconstruction>,
    ) -> EngineResult<Value> {
        let schema = self.section_schema(version, code, "storage")?;
        let mut ast = TypedAst::with_config(schema, &self.config);
        ast.settle(storage)?;
        if let Some(reconstruction) = big_maps {
            enrich(&mut ast, reconstruction)?;
        }
        miguel_ast(&ast)
    }

    /// JSON Schema of the storage, with the current value as its model when
    /// `current` is given.
    pub fn storage_schema(
        &self,
        version: &str,
        code: &Node,
        current: Option<&Node>,
    ) -> EngineResult<StorageSchema> {
        let schema = self.section_schema(version, code, "storage")?;
        let default_model = match current {
            Some(value) => {
                let settled = Settler::new(&self.config).settle(&schema, value)?;
                Some(current_model(&schema, &settled)?)
            }
            None => None,
        };
        Ok(StorageSchema {
            schema: json_schema(&schema),
            default_model,
        })
    }

    pub fn entrypoint_docs(&self, version: &str, code: &Node) -> EngineResult<Vec<EntrypointDoc>> {
        let root = self.section_schema(version, code, "parameter")?;
        Ok(entrypoints(&root)
            .into_iter()
            .map(|ep| EntrypointDoc {
                parameters: type_text(ep.node, self.config.line_size),
                schema: json_schema(ep.node),
                name: ep.name,
            })
            .collect())
    }

    /// Schema of one entrypoint. The model is prefilled from `latest` when
    /// that call reached the same entrypoint, and zero-valued otherwise.
    pub fn entrypoint_schema(
        &self,
        version: &str,
        code: &Node,
        entrypoint: &str,
        latest: Option<&Parameters>,
    ) -> EngineResult<EntrypointSchema> {
        let root = self.section_schema(version, code, "parameter")?;
        let ep = find_entrypoint(&root, entrypoint)?;
        let settler = Settler::new(&self.config);
        let from_latest = match latest {
            Some(call) => {
                let settled = call.settle(&root, &settler)?;
                if settled.entrypoint == ep.name {
                    Some(current_model(ep.node, &settled.settled)?)
                } else {
                    None
                }
            }
            None => None,
        };
        Ok(EntrypointSchema {
            schema: json_schema(ep.node),
            default_model: from_latest.unwrap_or_else(|| default_model(ep.node)),
            entrypoint: ep.name,
        })
    }

    /// Build a payload from a JSON object of member values.
    pub fn build_payload(
        &self,
        version: &str,
        code: &Node,
        entrypoint: &str,
        input: &Value,
    ) -> EngineResult<Payload> {
        let root = self.section_schema(version, code, "parameter")?;
        let fields: &Map<String, Value> = input
            .as_object()
            .ok_or_else(|| EngineError::invalid_field(entrypoint, "payload input must be an object"))?;
        build_parameters(&root, entrypoint, fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use serde_json::json;

    use crate::bigmap::{encoded_hash, reconstruct, ReconstructOptions};
    use crate::micheline::{encode, parse_expr};
    use crate::models::BigMapDiff;

    const CODE: &str = r#"{
        parameter (or (pair %transfer (address %from) (pair (address %to) (nat %value)))
                      (or (address %mint) (unit %pause)));
        storage (pair (big_map %ledger address nat) (pair (bool %paused) (nat %supply)));
        code { FAILWITH }
    }"#;

    const ALICE: &str = "tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZSx";
    const BOB: &str = "KT1BEqzn5Wx8uJrZNvuS9DVHmLvG9td3fDLi";

    fn query() -> ContractQuery {
        let config = EngineConfig::default();
        ContractQuery::new(Arc::new(SchemaCache::new(&config)), config)
    }

    fn code() -> Node {
        parse_expr(CODE).unwrap()
    }

    #[test]
    fn storage_view_attaches_big_map_entries() {
        let q = query();
        let storage = parse_expr("Pair 12 (Pair False 1000)").unwrap();

        let plain = q.storage_view("v1", &code(), &storage, None).unwrap();
        assert_eq!(plain["ledger"]["ptr"], "12");
        assert_eq!(plain["paused"], false);
        assert_eq!(plain["supply"], "1000");

        let key = encode(&Node::string(ALICE)).unwrap();
        let diffs = vec![BigMapDiff {
            ptr: 12,
            key_hash: encoded_hash(&key),
            key,
            value: Some(encode(&Node::int(1000)).unwrap()),
            contract: BOB.to_string(),
            level: 5,
            operation_index: 0,
            timestamp: DateTime::from_timestamp(5, 0).unwrap(),
        }];
        let reconstruction = reconstruct(&diffs, &[], &ReconstructOptions::default());
        let view = q.storage_view("v1", &code(), &storage, Some(&reconstruction)).unwrap();
        assert_eq!(view["ledger"]["entries"][ALICE], "1000");
    }

    #[test]
    fn storage_schema_with_current_model() {
        let q = query();
        let storage = parse_expr("Pair 12 (Pair True 7)").unwrap();
        let out = q.storage_schema("v1", &code(), Some(&storage)).unwrap();
        assert_eq!(out.schema["type"], "object");
        let model = out.default_model.unwrap();
        assert_eq!(model["paused"], true);
        assert_eq!(model["supply"], 7);
        assert!(q.storage_schema("v1", &code(), None).unwrap().default_model.is_none());
    }

    #[test]
    fn lists_entrypoint_docs() {
        let docs = query().entrypoint_docs("v1", &code()).unwrap();
        let names: Vec<&str> = docs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["transfer", "mint", "pause"]);
        assert_eq!(docs[1].parameters, "address %mint");
    }

    #[test]
    fn entrypoint_model_comes_from_latest_matching_call() {
        let q = query();
        let call = Parameters::new(
            "transfer",
            parse_expr(&format!(r#"Pair "{ALICE}" (Pair "{BOB}" 5)"#)).unwrap(),
        );
        let out = q.entrypoint_schema("v1", &code(), "transfer", Some(&call)).unwrap();
        assert_eq!(out.default_model["from"], ALICE);
        assert_eq!(out.default_model["value"], 5);

        let other = Parameters::new("mint", Node::string(ALICE));
        let zero = q.entrypoint_schema("v1", &code(), "transfer", Some(&other)).unwrap();
        assert_eq!(zero.default_model["value"], 0);
    }

    #[test]
    fn builds_payload_and_rejects_unknown_entrypoint() {
        let q = query();
        let input = json!({"from": ALICE, "to": BOB, "value": "5"});
        let payload = q.build_payload("v1", &code(), "transfer", &input).unwrap();
        let expected = parse_expr(&format!(r#"Pair "{ALICE}" (Pair "{BOB}" 5)"#)).unwrap();
        assert_eq!(payload.to_bytes().unwrap(), encode(&expected).unwrap());

        assert!(matches!(
            q.build_payload("v1", &code(), "burn", &input),
            Err(EngineError::UnknownEntrypoint(_))
        ));
        assert!(matches!(
            q.build_payload("v1", &code(), "transfer", &json!([1])),
            Err(EngineError::InvalidFieldValue { .. })
        ));
    }

    #[test]
    fn schemas_are_cached_per_version() {
        let config = EngineConfig::default();
        let cache = Arc::new(SchemaCache::new(&config));
        let q = ContractQuery::new(Arc::clone(&cache), config);
        q.entrypoint_docs("v1", &code()).unwrap();
        q.entrypoint_docs("v1", &code()).unwrap();
        q.entrypoint_docs("v2", &code()).unwrap();
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
    }
}
