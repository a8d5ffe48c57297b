//! Attach reconstructed big map contents to settled trees.

use num_traits::ToPrimitive;
use tracing::debug;

use crate::bigmap::lifecycle::PointerState;
use crate::bigmap::reconstruct::{PointerReconstruction, Reconstruction};
use crate::errors::{EngineError, EngineResult};
use crate::michelson::{TypeKind, TypeNode};
use crate::settle::{SettledNode, SettledValue, Settler, TypedAst};

/// Fill in the entries of every big map pointer of `ast` that the
/// reconstruction knows about. Returns the number of pointers attached.
///
/// Active keys are settled against the big map key and value schemas. A
/// retired pointer is attached as empty. Pointers missing from the
/// reconstruction stay unresolved.
pub fn enrich(ast: &mut TypedAst, reconstruction: &Reconstruction) -> EngineResult<usize> {
    let schema = ast.shared_schema();
    let settler = ast.settler().clone();
    let root = ast.settled_mut()?;
    let mut attached = 0;
    enrich_node(&schema, root, reconstruction, &settler, 0, &mut attached)?;
    debug!(attached, "big maps attached");
    Ok(attached)
}

fn enrich_node(
    schema: &TypeNode,
    node: &mut SettledNode,
    reconstruction: &Reconstruction,
    settler: &Settler,
    depth: usize,
    attached: &mut usize,
) -> EngineResult<()> {
    if depth >= settler.max_depth() {
        return Err(EngineError::DepthExceeded(settler.max_depth()));
    }
    let SettledNode { path, value } = &mut *node;
    if let SettledValue::BigMap(big_map) = value {
        let pointer = big_map
            .ptr
            .as_ref()
            .and_then(ToPrimitive::to_i64)
            .and_then(|ptr| reconstruction.pointer(ptr));
        if let Some(pointer) = pointer {
            let Some(TypeNode {
                kind: TypeKind::BigMap(key_ty, value_ty),
                ..
            }) = schema.find(path)
            else {
                return Err(EngineError::mismatch(&*path, "big_map", "schema node"));
            };
            big_map.entries = Some(settle_entries(pointer, key_ty, value_ty, settler)?);
            *attached += 1;
            return Ok(());
        }
    }
    for child in node.children_mut() {
        enrich_node(schema, child, reconstruction, settler, depth + 1, attached)?;
    }
    Ok(())
}

fn settle_entries(
    pointer: &PointerReconstruction,
    key_ty: &TypeNode,
    value_ty: &TypeNode,
    settler: &Settler,
) -> EngineResult<Vec<(SettledNode, SettledNode)>> {
    if pointer.lifecycle == PointerState::Retired {
        return Ok(Vec::new());
    }
    let mut entries = Vec::with_capacity(pointer.active_keys());
    for state in pointer.active_states() {
        let Some(value) = state.value_node()? else {
            continue;
        };
        let key = settler.settle(key_ty, &state.key_node()?)?;
        let value = settler.settle(value_ty, &value)?;
        entries.push((key, value));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::DateTime;

    use crate::bigmap::key_hash::encoded_hash;
    use crate::bigmap::reconstruct::{reconstruct, ReconstructOptions};
    use crate::micheline::{encode, parse_expr, Node};
    use crate::michelson::build;
    use crate::models::{ActionKind, BigMapAction, BigMapDiff};
    use crate::projection::miguel_ast;

    fn diff(ptr: i64, level: i64, key: &str, value: Option<i64>) -> BigMapDiff {
        let key = encode(&Node::string(key)).unwrap();
        BigMapDiff {
            ptr,
            key_hash: encoded_hash(&key),
            key,
            value: value.map(|v| encode(&Node::int(v)).unwrap()),
            contract: "KT1Token".to_string(),
            level,
            operation_index: 0,
            timestamp: DateTime::from_timestamp(level, 0).unwrap(),
        }
    }

    fn alloc(ptr: i64) -> BigMapAction {
        BigMapAction {
            kind: ActionKind::Alloc,
            ptr,
            source_ptr: None,
            contract: "KT1Token".to_string(),
            level: 1,
            operation_index: 0,
            timestamp: DateTime::from_timestamp(1, 0).unwrap(),
        }
    }

    fn storage() -> TypedAst {
        let schema = build(&parse_expr("pair (big_map %ledger string nat) (nat %total)").unwrap()).unwrap();
        TypedAst::settled_from(Arc::new(schema), &parse_expr("Pair 17 100").unwrap()).unwrap()
    }

    #[test]
    fn attaches_active_entries() {
        let diffs = vec![
            diff(17, 2, "alice", Some(60)),
            diff(17, 3, "bob", Some(40)),
            diff(17, 4, "carol", Some(1)),
            diff(17, 5, "carol", None),
        ];
        let reconstruction = reconstruct(&diffs, &[alloc(17)], &ReconstructOptions::default());
        let mut ast = storage();
        assert_eq!(enrich(&mut ast, &reconstruction).unwrap(), 1);

        let view = miguel_ast(&ast).unwrap();
        assert_eq!(view["ledger"]["resolved"], true);
        let entries = view["ledger"]["entries"].as_object().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries["alice"], "60");
        assert_eq!(entries["bob"], "40");
    }

    #[test]
    fn unknown_pointer_stays_unresolved() {
        let reconstruction = reconstruct(&[diff(3, 1, "x", Some(1))], &[], &ReconstructOptions::default());
        let mut ast = storage();
        assert_eq!(enrich(&mut ast, &reconstruction).unwrap(), 0);
        let view = miguel_ast(&ast).unwrap();
        assert_eq!(view["ledger"]["resolved"], false);
    }

    #[test]
    fn retired_pointer_is_empty() {
        let mut remove = alloc(17);
        remove.kind = ActionKind::Remove;
        remove.level = 9;
        let reconstruction = reconstruct(
            &[diff(17, 2, "alice", Some(1))],
            &[alloc(17), remove],
            &ReconstructOptions::default(),
        );
        let mut ast = storage();
        enrich(&mut ast, &reconstruction).unwrap();
        let view = miguel_ast(&ast).unwrap();
        assert_eq!(view["ledger"]["entries"].as_object().unwrap().len(), 0);
    }

    #[test]
    fn unsettled_tree_is_rejected() {
        let schema = build(&parse_expr("big_map nat nat").unwrap()).unwrap();
        let mut ast = TypedAst::new(Arc::new(schema));
        let reconstruction = Reconstruction::default();
        assert!(matches!(enrich(&mut ast, &reconstruction), Err(EngineError::NotSettled)));
    }
}
