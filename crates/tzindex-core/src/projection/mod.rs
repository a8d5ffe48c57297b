//! Projection engine: display tree, JSON Schema and models, Michelson text
//! and execution payloads.
//!
//! Every projection flattens unlabeled nested pairs into the object of the
//! enclosing pair, and names members the same way, so a model produced from
//! the schema can be fed back into the payload builder unchanged.

pub mod json_schema;
pub mod miguel;
pub mod payload;
pub mod text;

use std::collections::HashSet;

use crate::errors::{EngineError, EngineResult};
use crate::michelson::{TypeKind, TypeNode};
use crate::settle::{SettledNode, SettledValue, Side};

pub use json_schema::{current_model, default_model, entrypoint_schema, json_schema};
pub use miguel::{miguel, miguel_ast};
pub use payload::{build_parameters, Payload};
pub use text::{settled_text, type_text, value_text};

/// Key under which `or` selections name their branch in schemas and models.
pub const SCHEMA_KEY: &str = "schemaKey";

fn flattens(node: &TypeNode) -> bool {
    matches!(node.kind, TypeKind::Pair(..)) && node.label().is_none()
}

/// Members of a pair object, in wire order.
pub(crate) fn pair_members(node: &TypeNode) -> Vec<&TypeNode> {
    let mut out = Vec::new();
    let mut stack = match &node.kind {
        TypeKind::Pair(left, right) => vec![right.as_ref(), left.as_ref()],
        _ => return vec![node],
    };
    while let Some(member) = stack.pop() {
        match &member.kind {
            TypeKind::Pair(left, right) if flattens(member) => {
                stack.push(right);
                stack.push(left);
            }
            _ => out.push(member),
        }
    }
    out
}

/// Object keys for `members`: the display name, disambiguated by ordinal on
/// collision.
pub(crate) fn member_names(members: &[&TypeNode]) -> Vec<String> {
    let mut used = HashSet::new();
    members
        .iter()
        .map(|member| {
            let name = member.name();
            if used.insert(name.clone()) {
                name
            } else {
                let unique = format!("{name}_{}", member.ordinal);
                used.insert(unique.clone());
                unique
            }
        })
        .collect()
}

/// Settled members aligned with [`pair_members`].
pub(crate) fn settled_members<'a>(
    schema: &'a TypeNode,
    settled: &'a SettledNode,
) -> EngineResult<Vec<(&'a TypeNode, &'a SettledNode)>> {
    let mut out = Vec::new();
    let mut stack = match (&schema.kind, &settled.value) {
        (TypeKind::Pair(ls, rs), SettledValue::Pair(lv, rv)) => {
            vec![(rs.as_ref(), rv.as_ref()), (ls.as_ref(), lv.as_ref())]
        }
        _ => return Ok(vec![(schema, settled)]),
    };
    while let Some((member, value)) = stack.pop() {
        if !flattens(member) {
            out.push((member, value));
            continue;
        }
        match (&member.kind, &value.value) {
            (TypeKind::Pair(ls, rs), SettledValue::Pair(lv, rv)) => {
                stack.push((&**rs, &**rv));
                stack.push((&**ls, &**lv));
            }
            _ => return Err(shape_error(member, value)),
        }
    }
    Ok(out)
}

/// Selectable leaves of an `or` tree with the sides leading to them.
/// Unlabeled nested `or` nodes are descended into.
pub(crate) fn or_branches(node: &TypeNode) -> Vec<(Vec<Side>, &TypeNode)> {
    let mut out = Vec::new();
    collect_branches(node, &mut Vec::new(), &mut out);
    out
}

fn collect_branches<'a>(node: &'a TypeNode, sides: &mut Vec<Side>, out: &mut Vec<(Vec<Side>, &'a TypeNode)>) {
    let TypeKind::Or(left, right) = &node.kind else {
        return;
    };
    for (side, child) in [(Side::Left, left), (Side::Right, right)] {
        sides.push(side);
        if matches!(child.kind, TypeKind::Or(..)) && child.label().is_none() {
            collect_branches(child, sides, out);
        } else {
            out.push((sides.clone(), child.as_ref()));
        }
        sides.pop();
    }
}

/// Follow a settled `or` value down to the selected leaf of
/// [`or_branches`].
pub(crate) fn selected_branch<'a>(
    schema: &'a TypeNode,
    settled: &'a SettledNode,
) -> EngineResult<(&'a TypeNode, &'a SettledNode)> {
    let (mut ty, mut value) = (schema, settled);
    loop {
        match (&ty.kind, &value.value) {
            (TypeKind::Or(left, right), SettledValue::Or { side, branch }) => {
                let next = match side {
                    Side::Left => left.as_ref(),
                    Side::Right => right.as_ref(),
                };
                if matches!(next.kind, TypeKind::Or(..)) && next.label().is_none() {
                    ty = next;
                    value = &**branch;
                    continue;
                }
                return Ok((next, &**branch));
            }
            _ => return Err(shape_error(ty, value)),
        }
    }
}

pub(crate) fn shape_error(schema: &TypeNode, settled: &SettledNode) -> EngineError {
    EngineError::mismatch(
        &schema.path,
        schema.prim(),
        format!("settled value bound at {}", settled.path),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::micheline::parse_expr;
    use crate::michelson::build;

    fn schema(src: &str) -> TypeNode {
        build(&parse_expr(src).unwrap()).unwrap()
    }

    #[test]
    fn flattens_unlabeled_pairs_only() {
        let root = schema("pair (nat %a) (pair (nat %b) (pair %inner (nat %c) (nat %d)))");
        let names: Vec<String> = pair_members(&root).iter().map(|m| m.name()).collect();
        assert_eq!(names, vec!["a", "b", "inner"]);
    }

    #[test]
    fn duplicate_names_get_ordinals() {
        let root = schema("pair (nat %x) (nat %x)");
        let members = pair_members(&root);
        assert_eq!(member_names(&members), vec!["x", "x_2"]);
    }

    #[test]
    fn or_branches_descend_into_unlabeled_ors() {
        let root = schema("or (or (nat %a) (nat %b)) (or %c unit unit)");
        let names: Vec<String> = or_branches(&root).iter().map(|(_, n)| n.name()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(or_branches(&root)[1].0, vec![Side::Left, Side::Right]);
    }
}
