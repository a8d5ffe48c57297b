//! Entrypoint discovery over a parameter schema.

use serde::Serialize;

use crate::errors::{EngineError, EngineResult};
use crate::michelson::path::PathStep;
use crate::michelson::types::{TypeKind, TypeNode};

pub const DEFAULT_ENTRYPOINT: &str = "default";

/// A callable branch of a parameter schema.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Entrypoint<'a> {
    pub name: String,
    #[serde(skip)]
    pub node: &'a TypeNode,
    /// `or` sides taken from the root to reach this branch.
    #[serde(skip)]
    pub branch: Vec<PathStep>,
}

/// List entrypoints in left-to-right order.
///
/// A root that is not an `or` is a single entrypoint named after its field
/// annotation, or `default`. Otherwise every annotated branch is an
/// entrypoint, unannotated `or` nodes are descended into, and any other
/// unannotated branch is named `entrypoint_N` where N is its position.
pub fn entrypoints(root: &TypeNode) -> Vec<Entrypoint<'_>> {
    if !matches!(root.kind, TypeKind::Or(..)) {
        let name = root.annots.field().unwrap_or(DEFAULT_ENTRYPOINT).to_string();
        return vec![Entrypoint {
            name,
            node: root,
            branch: Vec::new(),
        }];
    }
    let mut out = Vec::new();
    collect(root, &mut Vec::new(), &mut out);
    out
}

fn collect<'a>(node: &'a TypeNode, branch: &mut Vec<PathStep>, out: &mut Vec<Entrypoint<'a>>) {
    let TypeKind::Or(left, right) = &node.kind else {
        return;
    };
    for (side, child) in [(PathStep::Left, left), (PathStep::Right, right)] {
        branch.push(side);
        if let Some(field) = child.annots.field() {
            out.push(Entrypoint {
                name: field.to_string(),
                node: child,
                branch: branch.clone(),
            });
        } else if matches!(child.kind, TypeKind::Or(..)) {
            collect(child, branch, out);
        } else {
            out.push(Entrypoint {
                name: format!("entrypoint_{}", out.len()),
                node: child,
                branch: branch.clone(),
            });
        }
        branch.pop();
    }
}

/// Resolve an entrypoint by name. `default` falls back to the whole
/// parameter when no branch is explicitly named so. A root that is not an
/// `or` has a single entrypoint, which answers to any name.
pub fn find_entrypoint<'a>(root: &'a TypeNode, name: &str) -> EngineResult<Entrypoint<'a>> {
    if !matches!(root.kind, TypeKind::Or(..)) {
        return Ok(Entrypoint {
            name: name.to_string(),
            node: root,
            branch: Vec::new(),
        });
    }
    if let Some(found) = entrypoints(root).into_iter().find(|e| e.name == name) {
        return Ok(found);
    }
    if name == DEFAULT_ENTRYPOINT {
        return Ok(Entrypoint {
            name: name.to_string(),
            node: root,
            branch: Vec::new(),
        });
    }
    Err(EngineError::UnknownEntrypoint(name.to_string()))
}

pub fn entrypoint_names(root: &TypeNode) -> Vec<String> {
    entrypoints(root).into_iter().map(|e| e.name).collect()
}
