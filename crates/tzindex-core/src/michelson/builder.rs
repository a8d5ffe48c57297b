//! Build a typed schema skeleton from an untyped type expression.
//!
//! n-ary `pair` is normalized to a right comb, arities are checked per
//! constructor and every node receives its structural path and pre-order
//! ordinal.

use num_bigint::BigInt;
use tracing::debug;

use crate::config::EngineConfig;
use crate::errors::{EngineError, EngineResult};
use crate::micheline::Node;
use crate::michelson::path::{PathStep, TypePath};
use crate::michelson::types::{Annotations, SaplingKind, ScalarType, TypeKind, TypeNode};
use crate::query::guards::{clamp_depth, DEFAULT_MAX_DEPTH};

#[derive(Clone, Debug)]
pub struct SchemaBuilder {
    max_depth: usize,
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl SchemaBuilder {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            max_depth: clamp_depth(config.max_depth),
        }
    }

    pub fn build(&self, expr: &Node) -> EngineResult<TypeNode> {
        let expr = unwrap_section(expr);
        let mut state = BuildState {
            next_ordinal: 0,
            max_depth: self.max_depth,
        };
        let mut root = state.build_node(expr, TypePath::root(), 0)?;
        root.is_root = true;
        debug!(root = root.prim(), nodes = state.next_ordinal, "schema built");
        Ok(root)
    }
}

/// Build with default limits.
pub fn build(expr: &Node) -> EngineResult<TypeNode> {
    SchemaBuilder::default().build(expr)
}

/// Locate a `parameter`, `storage` or `code` section in a script's code
/// sequence.
pub fn script_section<'a>(code: &'a Node, section: &str) -> EngineResult<&'a Node> {
    let items = match code {
        Node::Seq(items) => items,
        other => {
            return Err(EngineError::malformed(format!(
                "script code must be a sequence, found {}",
                other.kind_name()
            )))
        }
    };
    items
        .iter()
        .find(|item| item.is_prim(section))
        .and_then(|item| item.args().first())
        .ok_or_else(|| EngineError::malformed(format!("script has no {section} section")))
}

fn unwrap_section(expr: &Node) -> &Node {
    match expr {
        Node::Prim { prim, args, .. }
            if (prim == "parameter" || prim == "storage") && args.len() == 1 =>
        {
            &args[0]
        }
        _ => expr,
    }
}

struct BuildState {
    next_ordinal: usize,
    max_depth: usize,
}

impl BuildState {
    fn build_node(&mut self, expr: &Node, path: TypePath, depth: usize) -> EngineResult<TypeNode> {
        if depth >= self.max_depth {
            return Err(EngineError::DepthExceeded(self.max_depth));
        }
        let (prim, args, annots) = match expr {
            Node::Prim { prim, args, annots } => (prim.as_str(), args.as_slice(), annots),
            other => return Err(EngineError::UnknownTypeConstructor(other.kind_name())),
        };

        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;

        let kind = if let Some(scalar) = ScalarType::from_prim(prim) {
            expect_arity(prim, args, 0)?;
            TypeKind::Scalar(scalar)
        } else if let Some(kind) = SaplingKind::from_prim(prim) {
            expect_arity(prim, args, 1)?;
            let memo_size = match &args[0] {
                Node::Int(value) => value.clone(),
                other => {
                    return Err(EngineError::malformed(format!(
                        "{prim} memo size must be an int literal, found {}",
                        other.kind_name()
                    )))
                }
            };
            TypeKind::Sapling { kind, memo_size }
        } else {
            match prim {
                "pair" => {
                    if args.len() < 2 {
                        return Err(EngineError::InvalidArity {
                            prim: prim.to_string(),
                            expected: "at least 2".to_string(),
                            found: args.len(),
                        });
                    }
                    let left = self.build_node(&args[0], path.child(PathStep::Left), depth + 1)?;
                    let right = if args.len() == 2 {
                        self.build_node(&args[1], path.child(PathStep::Right), depth + 1)?
                    } else {
                        self.build_comb(&args[1..], path.child(PathStep::Right), depth + 1)?
                    };
                    TypeKind::Pair(Box::new(left), Box::new(right))
                }
                "or" => {
                    expect_arity(prim, args, 2)?;
                    let mut left = self.build_node(&args[0], path.child(PathStep::Left), depth + 1)?;
                    let mut right =
                        self.build_node(&args[1], path.child(PathStep::Right), depth + 1)?;
                    left.is_entrypoint = left.annots.field().is_some();
                    right.is_entrypoint = right.annots.field().is_some();
                    TypeKind::Or(Box::new(left), Box::new(right))
                }
                "option" => TypeKind::Option(self.single(prim, args, &path, PathStep::Inner, depth)?),
                "list" => TypeKind::List(self.single(prim, args, &path, PathStep::Element, depth)?),
                "set" => TypeKind::Set(self.single(prim, args, &path, PathStep::Element, depth)?),
                "contract" => {
                    TypeKind::Contract(self.single(prim, args, &path, PathStep::Inner, depth)?)
                }
                "ticket" => TypeKind::Ticket(self.single(prim, args, &path, PathStep::Inner, depth)?),
                "map" => {
                    let (k, v) = self.double(prim, args, &path, (PathStep::Key, PathStep::Value), depth)?;
                    TypeKind::Map(k, v)
                }
                "big_map" => {
                    let (k, v) = self.double(prim, args, &path, (PathStep::Key, PathStep::Value), depth)?;
                    TypeKind::BigMap(k, v)
                }
                "lambda" => {
                    let (p, r) =
                        self.double(prim, args, &path, (PathStep::Parameter, PathStep::Return), depth)?;
                    TypeKind::Lambda(p, r)
                }
                other => return Err(EngineError::UnknownTypeConstructor(other.to_string())),
            }
        };

        Ok(TypeNode {
            kind,
            path,
            annots: Annotations::new(annots.clone()),
            ordinal,
            is_root: false,
            is_entrypoint: false,
        })
    }

    /// Right comb for the tail of an n-ary pair. The synthesized pairs carry
    /// no annotations.
    fn build_comb(&mut self, items: &[Node], path: TypePath, depth: usize) -> EngineResult<TypeNode> {
        if items.len() == 1 {
            return self.build_node(&items[0], path, depth);
        }
        if depth >= self.max_depth {
            return Err(EngineError::DepthExceeded(self.max_depth));
        }
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        let left = self.build_node(&items[0], path.child(PathStep::Left), depth + 1)?;
        let right = self.build_comb(&items[1..], path.child(PathStep::Right), depth + 1)?;
        Ok(TypeNode {
            kind: TypeKind::Pair(Box::new(left), Box::new(right)),
            path,
            annots: Annotations::default(),
            ordinal,
            is_root: false,
            is_entrypoint: false,
        })
    }

    fn single(
        &mut self,
        prim: &str,
        args: &[Node],
        path: &TypePath,
        step: PathStep,
        depth: usize,
    ) -> EngineResult<Box<TypeNode>> {
        expect_arity(prim, args, 1)?;
        Ok(Box::new(self.build_node(&args[0], path.child(step), depth + 1)?))
    }

    fn double(
        &mut self,
        prim: &str,
        args: &[Node],
        path: &TypePath,
        steps: (PathStep, PathStep),
        depth: usize,
    ) -> EngineResult<(Box<TypeNode>, Box<TypeNode>)> {
        expect_arity(prim, args, 2)?;
        let first = self.build_node(&args[0], path.child(steps.0), depth + 1)?;
        let second = self.build_node(&args[1], path.child(steps.1), depth + 1)?;
        Ok((Box::new(first), Box::new(second)))
    }
}

fn expect_arity(prim: &str, args: &[Node], expected: usize) -> EngineResult<()> {
    if args.len() != expected {
        return Err(EngineError::InvalidArity {
            prim: prim.to_string(),
            expected: expected.to_string(),
            found: args.len(),
        });
    }
    Ok(())
}

/// Memo size of a sapling type, exposed for schema projections.
pub fn sapling_memo_size(node: &TypeNode) -> Option<&BigInt> {
    match &node.kind {
        TypeKind::Sapling { memo_size, .. } => Some(memo_size),
        _ => None,
    }
}
