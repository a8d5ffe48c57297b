//! Structural binding of untyped values to a schema.
//!
//! Schema and value are walked together in wire order. Every mismatch is
//! reported with the structural path of the schema node where it occurred.

use std::borrow::Cow;

use num_bigint::{BigInt, Sign};

use crate::config::EngineConfig;
use crate::errors::{EngineError, EngineResult};
use crate::micheline::Node;
use crate::michelson::{SaplingKind, ScalarType, TypeKind, TypeNode};
use crate::query::guards::{clamp_depth, DEFAULT_MAX_DEPTH};
use crate::settle::forge::{
    parse_timestamp, unforge_address, unforge_chain_id, unforge_key_hash, unforge_l2_address,
    unforge_public_key, unforge_signature,
};
use crate::settle::value::{BigMapValue, Scalar, SettledNode, SettledValue, Side};

#[derive(Clone, Debug)]
pub struct Settler {
    max_depth: usize,
}

impl Default for Settler {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Settle with default limits.
pub fn settle(schema: &TypeNode, value: &Node) -> EngineResult<SettledNode> {
    Settler::default().settle(schema, value)
}

impl Settler {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            max_depth: clamp_depth(config.max_depth),
        }
    }

    pub fn settle(&self, schema: &TypeNode, value: &Node) -> EngineResult<SettledNode> {
        self.settle_at(schema, value, 0)
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    fn settle_at(&self, schema: &TypeNode, value: &Node, depth: usize) -> EngineResult<SettledNode> {
        if depth >= self.max_depth {
            return Err(EngineError::DepthExceeded(self.max_depth));
        }
        let settled = match &schema.kind {
            TypeKind::Scalar(ty) => SettledValue::Scalar {
                ty: *ty,
                value: settle_scalar(schema, *ty, value)?,
            },
            TypeKind::Pair(..) => match value {
                Node::Prim { prim, args, .. } if prim == "Pair" && args.len() >= 2 => {
                    return self.settle_comb(schema, args, depth);
                }
                Node::Seq(items) if items.len() >= 2 => {
                    return self.settle_comb(schema, items, depth);
                }
                other => return Err(mismatch(schema, "Pair", other)),
            },
            TypeKind::Or(left, right) => match value {
                Node::Prim { prim, args, .. } if args.len() == 1 && (prim == "Left" || prim == "Right") => {
                    let (side, branch) = if prim == "Left" {
                        (Side::Left, left)
                    } else {
                        (Side::Right, right)
                    };
                    SettledValue::Or {
                        side,
                        branch: Box::new(self.settle_at(branch, &args[0], depth + 1)?),
                    }
                }
                other => return Err(mismatch(schema, "Left or Right", other)),
            },
            TypeKind::Option(inner) => match value {
                Node::Prim { prim, args, .. } if prim == "None" && args.is_empty() => {
                    SettledValue::Option(None)
                }
                Node::Prim { prim, args, .. } if prim == "Some" && args.len() == 1 => {
                    SettledValue::Option(Some(Box::new(self.settle_at(inner, &args[0], depth + 1)?)))
                }
                other => return Err(mismatch(schema, "Some or None", other)),
            },
            TypeKind::List(elem) => SettledValue::List(self.settle_items(schema, elem, value, depth)?),
            TypeKind::Set(elem) => SettledValue::Set(self.settle_items(schema, elem, value, depth)?),
            TypeKind::Map(key, val) => SettledValue::Map(self.settle_elts(schema, key, val, value, depth)?),
            TypeKind::BigMap(key, val) => match value {
                Node::Int(ptr) => SettledValue::BigMap(BigMapValue {
                    ptr: Some(ptr.clone()),
                    entries: None,
                }),
                Node::Seq(_) => SettledValue::BigMap(BigMapValue {
                    ptr: None,
                    entries: Some(self.settle_elts(schema, key, val, value, depth)?),
                }),
                other => return Err(mismatch(schema, "big map pointer or literal", other)),
            },
            TypeKind::Lambda(..) => match value {
                Node::Seq(_) => SettledValue::Opaque(value.clone()),
                Node::Prim { prim, .. } if prim == "Lambda_rec" => SettledValue::Opaque(value.clone()),
                other => return Err(mismatch(schema, "code sequence", other)),
            },
            TypeKind::Contract(_) => match value {
                Node::String(address) => SettledValue::Contract(address.clone()),
                Node::Bytes(bytes) => SettledValue::Contract(
                    unforge_address(bytes).map_err(|_| mismatch(schema, "optimized address", value))?,
                ),
                other => return Err(mismatch(schema, "address", other)),
            },
            TypeKind::Ticket(inner) => self.settle_ticket(schema, inner, value, depth)?,
            TypeKind::Sapling { kind, .. } => match (kind, value) {
                (SaplingKind::State, Node::Int(_) | Node::Seq(_)) => SettledValue::Opaque(value.clone()),
                (SaplingKind::Transaction | SaplingKind::TransactionDeprecated, Node::Bytes(_)) => {
                    SettledValue::Opaque(value.clone())
                }
                (_, other) => return Err(mismatch(schema, kind.prim(), other)),
            },
        };
        Ok(SettledNode::new(schema.path.clone(), settled))
    }

    /// Pair arguments `a b c ...` against a right comb of pair schemas.
    fn settle_comb(&self, schema: &TypeNode, items: &[Node], depth: usize) -> EngineResult<SettledNode> {
        let TypeKind::Pair(left, right) = &schema.kind else {
            return Err(EngineError::mismatch(
                &schema.path,
                schema.prim(),
                format!("pair of {} values", items.len()),
            ));
        };
        if depth >= self.max_depth {
            return Err(EngineError::DepthExceeded(self.max_depth));
        }
        let first = self.settle_at(left, &items[0], depth + 1)?;
        let rest = if items.len() == 2 {
            self.settle_at(right, &items[1], depth + 1)?
        } else {
            self.settle_comb(right, &items[1..], depth + 1)?
        };
        Ok(SettledNode::new(
            schema.path.clone(),
            SettledValue::Pair(Box::new(first), Box::new(rest)),
        ))
    }

    fn settle_items(
        &self,
        schema: &TypeNode,
        elem: &TypeNode,
        value: &Node,
        depth: usize,
    ) -> EngineResult<Vec<SettledNode>> {
        let Node::Seq(items) = value else {
            return Err(mismatch(schema, "sequence", value));
        };
        items
            .iter()
            .map(|item| self.settle_at(elem, item, depth + 1))
            .collect()
    }

    fn settle_elts(
        &self,
        schema: &TypeNode,
        key: &TypeNode,
        val: &TypeNode,
        value: &Node,
        depth: usize,
    ) -> EngineResult<Vec<(SettledNode, SettledNode)>> {
        let Node::Seq(items) = value else {
            return Err(mismatch(schema, "sequence of Elt", value));
        };
        items
            .iter()
            .map(|item| match item {
                Node::Prim { prim, args, .. } if prim == "Elt" && args.len() == 2 => Ok((
                    self.settle_at(key, &args[0], depth + 1)?,
                    self.settle_at(val, &args[1], depth + 1)?,
                )),
                other => Err(mismatch(schema, "Elt", other)),
            })
            .collect()
    }

    /// `Pair ticketer (Pair value amount)`, its comb form, or
    /// `Ticket ticketer type value amount`. In the comb forms everything
    /// between the ticketer and the amount is the content, so a pair content
    /// may be written flat as `Pair ticketer a b amount`.
    fn settle_ticket(
        &self,
        schema: &TypeNode,
        inner: &TypeNode,
        value: &Node,
        depth: usize,
    ) -> EngineResult<SettledValue> {
        let (ticketer, content, amount) = match value {
            Node::Prim { prim, args, .. } if prim == "Ticket" && args.len() == 4 => {
                (&args[0], Cow::Borrowed(&args[2]), &args[3])
            }
            Node::Prim { prim, args, .. } if prim == "Pair" && args.len() >= 3 => {
                (&args[0], comb_content(&args[1..args.len() - 1]), &args[args.len() - 1])
            }
            Node::Prim { prim, args, .. } if prim == "Pair" && args.len() == 2 => match &args[1] {
                Node::Prim { prim, args: rest, .. } if prim == "Pair" && rest.len() >= 2 => {
                    (&args[0], comb_content(&rest[..rest.len() - 1]), &rest[rest.len() - 1])
                }
                other => return Err(mismatch(schema, "Pair value amount", other)),
            },
            other => return Err(mismatch(schema, "ticket", other)),
        };
        let ticketer = match ticketer {
            Node::String(s) => s.clone(),
            Node::Bytes(b) => unforge_address(b).map_err(|_| mismatch(schema, "ticketer address", ticketer))?,
            other => return Err(mismatch(schema, "ticketer address", other)),
        };
        let amount = match amount {
            Node::Int(n) if n.sign() != Sign::Minus => n.clone(),
            other => return Err(mismatch(schema, "ticket amount", other)),
        };
        Ok(SettledValue::Ticket {
            ticketer,
            value: Box::new(self.settle_at(inner, &content, depth + 1)?),
            amount,
        })
    }
}

/// One node stands for itself; several are the members of a pair comb.
fn comb_content(items: &[Node]) -> Cow<'_, Node> {
    match items {
        [single] => Cow::Borrowed(single),
        _ => Cow::Owned(Node::prim_with("Pair", items.to_vec())),
    }
}

fn mismatch(schema: &TypeNode, expected: &str, found: &Node) -> EngineError {
    EngineError::mismatch(&schema.path, expected, found.kind_name())
}

fn non_negative(schema: &TypeNode, value: &BigInt, node: &Node) -> EngineResult<()> {
    if value.sign() == Sign::Minus {
        return Err(EngineError::mismatch(
            &schema.path,
            format!("non-negative {}", schema.prim()),
            format!("{node}"),
        ));
    }
    Ok(())
}

fn settle_scalar(schema: &TypeNode, ty: ScalarType, value: &Node) -> EngineResult<Scalar> {
    let readable = |decode: fn(&[u8]) -> EngineResult<String>, bytes: &[u8]| {
        decode(bytes)
            .map(Scalar::String)
            .map_err(|_| mismatch(schema, &format!("optimized {}", ty.prim()), value))
    };
    match (ty, value) {
        (ScalarType::Unit, Node::Prim { prim, args, .. }) if prim == "Unit" && args.is_empty() => {
            Ok(Scalar::Unit)
        }
        (ScalarType::Bool, Node::Prim { prim, args, .. }) if args.is_empty() && prim == "True" => {
            Ok(Scalar::Bool(true))
        }
        (ScalarType::Bool, Node::Prim { prim, args, .. }) if args.is_empty() && prim == "False" => {
            Ok(Scalar::Bool(false))
        }
        (ScalarType::Int, Node::Int(n)) => Ok(Scalar::Int(n.clone())),
        (ScalarType::Nat | ScalarType::Mutez, Node::Int(n)) => {
            non_negative(schema, n, value)?;
            Ok(Scalar::Int(n.clone()))
        }
        (ScalarType::String, Node::String(s)) => Ok(Scalar::String(s.clone())),
        (ScalarType::Bytes, Node::Bytes(b)) => Ok(Scalar::Bytes(b.clone())),
        (ScalarType::Timestamp, Node::Int(n)) => Ok(Scalar::Timestamp(n.clone())),
        (ScalarType::Timestamp, Node::String(s)) => parse_timestamp(s)
            .map(Scalar::Timestamp)
            .ok_or_else(|| mismatch(schema, "RFC 3339 timestamp", value)),
        (
            ScalarType::Address
            | ScalarType::Key
            | ScalarType::KeyHash
            | ScalarType::Signature
            | ScalarType::ChainId
            | ScalarType::TxRollupL2Address,
            Node::String(s),
        ) => Ok(Scalar::String(s.clone())),
        (ScalarType::Address, Node::Bytes(b)) => readable(unforge_address, b),
        (ScalarType::Key, Node::Bytes(b)) => readable(unforge_public_key, b),
        (ScalarType::KeyHash, Node::Bytes(b)) => readable(unforge_key_hash, b),
        (ScalarType::Signature, Node::Bytes(b)) => readable(unforge_signature, b),
        (ScalarType::ChainId, Node::Bytes(b)) => readable(unforge_chain_id, b),
        (ScalarType::TxRollupL2Address, Node::Bytes(b)) => readable(unforge_l2_address, b),
        (ScalarType::Bls12381Fr, Node::Int(n)) => Ok(Scalar::Int(n.clone())),
        (
            ScalarType::Operation
            | ScalarType::Bls12381G1
            | ScalarType::Bls12381G2
            | ScalarType::Bls12381Fr
            | ScalarType::Chest
            | ScalarType::ChestKey,
            Node::Bytes(b),
        ) => Ok(Scalar::Bytes(b.clone())),
        (ty, other) => Err(mismatch(schema, ty.prim(), other)),
    }
}
