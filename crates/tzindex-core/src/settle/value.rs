//! Settled values bound to schema paths.

use num_bigint::BigInt;

use crate::micheline::Node;
use crate::michelson::{PathStep, ScalarType, TypePath};
use crate::settle::forge::timestamp_to_rfc3339;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn step(self) -> PathStep {
        match self {
            Side::Left => PathStep::Left,
            Side::Right => PathStep::Right,
        }
    }

    pub fn prim(self) -> &'static str {
        match self {
            Side::Left => "Left",
            Side::Right => "Right",
        }
    }
}

/// Concrete leaf value. Optimized encodings of addresses, keys and hashes
/// are stored in their readable base58 form.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Scalar {
    Unit,
    Bool(bool),
    Int(BigInt),
    String(String),
    Bytes(Vec<u8>),
    /// Seconds since the unix epoch.
    Timestamp(BigInt),
}

impl Scalar {
    /// Human form used by display projections and map keys.
    pub fn display(&self) -> String {
        match self {
            Scalar::Unit => "Unit".to_string(),
            Scalar::Bool(b) => b.to_string(),
            Scalar::Int(i) => i.to_string(),
            Scalar::String(s) => s.clone(),
            Scalar::Bytes(b) => hex::encode(b),
            Scalar::Timestamp(t) => timestamp_to_rfc3339(t),
        }
    }

    pub fn to_node(&self) -> Node {
        match self {
            Scalar::Unit => Node::prim("Unit"),
            Scalar::Bool(true) => Node::prim("True"),
            Scalar::Bool(false) => Node::prim("False"),
            Scalar::Int(i) | Scalar::Timestamp(i) => Node::Int(i.clone()),
            Scalar::String(s) => Node::String(s.clone()),
            Scalar::Bytes(b) => Node::Bytes(b.clone()),
        }
    }
}

/// Contents of a `big_map` value: a ledger pointer, an inline literal, or a
/// pointer whose entries were attached after reconstruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BigMapValue {
    pub ptr: Option<BigInt>,
    /// `None` until entries are known; inline literals always carry them.
    pub entries: Option<Vec<(SettledNode, SettledNode)>>,
}

impl BigMapValue {
    pub fn is_resolved(&self) -> bool {
        self.entries.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SettledValue {
    Scalar { ty: ScalarType, value: Scalar },
    Pair(Box<SettledNode>, Box<SettledNode>),
    Or { side: Side, branch: Box<SettledNode> },
    Option(Option<Box<SettledNode>>),
    List(Vec<SettledNode>),
    Set(Vec<SettledNode>),
    Map(Vec<(SettledNode, SettledNode)>),
    BigMap(BigMapValue),
    Contract(String),
    Ticket {
        ticketer: String,
        value: Box<SettledNode>,
        amount: BigInt,
    },
    /// Code and sapling values kept verbatim.
    Opaque(Node),
}

/// A value bound to the schema node at `path`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettledNode {
    pub path: TypePath,
    pub value: SettledValue,
}

impl SettledNode {
    pub fn new(path: TypePath, value: SettledValue) -> Self {
        Self { path, value }
    }

    pub fn scalar(&self) -> Option<&Scalar> {
        match &self.value {
            SettledValue::Scalar { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Canonical untyped value: binary pairs, integer timestamps, readable
    /// addresses.
    pub fn to_node(&self) -> Node {
        match &self.value {
            SettledValue::Scalar { value, .. } => value.to_node(),
            SettledValue::Pair(left, right) => Node::pair(left.to_node(), right.to_node()),
            SettledValue::Or { side, branch } => Node::prim_with(side.prim(), vec![branch.to_node()]),
            SettledValue::Option(None) => Node::prim("None"),
            SettledValue::Option(Some(inner)) => Node::prim_with("Some", vec![inner.to_node()]),
            SettledValue::List(items) | SettledValue::Set(items) => {
                Node::Seq(items.iter().map(SettledNode::to_node).collect())
            }
            SettledValue::Map(entries) => elts(entries),
            SettledValue::BigMap(big_map) => match (&big_map.ptr, &big_map.entries) {
                (Some(ptr), _) => Node::Int(ptr.clone()),
                (None, Some(entries)) => elts(entries),
                (None, None) => Node::Seq(Vec::new()),
            },
            SettledValue::Contract(address) => Node::String(address.clone()),
            SettledValue::Ticket {
                ticketer,
                value,
                amount,
            } => Node::pair(
                Node::String(ticketer.clone()),
                Node::pair(value.to_node(), Node::Int(amount.clone())),
            ),
            SettledValue::Opaque(node) => node.clone(),
        }
    }

    /// Pre-order search for the node bound at `path`.
    pub fn find(&self, path: &TypePath) -> Option<&SettledNode> {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if &node.path == path {
                return Some(node);
            }
            if !path.starts_with(&node.path) {
                continue;
            }
            stack.extend(node.children());
        }
        None
    }

    pub fn children(&self) -> Vec<&SettledNode> {
        match &self.value {
            SettledValue::Scalar { .. } | SettledValue::Contract(_) | SettledValue::Opaque(_) => {
                Vec::new()
            }
            SettledValue::Pair(left, right) => vec![left.as_ref(), right.as_ref()],
            SettledValue::Or { branch, .. } => vec![branch.as_ref()],
            SettledValue::Option(inner) => inner.iter().map(|b| b.as_ref()).collect(),
            SettledValue::List(items) | SettledValue::Set(items) => items.iter().collect(),
            SettledValue::Map(entries) => entries.iter().flat_map(|(k, v)| [k, v]).collect(),
            SettledValue::BigMap(big_map) => big_map
                .entries
                .iter()
                .flatten()
                .flat_map(|(k, v)| [k, v])
                .collect(),
            SettledValue::Ticket { value, .. } => vec![value.as_ref()],
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut SettledNode> {
        match &mut self.value {
            SettledValue::Scalar { .. } | SettledValue::Contract(_) | SettledValue::Opaque(_) => {
                Vec::new()
            }
            SettledValue::Pair(left, right) => vec![left.as_mut(), right.as_mut()],
            SettledValue::Or { branch, .. } => vec![branch.as_mut()],
            SettledValue::Option(inner) => inner.iter_mut().map(|b| b.as_mut()).collect(),
            SettledValue::List(items) | SettledValue::Set(items) => items.iter_mut().collect(),
            SettledValue::Map(entries) => entries.iter_mut().flat_map(|(k, v)| [k, v]).collect(),
            SettledValue::BigMap(big_map) => big_map
                .entries
                .iter_mut()
                .flatten()
                .flat_map(|(k, v)| [k, v])
                .collect(),
            SettledValue::Ticket { value, .. } => vec![value.as_mut()],
        }
    }

    /// Pointers of every big map in the tree, in wire order.
    pub fn big_map_ptrs(&self) -> Vec<BigInt> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if let SettledValue::BigMap(BigMapValue { ptr: Some(ptr), .. }) = &node.value {
                out.push(ptr.clone());
            }
            stack.extend(node.children().into_iter().rev());
        }
        out
    }
}

fn elts(entries: &[(SettledNode, SettledNode)]) -> Node {
    Node::Seq(
        entries
            .iter()
            .map(|(k, v)| Node::prim_with("Elt", vec![k.to_node(), v.to_node()]))
            .collect(),
    )
}
