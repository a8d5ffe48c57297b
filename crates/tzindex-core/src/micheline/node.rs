//! Untyped Micheline node tree.

use std::fmt;

use num_bigint::BigInt;

/// One node of an untyped Micheline expression.
///
/// Annotations are kept verbatim and in wire order: later projections derive
/// field names from them.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Node {
    Prim {
        prim: String,
        args: Vec<Node>,
        annots: Vec<String>,
    },
    Int(BigInt),
    String(String),
    Bytes(Vec<u8>),
    Seq(Vec<Node>),
}

impl Node {
    pub fn prim(name: &str) -> Self {
        Node::Prim {
            prim: name.to_string(),
            args: Vec::new(),
            annots: Vec::new(),
        }
    }

    pub fn prim_with(name: &str, args: Vec<Node>) -> Self {
        Node::Prim {
            prim: name.to_string(),
            args,
            annots: Vec::new(),
        }
    }

    pub fn prim_annotated(name: &str, args: Vec<Node>, annots: &[&str]) -> Self {
        Node::Prim {
            prim: name.to_string(),
            args,
            annots: annots.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn int(value: impl Into<BigInt>) -> Self {
        Node::Int(value.into())
    }

    pub fn string(value: impl Into<String>) -> Self {
        Node::String(value.into())
    }

    pub fn pair(left: Node, right: Node) -> Self {
        Node::prim_with("Pair", vec![left, right])
    }

    /// Short description of the node shape, used in mismatch diagnostics.
    pub fn kind_name(&self) -> String {
        match self {
            Node::Prim { prim, .. } => prim.clone(),
            Node::Int(_) => "int literal".to_string(),
            Node::String(_) => "string literal".to_string(),
            Node::Bytes(_) => "bytes literal".to_string(),
            Node::Seq(_) => "sequence".to_string(),
        }
    }

    pub fn is_prim(&self, name: &str) -> bool {
        matches!(self, Node::Prim { prim, .. } if prim == name)
    }

    pub fn args(&self) -> &[Node] {
        match self {
            Node::Prim { args, .. } => args,
            _ => &[],
        }
    }

    pub fn annots(&self) -> &[String] {
        match self {
            Node::Prim { annots, .. } => annots,
            _ => &[],
        }
    }

    /// Depth of the deepest path from this node, counting this node as 1.
    pub fn depth(&self) -> usize {
        let children = match self {
            Node::Prim { args, .. } => args.as_slice(),
            Node::Seq(items) => items.as_slice(),
            _ => return 1,
        };
        1 + children.iter().map(Node::depth).max().unwrap_or(0)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::micheline::text::format_inline(self))
    }
}
