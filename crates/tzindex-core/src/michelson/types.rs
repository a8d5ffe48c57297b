//! Typed schema skeleton built from a Michelson type expression.

use num_bigint::BigInt;

use crate::micheline::Node;
use crate::michelson::path::TypePath;

/// Leaf types that carry no type arguments.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Unit,
    Bool,
    Int,
    Nat,
    Mutez,
    String,
    Bytes,
    Timestamp,
    Address,
    Key,
    KeyHash,
    Signature,
    ChainId,
    Operation,
    Never,
    Bls12381G1,
    Bls12381G2,
    Bls12381Fr,
    Chest,
    ChestKey,
    TxRollupL2Address,
}

impl ScalarType {
    pub const ALL: [ScalarType; 21] = [
        ScalarType::Unit,
        ScalarType::Bool,
        ScalarType::Int,
        ScalarType::Nat,
        ScalarType::Mutez,
        ScalarType::String,
        ScalarType::Bytes,
        ScalarType::Timestamp,
        ScalarType::Address,
        ScalarType::Key,
        ScalarType::KeyHash,
        ScalarType::Signature,
        ScalarType::ChainId,
        ScalarType::Operation,
        ScalarType::Never,
        ScalarType::Bls12381G1,
        ScalarType::Bls12381G2,
        ScalarType::Bls12381Fr,
        ScalarType::Chest,
        ScalarType::ChestKey,
        ScalarType::TxRollupL2Address,
    ];

    pub fn prim(self) -> &'static str {
        match self {
            ScalarType::Unit => "unit",
            ScalarType::Bool => "bool",
            ScalarType::Int => "int",
            ScalarType::Nat => "nat",
            ScalarType::Mutez => "mutez",
            ScalarType::String => "string",
            ScalarType::Bytes => "bytes",
            ScalarType::Timestamp => "timestamp",
            ScalarType::Address => "address",
            ScalarType::Key => "key",
            ScalarType::KeyHash => "key_hash",
            ScalarType::Signature => "signature",
            ScalarType::ChainId => "chain_id",
            ScalarType::Operation => "operation",
            ScalarType::Never => "never",
            ScalarType::Bls12381G1 => "bls12_381_g1",
            ScalarType::Bls12381G2 => "bls12_381_g2",
            ScalarType::Bls12381Fr => "bls12_381_fr",
            ScalarType::Chest => "chest",
            ScalarType::ChestKey => "chest_key",
            ScalarType::TxRollupL2Address => "tx_rollup_l2_address",
        }
    }

    pub fn from_prim(prim: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.prim() == prim)
    }

    /// Numeric scalars whose values are arbitrary-precision integers.
    pub fn is_numeric(self) -> bool {
        matches!(self, ScalarType::Int | ScalarType::Nat | ScalarType::Mutez)
    }

    /// Scalars whose human form is a plain string, usable as object keys.
    pub fn is_string_like(self) -> bool {
        matches!(
            self,
            ScalarType::String
                | ScalarType::Address
                | ScalarType::Key
                | ScalarType::KeyHash
                | ScalarType::Signature
                | ScalarType::ChainId
                | ScalarType::Timestamp
                | ScalarType::Int
                | ScalarType::Nat
                | ScalarType::Mutez
                | ScalarType::Bytes
                | ScalarType::TxRollupL2Address
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SaplingKind {
    State,
    Transaction,
    TransactionDeprecated,
}

impl SaplingKind {
    pub fn prim(self) -> &'static str {
        match self {
            SaplingKind::State => "sapling_state",
            SaplingKind::Transaction => "sapling_transaction",
            SaplingKind::TransactionDeprecated => "sapling_transaction_deprecated",
        }
    }

    pub fn from_prim(prim: &str) -> Option<Self> {
        match prim {
            "sapling_state" => Some(SaplingKind::State),
            "sapling_transaction" => Some(SaplingKind::Transaction),
            "sapling_transaction_deprecated" => Some(SaplingKind::TransactionDeprecated),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeKind {
    Scalar(ScalarType),
    Pair(Box<TypeNode>, Box<TypeNode>),
    Or(Box<TypeNode>, Box<TypeNode>),
    Option(Box<TypeNode>),
    List(Box<TypeNode>),
    Set(Box<TypeNode>),
    Map(Box<TypeNode>, Box<TypeNode>),
    BigMap(Box<TypeNode>, Box<TypeNode>),
    Lambda(Box<TypeNode>, Box<TypeNode>),
    Contract(Box<TypeNode>),
    Ticket(Box<TypeNode>),
    Sapling { kind: SaplingKind, memo_size: BigInt },
}

/// Annotations attached to a type node, kept in source order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Annotations(Vec<String>);

impl Annotations {
    pub fn new(raw: Vec<String>) -> Self {
        Annotations(raw)
    }

    pub fn raw(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn first_with(&self, sigil: char) -> Option<&str> {
        self.0
            .iter()
            .filter_map(|a| a.strip_prefix(sigil))
            .find(|name| !name.is_empty())
    }

    /// `%name`
    pub fn field(&self) -> Option<&str> {
        self.first_with('%')
    }

    /// `:name`
    pub fn type_name(&self) -> Option<&str> {
        self.first_with(':')
    }

    /// `@name`
    pub fn var(&self) -> Option<&str> {
        self.first_with('@')
    }
}

/// One node of the schema skeleton.
///
/// Nodes are immutable once built and are shared across threads behind an
/// `Arc` by the schema cache. `ordinal` is the pre-order position in the
/// tree and names unannotated nodes deterministically.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeNode {
    pub kind: TypeKind,
    pub path: TypePath,
    pub annots: Annotations,
    pub ordinal: usize,
    pub is_root: bool,
    pub is_entrypoint: bool,
}

impl TypeNode {
    pub fn prim(&self) -> &'static str {
        match &self.kind {
            TypeKind::Scalar(s) => s.prim(),
            TypeKind::Pair(..) => "pair",
            TypeKind::Or(..) => "or",
            TypeKind::Option(_) => "option",
            TypeKind::List(_) => "list",
            TypeKind::Set(_) => "set",
            TypeKind::Map(..) => "map",
            TypeKind::BigMap(..) => "big_map",
            TypeKind::Lambda(..) => "lambda",
            TypeKind::Contract(_) => "contract",
            TypeKind::Ticket(_) => "ticket",
            TypeKind::Sapling { kind, .. } => kind.prim(),
        }
    }

    /// Field, type or variable annotation, in that order of priority.
    pub fn label(&self) -> Option<&str> {
        self.annots
            .field()
            .or_else(|| self.annots.type_name())
            .or_else(|| self.annots.var())
    }

    /// Display name: the annotation if any, else `@{prim}_{ordinal}`.
    pub fn name(&self) -> String {
        match self.label() {
            Some(label) => label.to_string(),
            None => format!("@{}_{}", self.prim(), self.ordinal),
        }
    }

    pub fn scalar(&self) -> Option<ScalarType> {
        match self.kind {
            TypeKind::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_big_map(&self) -> bool {
        matches!(self.kind, TypeKind::BigMap(..))
    }

    pub fn children(&self) -> Vec<&TypeNode> {
        match &self.kind {
            TypeKind::Scalar(_) | TypeKind::Sapling { .. } => Vec::new(),
            TypeKind::Option(inner)
            | TypeKind::List(inner)
            | TypeKind::Set(inner)
            | TypeKind::Contract(inner)
            | TypeKind::Ticket(inner) => vec![inner.as_ref()],
            TypeKind::Pair(a, b)
            | TypeKind::Or(a, b)
            | TypeKind::Map(a, b)
            | TypeKind::BigMap(a, b)
            | TypeKind::Lambda(a, b) => vec![a.as_ref(), b.as_ref()],
        }
    }

    /// Pre-order iteration over this node and all descendants.
    pub fn walk(&self) -> Vec<&TypeNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node);
            let children = node.children();
            stack.extend(children.into_iter().rev());
        }
        out
    }

    pub fn find(&self, path: &TypePath) -> Option<&TypeNode> {
        if !path.starts_with(&self.path) {
            return None;
        }
        let mut current = self;
        for step in &path.steps()[self.path.len()..] {
            let next_path = current.path.child(*step);
            current = current
                .children()
                .into_iter()
                .find(|child| child.path == next_path)?;
        }
        Some(current)
    }

    /// First node in pre-order with the given field annotation.
    pub fn find_field(&self, field: &str) -> Option<&TypeNode> {
        self.walk()
            .into_iter()
            .find(|node| node.annots.field() == Some(field))
    }

    pub fn big_maps(&self) -> Vec<&TypeNode> {
        self.walk().into_iter().filter(|n| n.is_big_map()).collect()
    }

    /// Type expression for this node, with its annotations.
    ///
    /// Right combs built from n-ary pairs come back in binary form.
    pub fn to_node(&self) -> Node {
        let args = match &self.kind {
            TypeKind::Sapling { memo_size, .. } => vec![Node::Int(memo_size.clone())],
            _ => self.children().into_iter().map(TypeNode::to_node).collect(),
        };
        Node::Prim {
            prim: self.prim().to_string(),
            args,
            annots: self.annots.raw().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_prims_round_trip() {
        for scalar in ScalarType::ALL {
            assert_eq!(ScalarType::from_prim(scalar.prim()), Some(scalar));
        }
        assert_eq!(ScalarType::from_prim("pair"), None);
    }

    #[test]
    fn annotation_lookup_by_sigil() {
        let annots = Annotations::new(vec![":t".into(), "%f".into(), "@v".into()]);
        assert_eq!(annots.field(), Some("f"));
        assert_eq!(annots.type_name(), Some("t"));
        assert_eq!(annots.var(), Some("v"));
        assert_eq!(Annotations::default().field(), None);
    }

    #[test]
    fn bare_sigil_is_not_a_name() {
        let annots = Annotations::new(vec!["%".into(), "%real".into()]);
        assert_eq!(annots.field(), Some("real"));
    }
}
