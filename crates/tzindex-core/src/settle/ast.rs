//! A schema paired with at most one settlement.

use std::sync::Arc;

use tracing::debug;

use crate::config::EngineConfig;
use crate::errors::{EngineError, EngineResult};
use crate::micheline::Node;
use crate::michelson::TypeNode;
use crate::settle::settler::Settler;
use crate::settle::value::SettledNode;

/// Typed, path-addressable tree. The schema skeleton may be shared with
/// other trees through the schema cache; the settled values are owned.
#[derive(Clone, Debug)]
pub struct TypedAst {
    schema: Arc<TypeNode>,
    settled: Option<SettledNode>,
    settler: Settler,
}

impl TypedAst {
    pub fn new(schema: Arc<TypeNode>) -> Self {
        Self {
            schema,
            settled: None,
            settler: Settler::default(),
        }
    }

    pub fn with_config(schema: Arc<TypeNode>, config: &EngineConfig) -> Self {
        Self {
            schema,
            settled: None,
            settler: Settler::new(config),
        }
    }

    /// Bind `value` to the schema. A tree settles once; a failed attempt
    /// leaves it unsettled.
    pub fn settle(&mut self, value: &Node) -> EngineResult<()> {
        if self.settled.is_some() {
            return Err(EngineError::AlreadySettled);
        }
        let settled = self.settler.settle(&self.schema, value)?;
        debug!(root = self.schema.prim(), "tree settled");
        self.settled = Some(settled);
        Ok(())
    }

    /// Build and settle in one step.
    pub fn settled_from(schema: Arc<TypeNode>, value: &Node) -> EngineResult<Self> {
        let mut ast = Self::new(schema);
        ast.settle(value)?;
        Ok(ast)
    }

    pub fn schema(&self) -> &TypeNode {
        &self.schema
    }

    pub fn shared_schema(&self) -> Arc<TypeNode> {
        Arc::clone(&self.schema)
    }

    pub fn is_settled(&self) -> bool {
        self.settled.is_some()
    }

    pub fn settled(&self) -> EngineResult<&SettledNode> {
        self.settled.as_ref().ok_or(EngineError::NotSettled)
    }

    pub fn settler(&self) -> &Settler {
        &self.settler
    }

    pub(crate) fn settled_mut(&mut self) -> EngineResult<&mut SettledNode> {
        self.settled.as_mut().ok_or(EngineError::NotSettled)
    }

    /// Both halves, for walks that need the schema next to the values.
    pub fn parts(&self) -> EngineResult<(&TypeNode, &SettledNode)> {
        Ok((&self.schema, self.settled()?))
    }

    pub fn to_node(&self) -> EngineResult<Node> {
        Ok(self.settled()?.to_node())
    }
}
