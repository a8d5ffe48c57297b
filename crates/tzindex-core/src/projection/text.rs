//! Text projection: canonical Michelson notation for types and values.

use crate::errors::EngineResult;
use crate::micheline::format_michelson;
use crate::michelson::TypeNode;
use crate::query::guards::clamp_line_size;
use crate::settle::{SettledNode, TypedAst};

pub fn type_text(schema: &TypeNode, line_size: usize) -> String {
    format_michelson(&schema.to_node(), clamp_line_size(line_size))
}

pub fn settled_text(settled: &SettledNode, line_size: usize) -> String {
    format_michelson(&settled.to_node(), clamp_line_size(line_size))
}

pub fn value_text(ast: &TypedAst, line_size: usize) -> EngineResult<String> {
    Ok(settled_text(ast.settled()?, line_size))
}
