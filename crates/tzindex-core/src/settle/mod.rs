//! Settlement engine: binds untyped values to a schema skeleton.

pub mod ast;
pub mod forge;
pub mod parameters;
pub mod settler;
pub mod value;

pub use ast::TypedAst;
pub use parameters::{Parameters, SettledParameters};
pub use settler::{settle, Settler};
pub use value::{BigMapValue, Scalar, SettledNode, SettledValue, Side};
