//! Type schema: typed skeletons built from Michelson type expressions.

pub mod builder;
pub mod cache;
pub mod entrypoints;
pub mod path;
pub mod types;

pub use builder::{build, script_section, SchemaBuilder};
pub use cache::{CacheStats, SchemaCache, SchemaKey};
pub use entrypoints::{entrypoint_names, entrypoints, find_entrypoint, Entrypoint};
pub use path::{PathStep, TypePath};
pub use types::{Annotations, SaplingKind, ScalarType, TypeKind, TypeNode};
