//! tzindex core library: the typed contract-data engine and the big map
//! diff/state engine of a Tezos indexer.
//!
//! Data flows leaf-first: [`micheline`] decodes wire bytes into untyped
//! trees, [`michelson`] builds typed schema skeletons, [`settle`] binds
//! values to a schema, and [`projection`] derives display, schema, text and
//! payload views. [`bigmap`] replays the big map log independently and feeds
//! resolved entries back into settled trees. The engines perform no I/O;
//! [`store`] and [`query`] sit on top of them.

pub mod bigmap;
pub mod config;
pub mod errors;
pub mod micheline;
pub mod michelson;
pub mod models;
pub mod projection;
pub mod query;
pub mod settle;
pub mod store;

pub use config::EngineConfig;
pub use errors::{EngineError, EngineResult};
