//! Read-side queries over the engines: big map listings and contract views.

pub mod bigmap;
pub mod contract;
pub mod guards;

pub use contract::{ContractQuery, EntrypointDoc, EntrypointSchema, StorageSchema};
