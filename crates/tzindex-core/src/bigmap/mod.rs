//! Big map diff/state engine: lifecycle replay, per-key reconstruction,
//! key hashing and enrichment of settled trees.

pub mod enrich;
pub mod key_hash;
pub mod lifecycle;
pub mod reconstruct;

pub use enrich::enrich;
pub use key_hash::{encoded_hash, packed_hash, script_expr_hash};
pub use lifecycle::{Lifecycle, PointerState};
pub use reconstruct::{
    reconstruct, reconstruct_pointer, KeyRecord, PointerReconstruction, ReconstructOptions,
    Reconstruction,
};
