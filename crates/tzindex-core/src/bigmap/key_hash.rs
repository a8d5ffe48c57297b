//! Script-expression hashes of big map keys.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

use crate::errors::EngineResult;
use crate::micheline::{pack, Node};
use crate::settle::forge::{b58check, EXPR_PREFIX};

type Blake2b256 = Blake2b<U32>;

/// `expr…` hash of a key: base58check over Blake2b-256 of its packed form.
pub fn script_expr_hash(key: &Node) -> EngineResult<String> {
    Ok(packed_hash(&pack(key)?))
}

/// Hash of an already packed (`0x05`-prefixed) key.
pub fn packed_hash(packed: &[u8]) -> String {
    let digest = Blake2b256::digest(packed);
    b58check(&EXPR_PREFIX, &digest)
}

/// Hash of a binary-encoded key as stored in diff rows.
pub fn encoded_hash(encoded: &[u8]) -> String {
    let mut packed = Vec::with_capacity(encoded.len() + 1);
    packed.push(0x05);
    packed.extend_from_slice(encoded);
    packed_hash(&packed)
}
