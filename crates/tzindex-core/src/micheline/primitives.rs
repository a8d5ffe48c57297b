//! Michelson primitive table with binary codes.
//!
//! The position of a name in [`PRIMITIVES`] is its one-byte wire code, so the
//! table is append-only.

use std::collections::HashMap;
use std::sync::LazyLock;

pub const PRIMITIVES: &[&str] = &[
    // 0x00
    "parameter", "storage", "code", "False", "Elt", "Left", "None", "Pair",
    "Right", "Some", "True", "Unit", "PACK", "UNPACK", "BLAKE2B", "SHA256",
    // 0x10
    "SHA512", "ABS", "ADD", "AMOUNT", "AND", "BALANCE", "CAR", "CDR",
    "CHECK_SIGNATURE", "COMPARE", "CONCAT", "CONS", "CREATE_ACCOUNT",
    "CREATE_CONTRACT", "IMPLICIT_ACCOUNT", "DIP",
    // 0x20
    "DROP", "DUP", "EDIV", "EMPTY_MAP", "EMPTY_SET", "EQ", "EXEC", "FAILWITH",
    "GE", "GET", "GT", "HASH_KEY", "IF", "IF_CONS", "IF_LEFT", "IF_NONE",
    // 0x30
    "INT", "LAMBDA", "LE", "LEFT", "LOOP", "LSL", "LSR", "LT",
    "MAP", "MEM", "MUL", "NEG", "NEQ", "NIL", "NONE", "NOT",
    // 0x40
    "NOW", "OR", "PAIR", "PUSH", "RIGHT", "SIZE", "SOME", "SOURCE",
    "SENDER", "SELF", "STEPS_TO_QUOTA", "SUB", "SWAP", "TRANSFER_TOKENS",
    "SET_DELEGATE", "UNIT",
    // 0x50
    "UPDATE", "XOR", "ITER", "LOOP_LEFT", "ADDRESS", "CONTRACT", "ISNAT",
    "CAST", "RENAME", "bool", "contract", "int", "key", "key_hash", "lambda",
    "list",
    // 0x60
    "map", "big_map", "nat", "option", "or", "pair", "set", "signature",
    "string", "bytes", "mutez", "timestamp", "unit", "operation", "address",
    "SLICE",
    // 0x70
    "DIG", "DUG", "EMPTY_BIG_MAP", "APPLY", "chain_id", "CHAIN_ID", "LEVEL",
    "SELF_ADDRESS", "never", "NEVER", "UNPAIR", "VOTING_POWER",
    "TOTAL_VOTING_POWER", "KECCAK", "SHA3", "PAIRING_CHECK",
    // 0x80
    "bls12_381_g1", "bls12_381_g2", "bls12_381_fr", "sapling_state",
    "sapling_transaction_deprecated", "SAPLING_EMPTY_STATE",
    "SAPLING_VERIFY_UPDATE", "ticket", "TICKET_DEPRECATED", "READ_TICKET",
    "SPLIT_TICKET", "JOIN_TICKETS", "GET_AND_UPDATE", "chest", "chest_key",
    "OPEN_CHEST",
    // 0x90
    "VIEW", "view", "constant", "SUB_MUTEZ", "tx_rollup_l2_address",
    "MIN_BLOCK_TIME", "sapling_transaction", "EMIT", "Lambda_rec",
    "LAMBDA_REC", "TICKET", "BYTES", "NAT", "Ticket", "IS_IMPLICIT_ACCOUNT",
    "INDEX_ADDRESS", "GET_ADDRESS_INDEX",
];

static CODES: LazyLock<HashMap<&'static str, u8>> = LazyLock::new(|| {
    PRIMITIVES
        .iter()
        .enumerate()
        .map(|(code, name)| (*name, code as u8))
        .collect()
});

pub fn code_of(name: &str) -> Option<u8> {
    CODES.get(name).copied()
}

pub fn name_of(code: u8) -> Option<&'static str> {
    PRIMITIVES.get(code as usize).copied()
}

pub fn is_known(name: &str) -> bool {
    CODES.contains_key(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_codes() {
        assert_eq!(code_of("parameter"), Some(0x00));
        assert_eq!(code_of("Pair"), Some(0x07));
        assert_eq!(code_of("pair"), Some(0x65));
        assert_eq!(code_of("big_map"), Some(0x61));
        assert_eq!(code_of("address"), Some(0x6e));
        assert_eq!(code_of("ticket"), Some(0x87));
        assert_eq!(code_of("NAT"), Some(0x9c));
        assert_eq!(code_of("Ticket"), Some(0x9d));
    }

    #[test]
    fn names_are_unique() {
        assert_eq!(CODES.len(), PRIMITIVES.len());
        assert!(PRIMITIVES.len() <= 256);
    }

    #[test]
    fn unknown_names_and_codes() {
        assert_eq!(code_of("CDAR"), None);
        assert_eq!(name_of(0xff), None);
        assert!(!is_known("Pairs"));
    }
}
