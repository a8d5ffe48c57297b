//! Readable forms of optimized values: base58check addresses, keys and
//! hashes, and RFC 3339 timestamps.

use chrono::{DateTime, SecondsFormat};
use num_bigint::BigInt;
use num_traits::ToPrimitive;

use crate::errors::{EngineError, EngineResult};

pub const TZ1_PREFIX: [u8; 3] = [6, 161, 159];
pub const TZ2_PREFIX: [u8; 3] = [6, 161, 161];
pub const TZ3_PREFIX: [u8; 3] = [6, 161, 164];
pub const TZ4_PREFIX: [u8; 3] = [6, 161, 166];
pub const KT1_PREFIX: [u8; 3] = [2, 90, 121];
pub const TXR1_PREFIX: [u8; 4] = [1, 128, 120, 31];
pub const SR1_PREFIX: [u8; 3] = [6, 124, 117];
pub const EDPK_PREFIX: [u8; 4] = [13, 15, 37, 217];
pub const SPPK_PREFIX: [u8; 4] = [3, 254, 226, 86];
pub const P2PK_PREFIX: [u8; 4] = [3, 178, 139, 127];
pub const BLPK_PREFIX: [u8; 4] = [6, 149, 135, 204];
pub const SIG_PREFIX: [u8; 3] = [4, 130, 43];
pub const CHAIN_ID_PREFIX: [u8; 3] = [87, 82, 0];
pub const EXPR_PREFIX: [u8; 4] = [13, 44, 64, 27];

const HASH_LEN: usize = 20;
const ADDRESS_LEN: usize = 22;

pub fn b58check(prefix: &[u8], payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(prefix.len() + payload.len());
    data.extend_from_slice(prefix);
    data.extend_from_slice(payload);
    bs58::encode(data).with_check().into_string()
}

/// Decode a base58check string and strip its expected prefix.
pub fn b58check_decode(value: &str, prefix: &[u8]) -> EngineResult<Vec<u8>> {
    let data = bs58::decode(value)
        .with_check(None)
        .into_vec()
        .map_err(|e| EngineError::malformed(format!("invalid base58check {value:?}: {e}")))?;
    data.strip_prefix(prefix)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| EngineError::malformed(format!("unexpected prefix in {value:?}")))
}

fn implicit_prefix(curve: u8) -> EngineResult<&'static [u8]> {
    match curve {
        0 => Ok(&TZ1_PREFIX),
        1 => Ok(&TZ2_PREFIX),
        2 => Ok(&TZ3_PREFIX),
        3 => Ok(&TZ4_PREFIX),
        other => Err(EngineError::malformed(format!("unknown key curve tag {other}"))),
    }
}

/// 22-byte address, optionally followed by an entrypoint name.
pub fn unforge_address(bytes: &[u8]) -> EngineResult<String> {
    if bytes.len() < ADDRESS_LEN {
        return Err(EngineError::malformed(format!(
            "optimized address must be at least {ADDRESS_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    let (raw, suffix) = bytes.split_at(ADDRESS_LEN);
    let base = match raw[0] {
        0x00 => b58check(implicit_prefix(raw[1])?, &raw[2..]),
        0x01 => b58check(&KT1_PREFIX, &raw[1..=HASH_LEN]),
        0x02 => b58check(&TXR1_PREFIX, &raw[1..=HASH_LEN]),
        0x03 => b58check(&SR1_PREFIX, &raw[1..=HASH_LEN]),
        other => return Err(EngineError::malformed(format!("unknown address tag {other}"))),
    };
    if suffix.is_empty() {
        return Ok(base);
    }
    let entrypoint = std::str::from_utf8(suffix)
        .map_err(|_| EngineError::malformed("address entrypoint is not utf-8"))?;
    Ok(format!("{base}%{entrypoint}"))
}

/// Inverse of [`unforge_address`] for plain `tz`/`KT1` addresses.
pub fn forge_address(address: &str) -> EngineResult<Vec<u8>> {
    let (base, entrypoint) = match address.split_once('%') {
        Some((base, ep)) => (base, Some(ep)),
        None => (address, None),
    };
    let mut out = Vec::with_capacity(ADDRESS_LEN);
    let implicit = [
        ("tz1", 0u8, &TZ1_PREFIX),
        ("tz2", 1, &TZ2_PREFIX),
        ("tz3", 2, &TZ3_PREFIX),
        ("tz4", 3, &TZ4_PREFIX),
    ];
    if let Some((_, tag, prefix)) = implicit.iter().find(|(p, _, _)| base.starts_with(p)) {
        out.push(0x00);
        out.push(*tag);
        out.extend(b58check_decode(base, *prefix)?);
    } else if base.starts_with("KT1") {
        out.push(0x01);
        out.extend(b58check_decode(base, &KT1_PREFIX)?);
        out.push(0x00);
    } else {
        return Err(EngineError::malformed(format!("unsupported address {address:?}")));
    }
    if out.len() != ADDRESS_LEN {
        return Err(EngineError::malformed(format!("invalid address length for {address:?}")));
    }
    if let Some(ep) = entrypoint {
        out.extend_from_slice(ep.as_bytes());
    }
    Ok(out)
}

/// 21-byte key hash: curve tag plus 20 bytes.
pub fn unforge_key_hash(bytes: &[u8]) -> EngineResult<String> {
    if bytes.len() != HASH_LEN + 1 {
        return Err(EngineError::malformed(format!(
            "optimized key_hash must be 21 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(b58check(implicit_prefix(bytes[0])?, &bytes[1..]))
}

pub fn unforge_public_key(bytes: &[u8]) -> EngineResult<String> {
    let (prefix, len): (&[u8], usize) = match bytes.first() {
        Some(0) => (&EDPK_PREFIX, 32),
        Some(1) => (&SPPK_PREFIX, 33),
        Some(2) => (&P2PK_PREFIX, 33),
        Some(3) => (&BLPK_PREFIX, 48),
        _ => return Err(EngineError::malformed("unknown public key tag")),
    };
    if bytes.len() != len + 1 {
        return Err(EngineError::malformed(format!(
            "optimized key must be {} bytes, got {}",
            len + 1,
            bytes.len()
        )));
    }
    Ok(b58check(prefix, &bytes[1..]))
}

pub fn unforge_signature(bytes: &[u8]) -> EngineResult<String> {
    if bytes.len() != 64 {
        return Err(EngineError::malformed(format!(
            "optimized signature must be 64 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(b58check(&SIG_PREFIX, bytes))
}

pub fn unforge_chain_id(bytes: &[u8]) -> EngineResult<String> {
    if bytes.len() != 4 {
        return Err(EngineError::malformed(format!(
            "optimized chain_id must be 4 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(b58check(&CHAIN_ID_PREFIX, bytes))
}

/// 20-byte layer-2 address.
pub fn unforge_l2_address(bytes: &[u8]) -> EngineResult<String> {
    if bytes.len() != HASH_LEN {
        return Err(EngineError::malformed(format!(
            "optimized tx_rollup_l2_address must be 20 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(b58check(&TZ4_PREFIX, bytes))
}

/// RFC 3339 form of a unix timestamp; the integer itself when it falls
/// outside the calendar range.
pub fn timestamp_to_rfc3339(seconds: &BigInt) -> String {
    seconds
        .to_i64()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| seconds.to_string())
}

pub fn parse_timestamp(value: &str) -> Option<BigInt> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(BigInt::from(dt.timestamp()));
    }
    value.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unforges_implicit_and_originated_addresses() {
        let tz1 = hex::decode("000002298c03ed7d454a101eb7022bc95f7e5f41ac78").unwrap();
        assert_eq!(
            unforge_address(&tz1).unwrap(),
            "tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZSx"
        );
        let kt1 = hex::decode("01e5dc9a76ed4dbda6f2e1d4d5ed2a0b8a4b5e8c7100").unwrap();
        let text = unforge_address(&kt1).unwrap();
        assert!(text.starts_with("KT1"));
        assert_eq!(text.len(), 36);
        assert_eq!(forge_address(&text).unwrap(), kt1);
    }

    #[test]
    fn address_round_trips_with_entrypoint() {
        let address = "tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZSx%transfer";
        let bytes = forge_address(address).unwrap();
        assert_eq!(bytes.len(), 22 + "transfer".len());
        assert_eq!(unforge_address(&bytes).unwrap(), address);
    }

    #[test]
    fn rejects_short_or_unknown_addresses() {
        assert!(unforge_address(&[0u8; 10]).is_err());
        let mut bad = vec![0x09];
        bad.extend([0u8; 21]);
        assert!(unforge_address(&bad).is_err());
        assert!(forge_address("xyz").is_err());
    }

    #[test]
    fn unforges_key_hash() {
        let bytes = hex::decode("0002298c03ed7d454a101eb7022bc95f7e5f41ac78").unwrap();
        assert_eq!(
            unforge_key_hash(&bytes).unwrap(),
            "tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZSx"
        );
        assert!(unforge_key_hash(&bytes[1..]).is_err());
    }

    #[test]
    fn unforged_keys_have_expected_prefixes() {
        let mut edpk = vec![0u8];
        edpk.extend([7u8; 32]);
        assert!(unforge_public_key(&edpk).unwrap().starts_with("edpk"));
        assert!(unforge_signature(&[1u8; 64]).unwrap().starts_with("sig"));
        assert!(unforge_chain_id(&[0x7a, 0x06, 0xa7, 0x70]).unwrap().starts_with("Net"));
    }

    #[test]
    fn timestamps_render_and_parse() {
        let secs = BigInt::from(1_577_836_800i64);
        assert_eq!(timestamp_to_rfc3339(&secs), "2020-01-01T00:00:00Z");
        assert_eq!(parse_timestamp("2020-01-01T00:00:00Z"), Some(secs.clone()));
        assert_eq!(parse_timestamp("2020-01-01T01:00:00+01:00"), Some(secs));
        assert_eq!(parse_timestamp("1577836800"), Some(BigInt::from(1_577_836_800i64)));
        assert_eq!(parse_timestamp("yesterday"), None);
        let huge: BigInt = "100000000000000000000".parse().unwrap();
        assert_eq!(timestamp_to_rfc3339(&huge), "100000000000000000000");
    }
}
