//! Binary Micheline codec (the `PACK` layout without the `0x05` watermark).

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::Zero;

use crate::errors::{EngineError, EngineResult};
use crate::micheline::node::Node;
use crate::micheline::primitives::{code_of, name_of};
use crate::query::guards::DEFAULT_MAX_DEPTH;

const TAG_INT: u8 = 0x00;
const TAG_STRING: u8 = 0x01;
const TAG_SEQ: u8 = 0x02;
const TAG_PRIM_0: u8 = 0x03;
const TAG_PRIM_0_ANNOTS: u8 = 0x04;
const TAG_PRIM_1: u8 = 0x05;
const TAG_PRIM_1_ANNOTS: u8 = 0x06;
const TAG_PRIM_2: u8 = 0x07;
const TAG_PRIM_2_ANNOTS: u8 = 0x08;
const TAG_PRIM_N: u8 = 0x09;
const TAG_BYTES: u8 = 0x0a;

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode a node tree. Fails only on primitive names outside the table.
pub fn encode(node: &Node) -> EngineResult<Vec<u8>> {
    let mut out = Vec::new();
    encode_into(node, &mut out)?;
    Ok(out)
}

fn encode_into(node: &Node, out: &mut Vec<u8>) -> EngineResult<()> {
    match node {
        Node::Int(value) => {
            out.push(TAG_INT);
            write_zarith(value, out);
        }
        Node::String(value) => {
            out.push(TAG_STRING);
            write_chunk(value.as_bytes(), out)?;
        }
        Node::Bytes(value) => {
            out.push(TAG_BYTES);
            write_chunk(value, out)?;
        }
        Node::Seq(items) => {
            out.push(TAG_SEQ);
            let mut body = Vec::new();
            for item in items {
                encode_into(item, &mut body)?;
            }
            write_chunk(&body, out)?;
        }
        Node::Prim { prim, args, annots } => {
            let code = code_of(prim)
                .ok_or_else(|| EngineError::malformed(format!("unknown primitive {prim}")))?;
            if let Some(bad) = annots.iter().find(|a| a.is_empty() || a.contains(' ')) {
                return Err(EngineError::malformed(format!(
                    "annotation {bad:?} on {prim} is empty or contains a space"
                )));
            }
            let has_annots = !annots.is_empty();
            let tag = match (args.len(), has_annots) {
                (0, false) => TAG_PRIM_0,
                (0, true) => TAG_PRIM_0_ANNOTS,
                (1, false) => TAG_PRIM_1,
                (1, true) => TAG_PRIM_1_ANNOTS,
                (2, false) => TAG_PRIM_2,
                (2, true) => TAG_PRIM_2_ANNOTS,
                _ => TAG_PRIM_N,
            };
            out.push(tag);
            out.push(code);
            if tag == TAG_PRIM_N {
                let mut body = Vec::new();
                for arg in args {
                    encode_into(arg, &mut body)?;
                }
                write_chunk(&body, out)?;
                write_chunk(annots.join(" ").as_bytes(), out)?;
            } else {
                for arg in args {
                    encode_into(arg, out)?;
                }
                if has_annots {
                    write_chunk(annots.join(" ").as_bytes(), out)?;
                }
            }
        }
    }
    Ok(())
}

fn write_chunk(bytes: &[u8], out: &mut Vec<u8>) -> EngineResult<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| EngineError::malformed("chunk longer than 4 GiB"))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

/// Lowest `bits` bits of a magnitude.
fn low_bits(value: &BigUint, bits: u32) -> u8 {
    let digit = value.to_u32_digits().first().copied().unwrap_or(0);
    (digit & ((1u32 << bits) - 1)) as u8
}

/// Signed zarith: 6 value bits and a sign bit in the first byte, 7 value bits
/// in every following byte, high bit set while more bytes follow.
fn write_zarith(value: &BigInt, out: &mut Vec<u8>) {
    let mut magnitude = value.magnitude().clone();
    let mut first = low_bits(&magnitude, 6);
    if value.sign() == Sign::Minus {
        first |= 0x40;
    }
    magnitude >>= 6u32;
    if !magnitude.is_zero() {
        first |= 0x80;
    }
    out.push(first);
    while !magnitude.is_zero() {
        let mut byte = low_bits(&magnitude, 7);
        magnitude >>= 7u32;
        if !magnitude.is_zero() {
            byte |= 0x80;
        }
        out.push(byte);
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode a complete byte string into a node tree.
pub fn decode(bytes: &[u8]) -> EngineResult<Node> {
    decode_with_depth(bytes, DEFAULT_MAX_DEPTH)
}

/// Same as [`decode`] with an explicit nesting limit.
pub fn decode_with_depth(bytes: &[u8], max_depth: usize) -> EngineResult<Node> {
    let mut reader = Reader {
        bytes,
        pos: 0,
        max_depth,
    };
    let node = reader.node(0)?;
    if reader.pos != bytes.len() {
        return Err(EngineError::malformed(format!(
            "{} trailing bytes after expression",
            bytes.len() - reader.pos
        )));
    }
    Ok(node)
}

/// Decode the payload of a packed value (`0x05` watermark followed by a node).
pub fn unpack(bytes: &[u8]) -> EngineResult<Node> {
    match bytes.split_first() {
        Some((0x05, rest)) => decode(rest),
        _ => Err(EngineError::malformed("missing 0x05 pack watermark")),
    }
}

/// Pack a node: `0x05` watermark followed by its binary encoding.
pub fn pack(node: &Node) -> EngineResult<Vec<u8>> {
    let mut out = vec![0x05];
    encode_into(node, &mut out)?;
    Ok(out)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    max_depth: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> EngineResult<&'a [u8]> {
        if self.bytes.len().saturating_sub(self.pos) < n {
            return Err(EngineError::malformed(format!(
                "truncated input at offset {}: need {n} bytes",
                self.pos
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn byte(&mut self) -> EngineResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn chunk(&mut self) -> EngineResult<&'a [u8]> {
        let raw = self.take(4)?;
        let len = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
        self.take(len)
    }

    fn utf8(&mut self) -> EngineResult<String> {
        let raw = self.chunk()?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| EngineError::malformed(format!("invalid utf-8 before offset {}", self.pos)))
    }

    fn zarith(&mut self) -> EngineResult<BigInt> {
        let first = self.byte()?;
        let negative = first & 0x40 != 0;
        let mut magnitude = BigUint::from(first & 0x3f);
        let mut shift = 6u32;
        let mut more = first & 0x80 != 0;
        while more {
            let byte = self.byte()?;
            more = byte & 0x80 != 0;
            if !more && byte == 0 {
                return Err(EngineError::malformed("non-canonical zarith trailing zero"));
            }
            magnitude |= BigUint::from(byte & 0x7f) << shift;
            shift += 7;
        }
        let sign = if negative { Sign::Minus } else { Sign::Plus };
        Ok(BigInt::from_biguint(sign, magnitude))
    }

    fn annots(&mut self) -> EngineResult<Vec<String>> {
        let raw = self.utf8()?;
        Ok(raw
            .split(' ')
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn node(&mut self, depth: usize) -> EngineResult<Node> {
        if depth >= self.max_depth {
            return Err(EngineError::DepthExceeded(self.max_depth));
        }
        let tag = self.byte()?;
        match tag {
            TAG_INT => Ok(Node::Int(self.zarith()?)),
            TAG_STRING => Ok(Node::String(self.utf8()?)),
            TAG_BYTES => Ok(Node::Bytes(self.chunk()?.to_vec())),
            TAG_SEQ => {
                let body = self.chunk()?;
                Ok(Node::Seq(self.nested(body, depth)?))
            }
            TAG_PRIM_0..=TAG_PRIM_2_ANNOTS => {
                let prim = self.prim_name()?;
                let arity = ((tag - TAG_PRIM_0) / 2) as usize;
                let mut args = Vec::with_capacity(arity);
                for _ in 0..arity {
                    args.push(self.node(depth + 1)?);
                }
                let has_annots = (tag - TAG_PRIM_0) % 2 == 1;
                let annots = if has_annots { self.annots()? } else { Vec::new() };
                Ok(Node::Prim { prim, args, annots })
            }
            TAG_PRIM_N => {
                let prim = self.prim_name()?;
                let body = self.chunk()?;
                let args = self.nested(body, depth)?;
                let annots = self.annots()?;
                Ok(Node::Prim { prim, args, annots })
            }
            other => Err(EngineError::malformed(format!(
                "unknown node tag 0x{other:02x} at offset {}",
                self.pos - 1
            ))),
        }
    }

    fn prim_name(&mut self) -> EngineResult<String> {
        let code = self.byte()?;
        name_of(code)
            .map(str::to_string)
            .ok_or_else(|| EngineError::malformed(format!("unknown primitive tag 0x{code:02x}")))
    }

    /// Decode every node of a length-prefixed body.
    fn nested(&mut self, body: &'a [u8], depth: usize) -> EngineResult<Vec<Node>> {
        let mut inner = Reader {
            bytes: body,
            pos: 0,
            max_depth: self.max_depth,
        };
        let mut items = Vec::new();
        while inner.pos < body.len() {
            items.push(inner.node(depth + 1)?);
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_known_vectors() {
        // PACK 1 = 0x050001, PACK "a" = 0x050100000001 61
        assert_eq!(pack(&Node::int(1)).unwrap(), vec![0x05, 0x00, 0x01]);
        assert_eq!(
            pack(&Node::string("a")).unwrap(),
            vec![0x05, 0x01, 0x00, 0x00, 0x00, 0x01, 0x61]
        );
        assert_eq!(encode(&Node::prim("Unit")).unwrap(), vec![0x03, 0x0b]);
        assert_eq!(
            encode(&Node::pair(Node::int(1), Node::int(2))).unwrap(),
            vec![0x07, 0x07, 0x00, 0x01, 0x00, 0x02]
        );
    }

    #[test]
    fn zarith_edge_values() {
        for value in [0i64, 1, -1, 63, 64, -64, 127, 128, 1_000_000, i64::MIN, i64::MAX] {
            let node = Node::int(value);
            let bytes = encode(&node).unwrap();
            assert_eq!(decode(&bytes).unwrap(), node, "value {value}");
        }
        // 64 needs a continuation byte: 0x80 0x01
        assert_eq!(encode(&Node::int(64)).unwrap(), vec![0x00, 0x80, 0x01]);
        assert_eq!(encode(&Node::int(-1)).unwrap(), vec![0x00, 0x41]);
    }

    #[test]
    fn big_integers_round_trip() {
        let big: BigInt = "123456789012345678901234567890123456789".parse().unwrap();
        let node = Node::Int(-big);
        assert_eq!(decode(&encode(&node).unwrap()).unwrap(), node);
    }

    #[test]
    fn prims_with_annotations_and_many_args_round_trip() {
        let node = Node::prim_annotated(
            "pair",
            vec![
                Node::prim_annotated("nat", vec![], &["%a"]),
                Node::prim("int"),
                Node::prim_annotated("string", vec![], &["%c", ":label"]),
            ],
            &["%root"],
        );
        let bytes = encode(&node).unwrap();
        assert_eq!(bytes[0], TAG_PRIM_N);
        assert_eq!(decode(&bytes).unwrap(), node);
    }

    #[test]
    fn sequences_and_bytes_round_trip() {
        let node = Node::Seq(vec![
            Node::prim_with("Elt", vec![Node::Bytes(vec![0xde, 0xad]), Node::int(7)]),
            Node::Seq(vec![]),
        ]);
        assert_eq!(decode(&encode(&node).unwrap()).unwrap(), node);
    }

    #[test]
    fn rejects_truncated_input() {
        let bytes = encode(&Node::string("hello")).unwrap();
        let err = decode(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, EngineError::MalformedInput(_)));
    }

    #[test]
    fn rejects_unknown_primitive_tag() {
        let err = decode(&[0x03, 0xfe]).unwrap_err();
        assert!(matches!(err, EngineError::MalformedInput(msg) if msg.contains("0xfe")));
    }

    #[test]
    fn rejects_unknown_node_tag_and_trailing_bytes() {
        assert!(matches!(decode(&[0x0b]), Err(EngineError::MalformedInput(_))));
        assert!(matches!(decode(&[0x00, 0x01, 0x00]), Err(EngineError::MalformedInput(_))));
    }

    #[test]
    fn rejects_unknown_primitive_name_on_encode() {
        assert!(encode(&Node::prim("CDAR")).is_err());
    }

    #[test]
    fn rejects_annotations_that_cannot_be_split_back() {
        let spaced = Node::prim_annotated("nat", vec![], &["%a b"]);
        assert!(matches!(encode(&spaced), Err(EngineError::MalformedInput(_))));
        let empty = Node::Prim {
            prim: "pair".to_string(),
            args: vec![Node::prim("nat"), Node::prim("nat"), Node::prim("nat")],
            annots: vec![String::new()],
        };
        assert!(matches!(encode(&empty), Err(EngineError::MalformedInput(_))));
    }

    #[test]
    fn depth_limit_is_enforced() {
        let mut node = Node::int(0);
        for _ in 0..20 {
            node = Node::prim_with("Some", vec![node]);
        }
        let bytes = encode(&node).unwrap();
        assert!(matches!(
            decode_with_depth(&bytes, 10),
            Err(EngineError::DepthExceeded(10))
        ));
        assert_eq!(decode_with_depth(&bytes, 64).unwrap(), node);
    }
}
