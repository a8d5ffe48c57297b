//! Wire codec: untyped Micheline trees and their binary, JSON and text forms.

pub mod binary;
pub mod json;
pub mod node;
pub mod primitives;
pub mod text;

pub use binary::{decode, encode, pack, unpack};
pub use json::{from_json, from_json_bytes, to_json, to_json_bytes};
pub use node::Node;
pub use text::{format_default, format_inline, format_michelson, parse_expr};
