//! Chromaprint fingerprint codec
//!
//! - `bitpack`: fixed-width (3-bit and 5-bit) code arrays
//! - `fingerprint`: binary and base64 text fingerprint format

mod bitpack;
mod fingerprint;

pub use bitpack::{pack, pack_into, packed_len, unpack, EXCEPTIONAL_BITS, NORMAL_BITS};
pub use fingerprint::{
    decode_text, encode_text, validate, validate_str, Fingerprint, MAX_VALUES,
};
