//! Compressed fingerprint format
//!
//! ```text
//! byte 0..3   big-endian (version << 24) | total_values
//! byte 4..    3-bit normal codes
//! [next]      5-bit exceptional codes, one per normal code equal to 7
//! ```
//!
//! Every hash (XOR-ed with its predecessor, except the first) is written as
//! the distances between its set bits, starting from bit 0 and terminated by
//! a zero code. Distances of 7 or more are written as a 7 followed by an
//! exceptional code holding the remainder.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::bitpack::{self, EXCEPTIONAL_BITS, NORMAL_BITS};
use crate::error::{FpIndexError, Result};

/// Normal code value that escapes into the exceptional array
const ESCAPE_CODE: u8 = 7;

/// Largest value count the 24-bit header field can carry
pub const MAX_VALUES: usize = 0x00ff_ffff;

/// Raw fingerprint data
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Version of the algorithm that generated the fingerprint
    pub version: u8,
    /// The hash sequence, in temporal order
    pub hashes: Vec<u32>,
}

#[derive(Clone, Copy, Debug)]
struct Header {
    version: u8,
    total_values: usize,
}

impl Fingerprint {
    pub fn new(version: u8, hashes: Vec<u32>) -> Self {
        Self { version, hashes }
    }

    /// Parse binary fingerprint data
    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = read_header(data)?;
        let (mut codes, normal_len) = read_normal_codes(&data[4..], header.total_values)?;
        let exceptional = data.get(4 + normal_len..).unwrap_or(&[]);
        resolve_exceptional_codes(&mut codes, exceptional)?;

        Ok(Self {
            version: header.version,
            hashes: reconstruct_hashes(&codes, header.total_values),
        })
    }

    /// Parse a base64-encoded fingerprint string
    pub fn decode_str(text: &str) -> Result<Self> {
        let data = decode_text(text)?;
        Self::decode(&data)
    }

    /// Serialize to the binary fingerprint format
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.hashes.is_empty() {
            return Err(FpIndexError::invalid_fingerprint(
                "fingerprint contains no items",
            ));
        }
        if self.hashes.len() > MAX_VALUES {
            return Err(FpIndexError::invalid_fingerprint(format!(
                "fingerprint has {} items, at most {} can be encoded",
                self.hashes.len(),
                MAX_VALUES
            )));
        }

        let mut normal = Vec::with_capacity(self.hashes.len() * 4);
        let mut exceptional = Vec::new();

        let mut previous = 0u32;
        for (i, &hash) in self.hashes.iter().enumerate() {
            let mut value = if i == 0 { hash } else { hash ^ previous };
            previous = hash;

            let mut last_bit = 0u32;
            while value != 0 {
                let bit = value.trailing_zeros() + 1;
                let delta = (bit - last_bit) as u8;
                if delta >= ESCAPE_CODE {
                    normal.push(ESCAPE_CODE);
                    exceptional.push(delta - ESCAPE_CODE);
                } else {
                    normal.push(delta);
                }
                last_bit = bit;
                value &= value - 1;
            }
            normal.push(0);
        }

        let header = ((self.version as u32) << 24) | self.hashes.len() as u32;
        let normal_len = normal_codes_len(normal.len());

        let mut out = Vec::with_capacity(
            4 + normal_len + bitpack::packed_len(EXCEPTIONAL_BITS, exceptional.len()),
        );
        out.extend_from_slice(&header.to_be_bytes());
        bitpack::pack_into(NORMAL_BITS, &normal, &mut out);
        out.resize(4 + normal_len, 0);
        bitpack::pack_into(EXCEPTIONAL_BITS, &exceptional, &mut out);

        Ok(out)
    }

    /// Serialize to a base64-encoded fingerprint string
    pub fn encode_string(&self) -> Result<String> {
        Ok(encode_text(&self.encode()?))
    }
}

/// Check binary fingerprint data without building the hash array
pub fn validate(data: &[u8]) -> Result<()> {
    let header = read_header(data)?;
    let (mut codes, normal_len) = read_normal_codes(&data[4..], header.total_values)?;
    let exceptional = data.get(4 + normal_len..).unwrap_or(&[]);
    resolve_exceptional_codes(&mut codes, exceptional)
}

/// Check a base64-encoded fingerprint string
pub fn validate_str(text: &str) -> Result<()> {
    validate(&decode_text(text)?)
}

/// Decode the base64 text form into binary fingerprint data
pub fn decode_text(text: &str) -> Result<Vec<u8>> {
    if text.is_empty() {
        return Err(FpIndexError::invalid_fingerprint("empty fingerprint string"));
    }
    URL_SAFE_NO_PAD
        .decode(text)
        .map_err(|e| FpIndexError::invalid_fingerprint(format!("decoding failed: {}", e)))
}

/// Encode binary fingerprint data to its base64 text form
pub fn encode_text(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Byte length reserved for `count` normal codes.
///
/// This is one byte more than the packed size when the codes end exactly on
/// a byte boundary; the exceptional codes start after it.
#[inline]
fn normal_codes_len(count: usize) -> usize {
    (count * NORMAL_BITS as usize + 8) / 8
}

fn read_header(data: &[u8]) -> Result<Header> {
    if data.len() < 4 {
        return Err(FpIndexError::invalid_fingerprint(
            "encoded fingerprint is less than 4 bytes",
        ));
    }

    let header = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    let total_values = (header & 0x00ff_ffff) as usize;
    if total_values == 0 {
        return Err(FpIndexError::invalid_fingerprint(
            "fingerprint contains no items",
        ));
    }

    Ok(Header {
        version: (header >> 24) as u8,
        total_values,
    })
}

/// Unpack normal codes up to and including the `total_values`-th terminator.
///
/// Returns the codes together with the number of bytes they occupy.
fn read_normal_codes(data: &[u8], total_values: usize) -> Result<(Vec<u8>, usize)> {
    let mut codes = bitpack::unpack(NORMAL_BITS, data, None);

    let mut terminators = 0;
    let end = codes.iter().position(|&code| {
        if code == 0 {
            terminators += 1;
        }
        terminators == total_values
    });

    match end {
        Some(end) => {
            codes.truncate(end + 1);
            let len = normal_codes_len(codes.len());
            Ok((codes, len))
        }
        None => Err(FpIndexError::invalid_fingerprint(
            "not enough data to decode normal bits",
        )),
    }
}

/// Add the exceptional remainders onto every escape code, in order
fn resolve_exceptional_codes(codes: &mut [u8], data: &[u8]) -> Result<()> {
    let escapes = codes.iter().filter(|&&code| code == ESCAPE_CODE).count();
    if escapes == 0 {
        return Ok(());
    }

    let exceptional = bitpack::unpack(EXCEPTIONAL_BITS, data, Some(escapes));
    if exceptional.len() != escapes {
        return Err(FpIndexError::invalid_fingerprint(
            "not enough data to decode exceptional bits",
        ));
    }

    let mut remainders = exceptional.into_iter();
    for code in codes.iter_mut().filter(|code| **code == ESCAPE_CODE) {
        if let Some(remainder) = remainders.next() {
            *code += remainder;
        }
    }

    Ok(())
}

/// Rebuild hashes from fully resolved codes
fn reconstruct_hashes(codes: &[u8], total_values: usize) -> Vec<u32> {
    let mut hashes = vec![0u32; total_values];
    let mut hi = 0usize;
    let mut last_bit = 0u32;

    for &code in codes {
        if code == 0 {
            if hi > 0 {
                hashes[hi] ^= hashes[hi - 1];
            }
            last_bit = 0;
            hi += 1;
        } else {
            last_bit = last_bit.saturating_add(code as u32);
            // positions past bit 31 set nothing
            if let Some(bit) = 1u32.checked_shl(last_bit - 1) {
                hashes[hi] |= bit;
            }
        }
    }

    hashes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(fp: &Fingerprint) -> Fingerprint {
        let data = fp.encode().unwrap();
        validate(&data).unwrap();
        Fingerprint::decode(&data).unwrap()
    }

    #[test]
    fn test_roundtrip_repeated_hash() {
        let fp = Fingerprint::new(1, vec![5, 5, 9]);
        assert_eq!(roundtrip(&fp), fp);
    }

    #[test]
    fn test_encode_small_values() {
        // 5 -> deltas [1, 2], 5^5 = 0 -> [], 9^5 = 12 -> [3, 1]
        let fp = Fingerprint::new(1, vec![5, 5, 9]);
        let data = fp.encode().unwrap();

        assert_eq!(&data[..4], &[0x01, 0x00, 0x00, 0x03]);
        assert_eq!(
            bitpack::unpack(NORMAL_BITS, &data[4..], Some(7)),
            vec![1, 2, 0, 0, 3, 1, 0]
        );
        assert_eq!(data.len(), 4 + normal_codes_len(7));
    }

    #[test]
    fn test_roundtrip_exceptional_bits() {
        let fp = Fingerprint::new(
            2,
            vec![0x8000_0000, 0x0000_0080, 0xffff_ffff, 0, 0x4000_0001, 0x0000_0040],
        );
        assert_eq!(roundtrip(&fp), fp);
    }

    #[test]
    fn test_roundtrip_boundary_lengths() {
        // [7, 0] then six [0]: 8 codes end exactly on a byte boundary
        let fp = Fingerprint::new(0, vec![0x80; 7]);
        assert_eq!(roundtrip(&fp), fp);

        let fp = Fingerprint::new(255, vec![0; 16]);
        assert_eq!(roundtrip(&fp), fp);
    }

    #[test]
    fn test_roundtrip_pseudo_random() {
        let mut state = 0x2545_f491u32;
        let hashes: Vec<u32> = (0..500)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state
            })
            .collect();
        let fp = Fingerprint::new(1, hashes);
        assert_eq!(roundtrip(&fp), fp);
    }

    #[test]
    fn test_decode_too_short() {
        for len in 0..4 {
            let data = vec![0u8; len];
            assert!(matches!(
                Fingerprint::decode(&data),
                Err(FpIndexError::InvalidFingerprint(_))
            ));
            assert!(validate(&data).is_err());
        }
    }

    #[test]
    fn test_decode_no_items() {
        let err = Fingerprint::decode(&[1, 0, 0, 0, 0xff]).unwrap_err();
        assert!(err.to_string().contains("no items"));
    }

    #[test]
    fn test_decode_truncated_normal_codes() {
        let data = Fingerprint::new(1, vec![0x1234_5678, 0x9abc_def0]).encode().unwrap();
        // claim one more value than the codes terminate
        let mut corrupt = data;
        corrupt[3] = 3;
        let err = validate(&corrupt[..5]).unwrap_err();
        assert!(err.to_string().contains("normal bits"));
    }

    #[test]
    fn test_decode_missing_exceptional_codes() {
        let data = Fingerprint::new(1, vec![0x8000_0000]).encode().unwrap();
        let normal_end = 4 + normal_codes_len(2);
        let err = Fingerprint::decode(&data[..normal_end]).unwrap_err();
        assert!(err.to_string().contains("exceptional bits"));
    }

    #[test]
    fn test_encode_empty() {
        assert!(Fingerprint::new(1, vec![]).encode().is_err());
    }

    #[test]
    fn test_text_roundtrip() {
        let fp = Fingerprint::new(1, vec![0xdead_beef, 0xdead_beee, 7]);
        let text = fp.encode_string().unwrap();
        assert!(!text.contains('='));
        assert!(!text.contains('+') && !text.contains('/'));
        assert_eq!(Fingerprint::decode_str(&text).unwrap(), fp);
        validate_str(&text).unwrap();
    }

    #[test]
    fn test_decode_text_errors() {
        assert!(matches!(
            decode_text(""),
            Err(FpIndexError::InvalidFingerprint(_))
        ));
        assert!(matches!(
            Fingerprint::decode_str("not base64!"),
            Err(FpIndexError::InvalidFingerprint(_))
        ));
    }
}
