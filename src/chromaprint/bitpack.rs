//! Fixed-width bit packing
//!
//! Codes are stored MSB-first: the first code occupies the highest bits of
//! the first byte and codes run contiguously across byte boundaries. The
//! final partial byte is zero-padded.
//!
//! ```text
//! 3-bit codes [1, 2, 3, 4]  ->  001 010 01|1 100 0000  ->  0x29 0xC0
//! ```

/// Width of a normal (span) code
pub const NORMAL_BITS: u32 = 3;

/// Width of an exceptional (extension) code
pub const EXCEPTIONAL_BITS: u32 = 5;

/// Number of bytes needed to hold `count` codes of `width` bits
#[inline]
pub fn packed_len(width: u32, count: usize) -> usize {
    (count * width as usize + 7) / 8
}

/// Pack `values` into a minimal byte buffer of `width`-bit codes.
///
/// Only the low `width` bits of each value are kept.
pub fn pack(width: u32, values: &[u8]) -> Vec<u8> {
    debug_assert!((1..=8).contains(&width));

    let mut out = Vec::with_capacity(packed_len(width, values.len()));
    pack_into(width, values, &mut out);
    out
}

/// Append packed `width`-bit codes to `out`
pub fn pack_into(width: u32, values: &[u8], out: &mut Vec<u8>) {
    let mask = (1u32 << width) - 1;
    let mut acc: u32 = 0;
    let mut bits = 0u32;

    for &value in values {
        acc = (acc << width) | (value as u32 & mask);
        bits += width;
        while bits >= 8 {
            bits -= 8;
            out.push((acc >> bits) as u8);
        }
        acc &= (1u32 << bits) - 1;
    }

    if bits > 0 {
        out.push((acc << (8 - bits)) as u8);
    }
}

/// Unpack `width`-bit codes from `data`.
///
/// Reads until the buffer is exhausted, or until `limit` codes were produced
/// when a limit is given. Trailing bits that do not form a whole code are
/// ignored.
pub fn unpack(width: u32, data: &[u8], limit: Option<usize>) -> Vec<u8> {
    debug_assert!((1..=8).contains(&width));

    let available = data.len() * 8 / width as usize;
    let count = limit.map_or(available, |limit| limit.min(available));

    let mask = (1u32 << width) - 1;
    let mut out = Vec::with_capacity(count);
    let mut acc: u32 = 0;
    let mut bits = 0u32;

    for &byte in data {
        if out.len() == count {
            break;
        }
        acc = (acc << 8) | byte as u32;
        bits += 8;
        while bits >= width && out.len() < count {
            bits -= width;
            out.push(((acc >> bits) & mask) as u8);
        }
        acc &= (1u32 << bits) - 1;
    }

    out
}
