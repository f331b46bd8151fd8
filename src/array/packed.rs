//! BITLEAF - Packed Compression
//! Every element stored as two's complement at the smallest bit width that
//! holds both the minimum and the maximum, with no index table.
//!
//! ```text
//! || header || values: size x v_width bits ||
//! ```

use crate::array::bitfield::{read_bitfield, sign_extend, BfIterator};
use crate::array::flex::signed_bits;

/// Value width for the packed encoding of `src`.
pub fn packed_width(src: &[i64]) -> u8 {
    match (src.iter().min(), src.iter().max()) {
        (Some(&min), Some(&max)) => signed_bits(min).max(signed_bits(max)),
        _ => 0,
    }
}

pub(crate) fn write_packed(payload: &mut [u8], v_width: u8, values: &[i64]) {
    let mut it = BfIterator::new(payload, 0, v_width, usize::from(v_width), 0);
    for &v in values {
        it.set_value(v as u64);
        it.advance();
    }
}

#[inline]
pub(crate) fn get_packed(data: &[u8], v_width: u8, ndx: usize) -> i64 {
    sign_extend(read_bitfield(data, ndx * usize::from(v_width), v_width), v_width)
}

pub(crate) fn decode_packed(data: &[u8], v_width: u8, size: usize) -> Vec<i64> {
    let mut it = BfIterator::new(data, 0, v_width, usize::from(v_width), 0);
    (0..size)
        .map(|_| sign_extend(it.post_advance(), v_width))
        .collect()
}

/// First index in `[begin, end)` holding `value`.
pub(crate) fn find_packed(data: &[u8], v_width: u8, value: i64, begin: usize, end: usize) -> Option<usize> {
    if signed_bits(value) > v_width {
        return None;
    }
    let mut it = BfIterator::new(data, 0, v_width, usize::from(v_width), begin);
    (begin..end).find(|_| sign_extend(it.post_advance(), v_width) == value)
}
