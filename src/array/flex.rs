//! BITLEAF - Flex Compression
//! Dictionary-style encoding of an integer node: a sorted table of the
//! distinct values followed by one rank per element.
//!
//! ```text
//! || header || values: v_size x v_width bits || indices: size x ndx_width bits ||
//! ```
//! Values are two's complement at `v_width` bits, strictly ascending.
//! Indices are unsigned ranks into the value table, at least 1 bit wide.
//! Whether a node is stored this way is decided in [`super::compressor`].

use crate::array::bitfield::{read_bitfield, sign_extend, BfIterator};
use crate::array::header::{calc_flex_byte_size, Header, HEADER_SIZE, MAX_FLEX_INDEX_WIDTH};
use crate::types::NodeFlags;

/// Bits needed to hold `v` as two's complement.
pub fn signed_bits(v: i64) -> u8 {
    let magnitude = if v >= 0 { v as u64 } else { !v as u64 };
    1 + unsigned_bits(magnitude)
}

/// Bits needed to hold `v` unsigned (0 for 0).
pub fn unsigned_bits(v: u64) -> u8 {
    (64 - v.leading_zeros()) as u8
}

/// Value and index tables of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlexPlan {
    pub values: Vec<i64>,
    pub indices: Vec<usize>,
    pub v_width: u8,
    pub ndx_width: u8,
}

impl FlexPlan {
    /// Build the tables for a non-empty `src`.
    pub fn build(src: &[i64]) -> FlexPlan {
        debug_assert!(!src.is_empty());
        let mut values = src.to_vec();
        values.sort_unstable();
        values.dedup();
        let indices: Vec<usize> = src
            .iter()
            .map(|v| values.partition_point(|x| x < v))
            .collect();

        let (min, max) = (values[0], values[values.len() - 1]);
        let v_width = signed_bits(min).max(signed_bits(max));
        let ndx_width = unsigned_bits(values.len() as u64 - 1).max(1);
        debug_assert!(ndx_width <= MAX_FLEX_INDEX_WIDTH);
        FlexPlan {
            values,
            indices,
            v_width,
            ndx_width,
        }
    }

    /// Bytes the flex node would occupy, header included.
    pub fn byte_size(&self) -> usize {
        calc_flex_byte_size(self.v_width, self.values.len(), self.ndx_width, self.indices.len())
    }

    pub fn header(&self, flags: NodeFlags) -> Header {
        Header::flex(
            flags,
            self.v_width,
            self.ndx_width,
            self.values.len(),
            self.indices.len(),
        )
    }

    /// Serialize as a standalone flex node.
    pub fn encode(&self, flags: NodeFlags) -> Vec<u8> {
        let header = self.header(flags);
        let mut bytes = vec![0u8; header.byte_size()];
        header.write_to(&mut bytes);
        self.write_tables(&mut bytes[HEADER_SIZE..]);
        bytes
    }

    pub(crate) fn write_tables(&self, payload: &mut [u8]) {
        let v_width = usize::from(self.v_width);
        let mut it = BfIterator::new(&mut *payload, 0, self.v_width, v_width, 0);
        for &v in &self.values {
            it.set_value(v as u64);
            it.advance();
        }
        let ndx_offset = v_width * self.values.len();
        let ndx_width = usize::from(self.ndx_width);
        let mut it = BfIterator::new(&mut *payload, ndx_offset, self.ndx_width, ndx_width, 0);
        for &ndx in &self.indices {
            it.set_value(ndx as u64);
            it.advance();
        }
    }
}

#[inline]
fn value_at(data: &[u8], v_width: u8, rank: usize) -> i64 {
    sign_extend(read_bitfield(data, rank * usize::from(v_width), v_width), v_width)
}

#[inline]
fn rank_at(data: &[u8], v_width: u8, ndx_width: u8, v_size: usize, ndx: usize) -> usize {
    let offset = usize::from(v_width) * v_size + ndx * usize::from(ndx_width);
    read_bitfield(data, offset, ndx_width) as usize
}

/// Element `ndx` of a flex payload.
pub(crate) fn get_flex(data: &[u8], v_width: u8, ndx_width: u8, v_size: usize, ndx: usize) -> i64 {
    value_at(data, v_width, rank_at(data, v_width, ndx_width, v_size, ndx))
}

/// Every element of a flex payload, walking the index table once.
pub(crate) fn decode_flex(data: &[u8], v_width: u8, ndx_width: u8, v_size: usize, size: usize) -> Vec<i64> {
    let offset = usize::from(v_width) * v_size;
    let mut it = BfIterator::new(data, offset, ndx_width, usize::from(ndx_width), 0);
    (0..size)
        .map(|_| value_at(data, v_width, it.post_advance() as usize))
        .collect()
}

/// First index in `[begin, end)` whose element equals `value`: a binary
/// search of the value table, then a scan of the index table for the rank.
pub(crate) fn find_flex(
    data: &[u8],
    v_width: u8,
    ndx_width: u8,
    v_size: usize,
    value: i64,
    begin: usize,
    end: usize,
) -> Option<usize> {
    let (mut lo, mut hi) = (0, v_size);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if value_at(data, v_width, mid) < value {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    if lo == v_size || value_at(data, v_width, lo) != value {
        return None;
    }
    let rank = lo as u64;
    let offset = usize::from(v_width) * v_size;
    let mut it = BfIterator::new(data, offset, ndx_width, usize::from(ndx_width), begin);
    (begin..end).find(|_| it.post_advance() == rank)
}
