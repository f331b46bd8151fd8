//! BITLEAF - Node Header Codec
//! Encodes and decodes the 8-byte header that precedes every node.
//!
//! ## Plain layout (wtype Bits, Multiply, Ignore)
//! ```text
//! byte:  0      1      2      3          4                              5      6      7
//!       [capacity >> 3 (BE24)][reserved][inner|refs|ctx|wtype:2|wcode:3][size (BE24)      ]
//! ```
//! `wcode` is `0` for width 0 and `log2(width) + 1` otherwise, giving the
//! widths 0, 1, 2, 4, 8, 16, 32 and 64.
//!
//! ## Flex layout (wtype Extend)
//! ```text
//! byte:  0      1      2      3                      4                                   5      6      7
//!       [v_size (BE24)       ][ndx_w lo:2|v_w - 1:6][inner|refs|ctx|wtype=11|ndx_w hi:3][size (BE24)      ]
//! ```
//! Compressed nodes are never grown in place, so their capacity is their byte
//! size and bytes 0..3 are free to hold the value-table count. A flex index
//! width is at least 1; an Extend header with index width 0 is a packed
//! node, whose `v_size` bytes are zero:
//! ```text
//! byte:  0      1      2      3                      4                                   5      6      7
//!       [0                   ][0:2|v_w - 1:6        ][inner|refs|ctx|wtype=11|0:3       ][size (BE24)      ]
//! ```
//! These layouts are specific to this crate.

use crate::error::{BitleafError, Result};
use crate::types::{align8, NodeFlags};

/// Number of bytes used by every header.
pub const HEADER_SIZE: usize = 8;
/// Maximum number of elements in a node.
pub const MAX_ARRAY_SIZE: usize = 0x00ff_ffff;
/// Maximum number of payload bytes in a node.
pub const MAX_ARRAY_PAYLOAD_ALIGNED: usize = 0x07ff_ffc0;
/// Largest index-table width a flex header can describe.
pub const MAX_FLEX_INDEX_WIDTH: u8 = 31;

/// How the width field turns into a byte size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WidthType {
    /// `width` bits per element.
    Bits = 0,
    /// `width` bytes per element.
    Multiply = 1,
    /// One byte per element; width ignored.
    Ignore = 2,
    /// Compressed layout (packed or flex).
    Extend = 3,
}

impl WidthType {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => WidthType::Bits,
            1 => WidthType::Multiply,
            2 => WidthType::Ignore,
            _ => WidthType::Extend,
        }
    }
}

/// The physical encoding a header describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Plain { wtype: WidthType, width: u8 },
    /// Every element at `v_width` bits, two's complement.
    Packed { v_width: u8 },
    Flex { v_width: u8, ndx_width: u8, v_size: usize },
}

/// A decoded node header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub flags: NodeFlags,
    /// Bytes reserved for the node, header included.
    pub capacity: usize,
    /// Logical element count (`size_B` for flex nodes).
    pub size: usize,
    pub encoding: Encoding,
}

/// Width code stored in the low three bits of byte 4.
pub fn encode_width(width: u8) -> u8 {
    let mut code = 0u8;
    let mut w = width;
    while w != 0 {
        code += 1;
        w >>= 1;
    }
    debug_assert!(code < 8, "width {width} does not fit a plain header");
    code
}

pub fn decode_width(code: u8) -> u8 {
    ((1u16 << (code & 0x7)) >> 1) as u8
}

/// Bytes occupied by a plain node, header included, rounded up to 8.
pub fn calc_byte_size(wtype: WidthType, size: usize, width: u8) -> usize {
    let num_bytes = match wtype {
        WidthType::Bits => (size * usize::from(width) + 7) >> 3,
        WidthType::Multiply => size * usize::from(width),
        WidthType::Ignore => size,
        WidthType::Extend => {
            debug_assert!(false, "flex nodes are sized with calc_flex_byte_size");
            0
        }
    };
    align8(num_bytes) + HEADER_SIZE
}

/// Bytes occupied by a flex node, header included, rounded up to 8.
pub fn calc_flex_byte_size(v_width: u8, v_size: usize, ndx_width: u8, ndx_size: usize) -> usize {
    let bits = usize::from(v_width) * v_size + usize::from(ndx_width) * ndx_size;
    align8((bits + 7) >> 3) + HEADER_SIZE
}

#[inline]
fn get_be24(bytes: &[u8]) -> usize {
    (usize::from(bytes[0]) << 16) | (usize::from(bytes[1]) << 8) | usize::from(bytes[2])
}

#[inline]
fn put_be24(bytes: &mut [u8], value: usize) {
    debug_assert!(value <= MAX_ARRAY_SIZE);
    bytes[0] = (value >> 16) as u8;
    bytes[1] = (value >> 8) as u8;
    bytes[2] = value as u8;
}

impl Header {
    pub fn plain(flags: NodeFlags, wtype: WidthType, width: u8, size: usize, capacity: usize) -> Self {
        debug_assert!(wtype != WidthType::Extend);
        Self {
            flags,
            capacity,
            size,
            encoding: Encoding::Plain { wtype, width },
        }
    }

    pub fn packed(flags: NodeFlags, v_width: u8, size: usize) -> Self {
        Self {
            flags,
            capacity: calc_flex_byte_size(v_width, size, 0, 0),
            size,
            encoding: Encoding::Packed { v_width },
        }
    }

    pub fn flex(flags: NodeFlags, v_width: u8, ndx_width: u8, v_size: usize, size: usize) -> Self {
        Self {
            flags,
            capacity: calc_flex_byte_size(v_width, v_size, ndx_width, size),
            size,
            encoding: Encoding::Flex {
                v_width,
                ndx_width,
                v_size,
            },
        }
    }

    /// Bytes actually used by the node, header included.
    pub fn byte_size(&self) -> usize {
        match self.encoding {
            Encoding::Plain { wtype, width } => calc_byte_size(wtype, self.size, width),
            Encoding::Packed { v_width } => calc_flex_byte_size(v_width, self.size, 0, 0),
            Encoding::Flex {
                v_width,
                ndx_width,
                v_size,
            } => calc_flex_byte_size(v_width, v_size, ndx_width, self.size),
        }
    }

    /// True for the packed and flex encodings.
    pub fn is_compressed(&self) -> bool {
        !matches!(self.encoding, Encoding::Plain { .. })
    }

    /// Serialize into the first 8 bytes of `out`.
    pub fn write_to(&self, out: &mut [u8]) {
        let h = &mut out[..HEADER_SIZE];
        let mut flags = 0u8;
        if self.flags.is_inner_bptree_node {
            flags |= 0x80;
        }
        if self.flags.has_refs {
            flags |= 0x40;
        }
        if self.flags.context_flag {
            flags |= 0x20;
        }
        match self.encoding {
            Encoding::Plain { wtype, width } => {
                let capacity = self.capacity >> 3;
                h[0] = (capacity >> 16) as u8;
                h[1] = (capacity >> 8) as u8;
                h[2] = capacity as u8;
                h[3] = 0;
                h[4] = flags | ((wtype as u8) << 3) | encode_width(width);
            }
            Encoding::Packed { v_width } => {
                debug_assert!((1..=64).contains(&v_width));
                put_be24(&mut h[0..3], 0);
                h[3] = (v_width - 1) & 0x3f;
                h[4] = flags | ((WidthType::Extend as u8) << 3);
            }
            Encoding::Flex {
                v_width,
                ndx_width,
                v_size,
            } => {
                debug_assert!((1..=64).contains(&v_width));
                debug_assert!((1..=MAX_FLEX_INDEX_WIDTH).contains(&ndx_width));
                put_be24(&mut h[0..3], v_size);
                h[3] = ((ndx_width & 0x3) << 6) | ((v_width - 1) & 0x3f);
                h[4] = flags | ((WidthType::Extend as u8) << 3) | ((ndx_width >> 2) & 0x7);
            }
        }
        put_be24(&mut h[5..8], self.size);
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        self.write_to(&mut out);
        out
    }

    /// Decode and sanity-check a header.
    pub fn decode(bytes: &[u8]) -> Result<Header> {
        if bytes.len() < HEADER_SIZE {
            return Err(BitleafError::Corruption(format!(
                "node header truncated to {} bytes",
                bytes.len()
            )));
        }
        let h4 = bytes[4];
        let flags = NodeFlags {
            is_inner_bptree_node: h4 & 0x80 != 0,
            has_refs: h4 & 0x40 != 0,
            context_flag: h4 & 0x20 != 0,
        };
        let size = get_be24(&bytes[5..8]);
        let header = match WidthType::from_bits(h4 >> 3) {
            WidthType::Extend => {
                let v_width = (bytes[3] & 0x3f) + 1;
                let ndx_width = ((h4 & 0x7) << 2) | (bytes[3] >> 6);
                let v_size = get_be24(&bytes[0..3]);
                if ndx_width == 0 {
                    if v_size != 0 {
                        return Err(BitleafError::Corruption(format!(
                            "packed node claims a value table of {v_size}"
                        )));
                    }
                    return Ok(Header::packed(flags, v_width, size));
                }
                if v_size == 0 || v_size > size {
                    return Err(BitleafError::Corruption(format!(
                        "flex node with {v_size} values for {size} elements"
                    )));
                }
                Header::flex(flags, v_width, ndx_width, v_size, size)
            }
            wtype => {
                let capacity = get_be24(&bytes[0..3]) << 3;
                let header = Header::plain(flags, wtype, decode_width(h4 & 0x7), size, capacity);
                if header.byte_size() > capacity {
                    return Err(BitleafError::Corruption(format!(
                        "node needs {} bytes but reserves {}",
                        header.byte_size(),
                        capacity
                    )));
                }
                header
            }
        };
        Ok(header)
    }
}
