//! BITLEAF - Integer Arrays
//! Bit-packed integer nodes, the building block of every leaf.
//!
//! An [`Array`] stores up to 2^24 signed integers. Elements are packed at
//! the smallest width in {0, 1, 2, 4, 8, 16, 32, 64} bits that holds every
//! value; writing a value outside the current range re-encodes the whole
//! node at a wider width. A node may also be compressed, either packed at
//! an arbitrary width or flex-encoded (see [`compressor`]); reads work on
//! every encoding, mutations expand a compressed node back to the plain
//! form first.

pub mod bitfield;
pub mod bptree;
pub mod compressor;
pub mod flex;
pub mod header;
pub mod int_null;
pub mod node;
pub mod packed;

use crate::alloc::snapshot::ArrayWriter;
use crate::alloc::Allocator;
use crate::error::{BitleafError, Result};
use crate::types::{MemRef, NodeFlags, Ref};

use bitfield::{read_bitfield, sign_extend, write_bitfield};
use header::{Encoding, Header, WidthType};
use node::Node;

/// Smallest element width (in bits) that can hold `v`.
///
/// Values 0..=15 use the unsigned widths 0, 1, 2 and 4; everything else is
/// stored as two's complement in 8, 16, 32 or 64 bits.
pub fn bit_width(v: i64) -> u8 {
    const SMALL: [u8; 16] = [0, 1, 2, 2, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4];
    if (v as u64) >> 4 == 0 {
        return SMALL[v as usize];
    }
    let v = if v < 0 { !v } else { v };
    if v >> 31 != 0 {
        64
    } else if v >> 15 != 0 {
        32
    } else if v >> 7 != 0 {
        16
    } else {
        8
    }
}

/// Smallest value storable at `width`.
pub const fn lbound_for_width(width: u8) -> i64 {
    match width {
        0 | 1 | 2 | 4 => 0,
        8 => -0x80,
        16 => -0x8000,
        32 => -0x8000_0000,
        _ => i64::MIN,
    }
}

/// Largest value storable at `width`.
pub const fn ubound_for_width(width: u8) -> i64 {
    match width {
        0 => 0,
        1 => 1,
        2 => 3,
        4 => 15,
        8 => 0x7F,
        16 => 0x7FFF,
        32 => 0x7FFF_FFFF,
        _ => i64::MAX,
    }
}

/// Read element `ndx` of a packed payload.
#[inline]
pub(crate) fn get_direct(data: &[u8], width: u8, ndx: usize) -> i64 {
    let raw = read_bitfield(data, ndx * usize::from(width), width);
    if width < 8 {
        raw as i64
    } else {
        sign_extend(raw, width)
    }
}

/// Write element `ndx` of a packed payload.
#[inline]
pub(crate) fn set_direct(data: &mut [u8], width: u8, ndx: usize, value: i64) {
    write_bitfield(data, ndx * usize::from(width), width, value as u64);
}

/// Serialize `values` as a standalone packed node at minimal width.
pub(crate) fn encode_plain(flags: NodeFlags, values: &[i64]) -> Vec<u8> {
    let width = values.iter().map(|&v| bit_width(v)).max().unwrap_or(0);
    let byte_size = header::calc_byte_size(WidthType::Bits, values.len(), width);
    let mut bytes = vec![0u8; byte_size];
    Header::plain(flags, WidthType::Bits, width, values.len(), byte_size).write_to(&mut bytes);
    let payload = &mut bytes[header::HEADER_SIZE..];
    for (i, &v) in values.iter().enumerate() {
        set_direct(payload, width, i, v);
    }
    bytes
}

/// Accessor for an integer node.
#[derive(Debug, Clone)]
pub struct Array {
    node: Node,
}

impl Array {
    /// A detached accessor; call `create` or `init_from_ref` next.
    pub fn new(alloc: Allocator) -> Self {
        Self {
            node: Node::new(alloc),
        }
    }

    /// Attach a new accessor to the node at `r`.
    pub fn from_ref(alloc: Allocator, r: Ref) -> Result<Self> {
        let mut array = Self::new(alloc);
        array.init_from_ref(r)?;
        Ok(array)
    }

    /// Allocate an empty node.
    pub fn create(&mut self, flags: NodeFlags) -> Result<()> {
        self.create_filled(flags, 0, 0)
    }

    /// Allocate a node of `size` copies of `value`.
    pub fn create_filled(&mut self, flags: NodeFlags, size: usize, value: i64) -> Result<()> {
        let width = bit_width(value);
        self.node.create(WidthType::Bits, flags, width, size)?;
        if value != 0 {
            self.node.payload_mut(|data| {
                for i in 0..size {
                    set_direct(data, width, i, value);
                }
            });
        }
        Ok(())
    }

    pub fn init_from_ref(&mut self, r: Ref) -> Result<()> {
        self.node.init_from_ref(r)?;
        match self.node.header().encoding {
            Encoding::Plain {
                wtype: WidthType::Bits,
                ..
            }
            | Encoding::Packed { .. }
            | Encoding::Flex { .. } => Ok(()),
            Encoding::Plain { wtype, .. } => {
                self.node.detach();
                Err(BitleafError::Corruption(format!(
                    "node at {r:#x} has width type {wtype:?}, expected an integer array"
                )))
            }
        }
    }

    pub fn init_from_mem(&mut self, mem: MemRef) -> Result<()> {
        self.init_from_ref(mem.ref_)
    }

    pub fn allocator(&self) -> &Allocator {
        self.node.allocator()
    }

    pub fn get_ref(&self) -> Ref {
        self.node.get_ref()
    }

    pub fn is_attached(&self) -> bool {
        self.node.is_attached()
    }

    pub fn detach(&mut self) {
        self.node.detach();
    }

    pub fn flags(&self) -> NodeFlags {
        self.node.flags()
    }

    pub fn has_refs(&self) -> bool {
        self.node.flags().has_refs
    }

    pub fn context_flag(&self) -> bool {
        self.node.flags().context_flag
    }

    pub fn set_context_flag(&mut self, value: bool) -> Result<()> {
        self.node.copy_on_write()?;
        let flags = self.flags().with_context_flag(value);
        self.node.set_flags(flags);
        Ok(())
    }

    /// Logical number of elements, whatever the encoding.
    pub fn size(&self) -> usize {
        self.node.size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn encoding(&self) -> Encoding {
        self.node.header().encoding
    }

    pub fn is_compressed(&self) -> bool {
        self.node.header().is_compressed()
    }

    /// Element width in bits (value width for a compressed node).
    pub fn width(&self) -> u8 {
        match self.encoding() {
            Encoding::Plain { width, .. } => width,
            Encoding::Packed { v_width } | Encoding::Flex { v_width, .. } => v_width,
        }
    }

    pub fn lbound(&self) -> i64 {
        lbound_for_width(self.width())
    }

    pub fn ubound(&self) -> i64 {
        ubound_for_width(self.width())
    }

    /// Bytes used by the node, header included.
    pub fn byte_size(&self) -> usize {
        self.node.byte_size()
    }

    pub(crate) fn node_mut(&mut self) -> &mut Node {
        &mut self.node
    }

    pub fn get(&self, ndx: usize) -> i64 {
        assert!(ndx < self.size(), "index {ndx} out of bounds ({})", self.size());
        match self.encoding() {
            Encoding::Plain { width, .. } => self.node.payload(|data| get_direct(data, width, ndx)),
            Encoding::Packed { v_width } => self.node.payload(|data| packed::get_packed(data, v_width, ndx)),
            Encoding::Flex {
                v_width,
                ndx_width,
                v_size,
            } => self
                .node
                .payload(|data| flex::get_flex(data, v_width, ndx_width, v_size, ndx)),
        }
    }

    pub fn get_as_ref(&self, ndx: usize) -> Ref {
        self.get(ndx) as Ref
    }

    /// Every element, decoded in one pass.
    pub fn to_vec(&self) -> Vec<i64> {
        let size = self.size();
        match self.encoding() {
            Encoding::Plain { width, .. } => {
                self.node.payload(|data| (0..size).map(|i| get_direct(data, width, i)).collect())
            }
            Encoding::Packed { v_width } => self.node.payload(|data| packed::decode_packed(data, v_width, size)),
            Encoding::Flex {
                v_width,
                ndx_width,
                v_size,
            } => self
                .node
                .payload(|data| flex::decode_flex(data, v_width, ndx_width, v_size, size)),
        }
    }

    /// Expand a compressed node and move a read-only node into writable
    /// memory. Every mutation starts here.
    fn prepare_for_update(&mut self) -> Result<()> {
        if self.is_compressed() {
            self.decompress()?;
        }
        self.node.copy_on_write()
    }

    fn plain_width(&self) -> u8 {
        match self.encoding() {
            Encoding::Plain { width, .. } => width,
            Encoding::Packed { .. } | Encoding::Flex { .. } => {
                unreachable!("plain access on a compressed node")
            }
        }
    }

    /// Widen the node, if needed, so that `value` fits.
    pub fn ensure_minimum_width(&mut self, value: i64) -> Result<()> {
        self.prepare_for_update()?;
        let width = self.plain_width();
        if value >= lbound_for_width(width) && value <= ubound_for_width(width) {
            return Ok(());
        }
        self.expand_width(bit_width(value))
    }

    fn expand_width(&mut self, new_width: u8) -> Result<()> {
        let old_width = self.plain_width();
        debug_assert!(new_width > old_width);
        let size = self.size();
        self.node.alloc_payload(size, new_width)?;
        // Back to front: slot i at the new width never overlaps an unread
        // slot j < i at the old width.
        self.node.payload_mut(|data| {
            for i in (0..size).rev() {
                let v = get_direct(data, old_width, i);
                set_direct(data, new_width, i, v);
            }
        });
        self.allocator().metrics().record_width_expansion();
        Ok(())
    }

    pub fn set(&mut self, ndx: usize, value: i64) -> Result<()> {
        assert!(ndx < self.size(), "index {ndx} out of bounds ({})", self.size());
        self.ensure_minimum_width(value)?;
        let width = self.plain_width();
        self.node.payload_mut(|data| set_direct(data, width, ndx, value));
        Ok(())
    }

    pub fn set_as_ref(&mut self, ndx: usize, r: Ref) -> Result<()> {
        self.set(ndx, r as i64)
    }

    pub fn insert(&mut self, ndx: usize, value: i64) -> Result<()> {
        let size = self.size();
        assert!(ndx <= size, "insert position {ndx} out of bounds ({size})");
        self.prepare_for_update()?;
        let old_width = self.plain_width();
        let new_width = if value >= lbound_for_width(old_width) && value <= ubound_for_width(old_width) {
            old_width
        } else {
            bit_width(value)
        };
        self.node.alloc_payload(size + 1, new_width)?;
        self.node.payload_mut(|data| {
            if old_width == new_width && old_width >= 8 {
                let bytes = usize::from(old_width / 8);
                data.copy_within(ndx * bytes..size * bytes, (ndx + 1) * bytes);
            } else {
                for i in (ndx..size).rev() {
                    let v = get_direct(data, old_width, i);
                    set_direct(data, new_width, i + 1, v);
                }
                if new_width != old_width {
                    for i in (0..ndx).rev() {
                        let v = get_direct(data, old_width, i);
                        set_direct(data, new_width, i, v);
                    }
                }
            }
            set_direct(data, new_width, ndx, value);
        });
        if new_width != old_width {
            self.allocator().metrics().record_width_expansion();
        }
        Ok(())
    }

    pub fn add(&mut self, value: i64) -> Result<()> {
        self.insert(self.size(), value)
    }

    pub fn erase(&mut self, ndx: usize) -> Result<()> {
        let size = self.size();
        assert!(ndx < size, "index {ndx} out of bounds ({size})");
        self.prepare_for_update()?;
        let width = self.plain_width();
        self.node.payload_mut(|data| {
            if width >= 8 {
                let bytes = usize::from(width / 8);
                data.copy_within((ndx + 1) * bytes..size * bytes, ndx * bytes);
            } else {
                for i in ndx + 1..size {
                    let v = get_direct(data, width, i);
                    set_direct(data, width, i - 1, v);
                }
            }
        });
        self.node.set_size(size - 1);
        Ok(())
    }

    /// Shrink to `new_size` elements. Truncating to zero drops the width
    /// back to 0.
    pub fn truncate(&mut self, new_size: usize) -> Result<()> {
        assert!(new_size <= self.size(), "cannot truncate to a larger size");
        self.prepare_for_update()?;
        self.node.set_size(new_size);
        if new_size == 0 {
            self.node.set_width(0);
        }
        Ok(())
    }

    /// Like `truncate`, releasing the subtrees of removed refs.
    pub fn truncate_and_destroy_children(&mut self, new_size: usize) -> Result<()> {
        if self.has_refs() {
            for i in new_size..self.size() {
                destroy_child(self.allocator(), self.get(i));
            }
        }
        self.truncate(new_size)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.truncate(0)
    }

    /// Append elements `[ndx, size)` to `dst` and truncate this node to `ndx`.
    pub fn move_to(&mut self, dst: &mut Array, ndx: usize) -> Result<()> {
        let size = self.size();
        assert!(ndx <= size, "move position {ndx} out of bounds ({size})");
        let moved: Vec<i64> = self.to_vec().split_off(ndx);
        if let (Some(&lo), Some(&hi)) = (moved.iter().min(), moved.iter().max()) {
            dst.ensure_minimum_width(lo)?;
            dst.ensure_minimum_width(hi)?;
        }
        for v in moved {
            dst.add(v)?;
        }
        self.truncate(ndx)
    }

    /// First index in `[begin, end)` holding `value`. `end` is clamped to
    /// the size.
    pub fn find_first(&self, value: i64, begin: usize, end: usize) -> Option<usize> {
        let end = end.min(self.size());
        if begin >= end {
            return None;
        }
        match self.encoding() {
            Encoding::Plain { width, .. } => {
                if value < lbound_for_width(width) || value > ubound_for_width(width) {
                    return None;
                }
                self.node
                    .payload(|data| (begin..end).find(|&i| get_direct(data, width, i) == value))
            }
            Encoding::Packed { v_width } => self
                .node
                .payload(|data| packed::find_packed(data, v_width, value, begin, end)),
            Encoding::Flex {
                v_width,
                ndx_width,
                v_size,
            } => self.node.payload(|data| {
                flex::find_flex(data, v_width, ndx_width, v_size, value, begin, end)
            }),
        }
    }

    /// First index whose element is not less than `value`. Requires
    /// ascending order.
    pub fn lower_bound(&self, value: i64) -> usize {
        let (mut lo, mut hi) = (0, self.size());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.get(mid) < value {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// First index whose element is greater than `value`. Requires
    /// ascending order.
    pub fn upper_bound(&self, value: i64) -> usize {
        let (mut lo, mut hi) = (0, self.size());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.get(mid) <= value {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Wrapping sum of `[begin, end)`.
    pub fn sum(&self, begin: usize, end: usize) -> i64 {
        let end = end.min(self.size());
        (begin..end).fold(0i64, |acc, i| acc.wrapping_add(self.get(i)))
    }

    /// Add `diff` to every element of `[begin, end)`, wrapping on overflow.
    pub fn adjust(&mut self, begin: usize, end: usize, diff: i64) -> Result<()> {
        if diff == 0 {
            return Ok(());
        }
        for i in begin..end.min(self.size()) {
            let v = self.get(i);
            self.set(i, v.wrapping_add(diff))?;
        }
        Ok(())
    }

    /// Release the node. Children of a has-refs node are left alone.
    pub fn destroy(&mut self) {
        self.node.destroy();
    }

    /// Release the node and, for has-refs nodes, every subtree it refers to.
    pub fn destroy_deep(&mut self) {
        if !self.is_attached() {
            return;
        }
        if self.has_refs() {
            for v in self.to_vec() {
                destroy_child(self.allocator(), v);
            }
        }
        self.node.destroy();
    }

    /// Serialize the node (and, when `deep`, its subtrees) to `out`.
    ///
    /// With `persist`, nodes that still belong to the attached image are
    /// not rewritten; their refs stay valid in an appended image. With
    /// `compress`, plain integer leaves are written in a compressed
    /// encoding when that is smaller. The in-memory node is never changed.
    pub fn write(&self, out: &mut dyn ArrayWriter, deep: bool, persist: bool, compress: bool) -> Result<Ref> {
        write_node(self.allocator(), self.get_ref(), out, deep, persist, compress)
    }
}

/// Release the subtree rooted at the element value `v`, if it is a ref.
pub(crate) fn destroy_child(alloc: &Allocator, v: i64) {
    if v == 0 || v & 1 != 0 {
        return;
    }
    let r = v as Ref;
    match alloc.read_header(r) {
        Ok(header) if header.flags.has_refs => {
            if let Ok(mut child) = Array::from_ref(alloc.clone(), r) {
                child.destroy_deep();
            }
        }
        Ok(_) => alloc.free(r),
        Err(err) => log::warn!("skipping release of {r:#x}: {err}"),
    }
}

pub(crate) fn write_node(
    alloc: &Allocator,
    r: Ref,
    out: &mut dyn ArrayWriter,
    deep: bool,
    persist: bool,
    compress: bool,
) -> Result<Ref> {
    if persist && alloc.is_read_only(r) {
        return Ok(r);
    }
    let header = alloc.read_header(r)?;

    if header.flags.has_refs && deep {
        let mut values = Array::from_ref(alloc.clone(), r)?.to_vec();
        for v in values.iter_mut() {
            if *v != 0 && *v & 1 == 0 {
                *v = write_node(alloc, *v as Ref, out, true, persist, compress)? as i64;
            }
        }
        return out.write_array(&encode_plain(header.flags, &values));
    }

    let plain_leaf = matches!(
        header.encoding,
        Encoding::Plain {
            wtype: WidthType::Bits,
            ..
        }
    );
    if compress && plain_leaf && !header.flags.has_refs && header.size > 0 {
        let values = Array::from_ref(alloc.clone(), r)?.to_vec();
        if let Some(compression) = compressor::Compression::choose(&values, header.byte_size()) {
            return out.write_array(&compression.encode(header.flags));
        }
    }

    let byte_size = header.byte_size();
    let mut bytes = alloc.read(r, |chunk| chunk[..byte_size].to_vec());
    if !header.is_compressed() {
        let mut sealed = header;
        sealed.capacity = byte_size;
        sealed.write_to(&mut bytes);
    }
    out.write_array(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn alloc() -> Allocator {
        Allocator::new(Config::default()).unwrap()
    }

    fn array_of(alloc: &Allocator, values: &[i64]) -> Array {
        let mut a = Array::new(alloc.clone());
        a.create(NodeFlags::normal()).unwrap();
        for &v in values {
            a.add(v).unwrap();
        }
        a
    }

    #[test]
    fn test_bit_width() {
        assert_eq!(bit_width(0), 0);
        assert_eq!(bit_width(1), 1);
        assert_eq!(bit_width(3), 2);
        assert_eq!(bit_width(4), 4);
        assert_eq!(bit_width(15), 4);
        assert_eq!(bit_width(16), 8);
        assert_eq!(bit_width(127), 8);
        assert_eq!(bit_width(128), 16);
        assert_eq!(bit_width(-1), 8);
        assert_eq!(bit_width(-128), 8);
        assert_eq!(bit_width(-129), 16);
        assert_eq!(bit_width(0x7FFF_FFFF), 32);
        assert_eq!(bit_width(0x8000_0000), 64);
        assert_eq!(bit_width(i64::MIN), 64);
    }

    #[test]
    fn test_bounds_table() {
        assert_eq!((lbound_for_width(0), ubound_for_width(0)), (0, 0));
        assert_eq!((lbound_for_width(4), ubound_for_width(4)), (0, 15));
        assert_eq!((lbound_for_width(8), ubound_for_width(8)), (-128, 127));
        assert_eq!((lbound_for_width(64), ubound_for_width(64)), (i64::MIN, i64::MAX));
        for v in [0i64, 1, 2, 9, 100, -5, 40000, -3_000_000_000, i64::MAX] {
            let w = bit_width(v);
            assert!(lbound_for_width(w) <= v && v <= ubound_for_width(w));
        }
    }

    #[test]
    fn test_add_get_widens() {
        let a = alloc();
        let values = [0i64, 1, 3, 15, -1, 300, -70000, 1 << 40];
        let mut arr = array_of(&a, &[]);
        let mut expected_width = 0;
        for (i, &v) in values.iter().enumerate() {
            arr.add(v).unwrap();
            expected_width = expected_width.max(bit_width(v));
            assert_eq!(arr.width(), expected_width);
            for (j, &w) in values[..=i].iter().enumerate() {
                assert_eq!(arr.get(j), w);
            }
        }
        assert_eq!(arr.width(), 64);
    }

    #[test]
    fn test_set_widens_and_preserves_neighbours() {
        let a = alloc();
        let mut arr = array_of(&a, &[1, 0, 1, 1, 0]);
        assert_eq!(arr.width(), 1);
        arr.set(2, 1000).unwrap();
        assert_eq!(arr.width(), 16);
        assert_eq!(arr.to_vec(), vec![1, 0, 1000, 1, 0]);
        arr.set(2, 5).unwrap();
        assert_eq!(arr.width(), 16);
        assert_eq!(arr.get(2), 5);
    }

    #[test]
    fn test_insert_middle_at_every_width() {
        let a = alloc();
        for v in [1i64, 3, 15, 100, 30000, 2_000_000_000, i64::MAX] {
            let mut arr = array_of(&a, &[1, 1, 0, 1]);
            arr.insert(2, v).unwrap();
            assert_eq!(arr.to_vec(), vec![1, 1, v, 0, 1]);
            arr.insert(0, 1).unwrap();
            assert_eq!(arr.to_vec(), vec![1, 1, 1, v, 0, 1]);
        }
    }

    #[test]
    fn test_erase_and_truncate() {
        let a = alloc();
        let mut arr = array_of(&a, &[10, 20, 30, 40]);
        arr.erase(1).unwrap();
        assert_eq!(arr.to_vec(), vec![10, 30, 40]);
        arr.erase(2).unwrap();
        assert_eq!(arr.to_vec(), vec![10, 30]);
        arr.truncate(1).unwrap();
        assert_eq!(arr.to_vec(), vec![10]);
        assert_eq!(arr.width(), 8);
        arr.truncate(0).unwrap();
        assert!(arr.is_empty());
        assert_eq!(arr.width(), 0);
    }

    #[test]
    fn test_erase_sub_byte_width() {
        let a = alloc();
        let mut arr = array_of(&a, &[1, 2, 3, 0, 2, 1]);
        assert_eq!(arr.width(), 2);
        arr.erase(0).unwrap();
        assert_eq!(arr.to_vec(), vec![2, 3, 0, 2, 1]);
    }

    #[test]
    fn test_find_first_respects_range() {
        let a = alloc();
        let arr = array_of(&a, &[5, 7, 5, 9]);
        assert_eq!(arr.find_first(5, 0, usize::MAX), Some(0));
        assert_eq!(arr.find_first(5, 1, usize::MAX), Some(2));
        assert_eq!(arr.find_first(5, 1, 2), None);
        assert_eq!(arr.find_first(1000, 0, usize::MAX), None);
        assert_eq!(arr.find_first(9, 4, 2), None);
    }

    #[test]
    fn test_move_to() {
        let a = alloc();
        let mut src = array_of(&a, &[1, 2, 3, 400, 5]);
        let mut dst = array_of(&a, &[7]);
        src.move_to(&mut dst, 2).unwrap();
        assert_eq!(src.to_vec(), vec![1, 2]);
        assert_eq!(dst.to_vec(), vec![7, 3, 400, 5]);
    }

    #[test]
    fn test_bounds_search_sum_adjust() {
        let a = alloc();
        let mut arr = array_of(&a, &[1, 3, 3, 8]);
        assert_eq!(arr.lower_bound(3), 1);
        assert_eq!(arr.upper_bound(3), 3);
        assert_eq!(arr.lower_bound(100), 4);
        assert_eq!(arr.sum(0, usize::MAX), 15);
        arr.adjust(1, 3, 200).unwrap();
        assert_eq!(arr.to_vec(), vec![1, 203, 203, 8]);
    }

    #[test]
    fn test_adjust_wraps_on_overflow() {
        let a = alloc();
        let mut arr = array_of(&a, &[i64::MAX, 1, i64::MIN]);
        arr.adjust(0, 2, 1).unwrap();
        assert_eq!(arr.to_vec(), vec![i64::MIN, 2, i64::MIN]);
        arr.adjust(2, 3, -1).unwrap();
        assert_eq!(arr.get(2), i64::MAX);
    }

    #[test]
    fn test_create_filled() {
        let a = alloc();
        let mut arr = Array::new(a);
        arr.create_filled(NodeFlags::normal(), 5, -2).unwrap();
        assert_eq!(arr.to_vec(), vec![-2; 5]);
        assert_eq!(arr.width(), 8);
    }

    #[test]
    fn test_init_from_ref_sees_same_data() {
        let a = alloc();
        let arr = array_of(&a, &[4, 8, 15, 16, 23, 42]);
        let other = Array::from_ref(a.clone(), arr.get_ref()).unwrap();
        assert_eq!(other.to_vec(), arr.to_vec());
        assert_eq!(other.width(), arr.width());
    }

    #[test]
    fn test_growth_relocates_but_keeps_values() {
        let a = alloc();
        let mut arr = array_of(&a, &[]);
        for i in 0..5000 {
            arr.add(i * 3).unwrap();
        }
        assert_eq!(arr.size(), 5000);
        assert_eq!(arr.get(4999), 4999 * 3);
        assert_eq!(a.live_chunks(), 1);
    }

    #[test]
    fn test_out_of_memory_keeps_prior_node() {
        let a = Allocator::new(Config::new().with_max_arena_size(512)).unwrap();
        let mut arr = array_of(&a, &[1, 2, 3]);
        let before = arr.get_ref();
        let mut result = Ok(());
        for i in 0..1000 {
            result = arr.add(i << 40);
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(BitleafError::OutOfMemory { .. })));
        assert_eq!(arr.get(0), 1);
        assert!(arr.get_ref() == before || a.chunk_size(arr.get_ref()).is_ok());
    }

    #[test]
    fn test_destroy_deep_releases_children() {
        let a = alloc();
        let child1 = array_of(&a, &[1, 2]);
        let child2 = array_of(&a, &[3]);
        let mut parent = Array::new(a.clone());
        parent.create(NodeFlags::has_refs()).unwrap();
        parent.add(child1.get_ref() as i64).unwrap();
        parent.add(0).unwrap();
        parent.add(7).unwrap(); // tagged value, not a ref
        parent.add(child2.get_ref() as i64).unwrap();
        assert_eq!(a.live_chunks(), 3);
        parent.destroy_deep();
        assert_eq!(a.live_chunks(), 0);
    }

    #[test]
    fn test_encode_plain_is_readable() {
        let bytes = encode_plain(NodeFlags::normal(), &[1, -1, 300]);
        let header = Header::decode(&bytes).unwrap();
        assert_eq!(header.size, 3);
        assert_eq!(header.encoding, Encoding::Plain { wtype: WidthType::Bits, width: 16 });
        assert_eq!(get_direct(&bytes[8..], 16, 2), 300);
    }
}
