//! BITLEAF - Integer Compression
//! Chooses between the packed and flex encodings of an integer node and
//! moves nodes in and out of them.
//!
//! Both candidates are sized in bytes against the node as it is stored.
//! Packed must gain at least 12.5% and flex at least 25%; flex wins when
//! its adjusted size is the smaller of the two. Compressed nodes are read
//! in place and expanded back to the plain encoding before any mutation.

use log::debug;

use crate::array::flex::FlexPlan;
use crate::array::header::{calc_flex_byte_size, Header, WidthType, HEADER_SIZE};
use crate::array::node::Node;
use crate::array::packed::{packed_width, write_packed};
use crate::array::{bit_width, set_direct, Array};
use crate::error::Result;
use crate::types::NodeFlags;

/// A compressed encoding chosen for a set of values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compression {
    Packed { v_width: u8, values: Vec<i64> },
    Flex(FlexPlan),
}

impl Compression {
    /// Pick an encoding for `src`, currently stored in `uncompressed_size`
    /// bytes. `None` when neither gains enough.
    pub fn choose(src: &[i64], uncompressed_size: usize) -> Option<Compression> {
        if src.is_empty() {
            return None;
        }
        let flex = FlexPlan::build(src);
        let v_width = packed_width(src);
        let packed_size = calc_flex_byte_size(v_width, src.len(), 0, 0);
        let flex_size = flex.byte_size();

        let adjusted_packed = packed_size + packed_size / 8;
        let adjusted_flex = flex_size + flex_size / 4;
        if adjusted_flex < adjusted_packed && adjusted_flex < uncompressed_size {
            Some(Compression::Flex(flex))
        } else if adjusted_packed < uncompressed_size {
            Some(Compression::Packed {
                v_width,
                values: src.to_vec(),
            })
        } else {
            None
        }
    }

    pub fn header(&self, flags: NodeFlags) -> Header {
        match self {
            Compression::Packed { v_width, values } => Header::packed(flags, *v_width, values.len()),
            Compression::Flex(plan) => plan.header(flags),
        }
    }

    pub fn byte_size(&self) -> usize {
        match self {
            Compression::Packed { v_width, values } => calc_flex_byte_size(*v_width, values.len(), 0, 0),
            Compression::Flex(plan) => plan.byte_size(),
        }
    }

    fn write_payload(&self, payload: &mut [u8]) {
        match self {
            Compression::Packed { v_width, values } => write_packed(payload, *v_width, values),
            Compression::Flex(plan) => plan.write_tables(payload),
        }
    }

    /// Serialize as a standalone node.
    pub fn encode(&self, flags: NodeFlags) -> Vec<u8> {
        let header = self.header(flags);
        let mut bytes = vec![0u8; header.byte_size()];
        header.write_to(&mut bytes);
        self.write_payload(&mut bytes[HEADER_SIZE..]);
        bytes
    }
}

impl Array {
    /// Replace the plain node by a compressed encoding when that is
    /// smaller by enough. Returns whether the node was compressed; an
    /// empty or already compressed node is left alone.
    pub fn try_compress(&mut self) -> Result<bool> {
        if self.is_compressed() || self.is_empty() {
            return Ok(false);
        }
        let values = self.to_vec();
        let metrics = self.allocator().metrics();
        let Some(compression) = Compression::choose(&values, self.byte_size()) else {
            metrics.record_compress(false);
            debug!("compression of {:#x} rejected: no gain", self.get_ref());
            return Ok(false);
        };

        let header = compression.header(self.flags());
        let alloc = self.allocator().clone();
        let mem = alloc.alloc(header.byte_size())?;
        alloc.write(mem.ref_, |chunk| {
            header.write_to(chunk);
            compression.write_payload(&mut chunk[HEADER_SIZE..]);
        });
        debug!(
            "compressed {:#x} -> {:#x}: {:?}, {} -> {} bytes",
            self.get_ref(),
            mem.ref_,
            header.encoding,
            self.byte_size(),
            header.byte_size()
        );
        self.node_mut().replace(mem.ref_, header);
        alloc.metrics().record_compress(true);
        Ok(true)
    }

    /// Rebuild a plain node from a compressed one. No-op when the node is
    /// not compressed.
    pub fn decompress(&mut self) -> Result<()> {
        if !self.is_compressed() {
            return Ok(());
        }
        let values = self.to_vec();
        let width = values.iter().map(|&v| bit_width(v)).max().unwrap_or(0);

        let alloc = self.allocator().clone();
        let mut fresh = Node::new(alloc.clone());
        fresh.create(WidthType::Bits, self.flags(), width, values.len())?;
        fresh.payload_mut(|data| {
            for (i, &v) in values.iter().enumerate() {
                set_direct(data, width, i, v);
            }
        });

        debug!("decompressed {:#x} -> {:#x}", self.get_ref(), fresh.get_ref());
        let old = std::mem::replace(self.node_mut(), fresh);
        alloc.free(old.get_ref());
        alloc.metrics().record_decompress();
        Ok(())
    }

    /// Element `ndx` read through the compressed tables; `None` past the
    /// logical end.
    pub fn get_compressed_value(&self, ndx: usize) -> Option<i64> {
        if ndx >= self.size() {
            return None;
        }
        Some(self.get(ndx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::Allocator;
    use crate::array::header::Encoding;
    use crate::config::Config;
    use std::sync::atomic::Ordering;

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
    fn test_repeated_values_compress() {
        let a = alloc();
        let mut arr = array_of(&a, &[5, 5, 5, 5, 100_000_000_000]);
        assert!(arr.try_compress().unwrap());
        assert!(arr.is_compressed());
        assert_eq!(
            arr.encoding(),
            Encoding::Flex {
                v_width: 38,
                ndx_width: 1,
                v_size: 2
            }
        );
        assert_eq!(arr.size(), 5);
        assert_eq!(arr.get_compressed_value(0), Some(5));
        assert_eq!(arr.get_compressed_value(4), Some(100_000_000_000));
        assert_eq!(arr.get_compressed_value(5), None);
    }

    #[test]
    fn test_all_minus_one_compresses() {
        let a = alloc();
        let mut arr = array_of(&a, &[-1; 100]);
        assert_eq!(arr.width(), 8);
        let before = arr.byte_size();
        assert_eq!(before, 112);
        assert!(arr.try_compress().unwrap());
        assert!(arr.byte_size() < before);
        assert_eq!(arr.to_vec(), vec![-1; 100]);

        let mut values = vec![-1; 99];
        values.push(0);
        let mut arr = array_of(&a, &values);
        let before = arr.byte_size();
        assert!(arr.try_compress().unwrap());
        assert!(arr.byte_size() < before);
        assert_eq!(arr.get(99), 0);
        assert_eq!(arr.find_first(0, 0, usize::MAX), Some(99));
    }

    #[test]
    fn test_no_gain_is_rejected() {
        let a = alloc();
        let mut ones = array_of(&a, &[1; 1000]);
        let before = ones.get_ref();
        assert_eq!(ones.byte_size(), 136);
        assert!(!ones.try_compress().unwrap());
        assert!(!ones.is_compressed());
        assert_eq!(ones.get_ref(), before);
        assert_eq!(ones.byte_size(), 136);

        let mut distinct = array_of(&a, &[1, 2, 3, 4, 5, 6, 7]);
        assert!(!distinct.try_compress().unwrap());
        assert_eq!(a.metrics().compress_rejections.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_wide_distinct_values_pick_packed() {
        let a = alloc();
        // Every value distinct, but all of them fit in 9 bits.
        let values: Vec<i64> = (-200..200).collect();
        let mut arr = array_of(&a, &values);
        assert_eq!(arr.width(), 16);
        let before = arr.byte_size();
        assert!(arr.try_compress().unwrap());
        assert_eq!(arr.encoding(), Encoding::Packed { v_width: 9 });
        assert!(arr.byte_size() < before);
        assert_eq!(arr.width(), 9);
        assert_eq!(arr.to_vec(), values);
        assert_eq!(arr.find_first(-17, 0, usize::MAX), Some(183));
        assert_eq!(arr.find_first(-17, 184, usize::MAX), None);
        assert_eq!(arr.find_first(5000, 0, usize::MAX), None);

        arr.set(0, 7).unwrap();
        assert!(!arr.is_compressed());
        assert_eq!(arr.width(), 16);
        assert_eq!(arr.get(0), 7);
        assert_eq!(arr.get(399), 199);
    }

    #[test]
    fn test_choose_weighs_both_encodings() {
        let repetitive = [5, 5, 5, 5, 100_000_000_000];
        assert!(matches!(
            Compression::choose(&repetitive, 48),
            Some(Compression::Flex(_))
        ));
        let spread: Vec<i64> = (0..64).map(|i| i * 1000).collect();
        assert!(matches!(
            Compression::choose(&spread, 8 + 64 * 4),
            Some(Compression::Packed { v_width: 17, .. })
        ));
        assert_eq!(Compression::choose(&[], 1000), None);
        assert_eq!(Compression::choose(&[3; 8], 16), None);
    }

    #[test]
    fn test_compress_is_idempotent_and_empty_is_noop() {
        let a = alloc();
        let mut empty = array_of(&a, &[]);
        assert!(!empty.try_compress().unwrap());

        let mut arr = array_of(&a, &[-7; 40]);
        assert!(arr.try_compress().unwrap());
        assert!(!arr.try_compress().unwrap());
        assert_eq!(arr.to_vec(), vec![-7; 40]);
    }

    #[test]
    fn test_find_first_on_compressed() {
        let a = alloc();
        let values: Vec<i64> = (0..200).map(|i| [10, -3, 1 << 35][i % 3]).collect();
        let mut arr = array_of(&a, &values);
        assert!(arr.try_compress().unwrap());
        assert!(matches!(arr.encoding(), Encoding::Flex { .. }));
        assert_eq!(arr.find_first(-3, 0, usize::MAX), Some(1));
        assert_eq!(arr.find_first(1 << 35, 3, usize::MAX), Some(5));
        assert_eq!(arr.find_first(10, 1, 3), None);
        assert_eq!(arr.find_first(11, 0, usize::MAX), None);
    }

    #[test]
    fn test_mutation_decompresses_first() {
        let a = alloc();
        let mut arr = array_of(&a, &[2, 2, 2, 2, 2, 2, 9000]);
        assert!(arr.try_compress().unwrap());
        arr.set(0, 3).unwrap();
        assert!(!arr.is_compressed());
        assert_eq!(arr.to_vec(), vec![3, 2, 2, 2, 2, 2, 9000]);
        assert_eq!(arr.width(), 16);

        assert!(arr.try_compress().unwrap());
        arr.insert(1, -1).unwrap();
        arr.erase(0).unwrap();
        assert_eq!(arr.to_vec(), vec![-1, 2, 2, 2, 2, 2, 9000]);
        assert_eq!(a.live_chunks(), 1);
    }

    #[test]
    fn test_decompress_restores_minimal_width() {
        let a = alloc();
        let mut tiny = array_of(&a, &[0, 1]);
        assert!(!tiny.try_compress().unwrap());

        let mut arr = array_of(&a, &[300, 300, 300, 300, 300, 300, 300, 1]);
        assert!(arr.try_compress().unwrap());
        arr.decompress().unwrap();
        assert!(!arr.is_compressed());
        assert_eq!(arr.width(), 16);
        assert_eq!(arr.to_vec(), vec![300, 300, 300, 300, 300, 300, 300, 1]);
    }

    #[test]
    fn test_encoded_node_reads_back() {
        let values: Vec<i64> = (0..50).map(|i| i - 25).collect();
        let compression = Compression::choose(&values, 8 + 50).unwrap();
        let bytes = compression.encode(NodeFlags::normal());
        assert_eq!(bytes.len(), compression.byte_size());
        let a = alloc();
        let mem = a.alloc(bytes.len()).unwrap();
        a.write(mem.ref_, |chunk| chunk[..bytes.len()].copy_from_slice(&bytes));
        let arr = Array::from_ref(a.clone(), mem.ref_).unwrap();
        assert!(arr.is_compressed());
        assert_eq!(arr.to_vec(), values);
    }
}
