//! BITLEAF - Short String Leaf
//! Strings of up to 63 bytes stored inline in fixed-width slots.
//!
//! Slot layout (`width` bytes, width in {0, 1, 2, 4, 8, 16, 32, 64}):
//! ```text
//! [ payload | zero padding | pad ]
//! ```
//! The last byte holds the padding length, so a string occupies
//! `width - 1 - pad` bytes. A last byte equal to `width` marks null, and a
//! width of 0 means every element is null.

use crate::alloc::Allocator;
use crate::array::header::{Encoding, WidthType};
use crate::array::node::Node;
use crate::error::{BitleafError, Result};
use crate::types::{NodeFlags, Ref};

/// Widest slot; strings must be shorter than this.
pub const MAX_WIDTH: usize = 64;

/// Slot width for `len` bytes (string plus pad byte), a power of two or 0.
fn round_up(len: usize) -> usize {
    debug_assert!(len <= MAX_WIDTH);
    if len == 0 {
        0
    } else {
        len.next_power_of_two()
    }
}

fn decode_slot(slot: &[u8]) -> Option<String> {
    let width = slot.len();
    let pad = usize::from(slot[width - 1]);
    if pad == width {
        return None;
    }
    let len = width - 1 - pad;
    Some(String::from_utf8_lossy(&slot[..len]).into_owned())
}

fn encode_slot(slot: &mut [u8], value: Option<&str>) {
    let width = slot.len();
    slot.fill(0);
    match value {
        Some(s) => {
            slot[..s.len()].copy_from_slice(s.as_bytes());
            slot[width - 1] = (width - 1 - s.len()) as u8;
        }
        None => slot[width - 1] = width as u8,
    }
}

#[derive(Debug, Clone)]
pub struct ArrayStringShort {
    node: Node,
}

impl ArrayStringShort {
    pub fn new(alloc: Allocator) -> Self {
        Self { node: Node::new(alloc) }
    }

    pub fn create(&mut self) -> Result<()> {
        self.node.create(WidthType::Multiply, NodeFlags::normal(), 0, 0)
    }

    pub fn init_from_ref(&mut self, r: Ref) -> Result<()> {
        self.node.init_from_ref(r)?;
        let header = *self.node.header();
        match header.encoding {
            Encoding::Plain {
                wtype: WidthType::Multiply,
                ..
            } if !header.flags.has_refs => Ok(()),
            _ => {
                self.node.detach();
                Err(BitleafError::Corruption(format!(
                    "node at {r:#x} is not a short string leaf"
                )))
            }
        }
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

    pub fn size(&self) -> usize {
        self.node.size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Slot width in bytes.
    pub fn width(&self) -> usize {
        match self.node.header().encoding {
            Encoding::Plain { width, .. } => usize::from(width),
            Encoding::Packed { .. } | Encoding::Flex { .. } => {
                unreachable!("string leaves are never compressed")
            }
        }
    }

    pub fn get(&self, ndx: usize) -> Option<String> {
        assert!(ndx < self.size(), "index {ndx} out of bounds ({})", self.size());
        let width = self.width();
        if width == 0 {
            return None;
        }
        self.node.payload(|data| decode_slot(&data[ndx * width..(ndx + 1) * width]))
    }

    pub fn is_null(&self, ndx: usize) -> bool {
        self.get(ndx).is_none()
    }

    pub fn to_vec(&self) -> Vec<Option<String>> {
        (0..self.size()).map(|i| self.get(i)).collect()
    }

    /// Re-encode every slot at `new_width`, back to front so that no slot
    /// is overwritten before it has been read.
    fn expand(&mut self, new_width: usize) -> Result<()> {
        let old_width = self.width();
        let size = self.size();
        self.node.alloc_payload(size, new_width as u8)?;
        self.node.payload_mut(|data| {
            let mut old = [0u8; MAX_WIDTH];
            for i in (0..size).rev() {
                if old_width > 0 {
                    old[..old_width].copy_from_slice(&data[i * old_width..(i + 1) * old_width]);
                }
                let slot = &mut data[i * new_width..(i + 1) * new_width];
                slot.fill(0);
                if old_width == 0 {
                    slot[new_width - 1] = new_width as u8;
                } else {
                    slot[..old_width - 1].copy_from_slice(&old[..old_width - 1]);
                    slot[new_width - 1] = old[old_width - 1] + (new_width - old_width) as u8;
                }
            }
        });
        Ok(())
    }

    pub fn set(&mut self, ndx: usize, value: Option<&str>) -> Result<()> {
        assert!(ndx < self.size(), "index {ndx} out of bounds ({})", self.size());
        let len = value.map_or(0, str::len);
        assert!(len < MAX_WIDTH, "string of {len} bytes does not fit a short leaf");
        self.node.copy_on_write()?;

        let width = self.width();
        if width <= len {
            if width == 0 && value.is_none() {
                return Ok(());
            }
            self.expand(round_up(len + 1))?;
        }

        let width = self.width();
        self.node
            .payload_mut(|data| encode_slot(&mut data[ndx * width..(ndx + 1) * width], value));
        Ok(())
    }

    pub fn insert(&mut self, ndx: usize, value: Option<&str>) -> Result<()> {
        let size = self.size();
        assert!(ndx <= size, "insert position {ndx} out of bounds ({size})");
        self.node.copy_on_write()?;
        let width = self.width();
        self.node.alloc_payload(size + 1, width as u8)?;
        self.node.payload_mut(|data| {
            data.copy_within(ndx * width..size * width, (ndx + 1) * width);
            if width > 0 {
                encode_slot(&mut data[ndx * width..(ndx + 1) * width], None);
            }
        });
        self.set(ndx, value)
    }

    pub fn add(&mut self, value: Option<&str>) -> Result<()> {
        self.insert(self.size(), value)
    }

    pub fn erase(&mut self, ndx: usize) -> Result<()> {
        let size = self.size();
        assert!(ndx < size, "index {ndx} out of bounds ({size})");
        self.node.copy_on_write()?;
        let width = self.width();
        self.node
            .payload_mut(|data| data.copy_within((ndx + 1) * width..size * width, ndx * width));
        self.node.set_size(size - 1);
        Ok(())
    }

    pub fn truncate(&mut self, new_size: usize) -> Result<()> {
        assert!(new_size <= self.size(), "cannot truncate to a larger size");
        self.node.copy_on_write()?;
        self.node.set_size(new_size);
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        self.truncate(0)
    }

    pub fn find_first(&self, value: Option<&str>, begin: usize, end: usize) -> Option<usize> {
        let end = end.min(self.size());
        (begin..end).find(|&i| self.get(i).as_deref() == value)
    }

    pub fn destroy(&mut self) {
        self.node.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn leaf() -> ArrayStringShort {
        let alloc = Allocator::new(Config::default()).unwrap();
        let mut leaf = ArrayStringShort::new(alloc);
        leaf.create().unwrap();
        leaf
    }

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(0), 0);
        assert_eq!(round_up(1), 1);
        assert_eq!(round_up(2), 2);
        assert_eq!(round_up(3), 4);
        assert_eq!(round_up(5), 8);
        assert_eq!(round_up(16), 16);
        assert_eq!(round_up(17), 32);
        assert_eq!(round_up(64), 64);
    }

    #[test]
    fn test_nulls_at_width_zero() {
        let mut leaf = leaf();
        leaf.add(None).unwrap();
        leaf.add(None).unwrap();
        assert_eq!(leaf.width(), 0);
        assert_eq!(leaf.to_vec(), vec![None, None]);
    }

    #[test]
    fn test_widening_keeps_values() {
        let mut leaf = leaf();
        leaf.add(None).unwrap();
        leaf.add(Some("")).unwrap();
        assert_eq!(leaf.width(), 1);
        leaf.add(Some("abc")).unwrap();
        assert_eq!(leaf.width(), 4);
        leaf.add(Some("hello world")).unwrap();
        assert_eq!(leaf.width(), 16);
        leaf.insert(1, Some("a string of 40 bytes, more or less......")).unwrap();
        assert_eq!(leaf.width(), 64);
        assert_eq!(
            leaf.to_vec(),
            vec![
                None,
                Some("a string of 40 bytes, more or less......".to_string()),
                Some(String::new()),
                Some("abc".to_string()),
                Some("hello world".to_string()),
            ]
        );
    }

    #[test]
    fn test_set_erase_find() {
        let mut leaf = leaf();
        for s in ["x", "yy", "zzz", "yy"] {
            leaf.add(Some(s)).unwrap();
        }
        leaf.set(0, None).unwrap();
        assert!(leaf.is_null(0));
        assert_eq!(leaf.find_first(Some("yy"), 0, usize::MAX), Some(1));
        assert_eq!(leaf.find_first(Some("yy"), 2, usize::MAX), Some(3));
        assert_eq!(leaf.find_first(None, 0, usize::MAX), Some(0));
        leaf.erase(1).unwrap();
        assert_eq!(leaf.get(1).as_deref(), Some("zzz"));
        leaf.truncate(1).unwrap();
        assert_eq!(leaf.size(), 1);
        assert_eq!(leaf.find_first(Some("zzz"), 0, usize::MAX), None);
    }
}
