//! BITLEAF - String Leaves
//! A string column leaf that picks its own representation.
//!
//! | Leaf   | Holds                      | Node                          |
//! |--------|----------------------------|-------------------------------|
//! | Small  | strings up to 15 bytes     | [`ArrayStringShort`]          |
//! | Medium | strings up to 63 bytes     | [`ArraySmallBlobs`]           |
//! | Big    | anything                   | [`ArrayBigBlobs`]             |
//! | Enum   | indices into a dictionary  | [`Array`] + [`StringEnumKeys`] |
//!
//! Small, Medium and Big are chosen by the longest string ever stored and
//! only move up. Enum is entered through [`ArrayString::enumerate`] and
//! never left.

pub mod big_blobs;
pub mod blob;
pub mod short;
pub mod small_blobs;

use std::cell::RefCell;
use std::rc::Rc;

use log::debug;

use crate::alloc::snapshot::ArrayWriter;
use crate::alloc::Allocator;
use crate::array::{write_node, Array};
use crate::error::Result;
use crate::types::{NodeFlags, Ref};

pub use big_blobs::ArrayBigBlobs;
pub use blob::ArrayBlob;
pub use short::ArrayStringShort;
pub use small_blobs::ArraySmallBlobs;

pub const SMALL_STRING_MAX_SIZE: usize = 15;
pub const MEDIUM_STRING_MAX_SIZE: usize = 63;

/// Dictionary shared by every enum leaf of a column.
pub type StringEnumKeys = Rc<RefCell<ArrayString>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafType {
    Small,
    Medium,
    Big,
    Enum,
}

#[derive(Debug, Clone)]
enum Leaf {
    Small(ArrayStringShort),
    Medium(ArraySmallBlobs),
    Big(ArrayBigBlobs),
    Enum { indices: Array, keys: StringEnumKeys },
}

impl Leaf {
    fn create(alloc: &Allocator, leaf_type: LeafType) -> Result<Leaf> {
        Ok(match leaf_type {
            LeafType::Small => {
                let mut leaf = ArrayStringShort::new(alloc.clone());
                leaf.create()?;
                Leaf::Small(leaf)
            }
            LeafType::Medium => {
                let mut leaf = ArraySmallBlobs::new(alloc.clone());
                leaf.create()?;
                Leaf::Medium(leaf)
            }
            LeafType::Big => {
                let mut leaf = ArrayBigBlobs::new(alloc.clone());
                leaf.create()?;
                Leaf::Big(leaf)
            }
            LeafType::Enum => unreachable!("enum leaves are built by enumerate"),
        })
    }

    fn leaf_type(&self) -> LeafType {
        match self {
            Leaf::Small(_) => LeafType::Small,
            Leaf::Medium(_) => LeafType::Medium,
            Leaf::Big(_) => LeafType::Big,
            Leaf::Enum { .. } => LeafType::Enum,
        }
    }

    fn destroy(&mut self) {
        match self {
            Leaf::Small(leaf) => leaf.destroy(),
            Leaf::Medium(leaf) => leaf.destroy(),
            Leaf::Big(leaf) => leaf.destroy(),
            // The dictionary is shared and outlives any one leaf.
            Leaf::Enum { indices, .. } => indices.destroy(),
        }
    }
}

/// A string leaf accessor.
///
/// Upgrades replace the underlying node, so the ref returned by
/// [`get_ref`](Self::get_ref) may change after any `set` or `insert`.
#[derive(Debug, Clone)]
pub struct ArrayString {
    alloc: Allocator,
    leaf: Leaf,
}

impl ArrayString {
    pub fn new(alloc: Allocator) -> Self {
        Self {
            leaf: Leaf::Small(ArrayStringShort::new(alloc.clone())),
            alloc,
        }
    }

    /// Attach to a Small, Medium or Big leaf.
    pub fn from_ref(alloc: Allocator, r: Ref) -> Result<Self> {
        let mut leaf = Self::new(alloc);
        leaf.init_from_ref(r)?;
        Ok(leaf)
    }

    /// Attach to an enum leaf whose indices point into `keys`.
    pub fn from_enum_ref(alloc: Allocator, r: Ref, keys: StringEnumKeys) -> Result<Self> {
        let mut leaf = Self::new(alloc);
        leaf.init_enum_from_ref(r, keys)?;
        Ok(leaf)
    }

    /// Start out as an empty Small leaf.
    pub fn create(&mut self) -> Result<()> {
        self.leaf = Leaf::create(&self.alloc, LeafType::Small)?;
        Ok(())
    }

    /// A new, empty leaf of the same kind; enum leaves share the dictionary.
    pub fn create_like(&self) -> Result<ArrayString> {
        let leaf = match &self.leaf {
            Leaf::Enum { keys, .. } => {
                let mut indices = Array::new(self.alloc.clone());
                indices.create(NodeFlags::normal())?;
                Leaf::Enum {
                    indices,
                    keys: Rc::clone(keys),
                }
            }
            other => Leaf::create(&self.alloc, other.leaf_type())?,
        };
        Ok(ArrayString {
            alloc: self.alloc.clone(),
            leaf,
        })
    }

    /// Pick the representation from the node header: no refs is Small,
    /// refs without the context flag is Medium, refs with it is Big.
    pub fn init_from_ref(&mut self, r: Ref) -> Result<()> {
        let flags = self.alloc.read_header(r)?.flags;
        self.leaf = match (flags.has_refs, flags.context_flag) {
            (false, _) => {
                let mut leaf = ArrayStringShort::new(self.alloc.clone());
                leaf.init_from_ref(r)?;
                Leaf::Small(leaf)
            }
            (true, false) => {
                let mut leaf = ArraySmallBlobs::new(self.alloc.clone());
                leaf.init_from_ref(r)?;
                Leaf::Medium(leaf)
            }
            (true, true) => {
                let mut leaf = ArrayBigBlobs::new(self.alloc.clone());
                leaf.init_from_ref(r)?;
                Leaf::Big(leaf)
            }
        };
        Ok(())
    }

    pub fn init_enum_from_ref(&mut self, r: Ref, keys: StringEnumKeys) -> Result<()> {
        let indices = Array::from_ref(self.alloc.clone(), r)?;
        self.leaf = Leaf::Enum { indices, keys };
        Ok(())
    }

    pub fn allocator(&self) -> &Allocator {
        &self.alloc
    }

    pub fn leaf_type(&self) -> LeafType {
        self.leaf.leaf_type()
    }

    pub fn get_ref(&self) -> Ref {
        match &self.leaf {
            Leaf::Small(leaf) => leaf.get_ref(),
            Leaf::Medium(leaf) => leaf.get_ref(),
            Leaf::Big(leaf) => leaf.get_ref(),
            Leaf::Enum { indices, .. } => indices.get_ref(),
        }
    }

    /// The dictionary of an enum leaf.
    pub fn enum_keys(&self) -> Option<StringEnumKeys> {
        match &self.leaf {
            Leaf::Enum { keys, .. } => Some(Rc::clone(keys)),
            _ => None,
        }
    }

    pub fn size(&self) -> usize {
        match &self.leaf {
            Leaf::Small(leaf) => leaf.size(),
            Leaf::Medium(leaf) => leaf.size(),
            Leaf::Big(leaf) => leaf.size(),
            Leaf::Enum { indices, .. } => indices.size(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn get(&self, ndx: usize) -> Option<String> {
        match &self.leaf {
            Leaf::Small(leaf) => leaf.get(ndx),
            Leaf::Medium(leaf) => leaf.get_string(ndx),
            Leaf::Big(leaf) => leaf.get_string(ndx),
            Leaf::Enum { indices, keys } => keys.borrow().get(indices.get(ndx) as usize),
        }
    }

    pub fn is_null(&self, ndx: usize) -> bool {
        self.get(ndx).is_none()
    }

    pub fn to_vec(&self) -> Vec<Option<String>> {
        (0..self.size()).map(|i| self.get(i)).collect()
    }

    /// Move to the smallest representation that holds `value_size` bytes.
    /// Existing values are copied across and the old node is released.
    pub fn upgrade_leaf(&mut self, value_size: usize) -> Result<()> {
        let target = match self.leaf_type() {
            LeafType::Small if value_size > MEDIUM_STRING_MAX_SIZE => LeafType::Big,
            LeafType::Small if value_size > SMALL_STRING_MAX_SIZE => LeafType::Medium,
            LeafType::Medium if value_size > MEDIUM_STRING_MAX_SIZE => LeafType::Big,
            _ => return Ok(()),
        };

        let mut leaf = Leaf::create(&self.alloc, target)?;
        for value in self.to_vec() {
            let value = value.as_deref().map(str::as_bytes);
            let added = match &mut leaf {
                Leaf::Medium(new) => new.add(value),
                Leaf::Big(new) => new.add(value),
                _ => unreachable!("upgrades only target blob leaves"),
            };
            if let Err(err) = added {
                leaf.destroy();
                return Err(err);
            }
        }

        debug!(
            "string leaf {:?} -> {:?} ({} values, longest incoming {} bytes)",
            self.leaf_type(),
            target,
            self.size(),
            value_size
        );
        let mut old = std::mem::replace(&mut self.leaf, leaf);
        old.destroy();
        self.alloc.metrics().record_leaf_upgrade();
        Ok(())
    }

    /// Dictionary index of `value`, adding it when missing.
    fn enum_key(keys: &StringEnumKeys, value: Option<&str>) -> Result<i64> {
        let found = keys.borrow().find_first(value, 0, usize::MAX);
        match found {
            Some(ndx) => Ok(ndx as i64),
            None => {
                let mut keys = keys.borrow_mut();
                keys.add(value)?;
                Ok(keys.size() as i64 - 1)
            }
        }
    }

    pub fn set(&mut self, ndx: usize, value: Option<&str>) -> Result<()> {
        if let Leaf::Enum { indices, keys } = &mut self.leaf {
            let key = Self::enum_key(keys, value)?;
            return indices.set(ndx, key);
        }
        self.upgrade_leaf(value.map_or(0, str::len))?;
        match &mut self.leaf {
            Leaf::Small(leaf) => leaf.set(ndx, value),
            Leaf::Medium(leaf) => leaf.set(ndx, value.map(str::as_bytes)),
            Leaf::Big(leaf) => leaf.set(ndx, value.map(str::as_bytes)),
            Leaf::Enum { .. } => unreachable!(),
        }
    }

    pub fn set_null(&mut self, ndx: usize) -> Result<()> {
        self.set(ndx, None)
    }

    pub fn insert(&mut self, ndx: usize, value: Option<&str>) -> Result<()> {
        if let Leaf::Enum { indices, keys } = &mut self.leaf {
            let key = Self::enum_key(keys, value)?;
            return indices.insert(ndx, key);
        }
        self.upgrade_leaf(value.map_or(0, str::len))?;
        match &mut self.leaf {
            Leaf::Small(leaf) => leaf.insert(ndx, value),
            Leaf::Medium(leaf) => leaf.insert(ndx, value.map(str::as_bytes)),
            Leaf::Big(leaf) => leaf.insert(ndx, value.map(str::as_bytes)),
            Leaf::Enum { .. } => unreachable!(),
        }
    }

    pub fn add(&mut self, value: Option<&str>) -> Result<()> {
        self.insert(self.size(), value)
    }

    pub fn erase(&mut self, ndx: usize) -> Result<()> {
        match &mut self.leaf {
            Leaf::Small(leaf) => leaf.erase(ndx),
            Leaf::Medium(leaf) => leaf.erase(ndx),
            Leaf::Big(leaf) => leaf.erase(ndx),
            Leaf::Enum { indices, .. } => indices.erase(ndx),
        }
    }

    pub fn truncate(&mut self, new_size: usize) -> Result<()> {
        match &mut self.leaf {
            Leaf::Small(leaf) => leaf.truncate(new_size),
            Leaf::Medium(leaf) => leaf.truncate(new_size),
            Leaf::Big(leaf) => leaf.truncate(new_size),
            Leaf::Enum { indices, .. } => indices.truncate(new_size),
        }
    }

    pub fn clear(&mut self) -> Result<()> {
        self.truncate(0)
    }

    pub fn find_first(&self, value: Option<&str>, begin: usize, end: usize) -> Option<usize> {
        match &self.leaf {
            Leaf::Small(leaf) => leaf.find_first(value, begin, end),
            Leaf::Medium(leaf) => leaf.find_first(value.map(str::as_bytes), begin, end),
            Leaf::Big(leaf) => leaf.find_first(value.map(str::as_bytes), begin, end),
            Leaf::Enum { indices, keys } => {
                let key = keys.borrow().find_first(value, 0, usize::MAX)?;
                indices.find_first(key as i64, begin, end)
            }
        }
    }

    /// First index whose value is not less than `value`, for a leaf kept
    /// in ascending order (null sorts first). Enum leaves store dictionary
    /// indices whose order says nothing about the strings, so they have no
    /// answer.
    pub fn lower_bound(&self, value: Option<&str>) -> Option<usize> {
        if self.leaf_type() == LeafType::Enum {
            return None;
        }
        let (mut lo, mut hi) = (0, self.size());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.get(mid).as_deref() < value {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Some(lo)
    }

    /// Switch to enum mode against `keys`, adding missing values to the
    /// dictionary. A no-op on a leaf that is already an enum leaf.
    pub fn enumerate(&mut self, keys: StringEnumKeys) -> Result<()> {
        if self.leaf_type() == LeafType::Enum {
            return Ok(());
        }
        let mut indices = Array::new(self.alloc.clone());
        indices.create(NodeFlags::normal())?;
        for value in self.to_vec() {
            let added = Self::enum_key(&keys, value.as_deref()).and_then(|key| indices.add(key));
            if let Err(err) = added {
                indices.destroy();
                return Err(err);
            }
        }
        debug!(
            "enumerated {} values against a dictionary of {}",
            indices.size(),
            keys.borrow().size()
        );
        let mut old = std::mem::replace(&mut self.leaf, Leaf::Enum { indices, keys });
        old.destroy();
        Ok(())
    }

    /// Serialize the leaf and its children. The dictionary of an enum leaf
    /// is written separately by its owner.
    pub fn write(&self, out: &mut dyn ArrayWriter, persist: bool) -> Result<Ref> {
        write_node(&self.alloc, self.get_ref(), out, true, persist, false)
    }

    /// Release the leaf. An enum leaf leaves its dictionary alone.
    pub fn destroy(&mut self) {
        self.leaf.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn alloc() -> Allocator {
        Allocator::new(Config::default()).unwrap()
    }

    fn leaf(alloc: &Allocator) -> ArrayString {
        let mut leaf = ArrayString::new(alloc.clone());
        leaf.create().unwrap();
        leaf
    }

    #[test]
    fn test_upgrade_small_medium_big() {
        let a = alloc();
        let mut leaf = leaf(&a);
        let values = [
            Some("short".to_string()),
            None,
            Some("just over fifteen bytes".to_string()),
            Some("m".repeat(63)),
            Some("b".repeat(64)),
        ];
        let expected_types = [
            LeafType::Small,
            LeafType::Small,
            LeafType::Medium,
            LeafType::Medium,
            LeafType::Big,
        ];
        for (i, (value, leaf_type)) in values.iter().zip(expected_types).enumerate() {
            leaf.add(value.as_deref()).unwrap();
            assert_eq!(leaf.leaf_type(), leaf_type);
            assert_eq!(leaf.to_vec(), values[..=i].to_vec());
        }
        assert_eq!(a.metrics().leaf_upgrades.load(std::sync::atomic::Ordering::Relaxed), 2);
    }

    #[test]
    fn test_small_straight_to_big() {
        let a = alloc();
        let mut leaf = leaf(&a);
        leaf.add(Some("a")).unwrap();
        leaf.set(0, Some(&"z".repeat(100))).unwrap();
        assert_eq!(leaf.leaf_type(), LeafType::Big);
        assert_eq!(leaf.get(0), Some("z".repeat(100)));
    }

    #[test]
    fn test_upgrade_never_downgrades() {
        let a = alloc();
        let mut leaf = leaf(&a);
        leaf.add(Some(&"y".repeat(40))).unwrap();
        assert_eq!(leaf.leaf_type(), LeafType::Medium);
        leaf.set(0, Some("y")).unwrap();
        leaf.upgrade_leaf(0).unwrap();
        assert_eq!(leaf.leaf_type(), LeafType::Medium);
    }

    #[test]
    fn test_upgrade_releases_old_leaf() {
        let a = alloc();
        let mut leaf = leaf(&a);
        leaf.add(Some("tiny")).unwrap();
        assert_eq!(a.live_chunks(), 1);
        leaf.add(Some(&"q".repeat(30))).unwrap();
        // top + offsets + blob + nulls
        assert_eq!(a.live_chunks(), 4);
    }

    #[test]
    fn test_init_from_ref_dispatch() {
        let a = alloc();
        let mut leaf = leaf(&a);
        leaf.add(Some("small")).unwrap();
        let small = ArrayString::from_ref(a.clone(), leaf.get_ref()).unwrap();
        assert_eq!(small.leaf_type(), LeafType::Small);

        leaf.add(Some(&"m".repeat(20))).unwrap();
        let medium = ArrayString::from_ref(a.clone(), leaf.get_ref()).unwrap();
        assert_eq!(medium.leaf_type(), LeafType::Medium);

        leaf.add(Some(&"b".repeat(200))).unwrap();
        let big = ArrayString::from_ref(a.clone(), leaf.get_ref()).unwrap();
        assert_eq!(big.leaf_type(), LeafType::Big);
        assert_eq!(big.to_vec(), leaf.to_vec());
    }

    #[test]
    fn test_enumerate_shares_dictionary() {
        let a = alloc();
        let keys: StringEnumKeys = Rc::new(RefCell::new(leaf(&a)));
        let mut first = leaf(&a);
        let mut second = leaf(&a);
        for s in ["red", "green", "red", "blue"] {
            first.add(Some(s)).unwrap();
        }
        for s in ["blue", "blue", "red"] {
            second.add(Some(s)).unwrap();
        }
        first.enumerate(Rc::clone(&keys)).unwrap();
        second.enumerate(Rc::clone(&keys)).unwrap();

        assert_eq!(first.leaf_type(), LeafType::Enum);
        assert_eq!(keys.borrow().size(), 3);
        assert_eq!(first.get(2).as_deref(), Some("red"));
        assert_eq!(second.get(0).as_deref(), Some("blue"));

        second.add(Some("yellow")).unwrap();
        second.set(0, None).unwrap();
        assert_eq!(keys.borrow().size(), 5);
        assert_eq!(second.get(3).as_deref(), Some("yellow"));
        assert!(second.is_null(0));
        assert_eq!(second.find_first(Some("red"), 0, usize::MAX), Some(2));
        assert_eq!(second.find_first(Some("green"), 0, usize::MAX), None);
        assert_eq!(second.lower_bound(Some("blue")), None);

        let reopened = ArrayString::from_enum_ref(a.clone(), first.get_ref(), Rc::clone(&keys)).unwrap();
        assert_eq!(reopened.to_vec(), first.to_vec());
    }

    #[test]
    fn test_lower_bound_on_sorted_leaf() {
        let a = alloc();
        let mut leaf = leaf(&a);
        for s in ["apple", "banana", "banana", "cherry"] {
            leaf.add(Some(s)).unwrap();
        }
        assert_eq!(leaf.lower_bound(Some("banana")), Some(1));
        assert_eq!(leaf.lower_bound(Some("blueberry")), Some(3));
        assert_eq!(leaf.lower_bound(Some("zucchini")), Some(4));
        assert_eq!(leaf.lower_bound(None), Some(0));
    }

    #[test]
    fn test_create_like_keeps_type() {
        let a = alloc();
        let mut leaf = leaf(&a);
        leaf.add(Some(&"k".repeat(70))).unwrap();
        let sibling = leaf.create_like().unwrap();
        assert_eq!(sibling.leaf_type(), LeafType::Big);
        assert!(sibling.is_empty());
    }
}
