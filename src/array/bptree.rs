//! BITLEAF - B+-Tree Leaf Contract
//! What the tree layer needs from a leaf: its size, element access, and
//! insert/erase with splitting once the leaf is full.

use log::warn;

use crate::alloc::Allocator;
use crate::array::int_null::ArrayIntNull;
use crate::array::Array;
use crate::error::Result;
use crate::string::ArrayString;
use crate::types::{NodeFlags, Ref};

/// Where a split happened, reported back to the inner node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeInsert {
    /// Number of elements left in the leaf that was split.
    pub split_offset: usize,
    /// Number of elements in both leaves together.
    pub split_size: usize,
}

/// A leaf of a B+-tree column.
pub trait BpTreeLeaf: Sized {
    type Value;

    fn leaf_size(&self) -> usize;
    fn leaf_get(&self, ndx: usize) -> Self::Value;
    fn leaf_insert(&mut self, ndx: usize, value: Self::Value) -> Result<()>;
    fn leaf_erase(&mut self, ndx: usize) -> Result<()>;
    fn leaf_truncate(&mut self, new_size: usize) -> Result<()>;
    /// A new, empty leaf of the same kind in the same arena.
    fn create_sibling(&self) -> Result<Self>;
    fn leaf_ref(&self) -> Ref;
    fn allocator(&self) -> &Allocator;
    /// Release the leaf's own storage.
    fn destroy_leaf(&mut self);

    /// Append `[ndx, size)` to `dst` and truncate this leaf to `ndx`.
    fn leaf_move(&mut self, dst: &mut Self, ndx: usize) -> Result<()> {
        for i in ndx..self.leaf_size() {
            dst.leaf_insert(dst.leaf_size(), self.leaf_get(i))?;
        }
        self.leaf_truncate(ndx)
    }

    /// Insert `value` at `ndx` (clamped to the size). A full leaf is split:
    /// the tail from `ndx` on moves to a new leaf whose ref is returned,
    /// and `state` records the split point. On error the new leaf is
    /// released and this leaf keeps its elements.
    fn bptree_leaf_insert(&mut self, ndx: usize, value: Self::Value, state: &mut TreeInsert) -> Result<Option<Ref>> {
        let leaf_size = self.leaf_size();
        let max = self.allocator().config().max_bpnode_size;
        debug_assert!(leaf_size <= max);
        let ndx = ndx.min(leaf_size);
        if leaf_size < max {
            self.leaf_insert(ndx, value)?;
            return Ok(None);
        }

        let mut new_leaf = self.create_sibling()?;
        let split = if ndx == leaf_size {
            new_leaf.leaf_insert(0, value).map(|()| ndx)
        } else {
            match self.leaf_insert(ndx, value) {
                Ok(()) => match self.leaf_move(&mut new_leaf, ndx + 1) {
                    Ok(()) => Ok(ndx + 1),
                    Err(err) => {
                        if let Err(undo) = self.leaf_erase(ndx) {
                            warn!("leaf {:#x}: undoing insert at {ndx} failed: {undo}", self.leaf_ref());
                        }
                        Err(err)
                    }
                },
                Err(err) => Err(err),
            }
        };
        match split {
            Ok(offset) => {
                state.split_offset = offset;
                state.split_size = leaf_size + 1;
                Ok(Some(new_leaf.leaf_ref()))
            }
            Err(err) => {
                new_leaf.destroy_leaf();
                Err(err)
            }
        }
    }

    /// Erase element `ndx`. Returns true when the leaf is now empty and
    /// should be dropped by the tree layer.
    fn bptree_leaf_erase(&mut self, ndx: usize) -> Result<bool> {
        self.leaf_erase(ndx)?;
        Ok(self.leaf_size() == 0)
    }
}

impl BpTreeLeaf for Array {
    type Value = i64;

    fn leaf_size(&self) -> usize {
        self.size()
    }

    fn leaf_get(&self, ndx: usize) -> i64 {
        self.get(ndx)
    }

    fn leaf_insert(&mut self, ndx: usize, value: i64) -> Result<()> {
        self.insert(ndx, value)
    }

    fn leaf_erase(&mut self, ndx: usize) -> Result<()> {
        self.erase(ndx)
    }

    fn leaf_truncate(&mut self, new_size: usize) -> Result<()> {
        self.truncate(new_size)
    }

    fn leaf_move(&mut self, dst: &mut Self, ndx: usize) -> Result<()> {
        self.move_to(dst, ndx)
    }

    fn create_sibling(&self) -> Result<Self> {
        let mut leaf = Array::new(self.allocator().clone());
        let flags = if self.has_refs() {
            NodeFlags::has_refs()
        } else {
            NodeFlags::normal()
        };
        leaf.create(flags)?;
        Ok(leaf)
    }

    fn leaf_ref(&self) -> Ref {
        self.get_ref()
    }

    fn allocator(&self) -> &Allocator {
        Array::allocator(self)
    }

    fn destroy_leaf(&mut self) {
        self.destroy();
    }
}

impl BpTreeLeaf for ArrayIntNull {
    type Value = Option<i64>;

    fn leaf_size(&self) -> usize {
        self.size()
    }

    fn leaf_get(&self, ndx: usize) -> Option<i64> {
        self.get(ndx)
    }

    fn leaf_insert(&mut self, ndx: usize, value: Option<i64>) -> Result<()> {
        self.insert(ndx, value)
    }

    fn leaf_erase(&mut self, ndx: usize) -> Result<()> {
        self.erase(ndx)
    }

    fn leaf_truncate(&mut self, new_size: usize) -> Result<()> {
        self.truncate(new_size)
    }

    fn leaf_move(&mut self, dst: &mut Self, ndx: usize) -> Result<()> {
        self.move_to(dst, ndx)
    }

    fn create_sibling(&self) -> Result<Self> {
        let mut leaf = ArrayIntNull::new(self.allocator().clone());
        leaf.create()?;
        Ok(leaf)
    }

    fn leaf_ref(&self) -> Ref {
        self.get_ref()
    }

    fn allocator(&self) -> &Allocator {
        ArrayIntNull::allocator(self)
    }

    fn destroy_leaf(&mut self) {
        self.destroy();
    }
}

impl BpTreeLeaf for ArrayString {
    type Value = Option<String>;

    fn leaf_size(&self) -> usize {
        self.size()
    }

    fn leaf_get(&self, ndx: usize) -> Option<String> {
        self.get(ndx)
    }

    fn leaf_insert(&mut self, ndx: usize, value: Option<String>) -> Result<()> {
        self.insert(ndx, value.as_deref())
    }

    fn leaf_erase(&mut self, ndx: usize) -> Result<()> {
        self.erase(ndx)
    }

    fn leaf_truncate(&mut self, new_size: usize) -> Result<()> {
        self.truncate(new_size)
    }

    fn create_sibling(&self) -> Result<Self> {
        self.create_like()
    }

    fn leaf_ref(&self) -> Ref {
        self.get_ref()
    }

    fn allocator(&self) -> &Allocator {
        ArrayString::allocator(self)
    }

    fn destroy_leaf(&mut self) {
        self.destroy();
    }
}
