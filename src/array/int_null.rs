//! BITLEAF - Nullable Integer Arrays
//! An integer node whose element 0 holds the current null sentinel.
//!
//! Logical index `i` lives at physical index `i + 1`. Below 64 bits the
//! sentinel is the largest value of the current width; at 64 bits it is a
//! randomly chosen value that no element uses. Storing a value equal to the
//! sentinel first moves every null to a fresh sentinel, widening the node
//! when needed.

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::alloc::Allocator;
use crate::array::{bit_width, lbound_for_width, ubound_for_width, Array};
use crate::error::{BitleafError, Result};
use crate::types::{MemRef, NodeFlags, Ref};

/// Step between successive null candidates: the largest prime below 2^64.
const NULL_CANDIDATE_STEP: u64 = 0xFFFF_FFFF_FFFF_FFC5;

#[derive(Debug)]
pub struct ArrayIntNull {
    array: Array,
    rng: StdRng,
}

impl ArrayIntNull {
    /// A detached accessor whose random nulls come from the allocator's
    /// configured seed, or from entropy when none is set.
    pub fn new(alloc: Allocator) -> Self {
        let rng = match alloc.config().null_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(alloc, rng)
    }

    /// A detached accessor drawing null candidates from `rng`.
    pub fn with_rng(alloc: Allocator, rng: StdRng) -> Self {
        Self {
            array: Array::new(alloc),
            rng,
        }
    }

    pub fn from_ref(alloc: Allocator, r: Ref) -> Result<Self> {
        let mut arr = Self::new(alloc);
        arr.init_from_ref(r)?;
        Ok(arr)
    }

    /// Allocate an empty array.
    pub fn create(&mut self) -> Result<()> {
        self.array.create_filled(NodeFlags::normal(), 1, 0)?;
        let width = self.array.width();
        let null = if width == 64 {
            self.choose_random_null(0)
        } else {
            ubound_for_width(width)
        };
        self.array.set(0, null)
    }

    pub fn init_from_ref(&mut self, r: Ref) -> Result<()> {
        self.array.init_from_ref(r)?;
        if self.array.is_empty() {
            self.array.detach();
            return Err(BitleafError::Corruption(format!(
                "nullable array at {r:#x} has no null slot"
            )));
        }
        Ok(())
    }

    pub fn init_from_mem(&mut self, mem: MemRef) -> Result<()> {
        self.init_from_ref(mem.ref_)
    }

    pub fn get_ref(&self) -> Ref {
        self.array.get_ref()
    }

    pub fn allocator(&self) -> &Allocator {
        self.array.allocator()
    }

    pub fn is_attached(&self) -> bool {
        self.array.is_attached()
    }

    /// The backing node, null slot included.
    pub fn physical(&self) -> &Array {
        &self.array
    }

    pub fn width(&self) -> u8 {
        self.array.width()
    }

    pub fn size(&self) -> usize {
        self.array.size() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// The current null sentinel.
    pub fn null_value(&self) -> i64 {
        self.array.get(0)
    }

    pub fn get(&self, ndx: usize) -> Option<i64> {
        let v = self.array.get(ndx + 1);
        (v != self.null_value()).then_some(v)
    }

    pub fn is_null(&self, ndx: usize) -> bool {
        self.array.get(ndx + 1) == self.null_value()
    }

    pub fn to_vec(&self) -> Vec<Option<i64>> {
        let values = self.array.to_vec();
        let null = values[0];
        values[1..].iter().map(|&v| (v != null).then_some(v)).collect()
    }

    pub fn set(&mut self, ndx: usize, value: Option<i64>) -> Result<()> {
        match value {
            None => self.set_null(ndx),
            Some(v) => {
                assert!(ndx < self.size(), "index {ndx} out of bounds ({})", self.size());
                self.avoid_null_collision(v)?;
                self.array.set(ndx + 1, v)
            }
        }
    }

    pub fn set_null(&mut self, ndx: usize) -> Result<()> {
        assert!(ndx < self.size(), "index {ndx} out of bounds ({})", self.size());
        let null = self.null_value();
        self.array.set(ndx + 1, null)
    }

    pub fn insert(&mut self, ndx: usize, value: Option<i64>) -> Result<()> {
        assert!(ndx <= self.size(), "insert position {ndx} out of bounds ({})", self.size());
        let stored = match value {
            None => self.null_value(),
            Some(v) => {
                self.avoid_null_collision(v)?;
                v
            }
        };
        self.array.insert(ndx + 1, stored)
    }

    pub fn add(&mut self, value: Option<i64>) -> Result<()> {
        self.insert(self.size(), value)
    }

    pub fn erase(&mut self, ndx: usize) -> Result<()> {
        assert!(ndx < self.size(), "index {ndx} out of bounds ({})", self.size());
        self.array.erase(ndx + 1)
    }

    pub fn truncate(&mut self, new_size: usize) -> Result<()> {
        self.array.truncate(new_size + 1)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.truncate(0)
    }

    /// First index in `[begin, end)` holding `value` (`None` finds nulls).
    pub fn find_first(&self, value: Option<i64>, begin: usize, end: usize) -> Option<usize> {
        let null = self.null_value();
        let target = match value {
            None => null,
            Some(v) if v == null => return None,
            Some(v) => v,
        };
        self.array
            .find_first(target, begin + 1, end.saturating_add(1))
            .map(|i| i - 1)
    }

    /// Append elements `[ndx, size)` to `dst`, then truncate to `ndx`.
    /// Nulls stay nulls under the destination's own sentinel.
    pub fn move_to(&mut self, dst: &mut ArrayIntNull, ndx: usize) -> Result<()> {
        assert!(ndx <= self.size(), "move position {ndx} out of bounds ({})", self.size());
        for v in self.to_vec().split_off(ndx) {
            dst.add(v)?;
        }
        self.truncate(ndx)
    }

    fn can_use_as_null(&self, candidate: i64) -> bool {
        self.array.find_first(candidate, 1, usize::MAX).is_none()
    }

    /// A value different from `incoming` that no element currently holds.
    pub fn choose_random_null(&mut self, incoming: i64) -> i64 {
        let mut candidate: i64 = self.rng.gen();
        loop {
            candidate = candidate.wrapping_add(NULL_CANDIDATE_STEP as i64);
            if candidate != incoming && self.can_use_as_null(candidate) {
                return candidate;
            }
        }
    }

    /// Make sure `value` can be stored without reading back as null.
    pub fn avoid_null_collision(&mut self, value: i64) -> Result<()> {
        self.array.decompress()?;
        let width = self.array.width();
        if width == 64 {
            if value == self.null_value() {
                let null = self.choose_random_null(value);
                self.replace_nulls_with(null)?;
            }
        } else if value < lbound_for_width(width) || value >= ubound_for_width(width) {
            let mut new_width = bit_width(value);
            if new_width < 64 && value == ubound_for_width(new_width) {
                new_width = if new_width == 0 { 1 } else { new_width * 2 };
            }
            let null = if new_width == 64 {
                self.choose_random_null(value)
            } else {
                ubound_for_width(new_width)
            };
            self.replace_nulls_with(null)?;
        }
        Ok(())
    }

    /// Move every null to `new_null`. Slot 0 is overwritten unconditionally.
    pub fn replace_nulls_with(&mut self, new_null: i64) -> Result<()> {
        let old_null = self.null_value();
        self.array.set(0, new_null)?;
        for i in 1..self.array.size() {
            if self.array.get(i) == old_null {
                self.array.set(i, new_null)?;
            }
        }
        debug!(
            "nullable array {:#x}: null {} -> {}",
            self.get_ref(),
            old_null,
            new_null
        );
        self.allocator().metrics().record_null_reseed();
        Ok(())
    }

    pub fn try_compress(&mut self) -> Result<bool> {
        self.array.try_compress()
    }

    pub fn decompress(&mut self) -> Result<()> {
        self.array.decompress()
    }

    pub fn is_compressed(&self) -> bool {
        self.array.is_compressed()
    }

    pub fn destroy(&mut self) {
        self.array.destroy();
    }
}
