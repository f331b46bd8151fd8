//! BITLEAF - Small Blobs Leaf
//! Medium strings packed back to back in one blob.
//!
//! The top node has refs and no context flag; it holds exactly three
//! children:
//! ```text
//! [0] offsets  end offset of each element in the blob
//! [1] blob     concatenated payloads
//! [2] nulls    1 for a null element, 0 otherwise
//! ```

use crate::alloc::Allocator;
use crate::array::Array;
use crate::error::{BitleafError, Result};
use crate::string::blob::ArrayBlob;
use crate::types::{NodeFlags, Ref};

#[derive(Debug, Clone)]
pub struct ArraySmallBlobs {
    top: Array,
    offsets: Array,
    blob: ArrayBlob,
    nulls: Array,
}

impl ArraySmallBlobs {
    pub fn new(alloc: Allocator) -> Self {
        Self {
            top: Array::new(alloc.clone()),
            offsets: Array::new(alloc.clone()),
            blob: ArrayBlob::new(alloc.clone()),
            nulls: Array::new(alloc),
        }
    }

    pub fn create(&mut self) -> Result<()> {
        self.offsets.create(NodeFlags::normal())?;
        self.blob.create()?;
        self.nulls.create(NodeFlags::normal())?;
        self.top.create(NodeFlags::has_refs())?;
        self.top.add(self.offsets.get_ref() as i64)?;
        self.top.add(self.blob.get_ref() as i64)?;
        self.top.add(self.nulls.get_ref() as i64)
    }

    pub fn init_from_ref(&mut self, r: Ref) -> Result<()> {
        self.top.init_from_ref(r)?;
        if !self.top.has_refs() || self.top.context_flag() || self.top.size() != 3 {
            self.top.detach();
            return Err(BitleafError::Corruption(format!(
                "node at {r:#x} is not a small blobs leaf"
            )));
        }
        self.offsets.init_from_ref(self.top.get_as_ref(0))?;
        self.blob.init_from_ref(self.top.get_as_ref(1))?;
        self.nulls.init_from_ref(self.top.get_as_ref(2))
    }

    pub fn allocator(&self) -> &Allocator {
        self.top.allocator()
    }

    pub fn get_ref(&self) -> Ref {
        self.top.get_ref()
    }

    pub fn size(&self) -> usize {
        self.offsets.size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Children move when they grow; point the top node at their new refs.
    fn sync_refs(&mut self) -> Result<()> {
        let refs = [self.offsets.get_ref(), self.blob.get_ref(), self.nulls.get_ref()];
        for (i, r) in refs.into_iter().enumerate() {
            if self.top.get_as_ref(i) != r {
                self.top.set_as_ref(i, r)?;
            }
        }
        Ok(())
    }

    fn begin(&self, ndx: usize) -> usize {
        if ndx == 0 {
            0
        } else {
            self.offsets.get(ndx - 1) as usize
        }
    }

    pub fn get(&self, ndx: usize) -> Option<Vec<u8>> {
        assert!(ndx < self.size(), "index {ndx} out of bounds ({})", self.size());
        if self.nulls.get(ndx) != 0 {
            return None;
        }
        let end = self.offsets.get(ndx) as usize;
        Some(self.blob.get(self.begin(ndx), end))
    }

    pub fn get_string(&self, ndx: usize) -> Option<String> {
        self.get(ndx)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn is_null(&self, ndx: usize) -> bool {
        self.nulls.get(ndx) != 0
    }

    pub fn set(&mut self, ndx: usize, value: Option<&[u8]>) -> Result<()> {
        let size = self.size();
        assert!(ndx < size, "index {ndx} out of bounds ({size})");
        let data = value.unwrap_or_default();
        let (begin, end) = (self.begin(ndx), self.offsets.get(ndx) as usize);
        self.blob.replace(begin, end, data)?;
        let diff = data.len() as i64 - (end - begin) as i64;
        self.offsets.adjust(ndx, size, diff)?;
        self.nulls.set(ndx, i64::from(value.is_none()))?;
        self.sync_refs()
    }

    pub fn insert(&mut self, ndx: usize, value: Option<&[u8]>) -> Result<()> {
        let size = self.size();
        assert!(ndx <= size, "insert position {ndx} out of bounds ({size})");
        let data = value.unwrap_or_default();
        let pos = self.begin(ndx);
        self.blob.insert(pos, data)?;
        self.offsets.insert(ndx, (pos + data.len()) as i64)?;
        self.offsets.adjust(ndx + 1, size + 1, data.len() as i64)?;
        self.nulls.insert(ndx, i64::from(value.is_none()))?;
        self.sync_refs()
    }

    pub fn add(&mut self, value: Option<&[u8]>) -> Result<()> {
        self.insert(self.size(), value)
    }

    pub fn erase(&mut self, ndx: usize) -> Result<()> {
        let size = self.size();
        assert!(ndx < size, "index {ndx} out of bounds ({size})");
        let (begin, end) = (self.begin(ndx), self.offsets.get(ndx) as usize);
        self.blob.erase(begin, end)?;
        self.offsets.erase(ndx)?;
        self.offsets.adjust(ndx, size - 1, -((end - begin) as i64))?;
        self.nulls.erase(ndx)?;
        self.sync_refs()
    }

    pub fn truncate(&mut self, new_size: usize) -> Result<()> {
        assert!(new_size <= self.size(), "cannot truncate to a larger size");
        let blob_end = self.begin(new_size);
        self.blob.truncate(blob_end)?;
        self.offsets.truncate(new_size)?;
        self.nulls.truncate(new_size)?;
        self.sync_refs()
    }

    pub fn clear(&mut self) -> Result<()> {
        self.truncate(0)
    }

    pub fn find_first(&self, value: Option<&[u8]>, begin: usize, end: usize) -> Option<usize> {
        let end = end.min(self.size());
        (begin..end).find(|&i| self.get(i).as_deref() == value)
    }

    /// Release the top node and its three children.
    pub fn destroy(&mut self) {
        self.top.destroy_deep();
    }
}
