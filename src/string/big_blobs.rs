//! BITLEAF - Big Blobs Leaf
//! One blob node per element. The top node has refs and the context flag
//! set; a zero element is null.

use log::trace;

use crate::alloc::Allocator;
use crate::array::{destroy_child, Array};
use crate::error::{BitleafError, Result};
use crate::string::blob::{read_blob, ArrayBlob};
use crate::types::{NodeFlags, Ref, NULL_REF};

#[derive(Debug, Clone)]
pub struct ArrayBigBlobs {
    top: Array,
}

impl ArrayBigBlobs {
    pub fn new(alloc: Allocator) -> Self {
        Self { top: Array::new(alloc) }
    }

    pub fn create(&mut self) -> Result<()> {
        self.top.create(NodeFlags::has_refs().with_context_flag(true))
    }

    pub fn init_from_ref(&mut self, r: Ref) -> Result<()> {
        self.top.init_from_ref(r)?;
        if !self.top.has_refs() || !self.top.context_flag() {
            self.top.detach();
            return Err(BitleafError::Corruption(format!(
                "node at {r:#x} is not a big blobs leaf"
            )));
        }
        Ok(())
    }

    pub fn allocator(&self) -> &Allocator {
        self.top.allocator()
    }

    pub fn get_ref(&self) -> Ref {
        self.top.get_ref()
    }

    pub fn size(&self) -> usize {
        self.top.size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn get(&self, ndx: usize) -> Option<Vec<u8>> {
        match self.top.get_as_ref(ndx) {
            NULL_REF => None,
            r => Some(read_blob(self.allocator(), r)),
        }
    }

    pub fn get_string(&self, ndx: usize) -> Option<String> {
        self.get(ndx)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn is_null(&self, ndx: usize) -> bool {
        self.top.get_as_ref(ndx) == NULL_REF
    }

    fn new_blob(&self, data: &[u8]) -> Result<Ref> {
        let mut blob = ArrayBlob::new(self.allocator().clone());
        blob.create()?;
        if let Err(err) = blob.add(data) {
            blob.destroy();
            return Err(err);
        }
        trace!("blob of {} bytes at {:#x}", data.len(), blob.get_ref());
        Ok(blob.get_ref())
    }

    pub fn set(&mut self, ndx: usize, value: Option<&[u8]>) -> Result<()> {
        let old = self.top.get_as_ref(ndx);
        let new = match (old, value) {
            (NULL_REF, None) => return Ok(()),
            (_, None) => {
                self.allocator().free(old);
                NULL_REF
            }
            (NULL_REF, Some(data)) => self.new_blob(data)?,
            (_, Some(data)) => {
                let mut blob = ArrayBlob::from_ref(self.allocator().clone(), old)?;
                blob.replace(0, blob.size(), data)?;
                blob.get_ref()
            }
        };
        if new != old {
            self.top.set_as_ref(ndx, new)?;
        }
        Ok(())
    }

    pub fn insert(&mut self, ndx: usize, value: Option<&[u8]>) -> Result<()> {
        let r = match value {
            Some(data) => self.new_blob(data)?,
            None => NULL_REF,
        };
        if let Err(err) = self.top.insert(ndx, r as i64) {
            if r != NULL_REF {
                self.allocator().free(r);
            }
            return Err(err);
        }
        Ok(())
    }

    pub fn add(&mut self, value: Option<&[u8]>) -> Result<()> {
        self.insert(self.size(), value)
    }

    pub fn erase(&mut self, ndx: usize) -> Result<()> {
        destroy_child(self.allocator(), self.top.get(ndx));
        self.top.erase(ndx)
    }

    pub fn truncate(&mut self, new_size: usize) -> Result<()> {
        self.top.truncate_and_destroy_children(new_size)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.truncate(0)
    }

    pub fn find_first(&self, value: Option<&[u8]>, begin: usize, end: usize) -> Option<usize> {
        let end = end.min(self.size());
        (begin..end).find(|&i| self.get(i).as_deref() == value)
    }

    pub fn destroy(&mut self) {
        self.top.destroy_deep();
    }
}
