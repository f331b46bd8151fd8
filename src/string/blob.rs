//! BITLEAF - Blob Node
//! A header followed by raw bytes; the header size counts bytes.

use crate::alloc::Allocator;
use crate::array::header::{Encoding, Header, WidthType, HEADER_SIZE};
use crate::array::node::Node;
use crate::error::{BitleafError, Result};
use crate::types::{NodeFlags, Ref};

/// Bytes of the blob node at `r`.
pub(crate) fn read_blob(alloc: &Allocator, r: Ref) -> Vec<u8> {
    alloc.read(r, |chunk| match Header::decode(chunk) {
        Ok(header) => chunk[HEADER_SIZE..HEADER_SIZE + header.size].to_vec(),
        Err(err) => panic!("blob at {r:#x} is unreadable: {err}"),
    })
}

#[derive(Debug, Clone)]
pub struct ArrayBlob {
    node: Node,
}

impl ArrayBlob {
    pub fn new(alloc: Allocator) -> Self {
        Self { node: Node::new(alloc) }
    }

    pub fn from_ref(alloc: Allocator, r: Ref) -> Result<Self> {
        let mut blob = Self::new(alloc);
        blob.init_from_ref(r)?;
        Ok(blob)
    }

    pub fn create(&mut self) -> Result<()> {
        self.node.create(WidthType::Ignore, NodeFlags::normal(), 0, 0)
    }

    pub fn init_from_ref(&mut self, r: Ref) -> Result<()> {
        self.node.init_from_ref(r)?;
        if let Encoding::Plain {
            wtype: WidthType::Ignore,
            ..
        } = self.node.header().encoding
        {
            return Ok(());
        }
        self.node.detach();
        Err(BitleafError::Corruption(format!("node at {r:#x} is not a blob")))
    }

    pub fn get_ref(&self) -> Ref {
        self.node.get_ref()
    }

    /// Length in bytes.
    pub fn size(&self) -> usize {
        self.node.size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn get(&self, begin: usize, end: usize) -> Vec<u8> {
        assert!(begin <= end && end <= self.size(), "blob range {begin}..{end} out of bounds");
        self.node.payload(|data| data[begin..end].to_vec())
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.get(0, self.size())
    }

    /// Replace `[begin, end)` with `data`, growing or shrinking the blob.
    pub fn replace(&mut self, begin: usize, end: usize, data: &[u8]) -> Result<()> {
        let size = self.size();
        assert!(begin <= end && end <= size, "blob range {begin}..{end} out of bounds");
        self.node.copy_on_write()?;
        let new_size = size - (end - begin) + data.len();
        if new_size > size {
            self.node.alloc_payload(new_size, 0)?;
        }
        self.node.payload_mut(|payload| {
            payload.copy_within(end..size, begin + data.len());
            payload[begin..begin + data.len()].copy_from_slice(data);
        });
        if new_size < size {
            self.node.set_size(new_size);
        }
        Ok(())
    }

    pub fn insert(&mut self, pos: usize, data: &[u8]) -> Result<()> {
        self.replace(pos, pos, data)
    }

    pub fn add(&mut self, data: &[u8]) -> Result<()> {
        self.replace(self.size(), self.size(), data)
    }

    pub fn erase(&mut self, begin: usize, end: usize) -> Result<()> {
        self.replace(begin, end, &[])
    }

    pub fn truncate(&mut self, new_size: usize) -> Result<()> {
        let size = self.size();
        self.replace(new_size, size, &[])
    }

    pub fn clear(&mut self) -> Result<()> {
        self.truncate(0)
    }

    pub fn destroy(&mut self) {
        self.node.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_blob_edits() {
        let alloc = Allocator::new(Config::default()).unwrap();
        let mut blob = ArrayBlob::new(alloc.clone());
        blob.create().unwrap();
        blob.add(b"hello").unwrap();
        blob.add(b" world").unwrap();
        assert_eq!(blob.bytes(), b"hello world");
        blob.insert(5, b",").unwrap();
        assert_eq!(blob.bytes(), b"hello, world");
        blob.replace(0, 5, b"goodbye").unwrap();
        assert_eq!(blob.bytes(), b"goodbye, world");
        blob.erase(7, 9).unwrap();
        assert_eq!(blob.bytes(), b"goodbyeworld");
        blob.truncate(4).unwrap();
        assert_eq!(blob.bytes(), b"good");
        assert_eq!(read_blob(&alloc, blob.get_ref()), b"good");
    }

    #[test]
    fn test_large_blob_grows() {
        let alloc = Allocator::new(Config::default()).unwrap();
        let mut blob = ArrayBlob::new(alloc);
        blob.create().unwrap();
        let data = vec![0x5Au8; 10_000];
        blob.add(&data).unwrap();
        blob.add(b"!").unwrap();
        assert_eq!(blob.size(), 10_001);
        assert_eq!(blob.get(9_999, 10_001), vec![0x5A, b'!']);
    }

    #[test]
    fn test_rejects_integer_node() {
        let alloc = Allocator::new(Config::default()).unwrap();
        let mut arr = crate::array::Array::new(alloc.clone());
        arr.create(NodeFlags::normal()).unwrap();
        assert!(matches!(
            ArrayBlob::from_ref(alloc, arr.get_ref()),
            Err(BitleafError::Corruption(_))
        ));
    }
}
