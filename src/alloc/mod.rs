//! BITLEAF - Slab Allocator
//! Owns the arena every node lives in and hands out refs (8-byte aligned
//! offsets) to chunks of it.
//!
//! ## Arena layout
//! ```text
//! [0 .. 16)          reserved (file header of an attached image)
//! [16 .. baseline)   attached image, read-only, copy-on-write
//! [baseline .. len)  chunks allocated since, first-fit free list
//! ```
//! Accessors never hold addresses. Every read or write goes through
//! [`Allocator::read`] / [`Allocator::write`], whose closure borrows the
//! chunk for the duration of one call, so a relocation can never leave a
//! dangling slice behind.

pub mod metrics;
pub mod snapshot;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;
use std::rc::Rc;

use log::{debug, info, trace};

use crate::array::header::{Header, HEADER_SIZE};
use crate::config::Config;
use crate::error::{BitleafError, Result};
use crate::types::{align8, MemRef, Ref};

use metrics::AllocMetrics;
use snapshot::FILE_HEADER_SIZE;

/// Bytes at the start of the arena that never hold a node, so that ref 0
/// stays the null ref.
pub const ARENA_RESERVED: usize = FILE_HEADER_SIZE;

/// The arena proper. Wrapped by [`Allocator`] for shared use.
#[derive(Debug)]
pub struct SlabAlloc {
    arena: Vec<u8>,
    /// Refs below this offset belong to an attached, read-only image.
    baseline: usize,
    /// Live chunks above the baseline: ref -> reserved bytes.
    chunks: BTreeMap<Ref, usize>,
    /// Released chunks available for reuse: ref -> bytes.
    free_list: BTreeMap<Ref, usize>,
    max_arena_size: usize,
}

impl SlabAlloc {
    pub fn new(max_arena_size: usize) -> Self {
        Self {
            arena: vec![0; ARENA_RESERVED],
            baseline: ARENA_RESERVED,
            chunks: BTreeMap::new(),
            free_list: BTreeMap::new(),
            max_arena_size,
        }
    }

    pub fn arena_size(&self) -> usize {
        self.arena.len()
    }

    pub fn baseline(&self) -> usize {
        self.baseline
    }

    pub fn live_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn free_bytes(&self) -> usize {
        self.free_list.values().sum()
    }

    pub fn is_read_only(&self, r: Ref) -> bool {
        r < self.baseline
    }

    /// Reserve `size` bytes (rounded up to 8), zero-filled.
    pub fn alloc(&mut self, size: usize) -> Result<MemRef> {
        let size = align8(size.max(HEADER_SIZE));

        let fit = self
            .free_list
            .iter()
            .find(|&(_, &len)| len >= size)
            .map(|(&r, &len)| (r, len));
        if let Some((r, len)) = fit {
            self.free_list.remove(&r);
            if len > size {
                self.free_list.insert(r + size, len - size);
            }
            self.arena[r..r + size].fill(0);
            self.chunks.insert(r, size);
            trace!("alloc {} bytes at {:#x} (reused)", size, r);
            return Ok(MemRef::new(r, size));
        }

        let r = self.arena.len();
        let end = r + size;
        if end > self.max_arena_size {
            return Err(BitleafError::OutOfMemory {
                requested: size,
                limit: self.max_arena_size,
            });
        }
        self.arena.resize(end, 0);
        self.chunks.insert(r, size);
        trace!("alloc {} bytes at {:#x}", size, r);
        Ok(MemRef::new(r, size))
    }

    /// Move a chunk to a new reservation of `new_size` bytes, keeping the
    /// common prefix. Read-only chunks are copied and left in place.
    pub fn realloc(&mut self, r: Ref, new_size: usize) -> Result<MemRef> {
        let old_size = self.chunk_size(r)?;
        let mem = self.alloc(new_size)?;
        let keep = old_size.min(mem.size);
        self.arena.copy_within(r..r + keep, mem.ref_);
        self.free(r);
        Ok(mem)
    }

    /// Release a chunk. Releasing a read-only ref is a no-op; the image
    /// it belongs to is immutable.
    pub fn free(&mut self, r: Ref) {
        if self.is_read_only(r) {
            return;
        }
        let Some(mut len) = self.chunks.remove(&r) else {
            debug_assert!(false, "free of unknown ref {r:#x}");
            return;
        };
        let mut start = r;

        if let Some((&prev, &prev_len)) = self.free_list.range(..start).next_back() {
            if prev + prev_len == start {
                self.free_list.remove(&prev);
                start = prev;
                len += prev_len;
            }
        }
        if let Some(next_len) = self.free_list.remove(&(start + len)) {
            len += next_len;
        }

        if start + len == self.arena.len() {
            self.arena.truncate(start);
        } else {
            self.free_list.insert(start, len);
        }
        trace!("free {:#x}", r);
    }

    /// Reserved bytes of the chunk at `r`.
    pub fn chunk_size(&self, r: Ref) -> Result<usize> {
        if r % 8 != 0 || r < ARENA_RESERVED {
            return Err(BitleafError::InvalidRef(r));
        }
        if self.is_read_only(r) {
            if r + HEADER_SIZE > self.baseline {
                return Err(BitleafError::InvalidRef(r));
            }
            let header = Header::decode(&self.arena[r..r + HEADER_SIZE])?;
            let size = header.byte_size();
            if r + size > self.baseline {
                return Err(BitleafError::Corruption(format!(
                    "node at {r:#x} runs past the end of the image"
                )));
            }
            return Ok(size);
        }
        self.chunks.get(&r).copied().ok_or(BitleafError::InvalidRef(r))
    }

    pub fn translate(&self, r: Ref) -> Result<&[u8]> {
        let size = self.chunk_size(r)?;
        Ok(&self.arena[r..r + size])
    }

    pub fn translate_mut(&mut self, r: Ref) -> Result<&mut [u8]> {
        if self.is_read_only(r) {
            return Err(BitleafError::InvalidRef(r));
        }
        let size = self.chunk_size(r)?;
        Ok(&mut self.arena[r..r + size])
    }

    /// Replace the whole arena with the data region of an image.
    fn attach(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.max_arena_size {
            return Err(BitleafError::OutOfMemory {
                requested: data.len(),
                limit: self.max_arena_size,
            });
        }
        self.arena = data.to_vec();
        self.baseline = data.len();
        self.chunks.clear();
        self.free_list.clear();
        Ok(())
    }

    /// The read-only region, file header included.
    pub fn image(&self) -> &[u8] {
        &self.arena[..self.baseline]
    }

    fn reset(&mut self) {
        self.arena = vec![0; ARENA_RESERVED];
        self.baseline = ARENA_RESERVED;
        self.chunks.clear();
        self.free_list.clear();
    }
}

/// Shared handle on a [`SlabAlloc`]. Cloning is cheap; every clone sees
/// the same arena. Single-threaded by construction (`!Send`).
#[derive(Clone)]
pub struct Allocator {
    inner: Rc<RefCell<SlabAlloc>>,
    config: Rc<Config>,
    metrics: Rc<AllocMetrics>,
}

impl std::fmt::Debug for Allocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slab = self.inner.borrow();
        f.debug_struct("Allocator")
            .field("arena_size", &slab.arena_size())
            .field("baseline", &slab.baseline())
            .field("live_chunks", &slab.live_chunks())
            .finish()
    }
}

impl Allocator {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Rc::new(RefCell::new(SlabAlloc::new(config.max_arena_size))),
            config: Rc::new(config),
            metrics: Rc::new(AllocMetrics::new()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &AllocMetrics {
        &self.metrics
    }

    /// True when both handles share one arena.
    pub fn same_arena(&self, other: &Allocator) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn alloc(&self, size: usize) -> Result<MemRef> {
        let mem = self.inner.borrow_mut().alloc(size)?;
        self.metrics.record_alloc(mem.size);
        Ok(mem)
    }

    pub fn realloc(&self, r: Ref, new_size: usize) -> Result<MemRef> {
        let mem = self.inner.borrow_mut().realloc(r, new_size)?;
        self.metrics.record_realloc();
        self.metrics.record_alloc(mem.size);
        if !self.is_read_only(r) {
            self.metrics.record_free();
        }
        Ok(mem)
    }

    pub fn free(&self, r: Ref) {
        if !self.is_read_only(r) {
            self.metrics.record_free();
        }
        self.inner.borrow_mut().free(r);
    }

    pub fn is_read_only(&self, r: Ref) -> bool {
        self.inner.borrow().is_read_only(r)
    }

    pub fn chunk_size(&self, r: Ref) -> Result<usize> {
        self.inner.borrow().chunk_size(r)
    }

    /// Decode the header of the node at `r`, validating the ref.
    pub fn read_header(&self, r: Ref) -> Result<Header> {
        let slab = self.inner.borrow();
        let chunk = slab.translate(r)?;
        let header = Header::decode(chunk)?;
        if !header.is_compressed() && header.byte_size() > chunk.len() {
            return Err(BitleafError::Corruption(format!(
                "node at {r:#x} is larger than its chunk"
            )));
        }
        Ok(header)
    }

    /// Run `f` over the bytes of the chunk at `r`.
    ///
    /// Panics if `r` is not a live chunk; accessors only hold refs that
    /// were validated when they were attached or allocated.
    pub fn read<R>(&self, r: Ref, f: impl FnOnce(&[u8]) -> R) -> R {
        let slab = self.inner.borrow();
        match slab.translate(r) {
            Ok(chunk) => f(chunk),
            Err(err) => panic!("read through stale ref {r:#x}: {err}"),
        }
    }

    /// Run `f` over the writable bytes of the chunk at `r`.
    ///
    /// Panics if `r` is read-only or not a live chunk; writers copy nodes
    /// out of the image before mutating them.
    pub fn write<R>(&self, r: Ref, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut slab = self.inner.borrow_mut();
        match slab.translate_mut(r) {
            Ok(chunk) => f(chunk),
            Err(err) => panic!("write through stale ref {r:#x}: {err}"),
        }
    }

    /// Copy of the read-only image (file header included).
    pub fn image(&self) -> Vec<u8> {
        self.inner.borrow().image().to_vec()
    }

    pub fn arena_size(&self) -> usize {
        self.inner.borrow().arena_size()
    }

    pub fn live_chunks(&self) -> usize {
        self.inner.borrow().live_chunks()
    }

    pub fn free_bytes(&self) -> usize {
        self.inner.borrow().free_bytes()
    }

    /// Attach a snapshot image and return its top ref.
    ///
    /// Every accessor created before the call is invalidated.
    pub fn attach_image(&self, image: &[u8]) -> Result<Ref> {
        let (footer, data) = snapshot::parse_image(image)?;
        self.inner.borrow_mut().attach(data)?;
        info!(
            "attached image: {} data bytes, top ref {:#x}",
            data.len(),
            footer.top_ref
        );
        Ok(footer.top_ref as Ref)
    }

    /// Read a snapshot file into the arena and return its top ref.
    pub fn attach_file(&self, path: impl AsRef<Path>) -> Result<Ref> {
        let path = path.as_ref();
        let image = std::fs::read(path)?;
        debug!("read {} bytes from {}", image.len(), path.display());
        self.attach_image(&image)
    }

    /// Drop everything and return to an empty arena.
    pub fn detach(&self) {
        self.inner.borrow_mut().reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_alloc() -> Allocator {
        Allocator::new(Config::new().with_max_arena_size(1024)).unwrap()
    }

    #[test]
    fn test_alloc_is_aligned_and_zeroed() {
        let alloc = small_alloc();
        let a = alloc.alloc(13).unwrap();
        assert_eq!(a.ref_ % 8, 0);
        assert_eq!(a.size, 16);
        assert!(a.ref_ >= ARENA_RESERVED);
        alloc.read(a.ref_, |bytes| assert!(bytes.iter().all(|&b| b == 0)));
    }

    #[test]
    fn test_free_list_reuse_and_coalesce() {
        let alloc = small_alloc();
        let a = alloc.alloc(32).unwrap();
        let b = alloc.alloc(32).unwrap();
        let c = alloc.alloc(32).unwrap();
        alloc.write(a.ref_, |bytes| bytes.fill(0xAA));
        alloc.free(a.ref_);
        alloc.free(b.ref_);
        assert_eq!(alloc.free_bytes(), 64);

        // First fit splits the coalesced block and zero-fills it.
        let d = alloc.alloc(16).unwrap();
        assert_eq!(d.ref_, a.ref_);
        alloc.read(d.ref_, |bytes| assert!(bytes.iter().all(|&b| b == 0)));
        assert_eq!(alloc.free_bytes(), 48);

        // Freeing the tail chunk shrinks the arena.
        let end = alloc.arena_size();
        alloc.free(c.ref_);
        assert!(alloc.arena_size() < end);
    }

    #[test]
    fn test_out_of_memory() {
        let alloc = small_alloc();
        let err = alloc.alloc(4096).unwrap_err();
        assert!(matches!(err, BitleafError::OutOfMemory { limit: 1024, .. }));
    }

    #[test]
    fn test_realloc_keeps_prefix() {
        let alloc = small_alloc();
        let a = alloc.alloc(16).unwrap();
        alloc.write(a.ref_, |bytes| bytes.copy_from_slice(&[7u8; 16]));
        let _pin = alloc.alloc(8).unwrap();
        let b = alloc.realloc(a.ref_, 64).unwrap();
        assert_ne!(a.ref_, b.ref_);
        alloc.read(b.ref_, |bytes| {
            assert_eq!(&bytes[..16], &[7u8; 16]);
            assert!(bytes[16..].iter().all(|&x| x == 0));
        });
        assert!(alloc.chunk_size(a.ref_).is_err());
    }

    #[test]
    fn test_invalid_refs() {
        let alloc = small_alloc();
        assert!(matches!(alloc.chunk_size(0), Err(BitleafError::InvalidRef(0))));
        assert!(matches!(alloc.chunk_size(13), Err(BitleafError::InvalidRef(13))));
        assert!(alloc.read_header(512).is_err());
    }
}
