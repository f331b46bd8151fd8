//! BITLEAF - Node Base
//! The machinery every node kind shares: creation, attachment to an
//! existing ref, growth, copy-on-write and release.

use log::debug;

use crate::alloc::Allocator;
use crate::array::header::{
    calc_byte_size, Encoding, Header, WidthType, HEADER_SIZE, MAX_ARRAY_PAYLOAD_ALIGNED,
    MAX_ARRAY_SIZE,
};
use crate::error::{BitleafError, Result};
use crate::types::{align8, MemRef, NodeFlags, Ref, NULL_REF};

fn check_size(size: usize) -> Result<()> {
    if size > MAX_ARRAY_SIZE {
        return Err(BitleafError::CapacityExceeded {
            size,
            limit: MAX_ARRAY_SIZE,
        });
    }
    Ok(())
}

/// Accessor for a single header-prefixed chunk.
///
/// The decoded header is cached and rewritten to the arena on every change,
/// so the arena copy stays authoritative.
#[derive(Debug, Clone)]
pub struct Node {
    alloc: Allocator,
    ref_: Ref,
    header: Header,
}

impl Node {
    /// A detached accessor.
    pub fn new(alloc: Allocator) -> Self {
        Self {
            alloc,
            ref_: NULL_REF,
            header: Header::plain(NodeFlags::normal(), WidthType::Bits, 0, 0, 0),
        }
    }

    pub fn allocator(&self) -> &Allocator {
        &self.alloc
    }

    pub fn is_attached(&self) -> bool {
        self.ref_ != NULL_REF
    }

    pub fn get_ref(&self) -> Ref {
        self.ref_
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn size(&self) -> usize {
        self.header.size
    }

    pub fn flags(&self) -> NodeFlags {
        self.header.flags
    }

    /// Bytes used by the node, header included.
    pub fn byte_size(&self) -> usize {
        self.header.byte_size()
    }

    /// Allocate a fresh plain node of `size` zeroed elements.
    pub fn create(&mut self, wtype: WidthType, flags: NodeFlags, width: u8, size: usize) -> Result<()> {
        check_size(size)?;
        let needed = calc_byte_size(wtype, size, width);
        let capacity = align8(needed.max(self.alloc.config().initial_array_capacity));
        let mem = self.alloc.alloc(capacity)?;
        let header = Header::plain(flags, wtype, width, size, mem.size);
        self.alloc.write(mem.ref_, |chunk| header.write_to(chunk));
        self.ref_ = mem.ref_;
        self.header = header;
        Ok(())
    }

    pub fn init_from_ref(&mut self, r: Ref) -> Result<()> {
        let header = self.alloc.read_header(r)?;
        self.ref_ = r;
        self.header = header;
        Ok(())
    }

    pub fn init_from_mem(&mut self, mem: MemRef) -> Result<()> {
        self.init_from_ref(mem.ref_)
    }

    /// Forget the node without releasing it.
    pub fn detach(&mut self) {
        self.ref_ = NULL_REF;
    }

    /// Release the chunk. No-op when detached.
    pub fn destroy(&mut self) {
        if self.is_attached() {
            self.alloc.free(self.ref_);
            self.ref_ = NULL_REF;
        }
    }

    /// Switch to a freshly built node, releasing the current one.
    pub fn replace(&mut self, r: Ref, header: Header) {
        if self.is_attached() {
            self.alloc.free(self.ref_);
        }
        self.ref_ = r;
        self.header = header;
    }

    fn write_header(&self) {
        let header = self.header;
        self.alloc.write(self.ref_, |chunk| header.write_to(chunk));
    }

    /// Move a node that belongs to an attached image into writable memory.
    /// The ref changes; nothing happens for nodes that are already writable.
    pub fn copy_on_write(&mut self) -> Result<()> {
        debug_assert!(self.is_attached());
        if !self.alloc.is_read_only(self.ref_) {
            return Ok(());
        }
        let byte_size = self.header.byte_size();
        let mem = self.alloc.realloc(self.ref_, byte_size)?;
        debug!("copy-on-write {:#x} -> {:#x}", self.ref_, mem.ref_);
        self.ref_ = mem.ref_;
        if let Encoding::Plain { .. } = self.header.encoding {
            self.header.capacity = mem.size;
        }
        self.write_header();
        self.alloc.metrics().record_copy_on_write();
        Ok(())
    }

    /// Make room for `size` elements of `width` and record both in the
    /// header. Growth doubles the capacity. The payload keeps its bytes;
    /// re-encoding at a new width is the caller's job.
    pub fn alloc_payload(&mut self, size: usize, width: u8) -> Result<()> {
        debug_assert!(!self.alloc.is_read_only(self.ref_), "copy_on_write first");
        check_size(size)?;
        let Encoding::Plain { wtype, .. } = self.header.encoding else {
            panic!("alloc_payload on a compressed node");
        };
        let needed = calc_byte_size(wtype, size, width);
        if needed - HEADER_SIZE > MAX_ARRAY_PAYLOAD_ALIGNED {
            return Err(BitleafError::OutOfMemory {
                requested: needed,
                limit: MAX_ARRAY_PAYLOAD_ALIGNED + HEADER_SIZE,
            });
        }
        if needed > self.header.capacity {
            let doubled = (self.header.capacity * 2).min(MAX_ARRAY_PAYLOAD_ALIGNED + HEADER_SIZE);
            let new_capacity = align8(doubled.max(needed));
            let mem = self.alloc.realloc(self.ref_, new_capacity)?;
            self.ref_ = mem.ref_;
            self.header.capacity = mem.size;
        }
        self.header.size = size;
        self.header.encoding = Encoding::Plain { wtype, width };
        self.write_header();
        Ok(())
    }

    /// Record a new element count; the capacity is unchanged.
    pub fn set_size(&mut self, size: usize) {
        debug_assert!(size <= MAX_ARRAY_SIZE);
        self.header.size = size;
        self.write_header();
    }

    /// Record a new element width without touching the payload.
    pub fn set_width(&mut self, width: u8) {
        if let Encoding::Plain { wtype, .. } = self.header.encoding {
            self.header.encoding = Encoding::Plain { wtype, width };
            self.write_header();
        }
    }

    pub fn set_flags(&mut self, flags: NodeFlags) {
        self.header.flags = flags;
        self.write_header();
    }

    /// Run `f` over the payload (bytes after the header).
    #[inline]
    pub fn payload<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        debug_assert!(self.is_attached(), "use of a detached accessor");
        self.alloc.read(self.ref_, |chunk| f(&chunk[HEADER_SIZE..]))
    }

    /// Run `f` over the writable payload. Call `copy_on_write` first.
    #[inline]
    pub fn payload_mut<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        debug_assert!(self.is_attached(), "use of a detached accessor");
        self.alloc.write(self.ref_, |chunk| f(&mut chunk[HEADER_SIZE..]))
    }
}
