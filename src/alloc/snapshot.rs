//! BITLEAF - Snapshot Images
//! Persists a tree of nodes as a single checksummed image that can be
//! attached again as the read-only part of an arena.
//!
//! ## Binary Format
//! ```text
//! [magic: 8 bytes "BITLEAF\0"][version: 4 bytes (LE)][reserved: 4 bytes]
//! [node][node]...                       every node 8-byte aligned
//! [footer: bincode(SnapshotFooter)]     version, top ref, data length, crc32
//! [magic: 8 bytes]
//! ```
//! Refs inside the image are offsets from the start of the image, so the
//! data region can be loaded into an arena verbatim. The CRC covers the
//! whole data region (file header and nodes).

use std::fs::File;
use std::io::Write;
use std::path::Path;

use bytes::{BufMut, Bytes, BytesMut};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::alloc::Allocator;
use crate::error::{BitleafError, Result};
use crate::types::Ref;

pub const MAGIC: &[u8; 8] = b"BITLEAF\0";
pub const FORMAT_VERSION: u32 = 1;
pub const FILE_HEADER_SIZE: usize = 16;

/// Trailer describing the data region of an image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFooter {
    pub version: u32,
    pub top_ref: u64,
    pub data_len: u64,
    pub checksum: u32,
}

impl SnapshotFooter {
    fn encoded_len() -> Result<usize> {
        Ok(bincode::serialized_size(&SnapshotFooter::default())? as usize)
    }
}

/// Destination for serialized nodes.
pub trait ArrayWriter {
    /// Append one node (header included) and return its ref in the output.
    fn write_array(&mut self, bytes: &[u8]) -> Result<Ref>;
}

/// Builds a snapshot image in memory.
#[derive(Debug)]
pub struct SnapshotWriter {
    buf: BytesMut,
}

impl SnapshotWriter {
    /// Start an empty image.
    pub fn new() -> Self {
        let mut buf = BytesMut::with_capacity(4096);
        buf.put_slice(MAGIC);
        buf.put_u32_le(FORMAT_VERSION);
        buf.put_u32_le(0);
        Self { buf }
    }

    /// Continue the image currently attached to `alloc`. Nodes that were
    /// never modified keep their refs, so writers may reuse them.
    pub fn append_to(alloc: &Allocator) -> Self {
        let image = alloc.image();
        if image.len() <= FILE_HEADER_SIZE || &image[..MAGIC.len()] != MAGIC {
            return Self::new();
        }
        let mut buf = BytesMut::with_capacity(image.len() + 4096);
        buf.put_slice(&image);
        Self { buf }
    }

    /// Ref the next node will receive.
    pub fn position(&self) -> Ref {
        self.buf.len()
    }

    /// Seal the image with its footer.
    pub fn finish(self, top_ref: Ref) -> Result<Bytes> {
        let mut buf = self.buf;
        let footer = SnapshotFooter {
            version: FORMAT_VERSION,
            top_ref: top_ref as u64,
            data_len: buf.len() as u64,
            checksum: crc32fast::hash(&buf),
        };
        let encoded = bincode::serialize(&footer)?;
        buf.put_slice(&encoded);
        buf.put_slice(MAGIC);
        Ok(buf.freeze())
    }

    /// Seal the image and write it to `path`, syncing before returning.
    pub fn commit(self, path: impl AsRef<Path>, top_ref: Ref) -> Result<usize> {
        let image = self.finish(top_ref)?;
        let mut file = File::create(path.as_ref())?;
        file.write_all(&image)?;
        file.sync_all()?; // fsync for durability
        info!(
            "committed snapshot {} ({} bytes, top ref {:#x})",
            path.as_ref().display(),
            image.len(),
            top_ref
        );
        Ok(image.len())
    }
}

impl Default for SnapshotWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ArrayWriter for SnapshotWriter {
    fn write_array(&mut self, bytes: &[u8]) -> Result<Ref> {
        let pos = self.buf.len();
        self.buf.put_slice(bytes);
        let padding = (8 - bytes.len() % 8) % 8;
        self.buf.put_bytes(0, padding);
        Ok(pos)
    }
}

/// Validate an image and split off its data region.
pub fn parse_image(image: &[u8]) -> Result<(SnapshotFooter, &[u8])> {
    let footer_len = SnapshotFooter::encoded_len()?;
    let min_len = FILE_HEADER_SIZE + footer_len + MAGIC.len();
    if image.len() < min_len {
        return Err(BitleafError::Corruption(format!(
            "image of {} bytes is too short",
            image.len()
        )));
    }
    if &image[..MAGIC.len()] != MAGIC || &image[image.len() - MAGIC.len()..] != MAGIC {
        warn!("rejected image: bad magic");
        return Err(BitleafError::Corruption("bad magic".to_string()));
    }

    let footer_start = image.len() - MAGIC.len() - footer_len;
    let footer: SnapshotFooter =
        bincode::deserialize(&image[footer_start..image.len() - MAGIC.len()])?;
    if footer.version != FORMAT_VERSION {
        return Err(BitleafError::Corruption(format!(
            "unsupported format version {}",
            footer.version
        )));
    }
    if footer.data_len as usize != footer_start {
        return Err(BitleafError::Corruption(format!(
            "footer claims {} data bytes, image holds {}",
            footer.data_len, footer_start
        )));
    }

    let data = &image[..footer_start];
    let actual = crc32fast::hash(data);
    if actual != footer.checksum {
        warn!(
            "rejected image: checksum {:#010x}, expected {:#010x}",
            actual, footer.checksum
        );
        return Err(BitleafError::Corruption(format!(
            "CRC mismatch: expected {:#010x}, got {:#010x}",
            footer.checksum, actual
        )));
    }

    let top = footer.top_ref as usize;
    if top != 0 && (top % 8 != 0 || top < FILE_HEADER_SIZE || top >= data.len()) {
        return Err(BitleafError::Corruption(format!(
            "top ref {top:#x} outside the data region"
        )));
    }
    Ok((footer, data))
}
