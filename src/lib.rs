//! BITLEAF - Columnar Leaf Storage
//!
//! The array layer beneath a columnar B+-tree: every column leaf, inner
//! node and dictionary is a header-prefixed node in one arena.
//!
//! ## Features
//! - **Packed integers**: elements stored at the smallest bit width that
//!   fits, widened in place when a larger value arrives
//! - **Compression**: packed (narrowest signed width) or flex (dictionary)
//!   encoding of integer leaves, whichever gains more
//! - **Nullable integers**: a sentinel value in slot 0 marks nulls
//! - **String leaves**: short, medium, big and enum representations
//! - **B+-tree leaf contract**: insert with split, erase, size
//! - **Snapshots**: CRC32-checked images, attached read-only and
//!   copied on write
//! - **Metrics**: atomic counters for allocator and encoding events
//!
//! ## Example
//! ```no_run
//! use bitleaf::{Allocator, Array, Config, NodeFlags};
//!
//! let alloc = Allocator::new(Config::default()).unwrap();
//! let mut leaf = Array::new(alloc);
//! leaf.create(NodeFlags::normal()).unwrap();
//! for v in [5, 5, 5, 5, 100_000_000_000] {
//!     leaf.add(v).unwrap();
//! }
//! assert!(leaf.try_compress().unwrap());
//! assert_eq!(leaf.get_compressed_value(4), Some(100_000_000_000));
//! ```

pub mod alloc;
pub mod array;
pub mod config;
pub mod error;
pub mod string;
pub mod types;

pub use alloc::snapshot::{ArrayWriter, SnapshotWriter};
pub use alloc::Allocator;
pub use array::bptree::{BpTreeLeaf, TreeInsert};
pub use array::int_null::ArrayIntNull;
pub use array::Array;
pub use config::Config;
pub use error::{BitleafError, Result};
pub use string::{ArrayString, LeafType, StringEnumKeys};
pub use types::{MemRef, NodeFlags, Ref, NULL_REF};
