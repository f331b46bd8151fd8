//! BITLEAF - Core Type Definitions
//! Defines fundamental types used across the storage layer.

/// Offset of a node inside the allocator's arena.
/// Refs are always 8-byte aligned; `0` is the null ref.
pub type Ref = usize;

/// The null ref: "no node".
pub const NULL_REF: Ref = 0;

/// A ref paired with the number of bytes reserved for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemRef {
    pub ref_: Ref,
    pub size: usize,
}

impl MemRef {
    pub fn new(ref_: Ref, size: usize) -> Self {
        Self { ref_, size }
    }
}

/// Round `size` up to the next multiple of 8.
#[inline]
pub fn align8(size: usize) -> usize {
    (size + 7) & !7
}

/// Node-level flags stored in every header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeFlags {
    /// Inner B+-tree node (as opposed to a leaf).
    pub is_inner_bptree_node: bool,
    /// Even, non-zero elements are refs to child nodes.
    pub has_refs: bool,
    /// Interpretation hint: big blobs vs small blobs, enum vs literal.
    pub context_flag: bool,
}

impl NodeFlags {
    /// Flags of a plain integer leaf.
    pub fn normal() -> Self {
        Self::default()
    }

    /// Flags of a node whose elements are child refs.
    pub fn has_refs() -> Self {
        Self {
            has_refs: true,
            ..Self::default()
        }
    }

    pub fn with_context_flag(mut self, value: bool) -> Self {
        self.context_flag = value;
        self
    }
}
