//! BITLEAF - Custom Error Types
//! Defines the error hierarchy for the array storage layer.

use thiserror::Error;

use crate::types::Ref;

/// Custom Result type for bitleaf.
pub type Result<T> = std::result::Result<T, BitleafError>;

/// Error types for the array storage layer.
///
/// Logical misuse (index out of range, using a detached accessor) is a
/// programming error and panics instead of surfacing here.
#[derive(Error, Debug)]
pub enum BitleafError {
    /// The arena could not grow to satisfy an allocation.
    #[error("Out of memory: requested {requested} bytes, arena limit is {limit} bytes")]
    OutOfMemory { requested: usize, limit: usize },

    /// A node would hold more elements than its header can describe.
    #[error("Node too large: {size} elements, header limit is {limit}")]
    CapacityExceeded { size: usize, limit: usize },

    /// I/O errors from snapshot files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot footer encode/decode errors.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Data corruption detected (bad magic, CRC mismatch, malformed header).
    #[error("Data corruption detected: {0}")]
    Corruption(String),

    /// A ref that does not point at a node inside the arena.
    #[error("Invalid ref: {0:#x}")]
    InvalidRef(Ref),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for BitleafError {
    fn from(err: bincode::Error) -> Self {
        BitleafError::Serialization(err.to_string())
    }
}
