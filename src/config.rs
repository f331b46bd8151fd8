//! BITLEAF - Storage Configuration
//! Defines tunable parameters for the allocator and array accessors.

use crate::error::{BitleafError, Result};

/// Configuration for an allocator and every accessor built on it.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bytes reserved (header included) when a new array is created.
    pub initial_array_capacity: usize,

    /// Upper bound on the arena size; growth past it fails with `OutOfMemory`.
    pub max_arena_size: usize,

    /// Number of elements at which a B+-tree leaf splits on insert.
    pub max_bpnode_size: usize,

    /// Seed for the random null-sentinel source of `ArrayIntNull`.
    /// `None` seeds from entropy.
    pub null_seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            initial_array_capacity: 128,
            max_arena_size: 1024 * 1024 * 1024, // 1 GiB
            max_bpnode_size: 1000,
            null_seed: None,
        }
    }
}

impl Config {
    /// Create a Config with the default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the arena size limit.
    pub fn with_max_arena_size(mut self, size: usize) -> Self {
        self.max_arena_size = size;
        self
    }

    /// Set the leaf split threshold.
    pub fn with_max_bpnode_size(mut self, size: usize) -> Self {
        self.max_bpnode_size = size;
        self
    }

    /// Set the initial array capacity in bytes.
    pub fn with_initial_array_capacity(mut self, size: usize) -> Self {
        self.initial_array_capacity = size;
        self
    }

    /// Make null-sentinel selection reproducible.
    pub fn with_null_seed(mut self, seed: u64) -> Self {
        self.null_seed = Some(seed);
        self
    }

    /// Reject parameter combinations the allocator cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.initial_array_capacity < 16 || self.initial_array_capacity % 8 != 0 {
            return Err(BitleafError::Config(format!(
                "initial_array_capacity must be a multiple of 8 and at least 16, got {}",
                self.initial_array_capacity
            )));
        }
        if self.max_bpnode_size < 2 {
            return Err(BitleafError::Config(format!(
                "max_bpnode_size must be at least 2, got {}",
                self.max_bpnode_size
            )));
        }
        if self.max_arena_size < self.initial_array_capacity {
            return Err(BitleafError::Config(
                "max_arena_size is smaller than a single array".to_string(),
            ));
        }
        Ok(())
    }
}
