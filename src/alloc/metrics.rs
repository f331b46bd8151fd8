//! BITLEAF - Storage Metrics & Observability
//! Atomic counters tracking allocator traffic and encoding changes
//! (width expansions, compressions, null re-seeding, leaf upgrades).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Operation counters shared by an allocator and every accessor built on it.
///
/// Counters use `Ordering::Relaxed`; they are read for reporting only.
#[derive(Debug)]
pub struct AllocMetrics {
    /// Number of chunks handed out.
    pub allocs: AtomicU64,
    /// Number of chunks released.
    pub frees: AtomicU64,
    /// Number of chunk relocations (grow or shrink).
    pub reallocs: AtomicU64,
    /// Total bytes handed out.
    pub bytes_allocated: AtomicU64,
    /// Read-only nodes copied before their first mutation.
    pub copy_on_writes: AtomicU64,
    /// Integer arrays re-encoded at a wider element width.
    pub width_expansions: AtomicU64,
    /// Successful compressions (packed or flex).
    pub compressions: AtomicU64,
    /// Compression attempts that found no gain.
    pub compress_rejections: AtomicU64,
    /// Compressed arrays expanded back to the plain encoding.
    pub decompressions: AtomicU64,
    /// Times a nullable array moved its null sentinel.
    pub null_reseeds: AtomicU64,
    /// String leaves upgraded to a wider representation.
    pub leaf_upgrades: AtomicU64,
    started: Instant,
}

impl AllocMetrics {
    pub fn new() -> Self {
        Self {
            allocs: AtomicU64::new(0),
            frees: AtomicU64::new(0),
            reallocs: AtomicU64::new(0),
            bytes_allocated: AtomicU64::new(0),
            copy_on_writes: AtomicU64::new(0),
            width_expansions: AtomicU64::new(0),
            compressions: AtomicU64::new(0),
            compress_rejections: AtomicU64::new(0),
            decompressions: AtomicU64::new(0),
            null_reseeds: AtomicU64::new(0),
            leaf_upgrades: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn record_alloc(&self, size: usize) {
        self.allocs.fetch_add(1, Ordering::Relaxed);
        self.bytes_allocated.fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn record_free(&self) {
        self.frees.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_realloc(&self) {
        self.reallocs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_copy_on_write(&self) {
        self.copy_on_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_width_expansion(&self) {
        self.width_expansions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of a compression attempt.
    pub fn record_compress(&self, compressed: bool) {
        if compressed {
            self.compressions.fetch_add(1, Ordering::Relaxed);
        } else {
            self.compress_rejections.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_decompress(&self) {
        self.decompressions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_null_reseed(&self) {
        self.null_reseeds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_leaf_upgrade(&self) {
        self.leaf_upgrades.fetch_add(1, Ordering::Relaxed);
    }

    /// Chunks currently handed out and not yet released.
    pub fn live_chunks(&self) -> u64 {
        self.allocs
            .load(Ordering::Relaxed)
            .saturating_sub(self.frees.load(Ordering::Relaxed))
    }

    pub fn uptime_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Format metrics as a human-readable report.
    pub fn report(&self) -> String {
        format!(
            "\n═══ BITLEAF Storage Metrics ═══\n\
             Allocator:\n\
               allocs:        {}\n\
               frees:         {}\n\
               reallocs:      {}\n\
               live chunks:   {}\n\
               allocated:     {} bytes\n\
               copy-on-write: {}\n\
             Encoding:\n\
               width expansions:    {}\n\
               compressions:        {}\n\
               compress rejections: {}\n\
               decompressions:      {}\n\
               null reseeds:        {}\n\
               leaf upgrades:       {}\n\
             Uptime: {:.2}s",
            self.allocs.load(Ordering::Relaxed),
            self.frees.load(Ordering::Relaxed),
            self.reallocs.load(Ordering::Relaxed),
            self.live_chunks(),
            self.bytes_allocated.load(Ordering::Relaxed),
            self.copy_on_writes.load(Ordering::Relaxed),
            self.width_expansions.load(Ordering::Relaxed),
            self.compressions.load(Ordering::Relaxed),
            self.compress_rejections.load(Ordering::Relaxed),
            self.decompressions.load(Ordering::Relaxed),
            self.null_reseeds.load(Ordering::Relaxed),
            self.leaf_upgrades.load(Ordering::Relaxed),
            self.uptime_secs(),
        )
    }
}

impl Default for AllocMetrics {
    fn default() -> Self {
        Self::new()
    }
}
