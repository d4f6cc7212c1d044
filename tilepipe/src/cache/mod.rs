//! Cache tiers: bounded in-memory tile cache and capacity-bounded disk
//! store.
//!
//! Each cache owns exactly one lock scoped to its instance; no lock spans
//! both caches, so a memory operation never waits on disk I/O and vice
//! versa.

mod disk;
mod index;
mod memory;

pub use disk::{DiskCache, DiskHit};
pub use memory::MemoryCache;

use thiserror::Error;

/// Errors from disk cache operations.
///
/// Read misses are not errors; these cover real I/O and index failures.
/// Per the pipeline's error policy a failed cache write is logged and
/// skipped, never escalated into a request failure once the tile bytes
/// are already in hand.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem operation failed.
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The persisted index could not be read or parsed.
    #[error("cache index unusable: {0}")]
    Index(String),
}

/// Point-in-time counters for one cache tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found an entry.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Entries written.
    pub insertions: u64,
    /// Entries removed to satisfy a bound.
    pub evictions: u64,
    /// Current entry count.
    pub entries: u64,
    /// Current resident bytes (disk: file bytes; memory: not tracked,
    /// the bound is entry count).
    pub bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_default_is_zeroed() {
        let stats = CacheStats::default();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.entries, 0);
    }
}
