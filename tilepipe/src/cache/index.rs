//! Persisted disk-cache index.
//!
//! The index records every cached tile's size, last access and access
//! count, so byte accounting and LRU trimming work without rescanning the
//! filesystem on every write. It is saved as JSON next to the cached
//! tiles and reloaded at startup; when absent or unparseable, the disk
//! cache falls back to a full directory scan.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::cache::CacheError;
use crate::coord::TileKey;

/// File name of the persisted index inside the cache root.
pub(crate) const INDEX_FILE_NAME: &str = "index.json";

/// Per-entry metadata tracked by the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct EntryMeta {
    /// Size of the cached file in bytes.
    pub size_bytes: u64,
    /// Unix seconds of the last read or write.
    pub last_access_secs: u64,
    /// Unix seconds the entry was written.
    pub written_secs: u64,
    /// Number of reads since insertion.
    pub access_count: u32,
}

/// Serialized index record; flat so the JSON stays a plain array.
#[derive(Debug, Serialize, Deserialize)]
struct IndexRecord {
    key: TileKey,
    #[serde(flatten)]
    meta: EntryMeta,
}

/// In-memory view of the persisted index.
///
/// Not synchronized; the owning [`DiskCache`](super::DiskCache) guards it
/// with the cache instance's lock.
#[derive(Debug, Default)]
pub(crate) struct DiskIndex {
    entries: HashMap<TileKey, EntryMeta>,
    total_bytes: u64,
    dirty_ops: usize,
}

impl DiskIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the index from `root`, failing if it is absent or corrupt so
    /// the caller can fall back to scanning.
    pub fn load(root: &Path) -> Result<Self, CacheError> {
        let path = root.join(INDEX_FILE_NAME);
        let data = fs::read(&path)?;
        let records: Vec<IndexRecord> = serde_json::from_slice(&data)
            .map_err(|e| CacheError::Index(format!("{}: {e}", path.display())))?;

        let mut index = Self::new();
        for record in records {
            index.total_bytes += record.meta.size_bytes;
            index.entries.insert(record.key, record.meta);
        }
        Ok(index)
    }

    /// Writes the index under `root`, clearing the dirty counter.
    pub fn save(&mut self, root: &Path) -> Result<(), CacheError> {
        let records: Vec<IndexRecord> = self
            .entries
            .iter()
            .map(|(key, meta)| IndexRecord {
                key: *key,
                meta: *meta,
            })
            .collect();
        let data = serde_json::to_vec(&records)
            .map_err(|e| CacheError::Index(format!("serialize: {e}")))?;
        fs::write(root.join(INDEX_FILE_NAME), data)?;
        self.dirty_ops = 0;
        Ok(())
    }

    /// Records an insert or overwrite, keeping the byte total exact.
    pub fn record(&mut self, key: TileKey, size_bytes: u64) {
        let now = unix_now();
        let meta = EntryMeta {
            size_bytes,
            last_access_secs: now,
            written_secs: now,
            access_count: 0,
        };
        if let Some(old) = self.entries.insert(key, meta) {
            self.total_bytes = self.total_bytes.saturating_sub(old.size_bytes);
        }
        self.total_bytes += size_bytes;
        self.dirty_ops += 1;
    }

    /// Bumps the access metadata for a read hit.
    pub fn touch(&mut self, key: &TileKey) {
        if let Some(meta) = self.entries.get_mut(key) {
            meta.last_access_secs = unix_now();
            meta.access_count = meta.access_count.saturating_add(1);
            self.dirty_ops += 1;
        }
    }

    /// Removes an entry, returning its metadata.
    pub fn remove(&mut self, key: &TileKey) -> Option<EntryMeta> {
        let removed = self.entries.remove(key);
        if let Some(meta) = removed {
            self.total_bytes = self.total_bytes.saturating_sub(meta.size_bytes);
            self.dirty_ops += 1;
        }
        removed
    }

    /// Metadata for one entry.
    pub fn get(&self, key: &TileKey) -> Option<EntryMeta> {
        self.entries.get(key).copied()
    }

    /// Whether the entry is tracked.
    pub fn contains(&self, key: &TileKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Sum of tracked entry sizes.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Number of tracked entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Mutations since the last save.
    pub fn dirty_ops(&self) -> usize {
        self.dirty_ops
    }

    /// Entries ordered oldest last-access first, the trim order.
    pub fn oldest_first(&self) -> Vec<(TileKey, EntryMeta)> {
        let mut entries: Vec<(TileKey, EntryMeta)> =
            self.entries.iter().map(|(k, m)| (*k, *m)).collect();
        entries.sort_by_key(|(_, meta)| meta.last_access_secs);
        entries
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
        self.dirty_ops += 1;
    }

    /// Backdates an entry's last access. Wall-clock seconds are too coarse
    /// for ordering tests that run in microseconds.
    #[cfg(test)]
    pub fn set_last_access(&mut self, key: &TileKey, secs: u64) {
        if let Some(meta) = self.entries.get_mut(key) {
            meta.last_access_secs = secs;
        }
    }
}

/// Current time as unix seconds.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
