//! Capacity-bounded on-disk tile store with watermark trimming.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cache::index::{unix_now, DiskIndex};
use crate::cache::{CacheError, CacheStats};
use crate::config::DiskCacheConfig;
use crate::coord::TileKey;

/// A disk cache read hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskHit {
    /// The cached tile bytes.
    pub bytes: Bytes,
    /// True when the entry is older than the configured maximum age. The
    /// provider chain treats an expired hit as a miss with fallback bytes:
    /// later tiers are consulted, and the stale bytes are served only if
    /// every one of them fails.
    pub expired: bool,
}

/// On-disk tile store.
///
/// Tiles live at `<root>/<provider>/<zoom>/<x>/<y><ext>`. Cumulative size
/// is tracked incrementally from a persisted index (or a full scan when
/// the index is missing or corrupt) so `put` never rescans the tree.
///
/// When a write pushes usage over `max_bytes`, the oldest entries by last
/// access are deleted until usage falls under `trim_target_bytes` — a
/// two-threshold hysteresis, so routine writes near the ceiling do not
/// trim every time. All mutation goes through the one lock scoped to this
/// instance.
pub struct DiskCache {
    root: PathBuf,
    provider_name: String,
    extension: String,
    max_bytes: u64,
    trim_target_bytes: u64,
    max_age: Duration,
    index_flush_every: usize,
    index: Mutex<DiskIndex>,
    hits: AtomicU64,
    misses: AtomicU64,
    insertions: AtomicU64,
    evictions: AtomicU64,
}

impl DiskCache {
    /// Opens the cache, loading the persisted index or scanning the tree.
    ///
    /// If usage already exceeds the ceiling (the limit was lowered between
    /// runs), a trim runs before the cache is handed out.
    pub fn open(config: &DiskCacheConfig, provider_name: &str, extension: &str) -> Result<Self, CacheError> {
        fs::create_dir_all(&config.root)?;

        let index = match DiskIndex::load(&config.root) {
            Ok(index) => {
                debug!(
                    entries = index.len(),
                    bytes = index.total_bytes(),
                    "loaded disk cache index"
                );
                index
            }
            Err(e) => {
                info!(error = %e, "disk cache index unusable, scanning directory");
                scan_tree(&config.root, provider_name, extension)?
            }
        };

        let cache = Self {
            root: config.root.clone(),
            provider_name: provider_name.to_string(),
            extension: extension.to_string(),
            max_bytes: config.max_bytes,
            trim_target_bytes: config.trim_target_bytes.min(config.max_bytes),
            max_age: config.max_age,
            index_flush_every: config.index_flush_every.max(1),
            index: Mutex::new(index),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            insertions: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        };

        {
            let mut index = cache.index.lock();
            if index.total_bytes() > cache.max_bytes {
                cache.trim_locked(&mut index, cache.trim_target_bytes);
            }
            if let Err(e) = index.save(&cache.root) {
                warn!(error = %e, "failed to persist disk cache index at startup");
            }
        }

        Ok(cache)
    }

    /// The filesystem path for one tile.
    pub fn tile_path(&self, key: &TileKey) -> PathBuf {
        self.root
            .join(&self.provider_name)
            .join(key.zoom().to_string())
            .join(key.x().to_string())
            .join(format!("{}{}", key.y(), self.extension))
    }

    /// Reads a tile, bumping its access metadata on hit.
    ///
    /// An index entry whose file has vanished is dropped from the index
    /// and reported as a miss.
    pub fn get(&self, key: &TileKey) -> Option<DiskHit> {
        let mut index = self.index.lock();

        let meta = match index.get(key) {
            Some(meta) => meta,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let path = self.tile_path(key);
        match fs::read(&path) {
            Ok(data) => {
                index.touch(key);
                self.maybe_flush(&mut index);
                self.hits.fetch_add(1, Ordering::Relaxed);
                let expired =
                    unix_now().saturating_sub(meta.written_secs) > self.max_age.as_secs();
                Some(DiskHit {
                    bytes: Bytes::from(data),
                    expired,
                })
            }
            Err(e) => {
                warn!(tile = %key, error = %e, "cached tile unreadable, dropping from index");
                index.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Writes a tile, trimming synchronously if usage exceeds the ceiling.
    pub fn put(&self, key: &TileKey, data: &[u8]) -> Result<(), CacheError> {
        let path = self.tile_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut index = self.index.lock();
        fs::write(&path, data)?;
        index.record(*key, data.len() as u64);
        self.insertions.fetch_add(1, Ordering::Relaxed);

        if index.total_bytes() > self.max_bytes {
            self.trim_locked(&mut index, self.trim_target_bytes);
        }
        self.maybe_flush(&mut index);
        Ok(())
    }

    /// Deletes a tile if present. Returns whether anything was removed.
    pub fn remove(&self, key: &TileKey) -> Result<bool, CacheError> {
        let mut index = self.index.lock();
        if index.remove(key).is_none() {
            return Ok(false);
        }
        match fs::remove_file(self.tile_path(key)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.maybe_flush(&mut index);
        Ok(true)
    }

    /// Whether the tile is tracked.
    pub fn contains(&self, key: &TileKey) -> bool {
        self.index.lock().contains(key)
    }

    /// Current cumulative size of all cached tiles.
    pub fn current_size_bytes(&self) -> u64 {
        self.index.lock().total_bytes()
    }

    /// Number of cached tiles.
    pub fn entry_count(&self) -> usize {
        self.index.lock().len()
    }

    /// The hard ceiling.
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Deletes oldest-by-last-access entries until usage is at or below
    /// `target_bytes`. Returns the bytes freed. A cache already under the
    /// target is untouched.
    pub fn trim(&self, target_bytes: u64) -> u64 {
        let mut index = self.index.lock();
        self.trim_locked(&mut index, target_bytes)
    }

    /// Persists the index immediately.
    pub fn flush_index(&self) -> Result<(), CacheError> {
        self.index.lock().save(&self.root)
    }

    /// Deletes every cached tile and resets accounting.
    pub fn clear(&self) -> Result<(), CacheError> {
        let mut index = self.index.lock();
        for (key, _) in index.oldest_first() {
            let _ = fs::remove_file(self.tile_path(&key));
        }
        index.clear();
        index.save(&self.root)
    }

    /// Counter snapshot.
    pub fn stats(&self) -> CacheStats {
        let index = self.index.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            insertions: self.insertions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: index.len() as u64,
            bytes: index.total_bytes(),
        }
    }

    fn trim_locked(&self, index: &mut DiskIndex, target_bytes: u64) -> u64 {
        if index.total_bytes() <= target_bytes {
            return 0;
        }

        let mut freed = 0u64;
        let mut removed = 0u64;
        for (key, meta) in index.oldest_first() {
            if index.total_bytes() <= target_bytes {
                break;
            }
            match fs::remove_file(self.tile_path(&key)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(tile = %key, error = %e, "failed to delete during trim");
                    continue;
                }
            }
            index.remove(&key);
            freed += meta.size_bytes;
            removed += 1;
        }

        self.evictions.fetch_add(removed, Ordering::Relaxed);
        info!(
            removed,
            freed_bytes = freed,
            remaining_bytes = index.total_bytes(),
            "trimmed disk cache"
        );
        freed
    }

    fn maybe_flush(&self, index: &mut DiskIndex) {
        if index.dirty_ops() >= self.index_flush_every {
            if let Err(e) = index.save(&self.root) {
                warn!(error = %e, "failed to persist disk cache index");
            }
        }
    }
}

/// Rebuilds the index by walking `<root>/<provider>`.
///
/// File modification time stands in for both the write and last-access
/// time; unparseable paths are skipped.
fn scan_tree(root: &Path, provider_name: &str, extension: &str) -> Result<DiskIndex, CacheError> {
    let mut index = DiskIndex::new();
    let provider_dir = root.join(provider_name);
    if !provider_dir.is_dir() {
        return Ok(index);
    }

    let ext = extension.trim_start_matches('.');
    for zoom_entry in fs::read_dir(&provider_dir)? {
        let zoom_dir = zoom_entry?.path();
        let Some(zoom) = parse_component(&zoom_dir).filter(|z| *z <= crate::coord::MAX_ZOOM as u32)
        else {
            continue;
        };
        if !zoom_dir.is_dir() {
            continue;
        }
        for x_entry in fs::read_dir(&zoom_dir)? {
            let x_dir = x_entry?.path();
            let Some(x) = parse_component(&x_dir) else {
                continue;
            };
            if !x_dir.is_dir() {
                continue;
            }
            for y_entry in fs::read_dir(&x_dir)? {
                let tile_file = y_entry?.path();
                if tile_file.extension().and_then(|s| s.to_str()) != Some(ext) {
                    continue;
                }
                let Some(y) = tile_file
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.parse::<u32>().ok())
                else {
                    continue;
                };
                let Ok(key) = TileKey::new(zoom as u8, x, y) else {
                    continue;
                };
                let Ok(meta) = fs::metadata(&tile_file) else {
                    continue;
                };
                index.record(key, meta.len());
            }
        }
    }

    debug!(
        entries = index.len(),
        bytes = index.total_bytes(),
        "rebuilt disk cache index from scan"
    );
    Ok(index)
}

fn parse_component(path: &Path) -> Option<u32> {
    path.file_name()?.to_str()?.parse().ok()
}
