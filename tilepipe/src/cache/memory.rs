//! Bounded, access-ordered in-memory cache of decoded tiles.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use linked_hash_map::LinkedHashMap;
use parking_lot::Mutex;

use crate::cache::CacheStats;
use crate::coord::TileKey;
use crate::tile::DecodedTile;

/// In-memory tile cache bounded by entry count.
///
/// Eviction is least-recently-used where "used" is any read or write;
/// entries that have never been touched since insertion fall out in
/// insertion order. `put` hands the evicted entry back to the caller so
/// the decoded raster is released at a known point rather than by
/// whenever the allocator gets around to it.
pub struct MemoryCache {
    inner: Mutex<LinkedHashMap<TileKey, Arc<DecodedTile>>>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    insertions: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryCache {
    /// Creates a cache holding at most `max_entries` decoded tiles.
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(LinkedHashMap::new()),
            max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            insertions: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Looks up a tile, refreshing its recency on hit.
    pub fn get(&self, key: &TileKey) -> Option<Arc<DecodedTile>> {
        let mut inner = self.inner.lock();
        match inner.get_refresh(key) {
            Some(tile) => {
                let tile = Arc::clone(tile);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(tile)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Inserts a tile, returning the entry evicted to stay within bounds.
    ///
    /// Re-inserting an existing key counts as a use and moves it to the
    /// most-recent position. The caller must release the returned entry.
    pub fn put(&self, key: TileKey, tile: Arc<DecodedTile>) -> Option<(TileKey, Arc<DecodedTile>)> {
        let mut inner = self.inner.lock();

        // Remove-then-insert so a replaced key also moves to the
        // most-recent end (a write is a use).
        inner.remove(&key);
        inner.insert(key, tile);
        self.insertions.fetch_add(1, Ordering::Relaxed);

        if inner.len() > self.max_entries {
            let evicted = inner.pop_front();
            if evicted.is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
            evicted
        } else {
            None
        }
    }

    /// Whether the key is resident. Does not refresh recency.
    pub fn contains(&self, key: &TileKey) -> bool {
        self.inner.lock().contains_key(key)
    }

    /// Current number of resident tiles.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// True when no tiles are resident.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// The configured entry bound.
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Drops every resident tile.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Counter snapshot.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            insertions: self.insertions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len() as u64,
            bytes: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::tests::tiny_png;
    use bytes::Bytes;

    fn tile(x: u32) -> (TileKey, Arc<DecodedTile>) {
        let key = TileKey::new(15, x, 100).unwrap();
        let tile = DecodedTile::decode(key, Bytes::from(tiny_png())).unwrap();
        (key, Arc::new(tile))
    }

    #[test]
    fn test_put_and_get() {
        let cache = MemoryCache::new(4);
        let (key, t) = tile(1);

        assert!(cache.put(key, t).is_none());
        let hit = cache.get(&key).unwrap();
        assert_eq!(hit.key(), key);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_miss_returns_none() {
        let cache = MemoryCache::new(4);
        let (key, _) = tile(1);
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn test_eviction_is_insertion_ordered_when_untouched() {
        let cache = MemoryCache::new(2);
        let (k1, t1) = tile(1);
        let (k2, t2) = tile(2);
        let (k3, t3) = tile(3);

        assert!(cache.put(k1, t1).is_none());
        assert!(cache.put(k2, t2).is_none());

        // Third insert exceeds the bound; the oldest untouched entry goes.
        let evicted = cache.put(k3, t3).unwrap();
        assert_eq!(evicted.0, k1);
        assert!(!cache.contains(&k1));
        assert!(cache.contains(&k2));
        assert!(cache.contains(&k3));
    }

    #[test]
    fn test_get_refreshes_recency() {
        let cache = MemoryCache::new(2);
        let (k1, t1) = tile(1);
        let (k2, t2) = tile(2);
        let (k3, t3) = tile(3);

        cache.put(k1, t1);
        cache.put(k2, t2);

        // Touch k1 so k2 becomes least recently used.
        cache.get(&k1);

        let evicted = cache.put(k3, t3).unwrap();
        assert_eq!(evicted.0, k2);
        assert!(cache.contains(&k1));
    }

    #[test]
    fn test_rewrite_refreshes_recency() {
        let cache = MemoryCache::new(2);
        let (k1, t1) = tile(1);
        let (k2, t2) = tile(2);
        let (k3, t3) = tile(3);

        cache.put(k1, t1);
        cache.put(k2, t2);

        // Rewriting k1 counts as a use.
        let (_, t1b) = tile(1);
        cache.put(k1, t1b);

        let evicted = cache.put(k3, t3).unwrap();
        assert_eq!(evicted.0, k2);
    }

    #[test]
    fn test_replace_does_not_grow() {
        let cache = MemoryCache::new(4);
        let (k1, t1) = tile(1);
        let (_, t1b) = tile(1);

        cache.put(k1, t1);
        assert!(cache.put(k1, t1b).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_zero_capacity_evicts_immediately() {
        let cache = MemoryCache::new(0);
        let (k1, t1) = tile(1);

        let evicted = cache.put(k1, t1).unwrap();
        assert_eq!(evicted.0, k1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear() {
        let cache = MemoryCache::new(4);
        let (k1, t1) = tile(1);
        cache.put(k1, t1);

        cache.clear();
        assert!(cache.is_empty());
        assert!(!cache.contains(&k1));
    }

    #[test]
    fn test_stats_counters() {
        let cache = MemoryCache::new(1);
        let (k1, t1) = tile(1);
        let (k2, t2) = tile(2);

        cache.get(&k1); // miss
        cache.put(k1, t1);
        cache.get(&k1); // hit
        cache.put(k2, t2); // evicts k1

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.insertions, 2);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_concurrent_access() {
        use std::thread;

        let cache = Arc::new(MemoryCache::new(64));
        let mut handles = Vec::new();
        for i in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(thread::spawn(move || {
                for j in 0..16 {
                    let (key, t) = tile(i * 16 + j);
                    cache.put(key, t);
                    assert!(cache.get(&key).is_some());
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 64);
    }
}
