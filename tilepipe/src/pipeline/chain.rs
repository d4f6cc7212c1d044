//! Ordered source chain with first-hit-wins resolution and write-up.
//!
//! Tiers are consulted memory → disk → archives → network; the first hit
//! ends the walk. Hits below the memory tier populate it on the way out,
//! and network hits are additionally written through to disk, so repeated
//! requests for the same tile converge onto the fastest tier. Archive hits
//! are not copied onto disk: archives are already local and immutable, and
//! duplicating their blobs would double disk usage for no latency gain.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::cache::{DiskCache, MemoryCache};
use crate::coord::TileKey;
use crate::pipeline::LoadError;
use crate::source::{ArchiveSource, NetworkSource};
use crate::tile::DecodedTile;

/// Which tier satisfied a resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedTier {
    /// Served from the in-memory cache.
    Memory,
    /// Served from the on-disk cache.
    Disk,
    /// Served from a packaged archive.
    Archive,
    /// Downloaded from the network.
    Network,
    /// Served from an expired disk entry after every later tier failed.
    StaleDisk,
}

/// A successful resolve.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// The encoded tile payload.
    pub bytes: Bytes,
    /// The tier that produced it.
    pub tier: ResolvedTier,
}

/// The fixed, ordered list of sources tried for each request.
pub struct ProviderChain {
    memory: Arc<MemoryCache>,
    disk: Option<Arc<DiskCache>>,
    archives: Vec<ArchiveSource>,
    network: Option<NetworkSource>,
}

impl ProviderChain {
    /// Assembles the chain. Absent tiers are simply skipped during
    /// resolution.
    pub fn new(
        memory: Arc<MemoryCache>,
        disk: Option<Arc<DiskCache>>,
        archives: Vec<ArchiveSource>,
        network: Option<NetworkSource>,
    ) -> Self {
        Self {
            memory,
            disk,
            archives,
            network,
        }
    }

    /// Resolves a tile through every tier in order.
    ///
    /// Failures inside one tier never abort the walk; only exhausting all
    /// of them yields an error. An expired disk entry is treated as a miss
    /// but kept as a fallback in case the network also fails.
    pub fn resolve(&self, key: &TileKey) -> Result<Resolution, LoadError> {
        if let Some(tile) = self.memory.get(key) {
            trace!(tile = %key, "memory hit");
            return Ok(Resolution {
                bytes: tile.bytes().clone(),
                tier: ResolvedTier::Memory,
            });
        }

        let mut stale: Option<Bytes> = None;

        if let Some(disk) = &self.disk {
            if let Some(hit) = disk.get(key) {
                if hit.expired {
                    trace!(tile = %key, "disk hit expired, continuing chain");
                    stale = Some(hit.bytes);
                } else {
                    match self.admit(key, hit.bytes.clone()) {
                        Ok(()) => {
                            return Ok(Resolution {
                                bytes: hit.bytes,
                                tier: ResolvedTier::Disk,
                            })
                        }
                        Err(e) => {
                            // Undecodable cached file: drop it and walk on.
                            warn!(tile = %key, error = %e, "corrupt disk entry, removing");
                            if let Err(e) = disk.remove(key) {
                                warn!(tile = %key, error = %e, "failed to remove corrupt entry");
                            }
                        }
                    }
                }
            }
        }

        for archive in &self.archives {
            match archive.get(key) {
                Ok(Some(bytes)) => match self.admit(key, bytes.clone()) {
                    Ok(()) => {
                        return Ok(Resolution {
                            bytes,
                            tier: ResolvedTier::Archive,
                        })
                    }
                    Err(e) => {
                        warn!(tile = %key, archive = %archive.path().display(), error = %e,
                            "undecodable archive tile, trying next source");
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    // A misbehaving archive is skipped, never fatal.
                    warn!(archive = %archive.path().display(), error = %e, "archive lookup failed");
                }
            }
        }

        if let Some(network) = &self.network {
            if network.supports_zoom(key.zoom()) {
                match network.fetch(key) {
                    Ok(bytes) => {
                        if let Err(e) = self.admit(key, bytes.clone()) {
                            // The server answered with something that is
                            // not a tile; nothing further can serve this.
                            return Err(LoadError::Decode(e.to_string()));
                        }
                        if let Some(disk) = &self.disk {
                            // A failed write-through must not fail the
                            // request; the tile is already in hand.
                            if let Err(e) = disk.put(key, &bytes) {
                                warn!(tile = %key, error = %e, "disk write-through failed");
                            }
                        }
                        debug!(tile = %key, "network fetch succeeded");
                        return Ok(Resolution {
                            bytes,
                            tier: ResolvedTier::Network,
                        });
                    }
                    Err(e) => {
                        if let Some(bytes) = stale {
                            debug!(tile = %key, error = %e, "network failed, serving stale disk entry");
                            let _ = self.admit(key, bytes.clone());
                            return Ok(Resolution {
                                bytes,
                                tier: ResolvedTier::StaleDisk,
                            });
                        }
                        return Err(LoadError::Fetch(e));
                    }
                }
            }
        }

        if let Some(bytes) = stale {
            let _ = self.admit(key, bytes.clone());
            return Ok(Resolution {
                bytes,
                tier: ResolvedTier::StaleDisk,
            });
        }

        Err(LoadError::Exhausted)
    }

    /// Bulk-operation resolve: disk → archives → network, bypassing the
    /// memory cache entirely and skipping decode (the bytes go straight to
    /// disk, not to a renderer).
    pub fn resolve_bypassing_memory(&self, key: &TileKey) -> Result<ResolvedTier, LoadError> {
        if let Some(disk) = &self.disk {
            if let Some(hit) = disk.get(key) {
                if !hit.expired {
                    return Ok(ResolvedTier::Disk);
                }
            }
        }

        for archive in &self.archives {
            match archive.get(key) {
                Ok(Some(_)) => return Ok(ResolvedTier::Archive),
                Ok(None) => {}
                Err(e) => {
                    warn!(archive = %archive.path().display(), error = %e, "archive lookup failed");
                }
            }
        }

        if let Some(network) = &self.network {
            if network.supports_zoom(key.zoom()) {
                let bytes = network.fetch(key).map_err(LoadError::Fetch)?;
                if let Some(disk) = &self.disk {
                    disk.put(key, &bytes).map_err(|e| {
                        LoadError::Decode(format!("disk write failed: {e}"))
                    })?;
                }
                return Ok(ResolvedTier::Network);
            }
        }

        Err(LoadError::Exhausted)
    }

    /// Decodes the payload and installs it in the memory cache, releasing
    /// whatever the insert evicted.
    fn admit(&self, key: &TileKey, bytes: Bytes) -> Result<(), image::ImageError> {
        let tile = DecodedTile::decode(*key, bytes)?;
        if let Some((evicted_key, evicted)) = self.memory.put(*key, Arc::new(tile)) {
            trace!(tile = %evicted_key, "memory cache evicted");
            if let Ok(tile) = Arc::try_unwrap(evicted) {
                tile.release();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiskCacheConfig;
    use crate::provider::{FetchError, MockHttpClient, ProviderDescriptor};
    use crate::tile::tests::tiny_png;
    use std::time::Duration;
    use tempfile::TempDir;

    fn descriptor() -> ProviderDescriptor {
        ProviderDescriptor::xyz("osm", "https://tile.example.org/{zoom}/{x}/{y}.png")
    }

    fn key() -> TileKey {
        TileKey::new(12, 100, 200).unwrap()
    }

    fn disk(dir: &TempDir) -> Arc<DiskCache> {
        let config = DiskCacheConfig::new(dir.path().to_path_buf());
        Arc::new(DiskCache::open(&config, "osm", ".png").unwrap())
    }

    fn network(client: Arc<MockHttpClient>) -> NetworkSource {
        NetworkSource::new(descriptor(), client)
    }

    #[test]
    fn test_network_hit_populates_memory_and_disk() {
        let dir = TempDir::new().unwrap();
        let memory = Arc::new(MemoryCache::new(8));
        let disk = disk(&dir);
        let client = Arc::new(MockHttpClient::ok(tiny_png()));
        let chain = ProviderChain::new(
            Arc::clone(&memory),
            Some(Arc::clone(&disk)),
            Vec::new(),
            Some(network(Arc::clone(&client))),
        );

        let resolution = chain.resolve(&key()).unwrap();
        assert_eq!(resolution.tier, ResolvedTier::Network);
        assert!(memory.contains(&key()));
        assert!(disk.contains(&key()));
        assert_eq!(client.call_count(), 1);
    }

    #[test]
    fn test_second_resolve_served_from_memory() {
        let dir = TempDir::new().unwrap();
        let memory = Arc::new(MemoryCache::new(8));
        let client = Arc::new(MockHttpClient::ok(tiny_png()));
        let chain = ProviderChain::new(
            Arc::clone(&memory),
            Some(disk(&dir)),
            Vec::new(),
            Some(network(Arc::clone(&client))),
        );

        chain.resolve(&key()).unwrap();
        let second = chain.resolve(&key()).unwrap();

        assert_eq!(second.tier, ResolvedTier::Memory);
        // Write-up convergence: no further network traffic.
        assert_eq!(client.call_count(), 1);
    }

    #[test]
    fn test_disk_hit_skips_network_and_populates_memory() {
        let dir = TempDir::new().unwrap();
        let memory = Arc::new(MemoryCache::new(8));
        let disk = disk(&dir);
        disk.put(&key(), &tiny_png()).unwrap();

        let client = Arc::new(MockHttpClient::ok(tiny_png()));
        let chain = ProviderChain::new(
            Arc::clone(&memory),
            Some(Arc::clone(&disk)),
            Vec::new(),
            Some(network(Arc::clone(&client))),
        );

        let resolution = chain.resolve(&key()).unwrap();
        assert_eq!(resolution.tier, ResolvedTier::Disk);
        assert!(memory.contains(&key()));
        assert_eq!(client.call_count(), 0);
    }

    #[test]
    fn test_archive_hit_populates_memory_but_not_disk() {
        let dir = TempDir::new().unwrap();
        let archive_dir = TempDir::new().unwrap();

        let archive_path = archive_dir.path().join("pack.sqlite");
        let conn = rusqlite::Connection::open(&archive_path).unwrap();
        conn.execute(
            "CREATE TABLE tiles (key INTEGER PRIMARY KEY, provider TEXT, tile BLOB)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO tiles (key, provider, tile) VALUES (?1, ?2, ?3)",
            rusqlite::params![key().pack(), "osm", tiny_png()],
        )
        .unwrap();
        drop(conn);

        let memory = Arc::new(MemoryCache::new(8));
        let disk = disk(&dir);
        let client = Arc::new(MockHttpClient::ok(tiny_png()));
        let chain = ProviderChain::new(
            Arc::clone(&memory),
            Some(Arc::clone(&disk)),
            vec![ArchiveSource::open(&archive_path).unwrap()],
            Some(network(Arc::clone(&client))),
        );

        let resolution = chain.resolve(&key()).unwrap();
        assert_eq!(resolution.tier, ResolvedTier::Archive);
        assert!(memory.contains(&key()));
        assert!(!disk.contains(&key()));
        assert_eq!(client.call_count(), 0);
    }

    #[test]
    fn test_network_failure_with_no_fallback_is_terminal() {
        let memory = Arc::new(MemoryCache::new(8));
        let client = Arc::new(MockHttpClient::failing(FetchError::Timeout));
        let chain = ProviderChain::new(memory, None, Vec::new(), Some(network(client)));

        let err = chain.resolve(&key()).unwrap_err();
        assert!(matches!(err, LoadError::Fetch(FetchError::Timeout)));
    }

    #[test]
    fn test_exhausted_when_no_sources_apply() {
        let memory = Arc::new(MemoryCache::new(8));
        let chain = ProviderChain::new(memory, None, Vec::new(), None);

        let err = chain.resolve(&key()).unwrap_err();
        assert!(matches!(err, LoadError::Exhausted));
    }

    #[test]
    fn test_zoom_outside_network_range_is_skipped() {
        let memory = Arc::new(MemoryCache::new(8));
        let client = Arc::new(MockHttpClient::ok(tiny_png()));
        let source = NetworkSource::new(
            descriptor().with_zoom_range(0, 10),
            Arc::clone(&client) as Arc<dyn crate::provider::HttpClient>,
        );
        let chain = ProviderChain::new(memory, None, Vec::new(), Some(source));

        // key() is zoom 12, outside the provider's range.
        let err = chain.resolve(&key()).unwrap_err();
        assert!(matches!(err, LoadError::Exhausted));
        assert_eq!(client.call_count(), 0);
    }

    #[test]
    fn test_expired_disk_entry_refetches_from_network() {
        let dir = TempDir::new().unwrap();
        let config = DiskCacheConfig::new(dir.path().to_path_buf())
            .with_max_age(Duration::from_secs(0));
        let disk = Arc::new(DiskCache::open(&config, "osm", ".png").unwrap());
        disk.put(&key(), &tiny_png()).unwrap();
        std::thread::sleep(Duration::from_millis(1100));

        let memory = Arc::new(MemoryCache::new(8));
        let client = Arc::new(MockHttpClient::ok(tiny_png()));
        let chain = ProviderChain::new(
            memory,
            Some(Arc::clone(&disk)),
            Vec::new(),
            Some(network(Arc::clone(&client))),
        );

        let resolution = chain.resolve(&key()).unwrap();
        assert_eq!(resolution.tier, ResolvedTier::Network);
        assert_eq!(client.call_count(), 1);
    }

    #[test]
    fn test_expired_disk_entry_serves_stale_when_network_fails() {
        let dir = TempDir::new().unwrap();
        let config = DiskCacheConfig::new(dir.path().to_path_buf())
            .with_max_age(Duration::from_secs(0));
        let disk = Arc::new(DiskCache::open(&config, "osm", ".png").unwrap());
        disk.put(&key(), &tiny_png()).unwrap();
        std::thread::sleep(Duration::from_millis(1100));

        let memory = Arc::new(MemoryCache::new(8));
        let client = Arc::new(MockHttpClient::failing(FetchError::Server(502)));
        let chain = ProviderChain::new(
            memory,
            Some(Arc::clone(&disk)),
            Vec::new(),
            Some(network(Arc::clone(&client))),
        );

        let resolution = chain.resolve(&key()).unwrap();
        assert_eq!(resolution.tier, ResolvedTier::StaleDisk);
    }

    #[test]
    fn test_corrupt_disk_entry_falls_through_to_network() {
        let dir = TempDir::new().unwrap();
        let memory = Arc::new(MemoryCache::new(8));
        let disk = disk(&dir);
        disk.put(&key(), b"definitely not an image").unwrap();

        let client = Arc::new(MockHttpClient::ok(tiny_png()));
        let chain = ProviderChain::new(
            memory,
            Some(Arc::clone(&disk)),
            Vec::new(),
            Some(network(Arc::clone(&client))),
        );

        let resolution = chain.resolve(&key()).unwrap();
        assert_eq!(resolution.tier, ResolvedTier::Network);
        assert_eq!(client.call_count(), 1);
    }

    #[test]
    fn test_bulk_resolve_skips_memory_population() {
        let dir = TempDir::new().unwrap();
        let memory = Arc::new(MemoryCache::new(8));
        let disk = disk(&dir);
        let client = Arc::new(MockHttpClient::ok(tiny_png()));
        let chain = ProviderChain::new(
            Arc::clone(&memory),
            Some(Arc::clone(&disk)),
            Vec::new(),
            Some(network(Arc::clone(&client))),
        );

        let tier = chain.resolve_bypassing_memory(&key()).unwrap();
        assert_eq!(tier, ResolvedTier::Network);
        assert!(disk.contains(&key()));
        assert!(!memory.contains(&key()));

        // Second bulk resolve is satisfied from disk.
        let tier = chain.resolve_bypassing_memory(&key()).unwrap();
        assert_eq!(tier, ResolvedTier::Disk);
        assert_eq!(client.call_count(), 1);
    }
}
