//! The tile acquisition pipeline.
//!
//! [`CachePipeline`] is the one context object wiring every component
//! together: memory cache, disk cache, archives, network source, request
//! queue and worker pool. It is created once and passed around explicitly;
//! there are no process-wide singletons, and nothing here assumes a "main
//! thread" — observers are invoked on whichever thread finished the work
//! (the caller's own thread for synchronous memory hits).

pub mod chain;
pub mod queue;
pub mod worker;

pub use chain::{ProviderChain, ResolvedTier, Resolution};
pub use queue::{DroppedRequest, RequestQueue};
pub use worker::WorkerPool;

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tracing::{info, warn};

use crate::cache::{CacheError, CacheStats, DiskCache, MemoryCache};
use crate::config::{BulkConfig, PipelineConfig};
use crate::coord::TileKey;
use crate::provider::{FetchError, HttpClient, ProviderDescriptor};
use crate::source::{ArchiveSource, NetworkSource};

/// Why a tile request ended without a tile.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// Every applicable source was consulted and none had the tile.
    #[error("no source could provide the tile")]
    Exhausted,

    /// The network tier failed; terminal for this attempt, no automatic
    /// retry. Re-enqueue to try again.
    #[error("network fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// The fetched payload could not be decoded as an image.
    #[error("tile decode failed: {0}")]
    Decode(String),

    /// A bulk write-through failed, leaving the tile uncached.
    #[error("disk write failed: {0}")]
    DiskWrite(String),

    /// The request was evicted from a full queue before being claimed.
    #[error("request dropped: queue full")]
    QueueFull,

    /// The pipeline was shut down before the request could run.
    #[error("pipeline shut down")]
    ShutDown,
}

/// Callback surface for tile consumers.
///
/// Implementations must be cheap and non-blocking; callbacks run on
/// worker threads (or the requester's thread for memory hits), and a slow
/// observer stalls tile delivery.
pub trait TileObserver: Send + Sync {
    /// A worker has started resolving the tile.
    fn on_tile_loading(&self, key: TileKey);

    /// The tile is available.
    fn on_tile_ready(&self, key: TileKey, bytes: Bytes);

    /// The tile could not be provided.
    fn on_tile_failed(&self, key: TileKey, reason: &LoadError);
}

/// Errors from pipeline construction.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A cache tier failed to initialize.
    #[error("cache initialization failed: {0}")]
    Cache(#[from] CacheError),

    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Aggregated pipeline counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineStats {
    /// Memory tier counters.
    pub memory: CacheStats,
    /// Disk tier counters, when a disk cache is configured.
    pub disk: Option<CacheStats>,
    /// Requests waiting to be claimed.
    pub pending: usize,
    /// Requests currently being resolved.
    pub in_flight: usize,
}

/// The assembled tile acquisition pipeline.
pub struct CachePipeline {
    descriptor: ProviderDescriptor,
    memory: Arc<MemoryCache>,
    disk: Option<Arc<DiskCache>>,
    chain: Arc<ProviderChain>,
    queue: Arc<RequestQueue>,
    pool: WorkerPool,
    bulk: BulkConfig,
}

impl CachePipeline {
    /// Builds and starts the pipeline.
    ///
    /// Archive paths that fail to open are skipped with a warning rather
    /// than failing construction; a missing offline pack should not take
    /// the whole tile system down.
    pub fn new(
        config: PipelineConfig,
        descriptor: ProviderDescriptor,
        http_client: Arc<dyn HttpClient>,
        archive_paths: &[PathBuf],
    ) -> Result<Self, PipelineError> {
        let memory = Arc::new(MemoryCache::new(config.memory.max_entries));

        let disk = match &config.disk {
            Some(disk_config) => Some(Arc::new(DiskCache::open(
                disk_config,
                descriptor.name(),
                descriptor.extension(),
            )?)),
            None => None,
        };

        let mut archives = Vec::new();
        for path in archive_paths {
            match ArchiveSource::open(path) {
                Ok(archive) => archives.push(archive),
                Err(e) => warn!(archive = %path.display(), error = %e, "skipping unusable archive"),
            }
        }

        let network = descriptor
            .uses_network()
            .then(|| NetworkSource::new(descriptor.clone(), http_client));

        let chain = Arc::new(ProviderChain::new(
            Arc::clone(&memory),
            disk.clone(),
            archives,
            network,
        ));
        let queue = Arc::new(RequestQueue::new(config.queue.capacity));
        let pool = WorkerPool::new(Arc::clone(&queue), Arc::clone(&chain));
        pool.start(config.worker_threads);

        info!(
            provider = descriptor.name(),
            workers = config.worker_threads.max(1),
            "tile pipeline started"
        );

        Ok(Self {
            descriptor,
            memory,
            disk,
            chain,
            queue,
            pool,
            bulk: config.bulk,
        })
    }

    /// Requests one tile.
    ///
    /// A memory hit is delivered synchronously on the calling thread.
    /// Anything else is queued for the worker pool; requests for a key
    /// already pending or in flight coalesce onto it, and every attached
    /// observer receives the same terminal notification.
    pub fn request_tile(&self, key: TileKey, observer: Arc<dyn TileObserver>) {
        if let Some(tile) = self.memory.get(&key) {
            observer.on_tile_ready(key, tile.bytes().clone());
            return;
        }

        if let Some(dropped) = self.queue.enqueue(key, observer) {
            for observer in dropped.observers {
                observer.on_tile_failed(dropped.key, &dropped.reason);
            }
        }
    }

    /// Withdraws a pending request. In-flight requests are unaffected.
    pub fn cancel(&self, key: TileKey) {
        self.queue.cancel(&key);
    }

    /// Stops the worker pool and persists the disk index.
    ///
    /// In-flight resolves run to completion; unclaimed requests are
    /// abandoned without notification. Idempotent.
    pub fn shutdown(&self) {
        self.pool.stop();
        if let Some(disk) = &self.disk {
            if let Err(e) = disk.flush_index() {
                warn!(error = %e, "failed to persist disk index at shutdown");
            }
        }
    }

    /// The provider this pipeline serves.
    pub fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    /// The source chain, shared with bulk operations.
    pub fn chain(&self) -> &Arc<ProviderChain> {
        &self.chain
    }

    /// The disk tier, when configured.
    pub fn disk(&self) -> Option<&Arc<DiskCache>> {
        self.disk.as_ref()
    }

    /// Bulk operation settings.
    pub fn bulk_config(&self) -> &BulkConfig {
        &self.bulk
    }

    /// Counter snapshot across tiers and the queue.
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            memory: self.memory.stats(),
            disk: self.disk.as_ref().map(|d| d.stats()),
            pending: self.queue.pending_count(),
            in_flight: self.queue.in_flight_count(),
        }
    }
}

impl Drop for CachePipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
