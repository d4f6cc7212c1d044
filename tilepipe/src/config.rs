//! Pipeline configuration.
//!
//! One [`PipelineConfig`] aggregates the per-component settings so the
//! whole pipeline is configured in one place and constructed from it.
//! There is no environment or file parsing here; embedders build the
//! struct however they load settings.

use std::path::PathBuf;
use std::time::Duration;

/// Default number of worker threads draining the request queue.
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Default maximum number of pending (not yet claimed) requests.
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;

/// Default maximum number of decoded tiles held in memory.
pub const DEFAULT_MEMORY_CACHE_ENTRIES: usize = 128;

/// Default disk cache hard ceiling (600 MiB).
pub const DEFAULT_DISK_MAX_BYTES: u64 = 600 * 1024 * 1024;

/// Default disk entry age after which a tile is considered stale (30 days).
pub const DEFAULT_DISK_MAX_AGE_SECS: u64 = 30 * 24 * 60 * 60;

/// Default number of index mutations between persisted-index writes.
pub const DEFAULT_INDEX_FLUSH_EVERY: usize = 64;

/// Default connect timeout for tile downloads.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default read timeout for tile downloads.
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 10;

/// Default number of tiles between bulk progress callbacks.
pub const DEFAULT_PROGRESS_BATCH: usize = 16;

/// Top-level pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of worker threads. Fixed at pool construction.
    pub worker_threads: usize,

    /// Request queue settings.
    pub queue: QueueConfig,

    /// Memory cache settings.
    pub memory: MemoryCacheConfig,

    /// Disk cache settings; `None` disables the disk tier entirely.
    pub disk: Option<DiskCacheConfig>,

    /// Network settings.
    pub network: NetworkConfig,

    /// Bulk operation settings.
    pub bulk: BulkConfig,
}

impl PipelineConfig {
    /// Creates a configuration with a disk cache rooted at `cache_dir`.
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            worker_threads: DEFAULT_WORKER_THREADS,
            queue: QueueConfig::default(),
            memory: MemoryCacheConfig::default(),
            disk: Some(DiskCacheConfig::new(cache_dir)),
            network: NetworkConfig::default(),
            bulk: BulkConfig::default(),
        }
    }

    /// Creates a configuration without a disk tier (memory + archives +
    /// network only).
    pub fn without_disk_cache() -> Self {
        Self {
            worker_threads: DEFAULT_WORKER_THREADS,
            queue: QueueConfig::default(),
            memory: MemoryCacheConfig::default(),
            disk: None,
            network: NetworkConfig::default(),
            bulk: BulkConfig::default(),
        }
    }

    /// Sets the worker thread count.
    pub fn with_worker_threads(mut self, workers: usize) -> Self {
        self.worker_threads = workers;
        self
    }

    /// Sets the memory cache entry limit.
    pub fn with_memory_entries(mut self, max_entries: usize) -> Self {
        self.memory.max_entries = max_entries;
        self
    }

    /// Sets the pending queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue.capacity = capacity;
        self
    }
}

/// Request queue settings.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of pending requests before the oldest is dropped.
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Memory cache settings.
#[derive(Debug, Clone)]
pub struct MemoryCacheConfig {
    /// Maximum number of decoded tiles kept resident.
    pub max_entries: usize,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MEMORY_CACHE_ENTRIES,
        }
    }
}

/// Disk cache settings.
#[derive(Debug, Clone)]
pub struct DiskCacheConfig {
    /// Root directory for cached tiles and the persisted index.
    pub root: PathBuf,

    /// Hard ceiling; exceeding it triggers a synchronous trim.
    pub max_bytes: u64,

    /// Low watermark the trim reduces usage to. Defaults to 5/6 of
    /// `max_bytes` so routine writes do not trim on every call.
    pub trim_target_bytes: u64,

    /// Age beyond which an entry is stale and the chain refetches.
    pub max_age: Duration,

    /// Number of index mutations between persisted-index writes.
    pub index_flush_every: usize,
}

impl DiskCacheConfig {
    /// Creates disk settings with defaults for the given root directory.
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            max_bytes: DEFAULT_DISK_MAX_BYTES,
            trim_target_bytes: DEFAULT_DISK_MAX_BYTES / 6 * 5,
            max_age: Duration::from_secs(DEFAULT_DISK_MAX_AGE_SECS),
            index_flush_every: DEFAULT_INDEX_FLUSH_EVERY,
        }
    }

    /// Sets the hard ceiling and derives the default low watermark from it.
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self.trim_target_bytes = max_bytes / 6 * 5;
        self
    }

    /// Overrides the low watermark.
    pub fn with_trim_target(mut self, trim_target_bytes: u64) -> Self {
        self.trim_target_bytes = trim_target_bytes;
        self
    }

    /// Overrides the stale-entry age.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }
}

/// Network settings.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// TCP connect timeout.
    pub connect_timeout: Duration,

    /// Whole-request read timeout.
    pub read_timeout: Duration,

    /// User-Agent header sent with tile requests. Most public tile servers
    /// reject requests without one.
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
            user_agent: format!("tilepipe/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Bulk operation settings.
#[derive(Debug, Clone)]
pub struct BulkConfig {
    /// Number of tiles processed between progress callbacks.
    pub progress_batch: usize,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            progress_batch: DEFAULT_PROGRESS_BATCH,
        }
    }
}
