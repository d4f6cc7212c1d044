//! Bulk area operations: download and clean.
//!
//! [`CacheManager`] enumerates every tile of a bounding box across a zoom
//! range and either fills the disk cache (download) or empties it (clean),
//! off the caller's thread, with batched progress reporting and
//! cooperative cancellation checked between tiles. Failures are counted
//! and reported at completion; one bad tile never aborts a run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::DiskCache;
use crate::coord::{possible_tiles_in_area, BoundingBox, CoordError, TileAreaIterator};
use crate::pipeline::{CachePipeline, ProviderChain};

/// Lifecycle of one bulk run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkStatus {
    /// Created but not yet running.
    Idle,
    /// Processing tiles.
    Running,
    /// Ran to the end of the enumeration.
    Completed,
    /// Stopped early by [`BulkHandle::cancel`]. Already-processed tiles
    /// are left as-is; there is no rollback.
    Cancelled,
}

/// Progress snapshot passed to the progress callback.
#[derive(Debug, Clone, Copy)]
pub struct BulkProgress {
    /// Tiles processed so far.
    pub processed: u64,
    /// Total tiles the run would touch.
    pub total: u64,
    /// Download runs: tiles fetched or already available. Clean runs:
    /// tiles deleted.
    pub succeeded: u64,
    /// Everything else: fetch failures, or absent entries during a clean.
    pub failed: u64,
}

/// Final report of a bulk run.
#[derive(Debug, Clone, Copy)]
pub struct BulkReport {
    /// Total tiles the run would have touched.
    pub total: u64,
    /// Tiles actually processed before completion or cancellation.
    pub processed: u64,
    /// Download runs: tiles fetched or already available. Clean runs:
    /// tiles deleted.
    pub succeeded: u64,
    /// Everything else: fetch failures, or absent entries during a clean.
    pub failed: u64,
    /// How the run ended.
    pub status: BulkStatus,
}

/// Errors starting a bulk operation.
#[derive(Debug, Error)]
pub enum BulkError {
    /// The area or zoom span is invalid.
    #[error(transparent)]
    Coord(#[from] CoordError),

    /// Cleaning requires a disk cache and none is configured.
    #[error("no disk cache configured")]
    NoDiskCache,
}

/// Handle to a running bulk operation.
pub struct BulkHandle {
    cancel_flag: Arc<AtomicBool>,
    status: Arc<Mutex<BulkStatus>>,
    thread: JoinHandle<BulkReport>,
}

impl BulkHandle {
    /// Requests cancellation. The run stops at the next between-tile
    /// check; the tile currently being processed finishes.
    pub fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::Relaxed);
    }

    /// Current run status.
    pub fn status(&self) -> BulkStatus {
        *self.status.lock()
    }

    /// Waits for the run to finish and returns its report.
    pub fn join(self) -> BulkReport {
        match self.thread.join() {
            Ok(report) => report,
            Err(_) => {
                warn!("bulk worker panicked");
                BulkReport {
                    total: 0,
                    processed: 0,
                    succeeded: 0,
                    failed: 0,
                    status: BulkStatus::Cancelled,
                }
            }
        }
    }
}

/// Progress callback type for bulk runs.
pub type ProgressFn = dyn Fn(BulkProgress) + Send + 'static;

/// Bulk download / clean driver over a pipeline's source chain.
pub struct CacheManager {
    chain: Arc<ProviderChain>,
    disk: Option<Arc<DiskCache>>,
    progress_batch: usize,
}

impl CacheManager {
    /// Creates a manager sharing the pipeline's chain and disk tier.
    pub fn new(pipeline: &CachePipeline) -> Self {
        Self {
            chain: Arc::clone(pipeline.chain()),
            disk: pipeline.disk().cloned(),
            progress_batch: pipeline.bulk_config().progress_batch.max(1),
        }
    }

    /// Downloads every tile of `bbox` across `[zoom_min, zoom_max]` into
    /// the disk cache, bypassing the memory tier.
    ///
    /// Tiles already on disk or in an archive count as successes without
    /// network traffic. `on_progress` fires every `progress_batch` tiles
    /// and once at the end.
    pub fn download_area(
        &self,
        bbox: BoundingBox,
        zoom_min: u8,
        zoom_max: u8,
        on_progress: impl Fn(BulkProgress) + Send + 'static,
    ) -> Result<BulkHandle, BulkError> {
        let total = possible_tiles_in_area(&bbox, zoom_min, zoom_max)?;
        let tiles = TileAreaIterator::new(bbox, zoom_min, zoom_max)?;
        let chain = Arc::clone(&self.chain);

        info!(total, zoom_min, zoom_max, "starting area download");
        Ok(spawn_run(
            "tilepipe-download",
            total,
            tiles,
            self.progress_batch,
            on_progress,
            move |key| match chain.resolve_bypassing_memory(key) {
                Ok(tier) => {
                    debug!(tile = %key, ?tier, "bulk tile available");
                    true
                }
                Err(e) => {
                    debug!(tile = %key, error = %e, "bulk tile failed");
                    false
                }
            },
        ))
    }

    /// Deletes every cached tile of `bbox` across `[zoom_min, zoom_max]`
    /// from the disk cache.
    ///
    /// The report's `succeeded` is the deletion count; tiles with no
    /// cached entry (or whose deletion errored) land in `failed`.
    pub fn clean_area(
        &self,
        bbox: BoundingBox,
        zoom_min: u8,
        zoom_max: u8,
        on_progress: impl Fn(BulkProgress) + Send + 'static,
    ) -> Result<BulkHandle, BulkError> {
        let disk = self.disk.clone().ok_or(BulkError::NoDiskCache)?;
        let total = possible_tiles_in_area(&bbox, zoom_min, zoom_max)?;
        let tiles = TileAreaIterator::new(bbox, zoom_min, zoom_max)?;

        info!(total, zoom_min, zoom_max, "starting area clean");
        Ok(spawn_run(
            "tilepipe-clean",
            total,
            tiles,
            self.progress_batch,
            on_progress,
            move |key| match disk.remove(key) {
                Ok(removed) => removed,
                Err(e) => {
                    warn!(tile = %key, error = %e, "failed to delete cached tile");
                    false
                }
            },
        ))
    }

    /// Number of tiles a bulk run over the area would touch.
    pub fn possible_tiles_in_area(
        &self,
        bbox: &BoundingBox,
        zoom_min: u8,
        zoom_max: u8,
    ) -> Result<u64, BulkError> {
        Ok(possible_tiles_in_area(bbox, zoom_min, zoom_max)?)
    }
}

/// Spawns the per-tile loop on a background thread.
///
/// `process` returns whether the tile counts as a success. Cancellation is
/// polled between tiles only, so a slow tile finishes before the run
/// stops.
fn spawn_run(
    thread_name: &str,
    total: u64,
    tiles: TileAreaIterator,
    progress_batch: usize,
    on_progress: impl Fn(BulkProgress) + Send + 'static,
    process: impl Fn(&crate::coord::TileKey) -> bool + Send + 'static,
) -> BulkHandle {
    let cancel_flag = Arc::new(AtomicBool::new(false));
    let status = Arc::new(Mutex::new(BulkStatus::Idle));

    let thread_cancel = Arc::clone(&cancel_flag);
    let thread_status = Arc::clone(&status);
    let thread = thread::Builder::new()
        .name(thread_name.to_string())
        .spawn(move || {
            *thread_status.lock() = BulkStatus::Running;

            let mut processed = 0u64;
            let mut succeeded = 0u64;
            let mut failed = 0u64;

            for key in tiles {
                if thread_cancel.load(Ordering::Relaxed) {
                    *thread_status.lock() = BulkStatus::Cancelled;
                    let report = BulkReport {
                        total,
                        processed,
                        succeeded,
                        failed,
                        status: BulkStatus::Cancelled,
                    };
                    info!(processed, total, "bulk run cancelled");
                    return report;
                }

                if process(&key) {
                    succeeded += 1;
                } else {
                    failed += 1;
                }
                processed += 1;

                if processed % progress_batch as u64 == 0 {
                    on_progress(BulkProgress {
                        processed,
                        total,
                        succeeded,
                        failed,
                    });
                }
            }

            on_progress(BulkProgress {
                processed,
                total,
                succeeded,
                failed,
            });
            *thread_status.lock() = BulkStatus::Completed;
            info!(processed, succeeded, failed, "bulk run completed");
            BulkReport {
                total,
                processed,
                succeeded,
                failed,
                status: BulkStatus::Completed,
            }
        })
        .expect("failed to spawn bulk worker thread");

    BulkHandle {
        cancel_flag,
        status,
        thread,
    }
}
