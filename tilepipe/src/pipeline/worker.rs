//! Fixed-size worker pool draining the request queue.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::pipeline::chain::ProviderChain;
use crate::pipeline::queue::RequestQueue;

/// Pool of OS worker threads resolving claimed requests.
///
/// The worker count is fixed when the pool starts; there is no dynamic
/// resizing. `stop` lets any in-flight resolve run to completion (no
/// forced interruption mid-I/O), wakes idle workers, and joins them all.
pub struct WorkerPool {
    queue: Arc<RequestQueue>,
    chain: Arc<ProviderChain>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Creates a pool over the given queue and chain. No threads run
    /// until [`start`](Self::start).
    pub fn new(queue: Arc<RequestQueue>, chain: Arc<ProviderChain>) -> Self {
        Self {
            queue,
            chain,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawns `workers` threads. Calling twice stacks threads; don't.
    pub fn start(&self, workers: usize) {
        let mut handles = self.handles.lock();
        for n in 0..workers.max(1) {
            let queue = Arc::clone(&self.queue);
            let chain = Arc::clone(&self.chain);
            let handle = thread::Builder::new()
                .name(format!("tilepipe-worker-{n}"))
                .spawn(move || run_worker(queue, chain))
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }
    }

    /// Shuts the queue down and joins every worker.
    ///
    /// Idempotent; a second call finds nothing left to join.
    pub fn stop(&self) {
        self.queue.shutdown();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if handle.join().is_err() {
                warn!("worker thread panicked during shutdown");
            }
        }
    }

    /// Number of running workers.
    pub fn worker_count(&self) -> usize {
        self.handles.lock().len()
    }
}

/// One worker loop: claim, resolve, notify, repeat until shutdown.
fn run_worker(queue: Arc<RequestQueue>, chain: Arc<ProviderChain>) {
    while let Some(key) = queue.claim_next() {
        for observer in queue.observers_of(&key) {
            observer.on_tile_loading(key);
        }

        let result = chain.resolve(&key);

        // Remove the request before notifying, so a re-request issued
        // from inside a callback starts a fresh cycle.
        let observers = queue.complete(&key);
        match result {
            Ok(resolution) => {
                debug!(tile = %key, tier = ?resolution.tier, "tile resolved");
                for observer in observers {
                    observer.on_tile_ready(key, resolution.bytes.clone());
                }
            }
            Err(reason) => {
                warn!(tile = %key, error = %reason, "tile failed");
                for observer in observers {
                    observer.on_tile_failed(key, &reason);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::coord::TileKey;
    use crate::pipeline::{LoadError, TileObserver};
    use crate::provider::{MockHttpClient, ProviderDescriptor};
    use crate::source::NetworkSource;
    use crate::tile::tests::tiny_png;
    use bytes::Bytes;
    use std::sync::mpsc;
    use std::time::Duration;

    /// Observer forwarding terminal events over a channel.
    struct ChannelObserver {
        tx: mpsc::Sender<Result<TileKey, TileKey>>,
    }

    impl TileObserver for ChannelObserver {
        fn on_tile_loading(&self, _key: TileKey) {}
        fn on_tile_ready(&self, key: TileKey, _bytes: Bytes) {
            let _ = self.tx.send(Ok(key));
        }
        fn on_tile_failed(&self, key: TileKey, _reason: &LoadError) {
            let _ = self.tx.send(Err(key));
        }
    }

    fn chain_with(client: Arc<MockHttpClient>) -> Arc<ProviderChain> {
        let descriptor =
            ProviderDescriptor::xyz("osm", "https://tile.example.org/{zoom}/{x}/{y}.png");
        Arc::new(ProviderChain::new(
            Arc::new(MemoryCache::new(8)),
            None,
            Vec::new(),
            Some(NetworkSource::new(descriptor, client)),
        ))
    }

    #[test]
    fn test_workers_resolve_and_notify() {
        let queue = Arc::new(RequestQueue::new(16));
        let chain = chain_with(Arc::new(MockHttpClient::ok(tiny_png())));
        let pool = WorkerPool::new(Arc::clone(&queue), chain);
        pool.start(2);

        let (tx, rx) = mpsc::channel();
        let key = TileKey::new(10, 1, 2).unwrap();
        queue.enqueue(key, Arc::new(ChannelObserver { tx }));

        let outcome = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(outcome, Ok(key));
        pool.stop();
    }

    #[test]
    fn test_failure_notifies_all_observers() {
        let queue = Arc::new(RequestQueue::new(16));
        let chain = chain_with(Arc::new(MockHttpClient::failing(
            crate::provider::FetchError::NotFound,
        )));
        let pool = WorkerPool::new(Arc::clone(&queue), chain);

        // Two observers coalesce onto one request before workers start.
        let (tx, rx) = mpsc::channel();
        let key = TileKey::new(10, 1, 2).unwrap();
        queue.enqueue(key, Arc::new(ChannelObserver { tx: tx.clone() }));
        queue.enqueue(key, Arc::new(ChannelObserver { tx }));
        pool.start(1);

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Err(key)
        );
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Err(key)
        );
        pool.stop();
    }

    #[test]
    fn test_stop_joins_idle_workers() {
        let queue = Arc::new(RequestQueue::new(16));
        let chain = chain_with(Arc::new(MockHttpClient::ok(tiny_png())));
        let pool = WorkerPool::new(queue, chain);
        pool.start(3);
        assert_eq!(pool.worker_count(), 3);

        pool.stop();
        assert_eq!(pool.worker_count(), 0);

        // Second stop is a no-op.
        pool.stop();
    }
}
