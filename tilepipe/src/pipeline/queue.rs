//! Deduplicated, LIFO-biased pending-request queue.
//!
//! Ordering is a deliberate trade-off: the newest not-yet-claimed key is
//! handed to the next free worker first, because the most recently
//! requested tiles are the ones most likely still on screen. Old requests
//! can starve; stale requests are usually off-screen, so that is
//! acceptable. A duplicate enqueue bumps the key to the front of the claim
//! order for the same reason.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::coord::TileKey;
use crate::pipeline::{LoadError, TileObserver};

/// A request evicted from the queue before being claimed.
///
/// The queue never invokes observers itself (callbacks must not run under
/// the queue lock); the caller delivers `reason` to each observer.
pub struct DroppedRequest {
    /// The evicted tile.
    pub key: TileKey,
    /// Everyone waiting on it.
    pub observers: Vec<Arc<dyn TileObserver>>,
    /// Why it was dropped.
    pub reason: LoadError,
}

#[derive(Default)]
struct QueueState {
    /// Observers per pending key.
    pending: HashMap<TileKey, Vec<Arc<dyn TileObserver>>>,
    /// Claim order: front is oldest, back is newest; workers claim from
    /// the back.
    order: VecDeque<TileKey>,
    /// Observers per claimed key. At most one entry per key exists across
    /// `pending` and `in_flight`, which is what bounds each tile to one
    /// resolve at a time.
    in_flight: HashMap<TileKey, Vec<Arc<dyn TileObserver>>>,
    shutdown: bool,
}

/// Bounded pending-request set with blocking claim.
pub struct RequestQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    capacity: usize,
}

impl RequestQueue {
    /// Creates a queue holding at most `capacity` pending requests.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be at least 1");
        Self {
            state: Mutex::new(QueueState::default()),
            available: Condvar::new(),
            capacity,
        }
    }

    /// Adds a request, deduplicating against pending and in-flight keys.
    ///
    /// A key already pending gains the observer and jumps to the front of
    /// the claim order; a key already claimed just gains the observer.
    /// When a new key exceeds capacity the oldest, least-recently-bumped
    /// pending entry is evicted and returned for failure delivery.
    pub fn enqueue(
        &self,
        key: TileKey,
        observer: Arc<dyn TileObserver>,
    ) -> Option<DroppedRequest> {
        let mut state = self.state.lock();

        if state.shutdown {
            return Some(DroppedRequest {
                key,
                observers: vec![observer],
                reason: LoadError::ShutDown,
            });
        }

        if let Some(observers) = state.in_flight.get_mut(&key) {
            observers.push(observer);
            return None;
        }

        if let Some(observers) = state.pending.get_mut(&key) {
            observers.push(observer);
            // Jump the queue: most recently requested claims first.
            if let Some(pos) = state.order.iter().position(|k| k == &key) {
                state.order.remove(pos);
            }
            state.order.push_back(key);
            return None;
        }

        let dropped = if state.pending.len() >= self.capacity {
            match state.order.pop_front() {
                Some(oldest) => {
                    let observers = state.pending.remove(&oldest).unwrap_or_default();
                    Some(DroppedRequest {
                        key: oldest,
                        observers,
                        reason: LoadError::QueueFull,
                    })
                }
                None => None,
            }
        } else {
            None
        };

        state.pending.insert(key, vec![observer]);
        state.order.push_back(key);
        self.available.notify_one();
        dropped
    }

    /// Claims the newest pending key, blocking while the queue is empty.
    ///
    /// Returns `None` once the queue has been shut down; pending entries
    /// are abandoned at that point.
    pub fn claim_next(&self) -> Option<TileKey> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if let Some(key) = state.order.pop_back() {
                let observers = state.pending.remove(&key).unwrap_or_default();
                state.in_flight.insert(key, observers);
                return Some(key);
            }
            self.available.wait(&mut state);
        }
    }

    /// Snapshot of the observers attached to a claimed key.
    pub fn observers_of(&self, key: &TileKey) -> Vec<Arc<dyn TileObserver>> {
        self.state
            .lock()
            .in_flight
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Finishes a claimed request, handing back every observer attached to
    /// it (including any that arrived while it was in flight).
    ///
    /// The entry is removed before the caller notifies, so a re-request
    /// issued from inside a callback starts a fresh cycle.
    pub fn complete(&self, key: &TileKey) -> Vec<Arc<dyn TileObserver>> {
        self.state.lock().in_flight.remove(key).unwrap_or_default()
    }

    /// Removes a pending request without notifying its observers.
    ///
    /// An in-flight key is left alone; resolves are never interrupted.
    /// Returns whether a pending entry was removed.
    pub fn cancel(&self, key: &TileKey) -> bool {
        let mut state = self.state.lock();
        if state.pending.remove(key).is_some() {
            if let Some(pos) = state.order.iter().position(|k| k == key) {
                state.order.remove(pos);
            }
            true
        } else {
            false
        }
    }

    /// Number of not-yet-claimed requests.
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Number of claimed, unfinished requests.
    pub fn in_flight_count(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Marks the queue shut down and wakes every blocked worker.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        self.available.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    /// Observer that only counts failure deliveries.
    #[derive(Default)]
    struct CountingObserver {
        failures: AtomicUsize,
    }

    impl TileObserver for CountingObserver {
        fn on_tile_loading(&self, _key: TileKey) {}
        fn on_tile_ready(&self, _key: TileKey, _bytes: Bytes) {}
        fn on_tile_failed(&self, _key: TileKey, _reason: &LoadError) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn observer() -> Arc<CountingObserver> {
        Arc::new(CountingObserver::default())
    }

    fn key(x: u32) -> TileKey {
        TileKey::new(10, x, 0).unwrap()
    }

    #[test]
    fn test_enqueue_dedup_single_pending_entry() {
        let queue = RequestQueue::new(8);
        assert!(queue.enqueue(key(1), observer()).is_none());
        assert!(queue.enqueue(key(1), observer()).is_none());
        assert_eq!(queue.pending_count(), 1);

        // Both observers travel with the one entry.
        let claimed = queue.claim_next().unwrap();
        assert_eq!(claimed, key(1));
        assert_eq!(queue.complete(&key(1)).len(), 2);
    }

    #[test]
    fn test_claim_order_is_lifo() {
        let queue = RequestQueue::new(8);
        queue.enqueue(key(1), observer());
        queue.enqueue(key(2), observer());
        queue.enqueue(key(3), observer());

        assert_eq!(queue.claim_next().unwrap(), key(3));
        assert_eq!(queue.claim_next().unwrap(), key(2));
        assert_eq!(queue.claim_next().unwrap(), key(1));
    }

    #[test]
    fn test_duplicate_enqueue_jumps_queue() {
        let queue = RequestQueue::new(8);
        queue.enqueue(key(1), observer());
        queue.enqueue(key(2), observer());
        queue.enqueue(key(3), observer());

        // Re-requesting key(2) bumps it ahead of key(3).
        queue.enqueue(key(2), observer());

        assert_eq!(queue.claim_next().unwrap(), key(2));
        assert_eq!(queue.claim_next().unwrap(), key(3));
        assert_eq!(queue.claim_next().unwrap(), key(1));
    }

    #[test]
    fn test_enqueue_during_flight_attaches_observer() {
        let queue = RequestQueue::new(8);
        queue.enqueue(key(1), observer());
        queue.claim_next().unwrap();

        // Same key again while claimed: no new pending entry.
        queue.enqueue(key(1), observer());
        assert_eq!(queue.pending_count(), 0);
        assert_eq!(queue.in_flight_count(), 1);
        assert_eq!(queue.complete(&key(1)).len(), 2);
    }

    #[test]
    fn test_capacity_drops_oldest_with_queue_full() {
        let queue = RequestQueue::new(2);
        let victim = observer();
        queue.enqueue(key(1), victim.clone());
        queue.enqueue(key(2), observer());

        let dropped = queue.enqueue(key(3), observer()).unwrap();
        assert_eq!(dropped.key, key(1));
        assert!(matches!(dropped.reason, LoadError::QueueFull));
        assert_eq!(dropped.observers.len(), 1);
        assert_eq!(queue.pending_count(), 2);
    }

    #[test]
    fn test_bumped_entry_survives_capacity_eviction() {
        let queue = RequestQueue::new(2);
        queue.enqueue(key(1), observer());
        queue.enqueue(key(2), observer());

        // Bump key(1): key(2) becomes the least recently requested.
        queue.enqueue(key(1), observer());

        let dropped = queue.enqueue(key(3), observer()).unwrap();
        assert_eq!(dropped.key, key(2));
    }

    #[test]
    fn test_cancel_pending() {
        let queue = RequestQueue::new(8);
        queue.enqueue(key(1), observer());
        queue.enqueue(key(2), observer());

        assert!(queue.cancel(&key(1)));
        assert!(!queue.cancel(&key(1)));
        assert_eq!(queue.pending_count(), 1);
        assert_eq!(queue.claim_next().unwrap(), key(2));
    }

    #[test]
    fn test_cancel_leaves_in_flight_alone() {
        let queue = RequestQueue::new(8);
        queue.enqueue(key(1), observer());
        queue.claim_next().unwrap();

        assert!(!queue.cancel(&key(1)));
        assert_eq!(queue.in_flight_count(), 1);
    }

    #[test]
    fn test_claim_blocks_until_enqueue() {
        let queue = Arc::new(RequestQueue::new(8));
        let worker_queue = Arc::clone(&queue);
        let claimer = thread::spawn(move || worker_queue.claim_next());

        // Give the claimer time to block, then feed it.
        thread::sleep(Duration::from_millis(50));
        queue.enqueue(key(7), observer());

        assert_eq!(claimer.join().unwrap(), Some(key(7)));
    }

    #[test]
    fn test_shutdown_unblocks_claimers() {
        let queue = Arc::new(RequestQueue::new(8));
        let worker_queue = Arc::clone(&queue);
        let claimer = thread::spawn(move || worker_queue.claim_next());

        thread::sleep(Duration::from_millis(50));
        queue.shutdown();

        assert_eq!(claimer.join().unwrap(), None);
    }

    #[test]
    fn test_enqueue_after_shutdown_is_rejected() {
        let queue = RequestQueue::new(8);
        queue.shutdown();

        let dropped = queue.enqueue(key(1), observer()).unwrap();
        assert!(matches!(dropped.reason, LoadError::ShutDown));
    }

    #[test]
    #[should_panic(expected = "queue capacity must be at least 1")]
    fn test_zero_capacity_rejected() {
        RequestQueue::new(0);
    }
}
