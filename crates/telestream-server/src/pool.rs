//! Upstream connection pool with least-loaded selection.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::streamer::{ByteStreamer, StreamerCache};
use crate::upstream::Connection;

/// Per-connection count of in-flight streaming requests.
#[derive(Debug)]
pub struct LoadTracker {
    loads: Mutex<Vec<usize>>,
}

impl LoadTracker {
    pub fn new(connections: NonZeroUsize) -> Self {
        Self {
            loads: Mutex::new(vec![0; connections.get()]),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Id of the connection with the smallest load; ties go to the lowest id.
    pub fn pick_least_loaded(&self) -> usize {
        least_loaded(&self.lock())
    }

    /// Select the least-loaded connection and count this request against it.
    ///
    /// Selection and increment happen under one lock, so concurrent callers always observe each
    /// other's reservations. The load is released when the returned lease is dropped.
    pub fn acquire(self: &Arc<Self>) -> LoadLease {
        let connection_id = {
            let mut loads = self.lock();
            let id = least_loaded(&loads);
            loads[id] += 1;
            id
        };

        LoadLease {
            tracker: Arc::clone(self),
            connection_id,
        }
    }

    /// Current loads, indexed by connection id.
    pub fn snapshot(&self) -> Vec<usize> {
        self.lock().clone()
    }

    fn release(&self, connection_id: usize) {
        if let Some(load) = self.lock().get_mut(connection_id) {
            *load = load.saturating_sub(1);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<usize>> {
        self.loads.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn least_loaded(loads: &[usize]) -> usize {
    loads
        .iter()
        .enumerate()
        .min_by_key(|(_, load)| **load)
        .map_or(0, |(id, _)| id)
}

/// One unit of load on a connection, held for the lifetime of a request's byte stream.
#[derive(Debug)]
pub struct LoadLease {
    tracker: Arc<LoadTracker>,
    connection_id: usize,
}

impl LoadLease {
    pub fn connection_id(&self) -> usize {
        self.connection_id
    }
}

impl Drop for LoadLease {
    fn drop(&mut self) {
        self.tracker.release(self.connection_id);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("connection pool needs at least one connection")]
    Empty,
}

/// Everything a request needs to stream from one upstream connection.
pub struct Checkout {
    pub lease: LoadLease,
    pub streamer: Arc<ByteStreamer>,
}

impl Checkout {
    pub fn connection_id(&self) -> usize {
        self.lease.connection_id()
    }
}

/// Interchangeable upstream connections plus their load counters and stream wrappers.
pub struct ConnectionPool {
    loads: Arc<LoadTracker>,
    streamers: StreamerCache,
}

impl ConnectionPool {
    pub fn new(connections: Vec<Arc<dyn Connection>>) -> Result<Self, PoolError> {
        Self::with_metadata_ttl(connections, Duration::ZERO)
    }

    /// Like [`ConnectionPool::new`], caching resolved file metadata per connection for `ttl`.
    /// A zero `ttl` resolves metadata on every request.
    pub fn with_metadata_ttl(
        connections: Vec<Arc<dyn Connection>>,
        ttl: Duration,
    ) -> Result<Self, PoolError> {
        let count = NonZeroUsize::new(connections.len()).ok_or(PoolError::Empty)?;
        Ok(Self {
            loads: Arc::new(LoadTracker::new(count)),
            streamers: StreamerCache::new(connections, ttl),
        })
    }

    pub fn len(&self) -> usize {
        self.loads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loads.is_empty()
    }

    pub fn loads(&self) -> Vec<usize> {
        self.loads.snapshot()
    }

    pub fn load_tracker(&self) -> &Arc<LoadTracker> {
        &self.loads
    }

    /// Reserve the least-loaded connection and fetch its stream wrapper.
    pub fn checkout(&self) -> Checkout {
        let lease = self.loads.acquire();
        let streamer = self.streamers.get_or_create(lease.connection_id());
        Checkout { lease, streamer }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::MemoryConnection;

    fn tracker_with_loads(loads: &[usize]) -> Arc<LoadTracker> {
        let tracker = Arc::new(LoadTracker::new(NonZeroUsize::new(loads.len()).unwrap()));
        *tracker.lock() = loads.to_vec();
        tracker
    }

    #[test]
    fn picks_lowest_id_among_least_loaded() {
        let tracker = tracker_with_loads(&[3, 1, 1]);
        assert_eq!(tracker.pick_least_loaded(), 1);
    }

    #[test]
    fn fresh_tracker_picks_first_connection() {
        let tracker = tracker_with_loads(&[0, 0, 0, 0]);
        assert_eq!(tracker.pick_least_loaded(), 0);
    }

    #[test]
    fn leases_spread_load_and_release_on_drop() {
        let tracker = tracker_with_loads(&[0, 0, 0]);

        let a = tracker.acquire();
        let b = tracker.acquire();
        let c = tracker.acquire();
        assert_eq!(
            [a.connection_id(), b.connection_id(), c.connection_id()],
            [0, 1, 2]
        );
        assert_eq!(tracker.snapshot(), vec![1, 1, 1]);

        drop(b);
        assert_eq!(tracker.snapshot(), vec![1, 0, 1]);
        let d = tracker.acquire();
        assert_eq!(d.connection_id(), 1);

        drop(a);
        drop(c);
        drop(d);
        assert_eq!(tracker.snapshot(), vec![0, 0, 0]);
    }

    #[test]
    fn concurrent_acquires_balance_exactly() {
        let tracker = tracker_with_loads(&[0, 0, 0, 0]);
        let leases: Vec<LoadLease> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| tracker.acquire()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(tracker.snapshot(), vec![2, 2, 2, 2]);
        drop(leases);
        assert_eq!(tracker.snapshot(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn empty_pool_is_rejected() {
        assert!(matches!(
            ConnectionPool::new(Vec::new()),
            Err(PoolError::Empty)
        ));
    }

    #[test]
    fn checkout_reuses_streamer_per_connection() {
        let connections: Vec<Arc<dyn Connection>> = vec![
            Arc::new(MemoryConnection::new()),
            Arc::new(MemoryConnection::new()),
        ];
        let pool = ConnectionPool::new(connections).unwrap();
        assert_eq!(pool.len(), 2);

        let first = pool.checkout();
        let second = pool.checkout();
        assert_eq!(first.connection_id(), 0);
        assert_eq!(second.connection_id(), 1);
        assert_eq!(pool.loads(), vec![1, 1]);
        drop(second);

        let third = pool.checkout();
        assert_eq!(third.connection_id(), 1);

        let first_streamer = Arc::clone(&first.streamer);
        drop(first);
        let again = pool.checkout();
        assert_eq!(again.connection_id(), 0);
        assert_eq!(again.streamer.connection_id(), 0);
        assert!(Arc::ptr_eq(&first_streamer, &again.streamer));
    }
}
