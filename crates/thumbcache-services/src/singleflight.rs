//! Per-key call coalescing.
//!
//! While a computation for a key is in flight, later callers for the same
//! key await the same shared future instead of starting their own. The
//! computation runs on its own task, so it finishes even if every caller
//! goes away, and it drops its entry when done. Nothing is cached here; a
//! failed call does not poison the next one.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::task::JoinError;

/// Whether a caller ran the computation or joined an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Follower,
}

type Flight<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

pub struct SingleFlight<T, E> {
    /// Key → (flight id, shared result).
    flights: Arc<DashMap<String, (u64, Flight<T, E>)>>,
    next_id: AtomicU64,
}

impl<T, E> Default for SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<JoinError> + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<JoinError> + 'static,
{
    pub fn new() -> Self {
        Self {
            flights: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Run `make()` for `key` unless a run is already in flight, and
    /// return its result. `make` is only called by the leader.
    ///
    /// Dropping the returned future does not cancel the computation.
    pub async fn work<F, Fut>(&self, key: &str, make: F) -> (Result<T, E>, Role)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (flight, role) = match self.flights.entry(key.to_string()) {
            Entry::Occupied(entry) => (entry.get().1.clone(), Role::Follower),
            Entry::Vacant(entry) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let flight = self.spawn(key.to_string(), id, make());
                entry.insert((id, flight.clone()));
                (flight, Role::Leader)
            }
        };

        (flight.await, role)
    }

    fn spawn<Fut>(&self, key: String, id: u64, fut: Fut) -> Flight<T, E>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let landing = Landing {
            flights: self.flights.clone(),
            key,
            id,
        };
        let task = tokio::spawn(async move {
            let _landing = landing;
            fut.await
        });
        async move { task.await.unwrap_or_else(|e| Err(E::from(e))) }
            .boxed()
            .shared()
    }

    /// Number of keys with a computation in flight.
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }
}

/// Clears a flight's slot when its task ends, panics included.
struct Landing<T, E> {
    flights: Arc<DashMap<String, (u64, Flight<T, E>)>>,
    key: String,
    id: u64,
}

impl<T, E> Drop for Landing<T, E> {
    fn drop(&mut self) {
        let id = self.id;
        // A newer flight may already occupy the slot; only remove our own.
        self.flights.remove_if(&self.key, |_, (current, _)| *current == id);
    }
}
