//! Single-flight request coalescing.
//!
//! When several overlay requests for the same key miss the cache at once,
//! only the first computes. The rest subscribe to its broadcast and receive
//! the same value.
//!
//! The computing request holds a [`FlightGuard`]. Dropping it, whether after
//! publishing or because the request was cancelled, removes the key from the
//! in-flight table and closes the channel, so waiters never hang on an
//! abandoned computation.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoalescerStats {
    pub total_requests: u64,
    pub coalesced_requests: u64,
    pub new_requests: u64,
    pub abandoned: u64,
}

impl CoalescerStats {
    pub fn coalescing_ratio(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.coalesced_requests as f64 / self.total_requests as f64
        }
    }
}

pub enum Registration<'a, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// First request for the key: compute, then call [`FlightGuard::complete`].
    Leader(FlightGuard<'a, K, V>),
    /// Another request is computing; wait on the receiver.
    Follower(broadcast::Receiver<V>),
}

pub struct RequestCoalescer<K, V>
where
    K: Eq + Hash + Clone,
{
    in_flight: DashMap<K, broadcast::Sender<V>>,
    total_requests: AtomicU64,
    coalesced_requests: AtomicU64,
    new_requests: AtomicU64,
    abandoned: AtomicU64,
}

impl<K, V> Default for RequestCoalescer<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self {
            in_flight: DashMap::new(),
            total_requests: AtomicU64::new(0),
            coalesced_requests: AtomicU64::new(0),
            new_requests: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
        }
    }
}

impl<K, V> RequestCoalescer<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomic check-and-insert on the in-flight table.
    pub fn register(&self, key: K) -> Registration<'_, K, V> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                self.coalesced_requests.fetch_add(1, Ordering::Relaxed);
                Registration::Follower(entry.get().subscribe())
            }
            Entry::Vacant(entry) => {
                // One value is ever sent per flight.
                let (tx, _rx) = broadcast::channel(1);
                entry.insert(tx.clone());
                self.new_requests.fetch_add(1, Ordering::Relaxed);
                Registration::Leader(FlightGuard {
                    coalescer: self,
                    key: Some(key),
                    sender: tx,
                })
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> CoalescerStats {
        CoalescerStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            coalesced_requests: self.coalesced_requests.load(Ordering::Relaxed),
            new_requests: self.new_requests.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

/// Ownership of one in-flight computation.
pub struct FlightGuard<'a, K, V>
where
    K: Eq + Hash + Clone,
{
    coalescer: &'a RequestCoalescer<K, V>,
    key: Option<K>,
    sender: broadcast::Sender<V>,
}

impl<K, V> FlightGuard<'_, K, V>
where
    K: Eq + Hash + Clone,
{
    /// Publish the value to every waiter and release the key.
    pub fn complete(mut self, value: V) {
        if let Some(key) = self.key.take() {
            self.coalescer.in_flight.remove(&key);
        }
        let waiters = self.sender.receiver_count();
        let _ = self.sender.send(value);
        if waiters > 0 {
            tracing::debug!(waiters, "Shared overlay result with coalesced waiters");
        }
    }
}

impl<K, V> Drop for FlightGuard<'_, K, V>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.coalescer.in_flight.remove(&key);
            self.coalescer.abandoned.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("In-flight overlay computation abandoned; waiters will retry");
        }
    }
}
