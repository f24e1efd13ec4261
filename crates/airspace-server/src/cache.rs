//! Expiry and eviction shared by the in-process caches.

use dashmap::DashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

pub trait CacheEntry {
    /// When the value was computed. Drives TTL expiry.
    fn created_at(&self) -> Instant;
    /// Access tick; the smallest is evicted first.
    fn last_used(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneOutcome {
    pub expired: usize,
    pub evicted: usize,
}

pub fn is_expired<V: CacheEntry>(entry: &V, max_age: Duration) -> bool {
    entry.created_at().elapsed() > max_age
}

/// Drop expired entries, then evict least recently used ones until the
/// cache fits in `max_entries`.
pub fn prune_cache<K, V>(cache: &DashMap<K, V>, max_entries: usize, max_age: Duration) -> PruneOutcome
where
    K: Clone + Eq + Hash,
    V: CacheEntry,
{
    let now = Instant::now();
    let mut outcome = PruneOutcome::default();
    let mut entries: Vec<(K, Instant, u64)> = cache
        .iter()
        .map(|entry| {
            let value = entry.value();
            (entry.key().clone(), value.created_at(), value.last_used())
        })
        .collect();

    entries.retain(|(key, created_at, _)| {
        if now.duration_since(*created_at) > max_age {
            if cache.remove(key).is_some() {
                outcome.expired += 1;
            }
            false
        } else {
            true
        }
    });

    if cache.len() <= max_entries {
        return outcome;
    }

    entries.sort_by_key(|(_, _, last_used)| *last_used);
    for (key, _, _) in entries {
        if cache.len() <= max_entries {
            break;
        }
        if cache.remove(&key).is_some() {
            outcome.evicted += 1;
        }
    }
    outcome
}
