//! Memoized clipping results per viewport and filter.

use airspace_core::{BoundingBox, ClipStats, ClippedResult, IcaoClass};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;

use crate::cache::{is_expired, prune_cache, CacheEntry, PruneOutcome};
use crate::coalesce::{CoalescerStats, Registration, RequestCoalescer};
use crate::filter::OverlayFilter;
use crate::query::ViewportKey;

/// Rounded viewport plus the normalized exclusion filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OverlayKey {
    viewport: ViewportKey,
    max_floor_ft: Option<i64>,
    excluded_categories: BTreeSet<String>,
    excluded_classes: BTreeSet<IcaoClass>,
}

impl OverlayKey {
    pub fn new(viewport: &BoundingBox, precision: u32, filter: &OverlayFilter) -> Self {
        let filter = filter.normalized();
        Self {
            viewport: ViewportKey::new(viewport, precision),
            max_floor_ft: filter.max_floor_ft.map(|value| value as i64),
            excluded_categories: filter.excluded_categories,
            excluded_classes: filter.excluded_classes,
        }
    }

    pub fn bounds(&self) -> BoundingBox {
        self.viewport.bounds()
    }
}

/// One computed overlay. Shared between the cache and coalesced waiters.
#[derive(Debug, Clone, Default)]
pub struct OverlayValue {
    pub results: Vec<ClippedResult>,
    /// Degenerate inputs left out of `results`.
    pub dropped_ids: Vec<String>,
    /// Every polygon id that fed the computation, occluded or dropped ones included.
    pub source_ids: HashSet<String>,
    pub clip: ClipStats,
}

#[derive(Debug, Clone)]
pub struct OverlayLookup {
    pub value: Arc<OverlayValue>,
    pub cache_hit: bool,
}

struct OverlayEntry {
    value: Arc<OverlayValue>,
    bounds: BoundingBox,
    created_at: Instant,
    last_used: u64,
}

impl CacheEntry for OverlayEntry {
    fn created_at(&self) -> Instant {
        self.created_at
    }

    fn last_used(&self) -> u64 {
        self.last_used
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct OverlayCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub computations: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub coalescer: CoalescerStats,
}

pub struct OverlayCache {
    entries: DashMap<OverlayKey, OverlayEntry>,
    coalescer: RequestCoalescer<OverlayKey, Arc<OverlayValue>>,
    ttl: Duration,
    max_entries: usize,
    tick: AtomicU64,
    /// Bumped by every invalidation. A computation that started under an
    /// older generation is returned to its callers but not cached.
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    computations: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

impl OverlayCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            coalescer: RequestCoalescer::new(),
            ttl,
            max_entries,
            tick: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            computations: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    /// Cached value for `key`, or the result of `compute`.
    ///
    /// Concurrent misses on one key run `compute` once. If the computing
    /// caller is dropped or fails, waiters retry and one of them takes over.
    pub async fn get_or_compute<F, Fut, E>(&self, key: OverlayKey, compute: F) -> Result<OverlayLookup, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<OverlayValue, E>>,
    {
        let mut compute = Some(compute);
        loop {
            if let Some(value) = self.lookup(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(OverlayLookup { value, cache_hit: true });
            }

            match self.coalescer.register(key.clone()) {
                Registration::Follower(mut rx) => match rx.recv().await {
                    Ok(value) => {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        return Ok(OverlayLookup { value, cache_hit: true });
                    }
                    Err(RecvError::Closed) | Err(RecvError::Lagged(_)) => continue,
                },
                Registration::Leader(guard) => {
                    // Another leader may have finished between lookup and register.
                    if let Some(value) = self.lookup(&key) {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        guard.complete(value.clone());
                        return Ok(OverlayLookup { value, cache_hit: true });
                    }
                    let Some(compute) = compute.take() else {
                        // A leader only ever runs once per call.
                        continue;
                    };

                    self.misses.fetch_add(1, Ordering::Relaxed);
                    self.computations.fetch_add(1, Ordering::Relaxed);
                    let generation = self.generation.load(Ordering::Acquire);
                    let value = Arc::new(compute().await?);

                    if self.generation.load(Ordering::Acquire) == generation {
                        self.insert(key, value.clone());
                    } else {
                        tracing::debug!("Overlay invalidated while computing; result not cached");
                    }
                    guard.complete(value.clone());
                    return Ok(OverlayLookup { value, cache_hit: false });
                }
            }
        }
    }

    fn lookup(&self, key: &OverlayKey) -> Option<Arc<OverlayValue>> {
        let mut entry = self.entries.get_mut(key)?;
        if is_expired(&*entry, self.ttl) {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        entry.last_used = self.tick.fetch_add(1, Ordering::Relaxed);
        Some(entry.value.clone())
    }

    fn insert(&self, key: OverlayKey, value: Arc<OverlayValue>) {
        let bounds = key.bounds();
        self.entries.insert(
            key,
            OverlayEntry {
                value,
                bounds,
                created_at: Instant::now(),
                last_used: self.tick.fetch_add(1, Ordering::Relaxed),
            },
        );
        if self.entries.len() > self.max_entries {
            self.prune();
        }
    }

    /// Expire old entries and evict down to capacity.
    pub fn prune(&self) -> PruneOutcome {
        let outcome = prune_cache(&self.entries, self.max_entries, self.ttl);
        let dropped = (outcome.expired + outcome.evicted) as u64;
        if dropped > 0 {
            self.evictions.fetch_add(dropped, Ordering::Relaxed);
            tracing::debug!(
                expired = outcome.expired,
                evicted = outcome.evicted,
                "Pruned overlay cache"
            );
        }
        outcome
    }

    /// Drop entries built from any of `ids`, or whose viewport overlaps one
    /// of `regions`. Unrelated viewports stay cached.
    pub fn invalidate(&self, ids: &HashSet<String>, regions: &[BoundingBox]) -> usize {
        if ids.is_empty() && regions.is_empty() {
            return 0;
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            let touched = !entry.value.source_ids.is_disjoint(ids)
                || regions.iter().any(|region| region.intersects(&entry.bounds));
            !touched
        });
        let removed = before.saturating_sub(self.entries.len());
        self.invalidations.fetch_add(removed as u64, Ordering::Relaxed);
        if removed > 0 {
            tracing::debug!(removed, ids = ids.len(), "Invalidated overlay cache entries");
        }
        removed
    }

    pub fn invalidate_ids(&self, ids: &HashSet<String>) -> usize {
        self.invalidate(ids, &[])
    }

    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        let removed = self.entries.len();
        self.entries.clear();
        self.invalidations.fetch_add(removed as u64, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.coalescer.in_flight()
    }

    pub fn stats(&self) -> OverlayCacheStats {
        OverlayCacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            coalescer: self.coalescer.stats(),
        }
    }
}
