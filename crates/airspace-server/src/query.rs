//! Viewport to candidate polygons, through the tile index.

use airspace_core::{AirspacePolygon, BoundingBox, TileGrid, TileKey};
use dashmap::DashMap;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::{is_expired, prune_cache, CacheEntry, PruneOutcome};
use crate::store::{GeometryStore, TileIndex};

/// Viewport snapped to a fixed decimal grid, usable as a hash key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewportKey {
    min_lat: i64,
    min_lon: i64,
    max_lat: i64,
    max_lon: i64,
    precision: u32,
}

impl ViewportKey {
    pub fn new(bounds: &BoundingBox, precision: u32) -> Self {
        let scale = 10f64.powi(precision as i32);
        Self {
            min_lat: (bounds.min_lat * scale).floor() as i64,
            min_lon: (bounds.min_lon * scale).floor() as i64,
            max_lat: (bounds.max_lat * scale).ceil() as i64,
            max_lon: (bounds.max_lon * scale).ceil() as i64,
            precision,
        }
    }

    pub fn bounds(&self) -> BoundingBox {
        let scale = 10f64.powi(self.precision as i32);
        BoundingBox::new(
            self.min_lat as f64 / scale,
            self.min_lon as f64 / scale,
            self.max_lat as f64 / scale,
            self.max_lon as f64 / scale,
        )
    }
}

/// Candidates for one viewport plus the state of the tiles behind them.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Sorted by id.
    pub polygons: Vec<Arc<AirspacePolygon>>,
    pub fresh_tiles: Vec<TileKey>,
    /// Present but expired or invalidated. Their ids are still used.
    pub stale_tiles: Vec<TileKey>,
    /// Never ingested. Treated as empty.
    pub missing_tiles: Vec<TileKey>,
}

impl Resolution {
    /// No tile of the viewport has ever been ingested.
    pub fn is_uningested(&self) -> bool {
        self.fresh_tiles.is_empty() && self.stale_tiles.is_empty() && !self.missing_tiles.is_empty()
    }

    /// Tiles an ingestion run should fetch.
    pub fn needs_refresh(&self) -> Vec<TileKey> {
        let mut tiles: Vec<TileKey> = self
            .missing_tiles
            .iter()
            .chain(&self.stale_tiles)
            .copied()
            .collect();
        tiles.sort();
        tiles
    }
}

struct CachedResolution {
    resolution: Resolution,
    created_at: Instant,
    last_used: u64,
    version: u64,
}

impl CacheEntry for CachedResolution {
    fn created_at(&self) -> Instant {
        self.created_at
    }

    fn last_used(&self) -> u64 {
        self.last_used
    }
}

pub struct SpatialQueryEngine {
    geometry: Arc<GeometryStore>,
    tiles: Arc<TileIndex>,
    grid: TileGrid,
    precision: u32,
    cache: DashMap<(ViewportKey, u64), CachedResolution>,
    cache_ttl: Duration,
    cache_max_entries: usize,
    /// Bumped on every data change; older cache entries are ignored.
    version: AtomicU64,
    tick: AtomicU64,
}

impl SpatialQueryEngine {
    pub fn new(
        geometry: Arc<GeometryStore>,
        tiles: Arc<TileIndex>,
        grid: TileGrid,
        precision: u32,
        cache_ttl: Duration,
        cache_max_entries: usize,
    ) -> Self {
        Self {
            geometry,
            tiles,
            grid,
            precision,
            cache: DashMap::new(),
            cache_ttl,
            cache_max_entries,
            version: AtomicU64::new(0),
            tick: AtomicU64::new(0),
        }
    }

    pub fn grid(&self) -> TileGrid {
        self.grid
    }

    /// Resolve the polygons visible in `viewport`. Never performs I/O.
    pub fn resolve(&self, viewport: &BoundingBox, max_tile_age: Duration) -> Resolution {
        let key = (ViewportKey::new(viewport, self.precision), max_tile_age.as_secs());
        let version = self.version.load(Ordering::Acquire);

        if let Some(mut cached) = self.cache.get_mut(&key) {
            if cached.version == version && !is_expired(&*cached, self.cache_ttl) {
                cached.last_used = self.next_tick();
                return cached.resolution.clone();
            }
        }

        let resolution = self.resolve_uncached(&key.0.bounds(), max_tile_age);

        if self.version.load(Ordering::Acquire) == version {
            self.cache.insert(
                key,
                CachedResolution {
                    resolution: resolution.clone(),
                    created_at: Instant::now(),
                    last_used: self.next_tick(),
                    version,
                },
            );
            if self.cache.len() > self.cache_max_entries {
                self.prune_cache();
            }
        }
        resolution
    }

    fn resolve_uncached(&self, bounds: &BoundingBox, max_tile_age: Duration) -> Resolution {
        let mut resolution = Resolution::default();
        let mut entries = Vec::new();
        let mut ids = BTreeSet::new();

        for tile in self.grid.tiles_for_bounds(bounds) {
            match self.tiles.get_tile(&tile) {
                None => resolution.missing_tiles.push(tile),
                Some(entry) => {
                    if self.tiles.entry_is_fresh(&entry, max_tile_age) {
                        resolution.fresh_tiles.push(tile);
                    } else {
                        resolution.stale_tiles.push(tile);
                    }
                    ids.extend(entry.polygon_ids.iter().cloned());
                    entries.push(entry);
                }
            }
        }

        let polygons = self.geometry.get_many(&ids);
        if polygons.len() < ids.len() {
            let found: HashSet<&str> = polygons.iter().map(|polygon| polygon.id.as_str()).collect();
            let missing: HashSet<String> = ids
                .iter()
                .filter(|id| !found.contains(id.as_str()))
                .cloned()
                .collect();
            let pruned = entries
                .iter()
                .filter(|entry| self.tiles.prune_missing(&entry.tile, &missing))
                .count();
            tracing::debug!(
                missing = missing.len(),
                tiles = pruned,
                "Pruned expired polygon ids from tile index"
            );
        }

        resolution.polygons = polygons
            .into_iter()
            .filter(|polygon| polygon.bounding_box.intersects(bounds))
            .collect();
        resolution
    }

    /// Forget cached resolutions after the stores changed.
    pub fn invalidate(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
        self.cache.clear();
    }

    pub fn prune_cache(&self) -> PruneOutcome {
        prune_cache(&self.cache, self.cache_max_entries, self.cache_ttl)
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed)
    }
}
