//! Tile key to polygon id mapping.
//!
//! Entries hold ids only. A polygon spanning many tiles is stored once in the
//! geometry store and referenced from each tile it touches.

use airspace_core::TileKey;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::geometry_store::cutoff;

/// Association record for one tile. Replaced whole, never edited in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TileEntry {
    pub tile: TileKey,
    pub polygon_ids: BTreeSet<String>,
    pub fetched_at: DateTime<Utc>,
    /// Set when a referenced polygon changed after this tile was fetched.
    pub stale: bool,
    #[serde(skip)]
    generation: u64,
}

impl TileEntry {
    /// Checked and found to contain nothing, as opposed to never fetched.
    pub fn is_empty(&self) -> bool {
        self.polygon_ids.is_empty()
    }
}

#[derive(Default)]
pub struct TileIndex {
    tiles: DashMap<TileKey, Arc<TileEntry>>,
    /// Bumped by `invalidate_all`; entries from older generations are stale.
    generation: AtomicU64,
}

impl TileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_tile(&self, tile: &TileKey) -> Option<Arc<TileEntry>> {
        self.tiles.get(tile).map(|entry| entry.clone())
    }

    /// Atomically replace the entry for `tile`.
    pub fn put_tile(&self, tile: TileKey, polygon_ids: BTreeSet<String>, fetched_at: DateTime<Utc>) {
        let entry = TileEntry {
            tile,
            polygon_ids,
            fetched_at,
            stale: false,
            generation: self.generation.load(Ordering::Acquire),
        };
        self.tiles.insert(tile, Arc::new(entry));
    }

    /// Present, younger than `max_age`, and not invalidated since it was written.
    pub fn is_fresh(&self, tile: &TileKey, max_age: Duration) -> bool {
        self.get_tile(tile)
            .is_some_and(|entry| self.entry_is_fresh(&entry, max_age))
    }

    pub fn entry_is_fresh(&self, entry: &TileEntry, max_age: Duration) -> bool {
        if entry.stale || entry.generation != self.generation.load(Ordering::Acquire) {
            return false;
        }
        match cutoff(max_age) {
            Some(cutoff) => entry.fetched_at >= cutoff,
            None => true,
        }
    }

    /// Flag every tile referencing one of `ids` as stale. Returns how many.
    pub fn mark_stale_referencing(&self, ids: &HashSet<String>) -> usize {
        if ids.is_empty() {
            return 0;
        }
        let mut marked = 0;
        for mut entry in self.tiles.iter_mut() {
            if entry.stale || !entry.polygon_ids.iter().any(|id| ids.contains(id)) {
                continue;
            }
            let mut replacement = TileEntry::clone(&entry);
            replacement.stale = true;
            *entry = Arc::new(replacement);
            marked += 1;
        }
        marked
    }

    /// Treat every existing entry as stale on its next read.
    pub fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop ids that no longer resolve from one tile. Returns true if the
    /// entry changed.
    pub fn prune_missing(&self, tile: &TileKey, missing: &HashSet<String>) -> bool {
        let Some(mut entry) = self.tiles.get_mut(tile) else {
            return false;
        };
        if !entry.polygon_ids.iter().any(|id| missing.contains(id)) {
            return false;
        }
        let mut replacement = TileEntry::clone(&entry);
        replacement.polygon_ids.retain(|id| !missing.contains(id));
        *entry = Arc::new(replacement);
        true
    }

    /// Load a persisted entry; it counts as current-generation.
    pub fn restore(&self, tile: TileKey, polygon_ids: BTreeSet<String>, fetched_at: DateTime<Utc>) {
        self.put_tile(tile, polygon_ids, fetched_at);
    }

    pub fn clear(&self) {
        self.tiles.clear();
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}
