//! The overlay engine as one injectable object.
//!
//! `OverlayService` owns the stores and caches for one region of data and
//! exposes the three operations a renderer needs: resolve a viewport,
//! refresh a region and invalidate everything.

use airspace_core::{
    clip_overlay_cancellable, AirspacePolygon, BoundingBox, ClipOptions, ClipStats, ClippedResult,
    TileGrid, TileKey,
};
use airspace_openaip::FetchError;
use anyhow::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{ConfigError, OverlayError};
use crate::filter::OverlayFilter;
use crate::ingest::{IngestionPipeline, IngestionReport};
use crate::overlay_cache::{OverlayCache, OverlayCacheStats, OverlayKey, OverlayValue};
use crate::persistence::{self, airspaces, tiles as tile_rows, Database};
use crate::query::SpatialQueryEngine;
use crate::source::AirspaceSource;
use crate::store::{GeometryStore, TileEntry, TileIndex};

/// What a viewport resolution looked like, next to its results.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OverlayDiagnostics {
    /// No tile of the viewport was ever ingested; an empty result means
    /// "unknown", not "no airspace here".
    pub uningested: bool,
    pub missing_tiles: usize,
    pub stale_tiles: usize,
    /// Tiles a refresh should fetch (missing or stale).
    pub refresh_tiles: usize,
    pub cache_hit: bool,
    /// Polygons handed to the clipping engine after filtering.
    pub polygons_considered: usize,
    /// Degenerate footprints left out of the results.
    pub dropped_ids: Vec<String>,
    pub clip: ClipStats,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OverlayResponse {
    pub results: Vec<ClippedResult>,
    pub diagnostics: OverlayDiagnostics,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub polygons: usize,
    pub tiles: usize,
    pub tile_zoom: u8,
    pub query_cache_entries: usize,
    pub overlay_cache: OverlayCacheStats,
    pub source: Option<String>,
    pub persistent: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub polygons: usize,
    pub tiles: usize,
}

/// Trips a cancellation flag when the owning request future is dropped.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

pub struct OverlayService {
    config: Config,
    grid: TileGrid,
    geometry: Arc<GeometryStore>,
    tiles: Arc<TileIndex>,
    query: SpatialQueryEngine,
    overlay: OverlayCache,
    pipeline: IngestionPipeline,
    clip_options: ClipOptions,
    source: Option<Arc<dyn AirspaceSource>>,
    database: Option<Database>,
    refreshing: DashMap<TileKey, ()>,
}

impl OverlayService {
    /// Build an empty service. Fails only on invalid configuration.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let grid = TileGrid::new(config.tile_zoom).map_err(|_| ConfigError::InvalidZoom(config.tile_zoom))?;
        let geometry = Arc::new(GeometryStore::new());
        let tiles = Arc::new(TileIndex::new());
        let query = SpatialQueryEngine::new(
            geometry.clone(),
            tiles.clone(),
            grid,
            config.viewport_precision,
            std::time::Duration::from_secs(config.query_cache_ttl_s),
            config.query_cache_max_entries,
        );
        let overlay = OverlayCache::new(
            std::time::Duration::from_secs(config.overlay_cache_ttl_s),
            config.overlay_cache_max_entries,
        );
        let pipeline = IngestionPipeline::new(geometry.clone(), tiles.clone(), grid);
        let clip_options = ClipOptions {
            parallel_threshold: config.parallel_clip_threshold,
            ..ClipOptions::default()
        };

        Ok(Self {
            config,
            grid,
            geometry,
            tiles,
            query,
            overlay,
            pipeline,
            clip_options,
            source: None,
            database: None,
            refreshing: DashMap::new(),
        })
    }

    pub fn with_source(mut self, source: Arc<dyn AirspaceSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn grid(&self) -> TileGrid {
        self.grid
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    /// Clipped overlay for `viewport`. Per-polygon problems degrade the
    /// result instead of failing it.
    pub async fn resolve_overlay(
        &self,
        viewport: &BoundingBox,
        filter: &OverlayFilter,
    ) -> Result<OverlayResponse, OverlayError> {
        self.resolve_overlay_cancellable(viewport, filter, Arc::new(AtomicBool::new(false)))
            .await
    }

    /// Like [`OverlayService::resolve_overlay`], stopping early once `cancel`
    /// is set. Dropping the returned future also sets `cancel`, which stops
    /// any clipping still running for it and frees its cache slot.
    pub async fn resolve_overlay_cancellable(
        &self,
        viewport: &BoundingBox,
        filter: &OverlayFilter,
        cancel: Arc<AtomicBool>,
    ) -> Result<OverlayResponse, OverlayError> {
        self.check_viewport(viewport)?;
        let _cancel_on_drop = CancelOnDrop(cancel.clone());
        if cancel.load(Ordering::Relaxed) {
            return Err(OverlayError::Cancelled);
        }

        let filter = filter.normalized();
        let key = OverlayKey::new(viewport, self.config.viewport_precision, &filter);
        let resolution = self.query.resolve(&key.bounds(), self.config.tile_max_age());

        if resolution.is_uningested() {
            info!(
                tiles = resolution.missing_tiles.len(),
                "Viewport has not been ingested"
            );
        }

        let candidates: Vec<Arc<AirspacePolygon>> = resolution
            .polygons
            .iter()
            .filter(|polygon| filter.admits(polygon))
            .cloned()
            .collect();
        let options = self.clip_options;

        let lookup = self
            .overlay
            .get_or_compute(key, || async move {
                let source_ids: HashSet<String> =
                    candidates.iter().map(|polygon| polygon.id.clone()).collect();
                let flag = cancel.clone();
                let output = tokio::task::spawn_blocking(move || {
                    clip_overlay_cancellable(&candidates, &options, &flag)
                })
                .await
                .map_err(|err| {
                    warn!(error = %err, "Clipping task failed");
                    OverlayError::Cancelled
                })??;

                debug!(
                    polygons = output.stats.input,
                    occluder_pairs = output.stats.occluder_pairs,
                    degraded = output.stats.degraded_pairs,
                    "Clipped overlay"
                );
                Ok::<_, OverlayError>(OverlayValue {
                    results: output.results,
                    dropped_ids: output.dropped_ids,
                    source_ids,
                    clip: output.stats,
                })
            })
            .await?;

        let value = lookup.value;
        let diagnostics = OverlayDiagnostics {
            uningested: resolution.is_uningested(),
            missing_tiles: resolution.missing_tiles.len(),
            stale_tiles: resolution.stale_tiles.len(),
            refresh_tiles: resolution.missing_tiles.len() + resolution.stale_tiles.len(),
            cache_hit: lookup.cache_hit,
            polygons_considered: value.source_ids.len(),
            dropped_ids: value.dropped_ids.clone(),
            clip: value.clip.clone(),
        };
        Ok(OverlayResponse {
            results: value.results.clone(),
            diagnostics,
        })
    }

    /// Fetch and ingest every tile of `viewport`, ignoring freshness.
    pub async fn refresh_region(&self, viewport: &BoundingBox) -> Result<IngestionReport, OverlayError> {
        self.check_viewport(viewport)?;
        let tiles = self.grid.tiles_for_bounds(viewport);
        self.refresh_tiles(&tiles).await
    }

    /// Fetch only the missing or stale tiles of `viewport`.
    pub async fn refresh_stale(&self, viewport: &BoundingBox) -> Result<IngestionReport, OverlayError> {
        self.check_viewport(viewport)?;
        let resolution = self.query.resolve(viewport, self.config.tile_max_age());
        let tiles = resolution.needs_refresh();
        if tiles.is_empty() {
            return Ok(IngestionReport::default());
        }
        self.refresh_tiles(&tiles).await
    }

    /// Fetch `tiles` from the source in batches.
    ///
    /// Batches finished before a timeout or failure stay ingested; a timeout
    /// returns their combined report inside the error.
    pub async fn refresh_tiles(&self, tiles: &[TileKey]) -> Result<IngestionReport, OverlayError> {
        let source = self.source.clone().ok_or(OverlayError::NoSource)?;
        let mut report = IngestionReport::default();

        for batch in tiles.chunks(self.config.refresh_batch_tiles.max(1)) {
            let Some(bounds) = TileGrid::cover(batch) else {
                continue;
            };
            let fetched = tokio::time::timeout(self.config.fetch_timeout(), source.fetch(&bounds)).await;
            let records = match fetched {
                Ok(Ok(records)) => records,
                Err(_) | Ok(Err(FetchError::Timeout)) => {
                    warn!(
                        source = source.name(),
                        tiles_done = report.tiles_written,
                        tiles_total = tiles.len(),
                        "Airspace fetch timed out; keeping partial ingestion"
                    );
                    return Err(OverlayError::Timeout {
                        partial: Box::new(report),
                    });
                }
                Ok(Err(err)) => {
                    warn!(source = source.name(), error = %err, "Airspace fetch failed");
                    return Err(OverlayError::Fetch(err));
                }
            };
            let batch_report = self.ingest(records, batch).await;
            report.merge(batch_report);
        }

        info!(
            source = source.name(),
            tiles = report.tiles_written,
            inserted = report.inserted,
            updated = report.updated,
            "Refreshed airspace region"
        );
        Ok(report)
    }

    /// Missing or stale tiles of `viewport`.
    pub fn tiles_needing_refresh(&self, viewport: &BoundingBox) -> Vec<TileKey> {
        if self.check_viewport(viewport).is_err() {
            return Vec::new();
        }
        self.query
            .resolve(viewport, self.config.tile_max_age())
            .needs_refresh()
    }

    /// Refresh `tiles` on a background task, skipping tiles already being refreshed.
    pub fn spawn_refresh(self: &Arc<Self>, tiles: Vec<TileKey>) -> bool {
        if self.source.is_none() {
            return false;
        }
        let claimed: Vec<TileKey> = tiles
            .into_iter()
            .filter(|tile| self.refreshing.insert(*tile, ()).is_none())
            .collect();
        if claimed.is_empty() {
            return false;
        }

        let service = self.clone();
        tokio::spawn(async move {
            if let Err(err) = service.refresh_tiles(&claimed).await {
                warn!(error = %err, "Background airspace refresh failed");
            }
            for tile in &claimed {
                service.refreshing.remove(tile);
            }
        });
        true
    }

    /// Ingest records already fetched for `covered`, then invalidate and persist.
    pub async fn ingest(&self, records: Vec<Value>, covered: &[TileKey]) -> IngestionReport {
        let report = self.pipeline.ingest(records, covered);
        self.apply_changes(&report);
        self.persist_ingest(&report).await;
        report
    }

    /// Ingest records pushed by a caller for every tile of `bounds`.
    pub async fn ingest_region(
        &self,
        bounds: &BoundingBox,
        records: Vec<Value>,
    ) -> Result<IngestionReport, OverlayError> {
        self.check_viewport(bounds)?;
        let covered = self.grid.tiles_for_bounds(bounds);
        Ok(self.ingest(records, &covered).await)
    }

    fn apply_changes(&self, report: &IngestionReport) {
        self.query.invalidate();

        let mut regions: Vec<BoundingBox> = TileGrid::cover(&report.tiles).into_iter().collect();
        regions.extend(
            report
                .changed_ids
                .iter()
                .filter_map(|id| self.geometry.get(id))
                .map(|polygon| polygon.bounding_box),
        );
        let changed: HashSet<String> = report
            .changed_ids
            .iter()
            .chain(&report.removed_ids)
            .cloned()
            .collect();
        self.overlay.invalidate(&changed, &regions);
    }

    async fn persist_ingest(&self, report: &IngestionReport) {
        let Some(database) = &self.database else {
            return;
        };

        let records: Vec<(Arc<AirspacePolygon>, DateTime<Utc>)> = report
            .stored_ids
            .iter()
            .filter_map(|id| Some((self.geometry.get(id)?, self.geometry.stored_at(id)?)))
            .collect();
        let rows: Vec<(&AirspacePolygon, DateTime<Utc>)> = records
            .iter()
            .map(|(polygon, stored_at)| (polygon.as_ref(), *stored_at))
            .collect();
        if let Err(err) = airspaces::upsert_airspaces(database.pool(), &rows).await {
            warn!(error = %err, "Failed to persist airspaces");
        }
        if !report.removed_ids.is_empty() {
            let removed: Vec<String> = report.removed_ids.iter().cloned().collect();
            if let Err(err) = airspaces::delete_airspaces(database.pool(), &removed).await {
                warn!(error = %err, "Failed to delete retired airspace parts");
            }
        }

        let entries: Vec<TileEntry> = report
            .tiles
            .iter()
            .filter_map(|tile| self.tiles.get_tile(tile))
            .map(|entry| TileEntry::clone(&entry))
            .collect();
        if let Err(err) = tile_rows::upsert_tiles(database.pool(), &entries).await {
            warn!(error = %err, "Failed to persist tiles");
        }
    }

    /// Drop every cached overlay and treat every tile as stale.
    pub fn invalidate_all(&self) {
        self.overlay.clear();
        self.tiles.invalidate_all();
        self.query.invalidate();
        info!("Invalidated all overlays and tiles");
    }

    /// Empty every store, in memory and on disk.
    pub async fn clear(&self) -> Result<(), OverlayError> {
        self.geometry.clear();
        self.tiles.clear();
        self.overlay.clear();
        self.query.invalidate();
        if let Some(database) = &self.database {
            persistence::clear_all(database.pool()).await.map_err(|err| {
                warn!(error = %err, "Failed to clear persisted airspace");
                OverlayError::Persistence(err.to_string())
            })?;
        }
        info!("Cleared all airspace");
        Ok(())
    }

    /// Remove geometry past its retention period. Tile entries pointing at
    /// purged ids are pruned on their next read.
    pub async fn purge_expired(&self) -> Vec<String> {
        let purged = self.geometry.purge_expired(self.config.geometry_retention());
        if purged.is_empty() {
            return purged;
        }
        let ids: HashSet<String> = purged.iter().cloned().collect();
        self.overlay.invalidate_ids(&ids);
        self.query.invalidate();
        info!(count = purged.len(), "Purged expired airspace geometry");

        if let Some(database) = &self.database {
            if let Err(err) = airspaces::delete_airspaces(database.pool(), &purged).await {
                warn!(error = %err, "Failed to delete purged airspaces");
            }
        }
        purged
    }

    /// Expire and evict entries from both in-process caches.
    pub fn prune_caches(&self) {
        let query = self.query.prune_cache();
        let overlay = self.overlay.prune();
        debug!(
            query_expired = query.expired,
            overlay_expired = overlay.expired,
            overlay_evicted = overlay.evicted,
            "Pruned caches"
        );
    }

    /// Restore both stores from the database.
    pub async fn load_from_database(&self) -> Result<LoadSummary> {
        let Some(database) = &self.database else {
            return Ok(LoadSummary::default());
        };

        let polygons = airspaces::load_all_airspaces(database.pool()).await?;
        let mut summary = LoadSummary {
            polygons: polygons.len(),
            tiles: 0,
        };
        for (polygon, stored_at) in polygons {
            self.geometry.restore(polygon, stored_at);
        }

        let tiles = tile_rows::load_tiles(database.pool(), self.grid.zoom()).await?;
        summary.tiles = tiles.len();
        for (tile, ids, fetched_at) in tiles {
            self.tiles.restore(tile, ids, fetched_at);
        }

        self.query.invalidate();
        self.overlay.clear();
        info!(
            polygons = summary.polygons,
            tiles = summary.tiles,
            "Loaded airspace from database"
        );
        Ok(summary)
    }

    pub fn get_airspace(&self, id: &str) -> Option<Arc<AirspacePolygon>> {
        self.geometry.get(id)
    }

    pub fn geometry(&self) -> &GeometryStore {
        &self.geometry
    }

    pub fn tile_index(&self) -> &TileIndex {
        &self.tiles
    }

    pub fn overlay_cache(&self) -> &OverlayCache {
        &self.overlay
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            polygons: self.geometry.len(),
            tiles: self.tiles.len(),
            tile_zoom: self.grid.zoom(),
            query_cache_entries: self.query.cached_entries(),
            overlay_cache: self.overlay.stats(),
            source: self.source.as_ref().map(|source| source.name().to_string()),
            persistent: self.database.is_some(),
        }
    }

    fn check_viewport(&self, viewport: &BoundingBox) -> Result<(), OverlayError> {
        if !viewport.is_valid() {
            return Err(OverlayError::InvalidViewport(format!(
                "bounds {:?} are not ordered WGS84 coordinates",
                viewport
            )));
        }
        let tiles = self.grid.tile_count(viewport);
        if tiles > self.config.max_viewport_tiles {
            return Err(OverlayError::InvalidViewport(format!(
                "viewport spans {} tiles, limit is {}",
                tiles, self.config.max_viewport_tiles
            )));
        }
        Ok(())
    }
}
