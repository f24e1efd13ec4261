//! Overlay service integration tests.
//!
//! Drive `OverlayService` end to end against in-memory sources.
//! Run with: cargo test --test overlay_test

use airspace_core::{AirspacePolygon, AltitudeDatum, AltitudeLimit, AltitudeUnit, BoundingBox, IcaoClass};
use airspace_server::persistence::init_database;
use airspace_server::source::MemorySource;
use airspace_server::{Config, ConfigError, OverlayError, OverlayFilter, OverlayService};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

fn record(id: &str, name: &str, lower_ft: f64, lon: f64, lat: f64, size_lon: f64, size_lat: f64) -> Value {
    json!({
        "_id": id,
        "name": name,
        "type": 4,
        "icaoClass": 3,
        "lowerLimit": { "value": lower_ft, "unit": 1, "referenceDatum": 1 },
        "upperLimit": { "value": 10000, "unit": 1, "referenceDatum": 1 },
        "geometry": {
            "type": "Polygon",
            "coordinates": [[
                [lon, lat],
                [lon + size_lon, lat],
                [lon + size_lon, lat + size_lat],
                [lon, lat + size_lat],
                [lon, lat]
            ]]
        }
    })
}

fn square(id: &str, lower_ft: f64, lon: f64, lat: f64, size: f64) -> Value {
    record(id, &id.to_uppercase(), lower_ft, lon, lat, size, size)
}

fn geneva() -> BoundingBox {
    BoundingBox::new(45.9, 5.9, 46.6, 6.6)
}

fn service() -> OverlayService {
    OverlayService::new(Config {
        persist: false,
        ..Config::default()
    })
    .expect("valid config")
}

fn temp_db_path() -> String {
    std::env::temp_dir()
        .join(format!("airspace-it-{}.db", uuid::Uuid::new_v4()))
        .to_string_lossy()
        .to_string()
}

#[tokio::test]
async fn lower_layer_occludes_the_same_square_above() {
    let service = service();
    service
        .ingest_region(
            &geneva(),
            vec![square("a", 0.0, 6.0, 46.0, 0.1), square("b", 3000.0, 6.0, 46.0, 0.1)],
        )
        .await
        .unwrap();

    let response = service
        .resolve_overlay(&geneva(), &OverlayFilter::default())
        .await
        .unwrap();
    assert_eq!(response.results.len(), 2);
    assert_eq!(response.results[0].source_polygon_id, "a");
    assert!(!response.results[0].is_occluded());
    assert_eq!(response.results[1].source_polygon_id, "b");
    assert!(response.results[1].is_occluded());
    assert_eq!(response.diagnostics.clip.fully_occluded, 1);
}

#[tokio::test]
async fn hidden_layers_do_not_occlude() {
    let service = service();
    service
        .ingest_region(
            &geneva(),
            vec![square("a", 0.0, 6.0, 46.0, 0.1), square("b", 3000.0, 6.0, 46.0, 0.1)],
        )
        .await
        .unwrap();

    let filter = OverlayFilter::from_lists(Some(2000.0), None, None).unwrap();
    let response = service.resolve_overlay(&geneva(), &filter).await.unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].source_polygon_id, "a");

    let filter = OverlayFilter::from_lists(None, None, Some("D")).unwrap();
    let response = service.resolve_overlay(&geneva(), &filter).await.unwrap();
    assert!(response.results.is_empty());
    assert_eq!(response.diagnostics.polygons_considered, 0);
}

#[tokio::test]
async fn shared_polygon_is_stored_once_across_tiles() {
    let service = service();
    let bounds = BoundingBox::new(44.0, 4.0, 47.0, 7.0);
    let report = service
        .ingest_region(&bounds, vec![record("big", "Big", 0.0, 4.0, 44.0, 3.0, 3.0)])
        .await
        .unwrap();

    let tiles = service.grid().tiles_for_bounds(&bounds);
    assert!(tiles.len() > 1);
    assert_eq!(report.tiles_written, tiles.len());
    assert_eq!(service.geometry().len(), 1);

    let mut referenced = BTreeSet::new();
    for tile in &tiles {
        let entry = service.tile_index().get_tile(tile).expect("tile written");
        assert!(entry.polygon_ids.contains("big"));
        referenced.extend(entry.polygon_ids.iter().cloned());
    }
    assert_eq!(referenced.len(), 1);
    assert_eq!(service.geometry().get_many(&referenced).len(), 1);

    let response = service
        .resolve_overlay(&bounds, &OverlayFilter::default())
        .await
        .unwrap();
    assert_eq!(response.results.len(), 1);
}

#[tokio::test]
async fn metadata_only_update_is_reported_unchanged() {
    let service = service();
    service
        .ingest_region(&geneva(), vec![record("ctr", "Geneva", 0.0, 6.0, 46.0, 0.2, 0.2)])
        .await
        .unwrap();
    let report = service
        .ingest_region(
            &geneva(),
            vec![record("ctr", "Geneva Renamed", 0.0, 6.0, 46.0, 0.2, 0.2)],
        )
        .await
        .unwrap();

    assert_eq!((report.inserted, report.updated, report.unchanged), (0, 0, 1));
    assert!(report.changed_ids.is_empty());
    assert_eq!(service.get_airspace("ctr").unwrap().name, "Geneva Renamed");

    let response = service
        .resolve_overlay(&geneva(), &OverlayFilter::default())
        .await
        .unwrap();
    assert_eq!(response.results[0].name, "Geneva Renamed");
}

#[tokio::test]
async fn uningested_viewport_is_not_reported_as_empty_sky() {
    let service = service();
    let response = service
        .resolve_overlay(&geneva(), &OverlayFilter::default())
        .await
        .unwrap();

    assert!(response.results.is_empty());
    assert!(response.diagnostics.uningested);
    assert!(response.diagnostics.missing_tiles > 0);
    assert_eq!(response.diagnostics.refresh_tiles, response.diagnostics.missing_tiles);
}

#[tokio::test]
async fn polar_airspace_beyond_the_mercator_limit_is_served() {
    let service = service();
    let arctic = BoundingBox::new(86.0, 10.0, 88.0, 12.0);
    let report = service
        .ingest_region(&arctic, vec![square("polar", 0.0, 10.5, 86.5, 1.0)])
        .await
        .unwrap();
    assert_eq!(report.inserted, 1);

    let response = service
        .resolve_overlay(&arctic, &OverlayFilter::default())
        .await
        .unwrap();
    assert!(!response.diagnostics.uningested);
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].source_polygon_id, "polar");
}

#[tokio::test]
async fn repeated_resolves_are_identical_and_cached() {
    let service = service();
    service
        .ingest_region(
            &geneva(),
            vec![square("a", 0.0, 6.0, 46.0, 0.2), square("b", 1500.0, 6.1, 46.1, 0.2)],
        )
        .await
        .unwrap();
    let filter = OverlayFilter::default();
    let viewport = BoundingBox::new(45.9004, 5.9004, 46.5996, 6.5996);

    let first = service.resolve_overlay(&viewport, &filter).await.unwrap();
    let second = service.resolve_overlay(&viewport, &filter).await.unwrap();
    assert!(!first.diagnostics.cache_hit);
    assert!(second.diagnostics.cache_hit);
    assert_eq!(first.results, second.results);

    // Sub-precision jitter lands on the same cache key.
    let jittered = BoundingBox::new(45.9002, 5.9002, 46.5998, 6.5998);
    let third = service.resolve_overlay(&jittered, &filter).await.unwrap();
    assert!(third.diagnostics.cache_hit);
    assert_eq!(third.results, first.results);
}

#[tokio::test]
async fn concurrent_misses_clip_once() {
    let service = Arc::new(service());
    let records = (0..40)
        .map(|i| square(&format!("p{i:02}"), (i % 8) as f64 * 500.0, 6.0 + i as f64 * 0.01, 46.0, 0.1))
        .collect();
    service.ingest_region(&geneva(), records).await.unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .resolve_overlay(&geneva(), &OverlayFilter::default())
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut responses = Vec::new();
    for handle in handles {
        responses.push(handle.await.unwrap());
    }
    assert!(responses.iter().all(|response| response.results == responses[0].results));

    let stats = service.overlay_cache().stats();
    assert_eq!(stats.computations, 1);
    assert_eq!(service.overlay_cache().in_flight(), 0);
}

#[tokio::test]
async fn cancelled_request_leaves_no_slot_behind() {
    let service = service();
    service
        .ingest_region(&geneva(), vec![square("a", 0.0, 6.0, 46.0, 0.2)])
        .await
        .unwrap();
    let filter = OverlayFilter::default();

    let cancel = Arc::new(AtomicBool::new(true));
    let outcome = service
        .resolve_overlay_cancellable(&geneva(), &filter, cancel)
        .await;
    assert!(matches!(outcome, Err(OverlayError::Cancelled)));

    // Dropping an in-progress request must release its single-flight slot.
    let cancel = Arc::new(AtomicBool::new(false));
    let _ = tokio::time::timeout(
        Duration::ZERO,
        service.resolve_overlay_cancellable(&geneva(), &filter, cancel),
    )
    .await;
    assert_eq!(service.overlay_cache().in_flight(), 0);

    let response = service.resolve_overlay(&geneva(), &filter).await.unwrap();
    assert_eq!(response.results.len(), 1);
}

#[tokio::test]
async fn geometry_update_invalidates_only_affected_overlays() {
    let service = service();
    let elsewhere = BoundingBox::new(49.9, 19.9, 50.4, 20.4);
    service
        .ingest_region(&geneva(), vec![square("a", 0.0, 6.0, 46.0, 0.2)])
        .await
        .unwrap();
    service
        .ingest_region(&elsewhere, vec![square("z", 0.0, 20.0, 50.0, 0.2)])
        .await
        .unwrap();
    let filter = OverlayFilter::default();
    service.resolve_overlay(&geneva(), &filter).await.unwrap();
    service.resolve_overlay(&elsewhere, &filter).await.unwrap();

    let report = service
        .ingest_region(&geneva(), vec![square("a", 0.0, 6.0, 46.0, 0.3)])
        .await
        .unwrap();
    assert_eq!(report.updated, 1);
    assert!(report.changed_ids.contains("a"));

    let updated = service.resolve_overlay(&geneva(), &filter).await.unwrap();
    assert!(!updated.diagnostics.cache_hit);
    let ring = &updated.results[0].remaining_rings[0][0];
    assert!(ring.iter().any(|point| (point[0] - 46.3).abs() < 1e-9));

    let untouched = service.resolve_overlay(&elsewhere, &filter).await.unwrap();
    assert!(untouched.diagnostics.cache_hit);
}

#[tokio::test(start_paused = true)]
async fn timeout_keeps_batches_that_finished() {
    let source = Arc::new(
        MemorySource::new(vec![record("big", "Big", 0.0, 4.0, 45.0, 3.0, 0.4)])
            .with_delay(Duration::from_secs(30), 1),
    );
    let service = OverlayService::new(Config {
        persist: false,
        refresh_batch_tiles: 1,
        fetch_timeout_s: 1,
        ..Config::default()
    })
    .unwrap()
    .with_source(source.clone());

    let region = BoundingBox::new(45.0, 4.0, 45.4, 7.0);
    assert!(service.grid().tile_count(&region) > 1);

    match service.refresh_region(&region).await {
        Err(OverlayError::Timeout { partial }) => {
            assert_eq!(partial.tiles_written, 1);
            assert_eq!(partial.inserted, 1);
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
    assert_eq!(source.calls(), 2);
    assert_eq!(service.tile_index().len(), 1);
    assert!(service.get_airspace("big").is_some());

    let response = service
        .resolve_overlay(&region, &OverlayFilter::default())
        .await
        .unwrap();
    assert_eq!(response.results.len(), 1);
    assert!(response.diagnostics.missing_tiles > 0);
    assert!(!response.diagnostics.uningested);
}

#[tokio::test]
async fn refresh_needs_a_source() {
    let outcome = service().refresh_region(&geneva()).await;
    assert!(matches!(outcome, Err(OverlayError::NoSource)));
}

#[tokio::test]
async fn refresh_stale_skips_fresh_tiles() {
    let source = Arc::new(MemorySource::new(vec![square("a", 0.0, 6.0, 46.0, 0.2)]));
    let service = service().with_source(source.clone());

    let first = service.refresh_stale(&geneva()).await.unwrap();
    assert_eq!(first.inserted, 1);
    let calls = source.calls();

    let second = service.refresh_stale(&geneva()).await.unwrap();
    assert_eq!(second.tiles_written, 0);
    assert_eq!(source.calls(), calls);

    service.invalidate_all();
    let third = service.refresh_stale(&geneva()).await.unwrap();
    assert_eq!(third.unchanged, 1);
    assert!(source.calls() > calls);
}

#[tokio::test]
async fn expired_geometry_is_purged_and_pruned_from_tiles() {
    let service = OverlayService::new(Config {
        persist: false,
        geometry_retention_s: 60,
        ..Config::default()
    })
    .unwrap();
    let polygon = AirspacePolygon::new(
        "old",
        "Old",
        "CTR",
        IcaoClass::D,
        AltitudeLimit::ground(),
        AltitudeLimit::new(2500.0, AltitudeUnit::Feet, AltitudeDatum::MeanSeaLevel),
        vec![vec![[46.0, 6.0], [46.0, 6.1], [46.1, 6.1], [46.0, 6.0]]],
    )
    .unwrap();
    service
        .geometry()
        .restore(polygon, Utc::now() - chrono::Duration::hours(2));
    let tile = service.grid().tile_for(46.05, 6.05).unwrap();
    service
        .tile_index()
        .restore(tile, BTreeSet::from(["old".to_string()]), Utc::now());

    assert_eq!(service.purge_expired().await, vec!["old".to_string()]);

    let response = service
        .resolve_overlay(&geneva(), &OverlayFilter::default())
        .await
        .unwrap();
    assert!(response.results.is_empty());
    let entry = service.tile_index().get_tile(&tile).unwrap();
    assert!(entry.polygon_ids.is_empty());
}

#[tokio::test]
async fn stores_survive_a_restart() {
    let path = temp_db_path();
    let config = Config {
        database_path: path.clone(),
        ..Config::default()
    };

    {
        let db = init_database(&path, 1).await.unwrap();
        let service = OverlayService::new(config.clone()).unwrap().with_database(db);
        service
            .ingest_region(
                &geneva(),
                vec![square("a", 0.0, 6.0, 46.0, 0.2), square("b", 1500.0, 6.1, 46.1, 0.2)],
            )
            .await
            .unwrap();
    }

    let db = init_database(&path, 1).await.unwrap();
    let service = OverlayService::new(config).unwrap().with_database(db);
    let summary = service.load_from_database().await.unwrap();
    assert_eq!(summary.polygons, 2);
    assert_eq!(summary.tiles, service.grid().tile_count(&geneva()));

    let response = service
        .resolve_overlay(&geneva(), &OverlayFilter::default())
        .await
        .unwrap();
    assert_eq!(response.results.len(), 2);
    assert_eq!(response.diagnostics.missing_tiles, 0);
    let ids: HashSet<&str> = response
        .results
        .iter()
        .map(|result| result.source_polygon_id.as_str())
        .collect();
    assert_eq!(ids, HashSet::from(["a", "b"]));

    service.clear().await.unwrap();
    assert_eq!(service.load_from_database().await.unwrap().polygons, 0);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn rejects_invalid_configuration() {
    let outcome = OverlayService::new(Config {
        tile_zoom: 20,
        ..Config::default()
    });
    assert!(matches!(outcome, Err(ConfigError::InvalidZoom(20))));
}

#[tokio::test]
async fn oversized_viewports_are_rejected() {
    let service = OverlayService::new(Config {
        persist: false,
        max_viewport_tiles: 4,
        ..Config::default()
    })
    .unwrap();

    let world = BoundingBox::new(-80.0, -170.0, 80.0, 170.0);
    let outcome = service.resolve_overlay(&world, &OverlayFilter::default()).await;
    assert!(matches!(outcome, Err(OverlayError::InvalidViewport(_))));
}
