use airspace_core::BoundingBox;
use airspace_server::{Config, OverlayFilter, OverlayService};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::time::Instant;

const POLYGONS: usize = 1_800;

struct StressViewport {
    name: &'static str,
    bounds: BoundingBox,
}

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => Config {
            persist: false,
            ..config
        },
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            return;
        }
    };
    let service = match OverlayService::new(config) {
        Ok(service) => service,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            return;
        }
    };

    let region = BoundingBox::new(44.0, 5.0, 48.0, 11.0);
    let records = synthetic_records(&region, POLYGONS, 7);
    let covered = service.grid().tiles_for_bounds(&region);

    let started = Instant::now();
    let report = service.ingest(records, &covered).await;
    println!(
        "Ingested {} polygons ({} rejected) into {} tiles in {:.1?}",
        report.inserted,
        report.rejected,
        report.tiles_written,
        started.elapsed()
    );

    let viewports = vec![
        StressViewport {
            name: "Geneva basin",
            bounds: BoundingBox::new(46.0, 5.8, 46.5, 6.6),
        },
        StressViewport {
            name: "Western Alps",
            bounds: BoundingBox::new(45.0, 5.5, 47.0, 8.5),
        },
        StressViewport {
            name: "Whole region",
            bounds: region,
        },
    ];

    let filter = OverlayFilter::default();
    for viewport in viewports {
        println!("\n=== {} ===", viewport.name);

        let started = Instant::now();
        let response = match service.resolve_overlay(&viewport.bounds, &filter).await {
            Ok(response) => response,
            Err(err) => {
                println!("Result: FAIL ({err})");
                continue;
            }
        };
        let cold = started.elapsed();

        let started = Instant::now();
        let cached = service.resolve_overlay(&viewport.bounds, &filter).await;
        let warm = started.elapsed();

        let stats = &response.diagnostics.clip;
        println!(
            "Result: OK | polygons={} results={} dropped={} occluded={}",
            stats.input,
            response.results.len(),
            response.diagnostics.dropped_ids.len(),
            stats.fully_occluded
        );
        println!(
            "Pairs: total={} altitude_rejected={} bbox_rejected={} occluders={} ({:.2}%) degraded={}",
            stats.pairs_total,
            stats.altitude_rejections,
            stats.bbox_rejections,
            stats.occluder_pairs,
            stats.occluder_ratio() * 100.0,
            stats.degraded_pairs
        );
        println!(
            "Timing: cold={:.1?} warm={:.1?} cache_hit={}",
            cold,
            warm,
            cached.map(|response| response.diagnostics.cache_hit).unwrap_or(false)
        );
    }

    let stats = service.overlay_cache().stats();
    println!(
        "\nOverlay cache: entries={} hits={} misses={} computations={} coalesced={:.1}%",
        stats.entries,
        stats.hits,
        stats.misses,
        stats.computations,
        stats.coalescer.coalescing_ratio() * 100.0
    );
}

/// Random rectangles with random floors, roughly the density of a busy
/// European region.
fn synthetic_records(region: &BoundingBox, count: usize, seed: u64) -> Vec<Value> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|index| {
            let size_lat = rng.random_range(0.02..0.6);
            let size_lon = rng.random_range(0.02..0.8);
            let lat = rng.random_range(region.min_lat..region.max_lat - size_lat);
            let lon = rng.random_range(region.min_lon..region.max_lon - size_lon);
            let floor_ft = (rng.random_range(0..12) * 500) as f64;
            let ceiling_fl = rng.random_range(60..200);
            json!({
                "_id": format!("synthetic-{index:04}"),
                "name": format!("Sector {index}"),
                "type": rng.random_range(1..30),
                "icaoClass": rng.random_range(0..8),
                "lowerLimit": { "value": floor_ft, "unit": 1, "referenceDatum": 1 },
                "upperLimit": { "value": ceiling_fl, "unit": 6, "referenceDatum": 2 },
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
        })
        .collect()
}
