//! Spatial helpers: bounding boxes, ring metrics and content hashing.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::models::Ring;

/// Axis-aligned lat/lon rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        }
    }

    /// Smallest box covering every vertex of the ring.
    pub fn from_ring(ring: &[[f64; 2]]) -> Option<Self> {
        let (first, rest) = ring.split_first()?;
        let mut bbox = Self::new(first[0], first[1], first[0], first[1]);
        for point in rest {
            bbox.min_lat = bbox.min_lat.min(point[0]);
            bbox.max_lat = bbox.max_lat.max(point[0]);
            bbox.min_lon = bbox.min_lon.min(point[1]);
            bbox.max_lon = bbox.max_lon.max(point[1]);
        }
        Some(bbox)
    }

    /// Four scalar comparisons; touching edges count as overlap.
    #[inline]
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lat <= other.max_lat
            && self.max_lat >= other.min_lat
            && self.min_lon <= other.max_lon
            && self.max_lon >= other.min_lon
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_lat: self.min_lat.min(other.min_lat),
            min_lon: self.min_lon.min(other.min_lon),
            max_lat: self.max_lat.max(other.max_lat),
            max_lon: self.max_lon.max(other.max_lon),
        }
    }

    /// Finite, ordered and within WGS84 limits.
    pub fn is_valid(&self) -> bool {
        let finite = self.min_lat.is_finite()
            && self.min_lon.is_finite()
            && self.max_lat.is_finite()
            && self.max_lon.is_finite();
        finite
            && self.min_lat <= self.max_lat
            && self.min_lon <= self.max_lon
            && self.min_lat >= -90.0
            && self.max_lat <= 90.0
            && self.min_lon >= -180.0
            && self.max_lon <= 180.0
    }
}

/// Number of distinct vertices, ignoring the closing duplicate.
pub fn distinct_vertex_count(ring: &[[f64; 2]]) -> usize {
    let mut seen: Vec<(u64, u64)> = ring
        .iter()
        .map(|point| (point[0].to_bits(), point[1].to_bits()))
        .collect();
    seen.sort_unstable();
    seen.dedup();
    seen.len()
}

/// Planar shoelace area in square degrees.
pub fn ring_area_deg2(ring: &[[f64; 2]]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        sum += (ring[j][1] + ring[i][1]) * (ring[j][0] - ring[i][0]);
        j = i;
    }
    (sum / 2.0).abs()
}

/// Digest of the ring coordinates.
///
/// Only geometry is hashed, so metadata-only edits keep the same hash.
pub fn content_hash(rings: &[Ring]) -> u64 {
    let mut hasher = DefaultHasher::new();
    rings.len().hash(&mut hasher);
    for ring in rings {
        ring.len().hash(&mut hasher);
        for point in ring {
            point[0].to_bits().hash(&mut hasher);
            point[1].to_bits().hash(&mut hasher);
        }
    }
    hasher.finish()
}

// ==== Metric helpers ====

/// Meters per degree of latitude at a given latitude (WGS84 approximation).
pub fn meters_per_deg_lat(lat_deg: f64) -> f64 {
    let lat_rad = lat_deg.to_radians();
    111_132.954 - 559.822 * (2.0 * lat_rad).cos() + 1.175 * (4.0 * lat_rad).cos()
        - 0.0023 * (6.0 * lat_rad).cos()
}

/// Meters per degree of longitude at a given latitude (WGS84 approximation).
pub fn meters_per_deg_lon(lat_deg: f64) -> f64 {
    let lat_rad = lat_deg.to_radians();
    111_412.84 * lat_rad.cos() - 93.5 * (3.0 * lat_rad).cos() + 0.118 * (5.0 * lat_rad).cos()
}

/// Convert a north/south offset in meters to degrees latitude.
pub fn meters_to_lat(meters: f64, ref_lat_deg: f64) -> f64 {
    meters / meters_per_deg_lat(ref_lat_deg).max(1e-9)
}

/// Convert an east/west offset in meters to degrees longitude.
pub fn meters_to_lon(meters: f64, ref_lat_deg: f64) -> f64 {
    meters / meters_per_deg_lon(ref_lat_deg).max(1e-9)
}

/// Closed rectangular ring of the given size in meters, south-west corner first.
pub fn rectangle_ring(lat: f64, lon: f64, north_m: f64, east_m: f64) -> Ring {
    let dlat = meters_to_lat(north_m, lat);
    let dlon = meters_to_lon(east_m, lat);
    vec![
        [lat, lon],
        [lat, lon + dlon],
        [lat + dlat, lon + dlon],
        [lat + dlat, lon],
        [lat, lon],
    ]
}
