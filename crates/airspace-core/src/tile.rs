//! Fixed Web-Mercator tile grid used to bound viewport lookups.
//!
//! Tiles follow the slippy-map convention: `x` grows eastward from the
//! antimeridian, `y` grows southward from the top of the Mercator square.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use crate::error::CoordError;
use crate::spatial::BoundingBox;

/// Web Mercator valid latitude range
pub const MIN_LAT: f64 = -85.051_128_78;
pub const MAX_LAT: f64 = 85.051_128_78;

pub const MAX_ZOOM: u8 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileKey {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl TileKey {
    pub fn new(zoom: u8, x: u32, y: u32) -> Self {
        Self { zoom, x, y }
    }

    /// Geographic extent of this tile.
    pub fn bounds(&self) -> BoundingBox {
        let n = 2.0_f64.powi(self.zoom as i32);
        let min_lon = self.x as f64 / n * 360.0 - 180.0;
        let max_lon = (self.x + 1) as f64 / n * 360.0 - 180.0;
        let max_lat = row_to_lat(self.y as f64, n);
        let min_lat = row_to_lat((self.y + 1) as f64, n);
        BoundingBox::new(min_lat, min_lon, max_lat, max_lon)
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

impl FromStr for TileKey {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut parts = value.split('/');
        let (Some(z), Some(x), Some(y), None) = (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(format!("expected z/x/y, got '{value}'"));
        };
        let parse = |part: &str| part.trim().parse::<u32>().map_err(|err| err.to_string());
        let zoom = u8::try_from(parse(z)?).map_err(|err| err.to_string())?;
        Ok(TileKey::new(zoom, parse(x)?, parse(y)?))
    }
}

fn row_to_lat(row: f64, n: f64) -> f64 {
    (PI * (1.0 - 2.0 * row / n)).sinh().atan().to_degrees()
}

/// Grid at a single zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    zoom: u8,
}

impl TileGrid {
    pub fn new(zoom: u8) -> Result<Self, CoordError> {
        if zoom > MAX_ZOOM {
            return Err(CoordError::InvalidZoom(zoom));
        }
        Ok(Self { zoom })
    }

    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    fn tiles_per_side(&self) -> u32 {
        1u32 << self.zoom
    }

    /// Tile containing the point.
    pub fn tile_for(&self, lat: f64, lon: f64) -> Result<TileKey, CoordError> {
        if !(MIN_LAT..=MAX_LAT).contains(&lat) {
            return Err(CoordError::InvalidLatitude(lat));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(CoordError::InvalidLongitude(lon));
        }
        Ok(self.tile_for_clamped(lat, lon))
    }

    fn tile_for_clamped(&self, lat: f64, lon: f64) -> TileKey {
        let lat = lat.clamp(MIN_LAT, MAX_LAT);
        let lon = lon.clamp(-180.0, 180.0);
        let side = self.tiles_per_side();
        let n = side as f64;

        let x = ((lon + 180.0) / 360.0 * n) as u32;
        let lat_rad = lat.to_radians();
        let y = ((1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n) as u32;

        TileKey::new(self.zoom, x.min(side - 1), y.min(side - 1))
    }

    /// Corner tiles of the clamped cover of `bounds`, or `None` when the
    /// box is inverted.
    fn tile_range(&self, bounds: &BoundingBox) -> Option<(TileKey, TileKey)> {
        let top_left = self.tile_for_clamped(bounds.max_lat, bounds.min_lon);
        let bottom_right = self.tile_for_clamped(bounds.min_lat, bounds.max_lon);
        if bottom_right.x < top_left.x || bottom_right.y < top_left.y {
            return None;
        }
        Some((top_left, bottom_right))
    }

    /// Every tile overlapping `bounds`. Latitudes beyond the Mercator limit
    /// are clamped, so polar viewports still map onto the edge rows.
    pub fn tiles_for_bounds(&self, bounds: &BoundingBox) -> Vec<TileKey> {
        let Some((top_left, bottom_right)) = self.tile_range(bounds) else {
            return Vec::new();
        };

        let mut tiles = Vec::with_capacity(
            ((bottom_right.x - top_left.x + 1) * (bottom_right.y - top_left.y + 1)) as usize,
        );
        for y in top_left.y..=bottom_right.y {
            for x in top_left.x..=bottom_right.x {
                tiles.push(TileKey::new(self.zoom, x, y));
            }
        }
        tiles
    }

    /// Whether `tile` is part of `tiles_for_bounds(bounds)`.
    pub fn covers(&self, bounds: &BoundingBox, tile: &TileKey) -> bool {
        if tile.zoom != self.zoom {
            return false;
        }
        self.tile_range(bounds).is_some_and(|(top_left, bottom_right)| {
            (top_left.x..=bottom_right.x).contains(&tile.x)
                && (top_left.y..=bottom_right.y).contains(&tile.y)
        })
    }

    /// Number of tiles `tiles_for_bounds` would return, without allocating.
    pub fn tile_count(&self, bounds: &BoundingBox) -> usize {
        self.tile_range(bounds)
            .map(|(top_left, bottom_right)| {
                ((bottom_right.x - top_left.x + 1) as usize)
                    * ((bottom_right.y - top_left.y + 1) as usize)
            })
            .unwrap_or(0)
    }

    /// Bounding box covering all given tiles.
    pub fn cover(tiles: &[TileKey]) -> Option<BoundingBox> {
        let (first, rest) = tiles.split_first()?;
        Some(
            rest.iter()
                .fold(first.bounds(), |acc, tile| acc.union(&tile.bounds())),
        )
    }
}
