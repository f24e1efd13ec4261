//! Core data models for the airspace overlay.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::altitude::{AltitudeBand, AltitudeLimit};
use crate::error::ValidationError;
use crate::spatial::{content_hash, distinct_vertex_count, BoundingBox};

/// A closed ring of `[lat, lon]` pairs.
pub type Ring = Vec<[f64; 2]>;

/// ICAO airspace classification. Informational only; clipping ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IcaoClass {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    /// No ICAO class assigned (SUA, danger areas, TMZ...)
    #[serde(rename = "none")]
    Unclassified,
}

impl IcaoClass {
    /// Map the numeric class code used by the aviation-data API.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::A,
            1 => Self::B,
            2 => Self::C,
            3 => Self::D,
            4 => Self::E,
            5 => Self::F,
            6 => Self::G,
            _ => Self::Unclassified,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "A" => Some(Self::A),
            "B" => Some(Self::B),
            "C" => Some(Self::C),
            "D" => Some(Self::D),
            "E" => Some(Self::E),
            "F" => Some(Self::F),
            "G" => Some(Self::G),
            "NONE" | "UNCLASSIFIED" => Some(Self::Unclassified),
            _ => None,
        }
    }
}

impl fmt::Display for IcaoClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::E => "E",
            Self::F => "F",
            Self::G => "G",
            Self::Unclassified => "none",
        };
        f.write_str(label)
    }
}

/// An immutable airspace shape with its vertical limits.
///
/// Records are never mutated once stored: an update replaces the whole
/// record under the same id. Construct through [`AirspacePolygon::new`] so
/// the bounding box and content hash are derived consistently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirspacePolygon {
    pub id: String,
    pub name: String,
    pub category: String,
    pub icao_class: IcaoClass,
    pub lower: AltitudeLimit,
    pub upper: AltitudeLimit,
    /// First ring is the outer boundary, the rest are holes.
    pub rings: Vec<Ring>,
    pub bounding_box: BoundingBox,
    /// Digest of `rings`, used to detect geometry changes.
    pub content_hash: u64,
}

impl AirspacePolygon {
    /// Build a polygon, validating geometry and altitude limits.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: impl Into<String>,
        icao_class: IcaoClass,
        lower: AltitudeLimit,
        upper: AltitudeLimit,
        rings: Vec<Ring>,
    ) -> Result<Self, ValidationError> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(ValidationError::MissingId);
        }

        let Some(outer) = rings.first() else {
            return Err(ValidationError::MissingGeometry);
        };
        for ring in &rings {
            for point in ring {
                let [lat, lon] = *point;
                if !lat.is_finite() || !lon.is_finite() {
                    return Err(ValidationError::NonFiniteCoordinate);
                }
                if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
                    return Err(ValidationError::CoordinateOutOfRange { lat, lon });
                }
            }
        }
        let distinct = distinct_vertex_count(outer);
        if distinct < 3 {
            return Err(ValidationError::TooFewVertices(distinct));
        }

        let lower_ft = lower.to_feet();
        let upper_ft = upper.to_feet();
        if lower_ft > upper_ft {
            return Err(ValidationError::InvertedLimits { lower_ft, upper_ft });
        }

        let bounding_box =
            BoundingBox::from_ring(outer).ok_or(ValidationError::MissingGeometry)?;
        let content_hash = content_hash(&rings);

        Ok(Self {
            id,
            name: name.into(),
            category: category.into(),
            icao_class,
            lower,
            upper,
            rings,
            bounding_box,
            content_hash,
        })
    }

    /// Normalized floor in feet.
    pub fn lower_ft(&self) -> f64 {
        self.lower.to_feet()
    }

    /// Normalized ceiling in feet.
    pub fn upper_ft(&self) -> f64 {
        self.upper.to_feet()
    }

    pub fn band(&self) -> AltitudeBand {
        AltitudeBand {
            lower_ft: self.lower_ft(),
            upper_ft: self.upper_ft(),
        }
    }

    /// Outer ring only.
    pub fn outer_ring(&self) -> &Ring {
        &self.rings[0]
    }
}

impl AsRef<AirspacePolygon> for AirspacePolygon {
    fn as_ref(&self) -> &AirspacePolygon {
        self
    }
}

/// The visible remainder of one source polygon after occlusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClippedResult {
    pub source_polygon_id: String,
    pub name: String,
    pub category: String,
    pub icao_class: IcaoClass,
    /// Zero or more polygons, each a list of rings (outer first).
    /// Empty means the source is fully occluded.
    pub remaining_rings: Vec<Vec<Ring>>,
    /// Carried unchanged from the source; clipping only touches the footprint.
    pub altitude_band: AltitudeBand,
}

impl ClippedResult {
    pub fn is_occluded(&self) -> bool {
        self.remaining_rings.is_empty()
    }

    /// Unchanged result for a polygon nothing occludes.
    pub fn unclipped(polygon: &AirspacePolygon) -> Self {
        Self::with_rings(polygon, vec![polygon.rings.clone()])
    }

    pub fn with_rings(polygon: &AirspacePolygon, remaining_rings: Vec<Vec<Ring>>) -> Self {
        Self {
            source_polygon_id: polygon.id.clone(),
            name: polygon.name.clone(),
            category: polygon.category.clone(),
            icao_class: polygon.icao_class,
            remaining_rings,
            altitude_band: polygon.band(),
        }
    }
}
