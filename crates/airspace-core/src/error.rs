//! Error types shared by the core crate.

use thiserror::Error;

/// Per-record validation failure. Recoverable: the record is skipped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("record has no id")]
    MissingId,
    #[error("record has no polygon geometry")]
    MissingGeometry,
    #[error("unsupported geometry type '{0}'")]
    UnsupportedGeometry(String),
    #[error("outer ring has {0} distinct vertices, need at least 3")]
    TooFewVertices(usize),
    #[error("geometry contains a non-finite coordinate")]
    NonFiniteCoordinate,
    #[error("coordinate out of range: lat {lat}, lon {lon}")]
    CoordinateOutOfRange { lat: f64, lon: f64 },
    #[error("missing {0} altitude limit")]
    MissingAltitude(&'static str),
    #[error("unknown altitude unit '{0}'")]
    UnknownUnit(String),
    #[error("unknown altitude datum '{0}'")]
    UnknownDatum(String),
    #[error("lower limit {lower_ft} ft is above upper limit {upper_ft} ft")]
    InvertedLimits { lower_ft: f64, upper_ft: f64 },
    #[error("malformed record: {0}")]
    Malformed(String),
}

/// Invalid input to tile grid math.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordError {
    #[error("invalid latitude {0}")]
    InvalidLatitude(f64),
    #[error("invalid longitude {0}")]
    InvalidLongitude(f64),
    #[error("invalid zoom level {0}")]
    InvalidZoom(u8),
}

/// A clipping run observed its cancellation flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("clipping cancelled")]
pub struct Cancelled;
