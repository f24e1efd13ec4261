//! Server error types.

use airspace_core::Cancelled;
use airspace_openaip::FetchError;
use thiserror::Error;

use crate::ingest::IngestionReport;

/// Fatal startup configuration problem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("tile zoom {0} is outside 0..=14")]
    InvalidZoom(u8),
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("{0} must be greater than zero")]
    ZeroCapacity(&'static str),
    #[error("viewport precision {0} exceeds 9 decimals")]
    InvalidPrecision(u32),
    #[error("{key}={value:?} is not a valid value")]
    InvalidValue { key: &'static str, value: String },
}

/// Failure surfaced by the overlay service.
///
/// Per-record and per-pair problems never show up here; they are counted in
/// reports and diagnostics instead.
#[derive(Debug, Error)]
pub enum OverlayError {
    /// The fetch deadline passed. Tiles ingested before it stay valid.
    #[error("airspace fetch timed out after {} tiles", partial.tiles_written)]
    Timeout { partial: Box<IngestionReport> },
    #[error("airspace fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("no airspace source configured")]
    NoSource,
    #[error("overlay request cancelled")]
    Cancelled,
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("invalid viewport: {0}")]
    InvalidViewport(String),
}

impl From<Cancelled> for OverlayError {
    fn from(_: Cancelled) -> Self {
        OverlayError::Cancelled
    }
}
