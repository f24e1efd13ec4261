//! Airspace overlay backend.
//!
//! Stores deduplicated airspace geometry, indexes it by tile, clips stacked
//! layers per viewport and serves the result over HTTP.

pub mod api;
pub mod cache;
pub mod coalesce;
pub mod config;
pub mod error;
pub mod filter;
pub mod ingest;
pub mod loops;
pub mod overlay_cache;
pub mod persistence;
pub mod query;
pub mod service;
pub mod source;
pub mod store;

pub use config::Config;
pub use error::{ConfigError, OverlayError};
pub use filter::OverlayFilter;
pub use ingest::{IngestionPipeline, IngestionReport, RawAirspaceRecord};
pub use service::{OverlayDiagnostics, OverlayResponse, OverlayService};
pub use source::AirspaceSource;
