pub mod altitude;
pub mod clipping;
pub mod error;
pub mod models;
pub mod spatial;
pub mod tile;

pub use altitude::{AltitudeBand, AltitudeDatum, AltitudeLimit, AltitudeUnit};
pub use clipping::{
    clip_overlay, clip_overlay_cancellable, ClipOptions, ClipOutput, ClipStats,
};
pub use error::{Cancelled, CoordError, ValidationError};
pub use models::{AirspacePolygon, ClippedResult, IcaoClass, Ring};
pub use spatial::{content_hash, BoundingBox};
pub use tile::{TileGrid, TileKey};
