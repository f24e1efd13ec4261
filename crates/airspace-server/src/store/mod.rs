//! In-memory stores: deduplicated geometry and the tile-to-id index.

pub mod geometry_store;
pub mod tile_index;

pub use geometry_store::{GeometryStore, PutOutcome};
pub use tile_index::{TileEntry, TileIndex};
