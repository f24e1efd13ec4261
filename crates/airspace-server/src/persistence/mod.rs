//! Persistence layer for the airspace server.
//!
//! SQLite mirror of the geometry store and tile index. The in-memory stores
//! serve every read; writes go through to the database.

pub mod airspaces;
pub mod db;
pub mod tiles;

pub use db::{clear_all, init_database, Database};
