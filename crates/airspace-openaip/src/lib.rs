//! OpenAIP airspace client
//!
//! Fetches raw airspace records for a bounding box from the OpenAIP core API.
//! Records are returned untyped; validation happens in the ingestion pipeline.

pub mod client;

pub use client::{FetchError, OpenAipClient};
