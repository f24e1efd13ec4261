//! API routes for the airspace server.

pub mod request_id;
mod routes;

use crate::service::OverlayService;
use axum::Router;
use std::sync::Arc;

pub fn routes() -> Router<Arc<OverlayService>> {
    routes::create_router()
}
