//! REST API routes.

use airspace_core::BoundingBox;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::api::request_id::ensure_request_id;
use crate::error::OverlayError;
use crate::filter::OverlayFilter;
use crate::service::OverlayService;

/// Create the API router.
pub fn create_router() -> Router<Arc<OverlayService>> {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/v1/overlay", get(get_overlay))
        .route("/v1/refresh", post(refresh_region))
        .route("/v1/ingest", post(ingest_records))
        .route("/v1/invalidate", post(invalidate_all))
        .route("/v1/airspaces/:id", get(get_airspace))
        .route("/v1/stats", get(get_stats))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(ensure_request_id))
}

#[derive(Debug, Deserialize)]
struct OverlayQuery {
    min_lat: f64,
    min_lon: f64,
    max_lat: f64,
    max_lon: f64,
    max_floor_ft: Option<f64>,
    /// Comma-separated category labels.
    exclude_categories: Option<String>,
    /// Comma-separated ICAO class letters.
    exclude_classes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefreshRequest {
    min_lat: f64,
    min_lon: f64,
    max_lat: f64,
    max_lon: f64,
    /// Fetch only missing or stale tiles.
    #[serde(default)]
    only_stale: bool,
}

#[derive(Debug, Deserialize)]
struct IngestRequest {
    bounds: BoundingBox,
    records: Vec<Value>,
}

async fn get_overlay(
    State(service): State<Arc<OverlayService>>,
    Query(query): Query<OverlayQuery>,
) -> Response {
    let viewport = BoundingBox::new(query.min_lat, query.min_lon, query.max_lat, query.max_lon);
    let filter = match OverlayFilter::from_lists(
        query.max_floor_ft,
        query.exclude_categories.as_deref(),
        query.exclude_classes.as_deref(),
    ) {
        Ok(filter) => filter,
        Err(message) => {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
        }
    };

    match service.resolve_overlay(&viewport, &filter).await {
        Ok(response) => {
            if service.config().auto_refresh && response.diagnostics.refresh_tiles > 0 {
                let tiles = service.tiles_needing_refresh(&viewport);
                if service.spawn_refresh(tiles) {
                    tracing::debug!("Scheduled background refresh for viewport");
                }
            }
            Json(response).into_response()
        }
        Err(err) => err.into_response(),
    }
}

async fn refresh_region(
    State(service): State<Arc<OverlayService>>,
    Json(request): Json<RefreshRequest>,
) -> Response {
    let viewport = BoundingBox::new(request.min_lat, request.min_lon, request.max_lat, request.max_lon);
    let result = if request.only_stale {
        service.refresh_stale(&viewport).await
    } else {
        service.refresh_region(&viewport).await
    };
    match result {
        Ok(report) => Json(report).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn ingest_records(
    State(service): State<Arc<OverlayService>>,
    Json(request): Json<IngestRequest>,
) -> Response {
    match service.ingest_region(&request.bounds, request.records).await {
        Ok(report) => Json(report).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn invalidate_all(State(service): State<Arc<OverlayService>>) -> StatusCode {
    service.invalidate_all();
    StatusCode::NO_CONTENT
}

async fn get_airspace(
    State(service): State<Arc<OverlayService>>,
    Path(id): Path<String>,
) -> Response {
    match service.get_airspace(&id) {
        Some(polygon) => Json(polygon.as_ref().clone()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("airspace '{id}' not found") })),
        )
            .into_response(),
    }
}

async fn get_stats(State(service): State<Arc<OverlayService>>) -> impl IntoResponse {
    Json(service.stats())
}

impl IntoResponse for OverlayError {
    fn into_response(self) -> Response {
        let status = match &self {
            OverlayError::InvalidViewport(_) => StatusCode::BAD_REQUEST,
            OverlayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            OverlayError::Fetch(_) => StatusCode::BAD_GATEWAY,
            OverlayError::NoSource => StatusCode::SERVICE_UNAVAILABLE,
            OverlayError::Cancelled => StatusCode::REQUEST_TIMEOUT,
            OverlayError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let mut body = json!({ "error": self.to_string() });
        if let OverlayError::Timeout { partial } = &self {
            body["partial"] = serde_json::to_value(partial.as_ref()).unwrap_or(Value::Null);
        }
        (status, Json(body)).into_response()
    }
}
