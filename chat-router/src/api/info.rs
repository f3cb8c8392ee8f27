//! Info endpoints.
//!
//! - `/version` – returns the cargo package name and version.
//! - `/stats` – returns a snapshot of the session manager's in-memory
//!   footprint.
//!
//! The endpoints include a `Cache-Control: no-cache` header to prevent
//! caching of responses.

use axum::{
    Json, Router,
    http::{HeaderValue, StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use serde::Serialize;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::services::session_manager::SessionManager;

/// Creates a router containing the info endpoints.
pub(crate) fn routes(session_manager: SessionManager) -> Router {
    Router::new()
        .route("/version", get(version))
        .route("/stats", get(move || stats(session_manager)))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache"),
        ))
}

/// Responds with the cargo package name and version of the running binary.
async fn version() -> impl IntoResponse {
    (
        StatusCode::OK,
        concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION")),
    )
}

#[derive(Serialize)]
struct StatsResponse {
    total: usize,
    active: usize,
    inactive: usize,
}

/// Responds with the session manager's in-memory footprint.
async fn stats(session_manager: SessionManager) -> impl IntoResponse {
    let stats = session_manager.get_memory_stats();
    Json(StatsResponse {
        total: stats.total,
        active: stats.active,
        inactive: stats.inactive,
    })
}
