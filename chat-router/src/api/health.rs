//! Health endpoint.
//!
//! - `/health` – returns `200 OK` once the router has finished starting up.
//!
//! The endpoint includes a `Cache-Control: no-cache` header to prevent
//! caching of responses.

use axum::{
    Router,
    http::{HeaderValue, StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use tower_http::set_header::SetResponseHeaderLayer;

/// Creates a router containing the health endpoint.
pub(crate) fn routes() -> Router {
    Router::new().route("/health", get(health)).layer(SetResponseHeaderLayer::overriding(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache"),
    ))
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}
