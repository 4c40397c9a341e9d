use crate::api::handlers::{health, telemetry};
use crate::monitor::Monitor;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// Read-only routes over the shared monitor. Handlers only clone state out
/// of the lock before serializing.
pub fn create_router(monitor: Arc<Monitor>) -> Router {
    let api = Router::new()
        .route("/snapshot", get(telemetry::get_snapshot))
        .route("/events", get(telemetry::get_events))
        .route("/peaks", get(telemetry::get_peaks))
        .route("/peaks/{circuit}", get(telemetry::get_peak))
        .route("/status", get(telemetry::get_status));

    Router::new()
        .route("/health", get(health::health))
        .nest("/api/v1", api)
        .with_state(monitor)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
}
