use std::time::Duration;

use super::{MAX_IMAGE_SIZE_BYTES, SharedRemover, handlers};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::{
    cors::CorsLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::Level;

pub fn create_app(remover: SharedRemover, request_timeout: Duration) -> Router {
    // Configure the router with all endpoints
    Router::new()
        // Landing page with the upload form
        .route("/", get(handlers::home))
        // Background removal endpoint
        .route("/remove-bg", post(handlers::remove_background))
        // Apply a layer to limit the maximum size of request bodies
        .layer(DefaultBodyLimit::max(MAX_IMAGE_SIZE_BYTES))
        // Abort requests that outlive the deadline; inference time counts
        .layer(TimeoutLayer::new(request_timeout))
        // Add CORS layer: every origin is allowed on every route
        .layer(CorsLayer::permissive())
        // Add tracing for HTTP requests and responses
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::new().level(Level::INFO)))
        // Provide the shared state
        .with_state(remover)
}
