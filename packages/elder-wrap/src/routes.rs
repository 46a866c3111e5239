//! HTTP surface.

use crate::handlers;
use crate::middleware::{inject_request_id, log_requests};
use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/{rollapp}", post(handlers::relay))
        .layer(
            ServiceBuilder::new()
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(axum::middleware::from_fn(inject_request_id))
                .layer(axum::middleware::from_fn(log_requests)),
        )
        .with_state(state)
}
