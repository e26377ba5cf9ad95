//! API Module
//!
//! HTTP surface of the controller: object CRUD for every kind plus run
//! creation (optionally waiting for the run to finish).

pub mod error;
pub mod health;
pub mod objects;
pub mod runs;

use axum::{
    Router,
    routing::{get, put},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::service::RunService;
use crate::store::ObjectStore;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ObjectStore>,
    pub runs: RunService,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Collections: list any kind, create runs
        .route(
            "/api/v1/namespaces/{namespace}/{kind}",
            get(objects::list_objects).post(runs::create_run),
        )
        // Single objects
        .route(
            "/api/v1/namespaces/{namespace}/{kind}/{name}",
            put(objects::apply_object)
                .get(objects::get_object)
                .delete(objects::delete_object),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
