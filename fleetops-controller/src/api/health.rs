//! Controller liveness
//!
//! Healthy means the object store answers. A point lookup of a name no
//! object can carry is enough: NotFound proves the store is reachable.

use axum::{Json, extract::State, http::StatusCode};
use fleetops_core::domain::{Kind, NamespacedName};
use serde_json::{Value, json};

use super::AppState;

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let version = env!("CARGO_PKG_VERSION");

    match state.store.get(Kind::Host, &NamespacedName::new("", "")).await {
        Err(e) if !e.is_not_found() => {
            tracing::warn!("Health check failed, object store unavailable: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "unavailable", "version": version, "error": e.to_string()})),
            )
        }
        _ => (
            StatusCode::OK,
            Json(json!({"status": "ok", "version": version})),
        ),
    }
}
