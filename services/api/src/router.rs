//! Axum Router Configuration
//!
//! This module defines the HTTP routing for the application: the WebSocket
//! game endpoint and a health check.

use crate::{state::AppState, ws::ws_handler};
use axum::{Json, Router, routing::get};
use serde_json::{Value, json};
use std::sync::Arc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .with_state(app_state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
