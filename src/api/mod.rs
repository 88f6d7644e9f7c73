// HTTP API: OAuth flow endpoints, authenticated ClickUp passthrough and health check

pub mod clickup;
pub mod oauth;

pub use clickup::{create_clickup_router, ClickUpAppState, Principal};
pub use oauth::{create_oauth_router, OAuthAppState};

use axum::{response::Json, routing::get, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Create health check router
pub fn create_health_router() -> Router {
    Router::new().route("/api/health", get(health))
}

/// Full application router with CORS and request tracing
pub fn create_router(oauth_state: OAuthAppState, clickup_state: ClickUpAppState) -> Router {
    Router::new()
        .merge(create_oauth_router(oauth_state))
        .merge(create_clickup_router(clickup_state))
        .merge(create_health_router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// GET /api/health
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
