//! Authenticated passthrough to the ClickUp API.
//!
//! Every request under `/api/clickup/` must carry `X-Team-Id` for a principal
//! holding a valid credential. The remainder of the path (and query string)
//! is forwarded through [`ResourceGateway`] with that principal's token.

use super::oauth::AppError;
use crate::auth::extract_principal;
use crate::gateway::{GatewayError, ResourceGateway};
use crate::oauth::OAuthManager;
use axum::{
    body::Bytes,
    extract::{Extension, Request, State},
    http::{Method, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::any,
    Router,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

const PROXY_PREFIX: &str = "/api/clickup";

/// Shared state for the protected ClickUp routes
#[derive(Clone)]
pub struct ClickUpAppState {
    pub manager: Arc<OAuthManager>,
    pub gateway: Arc<ResourceGateway>,
}

/// Principal a request was authenticated for, set by [`require_auth`]
#[derive(Debug, Clone)]
pub struct Principal(pub String);

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Credential(e) => AppError::from(e),
            GatewayError::Unauthorized => {
                AppError::Unauthorized("ClickUp rejected the access token".to_string())
            }
            GatewayError::RateLimited => {
                AppError::TooManyRequests("ClickUp rate limit exceeded".to_string())
            }
            GatewayError::Api { status, body } => {
                match StatusCode::from_u16(status.as_u16()) {
                    Ok(code) if code.is_client_error() => AppError::Upstream(code, body),
                    _ => AppError::BadGateway(format!("ClickUp API error {}", status)),
                }
            }
            GatewayError::Transport(msg) => AppError::BadGateway(msg),
        }
    }
}

/// Rejects requests without a principal header (400) or without a valid
/// credential for it (401).
async fn require_auth(
    State(state): State<Arc<ClickUpAppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let principal_id = match extract_principal(req.headers()) {
        Ok(id) => id,
        Err(e) => return AppError::BadRequest(e.to_string()).into_response(),
    };

    if !state.manager.is_authenticated(&principal_id) {
        debug!(principal_id = %principal_id, "Rejected unauthenticated request");
        return AppError::Unauthorized("Authentication required".to_string()).into_response();
    }

    req.extensions_mut().insert(Principal(principal_id));
    next.run(req).await
}

/// ANY /api/clickup/*path
async fn clickup_proxy(
    State(state): State<Arc<ClickUpAppState>>,
    Extension(Principal(principal_id)): Extension<Principal>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_default();
    let path = path.strip_prefix(PROXY_PREFIX).unwrap_or(path);

    let method = reqwest::Method::from_bytes(method.as_str().as_bytes())
        .map_err(|_| AppError::BadRequest(format!("Unsupported method {}", method)))?;

    let payload = if body.is_empty() {
        None
    } else {
        Some(
            serde_json::from_slice::<Value>(&body)
                .map_err(|e| AppError::BadRequest(format!("Invalid JSON body: {}", e)))?,
        )
    };

    let response = state
        .gateway
        .request(&principal_id, method, path, payload.as_ref())
        .await
        .map_err(|e| {
            warn!(principal_id = %principal_id, path, error = %e, "ClickUp request failed");
            AppError::from(e)
        })?;

    Ok(Json(response))
}

/// Create the protected ClickUp router with the auth guard applied
pub fn create_clickup_router(state: ClickUpAppState) -> Router {
    let state = Arc::new(state);
    Router::new()
        .route("/api/clickup/*path", any(clickup_proxy))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
}
