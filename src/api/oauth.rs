//! HTTP front door for the OAuth flow.
//!
//! 1. GET /oauth/clickup/authorize → redirect to ClickUp
//! 2. User authorizes on ClickUp's site
//! 3. ClickUp redirects to /oauth/clickup/callback?code=..&state=..
//! 4. Code exchanged, credentials stored under the returned principal id

use crate::auth::extract_principal;
use crate::error::OAuthError;
use crate::oauth::OAuthManager;
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Redirect, Response},
    routing::{delete, get},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Application error types for OAuth endpoints
#[derive(Debug)]
pub(crate) enum AppError {
    BadRequest(String),
    Unauthorized(String),
    ServerError(String),
    BadGateway(String),
    TooManyRequests(String),
    /// Client error reported by ClickUp, passed through with its status
    Upstream(StatusCode, String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::TooManyRequests(msg) => (StatusCode::TOO_MANY_REQUESTS, msg),
            AppError::Upstream(status, msg) => (status, msg),
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}

impl From<OAuthError> for AppError {
    fn from(err: OAuthError) -> Self {
        match err {
            OAuthError::InvalidState => {
                AppError::Unauthorized("Invalid state parameter (possible CSRF attack)".to_string())
            }
            OAuthError::Exchange(_) => {
                AppError::BadGateway("Failed to complete OAuth flow".to_string())
            }
            OAuthError::Refresh(_) => {
                AppError::BadGateway("Failed to refresh authentication token".to_string())
            }
            OAuthError::NoCredential(_) => {
                AppError::Unauthorized("Authentication required".to_string())
            }
            other => AppError::ServerError(other.to_string()),
        }
    }
}

/// Shared application state for OAuth API
#[derive(Clone)]
pub struct OAuthAppState {
    pub manager: Arc<OAuthManager>,
}

/// OAuth callback query parameters
#[derive(Deserialize)]
pub struct OAuthCallback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// OAuth success response
#[derive(Serialize)]
pub struct OAuthSuccessResponse {
    success: bool,
    principal_id: String,
}

/// Authentication status response
#[derive(Serialize)]
pub struct StatusResponse {
    principal_id: String,
    authenticated: bool,
}

/// Revocation response
#[derive(Serialize)]
pub struct RevokeResponse {
    principal_id: String,
    revoked: bool,
}

/// Create OAuth API router
pub fn create_oauth_router(state: OAuthAppState) -> Router {
    Router::new()
        .route("/oauth/clickup/authorize", get(oauth_authorize))
        .route("/oauth/clickup/callback", get(oauth_callback))
        .route("/api/oauth/status", get(oauth_status))
        .route("/api/oauth/session", delete(oauth_revoke))
        .with_state(Arc::new(state))
}

/// GET /oauth/clickup/authorize
///
/// Redirects the user to ClickUp's authorization page with a fresh CSRF state.
async fn oauth_authorize(State(state): State<Arc<OAuthAppState>>) -> Redirect {
    let auth = state.manager.generate_auth_url();

    info!("Redirecting to ClickUp authorization");

    Redirect::temporary(&auth.url)
}

/// GET /oauth/clickup/callback
///
/// Exchanges the authorization code and stores encrypted credentials.
async fn oauth_callback(
    State(state): State<Arc<OAuthAppState>>,
    Query(callback): Query<OAuthCallback>,
) -> Result<Json<OAuthSuccessResponse>, AppError> {
    debug!("OAuth callback received");

    // Check for OAuth errors
    if let Some(error) = callback.error {
        let description = callback
            .error_description
            .unwrap_or_else(|| "Unknown error".to_string());
        warn!(error = %error, description = %description, "OAuth authorization failed");
        return Err(AppError::BadRequest(format!(
            "OAuth authorization failed: {} - {}",
            error, description
        )));
    }

    let (Some(code), Some(csrf_state)) = (callback.code, callback.state) else {
        return Err(AppError::BadRequest("Invalid callback parameters".to_string()));
    };

    let principal_id = state.manager.handle_callback(&code, &csrf_state).await?;

    Ok(Json(OAuthSuccessResponse {
        success: true,
        principal_id,
    }))
}

/// GET /api/oauth/status
///
/// Reports whether the `X-Team-Id` principal holds a valid credential.
async fn oauth_status(
    State(state): State<Arc<OAuthAppState>>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>, AppError> {
    let principal_id =
        extract_principal(&headers).map_err(|e| AppError::BadRequest(e.to_string()))?;

    let authenticated = state.manager.is_authenticated(&principal_id);

    Ok(Json(StatusResponse {
        principal_id,
        authenticated,
    }))
}

/// DELETE /api/oauth/session
///
/// Drops the stored credential for the `X-Team-Id` principal.
async fn oauth_revoke(
    State(state): State<Arc<OAuthAppState>>,
    headers: HeaderMap,
) -> Result<Json<RevokeResponse>, AppError> {
    let principal_id =
        extract_principal(&headers).map_err(|e| AppError::BadRequest(e.to_string()))?;

    let revoked = state.manager.revoke(&principal_id)?;

    Ok(Json(RevokeResponse {
        principal_id,
        revoked,
    }))
}
