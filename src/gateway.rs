//! Downstream resource calls on behalf of a principal.
//!
//! Asks the [`OAuthManager`] for a live access token (refreshing if needed)
//! and sends it in the `Authorization` header. ClickUp expects the raw token
//! there, without a `Bearer` prefix.

use crate::error::OAuthError;
use crate::oauth::OAuthManager;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Resource call failures
#[derive(Error, Debug)]
pub enum GatewayError {
    /// No usable credential for the principal
    #[error(transparent)]
    Credential(#[from] OAuthError),

    /// Downstream rejected the token
    #[error("Downstream rejected the access token")]
    Unauthorized,

    /// Downstream rate limit hit
    #[error("Downstream rate limit exceeded")]
    RateLimited,

    /// Any other non-2xx response
    #[error("Downstream API error {status}: {body}")]
    Api { status: StatusCode, body: String },

    /// Network failure, timeout or unreadable body
    #[error("Downstream request failed: {0}")]
    Transport(String),
}

/// HTTP client for the downstream task API.
pub struct ResourceGateway {
    manager: Arc<OAuthManager>,
    http_client: Client,
    base_url: String,
}

impl ResourceGateway {
    pub fn new(
        manager: Arc<OAuthManager>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("clickup-broker/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            manager,
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Send `method path` for `principal_id` with an optional JSON body.
    ///
    /// Returns the parsed JSON response (`Value::Null` for an empty body).
    pub async fn request(
        &self,
        principal_id: &str,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, GatewayError> {
        let access_token = self.manager.get_access_token(principal_id).await?;

        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut request = self
            .http_client
            .request(method.clone(), &url)
            .header("Authorization", access_token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        if let Some(remaining) = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
        {
            debug!(principal_id = %principal_id, remaining, "Rate limit status");
        }

        match response.status() {
            StatusCode::UNAUTHORIZED => {
                warn!(principal_id = %principal_id, %method, path, "Downstream rejected token");
                Err(GatewayError::Unauthorized)
            }
            StatusCode::TOO_MANY_REQUESTS => {
                warn!(principal_id = %principal_id, "Rate limit exceeded");
                Err(GatewayError::RateLimited)
            }
            status if !status.is_success() => {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "<failed to read body>".to_string());
                Err(GatewayError::Api { status, body })
            }
            _ => {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| GatewayError::Transport(e.to_string()))?;
                if bytes.is_empty() {
                    return Ok(Value::Null);
                }
                serde_json::from_slice(&bytes).map_err(|e| GatewayError::Transport(e.to_string()))
            }
        }
    }
}
