//! OAuth token endpoint client.
//!
//! Handles exchanging authorization codes for tokens and refreshing expired
//! access tokens. Both grants POST JSON to the same `{api_url}/oauth/token`.

use super::provider::OAuthProviderConfig;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Token endpoint request body (both grants)
#[derive(Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<&'a str>,
    grant_type: &'a str,
}

/// User the authorization was granted by
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TokenUser {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
}

/// Successful `authorization_code` grant
#[derive(Deserialize, Clone)]
pub struct CodeExchangeResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user: TokenUser,
}

/// Successful `refresh_token` grant
///
/// `refresh_token` is optional: when the provider does not rotate it the
/// previous one stays in use.
#[derive(Deserialize, Clone)]
pub struct RefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for CodeExchangeResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeExchangeResponse")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("user", &self.user)
            .finish()
    }
}

impl std::fmt::Debug for RefreshResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshResponse")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Accepts numeric or string ids
fn id_as_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!(
            "expected string or number user id, got {}",
            other
        ))),
    }
}

/// The provider's token endpoint.
///
/// Errors are opaque here; the manager translates them into
/// `OAuthError::Exchange` / `OAuthError::Refresh`.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// `grant_type=authorization_code`
    async fn exchange_code(&self, code: &str) -> Result<CodeExchangeResponse>;

    /// `grant_type=refresh_token`
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse>;
}

/// [`TokenEndpoint`] over HTTP.
pub struct HttpTokenEndpoint {
    http_client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl HttpTokenEndpoint {
    /// `timeout` bounds each request; hitting it is reported like any other failure.
    pub fn new(provider: &OAuthProviderConfig, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("clickup-broker/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            token_url: provider.token_url(),
            client_id: provider.client_id.clone(),
            client_secret: provider.client_secret.clone(),
        })
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    async fn post<T: for<'de> Deserialize<'de>>(&self, body: &TokenRequest<'_>) -> Result<T> {
        tracing::debug!(
            grant_type = body.grant_type,
            token_url = %self.token_url,
            "Calling token endpoint"
        );

        let response = self
            .http_client
            .post(&self.token_url)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await
            .context("Failed to send token request")?;

        // Check response status
        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(anyhow!(
                "Token endpoint returned status {}: {}",
                status,
                body
            ));
        }

        response
            .json::<T>()
            .await
            .context("Failed to parse token response")
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn exchange_code(&self, code: &str) -> Result<CodeExchangeResponse> {
        self.post(&TokenRequest {
            client_id: &self.client_id,
            client_secret: &self.client_secret,
            code: Some(code),
            refresh_token: None,
            grant_type: "authorization_code",
        })
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse> {
        self.post(&TokenRequest {
            client_id: &self.client_id,
            client_secret: &self.client_secret,
            code: None,
            refresh_token: Some(refresh_token),
            grant_type: "refresh_token",
        })
        .await
    }
}
