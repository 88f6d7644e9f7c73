//! ClickUp OAuth client configuration.

use serde::Deserialize;
use std::fmt;

/// Path of the token endpoint, relative to the API base URL.
const TOKEN_PATH: &str = "/oauth/token";

/// OAuth client configuration, immutable once the manager is built.
#[derive(Clone, Deserialize)]
pub struct OAuthProviderConfig {
    /// OAuth client ID
    pub client_id: String,

    /// OAuth client secret
    pub client_secret: String,

    /// Where the provider sends the user back after authorization
    pub redirect_uri: String,

    /// Authorization endpoint base (e.g. `https://app.clickup.com/api`)
    pub auth_url: String,

    /// API base the token endpoint hangs off (e.g. `https://api.clickup.com/api/v2`)
    pub api_url: String,
}

impl OAuthProviderConfig {
    /// Build authorization URL for `state`
    pub fn build_auth_url(&self, state: &str) -> String {
        let separator = if self.auth_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}client_id={}&redirect_uri={}&response_type=code&state={}",
            self.auth_url,
            separator,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(state)
        )
    }

    /// Token endpoint used for both code exchange and refresh
    pub fn token_url(&self) -> String {
        format!("{}{}", self.api_url.trim_end_matches('/'), TOKEN_PATH)
    }
}

impl fmt::Debug for OAuthProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthProviderConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("auth_url", &self.auth_url)
            .field("api_url", &self.api_url)
            .finish()
    }
}
