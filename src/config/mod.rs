use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::oauth::OAuthProviderConfig;

/// Complete broker configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub clickup: ClickUpConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

/// ClickUp OAuth application settings
#[derive(Clone, Deserialize)]
pub struct ClickUpConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// Empty means `http://localhost:{port}/oauth/clickup/callback`
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
}

fn default_api_url() -> String {
    "https://api.clickup.com/api/v2".to_string()
}

fn default_auth_url() -> String {
    "https://app.clickup.com/api".to_string()
}

impl Default for ClickUpConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: String::new(),
            api_url: default_api_url(),
            auth_url: default_auth_url(),
        }
    }
}

impl std::fmt::Debug for ClickUpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClickUpConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("api_url", &self.api_url)
            .field("auth_url", &self.auth_url)
            .finish()
    }
}

/// Encryption key and CSRF state policy
#[derive(Clone, Deserialize)]
pub struct SecurityConfig {
    /// Base64-encoded 32-byte key. Generated at startup when absent.
    #[serde(default)]
    pub encryption_key: Option<String>,
    /// Pending OAuth states expire after this many seconds. None = never.
    #[serde(default)]
    pub state_ttl_seconds: Option<u64>,
    #[serde(default = "default_state_cleanup_interval")]
    pub state_cleanup_interval_seconds: u64,
}

/// Upper bound for `state_ttl_seconds` (30 days)
pub const MAX_STATE_TTL_SECONDS: u64 = 30 * 24 * 60 * 60;

fn default_state_cleanup_interval() -> u64 {
    60
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            encryption_key: None,
            state_ttl_seconds: None,
            state_cleanup_interval_seconds: default_state_cleanup_interval(),
        }
    }
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "<redacted>"))
            .field("state_ttl_seconds", &self.state_ttl_seconds)
            .field(
                "state_cleanup_interval_seconds",
                &self.state_cleanup_interval_seconds,
            )
            .finish()
    }
}

/// Credential persistence
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StorageConfig {
    /// SQLite file for credentials. In-memory only when unset.
    #[serde(default)]
    pub database_path: Option<String>,
}

/// Outbound HTTP settings
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    30
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl AppConfig {
    /// Load an optional TOML file, then apply environment overrides and validate.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(path) => load_config(path)?,
            None => AppConfig::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from environment variables.
    ///
    /// `lookup` is `std::env::var` in production; tests pass a map.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("Invalid PORT value: {}", port))?;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.server.log_level = level;
        }
        if let Some(id) = lookup("CLICKUP_CLIENT_ID") {
            self.clickup.client_id = id;
        }
        if let Some(secret) = lookup("CLICKUP_CLIENT_SECRET") {
            self.clickup.client_secret = secret;
        }
        if let Some(uri) = lookup("CLICKUP_REDIRECT_URI") {
            self.clickup.redirect_uri = uri;
        }
        if let Some(key) = lookup("ENCRYPTION_KEY") {
            self.security.encryption_key = Some(key);
        }
        if let Some(ttl) = lookup("STATE_TTL_SECONDS") {
            self.security.state_ttl_seconds = Some(
                ttl.parse()
                    .with_context(|| format!("Invalid STATE_TTL_SECONDS value: {}", ttl))?,
            );
        }
        if let Some(path) = lookup("DATABASE_PATH") {
            self.storage.database_path = Some(path);
        }

        if self.clickup.redirect_uri.is_empty() {
            self.clickup.redirect_uri = format!(
                "http://localhost:{}/oauth/clickup/callback",
                self.server.port
            );
        }

        Ok(())
    }

    /// Fail on missing client credentials, listing every missing variable.
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("CLICKUP_CLIENT_ID", &self.clickup.client_id),
            ("CLICKUP_CLIENT_SECRET", &self.clickup.client_secret),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| name)
        .collect();

        if !missing.is_empty() {
            bail!(
                "Missing required environment variables: {}",
                missing.join(", ")
            );
        }

        if self.security.state_cleanup_interval_seconds == 0 {
            bail!("state_cleanup_interval_seconds must be at least 1");
        }

        if let Some(ttl) = self.security.state_ttl_seconds {
            if ttl > MAX_STATE_TTL_SECONDS {
                bail!(
                    "STATE_TTL_SECONDS must not exceed {} (got {})",
                    MAX_STATE_TTL_SECONDS,
                    ttl
                );
            }
        }

        Ok(())
    }

    pub fn provider(&self) -> OAuthProviderConfig {
        OAuthProviderConfig {
            client_id: self.clickup.client_id.clone(),
            client_secret: self.clickup.client_secret.clone(),
            redirect_uri: self.clickup.redirect_uri.clone(),
            auth_url: self.clickup.auth_url.clone(),
            api_url: self.clickup.api_url.clone(),
        }
    }

    /// Pending-state TTL. Values above [`MAX_STATE_TTL_SECONDS`] are clamped;
    /// `validate()` rejects them before this is reached.
    pub fn state_ttl(&self) -> Option<chrono::Duration> {
        self.security
            .state_ttl_seconds
            .map(|secs| chrono::Duration::seconds(secs.min(MAX_STATE_TTL_SECONDS) as i64))
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: AppConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path))?;
    Ok(config)
}
