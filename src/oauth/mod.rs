//! OAuth 2.0 credential lifecycle for ClickUp.
//!
//! Implements the authorization code flow:
//! 1. Caller asks for an authorization URL → a CSRF state is issued
//! 2. User authorizes on ClickUp's site
//! 3. ClickUp redirects back with `(code, state)`
//! 4. State is consumed, code exchanged for tokens, record stored encrypted
//!    under the principal id ClickUp returned
//! 5. Later calls ask for an access token; expired ones are refreshed first
//!
//! Per principal the manager moves between three states:
//!
//! ```text
//!  Unauthenticated ──callback──▶ Valid ──time──▶ Expired
//!                                  ▲                │
//!                                  └────refresh─────┘  (failure: stays Expired)
//! ```

mod clock;
mod exchange;
mod provider;
mod state_manager;

#[cfg(test)]
mod tests;

pub use clock::{Clock, FixedClock, SystemClock};
pub use exchange::{
    CodeExchangeResponse, HttpTokenEndpoint, RefreshResponse, TokenEndpoint, TokenUser,
};
pub use provider::OAuthProviderConfig;
pub use state_manager::{run_state_cleanup, StateRegistry};

use crate::credentials::{CredentialRecord, CredentialStore};
use crate::error::{OAuthError, Result};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Authorization redirect target plus the state embedded in it
#[derive(Clone, Debug, Serialize)]
pub struct AuthUrl {
    pub url: String,
    pub state: String,
}

/// Orchestrates authorization, callback exchange, expiry checks and refresh.
///
/// Owns the state registry and the credential store for its lifetime.
/// Network calls happen only in [`handle_callback`](Self::handle_callback)
/// and [`get_access_token`](Self::get_access_token); no store lock is held
/// across them.
pub struct OAuthManager {
    provider: OAuthProviderConfig,
    credentials: CredentialStore,
    states: StateRegistry,
    endpoint: Arc<dyn TokenEndpoint>,
    clock: Arc<dyn Clock>,
    /// Serializes refreshes per principal so racing callers share one refresh
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl OAuthManager {
    pub fn new(
        provider: OAuthProviderConfig,
        credentials: CredentialStore,
        states: StateRegistry,
        endpoint: Arc<dyn TokenEndpoint>,
    ) -> Self {
        Self {
            provider,
            credentials,
            states,
            endpoint,
            clock: Arc::new(SystemClock),
            refresh_locks: DashMap::new(),
        }
    }

    /// Replace the time source used for expiry arithmetic.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn provider(&self) -> &OAuthProviderConfig {
        &self.provider
    }

    pub fn state_registry(&self) -> &StateRegistry {
        &self.states
    }

    pub fn credential_store(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Issue a state and build the authorization redirect URL around it.
    pub fn generate_auth_url(&self) -> AuthUrl {
        let state = self.states.issue();
        let url = self.provider.build_auth_url(&state);

        debug!(pending_states = self.states.count(), "Issued OAuth state");

        AuthUrl { url, state }
    }

    /// Complete the flow: validate `state`, exchange `code`, store the tokens.
    ///
    /// Returns the principal id ClickUp reported for the grant. The state is
    /// consumed before anything else happens, so it cannot be replayed even if
    /// the exchange fails.
    pub async fn handle_callback(&self, code: &str, state: &str) -> Result<String> {
        if !self.states.consume(state) {
            warn!(operation = "handle_callback", "Invalid or reused OAuth state");
            return Err(OAuthError::InvalidState);
        }

        let grant = self.endpoint.exchange_code(code).await.map_err(|e| {
            error!(
                operation = "handle_callback",
                error = %format!("{:#}", e),
                "Authorization code exchange failed"
            );
            OAuthError::Exchange(e.to_string())
        })?;

        let principal_id = grant.user.id;
        if principal_id.is_empty() {
            error!(operation = "handle_callback", "Token endpoint returned an empty user id");
            return Err(OAuthError::Exchange("empty user id in token response".to_string()));
        }

        let record = CredentialRecord::issued(
            grant.access_token,
            grant.refresh_token,
            self.clock.now(),
            Some(principal_id.clone()),
        );

        self.credentials.put(&principal_id, &record).map_err(|e| {
            error!(
                principal_id = %principal_id,
                operation = "handle_callback",
                error = %e,
                "Failed to store credentials"
            );
            e
        })?;

        info!(
            principal_id = %principal_id,
            expires_at = %record.expires_at,
            "OAuth flow completed successfully"
        );

        Ok(principal_id)
    }

    /// Return a live access token for `principal_id`, refreshing it if expired.
    ///
    /// On refresh failure the stale record is left in place, so the next call
    /// retries the refresh.
    pub async fn get_access_token(&self, principal_id: &str) -> Result<String> {
        let record = self.load(principal_id, "get_access_token")?;
        if !record.is_expired_at(self.clock.now()) {
            return Ok(record.access_token);
        }

        let lock = self.refresh_lock(principal_id);
        let result = {
            let _guard = lock.lock().await;
            self.refresh_if_expired(principal_id).await
        };

        // Drop the entry once no other caller holds or waits on it
        drop(lock);
        self.refresh_locks
            .remove_if(principal_id, |_, held| Arc::strong_count(held) == 1);

        result
    }

    /// True only if a readable, unexpired record exists. Never refreshes.
    pub fn is_authenticated(&self, principal_id: &str) -> bool {
        match self.credentials.get(principal_id) {
            Ok(Some(record)) => !record.is_expired_at(self.clock.now()),
            Ok(None) => false,
            Err(e) if e.is_unreadable_credential() => {
                warn!(
                    principal_id = %principal_id,
                    operation = "is_authenticated",
                    error = %e,
                    "Stored credential unreadable"
                );
                false
            }
            Err(e) => {
                error!(
                    principal_id = %principal_id,
                    operation = "is_authenticated",
                    error = %e,
                    "Failed to read credentials"
                );
                false
            }
        }
    }

    /// Forget the stored credential for `principal_id`.
    pub fn revoke(&self, principal_id: &str) -> Result<bool> {
        let removed = self.credentials.delete(principal_id)?;
        self.refresh_locks.remove(principal_id);

        info!(principal_id = %principal_id, removed, "Credentials revoked");
        Ok(removed)
    }

    fn load(&self, principal_id: &str, operation: &'static str) -> Result<CredentialRecord> {
        match self.credentials.get(principal_id) {
            Ok(Some(record)) => Ok(record),
            Ok(None) => {
                debug!(principal_id = %principal_id, operation, "No credentials stored");
                Err(OAuthError::NoCredential(principal_id.to_string()))
            }
            Err(e) => {
                error!(
                    principal_id = %principal_id,
                    operation,
                    error = %e,
                    "Failed to load credentials"
                );
                Err(e)
            }
        }
    }

    fn refresh_lock(&self, principal_id: &str) -> Arc<Mutex<()>> {
        self.refresh_locks
            .entry(principal_id.to_string())
            .or_default()
            .clone()
    }

    /// Caller holds the principal's refresh lock.
    async fn refresh_if_expired(&self, principal_id: &str) -> Result<String> {
        // Another caller may have refreshed while we waited
        let record = self.load(principal_id, "get_access_token")?;
        if !record.is_expired_at(self.clock.now()) {
            debug!(principal_id = %principal_id, "Token refreshed by concurrent caller");
            return Ok(record.access_token);
        }

        self.refresh(principal_id, record).await
    }

    async fn refresh(&self, principal_id: &str, stale: CredentialRecord) -> Result<String> {
        if stale.refresh_token.is_empty() {
            warn!(
                principal_id = %principal_id,
                operation = "refresh",
                "Stored credential has no refresh token"
            );
            return Err(OAuthError::Refresh("No refresh token available".to_string()));
        }

        info!(principal_id = %principal_id, "Refreshing OAuth token");

        let response = self.endpoint.refresh(&stale.refresh_token).await.map_err(|e| {
            error!(
                principal_id = %principal_id,
                operation = "refresh",
                error = %format!("{:#}", e),
                "Token refresh failed"
            );
            OAuthError::Refresh(e.to_string())
        })?;

        // Keep the existing refresh token if the provider did not rotate it
        let refresh_token = response.refresh_token.unwrap_or(stale.refresh_token);

        let refreshed = CredentialRecord::issued(
            response.access_token,
            refresh_token,
            self.clock.now(),
            stale.principal_id,
        );

        self.credentials.put(principal_id, &refreshed).map_err(|e| {
            error!(
                principal_id = %principal_id,
                operation = "refresh",
                error = %e,
                "Failed to persist refreshed credentials"
            );
            e
        })?;

        info!(
            principal_id = %principal_id,
            expires_at = %refreshed.expires_at,
            "OAuth token refreshed successfully"
        );

        Ok(refreshed.access_token)
    }
}
