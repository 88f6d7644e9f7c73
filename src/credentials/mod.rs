//! Encrypted credential storage for ClickUp OAuth tokens.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialStore                    │
//! │  - typed CredentialRecord per principal  │
//! │  - serde_json (de)serialization          │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!    (encrypt)            (decrypt)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       Cipher                             │
//! │  - AES-256-GCM, nonce per payload        │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       SecretStore backend                │
//! │  - MemoryStore (DashMap)                 │
//! │  - SqliteStore (persistent)              │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use clickup_broker::credentials::{Cipher, CredentialRecord, CredentialStore, MemoryStore};
//! use chrono::Utc;
//! use std::sync::Arc;
//!
//! # fn main() -> clickup_broker::error::Result<()> {
//! let store = CredentialStore::new(Arc::new(MemoryStore::new()), Cipher::new([0u8; 32]));
//!
//! let record = CredentialRecord::issued("access", "refresh", Utc::now(), Some("team-1".into()));
//! store.put("team-1", &record)?;
//!
//! let loaded = store.get("team-1")?.expect("stored above");
//! assert_eq!(loaded.access_token, "access");
//! # Ok(())
//! # }
//! ```

use crate::error::{OAuthError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

mod encryption;
mod storage;

pub use encryption::{generate_key, validate_key, Cipher, KEY_SIZE};
pub use storage::{MemoryStore, SecretStore, SqliteStore};

/// How long a freshly issued or refreshed credential is considered valid.
pub fn credential_validity() -> Duration {
    Duration::days(7)
}

/// Access/refresh token pair plus expiry for one principal.
///
/// `Debug` is implemented by hand so tokens never end up in logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// OAuth access token (sent on downstream requests)
    pub access_token: String,

    /// OAuth refresh token (used to obtain new access tokens)
    pub refresh_token: String,

    /// When the access token stops being used (UTC)
    pub expires_at: DateTime<Utc>,

    /// Principal the record was issued for
    #[serde(default, alias = "team_id")]
    pub principal_id: Option<String>,
}

impl CredentialRecord {
    /// Builds a record issued at `now`, valid for [`credential_validity`].
    pub fn issued(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        now: DateTime<Utc>,
        principal_id: Option<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at: now + credential_validity(),
            principal_id,
        }
    }

    /// True once `now` has reached `expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("principal_id", &self.principal_id)
            .finish()
    }
}

/// Principal id → encrypted [`CredentialRecord`].
///
/// Records are serialized to JSON, encrypted, then handed to the backend.
/// Reads reverse that; a payload that fails either step is reported as
/// [`OAuthError::Decryption`] or [`OAuthError::Deserialization`].
#[derive(Clone)]
pub struct CredentialStore {
    backend: Arc<dyn SecretStore>,
    cipher: Cipher,
}

impl CredentialStore {
    pub fn new(backend: Arc<dyn SecretStore>, cipher: Cipher) -> Self {
        Self { backend, cipher }
    }

    /// Stores `record` for `principal_id`, replacing any previous record.
    pub fn put(&self, principal_id: &str, record: &CredentialRecord) -> Result<()> {
        let serialized = serde_json::to_string(record)
            .map_err(|e| OAuthError::Storage(format!("Failed to serialize credentials: {}", e)))?;
        let encrypted = self.cipher.encrypt(&serialized)?;
        self.backend.put(principal_id, encrypted)
    }

    /// Loads the record for `principal_id`; `Ok(None)` if none is stored.
    pub fn get(&self, principal_id: &str) -> Result<Option<CredentialRecord>> {
        let Some(encrypted) = self.backend.get(principal_id)? else {
            return Ok(None);
        };

        let serialized = self.cipher.decrypt(&encrypted)?;
        serde_json::from_str(&serialized)
            .map(Some)
            .map_err(|e| OAuthError::Deserialization(e.to_string()))
    }

    /// Removes the record for `principal_id`. Returns whether one existed.
    pub fn delete(&self, principal_id: &str) -> Result<bool> {
        self.backend.delete(principal_id)
    }

    /// Number of principals with a stored record.
    pub fn len(&self) -> Result<usize> {
        self.backend.len()
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.backend.is_empty()
    }

    /// Direct access to the backend (raw ciphertext), for diagnostics and tests.
    pub fn backend(&self) -> &Arc<dyn SecretStore> {
        &self.backend
    }
}
