//! Error types for the credential lifecycle.
//!
//! Every fallible operation of the cipher, the credential store and the
//! OAuth manager returns one of these variants. Transport errors from the
//! token endpoint are translated into `Exchange` / `Refresh` and never leak
//! out as raw `reqwest` errors.

use thiserror::Error;

/// Result type alias for credential operations
pub type Result<T> = std::result::Result<T, OAuthError>;

/// Credential lifecycle errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OAuthError {
    /// State parameter was never issued or was already consumed
    #[error("Invalid state parameter")]
    InvalidState,

    /// Authorization-code exchange failed (network or provider rejection)
    #[error("Failed to complete OAuth flow: {0}")]
    Exchange(String),

    /// Refresh-token grant failed
    #[error("Failed to refresh token: {0}")]
    Refresh(String),

    /// No credential stored for the principal
    #[error("No token data found for principal {0}")]
    NoCredential(String),

    /// Stored payload could not be decrypted (wrong key, truncated, tampered)
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// Decrypted payload is not a valid credential record
    #[error("Deserialization failed: {0}")]
    Deserialization(String),

    /// Storage backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid configuration (e.g. malformed encryption key)
    #[error("Configuration error: {0}")]
    Config(String),
}

impl OAuthError {
    /// True for errors that mean "the stored credential is unusable".
    pub fn is_unreadable_credential(&self) -> bool {
        matches!(self, Self::Decryption(_) | Self::Deserialization(_))
    }
}
