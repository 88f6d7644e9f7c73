// Error taxonomy shared by the credential lifecycle
pub mod error;

// Cipher, credential records and storage backends
pub mod credentials;

// OAuth lifecycle manager, state registry and token endpoint
pub mod oauth;

// Downstream calls with managed access tokens
pub mod gateway;

// Request principal extraction
pub mod auth;

// HTTP API
pub mod api;

// Configuration loading
pub mod config;
