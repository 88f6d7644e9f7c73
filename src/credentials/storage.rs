//! Storage backends for encrypted credential payloads.
//!
//! Backends only ever see ciphertext strings keyed by principal id; encryption
//! and (de)serialization happen one layer up in [`super::CredentialStore`].

use crate::error::{OAuthError, Result};
use chrono::Utc;
use dashmap::DashMap;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Key/value capability the credential store is built on.
///
/// Implementations must make `put` atomic per key: a concurrent reader sees
/// either the old value or the new one, never a mix.
pub trait SecretStore: Send + Sync {
    /// Stores `value` under `key`, replacing any previous value.
    fn put(&self, key: &str, value: String) -> Result<()>;

    /// Returns the value for `key`, or `None` if absent.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Removes `key`. Returns whether a value was present.
    fn delete(&self, key: &str) -> Result<bool>;

    /// Number of stored entries.
    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// In-memory backend. Contents live for the process lifetime.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemoryStore {
    fn put(&self, key: &str, value: String) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.entries.len())
    }
}

/// Persistent backend using SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE credentials (
///     principal_id TEXT PRIMARY KEY,
///     payload TEXT NOT NULL,        -- base64(nonce || ciphertext)
///     created_at TEXT NOT NULL,     -- ISO 8601 timestamp
///     updated_at TEXT NOT NULL      -- ISO 8601 timestamp
/// );
/// ```
///
/// # Thread Safety
/// - Connection is wrapped in a Mutex; each call holds it for one statement
/// - SQLite upsert gives the atomic replace
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Creates or opens a store at `db_path` (`":memory:"` for a private in-memory DB).
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)
            .map_err(|e| OAuthError::Storage(format!("Failed to open database: {}", e)))?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                principal_id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )
        .map_err(|e| OAuthError::Storage(format!("Failed to create credentials table: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| OAuthError::Storage("Credential database lock poisoned".to_string()))
    }
}

impl SecretStore for SqliteStore {
    fn put(&self, key: &str, value: String) -> Result<()> {
        let now = Utc::now().to_rfc3339();

        self.conn()?
            .execute(
                r#"
                INSERT INTO credentials (principal_id, payload, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(principal_id) DO UPDATE SET
                    payload = excluded.payload,
                    updated_at = excluded.updated_at
                "#,
                params![key, value, now, now],
            )
            .map_err(|e| OAuthError::Storage(format!("Failed to store credentials: {}", e)))?;

        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        self.conn()?
            .query_row(
                "SELECT payload FROM credentials WHERE principal_id = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| OAuthError::Storage(format!("Failed to read credentials: {}", e)))
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let rows_affected = self
            .conn()?
            .execute(
                "DELETE FROM credentials WHERE principal_id = ?1",
                params![key],
            )
            .map_err(|e| OAuthError::Storage(format!("Failed to delete credentials: {}", e)))?;

        Ok(rows_affected > 0)
    }

    fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM credentials", [], |row| row.get(0))
            .map_err(|e| OAuthError::Storage(format!("Failed to count credentials: {}", e)))?;

        Ok(count as usize)
    }
}
