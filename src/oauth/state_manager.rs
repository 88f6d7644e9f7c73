//! OAuth state management for CSRF protection.
//!
//! Every authorization attempt gets a random state token that must come back
//! on the callback. Tokens are single-use. They do not expire unless a TTL is
//! configured, in which case [`run_state_cleanup`] sweeps stale ones.

use super::clock::{Clock, SystemClock};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::{rngs::OsRng, RngCore};
use std::sync::Arc;

/// Random bytes per state token (128 bits of entropy).
const STATE_BYTES: usize = 16;

/// Pending authorization state: token → issuance time.
#[derive(Clone)]
pub struct StateRegistry {
    states: Arc<DashMap<String, DateTime<Utc>>>,
    ttl: Option<Duration>,
    clock: Arc<dyn Clock>,
}

impl StateRegistry {
    /// Create a registry. `ttl = None` keeps states until they are consumed.
    pub fn new(ttl: Option<Duration>) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Option<Duration>, clock: Arc<dyn Clock>) -> Self {
        Self {
            states: Arc::new(DashMap::new()),
            ttl,
            clock,
        }
    }

    /// Generate a new state token and record it.
    ///
    /// Returns 32 lowercase hex characters.
    pub fn issue(&self) -> String {
        let mut bytes = [0u8; STATE_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let state = hex::encode(bytes);

        self.states.insert(state.clone(), self.clock.now());

        state
    }

    /// Remove `state` and report whether it was pending.
    ///
    /// The removal is the existence check, so of two concurrent consumers of
    /// one value only one sees `true`. An expired entry is removed and rejected.
    pub fn consume(&self, state: &str) -> bool {
        let Some((_, issued_at)) = self.states.remove(state) else {
            return false;
        };

        !self.is_expired(issued_at, self.clock.now())
    }

    /// Drop expired states. No-op without a TTL.
    pub fn cleanup_expired(&self) {
        if self.ttl.is_none() {
            return;
        }

        let now = self.clock.now();
        self.states
            .retain(|_, issued_at| !self.is_expired(*issued_at, now));
    }

    /// Number of pending states
    pub fn count(&self) -> usize {
        self.states.len()
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    fn is_expired(&self, issued_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self.ttl {
            Some(ttl) => now - issued_at > ttl,
            None => false,
        }
    }
}

/// Background task to periodically clean up expired states
///
/// An interval of 0 is treated as 1 second.
pub async fn run_state_cleanup(registry: StateRegistry, interval_seconds: u64) {
    let mut interval =
        tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds.max(1)));

    loop {
        interval.tick().await;
        registry.cleanup_expired();
        tracing::debug!(
            pending = registry.count(),
            "OAuth state cleanup complete"
        );
    }
}
