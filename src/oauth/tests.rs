use super::*;
use crate::credentials::{Cipher, MemoryStore, SecretStore};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Scripted token endpoint that counts calls.
#[derive(Default)]
struct FakeEndpoint {
    exchange_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    exchange_result: Option<(String, String, String)>,
    refresh_result: Option<(String, Option<String>)>,
    refresh_delay_ms: u64,
}

impl FakeEndpoint {
    fn exchanging(access: &str, refresh: &str, user: &str) -> Self {
        Self {
            exchange_result: Some((access.into(), refresh.into(), user.into())),
            ..Default::default()
        }
    }

    fn refreshing(access: &str, refresh: Option<&str>) -> Self {
        Self {
            refresh_result: Some((access.into(), refresh.map(str::to_string))),
            ..Default::default()
        }
    }

    fn failing() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenEndpoint for FakeEndpoint {
    async fn exchange_code(&self, _code: &str) -> anyhow::Result<CodeExchangeResponse> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        match &self.exchange_result {
            Some((access, refresh, user)) => Ok(CodeExchangeResponse {
                access_token: access.clone(),
                refresh_token: refresh.clone(),
                user: TokenUser { id: user.clone() },
            }),
            None => Err(anyhow!("Token endpoint returned status 401 Unauthorized")),
        }
    }

    async fn refresh(&self, _refresh_token: &str) -> anyhow::Result<RefreshResponse> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if self.refresh_delay_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(self.refresh_delay_ms)).await;
        }
        match &self.refresh_result {
            Some((access, refresh)) => Ok(RefreshResponse {
                access_token: access.clone(),
                refresh_token: refresh.clone(),
            }),
            None => Err(anyhow!("Token endpoint returned status 400 Bad Request")),
        }
    }
}

/// Endpoint that must never be reached.
struct UnreachableEndpoint;

#[async_trait]
impl TokenEndpoint for UnreachableEndpoint {
    async fn exchange_code(&self, _code: &str) -> anyhow::Result<CodeExchangeResponse> {
        panic!("token endpoint called for code exchange");
    }

    async fn refresh(&self, _refresh_token: &str) -> anyhow::Result<RefreshResponse> {
        panic!("token endpoint called for refresh");
    }
}

/// Backend whose every operation fails.
struct OfflineStore;

impl SecretStore for OfflineStore {
    fn put(&self, _key: &str, _value: String) -> crate::error::Result<()> {
        Err(OAuthError::Storage("database is locked".to_string()))
    }

    fn get(&self, _key: &str) -> crate::error::Result<Option<String>> {
        Err(OAuthError::Storage("database is locked".to_string()))
    }

    fn delete(&self, _key: &str) -> crate::error::Result<bool> {
        Err(OAuthError::Storage("database is locked".to_string()))
    }

    fn len(&self) -> crate::error::Result<usize> {
        Err(OAuthError::Storage("database is locked".to_string()))
    }
}

fn test_provider() -> OAuthProviderConfig {
    OAuthProviderConfig {
        client_id: "test_client_id".to_string(),
        client_secret: "test_client_secret".to_string(),
        redirect_uri: "http://localhost:3000/oauth/clickup/callback".to_string(),
        auth_url: "https://app.clickup.com/api".to_string(),
        api_url: "https://api.clickup.com/api/v2".to_string(),
    }
}

fn test_store() -> CredentialStore {
    CredentialStore::new(Arc::new(MemoryStore::new()), Cipher::new([5u8; 32]))
}

fn manager_with(endpoint: Arc<dyn TokenEndpoint>, clock: Arc<FixedClock>) -> OAuthManager {
    OAuthManager::new(test_provider(), test_store(), StateRegistry::new(None), endpoint)
        .with_clock(clock)
}

fn fixed_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(Utc::now()))
}

#[test]
fn test_generate_auth_url() {
    let manager = manager_with(Arc::new(UnreachableEndpoint), fixed_clock());

    let AuthUrl { url, state } = manager.generate_auth_url();

    assert!(url.starts_with("https://app.clickup.com/api?"));
    assert!(url.contains("client_id=test_client_id"));
    assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A3000%2Foauth%2Fclickup%2Fcallback"));
    assert!(url.contains("response_type=code"));
    assert!(url.contains(&format!("state={}", state)));
    assert_eq!(state.len(), 32);
    assert_eq!(manager.state_registry().count(), 1);
}

#[test]
fn test_generate_auth_url_states_are_distinct() {
    let manager = manager_with(Arc::new(UnreachableEndpoint), fixed_clock());

    let first = manager.generate_auth_url();
    let second = manager.generate_auth_url();
    assert_ne!(first.state, second.state);
}

#[tokio::test]
async fn test_callback_success_scenario() {
    let clock = fixed_clock();
    let endpoint = Arc::new(FakeEndpoint::exchanging("A", "R", "U"));
    let manager = manager_with(endpoint.clone(), clock.clone());

    let AuthUrl { state, .. } = manager.generate_auth_url();
    let principal = manager.handle_callback("code1", &state).await.unwrap();

    assert_eq!(principal, "U");
    assert!(manager.is_authenticated("U"));
    assert_eq!(endpoint.exchange_calls.load(Ordering::SeqCst), 1);

    let stored = manager.credential_store().get("U").unwrap().unwrap();
    assert_eq!(stored.access_token, "A");
    assert_eq!(stored.refresh_token, "R");
    assert_eq!(stored.principal_id.as_deref(), Some("U"));
    assert_eq!(stored.expires_at, clock.now() + Duration::days(7));
}

#[tokio::test]
async fn test_state_accepted_exactly_once() {
    let endpoint = Arc::new(FakeEndpoint::exchanging("A", "R", "U"));
    let manager = manager_with(endpoint.clone(), fixed_clock());

    let AuthUrl { state, .. } = manager.generate_auth_url();
    manager.handle_callback("code1", &state).await.unwrap();

    let replay = manager.handle_callback("code1", &state).await;
    assert_eq!(replay, Err(OAuthError::InvalidState));
    assert_eq!(endpoint.exchange_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unknown_state_rejected_before_network() {
    let manager = manager_with(Arc::new(UnreachableEndpoint), fixed_clock());
    manager.generate_auth_url();

    let result = manager.handle_callback("code1", "garbage-state").await;
    assert_eq!(result, Err(OAuthError::InvalidState));
}

#[tokio::test]
async fn test_exchange_failure_consumes_state() {
    let endpoint = Arc::new(FakeEndpoint::failing());
    let manager = manager_with(endpoint.clone(), fixed_clock());

    let AuthUrl { state, .. } = manager.generate_auth_url();

    let first = manager.handle_callback("bad-code", &state).await;
    assert!(matches!(first, Err(OAuthError::Exchange(_))));
    assert_eq!(manager.state_registry().count(), 0);

    // Not replayable even though the handler failed
    let second = manager.handle_callback("bad-code", &state).await;
    assert_eq!(second, Err(OAuthError::InvalidState));
    assert_eq!(endpoint.exchange_calls.load(Ordering::SeqCst), 1);
    assert!(manager.credential_store().is_empty().unwrap());
}

#[tokio::test]
async fn test_empty_user_id_is_exchange_error() {
    let manager = manager_with(Arc::new(FakeEndpoint::exchanging("A", "R", "")), fixed_clock());

    let AuthUrl { state, .. } = manager.generate_auth_url();
    let result = manager.handle_callback("code1", &state).await;

    assert!(matches!(result, Err(OAuthError::Exchange(_))));
    assert!(manager.credential_store().is_empty().unwrap());
}

#[tokio::test]
async fn test_is_authenticated_lifecycle() {
    let clock = fixed_clock();
    let manager = manager_with(Arc::new(FakeEndpoint::exchanging("A", "R", "U")), clock.clone());

    assert!(!manager.is_authenticated("U"));

    let AuthUrl { state, .. } = manager.generate_auth_url();
    manager.handle_callback("code1", &state).await.unwrap();
    assert!(manager.is_authenticated("U"));

    // One millisecond past expiry
    clock.advance(Duration::days(7) + Duration::milliseconds(1));
    assert!(!manager.is_authenticated("U"));

    // Exactly at expiry counts as expired too
    clock.advance(Duration::milliseconds(-1));
    assert!(!manager.is_authenticated("U"));
}

#[test]
fn test_is_authenticated_false_for_unreadable_record() {
    let manager = manager_with(Arc::new(UnreachableEndpoint), fixed_clock());
    manager
        .credential_store()
        .backend()
        .put("U", "corrupted".to_string())
        .unwrap();

    assert!(!manager.is_authenticated("U"));
}

#[tokio::test]
async fn test_storage_failure_reported_per_operation() {
    let store = CredentialStore::new(Arc::new(OfflineStore), Cipher::new([5u8; 32]));
    let manager = OAuthManager::new(
        test_provider(),
        store,
        StateRegistry::new(None),
        Arc::new(UnreachableEndpoint),
    );

    assert!(!manager.is_authenticated("U"));
    assert!(matches!(
        manager.get_access_token("U").await,
        Err(OAuthError::Storage(_))
    ));
}

#[tokio::test]
async fn test_get_access_token_unexpired_returns_stored() {
    let clock = fixed_clock();
    let manager = manager_with(Arc::new(UnreachableEndpoint), clock.clone());
    let record = CredentialRecord::issued("A", "R", clock.now(), Some("U".into()));
    manager.credential_store().put("U", &record).unwrap();

    assert_eq!(manager.get_access_token("U").await.unwrap(), "A");
}

#[tokio::test]
async fn test_get_access_token_without_record() {
    let manager = manager_with(Arc::new(UnreachableEndpoint), fixed_clock());

    let result = manager.get_access_token("nobody").await;
    assert_eq!(result, Err(OAuthError::NoCredential("nobody".to_string())));
}

#[tokio::test]
async fn test_get_access_token_unreadable_record() {
    let manager = manager_with(Arc::new(UnreachableEndpoint), fixed_clock());
    manager
        .credential_store()
        .backend()
        .put("U", "corrupted".to_string())
        .unwrap();

    let result = manager.get_access_token("U").await;
    assert!(matches!(result, Err(OAuthError::Decryption(_))));
}

#[tokio::test]
async fn test_expired_record_refresh_scenario() {
    let clock = fixed_clock();
    let endpoint = Arc::new(FakeEndpoint::refreshing("A2", Some("R2")));
    let manager = manager_with(endpoint.clone(), clock.clone());

    let stale = CredentialRecord {
        access_token: "A".into(),
        refresh_token: "R".into(),
        expires_at: clock.now() - Duration::milliseconds(1000),
        principal_id: Some("U".into()),
    };
    manager.credential_store().put("U", &stale).unwrap();
    assert!(!manager.is_authenticated("U"));

    assert_eq!(manager.get_access_token("U").await.unwrap(), "A2");
    assert!(manager.is_authenticated("U"));
    assert_eq!(endpoint.refresh_calls.load(Ordering::SeqCst), 1);

    let refreshed = manager.credential_store().get("U").unwrap().unwrap();
    assert!(refreshed.expires_at > stale.expires_at);
    assert_eq!(refreshed.expires_at, clock.now() + Duration::days(7));
    assert_eq!(refreshed.refresh_token, "R2");
    assert_eq!(refreshed.principal_id.as_deref(), Some("U"));

    // Fresh token is served without another refresh
    assert_eq!(manager.get_access_token("U").await.unwrap(), "A2");
    assert_eq!(endpoint.refresh_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_refresh_keeps_refresh_token_when_not_rotated() {
    let clock = fixed_clock();
    let manager = manager_with(Arc::new(FakeEndpoint::refreshing("A2", None)), clock.clone());

    let mut stale = CredentialRecord::issued("A", "R", clock.now(), Some("U".into()));
    stale.expires_at = clock.now() - Duration::seconds(1);
    manager.credential_store().put("U", &stale).unwrap();

    manager.get_access_token("U").await.unwrap();

    let refreshed = manager.credential_store().get("U").unwrap().unwrap();
    assert_eq!(refreshed.refresh_token, "R");
}

#[tokio::test]
async fn test_refresh_failure_leaves_stale_record() {
    let clock = fixed_clock();
    let endpoint = Arc::new(FakeEndpoint::failing());
    let manager = manager_with(endpoint.clone(), clock.clone());

    let mut stale = CredentialRecord::issued("A", "R", clock.now(), Some("U".into()));
    stale.expires_at = clock.now() - Duration::seconds(1);
    manager.credential_store().put("U", &stale).unwrap();

    let result = manager.get_access_token("U").await;
    assert!(matches!(result, Err(OAuthError::Refresh(_))));
    assert_eq!(manager.credential_store().get("U").unwrap().unwrap(), stale);

    // Next call retries the refresh
    let again = manager.get_access_token("U").await;
    assert!(matches!(again, Err(OAuthError::Refresh(_))));
    assert_eq!(endpoint.refresh_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_concurrent_refresh_is_coalesced() {
    let clock = fixed_clock();
    let endpoint = Arc::new(FakeEndpoint {
        refresh_delay_ms: 50,
        ..FakeEndpoint::refreshing("A2", Some("R2"))
    });
    let manager = Arc::new(manager_with(endpoint.clone(), clock.clone()));

    let mut stale = CredentialRecord::issued("A", "R", clock.now(), Some("U".into()));
    stale.expires_at = clock.now() - Duration::seconds(1);
    manager.credential_store().put("U", &stale).unwrap();

    let tasks: Vec<_> = (0..5)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.get_access_token("U").await })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), "A2");
    }
    assert_eq!(endpoint.refresh_calls.load(Ordering::SeqCst), 1);
    assert!(manager.refresh_locks.is_empty());
}

#[tokio::test]
async fn test_refresh_lock_dropped_after_refresh() {
    let clock = fixed_clock();
    let endpoint = Arc::new(FakeEndpoint::refreshing("A2", Some("R2")));
    let manager = manager_with(endpoint.clone(), clock.clone());

    for principal in ["U1", "U2", "U3"] {
        let mut stale = CredentialRecord::issued("A", "R", clock.now(), Some(principal.into()));
        stale.expires_at = clock.now() - Duration::seconds(1);
        manager.credential_store().put(principal, &stale).unwrap();
        manager.get_access_token(principal).await.unwrap();
    }
    assert!(manager.refresh_locks.is_empty());

    // A failed refresh does not leave an entry behind either
    let failing = manager_with(Arc::new(FakeEndpoint::failing()), clock.clone());
    let mut stale = CredentialRecord::issued("A", "R", clock.now(), Some("U".into()));
    stale.expires_at = clock.now() - Duration::seconds(1);
    failing.credential_store().put("U", &stale).unwrap();
    assert!(failing.get_access_token("U").await.is_err());
    assert!(failing.refresh_locks.is_empty());
}

#[tokio::test]
async fn test_empty_refresh_token_fails_without_network_call() {
    let clock = fixed_clock();
    let manager = manager_with(Arc::new(UnreachableEndpoint), clock.clone());

    let mut stale = CredentialRecord::issued("A", "", clock.now(), Some("U".into()));
    stale.expires_at = clock.now() - Duration::seconds(1);
    manager.credential_store().put("U", &stale).unwrap();

    assert_eq!(
        manager.get_access_token("U").await,
        Err(OAuthError::Refresh("No refresh token available".to_string()))
    );
    assert_eq!(manager.credential_store().get("U").unwrap().unwrap(), stale);
}

#[tokio::test]
async fn test_principals_are_independent() {
    let clock = fixed_clock();
    let manager = manager_with(Arc::new(FakeEndpoint::refreshing("B2", None)), clock.clone());

    let live = CredentialRecord::issued("A", "R", clock.now(), Some("U1".into()));
    let mut stale = CredentialRecord::issued("B", "RB", clock.now(), Some("U2".into()));
    stale.expires_at = clock.now() - Duration::seconds(1);
    manager.credential_store().put("U1", &live).unwrap();
    manager.credential_store().put("U2", &stale).unwrap();

    assert_eq!(manager.get_access_token("U2").await.unwrap(), "B2");
    assert_eq!(manager.get_access_token("U1").await.unwrap(), "A");
    assert_eq!(manager.credential_store().get("U1").unwrap().unwrap(), live);
}

#[tokio::test]
async fn test_revoke() {
    let manager = manager_with(Arc::new(FakeEndpoint::exchanging("A", "R", "U")), fixed_clock());

    let AuthUrl { state, .. } = manager.generate_auth_url();
    manager.handle_callback("code1", &state).await.unwrap();

    assert!(manager.revoke("U").unwrap());
    assert!(!manager.is_authenticated("U"));
    assert!(!manager.revoke("U").unwrap());
    assert_eq!(
        manager.get_access_token("U").await,
        Err(OAuthError::NoCredential("U".to_string()))
    );
}

#[tokio::test]
async fn test_new_callback_replaces_existing_record() {
    let clock = fixed_clock();
    let manager = manager_with(Arc::new(FakeEndpoint::exchanging("A-new", "R-new", "U")), clock);

    let old = CredentialRecord::issued("A-old", "R-old", Utc::now(), Some("U".into()));
    manager.credential_store().put("U", &old).unwrap();

    let AuthUrl { state, .. } = manager.generate_auth_url();
    manager.handle_callback("code", &state).await.unwrap();

    let stored = manager.credential_store().get("U").unwrap().unwrap();
    assert_eq!(stored.access_token, "A-new");
    assert_eq!(manager.credential_store().len().unwrap(), 1);
}
