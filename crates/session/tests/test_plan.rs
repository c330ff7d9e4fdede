//! Integration tests for identity and session synchronisation.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agenthub_backend::BackendClient;
use agenthub_config::BackendConfig;
use agenthub_session::{
    Identity, IdentityProvider, IdentitySessionManager, LocalIdentityProvider, ProviderAuthError,
    Role, SessionAuthority, SessionError, SessionPhase, SessionState, SessionSyncError,
    SignInPrompt,
};
use async_trait::async_trait;
use httpmock::prelude::*;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::watch;

type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

#[derive(Default)]
struct ScriptedPrompt {
    answers: Mutex<VecDeque<Result<Identity, ProviderAuthError>>>,
    calls: AtomicUsize,
}

impl ScriptedPrompt {
    fn answering(answers: Vec<Result<Identity, ProviderAuthError>>) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.into()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignInPrompt for ScriptedPrompt {
    async fn prompt(&self) -> Result<Identity, ProviderAuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(ProviderAuthError::Dismissed))
    }
}

/// Provider whose sign-out always fails, for best-effort logout checks.
struct StubbornProvider {
    current: watch::Sender<Option<Identity>>,
}

#[async_trait]
impl IdentityProvider for StubbornProvider {
    async fn sign_in(&self) -> Result<Identity, ProviderAuthError> {
        let identity = Identity::new("u9", "stuck@x.com");
        self.current.send_replace(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), ProviderAuthError> {
        Err(ProviderAuthError::Provider("network unreachable".into()))
    }

    fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.current.subscribe()
    }
}

fn alice() -> Identity {
    Identity::new("u1", "a@x.com")
}

fn authority_for(server: &MockServer) -> SessionAuthority {
    let config = BackendConfig {
        base_url: server.base_url(),
        request_timeout_seconds: 5,
        ..BackendConfig::default()
    };
    SessionAuthority::new(BackendClient::new(&config).expect("backend client"))
}

async fn wait_for_state(
    manager: &IdentitySessionManager,
    predicate: impl FnMut(&SessionState) -> bool,
) -> SessionState {
    let mut receiver = manager.subscribe();
    let state = tokio::time::timeout(Duration::from_secs(5), receiver.wait_for(predicate))
        .await
        .expect("state change timed out")
        .expect("manager alive");
    state.clone()
}

#[tokio::test]
async fn starts_loading_and_settles_signed_out_without_provider_session() {
    let server = MockServer::start_async().await;
    let login = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/login");
            then.status(200).json_body(json!({ "role": "PUBLIC" }));
        })
        .await;

    let provider = Arc::new(LocalIdentityProvider::new(ScriptedPrompt::answering(vec![])));
    let manager = IdentitySessionManager::start(provider, authority_for(&server));

    let state = manager.wait_until_settled().await;
    assert!(!state.is_loading());
    assert!(state.identity().is_none());
    assert!(state.role().is_none());
    assert_eq!(state.phase(), SessionPhase::SignedOut);
    login.assert_hits_async(0).await;
}

#[tokio::test]
async fn login_exchanges_identity_for_role_once() {
    let server = MockServer::start_async().await;
    let login = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/login")
                .json_body(json!({ "email": "a@x.com", "uid": "u1" }));
            then.status(200).json_body(json!({ "role": "ADMIN" }));
        })
        .await;

    let prompt = ScriptedPrompt::answering(vec![Ok(alice())]);
    let provider = Arc::new(LocalIdentityProvider::new(prompt.clone()));
    let manager = IdentitySessionManager::start(provider, authority_for(&server));
    manager.wait_until_settled().await;

    let role = manager.login().await.expect("login succeeds");

    assert_eq!(role, Role::Admin);
    assert_eq!(manager.role(), Some(Role::Admin));
    assert_eq!(manager.identity(), Some(alice()));
    assert_eq!(manager.state().phase(), SessionPhase::Authorized);
    assert_eq!(prompt.calls(), 1);

    // The provider notification for the same identity must not trigger a second exchange.
    tokio::time::sleep(Duration::from_millis(50)).await;
    login.assert_hits_async(1).await;
}

#[tokio::test]
async fn repeated_login_for_same_identity_reuses_role() {
    let server = MockServer::start_async().await;
    let login = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/login");
            then.status(200).json_body(json!({ "role": "EMPLOYEE" }));
        })
        .await;

    let prompt = ScriptedPrompt::answering(vec![Ok(alice()), Ok(alice())]);
    let provider = Arc::new(LocalIdentityProvider::new(prompt));
    let manager = IdentitySessionManager::start(provider, authority_for(&server));

    assert_eq!(manager.login().await.expect("first login"), Role::Employee);
    assert_eq!(manager.login().await.expect("second login"), Role::Employee);

    login.assert_hits_async(1).await;
}

#[tokio::test]
async fn failed_exchange_revokes_provider_and_clears_session() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/login");
            then.status(500).json_body(json!({ "error": "firestore down" }));
        })
        .await;

    let provider = Arc::new(LocalIdentityProvider::new(ScriptedPrompt::answering(vec![
        Ok(alice()),
    ])));
    let manager = IdentitySessionManager::start(provider.clone(), authority_for(&server));
    manager.wait_until_settled().await;

    let err = manager.login().await.expect_err("login must fail");

    assert!(matches!(err, SessionError::Sync(_)), "unexpected error: {err:?}");
    let state = manager.state();
    assert!(state.identity().is_none());
    assert!(state.role().is_none());
    assert_eq!(state.phase(), SessionPhase::SignedOut);
    assert!(provider.current().is_none(), "provider must be signed out");
}

#[tokio::test]
async fn undecodable_role_is_treated_as_sync_failure() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/login");
            then.status(200).json_body(json!({ "role": "SUPERUSER" }));
        })
        .await;

    let provider = Arc::new(LocalIdentityProvider::new(ScriptedPrompt::answering(vec![
        Ok(alice()),
    ])));
    let manager = IdentitySessionManager::start(provider.clone(), authority_for(&server));

    let err = manager.login().await.expect_err("login must fail");

    assert!(matches!(err, SessionError::Sync(_)));
    assert!(manager.identity().is_none());
    assert!(provider.current().is_none());
}

#[tokio::test]
async fn login_joining_a_rejected_exchange_reports_the_rejection() {
    let server = MockServer::start_async().await;
    let login = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/login");
            then.status(403)
                .delay(Duration::from_millis(300))
                .json_body(json!({ "error": "Forbidden" }));
        })
        .await;

    let provider = Arc::new(LocalIdentityProvider::new(ScriptedPrompt::answering(vec![
        Ok(alice()),
        Ok(alice()),
    ])));
    let manager = IdentitySessionManager::start(provider, authority_for(&server));
    manager.wait_until_settled().await;

    let first = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.login().await })
    };
    wait_for_state(&manager, |state| state.phase() == SessionPhase::SyncingRole).await;

    let joined = manager.login().await.expect_err("joined login must fail");
    let original = first.await.expect("login task").expect_err("first login must fail");

    for err in [&joined, &original] {
        assert!(
            matches!(err, SessionError::Sync(inner) if matches!(**inner, SessionSyncError::Rejected(_))),
            "unexpected error: {err:?}"
        );
    }
    assert!(manager.identity().is_none());
    login.assert_hits_async(1).await;
}

#[tokio::test]
async fn dismissed_sign_in_leaves_session_signed_out() {
    let server = MockServer::start_async().await;
    let login = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/login");
            then.status(200).json_body(json!({ "role": "PUBLIC" }));
        })
        .await;

    let provider = Arc::new(LocalIdentityProvider::new(ScriptedPrompt::answering(vec![
        Err(ProviderAuthError::Dismissed),
    ])));
    let manager = IdentitySessionManager::start(provider, authority_for(&server));
    manager.wait_until_settled().await;

    let err = manager.login().await.expect_err("dismissal surfaces");

    assert!(matches!(
        err,
        SessionError::Provider(ProviderAuthError::Dismissed)
    ));
    assert_eq!(manager.state().phase(), SessionPhase::SignedOut);
    assert!(manager.identity().is_none());
    login.assert_hits_async(0).await;
}

#[tokio::test]
async fn logout_clears_state_before_any_network_call() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/login");
            then.status(200).json_body(json!({ "role": "ADMIN" }));
        })
        .await;
    let logout = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/logout");
            then.status(200).json_body(json!({ "message": "Logged out" }));
        })
        .await;

    let provider = Arc::new(LocalIdentityProvider::new(ScriptedPrompt::answering(vec![
        Ok(alice()),
    ])));
    let manager = IdentitySessionManager::start(provider.clone(), authority_for(&server));
    manager.login().await.expect("login succeeds");

    let pending = manager.logout();
    assert!(manager.identity().is_none());
    assert!(manager.role().is_none());
    logout.assert_hits_async(0).await;

    pending.await;

    assert!(provider.current().is_none());
    logout.assert_hits_async(1).await;
}

#[tokio::test]
async fn logout_succeeds_when_provider_and_server_fail() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/login");
            then.status(200).json_body(json!({ "role": "PUBLIC" }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/logout");
            then.status(503);
        })
        .await;

    let (current, _) = watch::channel(None);
    let provider = Arc::new(StubbornProvider { current });
    let manager = IdentitySessionManager::start(provider, authority_for(&server));
    manager.login().await.expect("login succeeds");

    manager.logout().await;

    let state = manager.state();
    assert!(state.identity().is_none());
    assert!(state.role().is_none());
}

#[tokio::test]
async fn late_exchange_response_after_logout_is_discarded() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/login");
            then.status(200)
                .delay(Duration::from_millis(300))
                .json_body(json!({ "role": "ADMIN" }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/logout");
            then.status(200);
        })
        .await;

    let provider = Arc::new(LocalIdentityProvider::new(ScriptedPrompt::answering(vec![
        Ok(alice()),
    ])));
    let manager = IdentitySessionManager::start(provider, authority_for(&server));
    manager.wait_until_settled().await;

    let pending_login = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.login().await })
    };
    wait_for_state(&manager, |state| state.phase() == SessionPhase::SyncingRole).await;

    manager.logout().await;
    let outcome = pending_login.await.expect("login task");

    assert!(matches!(outcome, Err(SessionError::Superseded)));
    let state = manager.state();
    assert!(state.identity().is_none());
    assert!(state.role().is_none(), "no ghost authorization after logout");
}

#[tokio::test]
async fn persisted_provider_session_is_resumed_on_start() -> TestResult {
    let server = MockServer::start_async().await;
    let login = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/login")
                .json_body(json!({ "email": "a@x.com", "uid": "u1" }));
            then.status(200).json_body(json!({ "role": "EMPLOYEE" }));
        })
        .await;

    let dir = TempDir::new()?;
    let path = dir.path().join("session.json");
    std::fs::write(&path, serde_json::to_vec(&alice())?)?;

    let prompt = ScriptedPrompt::answering(vec![]);
    let provider = Arc::new(LocalIdentityProvider::with_session_file(prompt.clone(), &path).await?);
    let manager = IdentitySessionManager::start(provider, authority_for(&server));

    let state = manager.wait_until_settled().await;

    assert_eq!(state.role(), Some(Role::Employee));
    assert_eq!(state.identity(), Some(&alice()));
    assert_eq!(prompt.calls(), 0, "resume must not prompt");
    login.assert_hits_async(1).await;
    Ok(())
}

#[tokio::test]
async fn resumed_session_rejected_by_server_is_revoked() -> TestResult {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/login");
            then.status(403).json_body(json!({ "error": "Forbidden" }));
        })
        .await;

    let dir = TempDir::new()?;
    let path = dir.path().join("session.json");
    std::fs::write(&path, serde_json::to_vec(&alice())?)?;

    let provider = Arc::new(
        LocalIdentityProvider::with_session_file(ScriptedPrompt::answering(vec![]), &path).await?,
    );
    let manager = IdentitySessionManager::start(provider.clone(), authority_for(&server));

    let state = manager.wait_until_settled().await;

    assert!(state.identity().is_none());
    assert!(state.role().is_none());
    assert!(provider.current().is_none());
    assert!(!path.exists(), "persisted provider session must be removed");
    Ok(())
}

#[tokio::test]
async fn malformed_session_file_starts_signed_out() -> TestResult {
    let dir = TempDir::new()?;
    let path = dir.path().join("session.json");
    std::fs::write(&path, b"{not json")?;

    let provider =
        LocalIdentityProvider::with_session_file(ScriptedPrompt::answering(vec![]), &path).await?;

    assert!(provider.current().is_none());
    assert!(!path.exists());
    Ok(())
}

#[tokio::test]
async fn sign_in_persists_session_for_next_start() -> TestResult {
    let dir = TempDir::new()?;
    let path = dir.path().join("nested").join("session.json");

    let provider = LocalIdentityProvider::with_session_file(
        ScriptedPrompt::answering(vec![Ok(alice().with_display_name("Alice"))]),
        &path,
    )
    .await?;
    provider.sign_in().await?;

    let restored: Identity = serde_json::from_slice(&std::fs::read(&path)?)?;
    assert_eq!(restored.display_name.as_deref(), Some("Alice"));

    provider.sign_out().await?;
    assert!(!path.exists());
    Ok(())
}

#[tokio::test]
async fn role_is_never_observed_without_identity() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/login");
            then.status(200).json_body(json!({ "role": "ADMIN" }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/logout");
            then.status(200);
        })
        .await;

    let provider = Arc::new(LocalIdentityProvider::new(ScriptedPrompt::answering(vec![
        Ok(alice()),
        Ok(Identity::new("u2", "b@x.com")),
    ])));
    let manager = IdentitySessionManager::start(provider, authority_for(&server));

    let mut receiver = manager.subscribe();
    let observer = tokio::spawn(async move {
        let mut violations = 0;
        loop {
            {
                let state = receiver.borrow_and_update();
                if state.role().is_some() && state.identity().is_none() {
                    violations += 1;
                }
            }
            if receiver.changed().await.is_err() {
                break;
            }
        }
        violations
    });

    manager.login().await.expect("first login");
    manager.logout().await;
    manager.login().await.expect("second login");
    manager.logout().await;
    assert!(manager.role().is_none());

    drop(manager);
    let violations = tokio::time::timeout(Duration::from_secs(5), observer)
        .await
        .expect("observer finishes")
        .expect("observer task");
    assert_eq!(violations, 0);
}
