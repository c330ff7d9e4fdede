use std::sync::Arc;

use agenthub_config::AppConfig;
use agenthub_export::{ConsentError, ConsentPrompt, ConsentRequest, ConsentResponse, ExportPhase};
use agenthub_runtime::ClientServices;
use agenthub_session::{Identity, ProviderAuthError, Role, SignInPrompt};
use anyhow::Result;
use async_trait::async_trait;
use httpmock::prelude::*;
use serde_json::json;
use tempfile::TempDir;

struct NoSignIn;

#[async_trait]
impl SignInPrompt for NoSignIn {
    async fn prompt(&self) -> Result<Identity, ProviderAuthError> {
        Err(ProviderAuthError::Dismissed)
    }
}

struct NoConsent;

#[async_trait]
impl ConsentPrompt for NoConsent {
    async fn authorize(&self, _request: ConsentRequest) -> Result<ConsentResponse, ConsentError> {
        Err(ConsentError::Denied)
    }
}

fn build_config(server: &MockServer) -> AppConfig {
    let mut config = AppConfig::default();
    config.backend.base_url = server.base_url();
    config.backend.request_timeout_seconds = 5;
    config
}

async fn initialise(config: &AppConfig) -> Result<ClientServices> {
    ClientServices::initialise(config, Arc::new(NoSignIn), Arc::new(NoConsent)).await
}

#[tokio::test(flavor = "multi_thread")]
async fn initialise_without_session_file_settles_signed_out() -> Result<()> {
    let server = MockServer::start_async().await;
    let config = build_config(&server);

    let services = initialise(&config).await?;
    let state = services.session.wait_until_settled().await;

    assert!(state.identity().is_none());
    assert!(services.history.sessions().is_empty());
    assert_eq!(services.export.phase(), ExportPhase::Uninitialized);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn initialise_resumes_persisted_session_and_loads_history() -> Result<()> {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/login");
            then.status(200).json_body(json!({ "role": "EMPLOYEE" }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/chat/history");
            then.status(200).json_body(json!([{ "id": "s1", "title": "Forecast" }]));
        })
        .await;

    let temp_dir = TempDir::new()?;
    let session_file = temp_dir.path().join("identity/session.json");
    std::fs::create_dir_all(session_file.parent().expect("parent"))?;
    std::fs::write(
        &session_file,
        serde_json::to_vec(&Identity::new("u1", "a@x.com"))?,
    )?;

    let mut config = build_config(&server);
    config.identity.session_file = Some(session_file.to_string_lossy().into_owned());

    let services = initialise(&config).await?;
    let state = services.session.wait_until_settled().await;
    assert_eq!(state.role(), Some(Role::Employee));

    let mut history = services.history.subscribe();
    tokio::time::timeout(
        std::time::Duration::from_secs(5),
        history.wait_for(|state| !state.sessions.is_empty()),
    )
    .await??;
    assert_eq!(services.history.sessions()[0].title, "Forecast");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn initialise_rejects_invalid_backend_url() -> Result<()> {
    let mut config = AppConfig::default();
    config.backend.base_url = "not a url".into();

    let error = match initialise(&config).await {
        Ok(_) => panic!("expected an invalid backend url to be rejected"),
        Err(error) => error,
    };
    let message = format!("{error:?}");
    assert!(
        message.contains("failed to build backend client"),
        "expected backend client context, got {message}"
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn initialise_reports_unreadable_session_file() -> Result<()> {
    let server = MockServer::start_async().await;
    let temp_dir = TempDir::new()?;

    let mut config = build_config(&server);
    // A directory cannot be read as a session file.
    config.identity.session_file = Some(temp_dir.path().to_string_lossy().into_owned());

    let error = match initialise(&config).await {
        Ok(_) => panic!("expected the session file to be unreadable"),
        Err(error) => error,
    };
    assert!(format!("{error:?}").contains("failed to restore provider session"));
    Ok(())
}
