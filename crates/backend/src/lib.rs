use std::time::Duration;

use agenthub_config::BackendConfig;
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

pub mod types;

pub use reqwest::StatusCode;

pub use types::{
    ConversationSession, ExportCredentials, Feature, LoginRequest, LoginResponse, Message,
    MessageRole, Role, SessionKind, SessionSummary,
};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid backend url: {0}")]
    InvalidUrl(String),
    #[error("backend request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned {status}{}", describe(.message))]
    Status {
        status: StatusCode,
        message: Option<String>,
    },
}

impl BackendError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            BackendError::Status { status, .. } => Some(*status),
            BackendError::Http(error) => error.status(),
            BackendError::InvalidUrl(_) => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self.status(),
            Some(StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
        )
    }
}

/// HTTP client for the hub server.
///
/// Clones share one connection pool and one cookie jar, so the session cookie
/// set by `/api/login` is presented on every later call.
#[derive(Clone)]
pub struct BackendClient {
    http: Client,
    base_url: Url,
}

impl BackendClient {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|error| BackendError::InvalidUrl(format!("{}: {error}", config.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(BackendError::InvalidUrl(config.base_url.clone()));
        }

        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .cookie_store(true)
            .build()?;

        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `POST /api/login`: exchange a provider identity for a role.
    pub async fn login(&self, request: &LoginRequest<'_>) -> Result<LoginResponse, BackendError> {
        let response = self
            .request(Method::POST, &["api", "login"])?
            .json(request)
            .send()
            .await?;
        decode(response).await
    }

    /// `POST /api/logout`: drop the server-side session.
    pub async fn logout(&self) -> Result<(), BackendError> {
        let response = self
            .request(Method::POST, &["api", "logout"])?
            .send()
            .await?;
        expect_success(response).await
    }

    /// `GET /api/chat/history`. A `null` body is an empty history.
    pub async fn chat_history(&self) -> Result<Vec<SessionSummary>, BackendError> {
        let response = self
            .request(Method::GET, &["api", "chat", "history"])?
            .send()
            .await?;
        let sessions: Option<Vec<SessionSummary>> = decode(response).await?;
        Ok(sessions.unwrap_or_default())
    }

    /// `GET /api/chat/session/{id}`.
    pub async fn chat_session(&self, id: &str) -> Result<ConversationSession, BackendError> {
        let response = self
            .request(Method::GET, &["api", "chat", "session", id])?
            .send()
            .await?;
        let mut session: ConversationSession = decode(response).await?;
        if session.id.is_empty() {
            session.id = id.to_string();
        }
        Ok(session)
    }

    /// `DELETE /api/chat/session/{id}`.
    pub async fn delete_chat_session(&self, id: &str) -> Result<(), BackendError> {
        let response = self
            .request(Method::DELETE, &["api", "chat", "session", id])?
            .send()
            .await?;
        expect_success(response).await
    }

    /// `GET /api/config`: public export settings.
    pub async fn export_credentials(&self) -> Result<ExportCredentials, BackendError> {
        let response = self
            .request(Method::GET, &["api", "config"])?
            .send()
            .await?;
        decode(response).await
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, BackendError> {
        let url = self.endpoint(segments)?;
        debug!(%method, %url, "backend request");
        Ok(self.http.request(method, url))
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

fn describe(message: &Option<String>) -> String {
    message
        .as_deref()
        .map(|message| format!(": {message}"))
        .unwrap_or_default()
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

async fn expect_success(response: Response) -> Result<(), BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    Err(status_error(status, response).await)
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
    let status = response.status();
    if !status.is_success() {
        return Err(status_error(status, response).await);
    }
    Ok(response.json::<T>().await?)
}

async fn status_error(status: StatusCode, response: Response) -> BackendError {
    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => None,
    };
    warn!(%status, message = ?message, "backend rejected request");
    BackendError::Status { status, message }
}
