use std::sync::Arc;

use agenthub_backend::BackendError;
use thiserror::Error;

/// Failure while preparing the export client. Shared by every caller that
/// joined the same bootstrap attempt.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("export configuration unavailable: {0}")]
    Config(#[source] BackendError),
    #[error("export configuration is missing `{0}`")]
    MissingSetting(&'static str),
    #[error("invalid export endpoint {url}: {reason}")]
    Endpoint { url: String, reason: String },
    #[error("failed to build export http client: {0}")]
    Client(#[source] reqwest::Error),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsentError {
    #[error("consent was denied")]
    Denied,
    #[error("authorization server error: {0}")]
    Provider(String),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("export client unavailable: {0}")]
    Bootstrap(#[from] Arc<BootstrapError>),
    #[error(transparent)]
    Consent(#[from] ConsentError),
    #[error("authorization response did not match the issued state")]
    StateMismatch,
    #[error("token exchange failed: {0}")]
    TokenExchange(String),
    #[error("export grant was rejected; authorize again")]
    Unauthorized,
    #[error("export request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected export response: {0}")]
    UnexpectedResponse(String),
}
