//! Conversation history for the signed-in principal.

mod cache;
mod trigger;

use agenthub_backend::{BackendError, StatusCode};
use thiserror::Error;

pub use agenthub_backend::{ConversationSession, Message, MessageRole, SessionKind, SessionSummary};
pub use cache::{ConversationHistoryCache, HistoryState};

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("conversation {0} does not exist")]
    NotFound(String),
    #[error("conversation {0} belongs to another user")]
    Forbidden(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl HistoryError {
    fn classify(error: BackendError, id: &str) -> Self {
        match error.status() {
            Some(StatusCode::NOT_FOUND) => HistoryError::NotFound(id.to_owned()),
            Some(StatusCode::FORBIDDEN) => HistoryError::Forbidden(id.to_owned()),
            _ => HistoryError::Backend(error),
        }
    }
}
