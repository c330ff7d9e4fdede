use agenthub_backend::{BackendClient, BackendError, LoginRequest, Role};
use thiserror::Error;
use tracing::debug;

use crate::identity::Identity;

#[derive(Debug, Error)]
pub enum SessionSyncError {
    #[error("session authority rejected the identity: {0}")]
    Rejected(#[source] BackendError),
    #[error("session authority unreachable: {0}")]
    Transport(#[source] BackendError),
    #[error("role exchange for this identity did not complete")]
    Incomplete,
}

impl From<BackendError> for SessionSyncError {
    fn from(error: BackendError) -> Self {
        match error {
            BackendError::Status { .. } => SessionSyncError::Rejected(error),
            other => SessionSyncError::Transport(other),
        }
    }
}

/// Server side of the session: turns a provider identity into a role.
#[derive(Clone)]
pub struct SessionAuthority {
    backend: BackendClient,
}

impl SessionAuthority {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }

    pub async fn exchange(&self, identity: &Identity) -> Result<Role, SessionSyncError> {
        let response = self
            .backend
            .login(&LoginRequest {
                email: &identity.email,
                uid: &identity.provider_uid,
            })
            .await?;
        debug!(uid = %identity.provider_uid, role = %response.role, "session authority issued role");
        Ok(response.role)
    }

    pub async fn revoke(&self) -> Result<(), SessionSyncError> {
        self.backend.logout().await?;
        Ok(())
    }
}
