//! Identity provider capability and a local, optionally persisted, provider.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Principal reported by the identity provider. Replaced wholesale, never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub provider_uid: String,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl Identity {
    pub fn new(provider_uid: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            provider_uid: provider_uid.into(),
            email: email.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum ProviderAuthError {
    #[error("sign-in was dismissed")]
    Dismissed,
    #[error("identity provider error: {0}")]
    Provider(String),
    #[error("failed to persist provider session: {0}")]
    Persistence(#[from] std::io::Error),
    #[error("failed to encode provider session: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// The external identity provider.
///
/// `subscribe` yields the provider's view of the signed-in principal; its
/// current value at subscription time counts as the first notification.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self) -> Result<Identity, ProviderAuthError>;

    async fn sign_out(&self) -> Result<(), ProviderAuthError>;

    fn subscribe(&self) -> watch::Receiver<Option<Identity>>;
}

/// Interactive step of a sign-in. May wait on the user indefinitely.
#[async_trait]
pub trait SignInPrompt: Send + Sync {
    async fn prompt(&self) -> Result<Identity, ProviderAuthError>;
}

/// Provider that delegates the interactive step to a [`SignInPrompt`] and can
/// keep its session in a JSON file across restarts.
pub struct LocalIdentityProvider {
    prompt: Arc<dyn SignInPrompt>,
    current: watch::Sender<Option<Identity>>,
    session_file: Option<PathBuf>,
}

impl LocalIdentityProvider {
    pub fn new(prompt: Arc<dyn SignInPrompt>) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            prompt,
            current,
            session_file: None,
        }
    }

    /// Build a provider backed by `path`, restoring a previously saved session.
    ///
    /// A malformed file is discarded and the provider starts signed out.
    pub async fn with_session_file(
        prompt: Arc<dyn SignInPrompt>,
        path: impl Into<PathBuf>,
    ) -> Result<Self, ProviderAuthError> {
        let path = path.into();
        let restored = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<Identity>(&bytes) {
                Ok(identity) => {
                    info!(uid = %identity.provider_uid, path = %path.display(), "restored provider session");
                    Some(identity)
                }
                Err(error) => {
                    warn!(path = %path.display(), %error, "discarding malformed provider session");
                    remove_if_present(&path).await?;
                    None
                }
            },
            Err(error) if error.kind() == ErrorKind::NotFound => None,
            Err(error) => return Err(error.into()),
        };

        let (current, _) = watch::channel(restored);
        Ok(Self {
            prompt,
            current,
            session_file: Some(path),
        })
    }

    pub fn current(&self) -> Option<Identity> {
        self.current.borrow().clone()
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn sign_in(&self) -> Result<Identity, ProviderAuthError> {
        let identity = self.prompt.prompt().await?;

        if let Some(path) = &self.session_file {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, serde_json::to_vec(&identity)?).await?;
            debug!(path = %path.display(), "persisted provider session");
        }

        self.current.send_replace(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), ProviderAuthError> {
        let result = match &self.session_file {
            Some(path) => remove_if_present(path).await,
            None => Ok(()),
        };
        // The in-memory session ends even when the file cannot be removed.
        self.current.send_replace(None);
        result
    }

    fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.current.subscribe()
    }
}

async fn remove_if_present(path: &Path) -> Result<(), ProviderAuthError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error.into()),
    }
}
