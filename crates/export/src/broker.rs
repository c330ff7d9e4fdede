//! Lazily bootstrapped export client with an interactively obtained grant.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use agenthub_backend::{BackendClient, ExportCredentials};
use agenthub_config::ExportConfig;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{watch, OnceCell};
use tracing::{debug, info, warn};

use crate::error::{BootstrapError, ExportError};
use crate::issuer::{ConsentPrompt, TokenIssuer};
use crate::workspace::WorkspaceClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportPhase {
    Uninitialized,
    LoadingConfig,
    LoadingClientLibrary,
    Ready,
}

struct ExportLibrary {
    workspace: WorkspaceClient,
    issuer: TokenIssuer,
}

type BootstrapOutcome = Result<Arc<ExportLibrary>, Arc<BootstrapError>>;

enum Bootstrap {
    Idle,
    InFlight {
        attempt: u64,
        future: Shared<BoxFuture<'static, BootstrapOutcome>>,
    },
    Ready(Arc<ExportLibrary>),
}

struct Inner {
    backend: BackendClient,
    config: ExportConfig,
    consent: Arc<dyn ConsentPrompt>,
    phase: watch::Sender<ExportPhase>,
    credentials: OnceCell<ExportCredentials>,
    bootstrap: Mutex<Bootstrap>,
    attempts: AtomicU64,
    token_gate: tokio::sync::Mutex<()>,
}

/// Owns the export client and its grant for the process.
///
/// Concurrent callers share one bootstrap attempt and one consent prompt.
/// A bootstrap failure returns the broker to [`ExportPhase::Uninitialized`];
/// the export configuration is kept once it has been fetched successfully.
#[derive(Clone)]
pub struct ExportTokenBroker {
    inner: Arc<Inner>,
}

impl ExportTokenBroker {
    pub fn new(
        backend: BackendClient,
        config: ExportConfig,
        consent: Arc<dyn ConsentPrompt>,
    ) -> Self {
        let (phase, _) = watch::channel(ExportPhase::Uninitialized);
        Self {
            inner: Arc::new(Inner {
                backend,
                config,
                consent,
                phase,
                credentials: OnceCell::new(),
                bootstrap: Mutex::new(Bootstrap::Idle),
                attempts: AtomicU64::new(0),
                token_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn phase(&self) -> ExportPhase {
        *self.inner.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ExportPhase> {
        self.inner.phase.subscribe()
    }

    /// Whether a grant is currently held. Never triggers a bootstrap.
    pub fn has_grant(&self) -> bool {
        match &*self.inner.lock_bootstrap() {
            Bootstrap::Ready(library) => library.workspace.has_grant(),
            _ => false,
        }
    }

    /// Bootstrap if needed, then make sure a grant is held, asking for
    /// consent when it is not.
    pub async fn ensure_authorized(&self) -> Result<(), ExportError> {
        self.authorized_library().await.map(|_| ())
    }

    /// Create a document holding `content` and return its edit link.
    pub async fn create_document(&self, title: &str, content: &str) -> Result<String, ExportError> {
        let library = self.authorized_library().await?;
        library.workspace.create_document(title, content).await
    }

    /// Create a spreadsheet with one row per record and return its edit link.
    pub async fn create_spreadsheet(
        &self,
        title: &str,
        rows: &[Vec<String>],
    ) -> Result<String, ExportError> {
        let library = self.authorized_library().await?;
        library.workspace.create_spreadsheet(title, rows).await
    }

    async fn authorized_library(&self) -> Result<Arc<ExportLibrary>, ExportError> {
        let library = self.library().await?;
        if library.workspace.has_grant() {
            return Ok(library);
        }

        let _gate = self.inner.token_gate.lock().await;
        if library.workspace.has_grant() {
            debug!("export grant obtained by a concurrent caller");
            return Ok(library);
        }

        let grant = library
            .issuer
            .request_access_token(self.inner.consent.as_ref())
            .await?;
        library.workspace.store_grant(grant);
        Ok(library)
    }

    async fn library(&self) -> Result<Arc<ExportLibrary>, ExportError> {
        let future = {
            let mut bootstrap = self.inner.lock_bootstrap();
            match &mut *bootstrap {
                Bootstrap::Ready(library) => return Ok(library.clone()),
                Bootstrap::InFlight { future, .. } => future.clone(),
                idle @ Bootstrap::Idle => {
                    let attempt = self.inner.attempts.fetch_add(1, Ordering::Relaxed) + 1;
                    let future = self.inner.clone().bootstrap(attempt).boxed().shared();
                    *idle = Bootstrap::InFlight {
                        attempt,
                        future: future.clone(),
                    };
                    future
                }
            }
        };

        future.await.map_err(ExportError::Bootstrap)
    }
}

impl Inner {
    fn lock_bootstrap(&self) -> MutexGuard<'_, Bootstrap> {
        self.bootstrap.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn bootstrap(self: Arc<Self>, attempt: u64) -> BootstrapOutcome {
        debug!(attempt, "bootstrapping export client");
        let outcome = self.load().await;

        let mut bootstrap = self.lock_bootstrap();
        let owns = matches!(&*bootstrap, Bootstrap::InFlight { attempt: current, .. } if *current == attempt);
        match &outcome {
            Ok(library) if owns => {
                *bootstrap = Bootstrap::Ready(library.clone());
                self.phase.send_replace(ExportPhase::Ready);
                info!(attempt, "export client ready");
            }
            Err(error) if owns => {
                *bootstrap = Bootstrap::Idle;
                self.phase.send_replace(ExportPhase::Uninitialized);
                warn!(attempt, %error, "export bootstrap failed");
            }
            _ => debug!(attempt, "bootstrap attempt no longer current"),
        }

        outcome.map_err(Arc::new)
    }

    async fn load(&self) -> Result<Arc<ExportLibrary>, BootstrapError> {
        self.phase.send_replace(ExportPhase::LoadingConfig);
        let credentials = self
            .credentials
            .get_or_try_init(|| async {
                let credentials = self
                    .backend
                    .export_credentials()
                    .await
                    .map_err(BootstrapError::Config)?;
                if credentials.client_id.as_deref().map_or(true, str::is_empty) {
                    return Err(BootstrapError::MissingSetting("clientId"));
                }
                debug!(has_api_key = credentials.api_key.is_some(), "export configuration loaded");
                Ok(credentials)
            })
            .await?;

        self.phase.send_replace(ExportPhase::LoadingClientLibrary);
        let client_id = credentials
            .client_id
            .as_deref()
            .ok_or(BootstrapError::MissingSetting("clientId"))?;
        let workspace = WorkspaceClient::new(&self.config, credentials.api_key.clone())?;
        let issuer = TokenIssuer::new(&self.config, client_id)?;

        Ok(Arc::new(ExportLibrary { workspace, issuer }))
    }
}
