use std::sync::Arc;

use agenthub_backend::BackendClient;
use agenthub_config::AppConfig;
use agenthub_export::{ConsentPrompt, ExportTokenBroker};
use agenthub_history::ConversationHistoryCache;
use agenthub_session::{
    IdentitySessionManager, LocalIdentityProvider, SessionAuthority, SignInPrompt,
};
use anyhow::{Context, Result};
use tracing::info;

pub mod telemetry {
    use anyhow::Result;
    use tracing::Level;
    use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

    pub fn init_tracing() -> Result<()> {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let subscriber = SubscriberBuilder::default()
            .with_max_level(Level::INFO)
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|error| anyhow::anyhow!("failed to set tracing subscriber: {error}"))
    }
}

/// The client core, wired once per process.
#[derive(Clone)]
pub struct ClientServices {
    pub backend: BackendClient,
    pub provider: Arc<LocalIdentityProvider>,
    pub session: IdentitySessionManager,
    pub history: ConversationHistoryCache,
    pub export: ExportTokenBroker,
}

impl ClientServices {
    /// Must be called from within a tokio runtime. The session manager starts
    /// resuming a persisted provider session immediately.
    pub async fn initialise(
        config: &AppConfig,
        sign_in: Arc<dyn SignInPrompt>,
        consent: Arc<dyn ConsentPrompt>,
    ) -> Result<Self> {
        let backend =
            BackendClient::new(&config.backend).context("failed to build backend client")?;

        let provider = match &config.identity.session_file {
            Some(path) => Arc::new(
                LocalIdentityProvider::with_session_file(sign_in, path)
                    .await
                    .with_context(|| format!("failed to restore provider session from {path}"))?,
            ),
            None => Arc::new(LocalIdentityProvider::new(sign_in)),
        };

        let session = IdentitySessionManager::start(
            provider.clone(),
            SessionAuthority::new(backend.clone()),
        );
        let history = ConversationHistoryCache::start(backend.clone(), session.subscribe());
        let export = ExportTokenBroker::new(backend.clone(), config.export.clone(), consent);

        info!(
            backend = %backend.base_url(),
            persisted = config.identity.session_file.is_some(),
            "client services ready"
        );

        Ok(Self {
            backend,
            provider,
            session,
            history,
            export,
        })
    }
}

pub async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(?error, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
