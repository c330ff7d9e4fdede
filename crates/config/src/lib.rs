use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

const DEFAULT_CONFIG_FILES: &[&str] = &[
    "agenthub.toml",
    "config/agenthub.toml",
    "crates/config/agenthub.toml",
    "../agenthub.toml",
    "../config/agenthub.toml",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub backend: BackendConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    pub export: ExportConfig,
}

/// Where the hub server lives and how requests to it are issued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default = "BackendConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "BackendConfig::default_user_agent")]
    pub user_agent: String,
}

impl BackendConfig {
    const fn default_request_timeout() -> u64 {
        30
    }

    fn default_user_agent() -> String {
        "agenthub-client".to_string()
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            request_timeout_seconds: Self::default_request_timeout(),
            user_agent: Self::default_user_agent(),
        }
    }
}

/// Identity provider settings.
///
/// When `session_file` is set the provider session survives a restart and is
/// picked up again by the passive resume path.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IdentityConfig {
    #[serde(default)]
    pub session_file: Option<String>,
}

/// Endpoints and scope used for document and spreadsheet export.
///
/// ```
/// use agenthub_config::ExportConfig;
///
/// let export = ExportConfig::default();
/// assert_eq!(export.scope, "https://www.googleapis.com/auth/drive.file");
/// assert_eq!(export.request_timeout_seconds, 30);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    pub scope: String,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_url: String,
    pub docs_api_url: String,
    pub sheets_api_url: String,
    pub document_link_base: String,
    pub spreadsheet_link_base: String,
    #[serde(default = "ExportConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl ExportConfig {
    const fn default_request_timeout() -> u64 {
        30
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            scope: "https://www.googleapis.com/auth/drive.file".to_string(),
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            redirect_url: "http://localhost".to_string(),
            docs_api_url: "https://docs.googleapis.com".to_string(),
            sheets_api_url: "https://sheets.googleapis.com".to_string(),
            document_link_base: "https://docs.google.com/document/d".to_string(),
            spreadsheet_link_base: "https://docs.google.com/spreadsheets/d".to_string(),
            request_timeout_seconds: Self::default_request_timeout(),
        }
    }
}

/// Load the client configuration by combining defaults, files, and environment overrides.
///
/// ```
/// use agenthub_config::load;
///
/// std::env::remove_var("AGENTHUB_CONFIG");
///
/// let config = load().expect("configuration should load with defaults");
/// assert!(!config.backend.base_url.is_empty());
/// ```
pub fn load() -> anyhow::Result<AppConfig> {
    let defaults = AppConfig::default();

    let mut builder = config::Config::builder();
    builder = builder
        .set_default("backend.base_url", defaults.backend.base_url.clone())?
        .set_default(
            "backend.request_timeout_seconds",
            i64::try_from(defaults.backend.request_timeout_seconds).unwrap_or(i64::MAX),
        )?
        .set_default("backend.user_agent", defaults.backend.user_agent.clone())?
        .set_default("export.scope", defaults.export.scope.clone())?
        .set_default("export.auth_url", defaults.export.auth_url.clone())?
        .set_default("export.token_url", defaults.export.token_url.clone())?
        .set_default("export.redirect_url", defaults.export.redirect_url.clone())?
        .set_default("export.docs_api_url", defaults.export.docs_api_url.clone())?
        .set_default(
            "export.sheets_api_url",
            defaults.export.sheets_api_url.clone(),
        )?
        .set_default(
            "export.document_link_base",
            defaults.export.document_link_base.clone(),
        )?
        .set_default(
            "export.spreadsheet_link_base",
            defaults.export.spreadsheet_link_base.clone(),
        )?
        .set_default(
            "export.request_timeout_seconds",
            i64::try_from(defaults.export.request_timeout_seconds).unwrap_or(i64::MAX),
        )?;

    let environment_overrides = config::Environment::with_prefix("AGENTHUB").separator("__");

    let mut config_file_attached = false;

    if let Ok(path) = std::env::var("AGENTHUB_CONFIG") {
        builder = builder.add_source(config::File::from(PathBuf::from(&path)));
        config_file_attached = true;
        debug!(path, "loading configuration via AGENTHUB_CONFIG");
    } else if let Ok(cwd) = std::env::current_dir() {
        let fallback = DEFAULT_CONFIG_FILES
            .iter()
            .map(|candidate| cwd.join(candidate))
            .find(|path| path.exists());

        if let Some(path) = fallback {
            debug!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(config::File::from(path));
            config_file_attached = true;
        }
    }

    if !config_file_attached {
        debug!("no configuration file found, relying on defaults and environment overrides");
    }

    builder = builder.add_source(environment_overrides);

    let cfg = builder.build().context("unable to build configuration")?;

    let mut config = cfg
        .try_deserialize::<AppConfig>()
        .context("invalid configuration")?;

    let trimmed = config.backend.base_url.trim_end_matches('/').len();
    config.backend.base_url.truncate(trimmed);

    if config
        .identity
        .session_file
        .as_deref()
        .is_some_and(|path| path.trim().is_empty())
    {
        config.identity.session_file = None;
    }

    debug!(?config, "loaded client configuration");
    Ok(config)
}
