use std::fmt;

use agenthub_config::ExportConfig;
use async_trait::async_trait;
use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, CsrfToken, PkceCodeChallenge, RedirectUrl,
    Scope, TokenResponse, TokenUrl,
};
use tracing::{debug, info, warn};

use crate::error::{BootstrapError, ConsentError, ExportError};

/// What the user is asked to approve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentRequest {
    pub url: String,
    pub state: String,
}

/// Authorization code handed back by the redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentResponse {
    pub code: String,
    pub state: String,
}

impl ConsentResponse {
    /// Read the redirect the authorization server sent the browser to.
    ///
    /// A bare authorization code is accepted as answering `issued_state`.
    ///
    /// ```
    /// use agenthub_export::{ConsentError, ConsentResponse};
    ///
    /// let response =
    ///     ConsentResponse::from_redirect("http://localhost/?state=s1&code=c1", "s1").unwrap();
    /// assert_eq!(response.code, "c1");
    ///
    /// let denied = ConsentResponse::from_redirect("http://localhost/?error=access_denied", "s1");
    /// assert_eq!(denied, Err(ConsentError::Denied));
    /// ```
    pub fn from_redirect(input: &str, issued_state: &str) -> Result<Self, ConsentError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ConsentError::Denied);
        }
        if !input.contains("://") {
            return Ok(Self {
                code: input.to_owned(),
                state: issued_state.to_owned(),
            });
        }

        let url = oauth2::url::Url::parse(input)
            .map_err(|error| ConsentError::Provider(format!("unreadable redirect: {error}")))?;
        let mut code = None;
        let mut state = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                "error" if value == "access_denied" => return Err(ConsentError::Denied),
                "error" => return Err(ConsentError::Provider(value.into_owned())),
                _ => {}
            }
        }

        Ok(Self {
            code: code.ok_or_else(|| ConsentError::Provider("redirect carried no code".into()))?,
            state: state.unwrap_or_default(),
        })
    }
}

/// Interactive consent step. May wait on the user indefinitely.
#[async_trait]
pub trait ConsentPrompt: Send + Sync {
    async fn authorize(&self, request: ConsentRequest) -> Result<ConsentResponse, ConsentError>;
}

/// Access token for the export scope. Valid until a call is rejected.
#[derive(Clone, PartialEq, Eq)]
pub struct ExportGrant {
    pub access_token: String,
    pub scope: String,
}

impl fmt::Debug for ExportGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportGrant")
            .field("access_token", &"<redacted>")
            .field("scope", &self.scope)
            .finish()
    }
}

/// Authorization-code + PKCE flow for a public client.
pub(crate) struct TokenIssuer {
    client: BasicClient,
    scope: String,
}

impl TokenIssuer {
    pub(crate) fn new(config: &ExportConfig, client_id: &str) -> Result<Self, BootstrapError> {
        let auth_url = AuthUrl::new(config.auth_url.clone())
            .map_err(|error| endpoint_error(&config.auth_url, error))?;
        let token_url = TokenUrl::new(config.token_url.clone())
            .map_err(|error| endpoint_error(&config.token_url, error))?;
        let redirect_url = RedirectUrl::new(config.redirect_url.clone())
            .map_err(|error| endpoint_error(&config.redirect_url, error))?;

        let client = BasicClient::new(
            ClientId::new(client_id.to_owned()),
            None,
            auth_url,
            Some(token_url),
        )
        .set_auth_type(AuthType::RequestBody)
        .set_redirect_uri(redirect_url);

        Ok(Self {
            client,
            scope: config.scope.clone(),
        })
    }

    pub(crate) async fn request_access_token(
        &self,
        consent: &dyn ConsentPrompt,
    ) -> Result<ExportGrant, ExportError> {
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
        let (url, state) = self
            .client
            .authorize_url(CsrfToken::new_random)
            .add_scope(Scope::new(self.scope.clone()))
            .add_extra_param("prompt", "consent")
            .set_pkce_challenge(challenge)
            .url();

        debug!(scope = %self.scope, "requesting export consent");
        let response = consent
            .authorize(ConsentRequest {
                url: url.to_string(),
                state: state.secret().clone(),
            })
            .await
            .map_err(|error| {
                warn!(%error, "export consent not granted");
                error
            })?;

        if response.state != *state.secret() {
            warn!("export consent returned a foreign state");
            return Err(ExportError::StateMismatch);
        }

        let token = self
            .client
            .exchange_code(AuthorizationCode::new(response.code))
            .set_pkce_verifier(verifier)
            .request_async(async_http_client)
            .await
            .map_err(|error| ExportError::TokenExchange(error.to_string()))?;

        info!(scope = %self.scope, "export grant issued");
        Ok(ExportGrant {
            access_token: token.access_token().secret().clone(),
            scope: self.scope.clone(),
        })
    }
}

fn endpoint_error(url: &str, error: impl fmt::Display) -> BootstrapError {
    BootstrapError::Endpoint {
        url: url.to_owned(),
        reason: error.to_string(),
    }
}
