use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use agenthub_config::ExportConfig;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::{BootstrapError, ExportError};
use crate::issuer::ExportGrant;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedDocument {
    document_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedSpreadsheet {
    spreadsheet_id: String,
}

/// Request client for the document and spreadsheet APIs. Holds the grant.
pub(crate) struct WorkspaceClient {
    http: Client,
    api_key: Option<String>,
    docs_api: Url,
    sheets_api: Url,
    document_link_base: String,
    spreadsheet_link_base: String,
    grant: Mutex<Option<ExportGrant>>,
}

impl WorkspaceClient {
    pub(crate) fn new(
        config: &ExportConfig,
        api_key: Option<String>,
    ) -> Result<Self, BootstrapError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(BootstrapError::Client)?;

        Ok(Self {
            http,
            api_key,
            docs_api: base_url(&config.docs_api_url)?,
            sheets_api: base_url(&config.sheets_api_url)?,
            document_link_base: config.document_link_base.trim_end_matches('/').to_owned(),
            spreadsheet_link_base: config.spreadsheet_link_base.trim_end_matches('/').to_owned(),
            grant: Mutex::new(None),
        })
    }

    fn lock_grant(&self) -> MutexGuard<'_, Option<ExportGrant>> {
        self.grant.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn has_grant(&self) -> bool {
        self.lock_grant().is_some()
    }

    pub(crate) fn store_grant(&self, grant: ExportGrant) {
        *self.lock_grant() = Some(grant);
    }

    pub(crate) fn discard_grant(&self) {
        if self.lock_grant().take().is_some() {
            info!("export grant discarded");
        }
    }

    pub(crate) async fn create_document(
        &self,
        title: &str,
        content: &str,
    ) -> Result<String, ExportError> {
        let created: CreatedDocument = self
            .send(
                self.request(Method::POST, &self.docs_api, &["v1", "documents"])?
                    .json(&json!({ "title": title })),
            )
            .await?;
        let id = created.document_id;
        debug!(document_id = %id, "document created");

        if !content.is_empty() {
            let batch = format!("{id}:batchUpdate");
            let _: serde_json::Value = self
                .send(
                    self.request(Method::POST, &self.docs_api, &["v1", "documents", &batch])?
                        .json(&json!({
                            "requests": [{
                                "insertText": {
                                    "location": { "index": 1 },
                                    "text": content,
                                }
                            }]
                        })),
                )
                .await?;
        }

        let link = format!("{}/{id}/edit", self.document_link_base);
        info!(document_id = %id, "document exported");
        Ok(link)
    }

    pub(crate) async fn create_spreadsheet(
        &self,
        title: &str,
        rows: &[Vec<String>],
    ) -> Result<String, ExportError> {
        let created: CreatedSpreadsheet = self
            .send(
                self.request(Method::POST, &self.sheets_api, &["v4", "spreadsheets"])?
                    .json(&json!({ "properties": { "title": title } })),
            )
            .await?;
        let id = created.spreadsheet_id;
        debug!(spreadsheet_id = %id, "spreadsheet created");

        if !rows.is_empty() {
            let _: serde_json::Value = self
                .send(
                    self.request(
                        Method::PUT,
                        &self.sheets_api,
                        &["v4", "spreadsheets", &id, "values", "Sheet1!A1"],
                    )?
                    .query(&[("valueInputOption", "RAW")])
                    .json(&json!({ "values": rows })),
                )
                .await?;
        }

        let link = format!("{}/{id}/edit", self.spreadsheet_link_base);
        info!(spreadsheet_id = %id, rows = rows.len(), "spreadsheet exported");
        Ok(link)
    }

    fn request(
        &self,
        method: Method,
        base: &Url,
        segments: &[&str],
    ) -> Result<RequestBuilder, ExportError> {
        let token = self
            .lock_grant()
            .as_ref()
            .map(|grant| grant.access_token.clone())
            .ok_or(ExportError::Unauthorized)?;

        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|_| ExportError::UnexpectedResponse(format!("{base} cannot hold a path")))?
            .pop_if_empty()
            .extend(segments);

        let mut builder = self.http.request(method, url).bearer_auth(token);
        if let Some(key) = &self.api_key {
            builder = builder.query(&[("key", key.as_str())]);
        }
        Ok(builder)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ExportError> {
        let response = request.send().await?;
        let response = self.check(response).await?;
        response
            .json()
            .await
            .map_err(|error| ExportError::UnexpectedResponse(error.to_string()))
    }

    async fn check(&self, response: Response) -> Result<Response, ExportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            warn!(%status, "export api rejected the grant");
            self.discard_grant();
            return Err(ExportError::Unauthorized);
        }

        let body = response.text().await.unwrap_or_default();
        warn!(%status, "export api call failed");
        Err(ExportError::UnexpectedResponse(format!("{status}: {body}")))
    }
}

fn base_url(raw: &str) -> Result<Url, BootstrapError> {
    let url = Url::parse(raw).map_err(|error| BootstrapError::Endpoint {
        url: raw.to_owned(),
        reason: error.to_string(),
    })?;
    if url.cannot_be_a_base() {
        return Err(BootstrapError::Endpoint {
            url: raw.to_owned(),
            reason: "not a base url".to_owned(),
        });
    }
    Ok(url)
}
