//! Microsoft Graph (O365) retrieval — REST alternative to IMAP.
//!
//! Lists unread inbox messages that carry attachments, downloads the PDF
//! ones, records them, and marks the messages read. Authentication is a
//! caller-supplied bearer token; token acquisition (device code, client
//! credentials) is outside this crate's scope.

use std::path::Path;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channels::save_attachment;
use crate::error::{EmailError, Error};
use crate::model::FetchedDocument;
use crate::store::Database;

/// Default Graph API root.
const DEFAULT_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Page size for the unread-message listing.
const PAGE_SIZE: &str = "25";

/// Graph configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub access_token: SecretString,
    pub base_url: String,
}

impl GraphConfig {
    /// Build config from environment variables.
    /// Returns `None` if `GRAPH_ACCESS_TOKEN` is not set (source disabled).
    pub fn from_env() -> Option<Self> {
        let access_token = SecretString::from(std::env::var("GRAPH_ACCESS_TOKEN").ok()?);
        let base_url =
            std::env::var("GRAPH_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Some(Self {
            access_token,
            base_url,
        })
    }
}

/// Microsoft Graph mail client.
pub struct GraphClient {
    config: GraphConfig,
    http: reqwest::Client,
}

impl GraphClient {
    pub fn new(config: GraphConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<Value, EmailError> {
        let response = self
            .http
            .get(url)
            .query(query)
            .bearer_auth(self.config.access_token.expose_secret())
            .send()
            .await
            .map_err(|e| EmailError::Http(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(EmailError::Auth("Graph token rejected".into()));
        }
        if !status.is_success() {
            return Err(EmailError::Http(format!("GET {url}: HTTP {status}")));
        }

        response
            .json()
            .await
            .map_err(|e| EmailError::Http(e.to_string()))
    }

    /// Mark a message read so it drops out of the next listing.
    async fn mark_read(&self, message_id: &str) -> Result<(), EmailError> {
        let url = format!("{}/me/messages/{message_id}", self.config.base_url);
        let response = self
            .http
            .patch(&url)
            .bearer_auth(self.config.access_token.expose_secret())
            .json(&serde_json::json!({ "isRead": true }))
            .send()
            .await
            .map_err(|e| EmailError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EmailError::Http(format!(
                "PATCH {url}: HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Fetch unread messages with attachments, saving PDFs to the
    /// invoices directory. Returns the number of attachments saved.
    pub async fn fetch_unread(
        &self,
        db: &Arc<dyn Database>,
        invoices_dir: &Path,
    ) -> Result<usize, Error> {
        let url = format!("{}/me/mailFolders/inbox/messages", self.config.base_url);
        let body = self
            .get_json(
                &url,
                &[
                    ("$filter", "isRead eq false and hasAttachments eq true"),
                    ("$select", "id,subject,from,receivedDateTime"),
                    ("$top", PAGE_SIZE),
                ],
            )
            .await
            .map_err(Error::from)?;

        let messages = body
            .get("value")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        debug!(count = messages.len(), "Graph listed unread messages");

        let mut saved = 0usize;
        for message in &messages {
            let Some(message_id) = message.get("id").and_then(|v| v.as_str()) else {
                continue;
            };

            if db.has_document(message_id).await? {
                continue;
            }

            let sender = message
                .pointer("/from/emailAddress/address")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();
            let subject = message
                .get("subject")
                .and_then(|v| v.as_str())
                .map(String::from);
            let received_at = message
                .get("receivedDateTime")
                .and_then(|v| v.as_str())
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(Utc::now);

            let attachments_url = format!(
                "{}/me/messages/{message_id}/attachments",
                self.config.base_url
            );
            let attachments = self
                .get_json(&attachments_url, &[])
                .await
                .map_err(Error::from)?;
            let attachments = attachments
                .get("value")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();

            let mut idx = 0usize;
            for attachment in &attachments {
                let Some((name, bytes)) = decode_pdf_attachment(attachment) else {
                    continue;
                };

                let path = match save_attachment(invoices_dir, &name, &bytes).await {
                    Ok(path) => path,
                    Err(e) => {
                        warn!(name = %name, "Failed to save attachment: {e}");
                        continue;
                    }
                };

                let external_id = if idx == 0 {
                    message_id.to_string()
                } else {
                    format!("{message_id}#{idx}")
                };
                idx += 1;

                db.record_document(&FetchedDocument {
                    id: Uuid::new_v4(),
                    external_id,
                    source: "graph".into(),
                    sender: sender.clone(),
                    subject: subject.clone(),
                    received_at,
                    attachment_path: path.to_string_lossy().into_owned(),
                    fetched_at: Utc::now(),
                })
                .await?;

                info!(sender = %sender, path = %path.display(), "Invoice attachment saved");
                saved += 1;
            }

            if let Err(e) = self.mark_read(message_id).await {
                warn!(message_id = %message_id, "Failed to mark message read: {e}");
            }
        }

        Ok(saved)
    }
}

/// Decode a Graph file attachment when it looks like a PDF.
fn decode_pdf_attachment(attachment: &Value) -> Option<(String, Vec<u8>)> {
    let is_file = attachment
        .get("@odata.type")
        .and_then(|v| v.as_str())
        .is_some_and(|t| t == "#microsoft.graph.fileAttachment");
    if !is_file {
        return None;
    }

    let name = attachment
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or("attachment.pdf")
        .to_string();
    let by_type = attachment
        .get("contentType")
        .and_then(|v| v.as_str())
        .is_some_and(|t| t.eq_ignore_ascii_case("application/pdf"));
    let by_name = name.to_lowercase().ends_with(".pdf");
    if !by_type && !by_name {
        return None;
    }

    let content = attachment.get("contentBytes").and_then(|v| v.as_str())?;
    let bytes = STANDARD.decode(content).ok()?;
    Some((name, bytes))
}
