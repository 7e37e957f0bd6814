//! Gmail adapter
//!
//! Talks to the Gmail REST API. Messages arrive as nested MIME part
//! trees with base64url-encoded bodies; the adapter walks the tree and
//! surfaces the first `text/plain` and `text/html` leaves. Read and
//! starred state map to the `UNREAD` and `STARRED` labels.

use async_trait::async_trait;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use relay_domain::{
    EmailMessage, OutgoingEmail, ProviderConfig, ProviderCredentials, RelayError, Result, SyncPage,
};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::super::{EmailAdapter, ProviderSession};
use super::build_mime_message;
use crate::errors::InfraError;

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Gmail adapter
pub struct GmailAdapter {
    client: Client,
    credentials: ProviderCredentials,
    username: Option<String>,
    api_base: String,
    token_url: String,
}

impl GmailAdapter {
    pub fn new(config: &ProviderConfig) -> Self {
        Self::with_base_urls(config, GMAIL_API_BASE, GOOGLE_TOKEN_URL)
    }

    /// Constructor with explicit endpoints, used by tests
    pub fn with_base_urls(config: &ProviderConfig, api_base: &str, token_url: &str) -> Self {
        Self {
            client: Client::new(),
            credentials: config.credentials.clone(),
            username: config.username.clone(),
            api_base: api_base.trim_end_matches('/').to_string(),
            token_url: token_url.to_string(),
        }
    }

    fn messages_url(&self) -> String {
        format!("{}/users/me/messages", self.api_base)
    }

    async fn check_response(response: reqwest::Response, context: &str) -> Result<reqwest::Response> {
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RelayError::Network(format!(
                "Gmail API error during {context} ({status}): {error_text}"
            )));
        }
        Ok(response)
    }

    async fn fetch_message(&self, id: &str) -> Result<EmailMessage> {
        let response = self
            .client
            .get(format!("{}/{}", self.messages_url(), id))
            .bearer_auth(&self.credentials.access_token)
            .query(&[("format", "full")])
            .send()
            .await
            .map_err(|e| RelayError::from(InfraError::from(e)))?;
        let response = Self::check_response(response, "message fetch").await?;

        let message: GmailMessage = response
            .json()
            .await
            .map_err(|e| RelayError::InvalidInput(format!("failed to parse Gmail message: {e}")))?;
        Ok(normalize_message(message))
    }
}

#[async_trait]
impl ProviderSession for GmailAdapter {
    async fn connect(&mut self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/users/me/profile", self.api_base))
            .bearer_auth(&self.credentials.access_token)
            .send()
            .await
            .map_err(|e| RelayError::from(InfraError::from(e)))?;

        match response.status().as_u16() {
            200..=299 => Ok(true),
            401 | 403 => Ok(false),
            status => {
                Err(RelayError::Network(format!("Gmail probe returned unexpected status {status}")))
            }
        }
    }

    async fn disconnect(&mut self) {
        // Stateless HTTP session; nothing to tear down.
    }

    fn refresh_capable(&self) -> bool {
        true
    }

    async fn refresh_token(&mut self) -> Result<ProviderCredentials> {
        let refresh_token = self
            .credentials
            .refresh_token
            .clone()
            .ok_or_else(|| RelayError::Auth("no refresh token on Gmail account".into()))?;

        let client_id = std::env::var("RELAY_GOOGLE_CLIENT_ID")
            .map_err(|_| RelayError::Auth("RELAY_GOOGLE_CLIENT_ID not set".into()))?;
        let client_secret = std::env::var("RELAY_GOOGLE_CLIENT_SECRET")
            .map_err(|_| RelayError::Auth("RELAY_GOOGLE_CLIENT_SECRET not set".into()))?;

        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| RelayError::Auth(format!("token refresh request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RelayError::Auth(format!("token refresh failed ({status}): {error_text}")));
        }

        let refreshed: GoogleTokenResponse = response
            .json()
            .await
            .map_err(|e| RelayError::Auth(format!("failed to parse token response: {e}")))?;

        self.credentials.access_token = refreshed.access_token;
        if let Some(new_refresh) = refreshed.refresh_token {
            self.credentials.refresh_token = Some(new_refresh);
        }

        debug!("refreshed Gmail access token");
        Ok(self.credentials.clone())
    }
}

#[async_trait]
impl EmailAdapter for GmailAdapter {
    async fn sync_messages(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<SyncPage<EmailMessage>> {
        let mut query: Vec<(&str, String)> = vec![("maxResults", limit.to_string())];
        if let Some(token) = cursor {
            query.push(("pageToken", token.to_string()));
        }

        let response = self
            .client
            .get(self.messages_url())
            .bearer_auth(&self.credentials.access_token)
            .query(&query)
            .send()
            .await
            .map_err(|e| RelayError::from(InfraError::from(e)))?;
        let response = Self::check_response(response, "message list").await?;

        let listing: GmailListResponse = response
            .json()
            .await
            .map_err(|e| RelayError::InvalidInput(format!("failed to parse Gmail listing: {e}")))?;

        let mut messages = Vec::new();
        for reference in listing.messages.unwrap_or_default() {
            messages.push(self.fetch_message(&reference.id).await?);
        }

        let has_more = listing.next_page_token.is_some();
        Ok(SyncPage { items: messages, cursor: listing.next_page_token, has_more })
    }

    async fn send_message(&self, email: &OutgoingEmail) -> Result<String> {
        let from = self.username.clone().unwrap_or_else(|| "me@relay.invalid".to_string());
        let mime = build_mime_message(email, &from)?;
        let raw = URL_SAFE.encode(mime.formatted());

        let response = self
            .client
            .post(format!("{}/send", self.messages_url()))
            .bearer_auth(&self.credentials.access_token)
            .json(&json!({"raw": raw}))
            .send()
            .await
            .map_err(|e| RelayError::from(InfraError::from(e)))?;
        let response = Self::check_response(response, "message send").await?;

        let sent: GmailMessageRef = response
            .json()
            .await
            .map_err(|e| RelayError::InvalidInput(format!("failed to parse send response: {e}")))?;
        Ok(sent.id)
    }

    async fn update_flags(
        &self,
        message_id: &str,
        read: Option<bool>,
        starred: Option<bool>,
    ) -> Result<()> {
        let mut add: Vec<&str> = Vec::new();
        let mut remove: Vec<&str> = Vec::new();
        match read {
            Some(true) => remove.push("UNREAD"),
            Some(false) => add.push("UNREAD"),
            None => {}
        }
        match starred {
            Some(true) => add.push("STARRED"),
            Some(false) => remove.push("STARRED"),
            None => {}
        }
        if add.is_empty() && remove.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .post(format!("{}/{}/modify", self.messages_url(), message_id))
            .bearer_auth(&self.credentials.access_token)
            .json(&json!({"addLabelIds": add, "removeLabelIds": remove}))
            .send()
            .await
            .map_err(|e| RelayError::from(InfraError::from(e)))?;
        Self::check_response(response, "flag update").await?;
        Ok(())
    }

    async fn delete_message(&self, message_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/{}", self.messages_url(), message_id))
            .bearer_auth(&self.credentials.access_token)
            .send()
            .await
            .map_err(|e| RelayError::from(InfraError::from(e)))?;
        Self::check_response(response, "message delete").await?;
        Ok(())
    }
}

/// Normalize a raw Gmail message into the canonical type
fn normalize_message(message: GmailMessage) -> EmailMessage {
    let labels = message.label_ids.unwrap_or_default();
    let read = !labels.iter().any(|label| label == "UNREAD");
    let starred = labels.iter().any(|label| label == "STARRED");

    let mut body_text = None;
    let mut body_html = None;
    let mut from = String::new();
    let mut to = Vec::new();
    let mut cc = Vec::new();
    let mut bcc = Vec::new();
    let mut subject = None;
    let mut sent_at = None;
    let mut in_reply_to = None;

    if let Some(payload) = &message.payload {
        for header in payload.headers.as_deref().unwrap_or_default() {
            match header.name.to_ascii_lowercase().as_str() {
                "from" => from = header.value.clone(),
                "to" => to = split_address_list(&header.value),
                "cc" => cc = split_address_list(&header.value),
                "bcc" => bcc = split_address_list(&header.value),
                "subject" => subject = Some(header.value.clone()),
                "in-reply-to" => in_reply_to = Some(header.value.clone()),
                "date" => {
                    sent_at = DateTime::parse_from_rfc2822(&header.value)
                        .ok()
                        .map(|parsed| parsed.with_timezone(&Utc));
                }
                _ => {}
            }
        }
        extract_bodies(payload, &mut body_text, &mut body_html);
    }

    let received_at = message
        .internal_date
        .and_then(|millis| millis.parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis);

    EmailMessage {
        id: message.id,
        thread_id: message.thread_id,
        from,
        to,
        cc,
        bcc,
        subject,
        body_text,
        body_html,
        labels,
        read,
        starred,
        sent_at,
        received_at,
        in_reply_to,
    }
}

/// Depth-first walk of the MIME part tree; the first matching leaf of
/// each content type wins.
fn extract_bodies(part: &GmailPart, text: &mut Option<String>, html: &mut Option<String>) {
    match part.mime_type.as_deref() {
        Some("text/plain") if text.is_none() => {
            *text = part.body.as_ref().and_then(|body| body.data.as_deref()).and_then(decode_body);
        }
        Some("text/html") if html.is_none() => {
            *html = part.body.as_ref().and_then(|body| body.data.as_deref()).and_then(decode_body);
        }
        _ => {}
    }
    for nested in part.parts.as_deref().unwrap_or_default() {
        extract_bodies(nested, text, html);
    }
}

fn decode_body(data: &str) -> Option<String> {
    let bytes = URL_SAFE.decode(data).or_else(|_| URL_SAFE_NO_PAD.decode(data)).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

fn split_address_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|address| !address.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Deserialize)]
struct GmailListResponse {
    messages: Option<Vec<GmailMessageRef>>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GmailMessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GmailMessage {
    id: String,
    #[serde(rename = "threadId")]
    thread_id: Option<String>,
    #[serde(rename = "labelIds")]
    label_ids: Option<Vec<String>>,
    #[serde(rename = "internalDate")]
    internal_date: Option<String>,
    payload: Option<GmailPart>,
}

#[derive(Debug, Deserialize)]
struct GmailPart {
    #[serde(rename = "mimeType")]
    mime_type: Option<String>,
    headers: Option<Vec<GmailHeader>>,
    body: Option<GmailBody>,
    parts: Option<Vec<GmailPart>>,
}

#[derive(Debug, Deserialize)]
struct GmailHeader {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct GmailBody {
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
}
