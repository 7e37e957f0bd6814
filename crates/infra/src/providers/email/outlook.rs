//! Microsoft Graph mail adapter
//!
//! Messages come back as flat JSON with a single typed body; sending
//! goes through a draft so Graph reports the assigned message id.
//! Continuation uses the `@odata.nextLink` URL verbatim as the cursor.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_domain::{
    EmailMessage, OutgoingEmail, ProviderConfig, ProviderCredentials, RelayError, Result, SyncPage,
};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::super::{EmailAdapter, ProviderSession};
use crate::errors::InfraError;

const MICROSOFT_GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";
const MICROSOFT_TOKEN_URL: &str =
    "https://login.microsoftonline.com/common/oauth2/v2.0/token";

/// Microsoft Graph mail adapter
pub struct OutlookMailAdapter {
    client: Client,
    credentials: ProviderCredentials,
    api_base: String,
    token_url: String,
}

impl OutlookMailAdapter {
    pub fn new(config: &ProviderConfig) -> Self {
        Self::with_base_urls(config, MICROSOFT_GRAPH_API_BASE, MICROSOFT_TOKEN_URL)
    }

    /// Constructor with explicit endpoints, used by tests
    pub fn with_base_urls(config: &ProviderConfig, api_base: &str, token_url: &str) -> Self {
        Self {
            client: Client::new(),
            credentials: config.credentials.clone(),
            api_base: api_base.trim_end_matches('/').to_string(),
            token_url: token_url.to_string(),
        }
    }

    fn messages_url(&self) -> String {
        format!("{}/me/messages", self.api_base)
    }

    async fn check_response(response: reqwest::Response, context: &str) -> Result<reqwest::Response> {
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RelayError::Network(format!(
                "Microsoft API error during {context} ({status}): {error_text}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl ProviderSession for OutlookMailAdapter {
    async fn connect(&mut self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/me", self.api_base))
            .bearer_auth(&self.credentials.access_token)
            .send()
            .await
            .map_err(|e| RelayError::from(InfraError::from(e)))?;

        match response.status().as_u16() {
            200..=299 => Ok(true),
            401 | 403 => Ok(false),
            status => Err(RelayError::Network(format!(
                "Microsoft API probe returned unexpected status {status}"
            ))),
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
            .ok_or_else(|| RelayError::Auth("no refresh token on Outlook account".into()))?;

        let client_id = std::env::var("RELAY_MICROSOFT_CLIENT_ID")
            .map_err(|_| RelayError::Auth("RELAY_MICROSOFT_CLIENT_ID not set".into()))?;
        let client_secret = std::env::var("RELAY_MICROSOFT_CLIENT_SECRET")
            .map_err(|_| RelayError::Auth("RELAY_MICROSOFT_CLIENT_SECRET not set".into()))?;

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

        let refreshed: MicrosoftTokenResponse = response
            .json()
            .await
            .map_err(|e| RelayError::Auth(format!("failed to parse token response: {e}")))?;

        self.credentials.access_token = refreshed.access_token;
        // Microsoft rotates refresh tokens on every grant.
        if let Some(new_refresh) = refreshed.refresh_token {
            self.credentials.refresh_token = Some(new_refresh);
        }

        debug!("refreshed Outlook access token");
        Ok(self.credentials.clone())
    }
}

#[async_trait]
impl EmailAdapter for OutlookMailAdapter {
    async fn sync_messages(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<SyncPage<EmailMessage>> {
        // A continuation cursor is a complete nextLink URL; follow it as-is.
        let request = match cursor {
            Some(next_link) => self.client.get(next_link),
            None => self
                .client
                .get(self.messages_url())
                .query(&[("$top", limit.to_string()), ("$orderby", "receivedDateTime desc".into())]),
        };

        let response = request
            .bearer_auth(&self.credentials.access_token)
            .send()
            .await
            .map_err(|e| RelayError::from(InfraError::from(e)))?;
        let response = Self::check_response(response, "message list").await?;

        let listing: GraphMessagesResponse = response.json().await.map_err(|e| {
            RelayError::InvalidInput(format!("failed to parse Microsoft response: {e}"))
        })?;

        let messages = listing.value.into_iter().map(normalize_message).collect();
        let has_more = listing.next_link.is_some();
        Ok(SyncPage { items: messages, cursor: listing.next_link, has_more })
    }

    async fn send_message(&self, email: &OutgoingEmail) -> Result<String> {
        // Create a draft first so the assigned id can be returned.
        let response = self
            .client
            .post(self.messages_url())
            .bearer_auth(&self.credentials.access_token)
            .json(&outgoing_payload(email))
            .send()
            .await
            .map_err(|e| RelayError::from(InfraError::from(e)))?;
        let response = Self::check_response(response, "draft create").await?;

        let draft: GraphMessageRef = response
            .json()
            .await
            .map_err(|e| RelayError::InvalidInput(format!("failed to parse draft response: {e}")))?;

        let response = self
            .client
            .post(format!("{}/{}/send", self.messages_url(), draft.id))
            .bearer_auth(&self.credentials.access_token)
            .send()
            .await
            .map_err(|e| RelayError::from(InfraError::from(e)))?;
        Self::check_response(response, "message send").await?;

        Ok(draft.id)
    }

    async fn update_flags(
        &self,
        message_id: &str,
        read: Option<bool>,
        starred: Option<bool>,
    ) -> Result<()> {
        let mut patch = serde_json::Map::new();
        if let Some(read) = read {
            patch.insert("isRead".into(), json!(read));
        }
        if let Some(starred) = starred {
            let status = if starred { "flagged" } else { "notFlagged" };
            patch.insert("flag".into(), json!({"flagStatus": status}));
        }
        if patch.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .patch(format!("{}/{}", self.messages_url(), message_id))
            .bearer_auth(&self.credentials.access_token)
            .json(&serde_json::Value::Object(patch))
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

/// Normalize a raw Graph message into the canonical type
fn normalize_message(message: GraphMessage) -> EmailMessage {
    let (body_text, body_html) = match message.body {
        Some(body) if body.content_type.as_deref() == Some("html") => {
            // Keep the preview as the plain-text rendition when Graph
            // only provides HTML.
            (message.body_preview.clone(), body.content)
        }
        Some(body) => (body.content, None),
        None => (message.body_preview.clone(), None),
    };

    EmailMessage {
        id: message.id,
        thread_id: message.conversation_id,
        from: message
            .from
            .and_then(|recipient| recipient.email_address.address)
            .unwrap_or_default(),
        to: collect_addresses(message.to_recipients),
        cc: collect_addresses(message.cc_recipients),
        bcc: collect_addresses(message.bcc_recipients),
        subject: message.subject,
        body_text,
        body_html,
        labels: message.categories.unwrap_or_default(),
        read: message.is_read.unwrap_or(false),
        starred: message
            .flag
            .and_then(|flag| flag.flag_status)
            .map(|status| status == "flagged")
            .unwrap_or(false),
        sent_at: parse_graph_instant(message.sent_date_time.as_deref()),
        received_at: parse_graph_instant(message.received_date_time.as_deref()),
        in_reply_to: None,
    }
}

fn collect_addresses(recipients: Option<Vec<GraphRecipient>>) -> Vec<String> {
    recipients
        .unwrap_or_default()
        .into_iter()
        .filter_map(|recipient| recipient.email_address.address)
        .filter(|address| !address.trim().is_empty())
        .collect()
}

fn parse_graph_instant(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
}

fn outgoing_payload(email: &OutgoingEmail) -> serde_json::Value {
    let recipients = |addresses: &[String]| -> Vec<serde_json::Value> {
        addresses
            .iter()
            .map(|address| json!({"emailAddress": {"address": address}}))
            .collect()
    };

    let (content_type, content) = match (&email.body_html, &email.body_text) {
        (Some(html), _) => ("html", html.clone()),
        (None, Some(text)) => ("text", text.clone()),
        (None, None) => ("text", String::new()),
    };

    json!({
        "subject": email.subject,
        "body": {"contentType": content_type, "content": content},
        "toRecipients": recipients(&email.to),
        "ccRecipients": recipients(&email.cc),
        "bccRecipients": recipients(&email.bcc),
    })
}

#[derive(Debug, Deserialize)]
struct GraphMessagesResponse {
    #[serde(default)]
    value: Vec<GraphMessage>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphMessage {
    id: String,
    #[serde(rename = "conversationId")]
    conversation_id: Option<String>,
    subject: Option<String>,
    #[serde(rename = "bodyPreview")]
    body_preview: Option<String>,
    body: Option<GraphBody>,
    from: Option<GraphRecipient>,
    #[serde(rename = "toRecipients")]
    to_recipients: Option<Vec<GraphRecipient>>,
    #[serde(rename = "ccRecipients")]
    cc_recipients: Option<Vec<GraphRecipient>>,
    #[serde(rename = "bccRecipients")]
    bcc_recipients: Option<Vec<GraphRecipient>>,
    categories: Option<Vec<String>>,
    #[serde(rename = "isRead")]
    is_read: Option<bool>,
    flag: Option<GraphFlag>,
    #[serde(rename = "sentDateTime")]
    sent_date_time: Option<String>,
    #[serde(rename = "receivedDateTime")]
    received_date_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphBody {
    #[serde(rename = "contentType")]
    content_type: Option<String>,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphRecipient {
    #[serde(rename = "emailAddress")]
    email_address: GraphEmailAddress,
}

#[derive(Debug, Deserialize)]
struct GraphEmailAddress {
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphFlag {
    #[serde(rename = "flagStatus")]
    flag_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphMessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MicrosoftTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use relay_domain::ProviderKind;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn test_config() -> ProviderConfig {
        ProviderConfig {
            id: "acct-outlook".to_string(),
            kind: ProviderKind::OutlookMail,
            credentials: ProviderCredentials {
                access_token: "test-token".to_string(),
                refresh_token: Some("refresh".to_string()),
            },
            username: None,
            calendar_id: None,
            caldav_url: None,
            imap: None,
            smtp: None,
        }
    }

    fn adapter_for(server: &MockServer) -> OutlookMailAdapter {
        OutlookMailAdapter::with_base_urls(
            &test_config(),
            &server.uri(),
            &format!("{}/token", server.uri()),
        )
    }

    #[tokio::test]
    async fn html_bodies_keep_the_preview_as_plain_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": [
                    {
                        "id": "msg-1",
                        "conversationId": "conv-1",
                        "subject": "Numbers",
                        "bodyPreview": "see attached",
                        "body": {"contentType": "html", "content": "<p>see attached</p>"},
                        "from": {"emailAddress": {"address": "grace@example.com"}},
                        "toRecipients": [{"emailAddress": {"address": "ada@example.com"}}],
                        "isRead": true,
                        "flag": {"flagStatus": "flagged"},
                        "receivedDateTime": "2024-03-05T12:00:00Z"
                    }
                ]
            })))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let page = adapter.sync_messages(None, 25).await.expect("sync succeeds");

        let message = &page.items[0];
        assert_eq!(message.body_html.as_deref(), Some("<p>see attached</p>"));
        assert_eq!(message.body_text.as_deref(), Some("see attached"));
        assert_eq!(message.from, "grace@example.com");
        assert!(message.read);
        assert!(message.starred);
        assert_eq!(message.thread_id.as_deref(), Some("conv-1"));
        assert!(message.received_at.is_some());
    }

    #[tokio::test]
    async fn sending_creates_a_draft_then_sends_it() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/me/messages"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": "draft-1"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/me/messages/draft-1/send"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let email = OutgoingEmail {
            to: vec!["ada@example.com".to_string()],
            subject: "Hello".to_string(),
            body_text: Some("Hi".to_string()),
            ..OutgoingEmail::default()
        };

        let id = adapter.send_message(&email).await.expect("send succeeds");
        assert_eq!(id, "draft-1");
    }
}
