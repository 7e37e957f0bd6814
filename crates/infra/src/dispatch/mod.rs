//! Infrastructure implementations of the engine's outbound ports.

use std::sync::Arc;

use async_trait::async_trait;
use relay_core::{EmailDispatcher, HttpCallOutcome, HttpDispatcher, OutboundRequest};
use relay_domain::{OutgoingEmail, ProviderConfig, RelayError, Result};
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::InfraError;
use crate::gateway::ProviderGateway;
use crate::http::HttpClient;

/// `HttpDispatcher` backed by the retrying [`HttpClient`].
///
/// Any HTTP response is a successful dispatch; status policy stays with
/// the engine. Response bodies are surfaced as JSON when they parse,
/// else as raw text.
pub struct ReqwestHttpDispatcher {
    client: HttpClient,
}

impl ReqwestHttpDispatcher {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpDispatcher for ReqwestHttpDispatcher {
    async fn dispatch(&self, request: &OutboundRequest) -> Result<HttpCallOutcome> {
        let method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| RelayError::InvalidInput(format!("invalid HTTP method: {}", request.method)))?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = self.client.send(builder).await?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| RelayError::from(InfraError::from(e)))?;
        let body =
            serde_json::from_str::<Value>(&text).unwrap_or_else(|_| Value::String(text));

        debug!(url = %request.url, status, "workflow HTTP request dispatched");
        Ok(HttpCallOutcome { status, body })
    }
}

/// `EmailDispatcher` that routes through the provider gateway using a
/// fixed outbound account.
pub struct GatewayEmailDispatcher {
    gateway: Arc<ProviderGateway>,
    account: ProviderConfig,
}

impl GatewayEmailDispatcher {
    pub fn new(gateway: Arc<ProviderGateway>, account: ProviderConfig) -> Self {
        Self { gateway, account }
    }
}

#[async_trait]
impl EmailDispatcher for GatewayEmailDispatcher {
    async fn send(&self, email: &OutgoingEmail) -> Result<String> {
        let outcome = self.gateway.send_email(&self.account, email).await?;
        if outcome.refreshed.is_some() {
            // The dispatcher has no credential storage; the host owns it.
            warn!(
                account = %self.account.id,
                "outbound account credentials were refreshed mid-send; persist them to avoid refresh churn"
            );
        }
        Ok(outcome.value)
    }
}

/// Stub `EmailDispatcher` that only logs.
///
/// Stands in for the gateway in hosts without a configured outbound
/// account, and in tests.
#[derive(Default)]
pub struct LoggingEmailDispatcher;

impl LoggingEmailDispatcher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EmailDispatcher for LoggingEmailDispatcher {
    async fn send(&self, email: &OutgoingEmail) -> Result<String> {
        let id = format!("logged-{}", Uuid::new_v4());
        info!(
            to = ?email.to,
            subject = %email.subject,
            message_id = %id,
            "email dispatch stubbed to log"
        );
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn dispatcher() -> ReqwestHttpDispatcher {
        let client = HttpClient::builder()
            .max_attempts(1)
            .base_backoff(Duration::from_millis(1))
            .build()
            .expect("client builds");
        ReqwestHttpDispatcher::new(client)
    }

    #[tokio::test]
    async fn json_bodies_are_parsed_and_non_json_kept_as_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/json"))
            .and(header("X-Trace", "t-1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/text"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let dispatcher = dispatcher();

        let json_outcome = dispatcher
            .dispatch(&OutboundRequest {
                method: "post".to_string(),
                url: format!("{}/json", server.uri()),
                headers: [("X-Trace".to_string(), "t-1".to_string())].into_iter().collect(),
                body: Some(serde_json::json!({"payload": 1})),
            })
            .await
            .expect("dispatch succeeds");
        assert_eq!(json_outcome.status, 200);
        assert_eq!(json_outcome.body["ok"], serde_json::json!(true));

        let text_outcome = dispatcher
            .dispatch(&OutboundRequest {
                method: "GET".to_string(),
                url: format!("{}/text", server.uri()),
                headers: Default::default(),
                body: None,
            })
            .await
            .expect("non-2xx is still a dispatched response");
        assert_eq!(text_outcome.status, 502);
        assert_eq!(text_outcome.body, Value::String("bad gateway".to_string()));
    }

    #[tokio::test]
    async fn invalid_methods_fail_fast() {
        let dispatcher = dispatcher();
        let err = dispatcher
            .dispatch(&OutboundRequest {
                method: "NOT A METHOD".to_string(),
                url: "http://localhost/".to_string(),
                headers: Default::default(),
                body: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::InvalidInput(_)));
    }
}
