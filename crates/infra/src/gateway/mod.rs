//! Provider gateway - adapter selection and auth recovery
//!
//! The only sync-layer surface the host application calls. Every
//! operation selects an adapter from the account configuration,
//! performs the connect probe, and on auth failure runs exactly one
//! token-refresh-and-reconnect cycle before giving up. The gateway
//! never loops: callers that want polling reconnection re-invoke it.
//!
//! The caller's `ProviderConfig` is never mutated; rotated credentials
//! come back on the [`GatewayOutcome`] so the host can persist them
//! before the next sync cycle.

use chrono::{DateTime, Utc};
use relay_domain::{
    CalendarEvent, CalendarEventDraft, EmailMessage, OutgoingEmail, ProviderConfig,
    ProviderCredentials, RelayError, Result, SyncPage,
};
use tracing::{info, instrument, warn};

use crate::providers::{
    create_calendar_adapter, create_email_adapter, CalendarAdapter, EmailAdapter, ProviderSession,
    SyncWindow,
};

/// Result of a gateway operation.
///
/// `refreshed` carries rotated credentials when the call recovered from
/// an auth failure; the host must persist them to avoid refresh churn.
#[derive(Debug)]
pub struct GatewayOutcome<T> {
    pub value: T,
    pub refreshed: Option<ProviderCredentials>,
}

/// Provider gateway
#[derive(Default)]
pub struct ProviderGateway;

impl ProviderGateway {
    pub fn new() -> Self {
        Self
    }

    /// Fetch one page of calendar events in the window.
    #[instrument(skip(self, config), fields(account = %config.id, provider = %config.kind))]
    pub async fn sync_calendar(
        &self,
        config: &ProviderConfig,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cursor: Option<&str>,
    ) -> Result<GatewayOutcome<SyncPage<CalendarEvent>>> {
        let (adapter, refreshed) = self.connect_calendar(config).await?;
        let page = adapter.sync_events(SyncWindow { start, end }, cursor).await?;
        Ok(GatewayOutcome { value: page, refreshed })
    }

    /// Create a calendar event; returns the provider event id.
    #[instrument(skip(self, config, draft), fields(account = %config.id, provider = %config.kind))]
    pub async fn create_calendar_event(
        &self,
        config: &ProviderConfig,
        draft: &CalendarEventDraft,
    ) -> Result<GatewayOutcome<String>> {
        let (adapter, refreshed) = self.connect_calendar(config).await?;
        let id = adapter.create_event(draft).await?;
        Ok(GatewayOutcome { value: id, refreshed })
    }

    /// Patch a calendar event.
    #[instrument(skip(self, config, draft), fields(account = %config.id, provider = %config.kind))]
    pub async fn update_calendar_event(
        &self,
        config: &ProviderConfig,
        event_id: &str,
        draft: &CalendarEventDraft,
    ) -> Result<GatewayOutcome<()>> {
        let (adapter, refreshed) = self.connect_calendar(config).await?;
        adapter.update_event(event_id, draft).await?;
        Ok(GatewayOutcome { value: (), refreshed })
    }

    /// Delete a calendar event.
    #[instrument(skip(self, config), fields(account = %config.id, provider = %config.kind))]
    pub async fn delete_calendar_event(
        &self,
        config: &ProviderConfig,
        event_id: &str,
    ) -> Result<GatewayOutcome<()>> {
        let (adapter, refreshed) = self.connect_calendar(config).await?;
        adapter.delete_event(event_id).await?;
        Ok(GatewayOutcome { value: (), refreshed })
    }

    /// Fetch one page of mailbox messages.
    #[instrument(skip(self, config), fields(account = %config.id, provider = %config.kind))]
    pub async fn sync_email_account(
        &self,
        config: &ProviderConfig,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<GatewayOutcome<SyncPage<EmailMessage>>> {
        let (adapter, refreshed) = self.connect_email(config).await?;
        let page = adapter.sync_messages(cursor, limit).await?;
        Ok(GatewayOutcome { value: page, refreshed })
    }

    /// Send a message; returns the provider message id.
    #[instrument(skip(self, config, email), fields(account = %config.id, provider = %config.kind))]
    pub async fn send_email(
        &self,
        config: &ProviderConfig,
        email: &OutgoingEmail,
    ) -> Result<GatewayOutcome<String>> {
        let (adapter, refreshed) = self.connect_email(config).await?;
        let id = adapter.send_message(email).await?;
        Ok(GatewayOutcome { value: id, refreshed })
    }

    /// Update read/starred flags on a message.
    #[instrument(skip(self, config), fields(account = %config.id, provider = %config.kind))]
    pub async fn update_email_flags(
        &self,
        config: &ProviderConfig,
        message_id: &str,
        read: Option<bool>,
        starred: Option<bool>,
    ) -> Result<GatewayOutcome<()>> {
        let (adapter, refreshed) = self.connect_email(config).await?;
        adapter.update_flags(message_id, read, starred).await?;
        Ok(GatewayOutcome { value: (), refreshed })
    }

    /// Delete a message.
    #[instrument(skip(self, config), fields(account = %config.id, provider = %config.kind))]
    pub async fn delete_email(
        &self,
        config: &ProviderConfig,
        message_id: &str,
    ) -> Result<GatewayOutcome<()>> {
        let (adapter, refreshed) = self.connect_email(config).await?;
        adapter.delete_message(message_id).await?;
        Ok(GatewayOutcome { value: (), refreshed })
    }

    async fn connect_calendar(
        &self,
        config: &ProviderConfig,
    ) -> Result<(Box<dyn CalendarAdapter>, Option<ProviderCredentials>)> {
        let mut adapter = create_calendar_adapter(config)?;
        let refreshed = ensure_connected(adapter.as_mut(), config).await?;
        Ok((adapter, refreshed))
    }

    async fn connect_email(
        &self,
        config: &ProviderConfig,
    ) -> Result<(Box<dyn EmailAdapter>, Option<ProviderCredentials>)> {
        let mut adapter = create_email_adapter(config)?;
        let refreshed = ensure_connected(adapter.as_mut(), config).await?;
        Ok((adapter, refreshed))
    }
}

/// Connect with at most one refresh-and-retry cycle.
///
/// Returns the rotated credentials when recovery happened, so callers
/// can hand them back to the host.
async fn ensure_connected<S>(
    session: &mut S,
    config: &ProviderConfig,
) -> Result<Option<ProviderCredentials>>
where
    S: ProviderSession + ?Sized,
{
    if session.connect().await? {
        return Ok(None);
    }

    if !session.refresh_capable() || config.credentials.refresh_token.is_none() {
        warn!(account = %config.id, "connect failed and no refresh path is available");
        return Err(RelayError::ConnectionFailed(format!(
            "unable to authenticate {} account {}",
            config.kind, config.id
        )));
    }

    let refreshed = session.refresh_token().await?;
    if session.connect().await? {
        info!(account = %config.id, "reconnected after token refresh");
        return Ok(Some(refreshed));
    }

    // Exactly one refresh attempt per call; a second failure is terminal.
    Err(RelayError::ConnectionFailed(format!(
        "{} account {} still unauthorized after token refresh",
        config.kind, config.id
    )))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use relay_domain::ProviderKind;

    use super::*;

    /// Scripted session: each `connect` pops the next outcome.
    struct StubSession {
        outcomes: Vec<bool>,
        connects: Arc<AtomicUsize>,
        refreshes: Arc<AtomicUsize>,
        refresh_capable: bool,
    }

    impl StubSession {
        fn new(outcomes: Vec<bool>, refresh_capable: bool) -> Self {
            Self {
                outcomes,
                connects: Arc::new(AtomicUsize::new(0)),
                refreshes: Arc::new(AtomicUsize::new(0)),
                refresh_capable,
            }
        }
    }

    #[async_trait]
    impl ProviderSession for StubSession {
        async fn connect(&mut self) -> Result<bool> {
            let attempt = self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(self.outcomes.get(attempt).copied().unwrap_or(false))
        }

        async fn disconnect(&mut self) {}

        fn refresh_capable(&self) -> bool {
            self.refresh_capable
        }

        async fn refresh_token(&mut self) -> Result<ProviderCredentials> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(ProviderCredentials {
                access_token: "new-token".to_string(),
                refresh_token: Some("new-refresh".to_string()),
            })
        }
    }

    fn oauth_config() -> ProviderConfig {
        ProviderConfig {
            id: "acct-1".to_string(),
            kind: ProviderKind::GoogleCalendar,
            credentials: ProviderCredentials {
                access_token: "stale".to_string(),
                refresh_token: Some("refresh".to_string()),
            },
            username: None,
            calendar_id: None,
            caldav_url: None,
            imap: None,
            smtp: None,
        }
    }

    #[tokio::test]
    async fn connected_sessions_skip_refresh() {
        let mut session = StubSession::new(vec![true], true);

        let refreshed = ensure_connected(&mut session, &oauth_config())
            .await
            .expect("connects first try");

        assert!(refreshed.is_none());
        assert_eq!(session.connects.load(Ordering::SeqCst), 1);
        assert_eq!(session.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn auth_failure_triggers_exactly_one_refresh_then_succeeds() {
        let mut session = StubSession::new(vec![false, true], true);

        let refreshed = ensure_connected(&mut session, &oauth_config())
            .await
            .expect("recovers after refresh");

        assert_eq!(
            refreshed.expect("rotated credentials are surfaced").access_token,
            "new-token"
        );
        assert_eq!(session.connects.load(Ordering::SeqCst), 2);
        assert_eq!(session.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_failure_is_terminal_without_a_third_attempt() {
        let mut session = StubSession::new(vec![false, false, true], true);

        let err = ensure_connected(&mut session, &oauth_config()).await.unwrap_err();

        assert!(matches!(err, RelayError::ConnectionFailed(_)));
        // Exactly two connects and one refresh, never a third connect.
        assert_eq!(session.connects.load(Ordering::SeqCst), 2);
        assert_eq!(session.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_refresh_token_fails_without_refresh() {
        let mut config = oauth_config();
        config.credentials.refresh_token = None;
        let mut session = StubSession::new(vec![false, true], true);

        let err = ensure_connected(&mut session, &config).await.unwrap_err();

        assert!(matches!(err, RelayError::ConnectionFailed(_)));
        assert_eq!(session.connects.load(Ordering::SeqCst), 1);
        assert_eq!(session.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn refresh_incapable_sessions_fail_immediately() {
        let mut session = StubSession::new(vec![false, true], false);

        let err = ensure_connected(&mut session, &oauth_config()).await.unwrap_err();

        assert!(matches!(err, RelayError::ConnectionFailed(_)));
        assert_eq!(session.connects.load(Ordering::SeqCst), 1);
    }
}
