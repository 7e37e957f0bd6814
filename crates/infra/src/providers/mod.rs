//! Provider adapter traits and factory
//!
//! Defines the common capability set all external providers implement
//! and the factory that selects an adapter from a `ProviderConfig`.
//! Adapters own the entire normalization burden: whatever shape a
//! provider's wire format has, the rest of the system only ever sees
//! the canonical types.

pub mod calendar;
pub mod email;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_domain::{
    CalendarEvent, CalendarEventDraft, EmailMessage, OutgoingEmail, ProviderConfig,
    ProviderCredentials, RelayError, Result, SyncPage,
};

/// Time window for calendar sync queries
#[derive(Debug, Clone, Copy)]
pub struct SyncWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Connection lifecycle shared by every adapter.
///
/// `connect` performs a cheap authenticated probe and reports ordinary
/// auth rejection as `Ok(false)`; only transport-level failures surface
/// as errors. OAuth-based adapters additionally support token refresh,
/// which applies the new tokens to the in-memory session and returns
/// them for the caller to persist.
#[async_trait]
pub trait ProviderSession: Send + Sync {
    /// Authenticated probe; `Ok(false)` on ordinary auth failure
    async fn connect(&mut self) -> Result<bool>;

    /// Release any session state
    async fn disconnect(&mut self);

    /// Whether this adapter can refresh its credentials
    fn refresh_capable(&self) -> bool {
        false
    }

    /// Exchange the refresh token for new credentials
    async fn refresh_token(&mut self) -> Result<ProviderCredentials> {
        Err(RelayError::Auth("token refresh is not supported by this provider".into()))
    }
}

/// Capability set for calendar providers
#[async_trait]
pub trait CalendarAdapter: ProviderSession {
    /// Fetch one page of events in the window; pass the returned cursor
    /// back to continue
    async fn sync_events(
        &self,
        window: SyncWindow,
        cursor: Option<&str>,
    ) -> Result<SyncPage<CalendarEvent>>;

    /// Create an event and return its provider id
    async fn create_event(&self, draft: &CalendarEventDraft) -> Result<String>;

    /// Patch an event in place
    async fn update_event(&self, event_id: &str, draft: &CalendarEventDraft) -> Result<()>;

    /// Delete an event
    async fn delete_event(&self, event_id: &str) -> Result<()>;
}

/// Capability set for email providers
#[async_trait]
pub trait EmailAdapter: ProviderSession {
    /// Fetch one page of messages; pass the returned cursor back to
    /// continue
    async fn sync_messages(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<SyncPage<EmailMessage>>;

    /// Send a message and return its provider id
    async fn send_message(&self, email: &OutgoingEmail) -> Result<String>;

    /// Update read/starred flags; `None` leaves a flag untouched
    async fn update_flags(
        &self,
        message_id: &str,
        read: Option<bool>,
        starred: Option<bool>,
    ) -> Result<()>;

    /// Delete a message
    async fn delete_message(&self, message_id: &str) -> Result<()>;
}

/// Create a calendar adapter for the configured provider.
///
/// Fails fast with `UnknownProvider` when the kind is not a calendar
/// provider, and with `Config` when required addressing is missing.
pub fn create_calendar_adapter(config: &ProviderConfig) -> Result<Box<dyn CalendarAdapter>> {
    use relay_domain::ProviderKind;

    match config.kind {
        ProviderKind::GoogleCalendar => {
            Ok(Box::new(calendar::google::GoogleCalendarAdapter::new(config)))
        }
        ProviderKind::MicrosoftCalendar => {
            Ok(Box::new(calendar::microsoft::MicrosoftCalendarAdapter::new(config)))
        }
        ProviderKind::Caldav => Ok(Box::new(calendar::caldav::CaldavAdapter::new(config)?)),
        other => Err(RelayError::UnknownProvider(format!("{other} is not a calendar provider"))),
    }
}

/// Create an email adapter for the configured provider.
///
/// Fails fast with `UnknownProvider` when the kind is not an email
/// provider, and with `Config` when required addressing is missing.
pub fn create_email_adapter(config: &ProviderConfig) -> Result<Box<dyn EmailAdapter>> {
    use relay_domain::ProviderKind;

    match config.kind {
        ProviderKind::Gmail => Ok(Box::new(email::gmail::GmailAdapter::new(config))),
        ProviderKind::OutlookMail => Ok(Box::new(email::outlook::OutlookMailAdapter::new(config))),
        ProviderKind::ImapSmtp => Ok(Box::new(email::imap_smtp::ImapSmtpAdapter::new(config)?)),
        other => Err(RelayError::UnknownProvider(format!("{other} is not an email provider"))),
    }
}

#[cfg(test)]
mod tests {
    use relay_domain::{ProviderCredentials, ProviderKind};

    use super::*;

    fn config(kind: ProviderKind) -> ProviderConfig {
        ProviderConfig {
            id: "acct-1".to_string(),
            kind,
            credentials: ProviderCredentials {
                access_token: "token".to_string(),
                refresh_token: None,
            },
            username: None,
            calendar_id: None,
            caldav_url: None,
            imap: None,
            smtp: None,
        }
    }

    #[test]
    fn email_kinds_are_rejected_by_the_calendar_factory() {
        let err = create_calendar_adapter(&config(ProviderKind::Gmail)).err();
        assert!(matches!(err, Some(RelayError::UnknownProvider(_))));
    }

    #[test]
    fn calendar_kinds_are_rejected_by_the_email_factory() {
        let err = create_email_adapter(&config(ProviderKind::GoogleCalendar)).err();
        assert!(matches!(err, Some(RelayError::UnknownProvider(_))));
    }

    #[test]
    fn caldav_requires_collection_url_and_username() {
        let err = create_calendar_adapter(&config(ProviderKind::Caldav)).err();
        assert!(matches!(err, Some(RelayError::Config(_))));
    }

    #[test]
    fn imap_smtp_requires_server_addressing() {
        let err = create_email_adapter(&config(ProviderKind::ImapSmtp)).err();
        assert!(matches!(err, Some(RelayError::Config(_))));
    }
}
