//! Provider account configuration and sync contract types.

use serde::{Deserialize, Serialize};

/// Supported external providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    GoogleCalendar,
    MicrosoftCalendar,
    Caldav,
    Gmail,
    OutlookMail,
    ImapSmtp,
}

impl ProviderKind {
    /// Stable string tag, matching the serde encoding
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GoogleCalendar => "google_calendar",
            Self::MicrosoftCalendar => "microsoft_calendar",
            Self::Caldav => "caldav",
            Self::Gmail => "gmail",
            Self::OutlookMail => "outlook_mail",
            Self::ImapSmtp => "imap_smtp",
        }
    }

    pub fn is_calendar(&self) -> bool {
        matches!(self, Self::GoogleCalendar | Self::MicrosoftCalendar | Self::Caldav)
    }

    pub fn is_email(&self) -> bool {
        !self.is_calendar()
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account credentials.
///
/// For OAuth providers `access_token` is a bearer token and
/// `refresh_token` enables the refresh-and-retry-once recovery path.
/// For password-authenticated providers (CalDAV, IMAP/SMTP) the access
/// token carries the password and `refresh_token` is absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCredentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Host/port pair for IMAP or SMTP endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailServer {
    pub host: String,
    pub port: u16,
}

/// One record per connected external account.
///
/// Owned by the host application. The sync layer treats it as an input
/// and never mutates it; refreshed credentials are reported back through
/// gateway results so the host can persist them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    pub credentials: ProviderCredentials,
    /// Login name for password-authenticated providers
    pub username: Option<String>,
    /// Target calendar for calendar providers ("primary" when absent)
    pub calendar_id: Option<String>,
    /// Collection URL for CalDAV accounts
    pub caldav_url: Option<String>,
    pub imap: Option<MailServer>,
    pub smtp: Option<MailServer>,
}

/// One page of a sync operation.
///
/// `cursor` is provider-opaque; callers pass it back unchanged and loop
/// until `has_more` is false. No cross-page deduplication is performed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPage<T> {
    pub items: Vec<T>,
    pub cursor: Option<String>,
    pub has_more: bool,
}

impl<T> SyncPage<T> {
    /// Final page with no continuation
    pub fn complete(items: Vec<T>) -> Self {
        Self { items, cursor: None, has_more: false }
    }
}
