//! Canonical email message types, independent of any provider wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical representation of a mailbox message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessage {
    pub id: String,
    pub thread_id: Option<String>,
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: Option<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    /// Provider labels / folders, normalized to plain strings
    pub labels: Vec<String>,
    pub read: bool,
    pub starred: bool,
    pub sent_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    /// Message-Id this message replies to, when present
    pub in_reply_to: Option<String>,
}

/// Options for an outbound message
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutgoingEmail {
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    pub subject: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub in_reply_to: Option<String>,
}
