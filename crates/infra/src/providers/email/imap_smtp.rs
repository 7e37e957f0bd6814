//! IMAP/SMTP adapter
//!
//! Password-authenticated mailbox access: IMAP over TLS for reading
//! and flag updates, SMTP for sending, mail-parser for MIME
//! extraction. The imap crate is blocking, so every mailbox operation
//! runs on the blocking thread pool.
//!
//! The sync cursor is the highest UID seen so far; continuation
//! fetches `UID cursor+1:*`.

use std::net::TcpStream;

use async_trait::async_trait;
use chrono::DateTime;
use imap::types::Flag;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use mail_parser::MessageParser;
use native_tls::{TlsConnector, TlsStream};
use relay_domain::{
    EmailMessage, MailServer, OutgoingEmail, ProviderConfig, RelayError, Result, SyncPage,
};
use tracing::debug;
use uuid::Uuid;

use super::super::{EmailAdapter, ProviderSession};
use super::build_mime_message;
use crate::errors::InfraError;

type ImapSession = imap::Session<TlsStream<TcpStream>>;

/// IMAP/SMTP adapter
#[derive(Clone)]
pub struct ImapSmtpAdapter {
    imap: MailServer,
    smtp: MailServer,
    username: String,
    password: String,
}

impl ImapSmtpAdapter {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let imap = config
            .imap
            .clone()
            .ok_or_else(|| RelayError::Config("IMAP account is missing its IMAP host".into()))?;
        let smtp = config
            .smtp
            .clone()
            .ok_or_else(|| RelayError::Config("IMAP account is missing its SMTP host".into()))?;
        let username = config
            .username
            .clone()
            .ok_or_else(|| RelayError::Config("IMAP account is missing a username".into()))?;

        Ok(Self { imap, smtp, username, password: config.credentials.access_token.clone() })
    }

    /// Open and authenticate a blocking IMAP session.
    fn open_session(&self) -> std::result::Result<ImapSession, imap::Error> {
        let tls = TlsConnector::builder()
            .build()
            .map_err(|e| imap::Error::Io(std::io::Error::other(e)))?;
        let client =
            imap::connect((self.imap.host.as_str(), self.imap.port), self.imap.host.as_str(), &tls)?;
        client.login(self.username.as_str(), self.password.as_str()).map_err(|(err, _)| err)
    }

    fn smtp_transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&self.smtp.host)
            .map_err(|e| RelayError::from(InfraError::from(e)))?
            .port(self.smtp.port)
            .credentials(Credentials::new(self.username.clone(), self.password.clone()))
            .build();
        Ok(transport)
    }
}

#[async_trait]
impl ProviderSession for ImapSmtpAdapter {
    async fn connect(&mut self) -> Result<bool> {
        let adapter = self.clone();
        tokio::task::spawn_blocking(move || match adapter.open_session() {
            Ok(mut session) => {
                let _ = session.logout();
                Ok(true)
            }
            // A refused login is an ordinary auth failure, not a fault.
            Err(imap::Error::No(_)) => Ok(false),
            Err(err) => Err(RelayError::from(InfraError::from(err))),
        })
        .await
        .map_err(|e| RelayError::from(InfraError::from(e)))?
    }

    async fn disconnect(&mut self) {
        // Sessions are opened per operation; nothing persistent to close.
    }
}

#[async_trait]
impl EmailAdapter for ImapSmtpAdapter {
    async fn sync_messages(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<SyncPage<EmailMessage>> {
        let adapter = self.clone();
        let last_uid = parse_cursor(cursor)?;

        tokio::task::spawn_blocking(move || -> Result<SyncPage<EmailMessage>> {
            let mut session =
                adapter.open_session().map_err(|e| RelayError::from(InfraError::from(e)))?;
            session.select("INBOX").map_err(|e| RelayError::from(InfraError::from(e)))?;

            let query = match last_uid {
                Some(uid) => format!("UID {}:*", uid + 1),
                None => "ALL".to_string(),
            };
            let mut uids: Vec<u32> = session
                .uid_search(&query)
                .map_err(|e| RelayError::from(InfraError::from(e)))?
                .into_iter()
                // The `uid:*` form always matches the highest UID, even
                // below the lower bound; filter it back out.
                .filter(|uid| last_uid.map_or(true, |last| *uid > last))
                .collect();
            uids.sort_unstable();

            let has_more = uids.len() > limit;
            let page_uids: Vec<u32> = uids.into_iter().take(limit).collect();

            let mut messages = Vec::with_capacity(page_uids.len());
            if !page_uids.is_empty() {
                let set = page_uids
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                let fetches = session
                    .uid_fetch(set, "(RFC822 FLAGS UID)")
                    .map_err(|e| RelayError::from(InfraError::from(e)))?;

                for fetch in fetches.iter() {
                    let Some(uid) = fetch.uid else { continue };
                    let Some(body) = fetch.body() else { continue };
                    let seen = fetch.flags().iter().any(|flag| matches!(flag, Flag::Seen));
                    let flagged = fetch.flags().iter().any(|flag| matches!(flag, Flag::Flagged));
                    messages.push(normalize_rfc822(uid, body, seen, flagged));
                }
            }
            messages.sort_by(|a, b| {
                let (left, right) =
                    (a.id.parse::<u32>().unwrap_or(0), b.id.parse::<u32>().unwrap_or(0));
                left.cmp(&right)
            });

            let _ = session.logout();

            let cursor = messages.last().map(|message| message.id.clone());
            debug!(fetched = messages.len(), has_more, "IMAP sync page complete");
            Ok(SyncPage { items: messages, cursor, has_more })
        })
        .await
        .map_err(|e| RelayError::from(InfraError::from(e)))?
    }

    async fn send_message(&self, email: &OutgoingEmail) -> Result<String> {
        let message_id = format!("<{}@relay>", Uuid::new_v4());
        let mime = build_mime_message(email, &self.username)?;

        let transport = self.smtp_transport()?;
        transport.send(mime).await.map_err(|e| RelayError::from(InfraError::from(e)))?;
        Ok(message_id)
    }

    async fn update_flags(
        &self,
        message_id: &str,
        read: Option<bool>,
        starred: Option<bool>,
    ) -> Result<()> {
        let adapter = self.clone();
        let uid = message_id
            .parse::<u32>()
            .map_err(|_| RelayError::InvalidInput(format!("invalid IMAP UID: {message_id}")))?;

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut session =
                adapter.open_session().map_err(|e| RelayError::from(InfraError::from(e)))?;
            session.select("INBOX").map_err(|e| RelayError::from(InfraError::from(e)))?;

            let mut apply = |query: String| -> Result<()> {
                session
                    .uid_store(uid.to_string(), query)
                    .map_err(|e| RelayError::from(InfraError::from(e)))?;
                Ok(())
            };
            match read {
                Some(true) => apply(r"+FLAGS (\Seen)".to_string())?,
                Some(false) => apply(r"-FLAGS (\Seen)".to_string())?,
                None => {}
            }
            match starred {
                Some(true) => apply(r"+FLAGS (\Flagged)".to_string())?,
                Some(false) => apply(r"-FLAGS (\Flagged)".to_string())?,
                None => {}
            }

            let _ = session.logout();
            Ok(())
        })
        .await
        .map_err(|e| RelayError::from(InfraError::from(e)))?
    }

    async fn delete_message(&self, message_id: &str) -> Result<()> {
        let adapter = self.clone();
        let uid = message_id
            .parse::<u32>()
            .map_err(|_| RelayError::InvalidInput(format!("invalid IMAP UID: {message_id}")))?;

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut session =
                adapter.open_session().map_err(|e| RelayError::from(InfraError::from(e)))?;
            session.select("INBOX").map_err(|e| RelayError::from(InfraError::from(e)))?;
            session
                .uid_store(uid.to_string(), r"+FLAGS (\Deleted)")
                .map_err(|e| RelayError::from(InfraError::from(e)))?;
            session.expunge().map_err(|e| RelayError::from(InfraError::from(e)))?;
            let _ = session.logout();
            Ok(())
        })
        .await
        .map_err(|e| RelayError::from(InfraError::from(e)))?
    }
}

fn parse_cursor(cursor: Option<&str>) -> Result<Option<u32>> {
    cursor
        .map(|raw| {
            raw.parse::<u32>()
                .map_err(|_| RelayError::InvalidInput(format!("invalid IMAP sync cursor: {raw}")))
        })
        .transpose()
}

/// Normalize a fetched RFC 822 message into the canonical type.
///
/// The UID doubles as the canonical message id so flag updates and
/// deletes can address the message later.
fn normalize_rfc822(uid: u32, raw: &[u8], seen: bool, flagged: bool) -> EmailMessage {
    let parsed = MessageParser::default().parse(raw);

    let (from, to, cc, bcc, subject, body_text, body_html, sent_at, in_reply_to) = match &parsed {
        Some(message) => (
            message
                .from()
                .and_then(|from| from.first())
                .and_then(|addr| addr.address())
                .map(str::to_string)
                .unwrap_or_default(),
            address_list(message.to()),
            address_list(message.cc()),
            address_list(message.bcc()),
            message.subject().map(str::to_string),
            message.body_text(0).map(|body| body.into_owned()),
            message.body_html(0).map(|body| body.into_owned()),
            message.date().and_then(|date| DateTime::from_timestamp(date.to_timestamp(), 0)),
            message.in_reply_to().as_text().map(|id| id.to_string()),
        ),
        None => Default::default(),
    };

    EmailMessage {
        id: uid.to_string(),
        thread_id: None,
        from,
        to,
        cc,
        bcc,
        subject,
        body_text,
        body_html,
        labels: Vec::new(),
        read: seen,
        starred: flagged,
        sent_at,
        received_at: None,
        in_reply_to,
    }
}

fn address_list(addresses: Option<&mail_parser::Address<'_>>) -> Vec<String> {
    addresses
        .map(|list| list.iter().filter_map(|addr| addr.address()).map(str::to_string).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use relay_domain::{ProviderCredentials, ProviderKind};

    use super::*;

    const MULTIPART_FIXTURE: &str = concat!(
        "From: Grace Hopper <grace@example.com>\r\n",
        "To: ada@example.com, alan@example.com\r\n",
        "Cc: mary@example.com\r\n",
        "Subject: Compiler notes\r\n",
        "Date: Tue, 05 Mar 2024 12:00:00 +0000\r\n",
        "In-Reply-To: <root@example.com>\r\n",
        "MIME-Version: 1.0\r\n",
        "Content-Type: multipart/alternative; boundary=\"sep\"\r\n",
        "\r\n",
        "--sep\r\n",
        "Content-Type: text/plain; charset=utf-8\r\n",
        "\r\n",
        "plain text body\r\n",
        "--sep\r\n",
        "Content-Type: text/html; charset=utf-8\r\n",
        "\r\n",
        "<p>html body</p>\r\n",
        "--sep--\r\n",
    );

    #[test]
    fn multipart_mime_is_normalized() {
        let message = normalize_rfc822(42, MULTIPART_FIXTURE.as_bytes(), true, false);

        assert_eq!(message.id, "42");
        assert_eq!(message.from, "grace@example.com");
        assert_eq!(message.to, vec!["ada@example.com".to_string(), "alan@example.com".to_string()]);
        assert_eq!(message.cc, vec!["mary@example.com".to_string()]);
        assert_eq!(message.subject.as_deref(), Some("Compiler notes"));
        assert_eq!(message.body_text.as_deref().map(str::trim), Some("plain text body"));
        assert_eq!(message.body_html.as_deref().map(str::trim), Some("<p>html body</p>"));
        assert!(message.read);
        assert!(!message.starred);
        assert!(message.sent_at.is_some());
        assert_eq!(message.in_reply_to.as_deref(), Some("root@example.com"));
    }

    #[test]
    fn unparseable_bytes_still_yield_an_addressable_message() {
        let message = normalize_rfc822(7, b"\xff\xfe not mime", false, true);

        assert_eq!(message.id, "7");
        assert!(message.from.is_empty());
        assert!(!message.read);
        assert!(message.starred);
    }

    #[test]
    fn cursors_must_be_uids() {
        assert_eq!(parse_cursor(None).expect("none ok"), None);
        assert_eq!(parse_cursor(Some("41")).expect("valid"), Some(41));
        assert!(parse_cursor(Some("abc")).is_err());
    }

    #[test]
    fn factory_rejects_configs_without_servers() {
        let config = ProviderConfig {
            id: "acct".to_string(),
            kind: ProviderKind::ImapSmtp,
            credentials: ProviderCredentials {
                access_token: "pw".to_string(),
                refresh_token: None,
            },
            username: Some("ada@example.com".to_string()),
            calendar_id: None,
            caldav_url: None,
            imap: Some(MailServer { host: "imap.example.com".to_string(), port: 993 }),
            smtp: None,
        };

        assert!(matches!(ImapSmtpAdapter::new(&config), Err(RelayError::Config(_))));
    }
}
