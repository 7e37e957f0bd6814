//! Email provider adapters

pub mod gmail;
pub mod imap_smtp;
pub mod outlook;

use lettre::message::{Mailbox, MultiPart};
use lettre::Message;
use relay_domain::{OutgoingEmail, RelayError, Result};

use crate::errors::InfraError;

/// Build an RFC 5322 message from the canonical outgoing payload.
///
/// Shared by the Gmail adapter (which base64-encodes the raw message)
/// and the SMTP transport.
pub(crate) fn build_mime_message(email: &OutgoingEmail, from: &str) -> Result<Message> {
    let from: Mailbox = from.parse().map_err(|e: lettre::address::AddressError| {
        RelayError::from(InfraError::from(e))
    })?;

    let mut builder = Message::builder().from(from).subject(email.subject.clone());
    for to in &email.to {
        builder = builder.to(parse_mailbox(to)?);
    }
    for cc in &email.cc {
        builder = builder.cc(parse_mailbox(cc)?);
    }
    for bcc in &email.bcc {
        builder = builder.bcc(parse_mailbox(bcc)?);
    }
    if let Some(in_reply_to) = &email.in_reply_to {
        builder = builder.in_reply_to(in_reply_to.clone());
    }

    let message = match (&email.body_text, &email.body_html) {
        (Some(text), Some(html)) => builder
            .multipart(MultiPart::alternative_plain_html(text.clone(), html.clone()))
            .map_err(|e| RelayError::from(InfraError::from(e)))?,
        (None, Some(html)) => builder
            .header(lettre::message::header::ContentType::TEXT_HTML)
            .body(html.clone())
            .map_err(|e| RelayError::from(InfraError::from(e)))?,
        (text, None) => builder
            .header(lettre::message::header::ContentType::TEXT_PLAIN)
            .body(text.clone().unwrap_or_default())
            .map_err(|e| RelayError::from(InfraError::from(e)))?,
    };

    Ok(message)
}

fn parse_mailbox(address: &str) -> Result<Mailbox> {
    address
        .trim()
        .parse()
        .map_err(|e: lettre::address::AddressError| RelayError::from(InfraError::from(e)))
}
