//! Token e-mails and the seam to the outbound mail server.
//!
//! Messages are rendered up front with `lettre`'s builder into raw RFC 5322
//! bytes, so everything that can fail on bad input fails in the request path
//! (where the reservation can still be released) and not in the background
//! sender. Delivery goes through the [`Transport`]/[`Session`] traits:
//! [`dispatcher`] owns batching and failure isolation, [`smtp`] speaks the
//! protocol.

pub mod dispatcher;
pub mod smtp;

use lettre::Message;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MailError {
    #[error("Invalid e-mail address '{address}': {source}")]
    Address {
        address: String,
        source: lettre::address::AddressError,
    },
    #[error("Failed to build e-mail: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("Mail dispatcher has shut down")]
    Closed,
    #[error("Mail queue is full")]
    Full(Email),
    #[error("Failed to start mail dispatcher: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("Mail dispatcher thread panicked")]
    WorkerPanicked,
}

/// Display name plus address, as rendered in `To:`/`From:`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailAddress {
    pub name: String,
    pub address: String,
}

/// A fully rendered message ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    /// Envelope sender (`MAIL FROM`).
    pub from: String,
    /// Envelope recipient (`RCPT TO`).
    pub to: String,
    /// Headers and body, CRLF line endings, not dot-stuffed.
    pub message: Vec<u8>,
}

/// Where a session step failed, which decides what happens to the batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The server rejected this message; the connection is still usable
    /// once the transaction is reset.
    #[error("message rejected: {0}")]
    Recoverable(String),
    /// The connection can no longer be used.
    #[error("connection failed: {0}")]
    Connection(String),
}

/// Opens outbound sessions. Exactly one dispatcher thread owns a transport.
pub trait Transport: Send + 'static {
    type Session: Session;

    /// Connect, upgrading to TLS where configured.
    fn connect(&self) -> Result<Self::Session, SendError>;
}

/// One open connection delivering a batch.
pub trait Session {
    /// Run the full per-recipient sequence for one message.
    fn send(&mut self, email: &Email) -> Result<(), SendError>;

    /// Clear per-transaction state after a recoverable failure.
    fn reset(&mut self) -> Result<(), SendError>;

    /// Politely close the connection.
    fn quit(self);
}

/// The notification sent when someone requests a publish token.
#[derive(Debug, Clone)]
pub struct TokenEmail<'a> {
    pub token: &'a str,
    /// Title of the document the token was requested for.
    pub title: &'a str,
    pub to: &'a EmailAddress,
    pub from: &'a EmailAddress,
    /// Public URL of the playground, quoted in the body.
    pub public_host: &'a str,
}

impl TokenEmail<'_> {
    pub fn subject(&self) -> String {
        format!("New Publishing Token for '{}'", self.title)
    }

    pub fn body(&self) -> String {
        format!(
            "Hi {name}!

You have requested a new token to publish a WebGL Playground document
on the gallery at {host}, titled '{title}':

    {token}

Please copy this token and use it to publish your playground document. The
token will expire within a few hours of not being used. Otherwise, note that
this token uniquely identifies your document and can be reused to make
modifications to the document at any time after its first publication.

With kind regards,


The WebGL Playground ({host})
",
            name = self.to.name,
            host = self.public_host,
            title = self.title,
            token = self.token,
        )
    }

    /// Render headers and body into an [`Email`].
    pub fn render(&self) -> Result<Email, MailError> {
        let message = Message::builder()
            .from(mailbox(self.from)?)
            .to(mailbox(self.to)?)
            .subject(self.subject())
            .date_now()
            .header(ContentType::TEXT_PLAIN)
            .body(self.body())?;

        Ok(Email {
            from: self.from.address.clone(),
            to: self.to.address.clone(),
            message: message.formatted(),
        })
    }
}

fn mailbox(addr: &EmailAddress) -> Result<Mailbox, MailError> {
    let address = addr
        .address
        .parse()
        .map_err(|source| MailError::Address {
            address: addr.address.clone(),
            source,
        })?;
    let name = (!addr.name.is_empty()).then(|| addr.name.clone());
    Ok(Mailbox::new(name, address))
}
