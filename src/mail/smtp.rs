//! SMTP [`Transport`] on top of `lettre`'s low-level client.
//!
//! The per-recipient sequence (`MAIL FROM`, `RCPT TO`, `DATA`) is driven one
//! command at a time so a rejection leaves the connection open for `RSET`.
//! `SmtpConnection::send` closes the connection on any error, which would
//! turn one bad address into a lost batch.

use super::{Email, SendError, Session, Transport};
use crate::config::MailConfig;
use lettre::Address;
use lettre::transport::smtp::Error as SmtpError;
use lettre::transport::smtp::client::{SmtpConnection, TlsParameters};
use lettre::transport::smtp::commands::{Data, Mail, Rcpt, Rset};
use lettre::transport::smtp::extension::ClientId;
use std::time::Duration;

pub const DEFAULT_SMTP_PORT: u16 = 25;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SmtpTransport {
    host: String,
    port: u16,
    disable_tls: bool,
    hello: ClientId,
}

impl SmtpTransport {
    /// `address` is `host` or `host:port`; the port defaults to 25.
    pub fn new(address: &str, disable_tls: bool, hello_name: &str) -> Self {
        let (host, port) = split_address(address);
        Self {
            host,
            port,
            disable_tls,
            hello: ClientId::Domain(hello_name.to_string()),
        }
    }

    pub fn from_config(config: &MailConfig) -> Self {
        Self::new(
            &config.normalized_smtp_address(),
            config.disable_tls,
            &config.hello_name,
        )
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Split `host:port`, falling back to the SMTP port when none is given.
pub fn split_address(address: &str) -> (String, u16) {
    match address.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (address.to_string(), DEFAULT_SMTP_PORT),
        },
        None => (address.to_string(), DEFAULT_SMTP_PORT),
    }
}

impl Transport for SmtpTransport {
    type Session = SmtpSession;

    fn connect(&self) -> Result<SmtpSession, SendError> {
        let mut conn = SmtpConnection::connect(
            (self.host.as_str(), self.port),
            Some(CONNECT_TIMEOUT),
            &self.hello,
            None,
            None,
        )
        .map_err(connection_error)?;

        if !self.disable_tls && conn.can_starttls() {
            let tls = TlsParameters::new(self.host.clone()).map_err(connection_error)?;
            conn.starttls(&tls, &self.hello).map_err(connection_error)?;
            tracing::debug!(host = %self.host, "mail connection upgraded to TLS");
        }

        Ok(SmtpSession { conn })
    }
}

pub struct SmtpSession {
    conn: SmtpConnection,
}

impl Session for SmtpSession {
    fn send(&mut self, email: &Email) -> Result<(), SendError> {
        let from = parse_address(&email.from)?;
        let to = parse_address(&email.to)?;

        self.conn
            .command(Mail::new(Some(from), vec![]))
            .map_err(classify)?;
        self.conn
            .command(Rcpt::new(to, vec![]))
            .map_err(classify)?;
        self.conn.command(Data).map_err(classify)?;
        self.conn.message(&email.message).map_err(classify)?;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), SendError> {
        self.conn.command(Rset).map_err(connection_error)?;
        Ok(())
    }

    fn quit(mut self) {
        if let Err(error) = self.conn.quit() {
            tracing::debug!(%error, "mail server QUIT failed");
        }
    }
}

fn parse_address(address: &str) -> Result<Address, SendError> {
    address
        .parse()
        .map_err(|e| SendError::Recoverable(format!("{address}: {e}")))
}

/// Negative replies reject the message; anything else means the stream is gone.
fn classify(error: SmtpError) -> SendError {
    if error.is_permanent() || error.is_transient() {
        SendError::Recoverable(error.to_string())
    } else {
        SendError::Connection(error.to_string())
    }
}

fn connection_error(error: SmtpError) -> SendError {
    SendError::Connection(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn address_without_port_uses_smtp_port() {
        assert_eq!(split_address("localhost"), ("localhost".into(), 25));
        assert_eq!(
            split_address("mail.example.org:587"),
            ("mail.example.org".into(), 587)
        );
    }

    #[test]
    fn unparsable_port_is_treated_as_host() {
        assert_eq!(split_address("weird:host"), ("weird:host".into(), 25));
    }

    #[test]
    fn transport_reads_mail_config() {
        let config = MailConfig {
            smtp_address: "smtp.example.org:2525".into(),
            disable_tls: true,
            ..MailConfig::default()
        };
        let transport = SmtpTransport::from_config(&config);
        assert_eq!(transport.host(), "smtp.example.org");
        assert_eq!(transport.port(), 2525);
    }

    #[test]
    fn refused_connection_is_a_connection_error() {
        // bind then drop to get a port nothing listens on
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let transport = SmtpTransport::new(&format!("127.0.0.1:{port}"), true, "localhost");
        assert!(matches!(
            transport.connect(),
            Err(SendError::Connection(_))
        ));
    }
}
