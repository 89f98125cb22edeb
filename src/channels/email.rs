//! Outbound SMTP via lettre.
//!
//! lettre's `SmtpTransport` is blocking, so every send runs on the blocking
//! pool. Implicit TLS is used when `SMTP_USE_SSL` is set or the port is 465,
//! STARTTLS otherwise.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Certificate, Tls, TlsParameters};
use lettre::{Address, Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use crate::channels::{MailTransport, OutboundEmail};
use crate::config::SmtpConfig;
use crate::error::ChannelError;

const CHANNEL_NAME: &str = "smtp";
const SMTP_TIMEOUT: Duration = Duration::from_secs(60);

// ── Transport ───────────────────────────────────────────────────────

/// SMTP mail transport.
pub struct SmtpMailer {
    config: SmtpConfig,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Self {
        if config.allow_insecure_tls {
            warn!("SMTP certificate verification disabled (SMTP_ALLOW_INSECURE_TLS)");
        }
        Self { config }
    }

    /// Send one message (blocking).
    fn send_blocking(config: &SmtpConfig, email: &OutboundEmail) -> Result<(), ChannelError> {
        let message = build_message(config, email)?;
        let transport = build_transport(config)?;
        let response = transport.send(&message).map_err(|e| ChannelError::SendFailed {
            name: CHANNEL_NAME.into(),
            reason: format!("SMTP send failed: {e}"),
        })?;
        if config.debug {
            info!(to = %email.to, code = %response.code(), "SMTP accepted message");
        } else {
            debug!(to = %email.to, "SMTP accepted message");
        }
        Ok(())
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    async fn send(&self, email: &OutboundEmail) -> Result<(), ChannelError> {
        let config = self.config.clone();
        let email = email.clone();
        tokio::task::spawn_blocking(move || Self::send_blocking(&config, &email))
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: CHANNEL_NAME.into(),
                reason: format!("send task failed: {e}"),
            })?
    }
}

// ── Message ─────────────────────────────────────────────────────────

fn parse_address(raw: &str) -> Result<Address, ChannelError> {
    raw.trim()
        .parse::<Address>()
        .map_err(|e| ChannelError::InvalidAddress {
            address: raw.to_string(),
            reason: e.to_string(),
        })
}

/// Build the MIME message: `From: "<sender name>" <user>`, `Reply-To`,
/// optional `Bcc`, HTML body.
pub fn build_message(config: &SmtpConfig, email: &OutboundEmail) -> Result<Message, ChannelError> {
    let from = Mailbox::new(Some(config.sender_name.clone()), parse_address(&config.user)?);
    let reply_to = Mailbox::new(None, parse_address(&config.reply_to)?);
    let to = Mailbox::new(None, parse_address(&email.to)?);

    let mut builder = Message::builder()
        .from(from)
        .reply_to(reply_to)
        .to(to)
        .subject(email.subject.as_str())
        .header(ContentType::TEXT_HTML);
    if let Some(bcc) = email.bcc.as_deref().filter(|b| !b.trim().is_empty()) {
        builder = builder.bcc(Mailbox::new(None, parse_address(bcc)?));
    }

    builder
        .body(email.html_body.clone())
        .map_err(|e| ChannelError::SendFailed {
            name: CHANNEL_NAME.into(),
            reason: format!("Failed to build email: {e}"),
        })
}

// ── TLS ─────────────────────────────────────────────────────────────

fn tls_error(reason: impl std::fmt::Display) -> ChannelError {
    ChannelError::Tls {
        name: CHANNEL_NAME.into(),
        reason: reason.to_string(),
    }
}

fn tls_parameters(config: &SmtpConfig) -> Result<TlsParameters, ChannelError> {
    let mut builder = TlsParameters::builder(config.host.clone())
        .dangerous_accept_invalid_certs(config.allow_insecure_tls);

    if let Some(path) = &config.ca_cert {
        let pem = std::fs::read(path)
            .map_err(|e| tls_error(format!("cannot read {}: {e}", path.display())))?;
        let cert = Certificate::from_pem(&pem).map_err(tls_error)?;
        debug!(path = %path.display(), "Using custom SMTP CA certificate");
        builder = builder.add_root_certificate(cert);
    }

    builder.build_rustls().map_err(tls_error)
}

fn build_transport(config: &SmtpConfig) -> Result<SmtpTransport, ChannelError> {
    let params = tls_parameters(config)?;
    let (builder, tls) = if config.implicit_tls() {
        (SmtpTransport::relay(&config.host), Tls::Wrapper(params))
    } else {
        (SmtpTransport::starttls_relay(&config.host), Tls::Required(params))
    };

    let creds = Credentials::new(
        config.user.clone(),
        config.password.expose_secret().to_string(),
    );

    Ok(builder
        .map_err(|e| ChannelError::SendFailed {
            name: CHANNEL_NAME.into(),
            reason: format!("SMTP relay error: {e}"),
        })?
        .port(config.port)
        .tls(tls)
        .credentials(creds)
        .timeout(Some(SMTP_TIMEOUT))
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn config() -> SmtpConfig {
        SmtpConfig {
            host: "smtp.agence.fr".into(),
            port: 587,
            user: "me@agence.fr".into(),
            password: SecretString::from("pw"),
            sender_name: "Camille Martin".into(),
            reply_to: "replies@agence.fr".into(),
            use_ssl: false,
            allow_insecure_tls: false,
            ca_cert: None,
            bcc: None,
            debug: false,
        }
    }

    fn email(bcc: Option<&str>) -> OutboundEmail {
        OutboundEmail {
            to: "prospect@x.com".into(),
            subject: "Projet".into(),
            html_body: "<p>Bonjour</p>".into(),
            bcc: bcc.map(String::from),
        }
    }

    fn formatted(message: &Message) -> String {
        String::from_utf8_lossy(&message.formatted()).to_string()
    }

    #[test]
    fn message_carries_sender_name_and_reply_to() {
        let message = build_message(&config(), &email(None)).unwrap();
        let raw = formatted(&message);
        assert!(raw.contains("Camille Martin"));
        assert!(raw.contains("<me@agence.fr>"));
        assert!(raw.contains("Reply-To: replies@agence.fr"));
        assert!(raw.contains("To: prospect@x.com"));
        assert!(raw.contains("Content-Type: text/html"));
    }

    #[test]
    fn bcc_goes_to_envelope_only() {
        let message = build_message(&config(), &email(Some("archive@agence.fr"))).unwrap();
        let recipients: Vec<String> = message
            .envelope()
            .to()
            .iter()
            .map(|a| a.to_string())
            .collect();
        assert!(recipients.contains(&"archive@agence.fr".to_string()));
        assert!(!formatted(&message).contains("Bcc:"));
    }

    #[test]
    fn invalid_recipient_is_rejected() {
        let mut bad = email(None);
        bad.to = "not an address".into();
        assert!(matches!(
            build_message(&config(), &bad),
            Err(ChannelError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn missing_ca_file_is_a_tls_error() {
        let mut cfg = config();
        cfg.ca_cert = Some("/nonexistent/ca.pem".into());
        assert!(matches!(tls_parameters(&cfg), Err(ChannelError::Tls { .. })));
    }

    #[test]
    fn transport_builds_for_both_tls_modes() {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let mut cfg = config();
        assert!(build_transport(&cfg).is_ok());
        cfg.port = 465;
        assert!(build_transport(&cfg).is_ok());
    }
}
