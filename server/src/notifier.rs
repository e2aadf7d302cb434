//! Verification email delivery.
//!
//! [`Notifier`] is the seam for outbound mail; [`SmtpNotifier`] delivers
//! through an SMTP relay with `lettre`. Delivery is best-effort: the
//! registration handler logs a failed send and still reports success, since
//! the tenant already exists.

use std::time::Duration;

use async_trait::async_trait;
use lettre::address::Address;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::debug;

use crate::config::SmtpConfig;

/// Display name of the sender.
pub const SENDER_NAME: &str = "modl";

/// Local part of the sender address; the domain is the app domain.
pub const SENDER_LOCAL_PART: &str = "noreply";

/// Subject of the verification email.
pub const VERIFICATION_SUBJECT: &str = "Verify Your Email Address for modl";

/// Errors that can occur while sending mail.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// A sender or recipient address could not be parsed.
    #[error("invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// The message could not be assembled.
    #[error("failed to build message: {0}")]
    Build(String),

    /// The relay rejected the message or the connection failed.
    #[error("smtp transport error: {0}")]
    Transport(String),

    /// The send did not finish within the configured timeout.
    #[error("mail delivery timed out after {0:?}")]
    Timeout(Duration),
}

/// An outbound email with plain-text and HTML alternatives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Sends mail on behalf of the registration flow.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends `message` once. No retries.
    async fn send_mail(&self, message: &MailMessage) -> Result<(), NotifyError>;
}

/// Builds the link a new tenant follows to verify their admin email.
///
/// # Example
///
/// ```rust
/// use modl_signup::notifier::verification_link;
///
/// assert_eq!(
///     verification_link("myserver", "modl.gg", "abc"),
///     "https://myserver.modl.gg/verify-email?token=abc"
/// );
/// ```
pub fn verification_link(custom_domain: &str, app_domain: &str, token: &str) -> String {
    format!("https://{custom_domain}.{app_domain}/verify-email?token={token}")
}

/// Composes the verification email for a newly created tenant.
pub fn verification_email(
    to: &str,
    custom_domain: &str,
    app_domain: &str,
    token: &str,
) -> MailMessage {
    let link = verification_link(custom_domain, app_domain, token);
    MailMessage {
        to: to.to_string(),
        subject: VERIFICATION_SUBJECT.to_string(),
        text: format!("Please verify your email address by clicking the following link: {link}"),
        html: format!(
            "<p>Please verify your email address by clicking the following link: \
             <a href=\"{link}\">{link}</a></p>"
        ),
    }
}

/// The `"modl" <noreply@{app_domain}>` sender mailbox.
pub fn sender_mailbox(app_domain: &str) -> Result<Mailbox, NotifyError> {
    let address = Address::new(SENDER_LOCAL_PART, app_domain).map_err(|e| {
        NotifyError::InvalidAddress {
            address: format!("{SENDER_LOCAL_PART}@{app_domain}"),
            reason: e.to_string(),
        }
    })?;
    Ok(Mailbox::new(Some(SENDER_NAME.to_string()), address))
}

/// Converts a [`MailMessage`] into a `lettre` message from `from`.
pub fn build_message(from: &Mailbox, message: &MailMessage) -> Result<Message, NotifyError> {
    let to: Mailbox = message
        .to
        .parse()
        .map_err(|e: lettre::address::AddressError| NotifyError::InvalidAddress {
            address: message.to.clone(),
            reason: e.to_string(),
        })?;

    Message::builder()
        .from(from.clone())
        .to(to)
        .subject(message.subject.clone())
        .multipart(MultiPart::alternative_plain_html(
            message.text.clone(),
            message.html.clone(),
        ))
        .map_err(|e| NotifyError::Build(e.to_string()))
}

/// Delivers mail through an SMTP relay.
///
/// STARTTLS is used when the relay offers it, and self-signed relay
/// certificates are accepted. Credentials are only sent when both username
/// and password are configured.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    host: String,
    timeout: Duration,
}

impl std::fmt::Debug for SmtpNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpNotifier")
            .field("host", &self.host)
            .field("from", &self.from.to_string())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl SmtpNotifier {
    /// Creates a notifier for the relay described by `smtp`.
    ///
    /// # Errors
    ///
    /// - [`NotifyError::InvalidAddress`] if `app_domain` does not form a valid sender address
    /// - [`NotifyError::Transport`] if TLS parameters cannot be built
    pub fn new(smtp: &SmtpConfig, app_domain: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let tls = TlsParameters::builder(smtp.host.clone())
            .dangerous_accept_invalid_certs(true)
            .build()
            .map_err(|e| NotifyError::Transport(format!("invalid TLS parameters: {e}")))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host)
            .port(smtp.port)
            .tls(Tls::Opportunistic(tls))
            .timeout(Some(timeout));

        if let (Some(username), Some(password)) = (&smtp.username, &smtp.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from: sender_mailbox(app_domain)?,
            host: smtp.host.clone(),
            timeout,
        })
    }

    async fn deliver(&self, email: Message) -> Result<(), NotifyError> {
        let reachable = self
            .transport
            .test_connection()
            .await
            .map_err(|e| NotifyError::Transport(format!("relay check failed: {e}")))?;
        if !reachable {
            return Err(NotifyError::Transport(format!(
                "relay {} did not accept the connection",
                self.host
            )));
        }

        self.transport
            .send(email)
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send_mail(&self, message: &MailMessage) -> Result<(), NotifyError> {
        let email = build_message(&self.from, message)?;

        tokio::time::timeout(self.timeout, self.deliver(email))
            .await
            .map_err(|_| NotifyError::Timeout(self.timeout))??;

        debug!(host = %self.host, subject = %message.subject, "Mail handed to relay");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smtp_config() -> SmtpConfig {
        SmtpConfig {
            host: "localhost".to_string(),
            port: 25,
            username: None,
            password: None,
        }
    }

    #[test]
    fn verification_link_uses_tenant_subdomain() {
        assert_eq!(
            verification_link("coolserver", "modl.gg", "deadbeef"),
            "https://coolserver.modl.gg/verify-email?token=deadbeef"
        );
    }

    #[test]
    fn verification_email_contains_link_in_both_bodies() {
        let mail = verification_email("owner@example.com", "coolserver", "modl.gg", "deadbeef");
        let link = "https://coolserver.modl.gg/verify-email?token=deadbeef";

        assert_eq!(mail.to, "owner@example.com");
        assert_eq!(mail.subject, VERIFICATION_SUBJECT);
        assert!(mail.text.contains(link));
        assert!(mail.html.contains(&format!("<a href=\"{link}\">")));
    }

    #[test]
    fn sender_mailbox_uses_app_domain() {
        let mailbox = sender_mailbox("modl.gg").unwrap();
        assert_eq!(mailbox.email.to_string(), "noreply@modl.gg");
        assert_eq!(mailbox.name.as_deref(), Some("modl"));
    }

    #[test]
    fn sender_mailbox_rejects_bad_domain() {
        assert!(matches!(
            sender_mailbox("not a domain"),
            Err(NotifyError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn build_message_sets_headers_and_alternatives() {
        let from = sender_mailbox("modl.gg").unwrap();
        let mail = verification_email("owner@example.com", "coolserver", "modl.gg", "abc");

        let message = build_message(&from, &mail).unwrap();
        let formatted = String::from_utf8(message.formatted()).unwrap();

        assert!(formatted.contains("From: "));
        assert!(formatted.contains("<noreply@modl.gg>"));
        assert!(formatted.contains("To: owner@example.com"));
        assert!(formatted.contains("Subject: Verify Your Email Address for modl"));
        assert!(formatted.contains("multipart/alternative"));
        assert!(formatted.contains("text/plain"));
        assert!(formatted.contains("text/html"));
    }

    #[test]
    fn build_message_rejects_bad_recipient() {
        let from = sender_mailbox("modl.gg").unwrap();
        let mail = verification_email("not-an-address", "coolserver", "modl.gg", "abc");

        assert!(matches!(
            build_message(&from, &mail),
            Err(NotifyError::InvalidAddress { .. })
        ));
    }

    #[tokio::test]
    async fn smtp_notifier_builds_with_and_without_credentials() {
        let notifier = SmtpNotifier::new(&smtp_config(), "modl.gg", Duration::from_secs(5));
        assert!(notifier.is_ok());

        let mut config = smtp_config();
        config.username = Some("user".to_string());
        config.password = Some("pass".to_string());
        let notifier = SmtpNotifier::new(&config, "modl.gg", Duration::from_secs(5)).unwrap();
        assert!(!format!("{notifier:?}").contains("pass"));
    }

    #[tokio::test]
    async fn smtp_notifier_reports_unreachable_relay() {
        let config = SmtpConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            username: None,
            password: None,
        };
        let notifier = SmtpNotifier::new(&config, "modl.gg", Duration::from_secs(2)).unwrap();
        let mail = verification_email("owner@example.com", "coolserver", "modl.gg", "abc");

        let result = notifier.send_mail(&mail).await;
        assert!(matches!(
            result,
            Err(NotifyError::Transport(_)) | Err(NotifyError::Timeout(_))
        ));
    }
}
