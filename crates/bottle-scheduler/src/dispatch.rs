//! Mail dispatch: transports behind `MailTransport`.
//! Supports: SMTP (lettre, async), log-only, and in-memory recording.

use std::sync::Mutex;

use async_trait::async_trait;
use bottle_core::config::{MailConfig, MailMode};
use bottle_core::error::{BottleError, Result};
use bottle_core::traits::MailTransport;

/// SMTP transport.
/// No password → plain connection without auth (local relay);
/// password set → STARTTLS relay with credentials.
pub struct SmtpMailer {
    config: MailConfig,
}

impl SmtpMailer {
    pub fn new(config: MailConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn send(&self, from: &str, to: &str, subject: &str, body: &str) -> Result<()> {
        use lettre::{
            AsyncSmtpTransport, AsyncTransport, Message as LettreMessage, message::Mailbox,
            message::header::ContentType, transport::smtp::authentication::Credentials,
        };

        let from_mailbox: Mailbox = from
            .parse()
            .map_err(|e| BottleError::Mail(format!("Invalid from: {e}")))?;
        let to_mailbox: Mailbox = to
            .parse()
            .map_err(|e| BottleError::Mail(format!("Invalid to: {e}")))?;

        let email = LettreMessage::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| BottleError::Mail(format!("Build email: {e}")))?;

        let timeout = Some(std::time::Duration::from_secs(self.config.timeout_secs));
        let mailer = if self.config.password.is_empty() {
            AsyncSmtpTransport::<lettre::Tokio1Executor>::builder_dangerous(&self.config.smtp_host)
                .port(self.config.smtp_port)
                .timeout(timeout)
                .build()
        } else {
            let username = if self.config.username.is_empty() {
                self.config.from_address.clone()
            } else {
                self.config.username.clone()
            };
            let creds = Credentials::new(username, self.config.password.clone());
            AsyncSmtpTransport::<lettre::Tokio1Executor>::starttls_relay(&self.config.smtp_host)
                .map_err(|e| BottleError::Mail(format!("SMTP relay: {e}")))?
                .port(self.config.smtp_port)
                .credentials(creds)
                .timeout(timeout)
                .build()
        };

        mailer
            .send(email)
            .await
            .map_err(|e| BottleError::Mail(format!("SMTP send: {e}")))?;

        tracing::info!("📤 Email sent to: {to}");
        Ok(())
    }
}

/// Log-only transport for development.
pub struct LogMailer;

#[async_trait]
impl MailTransport for LogMailer {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, from: &str, to: &str, subject: &str, body: &str) -> Result<()> {
        tracing::info!("📧 [mail] {from} → {to} | {subject} | {body}");
        Ok(())
    }
}

/// A mail captured by `RecordingTransport`.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Keeps every sent mail in memory.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<SentMail>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, from: &str, to: &str, subject: &str, body: &str) -> Result<()> {
        let mut sent = self
            .sent
            .lock()
            .map_err(|e| BottleError::Mail(format!("Lock: {e}")))?;
        sent.push(SentMail {
            from: from.to_string(),
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

/// Build the transport selected by config.
pub fn transport_from_config(config: &MailConfig) -> Box<dyn MailTransport> {
    match config.mode {
        MailMode::Smtp => {
            tracing::info!(
                "📮 Mail via SMTP {}:{} (from {})",
                config.smtp_host,
                config.smtp_port,
                config.from_address
            );
            Box::new(SmtpMailer::new(config.clone()))
        }
        MailMode::Log => {
            tracing::info!("📮 Mail transport: log only");
            Box::new(LogMailer)
        }
    }
}
