//! Email channel — outbound SMTP via async lettre.
//!
//! Carries both collection-sequence email steps and engine notifications
//! (approver assignments, requester updates). Outbound only; inbound mail
//! is handled elsewhere.

use async_trait::async_trait;

use caseclaw_core::config::SmtpConfig;
use caseclaw_core::error::{CaseClawError, Result};
use caseclaw_core::traits::{Notifier, OutreachChannel};
use caseclaw_core::types::OutreachMessage;

/// SMTP-backed email channel.
pub struct EmailChannel {
    config: SmtpConfig,
}

impl EmailChannel {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    /// Send one email via SMTP (async).
    pub async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        use lettre::{
            message::header::ContentType, message::Mailbox,
            transport::smtp::authentication::Credentials, AsyncSmtpTransport, AsyncTransport,
            Message as LettreMessage,
        };

        let from_name = self.config.display_name.as_deref().unwrap_or("CaseClaw");
        let from_mailbox: Mailbox = format!("{from_name} <{}>", self.config.email)
            .parse()
            .map_err(|e| CaseClawError::Channel(format!("Invalid from: {e}")))?;

        let to_mailbox: Mailbox = to
            .parse()
            .map_err(|e| CaseClawError::Channel(format!("Invalid to: {e}")))?;

        let email = LettreMessage::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| CaseClawError::Channel(format!("Build email: {e}")))?;

        let creds = Credentials::new(self.config.email.clone(), self.config.password.clone());

        let mailer =
            AsyncSmtpTransport::<lettre::Tokio1Executor>::starttls_relay(&self.config.smtp_host)
                .map_err(|e| CaseClawError::Channel(format!("SMTP relay: {e}")))?
                .port(self.config.smtp_port)
                .credentials(creds)
                .build();

        mailer
            .send(email)
            .await
            .map_err(|e| CaseClawError::Channel(format!("SMTP send: {e}")))?;

        tracing::info!("📤 Email sent to: {to}");
        Ok(())
    }
}

#[async_trait]
impl OutreachChannel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    async fn send(&self, message: &OutreachMessage) -> Result<()> {
        let subject = message
            .subject
            .as_deref()
            .unwrap_or("Regarding your account");
        self.send_email(&message.to, subject, &message.body).await
    }
}

#[async_trait]
impl Notifier for EmailChannel {
    async fn notify(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        self.send_email(to, subject, body).await
    }
}

/// Notifier that only logs — used when no SMTP section is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, to: &str, subject: &str, _body: &str) -> Result<()> {
        tracing::info!("📢 notification for {to}: {subject}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SmtpConfig {
        SmtpConfig {
            smtp_host: "smtp.example.com".into(),
            smtp_port: 587,
            email: "collections@example.com".into(),
            password: "secret".into(),
            display_name: Some("Acme Collections".into()),
            enabled: true,
        }
    }

    #[test]
    fn test_channel_name() {
        let ch = EmailChannel::new(config());
        assert_eq!(ch.name(), "email");
    }

    #[tokio::test]
    async fn test_invalid_recipient_rejected_before_send() {
        let ch = EmailChannel::new(config());
        let err = ch.send_email("not-an-address", "subject", "body").await;
        assert!(matches!(err, Err(CaseClawError::Channel(_))));
    }

    #[tokio::test]
    async fn test_log_notifier_always_succeeds() {
        LogNotifier
            .notify("a@b.example", "subject", "body")
            .await
            .unwrap();
    }
}
