//! SMS channel — Twilio-compatible Messages REST API.

use async_trait::async_trait;

use caseclaw_core::config::SmsConfig;
use caseclaw_core::error::{CaseClawError, Result};
use caseclaw_core::traits::OutreachChannel;
use caseclaw_core::types::OutreachMessage;

/// SMS limits are tight; bodies get truncated to a safe length.
const MAX_SMS_CHARS: usize = 320;

/// Twilio-style SMS channel.
pub struct SmsChannel {
    config: SmsConfig,
    client: reqwest::Client,
}

impl SmsChannel {
    pub fn new(config: SmsConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    async fn send_sms(&self, to: &str, body: &str) -> Result<()> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.api_base, self.config.account_sid
        );

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[
                ("To", to),
                ("From", self.config.from_number.as_str()),
                ("Body", body),
            ])
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| CaseClawError::Channel(format!("SMS API request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(CaseClawError::Channel(format!(
                "SMS API error {}: {}",
                status, error_text
            )));
        }

        tracing::info!("📤 SMS sent to: {to}");
        Ok(())
    }
}

/// Clamp a body to SMS length on a char boundary.
pub fn clamp_sms_body(body: &str) -> String {
    body.chars().take(MAX_SMS_CHARS).collect()
}

#[async_trait]
impl OutreachChannel for SmsChannel {
    fn name(&self) -> &str {
        "sms"
    }

    async fn send(&self, message: &OutreachMessage) -> Result<()> {
        if self.config.account_sid.is_empty() || self.config.auth_token.is_empty() {
            return Err(CaseClawError::Config(
                "SMS account_sid/auth_token not configured".into(),
            ));
        }
        self.send_sms(&message.to, &clamp_sms_body(&message.body))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name() {
        let ch = SmsChannel::new(SmsConfig {
            account_sid: "AC1".into(),
            auth_token: "t".into(),
            from_number: "+15550100".into(),
            api_base: "https://api.twilio.com".into(),
            enabled: true,
        });
        assert_eq!(ch.name(), "sms");
    }

    #[test]
    fn test_clamp_sms_body() {
        let long = "x".repeat(1000);
        assert_eq!(clamp_sms_body(&long).chars().count(), 320);
        assert_eq!(clamp_sms_body("short"), "short");
    }

    #[tokio::test]
    async fn test_unconfigured_send_fails_fast() {
        let ch = SmsChannel::new(SmsConfig {
            account_sid: String::new(),
            auth_token: String::new(),
            from_number: "+15550100".into(),
            api_base: "https://api.twilio.com".into(),
            enabled: true,
        });
        let msg = OutreachMessage {
            to: "+15550199".into(),
            subject: None,
            body: "overdue".into(),
            template: "formal_reminder".into(),
            case_number: "DSP-1".into(),
            tenant_id: "t1".into(),
        };
        assert!(matches!(ch.send(&msg).await, Err(CaseClawError::Config(_))));
    }
}
