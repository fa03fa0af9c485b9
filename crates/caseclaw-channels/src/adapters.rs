//! Additional outreach adapters: legal-notice dispatch and outbound-call
//! tasks.
//!
//! Both follow the same provider-REST pattern as the other channels — the
//! configuration + request layer lives here, the provider does the
//! physical delivery.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use caseclaw_core::config::{CallConfig, LegalPostConfig};
use caseclaw_core::error::{CaseClawError, Result};
use caseclaw_core::traits::OutreachChannel;
use caseclaw_core::types::OutreachMessage;

// ═══════════════════════════════════════════════════════
// Legal notice (registered post / courier provider)
// ═══════════════════════════════════════════════════════

/// Payload posted to the legal-notice provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegalNoticeRequest {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub case_number: String,
    pub sender_name: String,
}

pub struct LegalNoticeChannel {
    config: LegalPostConfig,
    client: reqwest::Client,
}

impl LegalNoticeChannel {
    pub fn new(config: LegalPostConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Build the provider payload for a message.
    pub fn build_request(&self, message: &OutreachMessage) -> LegalNoticeRequest {
        LegalNoticeRequest {
            recipient: message.to.clone(),
            subject: message
                .subject
                .clone()
                .unwrap_or_else(|| format!("Legal notice: case {}", message.case_number)),
            body: message.body.clone(),
            case_number: message.case_number.clone(),
            sender_name: self.config.sender_name.clone(),
        }
    }
}

#[async_trait]
impl OutreachChannel for LegalNoticeChannel {
    fn name(&self) -> &str {
        "legal_notice"
    }

    async fn send(&self, message: &OutreachMessage) -> Result<()> {
        if self.config.api_url.is_empty() {
            return Err(CaseClawError::Config(
                "legal_post api_url not configured".into(),
            ));
        }
        let request = self.build_request(message);
        let response = self
            .client
            .post(format!("{}/v1/notices", self.config.api_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request)
            .timeout(std::time::Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| CaseClawError::Channel(format!("legal notice: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(CaseClawError::Channel(format!(
                "legal notice provider error {status}"
            )));
        }

        tracing::info!(
            "📤 Legal notice dispatched for case {}",
            message.case_number
        );
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════
// Outbound-call task (telephony provider)
// ═══════════════════════════════════════════════════════

pub struct CallChannel {
    config: CallConfig,
    client: reqwest::Client,
}

impl CallChannel {
    pub fn new(config: CallConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl OutreachChannel for CallChannel {
    fn name(&self) -> &str {
        "call"
    }

    async fn send(&self, message: &OutreachMessage) -> Result<()> {
        if self.config.api_url.is_empty() {
            return Err(CaseClawError::Config("call api_url not configured".into()));
        }
        let body = serde_json::json!({
            "to": message.to,
            "from": self.config.from_number,
            "script": message.body,
            "reference": message.case_number,
        });
        let response = self
            .client
            .post(format!("{}/v1/calls", self.config.api_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&body)
            .timeout(std::time::Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| CaseClawError::Channel(format!("call task: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(CaseClawError::Channel(format!(
                "call provider error {status}"
            )));
        }

        tracing::info!("📞 Call task queued for case {}", message.case_number);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════
// Supported channel names for registry
// ═══════════════════════════════════════════════════════

/// All outreach channels CaseClaw can route sequence steps to.
pub const ALL_CHANNEL_NAMES: &[(&str, &str)] = &[
    ("email", "Outbound SMTP email"),
    ("sms", "Twilio-compatible SMS"),
    ("whatsapp", "WhatsApp Business Cloud API"),
    ("legal_notice", "Registered-post legal notice provider"),
    ("call", "Outbound-call task provider"),
];

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> OutreachMessage {
        OutreachMessage {
            to: "billing@acme.example".into(),
            subject: None,
            body: "Settle the outstanding amount.".into(),
            template: "legal_notice".into(),
            case_number: "DSP-42".into(),
            tenant_id: "t1".into(),
        }
    }

    #[test]
    fn test_legal_notice_request_defaults_subject() {
        let ch = LegalNoticeChannel::new(LegalPostConfig {
            api_url: "https://post.example".into(),
            api_key: "k".into(),
            sender_name: "Acme Legal".into(),
            enabled: true,
        });
        let req = ch.build_request(&message());
        assert_eq!(req.subject, "Legal notice: case DSP-42");
        assert_eq!(req.sender_name, "Acme Legal");
        assert_eq!(req.recipient, "billing@acme.example");
    }

    #[tokio::test]
    async fn test_unconfigured_legal_channel_fails_fast() {
        let ch = LegalNoticeChannel::new(LegalPostConfig {
            api_url: String::new(),
            api_key: String::new(),
            sender_name: String::new(),
            enabled: true,
        });
        assert!(matches!(
            ch.send(&message()).await,
            Err(CaseClawError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_unconfigured_call_channel_fails_fast() {
        let ch = CallChannel::new(CallConfig {
            api_url: String::new(),
            api_key: String::new(),
            from_number: "+15550100".into(),
            enabled: true,
        });
        assert!(matches!(
            ch.send(&message()).await,
            Err(CaseClawError::Config(_))
        ));
    }

    #[test]
    fn test_channel_names_unique() {
        let names: Vec<_> = ALL_CHANNEL_NAMES.iter().map(|(n, _)| *n).collect();
        let mut unique = names.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(names.len(), unique.len(), "Channel names must be unique");
    }
}
