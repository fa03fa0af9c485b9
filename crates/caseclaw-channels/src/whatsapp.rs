//! WhatsApp Business Cloud API channel.
//!
//! Uses the official WhatsApp Business Platform (Cloud API) for outreach
//! messages. Requires: Access Token + Phone Number ID from Meta Business
//! Suite.

use async_trait::async_trait;

use caseclaw_core::config::WhatsAppConfig;
use caseclaw_core::error::{CaseClawError, Result};
use caseclaw_core::traits::OutreachChannel;
use caseclaw_core::types::OutreachMessage;

/// WhatsApp Business channel implementation.
pub struct WhatsAppChannel {
    config: WhatsAppConfig,
    client: reqwest::Client,
}

impl WhatsAppChannel {
    pub fn new(config: WhatsAppConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Send a text message via WhatsApp Cloud API.
    async fn send_text_message(&self, to: &str, text: &str) -> Result<String> {
        let url = format!(
            "https://graph.facebook.com/v21.0/{}/messages",
            self.config.phone_number_id
        );

        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "text",
            "text": {
                "preview_url": false,
                "body": text
            }
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.access_token))
            .header("Content-Type", "application/json")
            .json(&body)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| CaseClawError::Channel(format!("WhatsApp API request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(CaseClawError::Channel(format!(
                "WhatsApp API error {}: {}",
                status, error_text
            )));
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CaseClawError::Channel(format!("Invalid WhatsApp response: {e}")))?;

        let msg_id = result["messages"][0]["id"]
            .as_str()
            .unwrap_or("unknown")
            .to_string();

        tracing::debug!("WhatsApp message sent: {} → {}", msg_id, to);
        Ok(msg_id)
    }
}

#[async_trait]
impl OutreachChannel for WhatsAppChannel {
    fn name(&self) -> &str {
        "whatsapp"
    }

    async fn send(&self, message: &OutreachMessage) -> Result<()> {
        if self.config.access_token.is_empty() || self.config.phone_number_id.is_empty() {
            return Err(CaseClawError::Config(
                "WhatsApp access_token/phone_number_id not configured".into(),
            ));
        }
        self.send_text_message(&message.to, &message.body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name() {
        let ch = WhatsAppChannel::new(WhatsAppConfig {
            access_token: "t".into(),
            phone_number_id: "p".into(),
            enabled: true,
        });
        assert_eq!(ch.name(), "whatsapp");
    }

    #[tokio::test]
    async fn test_unconfigured_send_fails_fast() {
        let ch = WhatsAppChannel::new(WhatsAppConfig {
            access_token: String::new(),
            phone_number_id: String::new(),
            enabled: true,
        });
        let msg = OutreachMessage {
            to: "+15550100".into(),
            subject: None,
            body: "hello".into(),
            template: "friendly_nudge".into(),
            case_number: "DSP-1".into(),
            tenant_id: "t1".into(),
        };
        let err = ch.send(&msg).await;
        assert!(matches!(err, Err(CaseClawError::Config(_))));
    }
}
