//! # CaseClaw Channels
//!
//! Concrete outreach/notification adapters: SMTP email, SMS, WhatsApp,
//! legal-notice post, and outbound-call tasks. All adapters share the
//! fire-and-forget [`OutreachChannel`] contract — the sequence engine
//! records failures on the owning step and retries.

pub mod adapters;
pub mod email;
pub mod sms;
pub mod whatsapp;

pub use adapters::{CallChannel, LegalNoticeChannel, ALL_CHANNEL_NAMES};
pub use email::{EmailChannel, LogNotifier};
pub use sms::SmsChannel;
pub use whatsapp::WhatsAppChannel;

use std::sync::Arc;

use caseclaw_core::config::ChannelConfig;
use caseclaw_core::traits::{Notifier, OutreachChannel};

/// Build every configured + enabled channel adapter.
pub fn channels_from_config(config: &ChannelConfig) -> Vec<Arc<dyn OutreachChannel>> {
    let mut channels: Vec<Arc<dyn OutreachChannel>> = Vec::new();

    if let Some(smtp) = &config.email {
        if smtp.enabled {
            channels.push(Arc::new(EmailChannel::new(smtp.clone())));
        }
    }
    if let Some(sms) = &config.sms {
        if sms.enabled {
            channels.push(Arc::new(SmsChannel::new(sms.clone())));
        }
    }
    if let Some(wa) = &config.whatsapp {
        if wa.enabled {
            channels.push(Arc::new(WhatsAppChannel::new(wa.clone())));
        }
    }
    if let Some(legal) = &config.legal_post {
        if legal.enabled {
            channels.push(Arc::new(LegalNoticeChannel::new(legal.clone())));
        }
    }
    if let Some(call) = &config.call {
        if call.enabled {
            channels.push(Arc::new(CallChannel::new(call.clone())));
        }
    }

    tracing::info!("📡 {} outreach channel(s) configured", channels.len());
    channels
}

/// Build the engine notifier: SMTP when configured, log-only otherwise.
pub fn notifier_from_config(config: &ChannelConfig) -> Arc<dyn Notifier> {
    match &config.email {
        Some(smtp) if smtp.enabled => Arc::new(EmailChannel::new(smtp.clone())),
        _ => Arc::new(LogNotifier),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caseclaw_core::config::{SmsConfig, SmtpConfig};

    #[test]
    fn test_channels_from_empty_config() {
        let channels = channels_from_config(&ChannelConfig::default());
        assert!(channels.is_empty());
    }

    #[test]
    fn test_channels_from_config_respects_enabled_flag() {
        let config = ChannelConfig {
            email: Some(SmtpConfig {
                smtp_host: "smtp.example.com".into(),
                smtp_port: 587,
                email: "x@example.com".into(),
                password: "p".into(),
                display_name: None,
                enabled: true,
            }),
            sms: Some(SmsConfig {
                account_sid: "AC1".into(),
                auth_token: "t".into(),
                from_number: "+15550100".into(),
                api_base: "https://api.twilio.com".into(),
                enabled: false,
            }),
            ..Default::default()
        };
        let channels = channels_from_config(&config);
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].name(), "email");
    }
}
