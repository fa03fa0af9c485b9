//! CaseClaw configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CaseClawError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseClawConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
}

impl Default for CaseClawConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            scheduler: SchedulerConfig::default(),
            notify: NotifyConfig::default(),
            channel: ChannelConfig::default(),
        }
    }
}

impl CaseClawConfig {
    /// Load config from the default path (~/.caseclaw/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CaseClawError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| CaseClawError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| CaseClawError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the CaseClaw home directory (~/.caseclaw).
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".caseclaw")
    }
}

/// State-store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    CaseClawConfig::home_dir().join("caseclaw.db")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Background sweep cadences and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between automatic workflow-transition sweeps.
    #[serde(default = "default_workflow_sweep")]
    pub workflow_sweep_secs: u64,
    /// Seconds between collection-sequence step sweeps.
    #[serde(default = "default_sequence_sweep")]
    pub sequence_sweep_secs: u64,
    /// Maximum dispatch attempts per sequence step before giving up.
    #[serde(default = "default_step_max_attempts")]
    pub step_max_attempts: u32,
}

fn default_workflow_sweep() -> u64 {
    300
}
fn default_sequence_sweep() -> u64 {
    3600
}
fn default_step_max_attempts() -> u32 {
    5
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workflow_sweep_secs: default_workflow_sweep(),
            sequence_sweep_secs: default_sequence_sweep(),
            step_max_attempts: default_step_max_attempts(),
        }
    }
}

/// Notifier defaults (approver / requester emails).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotifyConfig {
    /// From-address for engine-generated notifications.
    #[serde(default)]
    pub from_email: String,
    /// Display name on outgoing notifications.
    #[serde(default)]
    pub from_name: String,
}

/// Per-channel adapter configuration. A missing section leaves that
/// channel unconfigured — sequence steps routed to it fail and retry.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelConfig {
    #[serde(default)]
    pub email: Option<SmtpConfig>,
    #[serde(default)]
    pub sms: Option<SmsConfig>,
    #[serde(default)]
    pub whatsapp: Option<WhatsAppConfig>,
    #[serde(default)]
    pub legal_post: Option<LegalPostConfig>,
    #[serde(default)]
    pub call: Option<CallConfig>,
}

/// Outbound SMTP configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_smtp_port() -> u16 {
    587
}

/// SMS provider configuration (Twilio-compatible REST API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsConfig {
    pub account_sid: String,
    pub auth_token: String,
    /// Sender number in E.164 form.
    pub from_number: String,
    #[serde(default = "default_sms_api")]
    pub api_base: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_sms_api() -> String {
    "https://api.twilio.com".into()
}

/// WhatsApp Business Cloud API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    pub access_token: String,
    pub phone_number_id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Legal-notice dispatch provider (registered post / courier API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegalPostConfig {
    pub api_url: String,
    pub api_key: String,
    /// Sender name printed on the notice.
    #[serde(default)]
    pub sender_name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Outbound-call task provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    pub api_url: String,
    pub api_key: String,
    /// Caller id in E.164 form.
    pub from_number: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = CaseClawConfig::default();
        assert_eq!(cfg.scheduler.workflow_sweep_secs, 300);
        assert_eq!(cfg.scheduler.sequence_sweep_secs, 3600);
        assert_eq!(cfg.scheduler.step_max_attempts, 5);
        assert!(cfg.channel.email.is_none());
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_src = r#"
            [scheduler]
            workflow_sweep_secs = 60

            [channel.sms]
            account_sid = "AC123"
            auth_token = "secret"
            from_number = "+15550100"
        "#;
        let cfg: CaseClawConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(cfg.scheduler.workflow_sweep_secs, 60);
        // Unspecified fields fall back to defaults
        assert_eq!(cfg.scheduler.sequence_sweep_secs, 3600);
        let sms = cfg.channel.sms.unwrap();
        assert_eq!(sms.from_number, "+15550100");
        assert_eq!(sms.api_base, "https://api.twilio.com");
        assert!(sms.enabled);
    }
}
