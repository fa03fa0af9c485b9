//! Shared domain types — the case record the engines act upon and the
//! message shape handed to outreach channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Actor name stamped on automatic transitions and system-generated rows.
pub const SYSTEM_ACTOR: &str = "SYSTEM";

/// Business status of a dispute/collection case.
///
/// The case entity itself lives outside the engines — they read it for
/// approval thresholds and condition evaluation, and write its status as a
/// side effect of approval completion/rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Draft,
    Filed,
    UnderReview,
    Negotiating,
    Resolved,
    Closed,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Draft => "draft",
            CaseStatus::Filed => "filed",
            CaseStatus::UnderReview => "under_review",
            CaseStatus::Negotiating => "negotiating",
            CaseStatus::Resolved => "resolved",
            CaseStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(CaseStatus::Draft),
            "filed" => Some(CaseStatus::Filed),
            "under_review" => Some(CaseStatus::UnderReview),
            "negotiating" => Some(CaseStatus::Negotiating),
            "resolved" => Some(CaseStatus::Resolved),
            "closed" => Some(CaseStatus::Closed),
            _ => None,
        }
    }

    /// Terminal statuses accept no further engine writes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CaseStatus::Resolved | CaseStatus::Closed)
    }
}

impl std::fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A dispute/collection case as seen through the engine boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseRecord {
    pub id: String,
    pub tenant_id: String,
    /// Human-facing case number, e.g. `DSP-18C3A2F4-9B21`.
    pub case_number: String,
    pub customer_id: String,
    pub customer_name: String,
    /// Debtor contact points used by the outreach channels.
    pub debtor_email: Option<String>,
    pub debtor_phone: Option<String>,
    /// Disputed / outstanding monetary amount.
    pub amount: f64,
    pub status: CaseStatus,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CaseRecord {
    /// Create a new draft case with a generated id and case number.
    pub fn new(
        tenant_id: &str,
        customer_id: &str,
        customer_name: &str,
        amount: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            case_number: generate_case_number(),
            customer_id: customer_id.to_string(),
            customer_name: customer_name.to_string(),
            debtor_email: None,
            debtor_phone: None,
            amount,
            status: CaseStatus::Draft,
            notes: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_contact(mut self, email: Option<&str>, phone: Option<&str>) -> Self {
        self.debtor_email = email.map(String::from);
        self.debtor_phone = phone.map(String::from);
        self
    }
}

/// Generate a unique human-facing case number.
fn generate_case_number() -> String {
    let millis = Utc::now().timestamp_millis();
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("DSP-{:X}-{}", millis, random[..4].to_uppercase())
}

/// A message handed to an outreach channel adapter.
///
/// Channels are fire-and-forget: the engine records the outcome on the
/// owning step, the channel never mutates engine state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutreachMessage {
    /// Destination address — email, phone number, or provider-specific id.
    pub to: String,
    /// Subject line (email/legal-notice channels; ignored elsewhere).
    pub subject: Option<String>,
    /// Rendered body text.
    pub body: String,
    /// Template reference the body was rendered from.
    pub template: String,
    /// Case number for audit/reference lines.
    pub case_number: String,
    pub tenant_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_status_roundtrip() {
        for s in [
            CaseStatus::Draft,
            CaseStatus::Filed,
            CaseStatus::UnderReview,
            CaseStatus::Negotiating,
            CaseStatus::Resolved,
            CaseStatus::Closed,
        ] {
            assert_eq!(CaseStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(CaseStatus::parse("bogus"), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(CaseStatus::Closed.is_terminal());
        assert!(CaseStatus::Resolved.is_terminal());
        assert!(!CaseStatus::UnderReview.is_terminal());
    }

    #[test]
    fn test_new_case() {
        let c = CaseRecord::new("tenant-1", "cust-1", "Acme Traders", 250_000.0)
            .with_contact(Some("billing@acme.example"), Some("+911234567890"));
        assert!(c.case_number.starts_with("DSP-"));
        assert_eq!(c.status, CaseStatus::Draft);
        assert_eq!(c.debtor_email.as_deref(), Some("billing@acme.example"));
    }

    #[test]
    fn test_case_numbers_unique() {
        let a = CaseRecord::new("t", "c", "n", 1.0);
        let b = CaseRecord::new("t", "c", "n", 1.0);
        assert_ne!(a.case_number, b.case_number);
    }
}
