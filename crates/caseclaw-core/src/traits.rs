//! Boundary traits toward external collaborators.
//!
//! The engines never own the case entity or the delivery channels — they
//! talk to them through these traits so the binary can wire real
//! implementations and tests can wire recording mocks.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{CaseRecord, CaseStatus, OutreachMessage};

/// Read/write access to the case entity.
///
/// Reads feed approval-threshold lookup and condition evaluation; the only
/// write is the status update performed as a side effect of approval
/// completion or rejection.
pub trait CaseDirectory: Send + Sync {
    /// Fetch a case scoped to its tenant.
    fn find_case(&self, case_id: &str, tenant_id: &str) -> Result<CaseRecord>;

    /// Update the case status, optionally appending a note.
    fn update_case_status(
        &self,
        case_id: &str,
        tenant_id: &str,
        status: CaseStatus,
        note: Option<&str>,
    ) -> Result<()>;
}

/// Fire-and-forget notification dispatch (approver emails, requester
/// updates). Failures are logged by the caller, never thrown back into
/// engine control flow.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

/// One outreach channel (email, SMS, WhatsApp, legal notice, call).
///
/// Same fire-and-forget contract as [`Notifier`]; the sequence engine
/// records a failed send on the owning step and retries on the next tick.
#[async_trait]
pub trait OutreachChannel: Send + Sync {
    /// Stable channel name used for routing (`"email"`, `"sms"`, ...).
    fn name(&self) -> &str;

    /// Dispatch one message.
    async fn send(&self, message: &OutreachMessage) -> Result<()>;
}
