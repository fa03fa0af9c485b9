//! Case event handler — starts and cancels collection sequences in
//! response to invoice/payment events.
//!
//! Processing is idempotent: every event carries an id that is checked and
//! written against the store's `processed_events` table, so a redelivered
//! event is a no-op even across restarts.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use caseclaw_core::error::Result;

use crate::persistence::CaseDb;
use crate::sequence::SequenceEngine;

/// An event from the surrounding invoice/payment layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CaseEvent {
    /// The underlying invoice went (further) overdue.
    InvoiceOverdue {
        event_id: String,
        case_id: String,
        tenant_id: String,
        days_overdue: i64,
        outstanding: f64,
    },
    /// The debtor paid (part of) the outstanding amount.
    PaymentReceived {
        event_id: String,
        case_id: String,
        tenant_id: String,
        amount: f64,
    },
    /// The case was closed elsewhere.
    CaseClosed {
        event_id: String,
        case_id: String,
        tenant_id: String,
        reason: String,
    },
}

impl CaseEvent {
    pub fn event_id(&self) -> &str {
        match self {
            CaseEvent::InvoiceOverdue { event_id, .. }
            | CaseEvent::PaymentReceived { event_id, .. }
            | CaseEvent::CaseClosed { event_id, .. } => event_id,
        }
    }
}

/// What handling an event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// Already processed — skipped.
    Duplicate,
    /// A sequence was started (template name).
    SequenceStarted(String),
    /// The active sequence was cancelled.
    SequenceCancelled,
    /// Nothing to do (e.g. no active sequence to cancel).
    NoOp,
}

/// Escalation ladder: outreach tone follows how overdue the invoice is.
pub fn template_for_overdue(days_overdue: i64) -> &'static str {
    if days_overdue < 30 {
        "friendly"
    } else if days_overdue < 60 {
        "formal"
    } else {
        "legal"
    }
}

/// Routes case events to the sequence engine, exactly once per event id.
pub struct EventProcessor {
    db: Arc<CaseDb>,
    sequences: Arc<SequenceEngine>,
}

impl EventProcessor {
    pub fn new(db: Arc<CaseDb>, sequences: Arc<SequenceEngine>) -> Self {
        Self { db, sequences }
    }

    /// Handle one event. Redeliveries of the same event id are skipped.
    pub async fn handle(&self, event: CaseEvent) -> Result<EventOutcome> {
        if !self.db.mark_event_processed(event.event_id())? {
            tracing::debug!("🔁 event {} already processed, skipping", event.event_id());
            return Ok(EventOutcome::Duplicate);
        }

        match event {
            CaseEvent::InvoiceOverdue {
                case_id,
                tenant_id,
                days_overdue,
                outstanding,
                ..
            } => {
                let template = template_for_overdue(days_overdue);
                tracing::info!(
                    "📅 case {case_id}: {days_overdue}d overdue ({outstanding} outstanding), starting '{template}'"
                );
                self.sequences
                    .start_sequence(&case_id, &tenant_id, template)?;
                Ok(EventOutcome::SequenceStarted(template.to_string()))
            }
            CaseEvent::PaymentReceived {
                case_id,
                tenant_id,
                amount,
                ..
            } => {
                tracing::info!("💰 case {case_id}: payment of {amount} received");
                match self.sequences.cancel_for_case(&case_id, &tenant_id)? {
                    Some(_) => Ok(EventOutcome::SequenceCancelled),
                    None => Ok(EventOutcome::NoOp),
                }
            }
            CaseEvent::CaseClosed {
                case_id,
                tenant_id,
                reason,
                ..
            } => {
                tracing::info!("📪 case {case_id} closed ({reason})");
                match self.sequences.cancel_for_case(&case_id, &tenant_id)? {
                    Some(_) => Ok(EventOutcome::SequenceCancelled),
                    None => Ok(EventOutcome::NoOp),
                }
            }
        }
    }
}
