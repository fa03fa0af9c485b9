//! Collection Sequence Engine — scheduled multi-channel outreach.
//!
//! A sequence is a list of time-offset steps (channel + template + delay)
//! expanded from a named template when collection starts. The hourly sweep
//! executes at most one step per sequence per tick, strictly in array
//! order: the head step runs only once it is due, a failed dispatch keeps
//! the cursor in place and retries next tick until the attempt cap, and
//! pause/cancel take effect at the next tick observation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use caseclaw_core::error::{CaseClawError, Result};
use caseclaw_core::traits::{CaseDirectory, OutreachChannel};
use caseclaw_core::types::{CaseRecord, OutreachMessage};

use crate::persistence::CaseDb;

// ─── Steps ───────────────────────────────────────────────

/// Delivery channel of one outreach step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepChannel {
    Email,
    Sms,
    Call,
    Whatsapp,
    LegalNotice,
}

impl StepChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepChannel::Email => "email",
            StepChannel::Sms => "sms",
            StepChannel::Call => "call",
            StepChannel::Whatsapp => "whatsapp",
            StepChannel::LegalNotice => "legal_notice",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "email" => Some(StepChannel::Email),
            "sms" => Some(StepChannel::Sms),
            "call" => Some(StepChannel::Call),
            "whatsapp" => Some(StepChannel::Whatsapp),
            "legal_notice" => Some(StepChannel::LegalNotice),
            _ => None,
        }
    }
}

impl std::fmt::Display for StepChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Execution status of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Sent,
    Skipped,
    Failed,
}

/// One scheduled outreach action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceStep {
    pub channel: StepChannel,
    /// Message template reference.
    pub template: String,
    /// Offset from sequence start.
    pub delay_days: i64,
    pub status: StepStatus,
    pub scheduled_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    /// Dispatch attempts so far (failed sends retry every tick up to the
    /// configured cap).
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
}

/// Overall status of a sequence run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl SequenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SequenceStatus::Active => "active",
            SequenceStatus::Paused => "paused",
            SequenceStatus::Completed => "completed",
            SequenceStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SequenceStatus::Active),
            "paused" => Some(SequenceStatus::Paused),
            "completed" => Some(SequenceStatus::Completed),
            "cancelled" => Some(SequenceStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SequenceStatus::Completed | SequenceStatus::Cancelled)
    }
}

/// One outreach run for a case. Only one sequence may be active per case
/// at a time; the cursor never exceeds the step count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSequence {
    pub id: String,
    pub case_id: String,
    pub tenant_id: String,
    /// Name of the template this run was expanded from.
    pub template: String,
    pub steps: Vec<SequenceStep>,
    pub status: SequenceStatus,
    /// Index of the next step to execute.
    pub current_step: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub version: u32,
}

// ─── Templates ───────────────────────────────────────────

/// One declared step of a named template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateStep {
    pub channel: StepChannel,
    pub template: String,
    pub delay_days: i64,
}

/// A named outreach cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceTemplate {
    pub name: String,
    pub steps: Vec<TemplateStep>,
}

fn template_step(channel: StepChannel, template: &str, delay_days: i64) -> TemplateStep {
    TemplateStep {
        channel,
        template: template.to_string(),
        delay_days,
    }
}

/// Built-in escalation ladder: friendly → formal → legal.
pub fn builtin_templates() -> Vec<SequenceTemplate> {
    vec![
        SequenceTemplate {
            name: "friendly".into(),
            steps: vec![
                template_step(StepChannel::Email, "friendly_reminder", 0),
                template_step(StepChannel::Whatsapp, "friendly_nudge", 7),
                template_step(StepChannel::Call, "courtesy_call", 14),
            ],
        },
        SequenceTemplate {
            name: "formal".into(),
            steps: vec![
                template_step(StepChannel::Email, "formal_notice", 0),
                template_step(StepChannel::Sms, "formal_reminder", 3),
                template_step(StepChannel::Email, "formal_followup", 7),
                template_step(StepChannel::LegalNotice, "pre_legal_warning", 21),
            ],
        },
        SequenceTemplate {
            name: "legal".into(),
            steps: vec![
                template_step(StepChannel::LegalNotice, "legal_notice", 0),
                template_step(StepChannel::Call, "legal_followup_call", 3),
                template_step(StepChannel::LegalNotice, "final_legal_notice", 14),
            ],
        },
    ]
}

// ─── Channel routing ─────────────────────────────────────

/// Routes a step to its registered channel adapter by name.
#[derive(Default)]
pub struct ChannelRouter {
    channels: HashMap<String, Arc<dyn OutreachChannel>>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, channel: Arc<dyn OutreachChannel>) {
        self.channels.insert(channel.name().to_string(), channel);
    }

    pub fn get(&self, channel: StepChannel) -> Option<&Arc<dyn OutreachChannel>> {
        self.channels.get(channel.as_str())
    }
}

// ─── Engine ──────────────────────────────────────────────

/// Outcome counters for one sequence-step sweep.
#[derive(Debug, Default, Clone, Copy)]
pub struct TickStats {
    pub scanned: usize,
    pub executed: usize,
    pub step_failures: usize,
    pub completed: usize,
    pub errors: usize,
}

/// The Collection Sequence Engine.
pub struct SequenceEngine {
    db: Arc<CaseDb>,
    cases: Arc<dyn CaseDirectory>,
    router: ChannelRouter,
    templates: Vec<SequenceTemplate>,
    /// Max dispatch attempts before a step is marked failed permanently
    /// and the cadence moves on.
    max_attempts: u32,
}

impl SequenceEngine {
    pub fn new(db: Arc<CaseDb>, cases: Arc<dyn CaseDirectory>, router: ChannelRouter) -> Self {
        Self {
            db,
            cases,
            router,
            templates: builtin_templates(),
            max_attempts: 5,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_templates(mut self, templates: Vec<SequenceTemplate>) -> Self {
        self.templates = templates;
        self
    }

    /// Start (or return the already-running) sequence for a case.
    ///
    /// Idempotent: an existing active sequence is returned unchanged — no
    /// duplicate run is created.
    pub fn start_sequence(
        &self,
        case_id: &str,
        tenant_id: &str,
        template_name: &str,
    ) -> Result<CollectionSequence> {
        self.cases.find_case(case_id, tenant_id)?;

        if let Some(existing) = self.db.active_sequence_for_case(case_id, tenant_id)? {
            tracing::debug!(
                "📨 case {case_id} already has active sequence {} ('{}')",
                existing.id,
                existing.template
            );
            return Ok(existing);
        }

        let template = self
            .templates
            .iter()
            .find(|t| t.name == template_name)
            .ok_or_else(|| {
                CaseClawError::not_found(format!("sequence template '{template_name}'"))
            })?;

        let now = Utc::now();
        let steps = template
            .steps
            .iter()
            .map(|s| SequenceStep {
                channel: s.channel,
                template: s.template.clone(),
                delay_days: s.delay_days,
                status: StepStatus::Pending,
                scheduled_at: now + Duration::days(s.delay_days),
                executed_at: None,
                attempts: 0,
                last_error: None,
            })
            .collect();

        let sequence = CollectionSequence {
            id: uuid::Uuid::new_v4().to_string(),
            case_id: case_id.to_string(),
            tenant_id: tenant_id.to_string(),
            template: template_name.to_string(),
            steps,
            status: SequenceStatus::Active,
            current_step: 0,
            started_at: now,
            completed_at: None,
            version: 0,
        };
        self.db.insert_sequence(&sequence)?;
        tracing::info!(
            "📨 started '{template_name}' sequence for case {case_id} ({} steps)",
            sequence.steps.len()
        );
        Ok(sequence)
    }

    pub fn get_sequence(&self, sequence_id: &str, tenant_id: &str) -> Result<CollectionSequence> {
        self.db
            .find_sequence(sequence_id, tenant_id)?
            .ok_or_else(|| CaseClawError::not_found(format!("sequence {sequence_id}")))
    }

    /// Active sequence for a case, if any.
    pub fn active_for_case(&self, case_id: &str, tenant_id: &str) -> Result<Option<CollectionSequence>> {
        self.db.active_sequence_for_case(case_id, tenant_id)
    }

    /// Pause an active sequence. The tick loop skips non-active runs.
    pub fn pause_sequence(&self, sequence_id: &str, tenant_id: &str) -> Result<CollectionSequence> {
        let mut seq = self.get_sequence(sequence_id, tenant_id)?;
        if seq.status != SequenceStatus::Active {
            return Err(CaseClawError::invalid_state(format!(
                "sequence is not active (current status: {})",
                seq.status.as_str()
            )));
        }
        seq.status = SequenceStatus::Paused;
        self.db.update_sequence(&seq)?;
        tracing::info!("⏸ sequence {sequence_id} paused");
        Ok(seq)
    }

    /// Resume a paused sequence. Steps whose scheduled time already passed
    /// fire on the very next tick — no re-scheduling.
    pub fn resume_sequence(&self, sequence_id: &str, tenant_id: &str) -> Result<CollectionSequence> {
        let mut seq = self.get_sequence(sequence_id, tenant_id)?;
        if seq.status != SequenceStatus::Paused {
            return Err(CaseClawError::invalid_state(format!(
                "sequence is not paused (current status: {})",
                seq.status.as_str()
            )));
        }
        seq.status = SequenceStatus::Active;
        self.db.update_sequence(&seq)?;
        tracing::info!("▶️ sequence {sequence_id} resumed");
        Ok(seq)
    }

    /// Cancel a sequence. Terminal and irreversible; remaining steps are
    /// left untouched.
    pub fn cancel_sequence(&self, sequence_id: &str, tenant_id: &str) -> Result<CollectionSequence> {
        let mut seq = self.get_sequence(sequence_id, tenant_id)?;
        if seq.status.is_terminal() {
            return Err(CaseClawError::invalid_state(format!(
                "sequence already {}",
                seq.status.as_str()
            )));
        }
        seq.status = SequenceStatus::Cancelled;
        seq.completed_at = Some(Utc::now());
        self.db.update_sequence(&seq)?;
        tracing::info!("🛑 sequence {sequence_id} cancelled");
        Ok(seq)
    }

    /// Cancel whatever sequence is active for a case, if any.
    pub fn cancel_for_case(&self, case_id: &str, tenant_id: &str) -> Result<Option<CollectionSequence>> {
        match self.db.active_sequence_for_case(case_id, tenant_id)? {
            Some(seq) => Ok(Some(self.cancel_sequence(&seq.id, tenant_id)?)),
            None => Ok(None),
        }
    }

    /// One sweep over every active sequence.
    ///
    /// Executes at most one step per sequence — no catch-up batching of
    /// multiple overdue steps in a single tick. Each sequence is processed
    /// in isolation.
    pub async fn process_due_steps(&self) -> TickStats {
        let mut stats = TickStats::default();
        let sequences = match self.db.active_sequences() {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("⚠️ sequence sweep could not list active runs: {e}");
                return stats;
            }
        };

        for seq in sequences {
            stats.scanned += 1;
            let id = seq.id.clone();
            if let Err(e) = self.tick_sequence(seq, &mut stats).await {
                stats.errors += 1;
                tracing::warn!("⚠️ sequence sweep failed for {id}: {e}");
            }
        }

        if stats.executed > 0 || stats.step_failures > 0 || stats.completed > 0 {
            tracing::info!(
                "📨 sequence sweep: {} scanned, {} sent, {} failed, {} completed",
                stats.scanned,
                stats.executed,
                stats.step_failures,
                stats.completed
            );
        }
        stats
    }

    /// Inspect one sequence's head step and execute it if due.
    async fn tick_sequence(&self, mut seq: CollectionSequence, stats: &mut TickStats) -> Result<()> {
        // Cursor past the end: the run is complete.
        if seq.current_step >= seq.steps.len() {
            seq.status = SequenceStatus::Completed;
            seq.completed_at = Some(Utc::now());
            self.db.update_sequence(&seq)?;
            stats.completed += 1;
            tracing::info!("🏁 sequence {} completed for case {}", seq.id, seq.case_id);
            return Ok(());
        }

        let now = Utc::now();
        let cursor = seq.current_step;
        if seq.steps[cursor].status != StepStatus::Pending || seq.steps[cursor].scheduled_at > now {
            return Ok(());
        }

        let case = self.cases.find_case(&seq.case_id, &seq.tenant_id)?;
        let step_channel = seq.steps[cursor].channel;
        let outcome = self.dispatch_step(&case, &seq, cursor).await;

        let step = &mut seq.steps[cursor];
        match outcome {
            Ok(()) => {
                step.status = StepStatus::Sent;
                step.executed_at = Some(now);
                step.attempts += 1;
                step.last_error = None;
                seq.current_step += 1;
                stats.executed += 1;
                tracing::info!(
                    "📤 case {}: step {} ({}) sent",
                    seq.case_id,
                    cursor,
                    step_channel
                );
            }
            Err(e) => {
                step.attempts += 1;
                step.last_error = Some(e.to_string());
                stats.step_failures += 1;
                if step.attempts >= self.max_attempts {
                    // Give up on this step; the rest of the cadence continues.
                    step.status = StepStatus::Failed;
                    seq.current_step += 1;
                    tracing::error!(
                        "❌ case {}: step {} ({}) failed permanently after {} attempts: {e}",
                        seq.case_id,
                        cursor,
                        step_channel,
                        step.attempts
                    );
                } else {
                    // Cursor stays put — the step retries next tick.
                    tracing::warn!(
                        "⚠️ case {}: step {} ({}) failed (attempt {}/{}): {e}",
                        seq.case_id,
                        cursor,
                        step_channel,
                        step.attempts,
                        self.max_attempts
                    );
                }
            }
        }

        self.db.update_sequence(&seq)?;
        Ok(())
    }

    async fn dispatch_step(
        &self,
        case: &CaseRecord,
        seq: &CollectionSequence,
        cursor: usize,
    ) -> Result<()> {
        let step = &seq.steps[cursor];
        let adapter = self.router.get(step.channel).ok_or_else(|| {
            CaseClawError::Dependency(format!("no adapter registered for channel {}", step.channel))
        })?;

        let to = destination_for(case, step.channel)?;
        let message = OutreachMessage {
            to,
            subject: Some(format!("Regarding case {}", case.case_number)),
            body: render_step_body(&step.template, case),
            template: step.template.clone(),
            case_number: case.case_number.clone(),
            tenant_id: seq.tenant_id.clone(),
        };
        adapter.send(&message).await
    }
}

/// Pick the contact point a channel delivers to.
fn destination_for(case: &CaseRecord, channel: StepChannel) -> Result<String> {
    match channel {
        StepChannel::Email | StepChannel::LegalNotice => {
            case.debtor_email.clone().ok_or_else(|| {
                CaseClawError::validation(format!("case {} has no debtor email", case.id))
            })
        }
        StepChannel::Sms | StepChannel::Whatsapp | StepChannel::Call => {
            case.debtor_phone.clone().ok_or_else(|| {
                CaseClawError::validation(format!("case {} has no debtor phone", case.id))
            })
        }
    }
}

/// Render the body for a template reference. Message wording is business
/// configuration; these are working defaults.
fn render_step_body(template: &str, case: &CaseRecord) -> String {
    let base = match template {
        "friendly_reminder" => "This is a friendly reminder about your outstanding balance.",
        "friendly_nudge" => "Just checking in — your payment is still outstanding.",
        "courtesy_call" => "Courtesy call regarding your outstanding balance.",
        "formal_notice" => "Formal notice: your account is overdue and requires settlement.",
        "formal_reminder" => "Reminder: your overdue account requires immediate attention.",
        "formal_followup" => "Follow-up on our formal notice regarding your overdue account.",
        "pre_legal_warning" => "Final warning before this matter is escalated to legal action.",
        "legal_notice" => "Legal notice: settle the outstanding amount to avoid proceedings.",
        "legal_followup_call" => "Call regarding the legal notice issued for your account.",
        "final_legal_notice" => "Final legal notice prior to initiation of recovery proceedings.",
        _ => "Please contact us regarding your outstanding balance.",
    };
    format!(
        "Dear {}, {} Case {} — amount due: {:.2}.",
        case.customer_name, base, case.case_number, case.amount
    )
}
