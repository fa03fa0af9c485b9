//! Approval Chain Engine — monetary-threshold-driven multi-level sign-off.
//!
//! A case whose amount crosses a rule threshold gets one pending approval
//! row per required level, all created in one batch. The chain's verdict
//! is a pure aggregate: approved iff every level approved, rejected iff
//! any level rejected. Sequential chains gate strictly — only the lowest
//! pending level may approve — while a rejection at any level vetoes the
//! whole chain immediately.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use caseclaw_core::error::{CaseClawError, Result};
use caseclaw_core::traits::{CaseDirectory, Notifier};
use caseclaw_core::types::CaseStatus;

use crate::persistence::CaseDb;

// ─── Levels and rules ────────────────────────────────────

/// One gate in the sign-off chain, ordered by monetary weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalLevel {
    L1Manager,
    L2Director,
    L3Legal,
    L4Cfo,
}

impl ApprovalLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalLevel::L1Manager => "l1_manager",
            ApprovalLevel::L2Director => "l2_director",
            ApprovalLevel::L3Legal => "l3_legal",
            ApprovalLevel::L4Cfo => "l4_cfo",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "l1_manager" => Some(ApprovalLevel::L1Manager),
            "l2_director" => Some(ApprovalLevel::L2Director),
            "l3_legal" => Some(ApprovalLevel::L3Legal),
            "l4_cfo" => Some(ApprovalLevel::L4Cfo),
            _ => None,
        }
    }
}

impl std::fmt::Display for ApprovalLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Amount-threshold rule: the highest matching `min_amount` wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRule {
    pub min_amount: f64,
    pub levels: Vec<ApprovalLevel>,
    /// Hours until a created level expires; None = no expiry.
    pub expiry_hours: Option<i64>,
    /// Parallel chains accept decisions in any order.
    #[serde(default)]
    pub parallel: bool,
}

/// Default rule ladder. Below the first threshold a case auto-approves
/// with no rows created.
pub fn default_rules() -> Vec<ApprovalRule> {
    vec![
        ApprovalRule {
            min_amount: 0.0,
            levels: vec![],
            expiry_hours: None,
            parallel: false,
        },
        ApprovalRule {
            min_amount: 50_000.0,
            levels: vec![ApprovalLevel::L1Manager],
            expiry_hours: Some(24),
            parallel: false,
        },
        ApprovalRule {
            min_amount: 100_000.0,
            levels: vec![ApprovalLevel::L1Manager, ApprovalLevel::L2Director],
            expiry_hours: Some(48),
            parallel: false,
        },
        ApprovalRule {
            min_amount: 500_000.0,
            levels: vec![
                ApprovalLevel::L1Manager,
                ApprovalLevel::L2Director,
                ApprovalLevel::L3Legal,
            ],
            expiry_hours: Some(72),
            parallel: false,
        },
        ApprovalRule {
            min_amount: 1_000_000.0,
            levels: vec![
                ApprovalLevel::L1Manager,
                ApprovalLevel::L2Director,
                ApprovalLevel::L3Legal,
                ApprovalLevel::L4Cfo,
            ],
            expiry_hours: Some(96),
            parallel: false,
        },
    ]
}

/// Pick the highest rule whose threshold the amount reaches.
/// Rules must be sorted ascending by `min_amount`.
pub fn rule_for_amount(rules: &[ApprovalRule], amount: f64) -> Option<&ApprovalRule> {
    let mut matching = None;
    for rule in rules {
        if amount >= rule.min_amount {
            matching = Some(rule);
        } else {
            break;
        }
    }
    matching
}

// ─── Records ─────────────────────────────────────────────

/// Status of one approval level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ApprovalStatus::Pending),
            "approved" => Some(ApprovalStatus::Approved),
            "rejected" => Some(ApprovalStatus::Rejected),
            "expired" => Some(ApprovalStatus::Expired),
            _ => None,
        }
    }
}

/// A decision recorded in the immutable history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approve,
    Reject,
    Delegate,
    RequestInfo,
}

impl ApprovalDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalDecision::Approve => "approve",
            ApprovalDecision::Reject => "reject",
            ApprovalDecision::Delegate => "delegate",
            ApprovalDecision::RequestInfo => "request_info",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approve" => Some(ApprovalDecision::Approve),
            "reject" => Some(ApprovalDecision::Reject),
            "delegate" => Some(ApprovalDecision::Delegate),
            "request_info" => Some(ApprovalDecision::RequestInfo),
            _ => None,
        }
    }
}

/// The identity an approval slot is assigned to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approver {
    pub id: String,
    pub name: String,
    pub email: String,
}

/// Reassignment target for a delegated slot. The slot stays pending and
/// the delegate decides through the same workflow id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delegate {
    pub id: String,
    pub name: String,
}

/// One level of a case's approval chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalWorkflow {
    pub id: String,
    pub case_id: String,
    pub tenant_id: String,
    pub level: ApprovalLevel,
    pub status: ApprovalStatus,
    pub approver: Approver,
    pub delegate: Option<Delegate>,
    /// Position within the chain, 0-based.
    pub sequence: u32,
    /// Whether this chain accepts decisions in any order.
    pub parallel: bool,
    pub requested_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub comments: Option<String>,
    pub version: u32,
}

impl ApprovalWorkflow {
    pub fn new(
        case_id: &str,
        tenant_id: &str,
        level: ApprovalLevel,
        sequence: u32,
        parallel: bool,
        expires_at: Option<DateTime<Utc>>,
        approver: Approver,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            case_id: case_id.to_string(),
            tenant_id: tenant_id.to_string(),
            level,
            status: ApprovalStatus::Pending,
            approver,
            delegate: None,
            sequence,
            parallel,
            requested_at: Utc::now(),
            responded_at: None,
            expires_at,
            comments: None,
            version: 0,
        }
    }

    /// Whoever currently holds the slot — the delegate if one is set.
    pub fn effective_assignee(&self) -> &str {
        self.delegate
            .as_ref()
            .map(|d| d.id.as_str())
            .unwrap_or(&self.approver.id)
    }
}

/// Append-only decision record. Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub id: String,
    pub workflow_id: String,
    pub tenant_id: String,
    pub actor_id: String,
    pub actor_name: String,
    pub decision: ApprovalDecision,
    pub comments: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl ApprovalRecord {
    fn new(
        workflow_id: &str,
        tenant_id: &str,
        actor_id: &str,
        actor_name: &str,
        decision: ApprovalDecision,
        comments: Option<&str>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            tenant_id: tenant_id.to_string(),
            actor_id: actor_id.to_string(),
            actor_name: actor_name.to_string(),
            decision,
            comments: comments.map(String::from),
            recorded_at: Utc::now(),
        }
    }
}

/// Aggregate verdict over a case's chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainVerdict {
    Approved,
    Rejected,
    Pending,
}

/// Pure aggregate: approved iff every level approved, rejected iff any
/// level rejected.
pub fn chain_verdict(chain: &[ApprovalWorkflow]) -> ChainVerdict {
    if chain.iter().any(|w| w.status == ApprovalStatus::Rejected) {
        ChainVerdict::Rejected
    } else if !chain.is_empty() && chain.iter().all(|w| w.status == ApprovalStatus::Approved) {
        ChainVerdict::Approved
    } else {
        ChainVerdict::Pending
    }
}

// ─── Approver roster ─────────────────────────────────────

/// Maps each level to its assignee. Placeholder directory until a real
/// user/role service is wired in.
#[derive(Debug, Clone)]
pub struct ApproverRoster;

impl ApproverRoster {
    pub fn assignee_for(&self, level: ApprovalLevel) -> Approver {
        Approver {
            id: format!("approver-{}", level.as_str()),
            name: format!("Approver for {}", level.as_str()),
            email: format!("{}@company.example", level.as_str()),
        }
    }
}

// ─── Engine ──────────────────────────────────────────────

/// The Approval Chain Engine.
pub struct ApprovalEngine {
    db: Arc<CaseDb>,
    cases: Arc<dyn CaseDirectory>,
    notifier: Arc<dyn Notifier>,
    rules: Vec<ApprovalRule>,
    roster: ApproverRoster,
}

impl ApprovalEngine {
    pub fn new(db: Arc<CaseDb>, cases: Arc<dyn CaseDirectory>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            db,
            cases,
            notifier,
            rules: default_rules(),
            roster: ApproverRoster,
        }
    }

    pub fn with_rules(mut self, rules: Vec<ApprovalRule>) -> Self {
        self.rules = rules;
        self
    }

    /// Create the approval chain for a case based on its amount.
    ///
    /// Returns an empty vec (auto-approve, no rows) when the amount sits
    /// below the first threshold. Fails on a missing case or a
    /// non-positive amount.
    pub async fn initialize_workflow(
        &self,
        case_id: &str,
        tenant_id: &str,
    ) -> Result<Vec<ApprovalWorkflow>> {
        let case = self.cases.find_case(case_id, tenant_id)?;
        if case.amount <= 0.0 {
            return Err(CaseClawError::validation(format!(
                "case {case_id} has non-positive amount {}",
                case.amount
            )));
        }

        let rule = match rule_for_amount(&self.rules, case.amount) {
            Some(r) if !r.levels.is_empty() => r.clone(),
            _ => {
                tracing::info!(
                    "✅ case {case_id} (amount {}) is auto-approved, no chain created",
                    case.amount
                );
                return Ok(Vec::new());
            }
        };

        let expires_at = rule.expiry_hours.map(|h| Utc::now() + Duration::hours(h));
        let workflows: Vec<ApprovalWorkflow> = rule
            .levels
            .iter()
            .enumerate()
            .map(|(i, level)| {
                ApprovalWorkflow::new(
                    case_id,
                    tenant_id,
                    *level,
                    i as u32,
                    rule.parallel,
                    expires_at,
                    self.roster.assignee_for(*level),
                )
            })
            .collect();

        self.db.insert_approvals(&workflows)?;
        tracing::info!(
            "📋 created {} approval level(s) for case {case_id} (amount {})",
            workflows.len(),
            case.amount
        );

        for wf in &workflows {
            let subject = format!("Approval required: case {}", case.case_number);
            let body = format!(
                "You have been assigned level {} approval for case {} (amount {}). Please review.",
                wf.level, case.case_number, case.amount
            );
            if let Err(e) = self.notifier.notify(&wf.approver.email, &subject, &body).await {
                tracing::warn!("⚠️ approver notification failed for {}: {e}", wf.approver.email);
            }
        }

        Ok(workflows)
    }

    /// Approve one level. Completing the chain advances the case to
    /// "under review" and notifies the debtor contact.
    pub async fn approve(
        &self,
        workflow_id: &str,
        tenant_id: &str,
        actor_id: &str,
        actor_name: &str,
        comments: Option<&str>,
    ) -> Result<ApprovalWorkflow> {
        let mut wf = self.pending_workflow(workflow_id, tenant_id)?;
        self.check_sequence_gate(&wf)?;
        self.check_expiry(&mut wf)?;

        wf.status = ApprovalStatus::Approved;
        wf.responded_at = Some(Utc::now());
        wf.comments = comments.map(String::from);
        self.db.update_approval(&wf)?;

        self.db.insert_history(&ApprovalRecord::new(
            &wf.id,
            tenant_id,
            actor_id,
            actor_name,
            ApprovalDecision::Approve,
            comments,
        ))?;
        tracing::info!("✅ workflow {workflow_id} approved by {actor_name}");

        self.evaluate_chain(&wf.case_id, tenant_id).await?;
        Ok(wf)
    }

    /// Reject one level. A single rejection at any level vetoes the whole
    /// chain and closes the case. Requires a non-empty reason.
    pub async fn reject(
        &self,
        workflow_id: &str,
        tenant_id: &str,
        actor_id: &str,
        actor_name: &str,
        comments: &str,
    ) -> Result<ApprovalWorkflow> {
        if comments.trim().is_empty() {
            return Err(CaseClawError::validation("rejection requires a reason"));
        }

        let mut wf = self.pending_workflow(workflow_id, tenant_id)?;
        self.check_expiry(&mut wf)?;

        wf.status = ApprovalStatus::Rejected;
        wf.responded_at = Some(Utc::now());
        wf.comments = Some(comments.to_string());
        self.db.update_approval(&wf)?;

        self.db.insert_history(&ApprovalRecord::new(
            &wf.id,
            tenant_id,
            actor_id,
            actor_name,
            ApprovalDecision::Reject,
            Some(comments),
        ))?;
        tracing::info!("🚫 workflow {workflow_id} rejected by {actor_name}");

        let note = format!("Rejected by {actor_name}: {comments}");
        self.cases
            .update_case_status(&wf.case_id, tenant_id, CaseStatus::Closed, Some(&note))?;
        self.notify_debtor(&wf.case_id, tenant_id, "Dispute rejected", &note)
            .await;

        Ok(wf)
    }

    /// Reassign a pending slot to a delegate. The slot stays pending; the
    /// delegate decides through the same workflow id.
    pub async fn delegate(
        &self,
        workflow_id: &str,
        tenant_id: &str,
        actor_id: &str,
        actor_name: &str,
        delegate_id: &str,
        delegate_name: &str,
        comments: Option<&str>,
    ) -> Result<ApprovalWorkflow> {
        let mut wf = self.pending_workflow(workflow_id, tenant_id)?;

        wf.delegate = Some(Delegate {
            id: delegate_id.to_string(),
            name: delegate_name.to_string(),
        });
        wf.comments = comments.map(String::from);
        self.db.update_approval(&wf)?;

        self.db.insert_history(&ApprovalRecord::new(
            &wf.id,
            tenant_id,
            actor_id,
            actor_name,
            ApprovalDecision::Delegate,
            comments,
        ))?;
        tracing::info!("👥 workflow {workflow_id} delegated from {actor_name} to {delegate_name}");

        let subject = format!("Approval delegated: case {}", wf.case_id);
        let body = format!(
            "{actor_name} has delegated level {} approval for case {} to you.",
            wf.level, wf.case_id
        );
        if let Err(e) = self
            .notifier
            .notify(&format!("{delegate_id}@company.example"), &subject, &body)
            .await
        {
            tracing::warn!("⚠️ delegate notification failed for {delegate_id}: {e}");
        }

        Ok(wf)
    }

    /// Full chain for a case, ordered by sequence.
    pub fn chain_for_case(&self, case_id: &str, tenant_id: &str) -> Result<Vec<ApprovalWorkflow>> {
        self.db.approvals_for_case(case_id, tenant_id)
    }

    /// The lowest-sequence still-pending level, if any.
    pub fn current_level(&self, case_id: &str, tenant_id: &str) -> Result<Option<ApprovalLevel>> {
        let chain = self.db.approvals_for_case(case_id, tenant_id)?;
        Ok(chain
            .iter()
            .filter(|w| w.status == ApprovalStatus::Pending)
            .min_by_key(|w| w.sequence)
            .map(|w| w.level))
    }

    /// Pending approvals assigned to (or delegated to) an approver.
    pub fn pending_for(&self, approver_id: &str, tenant_id: &str) -> Result<Vec<ApprovalWorkflow>> {
        let pending = self.db.pending_approvals(tenant_id)?;
        Ok(pending
            .into_iter()
            .filter(|w| w.effective_assignee() == approver_id)
            .collect())
    }

    /// Immutable decision history for a case, oldest first.
    pub fn history_for_case(&self, case_id: &str, tenant_id: &str) -> Result<Vec<ApprovalRecord>> {
        self.db.history_for_case(case_id, tenant_id)
    }

    /// Re-evaluate the chain's aggregate verdict and apply the case side
    /// effect. Idempotent — an incomplete chain is a no-op.
    pub async fn evaluate_chain(&self, case_id: &str, tenant_id: &str) -> Result<ChainVerdict> {
        let chain = self.db.approvals_for_case(case_id, tenant_id)?;
        let verdict = chain_verdict(&chain);
        match verdict {
            ChainVerdict::Approved => {
                self.cases
                    .update_case_status(case_id, tenant_id, CaseStatus::UnderReview, None)?;
                tracing::info!("✅ all approvals complete for case {case_id}");
                self.notify_debtor(
                    case_id,
                    tenant_id,
                    "Dispute approved for review",
                    "Your dispute has cleared the approval chain and is now under review.",
                )
                .await;
            }
            ChainVerdict::Rejected => {
                self.cases
                    .update_case_status(case_id, tenant_id, CaseStatus::Closed, None)?;
                tracing::info!("🚫 case {case_id} closed due to approval rejection");
            }
            ChainVerdict::Pending => {}
        }
        Ok(verdict)
    }

    // ─── internals ───────────────────────────────────────

    fn pending_workflow(&self, workflow_id: &str, tenant_id: &str) -> Result<ApprovalWorkflow> {
        let wf = self
            .db
            .find_approval(workflow_id, tenant_id)?
            .ok_or_else(|| CaseClawError::not_found(format!("approval workflow {workflow_id}")))?;
        if wf.status != ApprovalStatus::Pending {
            return Err(CaseClawError::invalid_state(format!(
                "approval workflow is not pending (current status: {})",
                wf.status.as_str()
            )));
        }
        Ok(wf)
    }

    /// Sequential chains gate strictly: only the lowest-sequence pending
    /// level may approve.
    fn check_sequence_gate(&self, wf: &ApprovalWorkflow) -> Result<()> {
        if wf.parallel {
            return Ok(());
        }
        let chain = self.db.approvals_for_case(&wf.case_id, &wf.tenant_id)?;
        if chain
            .iter()
            .any(|w| w.sequence < wf.sequence && w.status == ApprovalStatus::Pending)
        {
            return Err(CaseClawError::invalid_state(format!(
                "level {} cannot approve before earlier levels decide",
                wf.level
            )));
        }
        Ok(())
    }

    /// Lazy expiry: flip to expired, persist, and fail the call.
    fn check_expiry(&self, wf: &mut ApprovalWorkflow) -> Result<()> {
        if let Some(expires_at) = wf.expires_at {
            if Utc::now() > expires_at {
                wf.status = ApprovalStatus::Expired;
                self.db.update_approval(wf)?;
                return Err(CaseClawError::invalid_state(format!(
                    "approval workflow {} has expired",
                    wf.id
                )));
            }
        }
        Ok(())
    }

    async fn notify_debtor(&self, case_id: &str, tenant_id: &str, subject: &str, body: &str) {
        let email = match self.cases.find_case(case_id, tenant_id) {
            Ok(case) => case.debtor_email,
            Err(e) => {
                tracing::warn!("⚠️ could not load case {case_id} for notification: {e}");
                return;
            }
        };
        if let Some(email) = email {
            if let Err(e) = self.notifier.notify(&email, subject, body).await {
                tracing::warn!("⚠️ debtor notification failed for case {case_id}: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use caseclaw_core::types::CaseRecord;
    use std::sync::Mutex;

    const TENANT: &str = "tenant-1";

    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingNotifier {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, to: &str, subject: &str, _body: &str) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), subject.to_string()));
            Ok(())
        }
    }

    fn setup(amount: f64) -> (Arc<CaseDb>, ApprovalEngine, CaseRecord, Arc<RecordingNotifier>) {
        let db = Arc::new(CaseDb::open_in_memory().unwrap());
        let case = CaseRecord::new(TENANT, "cust-1", "Acme Traders", amount)
            .with_contact(Some("billing@acme.example"), None);
        db.upsert_case(&case).unwrap();
        let notifier = RecordingNotifier::new();
        let engine = ApprovalEngine::new(db.clone(), db.clone(), notifier.clone());
        (db, engine, case, notifier)
    }

    #[tokio::test]
    async fn test_below_threshold_auto_approves() {
        let (db, engine, case, _n) = setup(40_000.0);
        let chain = engine.initialize_workflow(&case.id, TENANT).await.unwrap();
        assert!(chain.is_empty());
        assert!(db.approvals_for_case(&case.id, TENANT).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_single_level_chain() {
        let (_db, engine, case, notifier) = setup(75_000.0);
        let chain = engine.initialize_workflow(&case.id, TENANT).await.unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].level, ApprovalLevel::L1Manager);
        assert!(chain[0].expires_at.is_some());
        // One notification per approver.
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_two_level_chain_completes_in_order() {
        let (db, engine, case, _n) = setup(250_000.0);
        let chain = engine.initialize_workflow(&case.id, TENANT).await.unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].level, ApprovalLevel::L1Manager);
        assert_eq!(chain[1].level, ApprovalLevel::L2Director);

        engine
            .approve(&chain[0].id, TENANT, "u1", "Manager", Some("ok"))
            .await
            .unwrap();

        // Chain still pending, current level moved to L2.
        assert_eq!(
            chain_verdict(&db.approvals_for_case(&case.id, TENANT).unwrap()),
            ChainVerdict::Pending
        );
        assert_eq!(
            engine.current_level(&case.id, TENANT).unwrap(),
            Some(ApprovalLevel::L2Director)
        );
        // Case untouched so far.
        assert_eq!(db.find_case(&case.id, TENANT).unwrap().status, CaseStatus::Draft);

        engine
            .approve(&chain[1].id, TENANT, "u2", "Director", None)
            .await
            .unwrap();

        assert_eq!(
            chain_verdict(&db.approvals_for_case(&case.id, TENANT).unwrap()),
            ChainVerdict::Approved
        );
        assert_eq!(
            db.find_case(&case.id, TENANT).unwrap().status,
            CaseStatus::UnderReview
        );
    }

    #[tokio::test]
    async fn test_three_level_chain_rejection_closes_case() {
        let (db, engine, case, _n) = setup(600_000.0);
        let chain = engine.initialize_workflow(&case.id, TENANT).await.unwrap();
        assert_eq!(chain.len(), 3);

        engine
            .approve(&chain[0].id, TENANT, "u1", "Manager", None)
            .await
            .unwrap();
        engine
            .reject(&chain[1].id, TENANT, "u2", "Director", "amount not substantiated")
            .await
            .unwrap();

        let stored = db.find_case(&case.id, TENANT).unwrap();
        assert_eq!(stored.status, CaseStatus::Closed);
        assert!(stored.notes.contains("Rejected by Director"));

        // The third level is never required to act.
        let rows = db.approvals_for_case(&case.id, TENANT).unwrap();
        assert_eq!(rows[2].status, ApprovalStatus::Pending);
        assert_eq!(chain_verdict(&rows), ChainVerdict::Rejected);
    }

    #[tokio::test]
    async fn test_sequential_gate_blocks_later_level() {
        let (_db, engine, case, _n) = setup(250_000.0);
        let chain = engine.initialize_workflow(&case.id, TENANT).await.unwrap();

        let err = engine
            .approve(&chain[1].id, TENANT, "u2", "Director", None)
            .await;
        assert!(matches!(err, Err(CaseClawError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_approve_non_pending_fails() {
        let (_db, engine, case, _n) = setup(75_000.0);
        let chain = engine.initialize_workflow(&case.id, TENANT).await.unwrap();
        engine
            .approve(&chain[0].id, TENANT, "u1", "Manager", None)
            .await
            .unwrap();

        let err = engine.approve(&chain[0].id, TENANT, "u1", "Manager", None).await;
        assert!(matches!(err, Err(CaseClawError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_expired_workflow_flips_and_fails() {
        let (db, engine, case, _n) = setup(75_000.0);
        let mut wf = ApprovalWorkflow::new(
            &case.id,
            TENANT,
            ApprovalLevel::L1Manager,
            0,
            false,
            Some(Utc::now() - Duration::hours(1)),
            ApproverRoster.assignee_for(ApprovalLevel::L1Manager),
        );
        db.insert_approvals(std::slice::from_ref(&wf)).unwrap();

        let err = engine.approve(&wf.id, TENANT, "u1", "Manager", None).await;
        assert!(matches!(err, Err(CaseClawError::InvalidState(_))));

        wf = db.find_approval(&wf.id, TENANT).unwrap().unwrap();
        assert_eq!(wf.status, ApprovalStatus::Expired);
    }

    #[tokio::test]
    async fn test_reject_requires_reason() {
        let (_db, engine, case, _n) = setup(75_000.0);
        let chain = engine.initialize_workflow(&case.id, TENANT).await.unwrap();

        let err = engine.reject(&chain[0].id, TENANT, "u1", "Manager", "   ").await;
        assert!(matches!(err, Err(CaseClawError::Validation(_))));
    }

    #[tokio::test]
    async fn test_delegate_keeps_slot_pending() {
        let (db, engine, case, _n) = setup(75_000.0);
        let chain = engine.initialize_workflow(&case.id, TENANT).await.unwrap();

        let wf = engine
            .delegate(
                &chain[0].id,
                TENANT,
                "u1",
                "Manager",
                "u9",
                "Deputy",
                Some("on leave"),
            )
            .await
            .unwrap();
        assert_eq!(wf.status, ApprovalStatus::Pending);
        assert_eq!(wf.delegate.as_ref().unwrap().id, "u9");
        assert_eq!(wf.effective_assignee(), "u9");

        // The delegate decides through the same workflow id.
        engine
            .approve(&chain[0].id, TENANT, "u9", "Deputy", None)
            .await
            .unwrap();
        assert_eq!(
            db.find_case(&case.id, TENANT).unwrap().status,
            CaseStatus::UnderReview
        );

        // Both the delegation and the approval are history rows.
        let history = engine.history_for_case(&case.id, TENANT).unwrap();
        let decisions: Vec<ApprovalDecision> = history.iter().map(|h| h.decision).collect();
        assert!(decisions.contains(&ApprovalDecision::Delegate));
        assert!(decisions.contains(&ApprovalDecision::Approve));
    }

    #[tokio::test]
    async fn test_pending_for_follows_delegation() {
        let (_db, engine, case, _n) = setup(75_000.0);
        let chain = engine.initialize_workflow(&case.id, TENANT).await.unwrap();
        let original = chain[0].approver.id.clone();

        assert_eq!(engine.pending_for(&original, TENANT).unwrap().len(), 1);

        engine
            .delegate(&chain[0].id, TENANT, "u1", "Manager", "u9", "Deputy", None)
            .await
            .unwrap();

        assert!(engine.pending_for(&original, TENANT).unwrap().is_empty());
        assert_eq!(engine.pending_for("u9", TENANT).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_nonpositive_amount_fails() {
        let (_db, engine, case, _n) = setup(0.0);
        let err = engine.initialize_workflow(&case.id, TENANT).await;
        assert!(matches!(err, Err(CaseClawError::Validation(_))));
    }

    #[tokio::test]
    async fn test_missing_case_fails() {
        let (_db, engine, _case, _n) = setup(75_000.0);
        let err = engine.initialize_workflow("ghost", TENANT).await;
        assert!(matches!(err, Err(CaseClawError::NotFound(_))));
    }

    #[test]
    fn test_rule_ladder() {
        let rules = default_rules();
        assert!(rule_for_amount(&rules, 40_000.0).unwrap().levels.is_empty());
        assert_eq!(rule_for_amount(&rules, 75_000.0).unwrap().levels.len(), 1);
        assert_eq!(rule_for_amount(&rules, 250_000.0).unwrap().levels.len(), 2);
        assert_eq!(rule_for_amount(&rules, 600_000.0).unwrap().levels.len(), 3);
        assert_eq!(rule_for_amount(&rules, 5_000_000.0).unwrap().levels.len(), 4);
    }
}
