//! Case Workflow Engine — named business states + declared transitions.
//!
//! States are an open, config-declared graph, not a fixed enum. Each case
//! occupies exactly one current state row at a time; every transition exits
//! the current row and inserts a new one, so the full history stays in the
//! store. Terminal states are simply states with no outgoing enabled
//! transitions.
//!
//! ## Architecture
//! ```text
//! transition(case, transition_id, actor, ctx)
//!   → current-state lookup (fails if none)
//!   → from-state / enabled / condition checks (fail-closed)
//!   → exit current row, insert successor row (seq + 1)
//!   → run declared actions best-effort (failures logged, never abort)
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use caseclaw_core::error::{CaseClawError, Result};
use caseclaw_core::traits::CaseDirectory;
use caseclaw_core::types::{CaseRecord, CaseStatus, SYSTEM_ACTOR};

use crate::persistence::CaseDb;

// ─── State occupancy ──────────────────────────────────────

/// Classification of a workflow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    Initial,
    InProgress,
    Waiting,
    Completed,
    Failed,
    Cancelled,
}

impl StateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateKind::Initial => "initial",
            StateKind::InProgress => "in_progress",
            StateKind::Waiting => "waiting",
            StateKind::Completed => "completed",
            StateKind::Failed => "failed",
            StateKind::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initial" => Some(StateKind::Initial),
            "in_progress" => Some(StateKind::InProgress),
            "waiting" => Some(StateKind::Waiting),
            "completed" => Some(StateKind::Completed),
            "failed" => Some(StateKind::Failed),
            "cancelled" => Some(StateKind::Cancelled),
            _ => None,
        }
    }
}

/// One point-in-time state occupancy for a case.
///
/// At most one row per case has `is_current = true`; sequence numbers are
/// strictly increasing per case. Rows are exited and superseded, never
/// deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub id: String,
    pub case_id: String,
    pub tenant_id: String,
    /// State name from the declared graph (e.g. "filed", "under_review").
    pub name: String,
    pub kind: StateKind,
    pub is_current: bool,
    /// Monotonic per-case sequence number, 0 for the initial state.
    pub sequence: u32,
    pub entered_at: DateTime<Utc>,
    pub entered_by: String,
    pub exited_at: Option<DateTime<Utc>>,
    pub exited_by: Option<String>,
    pub metadata: serde_json::Value,
    /// Optimistic-concurrency version, bumped on every store update.
    pub version: u32,
}

impl WorkflowState {
    /// First state of a case (kind=initial, seq=0).
    pub fn initial(case_id: &str, tenant_id: &str, name: &str, actor: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            case_id: case_id.to_string(),
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            kind: StateKind::Initial,
            is_current: true,
            sequence: 0,
            entered_at: Utc::now(),
            entered_by: actor.to_string(),
            exited_at: None,
            exited_by: None,
            metadata: serde_json::json!({}),
            version: 0,
        }
    }

    /// Successor occupancy entered by a transition.
    fn successor(
        previous: &WorkflowState,
        name: &str,
        kind: StateKind,
        actor: &str,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            case_id: previous.case_id.clone(),
            tenant_id: previous.tenant_id.clone(),
            name: name.to_string(),
            kind,
            is_current: true,
            sequence: previous.sequence + 1,
            entered_at: Utc::now(),
            entered_by: actor.to_string(),
            exited_at: None,
            exited_by: None,
            metadata,
            version: 0,
        }
    }
}

// ─── Conditions ──────────────────────────────────────────

/// A typed value in a condition context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Flag(bool),
    Number(f64),
    Text(String),
}

/// Typed evaluation context for transition conditions.
///
/// Conditions are evaluated against this bag, not the live case record, so
/// evaluation is side-effect-free and synchronous.
#[derive(Debug, Clone, Default)]
pub struct ConditionContext {
    values: BTreeMap<String, FieldValue>,
}

impl ConditionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_number(mut self, field: &str, value: f64) -> Self {
        self.values.insert(field.to_string(), FieldValue::Number(value));
        self
    }

    pub fn with_text(mut self, field: &str, value: &str) -> Self {
        self.values
            .insert(field.to_string(), FieldValue::Text(value.to_string()));
        self
    }

    pub fn with_flag(mut self, field: &str, value: bool) -> Self {
        self.values.insert(field.to_string(), FieldValue::Flag(value));
        self
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }
}

/// One transition condition — a closed grammar with one variant per
/// operator. An absent context field is unmet (fail-closed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    Eq { field: String, value: FieldValue },
    Ne { field: String, value: FieldValue },
    Gt { field: String, value: f64 },
    Lt { field: String, value: f64 },
    Ge { field: String, value: f64 },
    Le { field: String, value: f64 },
    Contains { field: String, value: String },
}

impl Condition {
    /// Evaluate against the context. Missing fields and type mismatches
    /// are unmet.
    pub fn holds(&self, ctx: &ConditionContext) -> bool {
        match self {
            Condition::Eq { field, value } => ctx.get(field) == Some(value),
            Condition::Ne { field, value } => {
                matches!(ctx.get(field), Some(v) if v != value)
            }
            Condition::Gt { field, value } => {
                matches!(ctx.get(field), Some(FieldValue::Number(n)) if n > value)
            }
            Condition::Lt { field, value } => {
                matches!(ctx.get(field), Some(FieldValue::Number(n)) if n < value)
            }
            Condition::Ge { field, value } => {
                matches!(ctx.get(field), Some(FieldValue::Number(n)) if n >= value)
            }
            Condition::Le { field, value } => {
                matches!(ctx.get(field), Some(FieldValue::Number(n)) if n <= value)
            }
            Condition::Contains { field, value } => {
                matches!(ctx.get(field), Some(FieldValue::Text(s)) if s.contains(value.as_str()))
            }
        }
    }
}

// ─── Transitions ─────────────────────────────────────────

/// How a transition fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Manual,
    Automatic,
    Conditional,
    Scheduled,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::Manual => "manual",
            TransitionKind::Automatic => "automatic",
            TransitionKind::Conditional => "conditional",
            TransitionKind::Scheduled => "scheduled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(TransitionKind::Manual),
            "automatic" => Some(TransitionKind::Automatic),
            "conditional" => Some(TransitionKind::Conditional),
            "scheduled" => Some(TransitionKind::Scheduled),
            _ => None,
        }
    }
}

/// A declared side effect run after a transition commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransitionAction {
    /// Send a templated message to the case's customer.
    NotifyCustomer { template: String },
    /// Update the external case record's status.
    UpdateCaseStatus { status: CaseStatus },
    /// Start a collection sequence for the case.
    StartSequence { template: String },
    /// Cancel any active collection sequence for the case.
    CancelSequence,
    /// Fire an HTTP webhook.
    Webhook { url: String },
}

/// A declared edge in the workflow graph. Read-only at execution time;
/// authored as configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTransition {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    /// State name the case must currently occupy.
    pub from_state: String,
    /// State name entered on success.
    pub to_state: String,
    /// Kind of the entered state (in_progress unless declared otherwise).
    pub to_kind: StateKind,
    pub kind: TransitionKind,
    /// All conditions must hold (AND semantics).
    pub conditions: Vec<Condition>,
    /// Best-effort side effects, run in declaration order.
    pub actions: Vec<TransitionAction>,
    /// Higher priority is offered/attempted first.
    pub priority: i32,
    pub enabled: bool,
}

impl WorkflowTransition {
    pub fn new(
        tenant_id: &str,
        name: &str,
        from_state: &str,
        to_state: &str,
        kind: TransitionKind,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            from_state: from_state.to_string(),
            to_state: to_state.to_string(),
            to_kind: StateKind::InProgress,
            kind,
            conditions: Vec::new(),
            actions: Vec::new(),
            priority: 0,
            enabled: true,
        }
    }

    pub fn manual(tenant_id: &str, name: &str, from: &str, to: &str) -> Self {
        Self::new(tenant_id, name, from, to, TransitionKind::Manual)
    }

    pub fn automatic(tenant_id: &str, name: &str, from: &str, to: &str) -> Self {
        Self::new(tenant_id, name, from, to, TransitionKind::Automatic)
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_action(mut self, action: TransitionAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn entering(mut self, kind: StateKind) -> Self {
        self.to_kind = kind;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

// ─── Action execution ────────────────────────────────────

/// Executes a transition's declared side effects.
///
/// The engine calls this after the state change has committed; failures
/// are logged by the engine and never abort the transition or the other
/// actions. The runtime wires an implementation that reaches the sequence
/// engine, case directory, notifier, and HTTP client.
#[async_trait]
pub trait ActionRunner: Send + Sync {
    async fn run(&self, case_id: &str, tenant_id: &str, action: &TransitionAction) -> Result<()>;
}

/// Runner that only logs — useful for read-mostly deployments and tests.
pub struct LoggingActionRunner;

#[async_trait]
impl ActionRunner for LoggingActionRunner {
    async fn run(&self, case_id: &str, _tenant_id: &str, action: &TransitionAction) -> Result<()> {
        tracing::info!("⚙️ action for case {case_id}: {action:?}");
        Ok(())
    }
}

// ─── Engine ──────────────────────────────────────────────

/// Outcome counters for one automatic-transition sweep.
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepStats {
    pub scanned: usize,
    pub fired: usize,
    pub failed: usize,
}

/// The Case Workflow Engine.
pub struct WorkflowEngine {
    db: Arc<CaseDb>,
    cases: Arc<dyn CaseDirectory>,
    actions: Arc<dyn ActionRunner>,
}

impl WorkflowEngine {
    pub fn new(db: Arc<CaseDb>, cases: Arc<dyn CaseDirectory>, actions: Arc<dyn ActionRunner>) -> Self {
        Self { db, cases, actions }
    }

    /// Initialize a case's workflow in its first state.
    ///
    /// Fails if a current state already exists — one workflow per case.
    pub fn initialize(
        &self,
        case_id: &str,
        tenant_id: &str,
        initial_state: &str,
        actor: &str,
    ) -> Result<WorkflowState> {
        if self.db.current_state(case_id, tenant_id)?.is_some() {
            return Err(CaseClawError::invalid_state(format!(
                "case {case_id} already has an active workflow"
            )));
        }
        let state = WorkflowState::initial(case_id, tenant_id, initial_state, actor);
        self.db.insert_state(&state)?;
        tracing::info!("🧭 case {case_id} workflow initialized in '{initial_state}'");
        Ok(state)
    }

    /// Current state of a case, if its workflow has been initialized.
    pub fn current_state(&self, case_id: &str, tenant_id: &str) -> Result<Option<WorkflowState>> {
        self.db.current_state(case_id, tenant_id)
    }

    /// Enabled transitions leaving the case's current state, ordered by
    /// descending priority. Empty for a terminal (or current-less) case.
    pub fn available_transitions(
        &self,
        case_id: &str,
        tenant_id: &str,
    ) -> Result<Vec<WorkflowTransition>> {
        match self.db.current_state(case_id, tenant_id)? {
            Some(current) => self.db.transitions_from(tenant_id, &current.name),
            None => Ok(Vec::new()),
        }
    }

    /// Execute a declared transition against the case's current state.
    ///
    /// On success the previous occupancy is exited, the successor row is
    /// inserted, and the transition's actions run best-effort.
    pub async fn transition(
        &self,
        case_id: &str,
        tenant_id: &str,
        transition_id: &str,
        actor: &str,
        ctx: &ConditionContext,
        metadata: serde_json::Value,
    ) -> Result<WorkflowState> {
        let mut current = self
            .db
            .current_state(case_id, tenant_id)?
            .ok_or_else(|| CaseClawError::not_found(format!("no current state for case {case_id}")))?;

        let transition = self
            .db
            .find_transition(transition_id, tenant_id)?
            .ok_or_else(|| CaseClawError::not_found(format!("transition {transition_id}")))?;

        if !transition.enabled {
            return Err(CaseClawError::invalid_state(format!(
                "transition '{}' is disabled",
                transition.name
            )));
        }
        if transition.from_state != current.name {
            return Err(CaseClawError::invalid_state(format!(
                "transition '{}' leaves '{}' but case {} is in '{}'",
                transition.name, transition.from_state, case_id, current.name
            )));
        }
        if !transition.conditions.iter().all(|c| c.holds(ctx)) {
            return Err(CaseClawError::validation(format!(
                "conditions not met for transition '{}'",
                transition.name
            )));
        }

        // Exit the current occupancy (version-checked write).
        current.is_current = false;
        current.exited_at = Some(Utc::now());
        current.exited_by = Some(actor.to_string());
        self.db.update_state(&current)?;

        let next = WorkflowState::successor(
            &current,
            &transition.to_state,
            transition.to_kind,
            actor,
            metadata,
        );
        self.db.insert_state(&next)?;

        tracing::info!(
            "🧭 case {case_id}: '{}' → '{}' via '{}' by {actor}",
            current.name,
            next.name,
            transition.name
        );

        // Declared side effects run after the state change committed.
        // Each failure is logged and never aborts the others.
        for action in &transition.actions {
            if let Err(e) = self.actions.run(case_id, tenant_id, action).await {
                tracing::warn!(
                    "⚠️ action {action:?} failed for case {case_id} (transition '{}'): {e}",
                    transition.name
                );
            }
        }

        Ok(next)
    }

    /// One automatic-transition sweep over every current state.
    ///
    /// Each case is processed in isolation: a failure is counted and
    /// logged without aborting the sweep for the remaining cases.
    pub async fn run_automatic_sweep(&self) -> SweepStats {
        let mut stats = SweepStats::default();
        let currents = match self.db.current_states() {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("⚠️ workflow sweep could not list current states: {e}");
                return stats;
            }
        };

        for state in currents {
            stats.scanned += 1;
            match self.sweep_case(&state).await {
                Ok(true) => stats.fired += 1,
                Ok(false) => {}
                Err(e) => {
                    stats.failed += 1;
                    tracing::warn!(
                        "⚠️ workflow sweep failed for case {} (state '{}'): {e}",
                        state.case_id,
                        state.name
                    );
                }
            }
        }

        if stats.fired > 0 || stats.failed > 0 {
            tracing::info!(
                "🧭 workflow sweep: {} scanned, {} fired, {} failed",
                stats.scanned,
                stats.fired,
                stats.failed
            );
        }
        stats
    }

    /// Attempt automatic transitions for one current state, in priority
    /// order. Returns whether a transition fired.
    async fn sweep_case(&self, state: &WorkflowState) -> Result<bool> {
        let case = self.cases.find_case(&state.case_id, &state.tenant_id)?;
        let ctx = sweep_context(&case, state);

        let transitions = self.db.transitions_from(&state.tenant_id, &state.name)?;
        for transition in transitions
            .iter()
            .filter(|t| t.kind == TransitionKind::Automatic)
        {
            if transition.conditions.iter().all(|c| c.holds(&ctx)) {
                self.transition(
                    &state.case_id,
                    &state.tenant_id,
                    &transition.id,
                    SYSTEM_ACTOR,
                    &ctx,
                    serde_json::json!({ "trigger": "automatic_sweep" }),
                )
                .await?;
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Context the sweep evaluates automatic-transition conditions against.
pub fn sweep_context(case: &CaseRecord, state: &WorkflowState) -> ConditionContext {
    let days_in_state = (Utc::now() - state.entered_at).num_days() as f64;
    ConditionContext::new()
        .with_number("amount", case.amount)
        .with_text("status", case.status.as_str())
        .with_text("state", &state.name)
        .with_number("days_in_state", days_in_state)
}

/// Author the default dispute workflow graph for a tenant.
///
/// draft → filed → under_review → negotiating → resolved → closed, with a
/// manual close edge from review and an automatic archive edge once a
/// case record is resolved.
pub fn seed_default_workflow(db: &CaseDb, tenant_id: &str) -> Result<Vec<WorkflowTransition>> {
    let transitions = vec![
        WorkflowTransition::manual(tenant_id, "file", "draft", "filed")
            .with_priority(10)
            .with_action(TransitionAction::UpdateCaseStatus {
                status: CaseStatus::Filed,
            }),
        WorkflowTransition::manual(tenant_id, "begin_review", "filed", "under_review")
            .with_priority(10)
            .with_action(TransitionAction::UpdateCaseStatus {
                status: CaseStatus::UnderReview,
            }),
        WorkflowTransition::manual(tenant_id, "open_negotiation", "under_review", "negotiating")
            .with_priority(10)
            .with_action(TransitionAction::UpdateCaseStatus {
                status: CaseStatus::Negotiating,
            })
            .with_action(TransitionAction::StartSequence {
                template: "friendly".into(),
            }),
        WorkflowTransition::manual(tenant_id, "record_resolution", "negotiating", "resolved")
            .with_priority(10)
            .with_action(TransitionAction::UpdateCaseStatus {
                status: CaseStatus::Resolved,
            })
            .with_action(TransitionAction::CancelSequence),
        WorkflowTransition::manual(tenant_id, "close", "under_review", "closed")
            .entering(StateKind::Cancelled)
            .with_priority(0)
            .with_action(TransitionAction::UpdateCaseStatus {
                status: CaseStatus::Closed,
            })
            .with_action(TransitionAction::CancelSequence),
        WorkflowTransition::automatic(tenant_id, "archive_resolved", "resolved", "closed")
            .entering(StateKind::Completed)
            .with_priority(10)
            .with_condition(Condition::Eq {
                field: "status".into(),
                value: FieldValue::Text("resolved".into()),
            })
            .with_action(TransitionAction::UpdateCaseStatus {
                status: CaseStatus::Closed,
            }),
    ];

    for t in &transitions {
        db.insert_transition(t)?;
    }
    tracing::info!(
        "🧭 seeded {} workflow transitions for tenant {tenant_id}",
        transitions.len()
    );
    Ok(transitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const TENANT: &str = "tenant-1";

    /// Records every action the engine hands it; optionally fails.
    struct RecordingRunner {
        ran: Mutex<Vec<TransitionAction>>,
        fail: bool,
    }

    impl RecordingRunner {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                ran: Mutex::new(Vec::new()),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                ran: Mutex::new(Vec::new()),
                fail: true,
            })
        }
    }

    #[async_trait]
    impl ActionRunner for RecordingRunner {
        async fn run(&self, _case: &str, _tenant: &str, action: &TransitionAction) -> Result<()> {
            self.ran.lock().unwrap().push(action.clone());
            if self.fail {
                return Err(CaseClawError::Dependency("runner down".into()));
            }
            Ok(())
        }
    }

    fn setup(runner: Arc<dyn ActionRunner>) -> (Arc<CaseDb>, WorkflowEngine, CaseRecord) {
        let db = Arc::new(CaseDb::open_in_memory().unwrap());
        let case = CaseRecord::new(TENANT, "cust-1", "Acme Traders", 75_000.0);
        db.upsert_case(&case).unwrap();
        let engine = WorkflowEngine::new(db.clone(), db.clone(), runner);
        (db, engine, case)
    }

    #[tokio::test]
    async fn test_initialize_creates_current_state() {
        let (_db, engine, case) = setup(RecordingRunner::new());
        let state = engine.initialize(&case.id, TENANT, "draft", "tester").unwrap();
        assert_eq!(state.kind, StateKind::Initial);
        assert_eq!(state.sequence, 0);
        assert!(state.is_current);

        let current = engine.current_state(&case.id, TENANT).unwrap().unwrap();
        assert_eq!(current.name, "draft");
    }

    #[tokio::test]
    async fn test_initialize_twice_fails() {
        let (_db, engine, case) = setup(RecordingRunner::new());
        engine.initialize(&case.id, TENANT, "draft", "tester").unwrap();
        let err = engine.initialize(&case.id, TENANT, "draft", "tester");
        assert!(matches!(err, Err(CaseClawError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_transition_advances_and_runs_actions() {
        let runner = RecordingRunner::new();
        let (db, engine, case) = setup(runner.clone());
        engine.initialize(&case.id, TENANT, "draft", "tester").unwrap();

        let t = WorkflowTransition::manual(TENANT, "file", "draft", "filed").with_action(
            TransitionAction::UpdateCaseStatus {
                status: CaseStatus::Filed,
            },
        );
        db.insert_transition(&t).unwrap();

        let next = engine
            .transition(
                &case.id,
                TENANT,
                &t.id,
                "tester",
                &ConditionContext::new(),
                serde_json::json!({}),
            )
            .await
            .unwrap();

        assert_eq!(next.name, "filed");
        assert_eq!(next.sequence, 1);
        assert_eq!(next.kind, StateKind::InProgress);
        assert_eq!(runner.ran.lock().unwrap().len(), 1);

        // Exactly one current state, and the old row is exited.
        let states = db.states_for_case(&case.id, TENANT).unwrap();
        assert_eq!(states.len(), 2);
        assert_eq!(states.iter().filter(|s| s.is_current).count(), 1);
        let old = states.iter().find(|s| s.name == "draft").unwrap();
        assert!(old.exited_at.is_some());
        assert_eq!(old.exited_by.as_deref(), Some("tester"));
    }

    #[tokio::test]
    async fn test_action_failure_does_not_abort_transition() {
        let runner = RecordingRunner::failing();
        let (db, engine, case) = setup(runner.clone());
        engine.initialize(&case.id, TENANT, "draft", "tester").unwrap();

        let t = WorkflowTransition::manual(TENANT, "file", "draft", "filed")
            .with_action(TransitionAction::CancelSequence)
            .with_action(TransitionAction::NotifyCustomer {
                template: "filed".into(),
            });
        db.insert_transition(&t).unwrap();

        let next = engine
            .transition(
                &case.id,
                TENANT,
                &t.id,
                "tester",
                &ConditionContext::new(),
                serde_json::json!({}),
            )
            .await
            .unwrap();

        assert_eq!(next.name, "filed");
        // Both actions were attempted despite each failing.
        assert_eq!(runner.ran.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_transition_from_mismatch_fails_without_mutation() {
        let (db, engine, case) = setup(RecordingRunner::new());
        engine.initialize(&case.id, TENANT, "draft", "tester").unwrap();

        let t = WorkflowTransition::manual(TENANT, "review", "filed", "under_review");
        db.insert_transition(&t).unwrap();

        let err = engine
            .transition(
                &case.id,
                TENANT,
                &t.id,
                "tester",
                &ConditionContext::new(),
                serde_json::json!({}),
            )
            .await;
        assert!(matches!(err, Err(CaseClawError::InvalidState(_))));

        let states = db.states_for_case(&case.id, TENANT).unwrap();
        assert_eq!(states.len(), 1);
        assert!(states[0].is_current);
        assert!(states[0].exited_at.is_none());
    }

    #[tokio::test]
    async fn test_disabled_transition_fails() {
        let (db, engine, case) = setup(RecordingRunner::new());
        engine.initialize(&case.id, TENANT, "draft", "tester").unwrap();

        let t = WorkflowTransition::manual(TENANT, "file", "draft", "filed").disabled();
        db.insert_transition(&t).unwrap();

        let err = engine
            .transition(
                &case.id,
                TENANT,
                &t.id,
                "tester",
                &ConditionContext::new(),
                serde_json::json!({}),
            )
            .await;
        assert!(matches!(err, Err(CaseClawError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_conditions_gate_transition() {
        let (db, engine, case) = setup(RecordingRunner::new());
        engine.initialize(&case.id, TENANT, "draft", "tester").unwrap();

        let t = WorkflowTransition::manual(TENANT, "file", "draft", "filed").with_condition(
            Condition::Ge {
                field: "amount".into(),
                value: 50_000.0,
            },
        );
        db.insert_transition(&t).unwrap();

        // Unmet: amount below threshold.
        let low = ConditionContext::new().with_number("amount", 10_000.0);
        let err = engine
            .transition(&case.id, TENANT, &t.id, "tester", &low, serde_json::json!({}))
            .await;
        assert!(matches!(err, Err(CaseClawError::Validation(_))));

        // Missing field fails closed.
        let empty = ConditionContext::new();
        let err = engine
            .transition(&case.id, TENANT, &t.id, "tester", &empty, serde_json::json!({}))
            .await;
        assert!(matches!(err, Err(CaseClawError::Validation(_))));

        // Met.
        let high = ConditionContext::new().with_number("amount", 75_000.0);
        let next = engine
            .transition(&case.id, TENANT, &t.id, "tester", &high, serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(next.name, "filed");
    }

    #[tokio::test]
    async fn test_available_transitions_priority_and_terminal() {
        let (db, engine, case) = setup(RecordingRunner::new());
        engine.initialize(&case.id, TENANT, "draft", "tester").unwrap();

        db.insert_transition(
            &WorkflowTransition::manual(TENANT, "low", "draft", "a").with_priority(1),
        )
        .unwrap();
        db.insert_transition(
            &WorkflowTransition::manual(TENANT, "high", "draft", "b").with_priority(9),
        )
        .unwrap();
        db.insert_transition(
            &WorkflowTransition::manual(TENANT, "off", "draft", "c").disabled(),
        )
        .unwrap();

        let available = engine.available_transitions(&case.id, TENANT).unwrap();
        assert_eq!(available.len(), 2);
        assert_eq!(available[0].name, "high");
        assert_eq!(available[1].name, "low");

        // A state with no outgoing enabled transitions is terminal.
        let dead_end = WorkflowTransition::manual(TENANT, "to_end", "draft", "end");
        db.insert_transition(&dead_end).unwrap();
        engine
            .transition(
                &case.id,
                TENANT,
                &dead_end.id,
                "tester",
                &ConditionContext::new(),
                serde_json::json!({}),
            )
            .await
            .unwrap();
        assert!(engine.available_transitions(&case.id, TENANT).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_automatic_sweep_fires_with_system_actor() {
        let (db, engine, case) = setup(RecordingRunner::new());
        engine.initialize(&case.id, TENANT, "draft", "tester").unwrap();

        let auto = WorkflowTransition::automatic(TENANT, "auto_file", "draft", "filed")
            .with_condition(Condition::Gt {
                field: "amount".into(),
                value: 1_000.0,
            });
        db.insert_transition(&auto).unwrap();

        let stats = engine.run_automatic_sweep().await;
        assert_eq!(stats.scanned, 1);
        assert_eq!(stats.fired, 1);
        assert_eq!(stats.failed, 0);

        let current = engine.current_state(&case.id, TENANT).unwrap().unwrap();
        assert_eq!(current.name, "filed");
        assert_eq!(current.entered_by, SYSTEM_ACTOR);
    }

    #[tokio::test]
    async fn test_sweep_isolates_per_case_failures() {
        let (db, engine, case) = setup(RecordingRunner::new());
        engine.initialize(&case.id, TENANT, "draft", "tester").unwrap();

        // Orphan workflow: a state whose case record does not exist.
        let orphan = WorkflowState::initial("ghost-case", TENANT, "draft", "tester");
        db.insert_state(&orphan).unwrap();

        let auto = WorkflowTransition::automatic(TENANT, "auto_file", "draft", "filed");
        db.insert_transition(&auto).unwrap();

        let stats = engine.run_automatic_sweep().await;
        assert_eq!(stats.scanned, 2);
        assert_eq!(stats.fired, 1);
        assert_eq!(stats.failed, 1);

        // The healthy case still advanced.
        let current = engine.current_state(&case.id, TENANT).unwrap().unwrap();
        assert_eq!(current.name, "filed");
    }

    #[test]
    fn test_condition_serde_roundtrip() {
        let c = Condition::Contains {
            field: "status".into(),
            value: "review".into(),
        };
        let json = serde_json::to_string(&c).unwrap();
        assert!(json.contains("\"op\":\"contains\""));
        let back: Condition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn test_seed_default_workflow() {
        let db = CaseDb::open_in_memory().unwrap();
        let seeded = seed_default_workflow(&db, TENANT).unwrap();
        assert!(seeded.len() >= 6);
        let from_draft = db.transitions_from(TENANT, "draft").unwrap();
        assert_eq!(from_draft.len(), 1);
        assert_eq!(from_draft[0].name, "file");
    }
}
