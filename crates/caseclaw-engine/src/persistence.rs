//! SQLite-backed state store for all engine records.
//!
//! One database holds workflow states/transitions, approval chains and
//! history, collection sequences, the processed-events idempotency keys,
//! and the case directory. Nested payloads (conditions, actions, steps,
//! delegate) are JSON TEXT columns; timestamps are RFC 3339 strings.
//!
//! The connection sits behind a mutex so the store is `Send + Sync`, and
//! every mutating update is a version-checked compare-and-swap — a stale
//! write surfaces as a `Conflict` instead of silently clobbering.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use caseclaw_core::error::{CaseClawError, Result};
use caseclaw_core::traits::CaseDirectory;
use caseclaw_core::types::{CaseRecord, CaseStatus};

use crate::approval::{
    ApprovalDecision, ApprovalLevel, ApprovalRecord, ApprovalStatus, ApprovalWorkflow, Approver,
};
use crate::sequence::{CollectionSequence, SequenceStatus};
use crate::workflow::{StateKind, TransitionKind, WorkflowState, WorkflowTransition};

/// The CaseClaw state store.
pub struct CaseDb {
    conn: Mutex<Connection>,
}

impl CaseDb {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)
            .map_err(|e| CaseClawError::store(format!("DB open: {e}")))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// In-memory database — used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CaseClawError::store(format!("DB open: {e}")))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CaseClawError::store("connection mutex poisoned"))
    }

    /// Create tables.
    fn migrate(&self) -> Result<()> {
        self.lock()?
            .execute_batch(
                "
            -- External case directory (read for thresholds/conditions,
            -- written on approval completion/rejection)
            CREATE TABLE IF NOT EXISTS cases (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                case_number TEXT NOT NULL,
                customer_id TEXT NOT NULL,
                customer_name TEXT NOT NULL,
                debtor_email TEXT,
                debtor_phone TEXT,
                amount REAL NOT NULL,
                status TEXT NOT NULL DEFAULT 'draft',
                notes TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- One row per (case, point-in-time state occupancy)
            CREATE TABLE IF NOT EXISTS workflow_states (
                id TEXT PRIMARY KEY,
                case_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                is_current INTEGER NOT NULL DEFAULT 0,
                seq INTEGER NOT NULL DEFAULT 0,
                entered_at TEXT NOT NULL,
                entered_by TEXT NOT NULL,
                exited_at TEXT,
                exited_by TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                version INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_states_current
                ON workflow_states(case_id, tenant_id, is_current);

            -- Declared edges, authored as configuration
            CREATE TABLE IF NOT EXISTS workflow_transitions (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                name TEXT NOT NULL,
                from_state TEXT NOT NULL,
                to_state TEXT NOT NULL,
                to_kind TEXT NOT NULL DEFAULT 'in_progress',
                kind TEXT NOT NULL,
                conditions TEXT NOT NULL DEFAULT '[]',
                actions TEXT NOT NULL DEFAULT '[]',
                priority INTEGER NOT NULL DEFAULT 0,
                enabled INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_transitions_from
                ON workflow_transitions(tenant_id, from_state);

            -- One row per (case, approval level)
            CREATE TABLE IF NOT EXISTS approval_workflows (
                id TEXT PRIMARY KEY,
                case_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                level TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                approver_id TEXT NOT NULL,
                approver_name TEXT NOT NULL,
                approver_email TEXT NOT NULL,
                delegate TEXT,
                seq INTEGER NOT NULL DEFAULT 0,
                parallel INTEGER NOT NULL DEFAULT 0,
                requested_at TEXT NOT NULL,
                responded_at TEXT,
                expires_at TEXT,
                comments TEXT,
                version INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_approvals_case
                ON approval_workflows(case_id, tenant_id);

            -- Append-only decision history
            CREATE TABLE IF NOT EXISTS approval_history (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                actor_id TEXT NOT NULL,
                actor_name TEXT NOT NULL,
                decision TEXT NOT NULL,
                comments TEXT,
                recorded_at TEXT NOT NULL
            );

            -- One row per (case, outreach run); steps as a JSON array
            CREATE TABLE IF NOT EXISTS collection_sequences (
                id TEXT PRIMARY KEY,
                case_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                template TEXT NOT NULL,
                steps TEXT NOT NULL DEFAULT '[]',
                status TEXT NOT NULL DEFAULT 'active',
                current_step INTEGER NOT NULL DEFAULT 0,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                version INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_sequences_case
                ON collection_sequences(case_id, tenant_id, status);

            -- Idempotency keys for the event handler
            CREATE TABLE IF NOT EXISTS processed_events (
                event_id TEXT PRIMARY KEY,
                processed_at TEXT NOT NULL
            );
         ",
            )
            .map_err(|e| CaseClawError::store(format!("migration: {e}")))?;
        Ok(())
    }

    // ─── Cases ───────────────────────────────────────────

    /// Insert or replace a case record.
    pub fn upsert_case(&self, case: &CaseRecord) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO cases
                 (id, tenant_id, case_number, customer_id, customer_name, debtor_email,
                  debtor_phone, amount, status, notes, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    case.id,
                    case.tenant_id,
                    case.case_number,
                    case.customer_id,
                    case.customer_name,
                    case.debtor_email,
                    case.debtor_phone,
                    case.amount,
                    case.status.as_str(),
                    case.notes,
                    ts(&case.created_at),
                    ts(&case.updated_at),
                ],
            )
            .map_err(|e| CaseClawError::store(format!("upsert case: {e}")))?;
        Ok(())
    }

    // ─── Workflow states ─────────────────────────────────

    pub fn insert_state(&self, state: &WorkflowState) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT INTO workflow_states
                 (id, case_id, tenant_id, name, kind, is_current, seq, entered_at,
                  entered_by, exited_at, exited_by, metadata, version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    state.id,
                    state.case_id,
                    state.tenant_id,
                    state.name,
                    state.kind.as_str(),
                    state.is_current as i32,
                    state.sequence,
                    ts(&state.entered_at),
                    state.entered_by,
                    state.exited_at.map(|t| ts(&t)),
                    state.exited_by,
                    state.metadata.to_string(),
                    state.version,
                ],
            )
            .map_err(|e| CaseClawError::store(format!("insert state: {e}")))?;
        Ok(())
    }

    /// Version-checked update of the mutable occupancy fields.
    pub fn update_state(&self, state: &WorkflowState) -> Result<()> {
        let n = self
            .lock()?
            .execute(
                "UPDATE workflow_states
                 SET is_current = ?1, exited_at = ?2, exited_by = ?3, metadata = ?4,
                     version = version + 1
                 WHERE id = ?5 AND version = ?6",
                params![
                    state.is_current as i32,
                    state.exited_at.map(|t| ts(&t)),
                    state.exited_by,
                    state.metadata.to_string(),
                    state.id,
                    state.version,
                ],
            )
            .map_err(|e| CaseClawError::store(format!("update state: {e}")))?;
        if n == 0 {
            return Err(CaseClawError::Conflict(format!(
                "workflow state {} was modified concurrently",
                state.id
            )));
        }
        Ok(())
    }

    /// The `is_current` state for a case, if any.
    pub fn current_state(&self, case_id: &str, tenant_id: &str) -> Result<Option<WorkflowState>> {
        self.lock()?
            .query_row(
                &format!("SELECT {STATE_COLS} FROM workflow_states WHERE case_id = ?1 AND tenant_id = ?2 AND is_current = 1"),
                params![case_id, tenant_id],
                state_from_row,
            )
            .optional()
            .map_err(|e| CaseClawError::store(format!("current state: {e}")))
    }

    /// Every current state across all cases and tenants (sweep input).
    pub fn current_states(&self) -> Result<Vec<WorkflowState>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {STATE_COLS} FROM workflow_states WHERE is_current = 1 ORDER BY entered_at"
            ))
            .map_err(|e| CaseClawError::store(format!("current states: {e}")))?;
        let rows = stmt
            .query_map([], state_from_row)
            .map_err(|e| CaseClawError::store(format!("current states: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Full occupancy history for a case, oldest first.
    pub fn states_for_case(&self, case_id: &str, tenant_id: &str) -> Result<Vec<WorkflowState>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {STATE_COLS} FROM workflow_states
                 WHERE case_id = ?1 AND tenant_id = ?2 ORDER BY seq"
            ))
            .map_err(|e| CaseClawError::store(format!("states for case: {e}")))?;
        let rows = stmt
            .query_map(params![case_id, tenant_id], state_from_row)
            .map_err(|e| CaseClawError::store(format!("states for case: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // ─── Workflow transitions ────────────────────────────

    pub fn insert_transition(&self, t: &WorkflowTransition) -> Result<()> {
        let conditions = serde_json::to_string(&t.conditions)
            .map_err(|e| CaseClawError::store(format!("serialize conditions: {e}")))?;
        let actions = serde_json::to_string(&t.actions)
            .map_err(|e| CaseClawError::store(format!("serialize actions: {e}")))?;
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO workflow_transitions
                 (id, tenant_id, name, from_state, to_state, to_kind, kind,
                  conditions, actions, priority, enabled)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    t.id,
                    t.tenant_id,
                    t.name,
                    t.from_state,
                    t.to_state,
                    t.to_kind.as_str(),
                    t.kind.as_str(),
                    conditions,
                    actions,
                    t.priority,
                    t.enabled as i32,
                ],
            )
            .map_err(|e| CaseClawError::store(format!("insert transition: {e}")))?;
        Ok(())
    }

    pub fn find_transition(
        &self,
        transition_id: &str,
        tenant_id: &str,
    ) -> Result<Option<WorkflowTransition>> {
        self.lock()?
            .query_row(
                &format!(
                    "SELECT {TRANSITION_COLS} FROM workflow_transitions
                     WHERE id = ?1 AND tenant_id = ?2"
                ),
                params![transition_id, tenant_id],
                transition_from_row,
            )
            .optional()
            .map_err(|e| CaseClawError::store(format!("find transition: {e}")))
    }

    /// Enabled transitions leaving a state, highest priority first.
    pub fn transitions_from(
        &self,
        tenant_id: &str,
        from_state: &str,
    ) -> Result<Vec<WorkflowTransition>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {TRANSITION_COLS} FROM workflow_transitions
                 WHERE tenant_id = ?1 AND from_state = ?2 AND enabled = 1
                 ORDER BY priority DESC"
            ))
            .map_err(|e| CaseClawError::store(format!("transitions from: {e}")))?;
        let rows = stmt
            .query_map(params![tenant_id, from_state], transition_from_row)
            .map_err(|e| CaseClawError::store(format!("transitions from: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // ─── Approvals ───────────────────────────────────────

    /// Insert a whole chain in one transaction.
    pub fn insert_approvals(&self, workflows: &[ApprovalWorkflow]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| CaseClawError::store(format!("begin tx: {e}")))?;
        for wf in workflows {
            let delegate = wf
                .delegate
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| CaseClawError::store(format!("serialize delegate: {e}")))?;
            tx.execute(
                "INSERT INTO approval_workflows
                 (id, case_id, tenant_id, level, status, approver_id, approver_name,
                  approver_email, delegate, seq, parallel, requested_at, responded_at,
                  expires_at, comments, version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    wf.id,
                    wf.case_id,
                    wf.tenant_id,
                    wf.level.as_str(),
                    wf.status.as_str(),
                    wf.approver.id,
                    wf.approver.name,
                    wf.approver.email,
                    delegate,
                    wf.sequence,
                    wf.parallel as i32,
                    ts(&wf.requested_at),
                    wf.responded_at.map(|t| ts(&t)),
                    wf.expires_at.map(|t| ts(&t)),
                    wf.comments,
                    wf.version,
                ],
            )
            .map_err(|e| CaseClawError::store(format!("insert approval: {e}")))?;
        }
        tx.commit()
            .map_err(|e| CaseClawError::store(format!("commit tx: {e}")))?;
        Ok(())
    }

    /// Version-checked update of the mutable approval fields.
    pub fn update_approval(&self, wf: &ApprovalWorkflow) -> Result<()> {
        let delegate = wf
            .delegate
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| CaseClawError::store(format!("serialize delegate: {e}")))?;
        let n = self
            .lock()?
            .execute(
                "UPDATE approval_workflows
                 SET status = ?1, delegate = ?2, responded_at = ?3, comments = ?4,
                     version = version + 1
                 WHERE id = ?5 AND version = ?6",
                params![
                    wf.status.as_str(),
                    delegate,
                    wf.responded_at.map(|t| ts(&t)),
                    wf.comments,
                    wf.id,
                    wf.version,
                ],
            )
            .map_err(|e| CaseClawError::store(format!("update approval: {e}")))?;
        if n == 0 {
            return Err(CaseClawError::Conflict(format!(
                "approval workflow {} was modified concurrently",
                wf.id
            )));
        }
        Ok(())
    }

    pub fn find_approval(
        &self,
        workflow_id: &str,
        tenant_id: &str,
    ) -> Result<Option<ApprovalWorkflow>> {
        self.lock()?
            .query_row(
                &format!(
                    "SELECT {APPROVAL_COLS} FROM approval_workflows
                     WHERE id = ?1 AND tenant_id = ?2"
                ),
                params![workflow_id, tenant_id],
                approval_from_row,
            )
            .optional()
            .map_err(|e| CaseClawError::store(format!("find approval: {e}")))
    }

    /// The full chain for a case, ordered by sequence index.
    pub fn approvals_for_case(
        &self,
        case_id: &str,
        tenant_id: &str,
    ) -> Result<Vec<ApprovalWorkflow>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {APPROVAL_COLS} FROM approval_workflows
                 WHERE case_id = ?1 AND tenant_id = ?2 ORDER BY seq"
            ))
            .map_err(|e| CaseClawError::store(format!("approvals for case: {e}")))?;
        let rows = stmt
            .query_map(params![case_id, tenant_id], approval_from_row)
            .map_err(|e| CaseClawError::store(format!("approvals for case: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// All pending approvals for a tenant, oldest request first.
    pub fn pending_approvals(&self, tenant_id: &str) -> Result<Vec<ApprovalWorkflow>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {APPROVAL_COLS} FROM approval_workflows
                 WHERE tenant_id = ?1 AND status = 'pending' ORDER BY requested_at"
            ))
            .map_err(|e| CaseClawError::store(format!("pending approvals: {e}")))?;
        let rows = stmt
            .query_map(params![tenant_id], approval_from_row)
            .map_err(|e| CaseClawError::store(format!("pending approvals: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn insert_history(&self, record: &ApprovalRecord) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT INTO approval_history
                 (id, workflow_id, tenant_id, actor_id, actor_name, decision, comments, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.id,
                    record.workflow_id,
                    record.tenant_id,
                    record.actor_id,
                    record.actor_name,
                    record.decision.as_str(),
                    record.comments,
                    ts(&record.recorded_at),
                ],
            )
            .map_err(|e| CaseClawError::store(format!("insert history: {e}")))?;
        Ok(())
    }

    /// Decision history across every level of a case's chain, oldest first.
    pub fn history_for_case(&self, case_id: &str, tenant_id: &str) -> Result<Vec<ApprovalRecord>> {
        let workflow_ids: Vec<String> = self
            .approvals_for_case(case_id, tenant_id)?
            .into_iter()
            .map(|w| w.id)
            .collect();
        if workflow_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = std::iter::repeat("?")
            .take(workflow_ids.len())
            .collect::<Vec<_>>()
            .join(", ");
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT id, workflow_id, tenant_id, actor_id, actor_name, decision, comments, recorded_at
                 FROM approval_history WHERE workflow_id IN ({placeholders})
                 ORDER BY recorded_at"
            ))
            .map_err(|e| CaseClawError::store(format!("history for case: {e}")))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(workflow_ids.iter()), history_from_row)
            .map_err(|e| CaseClawError::store(format!("history for case: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // ─── Collection sequences ────────────────────────────

    pub fn insert_sequence(&self, seq: &CollectionSequence) -> Result<()> {
        let steps = serde_json::to_string(&seq.steps)
            .map_err(|e| CaseClawError::store(format!("serialize steps: {e}")))?;
        self.lock()?
            .execute(
                "INSERT INTO collection_sequences
                 (id, case_id, tenant_id, template, steps, status, current_step,
                  started_at, completed_at, version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    seq.id,
                    seq.case_id,
                    seq.tenant_id,
                    seq.template,
                    steps,
                    seq.status.as_str(),
                    seq.current_step as i64,
                    ts(&seq.started_at),
                    seq.completed_at.map(|t| ts(&t)),
                    seq.version,
                ],
            )
            .map_err(|e| CaseClawError::store(format!("insert sequence: {e}")))?;
        Ok(())
    }

    /// Version-checked update of the mutable sequence fields.
    pub fn update_sequence(&self, seq: &CollectionSequence) -> Result<()> {
        let steps = serde_json::to_string(&seq.steps)
            .map_err(|e| CaseClawError::store(format!("serialize steps: {e}")))?;
        let n = self
            .lock()?
            .execute(
                "UPDATE collection_sequences
                 SET steps = ?1, status = ?2, current_step = ?3, completed_at = ?4,
                     version = version + 1
                 WHERE id = ?5 AND version = ?6",
                params![
                    steps,
                    seq.status.as_str(),
                    seq.current_step as i64,
                    seq.completed_at.map(|t| ts(&t)),
                    seq.id,
                    seq.version,
                ],
            )
            .map_err(|e| CaseClawError::store(format!("update sequence: {e}")))?;
        if n == 0 {
            return Err(CaseClawError::Conflict(format!(
                "sequence {} was modified concurrently",
                seq.id
            )));
        }
        Ok(())
    }

    pub fn find_sequence(
        &self,
        sequence_id: &str,
        tenant_id: &str,
    ) -> Result<Option<CollectionSequence>> {
        self.lock()?
            .query_row(
                &format!(
                    "SELECT {SEQUENCE_COLS} FROM collection_sequences
                     WHERE id = ?1 AND tenant_id = ?2"
                ),
                params![sequence_id, tenant_id],
                sequence_from_row,
            )
            .optional()
            .map_err(|e| CaseClawError::store(format!("find sequence: {e}")))
    }

    /// The single active sequence for a case, if any.
    pub fn active_sequence_for_case(
        &self,
        case_id: &str,
        tenant_id: &str,
    ) -> Result<Option<CollectionSequence>> {
        self.lock()?
            .query_row(
                &format!(
                    "SELECT {SEQUENCE_COLS} FROM collection_sequences
                     WHERE case_id = ?1 AND tenant_id = ?2 AND status = 'active'
                     ORDER BY started_at DESC LIMIT 1"
                ),
                params![case_id, tenant_id],
                sequence_from_row,
            )
            .optional()
            .map_err(|e| CaseClawError::store(format!("active sequence: {e}")))
    }

    /// Every active sequence across all tenants (sweep input).
    pub fn active_sequences(&self) -> Result<Vec<CollectionSequence>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SEQUENCE_COLS} FROM collection_sequences
                 WHERE status = 'active' ORDER BY started_at"
            ))
            .map_err(|e| CaseClawError::store(format!("active sequences: {e}")))?;
        let rows = stmt
            .query_map([], sequence_from_row)
            .map_err(|e| CaseClawError::store(format!("active sequences: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// All runs (any status) for a case, oldest first.
    pub fn sequences_for_case(
        &self,
        case_id: &str,
        tenant_id: &str,
    ) -> Result<Vec<CollectionSequence>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SEQUENCE_COLS} FROM collection_sequences
                 WHERE case_id = ?1 AND tenant_id = ?2 ORDER BY started_at"
            ))
            .map_err(|e| CaseClawError::store(format!("sequences for case: {e}")))?;
        let rows = stmt
            .query_map(params![case_id, tenant_id], sequence_from_row)
            .map_err(|e| CaseClawError::store(format!("sequences for case: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // ─── Processed events ────────────────────────────────

    /// Record an event id. Returns true if it was fresh, false if the
    /// event was already processed.
    pub fn mark_event_processed(&self, event_id: &str) -> Result<bool> {
        let n = self
            .lock()?
            .execute(
                "INSERT OR IGNORE INTO processed_events (event_id, processed_at) VALUES (?1, ?2)",
                params![event_id, ts(&Utc::now())],
            )
            .map_err(|e| CaseClawError::store(format!("mark event: {e}")))?;
        Ok(n > 0)
    }
}

impl CaseDirectory for CaseDb {
    fn find_case(&self, case_id: &str, tenant_id: &str) -> Result<CaseRecord> {
        self.lock()?
            .query_row(
                "SELECT id, tenant_id, case_number, customer_id, customer_name, debtor_email,
                        debtor_phone, amount, status, notes, created_at, updated_at
                 FROM cases WHERE id = ?1 AND tenant_id = ?2",
                params![case_id, tenant_id],
                case_from_row,
            )
            .optional()
            .map_err(|e| CaseClawError::store(format!("find case: {e}")))?
            .ok_or_else(|| CaseClawError::not_found(format!("case {case_id}")))
    }

    fn update_case_status(
        &self,
        case_id: &str,
        tenant_id: &str,
        status: CaseStatus,
        note: Option<&str>,
    ) -> Result<()> {
        let appended = note
            .map(|n| format!("\n[{}] {}", Utc::now().to_rfc3339(), n))
            .unwrap_or_default();
        let n = self
            .lock()?
            .execute(
                "UPDATE cases SET status = ?1, notes = notes || ?2, updated_at = ?3
                 WHERE id = ?4 AND tenant_id = ?5",
                params![status.as_str(), appended, ts(&Utc::now()), case_id, tenant_id],
            )
            .map_err(|e| CaseClawError::store(format!("update case: {e}")))?;
        if n == 0 {
            return Err(CaseClawError::not_found(format!("case {case_id}")));
        }
        Ok(())
    }
}

// ─── Row mapping ─────────────────────────────────────────

const STATE_COLS: &str = "id, case_id, tenant_id, name, kind, is_current, seq, entered_at, \
     entered_by, exited_at, exited_by, metadata, version";

const TRANSITION_COLS: &str = "id, tenant_id, name, from_state, to_state, to_kind, kind, \
     conditions, actions, priority, enabled";

const APPROVAL_COLS: &str = "id, case_id, tenant_id, level, status, approver_id, approver_name, \
     approver_email, delegate, seq, parallel, requested_at, responded_at, expires_at, comments, version";

const SEQUENCE_COLS: &str = "id, case_id, tenant_id, template, steps, status, current_step, \
     started_at, completed_at, version";

fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn state_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkflowState> {
    let kind: String = row.get(4)?;
    let metadata: String = row.get(11)?;
    Ok(WorkflowState {
        id: row.get(0)?,
        case_id: row.get(1)?,
        tenant_id: row.get(2)?,
        name: row.get(3)?,
        kind: StateKind::parse(&kind).unwrap_or(StateKind::InProgress),
        is_current: row.get::<_, i32>(5)? != 0,
        sequence: row.get(6)?,
        entered_at: parse_ts(&row.get::<_, String>(7)?),
        entered_by: row.get(8)?,
        exited_at: row.get::<_, Option<String>>(9)?.map(|s| parse_ts(&s)),
        exited_by: row.get(10)?,
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
        version: row.get(12)?,
    })
}

fn transition_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkflowTransition> {
    let to_kind: String = row.get(5)?;
    let kind: String = row.get(6)?;
    let conditions: String = row.get(7)?;
    let actions: String = row.get(8)?;
    Ok(WorkflowTransition {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        name: row.get(2)?,
        from_state: row.get(3)?,
        to_state: row.get(4)?,
        to_kind: StateKind::parse(&to_kind).unwrap_or(StateKind::InProgress),
        kind: TransitionKind::parse(&kind).unwrap_or(TransitionKind::Manual),
        conditions: serde_json::from_str(&conditions).unwrap_or_default(),
        actions: serde_json::from_str(&actions).unwrap_or_default(),
        priority: row.get(9)?,
        enabled: row.get::<_, i32>(10)? != 0,
    })
}

fn approval_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ApprovalWorkflow> {
    let level: String = row.get(3)?;
    let status: String = row.get(4)?;
    let delegate: Option<String> = row.get(8)?;
    Ok(ApprovalWorkflow {
        id: row.get(0)?,
        case_id: row.get(1)?,
        tenant_id: row.get(2)?,
        level: ApprovalLevel::parse(&level).unwrap_or(ApprovalLevel::L1Manager),
        status: ApprovalStatus::parse(&status).unwrap_or(ApprovalStatus::Pending),
        approver: Approver {
            id: row.get(5)?,
            name: row.get(6)?,
            email: row.get(7)?,
        },
        delegate: delegate.and_then(|s| serde_json::from_str(&s).ok()),
        sequence: row.get(9)?,
        parallel: row.get::<_, i32>(10)? != 0,
        requested_at: parse_ts(&row.get::<_, String>(11)?),
        responded_at: row.get::<_, Option<String>>(12)?.map(|s| parse_ts(&s)),
        expires_at: row.get::<_, Option<String>>(13)?.map(|s| parse_ts(&s)),
        comments: row.get(14)?,
        version: row.get(15)?,
    })
}

fn history_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ApprovalRecord> {
    let decision: String = row.get(5)?;
    Ok(ApprovalRecord {
        id: row.get(0)?,
        workflow_id: row.get(1)?,
        tenant_id: row.get(2)?,
        actor_id: row.get(3)?,
        actor_name: row.get(4)?,
        decision: ApprovalDecision::parse(&decision).unwrap_or(ApprovalDecision::Approve),
        comments: row.get(6)?,
        recorded_at: parse_ts(&row.get::<_, String>(7)?),
    })
}

fn sequence_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CollectionSequence> {
    let steps: String = row.get(4)?;
    let status: String = row.get(5)?;
    Ok(CollectionSequence {
        id: row.get(0)?,
        case_id: row.get(1)?,
        tenant_id: row.get(2)?,
        template: row.get(3)?,
        steps: serde_json::from_str(&steps).unwrap_or_default(),
        status: SequenceStatus::parse(&status).unwrap_or(SequenceStatus::Active),
        current_step: row.get::<_, i64>(6)? as usize,
        started_at: parse_ts(&row.get::<_, String>(7)?),
        completed_at: row.get::<_, Option<String>>(8)?.map(|s| parse_ts(&s)),
        version: row.get(9)?,
    })
}

fn case_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CaseRecord> {
    let status: String = row.get(8)?;
    Ok(CaseRecord {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        case_number: row.get(2)?,
        customer_id: row.get(3)?,
        customer_name: row.get(4)?,
        debtor_email: row.get(5)?,
        debtor_phone: row.get(6)?,
        amount: row.get(7)?,
        status: CaseStatus::parse(&status).unwrap_or(CaseStatus::Draft),
        notes: row.get(9)?,
        created_at: parse_ts(&row.get::<_, String>(10)?),
        updated_at: parse_ts(&row.get::<_, String>(11)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::TransitionAction;

    const TENANT: &str = "tenant-1";

    #[test]
    fn test_open_and_migrate() {
        let db = CaseDb::open_in_memory().unwrap();
        assert!(db.current_states().unwrap().is_empty());
        assert!(db.active_sequences().unwrap().is_empty());
    }

    #[test]
    fn test_case_roundtrip_and_status_note() {
        let db = CaseDb::open_in_memory().unwrap();
        let case = CaseRecord::new(TENANT, "cust-1", "Acme Traders", 42_000.0)
            .with_contact(Some("a@b.example"), None);
        db.upsert_case(&case).unwrap();

        let loaded = db.find_case(&case.id, TENANT).unwrap();
        assert_eq!(loaded.case_number, case.case_number);
        assert_eq!(loaded.amount, 42_000.0);

        db.update_case_status(&case.id, TENANT, CaseStatus::Closed, Some("done"))
            .unwrap();
        let loaded = db.find_case(&case.id, TENANT).unwrap();
        assert_eq!(loaded.status, CaseStatus::Closed);
        assert!(loaded.notes.contains("done"));

        // Tenant scoping: wrong tenant sees nothing.
        assert!(db.find_case(&case.id, "other-tenant").is_err());
    }

    #[test]
    fn test_state_version_check() {
        let db = CaseDb::open_in_memory().unwrap();
        let mut state = WorkflowState::initial("case-1", TENANT, "draft", "tester");
        db.insert_state(&state).unwrap();

        state.is_current = false;
        state.exited_at = Some(Utc::now());
        db.update_state(&state).unwrap();

        // Second write with the stale version loses the race.
        let err = db.update_state(&state);
        assert!(matches!(err, Err(CaseClawError::Conflict(_))));
    }

    #[test]
    fn test_transition_json_columns_roundtrip() {
        let db = CaseDb::open_in_memory().unwrap();
        let t = WorkflowTransition::automatic(TENANT, "auto", "a", "b")
            .with_condition(crate::workflow::Condition::Ge {
                field: "amount".into(),
                value: 10.0,
            })
            .with_action(TransitionAction::CancelSequence)
            .with_priority(7);
        db.insert_transition(&t).unwrap();

        let loaded = db.find_transition(&t.id, TENANT).unwrap().unwrap();
        assert_eq!(loaded.conditions, t.conditions);
        assert_eq!(loaded.actions, t.actions);
        assert_eq!(loaded.priority, 7);
        assert_eq!(loaded.kind, TransitionKind::Automatic);
    }

    #[test]
    fn test_approval_version_check() {
        let db = CaseDb::open_in_memory().unwrap();
        let mut wf = ApprovalWorkflow::new(
            "case-1",
            TENANT,
            ApprovalLevel::L1Manager,
            0,
            false,
            None,
            Approver {
                id: "a1".into(),
                name: "Manager".into(),
                email: "m@x.example".into(),
            },
        );
        db.insert_approvals(std::slice::from_ref(&wf)).unwrap();

        wf.status = ApprovalStatus::Approved;
        db.update_approval(&wf).unwrap();
        let err = db.update_approval(&wf);
        assert!(matches!(err, Err(CaseClawError::Conflict(_))));

        // Fresh read carries the bumped version and can write again.
        let mut fresh = db.find_approval(&wf.id, TENANT).unwrap().unwrap();
        assert_eq!(fresh.version, 1);
        fresh.comments = Some("second write".into());
        db.update_approval(&fresh).unwrap();
    }

    #[test]
    fn test_mark_event_processed_is_once() {
        let db = CaseDb::open_in_memory().unwrap();
        assert!(db.mark_event_processed("evt-1").unwrap());
        assert!(!db.mark_event_processed("evt-1").unwrap());
        assert!(db.mark_event_processed("evt-2").unwrap());
    }
}
