//! # CaseClaw Engine
//!
//! The workflow/approval/sequencing core: three cooperating state machines
//! over one SQLite state store, driven by periodic sweeps.
//!
//! ## Architecture
//! ```text
//! Case created
//!   → WorkflowEngine.initialize (state graph, declared transitions)
//!   → ApprovalEngine.initialize_workflow (amount → chain of levels)
//!       approve/reject/delegate → aggregate verdict → case status
//!   → SequenceEngine.start_sequence (template → time-offset steps)
//!
//! Sweeps (tokio interval)
//!   ├── workflow sweep: automatic transitions, actor=SYSTEM
//!   └── sequence sweep: one due step per active run per tick
//!
//! Events (invoice overdue / payment / closure)
//!   → EventProcessor (idempotent via processed_events keys)
//! ```

pub mod approval;
pub mod events;
pub mod persistence;
pub mod sequence;
pub mod sweep;
pub mod workflow;

pub use approval::{
    chain_verdict, default_rules, ApprovalDecision, ApprovalEngine, ApprovalLevel, ApprovalRecord,
    ApprovalRule, ApprovalStatus, ApprovalWorkflow, ChainVerdict,
};
pub use events::{CaseEvent, EventOutcome, EventProcessor};
pub use persistence::CaseDb;
pub use sequence::{
    builtin_templates, ChannelRouter, CollectionSequence, SequenceEngine, SequenceStatus,
    SequenceStep, SequenceTemplate, StepChannel, StepStatus,
};
pub use sweep::{run_sequence_sweep, run_workflow_sweep, EngineActionRunner};
pub use workflow::{
    seed_default_workflow, ActionRunner, Condition, ConditionContext, FieldValue,
    LoggingActionRunner, StateKind, TransitionAction, TransitionKind, WorkflowEngine,
    WorkflowState, WorkflowTransition,
};
