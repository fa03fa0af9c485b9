//! Background sweeps — the recurring ticks that drive the engines.
//!
//! Two independent cadences share the tokio runtime: the workflow
//! automatic-transition sweep (minutes) and the collection-sequence step
//! sweep (hourly). Each loop runs forever; per-record failures are already
//! isolated inside the engines, so a tick never aborts.

use std::sync::Arc;

use async_trait::async_trait;

use caseclaw_core::error::{CaseClawError, Result};
use caseclaw_core::traits::{CaseDirectory, Notifier};

use crate::sequence::SequenceEngine;
use crate::workflow::{ActionRunner, TransitionAction, WorkflowEngine};

/// Spawnable loop for the workflow automatic-transition sweep.
pub async fn run_workflow_sweep(engine: Arc<WorkflowEngine>, interval_secs: u64) {
    tracing::info!("⏰ workflow sweep started (every {interval_secs}s)");
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    loop {
        interval.tick().await;
        engine.run_automatic_sweep().await;
    }
}

/// Spawnable loop for the collection-sequence step sweep.
pub async fn run_sequence_sweep(engine: Arc<SequenceEngine>, interval_secs: u64) {
    tracing::info!("⏰ sequence sweep started (every {interval_secs}s)");
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    loop {
        interval.tick().await;
        engine.process_due_steps().await;
    }
}

/// Production [`ActionRunner`]: wires transition side effects to the
/// sequence engine, case directory, notifier, and HTTP client.
pub struct EngineActionRunner {
    sequences: Arc<SequenceEngine>,
    cases: Arc<dyn CaseDirectory>,
    notifier: Arc<dyn Notifier>,
    http: reqwest::Client,
}

impl EngineActionRunner {
    pub fn new(
        sequences: Arc<SequenceEngine>,
        cases: Arc<dyn CaseDirectory>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            sequences,
            cases,
            notifier,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ActionRunner for EngineActionRunner {
    async fn run(&self, case_id: &str, tenant_id: &str, action: &TransitionAction) -> Result<()> {
        match action {
            TransitionAction::NotifyCustomer { template } => {
                let case = self.cases.find_case(case_id, tenant_id)?;
                match case.debtor_email {
                    Some(email) => {
                        self.notifier
                            .notify(
                                &email,
                                &format!("Update on case {}", case.case_number),
                                &format!(
                                    "There is an update on your case {} ({template}).",
                                    case.case_number
                                ),
                            )
                            .await
                    }
                    None => {
                        tracing::debug!("case {case_id} has no debtor email, skipping notify");
                        Ok(())
                    }
                }
            }
            TransitionAction::UpdateCaseStatus { status } => {
                self.cases.update_case_status(case_id, tenant_id, *status, None)
            }
            TransitionAction::StartSequence { template } => self
                .sequences
                .start_sequence(case_id, tenant_id, template)
                .map(|_| ()),
            TransitionAction::CancelSequence => {
                self.sequences.cancel_for_case(case_id, tenant_id).map(|_| ())
            }
            TransitionAction::Webhook { url } => {
                let resp = self
                    .http
                    .post(url)
                    .json(&serde_json::json!({
                        "case_id": case_id,
                        "tenant_id": tenant_id,
                    }))
                    .timeout(std::time::Duration::from_secs(30))
                    .send()
                    .await
                    .map_err(|e| CaseClawError::Dependency(format!("webhook {url}: {e}")))?;
                if !resp.status().is_success() {
                    return Err(CaseClawError::Dependency(format!(
                        "webhook {url} returned {}",
                        resp.status()
                    )));
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::CaseDb;
    use crate::sequence::ChannelRouter;
    use caseclaw_core::types::{CaseRecord, CaseStatus};

    const TENANT: &str = "tenant-1";

    struct NullNotifier;

    #[async_trait]
    impl Notifier for NullNotifier {
        async fn notify(&self, _to: &str, _subject: &str, _body: &str) -> Result<()> {
            Ok(())
        }
    }

    fn setup() -> (Arc<CaseDb>, EngineActionRunner, CaseRecord) {
        let db = Arc::new(CaseDb::open_in_memory().unwrap());
        let case = CaseRecord::new(TENANT, "cust-1", "Acme Traders", 30_000.0)
            .with_contact(Some("a@b.example"), Some("+15550100"));
        db.upsert_case(&case).unwrap();
        let sequences = Arc::new(SequenceEngine::new(
            db.clone(),
            db.clone(),
            ChannelRouter::new(),
        ));
        let runner = EngineActionRunner::new(sequences, db.clone(), Arc::new(NullNotifier));
        (db, runner, case)
    }

    #[tokio::test]
    async fn test_update_case_status_action() {
        let (db, runner, case) = setup();
        runner
            .run(
                &case.id,
                TENANT,
                &TransitionAction::UpdateCaseStatus {
                    status: CaseStatus::Filed,
                },
            )
            .await
            .unwrap();
        assert_eq!(db.find_case(&case.id, TENANT).unwrap().status, CaseStatus::Filed);
    }

    #[tokio::test]
    async fn test_start_and_cancel_sequence_actions() {
        let (db, runner, case) = setup();
        runner
            .run(
                &case.id,
                TENANT,
                &TransitionAction::StartSequence {
                    template: "friendly".into(),
                },
            )
            .await
            .unwrap();
        assert!(db.active_sequence_for_case(&case.id, TENANT).unwrap().is_some());

        runner
            .run(&case.id, TENANT, &TransitionAction::CancelSequence)
            .await
            .unwrap();
        assert!(db.active_sequence_for_case(&case.id, TENANT).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancel_without_active_sequence_is_noop() {
        let (_db, runner, case) = setup();
        runner
            .run(&case.id, TENANT, &TransitionAction::CancelSequence)
            .await
            .unwrap();
    }
}
