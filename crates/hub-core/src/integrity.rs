//! Background integrity sweeper: periodically re-verifies every active
//! equivalent's invariants, persists a checkpoint, and halts an equivalent
//! on a critical violation.

use crate::capability::{Clock, DomainEvent, EventSeverity, EventSink};
use crate::config::IntegrityConfig;
use crate::error::HubError;
use crate::invariants;
use crate::ledger_store::LedgerStore;
use crate::types::{AuditLogEntry, IntegrityCheckpoint, InvariantStatus};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub struct IntegritySweeper {
    store: Arc<LedgerStore>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    config: IntegrityConfig,
}

impl IntegritySweeper {
    pub fn new(
        store: Arc<LedgerStore>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        config: IntegrityConfig,
    ) -> Self {
        Self {
            store,
            events,
            clock,
            config,
        }
    }

    /// Run one sweep over every active equivalent. Returns the checkpoints
    /// written, in the same order as the equivalents were scanned.
    pub async fn run_once(&self) -> Result<Vec<IntegrityCheckpoint>, HubError> {
        let mut checkpoints = Vec::new();
        for equivalent in self.store.list_active_equivalents().await? {
            let checkpoint = self.sweep_one(&equivalent.code).await?;
            checkpoints.push(checkpoint);
        }
        Ok(checkpoints)
    }

    async fn sweep_one(&self, equivalent: &str) -> Result<IntegrityCheckpoint, HubError> {
        let debts = self.store.list_debts(equivalent).await?;
        let zero_sum = invariants::check_zero_sum(&debts);
        let symmetry = invariants::check_debt_symmetry(&debts);
        let trust_limit = invariants::check_trust_limit(&self.store, equivalent).await?;

        let clean = zero_sum.is_clean() && symmetry.is_clean() && trust_limit.is_clean();
        let checksum = invariants::checksum(&debts);
        let now = self.clock.now();

        let previous = self.previous_checksum(equivalent).await?;

        let checkpoint = IntegrityCheckpoint {
            equivalent: equivalent.to_string(),
            checksum: checksum.clone(),
            invariants_status: if clean {
                InvariantStatus::Pass
            } else {
                InvariantStatus::Fail
            },
            created_at: now,
        };
        self.store.insert_checkpoint(checkpoint.clone()).await?;

        self.store
            .append_audit_log(AuditLogEntry {
                id: Uuid::new_v4(),
                operation_type: "integrity_sweep".to_string(),
                tx_id: None,
                checksum_before: previous,
                checksum_after: Some(checksum),
                affected_participants: Vec::new(),
                invariant_results: serde_json::json!({
                    "zero_sum": zero_sum.violations.iter().map(|v| v.detail.clone()).collect::<Vec<_>>(),
                    "debt_symmetry": symmetry.violations.iter().map(|v| v.detail.clone()).collect::<Vec<_>>(),
                    "trust_limit": trust_limit.violations.iter().map(|v| v.detail.clone()).collect::<Vec<_>>(),
                }),
                recorded_at: now,
            })
            .await?;

        if !clean {
            self.store.halt_equivalent(equivalent).await?;
            self.events.emit(DomainEvent {
                kind: "integrity.violation".to_string(),
                payload: serde_json::json!({
                    "equivalent": equivalent,
                    "zero_sum": !zero_sum.is_clean(),
                    "debt_symmetry": !symmetry.is_clean(),
                    "trust_limit": !trust_limit.is_clean(),
                }),
                severity: EventSeverity::High,
                emitted_at: now,
            });
            tracing::error!(equivalent, "integrity sweep found violations; equivalent halted");
        }

        Ok(checkpoint)
    }

    async fn previous_checksum(&self, equivalent: &str) -> Result<Option<String>, HubError> {
        Ok(self
            .store
            .latest_checkpoint(equivalent)
            .await?
            .map(|c| c.checksum))
    }

    /// Drive the sweeper forever at `check_interval_seconds`.
    pub async fn run_forever(&self) {
        loop {
            if let Err(e) = self.run_once().await {
                tracing::error!(error = %e, "integrity sweep iteration failed");
            }
            tokio::time::sleep(Duration::from_secs(self.config.check_interval_seconds)).await;
        }
    }
}
