//! Background recovery loop: reclaims expired prepare locks and aborts
//! transactions stuck mid-2PC past their TTL plus grace period.

use crate::capability::{Clock, DomainEvent, EventSeverity, EventSink};
use crate::config::ProtocolConfig;
use crate::error::HubError;
use crate::ledger_store::LedgerStore;
use crate::types::TransactionState;
use std::sync::Arc;
use std::time::Duration;

pub struct RecoveryLoop {
    store: Arc<LedgerStore>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    config: ProtocolConfig,
}

impl RecoveryLoop {
    pub fn new(
        store: Arc<LedgerStore>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        config: ProtocolConfig,
    ) -> Self {
        Self {
            store,
            events,
            clock,
            config,
        }
    }

    /// Run once: delete expired locks, then abort any transaction that has
    /// sat in PREPARE_IN_PROGRESS or PREPARED past `prepare_ttl_seconds +
    /// recovery_grace_seconds`.
    pub async fn run_once(&self) -> Result<RecoveryOutcome, HubError> {
        let now = self.clock.now();
        let expired_locks = self.store.delete_expired_locks(now).await?;

        let cutoff = now
            - chrono::Duration::seconds(self.config.prepare_ttl_seconds)
            - chrono::Duration::seconds(self.config.recovery_grace_seconds);
        let stuck = self.store.list_stuck_transactions(cutoff).await?;
        let mut aborted = 0u64;

        for tx in &stuck {
            if matches!(
                tx.state,
                TransactionState::PrepareInProgress | TransactionState::Prepared
            ) {
                self.store.delete_locks_for_tx(tx.tx_id).await?;
                self.store
                    .set_transaction_state(
                        tx.tx_id,
                        TransactionState::Aborted,
                        Some("recovery: exceeded prepare TTL".to_string()),
                    )
                    .await?;
                aborted += 1;
                tracing::warn!(tx_id = %tx.tx_id, "recovery loop aborted stuck transaction");
            }
        }

        if expired_locks > 0 || aborted > 0 {
            self.events.emit(DomainEvent {
                kind: "recovery.swept".to_string(),
                payload: serde_json::json!({
                    "expired_locks": expired_locks,
                    "aborted_transactions": aborted,
                }),
                severity: EventSeverity::Info,
                emitted_at: now,
            });
        }

        Ok(RecoveryOutcome {
            expired_locks,
            aborted_transactions: aborted,
        })
    }

    /// Drive the loop forever at `recovery_interval_seconds`, running once
    /// immediately at startup.
    pub async fn run_forever(&self, interval_seconds: u64) {
        loop {
            if let Err(e) = self.run_once().await {
                tracing::error!(error = %e, "recovery loop iteration failed");
            }
            tokio::time::sleep(Duration::from_secs(interval_seconds)).await;
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryOutcome {
    pub expired_locks: u64,
    pub aborted_transactions: u64,
}
