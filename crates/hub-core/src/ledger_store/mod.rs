//! Transactional access to participants, equivalents, trust lines, debts,
//! transactions, prepare-locks, and integrity checkpoints.
//!
//! Mirrors the teacher's persisted-ledger split: one enum dispatching to an
//! in-memory backend (tests, local runs) or a Postgres backend, both
//! implementing the same serializable-segment and debt-normalization
//! guarantees.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use crate::error::HubError;
use crate::types::{
    AuditLogEntry, Debt, Equivalent, IntegrityCheckpoint, Participant, PrepareLock, Transaction,
    TransactionState, TrustLine, TrustLinePolicy,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// 64-bit hash of a `(equivalent, from, to)` triple, used to key the
/// pessimistic advisory lock on that segment.
pub fn segment_key(equivalent: &str, from: &str, to: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    equivalent.hash(&mut hasher);
    from.hash(&mut hasher);
    to.hash(&mut hasher);
    hasher.finish()
}

/// Canonical lock ordering for a multi-segment operation: sorted
/// lexicographically by `(equivalent, from, to)`, preventing deadlocks.
pub fn canonical_order(segments: &mut [(String, String, String)]) {
    segments.sort();
}

#[derive(Debug, Clone)]
pub enum LedgerStorageConfig {
    Memory,
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

impl LedgerStorageConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn postgres(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Postgres {
            database_url: database_url.into(),
            max_connections,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }
}

pub enum LedgerStore {
    Memory(MemoryStore),
    Postgres(PostgresStore),
}

impl LedgerStore {
    pub async fn bootstrap(config: LedgerStorageConfig) -> Result<Self, HubError> {
        match config {
            LedgerStorageConfig::Memory => Ok(Self::Memory(MemoryStore::new())),
            LedgerStorageConfig::Postgres {
                database_url,
                max_connections,
            } => {
                let store = PostgresStore::connect(&database_url, max_connections).await?;
                store.ensure_schema().await?;
                Ok(Self::Postgres(store))
            }
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Postgres(_) => "postgres",
        }
    }

    pub async fn create_participant(&self, participant: Participant) -> Result<(), HubError> {
        match self {
            Self::Memory(s) => s.create_participant(participant).await,
            Self::Postgres(s) => s.create_participant(participant).await,
        }
    }

    pub async fn get_participant(&self, pid: &str) -> Result<Option<Participant>, HubError> {
        match self {
            Self::Memory(s) => s.get_participant(pid).await,
            Self::Postgres(s) => s.get_participant(pid).await,
        }
    }

    pub async fn create_equivalent(&self, equivalent: Equivalent) -> Result<(), HubError> {
        match self {
            Self::Memory(s) => s.create_equivalent(equivalent).await,
            Self::Postgres(s) => s.create_equivalent(equivalent).await,
        }
    }

    pub async fn get_equivalent(&self, code: &str) -> Result<Option<Equivalent>, HubError> {
        match self {
            Self::Memory(s) => s.get_equivalent(code).await,
            Self::Postgres(s) => s.get_equivalent(code).await,
        }
    }

    pub async fn list_active_equivalents(&self) -> Result<Vec<Equivalent>, HubError> {
        match self {
            Self::Memory(s) => s.list_active_equivalents().await,
            Self::Postgres(s) => s.list_active_equivalents().await,
        }
    }

    pub async fn create_trust_line(&self, line: TrustLine) -> Result<(), HubError> {
        match self {
            Self::Memory(s) => s.create_trust_line(line).await,
            Self::Postgres(s) => s.create_trust_line(line).await,
        }
    }

    pub async fn get_trust_line(&self, id: Uuid) -> Result<Option<TrustLine>, HubError> {
        match self {
            Self::Memory(s) => s.get_trust_line(id).await,
            Self::Postgres(s) => s.get_trust_line(id).await,
        }
    }

    pub async fn find_trust_line(
        &self,
        from: &str,
        to: &str,
        equivalent: &str,
    ) -> Result<Option<TrustLine>, HubError> {
        match self {
            Self::Memory(s) => s.find_trust_line(from, to, equivalent).await,
            Self::Postgres(s) => s.find_trust_line(from, to, equivalent).await,
        }
    }

    pub async fn list_trust_lines(&self, equivalent: &str) -> Result<Vec<TrustLine>, HubError> {
        match self {
            Self::Memory(s) => s.list_trust_lines(equivalent).await,
            Self::Postgres(s) => s.list_trust_lines(equivalent).await,
        }
    }

    pub async fn update_trust_line(
        &self,
        id: Uuid,
        new_limit: Option<Decimal>,
        new_policy: Option<TrustLinePolicy>,
    ) -> Result<TrustLine, HubError> {
        match self {
            Self::Memory(s) => s.update_trust_line(id, new_limit, new_policy).await,
            Self::Postgres(s) => s.update_trust_line(id, new_limit, new_policy).await,
        }
    }

    pub async fn close_trust_line(&self, id: Uuid) -> Result<(), HubError> {
        match self {
            Self::Memory(s) => s.close_trust_line(id).await,
            Self::Postgres(s) => s.close_trust_line(id).await,
        }
    }

    pub async fn get_debt(
        &self,
        debtor: &str,
        creditor: &str,
        equivalent: &str,
    ) -> Result<Option<Debt>, HubError> {
        match self {
            Self::Memory(s) => s.get_debt(debtor, creditor, equivalent).await,
            Self::Postgres(s) => s.get_debt(debtor, creditor, equivalent).await,
        }
    }

    pub async fn list_debts(&self, equivalent: &str) -> Result<Vec<Debt>, HubError> {
        match self {
            Self::Memory(s) => s.list_debts(equivalent).await,
            Self::Postgres(s) => s.list_debts(equivalent).await,
        }
    }

    /// Apply a flow `from -> to` of `delta` in `equivalent`, performing
    /// debtor/creditor offset normalization. Acquires the segment's
    /// advisory lock for the duration of the call.
    pub async fn apply_flow(
        &self,
        equivalent: &str,
        from: &str,
        to: &str,
        delta: Decimal,
    ) -> Result<(), HubError> {
        match self {
            Self::Memory(s) => s.apply_flow(equivalent, from, to, delta).await,
            Self::Postgres(s) => s.apply_flow(equivalent, from, to, delta).await,
        }
    }

    /// Sum of non-expired reserved deltas on `(equivalent, from, to)`,
    /// optionally excluding one `tx_id` (used when recomputing availability
    /// mid-prepare for that same transaction).
    pub async fn reserved_on_segment(
        &self,
        equivalent: &str,
        from: &str,
        to: &str,
        excluding_tx: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Decimal, HubError> {
        match self {
            Self::Memory(s) => {
                s.reserved_on_segment(equivalent, from, to, excluding_tx, now)
                    .await
            }
            Self::Postgres(s) => {
                s.reserved_on_segment(equivalent, from, to, excluding_tx, now)
                    .await
            }
        }
    }

    pub async fn insert_prepare_lock(&self, lock: PrepareLock) -> Result<(), HubError> {
        match self {
            Self::Memory(s) => s.insert_prepare_lock(lock).await,
            Self::Postgres(s) => s.insert_prepare_lock(lock).await,
        }
    }

    pub async fn delete_locks_for_tx(&self, tx_id: Uuid) -> Result<(), HubError> {
        match self {
            Self::Memory(s) => s.delete_locks_for_tx(tx_id).await,
            Self::Postgres(s) => s.delete_locks_for_tx(tx_id).await,
        }
    }

    pub async fn delete_expired_locks(&self, now: DateTime<Utc>) -> Result<u64, HubError> {
        match self {
            Self::Memory(s) => s.delete_expired_locks(now).await,
            Self::Postgres(s) => s.delete_expired_locks(now).await,
        }
    }

    pub async fn create_transaction(&self, tx: Transaction) -> Result<(), HubError> {
        match self {
            Self::Memory(s) => s.create_transaction(tx).await,
            Self::Postgres(s) => s.create_transaction(tx).await,
        }
    }

    pub async fn get_transaction(&self, tx_id: Uuid) -> Result<Option<Transaction>, HubError> {
        match self {
            Self::Memory(s) => s.get_transaction(tx_id).await,
            Self::Postgres(s) => s.get_transaction(tx_id).await,
        }
    }

    pub async fn set_transaction_state(
        &self,
        tx_id: Uuid,
        state: TransactionState,
        abort_reason: Option<String>,
    ) -> Result<(), HubError> {
        match self {
            Self::Memory(s) => s.set_transaction_state(tx_id, state, abort_reason).await,
            Self::Postgres(s) => s.set_transaction_state(tx_id, state, abort_reason).await,
        }
    }

    pub async fn list_stuck_transactions(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, HubError> {
        match self {
            Self::Memory(s) => s.list_stuck_transactions(older_than).await,
            Self::Postgres(s) => s.list_stuck_transactions(older_than).await,
        }
    }

    pub async fn insert_checkpoint(&self, checkpoint: IntegrityCheckpoint) -> Result<(), HubError> {
        match self {
            Self::Memory(s) => s.insert_checkpoint(checkpoint).await,
            Self::Postgres(s) => s.insert_checkpoint(checkpoint).await,
        }
    }

    pub async fn latest_checkpoint(
        &self,
        equivalent: &str,
    ) -> Result<Option<IntegrityCheckpoint>, HubError> {
        match self {
            Self::Memory(s) => s.latest_checkpoint(equivalent).await,
            Self::Postgres(s) => s.latest_checkpoint(equivalent).await,
        }
    }

    pub async fn append_audit_log(&self, entry: AuditLogEntry) -> Result<(), HubError> {
        match self {
            Self::Memory(s) => s.append_audit_log(entry).await,
            Self::Postgres(s) => s.append_audit_log(entry).await,
        }
    }

    pub async fn list_audit_log(&self, limit: usize) -> Result<Vec<AuditLogEntry>, HubError> {
        match self {
            Self::Memory(s) => s.list_audit_log(limit).await,
            Self::Postgres(s) => s.list_audit_log(limit).await,
        }
    }

    pub async fn is_equivalent_halted(&self, equivalent: &str) -> Result<bool, HubError> {
        match self {
            Self::Memory(s) => s.is_equivalent_halted(equivalent).await,
            Self::Postgres(s) => s.is_equivalent_halted(equivalent).await,
        }
    }

    pub async fn halt_equivalent(&self, equivalent: &str) -> Result<(), HubError> {
        match self {
            Self::Memory(s) => s.halt_equivalent(equivalent).await,
            Self::Postgres(s) => s.halt_equivalent(equivalent).await,
        }
    }
}
