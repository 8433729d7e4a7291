use super::segment_key;
use crate::error::HubError;
use crate::types::{
    AuditLogEntry, Debt, Equivalent, IntegrityCheckpoint, Participant, PrepareLock, Transaction,
    TransactionState, TrustLine, TrustLinePolicy,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Key for a debt row or a trust line endpoint pair.
type PairKey = (String, String, String); // (a, b, equivalent)

/// In-memory ledger backend. Used for tests and the zero-dependency local
/// run mode. Per-segment serialization is provided by a keyed mutex table
/// rather than a real database lock, but the acquire/release discipline is
/// identical to the Postgres backend's advisory locks.
#[derive(Default)]
pub struct MemoryStore {
    participants: DashMap<String, Participant>,
    equivalents: DashMap<String, Equivalent>,
    trust_lines: DashMap<Uuid, TrustLine>,
    debts: DashMap<PairKey, Debt>,
    transactions: DashMap<Uuid, Transaction>,
    prepare_locks: DashMap<(Uuid, String, String, String), PrepareLock>,
    checkpoints: DashMap<String, Vec<IntegrityCheckpoint>>,
    audit_log: DashMap<Uuid, AuditLogEntry>,
    halted_equivalents: DashMap<String, ()>,
    segment_locks: DashMap<u64, Arc<Mutex<()>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn segment_lock(&self, equivalent: &str, from: &str, to: &str) -> Arc<Mutex<()>> {
        let key = segment_key(equivalent, from, to);
        self.segment_locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn create_participant(&self, participant: Participant) -> Result<(), HubError> {
        if self.participants.contains_key(&participant.pid) {
            return Err(HubError::AlreadyExists(format!(
                "participant {} already exists",
                participant.pid
            )));
        }
        self.participants.insert(participant.pid.clone(), participant);
        Ok(())
    }

    pub async fn get_participant(&self, pid: &str) -> Result<Option<Participant>, HubError> {
        Ok(self.participants.get(pid).map(|r| r.clone()))
    }

    pub async fn create_equivalent(&self, equivalent: Equivalent) -> Result<(), HubError> {
        if self.equivalents.contains_key(&equivalent.code) {
            return Err(HubError::AlreadyExists(format!(
                "equivalent {} already exists",
                equivalent.code
            )));
        }
        self.equivalents.insert(equivalent.code.clone(), equivalent);
        Ok(())
    }

    pub async fn get_equivalent(&self, code: &str) -> Result<Option<Equivalent>, HubError> {
        Ok(self.equivalents.get(code).map(|r| r.clone()))
    }

    pub async fn list_active_equivalents(&self) -> Result<Vec<Equivalent>, HubError> {
        Ok(self
            .equivalents
            .iter()
            .filter(|e| e.active)
            .map(|e| e.clone())
            .collect())
    }

    pub async fn create_trust_line(&self, line: TrustLine) -> Result<(), HubError> {
        let exists = self.trust_lines.iter().any(|l| {
            l.is_active() && l.from == line.from && l.to == line.to && l.equivalent == line.equivalent
        });
        if exists {
            return Err(HubError::AlreadyExists(format!(
                "active trust line {}->{} in {} already exists",
                line.from, line.to, line.equivalent
            )));
        }
        self.trust_lines.insert(line.id, line);
        Ok(())
    }

    pub async fn get_trust_line(&self, id: Uuid) -> Result<Option<TrustLine>, HubError> {
        Ok(self.trust_lines.get(&id).map(|r| r.clone()))
    }

    pub async fn find_trust_line(
        &self,
        from: &str,
        to: &str,
        equivalent: &str,
    ) -> Result<Option<TrustLine>, HubError> {
        Ok(self
            .trust_lines
            .iter()
            .find(|l| l.is_active() && l.from == from && l.to == to && l.equivalent == equivalent)
            .map(|r| r.clone()))
    }

    pub async fn list_trust_lines(&self, equivalent: &str) -> Result<Vec<TrustLine>, HubError> {
        Ok(self
            .trust_lines
            .iter()
            .filter(|l| l.equivalent == equivalent)
            .map(|l| l.clone())
            .collect())
    }

    pub async fn update_trust_line(
        &self,
        id: Uuid,
        new_limit: Option<Decimal>,
        new_policy: Option<TrustLinePolicy>,
    ) -> Result<TrustLine, HubError> {
        let mut entry = self
            .trust_lines
            .get_mut(&id)
            .ok_or_else(|| HubError::NotFound(format!("trust line {id}")))?;
        if let Some(limit) = new_limit {
            let debt = self
                .debts
                .get(&(entry.to.clone(), entry.from.clone(), entry.equivalent.clone()))
                .map(|d| d.amount)
                .unwrap_or(Decimal::ZERO);
            if limit < debt {
                return Err(HubError::LimitBelowDebt {
                    new_limit: limit,
                    debt,
                });
            }
            entry.limit = limit;
        }
        if let Some(policy) = new_policy {
            entry.policy = policy;
        }
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    pub async fn close_trust_line(&self, id: Uuid) -> Result<(), HubError> {
        let mut entry = self
            .trust_lines
            .get_mut(&id)
            .ok_or_else(|| HubError::NotFound(format!("trust line {id}")))?;
        let debt = self
            .debts
            .get(&(entry.to.clone(), entry.from.clone(), entry.equivalent.clone()))
            .map(|d| d.amount)
            .unwrap_or(Decimal::ZERO);
        if debt > Decimal::ZERO {
            return Err(HubError::DebtOutstanding(debt));
        }
        entry.status = crate::types::TrustLineStatus::Closed;
        entry.updated_at = Utc::now();
        Ok(())
    }

    pub async fn get_debt(
        &self,
        debtor: &str,
        creditor: &str,
        equivalent: &str,
    ) -> Result<Option<Debt>, HubError> {
        Ok(self
            .debts
            .get(&(debtor.to_string(), creditor.to_string(), equivalent.to_string()))
            .map(|d| d.clone()))
    }

    pub async fn list_debts(&self, equivalent: &str) -> Result<Vec<Debt>, HubError> {
        Ok(self
            .debts
            .iter()
            .filter(|e| e.key().2 == equivalent)
            .map(|e| e.value().clone())
            .collect())
    }

    /// Apply a flow `from -> to` of `delta`, offsetting any opposite-direction
    /// debt first, per the ledger's debt-symmetry construction.
    pub async fn apply_flow(
        &self,
        equivalent: &str,
        from: &str,
        to: &str,
        delta: Decimal,
    ) -> Result<(), HubError> {
        let lock = self.segment_lock(equivalent, from, to);
        let _guard = lock.lock().await;

        let mut remaining = delta;
        let opposite_key = (to.to_string(), from.to_string(), equivalent.to_string());
        if let Some(mut opposite) = self.debts.get_mut(&opposite_key) {
            let offset = remaining.min(opposite.amount);
            opposite.amount -= offset;
            remaining -= offset;
            let zeroed = opposite.amount <= Decimal::ZERO;
            drop(opposite);
            if zeroed {
                self.debts.remove(&opposite_key);
            }
        }

        if remaining > Decimal::ZERO {
            let key = (from.to_string(), to.to_string(), equivalent.to_string());
            self.debts
                .entry(key)
                .and_modify(|d| {
                    d.amount += remaining;
                    d.updated_at = Utc::now();
                })
                .or_insert(Debt {
                    debtor: from.to_string(),
                    creditor: to.to_string(),
                    equivalent: equivalent.to_string(),
                    amount: remaining,
                    updated_at: Utc::now(),
                });
        }
        Ok(())
    }

    pub async fn reserved_on_segment(
        &self,
        equivalent: &str,
        from: &str,
        to: &str,
        excluding_tx: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Decimal, HubError> {
        let sum = self
            .prepare_locks
            .iter()
            .filter(|e| {
                let (tx_id, eq, f, t) = e.key();
                eq == equivalent
                    && f == from
                    && t == to
                    && e.value().expires_at > now
                    && Some(*tx_id) != excluding_tx
            })
            .map(|e| e.value().delta)
            .sum();
        Ok(sum)
    }

    pub async fn insert_prepare_lock(&self, lock: PrepareLock) -> Result<(), HubError> {
        let key = (
            lock.tx_id,
            lock.equivalent.clone(),
            lock.from.clone(),
            lock.to.clone(),
        );
        self.prepare_locks.insert(key, lock);
        Ok(())
    }

    pub async fn delete_locks_for_tx(&self, tx_id: Uuid) -> Result<(), HubError> {
        self.prepare_locks.retain(|k, _| k.0 != tx_id);
        Ok(())
    }

    pub async fn delete_expired_locks(&self, now: DateTime<Utc>) -> Result<u64, HubError> {
        let before = self.prepare_locks.len();
        self.prepare_locks.retain(|_, v| v.expires_at > now);
        Ok((before - self.prepare_locks.len()) as u64)
    }

    pub async fn create_transaction(&self, tx: Transaction) -> Result<(), HubError> {
        self.transactions.insert(tx.tx_id, tx);
        Ok(())
    }

    pub async fn get_transaction(&self, tx_id: Uuid) -> Result<Option<Transaction>, HubError> {
        Ok(self.transactions.get(&tx_id).map(|t| t.clone()))
    }

    pub async fn set_transaction_state(
        &self,
        tx_id: Uuid,
        state: TransactionState,
        abort_reason: Option<String>,
    ) -> Result<(), HubError> {
        let mut tx = self
            .transactions
            .get_mut(&tx_id)
            .ok_or_else(|| HubError::NotFound(format!("transaction {tx_id}")))?;
        tx.state = state;
        if abort_reason.is_some() {
            tx.abort_reason = abort_reason;
        }
        tx.updated_at = Utc::now();
        Ok(())
    }

    pub async fn list_stuck_transactions(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, HubError> {
        Ok(self
            .transactions
            .iter()
            .filter(|t| {
                matches!(
                    t.state,
                    TransactionState::PrepareInProgress | TransactionState::Prepared
                ) && t.updated_at <= older_than
            })
            .map(|t| t.clone())
            .collect())
    }

    pub async fn insert_checkpoint(&self, checkpoint: IntegrityCheckpoint) -> Result<(), HubError> {
        self.checkpoints
            .entry(checkpoint.equivalent.clone())
            .or_default()
            .push(checkpoint);
        Ok(())
    }

    pub async fn latest_checkpoint(
        &self,
        equivalent: &str,
    ) -> Result<Option<IntegrityCheckpoint>, HubError> {
        Ok(self
            .checkpoints
            .get(equivalent)
            .and_then(|v| v.last().cloned()))
    }

    pub async fn append_audit_log(&self, entry: AuditLogEntry) -> Result<(), HubError> {
        self.audit_log.insert(entry.id, entry);
        Ok(())
    }

    pub async fn list_audit_log(&self, limit: usize) -> Result<Vec<AuditLogEntry>, HubError> {
        let mut entries: Vec<_> = self.audit_log.iter().map(|e| e.value().clone()).collect();
        entries.sort_by_key(|e| e.recorded_at);
        entries.reverse();
        entries.truncate(limit);
        Ok(entries)
    }

    pub async fn is_equivalent_halted(&self, equivalent: &str) -> Result<bool, HubError> {
        Ok(self.halted_equivalents.contains_key(equivalent))
    }

    pub async fn halt_equivalent(&self, equivalent: &str) -> Result<(), HubError> {
        self.halted_equivalents.insert(equivalent.to_string(), ());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn apply_flow_offsets_opposite_debt() {
        let store = MemoryStore::new();
        store.apply_flow("UAH", "a", "b", Decimal::new(100, 0)).await.unwrap();
        store.apply_flow("UAH", "b", "a", Decimal::new(30, 0)).await.unwrap();

        let ab = store.get_debt("a", "b", "UAH").await.unwrap().unwrap();
        assert_eq!(ab.amount, Decimal::new(70, 0));
        assert!(store.get_debt("b", "a", "UAH").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn apply_flow_deletes_zeroed_debt() {
        let store = MemoryStore::new();
        store.apply_flow("UAH", "a", "b", Decimal::new(50, 0)).await.unwrap();
        store.apply_flow("UAH", "b", "a", Decimal::new(50, 0)).await.unwrap();
        assert!(store.get_debt("a", "b", "UAH").await.unwrap().is_none());
        assert!(store.get_debt("b", "a", "UAH").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reserved_on_segment_excludes_expired_and_named_tx() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let tx_a = Uuid::new_v4();
        let tx_b = Uuid::new_v4();
        store
            .insert_prepare_lock(PrepareLock {
                tx_id: tx_a,
                equivalent: "UAH".into(),
                from: "a".into(),
                to: "b".into(),
                delta: Decimal::new(10, 0),
                expires_at: now + chrono::Duration::seconds(30),
            })
            .await
            .unwrap();
        store
            .insert_prepare_lock(PrepareLock {
                tx_id: tx_b,
                equivalent: "UAH".into(),
                from: "a".into(),
                to: "b".into(),
                delta: Decimal::new(5, 0),
                expires_at: now - chrono::Duration::seconds(5),
            })
            .await
            .unwrap();

        let reserved = store
            .reserved_on_segment("UAH", "a", "b", None, now)
            .await
            .unwrap();
        assert_eq!(reserved, Decimal::new(10, 0));

        let reserved_excluding = store
            .reserved_on_segment("UAH", "a", "b", Some(tx_a), now)
            .await
            .unwrap();
        assert_eq!(reserved_excluding, Decimal::ZERO);
    }
}
