//! `HubEngine`: assembles the ledger store, router, payment/clearing
//! engines, background loops, and capability traits into the operation
//! surface the service boundary drives.

use crate::auth::{AuthEngine, AuthenticatedSession, Challenge};
use crate::capability::{Clock, EventSink, TokenRevocationStore};
use crate::clearing::{ClearedCycle, ClearingEngine};
use crate::config::HubConfig;
use crate::error::HubError;
use crate::identity::{
    self, OP_PARTICIPANT_CREATE, OP_TRUSTLINE_CLOSE, OP_TRUSTLINE_CREATE, OP_TRUSTLINE_UPDATE,
};
use crate::integrity::IntegritySweeper;
use crate::invariants::{self, InvariantReport};
use crate::ledger_store::{LedgerStorageConfig, LedgerStore};
use crate::payment::{PaymentEngine, PaymentOutcome, PaymentRequest};
use crate::recovery::{RecoveryLoop, RecoveryOutcome};
use crate::types::{
    AuditLogEntry, IntegrityCheckpoint, Participant, ParticipantStatus, ParticipantType,
    Transaction, TrustLine, TrustLinePolicy, TrustLineStatus,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

pub struct HubEngine {
    store: Arc<LedgerStore>,
    payments: PaymentEngine,
    clearing: ClearingEngine,
    recovery: RecoveryLoop,
    integrity: IntegritySweeper,
    auth: AuthEngine,
    config: HubConfig,
}

impl HubEngine {
    pub async fn bootstrap(
        config: HubConfig,
        storage: LedgerStorageConfig,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        revocations: Arc<dyn TokenRevocationStore>,
    ) -> Result<Self, HubError> {
        let store = Arc::new(LedgerStore::bootstrap(storage).await?);

        let payments = PaymentEngine::new(store.clone(), events.clone(), config.clone());
        let clearing = ClearingEngine::new(
            store.clone(),
            events.clone(),
            clock.clone(),
            config.clearing.clone(),
        );
        let recovery = RecoveryLoop::new(
            store.clone(),
            events.clone(),
            clock.clone(),
            config.protocol.clone(),
        );
        let integrity = IntegritySweeper::new(
            store.clone(),
            events.clone(),
            clock.clone(),
            config.integrity.clone(),
        );
        let auth = AuthEngine::new(store.clone(), revocations, clock.clone());

        tracing::info!(backend = store.backend_label(), "hub engine bootstrapped");

        Ok(Self {
            store,
            payments,
            clearing,
            recovery,
            integrity,
            auth,
            config,
        })
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    // -- participants ----------------------------------------------------

    pub async fn register_participant(
        &self,
        public_key: [u8; 32],
        display_name: String,
        participant_type: ParticipantType,
        profile: serde_json::Value,
        signature: &[u8; 64],
    ) -> Result<Participant, HubError> {
        // Proof-of-possession: the caller must sign with the private key
        // matching `public_key`, binding the declared identity to it.
        let payload = serde_json::json!({
            "public_key": identity::hex_encode(&public_key),
            "display_name": display_name,
            "participant_type": participant_type,
        });
        let signable = identity::make_signable(&payload, OP_PARTICIPANT_CREATE)?;
        identity::verify_signature(&public_key, &signable, signature)?;

        let pid = identity::derive_pid(&public_key);
        let now = Utc::now();
        let participant = Participant {
            pid,
            public_key,
            display_name,
            profile,
            participant_type,
            status: ParticipantStatus::Active,
            verification_level: 0,
            created_at: now,
            updated_at: now,
        };
        self.store.create_participant(participant.clone()).await?;
        Ok(participant)
    }

    // -- auth --------------------------------------------------------------

    pub async fn issue_challenge(&self, pid: &str) -> Result<Challenge, HubError> {
        self.auth.issue_challenge(pid).await
    }

    pub async fn authenticate(
        &self,
        nonce: &str,
        signature: &[u8; 64],
    ) -> Result<AuthenticatedSession, HubError> {
        self.auth.authenticate(nonce, signature).await
    }

    pub async fn refresh_tokens(
        &self,
        pid: &str,
        token_id: &str,
    ) -> Result<AuthenticatedSession, HubError> {
        self.auth.refresh(pid, token_id).await
    }

    // -- trust lines -------------------------------------------------------

    pub async fn create_trustline(
        &self,
        from: String,
        to: String,
        equivalent: String,
        limit: Decimal,
        policy: TrustLinePolicy,
        signature: &[u8; 64],
        from_public_key: &[u8; 32],
    ) -> Result<TrustLine, HubError> {
        if limit < Decimal::ZERO {
            return Err(HubError::Validation("trust line limit must be non-negative".into()));
        }
        let payload = serde_json::json!({
            "from": from, "to": to, "equivalent": equivalent, "limit": limit,
        });
        let signable = identity::make_signable(&payload, OP_TRUSTLINE_CREATE)?;
        identity::verify_signature(from_public_key, &signable, signature)?;

        let now = Utc::now();
        let line = TrustLine {
            id: Uuid::new_v4(),
            from,
            to,
            equivalent,
            limit,
            policy,
            status: TrustLineStatus::Active,
            created_at: now,
            updated_at: now,
        };
        self.store.create_trust_line(line.clone()).await?;
        Ok(line)
    }

    pub async fn update_trustline(
        &self,
        id: Uuid,
        new_limit: Option<Decimal>,
        new_policy: Option<TrustLinePolicy>,
        signature: &[u8; 64],
        from_public_key: &[u8; 32],
    ) -> Result<TrustLine, HubError> {
        let current = self
            .store
            .get_trust_line(id)
            .await?
            .ok_or_else(|| HubError::NotFound(format!("trust line {id}")))?;
        if let Some(limit) = new_limit {
            let debt = self
                .store
                .get_debt(&current.to, &current.from, &current.equivalent)
                .await?
                .map(|d| d.amount)
                .unwrap_or(Decimal::ZERO);
            if limit < debt {
                return Err(HubError::LimitBelowDebt {
                    new_limit: limit,
                    debt,
                });
            }
        }

        let payload = serde_json::json!({ "id": id, "new_limit": new_limit });
        let signable = identity::make_signable(&payload, OP_TRUSTLINE_UPDATE)?;
        identity::verify_signature(from_public_key, &signable, signature)?;

        self.store.update_trust_line(id, new_limit, new_policy).await
    }

    pub async fn close_trustline(
        &self,
        id: Uuid,
        signature: &[u8; 64],
        from_public_key: &[u8; 32],
    ) -> Result<(), HubError> {
        let current = self
            .store
            .get_trust_line(id)
            .await?
            .ok_or_else(|| HubError::NotFound(format!("trust line {id}")))?;
        let debt = self
            .store
            .get_debt(&current.to, &current.from, &current.equivalent)
            .await?
            .map(|d| d.amount)
            .unwrap_or(Decimal::ZERO);
        if debt > Decimal::ZERO {
            return Err(HubError::DebtOutstanding(debt));
        }

        let payload = serde_json::json!({ "id": id });
        let signable = identity::make_signable(&payload, OP_TRUSTLINE_CLOSE)?;
        identity::verify_signature(from_public_key, &signable, signature)?;

        self.store.close_trust_line(id).await
    }

    // -- payments ------------------------------------------------------------

    pub async fn create_payment(&self, request: PaymentRequest) -> Result<PaymentOutcome, HubError> {
        let equivalent = request.equivalent.clone();
        let outcome = self.payments.execute(request).await?;
        if self.config.clearing.enabled {
            if let Err(e) = self.clearing.run_triggered(&equivalent).await {
                tracing::warn!(equivalent, error = %e, "post-payment clearing sweep failed");
            }
        }
        Ok(outcome)
    }

    /// Trigger a short-cycle clearing sweep for `equivalent`, normally called
    /// right after a payment commits.
    pub async fn trigger_clearing(&self, equivalent: &str) -> Result<Vec<ClearedCycle>, HubError> {
        if !self.config.clearing.enabled {
            return Ok(Vec::new());
        }
        self.clearing.run_triggered(equivalent).await
    }

    pub async fn get_transaction(&self, tx_id: Uuid) -> Result<Option<Transaction>, HubError> {
        self.store.get_transaction(tx_id).await
    }

    // -- integrity -----------------------------------------------------------

    pub async fn get_integrity_status(
        &self,
        equivalent: &str,
    ) -> Result<Option<IntegrityCheckpoint>, HubError> {
        self.store.latest_checkpoint(equivalent).await
    }

    pub async fn verify(&self, equivalent: &str) -> Result<InvariantReport, HubError> {
        let debts = self.store.list_debts(equivalent).await?;
        let mut report = invariants::check_zero_sum(&debts);
        report
            .violations
            .extend(invariants::check_debt_symmetry(&debts).violations);
        report
            .violations
            .extend(invariants::check_trust_limit(&self.store, equivalent).await?.violations);
        Ok(report)
    }

    pub async fn checksum(&self, equivalent: &str) -> Result<String, HubError> {
        let debts = self.store.list_debts(equivalent).await?;
        Ok(invariants::checksum(&debts))
    }

    pub async fn audit_log(&self, limit: usize) -> Result<Vec<AuditLogEntry>, HubError> {
        self.store.list_audit_log(limit).await
    }

    // -- background loops ------------------------------------------------

    pub async fn run_recovery_once(&self) -> Result<RecoveryOutcome, HubError> {
        self.recovery.run_once().await
    }

    pub async fn run_integrity_sweep_once(&self) -> Result<Vec<IntegrityCheckpoint>, HubError> {
        self.integrity.run_once().await
    }

    /// Spawn the recovery loop and integrity sweeper as independent Tokio
    /// tasks, each holding its own cloned `Arc` handle into the engine's
    /// state. Mirrors the reference hub spawning its listeners this way.
    pub fn spawn_background_loops(self: &Arc<Self>) {
        let engine = self.clone();
        let interval = engine.config.recovery_interval_seconds;
        tokio::spawn(async move {
            engine.recovery.run_forever(interval).await;
        });

        let engine = self.clone();
        tokio::spawn(async move {
            engine.integrity.run_forever().await;
        });
    }
}
