//! Two-phase payment engine: route -> prepare (reserve) -> commit/abort.

use crate::capability::{DomainEvent, EventSeverity, EventSink};
use crate::config::HubConfig;
use crate::error::HubError;
use crate::flow::PaymentStageMachine;
use crate::identity::{self, OP_PAYMENT_CREATE};
use crate::invariants;
use crate::ledger_store::LedgerStore;
use crate::router::{build_capacity_snapshot, k_shortest_paths, split_amount};
use crate::types::{
    PrepareLock, RouteConstraints, RoutedPath, Transaction, TransactionState, TransactionType,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

pub struct PaymentRequest {
    pub from: String,
    pub to: String,
    pub equivalent: String,
    pub amount: Decimal,
    pub description: String,
    pub constraints: RouteConstraints,
    pub signature: [u8; 64],
}

#[derive(serde::Serialize)]
pub struct PaymentOutcome {
    pub tx_id: Uuid,
    pub routes: Vec<RoutedPath>,
}

pub struct PaymentEngine {
    store: Arc<LedgerStore>,
    events: Arc<dyn EventSink>,
    config: HubConfig,
}

impl PaymentEngine {
    pub fn new(store: Arc<LedgerStore>, events: Arc<dyn EventSink>, config: HubConfig) -> Self {
        Self {
            store,
            events,
            config,
        }
    }

    pub async fn execute(&self, request: PaymentRequest) -> Result<PaymentOutcome, HubError> {
        if self.store.is_equivalent_halted(&request.equivalent).await? {
            return Err(HubError::PolicyDenied(format!(
                "equivalent {} is halted pending integrity review",
                request.equivalent
            )));
        }
        if request.amount <= Decimal::ZERO {
            return Err(HubError::Validation("amount must be positive".into()));
        }

        let signed_payload = serde_json::json!({
            "from": request.from,
            "to": request.to,
            "equivalent": request.equivalent,
            "amount": request.amount,
            "description": request.description,
        });
        let initiator = self
            .store
            .get_participant(&request.from)
            .await?
            .ok_or_else(|| HubError::NotFound(format!("participant {}", request.from)))?;
        let signable = identity::make_signable(&signed_payload, OP_PAYMENT_CREATE)?;
        identity::verify_signature(&initiator.public_key, &signable, &request.signature)?;

        let tx_id = Uuid::new_v4();
        let mut stage = PaymentStageMachine::new(tx_id);

        self.store
            .create_transaction(Transaction {
                tx_id,
                tx_type: TransactionType::Payment,
                initiator: request.from.clone(),
                signed_payload,
                signatures: vec![identity::hex_encode(&request.signature)],
                state: TransactionState::New,
                abort_reason: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await?;

        let routes = match self.route(&request).await {
            Ok(routes) => routes,
            Err(e) => {
                self.store
                    .set_transaction_state(
                        tx_id,
                        TransactionState::Aborted,
                        Some(e.to_string()),
                    )
                    .await?;
                return Err(e);
            }
        };
        stage.mark_routed()?;
        self.store
            .set_transaction_state(tx_id, TransactionState::Routed, None)
            .await?;

        stage.mark_prepare_in_progress()?;
        self.store
            .set_transaction_state(tx_id, TransactionState::PrepareInProgress, None)
            .await?;

        if let Err(e) = self
            .prepare(tx_id, &request.equivalent, &request.from, &request.to, &routes)
            .await
        {
            self.abort(tx_id, &e.to_string()).await?;
            return Err(e);
        }
        stage.mark_prepared()?;
        self.store
            .set_transaction_state(tx_id, TransactionState::Prepared, None)
            .await?;

        if let Err(e) = self.commit(tx_id, &request.equivalent, &routes).await {
            self.abort(tx_id, &e.to_string()).await?;
            return Err(e);
        }
        stage.mark_committed()?;
        self.store
            .set_transaction_state(tx_id, TransactionState::Committed, None)
            .await?;

        self.events.emit(DomainEvent {
            kind: "payment.committed".to_string(),
            payload: serde_json::json!({"tx_id": tx_id, "from": request.from, "to": request.to}),
            severity: EventSeverity::Info,
            emitted_at: Utc::now(),
        });

        tracing::info!(tx_id = %tx_id, "payment committed");
        Ok(PaymentOutcome { tx_id, routes })
    }

    async fn route(&self, request: &PaymentRequest) -> Result<Vec<RoutedPath>, HubError> {
        let avoid: HashSet<String> = request.constraints.avoid.iter().cloned().collect();
        let snapshot = build_capacity_snapshot(
            &self.store,
            &request.equivalent,
            &request.from,
            &request.to,
            &avoid,
        )
        .await?;
        let candidates = k_shortest_paths(&snapshot, &request.from, &request.to, &request.constraints);
        if candidates.is_empty() {
            return Err(HubError::NoRoute {
                source: request.from.clone(),
                target: request.to.clone(),
                equivalent: request.equivalent.clone(),
            });
        }
        split_amount(candidates, request.amount)
    }

    /// Prepare phase: acquire segment locks in canonical order, recompute
    /// availability, insert reservations, and enforce per-segment policy.
    async fn prepare(
        &self,
        tx_id: Uuid,
        equivalent: &str,
        payment_source: &str,
        payment_target: &str,
        routes: &[RoutedPath],
    ) -> Result<(), HubError> {
        let mut flows: Vec<(String, String, Decimal)> = Vec::new();
        for route in routes {
            for flow in route.flows() {
                flows.push((flow.from, flow.to, flow.delta));
            }
        }

        let mut keyed: Vec<(String, String, String)> = flows
            .iter()
            .map(|(from, to, _)| (equivalent.to_string(), from.clone(), to.clone()))
            .collect();
        crate::ledger_store::canonical_order(&mut keyed);

        let ttl = chrono::Duration::seconds(self.config.protocol.prepare_ttl_seconds);
        let now = Utc::now();

        for (eq, from, to) in &keyed {
            let delta = flows
                .iter()
                .filter(|(f, t, _)| f == from && t == to)
                .map(|(_, _, d)| *d)
                .sum::<Decimal>();

            let line = self
                .store
                .find_trust_line(to, from, eq)
                .await?
                .ok_or_else(|| HubError::TrustLineNotActive(format!("{from}->{to}")))?;
            if !line.is_active() {
                return Err(HubError::TrustLineNotActive(line.id.to_string()));
            }
            if line.policy.blocked_participants.contains(from)
                || line.policy.blocked_participants.contains(to)
            {
                return Err(HubError::PolicyDenied(format!(
                    "{from} or {to} is blocked on this segment"
                )));
            }
            let is_endpoint_segment = (from == payment_source && to == payment_target)
                || (from == payment_target && to == payment_source);
            if !is_endpoint_segment && !line.policy.can_be_intermediate {
                return Err(HubError::PolicyDenied(format!(
                    "segment {from}->{to} cannot be used as an intermediate hop"
                )));
            }

            let debt = self
                .store
                .get_debt(from, to, eq)
                .await?
                .map(|d| d.amount)
                .unwrap_or(Decimal::ZERO);
            let reserved = self
                .store
                .reserved_on_segment(eq, from, to, Some(tx_id), now)
                .await?;
            let available = line.limit - debt - reserved;
            if delta > available {
                return Err(HubError::TrustLimitExceeded {
                    equivalent: eq.clone(),
                    from: from.clone(),
                    to: to.clone(),
                });
            }

            self.store
                .insert_prepare_lock(PrepareLock {
                    tx_id,
                    equivalent: eq.clone(),
                    from: from.clone(),
                    to: to.clone(),
                    delta,
                    expires_at: now + ttl,
                })
                .await?;
        }

        Ok(())
    }

    /// Commit phase: apply every flow, verify invariants 2 and 3, then
    /// release locks.
    async fn commit(
        &self,
        tx_id: Uuid,
        equivalent: &str,
        routes: &[RoutedPath],
    ) -> Result<(), HubError> {
        for route in routes {
            for flow in route.flows() {
                self.store
                    .apply_flow(equivalent, &flow.from, &flow.to, flow.delta)
                    .await?;
            }
        }

        let debts = self.store.list_debts(equivalent).await?;
        let symmetry = invariants::check_debt_symmetry(&debts);
        let trust_limit = invariants::check_trust_limit(&self.store, equivalent).await?;
        if !symmetry.is_clean() || !trust_limit.is_clean() {
            return Err(HubError::IntegrityViolation {
                equivalent: equivalent.to_string(),
                detail: format!("{:?} {:?}", symmetry.violations, trust_limit.violations),
            });
        }

        self.store.delete_locks_for_tx(tx_id).await?;
        Ok(())
    }

    /// Idempotent abort: safe to call repeatedly.
    pub async fn abort(&self, tx_id: Uuid, reason: &str) -> Result<(), HubError> {
        self.store.delete_locks_for_tx(tx_id).await?;
        self.store
            .set_transaction_state(tx_id, TransactionState::Aborted, Some(reason.to_string()))
            .await?;
        self.events.emit(DomainEvent {
            kind: "payment.aborted".to_string(),
            payload: serde_json::json!({"tx_id": tx_id, "reason": reason}),
            severity: EventSeverity::Warning,
            emitted_at: Utc::now(),
        });
        tracing::warn!(tx_id = %tx_id, reason, "payment aborted");
        Ok(())
    }
}
