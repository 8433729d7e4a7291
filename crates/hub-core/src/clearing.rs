//! Cycle-clearing engine: finds closed debt cycles and nets them out without
//! moving money through the hub.

use crate::capability::{Clock, DomainEvent, EventSeverity, EventSink};
use crate::config::ClearingConfig;
use crate::error::HubError;
use crate::invariants::{self, InvariantReport};
use crate::ledger_store::LedgerStore;
use crate::types::{Transaction, TransactionState, TransactionType};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ClearedCycle {
    pub equivalent: String,
    pub cycle: Vec<String>,
    pub amount: Decimal,
}

pub struct ClearingEngine {
    store: Arc<LedgerStore>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    config: ClearingConfig,
}

impl ClearingEngine {
    pub fn new(
        store: Arc<LedgerStore>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        config: ClearingConfig,
    ) -> Self {
        Self {
            store,
            events,
            clock,
            config,
        }
    }

    /// Trigger-mode sweep run right after a payment commits: looks only for
    /// short cycles (length 3-4) touching the just-updated equivalent.
    pub async fn run_triggered(&self, equivalent: &str) -> Result<Vec<ClearedCycle>, HubError> {
        self.run(equivalent, &[3, 4], self.config.max_cycles_per_run)
            .await
    }

    /// Periodic sweep: length-5 cycles hourly, length-6 cycles daily, driven
    /// by the caller's scheduling.
    pub async fn run_periodic(
        &self,
        equivalent: &str,
        lengths: &[usize],
    ) -> Result<Vec<ClearedCycle>, HubError> {
        self.run(equivalent, lengths, self.config.max_cycles_per_run)
            .await
    }

    async fn run(
        &self,
        equivalent: &str,
        lengths: &[usize],
        max_cycles: usize,
    ) -> Result<Vec<ClearedCycle>, HubError> {
        let mut cleared = Vec::new();
        let mut dropped = 0usize;

        for &len in lengths {
            if cleared.len() >= max_cycles {
                break;
            }
            let debts = self.store.list_debts(equivalent).await?;
            let adjacency = build_debt_graph(&debts);
            let cycles = find_cycles(&adjacency, len);

            for cycle in cycles {
                if cleared.len() >= max_cycles {
                    dropped += 1;
                    continue;
                }
                let canonical = canonicalize_cycle(&cycle);
                if !self.all_edges_consent(equivalent, &canonical).await? {
                    continue;
                }
                match self.clear_cycle(equivalent, &canonical).await {
                    Ok(Some(result)) => cleared.push(result),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(equivalent, cycle = ?canonical, error = %e, "cycle clearing failed");
                    }
                }
            }
        }

        if dropped > 0 {
            tracing::info!(equivalent, dropped, "clearing run hit max_cycles_per_run cap");
        }

        Ok(cleared)
    }

    async fn all_edges_consent(&self, equivalent: &str, cycle: &[String]) -> Result<bool, HubError> {
        for pair in edge_pairs(cycle) {
            let (debtor, creditor) = pair;
            match self.store.find_trust_line(creditor, debtor, equivalent).await? {
                Some(line) if line.is_active() && line.policy.auto_clearing => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Clear one canonicalized cycle: capture pre-positions, lock every edge
    /// in canonical order, subtract the cycle's bottleneck amount from each
    /// debt, verify clearing-neutrality, and record the transaction.
    async fn clear_cycle(
        &self,
        equivalent: &str,
        cycle: &[String],
    ) -> Result<Option<ClearedCycle>, HubError> {
        let pairs = edge_pairs(cycle);
        let mut amount = Decimal::MAX;
        for (debtor, creditor) in &pairs {
            let debt = self
                .store
                .get_debt(debtor, creditor, equivalent)
                .await?
                .map(|d| d.amount)
                .unwrap_or(Decimal::ZERO);
            amount = amount.min(debt);
        }
        if amount < self.config.min_clearing_amount {
            return Ok(None);
        }

        let mut keyed: Vec<(String, String, String)> = pairs
            .iter()
            .map(|(d, c)| (equivalent.to_string(), d.clone(), c.clone()))
            .collect();
        crate::ledger_store::canonical_order(&mut keyed);

        let positions_before = self.net_positions(equivalent, cycle).await?;

        for (eq, debtor, creditor) in &keyed {
            self.store.apply_flow(eq, creditor, debtor, amount).await?;
        }

        let positions_after = self.net_positions(equivalent, cycle).await?;
        let neutrality = invariants::check_clearing_neutrality(&positions_before, &positions_after);
        if !neutrality.is_clean() {
            return Err(HubError::IntegrityViolation {
                equivalent: equivalent.to_string(),
                detail: format!("{:?}", neutrality.violations),
            });
        }

        let tx_id = Uuid::new_v4();
        self.store
            .create_transaction(Transaction {
                tx_id,
                tx_type: TransactionType::Clearing,
                initiator: "hub".to_string(),
                signed_payload: serde_json::json!({"cycle": cycle, "amount": amount}),
                signatures: Vec::new(),
                state: TransactionState::Committed,
                abort_reason: None,
                created_at: self.clock.now(),
                updated_at: self.clock.now(),
            })
            .await?;

        self.events.emit(DomainEvent {
            kind: "clearing.committed".to_string(),
            payload: serde_json::json!({"tx_id": tx_id, "cycle": cycle, "amount": amount}),
            severity: EventSeverity::Info,
            emitted_at: self.clock.now(),
        });
        tracing::info!(equivalent, ?cycle, %amount, "cycle cleared");

        Ok(Some(ClearedCycle {
            equivalent: equivalent.to_string(),
            cycle: cycle.to_vec(),
            amount,
        }))
    }

    async fn net_positions(
        &self,
        equivalent: &str,
        cycle: &[String],
    ) -> Result<BTreeMap<String, Decimal>, HubError> {
        let debts = self.store.list_debts(equivalent).await?;
        let members: HashSet<&String> = cycle.iter().collect();
        let mut net = BTreeMap::new();
        for pid in cycle {
            net.insert(pid.clone(), Decimal::ZERO);
        }
        for debt in &debts {
            if members.contains(&debt.debtor) {
                *net.entry(debt.debtor.clone()).or_insert(Decimal::ZERO) -= debt.amount;
            }
            if members.contains(&debt.creditor) {
                *net.entry(debt.creditor.clone()).or_insert(Decimal::ZERO) += debt.amount;
            }
        }
        Ok(net)
    }
}

fn edge_pairs(cycle: &[String]) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for i in 0..cycle.len() {
        let debtor = cycle[i].clone();
        let creditor = cycle[(i + 1) % cycle.len()].clone();
        pairs.push((debtor, creditor));
    }
    pairs
}

/// Canonicalize a cycle to start at its lexicographically smallest node,
/// traversed in the direction that keeps the remaining nodes sorted-first.
fn canonicalize_cycle(cycle: &[String]) -> Vec<String> {
    let min_idx = cycle
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.cmp(b))
        .map(|(i, _)| i)
        .unwrap_or(0);

    let forward: Vec<String> = (0..cycle.len())
        .map(|i| cycle[(min_idx + i) % cycle.len()].clone())
        .collect();
    let backward: Vec<String> = (0..cycle.len())
        .map(|i| cycle[(min_idx + cycle.len() - i) % cycle.len()].clone())
        .collect();

    if forward <= backward {
        forward
    } else {
        backward
    }
}

/// Directed debt graph: edge `debtor -> creditor` per outstanding debt row.
fn build_debt_graph(debts: &[crate::types::Debt]) -> HashMap<String, Vec<String>> {
    let mut graph: HashMap<String, Vec<String>> = HashMap::new();
    for debt in debts {
        if debt.amount > Decimal::ZERO {
            graph.entry(debt.debtor.clone()).or_default().push(debt.creditor.clone());
        }
    }
    graph
}

/// Find simple directed cycles of exactly `length` via bounded DFS from
/// every node, deduplicated by canonical rotation.
fn find_cycles(graph: &HashMap<String, Vec<String>>, length: usize) -> Vec<Vec<String>> {
    let mut found = Vec::new();
    let mut seen_canonical: HashSet<Vec<String>> = HashSet::new();

    let mut nodes: Vec<&String> = graph.keys().collect();
    nodes.sort();

    for start in nodes {
        let mut path = vec![start.clone()];
        dfs_cycles(graph, start, start, &mut path, length, &mut found, &mut seen_canonical);
    }

    found
}

fn dfs_cycles(
    graph: &HashMap<String, Vec<String>>,
    start: &str,
    current: &str,
    path: &mut Vec<String>,
    target_len: usize,
    found: &mut Vec<Vec<String>>,
    seen: &mut HashSet<Vec<String>>,
) {
    if path.len() == target_len {
        if let Some(neighbors) = graph.get(current) {
            if neighbors.iter().any(|n| n == start) {
                let canonical = canonicalize_cycle(path);
                if seen.insert(canonical.clone()) {
                    found.push(canonical);
                }
            }
        }
        return;
    }

    let Some(neighbors) = graph.get(current) else { return };
    for next in neighbors {
        if next == start || path.contains(next) {
            continue;
        }
        path.push(next.clone());
        dfs_cycles(graph, start, next, path, target_len, found, seen);
        path.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_picks_smallest_start_and_direction() {
        let cycle = vec!["c".to_string(), "a".to_string(), "b".to_string()];
        let canon = canonicalize_cycle(&cycle);
        assert_eq!(canon[0], "a");
    }

    #[test]
    fn find_cycles_detects_triangle() {
        let mut graph = HashMap::new();
        graph.insert("a".to_string(), vec!["b".to_string()]);
        graph.insert("b".to_string(), vec!["c".to_string()]);
        graph.insert("c".to_string(), vec!["a".to_string()]);
        let cycles = find_cycles(&graph, 3);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].len(), 3);
    }

    #[test]
    fn find_cycles_ignores_wrong_length() {
        let mut graph = HashMap::new();
        graph.insert("a".to_string(), vec!["b".to_string()]);
        graph.insert("b".to_string(), vec!["a".to_string()]);
        assert!(find_cycles(&graph, 3).is_empty());
    }
}
