//! Invariant checker: zero-sum, trust-limit, debt-symmetry, and
//! clearing-neutrality verification.

use crate::error::HubError;
use crate::ledger_store::LedgerStore;
use crate::types::Debt;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone)]
pub struct InvariantViolation {
    pub invariant: &'static str,
    pub detail: String,
}

#[derive(Debug, Clone, Default)]
pub struct InvariantReport {
    pub violations: Vec<InvariantViolation>,
}

impl InvariantReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    fn push(&mut self, invariant: &'static str, detail: impl Into<String>) {
        self.violations.push(InvariantViolation {
            invariant,
            detail: detail.into(),
        });
    }
}

/// Invariant 1: per equivalent, signed sum of net positions (credits minus
/// debts) over all participants is zero. Trivially true under the
/// debt-only model; retained as a smoke test against data corruption.
pub fn check_zero_sum(debts: &[Debt]) -> InvariantReport {
    let mut report = InvariantReport::default();
    let mut net: BTreeMap<&str, Decimal> = BTreeMap::new();
    for debt in debts {
        *net.entry(debt.creditor.as_str()).or_default() += debt.amount;
        *net.entry(debt.debtor.as_str()).or_default() -= debt.amount;
    }
    let sum: Decimal = net.values().sum();
    if sum != Decimal::ZERO {
        report.push("zero_sum", format!("net position sum is {sum}, expected 0"));
    }
    report
}

/// Invariant 2: every debt row's amount is covered by its creditor's trust
/// line limit.
pub async fn check_trust_limit(
    store: &LedgerStore,
    equivalent: &str,
) -> Result<InvariantReport, HubError> {
    let mut report = InvariantReport::default();
    let debts = store.list_debts(equivalent).await?;
    for debt in &debts {
        if debt.amount <= Decimal::ZERO {
            continue;
        }
        match store
            .find_trust_line(&debt.creditor, &debt.debtor, equivalent)
            .await?
        {
            Some(line) if line.is_active() && line.limit >= debt.amount => {}
            Some(line) => report.push(
                "trust_limit",
                format!(
                    "debt {}->{} = {} exceeds limit {} on {}->{}",
                    debt.debtor, debt.creditor, debt.amount, line.limit, debt.creditor, debt.debtor
                ),
            ),
            None => report.push(
                "trust_limit",
                format!(
                    "debt {}->{} = {} has no active trust line {}->{}",
                    debt.debtor, debt.creditor, debt.amount, debt.creditor, debt.debtor
                ),
            ),
        }
    }
    Ok(report)
}

/// Invariant 3: no pair `(A, B, E)` has debt in both directions simultaneously.
pub fn check_debt_symmetry(debts: &[Debt]) -> InvariantReport {
    let mut report = InvariantReport::default();
    let pairs: BTreeSet<(&str, &str)> = debts
        .iter()
        .map(|d| (d.debtor.as_str(), d.creditor.as_str()))
        .collect();
    for (debtor, creditor) in &pairs {
        if pairs.contains(&(*creditor, *debtor)) {
            report.push(
                "debt_symmetry",
                format!("mutual debt between {debtor} and {creditor}"),
            );
        }
    }
    report
}

/// Invariant 4: after applying a clearing, every participant's net position
/// in the affected cycle equals its recorded pre-clearing value.
pub fn check_clearing_neutrality(
    positions_before: &BTreeMap<String, Decimal>,
    positions_after: &BTreeMap<String, Decimal>,
) -> InvariantReport {
    let mut report = InvariantReport::default();
    for (pid, before) in positions_before {
        let after = positions_after.get(pid).copied().unwrap_or(Decimal::ZERO);
        if after != *before {
            report.push(
                "clearing_neutrality",
                format!("participant {pid} net position moved from {before} to {after}"),
            );
        }
    }
    report
}

/// SHA-256 over the canonical serialization of all debts for an equivalent,
/// sorted by `(debtor, creditor)`.
pub fn checksum(debts: &[Debt]) -> String {
    let mut sorted: Vec<&Debt> = debts.iter().collect();
    sorted.sort_by(|a, b| (a.debtor.as_str(), a.creditor.as_str()).cmp(&(b.debtor.as_str(), b.creditor.as_str())));
    let mut hasher = Sha256::new();
    for debt in sorted {
        hasher.update(debt.debtor.as_bytes());
        hasher.update(b"|");
        hasher.update(debt.creditor.as_bytes());
        hasher.update(b"|");
        hasher.update(debt.amount.to_string().as_bytes());
        hasher.update(b";");
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn debt(debtor: &str, creditor: &str, amount: i64) -> Debt {
        Debt {
            debtor: debtor.into(),
            creditor: creditor.into(),
            equivalent: "UAH".into(),
            amount: Decimal::new(amount, 0),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn zero_sum_holds_for_balanced_debts() {
        let debts = vec![debt("b", "a", 100), debt("c", "b", 50)];
        assert!(check_zero_sum(&debts).is_clean());
    }

    #[test]
    fn debt_symmetry_detects_mutual_debt() {
        let debts = vec![debt("a", "b", 10), debt("b", "a", 5)];
        let report = check_debt_symmetry(&debts);
        assert!(!report.is_clean());
    }

    #[test]
    fn checksum_is_order_independent() {
        let a = vec![debt("a", "b", 10), debt("c", "d", 5)];
        let b = vec![debt("c", "d", 5), debt("a", "b", 10)];
        assert_eq!(checksum(&a), checksum(&b));
    }

    #[test]
    fn checksum_changes_with_amount() {
        let a = vec![debt("a", "b", 10)];
        let b = vec![debt("a", "b", 11)];
        assert_ne!(checksum(&a), checksum(&b));
    }

    #[test]
    fn clearing_neutrality_detects_drift() {
        let mut before = BTreeMap::new();
        before.insert("a".to_string(), Decimal::ZERO);
        let mut after = BTreeMap::new();
        after.insert("a".to_string(), Decimal::new(1, 0));
        assert!(!check_clearing_neutrality(&before, &after).is_clean());
    }
}
