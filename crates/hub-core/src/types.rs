use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Participant identifier: `base58(sha256(public_key))`.
pub type Pid = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantType {
    Person,
    Business,
    Hub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Active,
    Suspended,
    Left,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub pid: Pid,
    pub public_key: [u8; 32],
    pub display_name: String,
    pub profile: serde_json::Value,
    pub participant_type: ParticipantType,
    pub status: ParticipantStatus,
    pub verification_level: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Participant {
    pub fn is_active(&self) -> bool {
        matches!(self.status, ParticipantStatus::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquivalentKind {
    Fiat,
    Time,
    Commodity,
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Equivalent {
    pub code: String,
    pub precision: u8,
    pub kind: EquivalentKind,
    pub iso_code: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLineStatus {
    Active,
    Frozen,
    Closed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrustLinePolicy {
    pub auto_clearing: bool,
    pub can_be_intermediate: bool,
    pub blocked_participants: BTreeSet<Pid>,
    pub daily_limit: Option<Decimal>,
}

/// Directed edge `from -> to` in equivalent `E`: `from` (creditor) permits
/// `to` (debtor) to owe up to `limit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustLine {
    pub id: Uuid,
    pub from: Pid,
    pub to: Pid,
    pub equivalent: String,
    pub limit: Decimal,
    pub policy: TrustLinePolicy,
    pub status: TrustLineStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TrustLine {
    pub fn is_active(&self) -> bool {
        matches!(self.status, TrustLineStatus::Active)
    }
}

/// Outstanding obligation: `debtor` owes `creditor` `amount` in `equivalent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Debt {
    pub debtor: Pid,
    pub creditor: Pid,
    pub equivalent: String,
    pub amount: Decimal,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    TrustLineCreate,
    TrustLineUpdate,
    TrustLineClose,
    Payment,
    Clearing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionState {
    New,
    Routed,
    PrepareInProgress,
    Prepared,
    Committed,
    Aborted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub tx_id: Uuid,
    pub tx_type: TransactionType,
    pub initiator: Pid,
    pub signed_payload: serde_json::Value,
    pub signatures: Vec<String>,
    pub state: TransactionState,
    pub abort_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Short-lived reservation on one `(from->to, equivalent)` segment under a
/// specific `tx_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareLock {
    pub tx_id: Uuid,
    pub equivalent: String,
    pub from: Pid,
    pub to: Pid,
    pub delta: Decimal,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvariantStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityCheckpoint {
    pub equivalent: String,
    pub checksum: String,
    pub invariants_status: InvariantStatus,
    pub created_at: DateTime<Utc>,
}

/// One routed flow on a single payment or clearing leg.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub from: Pid,
    pub to: Pid,
    pub delta: Decimal,
}

/// A candidate path with the amount assigned to it by the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutedPath {
    pub nodes: Vec<Pid>,
    pub amount: Decimal,
}

impl RoutedPath {
    /// Expand a routed path into its constituent segment flows.
    pub fn flows(&self) -> Vec<Flow> {
        self.nodes
            .windows(2)
            .map(|pair| Flow {
                from: pair[0].clone(),
                to: pair[1].clone(),
                delta: self.amount,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConstraints {
    pub max_hops: usize,
    pub max_paths: usize,
    pub path_finding_timeout_ms: u64,
    pub avoid: BTreeSet<Pid>,
}

impl Default for RouteConstraints {
    fn default() -> Self {
        Self {
            max_hops: 6,
            max_paths: 3,
            path_finding_timeout_ms: 500,
            avoid: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub operation_type: String,
    pub tx_id: Option<Uuid>,
    pub checksum_before: Option<String>,
    pub checksum_after: Option<String>,
    pub affected_participants: Vec<Pid>,
    pub invariant_results: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}
