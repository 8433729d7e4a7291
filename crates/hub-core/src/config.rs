use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub max_path_length: usize,
    pub max_paths_per_payment: usize,
    pub path_finding_timeout_ms: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            max_path_length: 6,
            max_paths_per_payment: 3,
            path_finding_timeout_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClearingConfig {
    pub enabled: bool,
    pub trigger_cycles_max_length: usize,
    pub min_clearing_amount: Decimal,
    pub max_cycles_per_run: usize,
}

impl Default for ClearingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trigger_cycles_max_length: 4,
            min_clearing_amount: Decimal::new(1, 2), // 0.01
            max_cycles_per_run: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub prepare_timeout_ms: u64,
    pub commit_timeout_ms: u64,
    pub max_clock_skew_seconds: i64,
    pub payment_total_timeout_ms: u64,
    pub prepare_ttl_seconds: i64,
    pub recovery_grace_seconds: i64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            prepare_timeout_ms: 3_000,
            commit_timeout_ms: 5_000,
            max_clock_skew_seconds: 300,
            payment_total_timeout_ms: 10_000,
            prepare_ttl_seconds: 30,
            recovery_grace_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrityConfig {
    pub check_interval_seconds: u64,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub routing: RoutingConfig,
    pub clearing: ClearingConfig,
    pub protocol: ProtocolConfig,
    pub integrity: IntegrityConfig,
    /// Recovery loop tick period, seconds.
    pub recovery_interval_seconds: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            routing: RoutingConfig::default(),
            clearing: ClearingConfig::default(),
            protocol: ProtocolConfig::default(),
            integrity: IntegrityConfig::default(),
            recovery_interval_seconds: 60,
        }
    }
}
