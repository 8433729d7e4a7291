//! Capability boundaries the core consumes but never names a concrete
//! implementation of. Plugged in at process start by `hub-adapters`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Source of truth for "now". Lets the recovery loop and integrity sweeper
/// be driven by a fixed clock in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Domain event fan-out. The core never blocks on delivery; implementations
/// decide buffering/backpressure.
#[derive(Debug, Clone)]
pub struct DomainEvent {
    pub kind: String,
    pub payload: serde_json::Value,
    pub severity: EventSeverity,
    pub emitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSeverity {
    Info,
    Warning,
    High,
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: DomainEvent);
}

/// Tracks revoked refresh tokens so `refresh_tokens` can reject a token
/// that was already rotated away.
#[async_trait]
pub trait TokenRevocationStore: Send + Sync {
    async fn revoke(&self, token_id: &str, expires_at: DateTime<Utc>);
    async fn is_revoked(&self, token_id: &str) -> bool;
}

/// Signs bytes on behalf of the hub itself (e.g. session tokens), distinct
/// from participant-side Ed25519 signatures verified in `identity`.
pub trait Signer: Send + Sync {
    fn sign(&self, bytes: &[u8]) -> Vec<u8>;
}
