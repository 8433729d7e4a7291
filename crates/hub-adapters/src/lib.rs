//! Concrete capability implementations plugged into `hub_core::runtime::HubEngine`
//! at process start: system clock, tracing-backed event sink, in-memory
//! token revocation store, Ed25519-backed session signer.

#![deny(unsafe_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ed25519_dalek::{Signer as DalekSigner, SigningKey};
use hub_core::capability::{Clock, DomainEvent, EventSeverity, EventSink, Signer, TokenRevocationStore};

/// Wall-clock `Clock` backed by `chrono::Utc::now`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// `EventSink` that logs every domain event through `tracing`, at a level
/// keyed off the event's own severity.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: DomainEvent) {
        match event.severity {
            EventSeverity::Info => {
                tracing::info!(kind = %event.kind, payload = %event.payload, "domain event")
            }
            EventSeverity::Warning => {
                tracing::warn!(kind = %event.kind, payload = %event.payload, "domain event")
            }
            EventSeverity::High => {
                tracing::error!(kind = %event.kind, payload = %event.payload, "domain event")
            }
        }
    }
}

/// In-memory revoked-token ledger. Suitable for a single hub instance;
/// a multi-instance deployment would back this with the same Postgres
/// pool the ledger store uses.
#[derive(Default)]
pub struct InMemoryTokenRevocationStore {
    revoked: DashMap<String, DateTime<Utc>>,
}

impl InMemoryTokenRevocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop entries whose expiry has passed, so the table doesn't grow
    /// unbounded across the process lifetime.
    pub fn sweep_expired(&self, now: DateTime<Utc>) {
        self.revoked.retain(|_, expires_at| *expires_at > now);
    }
}

#[async_trait]
impl TokenRevocationStore for InMemoryTokenRevocationStore {
    async fn revoke(&self, token_id: &str, expires_at: DateTime<Utc>) {
        self.revoked.insert(token_id.to_string(), expires_at);
    }

    async fn is_revoked(&self, token_id: &str) -> bool {
        self.revoked.contains_key(token_id)
    }
}

/// Ed25519-backed `Signer` used for the hub's own session material (not
/// participant payloads, which are verified directly in `hub_core::identity`).
pub struct Ed25519Signer {
    signing_key: SigningKey,
}

impl Ed25519Signer {
    pub fn from_bytes(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }
}

impl Signer for Ed25519Signer {
    fn sign(&self, bytes: &[u8]) -> Vec<u8> {
        self.signing_key.sign(bytes).to_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn revocation_store_reports_revoked_tokens() {
        let store = InMemoryTokenRevocationStore::new();
        let now = Utc::now();
        assert!(!store.is_revoked("t1").await);
        store.revoke("t1", now + chrono::Duration::seconds(60)).await;
        assert!(store.is_revoked("t1").await);
    }

    #[test]
    fn sweep_expired_drops_old_entries() {
        let store = InMemoryTokenRevocationStore::new();
        let now = Utc::now();
        store.revoked.insert("expired".to_string(), now - chrono::Duration::seconds(1));
        store.sweep_expired(now);
        assert!(store.revoked.is_empty());
    }

    #[test]
    fn signer_produces_verifiable_signature() {
        let signer = Ed25519Signer::from_bytes(&[9u8; 32]);
        let sig_bytes = signer.sign(b"hello");
        assert_eq!(sig_bytes.len(), 64);
    }
}
