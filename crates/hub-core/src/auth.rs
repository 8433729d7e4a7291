//! Challenge/response authentication state machine.
//!
//! Issues single-use challenges, verifies the Ed25519 signature a
//! participant returns over one, and governs refresh-token rotation. The
//! actual JWT encoding/decoding is left to `hub_service`; this module only
//! decides *whether* a session should be granted or renewed.

use crate::capability::{Clock, TokenRevocationStore};
use crate::error::HubError;
use crate::identity;
use crate::ledger_store::LedgerStore;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::RngCore;
use std::sync::Arc;
use uuid::Uuid;

pub const OP_AUTH_CHALLENGE: &str = "auth.challenge";

const CHALLENGE_TTL_SECONDS: i64 = 120;

#[derive(Debug, Clone)]
pub struct Challenge {
    pub nonce: String,
    pub pid: String,
    pub expires_at: DateTime<Utc>,
}

/// Tracks outstanding, single-use challenges in memory. A challenge is
/// consumed (removed) the moment it is redeemed, successfully or not.
pub struct ChallengeStore {
    pending: DashMap<String, Challenge>,
}

impl ChallengeStore {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }

    pub fn issue(&self, pid: &str, now: DateTime<Utc>) -> Challenge {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let nonce = bs58::encode(bytes).into_string();
        let challenge = Challenge {
            nonce: nonce.clone(),
            pid: pid.to_string(),
            expires_at: now + Duration::seconds(CHALLENGE_TTL_SECONDS),
        };
        self.pending.insert(nonce, challenge.clone());
        challenge
    }

    fn take(&self, nonce: &str) -> Option<Challenge> {
        self.pending.remove(nonce).map(|(_, c)| c)
    }
}

impl Default for ChallengeStore {
    fn default() -> Self {
        Self::new()
    }
}

pub struct AuthenticatedSession {
    pub pid: String,
    pub session_id: Uuid,
}

pub struct AuthEngine {
    store: Arc<LedgerStore>,
    challenges: ChallengeStore,
    revocations: Arc<dyn TokenRevocationStore>,
    clock: Arc<dyn Clock>,
}

impl AuthEngine {
    pub fn new(
        store: Arc<LedgerStore>,
        revocations: Arc<dyn TokenRevocationStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            challenges: ChallengeStore::new(),
            revocations,
            clock,
        }
    }

    pub async fn issue_challenge(&self, pid: &str) -> Result<Challenge, HubError> {
        let participant = self
            .store
            .get_participant(pid)
            .await?
            .ok_or_else(|| HubError::NotFound(format!("participant {pid}")))?;
        if !participant.is_active() {
            return Err(HubError::Forbidden(format!("participant {pid} is not active")));
        }
        Ok(self.challenges.issue(pid, self.clock.now()))
    }

    /// Redeem a challenge: the caller must supply the Ed25519 signature
    /// over `make_signable({nonce}, OP_AUTH_CHALLENGE)` using the
    /// participant's registered public key.
    pub async fn authenticate(
        &self,
        nonce: &str,
        signature: &[u8; 64],
    ) -> Result<AuthenticatedSession, HubError> {
        let challenge = self
            .challenges
            .take(nonce)
            .ok_or_else(|| HubError::Unauthorized("unknown or already-used challenge".into()))?;
        if challenge.expires_at < self.clock.now() {
            return Err(HubError::Unauthorized("challenge expired".into()));
        }

        let participant = self
            .store
            .get_participant(&challenge.pid)
            .await?
            .ok_or_else(|| HubError::NotFound(format!("participant {}", challenge.pid)))?;
        if !participant.is_active() {
            return Err(HubError::Forbidden("participant is not active".into()));
        }

        let payload = serde_json::json!({ "nonce": challenge.nonce });
        let signable = identity::make_signable(&payload, OP_AUTH_CHALLENGE)?;
        identity::verify_signature(&participant.public_key, &signable, signature)?;

        Ok(AuthenticatedSession {
            pid: participant.pid,
            session_id: Uuid::new_v4(),
        })
    }

    /// Rotate a refresh token: the caller presents its token id, which is
    /// rejected if already revoked, then immediately revoked itself so it
    /// cannot be replayed.
    pub async fn refresh(&self, pid: &str, token_id: &str) -> Result<AuthenticatedSession, HubError> {
        if self.revocations.is_revoked(token_id).await {
            return Err(HubError::Unauthorized("refresh token has been revoked".into()));
        }
        let participant = self
            .store
            .get_participant(pid)
            .await?
            .ok_or_else(|| HubError::NotFound(format!("participant {pid}")))?;
        if !participant.is_active() {
            return Err(HubError::Forbidden("participant is not active".into()));
        }

        self.revocations
            .revoke(token_id, self.clock.now() + Duration::days(30))
            .await;

        Ok(AuthenticatedSession {
            pid: participant.pid,
            session_id: Uuid::new_v4(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_is_single_use() {
        let store = ChallengeStore::new();
        let now = Utc::now();
        let challenge = store.issue("pid-a", now);
        assert!(store.take(&challenge.nonce).is_some());
        assert!(store.take(&challenge.nonce).is_none());
    }
}
