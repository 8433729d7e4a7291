#![deny(unsafe_code)]

pub mod jwt;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::Utc;
use hub_adapters::{InMemoryTokenRevocationStore, SystemClock, TracingEventSink};
use hub_core::capability::{Clock, EventSink, TokenRevocationStore};
use hub_core::config::HubConfig;
use hub_core::error::HubError;
use hub_core::ledger_store::LedgerStorageConfig;
use hub_core::payment::{PaymentOutcome, PaymentRequest};
use hub_core::runtime::HubEngine;
use hub_core::types::{
    IntegrityCheckpoint, Participant, ParticipantType, RouteConstraints, Transaction,
    TrustLine, TrustLinePolicy,
};
use jwt::JwtCodec;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

#[derive(Clone)]
pub struct ServiceConfig {
    pub hub: HubConfig,
    pub ledger_storage: LedgerStorageConfig,
    pub jwt_secret: Vec<u8>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            hub: HubConfig::default(),
            ledger_storage: LedgerStorageConfig::Memory,
            jwt_secret: b"hub-local-dev-secret".to_vec(),
        }
    }
}

#[derive(Clone)]
pub struct ServiceState {
    pub engine: Arc<HubEngine>,
    pub jwt: Arc<JwtCodec>,
}

impl ServiceState {
    pub async fn bootstrap(config: ServiceConfig) -> Result<Self, ServiceError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let events: Arc<dyn EventSink> = Arc::new(TracingEventSink);
        let revocations: Arc<dyn TokenRevocationStore> = Arc::new(InMemoryTokenRevocationStore::new());

        let engine = HubEngine::bootstrap(
            config.hub,
            config.ledger_storage,
            events,
            clock,
            revocations,
        )
        .await
        .map_err(ServiceError::Core)?;
        let engine = Arc::new(engine);
        engine.spawn_background_loops();

        let jwt = Arc::new(JwtCodec::new(&config.jwt_secret));

        Ok(Self { engine, jwt })
    }
}

pub fn build_router(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/participants", post(register_participant))
        .route("/v1/auth/challenge", post(issue_challenge))
        .route("/v1/auth/token", post(authenticate))
        .route("/v1/auth/refresh", post(refresh_tokens))
        .route("/v1/trustlines", post(create_trustline))
        .route("/v1/trustlines/:id", patch(update_trustline))
        .route("/v1/trustlines/:id/close", post(close_trustline))
        .route("/v1/payments", post(create_payment))
        .route("/v1/transactions/:tx_id", get(get_transaction))
        .route("/v1/integrity/status", get(get_integrity_status))
        .route("/v1/integrity/:equivalent/verify", post(verify))
        .route("/v1/integrity/:equivalent/checksum", get(checksum))
        .route("/v1/integrity/audit-log", get(audit_log))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Core(#[from] HubError),
    #[error("jwt error: {0}")]
    Jwt(String),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Http { status: StatusCode, message: String },
    #[error(transparent)]
    Core(#[from] HubError),
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn unauthorized(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Http { status, message } => {
                (status, Json(serde_json::json!({ "error": message }))).into_response()
            }
            ApiError::Core(err) => {
                let status = match err.code() {
                    "E001" | "E002" | "E003" | "E004" | "E007" => StatusCode::CONFLICT,
                    "E005" => StatusCode::UNAUTHORIZED,
                    "E006" => StatusCode::FORBIDDEN,
                    "E008" => StatusCode::CONFLICT,
                    "E009" => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (
                    status,
                    Json(serde_json::json!({
                        "code": err.code(),
                        "message": err.to_string(),
                    })),
                )
                    .into_response()
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    ledger_backend: String,
}

async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "hub-service",
        ledger_backend: state.engine.store().backend_label().to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct RegisterParticipantRequest {
    public_key: String,
    display_name: String,
    #[serde(default)]
    participant_type: Option<ParticipantType>,
    #[serde(default)]
    profile: serde_json::Value,
    signature: String,
}

async fn register_participant(
    State(state): State<ServiceState>,
    Json(req): Json<RegisterParticipantRequest>,
) -> Result<Json<Participant>, ApiError> {
    let public_key = decode_public_key(&req.public_key)?;
    let signature = decode_signature(&req.signature)?;
    let participant = state
        .engine
        .register_participant(
            public_key,
            req.display_name,
            req.participant_type.unwrap_or(ParticipantType::Person),
            req.profile,
            &signature,
        )
        .await?;
    Ok(Json(participant))
}

#[derive(Debug, Deserialize)]
struct ChallengeRequest {
    pid: String,
}

#[derive(Debug, Serialize)]
struct ChallengeResponse {
    nonce: String,
    expires_at: chrono::DateTime<Utc>,
}

async fn issue_challenge(
    State(state): State<ServiceState>,
    Json(req): Json<ChallengeRequest>,
) -> Result<Json<ChallengeResponse>, ApiError> {
    let challenge = state.engine.issue_challenge(&req.pid).await?;
    Ok(Json(ChallengeResponse {
        nonce: challenge.nonce,
        expires_at: challenge.expires_at,
    }))
}

#[derive(Debug, Deserialize)]
struct AuthenticateRequest {
    nonce: String,
    signature: String,
}

#[derive(Debug, Serialize)]
struct SessionResponse {
    access_token: String,
    refresh_token: String,
}

async fn authenticate(
    State(state): State<ServiceState>,
    Json(req): Json<AuthenticateRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let signature = decode_signature(&req.signature)?;
    let session = state.engine.authenticate(&req.nonce, &signature).await?;
    issue_session(&state, &session.pid)
}

#[derive(Debug, Deserialize)]
struct RefreshRequest {
    pid: String,
    refresh_token: String,
}

async fn refresh_tokens(
    State(state): State<ServiceState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let claims = state
        .jwt
        .decode_refresh(&req.refresh_token)
        .map_err(|e| ApiError::unauthorized(e.to_string()))?;
    let session = state.engine.refresh_tokens(&req.pid, &claims.jti).await?;
    issue_session(&state, &session.pid)
}

fn issue_session(state: &ServiceState, pid: &str) -> Result<Json<SessionResponse>, ApiError> {
    let access_token = state
        .jwt
        .encode_access(pid)
        .map_err(|e| ApiError::Http {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: e.to_string(),
        })?;
    let refresh_token = state
        .jwt
        .encode_refresh(pid, &jwt::new_jti())
        .map_err(|e| ApiError::Http {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: e.to_string(),
        })?;
    Ok(Json(SessionResponse {
        access_token,
        refresh_token,
    }))
}

#[derive(Debug, Deserialize)]
struct CreateTrustLineRequest {
    from: String,
    to: String,
    equivalent: String,
    limit: Decimal,
    #[serde(default)]
    policy: TrustLinePolicy,
    signature: String,
    from_public_key: String,
}

async fn create_trustline(
    State(state): State<ServiceState>,
    Json(req): Json<CreateTrustLineRequest>,
) -> Result<Json<TrustLine>, ApiError> {
    let signature = decode_signature(&req.signature)?;
    let public_key = decode_public_key(&req.from_public_key)?;
    let line = state
        .engine
        .create_trustline(
            req.from,
            req.to,
            req.equivalent,
            req.limit,
            req.policy,
            &signature,
            &public_key,
        )
        .await?;
    Ok(Json(line))
}

#[derive(Debug, Deserialize)]
struct UpdateTrustLineRequest {
    #[serde(default)]
    new_limit: Option<Decimal>,
    #[serde(default)]
    new_policy: Option<TrustLinePolicy>,
    signature: String,
    from_public_key: String,
}

async fn update_trustline(
    State(state): State<ServiceState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateTrustLineRequest>,
) -> Result<Json<TrustLine>, ApiError> {
    let signature = decode_signature(&req.signature)?;
    let public_key = decode_public_key(&req.from_public_key)?;
    let line = state
        .engine
        .update_trustline(id, req.new_limit, req.new_policy, &signature, &public_key)
        .await?;
    Ok(Json(line))
}

#[derive(Debug, Deserialize)]
struct CloseTrustLineRequest {
    signature: String,
    from_public_key: String,
}

async fn close_trustline(
    State(state): State<ServiceState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CloseTrustLineRequest>,
) -> Result<StatusCode, ApiError> {
    let signature = decode_signature(&req.signature)?;
    let public_key = decode_public_key(&req.from_public_key)?;
    state
        .engine
        .close_trustline(id, &signature, &public_key)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct CreatePaymentRequest {
    from: String,
    to: String,
    equivalent: String,
    amount: Decimal,
    #[serde(default)]
    description: String,
    #[serde(default)]
    constraints: Option<RouteConstraints>,
    signature: String,
}

async fn create_payment(
    State(state): State<ServiceState>,
    Json(req): Json<CreatePaymentRequest>,
) -> Result<Json<PaymentOutcome>, ApiError> {
    let signature = decode_signature(&req.signature)?;
    let outcome = state
        .engine
        .create_payment(PaymentRequest {
            from: req.from,
            to: req.to,
            equivalent: req.equivalent,
            amount: req.amount,
            description: req.description,
            constraints: req.constraints.unwrap_or_default(),
            signature,
        })
        .await?;
    Ok(Json(outcome))
}

async fn get_transaction(
    State(state): State<ServiceState>,
    Path(tx_id): Path<Uuid>,
) -> Result<Json<Transaction>, ApiError> {
    let tx = state
        .engine
        .get_transaction(tx_id)
        .await?
        .ok_or_else(|| ApiError::Http {
            status: StatusCode::NOT_FOUND,
            message: format!("transaction {tx_id} not found"),
        })?;
    Ok(Json(tx))
}

#[derive(Debug, Deserialize)]
struct EquivalentQuery {
    equivalent: String,
}

async fn get_integrity_status(
    State(state): State<ServiceState>,
    Query(query): Query<EquivalentQuery>,
) -> Result<Json<Option<IntegrityCheckpoint>>, ApiError> {
    let checkpoint = state.engine.get_integrity_status(&query.equivalent).await?;
    Ok(Json(checkpoint))
}

#[derive(Debug, Serialize)]
struct VerifyResponse {
    clean: bool,
    violations: Vec<String>,
}

async fn verify(
    State(state): State<ServiceState>,
    Path(equivalent): Path<String>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let report = state.engine.verify(&equivalent).await?;
    Ok(Json(VerifyResponse {
        clean: report.is_clean(),
        violations: report.violations.iter().map(|v| v.detail.clone()).collect(),
    }))
}

#[derive(Debug, Serialize)]
struct ChecksumResponse {
    checksum: String,
}

async fn checksum(
    State(state): State<ServiceState>,
    Path(equivalent): Path<String>,
) -> Result<Json<ChecksumResponse>, ApiError> {
    let checksum = state.engine.checksum(&equivalent).await?;
    Ok(Json(ChecksumResponse { checksum }))
}

#[derive(Debug, Deserialize)]
struct AuditLogQuery {
    #[serde(default = "default_audit_limit")]
    limit: usize,
}

fn default_audit_limit() -> usize {
    100
}

async fn audit_log(
    State(state): State<ServiceState>,
    Query(query): Query<AuditLogQuery>,
) -> Result<Json<Vec<hub_core::types::AuditLogEntry>>, ApiError> {
    let entries = state.engine.audit_log(query.limit).await?;
    Ok(Json(entries))
}

fn decode_public_key(encoded: &str) -> Result<[u8; 32], ApiError> {
    let bytes = hub_core::identity::hex_decode(encoded)
        .ok_or_else(|| ApiError::bad_request("invalid public key encoding"))?;
    bytes
        .try_into()
        .map_err(|_| ApiError::bad_request("public key must be 32 bytes"))
}

fn decode_signature(encoded: &str) -> Result<[u8; 64], ApiError> {
    let bytes = hub_core::identity::hex_decode(encoded)
        .ok_or_else(|| ApiError::bad_request("invalid signature encoding"))?;
    bytes
        .try_into()
        .map_err(|_| ApiError::bad_request("signature must be 64 bytes"))
}
