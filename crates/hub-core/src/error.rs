use rust_decimal::Decimal;
use thiserror::Error;

/// Structured error taxonomy for the hub engine.
///
/// Every variant maps to exactly one of the E001..E010 envelope codes at the
/// HTTP boundary; see `hub_service`'s `ApiError`.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("no route with sufficient capacity from {source} to {target} in {equivalent}")]
    NoRoute {
        source: String,
        target: String,
        equivalent: String,
    },

    #[error("insufficient capacity: requested {requested}, routable {routable}")]
    InsufficientCapacity { requested: Decimal, routable: Decimal },

    #[error("trust limit exceeded on segment {from}->{to} in {equivalent}")]
    TrustLimitExceeded {
        equivalent: String,
        from: String,
        to: String,
    },

    #[error("trust line {0} is not active")]
    TrustLineNotActive(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("operation timed out after {0}ms")]
    Timeout(u64),

    #[error("state conflict: {0}")]
    StateConflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("new limit {new_limit} below outstanding debt {debt}")]
    LimitBelowDebt { new_limit: Decimal, debt: Decimal },

    #[error("trust line has outstanding debt {0}")]
    DebtOutstanding(Decimal),

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("integrity violation on {equivalent}: {detail}")]
    IntegrityViolation { equivalent: String, detail: String },

    #[error("stage violation: expected '{expected}', got '{actual}'")]
    StageViolation { expected: String, actual: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl HubError {
    pub fn stage_violation(expected: &str, actual: &str) -> Self {
        Self::StageViolation {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// E001..E010 error code used in the boundary envelope.
    pub fn code(&self) -> &'static str {
        match self {
            HubError::NoRoute { .. } => "E001",
            HubError::InsufficientCapacity { .. } => "E002",
            HubError::TrustLimitExceeded { .. } => "E003",
            HubError::TrustLineNotActive(_) => "E004",
            HubError::InvalidSignature(_) => "E005",
            HubError::Forbidden(_) | HubError::PolicyDenied(_) | HubError::Unauthorized(_) => {
                "E006"
            }
            HubError::Timeout(_) => "E007",
            HubError::StateConflict(_)
            | HubError::StageViolation { .. }
            | HubError::DebtOutstanding(_)
            | HubError::LimitBelowDebt { .. } => "E008",
            HubError::Validation(_) | HubError::AlreadyExists(_) | HubError::NotFound(_) => {
                "E009"
            }
            HubError::Internal(_)
            | HubError::IntegrityViolation { .. }
            | HubError::Storage(_)
            | HubError::Serialization(_) => "E010",
        }
    }
}

impl From<sqlx::Error> for HubError {
    fn from(e: sqlx::Error) -> Self {
        HubError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for HubError {
    fn from(e: serde_json::Error) -> Self {
        HubError::Serialization(e.to_string())
    }
}
