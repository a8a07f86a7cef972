// Domain error types - stable kinds, no internal detail in user messages

use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

/// Machine-readable error kind carried by every failure that crosses the API boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthenticated,
    Forbidden,
    InvalidState,
    ProofRequired,
    InsufficientBalance,
    NotFound,
    Conflict,
    ValidationError,
    StoreUnavailable,
    TokenExpired,
    TokenMalformed,
    TokenInvalidSignature,
    TokenNotEligible,
    Internal,
}

/// Main error type for the core
#[derive(Error, Debug)]
pub enum CoreError {
    /// No or unusable credentials (HTTP 401)
    #[error("Authentication required")]
    Unauthenticated,

    /// Login with an unknown email or a wrong password (HTTP 401)
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Authenticated but not permitted (HTTP 403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Illegal lifecycle transition (HTTP 409)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Chore requires proof and none was supplied (HTTP 422)
    #[error("Proof required")]
    ProofRequired,

    /// Spend would overdraw the balance (HTTP 422)
    #[error("Insufficient balance")]
    InsufficientBalance,

    /// Entity missing or outside the caller's household (HTTP 404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Uniqueness violation (HTTP 409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed input (HTTP 400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transient infrastructure failure, retryable by the caller (HTTP 503)
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Token decoding or refresh failure (HTTP 401)
    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    /// Unexpected internal failure (HTTP 500)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Token service errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Token expired")]
    Expired,

    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token is not eligible for refresh yet")]
    NotEligible,

    #[error("Failed to sign token: {0}")]
    Signing(String),
}

impl CoreError {
    /// Stable kind for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Unauthenticated | CoreError::InvalidCredentials => ErrorKind::Unauthenticated,
            CoreError::Forbidden(_) => ErrorKind::Forbidden,
            CoreError::InvalidState(_) => ErrorKind::InvalidState,
            CoreError::ProofRequired => ErrorKind::ProofRequired,
            CoreError::InsufficientBalance => ErrorKind::InsufficientBalance,
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::Conflict(_) => ErrorKind::Conflict,
            CoreError::Validation(_) => ErrorKind::ValidationError,
            CoreError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            CoreError::Token(TokenError::Expired) => ErrorKind::TokenExpired,
            CoreError::Token(TokenError::Malformed(_)) => ErrorKind::TokenMalformed,
            CoreError::Token(TokenError::InvalidSignature) => ErrorKind::TokenInvalidSignature,
            CoreError::Token(TokenError::NotEligible) => ErrorKind::TokenNotEligible,
            CoreError::Token(TokenError::Signing(_)) => ErrorKind::Internal,
            CoreError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Unauthenticated
            | ErrorKind::TokenExpired
            | ErrorKind::TokenMalformed
            | ErrorKind::TokenInvalidSignature => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::InvalidState | ErrorKind::Conflict | ErrorKind::TokenNotEligible => 409,
            ErrorKind::ProofRequired | ErrorKind::InsufficientBalance => 422,
            ErrorKind::ValidationError => 400,
            ErrorKind::StoreUnavailable => 503,
            ErrorKind::Internal => 500,
        }
    }

    /// Only store-transient failures may be retried, and only by the caller
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::StoreUnavailable(_))
    }

    /// Get user-friendly error message (no sensitive information)
    pub fn user_message(&self) -> String {
        match self {
            CoreError::Unauthenticated => "Authentication required".to_string(),
            CoreError::InvalidCredentials => "Invalid credentials".to_string(),
            CoreError::Forbidden(reason) => format!("Forbidden: {}", reason),
            CoreError::InvalidState(reason) => format!("Invalid state: {}", reason),
            CoreError::ProofRequired => "Proof of completion is required".to_string(),
            CoreError::InsufficientBalance => "Insufficient balance".to_string(),
            CoreError::NotFound(what) => format!("{} not found", what),
            CoreError::Conflict(reason) => reason.clone(),
            CoreError::Validation(reason) => reason.clone(),
            CoreError::StoreUnavailable(_) => "Service temporarily unavailable".to_string(),
            CoreError::Token(TokenError::Signing(_)) => "Internal error".to_string(),
            CoreError::Token(e) => e.to_string(),
            CoreError::Internal(_) => "Internal error".to_string(),
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => CoreError::NotFound(what),
            StoreError::UniqueViolation(what) => CoreError::Conflict(format!("{} already exists", what)),
            other => CoreError::StoreUnavailable(other.to_string()),
        }
    }
}
