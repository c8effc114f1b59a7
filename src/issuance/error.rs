//! Issuance Error Types

use thiserror::Error;

use super::state::TransactionStatus;

/// Errors surfaced to callers of the issuance core.
///
/// Transient and unknown external outcomes are NOT errors: they leave the
/// record unchanged and are reported as a pending status.
#[derive(Error, Debug, Clone)]
pub enum IssuanceError {
    // === Validation Errors (never retried) ===
    #[error("Invalid credential data: {0}")]
    Validation(String),

    #[error("Credential schema does not match transaction type {0}")]
    SchemaMismatch(String),

    #[error("Subject ID must not be empty")]
    InvalidSubject,

    #[error("Referenced transaction cannot be revoked: {0}")]
    InvalidRevocationTarget(String),

    // === State Errors (never retried) ===
    #[error("Invalid transition: {operation} not allowed from {from}")]
    InvalidTransition {
        operation: &'static str,
        from: TransactionStatus,
    },

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    // === System Errors ===
    #[error("Store error: {0}")]
    Store(String),

    #[error("Internal system error: {0}")]
    SystemError(String),
}

impl IssuanceError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            IssuanceError::Validation(_) => "VALIDATION_ERROR",
            IssuanceError::SchemaMismatch(_) => "SCHEMA_MISMATCH",
            IssuanceError::InvalidSubject => "INVALID_SUBJECT",
            IssuanceError::InvalidRevocationTarget(_) => "INVALID_REVOCATION_TARGET",
            IssuanceError::InvalidTransition { .. } => "INVALID_TRANSITION",
            IssuanceError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            IssuanceError::Store(_) => "STORE_ERROR",
            IssuanceError::SystemError(_) => "SYSTEM_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            IssuanceError::Validation(_)
            | IssuanceError::SchemaMismatch(_)
            | IssuanceError::InvalidSubject => 400,
            IssuanceError::TransactionNotFound(_) => 404,
            IssuanceError::InvalidTransition { .. } => 409,
            IssuanceError::InvalidRevocationTarget(_) => 422,
            IssuanceError::Store(_) | IssuanceError::SystemError(_) => 500,
        }
    }

    /// Validation and state errors are final; retrying the same call cannot succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IssuanceError::Store(_) | IssuanceError::SystemError(_))
    }
}

/// Errors raised by a `TransactionStore` backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Duplicate transaction id: {0}")]
    Duplicate(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<StoreError> for IssuanceError {
    fn from(e: StoreError) -> Self {
        IssuanceError::Store(e.to_string())
    }
}
