use strata_error::{EngineError, ErrorCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal store error: {0}")]
    Internal(String),

    /// Returned on a unique-constraint violation, or when an advisory lock
    /// is already held by another holder.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => {
                EngineError::not_found(msg)
            }
            StoreError::Conflict(msg) => EngineError::conflict(msg),
            StoreError::Serialization(e) => {
                EngineError::permanent(e.to_string()).with_code(ErrorCode::ValidationError)
            }
            StoreError::Internal(msg) => {
                EngineError::permanent(msg).with_code(ErrorCode::InternalError)
            }
        }
    }
}

/// Classifies an underlying sqlx error, mapping unique-constraint violations
/// to [`StoreError::Conflict`] rather than a generic internal failure.
pub fn map_sqlx_err(err: sqlx::Error, context: &str) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return StoreError::Conflict(format!("{context}: {db_err}"));
        }
    }
    StoreError::Internal(format!("{context}: {err}"))
}
