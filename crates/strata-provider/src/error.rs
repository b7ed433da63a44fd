use strata_error::{EngineError, ErrorCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("apply failed: {0}")]
    ApplyFailed(String),

    #[error("destroy failed: {0}")]
    DestroyFailed(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("internal provider error: {0}")]
    Internal(String),

    #[error("no provider registered for type: {0}")]
    NotConfigured(String),
}

impl From<ProviderError> for EngineError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::ApplyFailed(msg) => {
                EngineError::transient(msg).with_code(ErrorCode::ProviderFailed)
            }
            ProviderError::DestroyFailed(msg) => {
                EngineError::transient(msg).with_code(ErrorCode::ProviderFailed)
            }
            ProviderError::ValidationFailed(msg) => {
                EngineError::permanent(msg).with_code(ErrorCode::ValidationError)
            }
            ProviderError::Internal(msg) => {
                EngineError::permanent(msg).with_code(ErrorCode::InternalError)
            }
            ProviderError::NotConfigured(r#type) => {
                EngineError::permanent(format!("no provider registered for type: {type}"))
                    .with_code(ErrorCode::NotFound)
            }
        }
    }
}
