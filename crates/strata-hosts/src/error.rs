use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostsError {
    #[error("store error: {0}")]
    Store(#[from] strata_store::StoreError),

    #[error("invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    #[error("host not found: {0}")]
    NotFound(String),
}
