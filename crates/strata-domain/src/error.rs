use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid resource id: {0}")]
    InvalidResourceId(String),

    #[error("duplicate resource (type={r#type}, name={name})")]
    DuplicateResource { r#type: String, name: String },

    #[error("resource '{0}' depends on unknown resource '{1}'")]
    DanglingDependency(String, String),

    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
