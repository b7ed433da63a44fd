use strata_error::{EngineError, ErrorCode};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("duplicate plan unit id: {0}")]
    DuplicateUnitId(String),

    #[error("edge from '{from}' targets unknown unit '{to}'")]
    DanglingEdge { from: String, to: String },

    #[error("cycle detected: {}", .path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    #[error("no root unit found for non-empty unit set")]
    NoRoot,
}

impl From<GraphError> for EngineError {
    fn from(err: GraphError) -> Self {
        EngineError::permanent(err.to_string()).with_code(ErrorCode::ValidationError)
    }
}
