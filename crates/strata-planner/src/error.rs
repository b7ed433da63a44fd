use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("graph error: {0}")]
    Graph(#[from] strata_graph::GraphError),

    #[error("store error: {0}")]
    Store(#[from] strata_store::StoreError),

    #[error("provider error: {0}")]
    Provider(#[from] strata_provider::ProviderError),

    #[error("plan invalid: {0}")]
    Invalid(String),

    #[error("internal planner error: {0}")]
    Internal(String),
}
