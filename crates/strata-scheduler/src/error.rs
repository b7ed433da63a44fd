use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("graph error: {0}")]
    Graph(#[from] strata_graph::GraphError),

    #[error("store error: {0}")]
    Store(#[from] strata_store::StoreError),

    #[error("plan has no units")]
    EmptyPlan,

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("internal scheduler error: {0}")]
    Internal(String),
}
