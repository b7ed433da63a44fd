use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strata_domain::{Change, OperationType};

use crate::error::ProviderError;

/// What a `Read` call asks the provider to look up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadRequest {
    pub r#type: String,
    pub name: String,
    pub config: serde_json::Value,
}

/// Result of a `Read` call: the resource's current cloud-side state, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResult {
    pub state: serde_json::Value,
    pub exists: bool,
}

/// Result of a `Plan` call: what the provider intends to do and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanResult {
    pub operation: OperationType,
    pub changes: Vec<Change>,
    pub requires_recreate: bool,
    pub warnings: Vec<String>,
}

/// Result of an `Apply` call: the resulting state plus anything worth logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyResult {
    pub new_state: serde_json::Value,
    pub output: serde_json::Value,
    pub events: Vec<String>,
}

/// Result of a `Destroy` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestroyResult {
    pub success: bool,
    pub events: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub name: String,
    pub version: String,
}

/// The capability interface every provider plug-in implements.
///
/// Providers are stateless between calls other than their own `init`.
/// The scheduler only ever calls `apply` and, for delete operations,
/// `destroy`; the planner calls `plan` (and `read` for drift detection).
/// None of these methods assume an in-process implementation — a
/// provider could equally be a thin client talking to an out-of-process
/// plug-in over RPC, which is why every exchange is plain data.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn init(&self, config: &serde_json::Value) -> Result<(), ProviderError>;

    async fn read(&self, request: &ReadRequest) -> Result<ReadResult, ProviderError>;

    async fn plan(
        &self,
        desired: &serde_json::Value,
        actual: &serde_json::Value,
        operation: OperationType,
    ) -> Result<PlanResult, ProviderError>;

    async fn apply(
        &self,
        desired: &serde_json::Value,
        actual: &serde_json::Value,
        operation: OperationType,
        planned_changes: &[Change],
    ) -> Result<ApplyResult, ProviderError>;

    async fn destroy(&self, state: &serde_json::Value) -> Result<DestroyResult, ProviderError>;

    fn validate(&self, config: &serde_json::Value) -> Result<(), ProviderError>;

    /// JSON Schema (or schema-shaped document) describing accepted config.
    fn schema(&self) -> serde_json::Value;

    fn metadata(&self) -> ProviderMetadata;
}
