use async_trait::async_trait;
use serde_json::json;
use strata_domain::{Change, OperationType};
use tracing::debug;

use crate::driver::{
    ApplyResult, DestroyResult, PlanResult, Provider, ProviderMetadata, ReadRequest, ReadResult,
};
use crate::error::ProviderError;

/// A stub provider that simulates infrastructure locally.
///
/// Performs no I/O: `apply` echoes `desired` back as `new_state`, `destroy`
/// always reports success, and `plan` always proposes the requested
/// operation verbatim. Used to drive the scheduler and its tests without a
/// real cloud-backed provider wired up.
#[derive(Debug, Default, Clone)]
pub struct NullProvider;

impl NullProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Provider for NullProvider {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn init(&self, _config: &serde_json::Value) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn read(&self, request: &ReadRequest) -> Result<ReadResult, ProviderError> {
        debug!(r#type = %request.r#type, name = %request.name, "NullProvider: read");
        Ok(ReadResult {
            state: json!({ "type": request.r#type, "name": request.name, "provider": "null" }),
            exists: true,
        })
    }

    async fn plan(
        &self,
        desired: &serde_json::Value,
        actual: &serde_json::Value,
        operation: OperationType,
    ) -> Result<PlanResult, ProviderError> {
        debug!(?operation, "NullProvider: plan");
        let changes = if desired == actual {
            vec![]
        } else {
            vec![Change {
                path: "/".to_string(),
                before: actual.clone(),
                after: desired.clone(),
                action: strata_domain::ChangeAction::Modify,
            }]
        };
        Ok(PlanResult {
            operation,
            changes,
            requires_recreate: operation == OperationType::Recreate,
            warnings: vec![],
        })
    }

    async fn apply(
        &self,
        desired: &serde_json::Value,
        _actual: &serde_json::Value,
        operation: OperationType,
        _planned_changes: &[Change],
    ) -> Result<ApplyResult, ProviderError> {
        debug!(?operation, "NullProvider: apply");
        Ok(ApplyResult {
            new_state: desired.clone(),
            output: json!({ "provider": "null", "applied": true }),
            events: vec![format!("null provider applied {operation}")],
        })
    }

    async fn destroy(&self, _state: &serde_json::Value) -> Result<DestroyResult, ProviderError> {
        Ok(DestroyResult {
            success: true,
            events: vec!["null provider destroyed".to_string()],
        })
    }

    fn validate(&self, _config: &serde_json::Value) -> Result<(), ProviderError> {
        Ok(())
    }

    fn schema(&self) -> serde_json::Value {
        json!({ "type": "object", "additionalProperties": true })
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: "null".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn apply_echoes_desired_state() {
        let provider = NullProvider::new();
        let desired = json!({"size": "small"});
        let result = provider
            .apply(&desired, &json!(null), OperationType::Create, &[])
            .await
            .unwrap();
        assert_eq!(result.new_state, desired);
    }

    #[tokio::test]
    async fn plan_reports_no_changes_when_states_match() {
        let provider = NullProvider::new();
        let state = json!({"size": "small"});
        let result = provider
            .plan(&state, &state, OperationType::Noop)
            .await
            .unwrap();
        assert!(result.changes.is_empty());
    }

    #[tokio::test]
    async fn destroy_always_succeeds() {
        let provider = NullProvider::new();
        let result = provider.destroy(&json!({})).await.unwrap();
        assert!(result.success);
    }
}
