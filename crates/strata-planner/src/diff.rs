use serde::{Deserialize, Serialize};
use strata_domain::{Change, ChangeAction, OperationType, PlanSummary, Resource, ResourceId};
use strata_provider::{PlanResult, ProviderRegistry};
use strata_store::StateStore;
use tracing::debug;

use crate::error::PlannerError;

/// Per-resource outcome of [`compute_diff`], before plan units exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDiff {
    pub resource_id: ResourceId,
    pub resource_name: String,
    pub operation: OperationType,
    pub changes: Vec<Change>,
    /// Resource type string used to look up the executing provider
    /// (`ProviderRegistry::for_type`), not the provider's own `name()`.
    pub provider_name: String,
    pub desired: serde_json::Value,
    pub actual: serde_json::Value,
    pub dependencies: Vec<ResourceId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffResult {
    pub diffs: Vec<ResourceDiff>,
    pub summary: PlanSummary,
}

/// Computes the desired-vs-actual diff for every resource in `resources`.
///
/// For each resource: read its recorded state by `(type, name)`. Absent
/// state means `create`. Present state is handed to the registered
/// provider's `plan` call when one exists; the provider's `requires_recreate`
/// flag upgrades the operation to `recreate`. With no provider registered
/// for that resource type, the diff falls back to a structural JSON
/// comparison: equal states are `noop`, unequal states are a coarse `update`.
pub async fn compute_diff(
    resources: &[Resource],
    store: &dyn StateStore,
    providers: Option<&ProviderRegistry>,
) -> Result<DiffResult, PlannerError> {
    let mut result = DiffResult::default();

    for resource in resources {
        let existing = store
            .get_resource_state(&resource.r#type, &resource.name)
            .await?;

        let diff = match existing {
            None => ResourceDiff {
                resource_id: resource.id.clone(),
                resource_name: resource.name.clone(),
                operation: OperationType::Create,
                changes: vec![Change {
                    path: ".".to_string(),
                    before: serde_json::Value::Null,
                    after: resource.config.clone(),
                    action: ChangeAction::Add,
                }],
                provider_name: resource.r#type.clone(),
                desired: resource.config.clone(),
                actual: serde_json::Value::Null,
                dependencies: resource.dependencies.clone(),
            },
            Some(state) => {
                let provider = providers.and_then(|p| p.for_type(&resource.r#type).ok());
                match provider {
                    Some(provider) => {
                        let PlanResult {
                            mut operation,
                            changes,
                            requires_recreate,
                            warnings,
                        } = provider
                            .plan(&resource.config, &state.state, OperationType::Update)
                            .await?;
                        if requires_recreate {
                            operation = OperationType::Recreate;
                        }
                        for warning in warnings {
                            debug!(resource = %resource.id, warning, "provider plan warning");
                        }
                        ResourceDiff {
                            resource_id: resource.id.clone(),
                            resource_name: resource.name.clone(),
                            operation,
                            changes,
                            provider_name: resource.r#type.clone(),
                            desired: resource.config.clone(),
                            actual: state.state.clone(),
                            dependencies: resource.dependencies.clone(),
                        }
                    }
                    None => {
                        if resource.config == state.state {
                            ResourceDiff {
                                resource_id: resource.id.clone(),
                                resource_name: resource.name.clone(),
                                operation: OperationType::Noop,
                                changes: vec![],
                                provider_name: resource.r#type.clone(),
                                desired: resource.config.clone(),
                                actual: state.state.clone(),
                                dependencies: resource.dependencies.clone(),
                            }
                        } else {
                            ResourceDiff {
                                resource_id: resource.id.clone(),
                                resource_name: resource.name.clone(),
                                operation: OperationType::Update,
                                changes: vec![Change {
                                    path: ".".to_string(),
                                    before: state.state.clone(),
                                    after: resource.config.clone(),
                                    action: ChangeAction::Modify,
                                }],
                                provider_name: resource.r#type.clone(),
                                desired: resource.config.clone(),
                                actual: state.state.clone(),
                                dependencies: resource.dependencies.clone(),
                            }
                        }
                    }
                }
            }
        };

        result.summary.record(diff.operation);
        result.diffs.push(diff);
    }

    Ok(result)
}
