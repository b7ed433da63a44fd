use std::time::Duration;

use strata_domain::{
    compute_state_hash, Event, EventType, OperationType, PlanUnit, PlanUnitId, PlanUnitStatus,
    ResourceStateRecord, RunId, Severity,
};
use strata_error::{EngineError, ErrorCode};
use strata_provider::ProviderRegistry;
use strata_store::StateStore;
use tracing::warn;

use crate::backoff::compute_backoff;
use crate::cancellation::CancellationToken;

/// Outcome of running a single unit's retry loop to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

/// `run_unit`'s full verdict: the terminal outcome plus whether the unit
/// actually changed anything. A unit can succeed without changing state
/// (an up-to-date resource re-applied), which matters to downstream
/// `notify` dependents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitResult {
    pub outcome: UnitOutcome,
    pub changed: bool,
}

impl UnitResult {
    pub fn new(outcome: UnitOutcome, changed: bool) -> Self {
        Self { outcome, changed }
    }
}

/// Whether a unit's planned operation reports a change — decided at plan
/// time (non-empty change set, or a delete removing a resource outright),
/// since neither `ApplyResult` nor `DestroyResult` carries its own flag.
fn reports_change(unit: &PlanUnit) -> bool {
    !unit.changes.is_empty() || unit.operation == OperationType::Delete
}

/// Runs the retry loop for one unit: dry-run synthesis, provider dispatch,
/// failure classification, and cancellation-honouring backoff sleeps
/// between attempts. Writes every status transition to the store.
pub async fn run_unit(
    store: &dyn StateStore,
    providers: &ProviderRegistry,
    run_id: &RunId,
    unit: &PlanUnit,
    dry_run: bool,
    cancellation: &CancellationToken,
) -> UnitResult {
    let mut attempt = 0u32;

    loop {
        if cancellation.is_cancelled() {
            let _ = store
                .update_plan_unit_status(&unit.id, PlanUnitStatus::Cancelled, None, None)
                .await;
            return UnitResult::new(UnitOutcome::Cancelled, false);
        }

        if dry_run {
            let _ = store
                .update_plan_unit_status(
                    &unit.id,
                    PlanUnitStatus::Succeeded,
                    Some(unit.desired.clone()),
                    None,
                )
                .await;
            emit(store, run_id, &unit.id, EventType::UnitSucceeded, "dry-run synthesized success", Severity::Info).await;
            return UnitResult::new(UnitOutcome::Succeeded, reports_change(unit));
        }

        let outcome = apply_once(store, providers, unit).await;

        match outcome {
            Ok(new_state) => {
                let _ = store
                    .update_plan_unit_status(&unit.id, PlanUnitStatus::Succeeded, Some(new_state.clone()), None)
                    .await;
                record_resource_state(store, run_id, unit, &new_state).await;
                emit(store, run_id, &unit.id, EventType::UnitSucceeded, "unit succeeded", Severity::Info).await;
                return UnitResult::new(UnitOutcome::Succeeded, reports_change(unit));
            }
            Err(engine_err) => {
                if !engine_err.retryable() || attempt >= unit.max_retries {
                    let _ = store
                        .update_plan_unit_status(
                            &unit.id,
                            PlanUnitStatus::Failed,
                            None,
                            Some(engine_err.to_string()),
                        )
                        .await;
                    emit(store, run_id, &unit.id, EventType::UnitFailed, &engine_err.to_string(), Severity::Error).await;
                    return UnitResult::new(UnitOutcome::Failed, false);
                }

                warn!(unit_id = %unit.id, attempt, error = %engine_err, "unit failed, retrying");
                emit(store, run_id, &unit.id, EventType::UnitRetrying, &engine_err.to_string(), Severity::Warn).await;
                let _ = store.increment_retries(&unit.id).await;

                let delay = compute_backoff(engine_err.class, attempt);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancellation.cancelled() => {
                        let _ = store
                            .update_plan_unit_status(&unit.id, PlanUnitStatus::Cancelled, None, None)
                            .await;
                        return UnitResult::new(UnitOutcome::Cancelled, false);
                    }
                }
                attempt += 1;
            }
        }
    }
}

/// Persists the canonical `(type, name)`-keyed resource state row after a
/// successful apply, so a later diff sees this run's result rather than
/// recomputing against stale or absent state. A successful delete clears
/// the row instead of leaving a null-state record behind.
async fn record_resource_state(
    store: &dyn StateStore,
    run_id: &RunId,
    unit: &PlanUnit,
    new_state: &serde_json::Value,
) {
    let r#type = resource_type(unit);
    let result = if unit.operation == OperationType::Delete {
        store.delete_resource_state(r#type, &unit.resource_name).await
    } else {
        store
            .upsert_resource_state(&ResourceStateRecord {
                r#type: r#type.to_string(),
                name: unit.resource_name.clone(),
                state: new_state.clone(),
                hash: compute_state_hash(new_state),
                last_run_id: Some(run_id.clone()),
                last_applied: chrono::Utc::now(),
            })
            .await
    };
    if let Err(err) = result {
        warn!(error = %err, unit_id = %unit.id, "failed to record resource state (best-effort, continuing)");
    }
}

async fn apply_once(
    store: &dyn StateStore,
    providers: &ProviderRegistry,
    unit: &PlanUnit,
) -> Result<serde_json::Value, EngineError> {
    let resource = store
        .get_resource_state(resource_type(unit), &unit.resource_name)
        .await
        .ok()
        .flatten();

    let provider = providers.for_type(resource_type(unit))?;

    let dispatch = async move {
        if unit.operation == OperationType::Delete {
            let state = resource.map(|r| r.state).unwrap_or(unit.actual.clone());
            let result = provider.destroy(&state).await?;
            if !result.success {
                return Err(strata_provider::ProviderError::DestroyFailed(
                    "provider reported unsuccessful destroy".to_string(),
                ));
            }
            Ok(serde_json::Value::Null)
        } else {
            let result = provider
                .apply(&unit.desired, &unit.actual, unit.operation, &unit.changes)
                .await?;
            Ok(result.new_state)
        }
    };

    match tokio::time::timeout(Duration::from_secs(unit.timeout_secs.max(1)), dispatch).await {
        Ok(result) => result.map_err(EngineError::from),
        Err(_) => Err(EngineError::transient(format!(
            "apply timed out after {}s",
            unit.timeout_secs
        ))
        .with_code(ErrorCode::Timeout)),
    }
}

/// Resource-type tag used for provider lookup. Plan units don't carry the
/// type directly (only the resource id), so it travels via `provider_name`,
/// which the planner sets to the resource's type string — the same key
/// `ProviderRegistry::for_type` expects — not the provider's own `name()`.
fn resource_type(unit: &PlanUnit) -> &str {
    if unit.provider_name.is_empty() {
        "unknown"
    } else {
        &unit.provider_name
    }
}

async fn emit(
    store: &dyn StateStore,
    run_id: &RunId,
    unit_id: &PlanUnitId,
    event_type: EventType,
    message: &str,
    severity: Severity,
) {
    let event = Event::new(event_type, message, severity)
        .with_run(run_id.clone())
        .with_unit(unit_id.clone());
    if let Err(err) = store.append_event(&event).await {
        warn!(error = %err, "failed to record event (best-effort, continuing)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_domain::{Change, ChangeAction, ResourceId};
    use strata_provider::NullProvider;
    use strata_store::InMemoryStore;

    fn unit(op: OperationType, changed: bool) -> PlanUnit {
        let mut unit = PlanUnit::new(ResourceId::generate(), op);
        unit.resource_name = "web-1".to_string();
        unit.provider_name = "vm".to_string();
        unit.desired = serde_json::json!({"size": "small"});
        if changed {
            unit.changes = vec![Change {
                action: ChangeAction::Add,
                path: "/".to_string(),
                before: serde_json::Value::Null,
                after: serde_json::json!({"size": "small"}),
            }];
        }
        unit
    }

    fn registry() -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry.register("vm", std::sync::Arc::new(NullProvider::new()));
        registry
    }

    #[test]
    fn reports_change_true_for_nonempty_changes() {
        assert!(reports_change(&unit(OperationType::Update, true)));
    }

    #[test]
    fn reports_change_true_for_delete_even_without_changes() {
        assert!(reports_change(&unit(OperationType::Delete, false)));
    }

    #[test]
    fn reports_change_false_for_unchanged_update() {
        assert!(!reports_change(&unit(OperationType::Update, false)));
    }

    #[tokio::test]
    async fn successful_apply_upserts_canonical_resource_state() {
        let store = InMemoryStore::new();
        let providers = registry();
        let run_id = RunId::generate();
        let unit = unit(OperationType::Create, true);
        let token = CancellationToken::new();

        let result = run_unit(&store, &providers, &run_id, &unit, false, &token).await;

        assert_eq!(result.outcome, UnitOutcome::Succeeded);
        assert!(result.changed);
        let record = store
            .get_resource_state("vm", "web-1")
            .await
            .unwrap()
            .expect("resource_state row recorded");
        assert_eq!(record.state, serde_json::json!({"size": "small"}));
        assert_eq!(record.last_run_id, Some(run_id));
    }

    #[tokio::test]
    async fn successful_delete_clears_resource_state() {
        let store = InMemoryStore::new();
        store
            .upsert_resource_state(&ResourceStateRecord {
                r#type: "vm".to_string(),
                name: "web-1".to_string(),
                state: serde_json::json!({"size": "small"}),
                hash: "h".to_string(),
                last_run_id: None,
                last_applied: chrono::Utc::now(),
            })
            .await
            .unwrap();
        let providers = registry();
        let run_id = RunId::generate();
        let unit = unit(OperationType::Delete, false);
        let token = CancellationToken::new();

        let result = run_unit(&store, &providers, &run_id, &unit, false, &token).await;

        assert_eq!(result.outcome, UnitOutcome::Succeeded);
        assert!(result.changed);
        assert!(store.get_resource_state("vm", "web-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dry_run_skips_provider_and_state_write() {
        let store = InMemoryStore::new();
        let providers = registry();
        let run_id = RunId::generate();
        let unit = unit(OperationType::Create, true);
        let token = CancellationToken::new();

        let result = run_unit(&store, &providers, &run_id, &unit, true, &token).await;

        assert_eq!(result.outcome, UnitOutcome::Succeeded);
        assert!(store.get_resource_state("vm", "web-1").await.unwrap().is_none());
    }
}
