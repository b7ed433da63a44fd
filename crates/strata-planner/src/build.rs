use std::collections::HashMap;

use chrono::Utc;
use strata_domain::{
    Dependency, DependencyType, OperationType, Plan, PlanId, PlanUnit, PlanUnitId, ResourceId,
    RunId,
};

use crate::diff::DiffResult;
use crate::error::PlannerError;

const DEFAULT_TIMEOUT_SECS: u64 = 300;
const DEFAULT_MAX_RETRIES: u32 = 3;

const CREATE_RECREATE_MIN_TIMEOUT: u64 = 600;
const UPDATE_MIN_TIMEOUT: u64 = 300;
const DELETE_MAX_TIMEOUT: u64 = 180;

/// Builds a [`Plan`] from a computed diff.
///
/// Units with `operation = noop` are skipped. Each surviving unit gets a
/// fresh id, the default timeout and retry budget, and `require` edges
/// translated from the underlying resource's dependency list — using a
/// resource-id → unit-id index built incrementally from already-added
/// units, so a dependency on a resource that appears later in the desired
/// list is silently dropped rather than resolved forward.
pub fn build_plan(diff: DiffResult) -> Result<Plan, PlannerError> {
    let mut units = Vec::new();
    let mut index: HashMap<ResourceId, PlanUnitId> = HashMap::new();

    for resource_diff in diff.diffs.iter().filter(|d| d.operation != OperationType::Noop) {
        let mut unit = PlanUnit::new(resource_diff.resource_id.clone(), resource_diff.operation);
        unit.resource_name = resource_diff.resource_name.clone();
        unit.desired = resource_diff.desired.clone();
        unit.actual = resource_diff.actual.clone();
        unit.changes = resource_diff.changes.clone();
        unit.provider_name = resource_diff.provider_name.clone();
        unit.timeout_secs = DEFAULT_TIMEOUT_SECS;
        unit.max_retries = DEFAULT_MAX_RETRIES;

        unit.dependencies = resource_diff
            .dependencies
            .iter()
            .filter_map(|upstream_resource| index.get(upstream_resource))
            .map(|upstream_unit| Dependency {
                upstream: upstream_unit.clone(),
                kind: DependencyType::Require,
            })
            .collect();

        index.insert(resource_diff.resource_id.clone(), unit.id.clone());
        units.push(unit);
    }

    let graph = strata_graph::build_graph(&mut units)?;

    let mut summary = diff.summary.clone();
    summary.noop = 0; // skipped units are dropped from the plan, not reported as noop-in-plan

    Ok(Plan {
        id: PlanId::generate(),
        run_id: RunId::generate(),
        created_at: Utc::now(),
        units,
        graph,
        summary,
    })
}

/// Validates structural invariants of an already-built plan.
pub fn validate_plan(plan: &Plan) -> Result<(), PlannerError> {
    if plan.units.is_empty() {
        return Err(PlannerError::Invalid("plan has no units".to_string()));
    }

    for unit in &plan.units {
        if unit.id.as_str().is_empty() {
            return Err(PlannerError::Invalid("unit has empty id".to_string()));
        }
        if unit.resource_id.as_str().is_empty() {
            return Err(PlannerError::Invalid(
                "unit has empty resource id".to_string(),
            ));
        }
        if unit.timeout_secs == 0 {
            return Err(PlannerError::Invalid(format!(
                "unit {} has zero timeout",
                unit.id
            )));
        }
    }

    if !plan.units.is_empty() {
        let mut rebuild: Vec<PlanUnit> = plan.units.clone();
        strata_graph::build_graph(&mut rebuild)?;
    }

    Ok(())
}

fn operation_priority(op: OperationType) -> u8 {
    match op {
        OperationType::Delete => 0,
        OperationType::Recreate => 1,
        OperationType::Create => 2,
        OperationType::Update => 3,
        OperationType::Read => 4,
        OperationType::Noop => 5,
    }
}

fn clamp_timeout(op: OperationType, timeout_secs: u64) -> u64 {
    match op {
        OperationType::Create | OperationType::Recreate => timeout_secs.max(CREATE_RECREATE_MIN_TIMEOUT),
        OperationType::Update => timeout_secs.max(UPDATE_MIN_TIMEOUT),
        OperationType::Delete => timeout_secs.min(DELETE_MAX_TIMEOUT),
        OperationType::Noop | OperationType::Read => timeout_secs,
    }
}

/// Rebuilds the DAG, then applies two optimizations: within each level,
/// higher-priority operations (delete > recreate > create > update > noop)
/// run first; and per-operation timeout floors/ceilings are enforced.
pub fn optimize_plan(mut plan: Plan) -> Result<Plan, PlannerError> {
    for unit in &mut plan.units {
        unit.timeout_secs = clamp_timeout(unit.operation, unit.timeout_secs);
    }

    plan.graph = strata_graph::build_graph(&mut plan.units)?;

    plan.units.sort_by(|a, b| {
        a.execution_order
            .cmp(&b.execution_order)
            .then_with(|| operation_priority(a.operation).cmp(&operation_priority(b.operation)))
    });

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::ResourceDiff;
    use strata_domain::{Change, ChangeAction, PlanSummary};

    fn diff_for(resource_id: ResourceId, op: OperationType, deps: Vec<ResourceId>) -> ResourceDiff {
        ResourceDiff {
            resource_id,
            resource_name: "res".to_string(),
            operation: op,
            changes: vec![Change {
                path: ".".to_string(),
                before: serde_json::Value::Null,
                after: serde_json::json!({}),
                action: ChangeAction::Add,
            }],
            provider_name: String::new(),
            desired: serde_json::json!({}),
            actual: serde_json::Value::Null,
            dependencies: deps,
        }
    }

    #[test]
    fn noop_units_are_skipped() {
        let a = ResourceId::generate();
        let diff = DiffResult {
            diffs: vec![diff_for(a, OperationType::Noop, vec![])],
            summary: PlanSummary::default(),
        };
        let plan = build_plan(diff).unwrap();
        assert!(plan.units.is_empty());
    }

    #[test]
    fn forward_references_are_dropped() {
        let a = ResourceId::generate();
        let b = ResourceId::generate();
        // b depends on a, but a appears after b in the list — forward ref, dropped.
        let diff = DiffResult {
            diffs: vec![
                diff_for(b.clone(), OperationType::Create, vec![a.clone()]),
                diff_for(a, OperationType::Create, vec![]),
            ],
            summary: PlanSummary::default(),
        };
        let plan = build_plan(diff).unwrap();
        let b_unit = plan.units.iter().find(|u| u.resource_id == b).unwrap();
        assert!(b_unit.dependencies.is_empty());
    }

    #[test]
    fn backward_references_translate_to_require_edges() {
        let a = ResourceId::generate();
        let b = ResourceId::generate();
        let diff = DiffResult {
            diffs: vec![
                diff_for(a.clone(), OperationType::Create, vec![]),
                diff_for(b, OperationType::Create, vec![a]),
            ],
            summary: PlanSummary::default(),
        };
        let plan = build_plan(diff).unwrap();
        let b_unit = &plan.units[1];
        assert_eq!(b_unit.dependencies.len(), 1);
    }

    #[test]
    fn optimize_plan_clamps_delete_timeout_down() {
        let a = ResourceId::generate();
        let diff = DiffResult {
            diffs: vec![diff_for(a, OperationType::Delete, vec![])],
            summary: PlanSummary::default(),
        };
        let mut plan = build_plan(diff).unwrap();
        plan.units[0].timeout_secs = 1000;
        let plan = optimize_plan(plan).unwrap();
        assert!(plan.units[0].timeout_secs <= DELETE_MAX_TIMEOUT);
    }

    #[test]
    fn optimize_plan_sorts_delete_before_create_within_a_level() {
        let a = ResourceId::generate();
        let b = ResourceId::generate();
        let diff = DiffResult {
            diffs: vec![
                diff_for(a, OperationType::Create, vec![]),
                diff_for(b, OperationType::Delete, vec![]),
            ],
            summary: PlanSummary::default(),
        };
        let plan = build_plan(diff).unwrap();
        let plan = optimize_plan(plan).unwrap();
        assert_eq!(plan.units[0].operation, OperationType::Delete);
    }
}
