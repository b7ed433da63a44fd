use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use strata_domain::{
    DependencyType, Event, EventType, OperationType, Plan, PlanUnit, PlanUnitId, PlanUnitStatus,
    Run, RunId, RunStatus, Severity,
};
use strata_provider::ProviderRegistry;
use strata_store::StateStore;
use tokio::sync::{RwLock, Semaphore};
use tracing::{info, warn};

use crate::cancellation::CancellationToken;
use crate::error::SchedulerError;
use crate::executor::{run_unit, UnitOutcome, UnitResult};

/// Per-run knobs. `max_parallel <= 0` falls back to the default worker
/// count, matching the teacher's CLI-default-wins-over-zero convention.
#[derive(Debug, Clone)]
pub struct ScheduleOptions {
    pub max_parallel: i32,
    pub start_delay: Option<Duration>,
    pub dry_run: bool,
    pub fail_fast: bool,
    pub user: String,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        ScheduleOptions {
            max_parallel: DEFAULT_MAX_PARALLEL,
            start_delay: None,
            dry_run: false,
            fail_fast: false,
            user: String::from("unknown"),
        }
    }
}

const DEFAULT_MAX_PARALLEL: i32 = 10;

/// Drives plan execution: schedules runs onto a bounded worker pool, one
/// level of the plan's DAG at a time, applying dependency gates between
/// levels and retrying individual units with classified backoff.
pub struct Scheduler {
    store: Arc<dyn StateStore>,
    providers: Arc<ProviderRegistry>,
    tokens: RwLock<HashMap<RunId, CancellationToken>>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn StateStore>, providers: Arc<ProviderRegistry>) -> Self {
        Scheduler {
            store,
            providers,
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Validates the plan, persists a pending run and its units, registers
    /// a cancellation token, and spawns the execution protocol in the
    /// background. Returns the run id immediately.
    pub async fn schedule(
        self: &Arc<Self>,
        plan: Plan,
        options: ScheduleOptions,
    ) -> Result<RunId, SchedulerError> {
        if plan.units.is_empty() {
            return Err(SchedulerError::EmptyPlan);
        }

        let run_id = plan.run_id.clone();
        let mut run = Run::new(plan.id.clone(), options.user.clone());
        run.id = run_id.clone();
        run.counters.total = plan.units.len() as u32;
        run.counters.pending = plan.units.len() as u32;

        self.store.create_run(&run).await?;
        for unit in &plan.units {
            self.store.create_plan_unit(&run_id, unit).await?;
        }

        let token = CancellationToken::new();
        self.tokens.write().await.insert(run_id.clone(), token.clone());

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            scheduler.execute(plan, run_id.clone(), options, token).await;
            scheduler.tokens.write().await.remove(&run_id);
        });

        Ok(run.id)
    }

    pub async fn cancel(&self, run_id: &RunId) -> Result<(), SchedulerError> {
        let tokens = self.tokens.read().await;
        match tokens.get(run_id) {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => Err(SchedulerError::RunNotFound(run_id.as_str().to_string())),
        }
    }

    pub async fn get_status(&self, run_id: &RunId) -> Result<Option<Run>, SchedulerError> {
        Ok(self.store.get_run(run_id).await?)
    }

    async fn execute(
        &self,
        plan: Plan,
        run_id: RunId,
        options: ScheduleOptions,
        token: CancellationToken,
    ) {
        self.store
            .update_run_status(&run_id, RunStatus::Running)
            .await
            .ok();
        self.emit(&run_id, None, EventType::RunStarted, "run started", Severity::Info)
            .await;

        if let Some(delay) = options.start_delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = token.cancelled() => {}
            }
        }

        let units_by_id: HashMap<PlanUnitId, PlanUnit> = plan
            .units
            .iter()
            .map(|u| (u.id.clone(), u.clone()))
            .collect();
        let mut outcomes: HashMap<PlanUnitId, UnitResult> = HashMap::new();
        let mut cancelled_observed = false;
        let mut fail_fast_triggered = false;

        let worker_cap = if options.max_parallel > 0 {
            options.max_parallel as usize
        } else {
            DEFAULT_MAX_PARALLEL as usize
        };

        'levels: for level in 0..plan.graph.depth {
            if token.is_cancelled() {
                cancelled_observed = true;
                break;
            }

            let unit_ids: Vec<PlanUnitId> = plan
                .graph
                .nodes
                .iter()
                .filter(|(_, node)| node.level == level)
                .map(|(id, _)| id.clone())
                .collect();
            if unit_ids.is_empty() {
                continue;
            }

            self.emit(&run_id, None, EventType::LevelStarted, &format!("level {level} started"), Severity::Info)
                .await;

            let semaphore = Arc::new(Semaphore::new(worker_cap.min(unit_ids.len()).max(1)));
            let mut handles = Vec::with_capacity(unit_ids.len());

            for unit_id in unit_ids {
                if fail_fast_triggered || token.is_cancelled() {
                    self.skip_remaining(&run_id, &unit_id, &mut outcomes).await;
                    continue;
                }

                let Some(unit) = units_by_id.get(&unit_id).cloned() else {
                    continue;
                };

                let gate = gate_for(&unit, &outcomes);
                match gate {
                    Gate::Blocked => {
                        self.mark_skipped(&run_id, &unit.id, "dependency not satisfied").await;
                        outcomes.insert(unit.id.clone(), UnitResult::new(UnitOutcome::Failed, false));
                        continue;
                    }
                    Gate::Skip => {
                        self.mark_skipped(&run_id, &unit.id, "upstream reported no change").await;
                        outcomes.insert(unit.id.clone(), UnitResult::new(UnitOutcome::Succeeded, false));
                        continue;
                    }
                    Gate::Proceed => {}
                }

                let permit = Arc::clone(&semaphore);
                let store = Arc::clone(&self.store);
                let providers = Arc::clone(&self.providers);
                let run_id_inner = run_id.clone();
                let token_inner = token.clone();
                let dry_run = options.dry_run;

                self.emit(&run_id, Some(&unit.id), EventType::UnitStarted, "unit started", Severity::Info)
                    .await;
                self.store
                    .update_plan_unit_status(&unit.id, PlanUnitStatus::Running, None, None)
                    .await
                    .ok();

                let handle = tokio::spawn(async move {
                    let _permit = permit.acquire_owned().await.expect("semaphore not closed");
                    let outcome = run_unit(
                        store.as_ref(),
                        providers.as_ref(),
                        &run_id_inner,
                        &unit,
                        dry_run,
                        &token_inner,
                    )
                    .await;
                    (unit.id, outcome)
                });
                handles.push(handle);
            }

            for handle in handles {
                match handle.await {
                    Ok((unit_id, result)) => {
                        if result.outcome == UnitOutcome::Cancelled {
                            cancelled_observed = true;
                        }
                        if result.outcome == UnitOutcome::Failed && options.fail_fast {
                            fail_fast_triggered = true;
                        }
                        outcomes.insert(unit_id, result);
                    }
                    Err(join_err) => {
                        warn!(error = %join_err, "unit task panicked");
                    }
                }
            }

            if token.is_cancelled() {
                cancelled_observed = true;
            }

            self.emit(&run_id, None, EventType::LevelCompleted, &format!("level {level} completed"), Severity::Info)
                .await;

            if (fail_fast_triggered || cancelled_observed) && level + 1 < plan.graph.depth {
                break 'levels;
            }
        }

        // Mark any units that never got dispatched (short-circuited levels) as cancelled/skipped.
        for unit in plan.units.iter() {
            if !outcomes.contains_key(&unit.id) {
                let status = if cancelled_observed {
                    PlanUnitStatus::Cancelled
                } else {
                    PlanUnitStatus::Skipped
                };
                self.store
                    .update_plan_unit_status(&unit.id, status, None, None)
                    .await
                    .ok();
            }
        }
        let final_status = compute_run_status(&plan, &outcomes, cancelled_observed);
        self.store
            .update_run_status(&run_id, final_status)
            .await
            .ok();

        let (event_type, message, severity) = match final_status {
            RunStatus::Succeeded | RunStatus::Partial => {
                (EventType::RunCompleted, "run completed", Severity::Info)
            }
            RunStatus::Cancelled => (EventType::RunCancelled, "run cancelled", Severity::Warn),
            _ => (EventType::RunFailed, "run failed", Severity::Error),
        };
        self.emit(&run_id, None, event_type, message, severity).await;
        info!(run_id = %run_id, status = ?final_status, "run finished");
    }

    async fn mark_skipped(&self, run_id: &RunId, unit_id: &PlanUnitId, reason: &str) {
        self.store
            .update_plan_unit_status(unit_id, PlanUnitStatus::Skipped, None, Some(reason.to_string()))
            .await
            .ok();
        self.emit(run_id, Some(unit_id), EventType::UnitSkipped, reason, Severity::Warn)
            .await;
    }

    async fn skip_remaining(
        &self,
        run_id: &RunId,
        unit_id: &PlanUnitId,
        outcomes: &mut HashMap<PlanUnitId, UnitResult>,
    ) {
        self.mark_skipped(run_id, unit_id, "run cancelled or fail-fast triggered").await;
        outcomes.insert(unit_id.clone(), UnitResult::new(UnitOutcome::Cancelled, false));
    }

    async fn emit(
        &self,
        run_id: &RunId,
        unit_id: Option<&PlanUnitId>,
        event_type: EventType,
        message: &str,
        severity: Severity,
    ) {
        let mut event = Event::new(event_type, message, severity).with_run(run_id.clone());
        if let Some(unit_id) = unit_id {
            event = event.with_unit(unit_id.clone());
        }
        if let Err(err) = self.store.append_event(&event).await {
            warn!(error = %err, "failed to record event (best-effort, continuing)");
        }
    }
}

enum Gate {
    Proceed,
    Blocked,
    Skip,
}

fn gate_for(unit: &PlanUnit, outcomes: &HashMap<PlanUnitId, UnitResult>) -> Gate {
    for dep in &unit.dependencies {
        let upstream = outcomes.get(&dep.upstream);
        match dep.kind {
            DependencyType::Require => match upstream {
                Some(r) if r.outcome == UnitOutcome::Succeeded => {}
                None => {}
                _ => return Gate::Blocked,
            },
            DependencyType::Notify => match upstream {
                Some(r) if r.outcome == UnitOutcome::Succeeded && r.changed => {}
                _ => return Gate::Skip,
            },
            DependencyType::Order => {}
        }
    }
    Gate::Proceed
}

fn compute_run_status(
    plan: &Plan,
    outcomes: &HashMap<PlanUnitId, UnitResult>,
    cancelled_observed: bool,
) -> RunStatus {
    if cancelled_observed {
        return RunStatus::Cancelled;
    }

    let mutating: Vec<&PlanUnit> = plan
        .units
        .iter()
        .filter(|u| u.operation.mutating())
        .collect();

    let mut succeeded = 0usize;
    let mut failed = 0usize;
    for unit in &mutating {
        match outcomes.get(&unit.id).map(|r| r.outcome) {
            Some(UnitOutcome::Succeeded) => succeeded += 1,
            Some(UnitOutcome::Failed) => failed += 1,
            _ => {}
        }
    }

    if failed > 0 && succeeded == 0 {
        RunStatus::Failed
    } else if failed > 0 {
        RunStatus::Partial
    } else if succeeded == mutating.len() {
        RunStatus::Succeeded
    } else {
        RunStatus::Partial
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;
    use strata_domain::{Change, ChangeAction, Dependency};

    fn unit_with_deps(deps: Vec<Dependency>) -> PlanUnit {
        let mut unit = PlanUnit::new(
            strata_domain::ResourceId::new("host:web-1"),
            OperationType::Update,
        );
        unit.dependencies = deps;
        unit.changes = vec![Change {
            action: ChangeAction::Modify,
            path: "/size".to_string(),
            before: serde_json::Value::Null,
            after: serde_json::Value::Null,
        }];
        unit
    }

    #[test]
    fn require_gate_blocks_on_upstream_failure() {
        let upstream = PlanUnitId::generate();
        let unit = unit_with_deps(vec![Dependency {
            upstream: upstream.clone(),
            kind: DependencyType::Require,
        }]);
        let mut outcomes = StdHashMap::new();
        outcomes.insert(upstream, UnitResult::new(UnitOutcome::Failed, false));
        assert!(matches!(gate_for(&unit, &outcomes), Gate::Blocked));
    }

    #[test]
    fn require_gate_proceeds_when_upstream_not_yet_seen() {
        let unit = unit_with_deps(vec![Dependency {
            upstream: PlanUnitId::generate(),
            kind: DependencyType::Require,
        }]);
        let outcomes = StdHashMap::new();
        assert!(matches!(gate_for(&unit, &outcomes), Gate::Proceed));
    }

    #[test]
    fn notify_gate_skips_on_upstream_failure() {
        let upstream = PlanUnitId::generate();
        let unit = unit_with_deps(vec![Dependency {
            upstream: upstream.clone(),
            kind: DependencyType::Notify,
        }]);
        let mut outcomes = StdHashMap::new();
        outcomes.insert(upstream, UnitResult::new(UnitOutcome::Failed, false));
        assert!(matches!(gate_for(&unit, &outcomes), Gate::Skip));
    }

    #[test]
    fn notify_gate_skips_when_upstream_succeeded_without_change() {
        let upstream = PlanUnitId::generate();
        let unit = unit_with_deps(vec![Dependency {
            upstream: upstream.clone(),
            kind: DependencyType::Notify,
        }]);
        let mut outcomes = StdHashMap::new();
        outcomes.insert(upstream, UnitResult::new(UnitOutcome::Succeeded, false));
        assert!(matches!(gate_for(&unit, &outcomes), Gate::Skip));
    }

    #[test]
    fn notify_gate_proceeds_when_upstream_succeeded_and_changed() {
        let upstream = PlanUnitId::generate();
        let unit = unit_with_deps(vec![Dependency {
            upstream: upstream.clone(),
            kind: DependencyType::Notify,
        }]);
        let mut outcomes = StdHashMap::new();
        outcomes.insert(upstream, UnitResult::new(UnitOutcome::Succeeded, true));
        assert!(matches!(gate_for(&unit, &outcomes), Gate::Proceed));
    }

    #[test]
    fn order_gate_always_proceeds() {
        let upstream = PlanUnitId::generate();
        let unit = unit_with_deps(vec![Dependency {
            upstream: upstream.clone(),
            kind: DependencyType::Order,
        }]);
        let mut outcomes = StdHashMap::new();
        outcomes.insert(upstream, UnitResult::new(UnitOutcome::Failed, false));
        assert!(matches!(gate_for(&unit, &outcomes), Gate::Proceed));
    }

    #[test]
    fn run_status_succeeded_when_all_mutating_units_succeed() {
        let mut plan = sample_plan();
        let mut outcomes = StdHashMap::new();
        for unit in &plan.units {
            outcomes.insert(unit.id.clone(), UnitResult::new(UnitOutcome::Succeeded, true));
        }
        assert_eq!(compute_run_status(&plan, &outcomes, false), RunStatus::Succeeded);
        plan.units.clear();
    }

    #[test]
    fn run_status_failed_when_no_unit_succeeds() {
        let plan = sample_plan();
        let mut outcomes = StdHashMap::new();
        for unit in &plan.units {
            outcomes.insert(unit.id.clone(), UnitResult::new(UnitOutcome::Failed, false));
        }
        assert_eq!(compute_run_status(&plan, &outcomes, false), RunStatus::Failed);
    }

    #[test]
    fn run_status_partial_when_mixed() {
        let plan = sample_plan();
        let mut outcomes = StdHashMap::new();
        outcomes.insert(plan.units[0].id.clone(), UnitResult::new(UnitOutcome::Succeeded, true));
        outcomes.insert(plan.units[1].id.clone(), UnitResult::new(UnitOutcome::Failed, false));
        assert_eq!(compute_run_status(&plan, &outcomes, false), RunStatus::Partial);
    }

    #[test]
    fn cancellation_observed_wins_over_outcome_tally() {
        let plan = sample_plan();
        let mut outcomes = StdHashMap::new();
        for unit in &plan.units {
            outcomes.insert(unit.id.clone(), UnitResult::new(UnitOutcome::Succeeded, true));
        }
        assert_eq!(compute_run_status(&plan, &outcomes, true), RunStatus::Cancelled);
    }

    fn sample_plan() -> Plan {
        let u1 = unit_with_deps(vec![]);
        let u2 = unit_with_deps(vec![]);
        let mut units = vec![u1, u2];
        let graph = strata_graph::build_graph(&mut units).expect("graph builds");
        Plan {
            id: strata_domain::PlanId::generate(),
            run_id: strata_domain::RunId::generate(),
            created_at: chrono::Utc::now(),
            units,
            graph,
            summary: strata_domain::PlanSummary::default(),
        }
    }

    // ── End-to-end dispatcher tests ─────────────────────────────────────

    mod integration {
        use super::*;
        use strata_provider::NullProvider;
        use strata_store::InMemoryStore;
        use std::time::Duration as StdDuration;

        fn provider_unit(op: OperationType, deps: Vec<Dependency>) -> PlanUnit {
            let mut unit = PlanUnit::new(strata_domain::ResourceId::generate(), op);
            unit.resource_name = format!("res-{}", unit.id.as_str());
            unit.provider_name = "vm".to_string();
            unit.desired = serde_json::json!({"size": "small"});
            unit.changes = vec![Change {
                action: ChangeAction::Add,
                path: "/".to_string(),
                before: serde_json::Value::Null,
                after: serde_json::json!({"size": "small"}),
            }];
            unit.dependencies = deps;
            unit
        }

        fn plan_from(mut units: Vec<PlanUnit>) -> Plan {
            let graph = strata_graph::build_graph(&mut units).expect("graph builds");
            Plan {
                id: strata_domain::PlanId::generate(),
                run_id: strata_domain::RunId::generate(),
                created_at: chrono::Utc::now(),
                units,
                graph,
                summary: strata_domain::PlanSummary::default(),
            }
        }

        fn scheduler_with_null_provider() -> Arc<Scheduler> {
            let store = Arc::new(InMemoryStore::new());
            let mut registry = ProviderRegistry::new();
            registry.register("vm", Arc::new(NullProvider::new()));
            Arc::new(Scheduler::new(store, Arc::new(registry)))
        }

        async fn await_terminal(scheduler: &Scheduler, run_id: &RunId) -> Run {
            for _ in 0..200 {
                if let Some(run) = scheduler.get_status(run_id).await.unwrap() {
                    if run.status.terminal() {
                        return run;
                    }
                }
                tokio::time::sleep(StdDuration::from_millis(10)).await;
            }
            panic!("run {run_id} did not reach a terminal status in time");
        }

        /// S1: a linear chain of `require` edges runs to completion in order.
        #[tokio::test]
        async fn linear_chain_runs_to_success() {
            let scheduler = scheduler_with_null_provider();
            let a = provider_unit(OperationType::Create, vec![]);
            let a_id = a.id.clone();
            let b = provider_unit(OperationType::Create, vec![Dependency {
                upstream: a_id.clone(),
                kind: DependencyType::Require,
            }]);
            let b_id = b.id.clone();
            let c = provider_unit(OperationType::Create, vec![Dependency {
                upstream: b_id,
                kind: DependencyType::Require,
            }]);
            let plan = plan_from(vec![a, b, c]);
            let run_id = scheduler.schedule(plan, ScheduleOptions::default()).await.unwrap();

            let run = await_terminal(&scheduler, &run_id).await;
            assert_eq!(run.status, RunStatus::Succeeded);
            let units = scheduler.store.list_plan_units(&run_id).await.unwrap();
            assert!(units.iter().all(|u| u.status == PlanUnitStatus::Succeeded));
        }

        /// S2: a diamond (A -> {B, C} -> D) completes with all units succeeding.
        #[tokio::test]
        async fn diamond_dependency_runs_to_success() {
            let scheduler = scheduler_with_null_provider();
            let a = provider_unit(OperationType::Create, vec![]);
            let a_dep = || vec![Dependency { upstream: a.id.clone(), kind: DependencyType::Require }];
            let b = provider_unit(OperationType::Create, a_dep());
            let c = provider_unit(OperationType::Create, a_dep());
            let d = provider_unit(OperationType::Create, vec![
                Dependency { upstream: b.id.clone(), kind: DependencyType::Require },
                Dependency { upstream: c.id.clone(), kind: DependencyType::Require },
            ]);
            let plan = plan_from(vec![a, b, c, d]);
            let run_id = scheduler.schedule(plan, ScheduleOptions::default()).await.unwrap();

            let run = await_terminal(&scheduler, &run_id).await;
            assert_eq!(run.status, RunStatus::Succeeded);
            let units = scheduler.store.list_plan_units(&run_id).await.unwrap();
            assert!(units.iter().all(|u| u.status == PlanUnitStatus::Succeeded));
        }

        /// S3: a `require` failure cascades — the dependent unit is skipped,
        /// not run, and the run as a whole is reported failed.
        #[tokio::test]
        async fn require_failure_cascades_to_dependent_skip() {
            let scheduler = scheduler_with_null_provider();
            let mut a = provider_unit(OperationType::Create, vec![]);
            a.provider_name = "unregistered".to_string(); // no provider -> permanent failure
            let a_id = a.id.clone();
            let b = provider_unit(OperationType::Create, vec![Dependency {
                upstream: a_id,
                kind: DependencyType::Require,
            }]);
            let b_id = b.id.clone();
            let plan = plan_from(vec![a, b]);
            let run_id = scheduler.schedule(plan, ScheduleOptions::default()).await.unwrap();

            let run = await_terminal(&scheduler, &run_id).await;
            assert_eq!(run.status, RunStatus::Failed);
            let units = scheduler.store.list_plan_units(&run_id).await.unwrap();
            let b_unit = units.iter().find(|u| u.id == b_id).unwrap();
            assert_eq!(b_unit.status, PlanUnitStatus::Skipped);
        }

        /// S6: independent create/delete units sharing level zero both
        /// complete, regardless of dispatch order within the level.
        #[tokio::test]
        async fn independent_units_at_same_level_both_succeed() {
            let scheduler = scheduler_with_null_provider();
            let create = provider_unit(OperationType::Create, vec![]);
            let delete = provider_unit(OperationType::Delete, vec![]);
            let plan = plan_from(vec![create, delete]);

            let run_id = scheduler.schedule(plan, ScheduleOptions::default()).await.unwrap();
            let run = await_terminal(&scheduler, &run_id).await;
            assert_eq!(run.status, RunStatus::Succeeded);
            let units = scheduler.store.list_plan_units(&run_id).await.unwrap();
            assert!(units.iter().all(|u| u.status == PlanUnitStatus::Succeeded));
        }
    }
}
