use async_trait::async_trait;
use strata_domain::{
    AuditEntry, Event, EventId, Fact, FactId, PlanUnit, PlanUnitId, PlanUnitStatus, Run, RunId,
    RunStatus, ResourceStateRecord,
};

use crate::error::StoreError;

/// Optional filters for [`StateStore::query_events`]. All fields are ANDed;
/// `None` means unfiltered on that axis.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub run_id: Option<RunId>,
    pub plan_unit_id: Option<PlanUnitId>,
    pub level: Option<u32>,
    pub limit: u32,
    pub offset: u32,
}

/// Durable home for runs, plan units, events, resource state, facts, and the
/// audit trail. The scheduler and planner are the only consumers; the only
/// shipped implementation is [`crate::sqlite_store::SqliteStore`], an
/// embedded single-file relational store. [`crate::memory::InMemoryStore`]
/// exists for tests and for driving the scheduler without a filesystem.
///
/// Every write updates `updated_at` automatically where the row carries one.
/// Deleting a run cascades to its plan units and events. Advisory locks are
/// per-process: the serialized execution level already guarantees
/// intra-run safety, so `lock_resource`/`unlock_resource` only protect
/// against two concurrent *runs* touching the same resource.
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    async fn health(&self) -> Result<(), StoreError>;

    // ── Runs ─────────────────────────────────────────────────────────────
    async fn create_run(&self, run: &Run) -> Result<(), StoreError>;
    async fn get_run(&self, id: &RunId) -> Result<Option<Run>, StoreError>;
    async fn update_run_status(&self, id: &RunId, status: RunStatus) -> Result<(), StoreError>;
    async fn list_runs(&self, limit: u32, offset: u32) -> Result<Vec<Run>, StoreError>;
    async fn delete_run(&self, id: &RunId) -> Result<(), StoreError>;

    // ── Plan units ───────────────────────────────────────────────────────
    async fn create_plan_unit(&self, run_id: &RunId, unit: &PlanUnit) -> Result<(), StoreError>;
    async fn get_plan_unit(&self, id: &PlanUnitId) -> Result<Option<PlanUnit>, StoreError>;
    async fn update_plan_unit_status(
        &self,
        id: &PlanUnitId,
        status: PlanUnitStatus,
        actual: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<(), StoreError>;
    async fn list_plan_units(&self, run_id: &RunId) -> Result<Vec<PlanUnit>, StoreError>;
    async fn delete_plan_unit(&self, id: &PlanUnitId) -> Result<(), StoreError>;
    async fn increment_retries(&self, id: &PlanUnitId) -> Result<u32, StoreError>;

    // ── Events ───────────────────────────────────────────────────────────
    async fn append_event(&self, event: &Event) -> Result<EventId, StoreError>;
    async fn query_events(&self, filter: EventFilter) -> Result<Vec<Event>, StoreError>;

    // ── Resource state ───────────────────────────────────────────────────
    async fn upsert_resource_state(&self, record: &ResourceStateRecord) -> Result<(), StoreError>;
    async fn get_resource_state(
        &self,
        r#type: &str,
        name: &str,
    ) -> Result<Option<ResourceStateRecord>, StoreError>;
    async fn list_resource_state(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ResourceStateRecord>, StoreError>;
    async fn delete_resource_state(&self, r#type: &str, name: &str) -> Result<(), StoreError>;

    // ── Facts ────────────────────────────────────────────────────────────
    async fn upsert_fact(&self, fact: &Fact) -> Result<FactId, StoreError>;
    async fn get_fact(
        &self,
        target_id: &str,
        namespace: &str,
        key: &str,
    ) -> Result<Option<Fact>, StoreError>;
    async fn list_facts(
        &self,
        target_id: Option<&str>,
        namespace: Option<&str>,
    ) -> Result<Vec<Fact>, StoreError>;
    async fn delete_fact(&self, id: &FactId) -> Result<(), StoreError>;
    /// Deletes all facts whose `expires_at` has passed. Returns the count removed.
    async fn sweep_expired_facts(&self) -> Result<u64, StoreError>;

    // ── Audit ────────────────────────────────────────────────────────────
    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError>;
    async fn list_audit(
        &self,
        action: Option<&str>,
        actor: Option<&str>,
    ) -> Result<Vec<AuditEntry>, StoreError>;

    // ── Advisory locks ───────────────────────────────────────────────────
    async fn lock_resource(&self, resource_id: &str, holder: &str) -> Result<(), StoreError>;
    async fn unlock_resource(&self, resource_id: &str, holder: &str) -> Result<(), StoreError>;
}
