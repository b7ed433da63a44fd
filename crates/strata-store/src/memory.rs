use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use strata_domain::{
    AuditEntry, Event, EventId, Fact, FactId, PlanUnit, PlanUnitId, PlanUnitStatus, Run, RunId,
    RunStatus, ResourceStateRecord,
};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::{EventFilter, StateStore};

#[derive(Debug, Default)]
struct Inner {
    runs: HashMap<RunId, Run>,
    plan_units: HashMap<PlanUnitId, PlanUnit>,
    unit_run: HashMap<PlanUnitId, RunId>,
    events: Vec<Event>,
    resource_state: HashMap<(String, String), ResourceStateRecord>,
    facts: HashMap<FactId, Fact>,
    audit: Vec<AuditEntry>,
    locks: HashMap<String, String>,
}

/// In-memory implementation of [`StateStore`].
///
/// All data is lost on process exit. Used for tests and for driving the
/// scheduler without a filesystem.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
    next_event_id: Arc<AtomicU64>,
    next_fact_id: Arc<AtomicU64>,
    next_audit_id: Arc<AtomicU64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    async fn health(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn create_run(&self, run: &Run) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn get_run(&self, id: &RunId) -> Result<Option<Run>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.runs.get(id).cloned())
    }

    async fn update_run_status(&self, id: &RunId, status: RunStatus) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let run = guard
            .runs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("run {id}")))?;
        run.status = status;
        if status.terminal() {
            run.ended_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn list_runs(&self, limit: u32, offset: u32) -> Result<Vec<Run>, StoreError> {
        let guard = self.inner.read().await;
        let mut runs: Vec<Run> = guard.runs.values().cloned().collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn delete_run(&self, id: &RunId) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.runs.remove(id);
        let unit_ids: Vec<PlanUnitId> = guard
            .unit_run
            .iter()
            .filter(|(_, r)| *r == id)
            .map(|(u, _)| u.clone())
            .collect();
        for uid in unit_ids {
            guard.plan_units.remove(&uid);
            guard.unit_run.remove(&uid);
        }
        guard.events.retain(|e| e.run_id.as_ref() != Some(id));
        Ok(())
    }

    async fn create_plan_unit(&self, run_id: &RunId, unit: &PlanUnit) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.plan_units.insert(unit.id.clone(), unit.clone());
        guard.unit_run.insert(unit.id.clone(), run_id.clone());
        Ok(())
    }

    async fn get_plan_unit(&self, id: &PlanUnitId) -> Result<Option<PlanUnit>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.plan_units.get(id).cloned())
    }

    async fn update_plan_unit_status(
        &self,
        id: &PlanUnitId,
        status: PlanUnitStatus,
        actual: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let unit = guard
            .plan_units
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("plan unit {id}")))?;
        unit.status = status;
        if let Some(actual) = actual {
            unit.actual = actual;
        }
        if let Some(error) = error {
            unit.result = Some(serde_json::json!({ "error": error }));
        }
        Ok(())
    }

    async fn list_plan_units(&self, run_id: &RunId) -> Result<Vec<PlanUnit>, StoreError> {
        let guard = self.inner.read().await;
        let mut units: Vec<PlanUnit> = guard
            .unit_run
            .iter()
            .filter(|(_, r)| *r == run_id)
            .filter_map(|(u, _)| guard.plan_units.get(u).cloned())
            .collect();
        units.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        Ok(units)
    }

    async fn delete_plan_unit(&self, id: &PlanUnitId) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.plan_units.remove(id);
        guard.unit_run.remove(id);
        Ok(())
    }

    async fn increment_retries(&self, id: &PlanUnitId) -> Result<u32, StoreError> {
        let mut guard = self.inner.write().await;
        let unit = guard
            .plan_units
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("plan unit {id}")))?;
        unit.retries += 1;
        Ok(unit.retries)
    }

    async fn append_event(&self, event: &Event) -> Result<EventId, StoreError> {
        let id = EventId::new(self.next_event_id.fetch_add(1, Ordering::SeqCst).to_string());
        let mut stored = event.clone();
        stored.id = Some(id.clone());
        let mut guard = self.inner.write().await;
        guard.events.push(stored);
        Ok(id)
    }

    async fn query_events(&self, filter: EventFilter) -> Result<Vec<Event>, StoreError> {
        let guard = self.inner.read().await;
        let filtered: Vec<Event> = guard
            .events
            .iter()
            .filter(|e| filter.run_id.as_ref().map_or(true, |r| e.run_id.as_ref() == Some(r)))
            .filter(|e| {
                filter
                    .plan_unit_id
                    .as_ref()
                    .map_or(true, |u| e.plan_unit_id.as_ref() == Some(u))
            })
            .cloned()
            .collect();
        let limit = if filter.limit == 0 { filtered.len() as u32 } else { filter.limit };
        Ok(filtered
            .into_iter()
            .skip(filter.offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn upsert_resource_state(&self, record: &ResourceStateRecord) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard
            .resource_state
            .insert((record.r#type.clone(), record.name.clone()), record.clone());
        Ok(())
    }

    async fn get_resource_state(
        &self,
        r#type: &str,
        name: &str,
    ) -> Result<Option<ResourceStateRecord>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .resource_state
            .get(&(r#type.to_string(), name.to_string()))
            .cloned())
    }

    async fn list_resource_state(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ResourceStateRecord>, StoreError> {
        let guard = self.inner.read().await;
        let mut records: Vec<ResourceStateRecord> = guard.resource_state.values().cloned().collect();
        records.sort_by(|a, b| b.last_applied.cmp(&a.last_applied));
        let limit = if limit == 0 { records.len() as u32 } else { limit };
        Ok(records.into_iter().skip(offset as usize).take(limit as usize).collect())
    }

    async fn delete_resource_state(&self, r#type: &str, name: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.resource_state.remove(&(r#type.to_string(), name.to_string()));
        Ok(())
    }

    async fn upsert_fact(&self, fact: &Fact) -> Result<FactId, StoreError> {
        let mut guard = self.inner.write().await;
        let existing = guard.facts.values().find(|f| {
            f.target_id == fact.target_id && f.namespace == fact.namespace && f.key == fact.key
        });
        let id = match existing {
            Some(f) => f.id.clone().expect("stored fact always has an id"),
            None => FactId::new(self.next_fact_id.fetch_add(1, Ordering::SeqCst).to_string()),
        };
        let mut stored = fact.clone();
        stored.id = Some(id.clone());
        guard.facts.insert(id.clone(), stored);
        Ok(id)
    }

    async fn get_fact(
        &self,
        target_id: &str,
        namespace: &str,
        key: &str,
    ) -> Result<Option<Fact>, StoreError> {
        let guard = self.inner.read().await;
        let now = Utc::now();
        Ok(guard
            .facts
            .values()
            .find(|f| f.target_id == target_id && f.namespace == namespace && f.key == key)
            .filter(|f| f.is_live(now))
            .cloned())
    }

    async fn list_facts(
        &self,
        target_id: Option<&str>,
        namespace: Option<&str>,
    ) -> Result<Vec<Fact>, StoreError> {
        let guard = self.inner.read().await;
        let now = Utc::now();
        Ok(guard
            .facts
            .values()
            .filter(|f| f.is_live(now))
            .filter(|f| target_id.map_or(true, |t| f.target_id == t))
            .filter(|f| namespace.map_or(true, |n| f.namespace == n))
            .cloned()
            .collect())
    }

    async fn delete_fact(&self, id: &FactId) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.facts.remove(id);
        Ok(())
    }

    async fn sweep_expired_facts(&self) -> Result<u64, StoreError> {
        let mut guard = self.inner.write().await;
        let now = Utc::now();
        let before = guard.facts.len();
        guard.facts.retain(|_, f| f.is_live(now));
        Ok((before - guard.facts.len()) as u64)
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let mut stored = entry.clone();
        stored.id = Some(self.next_audit_id.fetch_add(1, Ordering::SeqCst));
        guard.audit.push(stored);
        Ok(())
    }

    async fn list_audit(
        &self,
        action: Option<&str>,
        actor: Option<&str>,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .audit
            .iter()
            .filter(|e| action.map_or(true, |a| e.action == a))
            .filter(|e| actor.map_or(true, |a| e.actor == a))
            .cloned()
            .collect())
    }

    async fn lock_resource(&self, resource_id: &str, holder: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        match guard.locks.get(resource_id) {
            Some(existing) if existing != holder => {
                Err(StoreError::Conflict(format!("resource '{resource_id}' locked by '{existing}'")))
            }
            _ => {
                guard.locks.insert(resource_id.to_string(), holder.to_string());
                Ok(())
            }
        }
    }

    async fn unlock_resource(&self, resource_id: &str, holder: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if let Some(existing) = guard.locks.get(resource_id) {
            if existing == holder {
                guard.locks.remove(resource_id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_domain::{OperationType, ResourceId, Severity, EventType};

    fn dummy_run() -> Run {
        Run::new(strata_domain::PlanId::generate(), "tester")
    }

    #[tokio::test]
    async fn create_and_get_run() {
        let store = InMemoryStore::new();
        let run = dummy_run();
        store.create_run(&run).await.unwrap();
        let fetched = store.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, run.id);
    }

    #[tokio::test]
    async fn update_run_status_sets_ended_at_on_terminal() {
        let store = InMemoryStore::new();
        let run = dummy_run();
        store.create_run(&run).await.unwrap();
        store.update_run_status(&run.id, RunStatus::Succeeded).await.unwrap();
        let fetched = store.get_run(&run.id).await.unwrap().unwrap();
        assert!(fetched.ended_at.is_some());
    }

    #[tokio::test]
    async fn delete_run_cascades_plan_units_and_events() {
        let store = InMemoryStore::new();
        let run = dummy_run();
        store.create_run(&run).await.unwrap();
        let unit = PlanUnit::new(ResourceId::generate(), OperationType::Create);
        store.create_plan_unit(&run.id, &unit).await.unwrap();
        store
            .append_event(&Event::new(EventType::RunStarted, "x", Severity::Info).with_run(run.id.clone()))
            .await
            .unwrap();

        store.delete_run(&run.id).await.unwrap();
        assert!(store.get_run(&run.id).await.unwrap().is_none());
        assert!(store.list_plan_units(&run.id).await.unwrap().is_empty());
        assert!(store
            .query_events(EventFilter { run_id: Some(run.id.clone()), ..Default::default() })
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn resource_lock_conflicts_across_holders() {
        let store = InMemoryStore::new();
        store.lock_resource("vm-1", "run-a").await.unwrap();
        let err = store.lock_resource("vm-1", "run-b").await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        store.unlock_resource("vm-1", "run-a").await.unwrap();
        store.lock_resource("vm-1", "run-b").await.unwrap();
    }

    #[tokio::test]
    async fn fact_sweep_removes_expired_only() {
        let store = InMemoryStore::new();
        store
            .upsert_fact(&Fact::new("h1", "ns", "k1", serde_json::json!(1), 0))
            .await
            .unwrap();
        let mut expiring = Fact::new("h1", "ns", "k2", serde_json::json!(1), 1);
        expiring.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        store.upsert_fact(&expiring).await.unwrap();

        let removed = store.sweep_expired_facts().await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_fact("h1", "ns", "k1").await.unwrap().is_some());
        assert!(store.get_fact("h1", "ns", "k2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fact_upsert_overwrites_same_key() {
        let store = InMemoryStore::new();
        store
            .upsert_fact(&Fact::new("h1", "ns", "k1", serde_json::json!(1), 0))
            .await
            .unwrap();
        store
            .upsert_fact(&Fact::new("h1", "ns", "k1", serde_json::json!(2), 0))
            .await
            .unwrap();
        let facts = store.list_facts(Some("h1"), Some("ns")).await.unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].value, serde_json::json!(2));
    }
}
