use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use strata_domain::{
    AuditEntry, Change, Dependency, Event, EventId, EventType, Fact, FactId, OperationType,
    PlanUnit, PlanUnitId, PlanUnitStatus, ResourceId, ResourceStateRecord, Run, RunCounters,
    RunId, RunStatus, Severity,
};

use crate::error::{map_sqlx_err, StoreError};
use crate::store::{EventFilter, StateStore};

const MIGRATIONS: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
    id          TEXT PRIMARY KEY,
    plan_id     TEXT NOT NULL,
    status      TEXT NOT NULL,
    started_at  TEXT,
    ended_at    TEXT,
    total       INTEGER NOT NULL DEFAULT 0,
    succeeded   INTEGER NOT NULL DEFAULT 0,
    failed      INTEGER NOT NULL DEFAULT 0,
    skipped     INTEGER NOT NULL DEFAULT 0,
    pending     INTEGER NOT NULL DEFAULT 0,
    running     INTEGER NOT NULL DEFAULT 0,
    user        TEXT NOT NULL,
    updated_at  TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS plan_units (
    id               TEXT PRIMARY KEY,
    run_id           TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
    resource_id      TEXT NOT NULL,
    resource_name    TEXT NOT NULL DEFAULT '',
    operation        TEXT NOT NULL,
    status           TEXT NOT NULL,
    desired          TEXT NOT NULL,
    actual           TEXT NOT NULL,
    changes          TEXT NOT NULL,
    provider_name    TEXT NOT NULL,
    provider_version TEXT NOT NULL,
    dependencies     TEXT NOT NULL,
    execution_order  INTEGER,
    timeout_secs     INTEGER NOT NULL,
    max_retries      INTEGER NOT NULL,
    retries          INTEGER NOT NULL DEFAULT 0,
    result           TEXT,
    error            TEXT,
    created_at       TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at       TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_plan_units_run ON plan_units (run_id, created_at);

CREATE TABLE IF NOT EXISTS events (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    type         TEXT NOT NULL,
    timestamp    TEXT NOT NULL,
    run_id       TEXT,
    plan_unit_id TEXT,
    resource_id  TEXT,
    message      TEXT NOT NULL,
    severity     TEXT NOT NULL,
    details      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_run ON events (run_id);
CREATE INDEX IF NOT EXISTS idx_events_unit ON events (plan_unit_id);

CREATE TABLE IF NOT EXISTS resource_state (
    type         TEXT NOT NULL,
    name         TEXT NOT NULL,
    state        TEXT NOT NULL,
    hash         TEXT NOT NULL,
    last_run_id  TEXT REFERENCES runs(id) ON DELETE RESTRICT,
    last_applied TEXT NOT NULL,
    PRIMARY KEY (type, name)
);
CREATE INDEX IF NOT EXISTS idx_resource_state_applied ON resource_state (last_applied DESC);

CREATE TABLE IF NOT EXISTS facts (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    target_id  TEXT NOT NULL,
    namespace  TEXT NOT NULL,
    key        TEXT NOT NULL,
    value      TEXT NOT NULL,
    ttl_secs   INTEGER NOT NULL,
    expires_at TEXT,
    updated_at TEXT NOT NULL,
    UNIQUE (target_id, namespace, key)
);

CREATE TABLE IF NOT EXISTS audit (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    action    TEXT NOT NULL,
    actor     TEXT NOT NULL,
    target_id TEXT,
    details   TEXT NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS resource_locks (
    resource_id TEXT PRIMARY KEY,
    holder      TEXT NOT NULL,
    acquired_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', 1);
"#;

/// Persistent state store backed by a single-file SQLite database.
///
/// WAL journaling mode favours concurrent readers with serialized writers;
/// foreign keys are enforced so deleting a run cascades to its plan units.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if absent) the database at `path` and runs migrations.
    pub async fn open(path: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Internal(format!("invalid sqlite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Internal(format!("sqlite connect: {e}")))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Opens a private in-memory database — useful for tests that want the
    /// real SQL path without touching the filesystem.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::open("sqlite::memory:", 1).await
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(MIGRATIONS)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_err(e, "migration"))?;
        Ok(())
    }
}

fn ser_enum<T: Serialize>(v: &T) -> String {
    match serde_json::to_value(v).expect("enum serialization is infallible") {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

fn de_enum<T: DeserializeOwned>(s: &str) -> Result<T, StoreError> {
    serde_json::from_value(serde_json::Value::String(s.to_string())).map_err(StoreError::from)
}

fn to_json<T: Serialize>(v: &T) -> Result<String, StoreError> {
    serde_json::to_string(v).map_err(StoreError::from)
}

fn from_json<T: DeserializeOwned>(s: &str) -> Result<T, StoreError> {
    serde_json::from_str(s).map_err(StoreError::from)
}

fn run_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Run, StoreError> {
    Ok(Run {
        id: RunId::new(row.try_get::<String, _>("id").map_err(|e| map_sqlx_err(e, "run.id"))?),
        plan_id: strata_domain::PlanId::new(
            row.try_get::<String, _>("plan_id").map_err(|e| map_sqlx_err(e, "run.plan_id"))?,
        ),
        status: de_enum(&row.try_get::<String, _>("status").map_err(|e| map_sqlx_err(e, "run.status"))?)?,
        started_at: row
            .try_get::<Option<DateTime<Utc>>, _>("started_at")
            .map_err(|e| map_sqlx_err(e, "run.started_at"))?,
        ended_at: row
            .try_get::<Option<DateTime<Utc>>, _>("ended_at")
            .map_err(|e| map_sqlx_err(e, "run.ended_at"))?,
        counters: RunCounters {
            total: row.try_get::<i64, _>("total").unwrap_or_default() as u32,
            succeeded: row.try_get::<i64, _>("succeeded").unwrap_or_default() as u32,
            failed: row.try_get::<i64, _>("failed").unwrap_or_default() as u32,
            skipped: row.try_get::<i64, _>("skipped").unwrap_or_default() as u32,
            pending: row.try_get::<i64, _>("pending").unwrap_or_default() as u32,
            running: row.try_get::<i64, _>("running").unwrap_or_default() as u32,
        },
        user: row.try_get::<String, _>("user").map_err(|e| map_sqlx_err(e, "run.user"))?,
    })
}

fn plan_unit_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<PlanUnit, StoreError> {
    let changes: Vec<Change> = from_json(&row.try_get::<String, _>("changes").unwrap())?;
    let dependencies: Vec<Dependency> = from_json(&row.try_get::<String, _>("dependencies").unwrap())?;
    let result_raw: Option<String> = row.try_get("result").unwrap_or(None);
    let error_raw: Option<String> = row.try_get("error").unwrap_or(None);
    let mut result = match result_raw {
        Some(r) => Some(from_json::<serde_json::Value>(&r)?),
        None => None,
    };
    if let Some(err) = error_raw {
        result = Some(serde_json::json!({ "error": err }));
    }

    Ok(PlanUnit {
        id: PlanUnitId::new(row.try_get::<String, _>("id").unwrap()),
        resource_id: ResourceId::new(row.try_get::<String, _>("resource_id").unwrap()),
        resource_name: row.try_get::<String, _>("resource_name").unwrap_or_default(),
        operation: de_enum(&row.try_get::<String, _>("operation").unwrap())?,
        status: de_enum(&row.try_get::<String, _>("status").unwrap())?,
        desired: from_json(&row.try_get::<String, _>("desired").unwrap())?,
        actual: from_json(&row.try_get::<String, _>("actual").unwrap())?,
        changes,
        provider_name: row.try_get::<String, _>("provider_name").unwrap(),
        provider_version: row.try_get::<String, _>("provider_version").unwrap(),
        dependencies,
        execution_order: row.try_get::<Option<i64>, _>("execution_order").unwrap_or(None).map(|v| v as u32),
        timeout_secs: row.try_get::<i64, _>("timeout_secs").unwrap() as u64,
        max_retries: row.try_get::<i64, _>("max_retries").unwrap() as u32,
        retries: row.try_get::<i64, _>("retries").unwrap() as u32,
        result,
    })
}

fn event_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Event, StoreError> {
    Ok(Event {
        id: Some(EventId::new(row.try_get::<i64, _>("id").unwrap().to_string())),
        r#type: de_enum::<EventType>(&row.try_get::<String, _>("type").unwrap())?,
        timestamp: row.try_get::<DateTime<Utc>, _>("timestamp").unwrap(),
        run_id: row.try_get::<Option<String>, _>("run_id").unwrap_or(None).map(RunId::new),
        plan_unit_id: row
            .try_get::<Option<String>, _>("plan_unit_id")
            .unwrap_or(None)
            .map(PlanUnitId::new),
        resource_id: row
            .try_get::<Option<String>, _>("resource_id")
            .unwrap_or(None)
            .map(ResourceId::new),
        message: row.try_get::<String, _>("message").unwrap(),
        severity: de_enum::<Severity>(&row.try_get::<String, _>("severity").unwrap())?,
        details: from_json(&row.try_get::<String, _>("details").unwrap())?,
    })
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn health(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_err(e, "health"))?;
        Ok(())
    }

    // ── Runs ─────────────────────────────────────────────────────────────

    async fn create_run(&self, run: &Run) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO runs (id, plan_id, status, started_at, ended_at, total, succeeded,
                failed, skipped, pending, running, user, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
        )
        .bind(run.id.as_str())
        .bind(run.plan_id.as_str())
        .bind(ser_enum(&run.status))
        .bind(run.started_at)
        .bind(run.ended_at)
        .bind(run.counters.total as i64)
        .bind(run.counters.succeeded as i64)
        .bind(run.counters.failed as i64)
        .bind(run.counters.skipped as i64)
        .bind(run.counters.pending as i64)
        .bind(run.counters.running as i64)
        .bind(&run.user)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_err(e, "create_run"))?;
        Ok(())
    }

    async fn get_run(&self, id: &RunId) -> Result<Option<Run>, StoreError> {
        let row = sqlx::query("SELECT * FROM runs WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_err(e, "get_run"))?;
        row.map(|r| run_from_row(&r)).transpose()
    }

    async fn update_run_status(&self, id: &RunId, status: RunStatus) -> Result<(), StoreError> {
        if self.get_run(id).await?.is_none() {
            return Err(StoreError::NotFound(format!("run {id}")));
        }
        if status.terminal() {
            sqlx::query(
                "UPDATE runs SET status = ?, ended_at = datetime('now'), updated_at = datetime('now')
                 WHERE id = ?",
            )
            .bind(ser_enum(&status))
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_err(e, "update_run_status"))?;
        } else {
            sqlx::query("UPDATE runs SET status = ?, updated_at = datetime('now') WHERE id = ?")
                .bind(ser_enum(&status))
                .bind(id.as_str())
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_err(e, "update_run_status"))?;
        }
        Ok(())
    }

    async fn list_runs(&self, limit: u32, offset: u32) -> Result<Vec<Run>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM runs ORDER BY started_at DESC, id DESC LIMIT ? OFFSET ?",
        )
        .bind(if limit == 0 { i64::MAX } else { limit as i64 })
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_err(e, "list_runs"))?;
        rows.iter().map(run_from_row).collect()
    }

    async fn delete_run(&self, id: &RunId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM runs WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_err(e, "delete_run"))?;
        Ok(())
    }

    // ── Plan units ───────────────────────────────────────────────────────

    async fn create_plan_unit(&self, run_id: &RunId, unit: &PlanUnit) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO plan_units (id, run_id, resource_id, resource_name, operation, status, desired, actual,
                changes, provider_name, provider_version, dependencies, execution_order,
                timeout_secs, max_retries, retries, result, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'), datetime('now'))",
        )
        .bind(unit.id.as_str())
        .bind(run_id.as_str())
        .bind(unit.resource_id.as_str())
        .bind(&unit.resource_name)
        .bind(ser_enum(&unit.operation))
        .bind(ser_enum(&unit.status))
        .bind(to_json(&unit.desired)?)
        .bind(to_json(&unit.actual)?)
        .bind(to_json(&unit.changes)?)
        .bind(&unit.provider_name)
        .bind(&unit.provider_version)
        .bind(to_json(&unit.dependencies)?)
        .bind(unit.execution_order.map(|v| v as i64))
        .bind(unit.timeout_secs as i64)
        .bind(unit.max_retries as i64)
        .bind(unit.retries as i64)
        .bind(unit.result.as_ref().map(to_json).transpose()?)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_err(e, "create_plan_unit"))?;
        Ok(())
    }

    async fn get_plan_unit(&self, id: &PlanUnitId) -> Result<Option<PlanUnit>, StoreError> {
        let row = sqlx::query("SELECT * FROM plan_units WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_err(e, "get_plan_unit"))?;
        row.map(|r| plan_unit_from_row(&r)).transpose()
    }

    async fn update_plan_unit_status(
        &self,
        id: &PlanUnitId,
        status: PlanUnitStatus,
        actual: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        if self.get_plan_unit(id).await?.is_none() {
            return Err(StoreError::NotFound(format!("plan unit {id}")));
        }
        sqlx::query(
            "UPDATE plan_units SET status = ?,
                actual = COALESCE(?, actual),
                error = COALESCE(?, error),
                updated_at = datetime('now')
             WHERE id = ?",
        )
        .bind(ser_enum(&status))
        .bind(actual.as_ref().map(to_json).transpose()?)
        .bind(error)
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_err(e, "update_plan_unit_status"))?;
        Ok(())
    }

    async fn list_plan_units(&self, run_id: &RunId) -> Result<Vec<PlanUnit>, StoreError> {
        let rows = sqlx::query("SELECT * FROM plan_units WHERE run_id = ? ORDER BY created_at, id")
            .bind(run_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_err(e, "list_plan_units"))?;
        rows.iter().map(plan_unit_from_row).collect()
    }

    async fn delete_plan_unit(&self, id: &PlanUnitId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM plan_units WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_err(e, "delete_plan_unit"))?;
        Ok(())
    }

    async fn increment_retries(&self, id: &PlanUnitId) -> Result<u32, StoreError> {
        sqlx::query(
            "UPDATE plan_units SET retries = retries + 1, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_err(e, "increment_retries"))?;
        let unit = self
            .get_plan_unit(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("plan unit {id}")))?;
        Ok(unit.retries)
    }

    // ── Events ───────────────────────────────────────────────────────────

    async fn append_event(&self, event: &Event) -> Result<EventId, StoreError> {
        let result = sqlx::query(
            "INSERT INTO events (type, timestamp, run_id, plan_unit_id, resource_id, message,
                severity, details)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(ser_enum(&event.r#type))
        .bind(event.timestamp)
        .bind(event.run_id.as_ref().map(|v| v.as_str()))
        .bind(event.plan_unit_id.as_ref().map(|v| v.as_str()))
        .bind(event.resource_id.as_ref().map(|v| v.as_str()))
        .bind(&event.message)
        .bind(ser_enum(&event.severity))
        .bind(to_json(&event.details)?)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_err(e, "append_event"))?;
        Ok(EventId::new(result.last_insert_rowid().to_string()))
    }

    async fn query_events(&self, filter: EventFilter) -> Result<Vec<Event>, StoreError> {
        let mut sql = String::from("SELECT events.* FROM events");
        let mut joined_units = false;
        if filter.level.is_some() {
            sql.push_str(" JOIN plan_units ON plan_units.id = events.plan_unit_id");
            joined_units = true;
        }
        let mut clauses = Vec::new();
        if filter.run_id.is_some() {
            clauses.push("events.run_id = ?".to_string());
        }
        if filter.plan_unit_id.is_some() {
            clauses.push("events.plan_unit_id = ?".to_string());
        }
        if filter.level.is_some() {
            clauses.push("plan_units.execution_order = ?".to_string());
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY events.id LIMIT ? OFFSET ?");
        let _ = joined_units;

        let mut query = sqlx::query(&sql);
        if let Some(run_id) = &filter.run_id {
            query = query.bind(run_id.as_str());
        }
        if let Some(unit_id) = &filter.plan_unit_id {
            query = query.bind(unit_id.as_str());
        }
        if let Some(level) = filter.level {
            query = query.bind(level as i64);
        }
        query = query
            .bind(if filter.limit == 0 { i64::MAX } else { filter.limit as i64 })
            .bind(filter.offset as i64);

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_err(e, "query_events"))?;
        rows.iter().map(event_from_row).collect()
    }

    // ── Resource state ───────────────────────────────────────────────────

    async fn upsert_resource_state(&self, record: &ResourceStateRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO resource_state (type, name, state, hash, last_run_id, last_applied)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (type, name) DO UPDATE SET
                state = excluded.state, hash = excluded.hash,
                last_run_id = excluded.last_run_id, last_applied = excluded.last_applied",
        )
        .bind(&record.r#type)
        .bind(&record.name)
        .bind(to_json(&record.state)?)
        .bind(&record.hash)
        .bind(record.last_run_id.as_ref().map(|v| v.as_str()))
        .bind(record.last_applied)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_err(e, "upsert_resource_state"))?;
        Ok(())
    }

    async fn get_resource_state(
        &self,
        r#type: &str,
        name: &str,
    ) -> Result<Option<ResourceStateRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM resource_state WHERE type = ? AND name = ?")
            .bind(r#type)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_err(e, "get_resource_state"))?;
        row.map(|r| resource_state_from_row(&r)).transpose()
    }

    async fn list_resource_state(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ResourceStateRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM resource_state ORDER BY last_applied DESC LIMIT ? OFFSET ?",
        )
        .bind(if limit == 0 { i64::MAX } else { limit as i64 })
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_err(e, "list_resource_state"))?;
        rows.iter().map(resource_state_from_row).collect()
    }

    async fn delete_resource_state(&self, r#type: &str, name: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM resource_state WHERE type = ? AND name = ?")
            .bind(r#type)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_err(e, "delete_resource_state"))?;
        Ok(())
    }

    // ── Facts ────────────────────────────────────────────────────────────

    async fn upsert_fact(&self, fact: &Fact) -> Result<FactId, StoreError> {
        let row = sqlx::query(
            "INSERT INTO facts (target_id, namespace, key, value, ttl_secs, expires_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (target_id, namespace, key) DO UPDATE SET
                value = excluded.value, ttl_secs = excluded.ttl_secs,
                expires_at = excluded.expires_at, updated_at = excluded.updated_at
             RETURNING id",
        )
        .bind(&fact.target_id)
        .bind(&fact.namespace)
        .bind(&fact.key)
        .bind(to_json(&fact.value)?)
        .bind(fact.ttl_secs as i64)
        .bind(fact.expires_at)
        .bind(fact.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_err(e, "upsert_fact"))?;
        Ok(FactId::new(row.try_get::<i64, _>("id").unwrap().to_string()))
    }

    async fn get_fact(
        &self,
        target_id: &str,
        namespace: &str,
        key: &str,
    ) -> Result<Option<Fact>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM facts WHERE target_id = ? AND namespace = ? AND key = ?
             AND (expires_at IS NULL OR expires_at > datetime('now'))",
        )
        .bind(target_id)
        .bind(namespace)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_err(e, "get_fact"))?;
        row.map(|r| fact_from_row(&r)).transpose()
    }

    async fn list_facts(
        &self,
        target_id: Option<&str>,
        namespace: Option<&str>,
    ) -> Result<Vec<Fact>, StoreError> {
        let mut sql = String::from(
            "SELECT * FROM facts WHERE (expires_at IS NULL OR expires_at > datetime('now'))",
        );
        if target_id.is_some() {
            sql.push_str(" AND target_id = ?");
        }
        if namespace.is_some() {
            sql.push_str(" AND namespace = ?");
        }
        let mut query = sqlx::query(&sql);
        if let Some(t) = target_id {
            query = query.bind(t);
        }
        if let Some(n) = namespace {
            query = query.bind(n);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_err(e, "list_facts"))?;
        rows.iter().map(fact_from_row).collect()
    }

    async fn delete_fact(&self, id: &FactId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM facts WHERE id = ?")
            .bind(id.as_str().parse::<i64>().unwrap_or(-1))
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_err(e, "delete_fact"))?;
        Ok(())
    }

    async fn sweep_expired_facts(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM facts WHERE expires_at IS NOT NULL AND expires_at <= datetime('now')")
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_err(e, "sweep_expired_facts"))?;
        Ok(result.rows_affected())
    }

    // ── Audit ────────────────────────────────────────────────────────────

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO audit (action, actor, target_id, details, timestamp)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&entry.action)
        .bind(&entry.actor)
        .bind(&entry.target_id)
        .bind(to_json(&entry.details)?)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_err(e, "append_audit"))?;
        Ok(())
    }

    async fn list_audit(
        &self,
        action: Option<&str>,
        actor: Option<&str>,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let mut sql = String::from("SELECT * FROM audit WHERE 1=1");
        if action.is_some() {
            sql.push_str(" AND action = ?");
        }
        if actor.is_some() {
            sql.push_str(" AND actor = ?");
        }
        sql.push_str(" ORDER BY id DESC");
        let mut query = sqlx::query(&sql);
        if let Some(a) = action {
            query = query.bind(a);
        }
        if let Some(a) = actor {
            query = query.bind(a);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_err(e, "list_audit"))?;
        rows.iter()
            .map(|row| {
                Ok(AuditEntry {
                    id: Some(row.try_get::<i64, _>("id").unwrap() as u64),
                    action: row.try_get::<String, _>("action").unwrap(),
                    actor: row.try_get::<String, _>("actor").unwrap(),
                    target_id: row.try_get::<Option<String>, _>("target_id").unwrap_or(None),
                    details: from_json(&row.try_get::<String, _>("details").unwrap())?,
                    timestamp: row.try_get::<DateTime<Utc>, _>("timestamp").unwrap(),
                })
            })
            .collect()
    }

    // ── Advisory locks ───────────────────────────────────────────────────

    async fn lock_resource(&self, resource_id: &str, holder: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO resource_locks (resource_id, holder, acquired_at)
             VALUES (?, ?, datetime('now'))
             ON CONFLICT (resource_id) DO NOTHING",
        )
        .bind(resource_id)
        .bind(holder)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_err(e, "lock_resource"))?;

        if result.rows_affected() == 0 {
            let row = sqlx::query("SELECT holder FROM resource_locks WHERE resource_id = ?")
                .bind(resource_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| map_sqlx_err(e, "lock_resource"))?;
            let current: String = row.try_get("holder").unwrap();
            if current != holder {
                return Err(StoreError::Conflict(format!(
                    "resource '{resource_id}' locked by '{current}'"
                )));
            }
        }
        Ok(())
    }

    async fn unlock_resource(&self, resource_id: &str, holder: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM resource_locks WHERE resource_id = ? AND holder = ?")
            .bind(resource_id)
            .bind(holder)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_err(e, "unlock_resource"))?;
        Ok(())
    }
}

fn resource_state_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ResourceStateRecord, StoreError> {
    Ok(ResourceStateRecord {
        r#type: row.try_get::<String, _>("type").unwrap(),
        name: row.try_get::<String, _>("name").unwrap(),
        state: from_json(&row.try_get::<String, _>("state").unwrap())?,
        hash: row.try_get::<String, _>("hash").unwrap(),
        last_run_id: row.try_get::<Option<String>, _>("last_run_id").unwrap_or(None).map(RunId::new),
        last_applied: row.try_get::<DateTime<Utc>, _>("last_applied").unwrap(),
    })
}

fn fact_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Fact, StoreError> {
    Ok(Fact {
        id: Some(FactId::new(row.try_get::<i64, _>("id").unwrap().to_string())),
        target_id: row.try_get::<String, _>("target_id").unwrap(),
        namespace: row.try_get::<String, _>("namespace").unwrap(),
        key: row.try_get::<String, _>("key").unwrap(),
        value: from_json(&row.try_get::<String, _>("value").unwrap())?,
        ttl_secs: row.try_get::<i64, _>("ttl_secs").unwrap() as u64,
        expires_at: row.try_get::<Option<DateTime<Utc>>, _>("expires_at").unwrap_or(None),
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at").unwrap(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_domain::{EventType, OperationType, ResourceId, Severity};

    async fn store() -> SqliteStore {
        SqliteStore::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn create_and_get_run() {
        let store = store().await;
        let run = Run::new(strata_domain::PlanId::generate(), "tester");
        store.create_run(&run).await.unwrap();
        let fetched = store.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, run.id);
        assert_eq!(fetched.status, RunStatus::Pending);
    }

    #[tokio::test]
    async fn update_run_status_sets_ended_at_on_terminal() {
        let store = store().await;
        let run = Run::new(strata_domain::PlanId::generate(), "tester");
        store.create_run(&run).await.unwrap();
        store.update_run_status(&run.id, RunStatus::Succeeded).await.unwrap();
        let fetched = store.get_run(&run.id).await.unwrap().unwrap();
        assert!(fetched.ended_at.is_some());
        assert_eq!(fetched.status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn delete_run_cascades_to_plan_units_and_events() {
        let store = store().await;
        let run = Run::new(strata_domain::PlanId::generate(), "tester");
        store.create_run(&run).await.unwrap();
        let unit = PlanUnit::new(ResourceId::generate(), OperationType::Create);
        store.create_plan_unit(&run.id, &unit).await.unwrap();
        store
            .append_event(&Event::new(EventType::RunStarted, "go", Severity::Info).with_run(run.id.clone()))
            .await
            .unwrap();

        store.delete_run(&run.id).await.unwrap();
        assert!(store.get_plan_unit(&unit.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resource_state_upsert_is_idempotent_on_key() {
        let store = store().await;
        let mut record = ResourceStateRecord {
            r#type: "vm".into(),
            name: "web-1".into(),
            state: serde_json::json!({"v": 1}),
            hash: "h1".into(),
            last_run_id: None,
            last_applied: Utc::now(),
        };
        store.upsert_resource_state(&record).await.unwrap();
        record.state = serde_json::json!({"v": 2});
        record.hash = "h2".into();
        store.upsert_resource_state(&record).await.unwrap();

        let fetched = store.get_resource_state("vm", "web-1").await.unwrap().unwrap();
        assert_eq!(fetched.hash, "h2");
        assert_eq!(store.list_resource_state(0, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fact_liveness_filters_expired_rows() {
        let store = store().await;
        store
            .upsert_fact(&Fact::new("h1", "ns", "live", serde_json::json!(1), 0))
            .await
            .unwrap();
        let mut expired = Fact::new("h1", "ns", "dead", serde_json::json!(1), 1);
        expired.expires_at = Some(Utc::now() - chrono::Duration::seconds(5));
        store.upsert_fact(&expired).await.unwrap();

        assert!(store.get_fact("h1", "ns", "dead").await.unwrap().is_none());
        assert!(store.get_fact("h1", "ns", "live").await.unwrap().is_some());

        let swept = store.sweep_expired_facts().await.unwrap();
        assert_eq!(swept, 1);
    }

    #[tokio::test]
    async fn lock_resource_conflicts_on_second_holder() {
        let store = store().await;
        store.lock_resource("vm-1", "run-a").await.unwrap();
        let err = store.lock_resource("vm-1", "run-b").await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        store.unlock_resource("vm-1", "run-a").await.unwrap();
        store.lock_resource("vm-1", "run-b").await.unwrap();
    }

    #[tokio::test]
    async fn increment_retries_returns_new_count() {
        let store = store().await;
        let run = Run::new(strata_domain::PlanId::generate(), "tester");
        store.create_run(&run).await.unwrap();
        let unit = PlanUnit::new(ResourceId::generate(), OperationType::Create);
        store.create_plan_unit(&run.id, &unit).await.unwrap();

        let retries = store.increment_retries(&unit.id).await.unwrap();
        assert_eq!(retries, 1);
        let retries = store.increment_retries(&unit.id).await.unwrap();
        assert_eq!(retries, 2);
    }
}
