use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use strata_domain::{Plan, RunId};
use strata_scheduler::ScheduleOptions;
use strata_store::EventFilter;

use crate::error::ApiError;
use crate::state::AppState;

// ── Health ───────────────────────────────────────────────────────────────────

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn ready(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.store.health().await?;
    Ok(StatusCode::OK)
}

// ── Runs ─────────────────────────────────────────────────────────────────────

fn default_user() -> String {
    "api".to_string()
}

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub plan: Plan,
    #[serde(default)]
    pub max_parallel: i32,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default = "default_user")]
    pub user: String,
}

pub async fn schedule_run(
    State(state): State<AppState>,
    Json(body): Json<ScheduleRequest>,
) -> Result<Json<Value>, ApiError> {
    let options = ScheduleOptions {
        max_parallel: body.max_parallel,
        start_delay: None,
        dry_run: body.dry_run,
        fail_fast: body.fail_fast,
        user: body.user,
    };
    let run_id = state.scheduler.schedule(body.plan, options).await?;
    Ok(Json(json!({ "run_id": run_id })))
}

pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let run_id = RunId::new(id.clone());
    let run = state
        .store
        .get_run(&run_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("run '{id}' not found")))?;
    Ok(Json(json!(run)))
}

pub async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let run_id = RunId::new(id);
    state.scheduler.cancel(&run_id).await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub level: Option<u32>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

pub async fn list_run_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<EventsQuery>,
) -> Result<Json<Value>, ApiError> {
    let run_id = RunId::new(id);
    let filter = EventFilter {
        run_id: Some(run_id),
        plan_unit_id: None,
        level: q.level,
        limit: q.limit.unwrap_or(100),
        offset: q.offset.unwrap_or(0),
    };
    let events = state.store.query_events(filter).await?;
    Ok(Json(json!(events)))
}

// ── Plans ────────────────────────────────────────────────────────────────────

/// Renders the DAG for the plan that backs the given run, as Graphviz DOT.
/// Plans aren't stored as a standalone entity — their units persist
/// alongside the run they were scheduled under, so the DAG is rebuilt
/// from those units rather than read back verbatim.
pub async fn get_plan_graph(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let run_id = RunId::new(id.clone());
    let mut units = state.store.list_plan_units(&run_id).await?;
    if units.is_empty() {
        return Err(ApiError::not_found(format!("no plan units found for run '{id}'")));
    }
    let graph = strata_graph::build_graph(&mut units)?;
    let dot = strata_graph::render_dot(&units, &graph);
    Ok((StatusCode::OK, [(axum::http::header::CONTENT_TYPE, "text/vnd.graphviz")], dot).into_response())
}

// ── Facts ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct FactsQuery {
    pub target_id: Option<String>,
    pub namespace: Option<String>,
}

pub async fn list_facts(
    State(state): State<AppState>,
    Query(q): Query<FactsQuery>,
) -> Result<Json<Value>, ApiError> {
    let facts = state
        .store
        .list_facts(q.target_id.as_deref(), q.namespace.as_deref())
        .await?;
    Ok(Json(json!(facts)))
}

// ── Audit ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub action: Option<String>,
    pub actor: Option<String>,
}

pub async fn list_audit(
    State(state): State<AppState>,
    Query(q): Query<AuditQuery>,
) -> Result<Json<Value>, ApiError> {
    let entries = state
        .store
        .list_audit(q.action.as_deref(), q.actor.as_deref())
        .await?;
    Ok(Json(json!(entries)))
}
