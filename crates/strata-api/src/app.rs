use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use strata_provider::ProviderRegistry;
use strata_scheduler::Scheduler;
use strata_store::StateStore;
use tower_http::trace::TraceLayer;

use crate::auth::require_token;
use crate::handlers;
use crate::state::AppState;

pub fn build_app(
    store: Arc<dyn StateStore>,
    providers: Arc<ProviderRegistry>,
    auth_token: Arc<String>,
) -> Router {
    let scheduler = Arc::new(Scheduler::new(store.clone(), providers.clone()));
    let state = AppState { store, scheduler, providers, auth_token };

    Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/runs", post(handlers::schedule_run))
        .route("/runs/:id", get(handlers::get_run))
        .route("/runs/:id/cancel", post(handlers::cancel_run))
        .route("/runs/:id/events", get(handlers::list_run_events))
        .route("/plans/:id/graph.dot", get(handlers::get_plan_graph))
        .route("/facts", get(handlers::list_facts))
        .route("/audit", get(handlers::list_audit))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
