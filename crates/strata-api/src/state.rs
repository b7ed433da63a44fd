use std::sync::Arc;

use strata_provider::ProviderRegistry;
use strata_scheduler::Scheduler;
use strata_store::StateStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StateStore>,
    pub scheduler: Arc<Scheduler>,
    pub providers: Arc<ProviderRegistry>,
    pub auth_token: Arc<String>,
}
