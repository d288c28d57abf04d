use std::sync::Arc;

use axum::extract::FromRef;

use crate::config::Config;
use crate::services::{AttemptService, Poller, Scheduler};
use crate::store::{JobStore, Store};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub attempts: Arc<AttemptService>,
    pub jobs: Arc<dyn JobStore>,
    pub config: Config,
}

impl AppState {
    /// Wires the scheduler and attempt service onto one backing store.
    pub fn new<S: Store + 'static>(store: Arc<S>, config: Config) -> Self {
        let scheduler = Scheduler::new(store.clone());
        let attempts = Arc::new(AttemptService::new(store.clone(), scheduler));
        Self {
            store: store.clone(),
            attempts,
            jobs: store,
            config,
        }
    }

    /// The deadline poller delivering this state's jobs to its attempt service.
    pub fn poller(&self) -> Poller {
        Poller::new(
            self.jobs.clone(),
            self.attempts.clone(),
            self.config.scheduler_poll_interval,
            self.config.scheduler_batch_size,
            self.config.scheduler_claim_lease,
        )
    }
}

impl FromRef<AppState> for Arc<dyn Store> {
    fn from_ref(state: &AppState) -> Self {
        state.store.clone()
    }
}

impl FromRef<AppState> for Arc<AttemptService> {
    fn from_ref(state: &AppState) -> Self {
        state.attempts.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
