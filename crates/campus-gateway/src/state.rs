use std::sync::Arc;
use std::time::Instant;

use campus_agents::AssistantRuntime;
use campus_config::AppConfig;

/// Shared gateway state, cloned into every handler.
pub struct AppState {
    pub config: AppConfig,
    pub runtime: Arc<AssistantRuntime>,
    pub started_at: Instant,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(config: AppConfig, runtime: Arc<AssistantRuntime>) -> Self {
        Self {
            config,
            runtime,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
