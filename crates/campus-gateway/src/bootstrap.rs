use std::sync::Arc;
use std::time::Duration;

use campus_agents::{AssistantRuntime, LlmProvider, OpenAiProvider, ToolRegistry};
use campus_common::{Error, Result};
use campus_config::AppConfig;
use campus_db::{CampusStore, MemoryStore, SharedCampusStore, SqliteMemory};
use tracing::{info, warn};

/// Open the campus database named in the config, or an in-memory one.
pub fn open_store(config: &AppConfig, seed_demo: bool) -> Result<SharedCampusStore> {
    let store = match &config.database.path {
        Some(path) => CampusStore::open(path)?,
        None => {
            warn!("no database path configured; using an in-memory campus store");
            CampusStore::in_memory()?
        }
    };
    if seed_demo {
        if store.organization_status()?.total_classes == 0 {
            store.seed_demo()?;
            info!("demo data seeded");
        } else {
            info!("campus store already populated; demo seed skipped");
        }
    }
    Ok(store.into_shared())
}

fn open_memory(config: &AppConfig) -> Result<MemoryStore> {
    match config.database.memory_file() {
        Some(path) => MemoryStore::open(&path),
        None => MemoryStore::in_memory(),
    }
}

/// OpenAI-compatible provider from the `llm` section.
pub fn build_provider(config: &AppConfig) -> Result<Arc<dyn LlmProvider>> {
    let api_key = config
        .llm
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| {
            Error::Config("llm.api_key is not set (or CAMPUS_LLM_API_KEY)".to_string())
        })?;
    let provider = OpenAiProvider::with_timeout(
        api_key,
        config.llm.base_url.clone(),
        Duration::from_secs(config.llm.request_timeout_secs.max(1)),
    );
    Ok(Arc::new(provider))
}

/// Wire the runtime with its store, tools, memory and organization source.
pub fn build_runtime(
    config: &AppConfig,
    provider: Arc<dyn LlmProvider>,
    store: SharedCampusStore,
) -> Result<Arc<AssistantRuntime>> {
    let registry = Arc::new(ToolRegistry::with_builtin_tools(store.clone(), &config.tools));
    let mut runtime = AssistantRuntime::new(provider, registry, config);
    runtime.set_organization_source(Arc::new(store));
    runtime.set_memory_provider(Arc::new(SqliteMemory::new(open_memory(config)?)));
    info!(
        tools = runtime.registry().stats().registered,
        "assistant runtime ready"
    );
    Ok(Arc::new(runtime))
}
