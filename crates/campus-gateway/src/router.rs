use axum::Router;
use axum::routing::{get, post};

use crate::api;
use crate::state::SharedState;

/// Build the application router. Rate limiting, tracing and CORS are
/// layered on by [`crate::GatewayServer`].
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status))
        .route("/api/assistant/stream", post(api::stream_chat))
        .route("/api/assistant/chat", post(api::chat))
        .route(
            "/api/tools/cache",
            get(api::tool_cache_stats).delete(api::clear_tool_cache),
        )
        .route(
            "/api/prompt-cache/invalidate",
            post(api::invalidate_prompt_cache),
        )
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn status(
    axum::extract::State(state): axum::extract::State<SharedState>,
) -> axum::Json<serde_json::Value> {
    let runtime = &state.runtime;
    axum::Json(serde_json::json!({
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": state.uptime_secs(),
        "registeredTools": runtime.registry().stats().registered,
        "memory": runtime.has_memory_provider(),
        "fastModel": state.config.llm.fast_model,
        "thinkingModel": state.config.llm.thinking_model,
    }))
}
