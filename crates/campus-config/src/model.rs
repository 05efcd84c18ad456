use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the assistant service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub llm: LlmConfig,
    pub tools: ToolsConfig,
    pub cache: CacheConfig,
    pub streaming: StreamingConfig,
    pub intent: IntentConfig,
    /// Role name -> allowed tool groups. Merged over the built-in table.
    pub permissions: HashMap<String, Vec<String>>,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub cors_allow_any: bool,
    pub rate_limit: RateLimitConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3900,
            cors_allow_any: false,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub per_second: u64,
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second: 1,
            burst_size: 60,
        }
    }
}

/// Backing chat-completion service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub fast_model: String,
    pub thinking_model: String,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            fast_model: "doubao-seed-1-6-flash-250715".to_string(),
            thinking_model: "doubao-seed-1-6-thinking-250615".to_string(),
            max_retries: 3,
            retry_base_delay_ms: 1000,
            request_timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub max_tools_per_request: usize,
    pub tool_timeout_ms: u64,
    pub max_step_retries: u32,
    /// Tools always placed first in every selection.
    pub default_tools: Vec<String>,
    /// Tools used when selection or loading fails outright.
    pub fallback_tools: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            max_tools_per_request: 5,
            tool_timeout_ms: 30_000,
            max_step_retries: 2,
            default_tools: vec!["render_component".to_string()],
            fallback_tools: vec!["render_component".to_string(), "any_query".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub intent_ttl_secs: u64,
    pub intent_key_chars: usize,
    pub prompt_ttl_secs: u64,
    pub organization_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            intent_ttl_secs: 300,
            intent_key_chars: 50,
            prompt_ttl_secs: 600,
            organization_ttl_secs: 300,
            sweep_interval_secs: 60,
        }
    }
}

/// Pacing of the streamed answer. Not part of the wire protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub chunk_chars: usize,
    pub chunk_delay_ms: u64,
    pub thinking_step_delay_ms: u64,
    pub channel_buffer: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_chars: 4,
            chunk_delay_ms: 10,
            thinking_step_delay_ms: 0,
            channel_buffer: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentConfig {
    /// Keyword-tier confidence above which the model tier is skipped.
    pub keyword_threshold: f64,
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            keyword_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file backing the query tools. `None` means in-memory.
    pub path: Option<PathBuf>,
    /// Conversation memory lives apart from the business tables.
    /// Defaults to `<path stem>.memory.db` next to `path`.
    pub memory_path: Option<PathBuf>,
}

impl DatabaseConfig {
    pub fn memory_file(&self) -> Option<PathBuf> {
        self.memory_path
            .clone()
            .or_else(|| self.path.as_ref().map(|p| p.with_extension("memory.db")))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
}
