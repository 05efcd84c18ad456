pub mod loader;
pub mod model;

pub use loader::ConfigLoader;
pub use model::{
    AppConfig, CacheConfig, DatabaseConfig, GatewayConfig, IntentConfig, LlmConfig,
    LoggingConfig, RateLimitConfig, StreamingConfig, ToolsConfig,
};
