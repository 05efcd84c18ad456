use std::sync::Arc;
use std::time::Duration;

use campus_common::{Error, Result};
use campus_config::LlmConfig;
use tracing::{debug, warn};

use crate::intent::Complexity;
use crate::providers::{
    ChatMessage, LlmProvider, LlmRequest, LlmResponse, ToolChoice, ToolDefinition,
};

/// Which backing model family a call goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    /// Flash model: decisions, narration, simple answers.
    Fast,
    /// Flash model with a larger budget when think optimisation is on.
    FlashThink,
    /// Deep reasoning model for complex requests.
    Thinking,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelPreset {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// One chat call. Sampling fields override the tier preset when set.
#[derive(Debug, Clone, Default)]
pub struct ChatParams {
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: Option<ToolChoice>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

impl ChatParams {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        if !tools.is_empty() {
            self.tool_choice = Some(ToolChoice::Auto);
        }
        self.tools = tools;
        self
    }

    pub fn with_sampling(mut self, temperature: f64, max_tokens: u32) -> Self {
        self.temperature = Some(temperature);
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// User-facing category of a backing-model failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFailureKind {
    ServiceUnavailable,
    RateLimited,
    Authentication,
    Timeout,
    Connection,
    Generic,
}

impl ProviderFailureKind {
    pub fn classify(error: &Error) -> Self {
        let message = error.to_string().to_ascii_lowercase();
        let status = error.status().or_else(|| extract_status_code(&message));
        match status {
            Some(401 | 403) => return Self::Authentication,
            Some(429) => return Self::RateLimited,
            Some(500..=599) => return Self::ServiceUnavailable,
            Some(_) => return Self::Generic,
            None => {}
        }

        if message.contains("timed out") || message.contains("timeout") {
            Self::Timeout
        } else if message.contains("connection refused")
            || message.contains("econnrefused")
            || message.contains("connection reset")
            || message.contains("dns error")
        {
            Self::Connection
        } else {
            Self::Generic
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::ServiceUnavailable => "AI服务暂时繁忙，请稍后再试。",
            Self::RateLimited => "请求过于频繁，请稍后再试。",
            Self::Authentication => "AI服务认证失败，请联系管理员检查配置。",
            Self::Timeout => "AI服务响应超时，请稍后再试。",
            Self::Connection => "无法连接到AI服务，请检查网络后重试。",
            Self::Generic => "抱歉，处理您的请求时出现问题，请稍后再试。",
        }
    }
}

/// Chooses a model per call and retries transient server failures.
pub struct ModelRouter {
    provider: Arc<dyn LlmProvider>,
    fast_model: String,
    thinking_model: String,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl ModelRouter {
    pub fn new(provider: Arc<dyn LlmProvider>, config: &LlmConfig) -> Self {
        Self {
            provider,
            fast_model: config.fast_model.clone(),
            thinking_model: config.thinking_model.clone(),
            max_retries: config.max_retries.max(1),
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    pub fn set_retry_base_delay(&mut self, delay: Duration) {
        self.retry_base_delay = delay;
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Tier for answering a request of the given complexity.
    pub fn tier_for(complexity: Complexity, think_optimized: bool) -> ModelTier {
        match complexity {
            Complexity::Simple => ModelTier::Fast,
            Complexity::Moderate if think_optimized => ModelTier::FlashThink,
            Complexity::Moderate => ModelTier::Fast,
            Complexity::Complex | Complexity::VeryComplex => ModelTier::Thinking,
        }
    }

    pub fn preset(&self, tier: ModelTier) -> ModelPreset {
        match tier {
            ModelTier::Fast => ModelPreset {
                model: self.fast_model.clone(),
                temperature: 0.1,
                max_tokens: 1024,
            },
            ModelTier::FlashThink => ModelPreset {
                model: self.fast_model.clone(),
                temperature: 0.7,
                max_tokens: 2000,
            },
            ModelTier::Thinking => ModelPreset {
                model: self.thinking_model.clone(),
                temperature: 0.7,
                max_tokens: 4000,
            },
        }
    }

    /// Send one chat call, retrying 5xx failures with linear backoff
    /// (`base * attempt`) up to the configured attempt count.
    pub async fn chat(&self, tier: ModelTier, params: ChatParams) -> Result<LlmResponse> {
        let preset = self.preset(tier);
        let request = LlmRequest {
            model: preset.model,
            messages: params.messages,
            system: params.system,
            max_tokens: Some(params.max_tokens.unwrap_or(preset.max_tokens)),
            temperature: Some(params.temperature.unwrap_or(preset.temperature)),
            tools: params.tools,
            tool_choice: params.tool_choice,
        };

        let mut attempt = 1;
        loop {
            debug!(model = %request.model, attempt, "sending chat request");
            match self.provider.complete(&request).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    if !is_retryable_provider_error(&err) || attempt >= self.max_retries {
                        return Err(err);
                    }
                    let delay = self.retry_base_delay * attempt;
                    warn!(
                        "provider '{}' failed with retryable error ({}); retrying in {:?} ({}/{})",
                        self.provider.provider_id(),
                        err,
                        delay,
                        attempt,
                        self.max_retries
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Only server-side failures are worth another attempt.
fn is_retryable_provider_error(error: &Error) -> bool {
    let status = error
        .status()
        .or_else(|| extract_status_code(&error.to_string().to_ascii_lowercase()));
    matches!(status, Some(500..=599))
}

fn extract_status_code(message: &str) -> Option<u16> {
    for marker in ["status=", "status:", "status code"] {
        let mut search_start = 0usize;
        while let Some(offset) = message[search_start..].find(marker) {
            let after_marker = search_start + offset + marker.len();
            let digits: String = message[after_marker..]
                .trim_start()
                .chars()
                .take_while(|ch| ch.is_ascii_digit())
                .collect();

            if digits.len() >= 3
                && let Ok(status) = digits[..3].parse::<u16>()
            {
                return Some(status);
            }

            search_start = after_marker;
        }
    }
    None
}
