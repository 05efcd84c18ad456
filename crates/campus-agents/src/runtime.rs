use std::sync::Arc;
use std::time::{Duration, Instant};

use campus_common::{ConversationId, Error, Result, Role, UserId};
use campus_config::{AppConfig, StreamingConfig, ToolsConfig};
use campus_db::{MemoryProvider, NewMemoryEntry, RecallQuery};
use campus_security::SecurityChecker;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::executor::{ToolExecutionResult, ToolExecutor};
use crate::intent::{Complexity, IntentAnalysis, IntentClassifier};
use crate::model_router::{ChatParams, ModelRouter, ModelTier, ProviderFailureKind};
use crate::prompt::{OrganizationStatusSource, PromptBuilder, PromptContext, PromptMode};
use crate::providers::{ChatMessage, LlmProvider, LlmResponse};
use crate::recovery::{resolve_tool_calls, strip_placeholders};
use crate::selector::{PermissionTable, ToolSelector};
use crate::stream::{StreamCoordinator, StreamEvent, ThinkingPhase};
use crate::tools::{ToolContext, ToolDescriptor, ToolRegistry};

const MEMORY_RECALL_LIMIT: usize = 5;
const NARRATION_TEMPERATURE: f64 = 0.5;
const NARRATION_MAX_TOKENS: u32 = 200;
/// Tool payloads quoted back to the model are cut to this many chars.
const TOOL_PAYLOAD_CHARS: usize = 1500;

const EMPTY_ANSWER: &str = "抱歉，我暂时无法回答这个问题。请稍后再试。";
const REQUEST_FAILED: &str = "抱歉，处理请求时出现错误，请稍后再试。";
const NARRATION_SYSTEM_PROMPT: &str =
    "你是数据播报员。用一到两句中文概括下面的工具执行结果，保留关键数字，不要编造。";

/// Caller-supplied context. Role comes from the verified identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RequestContext {
    pub role: Role,
    pub page_context: Option<serde_json::Value>,
    pub is_direct_mode: bool,
    pub enable_think_optimization: bool,
    /// 0 and 1 both mean the first round.
    pub current_round: u32,
    pub history: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantRequest {
    pub content: String,
    pub user_id: UserId,
    pub conversation_id: ConversationId,
    #[serde(default)]
    pub context: RequestContext,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub execution_time_ms: u64,
    pub tools_used: Vec<String>,
    pub confidence: f64,
    pub complexity: Complexity,
    pub approach: String,
}

/// Non-streaming result of one request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntelligentResponse {
    pub success: bool,
    pub message: String,
    pub tool_executions: Vec<ToolExecutionResult>,
    pub metadata: ResponseMetadata,
}

struct Outcome {
    success: bool,
    message: String,
    executions: Vec<ToolExecutionResult>,
    analysis: Option<IntentAnalysis>,
    approach: &'static str,
}

impl Outcome {
    fn into_response(self, started: Instant) -> IntelligentResponse {
        let mut tools_used: Vec<String> = Vec::new();
        for execution in &self.executions {
            if !tools_used.contains(&execution.tool_name) {
                tools_used.push(execution.tool_name.clone());
            }
        }
        let (confidence, complexity) = self
            .analysis
            .as_ref()
            .map(|a| (a.confidence, a.complexity))
            .unwrap_or((0.0, Complexity::Simple));
        IntelligentResponse {
            success: self.success,
            message: self.message,
            tool_executions: self.executions,
            metadata: ResponseMetadata {
                execution_time_ms: started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64,
                tools_used,
                confidence,
                complexity,
                approach: self.approach.to_string(),
            },
        }
    }
}

/// Top-level coordinator: one per process, shared by every request.
pub struct AssistantRuntime {
    router: Arc<ModelRouter>,
    classifier: IntentClassifier,
    registry: Arc<ToolRegistry>,
    selector: ToolSelector,
    executor: ToolExecutor,
    prompts: PromptBuilder,
    security: SecurityChecker,
    memory: Option<Arc<dyn MemoryProvider>>,
    tools_config: ToolsConfig,
    streaming: StreamingConfig,
    sweep_interval: Duration,
}

impl AssistantRuntime {
    pub fn new(provider: Arc<dyn LlmProvider>, registry: Arc<ToolRegistry>, config: &AppConfig) -> Self {
        let router = Arc::new(ModelRouter::new(provider, &config.llm));
        let classifier = IntentClassifier::new(
            Duration::from_secs(config.cache.intent_ttl_secs),
            config.cache.intent_key_chars,
            config.intent.keyword_threshold,
        )
        .with_router(Arc::clone(&router));
        let selector = ToolSelector::new(
            Arc::clone(&registry),
            PermissionTable::with_overrides(&config.permissions),
        );
        let executor = ToolExecutor::new(
            Duration::from_millis(config.tools.tool_timeout_ms),
            config.tools.max_step_retries,
        );
        let prompts = PromptBuilder::new(
            Duration::from_secs(config.cache.prompt_ttl_secs),
            Duration::from_secs(config.cache.organization_ttl_secs),
        );

        Self {
            router,
            classifier,
            registry,
            selector,
            executor,
            prompts,
            security: SecurityChecker::default(),
            memory: None,
            tools_config: config.tools.clone(),
            streaming: config.streaming.clone(),
            sweep_interval: Duration::from_secs(config.cache.sweep_interval_secs.max(1)),
        }
    }

    pub fn set_memory_provider(&mut self, memory: Arc<dyn MemoryProvider>) {
        self.memory = Some(memory);
    }

    pub fn has_memory_provider(&self) -> bool {
        self.memory.is_some()
    }

    pub fn set_organization_source(&mut self, source: Arc<dyn OrganizationStatusSource>) {
        self.prompts.set_organization_source(source);
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn classifier(&self) -> &IntentClassifier {
        &self.classifier
    }

    pub fn selector(&self) -> &ToolSelector {
        &self.selector
    }

    pub fn prompts(&self) -> &PromptBuilder {
        &self.prompts
    }

    pub fn streaming_config(&self) -> &StreamingConfig {
        &self.streaming
    }

    /// Run one request, writing events to `sender` as they happen.
    pub async fn process_request_stream(
        &self,
        request: AssistantRequest,
        sender: mpsc::Sender<StreamEvent>,
    ) -> IntelligentResponse {
        let mut stream = StreamCoordinator::new(sender, &self.streaming);
        self.process(request, &mut stream).await
    }

    /// Run one request to completion without streaming.
    pub async fn process_request(&self, request: AssistantRequest) -> IntelligentResponse {
        let mut stream = StreamCoordinator::detached(&self.streaming);
        self.process(request, &mut stream).await
    }

    async fn process(&self, request: AssistantRequest, stream: &mut StreamCoordinator) -> IntelligentResponse {
        let started = Instant::now();
        match self.run(&request, stream).await {
            Ok(outcome) => outcome.into_response(started),
            Err(e) => {
                error!(conversation = %request.conversation_id, "request failed: {e}");
                stream.error(REQUEST_FAILED).await;
                Outcome {
                    success: false,
                    message: REQUEST_FAILED.to_string(),
                    executions: Vec::new(),
                    analysis: None,
                    approach: "error",
                }
                .into_response(started)
            }
        }
    }

    #[instrument(
        skip(self, request, stream),
        fields(conversation = %request.conversation_id, user = %request.user_id)
    )]
    async fn run(&self, request: &AssistantRequest, stream: &mut StreamCoordinator) -> Result<Outcome> {
        let content = request.content.trim();
        let context = &request.context;
        let role = Role::new(context.role.as_str());
        stream.connected(request.conversation_id.as_str()).await;

        stream.thinking(ThinkingPhase::SecurityCheck).await;
        let allowed: Vec<String> = self
            .selector
            .permissions()
            .allowed_groups(&role)
            .into_iter()
            .collect();
        let verdict = if context.current_round <= 1 {
            self.security.check(&role, content, &allowed)
        } else {
            debug!(round = context.current_round, "continuation round; input validation skipped");
            self.security.permission_gate(&role, content, &allowed)
        };
        if !verdict.allowed {
            let reason = verdict
                .reason
                .unwrap_or_else(|| "权限不足，无法执行此操作".to_string());
            info!(role = %role, "request denied: {reason}");
            stream.error(reason.clone()).await;
            return Ok(Outcome {
                success: false,
                message: reason,
                executions: Vec::new(),
                analysis: None,
                approach: "security_denied",
            });
        }

        stream.thinking(ThinkingPhase::IntentAnalysis).await;
        let analysis = self
            .classifier
            .classify(content, context.page_context.as_ref())
            .await;
        let catalog = self.load_catalog(&analysis, content, &role).await?;

        stream.thinking(ThinkingPhase::ContextBuilding).await;
        let memories = self.recall(request, content).await;
        let definitions: Vec<_> = catalog.iter().map(|d| d.definition()).collect();
        let mode = PromptMode::from_flags(context.is_direct_mode, context.enable_think_optimization);
        let system_prompt = self
            .prompts
            .build(
                &role,
                &PromptContext {
                    mode,
                    page_context: context.page_context.as_ref(),
                    tools: &definitions,
                    memories: &memories,
                },
            )
            .await;

        stream.thinking(ThinkingPhase::ModelPrep).await;
        let tier = ModelRouter::tier_for(analysis.complexity, context.enable_think_optimization);
        let mut messages = context.history.clone();
        messages.push(ChatMessage::user(content));
        let mut params = ChatParams::new(messages.clone()).with_system(system_prompt.to_string());
        if !definitions.is_empty() {
            params = params.with_tools(definitions);
        }

        let response = match self.router.chat(tier, params).await {
            Ok(response) => response,
            Err(e) => {
                let kind = ProviderFailureKind::classify(&e);
                warn!(?kind, "model call failed: {e}");
                let message = kind.user_message().to_string();
                stream.answer(&message, 0).await;
                return Ok(Outcome {
                    success: false,
                    message,
                    executions: Vec::new(),
                    analysis: Some(analysis),
                    approach: "fallback_response",
                });
            }
        };

        let calls = resolve_tool_calls(&response);
        if calls.is_empty() {
            let mut answer = strip_placeholders(&response.text);
            if answer.is_empty() {
                answer = EMPTY_ANSWER.to_string();
            }
            stream.answer(&answer, 0).await;
            self.remember(request, content, &answer, &[]).await;
            return Ok(Outcome {
                success: true,
                message: answer,
                executions: Vec::new(),
                analysis: Some(analysis),
                approach: "simplified_processing",
            });
        }

        let tool_context = ToolContext {
            user_id: request.user_id.clone(),
            role: role.clone(),
            conversation_id: request.conversation_id.clone(),
            request_content: content.to_string(),
        };
        let mut executions = Vec::with_capacity(calls.len());
        let total = calls.len() as u32;
        for (idx, call) in calls.iter().enumerate() {
            if stream.is_cancelled() {
                info!("client disconnected; remaining tool calls abandoned");
                break;
            }
            stream.tool_start(call).await;
            let step = idx as u32 + 1;
            stream
                .progress(step, total, format!("正在执行 {} ({step}/{total})", call.name))
                .await;
            let result = self.executor.execute_call(call, &catalog, &tool_context).await;
            stream.tool_finished(&result).await;
            if result.success && stream.is_streaming() && !stream.is_cancelled() {
                let narration = self.narrate(&result).await;
                stream.tool_narration(&result, narration).await;
            }
            executions.push(result);
        }

        if stream.is_cancelled() {
            return Ok(Outcome {
                success: true,
                message: completed_fallback(executions.len()),
                executions,
                analysis: Some(analysis),
                approach: "multi_round_with_tools",
            });
        }

        let answer = self
            .compose_answer(tier, &system_prompt, messages, &response, &executions)
            .await;
        stream.answer(&answer, executions.len()).await;
        self.remember(request, content, &answer, &executions).await;

        Ok(Outcome {
            success: true,
            message: answer,
            executions,
            analysis: Some(analysis),
            approach: "multi_round_with_tools",
        })
    }

    /// Selected descriptors, degrading to the fallback set. Errors only
    /// when tools are required and nothing at all could be loaded.
    async fn load_catalog(
        &self,
        analysis: &IntentAnalysis,
        content: &str,
        role: &Role,
    ) -> Result<Vec<Arc<ToolDescriptor>>> {
        let selection = self.selector.select(
            analysis,
            content,
            role,
            self.tools_config.max_tools_per_request,
        );
        let mut catalog = self.registry.load_available(&selection.tools).await;
        if catalog.is_empty() && analysis.requires_tools {
            warn!(tools = ?selection.tools, "selected tools failed to load; using fallback tools");
            catalog = self.registry.load_available(&self.selector.fallback_for(role)).await;
        }
        if catalog.is_empty() && analysis.requires_tools {
            return Err(Error::Agent("no tools could be loaded for this request".to_string()));
        }
        info!(
            strategy = ?selection.strategy,
            tools = ?catalog.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
            "tool catalog ready"
        );
        Ok(catalog)
    }

    async fn recall(&self, request: &AssistantRequest, content: &str) -> Vec<String> {
        let Some(memory) = &self.memory else {
            return Vec::new();
        };
        let query = RecallQuery {
            user_id: request.user_id.as_str().to_string(),
            query_text: content.to_string(),
            limit: MEMORY_RECALL_LIMIT,
        };
        match memory.recall(query).await {
            Ok(entries) => entries.into_iter().map(|entry| entry.content).collect(),
            Err(e) => {
                warn!("memory recall failed: {e}");
                Vec::new()
            }
        }
    }

    async fn remember(
        &self,
        request: &AssistantRequest,
        content: &str,
        answer: &str,
        executions: &[ToolExecutionResult],
    ) {
        let Some(memory) = &self.memory else {
            return;
        };
        let tools: Vec<&str> = executions.iter().map(|e| e.tool_name.as_str()).collect();
        let entry = NewMemoryEntry {
            user_id: request.user_id.as_str().to_string(),
            conversation_id: Some(request.conversation_id.as_str().to_string()),
            content: format!("用户：{content}\n助手：{answer}"),
            kind: "turn".to_string(),
            metadata: serde_json::json!({ "tools": tools }),
        };
        if let Err(e) = memory.remember(entry).await {
            warn!("failed to store conversation turn: {e}");
        }
    }

    /// One-line summary of a tool result. Never fails.
    async fn narrate(&self, result: &ToolExecutionResult) -> String {
        let fallback = format!("工具 {} 执行完成，已获取数据。", result.tool_name);
        let Some(output) = &result.result else {
            return fallback;
        };
        let prompt = format!(
            "工具：{}\n结果：{}\n数据：{}",
            result.tool_name,
            output.message,
            truncate_chars(&output.data.to_string(), TOOL_PAYLOAD_CHARS)
        );
        let params = ChatParams::new(vec![ChatMessage::user(prompt)])
            .with_system(NARRATION_SYSTEM_PROMPT)
            .with_sampling(NARRATION_TEMPERATURE, NARRATION_MAX_TOKENS);
        match self.router.chat(ModelTier::Fast, params).await {
            Ok(response) if !response.text.trim().is_empty() => response.text.trim().to_string(),
            Ok(_) => fallback,
            Err(e) => {
                debug!(tool = %result.tool_name, "narration failed: {e}");
                fallback
            }
        }
    }

    async fn compose_answer(
        &self,
        tier: ModelTier,
        system_prompt: &str,
        mut messages: Vec<ChatMessage>,
        first: &LlmResponse,
        executions: &[ToolExecutionResult],
    ) -> String {
        let preamble = strip_placeholders(&first.text);
        messages.push(ChatMessage::assistant(if preamble.is_empty() {
            "我将调用工具获取数据。".to_string()
        } else {
            preamble
        }));
        messages.push(ChatMessage::user(format!(
            "以下是工具执行结果：\n{}\n\n请基于这些结果直接回答用户的问题，不要再调用工具。",
            summarize_executions(executions)
        )));

        let params = ChatParams::new(messages).with_system(system_prompt);
        match self.router.chat(tier, params).await {
            Ok(response) => {
                let answer = strip_placeholders(&response.text);
                if answer.is_empty() {
                    completed_fallback(executions.len())
                } else {
                    answer
                }
            }
            Err(e) => {
                warn!("final answer generation failed: {e}");
                completed_fallback(executions.len())
            }
        }
    }

    /// Drop expired intent analyses and prompts.
    pub fn sweep_caches(&self) -> (usize, usize) {
        let intents = self.classifier.cache().sweep();
        let prompts = self.prompts.cache().sweep();
        if intents + prompts > 0 {
            debug!(intents, prompts, "cache sweep");
        }
        (intents, prompts)
    }

    /// Periodic cache sweep. Ends once the runtime is dropped.
    pub fn spawn_cache_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let runtime = Arc::downgrade(self);
        let interval = self.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(runtime) = runtime.upgrade() else {
                    break;
                };
                runtime.sweep_caches();
            }
        })
    }
}

fn completed_fallback(tool_count: usize) -> String {
    format!("已完成查询，共调用了 {tool_count} 个工具。")
}

fn summarize_executions(executions: &[ToolExecutionResult]) -> String {
    let lines: Vec<String> = executions
        .iter()
        .map(|execution| match (&execution.result, &execution.error) {
            (Some(output), None) => format!(
                "- {}（成功）：{}\n  数据：{}",
                execution.tool_name,
                output.message,
                truncate_chars(&output.data.to_string(), TOOL_PAYLOAD_CHARS)
            ),
            (_, error) => format!(
                "- {}（失败）：{}",
                execution.tool_name,
                error.as_deref().unwrap_or("unknown error")
            ),
        })
        .collect();
    lines.join("\n")
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
