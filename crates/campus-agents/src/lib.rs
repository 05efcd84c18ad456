pub mod executor;
pub mod features;
pub mod intent;
pub mod model_router;
pub mod openai;
pub mod prompt;
pub mod providers;
pub mod recovery;
pub mod runtime;
pub mod selector;
pub mod stream;
pub mod tools;

pub use executor::{ToolExecutionResult, ToolExecutor, WorkflowEngine, WorkflowPlan};
pub use features::QueryFeatures;
pub use intent::{AnalysisMethod, Complexity, Intent, IntentAnalysis, IntentClassifier};
pub use model_router::{ChatParams, ModelRouter, ModelTier, ProviderFailureKind};
pub use openai::OpenAiProvider;
pub use prompt::{OrganizationStatusSource, PromptBuilder, PromptCache, PromptMode};
pub use providers::{
    ChatMessage, ChatRole, LlmProvider, LlmRequest, LlmResponse, ToolChoice, ToolDefinition, Usage,
};
pub use runtime::{
    AssistantRequest, AssistantRuntime, IntelligentResponse, RequestContext, ResponseMetadata,
};
pub use selector::{PermissionTable, SelectionStrategy, ToolSelection, ToolSelector};
pub use stream::{StreamCoordinator, StreamEvent, ThinkingPhase};
pub use tools::{Tool, ToolCall, ToolCategory, ToolContext, ToolOutput, ToolRegistry};
