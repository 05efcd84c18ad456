mod legacy;
mod overview;
mod query;
mod registry;
mod render;
mod workflow;

use async_trait::async_trait;
use campus_common::{ConversationId, Result, Role, UserId};
use serde::{Deserialize, Serialize};

use crate::executor::WorkflowPlan;

pub use legacy::{LEGACY_TOOLS, LegacyAlias};
pub use overview::OrganizationOverviewTool;
pub use query::{AnyQueryTool, ReadDataRecordTool};
pub use registry::{RegistryStats, ToolDescriptor, ToolFactory, ToolHandle, ToolRegistry};
pub use render::RenderComponentTool;
pub use workflow::RunWorkflowTool;

/// Selection bucket a tool belongs to; maps 1:1 onto permission groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    UiDisplay,
    DataQuery,
    DataVisualization,
    Analysis,
    Workflow,
    PageOperation,
    Web,
}

impl ToolCategory {
    pub fn group(&self) -> &'static str {
        match self {
            Self::UiDisplay => "ui_display",
            Self::DataQuery => "data_query",
            Self::DataVisualization => "data_visualization",
            Self::Analysis => "analysis",
            Self::Workflow => "workflow",
            Self::PageOperation => "page_operation",
            Self::Web => "web",
        }
    }
}

/// Who is asking, passed to every tool invocation.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub user_id: UserId,
    pub role: Role,
    pub conversation_id: ConversationId,
    pub request_content: String,
}

/// Common result envelope enforced at the tool boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub message: String,
    pub data: serde_json::Value,
}

impl ToolOutput {
    pub fn success(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: serde_json::Value::Null,
        }
    }
}

/// One tool call requested by the model. Structured and recovered calls
/// share this shape; nothing downstream can tell them apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON text as produced by the model.
    pub arguments: String,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// Callable capability exposed to the model.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn input_schema(&self) -> serde_json::Value;

    fn category(&self) -> ToolCategory;

    /// Static selection weight; higher sorts first.
    fn weight(&self) -> i32 {
        0
    }

    /// Multi-step tools return a plan for the workflow engine instead of
    /// running in one shot.
    fn plan(&self, _input: &serde_json::Value) -> Option<Result<WorkflowPlan>> {
        None
    }

    async fn execute(&self, context: &ToolContext, input: serde_json::Value) -> Result<ToolOutput>;
}
