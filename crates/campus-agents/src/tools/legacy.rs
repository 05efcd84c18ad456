//! Compatibility descriptors for tool names older clients and prompts still
//! emit. Each alias either forwards to a current tool or, when there is no
//! server-side equivalent, hands the call back to the client as an action.

use std::sync::Arc;

use async_trait::async_trait;
use campus_common::Result;
use serde_json::json;

use super::{Tool, ToolCategory, ToolContext, ToolOutput};

pub struct LegacyAlias {
    pub name: &'static str,
    pub description: &'static str,
    pub category: ToolCategory,
    /// Current tool that serves this name, if any.
    pub replacement: Option<&'static str>,
}

pub const LEGACY_TOOLS: &[LegacyAlias] = &[
    LegacyAlias {
        name: "query_data",
        description: "Legacy data query. Prefer any_query.",
        category: ToolCategory::DataQuery,
        replacement: Some("any_query"),
    },
    LegacyAlias {
        name: "generate_chart",
        description: "Legacy chart rendering. Prefer render_component.",
        category: ToolCategory::UiDisplay,
        replacement: Some("render_component"),
    },
    LegacyAlias {
        name: "navigate_page",
        description: "Ask the client to navigate to a page.",
        category: ToolCategory::PageOperation,
        replacement: None,
    },
];

pub(super) fn legacy_alias(name: &str) -> Option<&'static LegacyAlias> {
    LEGACY_TOOLS.iter().find(|alias| alias.name == name)
}

/// Legacy name served by a current implementation.
pub(super) struct AliasTool {
    alias: &'static LegacyAlias,
    inner: Arc<dyn Tool>,
}

impl AliasTool {
    pub(super) fn new(alias: &'static LegacyAlias, inner: Arc<dyn Tool>) -> Self {
        Self { alias, inner }
    }
}

#[async_trait]
impl Tool for AliasTool {
    fn name(&self) -> &'static str {
        self.alias.name
    }

    fn description(&self) -> &'static str {
        self.alias.description
    }

    fn input_schema(&self) -> serde_json::Value {
        self.inner.input_schema()
    }

    fn category(&self) -> ToolCategory {
        self.alias.category
    }

    async fn execute(&self, context: &ToolContext, input: serde_json::Value) -> Result<ToolOutput> {
        self.inner.execute(context, input).await
    }
}

/// Legacy name with no server-side implementation.
pub(super) struct ClientActionTool {
    alias: &'static LegacyAlias,
}

impl ClientActionTool {
    pub(super) fn new(alias: &'static LegacyAlias) -> Self {
        Self { alias }
    }
}

#[async_trait]
impl Tool for ClientActionTool {
    fn name(&self) -> &'static str {
        self.alias.name
    }

    fn description(&self) -> &'static str {
        self.alias.description
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({ "type": "object", "additionalProperties": true })
    }

    fn category(&self) -> ToolCategory {
        self.alias.category
    }

    async fn execute(&self, _context: &ToolContext, input: serde_json::Value) -> Result<ToolOutput> {
        Ok(ToolOutput::success(
            format!("{} forwarded to client", self.alias.name),
            json!({ "client_action": self.alias.name, "arguments": input }),
        ))
    }
}
