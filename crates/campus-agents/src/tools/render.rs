use async_trait::async_trait;
use campus_common::Result;
use serde_json::json;

use super::{Tool, ToolCategory, ToolContext, ToolOutput};

const COMPONENT_TYPES: &[&str] = &["chart", "table", "card", "list"];
const CHART_KINDS: &[&str] = &["bar", "line", "pie", "area"];

/// Validates a UI component spec and hands it back for the client to draw.
pub struct RenderComponentTool;

#[async_trait]
impl Tool for RenderComponentTool {
    fn name(&self) -> &'static str {
        "render_component"
    }

    fn description(&self) -> &'static str {
        "Render a UI component (chart, table, card or list) in the chat panel. \
         Use after a data query to present its rows. Pass the rows as `data`."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "component_type": {
                    "type": "string",
                    "enum": COMPONENT_TYPES,
                    "description": "Kind of component to render."
                },
                "title": { "type": "string" },
                "chart_type": {
                    "type": "string",
                    "enum": CHART_KINDS,
                    "description": "Only for component_type=chart."
                },
                "data": {
                    "description": "Rows or key/value pairs to display."
                }
            },
            "required": ["component_type", "data"]
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::UiDisplay
    }

    fn weight(&self) -> i32 {
        10
    }

    async fn execute(&self, _context: &ToolContext, input: serde_json::Value) -> Result<ToolOutput> {
        let component_type = match input.get("component_type").and_then(|v| v.as_str()) {
            Some(t) if COMPONENT_TYPES.contains(&t) => t,
            Some(other) => {
                return Ok(ToolOutput::error(format!(
                    "unsupported component_type '{other}'"
                )));
            }
            None => return Ok(ToolOutput::error("missing 'component_type' parameter")),
        };

        let data = match input.get("data") {
            Some(data) if !data.is_null() => data.clone(),
            _ => return Ok(ToolOutput::error("missing 'data' parameter")),
        };

        let chart_type = if component_type == "chart" {
            let kind = input
                .get("chart_type")
                .and_then(|v| v.as_str())
                .unwrap_or("bar");
            if !CHART_KINDS.contains(&kind) {
                return Ok(ToolOutput::error(format!("unsupported chart_type '{kind}'")));
            }
            Some(kind)
        } else {
            None
        };

        let title = input
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        Ok(ToolOutput::success(
            format!("{component_type} component ready"),
            json!({
                "component": {
                    "type": component_type,
                    "chart_type": chart_type,
                    "title": title,
                    "data": data,
                }
            }),
        ))
    }
}
