use async_trait::async_trait;
use campus_common::{Error, Result};
use serde_json::json;

use super::{Tool, ToolCategory, ToolContext, ToolOutput};
use crate::executor::WorkflowPlan;

/// Multi-step plan whose steps call other tools. The executor runs the
/// plan through the workflow engine; calling `execute` directly only
/// validates it.
pub struct RunWorkflowTool;

impl RunWorkflowTool {
    fn parse(input: &serde_json::Value) -> Result<WorkflowPlan> {
        let plan: WorkflowPlan = serde_json::from_value(input.clone())
            .map_err(|e| Error::Tool(format!("invalid workflow plan: {e}")))?;
        plan.validate()?;
        Ok(plan)
    }
}

#[async_trait]
impl Tool for RunWorkflowTool {
    fn name(&self) -> &'static str {
        "run_workflow"
    }

    fn description(&self) -> &'static str {
        "Execute a multi-step workflow such as planning an activity end to end. Each step \
         names a tool and its arguments, may list step ids it depends_on, and may be marked \
         priority=critical. Steps whose dependencies fail are skipped."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "steps": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "tool": { "type": "string" },
                            "arguments": { "type": "object" },
                            "depends_on": { "type": "array", "items": { "type": "string" } },
                            "priority": { "type": "string", "enum": ["critical", "normal"] }
                        },
                        "required": ["id", "tool"]
                    }
                }
            },
            "required": ["steps"]
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Workflow
    }

    fn weight(&self) -> i32 {
        6
    }

    fn plan(&self, input: &serde_json::Value) -> Option<Result<WorkflowPlan>> {
        Some(Self::parse(input))
    }

    async fn execute(&self, _context: &ToolContext, input: serde_json::Value) -> Result<ToolOutput> {
        match Self::parse(&input) {
            Ok(plan) => Ok(ToolOutput::success(
                format!("workflow '{}' is valid ({} steps)", plan.name, plan.steps.len()),
                json!({ "steps": plan.steps.iter().map(|s| s.id.as_str()).collect::<Vec<_>>() }),
            )),
            Err(e) => Ok(ToolOutput::error(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_rejects_unknown_dependency() {
        let plan = RunWorkflowTool.plan(&json!({
            "steps": [{"id": "a", "tool": "any_query", "depends_on": ["missing"]}]
        }));
        assert!(matches!(plan, Some(Err(_))));
    }

    #[test]
    fn plan_parses_steps() {
        let plan = RunWorkflowTool
            .plan(&json!({
                "name": "spring_fair",
                "steps": [
                    {"id": "venue", "tool": "any_query", "arguments": {"sql": "SELECT 1"}, "priority": "critical"},
                    {"id": "poster", "tool": "render_component", "depends_on": ["venue"]}
                ]
            }))
            .unwrap()
            .unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[1].depends_on, vec!["venue".to_string()]);
    }
}
