mod workflow;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::tools::{ToolCall, ToolContext, ToolDescriptor, ToolOutput};

pub use workflow::{
    StepPriority, StepStatus, WorkflowEngine, WorkflowPlan, WorkflowReport, WorkflowStep,
};

/// Outcome of one tool call. Never mutated after creation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionResult {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub result: Option<ToolOutput>,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolExecutionResult {
    fn failed(call: &ToolCall, arguments: serde_json::Value, started: Instant, error: String) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            arguments,
            result: None,
            success: false,
            duration_ms: elapsed_ms(started),
            error: Some(error),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

/// Invoke one tool with a deadline. A tool-reported failure is an error.
pub(crate) async fn invoke(
    descriptor: &ToolDescriptor,
    arguments: serde_json::Value,
    context: &ToolContext,
    timeout: Duration,
) -> std::result::Result<ToolOutput, String> {
    let call = descriptor.implementation().execute(context, arguments);
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(output)) if output.success => Ok(output),
        Ok(Ok(output)) => Err(output.message),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("timed out after {}ms", timeout.as_millis())),
    }
}

/// Empty argument text means "no arguments".
fn decode_arguments(raw: &str) -> std::result::Result<serde_json::Value, String> {
    if raw.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(raw).map_err(|e| format!("invalid tool arguments: {e}"))
}

/// Runs model-requested tool calls one after another.
pub struct ToolExecutor {
    timeout: Duration,
    max_step_retries: u32,
}

impl ToolExecutor {
    pub fn new(timeout: Duration, max_step_retries: u32) -> Self {
        Self {
            timeout,
            max_step_retries,
        }
    }

    /// One result per call, in call order. A failing call never stops the
    /// ones after it.
    pub async fn execute(
        &self,
        calls: &[ToolCall],
        catalog: &[Arc<ToolDescriptor>],
        context: &ToolContext,
    ) -> Vec<ToolExecutionResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(self.execute_call(call, catalog, context).await);
        }
        results
    }

    /// `catalog` is what the request was offered; calls outside it fail,
    /// and so do workflow steps outside it.
    #[instrument(skip(self, call, catalog, context), fields(tool = %call.name))]
    pub async fn execute_call(
        &self,
        call: &ToolCall,
        catalog: &[Arc<ToolDescriptor>],
        context: &ToolContext,
    ) -> ToolExecutionResult {
        let started = Instant::now();

        let arguments = match decode_arguments(&call.arguments) {
            Ok(arguments) => arguments,
            Err(error) => {
                warn!("{error}");
                let raw = serde_json::Value::String(call.arguments.clone());
                return ToolExecutionResult::failed(call, raw, started, error);
            }
        };

        let Some(descriptor) = catalog.iter().find(|d| d.name == call.name) else {
            let error = format!("tool '{}' is not available for this request", call.name);
            warn!("{error}");
            return ToolExecutionResult::failed(call, arguments, started, error);
        };

        let outcome = match descriptor.implementation().plan(&arguments) {
            Some(Ok(plan)) => {
                let engine = WorkflowEngine::new(catalog, self.timeout, self.max_step_retries);
                let output = engine.run(plan, context).await.into_output();
                if output.success {
                    Ok(output)
                } else {
                    Err((output.message.clone(), Some(output)))
                }
            }
            Some(Err(e)) => Err((e.to_string(), None)),
            None => invoke(descriptor, arguments.clone(), context, self.timeout)
                .await
                .map_err(|error| (error, None)),
        };

        let duration_ms = elapsed_ms(started);
        match outcome {
            Ok(output) => {
                info!(duration_ms, "tool call completed");
                ToolExecutionResult {
                    call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    arguments,
                    result: Some(output),
                    success: true,
                    duration_ms,
                    error: None,
                }
            }
            Err((error, partial)) => {
                warn!(duration_ms, "tool call failed: {error}");
                ToolExecutionResult {
                    call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    arguments,
                    result: partial,
                    success: false,
                    duration_ms,
                    error: Some(error),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{Tool, ToolCategory, ToolRegistry};
    use async_trait::async_trait;
    use campus_common::{Error, Result};

    struct SleepyTool;

    #[async_trait]
    impl Tool for SleepyTool {
        fn name(&self) -> &'static str {
            "sleepy"
        }

        fn description(&self) -> &'static str {
            "sleeps"
        }

        fn input_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }

        fn category(&self) -> ToolCategory {
            ToolCategory::Analysis
        }

        async fn execute(&self, _context: &ToolContext, input: serde_json::Value) -> Result<ToolOutput> {
            let ms = input.get("ms").and_then(|v| v.as_u64()).unwrap_or(0);
            if ms == 999 {
                return Err(Error::Tool("exploded".to_string()));
            }
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(ToolOutput::success("rested", json!({"ms": ms})))
        }
    }

    fn context() -> ToolContext {
        ToolContext {
            user_id: "u1".into(),
            role: campus_common::Role::new("teacher"),
            conversation_id: "c1".into(),
            request_content: String::new(),
        }
    }

    async fn setup() -> (ToolExecutor, Vec<Arc<ToolDescriptor>>) {
        let mut registry = ToolRegistry::new(vec![], vec![]);
        registry.register_tool(Arc::new(SleepyTool));
        let registry = Arc::new(registry);
        let catalog = registry.load_available(&["sleepy".to_string()]).await;
        (
            ToolExecutor::new(Duration::from_millis(50), 1),
            catalog,
        )
    }

    #[tokio::test]
    async fn failures_do_not_stop_later_calls() {
        let (executor, catalog) = setup().await;
        let calls = vec![
            ToolCall::new("sleepy", "{not json"),
            ToolCall::new("sleepy", r#"{"ms": 999}"#),
            ToolCall::new("sleepy", r#"{"ms": 500}"#),
            ToolCall::new("missing", "{}"),
            ToolCall::new("sleepy", ""),
        ];
        let results = executor.execute(&calls, &catalog, &context()).await;

        assert_eq!(results.len(), 5);
        assert!(results[0].error.as_deref().unwrap().contains("invalid tool arguments"));
        assert!(results[1].error.as_deref().unwrap().contains("exploded"));
        assert!(results[2].error.as_deref().unwrap().contains("timed out"));
        assert!(results[3].error.as_deref().unwrap().contains("not available"));
        assert!(results[4].success);
        assert_eq!(results[4].call_id, calls[4].id);
    }

    #[test]
    fn results_serialize_camel_case() {
        let call = ToolCall::new("sleepy", "{}");
        let result = ToolExecutionResult::failed(&call, json!({}), Instant::now(), "x".into());
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["toolName"], "sleepy");
        assert!(value.get("durationMs").is_some());
    }
}
