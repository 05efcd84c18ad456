use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use campus_common::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use super::invoke;
use crate::tools::{ToolContext, ToolDescriptor, ToolOutput};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepPriority {
    Critical,
    #[default]
    Normal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    pub tool: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub priority: StepPriority,
    #[serde(skip_deserializing)]
    pub status: StepStatus,
    #[serde(skip_deserializing)]
    pub attempts: u32,
    #[serde(skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub output: Option<ToolOutput>,
    #[serde(skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowPlan {
    #[serde(default = "default_plan_name")]
    pub name: String,
    pub steps: Vec<WorkflowStep>,
}

fn default_plan_name() -> String {
    "workflow".to_string()
}

impl WorkflowPlan {
    /// Non-empty, unique step ids, known dependencies, no cycles.
    pub fn validate(&self) -> Result<()> {
        self.execution_order().map(|_| ())
    }

    /// Topological order, stable with respect to declaration order.
    fn execution_order(&self) -> Result<Vec<usize>> {
        if self.steps.is_empty() {
            return Err(Error::Tool("workflow has no steps".to_string()));
        }

        let mut position = HashMap::new();
        for (idx, step) in self.steps.iter().enumerate() {
            if position.insert(step.id.as_str(), idx).is_some() {
                return Err(Error::Tool(format!("duplicate step id '{}'", step.id)));
            }
        }

        let mut indegree = vec![0usize; self.steps.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.steps.len()];
        for (idx, step) in self.steps.iter().enumerate() {
            let mut seen = HashSet::new();
            for dep in step.depends_on.iter().map(String::as_str) {
                if !seen.insert(dep) {
                    continue;
                }
                let Some(&dep_idx) = position.get(dep) else {
                    return Err(Error::Tool(format!(
                        "step '{}' depends on unknown step '{dep}'",
                        step.id
                    )));
                };
                indegree[idx] += 1;
                dependents[dep_idx].push(idx);
            }
        }

        let mut ready: VecDeque<usize> = (0..self.steps.len()).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(self.steps.len());
        while let Some(idx) = ready.pop_front() {
            order.push(idx);
            for &next in &dependents[idx] {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    ready.push_back(next);
                }
            }
        }

        if order.len() != self.steps.len() {
            return Err(Error::Tool("workflow dependencies form a cycle".to_string()));
        }
        Ok(order)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowReport {
    pub name: String,
    pub success: bool,
    /// Critical step whose failure failed the run.
    pub failed_step: Option<String>,
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowReport {
    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn into_output(self) -> ToolOutput {
        let count = |status: StepStatus| self.steps.iter().filter(|s| s.status == status).count();
        let message = format!(
            "workflow '{}': {} completed, {} failed, {} skipped",
            self.name,
            count(StepStatus::Completed),
            count(StepStatus::Failed),
            count(StepStatus::Skipped)
        );
        let success = self.success;
        let data = json!({ "workflow": self });
        ToolOutput {
            success,
            message,
            data,
        }
    }
}

/// Runs a plan step by step in dependency order.
///
/// Steps may only name tools from `catalog`, the set the enclosing request
/// was offered.
pub struct WorkflowEngine<'a> {
    catalog: &'a [Arc<ToolDescriptor>],
    step_timeout: Duration,
    max_retries: u32,
}

impl<'a> WorkflowEngine<'a> {
    pub fn new(catalog: &'a [Arc<ToolDescriptor>], step_timeout: Duration, max_retries: u32) -> Self {
        Self {
            catalog,
            step_timeout,
            max_retries,
        }
    }

    pub async fn run(&self, mut plan: WorkflowPlan, context: &ToolContext) -> WorkflowReport {
        let order = match plan.execution_order() {
            Ok(order) => order,
            Err(e) => {
                warn!("workflow '{}' rejected: {e}", plan.name);
                return WorkflowReport {
                    name: plan.name,
                    success: false,
                    failed_step: None,
                    steps: plan.steps,
                };
            }
        };

        let mut failed_step = None;
        for idx in order {
            if let Some(critical) = &failed_step {
                let step = &mut plan.steps[idx];
                step.status = StepStatus::Skipped;
                step.error = Some(format!("critical step '{critical}' failed"));
                continue;
            }

            let unmet = plan.steps[idx]
                .depends_on
                .iter()
                .find(|dep| {
                    plan.steps
                        .iter()
                        .find(|s| &s.id == *dep)
                        .is_none_or(|s| s.status != StepStatus::Completed)
                })
                .cloned();
            if let Some(dep) = unmet {
                let step = &mut plan.steps[idx];
                step.status = StepStatus::Skipped;
                step.error = Some(format!("dependency '{dep}' did not complete"));
                info!(step = %step.id, dependency = %dep, "workflow step skipped");
                continue;
            }

            let step = &mut plan.steps[idx];
            self.run_step(step, context).await;
            if step.status == StepStatus::Failed && step.priority == StepPriority::Critical {
                warn!(step = %step.id, "critical workflow step failed");
                failed_step = Some(step.id.clone());
            }
        }

        WorkflowReport {
            name: plan.name,
            success: failed_step.is_none(),
            failed_step,
            steps: plan.steps,
        }
    }

    /// Retries re-enter this step only.
    async fn run_step(&self, step: &mut WorkflowStep, context: &ToolContext) {
        let Some(descriptor) = self.catalog.iter().find(|d| d.name == step.tool) else {
            warn!(step = %step.id, tool = %step.tool, "workflow step names a tool outside the catalog");
            step.status = StepStatus::Failed;
            step.error = Some(format!("tool '{}' is not available for this request", step.tool));
            return;
        };
        let arguments = if step.arguments.is_null() {
            json!({})
        } else {
            step.arguments.clone()
        };
        if descriptor.implementation().plan(&arguments).is_some() {
            step.status = StepStatus::Failed;
            step.error = Some("nested workflows are not supported".to_string());
            return;
        }

        loop {
            step.status = StepStatus::Running;
            step.attempts += 1;
            match invoke(descriptor, arguments.clone(), context, self.step_timeout).await {
                Ok(output) => {
                    step.status = StepStatus::Completed;
                    step.output = Some(output);
                    step.error = None;
                    return;
                }
                Err(error) => {
                    if step.attempts > self.max_retries {
                        step.status = StepStatus::Failed;
                        step.error = Some(error);
                        return;
                    }
                    warn!(step = %step.id, attempt = step.attempts, "workflow step failed, retrying: {error}");
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
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyTool {
        name: &'static str,
        failures_before_success: usize,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for FlakyTool {
        fn name(&self) -> &'static str {
            self.name
        }

        fn description(&self) -> &'static str {
            "flaky"
        }

        fn input_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }

        fn category(&self) -> ToolCategory {
            ToolCategory::DataQuery
        }

        async fn execute(&self, _context: &ToolContext, _input: serde_json::Value) -> Result<ToolOutput> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures_before_success {
                return Ok(ToolOutput::error("transient"));
            }
            Ok(ToolOutput::success("ok", json!({"n": n})))
        }
    }

    fn context() -> ToolContext {
        ToolContext {
            user_id: "u1".into(),
            role: campus_common::Role::new("admin"),
            conversation_id: "c1".into(),
            request_content: String::new(),
        }
    }

    async fn catalog(tools: Vec<FlakyTool>) -> Vec<Arc<ToolDescriptor>> {
        let mut registry = ToolRegistry::new(vec![], vec![]);
        let names: Vec<String> = tools.iter().map(|t| t.name.to_string()).collect();
        for tool in tools {
            registry.register_tool(Arc::new(tool));
        }
        registry.load_available(&names).await
    }

    fn flaky(name: &'static str, failures: usize) -> (FlakyTool, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            FlakyTool {
                name,
                failures_before_success: failures,
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }

    fn plan(value: serde_json::Value) -> WorkflowPlan {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn unmet_dependency_is_skipped_without_blocking_siblings() {
        let (broken, _) = flaky("broken", usize::MAX);
        let (ok, ok_calls) = flaky("ok", 0);
        let catalog = catalog(vec![broken, ok]).await;
        let engine = WorkflowEngine::new(&catalog, Duration::from_secs(1), 1);

        let report = engine
            .run(
                plan(json!({"steps": [
                    {"id": "a", "tool": "broken"},
                    {"id": "b", "tool": "ok", "depends_on": ["a"]},
                    {"id": "c", "tool": "ok"}
                ]})),
                &context(),
            )
            .await;

        assert_eq!(report.step("a").unwrap().status, StepStatus::Failed);
        assert_eq!(report.step("b").unwrap().status, StepStatus::Skipped);
        assert_eq!(report.step("b").unwrap().attempts, 0);
        assert_eq!(report.step("c").unwrap().status, StepStatus::Completed);
        assert_eq!(ok_calls.load(Ordering::SeqCst), 1);
        assert!(report.success, "non-critical failure keeps the run successful");
    }

    #[tokio::test]
    async fn retries_reenter_the_same_step() {
        let (flaky_tool, calls) = flaky("flaky", 2);
        let catalog = catalog(vec![flaky_tool]).await;
        let engine = WorkflowEngine::new(&catalog, Duration::from_secs(1), 2);

        let report = engine
            .run(plan(json!({"steps": [{"id": "a", "tool": "flaky"}]})), &context())
            .await;

        let step = report.step("a").unwrap();
        assert_eq!(step.status, StepStatus::Completed);
        assert_eq!(step.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn critical_failure_fails_the_run() {
        let (broken, calls) = flaky("broken", usize::MAX);
        let (ok, ok_calls) = flaky("ok", 0);
        let catalog = catalog(vec![broken, ok]).await;
        let engine = WorkflowEngine::new(&catalog, Duration::from_secs(1), 1);

        let report = engine
            .run(
                plan(json!({"steps": [
                    {"id": "a", "tool": "broken", "priority": "critical"},
                    {"id": "b", "tool": "ok"}
                ]})),
                &context(),
            )
            .await;

        assert!(!report.success);
        assert_eq!(report.failed_step.as_deref(), Some("a"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.step("b").unwrap().status, StepStatus::Skipped);
        assert_eq!(ok_calls.load(Ordering::SeqCst), 0);
        assert!(!report.into_output().success);
    }

    #[tokio::test]
    async fn steps_outside_the_catalog_fail() {
        let (ok, ok_calls) = flaky("ok", 0);
        let (hidden, hidden_calls) = flaky("hidden", 0);
        let mut registry = ToolRegistry::new(vec![], vec![]);
        registry.register_tool(Arc::new(ok));
        registry.register_tool(Arc::new(hidden));
        let catalog = registry.load_available(&["ok".to_string()]).await;
        let engine = WorkflowEngine::new(&catalog, Duration::from_secs(1), 1);

        let report = engine
            .run(
                plan(json!({"steps": [
                    {"id": "a", "tool": "hidden"},
                    {"id": "b", "tool": "ok"}
                ]})),
                &context(),
            )
            .await;

        let step = report.step("a").unwrap();
        assert_eq!(step.status, StepStatus::Failed);
        assert!(step.error.as_deref().unwrap().contains("not available"));
        assert_eq!(hidden_calls.load(Ordering::SeqCst), 0);
        assert_eq!(report.step("b").unwrap().status, StepStatus::Completed);
        assert_eq!(ok_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cycles_are_rejected() {
        let p = plan(json!({"steps": [
            {"id": "a", "tool": "x", "depends_on": ["b"]},
            {"id": "b", "tool": "x", "depends_on": ["a"]}
        ]}));
        assert!(p.validate().is_err());
    }

    #[test]
    fn order_respects_dependencies() {
        let p = plan(json!({"steps": [
            {"id": "late", "tool": "x", "depends_on": ["early"]},
            {"id": "early", "tool": "x"}
        ]}));
        let order = p.execution_order().unwrap();
        assert_eq!(order, vec![1, 0]);
    }
}
