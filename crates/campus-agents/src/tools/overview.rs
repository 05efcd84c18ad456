use async_trait::async_trait;
use campus_common::Result;
use campus_db::SharedCampusStore;
use serde_json::json;

use super::{Tool, ToolCategory, ToolContext, ToolOutput};

/// Headline organization figures: enrolment, staffing, capacity.
pub struct OrganizationOverviewTool {
    store: SharedCampusStore,
}

impl OrganizationOverviewTool {
    pub fn new(store: SharedCampusStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for OrganizationOverviewTool {
    fn name(&self) -> &'static str {
        "organization_overview"
    }

    fn description(&self) -> &'static str {
        "Current organization overview: student and teacher counts, class capacity and \
         occupancy, upcoming activities and open enrollment leads."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({ "type": "object", "properties": {} })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Analysis
    }

    fn weight(&self) -> i32 {
        5
    }

    async fn execute(&self, _context: &ToolContext, _input: serde_json::Value) -> Result<ToolOutput> {
        let status = self.store.lock().await.organization_status()?;
        let occupancy = status.occupancy_percent();
        Ok(ToolOutput::success(
            format!(
                "在读学生 {} 人，在职教师 {} 人，满员率 {:.1}%",
                status.active_students, status.active_teachers, occupancy
            ),
            json!({
                "status": status,
                "occupancy_percent": (occupancy * 10.0).round() / 10.0,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campus_db::CampusStore;

    #[tokio::test]
    async fn reports_seeded_figures() {
        let store = CampusStore::in_memory().unwrap();
        store.seed_demo().unwrap();
        let tool = OrganizationOverviewTool::new(store.into_shared());
        let context = ToolContext {
            user_id: "u1".into(),
            role: campus_common::Role::new("principal"),
            conversation_id: "c1".into(),
            request_content: String::new(),
        };
        let output = tool.execute(&context, json!({})).await.unwrap();
        assert!(output.success);
        assert_eq!(output.data["status"]["active_teachers"], 3);
        assert!(output.message.contains("在职教师 3 人"));
    }
}
