use campus_common::Role;
use serde::Serialize;
use tracing::warn;

use crate::validation::InputValidator;

/// Tool group that authorizes destructive bulk operations.
const DATA_MANAGEMENT_GROUP: &str = "data_management";

/// Outcome of the pre-flight check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityVerdict {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl SecurityVerdict {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Gate evaluated before any tool work begins.
#[derive(Debug, Clone, Default)]
pub struct SecurityChecker {
    validator: InputValidator,
}

impl SecurityChecker {
    pub fn new(validator: InputValidator) -> Self {
        Self { validator }
    }

    /// `allowed_groups` is the caller's permission set from the role table.
    pub fn check(&self, role: &Role, content: &str, allowed_groups: &[String]) -> SecurityVerdict {
        if role.as_str().is_empty() {
            return SecurityVerdict::deny("缺少用户角色");
        }

        if let Some(issue) = self.validator.validate(content) {
            warn!(role = %role, ?issue, "request rejected by input validation");
            return SecurityVerdict::deny(issue.describe());
        }

        self.permission_gate(role, content, allowed_groups)
    }

    /// Role and destructive-intent checks only. Runs on every round, since
    /// the round number is client supplied.
    pub fn permission_gate(
        &self,
        role: &Role,
        content: &str,
        allowed_groups: &[String],
    ) -> SecurityVerdict {
        if role.as_str().is_empty() {
            return SecurityVerdict::deny("缺少用户角色");
        }

        if let Some(issue) = self.validator.destructive_phrase(content) {
            let permitted = allowed_groups.iter().any(|g| g == DATA_MANAGEMENT_GROUP);
            if !permitted {
                warn!(role = %role, ?issue, "destructive request denied for role");
                return SecurityVerdict::deny(issue.describe());
            }
        }

        SecurityVerdict::allow()
    }
}
