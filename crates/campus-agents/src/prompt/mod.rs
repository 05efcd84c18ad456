mod cache;
mod templates;

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use campus_common::{Result, Role};
use campus_db::{OrganizationStatus, SharedCampusStore};
use tracing::{debug, instrument, warn};

use crate::providers::ToolDefinition;
use templates::{DECISION_TREE, ORGANIZATION_UNAVAILABLE, template_for};

pub use cache::{PromptCache, PromptCacheStats};
pub use templates::PromptMode;

/// Live organization figures for the system prompt.
#[async_trait]
pub trait OrganizationStatusSource: Send + Sync {
    async fn organization_status(&self) -> Result<OrganizationStatus>;
}

#[async_trait]
impl OrganizationStatusSource for SharedCampusStore {
    async fn organization_status(&self) -> Result<OrganizationStatus> {
        self.lock().await.organization_status()
    }
}

/// Everything besides the role that shapes a system prompt.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub mode: PromptMode,
    pub page_context: Option<&'a serde_json::Value>,
    pub tools: &'a [ToolDefinition],
    pub memories: &'a [String],
}

impl PromptContext<'_> {
    /// Stable hash over the parts that change the prompt text.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.mode.hash(&mut hasher);
        if let Some(page) = self.page_context {
            page.to_string().hash(&mut hasher);
        }
        for tool in self.tools {
            tool.name.hash(&mut hasher);
        }
        self.memories.hash(&mut hasher);
        hasher.finish()
    }
}

/// Assembles system prompts through [`PromptCache`].
pub struct PromptBuilder {
    cache: PromptCache,
    organization: Option<Arc<dyn OrganizationStatusSource>>,
}

impl PromptBuilder {
    pub fn new(prompt_ttl: Duration, organization_ttl: Duration) -> Self {
        Self {
            cache: PromptCache::new(prompt_ttl, organization_ttl),
            organization: None,
        }
    }

    pub fn with_organization_source(mut self, source: Arc<dyn OrganizationStatusSource>) -> Self {
        self.set_organization_source(source);
        self
    }

    pub fn set_organization_source(&mut self, source: Arc<dyn OrganizationStatusSource>) {
        self.organization = Some(source);
        self.cache.invalidate_organization();
    }

    pub fn cache(&self) -> &PromptCache {
        &self.cache
    }

    #[instrument(skip(self, context), fields(role = %role, mode = context.mode.as_str()))]
    pub async fn build(&self, role: &Role, context: &PromptContext<'_>) -> Arc<str> {
        let fingerprint = context.fingerprint();
        if let Some(hit) = self.cache.prompt(role, fingerprint) {
            debug!("system prompt served from cache");
            return hit;
        }

        let organization = self.organization_text().await;
        let decision_tree = self.decision_tree();

        let mut sections = vec![template_for(context.mode, role)];
        sections.push(organization.to_string());
        if let Some(page) = context.page_context {
            sections.push(format!("## 当前页面\n{page}"));
        }
        if !context.tools.is_empty() {
            let listing: Vec<String> = context
                .tools
                .iter()
                .map(|tool| format!("- {}: {}", tool.name, tool.description))
                .collect();
            sections.push(format!("## 可用工具\n{}", listing.join("\n")));
        }
        sections.push(decision_tree.to_string());
        if !context.memories.is_empty() {
            let snippets: Vec<String> = context.memories.iter().map(|m| format!("- {m}")).collect();
            sections.push(format!("## 相关记忆\n{}", snippets.join("\n")));
        }

        let prompt: Arc<str> = Arc::from(sections.join("\n\n"));
        self.cache.store_prompt(role, fingerprint, Arc::clone(&prompt));
        debug!(chars = prompt.chars().count(), "system prompt built");
        prompt
    }

    async fn organization_text(&self) -> Arc<str> {
        if let Some(cached) = self.cache.organization() {
            return cached;
        }
        let Some(source) = &self.organization else {
            return Arc::from(format!("## {ORGANIZATION_UNAVAILABLE}"));
        };
        match source.organization_status().await {
            Ok(status) => {
                let text: Arc<str> = Arc::from(format_organization(&status));
                self.cache.store_organization(Arc::clone(&text));
                text
            }
            // Not cached, so the next build retries.
            Err(e) => {
                warn!("failed to load organization status: {e}");
                Arc::from(format!("## {ORGANIZATION_UNAVAILABLE}"))
            }
        }
    }

    fn decision_tree(&self) -> Arc<str> {
        if let Some(tree) = self.cache.decision_tree() {
            return tree;
        }
        let tree: Arc<str> = Arc::from(DECISION_TREE);
        self.cache.store_decision_tree(Arc::clone(&tree));
        tree
    }
}

fn format_organization(status: &OrganizationStatus) -> String {
    format!(
        "## 机构现状\n\
         - 在读学生：{} 人（累计 {} 人）\n\
         - 在职教师：{} 人（累计 {} 人）\n\
         - 班级：{} 个，总容量 {} 人，满员率 {:.1}%\n\
         - 近期活动：{} 个\n\
         - 待跟进招生线索：{} 条",
        status.active_students,
        status.total_students,
        status.active_teachers,
        status.total_teachers,
        status.total_classes,
        status.total_capacity,
        status.occupancy_percent(),
        status.upcoming_activities,
        status.open_leads,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use campus_common::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl OrganizationStatusSource for CountingSource {
        async fn organization_status(&self) -> Result<OrganizationStatus> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Database("offline".to_string()));
            }
            Ok(OrganizationStatus {
                active_students: 90,
                total_capacity: 120,
                active_teachers: 3,
                ..Default::default()
            })
        }
    }

    fn builder(fail: bool) -> (PromptBuilder, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = CountingSource {
            calls: Arc::clone(&calls),
            fail,
        };
        let builder = PromptBuilder::new(Duration::from_secs(60), Duration::from_secs(60))
            .with_organization_source(Arc::new(source));
        (builder, calls)
    }

    fn context<'a>(mode: PromptMode, memories: &'a [String]) -> PromptContext<'a> {
        PromptContext {
            mode,
            page_context: None,
            tools: &[],
            memories,
        }
    }

    #[tokio::test]
    async fn second_build_hits_cache() {
        let (builder, calls) = builder(false);
        let role = Role::new("principal");
        let first = builder.build(&role, &context(PromptMode::Agent, &[])).await;
        let second = builder.build(&role, &context(PromptMode::Agent, &[])).await;
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.contains("在职教师：3 人"));
        assert!(first.contains("满员率 75.0%"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn organization_status_is_shared_across_prompts() {
        let (builder, calls) = builder(false);
        let memories = vec!["喜欢表格".to_string()];
        builder.build(&Role::new("teacher"), &context(PromptMode::Think, &[])).await;
        let prompt = builder
            .build(&Role::new("teacher"), &context(PromptMode::Think, &memories))
            .await;
        assert!(prompt.contains("喜欢表格"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(builder.cache().stats().prompts, 2);
    }

    #[tokio::test]
    async fn invalidation_refetches_organization_status() {
        let (builder, calls) = builder(false);
        let role = Role::new("principal");
        builder.build(&role, &context(PromptMode::Direct, &[])).await;
        builder.cache().invalidate_organization();
        builder.build(&role, &context(PromptMode::Direct, &[])).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_status_degrades_to_notice() {
        let (builder, _) = builder(true);
        let prompt = builder
            .build(&Role::new("principal"), &context(PromptMode::Agent, &[]))
            .await;
        assert!(prompt.contains(ORGANIZATION_UNAVAILABLE));
        assert!(prompt.contains("工具选择决策树"));
    }

    #[test]
    fn fingerprint_tracks_mode_and_tools() {
        let tools = vec![ToolDefinition {
            name: "any_query".to_string(),
            description: String::new(),
            input_schema: serde_json::json!({}),
        }];
        let a = context(PromptMode::Agent, &[]);
        let b = PromptContext {
            tools: &tools,
            ..a
        };
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), context(PromptMode::Think, &[]).fingerprint());
        assert_eq!(a.fingerprint(), context(PromptMode::Agent, &[]).fingerprint());
    }
}
