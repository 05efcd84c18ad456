mod tables;

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, LazyLock};

use campus_common::Role;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::intent::IntentAnalysis;
use crate::tools::{LEGACY_TOOLS, ToolRegistry};
use tables::{
    COMBINATION_RULES, DATA_QUERY, DISPLAY_TOOL, GROUP_KEYWORD_SCORE, NAIVE_READER,
    NAME_TOKEN_SCORE, QUERY_TOOL, SPECIAL_PATTERNS, SpecialPattern, UI_DISPLAY,
};

pub use tables::DATA_MANAGEMENT;

static COMPILED_PATTERNS: LazyLock<Vec<(&'static SpecialPattern, Regex)>> = LazyLock::new(|| {
    SPECIAL_PATTERNS
        .iter()
        .filter_map(|p| Regex::new(p.pattern).ok().map(|re| (p, re)))
        .collect()
});

/// Role name -> allowed tool groups.
#[derive(Debug, Clone)]
pub struct PermissionTable {
    roles: HashMap<String, BTreeSet<String>>,
}

impl Default for PermissionTable {
    fn default() -> Self {
        let roles = tables::default_permissions()
            .into_iter()
            .map(|(role, groups)| {
                (
                    role.to_string(),
                    groups.into_iter().map(str::to_string).collect(),
                )
            })
            .collect();
        Self { roles }
    }
}

impl PermissionTable {
    /// Built-in table with configured roles replacing or adding entries.
    pub fn with_overrides(overrides: &HashMap<String, Vec<String>>) -> Self {
        let mut table = Self::default();
        for (role, groups) in overrides {
            let role = Role::new(role.as_str());
            table
                .roles
                .insert(role.as_str().to_string(), groups.iter().cloned().collect());
        }
        table
    }

    /// Unknown roles may only display.
    pub fn allowed_groups(&self, role: &Role) -> BTreeSet<String> {
        self.roles
            .get(role.as_str())
            .cloned()
            .unwrap_or_else(|| BTreeSet::from([UI_DISPLAY.to_string()]))
    }

    pub fn allows(&self, role: &Role, group: &str) -> bool {
        match self.roles.get(role.as_str()) {
            Some(groups) => groups.contains(group),
            None => group == UI_DISPLAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Complexity override: general query tool plus display.
    ComplexQuery,
    SpecialPattern,
    IntentGroups,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSelection {
    pub tools: Vec<String>,
    pub strategy: SelectionStrategy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<&'static str>,
}

impl ToolSelection {
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

/// Picks the bounded tool catalog offered to the model for one request.
pub struct ToolSelector {
    registry: Arc<ToolRegistry>,
    permissions: PermissionTable,
}

impl ToolSelector {
    pub fn new(registry: Arc<ToolRegistry>, permissions: PermissionTable) -> Self {
        Self {
            registry,
            permissions,
        }
    }

    pub fn permissions(&self) -> &PermissionTable {
        &self.permissions
    }

    /// Select at most `max_tools` known tool names for `analysis`.
    /// `content` is the request text used for keyword scoring.
    pub fn select(
        &self,
        analysis: &IntentAnalysis,
        content: &str,
        role: &Role,
        max_tools: usize,
    ) -> ToolSelection {
        let max_tools = max_tools.max(1);
        let text = content.to_lowercase();

        let selection = if analysis.is_complex_query() && self.permissions.allows(role, DATA_QUERY) {
            self.complex_query(analysis, &text, role, max_tools)
        } else if let Some(selection) = self.special_pattern(&text, role, max_tools) {
            selection
        } else {
            self.by_intent_groups(analysis, &text, role, max_tools)
        };

        if selection.is_empty() && analysis.requires_tools {
            warn!(role = %role, "selection came back empty; using fallback tools");
            return ToolSelection {
                tools: self.finalize(Vec::new(), self.fallback_for(role), max_tools),
                strategy: SelectionStrategy::Fallback,
                pattern: None,
            };
        }

        debug!(
            strategy = ?selection.strategy,
            tools = ?selection.tools,
            "tools selected"
        );
        selection
    }

    fn complex_query(
        &self,
        analysis: &IntentAnalysis,
        text: &str,
        role: &Role,
        max_tools: usize,
    ) -> ToolSelection {
        let mandatory = if max_tools == 1 {
            vec![QUERY_TOOL.to_string()]
        } else if self.permissions.allows(role, UI_DISPLAY) {
            vec![DISPLAY_TOOL.to_string(), QUERY_TOOL.to_string()]
        } else {
            vec![QUERY_TOOL.to_string()]
        };

        let auxiliary: Vec<String> = self
            .scored_candidates(analysis, text, role)
            .into_iter()
            .filter(|name| name != NAIVE_READER)
            .collect();

        let mut tools = self.ordered(mandatory, auxiliary);
        tools.retain(|name| name != NAIVE_READER);
        tools.truncate(max_tools);
        ToolSelection {
            tools,
            strategy: SelectionStrategy::ComplexQuery,
            pattern: None,
        }
    }

    fn special_pattern(&self, text: &str, role: &Role, max_tools: usize) -> Option<ToolSelection> {
        let (pattern, _) = COMPILED_PATTERNS.iter().find(|(_, re)| re.is_match(text))?;
        let cap = pattern.max_tools.min(max_tools);

        let mut tools: Vec<String> = if pattern.forced_tools.is_empty() {
            pattern
                .preferred_groups
                .iter()
                .filter(|group| self.permissions.allows(role, group))
                .filter_map(|group| self.ranked_group(group, text, &[]).into_iter().next())
                .collect()
        } else {
            pattern
                .forced_tools
                .iter()
                .filter(|name| self.role_may_use(role, name))
                .map(|name| name.to_string())
                .collect()
        };
        tools.retain(|name| self.registry.is_known(name));
        tools.dedup();
        tools.truncate(cap);

        if tools.is_empty() {
            return None;
        }
        Some(ToolSelection {
            tools,
            strategy: SelectionStrategy::SpecialPattern,
            pattern: Some(pattern.name),
        })
    }

    fn by_intent_groups(
        &self,
        analysis: &IntentAnalysis,
        text: &str,
        role: &Role,
        max_tools: usize,
    ) -> ToolSelection {
        let candidates = self.scored_candidates(analysis, text, role);
        ToolSelection {
            tools: self.finalize(Vec::new(), candidates, max_tools),
            strategy: SelectionStrategy::IntentGroups,
            pattern: None,
        }
    }

    /// Intent groups the role may use, with companion suggestions appended.
    fn scored_candidates(&self, analysis: &IntentAnalysis, text: &str, role: &Role) -> Vec<String> {
        let mut groups: Vec<&'static str> = Vec::new();
        for intent in analysis.intents() {
            for group in tables::groups_for_intent(intent) {
                if !groups.contains(group) {
                    groups.push(*group);
                }
            }
        }
        if groups.is_empty() {
            groups.push(UI_DISPLAY);
        }
        groups.retain(|group| self.permissions.allows(role, group));

        let mut picked: Vec<String> = Vec::new();
        for group in &groups {
            let cap = tables::group(group).map(|g| g.max_tools).unwrap_or(1);
            for name in self.ranked_group(group, text, &analysis.keywords).into_iter().take(cap) {
                if !picked.contains(&name) {
                    picked.push(name);
                }
            }
        }

        for (from, companion) in COMBINATION_RULES {
            if !groups.contains(from) || !self.permissions.allows(role, companion) {
                continue;
            }
            let already = picked
                .iter()
                .any(|name| self.registry.category_of(name).map(|c| c.group()) == Some(*companion));
            if already {
                continue;
            }
            if let Some(name) = self.ranked_group(companion, text, &[]).into_iter().next() {
                picked.push(name);
            }
        }
        picked
    }

    /// Group members sorted by score, best first.
    fn ranked_group(&self, group: &str, text: &str, keywords: &[String]) -> Vec<String> {
        let group_keywords = tables::group(group).map(|g| g.keywords).unwrap_or(&[]);
        let keyword_hits = group_keywords
            .iter()
            .filter(|kw| text.contains(*kw) || keywords.iter().any(|k| k == *kw))
            .count() as i32;

        let mut members = self.registry.names_in_group(group);
        members.extend(
            LEGACY_TOOLS
                .iter()
                .filter(|alias| alias.replacement.is_none() && alias.category.group() == group)
                .map(|alias| alias.name.to_string()),
        );

        let mut scored: Vec<(i32, String)> = members
            .into_iter()
            .map(|name| {
                let token_hits = name
                    .split('_')
                    .filter(|token| token.len() > 2 && text.contains(token))
                    .count() as i32;
                let score = self.registry.static_weight(&name)
                    + keyword_hits * GROUP_KEYWORD_SCORE
                    + token_hits * NAME_TOKEN_SCORE;
                (score, name)
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().map(|(_, name)| name).collect()
    }

    /// Configured fallback tools this role may use.
    pub fn fallback_for(&self, role: &Role) -> Vec<String> {
        self.registry
            .fallback_tools()
            .iter()
            .filter(|name| self.role_may_use(role, name))
            .cloned()
            .collect()
    }

    fn role_may_use(&self, role: &Role, name: &str) -> bool {
        self.registry
            .category_of(name)
            .is_some_and(|category| self.permissions.allows(role, category.group()))
    }

    /// `mandatory` first, then defaults, then the rest by weight.
    fn ordered(&self, mandatory: Vec<String>, candidates: Vec<String>) -> Vec<String> {
        let mut rest = candidates;
        rest.sort_by_key(|name| std::cmp::Reverse(self.registry.static_weight(name)));

        let mut tools: Vec<String> = Vec::new();
        let defaults = self.registry.default_tools().iter().cloned();
        for name in mandatory.into_iter().chain(defaults).chain(rest) {
            if self.registry.is_known(&name) && !tools.contains(&name) {
                tools.push(name);
            }
        }
        tools
    }

    fn finalize(&self, mandatory: Vec<String>, candidates: Vec<String>, max_tools: usize) -> Vec<String> {
        let mut tools = self.ordered(mandatory, candidates);
        tools.truncate(max_tools);
        tools
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::QueryFeatures;
    use crate::intent::{AnalysisMethod, Complexity, Intent};
    use campus_config::ToolsConfig;
    use campus_db::CampusStore;

    fn selector() -> ToolSelector {
        let store = CampusStore::in_memory().unwrap().into_shared();
        let registry = ToolRegistry::with_builtin_tools(store, &ToolsConfig::default());
        ToolSelector::new(Arc::new(registry), PermissionTable::default())
    }

    fn analysis(intent: Intent, content: &str) -> IntentAnalysis {
        let features = QueryFeatures::detect(content);
        IntentAnalysis {
            intent,
            secondary_intents: Vec::new(),
            confidence: 0.9,
            complexity: features.complexity(),
            requires_tools: intent.needs_tools() || features.is_complex(),
            features,
            required_capabilities: BTreeSet::new(),
            keywords: Vec::new(),
            analysis_method: AnalysisMethod::Keyword,
        }
    }

    #[test]
    fn complex_query_includes_general_query_tool() {
        let s = selector();
        for text in ["查询所有男生", "统计在职教师数量", "按班级排序学生", "每个班的老师分别是谁"] {
            let a = analysis(Intent::Query, text);
            let selection = s.select(&a, text, &Role::new("principal"), 5);
            assert_eq!(selection.strategy, SelectionStrategy::ComplexQuery, "{text}");
            assert!(selection.tools.contains(&QUERY_TOOL.to_string()), "{text}");
            assert!(!selection.tools.contains(&NAIVE_READER.to_string()), "{text}");
        }
    }

    #[test]
    fn complex_query_orders_display_then_query() {
        let s = selector();
        let text = "统计在职教师数量";
        let selection = s.select(&analysis(Intent::DataQuery, text), text, &Role::new("teacher"), 5);
        assert_eq!(selection.tools[0], DISPLAY_TOOL);
        assert_eq!(selection.tools[1], QUERY_TOOL);
    }

    #[test]
    fn complex_query_with_single_slot_keeps_query_tool() {
        let s = selector();
        let text = "查询所有男生";
        let selection = s.select(&analysis(Intent::Query, text), text, &Role::new("admin"), 1);
        assert_eq!(selection.tools, vec![QUERY_TOOL.to_string()]);
    }

    #[test]
    fn selection_is_bounded_and_known() {
        let s = selector();
        let intents = [
            Intent::Query,
            Intent::DataQuery,
            Intent::DataVisualization,
            Intent::PageOperation,
            Intent::TaskManagement,
            Intent::ExpertConsultation,
            Intent::Workflow,
            Intent::Conversation,
        ];
        for intent in intents {
            for role in ["admin", "teacher", "parent", "visitor"] {
                for max in 1..=5 {
                    let a = analysis(intent, "显示学生列表并分析");
                    let selection = s.select(&a, "显示学生列表并分析", &Role::new(role), max);
                    assert!(selection.len() <= max, "{intent} {role} {max}");
                    assert!(selection.tools.iter().all(|t| s.registry.is_known(t)));
                }
            }
        }
    }

    #[test]
    fn fallback_respects_role_permissions() {
        let s = selector();
        assert_eq!(s.fallback_for(&Role::new("parent")), vec![DISPLAY_TOOL.to_string()]);
        assert_eq!(
            s.fallback_for(&Role::new("teacher")),
            vec![DISPLAY_TOOL.to_string(), QUERY_TOOL.to_string()]
        );
    }

    #[test]
    fn unknown_role_only_displays() {
        let s = selector();
        let text = "显示学生列表";
        let selection = s.select(&analysis(Intent::DataQuery, text), text, &Role::new("visitor"), 5);
        assert_eq!(selection.tools, vec![DISPLAY_TOOL.to_string()]);
    }

    #[test]
    fn simple_listing_may_use_naive_reader() {
        let s = selector();
        let text = "显示学生列表";
        let selection = s.select(&analysis(Intent::DataQuery, text), text, &Role::new("teacher"), 5);
        assert_eq!(selection.strategy, SelectionStrategy::IntentGroups);
        assert_eq!(selection.tools[0], DISPLAY_TOOL);
        assert!(selection.tools.contains(&QUERY_TOOL.to_string()));
    }

    #[test]
    fn workflow_pattern_forces_workflow_tool() {
        let s = selector();
        let text = "帮我策划一个春季亲子活动";
        let selection = s.select(&analysis(Intent::TaskManagement, text), text, &Role::new("principal"), 5);
        assert_eq!(selection.strategy, SelectionStrategy::SpecialPattern);
        assert_eq!(selection.pattern, Some("workflow_request"));
        assert_eq!(selection.tools, vec!["run_workflow".to_string(), DISPLAY_TOOL.to_string()]);
    }

    #[test]
    fn workflow_pattern_respects_permissions() {
        let s = selector();
        let text = "帮我策划一个春季亲子活动";
        let selection = s.select(&analysis(Intent::TaskManagement, text), text, &Role::new("parent"), 5);
        assert!(!selection.tools.contains(&"run_workflow".to_string()));
    }

    #[test]
    fn overview_pattern_prefers_analysis() {
        let s = selector();
        let text = "看看机构现状";
        let selection = s.select(&analysis(Intent::ExpertConsultation, text), text, &Role::new("principal"), 5);
        assert_eq!(selection.pattern, Some("organization_overview"));
        assert_eq!(selection.tools[0], "organization_overview");
    }

    #[test]
    fn conversation_defaults_to_display() {
        let s = selector();
        let mut a = analysis(Intent::Conversation, "你好");
        a.complexity = Complexity::Simple;
        let selection = s.select(&a, "你好", &Role::new("teacher"), 5);
        assert_eq!(selection.tools, vec![DISPLAY_TOOL.to_string()]);
    }

    #[test]
    fn page_operation_uses_client_action_tool() {
        let s = selector();
        let text = "打开学生管理页面";
        let selection = s.select(&analysis(Intent::PageOperation, text), text, &Role::new("parent"), 5);
        assert!(selection.tools.contains(&"navigate_page".to_string()));
    }

    #[test]
    fn configured_roles_override_defaults() {
        let overrides = HashMap::from([(
            "Parent".to_string(),
            vec!["ui_display".to_string(), "data_query".to_string()],
        )]);
        let table = PermissionTable::with_overrides(&overrides);
        assert!(table.allows(&Role::new("parent"), "data_query"));
        assert!(!table.allows(&Role::new("parent"), "page_operation"));
        assert!(table.allowed_groups(&Role::new("admin")).contains(DATA_MANAGEMENT));
        assert_eq!(table.allowed_groups(&Role::new("guest")).len(), 1);
    }
}
