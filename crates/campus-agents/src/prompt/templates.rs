use campus_common::Role;

/// Which system prompt template a request gets. Exactly one applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptMode {
    Direct,
    Think,
    Agent,
}

impl PromptMode {
    /// Think optimisation wins over direct mode.
    pub fn from_flags(is_direct_mode: bool, enable_think_optimization: bool) -> Self {
        match (is_direct_mode, enable_think_optimization) {
            (_, true) => Self::Think,
            (true, false) => Self::Direct,
            (false, false) => Self::Agent,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Think => "think",
            Self::Agent => "agent",
        }
    }
}

pub(crate) fn role_label(role: &Role) -> &'static str {
    match role.as_str() {
        "admin" => "系统管理员",
        "principal" => "园长",
        "teacher" => "教师",
        "parent" => "家长",
        _ => "用户",
    }
}

pub(crate) const DIRECT_TEMPLATE: &str = "你是幼儿园管理系统的智能助手。\n\
直接、简洁地回答用户问题。需要实时数据时调用工具，不要编造数据。\n\
回答使用中文，数字保持与工具结果一致。";

pub(crate) const THINK_TEMPLATE: &str = "你是幼儿园管理系统的智能助手，当前用户身份：{role}。\n\
回答前先在内部梳理：用户真正想要什么、需要哪些数据、哪些工具能提供这些数据。\n\
涉及筛选、排序、统计或关联的查询必须使用 any_query，不要使用 read_data_record。\n\
工具结果返回后，基于结果给出结构化、可执行的回答；数据不足时说明缺少什么。";

pub(crate) const AGENT_TEMPLATE: &str = "你是幼儿园管理系统的智能代理，当前用户身份：{role}。\n\
你可以调用下列工具完成任务。一次只规划必要的工具调用，按依赖顺序执行。\n\
多步骤任务使用 run_workflow，每个步骤声明 depends_on 与 priority。\n\
所有数据必须来自工具结果；工具失败时如实告知并给出替代建议。";

pub(crate) const DECISION_TREE: &str = "## 工具选择决策树\n\
1. 用户要看数据？\n\
   - 带条件、排序、统计、分组或跨表关联 → any_query（参数化 SELECT）\n\
   - 只是列出某类记录，且无任何条件 → read_data_record\n\
2. 结果需要展示？→ render_component（chart / table / card / list）\n\
3. 问机构整体情况、满员率、运营概况？→ organization_overview\n\
4. 多步骤任务（策划活动、招生流程等）？→ run_workflow\n\
5. 需要跳转页面？→ navigate_page\n\
6. 闲聊或常识问题 → 不调用工具，直接回答";

pub(crate) const ORGANIZATION_UNAVAILABLE: &str = "机构现状数据暂时无法加载";

pub(crate) fn template_for(mode: PromptMode, role: &Role) -> String {
    match mode {
        PromptMode::Direct => DIRECT_TEMPLATE.to_string(),
        PromptMode::Think => THINK_TEMPLATE.replace("{role}", role_label(role)),
        PromptMode::Agent => AGENT_TEMPLATE.replace("{role}", role_label(role)),
    }
}
