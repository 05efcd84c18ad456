//! Static selection data: tool groups, intent routing, role permissions,
//! special request patterns and companion-group rules.

use crate::intent::Intent;

pub(crate) const UI_DISPLAY: &str = "ui_display";
pub(crate) const DATA_QUERY: &str = "data_query";
pub(crate) const ANALYSIS: &str = "analysis";
pub(crate) const WORKFLOW: &str = "workflow";
pub(crate) const PAGE_OPERATION: &str = "page_operation";
pub const DATA_MANAGEMENT: &str = "data_management";

/// General-purpose parameterizable query tool.
pub(crate) const QUERY_TOOL: &str = "any_query";
/// Naive full-scan reader; never chosen for complex queries.
pub(crate) const NAIVE_READER: &str = "read_data_record";
pub(crate) const DISPLAY_TOOL: &str = "render_component";

pub(crate) struct ToolGroup {
    pub name: &'static str,
    pub keywords: &'static [&'static str],
    pub max_tools: usize,
}

pub(crate) const GROUPS: &[ToolGroup] = &[
    ToolGroup {
        name: UI_DISPLAY,
        keywords: &["显示", "展示", "图表", "表格", "卡片", "列表", "可视化", "chart", "table"],
        max_tools: 1,
    },
    ToolGroup {
        name: DATA_QUERY,
        keywords: &["查询", "查找", "统计", "数据", "多少", "学生", "教师", "老师", "班级", "记录"],
        max_tools: 2,
    },
    ToolGroup {
        name: ANALYSIS,
        keywords: &["分析", "概况", "现状", "总览", "运营", "建议", "趋势", "满员率"],
        max_tools: 1,
    },
    ToolGroup {
        name: WORKFLOW,
        keywords: &["流程", "工作流", "策划", "安排", "步骤", "方案", "计划"],
        max_tools: 1,
    },
    ToolGroup {
        name: PAGE_OPERATION,
        keywords: &["打开", "跳转", "页面", "进入", "导航"],
        max_tools: 1,
    },
];

pub(crate) fn group(name: &str) -> Option<&'static ToolGroup> {
    GROUPS.iter().find(|g| g.name == name)
}

/// Tool groups an intent draws from, most relevant first.
pub(crate) fn groups_for_intent(intent: Intent) -> &'static [&'static str] {
    match intent {
        Intent::Query => &[UI_DISPLAY, DATA_QUERY],
        Intent::DataQuery => &[DATA_QUERY, UI_DISPLAY],
        Intent::DataVisualization => &[UI_DISPLAY, DATA_QUERY],
        Intent::PageOperation => &[PAGE_OPERATION],
        Intent::TaskManagement => &[WORKFLOW, UI_DISPLAY],
        Intent::ExpertConsultation => &[ANALYSIS, DATA_QUERY],
        Intent::Workflow => &[WORKFLOW],
        Intent::Conversation => &[],
    }
}

const ALL_GROUPS: &[&str] = &[
    UI_DISPLAY,
    DATA_QUERY,
    "data_visualization",
    ANALYSIS,
    WORKFLOW,
    PAGE_OPERATION,
    "web",
];

/// Built-in role table. Configured entries replace these per role.
pub(crate) fn default_permissions() -> Vec<(&'static str, Vec<&'static str>)> {
    let mut admin = ALL_GROUPS.to_vec();
    admin.push(DATA_MANAGEMENT);
    vec![
        ("admin", admin),
        ("principal", ALL_GROUPS.to_vec()),
        (
            "teacher",
            vec![UI_DISPLAY, DATA_QUERY, ANALYSIS, PAGE_OPERATION, WORKFLOW],
        ),
        ("parent", vec![UI_DISPLAY, PAGE_OPERATION]),
    ]
}

/// Request shapes that bypass intent routing.
pub(crate) struct SpecialPattern {
    pub name: &'static str,
    pub pattern: &'static str,
    pub forced_tools: &'static [&'static str],
    pub preferred_groups: &'static [&'static str],
    pub max_tools: usize,
}

pub(crate) const SPECIAL_PATTERNS: &[SpecialPattern] = &[
    SpecialPattern {
        name: "workflow_request",
        pattern: r"工作流|全流程|一键|自动化|策划.{0,10}活动|活动.{0,6}策划|(?i)\bworkflow\b",
        forced_tools: &["run_workflow", DISPLAY_TOOL],
        preferred_groups: &[],
        max_tools: 2,
    },
    SpecialPattern {
        name: "organization_overview",
        pattern: r"机构现状|机构概况|机构情况|运营情况|整体情况|园所概况|总体情况|经营状况",
        forced_tools: &[],
        preferred_groups: &[ANALYSIS, UI_DISPLAY],
        max_tools: 2,
    },
];

/// Selecting the first group suggests one tool from the second.
pub(crate) const COMBINATION_RULES: &[(&str, &str)] = &[
    (DATA_QUERY, UI_DISPLAY),
    (ANALYSIS, UI_DISPLAY),
    (WORKFLOW, UI_DISPLAY),
];

pub(crate) const GROUP_KEYWORD_SCORE: i32 = 2;
pub(crate) const NAME_TOKEN_SCORE: i32 = 3;
