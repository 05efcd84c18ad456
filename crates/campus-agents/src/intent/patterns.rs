use std::sync::LazyLock;

use regex::Regex;

use super::Intent;

/// One row of the keyword tier: an intent, its trigger words, its regex
/// patterns and the confidence a regex hit is worth.
pub(super) struct IntentRule {
    pub intent: Intent,
    pub keywords: &'static [&'static str],
    pub patterns: &'static [&'static str],
    pub weight: f64,
}

pub(super) const INTENT_RULES: &[IntentRule] = &[
    IntentRule {
        intent: Intent::Conversation,
        keywords: &["你好", "您好", "谢谢", "再见", "早上好", "hello", "thanks"],
        patterns: &[r"^\s*(你好|您好|hi|hello|嗨)[!！。.\s]*$", r"^\s*(谢谢|多谢|感谢)"],
        weight: 0.95,
    },
    IntentRule {
        intent: Intent::PageOperation,
        keywords: &["导航", "跳转", "打开", "进入", "切换", "返回", "页面", "菜单"],
        patterns: &[r"(打开|进入|跳转到|切换到|前往).{0,10}(页面|模块|菜单|列表)"],
        weight: 0.9,
    },
    IntentRule {
        intent: Intent::DataVisualization,
        keywords: &["图表", "表格", "可视化", "柱状图", "饼图", "折线图", "趋势图", "展示"],
        patterns: &[
            r"(生成|画|做|展示|显示).{0,12}(图表|柱状图|饼图|折线图|趋势图)",
            r"(?i)\b(chart|graph|visuali[sz]e)\b",
        ],
        weight: 0.9,
    },
    IntentRule {
        intent: Intent::DataQuery,
        keywords: &[
            "查询", "查看", "统计", "多少", "名单", "列表", "学生", "教师", "老师", "班级",
            "数量", "报名",
        ],
        patterns: &[
            r"(查询|查看|统计|列出|显示).{0,12}(学生|幼儿|教师|老师|班级|活动|家长|线索)",
            r"(学生|幼儿|教师|老师|班级).{0,6}(有多少|数量|名单|列表|人数)",
            r"(?i)\b(how many|list|show)\b.{0,20}\b(students|teachers|classes)\b",
        ],
        weight: 0.88,
    },
    IntentRule {
        intent: Intent::TaskManagement,
        keywords: &["任务", "计划", "待办", "提醒", "安排", "日程"],
        patterns: &[r"(创建|新建|安排|添加).{0,8}(任务|计划|待办|日程|提醒)"],
        weight: 0.85,
    },
    IntentRule {
        intent: Intent::ExpertConsultation,
        keywords: &["咨询", "建议", "分析", "怎么办", "如何", "方案", "评估"],
        patterns: &[
            r"(给|提供).{0,6}(建议|方案)",
            r"(如何|怎么|怎样).{0,10}(提高|提升|改善|优化|解决)",
        ],
        weight: 0.85,
    },
    IntentRule {
        intent: Intent::Workflow,
        keywords: &["工作流", "流程", "一键", "策划", "全流程"],
        patterns: &[
            r"(一键|自动|帮我).{0,8}(策划|创建|组织|发布).{0,10}(活动|招生|流程)",
            r"(?i)\bworkflow\b",
        ],
        weight: 0.92,
    },
    IntentRule {
        intent: Intent::Query,
        keywords: &["什么", "介绍", "说明", "规定", "政策"],
        patterns: &[r"(什么是|介绍一下|说明一下)"],
        weight: 0.75,
    },
];

pub(super) struct CompiledRule {
    pub rule: &'static IntentRule,
    pub regexes: Vec<Regex>,
}

pub(super) static COMPILED_RULES: LazyLock<Vec<CompiledRule>> = LazyLock::new(|| {
    INTENT_RULES
        .iter()
        .map(|rule| CompiledRule {
            rule,
            regexes: rule
                .patterns
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect(),
        })
        .collect()
});

/// Confidence contributed by one rule for `text` (already lowercased), plus
/// the keywords that hit.
pub(super) fn score_rule(compiled: &CompiledRule, text: &str) -> (f64, Vec<&'static str>) {
    let hits: Vec<&'static str> = compiled
        .rule
        .keywords
        .iter()
        .copied()
        .filter(|k| text.contains(k))
        .collect();
    let regex_hit = compiled.regexes.iter().any(|re| re.is_match(text));

    let weight = compiled.rule.weight;
    let confidence = if regex_hit {
        // Extra keyword hits corroborate a pattern match slightly.
        (weight + 0.02 * hits.len().saturating_sub(1) as f64).min(0.99)
    } else if hits.is_empty() {
        0.0
    } else {
        // Keywords alone never clear the short-circuit threshold.
        (weight * 0.6 + 0.05 * (hits.len().min(3) as f64 - 1.0)).min(weight * 0.75)
    };
    (confidence, hits)
}
