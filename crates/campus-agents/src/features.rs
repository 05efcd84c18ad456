//! Query feature detection shared by the intent classifier and the tool
//! selector. Both consume the same [`QueryFeatures`] value, so the
//! complexity override and selection scoring can never disagree.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::intent::Complexity;

struct FeaturePatterns {
    filter: Vec<Regex>,
    sort: Vec<Regex>,
    aggregation: Vec<Regex>,
    join: Vec<Regex>,
}

const FILTER_PATTERNS: &[&str] = &[
    r"男生|女生|男孩|女孩|男童|女童|男性|女性",
    r"\d+\s*岁|年龄|岁以上|岁以下",
    r"[小中大]\s*[一二三四五六\d]?\s*班|班级|年级",
    r"在职|离职|在读|毕业|休学|退学|状态为|已发布|草稿|未跟进",
    r"大于|小于|超过|不足|以上|以下|不少于|不超过|之间",
    r"本月|上月|今年|去年|本周|最近\s*\d*\s*[天周月]",
    r"(?i)\b(where|male|female|older than|younger than|status)\b",
];

const SORT_PATTERNS: &[&str] = &[
    r"排序|排名|排行|倒序|升序|降序",
    r"最高|最低|最多|最少|最大|最小|最早|最晚",
    r"前\s*\d+\s*[名个位]|前[一二三四五六七八九十]+[名个位]",
    r"(?i)\b(order by|sort|rank|top\s*\d+)\b",
];

const AGGREGATION_PATTERNS: &[&str] = &[
    r"统计|数量|多少|几个|几位|几名|总数|总共|合计|总和|汇总",
    r"平均|比例|占比|百分比|比率|增长率|出勤率|满员率",
    r"(?i)\b(count|sum|average|avg|ratio|how many|total)\b",
];

const JOIN_PATTERNS: &[&str] = &[
    r"及其|以及对应|对应的|关联|所属|分别",
    r"每个班|各班|各个|每位老师|每个老师|按.{1,6}分组|按.{1,6}统计",
    r"(?i)\b(join|per class|for each|group by)\b",
];

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
}

static PATTERNS: LazyLock<FeaturePatterns> = LazyLock::new(|| FeaturePatterns {
    filter: compile(FILTER_PATTERNS),
    sort: compile(SORT_PATTERNS),
    aggregation: compile(AGGREGATION_PATTERNS),
    join: compile(JOIN_PATTERNS),
});

/// The four orthogonal query features.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryFeatures {
    pub has_filters: bool,
    pub has_sorting: bool,
    pub has_statistics: bool,
    pub has_joins: bool,
    /// Matched fragments, kept for logging and keyword extraction.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched: Vec<String>,
}

impl QueryFeatures {
    pub fn detect(text: &str) -> Self {
        let patterns = &*PATTERNS;
        let mut matched = Vec::new();
        let mut scan = |set: &[Regex]| {
            let mut hit = false;
            for re in set {
                if let Some(m) = re.find(text) {
                    hit = true;
                    let fragment = m.as_str().trim().to_string();
                    if !fragment.is_empty() && !matched.contains(&fragment) {
                        matched.push(fragment);
                    }
                }
            }
            hit
        };

        let has_filters = scan(&patterns.filter);
        let has_sorting = scan(&patterns.sort);
        let has_statistics = scan(&patterns.aggregation);
        let has_joins = scan(&patterns.join);

        Self {
            has_filters,
            has_sorting,
            has_statistics,
            has_joins,
            matched,
        }
    }

    pub fn count(&self) -> usize {
        [
            self.has_filters,
            self.has_sorting,
            self.has_statistics,
            self.has_joins,
        ]
        .iter()
        .filter(|f| **f)
        .count()
    }

    /// Any single feature makes the request a complex query that must go
    /// through the parameterizable query tool.
    pub fn is_complex(&self) -> bool {
        self.count() > 0
    }

    pub fn complexity(&self) -> Complexity {
        match self.count() {
            0 => Complexity::Simple,
            1 | 2 => Complexity::Complex,
            _ => Complexity::VeryComplex,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gender_filter_detected() {
        let f = QueryFeatures::detect("查询所有男生");
        assert!(f.has_filters);
        assert!(f.is_complex());
    }

    #[test]
    fn active_teacher_count_has_statistics_and_filters() {
        let f = QueryFeatures::detect("统计在职教师数量");
        assert!(f.has_statistics);
        assert!(f.has_filters);
        assert!(!f.has_sorting);
        assert_eq!(f.complexity(), Complexity::Complex);
    }

    #[test]
    fn ranking_and_grouping() {
        let f = QueryFeatures::detect("按班级统计出勤率并排序，取前3名");
        assert!(f.has_sorting);
        assert!(f.has_statistics);
        assert!(f.has_joins);
        assert_eq!(f.complexity(), Complexity::VeryComplex);
    }

    #[test]
    fn plain_listing_is_simple() {
        let f = QueryFeatures::detect("显示学生列表");
        assert!(!f.is_complex());
        assert_eq!(f.complexity(), Complexity::Simple);
        assert!(f.matched.is_empty());
    }

    #[test]
    fn english_signals() {
        let f = QueryFeatures::detect("how many female students per class");
        assert!(f.has_statistics);
        assert!(f.has_filters);
        assert!(f.has_joins);
    }
}
