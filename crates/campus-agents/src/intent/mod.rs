mod cache;
mod classifier;
mod patterns;

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::features::QueryFeatures;

pub use cache::AnalysisCache;
pub use classifier::IntentClassifier;

/// Classified purpose of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// General information request; the default when nothing matches.
    Query,
    DataQuery,
    DataVisualization,
    PageOperation,
    TaskManagement,
    ExpertConsultation,
    Workflow,
    Conversation,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::DataQuery => "data_query",
            Self::DataVisualization => "data_visualization",
            Self::PageOperation => "page_operation",
            Self::TaskManagement => "task_management",
            Self::ExpertConsultation => "expert_consultation",
            Self::Workflow => "workflow",
            Self::Conversation => "conversation",
        }
    }

    /// Map a label from the model's taxonomy onto the local enum.
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let intent = match normalized.as_str() {
            "query" | "general_query" | "information_query" | "question" => Self::Query,
            "data_query" | "database_query" | "statistics" | "data_analysis" => Self::DataQuery,
            "data_visualization" | "visualization" | "chart" | "report" => {
                Self::DataVisualization
            }
            "page_operation" | "navigation" | "operation" => Self::PageOperation,
            "task_management" | "task" | "planning" => Self::TaskManagement,
            "expert_consultation" | "consultation" | "advice" => Self::ExpertConsultation,
            "workflow" | "complex_workflow" | "automation" => Self::Workflow,
            "conversation" | "chat" | "greeting" | "small_talk" => Self::Conversation,
            _ => return None,
        };
        Some(intent)
    }

    /// Whether answering this intent normally needs a tool.
    pub fn needs_tools(&self) -> bool {
        !matches!(self, Self::Conversation)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
    VeryComplex,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Moderate => "moderate",
            Self::Complex => "complex",
            Self::VeryComplex => "very_complex",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "simple" | "low" => Some(Self::Simple),
            "moderate" | "medium" => Some(Self::Moderate),
            "complex" | "high" => Some(Self::Complex),
            "very_complex" | "very_high" => Some(Self::VeryComplex),
            _ => None,
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMethod {
    Keyword,
    Ai,
    Cache,
    Default,
}

/// Result of classifying one request. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentAnalysis {
    pub intent: Intent,
    /// Other intents that matched with useful confidence, best first.
    pub secondary_intents: Vec<Intent>,
    pub confidence: f64,
    pub complexity: Complexity,
    pub features: QueryFeatures,
    pub required_capabilities: BTreeSet<String>,
    pub keywords: Vec<String>,
    pub requires_tools: bool,
    pub analysis_method: AnalysisMethod,
}

impl IntentAnalysis {
    /// Low-confidence analysis used whenever classification cannot decide.
    pub fn fallback() -> Self {
        Self {
            intent: Intent::Query,
            secondary_intents: Vec::new(),
            confidence: 0.3,
            complexity: Complexity::Simple,
            features: QueryFeatures::default(),
            required_capabilities: BTreeSet::new(),
            keywords: Vec::new(),
            requires_tools: false,
            analysis_method: AnalysisMethod::Default,
        }
    }

    /// Primary intent followed by the secondary ones.
    pub fn intents(&self) -> impl Iterator<Item = Intent> + '_ {
        std::iter::once(self.intent).chain(self.secondary_intents.iter().copied())
    }

    pub fn is_complex_query(&self) -> bool {
        self.features.is_complex()
    }
}

/// Capabilities implied by an intent and the detected query features.
pub(crate) fn capabilities_for(intent: Intent, features: &QueryFeatures) -> BTreeSet<String> {
    let mut caps = BTreeSet::new();
    let mut add = |c: &str| {
        caps.insert(c.to_string());
    };
    match intent {
        Intent::Query => add("information_lookup"),
        Intent::DataQuery => add("database_query"),
        Intent::DataVisualization => {
            add("ui_render");
            add("database_query");
        }
        Intent::PageOperation => add("page_navigation"),
        Intent::TaskManagement => add("task_planning"),
        Intent::ExpertConsultation => add("analysis"),
        Intent::Workflow => add("workflow"),
        Intent::Conversation => {}
    }
    if features.is_complex() {
        add("database_query");
        add("parameterized_query");
    }
    if features.has_statistics {
        add("aggregation");
    }
    caps
}
