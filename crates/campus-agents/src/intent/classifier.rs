use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::patterns::{COMPILED_RULES, score_rule};
use super::{AnalysisCache, AnalysisMethod, Complexity, Intent, IntentAnalysis, capabilities_for};
use crate::features::QueryFeatures;
use crate::model_router::{ChatParams, ModelRouter, ModelTier};
use crate::providers::ChatMessage;

/// Secondary intents must reach this confidence to be kept.
const SECONDARY_MIN_CONFIDENCE: f64 = 0.5;

const CLASSIFY_SYSTEM_PROMPT: &str = "你是教育管理系统的意图分析器。根据用户输入输出一个 JSON 对象，不要输出其他内容：\n\
{\"intent\": \"data_query|data_visualization|page_operation|task_management|expert_consultation|workflow|query|conversation\", \
\"complexity\": \"simple|moderate|complex|very_complex\", \
\"confidence\": 0.0-1.0, \
\"requires_tools\": true|false, \
\"capabilities\": [\"...\"], \
\"keywords\": [\"...\"]}";

/// Outcome of the keyword tier: best rule plus corroborating ones.
#[derive(Debug, Clone)]
struct KeywordMatch {
    intent: Intent,
    confidence: f64,
    secondary: Vec<Intent>,
    keywords: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ModelClassification {
    intent: String,
    #[serde(default)]
    complexity: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    requires_tools: Option<bool>,
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default)]
    keywords: Vec<String>,
}

/// Three-tier request classifier: cache, keyword table, model.
/// Query features are detected on every non-cached path.
pub struct IntentClassifier {
    cache: AnalysisCache,
    keyword_threshold: f64,
    router: Option<Arc<ModelRouter>>,
}

impl IntentClassifier {
    pub fn new(ttl: Duration, key_chars: usize, keyword_threshold: f64) -> Self {
        Self {
            cache: AnalysisCache::new(ttl, key_chars),
            keyword_threshold,
            router: None,
        }
    }

    /// Enable the model tier.
    pub fn with_router(mut self, router: Arc<ModelRouter>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn cache(&self) -> &AnalysisCache {
        &self.cache
    }

    /// Classify `content`. Never fails; undecidable input yields
    /// [`IntentAnalysis::fallback`].
    #[instrument(skip(self, content, page_context), fields(chars = content.chars().count()))]
    pub async fn classify(
        &self,
        content: &str,
        page_context: Option<&serde_json::Value>,
    ) -> IntentAnalysis {
        if let Some(hit) = self.from_cache(content) {
            return hit;
        }

        let features = QueryFeatures::detect(content);
        let keyword = Self::keyword_tier(content);

        let analysis = match keyword {
            Some(m) if m.confidence > self.keyword_threshold => {
                Self::from_keyword(m, features, AnalysisMethod::Keyword)
            }
            inconclusive => {
                let modelled = self.model_tier(content, page_context, &features).await;
                match (modelled, inconclusive) {
                    (Some(analysis), _) => analysis,
                    (None, Some(m)) => Self::from_keyword(m, features, AnalysisMethod::Keyword),
                    (None, None) => Self::default_with(features),
                }
            }
        };

        debug!(
            intent = %analysis.intent,
            complexity = %analysis.complexity,
            confidence = analysis.confidence,
            method = ?analysis.analysis_method,
            "request classified"
        );
        self.cache.insert(content, analysis.clone());
        analysis
    }

    /// Keyword and feature tiers only; never calls the model.
    pub fn classify_offline(&self, content: &str) -> IntentAnalysis {
        let features = QueryFeatures::detect(content);
        match Self::keyword_tier(content) {
            Some(m) => Self::from_keyword(m, features, AnalysisMethod::Keyword),
            None => Self::default_with(features),
        }
    }

    fn from_cache(&self, content: &str) -> Option<IntentAnalysis> {
        let mut cached = self.cache.get(content)?;
        cached.analysis_method = AnalysisMethod::Cache;
        debug!(intent = %cached.intent, "intent analysis served from cache");
        Some(cached)
    }

    fn keyword_tier(content: &str) -> Option<KeywordMatch> {
        let text = content.to_lowercase();
        let mut scored: Vec<(Intent, f64, Vec<&'static str>)> = COMPILED_RULES
            .iter()
            .map(|compiled| {
                let (confidence, hits) = score_rule(compiled, &text);
                (compiled.rule.intent, confidence, hits)
            })
            .filter(|(_, confidence, _)| *confidence > 0.0)
            .collect();
        if scored.is_empty() {
            return None;
        }
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        let (intent, confidence, _) = scored[0].clone();
        let secondary = scored[1..]
            .iter()
            .filter(|(_, c, _)| *c >= SECONDARY_MIN_CONFIDENCE)
            .map(|(i, _, _)| *i)
            .collect();
        let keywords = unique_in_order(scored.iter().flat_map(|(_, _, hits)| hits.iter().copied()));

        Some(KeywordMatch {
            intent,
            confidence,
            secondary,
            keywords,
        })
    }

    fn from_keyword(
        m: KeywordMatch,
        features: QueryFeatures,
        method: AnalysisMethod,
    ) -> IntentAnalysis {
        let mut complexity = features.complexity();
        if complexity == Complexity::Simple && !m.secondary.is_empty() {
            complexity = Complexity::Moderate;
        }
        let mut keywords = m.keywords;
        for fragment in &features.matched {
            if !keywords.contains(fragment) {
                keywords.push(fragment.clone());
            }
        }

        IntentAnalysis {
            intent: m.intent,
            requires_tools: m.intent.needs_tools() || features.is_complex(),
            required_capabilities: capabilities_for(m.intent, &features),
            secondary_intents: m.secondary,
            confidence: m.confidence,
            complexity,
            features,
            keywords,
            analysis_method: method,
        }
    }

    fn default_with(features: QueryFeatures) -> IntentAnalysis {
        let mut analysis = IntentAnalysis::fallback();
        if features.is_complex() {
            // Feature signals alone are enough to need the query tool.
            analysis.intent = Intent::DataQuery;
            analysis.complexity = features.complexity();
            analysis.requires_tools = true;
            analysis.required_capabilities = capabilities_for(Intent::DataQuery, &features);
            analysis.keywords = features.matched.clone();
        }
        analysis.features = features;
        analysis
    }

    async fn model_tier(
        &self,
        content: &str,
        page_context: Option<&serde_json::Value>,
        features: &QueryFeatures,
    ) -> Option<IntentAnalysis> {
        let router = self.router.as_ref()?;

        let mut user = format!("用户输入：{content}");
        if let Some(page) = page_context {
            user.push_str(&format!("\n当前页面上下文：{page}"));
        }
        let params = ChatParams::new(vec![ChatMessage::user(user)])
            .with_system(CLASSIFY_SYSTEM_PROMPT);

        let response = match router.chat(ModelTier::Fast, params).await {
            Ok(response) => response,
            Err(e) => {
                warn!("model intent classification failed: {e}");
                return None;
            }
        };

        let parsed = match parse_model_json(&response.text) {
            Some(parsed) => parsed,
            None => {
                warn!("model intent classification returned unparseable output");
                return None;
            }
        };

        let intent = Intent::from_label(&parsed.intent)?;
        let model_complexity = parsed
            .complexity
            .as_deref()
            .and_then(Complexity::from_label)
            .unwrap_or(Complexity::Simple);
        // Detected features set a floor the model cannot talk us out of.
        let complexity = model_complexity.max(features.complexity());

        let mut capabilities = capabilities_for(intent, features);
        capabilities.extend(parsed.capabilities);

        Some(IntentAnalysis {
            intent,
            secondary_intents: Vec::new(),
            confidence: parsed.confidence.unwrap_or(0.7).clamp(0.0, 1.0),
            complexity,
            required_capabilities: capabilities,
            keywords: parsed.keywords,
            requires_tools: parsed.requires_tools.unwrap_or_else(|| intent.needs_tools())
                || features.is_complex(),
            features: features.clone(),
            analysis_method: AnalysisMethod::Ai,
        })
    }
}

/// Accepts bare JSON or JSON wrapped in prose / code fences.
fn parse_model_json(text: &str) -> Option<ModelClassification> {
    if let Ok(parsed) = serde_json::from_str(text.trim()) {
        return Some(parsed);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// First occurrence wins; later repeats are dropped wherever they appear.
fn unique_in_order<'a>(words: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    words
        .filter(|w| seen.insert(*w))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{LlmProvider, LlmRequest, LlmResponse};
    use async_trait::async_trait;
    use campus_common::{Error, Result};
    use campus_config::LlmConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedProvider {
        reply: Option<&'static str>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn provider_id(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reply {
                Some(reply) => Ok(LlmResponse::text(request.model.clone(), reply)),
                None => Err(Error::provider(Some(401), "bad key")),
            }
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }
    }

    fn classifier(reply: Option<&'static str>, calls: Arc<AtomicUsize>) -> IntentClassifier {
        let router = ModelRouter::new(
            Arc::new(ScriptedProvider { reply, calls }),
            &LlmConfig::default(),
        );
        IntentClassifier::new(Duration::from_secs(300), 50, 0.8).with_router(Arc::new(router))
    }

    #[tokio::test]
    async fn confident_keyword_match_skips_model() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = classifier(Some("{}"), Arc::clone(&calls));
        let analysis = c.classify("生成本月招生情况柱状图", None).await;
        assert_eq!(analysis.intent, Intent::DataVisualization);
        assert_eq!(analysis.analysis_method, AnalysisMethod::Keyword);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn second_call_is_served_from_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = classifier(None, calls);
        let first = c.classify("统计在职教师数量", None).await;
        let second = c.classify("统计在职教师数量", None).await;
        assert_eq!(second.analysis_method, AnalysisMethod::Cache);
        assert_eq!(first.intent, second.intent);
        assert_eq!(first.complexity, second.complexity);
        assert_eq!(first.requires_tools, second.requires_tools);
    }

    #[tokio::test]
    async fn inconclusive_input_uses_model_tier() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = classifier(
            Some("```json\n{\"intent\": \"expert_consultation\", \"complexity\": \"moderate\", \"confidence\": 0.82}\n```"),
            Arc::clone(&calls),
        );
        let analysis = c.classify("下学期家长会要准备哪些材料", None).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(analysis.analysis_method, AnalysisMethod::Ai);
        assert_eq!(analysis.intent, Intent::ExpertConsultation);
        assert_eq!(analysis.complexity, Complexity::Moderate);
    }

    #[tokio::test]
    async fn model_failure_degrades_to_default() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = classifier(None, calls);
        let analysis = c.classify("下学期家长会要准备哪些材料", None).await;
        assert_eq!(analysis.intent, Intent::Query);
        assert_eq!(analysis.complexity, Complexity::Simple);
        assert!(!analysis.requires_tools);
    }

    #[tokio::test]
    async fn features_set_complexity_floor_over_model() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = classifier(
            Some("{\"intent\": \"query\", \"complexity\": \"simple\", \"requires_tools\": false}"),
            calls,
        );
        let analysis = c.classify("年龄大于5岁的孩子", None).await;
        assert!(analysis.features.has_filters);
        assert!(analysis.complexity >= Complexity::Complex);
        assert!(analysis.requires_tools);
    }

    #[test]
    fn offline_classification_reports_features() {
        let c = IntentClassifier::new(Duration::from_secs(300), 50, 0.8);
        let analysis = c.classify_offline("统计在职教师数量");
        assert!(analysis.features.has_statistics);
        assert!(analysis.features.has_filters);
        assert!(analysis.requires_tools);
        assert!(analysis.is_complex_query());
    }

    #[test]
    fn greeting_needs_no_tools() {
        let c = IntentClassifier::new(Duration::from_secs(300), 50, 0.8);
        let analysis = c.classify_offline("你好");
        assert_eq!(analysis.intent, Intent::Conversation);
        assert!(!analysis.requires_tools);
    }

    #[test]
    fn keywords_are_unique_even_when_repeats_are_apart() {
        let words = unique_in_order(["统计", "学生", "统计", "图表", "学生"].into_iter());
        assert_eq!(words, vec!["统计", "学生", "图表"]);
    }
}
