//! Query routing: rule-based strategy scoring with optional LLM assist and
//! adaptive feedback (spec.md §4.7).

use super::transformer::{detect_intent_rule_based, Intent};
use crate::cache::TtlCache;
use crate::config::RouterConfig;
use crate::providers::Llm;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::RwLock;

/// Retrieval strategies a router can select among (glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Vector,
    Bm25,
    Hybrid,
    MultiHop,
    GraphRag,
    Contextual,
    Dense,
    Sparse,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Vector => "vector",
            Strategy::Bm25 => "bm25",
            Strategy::Hybrid => "hybrid",
            Strategy::MultiHop => "multi_hop",
            Strategy::GraphRag => "graph_rag",
            Strategy::Contextual => "contextual",
            Strategy::Dense => "dense",
            Strategy::Sparse => "sparse",
        }
    }

    pub fn from_str(s: &str) -> Option<Strategy> {
        match s {
            "vector" => Some(Strategy::Vector),
            "bm25" => Some(Strategy::Bm25),
            "hybrid" => Some(Strategy::Hybrid),
            "multi_hop" => Some(Strategy::MultiHop),
            "graph_rag" => Some(Strategy::GraphRag),
            "contextual" => Some(Strategy::Contextual),
            "dense" => Some(Strategy::Dense),
            "sparse" => Some(Strategy::Sparse),
            _ => None,
        }
    }

    fn all() -> &'static [Strategy] {
        &[
            Strategy::Vector,
            Strategy::Bm25,
            Strategy::Hybrid,
            Strategy::MultiHop,
            Strategy::GraphRag,
            Strategy::Contextual,
            Strategy::Dense,
            Strategy::Sparse,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthBucket {
    Short,
    Medium,
    Long,
}

/// Closed tagged union of routing conditions (spec.md §9 "Dynamic feature maps").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Condition {
    Intent(Intent),
    Complexity(Complexity),
    Length(LengthBucket),
    HasEntities,
    IsQuestion,
    HasContext,
}

/// Snapshot of the analyzer's read on a query (spec.md §4.7 "Inputs").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryFeatures {
    pub intent: Intent,
    pub entities: Vec<String>,
    pub keywords: Vec<String>,
    pub is_question: bool,
    pub has_context: bool,
}

fn complexity_of(token_count: usize) -> Complexity {
    if token_count <= 7 {
        Complexity::Simple
    } else if token_count <= 15 {
        Complexity::Moderate
    } else {
        Complexity::Complex
    }
}

fn length_bucket_of(token_count: usize) -> LengthBucket {
    if token_count <= 5 {
        LengthBucket::Short
    } else if token_count <= 15 {
        LengthBucket::Medium
    } else {
        LengthBucket::Long
    }
}

fn analyze(query: &str, has_context: bool) -> (QueryFeatures, Complexity, LengthBucket) {
    let lower = query.to_lowercase();
    let (intent, _) = detect_intent_rule_based(&lower);
    let token_count = query.split_whitespace().count();
    let entities: Vec<String> = query
        .split_whitespace()
        .enumerate()
        .filter(|(i, w)| *i > 0 && w.chars().next().map(char::is_uppercase).unwrap_or(false))
        .map(|(_, w)| w.trim_end_matches(|c: char| c.is_ascii_punctuation()).to_string())
        .collect();
    let keywords: Vec<String> = query
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() > 3)
        .collect();
    let is_question = query.trim_end().ends_with('?')
        || lower.starts_with("what")
        || lower.starts_with("who")
        || lower.starts_with("how")
        || lower.starts_with("why")
        || lower.starts_with("when")
        || lower.starts_with("where");

    let features = QueryFeatures {
        intent,
        entities,
        keywords,
        is_question,
        has_context,
    };
    (features, complexity_of(token_count), length_bucket_of(token_count))
}

struct StrategyRule {
    strategy: Strategy,
    base_weight: f32,
    conditions: Vec<(Condition, f32)>,
}

fn default_rules() -> Vec<StrategyRule> {
    vec![
        StrategyRule {
            strategy: Strategy::Bm25,
            base_weight: 0.3,
            conditions: vec![
                (Condition::Intent(Intent::Factual), 0.3),
                (Condition::Complexity(Complexity::Simple), 0.2),
                (Condition::Length(LengthBucket::Short), 0.1),
            ],
        },
        StrategyRule {
            strategy: Strategy::Vector,
            base_weight: 0.3,
            conditions: vec![
                (Condition::Intent(Intent::Explanation), 0.2),
                (Condition::Complexity(Complexity::Moderate), 0.1),
                (Condition::HasContext, 0.2),
            ],
        },
        StrategyRule {
            strategy: Strategy::Hybrid,
            base_weight: 0.4,
            conditions: vec![
                (Condition::Complexity(Complexity::Complex), 0.2),
                (Condition::HasEntities, 0.1),
                (Condition::IsQuestion, 0.1),
            ],
        },
        StrategyRule {
            strategy: Strategy::MultiHop,
            base_weight: 0.2,
            conditions: vec![
                (Condition::Intent(Intent::Comparison), 0.3),
                (Condition::Intent(Intent::Causal), 0.3),
                (Condition::Complexity(Complexity::Complex), 0.2),
            ],
        },
        StrategyRule {
            strategy: Strategy::GraphRag,
            base_weight: 0.2,
            conditions: vec![(Condition::HasEntities, 0.3)],
        },
        StrategyRule {
            strategy: Strategy::Contextual,
            base_weight: 0.2,
            conditions: vec![(Condition::HasContext, 0.3)],
        },
        StrategyRule {
            strategy: Strategy::Dense,
            base_weight: 0.25,
            conditions: vec![(Condition::Intent(Intent::Creative), 0.2)],
        },
        StrategyRule {
            strategy: Strategy::Sparse,
            base_weight: 0.25,
            conditions: vec![
                (Condition::Intent(Intent::Factual), 0.2),
                (Condition::Length(LengthBucket::Short), 0.2),
            ],
        },
    ]
}

fn condition_matches(
    condition: &Condition,
    features: &QueryFeatures,
    complexity: Complexity,
    length: LengthBucket,
) -> bool {
    match condition {
        Condition::Intent(i) => *i == features.intent,
        Condition::Complexity(c) => *c == complexity,
        Condition::Length(l) => *l == length,
        Condition::HasEntities => !features.entities.is_empty(),
        Condition::IsQuestion => features.is_question,
        Condition::HasContext => features.has_context,
    }
}

/// Final routing decision (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub query: String,
    pub selected: Strategy,
    pub confidence: f32,
    pub scores: HashMap<Strategy, f32>,
    pub reasoning: Option<String>,
    pub fallback_used: bool,
    pub features: QueryFeatures,
}

/// A strategy with a normalized ensemble weight (spec.md §4.7 "Multi-route").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightedStrategy {
    pub strategy: Strategy,
    pub weight: f32,
}

struct FeedbackEntry {
    success: bool,
    #[allow(dead_code)]
    score: f32,
}

pub struct QueryRouter {
    config: RouterConfig,
    cache: TtlCache<String, RoutingDecision>,
    feedback: RwLock<HashMap<Strategy, VecDeque<FeedbackEntry>>>,
}

impl QueryRouter {
    pub fn new(config: RouterConfig) -> Self {
        let cache = TtlCache::new(config.cache_max_entries, Duration::from_secs(config.cache_ttl_secs));
        Self {
            config,
            cache,
            feedback: RwLock::new(HashMap::new()),
        }
    }

    async fn success_rate(&self, strategy: Strategy) -> f32 {
        let feedback = self.feedback.read().await;
        match feedback.get(&strategy) {
            Some(entries) if !entries.is_empty() => {
                let successes = entries.iter().filter(|e| e.success).count();
                successes as f32 / entries.len() as f32
            }
            _ => 0.5,
        }
    }

    async fn rule_based_scores(&self, features: &QueryFeatures, complexity: Complexity, length: LengthBucket) -> HashMap<Strategy, f32> {
        let mut scores = HashMap::new();
        for rule in default_rules() {
            let mut score = rule.base_weight;
            for (condition, weight) in &rule.conditions {
                if condition_matches(condition, features, complexity, length) {
                    score += weight;
                }
            }
            if self.config.adaptive {
                score *= 0.5 + self.success_rate(rule.strategy).await;
            }
            scores.insert(rule.strategy, (score / 2.0).clamp(0.0, 1.0));
        }
        scores
    }

    /// Select the best strategy for `query` (spec.md §4.7 "Decision").
    pub async fn route(&self, query: &str, has_context: bool, llm: Option<&dyn Llm>) -> RoutingDecision {
        if let Some(cached) = self.cache.get(&query.to_string()).await {
            return cached;
        }

        let (features, complexity, length) = analyze(query, has_context);
        let mut scores = self.rule_based_scores(&features, complexity, length).await;

        let mut reasoning = None;
        if self.config.use_llm_assist {
            if let Some(llm) = llm {
                let strategy_names: Vec<&str> = Strategy::all().iter().map(|s| s.as_str()).collect();
                let prompt = format!(
                    "Classify this query among strategies {:?} with a confidence each, format strategy:confidence,...: {query}",
                    strategy_names
                );
                if let Ok(response) = llm.complete(&prompt).await {
                    for entry in response.split(',') {
                        let mut parts = entry.splitn(2, ':');
                        let name = parts.next().unwrap_or("").trim();
                        let conf: Option<f32> = parts.next().and_then(|c| c.trim().parse().ok());
                        if let (Some(strategy), Some(conf)) = (Strategy::from_str(name), conf) {
                            scores
                                .entry(strategy)
                                .and_modify(|s| *s = (*s + conf) / 2.0)
                                .or_insert(conf);
                        }
                    }
                    reasoning = Some(response);
                }
            }
        }

        let best = scores
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(s, c)| (*s, *c));

        let (selected, confidence, fallback_used) = match best {
            Some((strategy, confidence)) if confidence >= self.config.confidence_threshold => {
                (strategy, confidence, false)
            }
            _ => {
                let fallback = if self.config.fallback_enabled {
                    Strategy::from_str(&self.config.fallback_strategy)
                } else {
                    None
                };
                let chosen = fallback.or_else(|| Strategy::from_str(&self.config.default_strategy)).unwrap_or(Strategy::Hybrid);
                (chosen, best.map(|(_, c)| c).unwrap_or(0.0), true)
            }
        };

        let decision = RoutingDecision {
            query: query.to_string(),
            selected,
            confidence,
            scores,
            reasoning,
            fallback_used,
            features,
        };
        self.cache.insert(query.to_string(), decision.clone()).await;
        decision
    }

    /// Top-`k` strategies with weights normalized to sum to 1
    /// (spec.md §8 property 7).
    pub async fn route_multi(&self, query: &str, k: usize, has_context: bool) -> Vec<WeightedStrategy> {
        let (features, complexity, length) = analyze(query, has_context);
        let scores = self.rule_based_scores(&features, complexity, length).await;

        let mut ranked: Vec<(Strategy, f32)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        ranked.truncate(k);

        let total: f32 = ranked.iter().map(|(_, s)| s).sum();
        if total <= 0.0 {
            return Vec::new();
        }
        ranked
            .into_iter()
            .map(|(strategy, score)| WeightedStrategy {
                strategy,
                weight: score / total,
            })
            .collect()
    }

    /// Append observed feedback, capping each strategy's ring at
    /// `feedback_cap` entries (drop the oldest half when exceeded).
    pub async fn record_feedback(&self, _query: &str, strategy: Strategy, success: bool, score: f32) {
        let mut feedback = self.feedback.write().await;
        let entries = feedback.entry(strategy).or_default();
        entries.push_back(FeedbackEntry { success, score });
        if entries.len() > self.config.feedback_cap {
            let drop_count = entries.len() / 2;
            for _ in 0..drop_count {
                entries.pop_front();
            }
        }
    }
}
