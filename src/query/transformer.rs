//! Query transformation: intent detection, keyword/entity extraction,
//! decomposition, rewriting, HyDE and step-back (spec.md §4.6).

use crate::cache::TtlCache;
use crate::config::TransformerConfig;
use crate::error::Result;
use crate::providers::Llm;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Factual,
    Comparison,
    Explanation,
    Procedural,
    Analytical,
    Creative,
    Aggregation,
    Temporal,
    Causal,
    Hypothetical,
    Unknown,
}

const INTENT_TABLE: &[(Intent, &[&str])] = &[
    (Intent::Comparison, &["compare", "versus", " vs ", "difference between"]),
    (Intent::Procedural, &["how to", "how do i", "steps to"]),
    (Intent::Explanation, &["why does", "explain", "how does"]),
    (Intent::Analytical, &["analyze", "evaluate", "assess"]),
    (Intent::Creative, &["write a", "generate a", "compose"]),
    (Intent::Aggregation, &["total of", "sum of", "count of", "how many"]),
    (Intent::Temporal, &["when will", "timeline", "history of"]),
    (Intent::Causal, &["why did", "what causes", "because of"]),
    (Intent::Hypothetical, &["what if", "suppose", "imagine if"]),
    (Intent::Factual, &["what is", "who is", "when did", "where is"]),
];

const FILLER_PREFIXES: &[&str] = &[
    "please ",
    "can you ",
    "could you ",
    "i want to know ",
    "tell me ",
];

const DECOMPOSITION_CONJUNCTIONS: &[&str] =
    &[" and ", " or ", " also ", " as well as ", " both "];

/// Complete record of a single `transform()` call (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformedQuery {
    pub original: String,
    pub rewritten: String,
    pub intent: Intent,
    pub intent_confidence: f32,
    pub keywords: Vec<String>,
    pub entities: Vec<String>,
    pub sub_queries: Vec<String>,
    pub hyde_passage: Option<String>,
    pub step_back_query: Option<String>,
}

pub(crate) fn detect_intent_rule_based(query_lower: &str) -> (Intent, f32) {
    for (intent, phrases) in INTENT_TABLE {
        if phrases.iter().any(|p| query_lower.contains(p)) {
            return (*intent, 0.8);
        }
    }
    (Intent::Unknown, 0.3)
}

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "of", "to", "in", "on", "for", "and", "or",
    "with", "do", "does", "did", "i", "you", "it", "this", "that",
];

fn extract_keywords(query: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut keywords = Vec::new();
    for word in query.split_whitespace() {
        let cleaned: String = word
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        if cleaned.len() <= 2 || STOP_WORDS.contains(&cleaned.as_str()) {
            continue;
        }
        if seen.insert(cleaned.clone()) {
            keywords.push(cleaned);
        }
    }
    keywords
}

fn extract_entities(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .enumerate()
        .filter(|(i, word)| *i > 0 && word.chars().next().map(char::is_uppercase).unwrap_or(false))
        .map(|(_, word)| word.trim_end_matches(|c: char| c.is_ascii_punctuation()).to_string())
        .filter(|w| !w.is_empty())
        .collect()
}

fn needs_decomposition(query: &str, intent: Intent, token_threshold: usize) -> bool {
    let lower = query.to_lowercase();
    matches!(
        intent,
        Intent::Comparison | Intent::Analytical | Intent::Aggregation | Intent::Causal
    ) || query.split_whitespace().count() > token_threshold
        || DECOMPOSITION_CONJUNCTIONS.iter().any(|c| lower.contains(c))
}

fn decompose(query: &str) -> Vec<String> {
    let mut pieces = vec![query.to_string()];
    for conj in DECOMPOSITION_CONJUNCTIONS {
        pieces = pieces
            .into_iter()
            .flat_map(|p| p.split(conj).map(str::trim).map(str::to_string).collect::<Vec<_>>())
            .collect();
    }
    pieces.into_iter().filter(|p| !p.is_empty()).collect()
}

fn rewrite(query: &str) -> String {
    let mut rewritten = query.trim().to_string();
    loop {
        let lower = rewritten.to_lowercase();
        if let Some(prefix) = FILLER_PREFIXES.iter().find(|p| lower.starts_with(**p)) {
            rewritten = rewritten[prefix.len()..].to_string();
        } else {
            break;
        }
    }
    if rewritten.ends_with('?') {
        rewritten.pop();
    }
    let mut chars = rewritten.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => rewritten,
    }
}

pub struct QueryTransformer {
    config: TransformerConfig,
    cache: TtlCache<String, TransformedQuery>,
}

impl QueryTransformer {
    pub fn new(config: TransformerConfig) -> Self {
        let cache = TtlCache::new(config.cache_max_entries, Duration::from_secs(config.cache_ttl_secs));
        Self { config, cache }
    }

    /// Run the composite transform pipeline, consulting the cache first.
    /// Two identical consecutive calls return `≡` records and the second
    /// never invokes the LLM (spec.md §8 property 6).
    pub async fn transform(&self, query: &str, llm: Option<&dyn Llm>) -> Result<TransformedQuery> {
        if let Some(cached) = self.cache.get(&query.to_string()).await {
            return Ok(cached);
        }

        let lower = query.to_lowercase();
        let (mut intent, mut confidence) = detect_intent_rule_based(&lower);

        if let Some(llm) = llm {
            if let Ok(response) = llm.complete(&format!("Classify the intent of this query in one word, followed by a confidence between 0 and 1, comma separated: {query}")).await {
                if let Some((label, conf)) = parse_llm_intent(&response) {
                    if conf > 0.5 {
                        intent = label;
                        confidence = conf;
                    }
                }
            }
        }

        let keywords = extract_keywords(query);
        let entities = extract_entities(query);
        let sub_queries = if needs_decomposition(query, intent, self.config.decomposition_token_threshold) {
            decompose(query)
        } else {
            Vec::new()
        };
        let rewritten = rewrite(query);

        let hyde_passage = if self.config.enable_hyde {
            match llm {
                Some(llm) => llm
                    .complete(&format!("Write a short hypothetical passage answering: {query}"))
                    .await
                    .ok(),
                None => None,
            }
        } else {
            None
        };

        let step_back_query = if self.config.enable_step_back {
            match llm {
                Some(llm) => llm
                    .complete(&format!("Rewrite this as a broader, more general question: {query}"))
                    .await
                    .ok(),
                None => None,
            }
        } else {
            None
        };

        let record = TransformedQuery {
            original: query.to_string(),
            rewritten,
            intent,
            intent_confidence: confidence,
            keywords,
            entities,
            sub_queries,
            hyde_passage,
            step_back_query,
        };

        self.cache.insert(query.to_string(), record.clone()).await;
        Ok(record)
    }
}

fn parse_llm_intent(response: &str) -> Option<(Intent, f32)> {
    let mut parts = response.splitn(2, ',');
    let label = parts.next()?.trim().to_lowercase();
    let conf: f32 = parts.next()?.trim().parse().ok()?;
    let intent = match label.as_str() {
        "factual" => Intent::Factual,
        "comparison" => Intent::Comparison,
        "explanation" => Intent::Explanation,
        "procedural" => Intent::Procedural,
        "analytical" => Intent::Analytical,
        "creative" => Intent::Creative,
        "aggregation" => Intent::Aggregation,
        "temporal" => Intent::Temporal,
        "causal" => Intent::Causal,
        "hypothetical" => Intent::Hypothetical,
        _ => Intent::Unknown,
    };
    Some((intent, conf))
}

/// Normalize a query for cycle detection / cache comparisons: lowercase,
/// collapsed whitespace (spec.md §3, glossary "Normalized query").
pub fn normalize(query: &str) -> String {
    query.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}
