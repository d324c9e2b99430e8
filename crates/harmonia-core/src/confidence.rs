//! Confidence Scorer: blends eight weighted factors with a per-type
//! baseline, plus a complexity bonus and length penalty.
//!
//! Grounded in `original_source/src/processing/confidence_scorer.py`.

use crate::entities::Entity;
use crate::model::MemoryType;
use crate::preprocess::PreprocessedMessage;

const WEIGHT_LLM_CONFIDENCE: f64 = 0.30;
const WEIGHT_CONTENT_QUALITY: f64 = 0.20;
const WEIGHT_ENTITY_SUPPORT: f64 = 0.15;
const WEIGHT_CONTEXT_RELEVANCE: f64 = 0.15;
const WEIGHT_TEMPORAL_CONSISTENCY: f64 = 0.10;
const WEIGHT_SOURCE_RELIABILITY: f64 = 0.10;

const WEIGHTED_SHARE: f64 = 0.80;
const BASELINE_SHARE: f64 = 0.20;

const MAX_COMPLEXITY_BONUS: f64 = 0.20;
const MAX_LENGTH_PENALTY: f64 = 0.40;

const OPTIMAL_LENGTH_MIN: usize = 10;
const OPTIMAL_LENGTH_MAX: usize = 200;

const QUALITY_CUES_POSITIVE: &[&str] = &["specifically", "exactly", "definitely", "always", "never"];
const QUALITY_CUES_NEGATIVE: &[&str] = &["maybe", "probably", "i think", "not sure", "possibly"];

#[derive(Debug, Clone, Copy)]
pub struct ScoreFactors {
    pub llm_confidence: f64,
    pub content_quality: f64,
    pub entity_support: f64,
    pub context_relevance: f64,
    pub temporal_consistency: f64,
    pub source_reliability: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
    Unreliable,
}

impl ConfidenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::High => "high",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::Low => "low",
            ConfidenceLevel::Unreliable => "unreliable",
        }
    }
}

pub fn confidence_level(score: f64) -> ConfidenceLevel {
    if score >= 0.8 {
        ConfidenceLevel::High
    } else if score >= 0.6 {
        ConfidenceLevel::Medium
    } else if score >= 0.4 {
        ConfidenceLevel::Low
    } else {
        ConfidenceLevel::Unreliable
    }
}

/// Inputs the scorer needs beyond the candidate memory itself.
pub struct ScoringContext<'a> {
    pub llm_confidence: f64,
    pub content: &'a str,
    pub memory_type: MemoryType,
    pub is_temporal_claim: bool,
    pub entities: &'a [Entity],
    pub original_message: &'a str,
    pub preprocessed: &'a PreprocessedMessage,
    pub is_established_user: bool,
}

fn content_quality(content: &str) -> f64 {
    let lower = content.to_lowercase();
    let mut score: f64 = 0.5;
    if QUALITY_CUES_POSITIVE.iter().any(|c| lower.contains(c)) {
        score += 0.25;
    }
    if QUALITY_CUES_NEGATIVE.iter().any(|c| lower.contains(c)) {
        score -= 0.25;
    }
    let len = content.len();
    if (OPTIMAL_LENGTH_MIN..=OPTIMAL_LENGTH_MAX).contains(&len) {
        score += 0.15;
    }
    score.clamp(0.0, 1.0)
}

fn entity_support(entities: &[Entity]) -> f64 {
    if entities.is_empty() {
        return 0.0;
    }
    let avg_conf = entities.iter().map(|e| e.confidence).sum::<f64>() / entities.len() as f64;
    let count_bonus = (entities.len() as f64 / 5.0).min(1.0);
    (0.5 * avg_conf + 0.5 * count_bonus).clamp(0.0, 1.0)
}

/// Jaccard overlap between memory words and original-message words, with a
/// bonus if the memory content appears verbatim as a substring.
fn context_relevance(content: &str, original_message: &str) -> f64 {
    use std::collections::HashSet;
    let content_words: HashSet<String> =
        content.to_lowercase().split_whitespace().map(str::to_string).collect();
    let message_words: HashSet<String> =
        original_message.to_lowercase().split_whitespace().map(str::to_string).collect();
    if content_words.is_empty() || message_words.is_empty() {
        return 0.0;
    }
    let intersection = content_words.intersection(&message_words).count();
    let union = content_words.union(&message_words).count();
    let jaccard = intersection as f64 / union as f64;
    let exact_phrase_bonus = if original_message.to_lowercase().contains(&content.to_lowercase()) {
        0.3
    } else {
        0.0
    };
    (jaccard + exact_phrase_bonus).clamp(0.0, 1.0)
}

fn temporal_consistency(is_temporal_claim: bool, preprocessed: &PreprocessedMessage) -> f64 {
    if !is_temporal_claim {
        return 1.0;
    }
    if preprocessed.has_temporal_markers {
        1.0
    } else {
        0.3
    }
}

fn source_reliability(preprocessed: &PreprocessedMessage, is_established_user: bool) -> f64 {
    let mut score = preprocessed.complexity_score.clamp(0.0, 1.0);
    if preprocessed.has_pii {
        score -= 0.2;
    }
    if is_established_user {
        score += 0.15;
    }
    score.clamp(0.0, 1.0)
}

pub fn compute_factors(ctx: &ScoringContext) -> ScoreFactors {
    ScoreFactors {
        llm_confidence: ctx.llm_confidence.clamp(0.0, 1.0),
        content_quality: content_quality(ctx.content),
        entity_support: entity_support(ctx.entities),
        context_relevance: context_relevance(ctx.content, ctx.original_message),
        temporal_consistency: temporal_consistency(ctx.is_temporal_claim, ctx.preprocessed),
        source_reliability: source_reliability(ctx.preprocessed, ctx.is_established_user),
    }
}

fn weighted_sum(factors: &ScoreFactors) -> f64 {
    factors.llm_confidence * WEIGHT_LLM_CONFIDENCE
        + factors.content_quality * WEIGHT_CONTENT_QUALITY
        + factors.entity_support * WEIGHT_ENTITY_SUPPORT
        + factors.context_relevance * WEIGHT_CONTEXT_RELEVANCE
        + factors.temporal_consistency * WEIGHT_TEMPORAL_CONSISTENCY
        + factors.source_reliability * WEIGHT_SOURCE_RELIABILITY
}

fn complexity_bonus(entities: &[Entity], relationships_count: usize, has_context: bool, is_temporal_claim: bool) -> f64 {
    let mut signals = 0;
    if entities.len() > 1 {
        signals += 1;
    }
    if relationships_count > 0 {
        signals += 1;
    }
    if has_context {
        signals += 1;
    }
    if is_temporal_claim {
        signals += 1;
    }
    (signals as f64 / 4.0 * MAX_COMPLEXITY_BONUS).min(MAX_COMPLEXITY_BONUS)
}

fn length_penalty(content: &str) -> f64 {
    let len = content.len();
    if len < OPTIMAL_LENGTH_MIN {
        let deficit = (OPTIMAL_LENGTH_MIN - len) as f64 / OPTIMAL_LENGTH_MIN as f64;
        (deficit * MAX_LENGTH_PENALTY).min(MAX_LENGTH_PENALTY)
    } else if len > OPTIMAL_LENGTH_MAX * 3 {
        let excess = (len - OPTIMAL_LENGTH_MAX * 3) as f64 / (OPTIMAL_LENGTH_MAX * 3) as f64;
        (excess * MAX_LENGTH_PENALTY).min(MAX_LENGTH_PENALTY)
    } else {
        0.0
    }
}

/// Full score: 80%-weighted factor sum blended 80/20 with the type
/// baseline, plus a bounded complexity bonus, minus a bounded length
/// penalty, clamped to `[0, 1]`.
pub fn score_memory(
    ctx: &ScoringContext,
    relationships_count: usize,
    has_context: bool,
) -> (f64, ScoreFactors) {
    let factors = compute_factors(ctx);
    let weighted = weighted_sum(&factors);
    let baseline = ctx.memory_type.baseline_confidence();
    let blended = WEIGHTED_SHARE * weighted + BASELINE_SHARE * baseline;

    let bonus = complexity_bonus(ctx.entities, relationships_count, has_context, ctx.is_temporal_claim);
    let penalty = length_penalty(ctx.content);

    ((blended + bonus - penalty).clamp(0.0, 1.0), factors)
}

/// Bulk scoring: scores every memory, returns results sorted by score
/// descending alongside the per-memory factor breakdown.
pub fn score_batch(items: &[(ScoringContext, usize, bool)]) -> Vec<(usize, f64, ScoreFactors)> {
    let mut scored: Vec<(usize, f64, ScoreFactors)> = items
        .iter()
        .enumerate()
        .map(|(i, (ctx, rel_count, has_context))| {
            let (score, factors) = score_memory(ctx, *rel_count, *has_context);
            (i, score, factors)
        })
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
    scored
}

pub fn filter_above_threshold(scores: &[(usize, f64, ScoreFactors)], threshold: f64) -> Vec<usize> {
    scores.iter().filter(|(_, s, _)| *s >= threshold).map(|(i, _, _)| *i).collect()
}

#[derive(Debug, Clone, Copy)]
pub struct ScoreSummary {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

pub fn summarize(scores: &[f64]) -> ScoreSummary {
    if scores.is_empty() {
        return ScoreSummary { mean: 0.0, min: 0.0, max: 0.0, count: 0 };
    }
    let sum: f64 = scores.iter().sum();
    ScoreSummary {
        mean: sum / scores.len() as f64,
        min: scores.iter().cloned().fold(f64::INFINITY, f64::min),
        max: scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        count: scores.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::preprocess;

    #[test]
    fn confidence_levels_match_boundaries() {
        assert_eq!(confidence_level(0.9).as_str(), "high");
        assert_eq!(confidence_level(0.65).as_str(), "medium");
        assert_eq!(confidence_level(0.45).as_str(), "low");
        assert_eq!(confidence_level(0.1).as_str(), "unreliable");
    }

    #[test]
    fn score_is_clamped_and_reasonable_for_strong_signal() {
        let preprocessed = preprocess("I work at Google as a software engineer in Austin.");
        let ctx = ScoringContext {
            llm_confidence: 0.9,
            content: "Works at Google as a software engineer",
            memory_type: MemoryType::Personal,
            is_temporal_claim: false,
            entities: &[],
            original_message: "I work at Google as a software engineer in Austin.",
            preprocessed: &preprocessed,
            is_established_user: true,
        };
        let (score, _) = score_memory(&ctx, 0, true);
        assert!((0.0..=1.0).contains(&score));
        assert!(score > 0.5);
    }

    #[test]
    fn very_short_content_incurs_length_penalty() {
        let preprocessed = preprocess("ok");
        let ctx = ScoringContext {
            llm_confidence: 0.9,
            content: "ok",
            memory_type: MemoryType::Personal,
            is_temporal_claim: false,
            entities: &[],
            original_message: "ok",
            preprocessed: &preprocessed,
            is_established_user: false,
        };
        let penalty = length_penalty(ctx.content);
        assert!(penalty > 0.0);
    }
}
