//! Extraction Pipeline: the single end-to-end operation from raw message to
//! scored, filtered memory candidates.
//!
//! Grounded in `original_source/src/processing/memory_processor.py::process_message`.

use serde::Deserialize;

use crate::confidence::{score_memory, ScoringContext};
use crate::entities::{extract_entities, extract_relationships};
use crate::llm::{GenerateOptions, LlmError, OllamaClient};
use crate::model::MemoryType;
use crate::preprocess::{extraction_hints, preprocess, should_extract};
use crate::prompts::{render_base_system, render_main_extraction};

const LLM_TEMPERATURE: f64 = 0.1;
const LLM_TOP_P: f64 = 0.9;
const LLM_NUM_PREDICT: u32 = 600;
const DEFAULT_MAX_MEMORIES: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("llm unavailable: {0}")]
    LlmUnavailable(String),
    #[error("extraction parse error: {0}")]
    ParseError(String),
    #[error("pipeline failed at step {step}: {message}")]
    Failed { step: &'static str, message: String },
}

impl From<LlmError> for PipelineError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::ModelNotFound(_) | LlmError::Connection(_) | LlmError::Transient(_) => {
                PipelineError::LlmUnavailable(e.to_string())
            }
            LlmError::ParseError(_) => PipelineError::ParseError(e.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawCandidate {
    content: String,
    memory_type: String,
    confidence: f64,
    #[serde(default)]
    entities: Vec<String>,
    #[serde(default)]
    temporal_info: Option<String>,
    #[serde(default)]
    context: Option<String>,
    #[serde(default)]
    relationships: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ExtractionResponse {
    memories: Vec<RawCandidate>,
    #[serde(default)]
    extraction_confidence: f64,
    #[serde(default)]
    reasoning: String,
}

#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub content: String,
    pub memory_type: MemoryType,
    pub llm_confidence: f64,
    pub final_score: f64,
    pub entities: Vec<String>,
    pub temporal_info: Option<String>,
    pub relationships: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineMetadata {
    pub extraction_mode: String,
    pub requested_types: Vec<String>,
    pub count_before_filter: usize,
    pub count_after_filter: usize,
    pub average_confidence: f64,
    pub steps_completed: u8,
}

#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub candidates: Vec<ScoredCandidate>,
    pub metadata: PipelineMetadata,
    pub reasoning: String,
    pub llm_extraction_confidence: f64,
    pub skipped_reason: Option<String>,
}

pub struct PipelineConfig {
    pub max_memories: usize,
    pub previous_memories: Vec<String>,
    pub is_established_user: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            max_memories: DEFAULT_MAX_MEMORIES,
            previous_memories: Vec::new(),
            is_established_user: false,
        }
    }
}

/// Runs the full nine-step pipeline against a single raw message.
pub async fn process_message(
    llm: &OllamaClient,
    message: &str,
    config: &PipelineConfig,
) -> Result<PipelineResult, PipelineError> {
    let mut metadata = PipelineMetadata::default();

    // Step 1: preprocess + gate.
    let preprocessed = preprocess(message);
    metadata.steps_completed = 1;
    if !should_extract(&preprocessed) {
        return Ok(PipelineResult {
            candidates: Vec::new(),
            metadata,
            reasoning: String::new(),
            llm_extraction_confidence: 0.0,
            skipped_reason: Some("message failed extraction gate".to_string()),
        });
    }

    // Step 2: entity extraction.
    let entities = extract_entities(&preprocessed.cleaned_text);
    let relationships = extract_relationships(&preprocessed.cleaned_text, &entities);
    metadata.steps_completed = 2;

    // Step 3-4: hints + prompt render.
    let hints = extraction_hints(&preprocessed);
    metadata.extraction_mode = hints.mode.as_str().to_string();
    metadata.requested_types = MemoryType::ALL.iter().map(|t| t.as_str().to_string()).collect();

    let system_prompt = render_base_system(hints.mode.as_str(), &MemoryType::ALL, &config.previous_memories);
    let user_prompt = render_main_extraction(
        &preprocessed.cleaned_text,
        hints.mode.as_str(),
        config.max_memories,
        0.5,
        &config.previous_memories,
    );
    metadata.steps_completed = 4;

    // Step 5: LLM call, temperature 0.1/top_p 0.9/~600 tokens, retried internally by the client.
    let options = GenerateOptions {
        temperature: Some(LLM_TEMPERATURE),
        top_p: Some(LLM_TOP_P),
        num_predict: Some(LLM_NUM_PREDICT),
    };
    let raw_response = llm
        .generate(&user_prompt, Some(&system_prompt), &options)
        .await
        .map_err(PipelineError::from)?;
    metadata.steps_completed = 5;

    // Step 6: parse + schema validation.
    let parsed: ExtractionResponse = serde_json::from_str(&raw_response)
        .map_err(|e| PipelineError::ParseError(e.to_string()))?;
    for candidate in &parsed.memories {
        if MemoryType::parse(&candidate.memory_type).is_none() {
            return Err(PipelineError::ParseError(format!(
                "unknown memory_type: {}",
                candidate.memory_type
            )));
        }
        if !(0.0..=1.0).contains(&candidate.confidence) {
            return Err(PipelineError::ParseError(
                "confidence out of [0,1] range".to_string(),
            ));
        }
    }
    metadata.steps_completed = 6;
    metadata.count_before_filter = parsed.memories.len();

    // Step 7-8: score + per-type threshold filter.
    let mut scored = Vec::new();
    for candidate in parsed.memories {
        let memory_type = MemoryType::parse(&candidate.memory_type).unwrap();
        let is_temporal_claim = memory_type == MemoryType::Temporal || candidate.temporal_info.is_some();
        let ctx = ScoringContext {
            llm_confidence: candidate.confidence,
            content: &candidate.content,
            memory_type,
            is_temporal_claim,
            entities: &entities,
            original_message: message,
            preprocessed: &preprocessed,
            is_established_user: config.is_established_user,
        };
        let (final_score, _factors) = score_memory(
            &ctx,
            relationships.len(),
            candidate.context.is_some(),
        );
        if final_score >= memory_type.extraction_threshold() {
            scored.push(ScoredCandidate {
                content: candidate.content,
                memory_type,
                llm_confidence: candidate.confidence,
                final_score,
                entities: candidate.entities,
                temporal_info: candidate.temporal_info,
                relationships: candidate.relationships,
            });
        }
    }
    metadata.steps_completed = 8;

    // Step 9: sort + truncate.
    scored.sort_by(|a, b| b.final_score.partial_cmp(&a.final_score).unwrap());
    scored.truncate(config.max_memories);
    metadata.steps_completed = 9;
    metadata.count_after_filter = scored.len();
    metadata.average_confidence = if scored.is_empty() {
        0.0
    } else {
        scored.iter().map(|c| c.final_score).sum::<f64>() / scored.len() as f64
    };

    Ok(PipelineResult {
        candidates: scored,
        metadata,
        reasoning: parsed.reasoning,
        llm_extraction_confidence: parsed.extraction_confidence,
        skipped_reason: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_error_classifies_llm_errors() {
        let err: PipelineError = LlmError::Connection("refused".into()).into();
        assert!(matches!(err, PipelineError::LlmUnavailable(_)));
        let err: PipelineError = LlmError::ParseError("bad json".into()).into();
        assert!(matches!(err, PipelineError::ParseError(_)));
    }
}
