//! Literal extraction prompt templates, grounded in
//! `original_source/src/prompts/memory_extraction.py`.

use std::collections::HashMap;

use serde_json::Value;

use super::template::render;
use crate::model::MemoryType;

pub const BASE_SYSTEM_TEMPLATE: &str = r#"You are a memory extraction engine. Extract durable facts about the user
from their message, one memory per distinct fact. Only extract information
that will remain true or relevant beyond this single conversation turn.

Extraction mode: {{mode}}
Candidate memory types: {{memory_types}}

{{#if previous_memories}}
Known memories about this user, do not repeat these:
{{previous_memories}}
{{/if}}

Respond with a strict JSON object of this shape:
{
  "memories": [
    {
      "content": "string",
      "memory_type": "one of the candidate memory types",
      "confidence": 0.0,
      "entities": ["optional"],
      "temporal_info": "optional",
      "context": "optional",
      "relationships": ["optional"]
    }
  ],
  "extraction_confidence": 0.0,
  "reasoning": "string"
}

Example:
Message: "I just moved to Austin and I've been loving the food scene here."
Response: {"memories": [{"content": "Lives in Austin", "memory_type": "personal", "confidence": 0.9}, {"content": "Enjoys Austin's food scene", "memory_type": "preference", "confidence": 0.75}], "extraction_confidence": 0.85, "reasoning": "Explicit relocation and sentiment statements"}
"#;

pub const MAIN_EXTRACTION_TEMPLATE: &str = r#"{{#if previous_memories}}
Previous memories:
{{previous_memories}}
{{/if}}

Message to analyze:
{{message}}

Extraction parameters: mode={{mode}}, max_memories={{max_memories}}, confidence_threshold={{confidence_threshold}}
"#;

fn type_specific_body(memory_type: MemoryType) -> &'static str {
    match memory_type {
        MemoryType::Personal => "Focus on identity facts: name, location, occupation, family, background.",
        MemoryType::Factual => "Focus on objective, verifiable statements about the world or the user.",
        MemoryType::Emotional => "Focus on explicit feelings, moods, or emotional reactions described by the user.",
        MemoryType::Procedural => "Focus on how the user does something: routines, workflows, methods.",
        MemoryType::Episodic => "Focus on specific events or experiences tied to a time and place.",
        MemoryType::Relational => "Focus on the user's relationships with other people.",
        MemoryType::Preference => "Focus on likes, dislikes, and preferences the user expresses.",
        MemoryType::Goal => "Focus on aspirations, plans, or things the user wants to achieve.",
        MemoryType::Skill => "Focus on abilities, expertise, or proficiencies the user claims.",
        MemoryType::Temporal => "Focus on dates, deadlines, schedules, and recurring time commitments.",
    }
}

/// One focused template per memory type, for `get_type_specific_prompt`.
pub fn get_type_specific_prompt(memory_type: MemoryType, message: &str) -> String {
    let template = format!(
        "{}\n\nMessage:\n{{{{message}}}}\n",
        type_specific_body(memory_type)
    );
    let mut context = HashMap::new();
    context.insert("message".to_string(), Value::String(message.to_string()));
    render(&template, &context)
}

pub fn render_base_system(
    mode: &str,
    memory_types: &[MemoryType],
    previous_memories: &[String],
) -> String {
    let mut context = HashMap::new();
    context.insert("mode".to_string(), Value::String(mode.to_string()));
    context.insert(
        "memory_types".to_string(),
        Value::String(
            memory_types
                .iter()
                .map(|t| t.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        ),
    );
    if !previous_memories.is_empty() {
        context.insert(
            "previous_memories".to_string(),
            Value::String(previous_memories.join("\n")),
        );
    }
    render(BASE_SYSTEM_TEMPLATE, &context)
}

pub fn render_main_extraction(
    message: &str,
    mode: &str,
    max_memories: usize,
    confidence_threshold: f64,
    previous_memories: &[String],
) -> String {
    let mut context = HashMap::new();
    context.insert("message".to_string(), Value::String(message.to_string()));
    context.insert("mode".to_string(), Value::String(mode.to_string()));
    context.insert("max_memories".to_string(), Value::Number(max_memories.into()));
    context.insert(
        "confidence_threshold".to_string(),
        serde_json::json!(confidence_threshold),
    );
    if !previous_memories.is_empty() {
        context.insert(
            "previous_memories".to_string(),
            Value::String(previous_memories.join("\n")),
        );
    }
    render(MAIN_EXTRACTION_TEMPLATE, &context)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_system_includes_mode_and_types() {
        let rendered = render_base_system("moderate", &[MemoryType::Personal, MemoryType::Skill], &[]);
        assert!(rendered.contains("moderate"));
        assert!(rendered.contains("personal, skill"));
        assert!(!rendered.contains("Known memories"));
    }

    #[test]
    fn main_extraction_injects_previous_memories_when_present() {
        let rendered = render_main_extraction("hello", "strict", 5, 0.7, &["mem one".to_string()]);
        assert!(rendered.contains("mem one"));
        assert!(rendered.contains("max_memories=5"));
    }

    #[test]
    fn type_specific_prompt_differs_per_type() {
        let personal = get_type_specific_prompt(MemoryType::Personal, "hi");
        let skill = get_type_specific_prompt(MemoryType::Skill, "hi");
        assert_ne!(personal, skill);
    }
}
