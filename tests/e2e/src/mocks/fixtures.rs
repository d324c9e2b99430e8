//! Memory fixture builders for scenario and invariant tests.
//!
//! Replaces the teacher's `TestDataFactory` (built around
//! `vestige_core::KnowledgeNode`/`Rating`) with equivalents for
//! `harmonia_core::Memory`.

use chrono::{Duration, Utc};
use harmonia_core::{Memory, MemoryType};

pub struct MemoryFactory;

impl MemoryFactory {
    /// A single memory with a given category/content, confidence set as the
    /// category's baseline.
    pub fn memory(content: impl Into<String>, category: MemoryType) -> Memory {
        let mut memory = Memory::new(content, category);
        memory.confidence_score = Some(category.baseline_confidence());
        memory
    }

    /// Same as [`Self::memory`] but backdated, for recency-boost and
    /// export-window assertions.
    pub fn memory_days_ago(content: impl Into<String>, category: MemoryType, days: i64) -> Memory {
        let mut memory = Self::memory(content, category);
        let backdated = Utc::now() - Duration::days(days);
        memory.created_at = backdated;
        memory.updated_at = backdated;
        memory.timestamp = Some(backdated);
        memory
    }

    /// A small corpus used by the BM25 ranking scenario: four memories each
    /// mentioning a different technology, one of them also mentioning
    /// "programming" so it should outrank the others for that query.
    pub fn programming_corpus() -> Vec<Memory> {
        vec![
            Self::memory(
                "I love programming in Python, it's my favorite language",
                MemoryType::Preference,
            ),
            Self::memory("I use JavaScript for web development", MemoryType::Skill),
            Self::memory("Rust is a systems programming language", MemoryType::Factual),
            Self::memory("My favorite editor is VS Code", MemoryType::Preference),
        ]
    }

    /// A batch of `count` plain factual memories, numbered in content.
    pub fn batch(count: usize) -> Vec<Memory> {
        (0..count)
            .map(|i| Self::memory(format!("fact number {i}"), MemoryType::Factual))
            .collect()
    }
}
