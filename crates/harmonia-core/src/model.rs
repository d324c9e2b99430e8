//! Core data model: `Memory`, its audit trail, sessions, and the closed
//! memory-type enumeration.
//!
//! Grounded in `original_source/src/models/memory.py` and `models/session.py`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Maximum lengths enforced at validation time (`models/memory.py`).
pub const MAX_ID_LEN: usize = 255;
pub const MAX_CONTENT_LEN: usize = 10_000;
pub const MAX_CATEGORY_LEN: usize = 100;
pub const MAX_ORIGINAL_MESSAGE_LEN: usize = 50_000;

/// Closed ten-case enumeration of memory types. Each case carries a baseline
/// confidence and an extraction-threshold override; see [`MemoryType::baseline_confidence`]
/// and [`MemoryType::extraction_threshold`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Personal,
    Factual,
    Emotional,
    Procedural,
    Episodic,
    Relational,
    Preference,
    Goal,
    Skill,
    Temporal,
}

impl MemoryType {
    pub const ALL: [MemoryType; 10] = [
        MemoryType::Personal,
        MemoryType::Factual,
        MemoryType::Emotional,
        MemoryType::Procedural,
        MemoryType::Episodic,
        MemoryType::Relational,
        MemoryType::Preference,
        MemoryType::Goal,
        MemoryType::Skill,
        MemoryType::Temporal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Personal => "personal",
            MemoryType::Factual => "factual",
            MemoryType::Emotional => "emotional",
            MemoryType::Procedural => "procedural",
            MemoryType::Episodic => "episodic",
            MemoryType::Relational => "relational",
            MemoryType::Preference => "preference",
            MemoryType::Goal => "goal",
            MemoryType::Skill => "skill",
            MemoryType::Temporal => "temporal",
        }
    }

    /// Source values are verbatim from `processing/confidence_scorer.py`'s
    /// `type_baselines` dict, not the rounder prose figures in spec.md.
    pub fn baseline_confidence(&self) -> f64 {
        match self {
            MemoryType::Personal => 0.8,
            MemoryType::Factual => 0.85,
            MemoryType::Emotional => 0.7,
            MemoryType::Procedural => 0.8,
            MemoryType::Episodic => 0.75,
            MemoryType::Relational => 0.7,
            MemoryType::Preference => 0.75,
            MemoryType::Goal => 0.75,
            MemoryType::Skill => 0.8,
            MemoryType::Temporal => 0.9,
        }
    }

    /// `personal`, `skill`, `preference` use a lowered bar (empirically
    /// weaker types); everything else uses the global default.
    pub fn extraction_threshold(&self) -> f64 {
        match self {
            MemoryType::Personal | MemoryType::Skill | MemoryType::Preference => 0.50,
            _ => 0.70,
        }
    }

    pub fn parse(s: &str) -> Option<MemoryType> {
        MemoryType::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The central record: a single extracted fact about a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub memory_id: String,
    pub content: String,
    pub original_message: Option<String>,
    pub category: MemoryType,
    pub confidence_score: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: HashMap<String, serde_json::Value>,
    /// Reserved, opaque; never populated or read (no semantic search, a Non-goal).
    pub embedding: Option<Vec<u8>>,
    pub is_active: bool,
}

impl Memory {
    /// `mem_` followed by 12 hex chars of a UUIDv4, matching
    /// `f"mem_{uuid.uuid4().hex[:12]}"` exactly.
    pub fn generate_id() -> String {
        let hex = Uuid::new_v4().simple().to_string();
        format!("mem_{}", &hex[..12])
    }

    pub fn new(content: impl Into<String>, category: MemoryType) -> Self {
        let now = Utc::now();
        Memory {
            memory_id: Self::generate_id(),
            content: content.into(),
            original_message: None,
            category,
            confidence_score: None,
            timestamp: None,
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
            embedding: None,
            is_active: true,
        }
    }

    /// Field-level constraints from `models/memory.py`, enforced (not just documented).
    pub fn validate(&self) -> Result<()> {
        if self.memory_id.is_empty() || self.memory_id.len() > MAX_ID_LEN {
            return Err(Error::Validation(format!(
                "memory_id must be non-empty and <= {} chars",
                MAX_ID_LEN
            )));
        }
        if self.content.is_empty() || self.content.len() > MAX_CONTENT_LEN {
            return Err(Error::Validation(format!(
                "content must be non-empty and <= {} chars",
                MAX_CONTENT_LEN
            )));
        }
        if let Some(msg) = &self.original_message {
            if msg.len() > MAX_ORIGINAL_MESSAGE_LEN {
                return Err(Error::Validation(format!(
                    "original_message must be <= {} chars",
                    MAX_ORIGINAL_MESSAGE_LEN
                )));
            }
        }
        if self.category.as_str().len() > MAX_CATEGORY_LEN {
            return Err(Error::Validation("category too long".into()));
        }
        if let Some(score) = self.confidence_score {
            if !(0.0..=1.0).contains(&score) {
                return Err(Error::Validation(
                    "confidence_score must be in [0.0, 1.0]".into(),
                ));
            }
        }
        if self.created_at > self.updated_at {
            return Err(Error::Validation("created_at must be <= updated_at".into()));
        }
        Ok(())
    }

    pub fn related_memories(&self) -> Vec<String> {
        self.metadata
            .get("related_memories")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_related_memories(&mut self, ids: Vec<String>) {
        self.metadata.insert(
            "related_memories".to_string(),
            serde_json::Value::Array(ids.into_iter().map(serde_json::Value::String).collect()),
        );
    }
}

/// A user-supplied partial update; only `Some` fields are written.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryPatch {
    pub content: Option<String>,
    pub category: Option<MemoryType>,
    pub confidence_score: Option<f64>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    pub is_active: Option<bool>,
}

/// Append-only audit record for a single memory mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UpdateType {
    Create,
    Update,
    Merge,
    Replace,
    Archive,
    Link,
}

impl UpdateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateType::Create => "create",
            UpdateType::Update => "update",
            UpdateType::Merge => "merge",
            UpdateType::Replace => "replace",
            UpdateType::Archive => "archive",
            UpdateType::Link => "link",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryUpdate {
    pub update_id: String,
    pub memory_id: String,
    pub previous_content: Option<String>,
    pub new_content: Option<String>,
    pub update_type: UpdateType,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
}

/// Groups writes; not required for retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub message_count: i64,
    pub memories_created: i64,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Session {
    pub fn new() -> Self {
        Session {
            session_id: format!("sess_{}", Uuid::new_v4().simple()),
            started_at: Utc::now(),
            ended_at: None,
            message_count: 0,
            memories_created: 0,
            metadata: HashMap::new(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Conflict-resolution audit journal entry; append-only, used for rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub audit_id: String,
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub strategy: String,
    pub conflict_type: String,
    pub memory_ids: Vec<String>,
    pub original_content: HashMap<String, String>,
    pub new_content: HashMap<String, String>,
    /// Enough data to undo this resolution: ids archived, links added, etc.
    pub rollback_payload: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_id_matches_scheme() {
        let id = Memory::generate_id();
        assert!(id.starts_with("mem_"));
        assert_eq!(id.len(), 4 + 12);
    }

    #[test]
    fn validate_rejects_empty_content() {
        let mut m = Memory::new("", MemoryType::Personal);
        m.content = String::new();
        assert!(m.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_confidence() {
        let mut m = Memory::new("hi", MemoryType::Personal);
        m.confidence_score = Some(1.5);
        assert!(m.validate().is_err());
    }

    #[test]
    fn baseline_confidences_match_source() {
        assert_eq!(MemoryType::Emotional.baseline_confidence(), 0.7);
        assert_eq!(MemoryType::Relational.baseline_confidence(), 0.7);
        assert_eq!(MemoryType::Temporal.baseline_confidence(), 0.9);
    }

    #[test]
    fn lowered_thresholds_apply_to_three_types() {
        assert_eq!(MemoryType::Personal.extraction_threshold(), 0.50);
        assert_eq!(MemoryType::Skill.extraction_threshold(), 0.50);
        assert_eq!(MemoryType::Preference.extraction_threshold(), 0.50);
        assert_eq!(MemoryType::Factual.extraction_threshold(), 0.70);
    }
}
