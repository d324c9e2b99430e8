//! Resolution strategies dispatched from detected conflicts, plus rollback.

use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;

use super::detect::{Conflict, ConflictKind};
use crate::model::{AuditEntry, Memory};

const DEFAULT_MERGE_CAP: usize = 3;
/// Minimum confidence margin for an automatic `replace` on a contradiction.
const CONTRADICTION_REPLACE_THRESHOLD: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStrategy {
    UpdateTimestamp,
    Replace,
    Merge,
    Link,
    KeepBoth,
    ArchiveOld,
    UserChoose,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::UpdateTimestamp => "update_timestamp",
            ResolutionStrategy::Replace => "replace",
            ResolutionStrategy::Merge => "merge",
            ResolutionStrategy::Link => "link",
            ResolutionStrategy::KeepBoth => "keep_both",
            ResolutionStrategy::ArchiveOld => "archive_old",
            ResolutionStrategy::UserChoose => "user_choose",
        }
    }
}

/// Built-in strategy-by-kind defaults from `processing/conflict_resolver.py`'s
/// `UserPreferences`.
fn default_strategy(kind: ConflictKind) -> ResolutionStrategy {
    match kind {
        ConflictKind::ExactDuplicate => ResolutionStrategy::UpdateTimestamp,
        ConflictKind::MergeCandidate => ResolutionStrategy::Merge,
        ConflictKind::Contradiction => ResolutionStrategy::UserChoose,
        ConflictKind::UpdateNeeded => ResolutionStrategy::Replace,
        ConflictKind::TemporalOverlap => ResolutionStrategy::UserChoose,
        ConflictKind::RelatedMemory => ResolutionStrategy::Link,
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConflict {
    pub conflict: Conflict,
    pub strategy: ResolutionStrategy,
    pub requires_user_intervention: bool,
    pub acceptable_actions: Vec<ResolutionStrategy>,
    /// The candidate content after resolution (possibly merged/replaced).
    pub resulting_content: String,
    /// Existing memory ids to archive as a side effect (`replace`/`archive_old`).
    pub archive_ids: Vec<String>,
    pub audit_entry: AuditEntry,
}

/// Split on sentence-ending punctuation, keeping non-empty trimmed pieces.
fn split_sentences(text: &str) -> Vec<String> {
    text.split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Keep all sentences from the longer content, plus any sentence from the
/// shorter content not already substring-present in the result, preferring
/// longer phrasing on near-duplicate sentences.
fn merge_contents(a: &str, b: &str) -> String {
    let (longer, shorter) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    let mut sentences = split_sentences(longer);
    for candidate in split_sentences(shorter) {
        let already_present = sentences
            .iter()
            .any(|s| s.to_lowercase().contains(&candidate.to_lowercase()));
        if already_present {
            continue;
        }
        if let Some(pos) = sentences
            .iter()
            .position(|s| candidate.to_lowercase().contains(&s.to_lowercase()))
        {
            sentences[pos] = candidate;
        } else {
            sentences.push(candidate);
        }
    }
    sentences.join(". ") + "."
}

fn make_audit(
    action: &str,
    strategy: ResolutionStrategy,
    kind: ConflictKind,
    candidate: &Memory,
    existing: &Memory,
    original_content: HashMap<String, String>,
    new_content: HashMap<String, String>,
    rollback_payload: serde_json::Value,
) -> AuditEntry {
    AuditEntry {
        audit_id: format!("audit_{}", Uuid::new_v4().simple()),
        timestamp: Utc::now(),
        action: action.to_string(),
        strategy: strategy.as_str().to_string(),
        conflict_type: kind.default_action().to_string(),
        memory_ids: vec![candidate.memory_id.clone(), existing.memory_id.clone()],
        original_content,
        new_content,
        rollback_payload,
    }
}

fn resolve_one(candidate: &Memory, existing: &Memory, conflict: Conflict, strategy: ResolutionStrategy) -> ResolvedConflict {
    let mut original_content = HashMap::new();
    original_content.insert(existing.memory_id.clone(), existing.content.clone());
    let mut new_content = HashMap::new();

    let (resulting_content, archive_ids, requires_user, acceptable, rollback_payload) = match strategy {
        ResolutionStrategy::UpdateTimestamp => (
            existing.content.clone(),
            vec![],
            false,
            vec![],
            serde_json::json!({"action": "update_timestamp", "memory_id": existing.memory_id}),
        ),
        ResolutionStrategy::Replace => {
            new_content.insert(candidate.memory_id.clone(), candidate.content.clone());
            (
                candidate.content.clone(),
                vec![existing.memory_id.clone()],
                false,
                vec![],
                serde_json::json!({
                    "action": "replace",
                    "archived": [existing.memory_id.clone()],
                    "replaced_by": candidate.memory_id.clone(),
                }),
            )
        }
        ResolutionStrategy::Merge => {
            let merged = merge_contents(&candidate.content, &existing.content);
            new_content.insert(existing.memory_id.clone(), merged.clone());
            (
                merged,
                vec![],
                false,
                vec![],
                serde_json::json!({
                    "action": "merge",
                    "memory_id": existing.memory_id,
                    "linked": [candidate.memory_id.clone()],
                }),
            )
        }
        ResolutionStrategy::Link => (
            candidate.content.clone(),
            vec![],
            false,
            vec![],
            serde_json::json!({
                "action": "link",
                "linked": [candidate.memory_id.clone(), existing.memory_id.clone()],
            }),
        ),
        ResolutionStrategy::KeepBoth => (
            candidate.content.clone(),
            vec![],
            false,
            vec![],
            serde_json::json!({"action": "keep_both"}),
        ),
        ResolutionStrategy::ArchiveOld => (
            candidate.content.clone(),
            vec![existing.memory_id.clone()],
            false,
            vec![],
            serde_json::json!({
                "action": "archive_old",
                "archived": [existing.memory_id.clone()],
            }),
        ),
        ResolutionStrategy::UserChoose => (
            candidate.content.clone(),
            vec![],
            true,
            vec![
                ResolutionStrategy::Replace,
                ResolutionStrategy::Merge,
                ResolutionStrategy::KeepBoth,
                ResolutionStrategy::ArchiveOld,
            ],
            serde_json::json!({"action": "none"}),
        ),
    };

    let audit = make_audit(
        strategy.as_str(),
        strategy,
        conflict.kind,
        candidate,
        existing,
        original_content,
        new_content,
        rollback_payload,
    );

    ResolvedConflict {
        conflict,
        strategy,
        requires_user_intervention: requires_user,
        acceptable_actions: acceptable,
        resulting_content,
        archive_ids,
        audit_entry: audit,
    }
}

/// Resolves every conflict in `candidate`'s batch against its `existing`
/// counterparts (looked up by `existing_id`), honoring a per-batch working
/// copy of `preferences` that gets the `merge_candidate` entry downgraded to
/// `user_choose` once `merge_cap` automatic merges have been used.
pub fn resolve_batch(
    candidate: &Memory,
    conflicts: Vec<Conflict>,
    existing_by_id: &HashMap<String, Memory>,
    preferences: &HashMap<ConflictKind, ResolutionStrategy>,
    merge_cap: Option<usize>,
) -> Vec<ResolvedConflict> {
    let cap = merge_cap.unwrap_or(DEFAULT_MERGE_CAP);
    let mut working_prefs = preferences.clone();
    let mut merges_used = 0usize;
    let mut out = Vec::with_capacity(conflicts.len());

    for conflict in conflicts {
        let Some(existing) = existing_by_id.get(&conflict.existing_id) else {
            continue;
        };

        let strategy = if conflict.kind == ConflictKind::Contradiction {
            let candidate_conf = candidate.confidence_score.unwrap_or(0.0);
            let existing_conf = existing.confidence_score.unwrap_or(0.0);
            if candidate_conf - existing_conf > CONTRADICTION_REPLACE_THRESHOLD {
                ResolutionStrategy::Replace
            } else {
                ResolutionStrategy::UserChoose
            }
        } else {
            working_prefs
                .get(&conflict.kind)
                .copied()
                .unwrap_or_else(|| default_strategy(conflict.kind))
        };

        if strategy == ResolutionStrategy::Merge {
            merges_used += 1;
            if merges_used > cap {
                working_prefs.insert(ConflictKind::MergeCandidate, ResolutionStrategy::UserChoose);
                out.push(resolve_one(candidate, existing, conflict, ResolutionStrategy::UserChoose));
                continue;
            }
        }

        out.push(resolve_one(candidate, existing, conflict, strategy));
    }

    out
}

/// Extracts the archived and linked memory ids out of an audit entry's
/// `rollback_payload`, per the shapes `resolve_one` writes for each strategy.
/// Pure parsing only — no storage access; the caller (`Storage::rollback_resolution`)
/// does the actual re-activation and unlinking inside one transaction.
pub fn parse_rollback_payload(entry: &AuditEntry) -> (Vec<String>, Vec<String>) {
    let archived = entry
        .rollback_payload
        .get("archived")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    let linked = entry
        .rollback_payload
        .get("linked")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    (archived, linked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemoryType;

    #[test]
    fn merge_keeps_unique_sentences_from_both() {
        let merged = merge_contents(
            "I enjoy hiking on weekends. I also like reading",
            "I enjoy hiking on weekends.",
        );
        assert!(merged.contains("hiking"));
        assert!(merged.contains("reading"));
    }

    #[test]
    fn default_strategies_match_preference_map() {
        assert_eq!(default_strategy(ConflictKind::ExactDuplicate), ResolutionStrategy::UpdateTimestamp);
        assert_eq!(default_strategy(ConflictKind::RelatedMemory), ResolutionStrategy::Link);
        assert_eq!(default_strategy(ConflictKind::Contradiction), ResolutionStrategy::UserChoose);
    }

    #[test]
    fn merge_cap_downgrades_to_user_choose() {
        let candidate = Memory::new("I enjoy hiking", MemoryType::Personal);
        let mut existing_by_id = HashMap::new();
        let mut conflicts = Vec::new();
        for i in 0..5 {
            let existing = Memory::new(format!("I enjoy hiking variant {i}"), MemoryType::Personal);
            conflicts.push(Conflict {
                existing_id: existing.memory_id.clone(),
                kind: ConflictKind::MergeCandidate,
                severity: ConflictKind::MergeCandidate.severity(),
                similarity: 0.7,
                suggested_action: "merge_memories",
            });
            existing_by_id.insert(existing.memory_id.clone(), existing);
        }
        let resolved = resolve_batch(&candidate, conflicts, &existing_by_id, &HashMap::new(), Some(3));
        let merges = resolved.iter().filter(|r| r.strategy == ResolutionStrategy::Merge).count();
        let user_choose = resolved.iter().filter(|r| r.strategy == ResolutionStrategy::UserChoose).count();
        assert_eq!(merges, 3);
        assert_eq!(user_choose, 2);
    }
}
