//! Memory Manager: the single transactional entry point for writes.
//!
//! Grounded in `original_source/src/processing/memory_manager.py`: the
//! seven-step write path (validate → ensure-user → duplicate precheck →
//! conflict detect/resolve → side-effect application → insert → outcome
//! classification), plus `process_and_store` wiring the extraction pipeline
//! in front of it.

use std::sync::Arc;

use crate::conflict::{detect_conflicts, resolve_batch, Conflict, ResolutionStrategy, ResolvedConflict};
use crate::error::{Error, ErrorKind, Result};
use crate::llm::OllamaClient;
use crate::model::{Memory, MemoryPatch, MemoryType, Session};
use crate::pipeline::{self, PipelineConfig, PipelineError};
use crate::router::Router;
use crate::storage::queries::clean_search_query;

/// The per-write outcome tag from spec.md §4.13.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    Merged,
    Replaced,
    ConflictDetected,
    Error,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Created => "created",
            Outcome::Updated => "updated",
            Outcome::Merged => "merged",
            Outcome::Replaced => "replaced",
            Outcome::ConflictDetected => "conflict_detected",
            Outcome::Error => "error",
        }
    }
}

/// A single resolved conflict, summarized for the caller.
#[derive(Debug, Clone)]
pub struct ConflictSummary {
    pub existing_id: String,
    pub kind: &'static str,
    pub strategy: &'static str,
    pub similarity: f64,
}

#[derive(Debug, Clone)]
pub struct StoreResult {
    pub outcome: Outcome,
    /// The memory that now carries the (possibly merged/updated) content —
    /// absent only for `conflict_detected` and `error`.
    pub memory_id: Option<String>,
    pub conflicts_resolved: Vec<ConflictSummary>,
    pub requires_user_intervention: bool,
    pub acceptable_actions: Vec<&'static str>,
}

pub struct MemoryManager {
    router: Arc<Router>,
}

/// How many recent memories a candidate is compared against for conflict
/// detection; keeps the O(n) pairwise scan bounded per spec.md §4.13 step 4.
const SIMILARITY_CANDIDATE_LIMIT: i64 = 100;

impl MemoryManager {
    pub fn new(router: Arc<Router>) -> Self {
        MemoryManager { router }
    }

    /// Finds existing active memories plausibly related to `candidate`,
    /// via an FTS query seeded with the candidate's first ~100 characters
    /// (FTS-unsafe characters stripped), per spec.md §4.13 step 4.
    fn find_similar(&self, storage: &crate::storage::Storage, candidate: &Memory) -> Result<Vec<Memory>> {
        let seed: String = candidate.content.chars().take(100).collect();
        let cleaned = clean_search_query(&seed);
        if cleaned.trim().is_empty() {
            return Ok(storage.all_active_memories().map_err(Error::from)?);
        }
        let fts_query: String = cleaned
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" OR ");
        let hits = match storage.fts_search(&fts_query, SIMILARITY_CANDIDATE_LIMIT) {
            Ok(hits) => hits,
            Err(_) => Vec::new(),
        };
        if hits.is_empty() {
            return Ok(storage.like_search(&cleaned, SIMILARITY_CANDIDATE_LIMIT).map_err(Error::from)?);
        }
        let mut memories = Vec::with_capacity(hits.len());
        for (id, _rank) in hits {
            if let Some(m) = storage.get_memory(&id).map_err(Error::from)? {
                memories.push(m);
            }
        }
        Ok(memories)
    }

    /// The seven-step single-memory write path.
    pub fn store_memory(
        &self,
        user_id: &str,
        candidate: Memory,
        conflict_detection: bool,
    ) -> Result<StoreResult> {
        candidate.validate().map_err(|e| Error::Validation(e.to_string()))?;

        let storage = self.router.get(user_id)?;

        if storage.get_memory(&candidate.memory_id)?.is_some() {
            return Err(Error::Duplicate(candidate.memory_id.clone()));
        }

        if !conflict_detection {
            storage.create_memory(&candidate)?;
            return Ok(StoreResult {
                outcome: Outcome::Created,
                memory_id: Some(candidate.memory_id.clone()),
                conflicts_resolved: Vec::new(),
                requires_user_intervention: false,
                acceptable_actions: Vec::new(),
            });
        }

        let existing = self.find_similar(&storage, &candidate)?;
        let conflicts: Vec<Conflict> = detect_conflicts(&candidate, &existing);

        if conflicts.is_empty() {
            storage.create_memory(&candidate)?;
            return Ok(StoreResult {
                outcome: Outcome::Created,
                memory_id: Some(candidate.memory_id.clone()),
                conflicts_resolved: Vec::new(),
                requires_user_intervention: false,
                acceptable_actions: Vec::new(),
            });
        }

        let existing_by_id: std::collections::HashMap<String, Memory> =
            existing.into_iter().map(|m| (m.memory_id.clone(), m)).collect();

        let resolved = resolve_batch(
            &candidate,
            conflicts,
            &existing_by_id,
            &std::collections::HashMap::new(),
            None,
        );

        let conflicts_resolved: Vec<ConflictSummary> = resolved
            .iter()
            .map(|r| ConflictSummary {
                existing_id: r.conflict.existing_id.clone(),
                kind: r.conflict.kind.default_action(),
                strategy: r.strategy.as_str(),
                similarity: r.conflict.similarity,
            })
            .collect();

        // Highest-severity conflict first (resolve_batch preserves the
        // detector's severity-desc ordering); a user-intervention verdict
        // anywhere in the batch short-circuits the write entirely — nothing
        // is mutated and the candidate is not persisted.
        if let Some(user_choice) = resolved.iter().find(|r| r.requires_user_intervention) {
            return Ok(StoreResult {
                outcome: Outcome::ConflictDetected,
                memory_id: None,
                conflicts_resolved,
                requires_user_intervention: true,
                acceptable_actions: user_choice
                    .acceptable_actions
                    .iter()
                    .map(|s| s.as_str())
                    .collect(),
            });
        }

        let mut outcome = Outcome::Created;
        let mut skip_insert = false;
        let mut primary_id = candidate.memory_id.clone();

        // Every side effect across the resolved batch, the audit trail, and
        // the final insert land in one transaction: a write either fully
        // applies or fully rolls back.
        storage.with_write_transaction(|tx| {
            for r in &resolved {
                Self::apply_side_effects(tx, &candidate, r)?;
                tx.insert_audit_entry(&r.audit_entry)?;
                match r.strategy {
                    ResolutionStrategy::Replace => {
                        outcome = Outcome::Replaced;
                    }
                    ResolutionStrategy::Merge => {
                        outcome = Outcome::Merged;
                        skip_insert = true;
                        primary_id = r.conflict.existing_id.clone();
                    }
                    ResolutionStrategy::UpdateTimestamp => {
                        if outcome == Outcome::Created {
                            outcome = Outcome::Updated;
                        }
                        skip_insert = true;
                        primary_id = r.conflict.existing_id.clone();
                    }
                    ResolutionStrategy::ArchiveOld => {
                        outcome = Outcome::Replaced;
                    }
                    ResolutionStrategy::Link | ResolutionStrategy::KeepBoth => {}
                    ResolutionStrategy::UserChoose => unreachable!("handled above"),
                }
            }

            if !skip_insert {
                tx.create_memory(&candidate)?;
            }
            Ok(())
        })?;

        Ok(StoreResult {
            outcome,
            memory_id: Some(primary_id),
            conflicts_resolved,
            requires_user_intervention: false,
            acceptable_actions: Vec::new(),
        })
    }

    fn apply_side_effects(
        tx: &crate::storage::WriteTx<'_>,
        candidate: &Memory,
        resolved: &ResolvedConflict,
    ) -> Result<()> {
        for id in &resolved.archive_ids {
            tx.archive_memory(id)?;
        }
        match resolved.strategy {
            ResolutionStrategy::Merge => {
                tx.update_memory(
                    &resolved.conflict.existing_id,
                    MemoryPatch {
                        content: Some(resolved.resulting_content.clone()),
                        ..Default::default()
                    },
                )?;
            }
            ResolutionStrategy::UpdateTimestamp => {
                tx.update_memory(&resolved.conflict.existing_id, MemoryPatch::default())?;
            }
            ResolutionStrategy::Link => {
                if let Some(mut existing) = tx.get_memory(&resolved.conflict.existing_id)? {
                    let mut related = existing.related_memories();
                    if !related.contains(&candidate.memory_id) {
                        related.push(candidate.memory_id.clone());
                    }
                    existing.set_related_memories(related);
                    tx.update_memory(
                        &existing.memory_id,
                        MemoryPatch {
                            metadata: Some(existing.metadata.clone()),
                            ..Default::default()
                        },
                    )?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Undoes a prior conflict resolution by replaying its audit entry:
    /// re-activates archived memories and strips the resolved candidate back
    /// out of any `related_memories` it was linked into.
    pub fn rollback(&self, user_id: &str, audit_id: &str) -> Result<()> {
        let storage = self.router.get(user_id)?;
        storage.rollback_resolution(audit_id)?;
        Ok(())
    }

    /// Full ingestion entry point: run the extraction pipeline, then store
    /// every surviving candidate. Per-memory failures do not abort the
    /// batch.
    pub async fn process_and_store(
        &self,
        llm: &OllamaClient,
        user_id: &str,
        message: &str,
        session: Option<&Session>,
        pipeline_config: &PipelineConfig,
    ) -> Result<ProcessAndStoreSummary> {
        let pipeline_result = pipeline::process_message(llm, message, pipeline_config)
            .await
            .map_err(pipeline_error_to_core)?;

        if let Some(reason) = &pipeline_result.skipped_reason {
            return Ok(ProcessAndStoreSummary {
                results: Vec::new(),
                skipped_reason: Some(reason.clone()),
            });
        }

        let storage = self.router.get(user_id)?;
        if let Some(session) = session {
            storage.ensure_session(session)?;
        }

        let mut results = Vec::with_capacity(pipeline_result.candidates.len());
        for candidate in pipeline_result.candidates {
            let memory_type: MemoryType = candidate.memory_type;
            let mut memory = Memory::new(candidate.content, memory_type);
            memory.original_message = Some(message.to_string());
            memory.confidence_score = Some(candidate.final_score);
            if !candidate.entities.is_empty() {
                memory.metadata.insert(
                    "entities".to_string(),
                    serde_json::json!(candidate.entities),
                );
            }
            if let Some(info) = &candidate.temporal_info {
                memory
                    .metadata
                    .insert("temporal_info".to_string(), serde_json::json!(info));
            }

            match self.store_memory(user_id, memory, true) {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "failed to store extracted memory");
                    results.push(StoreResult {
                        outcome: Outcome::Error,
                        memory_id: None,
                        conflicts_resolved: Vec::new(),
                        requires_user_intervention: false,
                        acceptable_actions: Vec::new(),
                    });
                }
            }
        }

        if let Some(session) = session {
            let created = results.iter().filter(|r| r.outcome != Outcome::Error).count();
            storage.bump_session_counters(&session.session_id, 1, created as i64)?;
        }

        Ok(ProcessAndStoreSummary {
            results,
            skipped_reason: None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ProcessAndStoreSummary {
    pub results: Vec<StoreResult>,
    pub skipped_reason: Option<String>,
}

impl ProcessAndStoreSummary {
    /// Source returns "the first stored memory" as the response's primary
    /// memory id; this mirrors that verbatim for multi-memory writes.
    pub fn primary_memory_id(&self) -> Option<&str> {
        self.results
            .iter()
            .find_map(|r| r.memory_id.as_deref())
    }
}

fn pipeline_error_to_core(e: PipelineError) -> Error {
    match e {
        PipelineError::LlmUnavailable(msg) => Error::Llm(crate::llm::LlmError::Connection(msg)),
        PipelineError::ParseError(msg) => Error::ExtractionParseError(msg),
        PipelineError::Failed { step, message } => {
            Error::ExtractionParseError(format!("{step}: {message}"))
        }
    }
}

/// Maps any core error to its stable `ErrorKind`, used by the HTTP layer.
pub fn error_kind(e: &Error) -> ErrorKind {
    e.kind()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemoryType;

    fn manager() -> (MemoryManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let router = Arc::new(Router::new(dir.path()));
        (MemoryManager::new(router), dir)
    }

    #[test]
    fn first_write_is_created() {
        let (manager, _dir) = manager();
        let memory = Memory::new("I work at Initech", MemoryType::Personal);
        let result = manager.store_memory("alice", memory, true).unwrap();
        assert_eq!(result.outcome, Outcome::Created);
    }

    #[test]
    fn duplicate_id_precheck_fails() {
        let (manager, _dir) = manager();
        let memory = Memory::new("I work at Initech", MemoryType::Personal);
        let id = memory.memory_id.clone();
        manager.store_memory("alice", memory.clone(), true).unwrap();

        let mut dup = Memory::new("Something else", MemoryType::Personal);
        dup.memory_id = id;
        let err = manager.store_memory("alice", dup, true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Duplicate);
    }

    #[test]
    fn exact_duplicate_message_is_updated_not_created_twice() {
        let (manager, _dir) = manager();
        let first = Memory::new("I love hiking on weekends", MemoryType::Personal);
        let first_id = first.memory_id.clone();
        let r1 = manager.store_memory("bob", first, true).unwrap();
        assert_eq!(r1.outcome, Outcome::Created);

        let second = Memory::new("I love hiking on weekends", MemoryType::Personal);
        let r2 = manager.store_memory("bob", second, true).unwrap();
        assert!(matches!(r2.outcome, Outcome::Updated | Outcome::Merged));
        assert!(!r2.conflicts_resolved.is_empty());
        assert_eq!(r2.memory_id.as_deref(), Some(first_id.as_str()));
    }

    #[test]
    fn per_user_isolation_is_preserved() {
        let (manager, _dir) = manager();
        let alice_mem = Memory::new("My favorite language is Rust", MemoryType::Preference);
        let bob_mem = Memory::new("My favorite language is Python", MemoryType::Preference);
        manager.store_memory("isolation_alice", alice_mem, true).unwrap();
        manager.store_memory("isolation_bob", bob_mem, true).unwrap();

        let alice_storage = manager.router.get("isolation_alice").unwrap();
        let bob_storage = manager.router.get("isolation_bob").unwrap();
        let (alice_memories, _) = alice_storage
            .list_memories(&crate::storage::ListFilters::new())
            .unwrap();
        let (bob_memories, _) = bob_storage
            .list_memories(&crate::storage::ListFilters::new())
            .unwrap();
        assert_eq!(alice_memories.len(), 1);
        assert_eq!(bob_memories.len(), 1);
        assert!(alice_memories[0].content.contains("Rust"));
        assert!(bob_memories[0].content.contains("Python"));
    }
}
