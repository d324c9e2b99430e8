//! Structural invariants that must hold regardless of which scenario
//! produced a memory: timestamp ordering, per-user isolation, export
//! round-tripping, duplicate-id rejection, similarity symmetry, BM25
//! monotonicity, and temporal-expression round-tripping.

use chrono::Utc;
use harmonia_core::conflict::detect::calculate_similarity;
use harmonia_core::search::{export, import_json, ExportFormat};
use harmonia_core::{temporal, Error, Memory, MemoryType, SearchEngine, SearchQuery};
use harmonia_e2e_tests::harness::TestRouter;

#[test]
fn created_at_never_exceeds_updated_at_and_confidence_is_bounded() {
    let harness = TestRouter::new_temp();
    let user = "alice";
    for memory in harness.seed_many(user, 5) {
        assert!(memory.created_at <= memory.updated_at);
        if let Some(confidence) = memory.confidence_score {
            assert!((0.0..=1.0).contains(&confidence));
        }
    }
}

#[test]
fn fts_index_reflects_newly_created_memories() {
    let harness = TestRouter::new_temp();
    let user = "alice";
    harness.seed(
        user,
        Memory::new("The quokka is a small marsupial from Western Australia", MemoryType::Factual),
    );

    let storage = harness.router.get(user).unwrap();
    let engine = SearchEngine::new();
    let page = engine.search(&storage, &SearchQuery::new("quokka")).unwrap();
    assert!(page.items.iter().any(|i| i.memory.content.contains("quokka")));
}

#[test]
fn per_user_isolation_holds_under_list() {
    let harness = TestRouter::new_temp();
    harness.seed_many("user_a", 2);
    harness.seed_many("user_b", 5);

    let storage_a = harness.router.get("user_a").unwrap();
    let (memories_a, total_a) = storage_a
        .list_memories(&harmonia_core::storage::ListFilters::new())
        .unwrap();
    assert_eq!(total_a, 2);
    assert_eq!(memories_a.len(), 2);

    let storage_b = harness.router.get("user_b").unwrap();
    let (memories_b, total_b) = storage_b
        .list_memories(&harmonia_core::storage::ListFilters::new())
        .unwrap();
    assert_eq!(total_b, 5);
    assert_eq!(memories_b.len(), 5);
}

#[test]
fn export_then_import_round_trips_every_memory() {
    let harness = TestRouter::new_temp();
    let user = "alice";
    let seeded = harness.seed_many(user, 4);

    let storage = harness.router.get(user).unwrap();
    let (memories, _) = storage
        .list_memories(&harmonia_core::storage::ListFilters::new())
        .unwrap();

    let json = export(&memories, ExportFormat::Json, user, true).unwrap();
    let records = import_json(&json).unwrap();

    assert_eq!(records.len(), seeded.len());
    for original in &seeded {
        let record = records
            .iter()
            .find(|r| r.memory_id == original.memory_id)
            .expect("original memory present in export");
        assert_eq!(record.content, original.content);
    }
}

#[test]
fn storing_a_memory_with_a_reused_id_is_rejected() {
    let harness = TestRouter::new_temp();
    let user = "alice";
    let memory = Memory::new("I enjoy hiking", MemoryType::Preference);
    let duplicate = memory.clone();

    harness.manager.store_memory(user, memory, true).unwrap();
    let err = harness
        .manager
        .store_memory(user, duplicate, true)
        .expect_err("reusing a memory_id must be rejected");
    assert!(matches!(err, Error::Duplicate(_)));
}

#[test]
fn similarity_is_symmetric() {
    let a = "I work at Google as a software engineer";
    let b = "I'm a software engineer working at Google";
    assert_eq!(calculate_similarity(a, b), calculate_similarity(b, a));

    let c = "The weather today is sunny and warm";
    assert_eq!(calculate_similarity(a, c), calculate_similarity(c, a));
}

#[test]
fn bm25_score_increases_with_additional_term_frequency() {
    let harness = TestRouter::new_temp();
    let user = "alice";
    harness.seed(
        user,
        Memory::new("Rust is a systems language", MemoryType::Factual),
    );
    harness.seed(
        user,
        Memory::new("Rust Rust Rust: a systems language built around Rust", MemoryType::Factual),
    );
    harness.seed(
        user,
        Memory::new("JavaScript runs in the browser", MemoryType::Factual),
    );

    let storage = harness.router.get(user).unwrap();
    let engine = SearchEngine::new();
    let page = engine.search(&storage, &SearchQuery::new("rust")).unwrap();

    let scores: Vec<f64> = page
        .items
        .iter()
        .filter(|i| i.memory.content.to_lowercase().contains("rust"))
        .map(|i| i.score)
        .collect();
    assert_eq!(scores.len(), 2);
    let highest = page.items.first().unwrap();
    assert!(highest.memory.content.to_lowercase().matches("rust").count() >= 2);
    assert!(highest.score >= scores[1]);
}

#[test]
fn temporal_expression_round_trips_through_a_day() {
    let reference = Utc::now();
    let result = temporal::parse_expression("tomorrow", reference, "UTC")
        .expect("'tomorrow' should parse");
    let delta = result.start.date_naive() - reference.date_naive();
    assert_eq!(delta.num_days(), 1);
}
