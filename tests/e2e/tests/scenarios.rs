//! End-to-end scenarios exercising the store/search/export surface against
//! real per-user SQLite storage (via `MemoryManager`/`Router` directly,
//! bypassing the HTTP layer and the LLM — extraction outcomes are simulated
//! by constructing the memories an extraction pass would have produced).

use harmonia_core::search::{export, ExportFormat};
use harmonia_core::{Memory, MemoryType, SearchEngine, SearchQuery};
use harmonia_e2e_tests::harness::TestRouter;
use harmonia_e2e_tests::mocks::MemoryFactory;

/// Scenario 1: a message yielding several distinct personal facts should
/// land as several memories, with categories and confidences matching
/// what extraction would have assigned.
#[test]
fn multi_fact_personal_message_yields_distinct_memories() {
    let harness = TestRouter::new_temp();
    let user = "alice";

    let facts = vec![
        MemoryFactory::memory("User's name is John Smith", MemoryType::Personal),
        MemoryFactory::memory("User works at Google", MemoryType::Personal),
        MemoryFactory::memory("User has a cat", MemoryType::Personal),
    ];
    for fact in facts {
        let result = harness
            .manager
            .store_memory(user, fact, true)
            .expect("store extracted fact");
        assert_eq!(result.outcome.as_str(), "created");
    }

    let storage = harness.router.get(user).unwrap();
    let all = storage.all_active_memories().unwrap();
    assert!(all.len() >= 3, "expected at least 3 memories, got {}", all.len());
    assert!(all.iter().all(|m| m.category.as_str().contains("personal")));
    assert!(all.iter().any(|m| m.content.contains("Google")));
    assert!(all.iter().any(|m| m.content.contains("cat")));
    assert!(all
        .iter()
        .all(|m| m.confidence_score.unwrap_or(0.0) >= 0.5));
}

/// Scenario 2: storing the same content twice should resolve as an exact
/// duplicate — the second write updates the first rather than creating a
/// second active record.
#[test]
fn exact_duplicate_message_updates_existing_memory() {
    let harness = TestRouter::new_temp();
    let user = "alice";
    let content = "My favorite color is blue";

    let first = Memory::new(content, MemoryType::Preference);
    let first_id = first.memory_id.clone();
    let result1 = harness.manager.store_memory(user, first, true).unwrap();
    assert_eq!(result1.outcome.as_str(), "created");

    let second = Memory::new(content, MemoryType::Preference);
    let result2 = harness.manager.store_memory(user, second, true).unwrap();

    assert!(matches!(result2.outcome.as_str(), "updated" | "merged"));
    assert!(!result2.conflicts_resolved.is_empty());

    let storage = harness.router.get(user).unwrap();
    let original = storage.get_memory(&first_id).unwrap().expect("original still present");
    assert!(original.is_active);
}

/// Scenario 3: a contradicting statement either replaces the old memory
/// outright or is surfaced for user resolution — either way the original
/// is never silently dropped.
#[test]
fn contradiction_is_replaced_or_flagged_for_user() {
    let harness = TestRouter::new_temp();
    let user = "alice";

    let original = Memory::new("I live in Boston", MemoryType::Personal);
    let original_id = original.memory_id.clone();
    let result1 = harness.manager.store_memory(user, original, true).unwrap();
    assert_eq!(result1.outcome.as_str(), "created");

    let contradicting = Memory::new("I moved to New York", MemoryType::Personal);
    let result2 = harness.manager.store_memory(user, contradicting, true).unwrap();

    match result2.outcome.as_str() {
        "replaced" => {
            let storage = harness.router.get(user).unwrap();
            let archived = storage.get_memory(&original_id).unwrap();
            // Replaced memories are soft-deleted, not hard-deleted.
            assert!(archived.is_none() || !archived.unwrap().is_active);
        }
        "conflict_detected" => {
            assert!(result2.requires_user_intervention);
            let storage = harness.router.get(user).unwrap();
            let original = storage.get_memory(&original_id).unwrap().expect("untouched pending resolution");
            assert!(original.is_active);
        }
        other => panic!("unexpected outcome for contradiction: {other}"),
    }
}

/// Scenario 4: two users' memories never leak into each other's search
/// results.
#[test]
fn per_user_isolation_holds_under_search() {
    let harness = TestRouter::new_temp();

    harness.seed(
        "isolation_alice",
        Memory::new("My favorite language is Rust", MemoryType::Preference),
    );
    harness.seed(
        "isolation_bob",
        Memory::new("My favorite language is Python", MemoryType::Preference),
    );

    let engine = SearchEngine::new();

    let alice_storage = harness.router.get("isolation_alice").unwrap();
    let alice_page = engine
        .search(&alice_storage, &SearchQuery::new("favorite language"))
        .unwrap();
    assert!(alice_page.items.iter().all(|i| i.memory.content.contains("Rust")));
    assert!(alice_page.items.iter().all(|i| !i.memory.content.contains("Python")));

    let bob_storage = harness.router.get("isolation_bob").unwrap();
    let bob_page = engine
        .search(&bob_storage, &SearchQuery::new("favorite language"))
        .unwrap();
    assert!(bob_page.items.iter().all(|i| i.memory.content.contains("Python")));
    assert!(bob_page.items.iter().all(|i| !i.memory.content.contains("Rust")));
}

/// Scenario 5: BM25 ranking puts a memory that actually mentions the query
/// term ahead of memories that merely share domain vocabulary.
#[test]
fn bm25_ranking_favors_term_matches() {
    let harness = TestRouter::new_temp();
    let user = "alice";
    for memory in MemoryFactory::programming_corpus() {
        harness.seed(user, memory);
    }

    let storage = harness.router.get(user).unwrap();
    let engine = SearchEngine::new();
    let page = engine
        .search(&storage, &SearchQuery::new("programming"))
        .unwrap();

    assert!(!page.items.is_empty());
    let top = &page.items[0];
    assert!(top.memory.content.to_lowercase().contains("programming"));

    let matching_rank = page
        .items
        .iter()
        .position(|i| i.memory.content.to_lowercase().contains("programming"))
        .unwrap();
    let non_matching_rank = page
        .items
        .iter()
        .position(|i| !i.memory.content.to_lowercase().contains("programming"));
    if let Some(non_matching_rank) = non_matching_rank {
        assert!(matching_rank < non_matching_rank);
    }
}

/// Scenario 6: every export format produces non-empty output, and the JSON
/// export parses back into an array matching the filtered memory count.
#[test]
fn all_export_formats_produce_output() {
    let harness = TestRouter::new_temp();
    let user = "alice";
    let seeded = harness.seed_many(user, 3);

    let storage = harness.router.get(user).unwrap();
    let (memories, total) = storage
        .list_memories(&harmonia_core::storage::ListFilters::new())
        .unwrap();
    assert_eq!(total, seeded.len() as i64);

    for format in [
        ExportFormat::Json,
        ExportFormat::Csv,
        ExportFormat::Markdown,
        ExportFormat::Text,
    ] {
        let payload = export(&memories, format, user, true).unwrap();
        assert!(!payload.is_empty());
    }

    let json = export(&memories, ExportFormat::Json, user, true).unwrap();
    let records = harmonia_core::search::import_json(&json).unwrap();
    assert_eq!(records.len(), memories.len());
}
