//! Isolated, temp-dir-backed router construction for end-to-end tests.
//!
//! Mirrors the teacher's `TestDatabaseManager`: a thin RAII wrapper that
//! keeps the backing `TempDir` alive for the lifetime of the test while
//! handing out a ready-to-use `Router`/`MemoryManager` pair.

use std::sync::Arc;

use harmonia_core::{Memory, MemoryManager, MemoryType, Router};
use tempfile::TempDir;

pub struct TestRouter {
    _temp_dir: TempDir,
    pub router: Arc<Router>,
    pub manager: MemoryManager,
}

impl TestRouter {
    /// A fresh per-user-database root under a new temp directory.
    pub fn new_temp() -> Self {
        let temp_dir = TempDir::new().expect("create temp dir for test router");
        let router = Arc::new(Router::new(temp_dir.path().to_path_buf()));
        let manager = MemoryManager::new(router.clone());
        TestRouter {
            _temp_dir: temp_dir,
            router,
            manager,
        }
    }

    /// Writes `memory` directly to `user_id`'s storage, bypassing conflict
    /// detection — useful for seeding a known corpus before exercising
    /// search/list/export paths.
    pub fn seed(&self, user_id: &str, memory: Memory) -> Memory {
        let storage = self.router.get(user_id).expect("open user storage");
        storage.create_memory(&memory).expect("seed memory");
        memory
    }

    /// Seeds `count` plain factual memories for `user_id`, numbered in
    /// their content so assertions can distinguish them.
    pub fn seed_many(&self, user_id: &str, count: usize) -> Vec<Memory> {
        (0..count)
            .map(|i| {
                let memory = Memory::new(format!("fact number {i}"), MemoryType::Factual);
                self.seed(user_id, memory)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_router_has_no_users() {
        let harness = TestRouter::new_temp();
        assert_eq!(harness.router.list().unwrap().len(), 0);
    }

    #[test]
    fn seed_many_creates_distinct_memories() {
        let harness = TestRouter::new_temp();
        let seeded = harness.seed_many("alice", 3);
        assert_eq!(seeded.len(), 3);
        let storage = harness.router.get("alice").unwrap();
        let (memories, total) = storage
            .list_memories(&harmonia_core::storage::ListFilters::new())
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(memories.len(), 3);
    }
}
