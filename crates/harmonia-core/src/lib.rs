//! # Harmonia Core
//!
//! Local-first per-user memory engine: extracts durable facts from
//! conversational messages, detects and resolves conflicts against what is
//! already known, and stores everything in a per-user SQLite database with
//! full-text search.
//!
//! ## Pipeline
//!
//! A message goes through [`preprocess`] (cleaning, gating), [`entities`]
//! (lightweight NER), the [`llm`] client (extraction against a
//! [`prompts`]-rendered template), [`confidence`] scoring, and finally
//! [`pipeline::process_message`] ties those into one call. Surviving
//! candidates are handed to [`memory_manager::MemoryManager`], which runs
//! [`conflict`] detection/resolution before writing to [`storage`] through
//! the per-user [`router::Router`].
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use harmonia_core::{MemoryManager, Router, OllamaClient, PipelineConfig};
//! use std::sync::Arc;
//!
//! let router = Arc::new(Router::new("/var/lib/harmonia"));
//! let manager = MemoryManager::new(router);
//! let llm = OllamaClient::new("http://localhost:11434", "llama3.1");
//!
//! let summary = manager
//!     .process_and_store(&llm, "alice", "I just moved to Berlin", None, &PipelineConfig::default())
//!     .await?;
//! ```
//!
//! ## Feature flags
//!
//! - `bundled-sqlite` (default): statically link SQLite via `rusqlite`'s
//!   `bundled` feature, so no system SQLite is required.
//! - `encryption`: switch to `rusqlite`'s `bundled-sqlcipher` feature for
//!   at-rest encrypted per-user databases.

#![warn(rustdoc::missing_crate_level_docs)]

pub mod confidence;
pub mod conflict;
pub mod entities;
pub mod error;
pub mod llm;
pub mod memory_manager;
pub mod model;
pub mod pipeline;
pub mod preprocess;
pub mod prompts;
pub mod router;
pub mod search;
pub mod storage;
pub mod temporal;

pub use error::{Error, ErrorKind, Result};
pub use llm::{ChatMessage, GenerateOptions, HealthStatus, OllamaClient};
pub use memory_manager::{MemoryManager, Outcome, ProcessAndStoreSummary, StoreResult};
pub use model::{AuditEntry, Memory, MemoryPatch, MemoryType, MemoryUpdate, Session, UpdateType};
pub use pipeline::{PipelineConfig, PipelineError, PipelineResult, ScoredCandidate};
pub use router::{Router, RouterError};
pub use search::{ExportFormat, SearchEngine, SearchError, SearchQuery};
pub use storage::{ListFilters, Storage, StorageError};

/// Crate version, as set by `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Convenient imports for common usage.
pub mod prelude {
    pub use crate::{
        Error, ErrorKind, ListFilters, Memory, MemoryManager, MemoryPatch, MemoryType,
        OllamaClient, Outcome, PipelineConfig, Result, Router, SearchEngine, SearchQuery, Storage,
        StorageError,
    };
}
