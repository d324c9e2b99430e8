//! Per-user embedded SQL storage.
//!
//! Each user's database is self-contained: its own file, its own
//! write-ahead log, its own connection pool. Grounded in
//! `original_source/src/db/manager.py` and `db/user_db_manager.py`, adapted
//! to the teacher's `storage/sqlite.rs` idiom: methods take `&self` with
//! interior locking so `Arc<Storage>` is `Send + Sync` without an outer
//! `Mutex`.

mod pool;
pub mod queries;
pub mod schema;

pub use pool::{with_busy_retry, Pool, PooledConnection};
pub use schema::{apply_migrations, MIGRATIONS, SCHEMA_VERSION};

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;

use crate::error::ErrorKind;
use crate::model::{AuditEntry, Memory, MemoryPatch, MemoryType, MemoryUpdate, Session, UpdateType};

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("memory not found: {0}")]
    NotFound(String),
    #[error("duplicate memory id: {0}")]
    Duplicate(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("initialization error: {0}")]
    Init(String),
    #[error("connection pool exhausted")]
    PoolExhausted,
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::NotFound(_) => ErrorKind::NotFound,
            StorageError::Duplicate(_) => ErrorKind::Duplicate,
            StorageError::Database(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::DatabaseBusy =>
            {
                ErrorKind::DbBusy
            }
            _ => ErrorKind::DbError,
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone, Default)]
pub struct ListFilters {
    pub category: Option<MemoryType>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub min_confidence: Option<f64>,
    pub max_confidence: Option<f64>,
    pub sort_by: String,
    pub ascending: bool,
    pub limit: i64,
    pub offset: i64,
    pub include_inactive: bool,
}

impl ListFilters {
    pub fn new() -> Self {
        ListFilters {
            sort_by: "created_at".to_string(),
            ascending: false,
            limit: 50,
            offset: 0,
            ..Default::default()
        }
    }
}

/// Row shape as read back from SQLite, prior to metadata/type parsing.
struct MemoryRow {
    memory_id: String,
    content: String,
    original_message: Option<String>,
    category: String,
    confidence_score: Option<f64>,
    timestamp: Option<String>,
    created_at: String,
    updated_at: String,
    metadata: String,
    embedding: Option<Vec<u8>>,
    is_active: bool,
}

fn row_to_memory(row: &rusqlite::Row) -> rusqlite::Result<MemoryRow> {
    Ok(MemoryRow {
        memory_id: row.get("memory_id")?,
        content: row.get("content")?,
        original_message: row.get("original_message")?,
        category: row.get("category")?,
        confidence_score: row.get("confidence_score")?,
        timestamp: row.get("timestamp")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        metadata: row.get("metadata")?,
        embedding: row.get("embedding")?,
        is_active: row.get::<_, i64>("is_active")? != 0,
    })
}

/// Loads one memory row by id. Takes `&rusqlite::Connection` so it works
/// against either a plain pooled connection or an open transaction (both
/// deref-coerce to `&Connection`).
fn get_memory_row(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<Option<Memory>> {
    conn.query_row(
        "SELECT memory_id, content, original_message, category, confidence_score,
                timestamp, created_at, updated_at, metadata, embedding, is_active
         FROM memories WHERE memory_id = ?1",
        params![id],
        row_to_memory,
    )
    .optional()
    .map(|row| row.map(parse_memory))
}

fn insert_memory_row(conn: &rusqlite::Connection, memory: &Memory) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO memories
            (memory_id, content, original_message, category, confidence_score,
             timestamp, created_at, updated_at, metadata, embedding, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            memory.memory_id,
            memory.content,
            memory.original_message,
            memory.category.as_str(),
            memory.confidence_score,
            memory.timestamp.map(|t| t.to_rfc3339()),
            memory.created_at.to_rfc3339(),
            memory.updated_at.to_rfc3339(),
            serde_json::to_string(&memory.metadata).unwrap_or_else(|_| "{}".to_string()),
            memory.embedding,
            memory.is_active as i64,
        ],
    )?;
    Ok(())
}

fn update_memory_row(
    conn: &rusqlite::Connection,
    id: &str,
    content: &str,
    category: MemoryType,
    confidence: Option<f64>,
    metadata_json: &str,
    is_active: bool,
    now: DateTime<Utc>,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE memories SET content = ?1, category = ?2, confidence_score = ?3,
            metadata = ?4, is_active = ?5, updated_at = ?6 WHERE memory_id = ?7",
        params![
            content,
            category.as_str(),
            confidence,
            metadata_json,
            is_active as i64,
            now.to_rfc3339(),
            id,
        ],
    )
}

fn archive_memory_row(conn: &rusqlite::Connection, id: &str, now: DateTime<Utc>) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE memories SET is_active = 0, updated_at = ?1 WHERE memory_id = ?2",
        params![now.to_rfc3339(), id],
    )
}

fn hard_delete_memory_row(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM memories WHERE memory_id = ?1", params![id])
}

fn insert_memory_update_row(
    conn: &rusqlite::Connection,
    memory_id: &str,
    previous: Option<&str>,
    new: Option<&str>,
    kind: UpdateType,
) -> rusqlite::Result<()> {
    let update = MemoryUpdate {
        update_id: format!("upd_{}", uuid::Uuid::new_v4().simple()),
        memory_id: memory_id.to_string(),
        previous_content: previous.map(str::to_string),
        new_content: new.map(str::to_string),
        update_type: kind,
        updated_by: "system".to_string(),
        updated_at: Utc::now(),
    };
    conn.execute(
        "INSERT INTO memory_updates
            (update_id, memory_id, previous_content, new_content, update_type, updated_by, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            update.update_id,
            update.memory_id,
            update.previous_content,
            update.new_content,
            update.update_type.as_str(),
            update.updated_by,
            update.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn insert_audit_entry_row(conn: &rusqlite::Connection, entry: &AuditEntry) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO audit_entries
            (audit_id, timestamp, action, strategy, conflict_type, memory_ids,
             original_content, new_content, rollback_payload)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            entry.audit_id,
            entry.timestamp.to_rfc3339(),
            entry.action,
            entry.strategy,
            entry.conflict_type,
            serde_json::to_string(&entry.memory_ids).unwrap_or_default(),
            serde_json::to_string(&entry.original_content).unwrap_or_default(),
            serde_json::to_string(&entry.new_content).unwrap_or_default(),
            entry.rollback_payload.to_string(),
        ],
    )?;
    Ok(())
}

fn parse_memory(row: MemoryRow) -> Memory {
    Memory {
        memory_id: row.memory_id,
        content: row.content,
        original_message: row.original_message,
        category: MemoryType::parse(&row.category).unwrap_or(MemoryType::Factual),
        confidence_score: row.confidence_score,
        timestamp: row
            .timestamp
            .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
            .map(|d| d.with_timezone(&Utc)),
        created_at: DateTime::parse_from_rfc3339(&row.created_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        updated_at: DateTime::parse_from_rfc3339(&row.updated_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        metadata: serde_json::from_str(&row.metadata).unwrap_or_default(),
        embedding: row.embedding,
        is_active: row.is_active,
    }
}

/// A transaction-scoped handle exposing the same write operations as
/// [`Storage`], all running against the one open transaction so a caller can
/// compose several mutations (archive, merge, link, audit, insert) that
/// commit or roll back together. Obtained from [`Storage::with_write_transaction`].
pub struct WriteTx<'a> {
    tx: &'a rusqlite::Transaction<'a>,
}

impl<'a> WriteTx<'a> {
    pub fn get_memory(&self, id: &str) -> Result<Option<Memory>> {
        Ok(get_memory_row(self.tx, id)?)
    }

    pub fn create_memory(&self, memory: &Memory) -> Result<()> {
        memory
            .validate()
            .map_err(|e| StorageError::Init(e.to_string()))?;
        if get_memory_row(self.tx, &memory.memory_id)?.is_some() {
            return Err(StorageError::Duplicate(memory.memory_id.clone()));
        }
        with_busy_retry(|| insert_memory_row(self.tx, memory))?;
        insert_memory_update_row(self.tx, &memory.memory_id, None, Some(&memory.content), UpdateType::Create)?;
        Ok(())
    }

    pub fn update_memory(&self, id: &str, patch: MemoryPatch) -> Result<Memory> {
        let existing = get_memory_row(self.tx, id)?.ok_or_else(|| StorageError::NotFound(id.to_string()))?;

        let new_content = patch.content.clone().unwrap_or(existing.content.clone());
        let content_changed = patch.content.is_some() && new_content != existing.content;
        let new_category = patch.category.unwrap_or(existing.category);
        let new_confidence = patch.confidence_score.or(existing.confidence_score);
        let new_metadata = patch.metadata.unwrap_or(existing.metadata.clone());
        let new_active = patch.is_active.unwrap_or(existing.is_active);
        let now = Utc::now();
        let metadata_json = serde_json::to_string(&new_metadata).unwrap_or_else(|_| "{}".to_string());

        with_busy_retry(|| {
            update_memory_row(self.tx, id, &new_content, new_category, new_confidence, &metadata_json, new_active, now)
        })?;
        if content_changed {
            insert_memory_update_row(self.tx, id, Some(&existing.content), Some(&new_content), UpdateType::Update)?;
        }
        get_memory_row(self.tx, id)?.ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    /// Soft-delete (archive) only — the conflict resolver never hard-deletes.
    pub fn archive_memory(&self, id: &str) -> Result<()> {
        let now = Utc::now();
        let changed = with_busy_retry(|| archive_memory_row(self.tx, id, now))?;
        if changed == 0 {
            return Err(StorageError::NotFound(id.to_string()));
        }
        insert_memory_update_row(self.tx, id, None, None, UpdateType::Archive)?;
        Ok(())
    }

    pub fn insert_audit_entry(&self, entry: &AuditEntry) -> Result<()> {
        Ok(insert_audit_entry_row(self.tx, entry)?)
    }
}

pub struct Storage {
    pool: Pool,
}

impl Storage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_pool_size(path, 5)
    }

    pub fn open_with_pool_size(path: impl AsRef<Path>, pool_size: usize) -> Result<Self> {
        Ok(Storage {
            pool: Pool::open(path, pool_size)?,
        })
    }

    pub fn path(&self) -> &Path {
        self.pool.path()
    }

    // ------------------------------------------------------------------
    // Memories
    // ------------------------------------------------------------------

    /// Inserts the memory and its creation audit row inside one transaction
    /// (`BEGIN` … `COMMIT`), matching the teacher's `writer.transaction()?` /
    /// `tx.commit()?` idiom (`storage/sqlite.rs`) — the two statements either
    /// both land or neither does.
    pub fn create_memory(&self, memory: &Memory) -> Result<()> {
        memory
            .validate()
            .map_err(|e| StorageError::Init(e.to_string()))?;

        let mut conn = self.pool.checkout()?;
        if get_memory_row(&conn, &memory.memory_id)?.is_some() {
            return Err(StorageError::Duplicate(memory.memory_id.clone()));
        }

        let tx = conn.transaction().map_err(StorageError::Database)?;
        with_busy_retry(|| insert_memory_row(&tx, memory))?;
        insert_memory_update_row(&tx, &memory.memory_id, None, Some(&memory.content), UpdateType::Create)?;
        tx.commit().map_err(StorageError::Database)?;
        Ok(())
    }

    pub fn get_memory(&self, id: &str) -> Result<Option<Memory>> {
        let conn = self.pool.checkout()?;
        Ok(get_memory_row(&conn, id)?)
    }

    /// Applies the patch and (if content changed) its audit row inside one
    /// transaction.
    pub fn update_memory(&self, id: &str, patch: MemoryPatch) -> Result<Memory> {
        let mut conn = self.pool.checkout()?;
        let existing = get_memory_row(&conn, id)?.ok_or_else(|| StorageError::NotFound(id.to_string()))?;

        let new_content = patch.content.clone().unwrap_or(existing.content.clone());
        let content_changed = patch.content.is_some() && new_content != existing.content;
        let new_category = patch.category.unwrap_or(existing.category);
        let new_confidence = patch.confidence_score.or(existing.confidence_score);
        let new_metadata = patch.metadata.unwrap_or(existing.metadata.clone());
        let new_active = patch.is_active.unwrap_or(existing.is_active);
        let now = Utc::now();
        let metadata_json = serde_json::to_string(&new_metadata).unwrap_or_else(|_| "{}".to_string());

        let tx = conn.transaction().map_err(StorageError::Database)?;
        with_busy_retry(|| {
            update_memory_row(&tx, id, &new_content, new_category, new_confidence, &metadata_json, new_active, now)
        })?;
        if content_changed {
            insert_memory_update_row(&tx, id, Some(&existing.content), Some(&new_content), UpdateType::Update)?;
        }
        tx.commit().map_err(StorageError::Database)?;

        get_memory_row(&conn, id)?.ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    /// Soft-delete wraps the flag flip and its audit row in one transaction;
    /// hard-delete wraps the bare `DELETE` the same way for consistency.
    pub fn delete_memory(&self, id: &str, soft: bool) -> Result<()> {
        let mut conn = self.pool.checkout()?;
        let tx = conn.transaction().map_err(StorageError::Database)?;
        if soft {
            let now = Utc::now();
            let changed = with_busy_retry(|| archive_memory_row(&tx, id, now))?;
            if changed == 0 {
                return Err(StorageError::NotFound(id.to_string()));
            }
            insert_memory_update_row(&tx, id, None, None, UpdateType::Archive)?;
        } else {
            let changed = with_busy_retry(|| hard_delete_memory_row(&tx, id))?;
            if changed == 0 {
                return Err(StorageError::NotFound(id.to_string()));
            }
        }
        tx.commit().map_err(StorageError::Database)?;
        Ok(())
    }

    pub fn list_memories(&self, filters: &ListFilters) -> Result<(Vec<Memory>, i64)> {
        let conn = self.pool.checkout()?;
        let sort_col = queries::validate_sort_column(&filters.sort_by);
        let direction = if filters.ascending { "ASC" } else { "DESC" };

        let mut clauses: Vec<String> = Vec::new();
        if !filters.include_inactive {
            clauses.push("is_active = 1".to_string());
        }
        if filters.category.is_some() {
            clauses.push("category = :category".to_string());
        }
        if filters.created_after.is_some() {
            clauses.push("created_at >= :created_after".to_string());
        }
        if filters.created_before.is_some() {
            clauses.push("created_at <= :created_before".to_string());
        }
        if filters.min_confidence.is_some() {
            clauses.push("confidence_score >= :min_confidence".to_string());
        }
        if filters.max_confidence.is_some() {
            clauses.push("confidence_score <= :max_confidence".to_string());
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM memories {}", where_clause);
        let list_sql = format!(
            "SELECT memory_id, content, original_message, category, confidence_score,
                    timestamp, created_at, updated_at, metadata, embedding, is_active
             FROM memories {} ORDER BY {} {} LIMIT :limit OFFSET :offset",
            where_clause, sort_col, direction
        );

        let mut total_stmt = conn.prepare(&count_sql)?;
        let total: i64 = {
            let named = self.named_params(filters);
            total_stmt.query_row(named.as_slice(), |r| r.get(0))?
        };

        let mut list_stmt = conn.prepare(&list_sql)?;
        let mut named = self.named_params(filters);
        named.push((":limit", Box::new(filters.limit)));
        named.push((":offset", Box::new(filters.offset)));
        let params_slice: Vec<(&str, &dyn rusqlite::ToSql)> =
            named.iter().map(|(k, v)| (*k, v.as_ref())).collect();

        let rows = list_stmt
            .query_map(params_slice.as_slice(), row_to_memory)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok((rows.into_iter().map(parse_memory).collect(), total))
    }

    #[allow(clippy::type_complexity)]
    fn named_params(&self, filters: &ListFilters) -> Vec<(&'static str, Box<dyn rusqlite::ToSql>)> {
        let mut v: Vec<(&'static str, Box<dyn rusqlite::ToSql>)> = Vec::new();
        if let Some(c) = filters.category {
            v.push((":category", Box::new(c.as_str().to_string())));
        }
        if let Some(d) = filters.created_after {
            v.push((":created_after", Box::new(d.to_rfc3339())));
        }
        if let Some(d) = filters.created_before {
            v.push((":created_before", Box::new(d.to_rfc3339())));
        }
        if let Some(c) = filters.min_confidence {
            v.push((":min_confidence", Box::new(c)));
        }
        if let Some(c) = filters.max_confidence {
            v.push((":max_confidence", Box::new(c)));
        }
        v
    }

    /// Raw FTS hits: memory_id plus rank, for the search engine to re-rank with BM25.
    pub fn fts_search(&self, fts_query: &str, limit: i64) -> Result<Vec<(String, f64)>> {
        let conn = self.pool.checkout()?;
        let mut stmt = conn.prepare(
            "SELECT m.memory_id, bm25(memories_fts) as rank
             FROM memories_fts
             JOIN memories m ON m.memory_id = memories_fts.memory_id
             WHERE memories_fts MATCH ?1 AND m.is_active = 1
             ORDER BY rank LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![fts_query, limit], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Fallback substring scan (used when the cleaned query is too short for FTS).
    pub fn like_search(&self, needle: &str, limit: i64) -> Result<Vec<Memory>> {
        let conn = self.pool.checkout()?;
        let pattern = format!("%{}%", needle);
        let mut stmt = conn.prepare(
            "SELECT memory_id, content, original_message, category, confidence_score,
                    timestamp, created_at, updated_at, metadata, embedding, is_active
             FROM memories WHERE is_active = 1 AND content LIKE ?1
             ORDER BY confidence_score DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![pattern, limit], row_to_memory)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows.into_iter().map(parse_memory).collect())
    }

    /// All active memories for a user, used to (re)compute BM25 corpus stats.
    pub fn all_active_memories(&self) -> Result<Vec<Memory>> {
        let conn = self.pool.checkout()?;
        let mut stmt = conn.prepare(
            "SELECT memory_id, content, original_message, category, confidence_score,
                    timestamp, created_at, updated_at, metadata, embedding, is_active
             FROM memories WHERE is_active = 1",
        )?;
        let rows = stmt
            .query_map([], row_to_memory)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows.into_iter().map(parse_memory).collect())
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    pub fn ensure_session(&self, session: &Session) -> Result<()> {
        let conn = self.pool.checkout()?;
        conn.execute(
            "INSERT OR IGNORE INTO sessions
                (session_id, started_at, ended_at, message_count, memories_created, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session.session_id,
                session.started_at.to_rfc3339(),
                session.ended_at.map(|t| t.to_rfc3339()),
                session.message_count,
                session.memories_created,
                serde_json::to_string(&session.metadata).unwrap_or_else(|_| "{}".to_string()),
            ],
        )?;
        Ok(())
    }

    pub fn bump_session_counters(&self, session_id: &str, messages: i64, memories: i64) -> Result<()> {
        let conn = self.pool.checkout()?;
        conn.execute(
            "UPDATE sessions SET message_count = message_count + ?1,
                memories_created = memories_created + ?2 WHERE session_id = ?3",
            params![messages, memories, session_id],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Audit trail (conflict resolver)
    // ------------------------------------------------------------------

    pub fn insert_audit_entry(&self, entry: &AuditEntry) -> Result<()> {
        let conn = self.pool.checkout()?;
        Ok(insert_audit_entry_row(&conn, entry)?)
    }

    pub fn get_audit_entry(&self, audit_id: &str) -> Result<Option<AuditEntry>> {
        let conn = self.pool.checkout()?;
        let row = conn
            .query_row(
                "SELECT audit_id, timestamp, action, strategy, conflict_type, memory_ids,
                        original_content, new_content, rollback_payload
                 FROM audit_entries WHERE audit_id = ?1",
                params![audit_id],
                |row| {
                    let ts: String = row.get(1)?;
                    let memory_ids: String = row.get(5)?;
                    let original: String = row.get(6)?;
                    let new: String = row.get(7)?;
                    let payload: String = row.get(8)?;
                    Ok(AuditEntry {
                        audit_id: row.get(0)?,
                        timestamp: DateTime::parse_from_rfc3339(&ts)
                            .map(|d| d.with_timezone(&Utc))
                            .unwrap_or_else(|_| Utc::now()),
                        action: row.get(2)?,
                        strategy: row.get(3)?,
                        conflict_type: row.get(4)?,
                        memory_ids: serde_json::from_str(&memory_ids).unwrap_or_default(),
                        original_content: serde_json::from_str::<HashMap<String, String>>(&original)
                            .unwrap_or_default(),
                        new_content: serde_json::from_str::<HashMap<String, String>>(&new)
                            .unwrap_or_default(),
                        rollback_payload: serde_json::from_str(&payload)
                            .unwrap_or(serde_json::Value::Null),
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn list_audit_entries(&self) -> Result<Vec<AuditEntry>> {
        let conn = self.pool.checkout()?;
        let mut stmt = conn.prepare("SELECT audit_id FROM audit_entries ORDER BY timestamp DESC")?;
        let ids: Vec<String> = stmt
            .query_map([], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);
        drop(conn);
        ids.into_iter()
            .filter_map(|id| self.get_audit_entry(&id).transpose())
            .collect()
    }

    // ------------------------------------------------------------------
    // Compound writes (memory manager's conflict-resolution path)
    // ------------------------------------------------------------------

    /// Runs `f` against one checked-out connection inside a single
    /// transaction, committing once `f` returns `Ok`. Any error — from `f`
    /// itself or from the commit — leaves the transaction to roll back on
    /// drop, so a multi-statement write path (side-effects + audit rows +
    /// final insert) either lands completely or not at all. Matches the
    /// teacher's `writer.transaction()?` / `tx.commit()?` idiom
    /// (`storage/sqlite.rs`).
    pub fn with_write_transaction<T, E>(
        &self,
        f: impl FnOnce(&WriteTx<'_>) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<StorageError>,
    {
        let mut conn = self.pool.checkout().map_err(E::from)?;
        let tx = conn.transaction().map_err(StorageError::Database).map_err(E::from)?;
        let scoped = WriteTx { tx: &tx };
        let result = f(&scoped)?;
        tx.commit().map_err(StorageError::Database).map_err(E::from)?;
        Ok(result)
    }

    /// Replays a conflict-resolution audit entry's rollback payload inside
    /// one transaction: re-activates every archived memory, then strips the
    /// resolution's candidate id back out of every linked memory's
    /// `related_memories`. Per spec.md §7/§4.12, this is the operation a
    /// caller invokes to undo a prior resolution by audit id.
    pub fn rollback_resolution(&self, audit_id: &str) -> Result<()> {
        let entry = self
            .get_audit_entry(audit_id)?
            .ok_or_else(|| StorageError::NotFound(audit_id.to_string()))?;
        let candidate_id = entry.memory_ids.first().cloned().unwrap_or_default();
        let (archived, linked) = crate::conflict::parse_rollback_payload(&entry);

        self.with_write_transaction(|tx| {
            for id in &archived {
                if tx.get_memory(id)?.is_some() {
                    tx.update_memory(
                        id,
                        MemoryPatch {
                            is_active: Some(true),
                            ..Default::default()
                        },
                    )?;
                }
            }
            for id in &linked {
                if let Some(mut memory) = tx.get_memory(id)? {
                    let mut related = memory.related_memories();
                    let before = related.len();
                    related.retain(|r| r != &candidate_id);
                    if related.len() != before {
                        memory.set_related_memories(related);
                        tx.update_memory(
                            id,
                            MemoryPatch {
                                metadata: Some(memory.metadata.clone()),
                                ..Default::default()
                            },
                        )?;
                    }
                }
            }
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Backup/restore (spec.md §4.1, matching `db/manager.py`'s use of
    // `sqlite3.Connection.backup`).
    // ------------------------------------------------------------------

    pub fn backup_to(&self, dest: impl AsRef<Path>) -> Result<()> {
        let conn = self.pool.checkout()?;
        let mut dst = rusqlite::Connection::open(dest)?;
        let backup = rusqlite::backup::Backup::new(&conn, &mut dst)?;
        backup.run_to_completion(100, std::time::Duration::from_millis(50), None)?;
        Ok(())
    }

    pub fn disk_usage_bytes(&self) -> u64 {
        let mut total = 0u64;
        for suffix in ["", "-wal", "-shm"] {
            let mut p = self.path().as_os_str().to_os_string();
            p.push(suffix);
            if let Ok(meta) = std::fs::metadata(std::path::Path::new(&p)) {
                total += meta.len();
            }
        }
        total
    }

    pub fn health_check(&self) -> Result<()> {
        let conn = self.pool.checkout()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AuditEntry;

    fn open() -> (Storage, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path().join("test.db")).unwrap();
        (storage, dir)
    }

    #[test]
    fn create_and_get_round_trip() {
        let (storage, _dir) = open();
        let memory = Memory::new("remembers the user's name", MemoryType::Personal);
        storage.create_memory(&memory).unwrap();
        let fetched = storage.get_memory(&memory.memory_id).unwrap().unwrap();
        assert_eq!(fetched.content, memory.content);
    }

    #[test]
    fn update_memory_records_a_memory_update_row() {
        let (storage, _dir) = open();
        let memory = Memory::new("original content", MemoryType::Factual);
        storage.create_memory(&memory).unwrap();
        storage
            .update_memory(
                &memory.memory_id,
                MemoryPatch {
                    content: Some("revised content".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        let fetched = storage.get_memory(&memory.memory_id).unwrap().unwrap();
        assert_eq!(fetched.content, "revised content");
    }

    #[test]
    fn rollback_resolution_reactivates_archived_memory() {
        let (storage, _dir) = open();
        let existing = Memory::new("I live in Berlin", MemoryType::Factual);
        storage.create_memory(&existing).unwrap();
        storage.delete_memory(&existing.memory_id, true).unwrap();
        assert!(!storage.get_memory(&existing.memory_id).unwrap().unwrap().is_active);

        let audit = AuditEntry {
            audit_id: "audit_test_1".to_string(),
            timestamp: Utc::now(),
            action: "resolve".to_string(),
            strategy: "replace".to_string(),
            conflict_type: "contradiction".to_string(),
            memory_ids: vec!["mem_candidate01".to_string(), existing.memory_id.clone()],
            original_content: HashMap::new(),
            new_content: HashMap::new(),
            rollback_payload: serde_json::json!({
                "action": "replace",
                "archived": [existing.memory_id],
                "replaced_by": "mem_candidate01",
            }),
        };
        storage.insert_audit_entry(&audit).unwrap();

        storage.rollback_resolution("audit_test_1").unwrap();

        assert!(storage.get_memory(&existing.memory_id).unwrap().unwrap().is_active);
    }

    #[test]
    fn rollback_resolution_unlinks_linked_memory() {
        let (storage, _dir) = open();
        let mut existing = Memory::new("I enjoy chess", MemoryType::Personal);
        let candidate_id = "mem_candidate02".to_string();
        existing.set_related_memories(vec![candidate_id.clone()]);
        storage.create_memory(&existing).unwrap();

        let audit = AuditEntry {
            audit_id: "audit_test_2".to_string(),
            timestamp: Utc::now(),
            action: "resolve".to_string(),
            strategy: "link".to_string(),
            conflict_type: "related".to_string(),
            memory_ids: vec![candidate_id.clone(), existing.memory_id.clone()],
            original_content: HashMap::new(),
            new_content: HashMap::new(),
            rollback_payload: serde_json::json!({
                "action": "link",
                "linked": [candidate_id, existing.memory_id],
            }),
        };
        storage.insert_audit_entry(&audit).unwrap();

        storage.rollback_resolution("audit_test_2").unwrap();

        let reloaded = storage.get_memory(&existing.memory_id).unwrap().unwrap();
        assert!(reloaded.related_memories().is_empty());
    }
}
