//! Per-user database DDL, as a versioned-migration array.
//!
//! Grounded in `original_source/src/db/schema.py`'s `CREATE_TABLES` /
//! `CREATE_FTS_TABLE` / `CREATE_INDEXES` / `CREATE_TRIGGERS` / `DEFAULT_DATA`,
//! adapted to the migration-array idiom the teacher uses in
//! `storage/migrations.rs` (`pub const MIGRATIONS: &[Migration]`).
//!
//! Per-user databases carry no `users` table and no `user_id` column on
//! `memories`/`sessions`/`memory_updates` — physical separation (one file per
//! user) makes the column redundant.

use rusqlite::Connection;

pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub up: &'static str,
}

pub const SCHEMA_VERSION: u32 = 1;

pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "initial per-user schema: memories, memory_updates, sessions, categories, FTS5",
    up: r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS memories (
            memory_id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            original_message TEXT,
            category TEXT NOT NULL,
            confidence_score REAL,
            timestamp TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            embedding BLOB,
            is_active INTEGER NOT NULL DEFAULT 1
        );

        CREATE INDEX IF NOT EXISTS idx_memories_category ON memories(category);
        CREATE INDEX IF NOT EXISTS idx_memories_created_at ON memories(created_at);
        CREATE INDEX IF NOT EXISTS idx_memories_is_active ON memories(is_active);
        CREATE INDEX IF NOT EXISTS idx_memories_confidence ON memories(confidence_score);

        CREATE TABLE IF NOT EXISTS memory_updates (
            update_id TEXT PRIMARY KEY,
            memory_id TEXT NOT NULL,
            previous_content TEXT,
            new_content TEXT,
            update_type TEXT NOT NULL,
            updated_by TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_memory_updates_memory_id ON memory_updates(memory_id);

        CREATE TABLE IF NOT EXISTS sessions (
            session_id TEXT PRIMARY KEY,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            message_count INTEGER NOT NULL DEFAULT 0,
            memories_created INTEGER NOT NULL DEFAULT 0,
            metadata TEXT NOT NULL DEFAULT '{}'
        );

        CREATE TABLE IF NOT EXISTS categories (
            name TEXT PRIMARY KEY,
            description TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS audit_entries (
            audit_id TEXT PRIMARY KEY,
            timestamp TEXT NOT NULL,
            action TEXT NOT NULL,
            strategy TEXT NOT NULL,
            conflict_type TEXT NOT NULL,
            memory_ids TEXT NOT NULL,
            original_content TEXT NOT NULL,
            new_content TEXT NOT NULL,
            rollback_payload TEXT NOT NULL
        );

        CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
            memory_id UNINDEXED,
            content,
            category,
            tokenize = 'porter'
        );

        CREATE TRIGGER IF NOT EXISTS trg_memories_updated_at
        AFTER UPDATE ON memories
        FOR EACH ROW WHEN NEW.updated_at = OLD.updated_at
        BEGIN
            UPDATE memories SET updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
            WHERE memory_id = NEW.memory_id;
        END;

        CREATE TRIGGER IF NOT EXISTS trg_memories_fts_insert
        AFTER INSERT ON memories
        BEGIN
            INSERT INTO memories_fts(memory_id, content, category)
            VALUES (new.memory_id, new.content, new.category);
        END;

        CREATE TRIGGER IF NOT EXISTS trg_memories_fts_update
        AFTER UPDATE ON memories
        BEGIN
            DELETE FROM memories_fts WHERE memory_id = old.memory_id;
            INSERT INTO memories_fts(memory_id, content, category)
            VALUES (new.memory_id, new.content, new.category);
        END;

        CREATE TRIGGER IF NOT EXISTS trg_memories_fts_delete
        AFTER DELETE ON memories
        BEGIN
            DELETE FROM memories_fts WHERE memory_id = old.memory_id;
        END;

        INSERT INTO categories(name, description)
        SELECT 'personal', 'Personal facts about the user'
        WHERE NOT EXISTS (SELECT 1 FROM categories WHERE name = 'personal');
        INSERT INTO categories(name, description)
        SELECT 'work', 'Work-related information'
        WHERE NOT EXISTS (SELECT 1 FROM categories WHERE name = 'work');
        INSERT INTO categories(name, description)
        SELECT 'relationships', 'People in the user''s life'
        WHERE NOT EXISTS (SELECT 1 FROM categories WHERE name = 'relationships');
        INSERT INTO categories(name, description)
        SELECT 'preferences', 'Likes, dislikes, and preferences'
        WHERE NOT EXISTS (SELECT 1 FROM categories WHERE name = 'preferences');
        INSERT INTO categories(name, description)
        SELECT 'events', 'Scheduled or past events'
        WHERE NOT EXISTS (SELECT 1 FROM categories WHERE name = 'events');
        INSERT INTO categories(name, description)
        SELECT 'facts', 'General factual knowledge'
        WHERE NOT EXISTS (SELECT 1 FROM categories WHERE name = 'facts');
        INSERT INTO categories(name, description)
        SELECT 'other', 'Uncategorized'
        WHERE NOT EXISTS (SELECT 1 FROM categories WHERE name = 'other');
    "#,
}];

/// Apply all migrations newer than the database's current `schema_version`.
/// Returns the resulting version.
pub fn apply_migrations(conn: &Connection) -> rusqlite::Result<u32> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);",
    )?;

    let current: u32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .unwrap_or(0);

    let mut version = current;
    for migration in MIGRATIONS {
        if migration.version > current {
            tracing::info!(
                version = migration.version,
                description = migration.description,
                "applying migration"
            );
            conn.execute_batch(migration.up)?;
            version = migration.version;
        }
    }

    if version != current {
        conn.execute("DELETE FROM schema_version", [])?;
        conn.execute("INSERT INTO schema_version(version) VALUES (?1)", [version])?;
    }

    Ok(version)
}
