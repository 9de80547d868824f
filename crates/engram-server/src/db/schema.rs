// db/schema.rs
// Database schema and migrations

use anyhow::Result;
use rusqlite::Connection;

/// Default embedding dimension when none is configured.
pub const DEFAULT_EMBEDDING_DIM: usize = 768;

/// Run all schema setup and migrations.
///
/// Called during database initialization. Idempotent - base tables use
/// CREATE IF NOT EXISTS, and versioned migrations are recorded in
/// `schema_migrations` so each runs exactly once.
pub fn run_all_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    ensure_vec_table(conn, DEFAULT_EMBEDDING_DIM)?;

    for (version, name, sql) in MIGRATIONS {
        if !migration_applied(conn, *version)? {
            tracing::info!("Applying migration v{}: {}", version, name);
            conn.execute_batch(sql)?;
            conn.execute(
                "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
                rusqlite::params![version, name],
            )?;
        }
    }

    seed_entity_types(conn)?;
    Ok(())
}

fn migration_applied(conn: &Connection, version: i64) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM schema_migrations WHERE version = ?1",
        [version],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Ensure the sqlite-vec virtual table exists with the given dimension.
///
/// If a table with a different dimension exists (embedding model changed),
/// it is dropped and recreated; rows are re-filled by the embedding worker.
pub fn ensure_vec_table(conn: &Connection, dims: usize) -> Result<()> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = 'vec_memories'",
            [],
            |row| row.get(0),
        )
        .ok();

    let wanted = format!("float[{dims}]");
    if let Some(sql) = existing {
        if sql.contains(&wanted) {
            return Ok(());
        }
        tracing::warn!(
            "vec_memories dimension mismatch (wanted {}), rebuilding index",
            dims
        );
        conn.execute_batch("DROP TABLE vec_memories")?;
        conn.execute("UPDATE memories SET embedding = NULL", [])?;
    }

    conn.execute_batch(&format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS vec_memories USING vec0(
            embedding float[{dims}],
            +memory_id TEXT,
            +project_id TEXT,
            +deleted INTEGER
        );"
    ))?;
    Ok(())
}

/// Seed the built-in entity type hierarchy. User-defined types are added
/// alongside and never overwritten.
fn seed_entity_types(conn: &Connection) -> Result<()> {
    const SEED_TYPES: &[(&str, Option<&str>, &str)] = &[
        ("concept", None, "Abstract idea or topic"),
        ("person", None, "A human being"),
        ("organization", None, "Company, team, or institution"),
        ("project", None, "A body of work"),
        ("technology", None, "Tool, language, framework, or system"),
        ("location", None, "A physical or logical place"),
        ("event", None, "Something that happened at a point in time"),
        ("document", None, "A file, page, or written artifact"),
    ];

    for (name, parent, description) in SEED_TYPES {
        conn.execute(
            "INSERT OR IGNORE INTO entity_types (name, parent_type, description) VALUES (?1, ?2, ?3)",
            rusqlite::params![name, parent, description],
        )?;
    }
    Ok(())
}

/// Versioned migrations applied after the base schema, recorded in
/// `schema_migrations`. Keep these append-only.
const MIGRATIONS: &[(i64, &str, &str)] = &[
    // v1 reserved the base schema; later ALTERs append here.
];

/// Database schema SQL
pub const SCHEMA: &str = r#"
-- =======================================
-- MIGRATION LEDGER
-- =======================================
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT DEFAULT CURRENT_TIMESTAMP
);

-- =======================================
-- MEMORIES
-- =======================================
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,              -- 32-char lowercase hex
    project_id TEXT NOT NULL DEFAULT 'global',
    content TEXT NOT NULL,
    memory_type TEXT NOT NULL DEFAULT 'fact',
    tags TEXT NOT NULL DEFAULT '[]',  -- JSON array, normalized
    importance REAL NOT NULL DEFAULT 0.5,
    strength REAL NOT NULL DEFAULT 1.0,
    access_count INTEGER NOT NULL DEFAULT 0,
    confidence REAL NOT NULL DEFAULT 0.5,
    source_count INTEGER NOT NULL DEFAULT 1,
    contradiction_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    last_accessed TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
    deleted_at TEXT,
    embedding BLOB                    -- D little-endian f32, L2-normalized
);
CREATE INDEX IF NOT EXISTS idx_memories_project ON memories(project_id);
CREATE INDEX IF NOT EXISTS idx_memories_live ON memories(project_id, deleted_at) WHERE deleted_at IS NULL;
CREATE INDEX IF NOT EXISTS idx_memories_no_embedding ON memories(created_at DESC)
    WHERE embedding IS NULL AND deleted_at IS NULL;

-- =======================================
-- EDGES (bi-temporal relations)
-- =======================================
CREATE TABLE IF NOT EXISTS edges (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    from_id TEXT NOT NULL,
    to_id TEXT NOT NULL,
    relation_type TEXT NOT NULL,
    valid_from TEXT DEFAULT CURRENT_TIMESTAMP,
    valid_to TEXT,
    confidence REAL NOT NULL DEFAULT 0.5,
    metadata TEXT
);
CREATE INDEX IF NOT EXISTS idx_edges_from ON edges(from_id);
CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(to_id);
CREATE INDEX IF NOT EXISTS idx_edges_live ON edges(project_id, relation_type) WHERE valid_to IS NULL;

-- =======================================
-- ENTITY GRAPH
-- =======================================
CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    name TEXT NOT NULL,
    entity_type TEXT NOT NULL DEFAULT 'concept',
    observations TEXT NOT NULL DEFAULT '[]',  -- JSON array of strings
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(project_id, name)
);
CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(project_id, entity_type);

CREATE TABLE IF NOT EXISTS entity_types (
    name TEXT PRIMARY KEY,
    parent_type TEXT,
    description TEXT
);

CREATE TABLE IF NOT EXISTS entity_relations (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    from_entity TEXT NOT NULL,
    to_entity TEXT NOT NULL,
    relation_type TEXT NOT NULL,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_entity_relations_from ON entity_relations(from_entity);

-- =======================================
-- SCRATCHPAD (user workspace + advisory locks + recovery state)
-- =======================================
CREATE TABLE IF NOT EXISTS scratchpad (
    project_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    expires_at TEXT,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (project_id, key)
);
CREATE INDEX IF NOT EXISTS idx_scratchpad_expires ON scratchpad(expires_at) WHERE expires_at IS NOT NULL;

-- =======================================
-- SCHEDULED TASKS
-- =======================================
CREATE TABLE IF NOT EXISTS scheduled_tasks (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    title TEXT NOT NULL,
    schedule TEXT NOT NULL,
    next_run TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    recurring INTEGER NOT NULL DEFAULT 0,
    memory_id TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_tasks_due ON scheduled_tasks(status, next_run);

-- =======================================
-- CHAT INGESTION
-- =======================================
CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    source TEXT NOT NULL,
    source_session_id TEXT NOT NULL,
    title TEXT,
    content_hash TEXT NOT NULL,
    started_at TEXT,
    ingested_at TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(source, source_session_id)
);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
    seq INTEGER NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, seq);

CREATE TABLE IF NOT EXISTS tool_uses (
    id TEXT PRIMARY KEY,
    message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
    seq INTEGER NOT NULL,
    tool_name TEXT NOT NULL,
    input TEXT,
    output TEXT
);
CREATE INDEX IF NOT EXISTS idx_tool_uses_message ON tool_uses(message_id, seq);

CREATE TABLE IF NOT EXISTS memory_sources (
    memory_id TEXT NOT NULL,
    conversation_id TEXT NOT NULL,
    message_id TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (memory_id, conversation_id)
);

CREATE TABLE IF NOT EXISTS conversation_summaries (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
    level TEXT NOT NULL DEFAULT 'brief',   -- 'brief' or 'detailed'
    summary TEXT NOT NULL,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_summaries_project ON conversation_summaries(project_id, created_at DESC);

CREATE TABLE IF NOT EXISTS conversation_topics (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
    topic TEXT NOT NULL,
    frequency INTEGER NOT NULL DEFAULT 1,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_topics_project ON conversation_topics(project_id, topic);

-- =======================================
-- CONTRADICTION RESOLUTIONS
-- =======================================
CREATE TABLE IF NOT EXISTS contradiction_resolutions (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    memory_a TEXT NOT NULL,
    memory_b TEXT NOT NULL,
    edge_id TEXT NOT NULL,
    resolution_type TEXT NOT NULL DEFAULT 'pending',
    chosen_id TEXT,
    note TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    resolved_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_resolutions_pending ON contradiction_resolutions(project_id)
    WHERE resolution_type = 'pending';
CREATE UNIQUE INDEX IF NOT EXISTS idx_resolutions_edge ON contradiction_resolutions(edge_id);

-- =======================================
-- TOOL CALL LOG (GC'd by consolidation)
-- =======================================
CREATE TABLE IF NOT EXISTS tool_calls (
    id INTEGER PRIMARY KEY,
    project_id TEXT,
    tool_name TEXT NOT NULL,
    arguments TEXT,
    result_preview TEXT,
    success INTEGER NOT NULL DEFAULT 1,
    duration_ms INTEGER,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_tool_calls_created ON tool_calls(created_at);

-- =======================================
-- FULL-TEXT SEARCH (FTS5)
-- =======================================
CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
    content,
    content='memories',
    content_rowid='rowid',
    tokenize='porter unicode61 remove_diacritics 1'
);

CREATE TRIGGER IF NOT EXISTS memories_fts_ai AFTER INSERT ON memories BEGIN
    INSERT INTO memories_fts(rowid, content) VALUES (new.rowid, new.content);
END;
CREATE TRIGGER IF NOT EXISTS memories_fts_ad AFTER DELETE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, content) VALUES ('delete', old.rowid, old.content);
END;
CREATE TRIGGER IF NOT EXISTS memories_fts_au AFTER UPDATE OF content ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, content) VALUES ('delete', old.rowid, old.content);
    INSERT INTO memories_fts(rowid, content) VALUES (new.rowid, new.content);
END;
"#;
