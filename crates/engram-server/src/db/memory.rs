// db/memory.rs
// Memory row storage: insert, read, update, soft/hard delete, access tracking

use engram_types::{Memory, MemoryType};
use rusqlite::{Connection, OptionalExtension, Row};

use crate::config::GLOBAL_PROJECT;

/// Columns selected for every memory read, in `parse_memory_row` order.
pub const MEMORY_COLUMNS: &str = "id, project_id, content, memory_type, tags, importance, strength, \
     access_count, confidence, source_count, contradiction_count, \
     created_at, last_accessed, updated_at, deleted_at, embedding IS NOT NULL";

/// Parameters for inserting a new memory row.
pub struct InsertMemoryParams<'a> {
    pub id: &'a str,
    pub project_id: &'a str,
    pub content: &'a str,
    pub memory_type: MemoryType,
    /// Already-normalized tags, serialized by the insert.
    pub tags: &'a [String],
    pub importance: f64,
    pub confidence: f64,
    pub embedding: Option<&'a [u8]>,
}

pub fn parse_memory_row(row: &Row) -> rusqlite::Result<Memory> {
    let type_str: String = row.get(3)?;
    let tags_json: String = row.get(4)?;
    Ok(Memory {
        id: row.get(0)?,
        project_id: row.get(1)?,
        content: row.get(2)?,
        memory_type: MemoryType::parse(&type_str).unwrap_or_default(),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        importance: row.get(5)?,
        strength: row.get(6)?,
        access_count: row.get(7)?,
        confidence: row.get(8)?,
        source_count: row.get(9)?,
        contradiction_count: row.get(10)?,
        created_at: row.get(11)?,
        last_accessed: row.get(12)?,
        updated_at: row.get(13)?,
        deleted_at: row.get(14)?,
        has_embedding: row.get(15)?,
    })
}

/// Insert a new memory row.
pub fn insert_memory_sync(conn: &Connection, params: InsertMemoryParams) -> rusqlite::Result<()> {
    let tags_json = serde_json::to_string(params.tags).unwrap_or_else(|_| "[]".to_string());
    conn.execute(
        "INSERT INTO memories (id, project_id, content, memory_type, tags, importance, confidence, embedding)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            params.id,
            params.project_id,
            params.content,
            params.memory_type.as_str(),
            tags_json,
            params.importance,
            params.confidence,
            params.embedding,
        ],
    )?;
    Ok(())
}

/// Read one memory by id (including soft-deleted rows).
pub fn get_memory_sync(conn: &Connection, id: &str) -> rusqlite::Result<Option<Memory>> {
    conn.query_row(
        &format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1"),
        [id],
        parse_memory_row,
    )
    .optional()
}

/// Read the raw embedding bytes for a memory, if present.
pub fn get_embedding_sync(conn: &Connection, id: &str) -> rusqlite::Result<Option<Vec<u8>>> {
    conn.query_row("SELECT embedding FROM memories WHERE id = ?1", [id], |row| {
        row.get(0)
    })
    .optional()
    .map(|v| v.flatten())
}

/// Record an access: bump the counter, strengthen, boost confidence, and
/// refresh `last_accessed`. Returns the updated row.
///
/// strength' = min(10, strength + 0.2*ln(access_count+1)); the confidence
/// recency boost is clamped at 1.0. Runs as one statement so concurrent
/// recalls never interleave a stale read with the write.
pub fn record_access_sync(
    conn: &Connection,
    id: &str,
    recency_boost: f64,
) -> rusqlite::Result<Option<Memory>> {
    let updated = conn.execute(
        "UPDATE memories SET
             access_count = access_count + 1,
             strength = MIN(10.0, strength + 0.2 * ln(access_count + 2)),
             confidence = MIN(1.0, confidence + ?2),
             last_accessed = CURRENT_TIMESTAMP
         WHERE id = ?1 AND deleted_at IS NULL",
        rusqlite::params![id, recency_boost],
    )?;
    if updated == 0 {
        return Ok(None);
    }
    get_memory_sync(conn, id)
}

/// Fields that `update_memory_sync` may change.
#[derive(Default)]
pub struct UpdateMemoryFields {
    pub content: Option<String>,
    pub memory_type: Option<MemoryType>,
    /// Already-normalized tags.
    pub tags: Option<Vec<String>>,
    pub importance: Option<f64>,
    pub confidence: Option<f64>,
    /// Some(None) clears the embedding (content changed, pending re-embed).
    pub embedding: Option<Option<Vec<u8>>>,
}

/// Apply a partial update to a live memory. Returns false when the row is
/// missing or soft-deleted.
pub fn update_memory_sync(
    conn: &Connection,
    id: &str,
    fields: UpdateMemoryFields,
) -> rusqlite::Result<bool> {
    let existing = match get_memory_sync(conn, id)? {
        Some(m) if m.deleted_at.is_none() => m,
        _ => return Ok(false),
    };

    let content = fields.content.unwrap_or(existing.content);
    let memory_type = fields.memory_type.unwrap_or(existing.memory_type);
    let tags = fields.tags.unwrap_or(existing.tags);
    let importance = fields.importance.unwrap_or(existing.importance).clamp(0.0, 1.0);
    let confidence = fields.confidence.unwrap_or(existing.confidence).clamp(0.0, 1.0);
    let tags_json = serde_json::to_string(&tags).unwrap_or_else(|_| "[]".to_string());

    match fields.embedding {
        Some(embedding) => {
            conn.execute(
                "UPDATE memories SET content = ?2, memory_type = ?3, tags = ?4, importance = ?5,
                     confidence = ?6, embedding = ?7, updated_at = CURRENT_TIMESTAMP
                 WHERE id = ?1",
                rusqlite::params![
                    id,
                    content,
                    memory_type.as_str(),
                    tags_json,
                    importance,
                    confidence,
                    embedding,
                ],
            )?;
        }
        None => {
            conn.execute(
                "UPDATE memories SET content = ?2, memory_type = ?3, tags = ?4, importance = ?5,
                     confidence = ?6, updated_at = CURRENT_TIMESTAMP
                 WHERE id = ?1",
                rusqlite::params![id, content, memory_type.as_str(), tags_json, importance, confidence],
            )?;
        }
    }
    Ok(true)
}

/// Soft-delete: set `deleted_at` once. Idempotent - a second call is a no-op.
/// Returns whether the row exists at all.
pub fn soft_delete_memory_sync(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    conn.execute(
        "UPDATE memories SET deleted_at = CURRENT_TIMESTAMP, updated_at = CURRENT_TIMESTAMP
         WHERE id = ?1 AND deleted_at IS NULL",
        [id],
    )?;
    let exists: i64 = conn.query_row(
        "SELECT COUNT(*) FROM memories WHERE id = ?1",
        [id],
        |row| row.get(0),
    )?;
    Ok(exists > 0)
}

/// Permanently remove a memory and every adjacent edge.
pub fn purge_memory_sync(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    conn.execute("DELETE FROM edges WHERE from_id = ?1 OR to_id = ?1", [id])?;
    conn.execute("DELETE FROM memory_sources WHERE memory_id = ?1", [id])?;
    let removed = conn.execute("DELETE FROM memories WHERE id = ?1", [id])?;
    Ok(removed > 0)
}

/// Bump the contradiction counter for an existing memory.
pub fn bump_contradiction_count_sync(conn: &Connection, id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE memories SET contradiction_count = contradiction_count + 1 WHERE id = ?1",
        [id],
    )?;
    Ok(())
}

/// Record an extra source confirmation.
pub fn bump_source_count_sync(conn: &Connection, id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE memories SET source_count = source_count + 1 WHERE id = ?1",
        [id],
    )?;
    Ok(())
}

/// List live memories in a project (plus global), newest first.
pub fn list_memories_sync(
    conn: &Connection,
    project_id: &str,
    memory_type: Option<&str>,
    tag: Option<&str>,
    include_deleted: bool,
    limit: usize,
    offset: usize,
) -> rusqlite::Result<Vec<Memory>> {
    let deleted_filter = if include_deleted {
        ""
    } else {
        "AND deleted_at IS NULL"
    };
    let sql = format!(
        "SELECT {MEMORY_COLUMNS} FROM memories
         WHERE (project_id = ?1 OR project_id = ?2)
           {deleted_filter}
           AND (?3 IS NULL OR memory_type = ?3)
           AND (?4 IS NULL OR tags LIKE '%\"' || ?4 || '\"%')
         ORDER BY created_at DESC
         LIMIT ?5 OFFSET ?6"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        rusqlite::params![
            project_id,
            GLOBAL_PROJECT,
            memory_type,
            tag,
            limit as i64,
            offset as i64
        ],
        parse_memory_row,
    )?;
    rows.collect()
}

/// Fetch up to `limit` live memories missing embeddings, newest first.
/// The embedding worker drains this implicit queue.
pub fn find_memories_without_embeddings_sync(
    conn: &Connection,
    limit: usize,
) -> rusqlite::Result<Vec<Memory>> {
    let sql = format!(
        "SELECT {MEMORY_COLUMNS} FROM memories
         WHERE embedding IS NULL AND deleted_at IS NULL
         ORDER BY created_at DESC
         LIMIT ?1"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([limit as i64], parse_memory_row)?;
    rows.collect()
}

/// Write embedding bytes for a row and return its project id, or None when
/// the row vanished (deleted between embed and write).
pub fn store_embedding_sync(
    conn: &Connection,
    id: &str,
    embedding: &[u8],
) -> rusqlite::Result<Option<String>> {
    let updated = conn.execute(
        "UPDATE memories SET embedding = ?2 WHERE id = ?1 AND deleted_at IS NULL",
        rusqlite::params![id, embedding],
    )?;
    if updated == 0 {
        return Ok(None);
    }
    conn.query_row("SELECT project_id FROM memories WHERE id = ?1", [id], |row| {
        row.get(0)
    })
    .optional()
}

/// All live rows with embeddings in scope, for the in-SQL semantic fallback
/// and the contradiction candidate scan.
pub fn live_embedded_memories_sync(
    conn: &Connection,
    project_id: &str,
) -> rusqlite::Result<Vec<(Memory, Vec<u8>)>> {
    let sql = format!(
        "SELECT {MEMORY_COLUMNS}, embedding FROM memories
         WHERE (project_id = ?1 OR project_id = ?2)
           AND deleted_at IS NULL
           AND embedding IS NOT NULL"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params![project_id, GLOBAL_PROJECT], |row| {
        let memory = parse_memory_row(row)?;
        let embedding: Vec<u8> = row.get(16)?;
        Ok((memory, embedding))
    })?;
    rows.collect()
}

/// Exact or substring duplicate check against live memories in scope.
pub fn is_duplicate_content_sync(
    conn: &Connection,
    project_id: &str,
    content: &str,
) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM memories
         WHERE (project_id = ?1 OR project_id = ?2)
           AND deleted_at IS NULL
           AND (content = ?3 OR instr(content, ?3) > 0 OR instr(?3, content) > 0)",
        rusqlite::params![project_id, GLOBAL_PROJECT, content],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}
