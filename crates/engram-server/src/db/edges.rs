// db/edges.rs
// Bi-temporal edges: created once, invalidated by setting valid_to exactly once

use engram_types::Edge;
use rusqlite::{Connection, OptionalExtension, Row};

pub const EDGE_COLUMNS: &str =
    "id, project_id, from_id, to_id, relation_type, valid_from, valid_to, confidence, metadata";

pub fn parse_edge_row(row: &Row) -> rusqlite::Result<Edge> {
    Ok(Edge {
        id: row.get(0)?,
        project_id: row.get(1)?,
        from_id: row.get(2)?,
        to_id: row.get(3)?,
        relation_type: row.get(4)?,
        valid_from: row.get(5)?,
        valid_to: row.get(6)?,
        confidence: row.get(7)?,
        metadata: row.get(8)?,
    })
}

/// Create an edge. `valid_from` defaults to now.
pub fn create_edge_sync(
    conn: &Connection,
    id: &str,
    project_id: &str,
    from_id: &str,
    to_id: &str,
    relation_type: &str,
    confidence: f64,
    metadata: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO edges (id, project_id, from_id, to_id, relation_type, confidence, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![id, project_id, from_id, to_id, relation_type, confidence, metadata],
    )?;
    Ok(())
}

pub fn get_edge_sync(conn: &Connection, id: &str) -> rusqlite::Result<Option<Edge>> {
    conn.query_row(
        &format!("SELECT {EDGE_COLUMNS} FROM edges WHERE id = ?1"),
        [id],
        parse_edge_row,
    )
    .optional()
}

/// Invalidate an edge by setting `valid_to` to now. The WHERE guard makes a
/// second call a no-op, preserving the original invalidation time.
/// Returns true when this call performed the invalidation.
pub fn invalidate_edge_sync(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    let updated = conn.execute(
        "UPDATE edges SET valid_to = CURRENT_TIMESTAMP WHERE id = ?1 AND valid_to IS NULL",
        [id],
    )?;
    Ok(updated > 0)
}

/// Query edges touching a memory, optionally as of a point in time.
///
/// "As of T" returns edges with `valid_from <= T AND (valid_to IS NULL OR
/// valid_to > T)`; without T, only currently-valid edges are returned.
pub fn query_edges_sync(
    conn: &Connection,
    project_id: &str,
    memory_id: Option<&str>,
    relation_type: Option<&str>,
    as_of: Option<&str>,
    limit: usize,
) -> rusqlite::Result<Vec<Edge>> {
    let sql = format!(
        "SELECT {EDGE_COLUMNS} FROM edges
         WHERE project_id = ?1
           AND (?2 IS NULL OR from_id = ?2 OR to_id = ?2)
           AND (?3 IS NULL OR relation_type = ?3)
           AND (CASE
                WHEN ?4 IS NULL THEN valid_to IS NULL
                ELSE valid_from <= ?4 AND (valid_to IS NULL OR valid_to > ?4)
                END)
         ORDER BY valid_from DESC
         LIMIT ?5"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        rusqlite::params![project_id, memory_id, relation_type, as_of, limit as i64],
        parse_edge_row,
    )?;
    rows.collect()
}

/// All currently-valid `potential_contradiction` edges in a project.
pub fn live_contradiction_edges_sync(
    conn: &Connection,
    project_id: &str,
) -> rusqlite::Result<Vec<Edge>> {
    let sql = format!(
        "SELECT {EDGE_COLUMNS} FROM edges
         WHERE project_id = ?1
           AND relation_type = 'potential_contradiction'
           AND valid_to IS NULL
         ORDER BY valid_from"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([project_id], parse_edge_row)?;
    rows.collect()
}
