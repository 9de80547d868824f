// db/resolutions.rs
// Contradiction resolution rows: one per pending conflict between two memories

use engram_types::{ContradictionResolution, ResolutionType};
use rusqlite::{Connection, OptionalExtension, Row};

pub const RESOLUTION_COLUMNS: &str = "id, project_id, memory_a, memory_b, edge_id, \
     resolution_type, chosen_id, note, created_at, resolved_at";

pub fn parse_resolution_row(row: &Row) -> rusqlite::Result<ContradictionResolution> {
    let type_str: String = row.get(5)?;
    Ok(ContradictionResolution {
        id: row.get(0)?,
        project_id: row.get(1)?,
        memory_a: row.get(2)?,
        memory_b: row.get(3)?,
        edge_id: row.get(4)?,
        resolution_type: ResolutionType::parse(&type_str).unwrap_or(ResolutionType::Pending),
        chosen_id: row.get(6)?,
        note: row.get(7)?,
        created_at: row.get(8)?,
        resolved_at: row.get(9)?,
    })
}

/// Insert a pending resolution for an edge. The unique index on edge_id makes
/// this idempotent per edge.
pub fn insert_pending_resolution_sync(
    conn: &Connection,
    id: &str,
    project_id: &str,
    memory_a: &str,
    memory_b: &str,
    edge_id: &str,
) -> rusqlite::Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO contradiction_resolutions (id, project_id, memory_a, memory_b, edge_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![id, project_id, memory_a, memory_b, edge_id],
    )?;
    Ok(inserted > 0)
}

pub fn get_resolution_sync(
    conn: &Connection,
    id: &str,
) -> rusqlite::Result<Option<ContradictionResolution>> {
    conn.query_row(
        &format!("SELECT {RESOLUTION_COLUMNS} FROM contradiction_resolutions WHERE id = ?1"),
        [id],
        parse_resolution_row,
    )
    .optional()
}

pub fn pending_resolutions_sync(
    conn: &Connection,
    project_id: &str,
    limit: usize,
) -> rusqlite::Result<Vec<ContradictionResolution>> {
    let sql = format!(
        "SELECT {RESOLUTION_COLUMNS} FROM contradiction_resolutions
         WHERE project_id = ?1 AND resolution_type = 'pending'
         ORDER BY created_at
         LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params![project_id, limit as i64], parse_resolution_row)?;
    rows.collect()
}

/// Unresolved conflicts touching a specific memory, for recall enrichment.
pub fn pending_resolutions_for_memory_sync(
    conn: &Connection,
    memory_id: &str,
) -> rusqlite::Result<Vec<ContradictionResolution>> {
    let sql = format!(
        "SELECT {RESOLUTION_COLUMNS} FROM contradiction_resolutions
         WHERE resolution_type = 'pending' AND (memory_a = ?1 OR memory_b = ?1)
         ORDER BY created_at"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([memory_id], parse_resolution_row)?;
    rows.collect()
}

/// Mark a resolution resolved. Guarded to fire once; repeat calls no-op.
pub fn mark_resolved_sync(
    conn: &Connection,
    id: &str,
    resolution_type: ResolutionType,
    chosen_id: Option<&str>,
    note: Option<&str>,
) -> rusqlite::Result<bool> {
    let updated = conn.execute(
        "UPDATE contradiction_resolutions
         SET resolution_type = ?2, chosen_id = ?3, note = ?4, resolved_at = CURRENT_TIMESTAMP
         WHERE id = ?1 AND resolution_type = 'pending'",
        rusqlite::params![id, resolution_type.as_str(), chosen_id, note],
    )?;
    Ok(updated > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_connection;

    #[test]
    fn test_insert_idempotent_per_edge() {
        let conn = setup_test_connection();
        assert!(insert_pending_resolution_sync(&conn, "r1", "demo", "a", "b", "e1").unwrap());
        assert!(!insert_pending_resolution_sync(&conn, "r2", "demo", "a", "b", "e1").unwrap());

        let pending = pending_resolutions_sync(&conn, "demo", 10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "r1");
    }

    #[test]
    fn test_mark_resolved_once() {
        let conn = setup_test_connection();
        insert_pending_resolution_sync(&conn, "r1", "demo", "a", "b", "e1").unwrap();

        assert!(mark_resolved_sync(&conn, "r1", ResolutionType::KeepFirst, Some("a"), None).unwrap());
        assert!(!mark_resolved_sync(&conn, "r1", ResolutionType::KeepSecond, Some("b"), None).unwrap());

        let r = get_resolution_sync(&conn, "r1").unwrap().unwrap();
        assert_eq!(r.resolution_type, ResolutionType::KeepFirst);
        assert_eq!(r.chosen_id.as_deref(), Some("a"));
        assert!(r.resolved_at.is_some());
    }

    #[test]
    fn test_pending_for_memory() {
        let conn = setup_test_connection();
        insert_pending_resolution_sync(&conn, "r1", "demo", "a", "b", "e1").unwrap();
        insert_pending_resolution_sync(&conn, "r2", "demo", "c", "a", "e2").unwrap();
        insert_pending_resolution_sync(&conn, "r3", "demo", "x", "y", "e3").unwrap();

        let for_a = pending_resolutions_for_memory_sync(&conn, "a").unwrap();
        assert_eq!(for_a.len(), 2);
    }
}
