// db/scratchpad.rs
// Project-scoped key/value with optional TTL. Doubles as the advisory-lock
// and session-recovery substrate, so reads must never resurrect expired rows.

use rusqlite::{Connection, OptionalExtension};

/// Upsert a scratchpad value. `ttl_seconds` of None means no expiry.
pub fn scratch_set_sync(
    conn: &Connection,
    project_id: &str,
    key: &str,
    value: &str,
    ttl_seconds: Option<i64>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO scratchpad (project_id, key, value, expires_at, updated_at)
         VALUES (?1, ?2, ?3,
                 CASE WHEN ?4 IS NULL THEN NULL
                      ELSE datetime('now', '+' || ?4 || ' seconds') END,
                 CURRENT_TIMESTAMP)
         ON CONFLICT(project_id, key) DO UPDATE SET
             value = excluded.value,
             expires_at = excluded.expires_at,
             updated_at = CURRENT_TIMESTAMP",
        rusqlite::params![project_id, key, value, ttl_seconds],
    )?;
    Ok(())
}

/// Read a value; expired rows read as absent.
pub fn scratch_get_sync(
    conn: &Connection,
    project_id: &str,
    key: &str,
) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM scratchpad
         WHERE project_id = ?1 AND key = ?2
           AND (expires_at IS NULL OR expires_at > datetime('now'))",
        rusqlite::params![project_id, key],
        |row| row.get(0),
    )
    .optional()
}

/// Delete a key. Returns whether a row was removed.
pub fn scratch_delete_sync(
    conn: &Connection,
    project_id: &str,
    key: &str,
) -> rusqlite::Result<bool> {
    let removed = conn.execute(
        "DELETE FROM scratchpad WHERE project_id = ?1 AND key = ?2",
        rusqlite::params![project_id, key],
    )?;
    Ok(removed > 0)
}

/// List non-expired keys for a project, excluding internal `__`-prefixed rows
/// unless asked for.
pub fn scratch_list_sync(
    conn: &Connection,
    project_id: &str,
    include_internal: bool,
) -> rusqlite::Result<Vec<(String, String)>> {
    let internal_filter = if include_internal {
        ""
    } else {
        "AND key NOT LIKE '\\_\\_%' ESCAPE '\\'"
    };
    let sql = format!(
        "SELECT key, value FROM scratchpad
         WHERE project_id = ?1
           AND (expires_at IS NULL OR expires_at > datetime('now'))
           {internal_filter}
         ORDER BY key"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([project_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

/// Clear all user keys for a project (internal rows survive).
pub fn scratch_clear_sync(conn: &Connection, project_id: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM scratchpad WHERE project_id = ?1 AND key NOT LIKE '\\_\\_%' ESCAPE '\\'",
        [project_id],
    )
}

/// Drop every expired row. Called by the consolidation cycle.
pub fn scratch_gc_sync(conn: &Connection) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM scratchpad WHERE expires_at IS NOT NULL AND expires_at <= datetime('now')",
        [],
    )
}

/// Try to take an advisory lock row atomically. Returns true when this caller
/// now holds the lock. Stale locks older than `stale_seconds` are taken over.
pub fn try_advisory_lock_sync(
    conn: &Connection,
    project_id: &str,
    key: &str,
    holder: &str,
    stale_seconds: i64,
) -> rusqlite::Result<bool> {
    let claimed = conn.execute(
        "INSERT INTO scratchpad (project_id, key, value, updated_at)
         VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)
         ON CONFLICT(project_id, key) DO UPDATE SET
             value = excluded.value,
             updated_at = CURRENT_TIMESTAMP
         WHERE scratchpad.updated_at <= datetime('now', '-' || ?4 || ' seconds')",
        rusqlite::params![project_id, key, holder, stale_seconds],
    )?;
    if claimed == 0 {
        return Ok(false);
    }
    // Confirm the row is ours (another writer may have raced the takeover)
    let current: Option<String> = scratch_get_sync(conn, project_id, key)?;
    Ok(current.as_deref() == Some(holder))
}

/// Release an advisory lock if this holder still owns it.
pub fn release_advisory_lock_sync(
    conn: &Connection,
    project_id: &str,
    key: &str,
    holder: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "DELETE FROM scratchpad WHERE project_id = ?1 AND key = ?2 AND value = ?3",
        rusqlite::params![project_id, key, holder],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_connection;

    #[test]
    fn test_set_get_round_trip() {
        let conn = setup_test_connection();
        scratch_set_sync(&conn, "demo", "k", "v", None).unwrap();
        assert_eq!(scratch_get_sync(&conn, "demo", "k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_delete_then_get_none() {
        let conn = setup_test_connection();
        scratch_set_sync(&conn, "demo", "k", "v", None).unwrap();
        assert!(scratch_delete_sync(&conn, "demo", "k").unwrap());
        assert!(scratch_get_sync(&conn, "demo", "k").unwrap().is_none());
        assert!(!scratch_delete_sync(&conn, "demo", "k").unwrap());
    }

    #[test]
    fn test_upsert_overwrites() {
        let conn = setup_test_connection();
        scratch_set_sync(&conn, "demo", "k", "v1", None).unwrap();
        scratch_set_sync(&conn, "demo", "k", "v2", None).unwrap();
        assert_eq!(scratch_get_sync(&conn, "demo", "k").unwrap().as_deref(), Some("v2"));
    }

    #[test]
    fn test_expired_rows_read_as_absent() {
        let conn = setup_test_connection();
        scratch_set_sync(&conn, "demo", "k", "v", Some(-10)).unwrap();
        assert!(scratch_get_sync(&conn, "demo", "k").unwrap().is_none());

        assert_eq!(scratch_gc_sync(&conn).unwrap(), 1);
        let raw: i64 = conn
            .query_row("SELECT COUNT(*) FROM scratchpad", [], |r| r.get(0))
            .unwrap();
        assert_eq!(raw, 0);
    }

    #[test]
    fn test_list_hides_internal_keys() {
        let conn = setup_test_connection();
        scratch_set_sync(&conn, "demo", "user_key", "v", None).unwrap();
        scratch_set_sync(&conn, "demo", "__session_heartbeat", "v", None).unwrap();

        let listed = scratch_list_sync(&conn, "demo", false).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, "user_key");

        let all = scratch_list_sync(&conn, "demo", true).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_clear_preserves_internal_keys() {
        let conn = setup_test_connection();
        scratch_set_sync(&conn, "demo", "user_key", "v", None).unwrap();
        scratch_set_sync(&conn, "demo", "__state", "v", None).unwrap();

        assert_eq!(scratch_clear_sync(&conn, "demo").unwrap(), 1);
        assert!(scratch_get_sync(&conn, "demo", "__state").unwrap().is_some());
    }

    #[test]
    fn test_advisory_lock_contention() {
        let conn = setup_test_connection();
        assert!(try_advisory_lock_sync(&conn, "demo", "__lock", "a", 300).unwrap());
        // Second holder fails while the lock is fresh
        assert!(!try_advisory_lock_sync(&conn, "demo", "__lock", "b", 300).unwrap());

        // Stale lock can be taken over
        conn.execute(
            "UPDATE scratchpad SET updated_at = datetime('now', '-600 seconds') WHERE key = '__lock'",
            [],
        )
        .unwrap();
        assert!(try_advisory_lock_sync(&conn, "demo", "__lock", "b", 300).unwrap());

        // Release by the wrong holder is a no-op
        release_advisory_lock_sync(&conn, "demo", "__lock", "a").unwrap();
        assert_eq!(
            scratch_get_sync(&conn, "demo", "__lock").unwrap().as_deref(),
            Some("b")
        );
        release_advisory_lock_sync(&conn, "demo", "__lock", "b").unwrap();
        assert!(scratch_get_sync(&conn, "demo", "__lock").unwrap().is_none());
    }
}
