// db/toollog.rs
// tool_calls audit log. Writes are best-effort and must never take down the
// dispatcher; rows older than 7 days are GC'd by consolidation.

use rusqlite::Connection;

/// Max chars of argument JSON kept in the log.
pub const ARGS_MAX_CHARS: usize = 500;
/// Max chars of output preview kept in the log.
pub const PREVIEW_MAX_CHARS: usize = 200;

pub fn log_tool_call_sync(
    conn: &Connection,
    project_id: Option<&str>,
    tool_name: &str,
    arguments: &str,
    result_preview: &str,
    success: bool,
    duration_ms: i64,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO tool_calls (project_id, tool_name, arguments, result_preview, success, duration_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            project_id,
            tool_name,
            crate::utils::truncate(arguments, ARGS_MAX_CHARS),
            crate::utils::truncate(result_preview, PREVIEW_MAX_CHARS),
            success as i32,
            duration_ms,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Timestamp of the most recent tool call, for idle detection.
pub fn last_tool_call_at_sync(conn: &Connection) -> rusqlite::Result<Option<String>> {
    use rusqlite::OptionalExtension;
    conn.query_row("SELECT MAX(created_at) FROM tool_calls", [], |row| row.get(0))
        .optional()
        .map(|v| v.flatten())
}

/// Drop tool_calls older than `days`. Returns the number removed.
pub fn gc_tool_calls_sync(conn: &Connection, days: i64) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM tool_calls WHERE created_at < datetime('now', '-' || ?1 || ' days')",
        [days],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_connection;

    #[test]
    fn test_log_truncates_arguments() {
        let conn = setup_test_connection();
        let long_args = "x".repeat(2000);
        log_tool_call_sync(&conn, Some("demo"), "memory_store", &long_args, "ok", true, 12).unwrap();

        let stored: String = conn
            .query_row("SELECT arguments FROM tool_calls", [], |r| r.get(0))
            .unwrap();
        assert!(stored.chars().count() <= ARGS_MAX_CHARS + 3);
    }

    #[test]
    fn test_gc_drops_old_rows() {
        let conn = setup_test_connection();
        log_tool_call_sync(&conn, None, "recent", "{}", "ok", true, 1).unwrap();
        conn.execute(
            "INSERT INTO tool_calls (tool_name, arguments, result_preview, success, created_at)
             VALUES ('old', '{}', 'ok', 1, datetime('now', '-10 days'))",
            [],
        )
        .unwrap();

        assert_eq!(gc_tool_calls_sync(&conn, 7).unwrap(), 1);
        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM tool_calls", [], |r| r.get(0))
            .unwrap();
        assert_eq!(remaining, 1);
    }

    #[test]
    fn test_last_tool_call_at() {
        let conn = setup_test_connection();
        assert!(last_tool_call_at_sync(&conn).unwrap().is_none());
        log_tool_call_sync(&conn, None, "t", "{}", "ok", true, 1).unwrap();
        assert!(last_tool_call_at_sync(&conn).unwrap().is_some());
    }
}
