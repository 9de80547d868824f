// db/tasks.rs
// Scheduled task rows: insert, list, due-check flip, terminal transitions

use engram_types::{ScheduledTask, TaskStatus};
use rusqlite::{Connection, OptionalExtension, Row};

pub const TASK_COLUMNS: &str =
    "id, project_id, title, schedule, next_run, status, recurring, memory_id, created_at";

pub fn parse_task_row(row: &Row) -> rusqlite::Result<ScheduledTask> {
    let status_str: String = row.get(5)?;
    let recurring: i64 = row.get(6)?;
    Ok(ScheduledTask {
        id: row.get(0)?,
        project_id: row.get(1)?,
        title: row.get(2)?,
        schedule: row.get(3)?,
        next_run: row.get(4)?,
        status: TaskStatus::parse(&status_str).unwrap_or(TaskStatus::Pending),
        recurring: recurring != 0,
        memory_id: row.get(7)?,
        created_at: row.get(8)?,
    })
}

#[allow(clippy::too_many_arguments)]
pub fn insert_task_sync(
    conn: &Connection,
    id: &str,
    project_id: &str,
    title: &str,
    schedule: &str,
    next_run: &str,
    recurring: bool,
    memory_id: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO scheduled_tasks (id, project_id, title, schedule, next_run, recurring, memory_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![id, project_id, title, schedule, next_run, recurring as i32, memory_id],
    )?;
    Ok(())
}

pub fn get_task_sync(conn: &Connection, id: &str) -> rusqlite::Result<Option<ScheduledTask>> {
    conn.query_row(
        &format!("SELECT {TASK_COLUMNS} FROM scheduled_tasks WHERE id = ?1"),
        [id],
        parse_task_row,
    )
    .optional()
}

pub fn list_tasks_sync(
    conn: &Connection,
    project_id: &str,
    include_finished: bool,
    limit: usize,
) -> rusqlite::Result<Vec<ScheduledTask>> {
    let status_filter = if include_finished {
        ""
    } else {
        "AND status IN ('pending', 'triggered')"
    };
    let sql = format!(
        "SELECT {TASK_COLUMNS} FROM scheduled_tasks
         WHERE project_id = ?1 {status_filter}
         ORDER BY next_run
         LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params![project_id, limit as i64], parse_task_row)?;
    rows.collect()
}

/// Atomically flip due `pending` rows to `triggered` and return them.
///
/// The flip and the read run inside one transaction so two concurrent checks
/// never both claim the same row.
pub fn check_due_tasks_sync(
    conn: &Connection,
    project_id: &str,
    now: &str,
) -> rusqlite::Result<Vec<ScheduledTask>> {
    let tx = conn.unchecked_transaction()?;

    let due: Vec<ScheduledTask> = {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM scheduled_tasks
             WHERE project_id = ?1 AND status = 'pending' AND next_run <= ?2
             ORDER BY next_run"
        );
        let mut stmt = tx.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params![project_id, now], parse_task_row)?;
        rows.collect::<rusqlite::Result<_>>()?
    };

    for task in &due {
        tx.execute(
            "UPDATE scheduled_tasks SET status = 'triggered', updated_at = CURRENT_TIMESTAMP
             WHERE id = ?1",
            [&task.id],
        )?;
    }

    tx.commit()?;
    Ok(due)
}

/// Re-arm a recurring task: recompute next_run and reset to pending.
pub fn rearm_task_sync(conn: &Connection, id: &str, next_run: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE scheduled_tasks SET status = 'pending', next_run = ?2, updated_at = CURRENT_TIMESTAMP
         WHERE id = ?1",
        rusqlite::params![id, next_run],
    )?;
    Ok(())
}

/// Move a task to a terminal status. Idempotent on already-terminal rows:
/// the transition is skipped and the stored status is returned.
pub fn finish_task_sync(
    conn: &Connection,
    id: &str,
    target: TaskStatus,
) -> rusqlite::Result<Option<TaskStatus>> {
    let Some(task) = get_task_sync(conn, id)? else {
        return Ok(None);
    };
    if task.status.is_terminal() {
        return Ok(Some(task.status));
    }
    conn.execute(
        "UPDATE scheduled_tasks SET status = ?2, updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
        rusqlite::params![id, target.as_str()],
    )?;
    Ok(Some(target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_connection;

    fn insert(conn: &Connection, id: &str, next_run: &str, recurring: bool) {
        insert_task_sync(conn, id, "demo", "check CI", "in 30 minutes", next_run, recurring, None)
            .unwrap();
    }

    #[test]
    fn test_check_flips_due_rows() {
        let conn = setup_test_connection();
        insert(&conn, "t1", "2026-01-01 00:00:00", false);
        insert(&conn, "t2", "2099-01-01 00:00:00", false);

        let due = check_due_tasks_sync(&conn, "demo", "2026-06-01 00:00:00").unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, "t1");

        // Already triggered; a second check returns nothing
        let due = check_due_tasks_sync(&conn, "demo", "2026-06-01 00:00:00").unwrap();
        assert!(due.is_empty());

        let t1 = get_task_sync(&conn, "t1").unwrap().unwrap();
        assert_eq!(t1.status, TaskStatus::Triggered);
    }

    #[test]
    fn test_rearm_recurring() {
        let conn = setup_test_connection();
        insert(&conn, "t1", "2026-01-01 00:00:00", true);
        check_due_tasks_sync(&conn, "demo", "2026-06-01 00:00:00").unwrap();
        rearm_task_sync(&conn, "t1", "2026-06-01 01:00:00").unwrap();

        let t1 = get_task_sync(&conn, "t1").unwrap().unwrap();
        assert_eq!(t1.status, TaskStatus::Pending);
        assert_eq!(t1.next_run, "2026-06-01 01:00:00");
    }

    #[test]
    fn test_finish_idempotent_on_terminal() {
        let conn = setup_test_connection();
        insert(&conn, "t1", "2026-01-01 00:00:00", false);

        assert_eq!(
            finish_task_sync(&conn, "t1", TaskStatus::Completed).unwrap(),
            Some(TaskStatus::Completed)
        );
        // Cancelling a completed task is a no-op that reports the stored state
        assert_eq!(
            finish_task_sync(&conn, "t1", TaskStatus::Cancelled).unwrap(),
            Some(TaskStatus::Completed)
        );
    }

    #[test]
    fn test_finish_missing_task() {
        let conn = setup_test_connection();
        assert_eq!(finish_task_sync(&conn, "nope", TaskStatus::Completed).unwrap(), None);
    }

    #[test]
    fn test_list_hides_finished_by_default() {
        let conn = setup_test_connection();
        insert(&conn, "t1", "2026-01-01 00:00:00", false);
        insert(&conn, "t2", "2026-01-02 00:00:00", false);
        finish_task_sync(&conn, "t2", TaskStatus::Cancelled).unwrap();

        assert_eq!(list_tasks_sync(&conn, "demo", false, 10).unwrap().len(), 1);
        assert_eq!(list_tasks_sync(&conn, "demo", true, 10).unwrap().len(), 2);
    }
}
