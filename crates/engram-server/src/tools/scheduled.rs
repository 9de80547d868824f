// tools/scheduled.rs
// Scheduled task tool: schedule/list/check/complete/cancel.

use engram_types::TaskStatus;
use serde_json::{Value, json};

use crate::db;
use crate::engine::Engine;
use crate::error::Result;
use crate::schedule::parse_schedule;
use crate::utils::{new_id, now_sqlite};

use super::unknown_action;

#[allow(clippy::too_many_arguments)]
pub async fn dispatch(
    engine: &Engine,
    action: String,
    task_id: Option<String>,
    title: Option<String>,
    schedule: Option<String>,
    memory_id: Option<String>,
    include_finished: Option<bool>,
) -> Result<Value> {
    let project = engine.project_id().await;

    match action.as_str() {
        "schedule" => {
            let (Some(title), Some(expr)) = (title, schedule) else {
                return Ok(json!({ "error": "schedule requires title and schedule" }));
            };
            let parsed = match parse_schedule(&expr, chrono::Utc::now()) {
                Ok(p) => p,
                // Structured parse failure with a hint, not an exception
                Err(e) => return Ok(serde_json::to_value(e)?),
            };

            let id = new_id();
            let next_run = parsed.next_run.format("%Y-%m-%d %H:%M:%S").to_string();
            let guard = engine.lock.acquire().await?;
            let result = {
                let id = id.clone();
                engine
                    .pool
                    .run(move |conn| {
                        db::insert_task_sync(
                            conn,
                            &id,
                            &project,
                            &title,
                            &expr,
                            &next_run,
                            parsed.recurring,
                            memory_id.as_deref(),
                        )?;
                        db::get_task_sync(conn, &id)
                    })
                    .await
            };
            guard.release();
            Ok(json!({ "task": result? }))
        }
        "list" => {
            let tasks = engine
                .pool
                .run(move |conn| {
                    db::list_tasks_sync(conn, &project, include_finished.unwrap_or(false), 100)
                })
                .await?;
            Ok(json!({ "tasks": tasks }))
        }
        "check" => {
            let now = now_sqlite();
            let guard = engine.lock.acquire().await?;
            let due = {
                let now = now.clone();
                let project = project.clone();
                engine
                    .pool
                    .run(move |conn| db::check_due_tasks_sync(conn, &project, &now))
                    .await
            };
            let due = match due {
                Ok(d) => d,
                Err(e) => {
                    guard.release();
                    return Err(e);
                }
            };

            // Recurring rows re-arm immediately with a fresh next_run
            for task in &due {
                if !task.recurring {
                    continue;
                }
                if let Ok(parsed) = parse_schedule(&task.schedule, chrono::Utc::now()) {
                    let next = parsed.next_run.format("%Y-%m-%d %H:%M:%S").to_string();
                    let id = task.id.clone();
                    let _ = engine
                        .pool
                        .run(move |conn| db::rearm_task_sync(conn, &id, &next))
                        .await;
                }
            }
            guard.release();
            Ok(json!({ "triggered": due }))
        }
        "complete" | "cancel" => {
            let Some(id) = task_id else {
                return Ok(json!({ "error": format!("{action} requires task_id") }));
            };
            let target = if action == "complete" {
                TaskStatus::Completed
            } else {
                TaskStatus::Cancelled
            };
            let guard = engine.lock.acquire().await?;
            let result = {
                let id = id.clone();
                engine
                    .pool
                    .run(move |conn| db::finish_task_sync(conn, &id, target))
                    .await
            };
            guard.release();
            match result? {
                Some(status) => Ok(json!({ "id": id, "status": status })),
                None => Ok(json!({ "error": "task not found", "id": id })),
            }
        }
        other => Ok(unknown_action("scheduled", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_engine;

    #[tokio::test]
    async fn test_schedule_and_check() {
        let engine = test_engine().await;
        engine.set_project_id("demo".to_string()).await;

        let created = dispatch(
            &engine,
            "schedule".into(),
            None,
            Some("ping the build".into()),
            Some("in 1 minutes".into()),
            None,
            None,
        )
        .await
        .unwrap();
        assert!(created["task"]["id"].is_string());

        // Not due yet
        let checked = dispatch(&engine, "check".into(), None, None, None, None, None)
            .await
            .unwrap();
        assert_eq!(checked["triggered"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_parse_failure_returns_hint() {
        let engine = test_engine().await;
        let out = dispatch(
            &engine,
            "schedule".into(),
            None,
            Some("x".into()),
            Some("whenever".into()),
            None,
            None,
        )
        .await
        .unwrap();
        assert!(out["error"].is_string());
        assert!(out["hint"].as_str().unwrap().contains("cron"));
    }

    #[tokio::test]
    async fn test_recurring_check_rearms() {
        let engine = test_engine().await;
        engine.set_project_id("demo".to_string()).await;

        // Insert a recurring task already due
        engine
            .pool
            .run(|conn| {
                db::insert_task_sync(
                    conn,
                    "t1",
                    "demo",
                    "rotate logs",
                    "every 2 hours",
                    "2020-01-01 00:00:00",
                    true,
                    None,
                )
            })
            .await
            .unwrap();

        let checked = dispatch(&engine, "check".into(), None, None, None, None, None)
            .await
            .unwrap();
        assert_eq!(checked["triggered"].as_array().unwrap().len(), 1);

        let task = engine
            .pool
            .run(|conn| db::get_task_sync(conn, "t1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.next_run > "2020-01-01 00:00:00".to_string());
    }

    #[tokio::test]
    async fn test_complete_idempotent() {
        let engine = test_engine().await;
        engine.set_project_id("demo".to_string()).await;
        engine
            .pool
            .run(|conn| {
                db::insert_task_sync(
                    conn, "t1", "demo", "x", "in 5 minutes", "2099-01-01 00:00:00", false, None,
                )
            })
            .await
            .unwrap();

        let first = dispatch(&engine, "complete".into(), Some("t1".into()), None, None, None, None)
            .await
            .unwrap();
        assert_eq!(first["status"], "completed");

        // Cancel after complete reports the terminal state unchanged
        let second = dispatch(&engine, "cancel".into(), Some("t1".into()), None, None, None, None)
            .await
            .unwrap();
        assert_eq!(second["status"], "completed");
    }
}
