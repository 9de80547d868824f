// tools/session.rs
// Task-progress tracking and the session briefing (with crash recovery).

use serde_json::{Value, json};

use crate::engine::Engine;
use crate::error::Result;

use super::unknown_action;

pub async fn task_dispatch(
    engine: &Engine,
    action: String,
    description: Option<String>,
    total_steps: Option<i64>,
    step: Option<String>,
) -> Result<Value> {
    let project = engine.project_id().await;

    match action.as_str() {
        "set" => {
            let Some(description) = description else {
                return Ok(json!({ "error": "set requires description" }));
            };
            let task = engine
                .session
                .set_task(&engine.pool, &project, description, total_steps)
                .await;
            Ok(json!({ "task": task }))
        }
        "update" => {
            let Some(step) = step else {
                return Ok(json!({ "error": "update requires step" }));
            };
            match engine.session.update_task(&engine.pool, &project, step).await {
                Some(task) => Ok(json!({ "task": task })),
                None => Ok(json!({ "error": "no task is being tracked" })),
            }
        }
        "get" => match engine.session.get_task(&engine.pool, &project).await {
            Some(task) => Ok(json!({ "task": task })),
            None => Ok(json!({ "task": Value::Null })),
        },
        "clear" => {
            engine.session.clear_task(&engine.pool, &project).await;
            Ok(json!({ "ok": true }))
        }
        other => Ok(unknown_action("task", other)),
    }
}

/// Session briefing: sequence number, crash recovery from a dead
/// predecessor, current task, pending conflicts.
pub async fn briefing(engine: &Engine) -> Result<Value> {
    let project = engine.project_id().await;

    let crash = engine.session.detect_crash(&engine.pool, &project).await;
    let seq = engine.session.next_briefing_seq(&engine.pool, &project).await;
    let task = engine.session.get_task(&engine.pool, &project).await;

    let pending = {
        let project = project.clone();
        engine
            .pool
            .run(move |conn| crate::db::pending_resolutions_sync(conn, &project, 10))
            .await?
    };

    Ok(json!({
        "session_id": engine.session.id(),
        "project": project,
        "briefing_seq": seq,
        "crash_recovery": crash,
        "current_task": task,
        "pending_contradictions": pending.len(),
    }))
}
