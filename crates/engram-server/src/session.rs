// session.rs
// Per-process session state: heartbeats, last-tool tracking, task progress,
// and crash detection across restarts. All durable state lives in the
// scratchpad so a crashed process leaves its trail behind.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::db::{self, DatabasePool};
use crate::utils::{now_sqlite, parse_sqlite_ts};

pub const HEARTBEAT_KEY: &str = "__session_heartbeat";
pub const LAST_TOOL_KEY: &str = "__session_last_tool";
pub const CURRENT_TASK_KEY: &str = "__session_current_task";
pub const PREVIOUS_SESSION_KEY: &str = "__session_previous_id";
pub const BRIEFING_SEQ_KEY: &str = "__briefing_seq";

/// Heartbeats older than this are not treated as a crash trail.
const CRASH_WINDOW_SECONDS: i64 = 3600;

/// Task steps kept when a briefing trims history.
const TASK_STEP_KEEP: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub session_id: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastTool {
    pub tool: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStep {
    pub step: i64,
    pub description: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgress {
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_steps: Option<i64>,
    pub current_step: i64,
    pub steps: Vec<TaskStep>,
    pub started_at: String,
}

/// What a crashed predecessor left behind, surfaced in the next briefing.
#[derive(Debug, Clone, Serialize)]
pub struct CrashRecovery {
    pub detected: bool,
    pub last_heartbeat: String,
    pub last_tool: Option<LastTool>,
    pub working_files: Vec<String>,
    pub previous_session_start: Option<String>,
}

pub struct SessionState {
    id: String,
    started_at: String,
    briefing_seq: AtomicU64,
}

impl SessionState {
    /// A fresh session id: millis plus random suffix.
    pub fn new() -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        let suffix: u16 = rand::random();
        Self {
            id: format!("{millis}-{suffix:04x}"),
            started_at: now_sqlite(),
            briefing_seq: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn started_at(&self) -> &str {
        &self.started_at
    }

    /// Record a heartbeat plus the last tool. Best-effort: failures are
    /// logged at debug and never propagate into the tool call.
    pub async fn heartbeat(&self, pool: &Arc<DatabasePool>, project_id: &str, tool: &str) {
        let heartbeat = Heartbeat {
            session_id: self.id.clone(),
            timestamp: now_sqlite(),
        };
        let last_tool = LastTool {
            tool: tool.to_string(),
            timestamp: heartbeat.timestamp.clone(),
        };
        let project = project_id.to_string();
        pool.try_interact("session heartbeat", move |conn| {
            db::scratch_set_sync(
                conn,
                &project,
                HEARTBEAT_KEY,
                &serde_json::to_string(&heartbeat)?,
                None,
            )?;
            db::scratch_set_sync(
                conn,
                &project,
                LAST_TOOL_KEY,
                &serde_json::to_string(&last_tool)?,
                None,
            )?;
            Ok(())
        })
        .await;
    }

    /// Startup recovery: if the stored session id differs from ours and the
    /// heartbeat is fresh, the previous process died without a clean
    /// shutdown. Marks this session as seen either way.
    pub async fn detect_crash(
        &self,
        pool: &Arc<DatabasePool>,
        project_id: &str,
    ) -> Option<CrashRecovery> {
        let project = project_id.to_string();
        let my_id = self.id.clone();
        pool.try_interact("crash detection", move |conn| {
            let heartbeat: Option<Heartbeat> = db::scratch_get_sync(conn, &project, HEARTBEAT_KEY)?
                .and_then(|v| serde_json::from_str(&v).ok());
            let previous: Option<String> =
                db::scratch_get_sync(conn, &project, PREVIOUS_SESSION_KEY)?;

            // Mark this session as seen before deciding anything
            db::scratch_set_sync(conn, &project, PREVIOUS_SESSION_KEY, &my_id, None)?;

            let Some(heartbeat) = heartbeat else {
                return Ok(None);
            };
            if heartbeat.session_id == my_id {
                return Ok(None);
            }
            let fresh = parse_sqlite_ts(&heartbeat.timestamp)
                .map(|t| (chrono::Utc::now() - t).num_seconds() < CRASH_WINDOW_SECONDS)
                .unwrap_or(false);
            if !fresh {
                return Ok(None);
            }

            let last_tool: Option<LastTool> = db::scratch_get_sync(conn, &project, LAST_TOOL_KEY)?
                .and_then(|v| serde_json::from_str(&v).ok());
            let task: Option<TaskProgress> =
                db::scratch_get_sync(conn, &project, CURRENT_TASK_KEY)?
                    .and_then(|v| serde_json::from_str(&v).ok());
            let working_files = task
                .map(|t| t.steps.into_iter().map(|s| s.description).collect())
                .unwrap_or_default();

            Ok(Some(CrashRecovery {
                detected: true,
                last_heartbeat: heartbeat.timestamp,
                last_tool,
                working_files,
                previous_session_start: previous,
            }))
        })
        .await
        .flatten()
    }

    /// First briefing of a session increments the sequence and trims stored
    /// task steps to the most recent few.
    pub async fn next_briefing_seq(&self, pool: &Arc<DatabasePool>, project_id: &str) -> u64 {
        let seq = self.briefing_seq.fetch_add(1, Ordering::SeqCst) + 1;
        if seq == 1 {
            let project = project_id.to_string();
            pool.try_interact("briefing trim", move |conn| {
                let stored: Option<String> =
                    db::scratch_get_sync(conn, &project, BRIEFING_SEQ_KEY)?;
                let total: u64 = stored.and_then(|v| v.parse().ok()).unwrap_or(0) + 1;
                db::scratch_set_sync(conn, &project, BRIEFING_SEQ_KEY, &total.to_string(), None)?;

                if let Some(raw) = db::scratch_get_sync(conn, &project, CURRENT_TASK_KEY)?
                    && let Ok(mut task) = serde_json::from_str::<TaskProgress>(&raw)
                    && task.steps.len() > TASK_STEP_KEEP
                {
                    task.steps = task.steps.split_off(task.steps.len() - TASK_STEP_KEEP);
                    db::scratch_set_sync(
                        conn,
                        &project,
                        CURRENT_TASK_KEY,
                        &serde_json::to_string(&task)?,
                        None,
                    )?;
                }
                Ok(())
            })
            .await;
        }
        seq
    }

    /// Start tracking a task.
    pub async fn set_task(
        &self,
        pool: &Arc<DatabasePool>,
        project_id: &str,
        description: String,
        total_steps: Option<i64>,
    ) -> TaskProgress {
        let task = TaskProgress {
            description,
            total_steps,
            current_step: 0,
            steps: Vec::new(),
            started_at: now_sqlite(),
        };
        self.write_task(pool, project_id, &task).await;
        task
    }

    /// Record a completed step.
    pub async fn update_task(
        &self,
        pool: &Arc<DatabasePool>,
        project_id: &str,
        step_description: String,
    ) -> Option<TaskProgress> {
        let mut task = self.get_task(pool, project_id).await?;
        task.current_step += 1;
        task.steps.push(TaskStep {
            step: task.current_step,
            description: step_description,
            timestamp: now_sqlite(),
        });
        self.write_task(pool, project_id, &task).await;
        Some(task)
    }

    pub async fn get_task(
        &self,
        pool: &Arc<DatabasePool>,
        project_id: &str,
    ) -> Option<TaskProgress> {
        let project = project_id.to_string();
        pool.try_interact("task read", move |conn| {
            Ok(db::scratch_get_sync(conn, &project, CURRENT_TASK_KEY)?
                .and_then(|v| serde_json::from_str(&v).ok()))
        })
        .await
        .flatten()
    }

    pub async fn clear_task(&self, pool: &Arc<DatabasePool>, project_id: &str) {
        let project = project_id.to_string();
        pool.try_interact("task clear", move |conn| {
            db::scratch_delete_sync(conn, &project, CURRENT_TASK_KEY)?;
            Ok(())
        })
        .await;
    }

    async fn write_task(&self, pool: &Arc<DatabasePool>, project_id: &str, task: &TaskProgress) {
        let project = project_id.to_string();
        let json = serde_json::to_string(task).unwrap_or_default();
        pool.try_interact("task write", move |conn| {
            db::scratch_set_sync(conn, &project, CURRENT_TASK_KEY, &json, None)?;
            Ok(())
        })
        .await;
    }

    /// Graceful shutdown: remove the heartbeat so the next start does not
    /// read this session as a crash.
    pub async fn clear_state(&self, pool: &Arc<DatabasePool>, project_id: &str) {
        let project = project_id.to_string();
        pool.try_interact("session clear", move |conn| {
            db::scratch_delete_sync(conn, &project, HEARTBEAT_KEY)?;
            db::scratch_delete_sync(conn, &project, LAST_TOOL_KEY)?;
            Ok(())
        })
        .await;
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
