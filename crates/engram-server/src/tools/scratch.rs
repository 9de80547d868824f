// tools/scratch.rs
// Scratchpad tool: set/get/delete/list/clear fan-out on `action`.

use serde_json::{Value, json};

use crate::db;
use crate::engine::Engine;
use crate::error::Result;

use super::unknown_action;

pub async fn dispatch(
    engine: &Engine,
    action: String,
    key: Option<String>,
    value: Option<String>,
    ttl_seconds: Option<i64>,
) -> Result<Value> {
    let project = engine.project_id().await;

    match action.as_str() {
        "set" => {
            let (Some(key), Some(value)) = (key, value) else {
                return Ok(json!({ "error": "set requires key and value" }));
            };
            let guard = engine.lock.acquire().await?;
            let result = engine
                .pool
                .run(move |conn| db::scratch_set_sync(conn, &project, &key, &value, ttl_seconds))
                .await;
            guard.release();
            result?;
            Ok(json!({ "ok": true }))
        }
        "get" => {
            let Some(key) = key else {
                return Ok(json!({ "error": "get requires key" }));
            };
            let stored = engine
                .pool
                .run(move |conn| db::scratch_get_sync(conn, &project, &key))
                .await?;
            Ok(json!({ "value": stored }))
        }
        "delete" => {
            let Some(key) = key else {
                return Ok(json!({ "error": "delete requires key" }));
            };
            let guard = engine.lock.acquire().await?;
            let result = engine
                .pool
                .run(move |conn| db::scratch_delete_sync(conn, &project, &key))
                .await;
            guard.release();
            Ok(json!({ "deleted": result? }))
        }
        "list" => {
            let entries = engine
                .pool
                .run(move |conn| db::scratch_list_sync(conn, &project, false))
                .await?;
            let items: Vec<Value> = entries
                .into_iter()
                .map(|(key, value)| json!({ "key": key, "value": value }))
                .collect();
            Ok(json!({ "entries": items }))
        }
        "clear" => {
            let guard = engine.lock.acquire().await?;
            let result = engine
                .pool
                .run(move |conn| db::scratch_clear_sync(conn, &project))
                .await;
            guard.release();
            Ok(json!({ "cleared": result? }))
        }
        other => Ok(unknown_action("scratch", other)),
    }
}
