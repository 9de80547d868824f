// tools/contradictions.rs
// Contradiction tool: scan/pending/resolve.

use engram_types::ResolutionType;
use serde_json::{Value, json};

use crate::contradiction::{resolve_contradiction, scan_contradictions};
use crate::db;
use crate::engine::Engine;
use crate::error::Result;

use super::unknown_action;

#[allow(clippy::too_many_arguments)]
pub async fn dispatch(
    engine: &Engine,
    action: String,
    resolution_id: Option<String>,
    resolution_type: Option<String>,
    note: Option<String>,
    merged_content: Option<String>,
) -> Result<Value> {
    let project = engine.project_id().await;

    match action.as_str() {
        "scan" => {
            let report = scan_contradictions(
                &engine.pool,
                &engine.lock,
                &project,
                engine.config.auto_resolve_contradictions,
            )
            .await?;
            Ok(serde_json::to_value(report)?)
        }
        "pending" => {
            let pending = engine
                .pool
                .run(move |conn| db::pending_resolutions_sync(conn, &project, 100))
                .await?;
            Ok(json!({ "pending": pending }))
        }
        "resolve" => {
            let (Some(id), Some(kind)) = (resolution_id, resolution_type) else {
                return Ok(json!({ "error": "resolve requires resolution_id and resolution_type" }));
            };
            let Some(kind) = ResolutionType::parse(&kind) else {
                return Ok(json!({
                    "error": format!("unknown resolution_type '{kind}'"),
                }));
            };
            let outcome =
                resolve_contradiction(&engine.pool, &engine.lock, &id, kind, note, merged_content)
                    .await?;
            Ok(serde_json::to_value(outcome)?)
        }
        other => Ok(unknown_action("contradictions", other)),
    }
}
