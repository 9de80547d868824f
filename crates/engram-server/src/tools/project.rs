// tools/project.rs
// Project namespace tool: list known projects, switch the active one.

use serde_json::{Value, json};

use crate::config::sanitize_project_id;
use crate::engine::Engine;
use crate::error::Result;

use super::unknown_action;

pub async fn dispatch(engine: &Engine, action: String, project_id: Option<String>) -> Result<Value> {
    match action.as_str() {
        "list" => {
            let current = engine.project_id().await;
            let known: Vec<String> = engine
                .pool
                .run(|conn| {
                    let mut stmt = conn.prepare(
                        "SELECT DISTINCT project_id FROM memories
                         UNION SELECT DISTINCT project_id FROM scratchpad
                         ORDER BY 1",
                    )?;
                    let rows = stmt
                        .query_map([], |row| row.get(0))?
                        .collect::<rusqlite::Result<Vec<String>>>()?;
                    Ok::<_, rusqlite::Error>(rows)
                })
                .await?;
            Ok(json!({ "current": current, "projects": known }))
        }
        "set" => {
            let Some(raw) = project_id else {
                return Ok(json!({ "error": "set requires project_id" }));
            };
            let Some(clean) = sanitize_project_id(&raw) else {
                return Ok(json!({
                    "error": format!("'{raw}' is not a valid project id (lowercase [a-z0-9_-], 1-64 chars, not reserved)"),
                }));
            };
            engine.set_project_id(clean.clone()).await;
            Ok(json!({ "current": clean }))
        }
        other => Ok(unknown_action("project", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_engine;

    #[tokio::test]
    async fn test_set_and_list() {
        let engine = test_engine().await;
        let set = dispatch(&engine, "set".into(), Some("My App".into())).await.unwrap();
        assert_eq!(set["current"], "my-app");
        assert_eq!(engine.project_id().await, "my-app");

        let listed = dispatch(&engine, "list".into(), None).await.unwrap();
        assert_eq!(listed["current"], "my-app");
    }

    #[tokio::test]
    async fn test_reserved_rejected() {
        let engine = test_engine().await;
        let before = engine.project_id().await;
        let out = dispatch(&engine, "set".into(), Some("global".into())).await.unwrap();
        assert!(out["error"].is_string());
        assert_eq!(engine.project_id().await, before);
    }
}
