// tools/backup.rs
// Backup tool: create/restore/list.

use serde_json::{Value, json};

use crate::backup::{RestoreMode, create_backup, list_backups, restore_backup};
use crate::engine::Engine;
use crate::error::Result;

use super::unknown_action;

pub async fn dispatch(
    engine: &Engine,
    action: String,
    file: Option<String>,
    mode: Option<String>,
    include_embeddings: Option<bool>,
) -> Result<Value> {
    match action.as_str() {
        "create" => {
            let path = create_backup(engine, include_embeddings.unwrap_or(true)).await?;
            Ok(json!({
                "file": path.file_name().map(|n| n.to_string_lossy().into_owned()),
            }))
        }
        "restore" => {
            let Some(file) = file else {
                return Ok(json!({ "error": "restore requires file" }));
            };
            let mode = match mode.as_deref() {
                None => RestoreMode::Merge,
                Some(raw) => match RestoreMode::parse(raw) {
                    Some(m) => m,
                    None => {
                        return Ok(json!({
                            "error": format!("unknown restore mode '{raw}', use merge or replace"),
                        }));
                    }
                },
            };
            // File names resolve inside the backup directory; absolute paths
            // are rejected so the tool cannot read arbitrary files.
            if file.contains("..") || file.starts_with('/') {
                return Ok(json!({ "error": "file must be a backup name, not a path" }));
            }
            let path = engine.config.backup_dir.join(&file);
            let report = restore_backup(engine, &path, mode).await?;
            Ok(serde_json::to_value(report)?)
        }
        "list" => {
            let backups = list_backups(&engine.config.backup_dir);
            let items: Vec<Value> = backups
                .into_iter()
                .map(|(name, size)| json!({ "file": name, "bytes": size }))
                .collect();
            Ok(json!({ "backups": items }))
        }
        other => Ok(unknown_action("backup", other)),
    }
}
