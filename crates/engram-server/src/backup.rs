// backup.rs
// JSON backups: {version, created_at, memories, edges, scratchpad} with
// optional base64 embeddings. Restore is transactional and either merges
// (keep existing rows on id collision) or replaces (clear first).

use std::path::PathBuf;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::engine::Engine;
use crate::error::{EngramError, Result};

const BACKUP_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct BackupDocument {
    pub version: u32,
    pub created_at: String,
    pub memories: Vec<BackupMemory>,
    pub edges: Vec<BackupEdge>,
    pub scratchpad: Vec<BackupScratch>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackupMemory {
    pub id: String,
    pub project_id: String,
    pub content: String,
    pub memory_type: String,
    pub tags: String,
    pub importance: f64,
    pub strength: f64,
    pub access_count: i64,
    pub confidence: f64,
    pub source_count: i64,
    pub contradiction_count: i64,
    pub created_at: String,
    pub last_accessed: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
    /// Base64-encoded little-endian f32 bytes, when exported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackupEdge {
    pub id: String,
    pub project_id: String,
    pub from_id: String,
    pub to_id: String,
    pub relation_type: String,
    pub valid_from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<String>,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackupScratch {
    pub project_id: String,
    pub key: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreMode {
    /// Keep existing rows on id collision.
    Merge,
    /// Clear the store first.
    Replace,
}

impl RestoreMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "merge" => Some(Self::Merge),
            "replace" => Some(Self::Replace),
            _ => None,
        }
    }
}

/// Export the whole store to `<backup_dir>/backup-<ISO>.json`.
pub async fn create_backup(engine: &Engine, include_embeddings: bool) -> Result<PathBuf> {
    let document = dump(engine, include_embeddings).await?;

    std::fs::create_dir_all(&engine.config.backup_dir)?;
    let stamp = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%SZ");
    let path = engine.config.backup_dir.join(format!("backup-{stamp}.json"));
    let json = serde_json::to_string(&document)?;
    std::fs::write(&path, json)?;
    tracing::info!(
        path = %path.display(),
        memories = document.memories.len(),
        "Backup written"
    );
    Ok(path)
}

async fn dump(engine: &Engine, include_embeddings: bool) -> Result<BackupDocument> {
    engine
        .pool
        .run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, project_id, content, memory_type, tags, importance, strength,
                        access_count, confidence, source_count, contradiction_count,
                        created_at, last_accessed, updated_at, deleted_at, embedding
                 FROM memories",
            )?;
            let memories: Vec<BackupMemory> = stmt
                .query_map([], |row| {
                    let embedding: Option<Vec<u8>> = row.get(15)?;
                    Ok(BackupMemory {
                        id: row.get(0)?,
                        project_id: row.get(1)?,
                        content: row.get(2)?,
                        memory_type: row.get(3)?,
                        tags: row.get(4)?,
                        importance: row.get(5)?,
                        strength: row.get(6)?,
                        access_count: row.get(7)?,
                        confidence: row.get(8)?,
                        source_count: row.get(9)?,
                        contradiction_count: row.get(10)?,
                        created_at: row.get(11)?,
                        last_accessed: row.get(12)?,
                        updated_at: row.get(13)?,
                        deleted_at: row.get(14)?,
                        embedding: embedding
                            .filter(|_| include_embeddings)
                            .map(|b| BASE64.encode(b)),
                    })
                })?
                .collect::<rusqlite::Result<_>>()?;

            let mut stmt = conn.prepare(
                "SELECT id, project_id, from_id, to_id, relation_type, valid_from, valid_to,
                        confidence, metadata
                 FROM edges",
            )?;
            let edges: Vec<BackupEdge> = stmt
                .query_map([], |row| {
                    Ok(BackupEdge {
                        id: row.get(0)?,
                        project_id: row.get(1)?,
                        from_id: row.get(2)?,
                        to_id: row.get(3)?,
                        relation_type: row.get(4)?,
                        valid_from: row.get(5)?,
                        valid_to: row.get(6)?,
                        confidence: row.get(7)?,
                        metadata: row.get(8)?,
                    })
                })?
                .collect::<rusqlite::Result<_>>()?;

            let mut stmt =
                conn.prepare("SELECT project_id, key, value, expires_at FROM scratchpad")?;
            let scratchpad: Vec<BackupScratch> = stmt
                .query_map([], |row| {
                    Ok(BackupScratch {
                        project_id: row.get(0)?,
                        key: row.get(1)?,
                        value: row.get(2)?,
                        expires_at: row.get(3)?,
                    })
                })?
                .collect::<rusqlite::Result<_>>()?;

            Ok::<_, rusqlite::Error>(BackupDocument {
                version: BACKUP_VERSION,
                created_at: crate::utils::now_sqlite(),
                memories,
                edges,
                scratchpad,
            })
        })
        .await
        .map_err(Into::into)
}

/// Restore a backup document. Missing embeddings are regenerated by the
/// embedding worker afterwards.
pub async fn restore_backup(engine: &Engine, path: &std::path::Path, mode: RestoreMode) -> Result<RestoreReport> {
    let raw = std::fs::read_to_string(path)?;
    let document: BackupDocument = serde_json::from_str(&raw)
        .map_err(|e| EngramError::Plugin(format!("backup parse error: {e}")))?;
    if document.version > BACKUP_VERSION {
        return Err(EngramError::InvalidInput(format!(
            "backup version {} is newer than supported {}",
            document.version, BACKUP_VERSION
        )));
    }

    let guard = engine.lock.acquire().await?;
    let report = engine
        .pool
        .run(move |conn| {
            let tx = conn.unchecked_transaction()?;
            if mode == RestoreMode::Replace {
                tx.execute("DELETE FROM memories", [])?;
                tx.execute("DELETE FROM edges", [])?;
                tx.execute("DELETE FROM scratchpad", [])?;
            }

            let mut restored = 0usize;
            let mut skipped = 0usize;
            for m in &document.memories {
                let embedding = m
                    .embedding
                    .as_ref()
                    .and_then(|b64| BASE64.decode(b64).ok());
                let inserted = tx.execute(
                    "INSERT OR IGNORE INTO memories
                         (id, project_id, content, memory_type, tags, importance, strength,
                          access_count, confidence, source_count, contradiction_count,
                          created_at, last_accessed, updated_at, deleted_at, embedding)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                    rusqlite::params![
                        m.id,
                        m.project_id,
                        m.content,
                        m.memory_type,
                        m.tags,
                        m.importance,
                        m.strength,
                        m.access_count,
                        m.confidence,
                        m.source_count,
                        m.contradiction_count,
                        m.created_at,
                        m.last_accessed,
                        m.updated_at,
                        m.deleted_at,
                        embedding,
                    ],
                )?;
                if inserted > 0 {
                    restored += 1;
                } else {
                    skipped += 1;
                }
            }

            for e in &document.edges {
                tx.execute(
                    "INSERT OR IGNORE INTO edges
                         (id, project_id, from_id, to_id, relation_type, valid_from, valid_to,
                          confidence, metadata)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    rusqlite::params![
                        e.id,
                        e.project_id,
                        e.from_id,
                        e.to_id,
                        e.relation_type,
                        e.valid_from,
                        e.valid_to,
                        e.confidence,
                        e.metadata,
                    ],
                )?;
            }

            for s in &document.scratchpad {
                tx.execute(
                    "INSERT OR IGNORE INTO scratchpad (project_id, key, value, expires_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![s.project_id, s.key, s.value, s.expires_at],
                )?;
            }

            tx.commit()?;
            Ok::<_, rusqlite::Error>(RestoreReport { restored, skipped })
        })
        .await;
    guard.release();
    report.map_err(Into::into)
}

#[derive(Debug, serde::Serialize)]
pub struct RestoreReport {
    pub restored: usize,
    pub skipped: usize,
}

/// Newest-first listing of backup files.
pub fn list_backups(backup_dir: &std::path::Path) -> Vec<(String, u64)> {
    let mut entries: Vec<(String, u64)> = std::fs::read_dir(backup_dir)
        .into_iter()
        .flatten()
        .flatten()
        .filter(|e| {
            e.file_name()
                .to_string_lossy()
                .strip_prefix("backup-")
                .is_some_and(|rest| rest.ends_with(".json"))
        })
        .map(|e| {
            let size = e.metadata().map(|m| m.len()).unwrap_or(0);
            (e.file_name().to_string_lossy().into_owned(), size)
        })
        .collect();
    entries.sort_by(|a, b| b.0.cmp(&a.0));
    entries
}

/// Auto-backup when the newest backup is at least `max_age_hours` old.
pub async fn auto_backup_if_stale(engine: &Engine, max_age_hours: u64) -> Option<PathBuf> {
    let newest = list_backups(&engine.config.backup_dir)
        .first()
        .map(|(name, _)| engine.config.backup_dir.join(name));

    if let Some(path) = newest
        && let Ok(meta) = std::fs::metadata(&path)
        && let Ok(modified) = meta.modified()
        && let Ok(age) = modified.elapsed()
        && age.as_secs() < max_age_hours * 3600
    {
        return None;
    }

    match create_backup(engine, false).await {
        Ok(path) => Some(path),
        Err(e) => {
            tracing::warn!("Auto-backup failed: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_engine;
    use crate::memory::StoreParams;
    use engram_types::MemoryType;

    fn params(content: &str) -> StoreParams {
        StoreParams {
            content: content.to_string(),
            memory_type: MemoryType::Fact,
            tags: vec!["backup".into()],
            importance: None,
            confidence: None,
        }
    }

    #[tokio::test]
    async fn test_backup_restore_replace_round_trip() {
        let source = test_engine().await;
        let dir = tempfile::tempdir().unwrap();

        source.store_memory("demo", params("first fact")).await.unwrap();
        source.store_memory("demo", params("second fact")).await.unwrap();

        let document = super::dump(&source, true).await.unwrap();
        let path = dir.path().join("backup-2026-06-01T00-00-00Z.json");
        std::fs::write(&path, serde_json::to_string(&document).unwrap()).unwrap();

        let target = test_engine().await;
        let report = restore_backup(&target, &path, RestoreMode::Replace).await.unwrap();
        assert_eq!(report.restored, 2);
        assert_eq!(report.skipped, 0);

        let listed = target.list_memories("demo", None, None, true, 10, 0).await.unwrap();
        assert_eq!(listed.len(), 2);
        let contents: Vec<&str> = listed.iter().map(|(m, _)| m.content.as_str()).collect();
        assert!(contents.contains(&"first fact"));
        assert!(contents.contains(&"second fact"));
    }

    #[tokio::test]
    async fn test_restore_merge_keeps_existing() {
        let engine = test_engine().await;
        let stored = engine.store_memory("demo", params("original")).await.unwrap();

        // A backup containing the same id with different content
        let document = BackupDocument {
            version: 1,
            created_at: "2026-01-01 00:00:00".into(),
            memories: vec![BackupMemory {
                id: stored.memory.id.clone(),
                project_id: "demo".into(),
                content: "imposter".into(),
                memory_type: "fact".into(),
                tags: "[]".into(),
                importance: 0.5,
                strength: 1.0,
                access_count: 0,
                confidence: 0.5,
                source_count: 1,
                contradiction_count: 0,
                created_at: "2026-01-01 00:00:00".into(),
                last_accessed: "2026-01-01 00:00:00".into(),
                updated_at: "2026-01-01 00:00:00".into(),
                deleted_at: None,
                embedding: None,
            }],
            edges: vec![],
            scratchpad: vec![],
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup-x.json");
        std::fs::write(&path, serde_json::to_string(&document).unwrap()).unwrap();

        let report = restore_backup(&engine, &path, RestoreMode::Merge).await.unwrap();
        assert_eq!(report.restored, 0);
        assert_eq!(report.skipped, 1);

        let recalled = engine.recall_memory(&stored.memory.id).await.unwrap().unwrap();
        assert_eq!(recalled.memory.content, "original");
    }

    #[tokio::test]
    async fn test_embeddings_base64_round_trip() {
        let engine = test_engine().await;
        let stored = engine.store_memory("demo", params("embedded fact")).await.unwrap();
        let bytes = crate::embeddings::embedding_to_bytes(&[0.5f32, -0.5, 0.0, 0.7]);
        let id = stored.memory.id.clone();
        engine
            .pool
            .run(move |conn| crate::db::store_embedding_sync(conn, &id, &bytes))
            .await
            .unwrap();

        let document = super::dump(&engine, true).await.unwrap();
        assert!(document.memories[0].embedding.is_some());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup-y.json");
        std::fs::write(&path, serde_json::to_string(&document).unwrap()).unwrap();

        let target = test_engine().await;
        restore_backup(&target, &path, RestoreMode::Replace).await.unwrap();
        let pending = target
            .pool
            .run(|conn| crate::db::find_memories_without_embeddings_sync(conn, 10))
            .await
            .unwrap();
        assert!(pending.is_empty(), "embedding restored, nothing for the worker");
    }

    #[test]
    fn test_list_backups_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "backup-2026-01-01T00-00-00Z.json",
            "backup-2026-03-01T00-00-00Z.json",
            "other.txt",
        ] {
            std::fs::write(dir.path().join(name), "{}").unwrap();
        }
        let listed = list_backups(dir.path());
        assert_eq!(listed.len(), 2);
        assert!(listed[0].0.contains("2026-03-01"));
    }

    #[test]
    fn test_restore_mode_parse() {
        assert_eq!(RestoreMode::parse("merge"), Some(RestoreMode::Merge));
        assert_eq!(RestoreMode::parse("replace"), Some(RestoreMode::Replace));
        assert_eq!(RestoreMode::parse("upsert"), None);
    }
}
