// crates/engram-server/src/memory/mod.rs
// High-level memory operations: store with contradiction hooks, recall with
// access strengthening, update with re-embedding, soft/hard delete.

pub mod scoring;

use engram_types::{Contradiction, ContradictionResolution, Memory, MemoryType};

use crate::contradiction::{detect_contradictions, record_contradictions_sync};
use crate::db;
use crate::embeddings::embedding_to_bytes;
use crate::engine::Engine;
use crate::error::{EngramError, Result};
use crate::utils::new_id;
use crate::vector::VectorPayload;

/// Content cap in bytes. At the limit is accepted; one byte over is not.
pub const MAX_CONTENT_BYTES: usize = 100_000;
/// Tag list cap.
pub const MAX_TAGS: usize = 20;
/// Per-tag length cap in chars.
pub const MAX_TAG_CHARS: usize = 100;
/// Initial confidence when the caller does not provide one.
pub const DEFAULT_CONFIDENCE: f64 = 0.7;
/// Confidence floor after contradiction discounting at store time.
const CONTRADICTION_FLOOR: f64 = 0.2;

/// What a store returns: the new row plus the conflicts it collided with.
#[derive(Debug, serde::Serialize)]
pub struct StoreOutcome {
    pub memory: Memory,
    pub contradictions: Vec<Contradiction>,
}

/// What a recall returns: the enriched row plus unresolved conflicts.
#[derive(Debug, serde::Serialize)]
pub struct RecallOutcome {
    pub memory: Memory,
    pub effective_confidence: f64,
    pub retention: f64,
    pub unresolved_contradictions: Vec<ContradictionResolution>,
}

pub struct StoreParams {
    pub content: String,
    pub memory_type: MemoryType,
    pub tags: Vec<String>,
    pub importance: Option<f64>,
    pub confidence: Option<f64>,
}

/// Reject over-long content, naming the field.
pub fn validate_content(content: &str) -> Result<()> {
    if content.is_empty() {
        return Err(EngramError::InvalidInput("content must not be empty".into()));
    }
    if content.len() > MAX_CONTENT_BYTES {
        return Err(EngramError::InvalidInput(format!(
            "content exceeds {MAX_CONTENT_BYTES} bytes"
        )));
    }
    Ok(())
}

/// Lowercase, trim, dedupe, cap the list at MAX_TAGS. Over-long individual
/// tags are rejected, naming the field.
pub fn normalize_tags(tags: Vec<String>) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if tag.is_empty() {
            continue;
        }
        if tag.chars().count() > MAX_TAG_CHARS {
            return Err(EngramError::InvalidInput(format!(
                "tag exceeds {MAX_TAG_CHARS} chars"
            )));
        }
        if !out.contains(&tag) {
            out.push(tag);
        }
    }
    out.truncate(MAX_TAGS);
    Ok(out)
}

impl Engine {
    /// Store a new memory. Contradiction detection runs against the target
    /// project before the insert; each conflict above the record threshold
    /// becomes an edge and a pending resolution inside the same write-lock
    /// section as the insert. The vector upsert happens outside the lock.
    pub async fn store_memory(&self, project_id: &str, params: StoreParams) -> Result<StoreOutcome> {
        validate_content(&params.content)?;
        let tags = normalize_tags(params.tags)?;
        let importance = params.importance.unwrap_or(0.5).clamp(0.0, 1.0);
        let base_confidence = params.confidence.unwrap_or(DEFAULT_CONFIDENCE).clamp(0.0, 1.0);
        let id = new_id();

        let contradictions = detect_contradictions(
            &self.pool,
            &self.vector,
            self.embeddings.as_ref(),
            self.nli.as_ref(),
            &params.content,
            project_id,
            None,
        )
        .await;

        // Each conflict discounts the starting confidence
        let confidence =
            (base_confidence - 0.1 * contradictions.len() as f64).max(CONTRADICTION_FLOOR);

        // Best-effort embed; a NULL embedding is filled in by the worker later
        let embedding = match &self.embeddings {
            Some(client) => match client.embed(&params.content).await {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!("Embed at store failed (worker will retry): {}", e);
                    None
                }
            },
            None => None,
        };
        let embedding_bytes = embedding.as_deref().map(embedding_to_bytes);

        let guard = self.lock.acquire().await?;
        let memory = {
            let id = id.clone();
            let project = project_id.to_string();
            let content = params.content.clone();
            let memory_type = params.memory_type;
            let tags = tags.clone();
            let contradictions = contradictions.clone();
            let result = self
                .pool
                .run(move |conn| {
                    let tx = conn.unchecked_transaction()?;
                    db::insert_memory_sync(
                        &tx,
                        db::InsertMemoryParams {
                            id: &id,
                            project_id: &project,
                            content: &content,
                            memory_type,
                            tags: &tags,
                            importance,
                            confidence,
                            embedding: embedding_bytes.as_deref(),
                        },
                    )?;
                    record_contradictions_sync(&tx, &project, &id, &contradictions)?;
                    tx.commit()?;
                    db::get_memory_sync(conn, &id)
                })
                .await;
            guard.release();
            result?
        }
        .ok_or_else(|| EngramError::Other("stored row vanished".into()))?;

        if let Some(vector) = embedding {
            let payload = VectorPayload {
                project_id: project_id.to_string(),
                deleted: false,
            };
            if let Err(e) = self.vector.upsert(&id, &vector, payload).await {
                tracing::warn!("Vector upsert after store failed: {}", e);
            }
        }

        Ok(StoreOutcome {
            memory,
            contradictions,
        })
    }

    /// Recall a memory by id: bump access count, strengthen, refresh
    /// last_accessed, and attach unresolved contradictions. Returns None as a
    /// normal outcome when the id is unknown or soft-deleted.
    pub async fn recall_memory(&self, id: &str) -> Result<Option<RecallOutcome>> {
        let guard = self.lock.acquire().await?;
        let id_owned = id.to_string();
        let result = self
            .pool
            .run(move |conn| {
                let memory = db::record_access_sync(conn, &id_owned, scoring::RECENT_ACCESS_BOOST)?;
                let unresolved = match &memory {
                    Some(m) => db::pending_resolutions_for_memory_sync(conn, &m.id)?,
                    None => Vec::new(),
                };
                Ok::<_, rusqlite::Error>(memory.map(|m| (m, unresolved)))
            })
            .await;
        guard.release();

        let now = chrono::Utc::now();
        Ok(result?.map(|(memory, unresolved)| {
            let effective = scoring::effective_confidence(&memory, now);
            let retention = scoring::retention(&memory, now);
            RecallOutcome {
                memory,
                effective_confidence: effective,
                retention,
                unresolved_contradictions: unresolved,
            }
        }))
    }

    /// Update fields of a memory. A content change regenerates the embedding
    /// and re-runs contradiction detection excluding the row itself.
    pub async fn update_memory(
        &self,
        id: &str,
        content: Option<String>,
        memory_type: Option<MemoryType>,
        tags: Option<Vec<String>>,
        importance: Option<f64>,
        confidence: Option<f64>,
    ) -> Result<Option<StoreOutcome>> {
        let project_id = {
            let id = id.to_string();
            match self.pool.run(move |conn| db::get_memory_sync(conn, &id)).await? {
                Some(m) if m.deleted_at.is_none() => m.project_id,
                _ => return Ok(None),
            }
        };

        let tags = match tags {
            Some(t) => Some(normalize_tags(t)?),
            None => None,
        };

        let (contradictions, embedding) = match &content {
            Some(new_content) => {
                validate_content(new_content)?;
                let contradictions = detect_contradictions(
                    &self.pool,
                    &self.vector,
                    self.embeddings.as_ref(),
                    self.nli.as_ref(),
                    new_content,
                    &project_id,
                    Some(id),
                )
                .await;
                let embedding = match &self.embeddings {
                    Some(client) => client.embed(new_content).await.ok(),
                    None => None,
                };
                (contradictions, Some(embedding))
            }
            None => (Vec::new(), None),
        };

        let guard = self.lock.acquire().await?;
        let updated = {
            let id = id.to_string();
            let project = project_id.clone();
            let content = content.clone();
            let contradictions = contradictions.clone();
            let embedding_bytes = embedding
                .as_ref()
                .map(|opt| opt.as_deref().map(embedding_to_bytes));
            let result = self
                .pool
                .run(move |conn| {
                    let tx = conn.unchecked_transaction()?;
                    let ok = db::update_memory_sync(
                        &tx,
                        &id,
                        db::UpdateMemoryFields {
                            content,
                            memory_type,
                            tags,
                            importance,
                            confidence,
                            embedding: embedding_bytes,
                        },
                    )?;
                    if ok {
                        record_contradictions_sync(&tx, &project, &id, &contradictions)?;
                    }
                    tx.commit()?;
                    if ok { db::get_memory_sync(conn, &id) } else { Ok(None) }
                })
                .await;
            guard.release();
            result?
        };

        let Some(memory) = updated else {
            return Ok(None);
        };

        if let Some(Some(vector)) = embedding {
            let payload = VectorPayload {
                project_id,
                deleted: false,
            };
            if let Err(e) = self.vector.upsert(id, &vector, payload).await {
                tracing::warn!("Vector upsert after update failed: {}", e);
            }
        }

        Ok(Some(StoreOutcome {
            memory,
            contradictions,
        }))
    }

    /// Delete a memory: soft by default, permanent removes the row plus all
    /// adjacent edges. The vector id is dropped best-effort right away; the
    /// consolidation sweep catches any miss.
    pub async fn delete_memory(&self, id: &str, permanent: bool) -> Result<bool> {
        let guard = self.lock.acquire().await?;
        let existed = {
            let id = id.to_string();
            let result = self
                .pool
                .run(move |conn| {
                    if permanent {
                        db::purge_memory_sync(conn, &id)
                    } else {
                        db::soft_delete_memory_sync(conn, &id)
                    }
                })
                .await;
            guard.release();
            result?
        };

        if existed
            && let Err(e) = self.vector.delete(id).await
        {
            tracing::warn!("Vector delete failed (consolidation will sweep): {}", e);
        }
        Ok(existed)
    }

    /// List live memories with decay annotations; hidden below the retention
    /// threshold unless `include_deleted` asks for everything.
    pub async fn list_memories(
        &self,
        project_id: &str,
        memory_type: Option<String>,
        tag: Option<String>,
        include_deleted: bool,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<(Memory, f64)>> {
        let project = project_id.to_string();
        let rows = self
            .pool
            .run(move |conn| {
                db::list_memories_sync(
                    conn,
                    &project,
                    memory_type.as_deref(),
                    tag.as_deref(),
                    include_deleted,
                    limit,
                    offset,
                )
            })
            .await?;

        let now = chrono::Utc::now();
        Ok(rows
            .into_iter()
            .filter(|m| include_deleted || scoring::is_retained(m, now))
            .map(|m| {
                let effective = scoring::effective_confidence(&m, now);
                (m, effective)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_engine;

    fn store_params(content: &str) -> StoreParams {
        StoreParams {
            content: content.to_string(),
            memory_type: MemoryType::Fact,
            tags: vec!["Sqlite".into(), "WAL".into()],
            importance: None,
            confidence: None,
        }
    }

    #[tokio::test]
    async fn test_store_then_recall_round_trip() {
        let engine = test_engine().await;
        let stored = engine
            .store_memory("demo", store_params("SQLite uses WAL for concurrent readers"))
            .await
            .unwrap();
        assert_eq!(stored.memory.content, "SQLite uses WAL for concurrent readers");
        assert_eq!(stored.memory.tags, vec!["sqlite", "wal"]);
        assert!(stored.contradictions.is_empty());

        let recalled = engine
            .recall_memory(&stored.memory.id)
            .await
            .unwrap()
            .expect("stored memory should recall");
        assert_eq!(recalled.memory.content, stored.memory.content);
        assert_eq!(recalled.memory.access_count, 1);
        assert!(recalled.memory.confidence >= 0.5 + scoring::RECENT_ACCESS_BOOST);
        assert!(recalled.unresolved_contradictions.is_empty());
    }

    #[tokio::test]
    async fn test_recall_unknown_id_is_normal_none() {
        let engine = test_engine().await;
        assert!(engine.recall_memory("ffffffffffffffffffffffffffffffff").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_content_boundary() {
        let engine = test_engine().await;
        let at_limit = "x".repeat(MAX_CONTENT_BYTES);
        assert!(engine.store_memory("demo", store_params(&at_limit)).await.is_ok());

        let over = "x".repeat(MAX_CONTENT_BYTES + 1);
        let err = engine.store_memory("demo", store_params(&over)).await.unwrap_err();
        assert!(matches!(err, EngramError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_negation_contradiction_on_store() {
        let engine = test_engine().await;
        let first = engine
            .store_memory("demo", store_params("The deployment is complete"))
            .await
            .unwrap();

        let second = engine
            .store_memory("demo", store_params("The deployment is not complete"))
            .await
            .unwrap();

        assert!(!second.contradictions.is_empty(), "negation must be detected");
        let c = &second.contradictions[0];
        assert_eq!(c.id, first.memory.id);
        assert!(c.confidence >= 0.5);
        assert!(matches!(
            c.kind,
            engram_types::ContradictionKind::Negation | engram_types::ContradictionKind::Factual
        ));
        // Initial confidence was discounted by the conflict
        assert!(second.memory.confidence <= DEFAULT_CONFIDENCE - 0.1 + 1e-9);

        // An edge of relation potential_contradiction exists between them
        let edges = engine
            .pool
            .run({
                let project = "demo".to_string();
                move |conn| db::live_contradiction_edges_sync(conn, &project)
            })
            .await
            .unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].from_id, second.memory.id);
        assert_eq!(edges[0].to_id, first.memory.id);

        // And recalling either side reports the unresolved conflict
        let recalled = engine.recall_memory(&first.memory.id).await.unwrap().unwrap();
        assert_eq!(recalled.unresolved_contradictions.len(), 1);
    }

    #[tokio::test]
    async fn test_soft_delete_idempotent_and_hides() {
        let engine = test_engine().await;
        let stored = engine.store_memory("demo", store_params("temporary")).await.unwrap();

        assert!(engine.delete_memory(&stored.memory.id, false).await.unwrap());
        assert!(engine.delete_memory(&stored.memory.id, false).await.unwrap());
        assert!(engine.recall_memory(&stored.memory.id).await.unwrap().is_none());

        let listed = engine
            .list_memories("demo", None, None, false, 10, 0)
            .await
            .unwrap();
        assert!(listed.is_empty());
        let with_deleted = engine
            .list_memories("demo", None, None, true, 10, 0)
            .await
            .unwrap();
        assert_eq!(with_deleted.len(), 1);
    }

    #[tokio::test]
    async fn test_permanent_delete_removes_edges() {
        let engine = test_engine().await;
        let first = engine
            .store_memory("demo", store_params("The cache is enabled"))
            .await
            .unwrap();
        let second = engine
            .store_memory("demo", store_params("The cache is not enabled"))
            .await
            .unwrap();
        assert!(!second.contradictions.is_empty());

        assert!(engine.delete_memory(&first.memory.id, true).await.unwrap());
        let edges = engine
            .pool
            .run(|conn| {
                conn.query_row("SELECT COUNT(*) FROM edges", [], |r| r.get::<_, i64>(0))
            })
            .await
            .unwrap();
        assert_eq!(edges, 0);
    }

    #[tokio::test]
    async fn test_update_content_redetects() {
        let engine = test_engine().await;
        let first = engine
            .store_memory("demo", store_params("The feature flag is enabled"))
            .await
            .unwrap();
        let second = engine
            .store_memory("demo", store_params("Lunch is at noon"))
            .await
            .unwrap();
        assert!(second.contradictions.is_empty());

        let updated = engine
            .update_memory(
                &second.memory.id,
                Some("The feature flag is disabled".to_string()),
                None,
                None,
                None,
                None,
            )
            .await
            .unwrap()
            .expect("row exists");
        assert!(
            updated.contradictions.iter().any(|c| c.id == first.memory.id),
            "antonym conflict with the first memory expected"
        );
        assert_eq!(updated.memory.content, "The feature flag is disabled");
    }

    #[tokio::test]
    async fn test_update_missing_row() {
        let engine = test_engine().await;
        assert!(engine
            .update_memory("ffffffffffffffffffffffffffffffff", None, None, None, None, Some(0.9))
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_normalize_tags() {
        let tags = normalize_tags(vec![
            " Rust ".into(),
            "rust".into(),
            "".into(),
            "Async".into(),
        ])
        .unwrap();
        assert_eq!(tags, vec!["rust", "async"]);

        let too_long = normalize_tags(vec!["x".repeat(101)]);
        assert!(too_long.is_err());

        let many: Vec<String> = (0..30).map(|i| format!("tag{i}")).collect();
        assert_eq!(normalize_tags(many).unwrap().len(), MAX_TAGS);
    }
}
