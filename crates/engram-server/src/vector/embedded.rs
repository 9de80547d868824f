// crates/engram-server/src/vector/embedded.rs
// sqlite-vec backed vector store inside the main database

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use super::{ScoredId, VectorFilter, VectorPayload, VectorStore};
use crate::config::GLOBAL_PROJECT;
use crate::db::DatabasePool;
use crate::embeddings::embedding_to_bytes;
use crate::error::{EngramError, Result};

/// Vector store over the `vec_memories` vec0 table.
///
/// KNN is a cosine-distance scan ordered by distance; score = 1 - d/2 maps
/// the [0, 2] distance range onto [0, 1].
pub struct EmbeddedVectorStore {
    pool: Arc<DatabasePool>,
    ready: AtomicBool,
}

impl EmbeddedVectorStore {
    pub async fn open(pool: Arc<DatabasePool>, dims: usize) -> Result<Self> {
        pool.run(move |conn| crate::db::ensure_vec_table(conn, dims).map_err(EngramError::from))
            .await?;
        Ok(Self {
            pool,
            ready: AtomicBool::new(true),
        })
    }
}

#[async_trait]
impl VectorStore for EmbeddedVectorStore {
    async fn upsert(&self, id: &str, vector: &[f32], payload: VectorPayload) -> Result<()> {
        let id = id.to_string();
        let bytes = embedding_to_bytes(vector);
        self.pool
            .run(move |conn| {
                // vec0 tables do not support ON CONFLICT; delete-then-insert
                // keyed by the aux memory_id column.
                let existing: Option<i64> = conn
                    .query_row(
                        "SELECT rowid FROM vec_memories WHERE memory_id = ?1",
                        [&id],
                        |row| row.get(0),
                    )
                    .map(Some)
                    .or_else(|e| {
                        if matches!(e, rusqlite::Error::QueryReturnedNoRows) {
                            Ok(None)
                        } else {
                            Err(e)
                        }
                    })?;
                if let Some(rowid) = existing {
                    conn.execute("DELETE FROM vec_memories WHERE rowid = ?1", [rowid])?;
                }
                conn.execute(
                    "INSERT INTO vec_memories (embedding, memory_id, project_id, deleted)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![bytes, id, payload.project_id, payload.deleted as i32],
                )?;
                Ok::<_, rusqlite::Error>(())
            })
            .await?;
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: &VectorFilter,
    ) -> Result<Vec<ScoredId>> {
        let bytes = embedding_to_bytes(vector);
        let project = filter.project_id.clone();
        let exclude_deleted = filter.exclude_deleted;
        let exclude_ids = filter.exclude_ids.clone();

        let hits = self
            .pool
            .run(move |conn| {
                let mut sql = String::from(
                    "SELECT memory_id, vec_distance_cosine(embedding, ?1) AS distance
                     FROM vec_memories
                     WHERE (?2 IS NULL OR project_id = ?2 OR project_id = ?3)",
                );
                if exclude_deleted {
                    sql.push_str(" AND deleted = 0");
                }
                let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![
                    Box::new(bytes),
                    Box::new(project),
                    Box::new(GLOBAL_PROJECT.to_string()),
                ];
                if !exclude_ids.is_empty() {
                    let placeholders: Vec<String> = (0..exclude_ids.len())
                        .map(|i| format!("?{}", i + 4))
                        .collect();
                    sql.push_str(&format!(
                        " AND memory_id NOT IN ({})",
                        placeholders.join(", ")
                    ));
                    for id in &exclude_ids {
                        params.push(Box::new(id.clone()));
                    }
                }
                sql.push_str(&format!(" ORDER BY distance LIMIT {k}"));

                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
                    let id: String = row.get(0)?;
                    let distance: f64 = row.get(1)?;
                    Ok(ScoredId {
                        id,
                        score: 1.0 - distance / 2.0,
                    })
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;
        Ok(hits)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.pool
            .run(move |conn| {
                let existing: rusqlite::Result<i64> = conn.query_row(
                    "SELECT rowid FROM vec_memories WHERE memory_id = ?1",
                    [&id],
                    |row| row.get(0),
                );
                match existing {
                    Ok(rowid) => {
                        conn.execute("DELETE FROM vec_memories WHERE rowid = ?1", [rowid])?;
                        Ok::<_, rusqlite::Error>(())
                    }
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(()),
                    Err(e) => Err(e),
                }
            })
            .await?;
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        let count = self
            .pool
            .run(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM vec_memories WHERE deleted = 0",
                    [],
                    |row| row.get::<_, i64>(0),
                )
            })
            .await?;
        Ok(count as u64)
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    async fn close(&self) {
        self.ready.store(false, Ordering::Relaxed);
    }

    fn backend(&self) -> &'static str {
        "embedded"
    }
}

/// Null object used when no backend could initialize; searches come back
/// empty and upserts report the outage.
pub struct UnavailableVectorStore;

#[async_trait]
impl VectorStore for UnavailableVectorStore {
    async fn upsert(&self, _id: &str, _vector: &[f32], _payload: VectorPayload) -> Result<()> {
        Err(EngramError::VectorUnavailable("no backend".into()))
    }

    async fn search(
        &self,
        _vector: &[f32],
        _k: usize,
        _filter: &VectorFilter,
    ) -> Result<Vec<ScoredId>> {
        Ok(Vec::new())
    }

    async fn delete(&self, _id: &str) -> Result<()> {
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        Ok(0)
    }

    fn is_ready(&self) -> bool {
        false
    }

    async fn close(&self) {}

    fn backend(&self) -> &'static str {
        "unavailable"
    }
}
