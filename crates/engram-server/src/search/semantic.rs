// search/semantic.rs
// Semantic KNN over memory embeddings: vector store when ready, in-SQL
// cosine over live embedded rows otherwise.

use std::sync::Arc;

use engram_types::Memory;

use crate::db::{self, DatabasePool};
use crate::embeddings::{bytes_to_embedding, cosine_similarity};
use crate::error::Result;
use crate::vector::{VectorFilter, VectorStore};

/// Semantic hits below this score are dropped.
pub const MIN_SEMANTIC_SCORE: f64 = 0.1;

/// KNN by query vector. Returns (memory, score) with score in [0, 1],
/// descending, already filtered by MIN_SEMANTIC_SCORE and excluding
/// soft-deleted rows.
pub async fn semantic_search_with_vector(
    pool: &Arc<DatabasePool>,
    vector_store: &Arc<dyn VectorStore>,
    query_vec: &[f32],
    project_id: &str,
    k: usize,
) -> Result<Vec<(Memory, f64)>> {
    if vector_store.is_ready() {
        let filter = VectorFilter {
            project_id: Some(project_id.to_string()),
            exclude_deleted: true,
            exclude_ids: Vec::new(),
        };
        let hits = vector_store.search(query_vec, k, &filter).await?;
        let ids: Vec<(String, f64)> = hits
            .into_iter()
            .filter(|h| h.score > MIN_SEMANTIC_SCORE)
            .map(|h| (h.id, h.score))
            .collect();

        let rows = pool
            .run(move |conn| {
                let mut out = Vec::new();
                for (id, score) in &ids {
                    if let Some(m) = db::get_memory_sync(conn, id)?
                        && m.deleted_at.is_none()
                    {
                        out.push((m, *score));
                    }
                }
                Ok::<_, rusqlite::Error>(out)
            })
            .await?;
        return Ok(rows);
    }

    // Fallback: cosine over all live rows with embeddings
    let project = project_id.to_string();
    let query = query_vec.to_vec();
    let rows = pool
        .run(move |conn| db::live_embedded_memories_sync(conn, &project))
        .await?;

    let mut scored: Vec<(Memory, f64)> = rows
        .into_iter()
        .filter_map(|(m, bytes)| {
            let embedding = bytes_to_embedding(&bytes);
            let cos = cosine_similarity(&query, &embedding) as f64;
            // Same mapping both backends use: 1 - cosine_distance/2
            let score = (cos + 1.0) / 2.0;
            (score > MIN_SEMANTIC_SCORE).then_some((m, score))
        })
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);
    Ok(scored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabasePool;
    use crate::embeddings::{embedding_to_bytes, l2_normalize};
    use crate::vector::EmbeddedVectorStore;

    async fn setup() -> (Arc<DatabasePool>, Arc<dyn VectorStore>) {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        let store: Arc<dyn VectorStore> =
            Arc::new(EmbeddedVectorStore::open(pool.clone(), 4).await.unwrap());
        (pool, store)
    }

    async fn insert_with_embedding(
        pool: &Arc<DatabasePool>,
        store: &Arc<dyn VectorStore>,
        id: &str,
        content: &str,
        vec: Vec<f32>,
    ) {
        let vec = l2_normalize(vec);
        let bytes = embedding_to_bytes(&vec);
        let id_owned = id.to_string();
        let content = content.to_string();
        pool.run(move |conn| {
            conn.execute(
                "INSERT INTO memories (id, project_id, content, memory_type, embedding) VALUES (?, 'demo', ?, 'fact', ?)",
                rusqlite::params![id_owned, content, bytes],
            )
        })
        .await
        .unwrap();
        store
            .upsert(
                id,
                &vec,
                crate::vector::VectorPayload {
                    project_id: "demo".to_string(),
                    deleted: false,
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_vector_store_path_ranking() {
        let (pool, store) = setup().await;
        insert_with_embedding(&pool, &store, "aaa", "close", vec![1.0, 0.0, 0.0, 0.0]).await;
        insert_with_embedding(&pool, &store, "bbb", "near", vec![0.8, 0.2, 0.0, 0.0]).await;
        insert_with_embedding(&pool, &store, "ccc", "far", vec![0.0, 0.0, 1.0, 0.0]).await;

        let query = l2_normalize(vec![1.0, 0.0, 0.0, 0.0]);
        let hits = semantic_search_with_vector(&pool, &store, &query, "demo", 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].0.id, "aaa");
        assert_eq!(hits[1].0.id, "bbb");
        assert!(hits[0].1 > hits[1].1 && hits[1].1 > hits[2].1);
    }

    #[tokio::test]
    async fn test_fallback_path_matches_store_ranking() {
        let (pool, store) = setup().await;
        insert_with_embedding(&pool, &store, "aaa", "close", vec![1.0, 0.0, 0.0, 0.0]).await;
        insert_with_embedding(&pool, &store, "bbb", "near", vec![0.8, 0.2, 0.0, 0.0]).await;
        insert_with_embedding(&pool, &store, "ccc", "far", vec![0.0, 0.0, 1.0, 0.0]).await;

        let query = l2_normalize(vec![1.0, 0.0, 0.0, 0.0]);
        let via_store = semantic_search_with_vector(&pool, &store, &query, "demo", 10)
            .await
            .unwrap();

        store.close().await; // forces the in-SQL fallback
        let via_sql = semantic_search_with_vector(&pool, &store, &query, "demo", 10)
            .await
            .unwrap();

        let ids_store: Vec<&str> = via_store.iter().map(|(m, _)| m.id.as_str()).collect();
        let ids_sql: Vec<&str> = via_sql.iter().map(|(m, _)| m.id.as_str()).collect();
        assert_eq!(ids_store, ids_sql);
        for (a, b) in via_store.iter().zip(via_sql.iter()) {
            assert!((a.1 - b.1).abs() < 1e-5, "scores must agree across backends");
        }
    }

    #[tokio::test]
    async fn test_soft_deleted_rows_excluded() {
        let (pool, store) = setup().await;
        insert_with_embedding(&pool, &store, "aaa", "gone", vec![1.0, 0.0, 0.0, 0.0]).await;
        pool.run(|conn| {
            conn.execute(
                "UPDATE memories SET deleted_at = CURRENT_TIMESTAMP WHERE id = 'aaa'",
                [],
            )
        })
        .await
        .unwrap();

        let query = l2_normalize(vec![1.0, 0.0, 0.0, 0.0]);
        let hits = semantic_search_with_vector(&pool, &store, &query, "demo", 10)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}
