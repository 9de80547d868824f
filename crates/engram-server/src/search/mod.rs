// crates/engram-server/src/search/mod.rs
// Hybrid retrieval: keyword + semantic fired concurrently, fused with
// importance.

pub mod keyword;
pub mod semantic;

use std::collections::HashMap;

use engram_types::{Memory, SearchHit};

use crate::engine::Engine;
use crate::error::Result;
use crate::memory::scoring;
use crate::utils::truncate_to_chars;

/// Fusion weights: combined = 0.35*keyword + 0.50*semantic + 0.15*importance.
const KEYWORD_WEIGHT: f64 = 0.35;
const SEMANTIC_WEIGHT: f64 = 0.50;
const IMPORTANCE_WEIGHT: f64 = 0.15;

/// Result content is truncated to this many chars in summaries.
pub const SUMMARY_MAX_CHARS: usize = 200;

struct FusionEntry {
    memory: Memory,
    keyword_score: f64,
    semantic_score: f64,
    effective_confidence: f64,
}

impl Engine {
    /// Hybrid search: keyword (BM25 or LIKE) and semantic KNN run
    /// concurrently, results fused and stably ordered by
    /// (combined desc, confidence desc, id asc).
    pub async fn hybrid_search(
        &self,
        query: &str,
        project_id: &str,
        k: usize,
        confidence_threshold: f64,
    ) -> Result<Vec<SearchHit>> {
        let k = k.max(1);
        let now = chrono::Utc::now();

        let keyword_fut = {
            let query = query.to_string();
            let project = project_id.to_string();
            self.pool
                .run(move |conn| keyword::keyword_search_sync(conn, &query, &project, k * 4))
        };

        let semantic_fut = async {
            let query_vec = match &self.embeddings {
                Some(client) if !query.is_empty() => match client.embed(query).await {
                    Ok(v) => Some(v),
                    Err(e) => {
                        tracing::warn!("Query embed failed, keyword-only search: {}", e);
                        None
                    }
                },
                _ => None,
            };
            match query_vec {
                Some(v) => {
                    semantic::semantic_search_with_vector(
                        &self.pool,
                        &self.vector,
                        &v,
                        project_id,
                        k * 4,
                    )
                    .await
                }
                None => Ok(Vec::new()),
            }
        };

        let (keyword_rows, semantic_rows) = tokio::join!(keyword_fut, semantic_fut);
        let keyword_rows = keyword_rows.unwrap_or_else(|e| {
            tracing::warn!("Keyword search failed: {}", e);
            Vec::new()
        });
        let semantic_rows = semantic_rows.unwrap_or_else(|e| {
            tracing::warn!("Semantic search failed: {}", e);
            Vec::new()
        });

        let mut fused: HashMap<String, FusionEntry> = HashMap::new();

        for (memory, score) in keyword_rows {
            let effective = scoring::effective_confidence(&memory, now);
            if effective < confidence_threshold || !scoring::is_retained(&memory, now) {
                continue;
            }
            fused.insert(
                memory.id.clone(),
                FusionEntry {
                    memory,
                    keyword_score: score,
                    semantic_score: 0.0,
                    effective_confidence: effective,
                },
            );
        }

        for (memory, score) in semantic_rows {
            let effective = scoring::effective_confidence(&memory, now);
            if effective < confidence_threshold {
                continue;
            }
            match fused.get_mut(&memory.id) {
                Some(entry) => entry.semantic_score = score,
                None => {
                    fused.insert(
                        memory.id.clone(),
                        FusionEntry {
                            memory,
                            keyword_score: 0.0,
                            semantic_score: score,
                            effective_confidence: effective,
                        },
                    );
                }
            }
        }

        let mut hits: Vec<SearchHit> = fused
            .into_values()
            .map(|entry| {
                let combined = KEYWORD_WEIGHT * entry.keyword_score
                    + SEMANTIC_WEIGHT * entry.semantic_score
                    + IMPORTANCE_WEIGHT * entry.memory.importance;
                let truncated = truncate_to_chars(&entry.memory.content, SUMMARY_MAX_CHARS);
                SearchHit {
                    id: entry.memory.id.clone(),
                    content_truncated: truncated.len() < entry.memory.content.len(),
                    content: truncated.to_string(),
                    memory_type: entry.memory.memory_type,
                    keyword_score: entry.keyword_score,
                    semantic_score: entry.semantic_score,
                    combined_score: combined,
                    confidence: entry.effective_confidence,
                    importance: entry.memory.importance,
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.combined_score
                .partial_cmp(&a.combined_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    b.confidence
                        .partial_cmp(&a.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a.id.cmp(&b.id))
        });
        hits.truncate(k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_engine;
    use crate::memory::StoreParams;
    use engram_types::MemoryType;

    async fn store(engine: &Engine, content: &str, importance: f64) -> String {
        engine
            .store_memory(
                "demo",
                StoreParams {
                    content: content.to_string(),
                    memory_type: MemoryType::Fact,
                    tags: vec![],
                    importance: Some(importance),
                    confidence: Some(0.8),
                },
            )
            .await
            .unwrap()
            .memory
            .id
    }

    #[tokio::test]
    async fn test_fusion_order_keyword_and_importance() {
        let engine = test_engine().await;
        let m1 = store(&engine, "Qdrant is our vector store", 0.8).await;
        let m2 = store(&engine, "We use sqlite-vec as a fallback vector store", 0.5).await;
        let _m3 = store(&engine, "Lunch is at noon", 0.5).await;

        let hits = engine.hybrid_search("vector store", "demo", 10, 0.0).await.unwrap();
        assert!(hits.len() >= 2);
        assert_eq!(hits[0].id, m1);
        assert_eq!(hits[1].id, m2);
        assert!(hits[0].combined_score > hits[1].combined_score);
        // M3 has no keyword match and there is no semantic signal: absent
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_query_returns_empty_without_embedder() {
        let engine = test_engine().await;
        store(&engine, "anything at all", 0.5).await;
        let hits = engine.hybrid_search("", "demo", 10, 0.0).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_confidence_threshold_filters() {
        let engine = test_engine().await;
        engine
            .store_memory(
                "demo",
                StoreParams {
                    content: "low confidence vector note".to_string(),
                    memory_type: MemoryType::Note,
                    tags: vec![],
                    importance: Some(0.5),
                    confidence: Some(0.2),
                },
            )
            .await
            .unwrap();

        let all = engine.hybrid_search("vector", "demo", 10, 0.0).await.unwrap();
        assert_eq!(all.len(), 1);
        let strict = engine.hybrid_search("vector", "demo", 10, 0.9).await.unwrap();
        assert!(strict.is_empty());
    }

    #[tokio::test]
    async fn test_summary_truncation_flag() {
        let engine = test_engine().await;
        // Multibyte filler: the budget is chars, not bytes
        let long = format!("vector {}", "é".repeat(400));
        store(&engine, &long, 0.5).await;

        let hits = engine.hybrid_search("vector", "demo", 10, 0.0).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content_truncated);
        assert_eq!(hits[0].content.chars().count(), SUMMARY_MAX_CHARS);
    }

    #[tokio::test]
    async fn test_tie_break_stable_by_id() {
        let engine = test_engine().await;
        // Two identical-scoring rows; order must be ascending id
        store(&engine, "tie breaker row one", 0.5).await;
        store(&engine, "tie breaker row two", 0.5).await;

        let hits = engine.hybrid_search("tie breaker row", "demo", 10, 0.0).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].id < hits[1].id);
    }
}
