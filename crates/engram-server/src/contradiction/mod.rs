// crates/engram-server/src/contradiction/mod.rs
// Contradiction pipeline: candidate recall by semantic similarity, lexical
// screens, optional NLI fusion, bi-temporal edges + pending resolution rows.

pub mod lexical;

use std::sync::Arc;

use engram_types::{
    Contradiction, ContradictionKind, Memory, ResolutionType, SuggestedAction,
};
use rusqlite::Connection;

use crate::db::{self, DatabasePool};
use crate::embeddings::{EmbeddingClient, bytes_to_embedding, cosine_similarity};
use crate::error::{EngramError, Result};
use crate::lock::WriteLock;
use crate::nli::NliClient;
use crate::utils::{new_id, truncate};
use crate::vector::{VectorFilter, VectorStore};

/// Minimum semantic similarity for a memory to be considered a candidate.
pub const SIMILARITY_THRESHOLD: f64 = 0.65;

/// Max candidates pulled per detection.
const MAX_CANDIDATES: usize = 16;

/// Recent rows scanned when no embeddings are available at all.
const LEXICAL_FALLBACK_ROWS: usize = 32;

/// Candidates handed to the NLI pass, when wired in.
const NLI_TOP_CANDIDATES: usize = 4;

/// NLI contradiction probability that promotes a pair on its own.
const NLI_THRESHOLD: f64 = 0.6;

/// Contradictions at or above this confidence become edges + resolutions.
pub const RECORD_THRESHOLD: f64 = 0.5;

/// Reported confidence never exceeds this ceiling.
const CONFIDENCE_CEILING: f64 = 0.95;

/// One recalled candidate with its semantic similarity (0 when unknown).
struct Candidate {
    memory: Memory,
    similarity: f64,
}

/// Detect contradictions between `content` and existing memories in
/// `project_id` (plus global), excluding `exclude_id`.
///
/// Failures anywhere in the pipeline degrade: no embedder means lexical-only
/// screening over recent rows, a down vector store means the in-SQL cosine
/// fallback. This function never blocks a store.
pub async fn detect_contradictions(
    pool: &Arc<DatabasePool>,
    vector: &Arc<dyn VectorStore>,
    embeddings: Option<&Arc<EmbeddingClient>>,
    nli: Option<&Arc<NliClient>>,
    content: &str,
    project_id: &str,
    exclude_id: Option<&str>,
) -> Vec<Contradiction> {
    let query_vec = match embeddings {
        Some(client) => match client.embed(content).await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("Contradiction embed failed, lexical-only: {}", e);
                None
            }
        },
        None => None,
    };

    let candidates = match recall_candidates(pool, vector, query_vec.as_deref(), project_id, exclude_id).await
    {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("Contradiction candidate recall failed: {}", e);
            return Vec::new();
        }
    };

    let mut results: Vec<Contradiction> = Vec::new();
    for candidate in &candidates {
        if let Some(hit) = lexical::screen_pair(content, &candidate.memory.content) {
            let confidence = damp_confidence(hit.confidence, candidate.similarity);
            results.push(Contradiction {
                id: candidate.memory.id.clone(),
                kind: hit.kind,
                similarity: candidate.similarity,
                confidence,
                explanation: hit.explanation,
                suggested_action: suggest_action(hit.kind, confidence),
                preview: truncate(&candidate.memory.content, 100),
            });
        }
    }

    // Optional NLI pass over the top candidates, fused by max
    if let Some(nli) = nli {
        for candidate in candidates.iter().take(NLI_TOP_CANDIDATES) {
            match nli.score(&candidate.memory.content, content).await {
                Ok(scores) if scores.contradiction >= NLI_THRESHOLD => {
                    let confidence =
                        damp_confidence(scores.contradiction, candidate.similarity);
                    if let Some(existing) =
                        results.iter_mut().find(|r| r.id == candidate.memory.id)
                    {
                        existing.confidence = existing.confidence.max(confidence);
                    } else {
                        results.push(Contradiction {
                            id: candidate.memory.id.clone(),
                            kind: ContradictionKind::Semantic,
                            similarity: candidate.similarity,
                            confidence,
                            explanation: format!(
                                "entailment model scored contradiction at {:.2}",
                                scores.contradiction
                            ),
                            suggested_action: suggest_action(
                                ContradictionKind::Semantic,
                                confidence,
                            ),
                            preview: truncate(&candidate.memory.content, 100),
                        });
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("NLI scoring failed: {}", e),
            }
        }
    }

    results.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results
}

/// Candidate recall: vector store when ready, in-SQL cosine otherwise, and a
/// recent-rows lexical fallback when there is no query vector at all.
async fn recall_candidates(
    pool: &Arc<DatabasePool>,
    vector: &Arc<dyn VectorStore>,
    query_vec: Option<&[f32]>,
    project_id: &str,
    exclude_id: Option<&str>,
) -> Result<Vec<Candidate>> {
    let project = project_id.to_string();
    let exclude = exclude_id.map(|s| s.to_string());

    if let Some(query) = query_vec {
        if vector.is_ready() {
            let filter = VectorFilter {
                project_id: Some(project.clone()),
                exclude_deleted: true,
                exclude_ids: exclude.clone().into_iter().collect(),
            };
            let hits = vector.search(query, MAX_CANDIDATES, &filter).await?;
            let ids: Vec<String> = hits
                .iter()
                .filter(|h| h.score >= SIMILARITY_THRESHOLD)
                .map(|h| h.id.clone())
                .collect();
            let scores: std::collections::HashMap<String, f64> =
                hits.into_iter().map(|h| (h.id, h.score)).collect();

            let memories = pool
                .run(move |conn| {
                    let mut out = Vec::new();
                    for id in &ids {
                        if let Some(m) = db::get_memory_sync(conn, id)?
                            && m.deleted_at.is_none()
                        {
                            out.push(m);
                        }
                    }
                    Ok::<_, rusqlite::Error>(out)
                })
                .await?;

            return Ok(memories
                .into_iter()
                .map(|m| {
                    let similarity = scores.get(&m.id).copied().unwrap_or(0.0);
                    Candidate { memory: m, similarity }
                })
                .collect());
        }

        // In-SQL cosine over all live rows with embeddings
        let query = query.to_vec();
        let rows = pool
            .run(move |conn| db::live_embedded_memories_sync(conn, &project))
            .await?;
        let mut candidates: Vec<Candidate> = rows
            .into_iter()
            .filter(|(m, _)| exclude.as_deref() != Some(m.id.as_str()))
            .filter_map(|(m, bytes)| {
                let embedding = bytes_to_embedding(&bytes);
                let similarity = cosine_similarity(&query, &embedding) as f64;
                (similarity >= SIMILARITY_THRESHOLD).then_some(Candidate {
                    memory: m,
                    similarity,
                })
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(MAX_CANDIDATES);
        return Ok(candidates);
    }

    // No query vector: screen the most recent rows lexically
    let rows = pool
        .run(move |conn| {
            db::list_memories_sync(conn, &project, None, None, false, LEXICAL_FALLBACK_ROWS, 0)
        })
        .await?;
    Ok(rows
        .into_iter()
        .filter(|m| exclude.as_deref() != Some(m.id.as_str()))
        .map(|memory| Candidate {
            memory,
            similarity: 0.0,
        })
        .collect())
}

/// Damp a screen confidence by the pair's semantic similarity. Pairs without
/// a known similarity keep their raw confidence; everything is ceilinged.
fn damp_confidence(confidence: f64, similarity: f64) -> f64 {
    let damped = if similarity > 0.0 {
        confidence * (0.6 + 0.4 * similarity)
    } else {
        confidence
    };
    damped.min(CONFIDENCE_CEILING)
}

fn suggest_action(kind: ContradictionKind, confidence: f64) -> SuggestedAction {
    match kind {
        ContradictionKind::Negation | ContradictionKind::Factual if confidence >= 0.7 => {
            SuggestedAction::Replace
        }
        ContradictionKind::Semantic => SuggestedAction::KeepBoth,
        ContradictionKind::Temporal => SuggestedAction::Merge,
        _ => SuggestedAction::Flag,
    }
}

/// Record detected contradictions against a freshly stored memory: one
/// `potential_contradiction` edge plus a pending resolution per conflict, and
/// a counter bump on both sides. Runs inside the store's write-lock section.
pub fn record_contradictions_sync(
    conn: &Connection,
    project_id: &str,
    new_memory_id: &str,
    contradictions: &[Contradiction],
) -> rusqlite::Result<usize> {
    let mut recorded = 0;
    for c in contradictions {
        if c.confidence < RECORD_THRESHOLD {
            continue;
        }
        let edge_id = new_id();
        let metadata = serde_json::json!({
            "kind": c.kind.as_str(),
            "similarity": c.similarity,
            "explanation": c.explanation,
        })
        .to_string();
        db::create_edge_sync(
            conn,
            &edge_id,
            project_id,
            new_memory_id,
            &c.id,
            "potential_contradiction",
            c.confidence,
            Some(&metadata),
        )?;
        db::insert_pending_resolution_sync(
            conn,
            &new_id(),
            project_id,
            new_memory_id,
            &c.id,
            &edge_id,
        )?;
        db::bump_contradiction_count_sync(conn, new_memory_id)?;
        db::bump_contradiction_count_sync(conn, &c.id)?;
        recorded += 1;
    }
    Ok(recorded)
}

/// Outcome of a resolution, for the wire.
#[derive(Debug, serde::Serialize)]
pub struct ResolutionOutcome {
    pub resolution_id: String,
    pub resolution_type: String,
    /// Id of the surviving or newly merged memory, when one exists.
    pub kept_id: Option<String>,
    pub already_resolved: bool,
}

/// Apply a resolution decision to a pending conflict.
pub async fn resolve_contradiction(
    pool: &Arc<DatabasePool>,
    lock: &WriteLock,
    resolution_id: &str,
    resolution_type: ResolutionType,
    note: Option<String>,
    merged_content: Option<String>,
) -> Result<ResolutionOutcome> {
    if resolution_type == ResolutionType::Pending {
        return Err(EngramError::InvalidInput(
            "resolution_type must not be 'pending'".to_string(),
        ));
    }
    if resolution_type == ResolutionType::Merge && merged_content.is_none() {
        return Err(EngramError::InvalidInput(
            "merge requires merged_content".to_string(),
        ));
    }

    let guard = lock.acquire().await?;
    let id = resolution_id.to_string();
    let result = pool
        .run(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let Some(resolution) = db::get_resolution_sync(&tx, &id)? else {
                return Ok::<_, rusqlite::Error>(None);
            };
            if resolution.resolution_type != ResolutionType::Pending {
                return Ok(Some(ResolutionOutcome {
                    resolution_id: resolution.id,
                    resolution_type: resolution.resolution_type.as_str().to_string(),
                    kept_id: resolution.chosen_id,
                    already_resolved: true,
                }));
            }

            let kept_id = match resolution_type {
                ResolutionType::KeepFirst => {
                    db::soft_delete_memory_sync(&tx, &resolution.memory_b)?;
                    Some(resolution.memory_a.clone())
                }
                ResolutionType::KeepSecond => {
                    db::soft_delete_memory_sync(&tx, &resolution.memory_a)?;
                    Some(resolution.memory_b.clone())
                }
                ResolutionType::KeepBoth => None,
                ResolutionType::Merge => {
                    let merged = merged_content.clone().unwrap_or_default();
                    let merged_id = new_id();
                    db::insert_memory_sync(
                        &tx,
                        db::InsertMemoryParams {
                            id: &merged_id,
                            project_id: &resolution.project_id,
                            content: &merged,
                            memory_type: engram_types::MemoryType::Fact,
                            tags: &[],
                            importance: 0.5,
                            confidence: 0.7,
                            embedding: None,
                        },
                    )?;
                    db::soft_delete_memory_sync(&tx, &resolution.memory_a)?;
                    db::soft_delete_memory_sync(&tx, &resolution.memory_b)?;
                    Some(merged_id)
                }
                ResolutionType::DeleteBoth => {
                    db::soft_delete_memory_sync(&tx, &resolution.memory_a)?;
                    db::soft_delete_memory_sync(&tx, &resolution.memory_b)?;
                    None
                }
                ResolutionType::Pending => unreachable!(),
            };

            db::invalidate_edge_sync(&tx, &resolution.edge_id)?;
            db::mark_resolved_sync(
                &tx,
                &resolution.id,
                resolution_type,
                kept_id.as_deref(),
                note.as_deref(),
            )?;
            tx.commit()?;

            Ok(Some(ResolutionOutcome {
                resolution_id: resolution.id,
                resolution_type: resolution_type.as_str().to_string(),
                kept_id,
                already_resolved: false,
            }))
        })
        .await;
    guard.release();

    result?.ok_or_else(|| EngramError::NotFound(format!("resolution {resolution_id}")))
}

/// Report produced by a contradiction scan.
#[derive(Debug, serde::Serialize)]
pub struct ScanReport {
    pub live_edges: usize,
    pub resolutions_created: usize,
    pub auto_resolved: usize,
}

/// Walk all live `potential_contradiction` edges, backfill missing resolution
/// rows, and optionally auto-resolve clear negation pairs with the
/// newer-supersedes-older policy.
pub async fn scan_contradictions(
    pool: &Arc<DatabasePool>,
    lock: &WriteLock,
    project_id: &str,
    auto_resolve: bool,
) -> Result<ScanReport> {
    let guard = lock.acquire().await?;
    let project = project_id.to_string();
    let result = pool
        .run(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let edges = db::live_contradiction_edges_sync(&tx, &project)?;
            let live_edges = edges.len();
            let mut resolutions_created = 0;
            let mut auto_resolved = 0;

            for edge in &edges {
                let created = db::insert_pending_resolution_sync(
                    &tx,
                    &new_id(),
                    &project,
                    &edge.from_id,
                    &edge.to_id,
                    &edge.id,
                )?;
                if created {
                    resolutions_created += 1;
                }

                if !auto_resolve || edge.confidence < 0.75 {
                    continue;
                }
                let (Some(newer), Some(older)) = (
                    db::get_memory_sync(&tx, &edge.from_id)?,
                    db::get_memory_sync(&tx, &edge.to_id)?,
                ) else {
                    continue;
                };
                // Newer-supersedes-older only for clear negation pairs
                if lexical::check_negation(&newer.content, &older.content).is_none() {
                    continue;
                }
                let (keep, drop_id, keep_type) = if newer.created_at >= older.created_at {
                    (newer.id.clone(), older.id.clone(), ResolutionType::KeepFirst)
                } else {
                    (older.id.clone(), newer.id.clone(), ResolutionType::KeepSecond)
                };
                db::soft_delete_memory_sync(&tx, &drop_id)?;
                db::invalidate_edge_sync(&tx, &edge.id)?;
                // The resolution row is keyed by edge id; find and mark it
                let resolution_id: Option<String> = {
                    use rusqlite::OptionalExtension;
                    tx.query_row(
                        "SELECT id FROM contradiction_resolutions WHERE edge_id = ?1",
                        [&edge.id],
                        |row| row.get(0),
                    )
                    .optional()?
                };
                if let Some(rid) = resolution_id {
                    db::mark_resolved_sync(
                        &tx,
                        &rid,
                        keep_type,
                        Some(&keep),
                        Some("auto: newer supersedes older"),
                    )?;
                    auto_resolved += 1;
                }
            }

            tx.commit()?;
            Ok::<_, rusqlite::Error>(ScanReport {
                live_edges,
                resolutions_created,
                auto_resolved,
            })
        })
        .await;
    guard.release();
    Ok(result?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_damp_confidence() {
        // Unknown similarity keeps raw confidence
        assert!((damp_confidence(0.8, 0.0) - 0.8).abs() < 1e-9);
        // Perfect similarity keeps raw confidence
        assert!((damp_confidence(0.8, 1.0) - 0.8).abs() < 1e-9);
        // Borderline similarity damps
        assert!(damp_confidence(0.8, 0.65) < 0.8);
        // Ceiling holds
        assert!(damp_confidence(1.5, 1.0) <= CONFIDENCE_CEILING);
    }

    #[test]
    fn test_suggest_action_mapping() {
        assert_eq!(
            suggest_action(ContradictionKind::Negation, 0.8),
            SuggestedAction::Replace
        );
        assert_eq!(
            suggest_action(ContradictionKind::Negation, 0.6),
            SuggestedAction::Flag
        );
        assert_eq!(
            suggest_action(ContradictionKind::Semantic, 0.9),
            SuggestedAction::KeepBoth
        );
        assert_eq!(
            suggest_action(ContradictionKind::Antonym, 0.9),
            SuggestedAction::Flag
        );
    }

    #[test]
    fn test_record_contradictions_sync() {
        let conn = crate::db::test_support::setup_test_connection();
        for id in ["aaa", "bbb"] {
            crate::db::insert_memory_sync(
                &conn,
                crate::db::InsertMemoryParams {
                    id,
                    project_id: "demo",
                    content: "x",
                    memory_type: engram_types::MemoryType::Fact,
                    tags: &[],
                    importance: 0.5,
                    confidence: 0.5,
                    embedding: None,
                },
            )
            .unwrap();
        }

        let contradictions = vec![
            Contradiction {
                id: "bbb".into(),
                kind: ContradictionKind::Negation,
                similarity: 0.9,
                confidence: 0.8,
                explanation: "test".into(),
                suggested_action: SuggestedAction::Replace,
                preview: "x".into(),
            },
            // Below threshold; not recorded
            Contradiction {
                id: "bbb".into(),
                kind: ContradictionKind::Antonym,
                similarity: 0.7,
                confidence: 0.3,
                explanation: "weak".into(),
                suggested_action: SuggestedAction::Flag,
                preview: "x".into(),
            },
        ];

        let recorded =
            record_contradictions_sync(&conn, "demo", "aaa", &contradictions).unwrap();
        assert_eq!(recorded, 1);

        let edges = crate::db::live_contradiction_edges_sync(&conn, "demo").unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].from_id, "aaa");
        assert_eq!(edges[0].to_id, "bbb");

        let pending = crate::db::pending_resolutions_sync(&conn, "demo", 10).unwrap();
        assert_eq!(pending.len(), 1);

        let a = crate::db::get_memory_sync(&conn, "aaa").unwrap().unwrap();
        let b = crate::db::get_memory_sync(&conn, "bbb").unwrap().unwrap();
        assert_eq!(a.contradiction_count, 1);
        assert_eq!(b.contradiction_count, 1);
    }
}
