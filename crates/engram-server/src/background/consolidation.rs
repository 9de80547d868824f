// background/consolidation.rs
// The sleep cycle: strengthen, decay, scratchpad/tool-log GC, garbage-fact
// cleanup, near-duplicate report, vector sweep, checkpoint, auto-backup.
// Guarded twice: an in-process only-one-running mutex and a cross-process
// advisory scratchpad row with stale takeover.

use std::sync::Arc;
use std::time::Duration;

use crate::backup::auto_backup_if_stale;
use crate::config::GLOBAL_PROJECT;
use crate::db;
use crate::embeddings::{bytes_to_embedding, cosine_similarity};
use crate::engine::Engine;
use crate::error::{EngramError, Result};

/// Advisory lock row key in the global scratchpad namespace.
pub const CONSOLIDATION_LOCK_KEY: &str = "__system_consolidation_lock";

/// Stale advisory locks older than this are taken over.
const LOCK_STALE_SECONDS: i64 = 300;

/// Hard ceiling on a cycle.
const CYCLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Pairs at or above this cosine similarity land in the duplicate report.
const DUPLICATE_THRESHOLD: f32 = 0.85;

/// Rows considered by the pairwise duplicate scan.
const DUPLICATE_SCAN_ROWS: usize = 100;

/// Tool-log retention in days.
const TOOL_LOG_DAYS: i64 = 7;

/// Backup when the newest one is at least this old.
const BACKUP_MAX_AGE_HOURS: u64 = 24;

#[derive(Debug, Default, serde::Serialize)]
pub struct ConsolidationReport {
    pub strengthened: usize,
    pub decayed: usize,
    pub scratchpad_expired: usize,
    pub tool_calls_pruned: usize,
    pub garbage_removed: usize,
    pub duplicate_pairs: Vec<(String, String, f64)>,
    pub vector_ids_swept: usize,
    pub skipped: bool,
}

/// Whether the system has been idle long enough for a cycle to start.
pub async fn is_idle(engine: &Arc<Engine>) -> bool {
    let idle = engine.config.consolidation_idle;
    let last = engine
        .pool
        .try_interact("idle check", |conn| {
            Ok(db::last_tool_call_at_sync(conn)?)
        })
        .await
        .flatten();
    match last.and_then(|ts| crate::utils::parse_sqlite_ts(&ts)) {
        Some(t) => (chrono::Utc::now() - t).num_seconds() >= idle.as_secs() as i64,
        None => true,
    }
}

/// Run one consolidation cycle with both guards and the hard timeout.
pub async fn run_consolidation(engine: &Arc<Engine>) -> Result<ConsolidationReport> {
    // In-process: skip when another cycle is active
    let Ok(_running) = engine.consolidation_guard.try_lock() else {
        tracing::debug!("Consolidation already running, skipping");
        return Ok(ConsolidationReport {
            skipped: true,
            ..Default::default()
        });
    };

    // Cross-process: advisory scratchpad row, stale takeover after 5 min
    let holder = engine.session.id().to_string();
    let acquired = {
        let holder = holder.clone();
        engine
            .pool
            .run(move |conn| {
                db::try_advisory_lock_sync(
                    conn,
                    GLOBAL_PROJECT,
                    CONSOLIDATION_LOCK_KEY,
                    &holder,
                    LOCK_STALE_SECONDS,
                )
            })
            .await?
    };
    if !acquired {
        tracing::debug!("Consolidation advisory lock held elsewhere, skipping");
        return Ok(ConsolidationReport {
            skipped: true,
            ..Default::default()
        });
    }

    let result = tokio::time::timeout(CYCLE_TIMEOUT, cycle_body(engine)).await;

    // Release the advisory lock whether the cycle succeeded or failed
    {
        let holder = holder.clone();
        let _ = engine
            .pool
            .run(move |conn| {
                db::release_advisory_lock_sync(conn, GLOBAL_PROJECT, CONSOLIDATION_LOCK_KEY, &holder)
            })
            .await;
    }

    match result {
        Ok(report) => report,
        Err(_) => Err(EngramError::Cancelled),
    }
}

async fn cycle_body(engine: &Arc<Engine>) -> Result<ConsolidationReport> {
    let started = std::time::Instant::now();

    let guard = engine.lock.acquire().await?;
    let (mut report, deleted_ids) = {
        let result = engine
            .pool
            .run(move |conn| {
                let tx = conn.unchecked_transaction()?;
                let mut report = ConsolidationReport::default();

                // Strengthen: frequently accessed rows gain confidence
                report.strengthened = tx.execute(
                    "UPDATE memories SET confidence = MIN(confidence + 0.05, 1.0)
                     WHERE deleted_at IS NULL
                       AND confidence < 0.95
                       AND access_count > MAX(
                           (SELECT COALESCE(AVG(access_count), 0) FROM memories WHERE deleted_at IS NULL),
                           1)",
                    [],
                )?;

                // Decay: untouched, unimportant rows lose strength
                report.decayed = tx.execute(
                    "UPDATE memories SET strength = MAX(strength - 0.1, 0.1)
                     WHERE deleted_at IS NULL
                       AND last_accessed < datetime('now', '-14 days')
                       AND strength > 0.2
                       AND importance < 0.8",
                    [],
                )?;

                report.scratchpad_expired = db::scratch_gc_sync(&tx)?;
                report.tool_calls_pruned = db::gc_tool_calls_sync(&tx, TOOL_LOG_DAYS)?;

                // Garbage-fact cleanup per project
                let projects: Vec<String> = {
                    let mut stmt = tx.prepare(
                        "SELECT DISTINCT project_id FROM memories WHERE deleted_at IS NULL",
                    )?;
                    let rows = stmt
                        .query_map([], |row| row.get(0))?
                        .collect::<rusqlite::Result<Vec<String>>>()?;
                    rows
                };
                for project in &projects {
                    let garbage = crate::ingest::cleanup_garbage_sync(&tx, project)?;
                    report.garbage_removed += garbage.auto_facts_deleted
                        + garbage.stopword_entities_deleted
                        + garbage.definite_garbage_deleted;
                }

                // Near-duplicate report over the most recent embedded rows
                let recent: Vec<(String, Vec<u8>)> = {
                    let mut stmt = tx.prepare(
                        "SELECT id, embedding FROM memories
                         WHERE deleted_at IS NULL AND embedding IS NOT NULL
                         ORDER BY created_at DESC
                         LIMIT ?1",
                    )?;
                    let rows = stmt
                        .query_map([DUPLICATE_SCAN_ROWS as i64], |row| {
                            Ok((row.get(0)?, row.get(1)?))
                        })?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    rows
                };
                let vectors: Vec<(String, Vec<f32>)> = recent
                    .into_iter()
                    .map(|(id, bytes)| (id, bytes_to_embedding(&bytes)))
                    .collect();
                for i in 0..vectors.len() {
                    for j in (i + 1)..vectors.len() {
                        let sim = cosine_similarity(&vectors[i].1, &vectors[j].1);
                        if sim >= DUPLICATE_THRESHOLD {
                            report.duplicate_pairs.push((
                                vectors[i].0.clone(),
                                vectors[j].0.clone(),
                                sim as f64,
                            ));
                        }
                    }
                }

                // Soft-deleted ids the vector store should drop
                let deleted_ids: Vec<String> = {
                    let mut stmt =
                        tx.prepare("SELECT id FROM memories WHERE deleted_at IS NOT NULL")?;
                    let rows = stmt
                        .query_map([], |row| row.get(0))?
                        .collect::<rusqlite::Result<Vec<String>>>()?;
                    rows
                };

                // Leave a log row behind
                let log_key = format!(
                    "consolidation_log_{}",
                    chrono::Utc::now().format("%Y%m%d%H%M%S")
                );
                let log_value = serde_json::to_string(&serde_json::json!({
                    "strengthened": report.strengthened,
                    "decayed": report.decayed,
                    "duplicates": report.duplicate_pairs.len(),
                }))
                .unwrap_or_default();
                db::scratch_set_sync(
                    &tx,
                    GLOBAL_PROJECT,
                    &log_key,
                    &log_value,
                    Some(30 * 24 * 3600),
                )?;

                tx.commit()?;
                Ok::<_, rusqlite::Error>((report, deleted_ids))
            })
            .await;
        guard.release();
        result?
    };

    // Outside the transaction: vector sweep, checkpoint, auto-backup
    for id in &deleted_ids {
        if engine.vector.delete(id).await.is_ok() {
            report.vector_ids_swept += 1;
        }
    }

    if let Err(e) = engine.pool.wal_checkpoint_truncate().await {
        tracing::debug!("Opportunistic WAL checkpoint skipped: {}", e);
    }

    auto_backup_if_stale(engine, BACKUP_MAX_AGE_HOURS).await;

    tracing::info!(
        strengthened = report.strengthened,
        decayed = report.decayed,
        duplicates = report.duplicate_pairs.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Consolidation cycle complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_engine;

    async fn insert_with_access(engine: &Arc<Engine>, id: &str, access_count: i64) {
        let id = id.to_string();
        engine
            .pool
            .run(move |conn| {
                conn.execute(
                    "INSERT INTO memories (id, project_id, content, memory_type, access_count, confidence)
                     VALUES (?1, 'demo', 'memory ' || ?1, 'fact', ?2, 0.5)",
                    rusqlite::params![id, access_count],
                )
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_strengthening_above_average() {
        let engine = test_engine().await;
        for (id, count) in [("m0", 0), ("m1", 1), ("m5", 5), ("m10", 10)] {
            insert_with_access(&engine, id, count).await;
        }

        let report = run_consolidation(&engine).await.unwrap();
        assert!(!report.skipped);
        // avg = 4; rows above max(avg, 1) are m5 and m10
        assert_eq!(report.strengthened, 2);

        let confidences: Vec<(String, f64)> = engine
            .pool
            .run(|conn| {
                let mut stmt =
                    conn.prepare("SELECT id, confidence FROM memories ORDER BY id")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok::<_, rusqlite::Error>(rows)
            })
            .await
            .unwrap();
        for (id, confidence) in confidences {
            match id.as_str() {
                "m5" | "m10" => assert!((confidence - 0.55).abs() < 1e-9, "{id} strengthened"),
                _ => assert!((confidence - 0.5).abs() < 1e-9, "{id} unchanged"),
            }
        }

        // A consolidation log row was written
        let logs: i64 = engine
            .pool
            .run(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM scratchpad WHERE key LIKE 'consolidation_log_%'",
                    [],
                    |row| row.get(0),
                )
            })
            .await
            .unwrap();
        assert_eq!(logs, 1);
    }

    #[tokio::test]
    async fn test_decay_of_stale_rows() {
        let engine = test_engine().await;
        engine
            .pool
            .run(|conn| {
                conn.execute_batch(
                    "INSERT INTO memories (id, project_id, content, memory_type, strength, importance, last_accessed)
                     VALUES ('old', 'demo', 'stale row', 'fact', 1.0, 0.5, datetime('now', '-20 days'));
                     INSERT INTO memories (id, project_id, content, memory_type, strength, importance, last_accessed)
                     VALUES ('fresh', 'demo', 'fresh row', 'fact', 1.0, 0.5, datetime('now'));
                     INSERT INTO memories (id, project_id, content, memory_type, strength, importance, last_accessed)
                     VALUES ('vital', 'demo', 'important old row', 'fact', 1.0, 0.9, datetime('now', '-20 days'));",
                )?;
                Ok::<_, rusqlite::Error>(())
            })
            .await
            .unwrap();

        let report = run_consolidation(&engine).await.unwrap();
        assert_eq!(report.decayed, 1);

        let strength: f64 = engine
            .pool
            .run(|conn| {
                conn.query_row("SELECT strength FROM memories WHERE id = 'old'", [], |r| {
                    r.get(0)
                })
            })
            .await
            .unwrap();
        assert!((strength - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_advisory_lock_skips_when_held() {
        let engine = test_engine().await;
        engine
            .pool
            .run(|conn| {
                db::try_advisory_lock_sync(
                    conn,
                    GLOBAL_PROJECT,
                    CONSOLIDATION_LOCK_KEY,
                    "someone-else",
                    300,
                )
            })
            .await
            .unwrap();

        let report = run_consolidation(&engine).await.unwrap();
        assert!(report.skipped);
    }

    #[tokio::test]
    async fn test_duplicate_report_and_vector_sweep() {
        let engine = test_engine().await;
        let a = crate::embeddings::embedding_to_bytes(&[1.0, 0.0, 0.0, 0.0]);
        let b = crate::embeddings::embedding_to_bytes(&[0.99, 0.14, 0.0, 0.0]);
        let c = crate::embeddings::embedding_to_bytes(&[0.0, 1.0, 0.0, 0.0]);
        engine
            .pool
            .run(move |conn| {
                conn.execute(
                    "INSERT INTO memories (id, project_id, content, memory_type, embedding) VALUES ('a', 'demo', 'ci runs on every push', 'fact', ?1)",
                    [&a],
                )?;
                conn.execute(
                    "INSERT INTO memories (id, project_id, content, memory_type, embedding) VALUES ('b', 'demo', 'ci pipeline runs per push', 'fact', ?1)",
                    [&b],
                )?;
                conn.execute(
                    "INSERT INTO memories (id, project_id, content, memory_type, embedding) VALUES ('c', 'demo', 'deploys happen on friday', 'fact', ?1)",
                    [&c],
                )?;
                conn.execute(
                    "INSERT INTO memories (id, project_id, content, memory_type, deleted_at) VALUES ('dead', 'demo', 'removed earlier row', 'fact', datetime('now'))",
                    [],
                )?;
                Ok::<_, rusqlite::Error>(())
            })
            .await
            .unwrap();

        let report = run_consolidation(&engine).await.unwrap();
        assert_eq!(report.duplicate_pairs.len(), 1);
        let (x, y, sim) = &report.duplicate_pairs[0];
        let mut pair = [x.as_str(), y.as_str()];
        pair.sort_unstable();
        assert_eq!(pair, ["a", "b"]);
        assert!(*sim >= 0.85);
        assert_eq!(report.vector_ids_swept, 1);
    }
}
