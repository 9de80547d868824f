// tools/system.rs
// Operational tools: stats, lock stats, consolidation trigger, integrity.

use serde_json::{Value, json};

use crate::background::consolidation::run_consolidation;
use crate::engine::Engine;
use crate::error::Result;

pub async fn stats(engine: &std::sync::Arc<Engine>) -> Result<Value> {
    let (memories, live, entities, edges): (i64, i64, i64, i64) = engine
        .pool
        .run(|conn| {
            let memories =
                conn.query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))?;
            let live = conn.query_row(
                "SELECT COUNT(*) FROM memories WHERE deleted_at IS NULL",
                [],
                |r| r.get(0),
            )?;
            let entities = conn.query_row("SELECT COUNT(*) FROM entities", [], |r| r.get(0))?;
            let edges = conn.query_row("SELECT COUNT(*) FROM edges", [], |r| r.get(0))?;
            Ok::<_, rusqlite::Error>((memories, live, entities, edges))
        })
        .await?;

    let vector_count = engine.vector.count().await.unwrap_or(0);

    Ok(json!({
        "project": engine.project_id().await,
        "session_id": engine.session.id(),
        "memories": { "total": memories, "live": live },
        "entities": entities,
        "edges": edges,
        "vector": {
            "backend": engine.vector.backend(),
            "ready": engine.vector.is_ready(),
            "count": vector_count,
        },
        "embeddings_configured": engine.embeddings.is_some(),
    }))
}

pub fn lock_stats(engine: &Engine) -> Result<Value> {
    Ok(serde_json::to_value(engine.lock.stats())?)
}

pub async fn consolidate(engine: &std::sync::Arc<Engine>) -> Result<Value> {
    let report = run_consolidation(engine).await?;
    Ok(serde_json::to_value(report)?)
}

pub async fn integrity(engine: &Engine) -> Result<Value> {
    let ok = engine.pool.integrity_check().await?;
    Ok(json!({ "ok": ok }))
}
