// background/embedder.rs
// Lazy embedding worker: drains memories with NULL embeddings. The SQL table
// is the queue; the embedding computation runs outside the write lock, only
// the byte write and the sibling project_id read happen inside it.

use std::sync::Arc;

use crate::db;
use crate::embeddings::embedding_to_bytes;
use crate::engine::Engine;
use crate::vector::VectorPayload;

/// One worker pass. Per-row failures are isolated: one bad row does not stop
/// the batch. Returns the number of rows embedded.
pub async fn process_pending_embeddings(engine: &Arc<Engine>) -> Result<usize, String> {
    let Some(embeddings) = engine.embeddings.clone() else {
        return Ok(0);
    };

    let batch = engine.config.embed_batch;
    let pending = engine
        .pool
        .run(move |conn| db::find_memories_without_embeddings_sync(conn, batch))
        .await
        .map_err(|e| e.to_string())?;
    if pending.is_empty() {
        return Ok(0);
    }

    let mut stored = 0usize;
    let mut failed = 0usize;
    for memory in pending {
        // Embed outside the lock
        let vector = match embeddings.embed(&memory.content).await {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(id = %memory.id, "Embed failed: {}", e);
                failed += 1;
                continue;
            }
        };
        let bytes = embedding_to_bytes(&vector);

        // Write the bytes and re-read project_id inside the lock
        let guard = match engine.lock.acquire().await {
            Ok(g) => g,
            Err(e) => return Err(e.to_string()),
        };
        let project = {
            let id = memory.id.clone();
            let result = engine
                .pool
                .run(move |conn| db::store_embedding_sync(conn, &id, &bytes))
                .await;
            guard.release();
            result
        };

        let project = match project {
            Ok(Some(p)) => p,
            Ok(None) => continue, // row deleted while we were embedding
            Err(e) => {
                tracing::warn!(id = %memory.id, "Embedding write failed: {}", e);
                failed += 1;
                continue;
            }
        };

        // Upsert to the vector store outside the lock
        if let Err(e) = engine
            .vector
            .upsert(
                &memory.id,
                &vector,
                VectorPayload {
                    project_id: project,
                    deleted: false,
                },
            )
            .await
        {
            tracing::warn!(id = %memory.id, "Vector upsert failed: {}", e);
        }
        stored += 1;
    }

    tracing::info!(embedded = stored, failed, "Embedding worker pass");
    Ok(stored)
}
