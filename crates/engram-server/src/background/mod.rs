// crates/engram-server/src/background/mod.rs
// Background workers: the embedding drain loop and the consolidation timer.
// Both stop at the next iteration boundary when the shutdown signal flips.

pub mod consolidation;
pub mod embedder;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::engine::Engine;

/// Initial delay so startup traffic settles before the first pass.
const STARTUP_DELAY: Duration = Duration::from_secs(5);

/// Spawn the background workers. Returns the shutdown sender; flipping it to
/// true stops both loops at their next iteration boundary.
pub fn spawn(engine: Arc<Engine>) -> watch::Sender<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    {
        let engine = engine.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            embedding_loop(engine, shutdown).await;
        });
    }

    {
        let shutdown = shutdown_rx;
        tokio::spawn(async move {
            consolidation_loop(engine, shutdown).await;
        });
    }

    shutdown_tx
}

async fn embedding_loop(engine: Arc<Engine>, shutdown: watch::Receiver<bool>) {
    tracing::info!("Embedding worker started");
    tokio::time::sleep(STARTUP_DELAY).await;

    loop {
        if *shutdown.borrow() {
            tracing::info!("Embedding worker shutting down");
            break;
        }

        match embedder::process_pending_embeddings(&engine).await {
            Ok(processed) if processed > 0 => {
                // More work may be queued; come back quickly
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
            Ok(_) => {
                tokio::time::sleep(engine.config.embed_interval).await;
            }
            Err(e) => {
                tracing::warn!("Embedding worker error: {}", e);
                tokio::time::sleep(engine.config.embed_interval * 2).await;
            }
        }
    }
}

async fn consolidation_loop(engine: Arc<Engine>, shutdown: watch::Receiver<bool>) {
    tracing::info!("Consolidation timer started");
    tokio::time::sleep(STARTUP_DELAY).await;

    loop {
        if *shutdown.borrow() {
            tracing::info!("Consolidation timer shutting down");
            break;
        }

        tokio::time::sleep(engine.config.consolidation_interval).await;
        if *shutdown.borrow() {
            break;
        }

        if !consolidation::is_idle(&engine).await {
            tracing::debug!("Not idle, postponing consolidation");
            continue;
        }

        match consolidation::run_consolidation(&engine).await {
            Ok(report) if !report.skipped => {
                tracing::debug!(
                    strengthened = report.strengthened,
                    decayed = report.decayed,
                    "Consolidation pass done"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Consolidation failed: {}", e),
        }
    }
}
