// engine.rs
// The one long-lived value: pool, write lock, vector store, model clients,
// and session state. Tool handlers receive it by reference; there is no
// global mutable state.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::{EngramConfig, detect_project_id};
use crate::db::DatabasePool;
use crate::embeddings::EmbeddingClient;
use crate::error::Result;
use crate::lock::WriteLock;
use crate::nli::NliClient;
use crate::session::SessionState;
use crate::vector::{VectorStore, open_vector_store};

pub struct Engine {
    pub config: EngramConfig,
    pub pool: Arc<DatabasePool>,
    pub lock: WriteLock,
    pub vector: Arc<dyn VectorStore>,
    pub embeddings: Option<Arc<EmbeddingClient>>,
    pub nli: Option<Arc<NliClient>>,
    pub session: SessionState,
    /// Only-one-running guard for the consolidation cycle.
    pub consolidation_guard: tokio::sync::Mutex<()>,
    /// Active project namespace; `project set` switches it.
    project_id: RwLock<String>,
}

impl Engine {
    /// Open the engine against the configured database path.
    pub async fn open(config: EngramConfig) -> Result<Arc<Self>> {
        let pool = Arc::new(DatabasePool::open(&config.db_path).await?);
        Self::build(config, pool).await
    }

    /// Open against a shared in-memory database (tests).
    pub async fn open_in_memory(config: EngramConfig) -> Result<Arc<Self>> {
        let pool = Arc::new(DatabasePool::open_in_memory().await?);
        Self::build(config, pool).await
    }

    async fn build(config: EngramConfig, pool: Arc<DatabasePool>) -> Result<Arc<Self>> {
        let vector = open_vector_store(&config, pool.clone()).await;
        let embeddings = EmbeddingClient::from_config(&config).map(Arc::new);
        let nli = NliClient::from_config(&config).map(Arc::new);
        let lock = WriteLock::new(config.lock_max_concurrent);

        let cwd = std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("."));
        let project_id = detect_project_id(&cwd, config.project_override.as_deref());
        tracing::info!(project = %project_id, "Project detected");

        let session = SessionState::new();

        Ok(Arc::new(Self {
            config,
            pool,
            lock,
            vector,
            embeddings,
            nli,
            session,
            consolidation_guard: tokio::sync::Mutex::new(()),
            project_id: RwLock::new(project_id),
        }))
    }

    pub async fn project_id(&self) -> String {
        self.project_id.read().await.clone()
    }

    pub async fn set_project_id(&self, id: String) {
        *self.project_id.write().await = id;
    }

    /// Graceful shutdown: drain writers, clear session state, final backup,
    /// close the vector store, truncate the WAL.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down");
        self.lock.drain("shutting down");

        let project = self.project_id().await;
        self.session.clear_state(&self.pool, &project).await;

        if let Err(e) = crate::backup::create_backup(self, false).await {
            tracing::warn!("Final backup failed: {}", e);
        }

        self.vector.close().await;

        if let Err(e) = self.pool.wal_checkpoint_truncate().await {
            tracing::warn!("WAL checkpoint at shutdown failed: {}", e);
        }
    }
}

/// Engine wired to an in-memory pool with the embedded vector store.
/// Shared fixture for unit tests across modules.
#[cfg(test)]
pub(crate) async fn test_engine() -> Arc<Engine> {
    let config = EngramConfig {
        embedding_dimensions: 4,
        ..Default::default()
    };
    Engine::open_in_memory(config).await.unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory() {
        let engine = test_engine().await;
        assert!(engine.vector.is_ready());
        assert_eq!(engine.vector.backend(), "embedded");
        assert!(engine.embeddings.is_none());
    }

    #[tokio::test]
    async fn test_project_switch() {
        let engine = test_engine().await;
        engine.set_project_id("demo".to_string()).await;
        assert_eq!(engine.project_id().await, "demo");
    }
}
