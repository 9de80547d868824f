// crates/engram-server/src/vector/mod.rs
// Pluggable ANN backend over (id, vector, payload) with an embedded fallback

mod embedded;
mod sidecar;

pub use embedded::EmbeddedVectorStore;
pub use sidecar::SidecarVectorStore;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{EngramConfig, VectorBackendKind};
use crate::db::DatabasePool;
use crate::error::Result;

/// One KNN hit: canonical 32-hex memory id plus a score in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredId {
    pub id: String,
    pub score: f64,
}

/// Server-side payload filter applied during search.
#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub project_id: Option<String>,
    pub exclude_deleted: bool,
    pub exclude_ids: Vec<String>,
}

/// Payload stored alongside each vector.
#[derive(Debug, Clone)]
pub struct VectorPayload {
    pub project_id: String,
    pub deleted: bool,
}

/// KNN index over memory embeddings. Derived state: the SQL store is the
/// source of truth and the index can be rebuilt from it.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, id: &str, vector: &[f32], payload: VectorPayload) -> Result<()>;

    /// Results ordered by descending score; both backends rank identically
    /// to within numerical tolerance for the same data.
    async fn search(&self, vector: &[f32], k: usize, filter: &VectorFilter)
    -> Result<Vec<ScoredId>>;

    async fn delete(&self, id: &str) -> Result<()>;

    async fn count(&self) -> Result<u64>;

    fn is_ready(&self) -> bool;

    async fn close(&self);

    /// Discriminant for logs and the stats tool.
    fn backend(&self) -> &'static str;
}

/// Open the preferred backend, falling back to the embedded one when the
/// sidecar cannot be reached. The fallback holds for the rest of the session.
pub async fn open_vector_store(
    config: &EngramConfig,
    pool: Arc<DatabasePool>,
) -> Arc<dyn VectorStore> {
    let dims = config.embedding_dimensions;

    if config.vector_backend == VectorBackendKind::Sidecar {
        match SidecarVectorStore::connect(config).await {
            Ok(store) => {
                tracing::info!(url = %config.sidecar_url(), "Vector store: sidecar");
                return Arc::new(store);
            }
            Err(e) => {
                tracing::warn!(
                    "Sidecar vector backend failed to initialize ({}), falling back to embedded",
                    e
                );
            }
        }
    }

    match EmbeddedVectorStore::open(pool, dims).await {
        Ok(store) => {
            tracing::info!("Vector store: embedded (sqlite-vec)");
            Arc::new(store)
        }
        Err(e) => {
            tracing::warn!("Embedded vector backend failed to initialize: {}", e);
            Arc::new(embedded::UnavailableVectorStore)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_default() {
        let f = VectorFilter::default();
        assert!(f.project_id.is_none());
        assert!(!f.exclude_deleted);
        assert!(f.exclude_ids.is_empty());
    }
}
