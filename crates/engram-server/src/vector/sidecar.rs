// crates/engram-server/src/vector/sidecar.rs
// Qdrant-style ANN sidecar over loopback HTTP/JSON. The engine can spawn the
// configured binary, health-checks it until ready, and collects it at close.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use super::{ScoredId, VectorFilter, VectorPayload, VectorStore};
use crate::config::EngramConfig;
use crate::error::{EngramError, Result};
use crate::utils::{hex_to_hyphenated, normalize_id};

/// Collection holding all memory vectors.
const COLLECTION: &str = "engram_memories";

/// Bounded per-call network timeout; a slow sidecar degrades one call, not
/// the session.
const CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Health polls at startup before giving up.
const HEALTH_POLL_ATTEMPTS: usize = 30;
const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
struct SearchResponse {
    result: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: serde_json::Value,
    score: f64,
}

#[derive(Debug, Deserialize)]
struct CollectionInfoResponse {
    result: CollectionInfo,
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    #[serde(default)]
    points_count: Option<u64>,
}

pub struct SidecarVectorStore {
    base_url: String,
    http_client: reqwest::Client,
    ready: AtomicBool,
    /// Child process when we spawned the sidecar ourselves.
    child: Mutex<Option<Child>>,
}

impl SidecarVectorStore {
    /// Spawn (if configured) and connect to the sidecar, ensuring the
    /// collection exists. Errors here trigger the embedded fallback.
    pub async fn connect(config: &EngramConfig) -> Result<Self> {
        let base_url = config.sidecar_url();
        let http_client = reqwest::Client::builder()
            .timeout(CALL_TIMEOUT)
            .connect_timeout(Duration::from_secs(3))
            .build()
            .unwrap_or_default();

        let child = match &config.vector_bin {
            Some(bin) => {
                let data_dir = config.data_dir.join("vectors");
                std::fs::create_dir_all(&data_dir)?;
                tracing::info!(bin = %bin.display(), "Spawning vector sidecar");
                let child = Command::new(bin)
                    .env("QDRANT__SERVICE__HTTP_PORT", config.vector_port.to_string())
                    .env("QDRANT__STORAGE__STORAGE_PATH", &data_dir)
                    .stdout(std::process::Stdio::null())
                    .stderr(std::process::Stdio::null())
                    .kill_on_drop(true)
                    .spawn()
                    .map_err(|e| EngramError::Plugin(format!("failed to spawn sidecar: {e}")))?;
                Some(child)
            }
            None => None,
        };

        let store = Self {
            base_url,
            http_client,
            ready: AtomicBool::new(false),
            child: Mutex::new(child),
        };

        store.wait_healthy().await?;
        store.ensure_collection(config.embedding_dimensions).await?;
        store.ready.store(true, Ordering::Relaxed);
        Ok(store)
    }

    async fn wait_healthy(&self) -> Result<()> {
        let url = format!("{}/healthz", self.base_url);
        for _ in 0..HEALTH_POLL_ATTEMPTS {
            if let Ok(resp) = self.http_client.get(&url).send().await
                && resp.status().is_success()
            {
                return Ok(());
            }
            tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
        }
        Err(EngramError::VectorUnavailable(format!(
            "sidecar never became healthy at {}",
            self.base_url
        )))
    }

    async fn ensure_collection(&self, dims: usize) -> Result<()> {
        let info_url = format!("{}/collections/{}", self.base_url, COLLECTION);
        if let Ok(resp) = self.http_client.get(&info_url).send().await
            && resp.status().is_success()
        {
            return Ok(());
        }

        let body = json!({
            "vectors": { "size": dims, "distance": "Cosine" }
        });
        let resp = self
            .http_client
            .put(&info_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngramError::VectorUnavailable(e.to_string()))?;
        if !resp.status().is_success() {
            // A racing creator is fine; anything else is not
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            if !text.contains("already exists") {
                return Err(EngramError::VectorUnavailable(format!(
                    "collection create failed ({status}): {text}"
                )));
            }
        }
        Ok(())
    }

    /// Build the server-side payload filter from a `VectorFilter`.
    fn build_filter(filter: &VectorFilter) -> serde_json::Value {
        let mut must = Vec::new();
        if let Some(ref project) = filter.project_id {
            must.push(json!({
                "should": [
                    { "key": "project_id", "match": { "value": project } },
                    { "key": "project_id", "match": { "value": crate::config::GLOBAL_PROJECT } },
                ]
            }));
        }
        if filter.exclude_deleted {
            must.push(json!({ "key": "deleted", "match": { "value": false } }));
        }

        let mut out = json!({ "must": must });
        if !filter.exclude_ids.is_empty() {
            let ids: Vec<String> = filter
                .exclude_ids
                .iter()
                .filter_map(|id| hex_to_hyphenated(id))
                .collect();
            out["must_not"] = json!([{ "has_id": ids }]);
        }
        out
    }
}

#[async_trait]
impl VectorStore for SidecarVectorStore {
    async fn upsert(&self, id: &str, vector: &[f32], payload: VectorPayload) -> Result<()> {
        // The sidecar wants hyphenated UUID point ids
        let point_id = hex_to_hyphenated(id)
            .ok_or_else(|| EngramError::InvalidInput(format!("bad memory id: {id}")))?;
        let url = format!(
            "{}/collections/{}/points?wait=true",
            self.base_url, COLLECTION
        );
        let body = json!({
            "points": [{
                "id": point_id,
                "vector": vector,
                "payload": { "project_id": payload.project_id, "deleted": payload.deleted },
            }]
        });
        let resp = self.http_client.put(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(EngramError::VectorUnavailable(format!(
                "upsert failed: {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: &VectorFilter,
    ) -> Result<Vec<ScoredId>> {
        let url = format!(
            "{}/collections/{}/points/search",
            self.base_url, COLLECTION
        );
        let body = json!({
            "vector": vector,
            "limit": k,
            "filter": Self::build_filter(filter),
            "with_payload": false,
        });

        let resp = match self.http_client.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                // Per-call failure degrades to empty results with one warning
                tracing::warn!("Sidecar search failed: {}", e);
                return Ok(Vec::new());
            }
        };
        if !resp.status().is_success() {
            tracing::warn!("Sidecar search failed: {}", resp.status());
            return Ok(Vec::new());
        }

        let parsed: SearchResponse = resp.json().await?;
        let hits = parsed
            .result
            .into_iter()
            .filter_map(|hit| {
                // Normalize ids back to canonical 32-hex before joining SQL
                let id = match hit.id {
                    serde_json::Value::String(s) => normalize_id(&s),
                    serde_json::Value::Number(n) => n.to_string(),
                    _ => return None,
                };
                Some(ScoredId {
                    id,
                    // Cosine scores arrive in [-1, 1]; fold onto [0, 1]
                    score: ((hit.score + 1.0) / 2.0).clamp(0.0, 1.0),
                })
            })
            .collect();
        Ok(hits)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let Some(point_id) = hex_to_hyphenated(id) else {
            return Ok(());
        };
        let url = format!(
            "{}/collections/{}/points/delete?wait=true",
            self.base_url, COLLECTION
        );
        let body = json!({ "points": [point_id] });
        let resp = self.http_client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            tracing::warn!("Sidecar delete failed: {}", resp.status());
        }
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        let url = format!("{}/collections/{}", self.base_url, COLLECTION);
        let resp = self.http_client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Ok(0);
        }
        let parsed: CollectionInfoResponse = resp.json().await?;
        Ok(parsed.result.points_count.unwrap_or(0))
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    async fn close(&self) {
        self.ready.store(false, Ordering::Relaxed);
        let mut child_guard = self.child.lock().await;
        if let Some(mut child) = child_guard.take() {
            tracing::info!("Stopping vector sidecar");
            let _ = child.kill().await;
        }
    }

    fn backend(&self) -> &'static str {
        "sidecar"
    }
}
