// crates/engram-server/src/config/env.rs
// Environment-based configuration - single source of truth for all env vars

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info, warn};

/// Which vector backend the engine should prefer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorBackendKind {
    /// sqlite-vec tables inside the main database.
    Embedded,
    /// Co-resident ANN service over loopback HTTP.
    Sidecar,
}

/// All environment knobs, loaded once at startup.
#[derive(Debug, Clone)]
pub struct EngramConfig {
    /// Data directory (ENGRAM_DATA_DIR, default ~/.engram)
    pub data_dir: PathBuf,
    /// Database file path (ENGRAM_DB_PATH, default <data>/memories.db)
    pub db_path: PathBuf,
    /// Backup directory (ENGRAM_BACKUP_DIR, default <data>/backups)
    pub backup_dir: PathBuf,

    /// Embedding endpoint base URL (ENGRAM_EMBEDDING_URL), e.g. http://localhost:11434
    pub embedding_url: Option<String>,
    /// Embedding model name (ENGRAM_EMBEDDING_MODEL)
    pub embedding_model: Option<String>,
    /// Embedding dimensions (ENGRAM_EMBEDDING_DIMENSIONS, default 768)
    pub embedding_dimensions: usize,

    /// Zero-shot entailment endpoint (ENGRAM_NLI_URL); absent = lexical-only
    pub nli_url: Option<String>,

    /// Preferred vector backend (ENGRAM_VECTOR_BACKEND: sidecar|embedded)
    pub vector_backend: VectorBackendKind,
    /// Sidecar base URL (ENGRAM_VECTOR_URL, default http://127.0.0.1:<port>)
    pub vector_url: Option<String>,
    /// Sidecar binary to spawn (ENGRAM_VECTOR_BIN); absent = connect-only
    pub vector_bin: Option<PathBuf>,
    /// Sidecar loopback port (ENGRAM_VECTOR_PORT, default 6333)
    pub vector_port: u16,

    /// Write lock width (ENGRAM_LOCK_MAX_CONCURRENT, clamped >= 1)
    pub lock_max_concurrent: usize,

    /// Embedding worker batch size (ENGRAM_EMBED_BATCH, default 16)
    pub embed_batch: usize,
    /// Embedding worker interval (ENGRAM_EMBED_INTERVAL_SECS, default 30)
    pub embed_interval: Duration,

    /// Consolidation interval (ENGRAM_CONSOLIDATION_INTERVAL_SECS, default 3600)
    pub consolidation_interval: Duration,
    /// Idle threshold before consolidation may run (ENGRAM_CONSOLIDATION_IDLE_SECS, default 300)
    pub consolidation_idle: Duration,
    /// Auto-resolve high-confidence contradictions during scan
    /// (ENGRAM_AUTO_RESOLVE_CONTRADICTIONS, default false)
    pub auto_resolve_contradictions: bool,

    /// Tool names excluded from tool_calls logging (ENGRAM_LOG_EXCLUDE_TOOLS, comma-separated)
    pub log_exclude_tools: Vec<String>,

    /// Project id override (ENGRAM_PROJECT_ID)
    pub project_override: Option<String>,

    /// Root directory holding chat archives for auto-ingest (ENGRAM_CHAT_DIR)
    pub chat_dir: Option<PathBuf>,
}

impl EngramConfig {
    /// Load all environment configuration (call once at startup)
    pub fn load() -> Self {
        let data_dir = std::env::var("ENGRAM_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".engram")
            });

        let db_path = std::env::var("ENGRAM_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("memories.db"));

        let backup_dir = std::env::var("ENGRAM_BACKUP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("backups"));

        let vector_port = read_parsed("ENGRAM_VECTOR_PORT").unwrap_or(6333);

        let vector_backend = match std::env::var("ENGRAM_VECTOR_BACKEND").ok().as_deref() {
            Some("sidecar") => VectorBackendKind::Sidecar,
            Some("embedded") | None => VectorBackendKind::Embedded,
            Some(other) => {
                warn!(value = other, "Unknown ENGRAM_VECTOR_BACKEND, using embedded");
                VectorBackendKind::Embedded
            }
        };

        let config = Self {
            data_dir,
            db_path,
            backup_dir,
            embedding_url: read_nonempty("ENGRAM_EMBEDDING_URL"),
            embedding_model: read_nonempty("ENGRAM_EMBEDDING_MODEL"),
            embedding_dimensions: read_parsed("ENGRAM_EMBEDDING_DIMENSIONS").unwrap_or(768),
            nli_url: read_nonempty("ENGRAM_NLI_URL"),
            vector_backend,
            vector_url: read_nonempty("ENGRAM_VECTOR_URL"),
            vector_bin: read_nonempty("ENGRAM_VECTOR_BIN").map(PathBuf::from),
            vector_port,
            lock_max_concurrent: read_parsed::<usize>("ENGRAM_LOCK_MAX_CONCURRENT")
                .unwrap_or(1)
                .max(1),
            embed_batch: read_parsed("ENGRAM_EMBED_BATCH").unwrap_or(16),
            embed_interval: Duration::from_secs(
                read_parsed("ENGRAM_EMBED_INTERVAL_SECS").unwrap_or(30),
            ),
            consolidation_interval: Duration::from_secs(
                read_parsed("ENGRAM_CONSOLIDATION_INTERVAL_SECS").unwrap_or(3600),
            ),
            consolidation_idle: Duration::from_secs(
                read_parsed("ENGRAM_CONSOLIDATION_IDLE_SECS").unwrap_or(300),
            ),
            auto_resolve_contradictions: parse_bool_env("ENGRAM_AUTO_RESOLVE_CONTRADICTIONS")
                .unwrap_or(false),
            log_exclude_tools: std::env::var("ENGRAM_LOG_EXCLUDE_TOOLS")
                .map(|s| {
                    s.split(',')
                        .map(|t| t.trim().to_string())
                        .filter(|t| !t.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            project_override: read_nonempty("ENGRAM_PROJECT_ID"),
            chat_dir: read_nonempty("ENGRAM_CHAT_DIR").map(PathBuf::from),
        };

        config.log_status();
        config
    }

    /// The sidecar base URL, derived from the explicit URL or the port.
    pub fn sidecar_url(&self) -> String {
        self.vector_url
            .clone()
            .unwrap_or_else(|| format!("http://127.0.0.1:{}", self.vector_port))
    }

    /// Whether an embedding endpoint is configured at all.
    pub fn has_embeddings(&self) -> bool {
        self.embedding_url.is_some()
    }

    fn log_status(&self) {
        info!(
            db = %self.db_path.display(),
            backend = ?self.vector_backend,
            dimensions = self.embedding_dimensions,
            "Configuration loaded"
        );
        if self.embedding_url.is_none() {
            warn!("No embedding endpoint configured - semantic search degrades to keyword only");
        }
        if self.nli_url.is_some() {
            debug!("NLI entailment endpoint configured");
        }
    }
}

impl Default for EngramConfig {
    fn default() -> Self {
        // Used by tests; everything points at temp-friendly defaults
        Self {
            data_dir: PathBuf::from("."),
            db_path: PathBuf::from("memories.db"),
            backup_dir: PathBuf::from("backups"),
            embedding_url: None,
            embedding_model: None,
            embedding_dimensions: 768,
            nli_url: None,
            vector_backend: VectorBackendKind::Embedded,
            vector_url: None,
            vector_bin: None,
            vector_port: 6333,
            lock_max_concurrent: 1,
            embed_batch: 16,
            embed_interval: Duration::from_secs(30),
            consolidation_interval: Duration::from_secs(3600),
            consolidation_idle: Duration::from_secs(300),
            auto_resolve_contradictions: false,
            log_exclude_tools: Vec::new(),
            project_override: None,
            chat_dir: None,
        }
    }
}

fn read_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn read_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

pub fn parse_bool_env(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?.to_lowercase();
    match value.as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
