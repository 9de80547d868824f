// crates/engram-server/src/mcp/mod.rs
// MCP server: tool routing, argument schemas, call logging, error
// sanitization. The wire surface is fixed; handlers live in tools/.

use std::sync::Arc;

use rmcp::{
    ErrorData, ServerHandler,
    handler::server::{router::tool::ToolRouter, tool::ToolCallContext, wrapper::Parameters},
    model::{
        CallToolRequestParam, CallToolResult, ListToolsResult, PaginatedRequestParam,
        ServerCapabilities, ServerInfo,
    },
    schemars,
    service::{RequestContext, RoleServer},
    tool, tool_router,
};
use serde::Deserialize;

use crate::db;
use crate::engine::Engine;
use crate::error::EngramError;
use crate::tools;

/// MCP server state: one engine, one router.
#[derive(Clone)]
pub struct EngramServer {
    pub engine: Arc<Engine>,
    tool_router: ToolRouter<Self>,
}

impl EngramServer {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            tool_router: Self::tool_router(),
        }
    }

    fn to_wire(result: Result<serde_json::Value, EngramError>) -> Result<String, String> {
        match result {
            Ok(value) => Ok(value.to_string()),
            // Domain errors cross the wire as sanitized {error} text
            Err(e) => Ok(serde_json::json!({ "error": e.to_user_string() }).to_string()),
        }
    }
}

// Request types for tools with parameters

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct StoreRequest {
    #[schemars(description = "Content to remember (max 100 KB)")]
    pub content: String,
    #[schemars(description = "Type: fact/decision/preference/procedure/note/observation/event")]
    pub memory_type: Option<String>,
    #[schemars(description = "Tags (max 20, each max 100 chars)")]
    pub tags: Option<Vec<String>>,
    #[schemars(description = "Importance 0.0-1.0 (default 0.5)")]
    pub importance: Option<f64>,
    #[schemars(description = "Initial confidence 0.0-1.0 (default 0.7)")]
    pub confidence: Option<f64>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct RecallRequest {
    #[schemars(description = "Memory id (32-char hex)")]
    pub id: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SearchRequest {
    #[schemars(description = "Search query")]
    pub query: String,
    #[schemars(description = "Max results (default 10)")]
    pub limit: Option<i64>,
    #[schemars(description = "Minimum effective confidence (default 0)")]
    pub confidence_threshold: Option<f64>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct UpdateRequest {
    #[schemars(description = "Memory id")]
    pub id: String,
    #[schemars(description = "New content (re-embeds and re-checks contradictions)")]
    pub content: Option<String>,
    #[schemars(description = "New type")]
    pub memory_type: Option<String>,
    #[schemars(description = "New tags")]
    pub tags: Option<Vec<String>>,
    #[schemars(description = "New importance")]
    pub importance: Option<f64>,
    #[schemars(description = "New confidence")]
    pub confidence: Option<f64>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct DeleteRequest {
    #[schemars(description = "Memory id")]
    pub id: String,
    #[schemars(description = "Remove the row and adjacent edges (default: soft delete)")]
    pub permanent: Option<bool>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ListRequest {
    #[schemars(description = "Filter by type")]
    pub memory_type: Option<String>,
    #[schemars(description = "Filter by tag")]
    pub tag: Option<String>,
    #[schemars(description = "Include soft-deleted and low-retention rows")]
    pub include_deleted: Option<bool>,
    #[schemars(description = "Max results (default 20)")]
    pub limit: Option<i64>,
    #[schemars(description = "Offset for pagination")]
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ScratchRequest {
    #[schemars(description = "Action: set/get/delete/list/clear")]
    pub action: String,
    #[schemars(description = "Key")]
    pub key: Option<String>,
    #[schemars(description = "Value (for set)")]
    pub value: Option<String>,
    #[schemars(description = "TTL in seconds (for set)")]
    pub ttl_seconds: Option<i64>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct EntityRequest {
    #[schemars(description = "Action: create/get/search/observe/delete/link/types")]
    pub action: String,
    #[schemars(description = "Entity name (or new type name for 'types')")]
    pub name: Option<String>,
    #[schemars(description = "Entity type (default 'concept')")]
    pub entity_type: Option<String>,
    #[schemars(description = "Observations to attach")]
    pub observations: Option<Vec<String>>,
    #[schemars(description = "Search query")]
    pub query: Option<String>,
    #[schemars(description = "Relation type (for link)")]
    pub relation_type: Option<String>,
    #[schemars(description = "Target entity name (for link)")]
    pub to_name: Option<String>,
    #[schemars(description = "Parent type (for types)")]
    pub parent_type: Option<String>,
    #[schemars(description = "Type description (for types)")]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct EntityHierarchyRequest {
    #[schemars(description = "Root entity type; descendants are included")]
    pub entity_type: String,
    #[schemars(description = "Optional name/observation filter")]
    pub query: Option<String>,
    #[schemars(description = "Max results")]
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct EdgeRequest {
    #[schemars(description = "Action: create/query/invalidate")]
    pub action: String,
    #[schemars(description = "Edge id (for invalidate)")]
    pub edge_id: Option<String>,
    #[schemars(description = "Source memory id (for create)")]
    pub from_id: Option<String>,
    #[schemars(description = "Target memory id (for create)")]
    pub to_id: Option<String>,
    #[schemars(description = "Relation type")]
    pub relation_type: Option<String>,
    #[schemars(description = "Memory id filter (for query)")]
    pub memory_id: Option<String>,
    #[schemars(description = "As-of timestamp 'YYYY-MM-DD HH:MM:SS' (for query)")]
    pub as_of: Option<String>,
    #[schemars(description = "Edge confidence (for create)")]
    pub confidence: Option<f64>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ScheduledRequest {
    #[schemars(description = "Action: schedule/list/check/complete/cancel")]
    pub action: String,
    #[schemars(description = "Task id")]
    pub task_id: Option<String>,
    #[schemars(description = "Task title (for schedule)")]
    pub title: Option<String>,
    #[schemars(description = "Cron or natural language, e.g. 'in 30 minutes'")]
    pub schedule: Option<String>,
    #[schemars(description = "Backing memory id")]
    pub memory_id: Option<String>,
    #[schemars(description = "Include completed/cancelled (for list)")]
    pub include_finished: Option<bool>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ContradictionsRequest {
    #[schemars(description = "Action: scan/pending/resolve")]
    pub action: String,
    #[schemars(description = "Resolution id (for resolve)")]
    pub resolution_id: Option<String>,
    #[schemars(description = "keep_first/keep_second/keep_both/merge/delete_both")]
    pub resolution_type: Option<String>,
    #[schemars(description = "Resolution note")]
    pub note: Option<String>,
    #[schemars(description = "Merged content (required for merge)")]
    pub merged_content: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct BackupRequest {
    #[schemars(description = "Action: create/restore/list")]
    pub action: String,
    #[schemars(description = "Backup file name (for restore)")]
    pub file: Option<String>,
    #[schemars(description = "Restore mode: merge (default) or replace")]
    pub mode: Option<String>,
    #[schemars(description = "Export embeddings too (default true)")]
    pub include_embeddings: Option<bool>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct TaskRequest {
    #[schemars(description = "Action: set/update/clear/get")]
    pub action: String,
    #[schemars(description = "Task description (for set)")]
    pub description: Option<String>,
    #[schemars(description = "Expected step count (for set)")]
    pub total_steps: Option<i64>,
    #[schemars(description = "Completed step description (for update)")]
    pub step: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ProjectRequest {
    #[schemars(description = "Action: list/set")]
    pub action: String,
    #[schemars(description = "Project id (for set)")]
    pub project_id: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ChatRequest {
    #[schemars(
        description = "Action: discover/ingest/ingest_all/list/extract/summarize/summarize_batch/topics/search_summaries/cleanup"
    )]
    pub action: String,
    #[schemars(description = "Archive file path (for ingest)")]
    pub file: Option<String>,
    #[schemars(description = "Conversation id")]
    pub conversation_id: Option<String>,
    #[schemars(description = "Search query (for search_summaries)")]
    pub query: Option<String>,
    #[schemars(description = "Detailed summary (for summarize)")]
    pub detailed: Option<bool>,
    #[schemars(description = "Max results")]
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct RetentionRequest {
    #[schemars(description = "Memory id")]
    pub id: String,
}

#[tool_router]
impl EngramServer {
    #[tool(description = "Store a memory. Detects contradictions against existing knowledge.")]
    async fn memory_store(&self, Parameters(req): Parameters<StoreRequest>) -> Result<String, String> {
        Self::to_wire(
            tools::memory::store(
                &self.engine,
                req.content,
                req.memory_type,
                req.tags,
                req.importance,
                req.confidence,
            )
            .await,
        )
    }

    #[tool(description = "Recall a memory by id. Strengthens it and reports unresolved conflicts.")]
    async fn memory_recall(&self, Parameters(req): Parameters<RecallRequest>) -> Result<String, String> {
        Self::to_wire(tools::memory::recall(&self.engine, req.id).await)
    }

    #[tool(description = "Hybrid search: keyword (BM25) + semantic KNN, fused with importance.")]
    async fn memory_search(&self, Parameters(req): Parameters<SearchRequest>) -> Result<String, String> {
        Self::to_wire(
            tools::memory::search(&self.engine, req.query, req.limit, req.confidence_threshold)
                .await,
        )
    }

    #[tool(description = "Update a memory. Content changes re-embed and re-check contradictions.")]
    async fn memory_update(&self, Parameters(req): Parameters<UpdateRequest>) -> Result<String, String> {
        Self::to_wire(
            tools::memory::update(
                &self.engine,
                req.id,
                req.content,
                req.memory_type,
                req.tags,
                req.importance,
                req.confidence,
            )
            .await,
        )
    }

    #[tool(description = "Delete a memory (soft by default, permanent removes edges too).")]
    async fn memory_delete(&self, Parameters(req): Parameters<DeleteRequest>) -> Result<String, String> {
        Self::to_wire(tools::memory::delete(&self.engine, req.id, req.permanent).await)
    }

    #[tool(description = "List memories with decay annotations.")]
    async fn memory_list(&self, Parameters(req): Parameters<ListRequest>) -> Result<String, String> {
        Self::to_wire(
            tools::memory::list(
                &self.engine,
                req.memory_type,
                req.tag,
                req.include_deleted,
                req.limit,
                req.offset,
            )
            .await,
        )
    }

    #[tool(description = "Decay report for one memory: effective confidence and retention.")]
    async fn memory_retention(
        &self,
        Parameters(req): Parameters<RetentionRequest>,
    ) -> Result<String, String> {
        Self::to_wire(tools::memory::retention(&self.engine, req.id).await)
    }

    #[tool(description = "Scratchpad key/value with TTL. Actions: set/get/delete/list/clear.")]
    async fn scratch(&self, Parameters(req): Parameters<ScratchRequest>) -> Result<String, String> {
        Self::to_wire(
            tools::scratch::dispatch(&self.engine, req.action, req.key, req.value, req.ttl_seconds)
                .await,
        )
    }

    #[tool(description = "Entity graph. Actions: create/get/search/observe/delete/link/types.")]
    async fn entity(&self, Parameters(req): Parameters<EntityRequest>) -> Result<String, String> {
        Self::to_wire(
            tools::graph::entity_dispatch(
                &self.engine,
                req.action,
                req.name,
                req.entity_type,
                req.observations,
                req.query,
                req.relation_type,
                req.to_name,
                req.parent_type,
                req.description,
            )
            .await,
        )
    }

    #[tool(description = "Search entities by type, including all descendant types.")]
    async fn entity_hierarchy(
        &self,
        Parameters(req): Parameters<EntityHierarchyRequest>,
    ) -> Result<String, String> {
        Self::to_wire(
            tools::graph::entity_hierarchy(&self.engine, req.entity_type, req.query, req.limit)
                .await,
        )
    }

    #[tool(description = "Bi-temporal edges between memories. Actions: create/query/invalidate.")]
    async fn edge(&self, Parameters(req): Parameters<EdgeRequest>) -> Result<String, String> {
        Self::to_wire(
            tools::graph::edge_dispatch(
                &self.engine,
                req.action,
                req.edge_id,
                req.from_id,
                req.to_id,
                req.relation_type,
                req.memory_id,
                req.as_of,
                req.confidence,
            )
            .await,
        )
    }

    #[tool(description = "Scheduled tasks. Actions: schedule/list/check/complete/cancel.")]
    async fn scheduled(&self, Parameters(req): Parameters<ScheduledRequest>) -> Result<String, String> {
        Self::to_wire(
            tools::scheduled::dispatch(
                &self.engine,
                req.action,
                req.task_id,
                req.title,
                req.schedule,
                req.memory_id,
                req.include_finished,
            )
            .await,
        )
    }

    #[tool(description = "Contradiction management. Actions: scan/pending/resolve.")]
    async fn contradictions(
        &self,
        Parameters(req): Parameters<ContradictionsRequest>,
    ) -> Result<String, String> {
        Self::to_wire(
            tools::contradictions::dispatch(
                &self.engine,
                req.action,
                req.resolution_id,
                req.resolution_type,
                req.note,
                req.merged_content,
            )
            .await,
        )
    }

    #[tool(description = "Backups. Actions: create/restore/list.")]
    async fn backup(&self, Parameters(req): Parameters<BackupRequest>) -> Result<String, String> {
        Self::to_wire(
            tools::backup::dispatch(&self.engine, req.action, req.file, req.mode, req.include_embeddings)
                .await,
        )
    }

    #[tool(description = "Track progress on the current task. Actions: set/update/clear/get.")]
    async fn task(&self, Parameters(req): Parameters<TaskRequest>) -> Result<String, String> {
        Self::to_wire(
            tools::session::task_dispatch(
                &self.engine,
                req.action,
                req.description,
                req.total_steps,
                req.step,
            )
            .await,
        )
    }

    #[tool(description = "Project namespace. Actions: list/set.")]
    async fn project(&self, Parameters(req): Parameters<ProjectRequest>) -> Result<String, String> {
        Self::to_wire(tools::project::dispatch(&self.engine, req.action, req.project_id).await)
    }

    #[tool(description = "Chat archive ingestion, fact extraction, summaries, topics.")]
    async fn chat(&self, Parameters(req): Parameters<ChatRequest>) -> Result<String, String> {
        Self::to_wire(
            tools::chat::dispatch(
                &self.engine,
                req.action,
                req.file,
                req.conversation_id,
                req.query,
                req.detailed,
                req.limit,
            )
            .await,
        )
    }

    #[tool(description = "Session briefing: crash recovery, current task, pending conflicts.")]
    async fn briefing(&self) -> Result<String, String> {
        Self::to_wire(tools::session::briefing(&self.engine).await)
    }

    #[tool(description = "Store statistics: row counts, vector backend, session.")]
    async fn stats(&self) -> Result<String, String> {
        Self::to_wire(tools::system::stats(&self.engine).await)
    }

    #[tool(description = "Write-lock counters.")]
    async fn lock_stats(&self) -> Result<String, String> {
        Self::to_wire(tools::system::lock_stats(&self.engine))
    }

    #[tool(description = "Run a consolidation cycle now (strengthen/decay/GC/backup).")]
    async fn consolidate(&self) -> Result<String, String> {
        Self::to_wire(tools::system::consolidate(&self.engine).await)
    }

    #[tool(description = "Run a database integrity check.")]
    async fn integrity(&self) -> Result<String, String> {
        Self::to_wire(tools::system::integrity(&self.engine).await)
    }

    #[tool(description = "Run one embedding-worker pass over memories missing vectors.")]
    async fn embed_pending(&self) -> Result<String, String> {
        match crate::background::embedder::process_pending_embeddings(&self.engine).await {
            Ok(count) => Ok(serde_json::json!({ "embedded": count }).to_string()),
            Err(e) => Ok(serde_json::json!({ "error": crate::utils::sanitize_error_text(&e) })
                .to_string()),
        }
    }
}

impl ServerHandler for EngramServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: rmcp::model::Implementation {
                name: "engram".into(),
                title: Some("Engram - persistent knowledge store for LLM assistants".into()),
                version: env!("CARGO_PKG_VERSION").into(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Engram provides persistent, project-scoped memory with hybrid retrieval, \
                 contradiction tracking, and background consolidation."
                    .into(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, ErrorData>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult {
            tools: self.tool_router.list_all(),
            next_cursor: None,
            meta: None,
        }))
    }

    #[allow(clippy::manual_async_fn)]
    fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, ErrorData>> + Send + '_ {
        async move {
            let tool_name = request.name.to_string();
            let start = std::time::Instant::now();
            let project = self.engine.project_id().await;

            // Heartbeat + last-tool tracking on every call
            self.engine
                .session
                .heartbeat(&self.engine.pool, &project, &tool_name)
                .await;

            let args_json = request
                .arguments
                .as_ref()
                .map(|a| serde_json::to_string(a).unwrap_or_default())
                .unwrap_or_default();

            let ctx = ToolCallContext::new(self, request, context);
            let result = self.tool_router.call(ctx).await;

            let duration_ms = start.elapsed().as_millis() as i64;
            let (success, preview) = match &result {
                Ok(r) => {
                    let text = r
                        .content
                        .first()
                        .and_then(|c| c.as_text())
                        .map(|t| t.text.to_string())
                        .unwrap_or_default();
                    (true, text)
                }
                Err(e) => (false, e.message.to_string()),
            };

            // Log in a separate best-effort write so a logging failure can
            // never crash the dispatcher
            if !self.engine.config.log_exclude_tools.contains(&tool_name) {
                let project = project.clone();
                let tool = tool_name.clone();
                self.engine
                    .pool
                    .try_interact("tool log", move |conn| {
                        db::log_tool_call_sync(
                            conn,
                            Some(&project),
                            &tool,
                            &args_json,
                            &preview,
                            success,
                            duration_ms,
                        )?;
                        Ok(())
                    })
                    .await;
            }

            result
        }
    }
}

/// Run the MCP server over stdio until the client disconnects.
pub async fn serve(engine: Arc<Engine>) -> anyhow::Result<()> {
    let server = EngramServer::new(engine);
    let transport = rmcp::transport::io::stdio();
    let service = rmcp::serve_server(server, transport).await?;
    service.waiting().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_engine;

    #[tokio::test]
    async fn test_tool_router_lists_tools() {
        let server = EngramServer::new(test_engine().await);
        let tools = server.tool_router.list_all();
        assert_eq!(tools.len(), 23);
        let names: Vec<String> = tools.iter().map(|t| t.name.to_string()).collect();
        for expected in [
            "memory_store",
            "memory_search",
            "scratch",
            "entity",
            "edge",
            "scheduled",
            "contradictions",
            "backup",
            "task",
            "project",
            "chat",
            "briefing",
            "consolidate",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[tokio::test]
    async fn test_to_wire_sanitizes_errors() {
        let wire = EngramServer::to_wire(Err(EngramError::InvalidInput(
            "bad path /home/user/secret.db".to_string(),
        )))
        .unwrap();
        assert!(wire.contains("[path]"));
        assert!(!wire.contains("/home/user"));
    }
}
