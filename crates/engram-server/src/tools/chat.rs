// tools/chat.rs
// Chat ingestion tool: discover/ingest/extract/summarize/topics/
// search_summaries/cleanup fan-out.

use serde_json::{Value, json};

use crate::db;
use crate::engine::Engine;
use crate::error::Result;
use crate::ingest::parse_archive_file;

use super::unknown_action;

#[allow(clippy::too_many_arguments)]
pub async fn dispatch(
    engine: &Engine,
    action: String,
    file: Option<String>,
    conversation_id: Option<String>,
    query: Option<String>,
    detailed: Option<bool>,
    limit: Option<i64>,
) -> Result<Value> {
    let project = engine.project_id().await;

    match action.as_str() {
        "discover" => {
            let files: Vec<String> = engine
                .discover_chat_archives()
                .into_iter()
                .map(|p| p.display().to_string())
                .take(limit.unwrap_or(50).clamp(1, 500) as usize)
                .collect();
            Ok(json!({ "archives": files }))
        }
        "ingest" => {
            let Some(file) = file else {
                return Ok(json!({ "error": "ingest requires file" }));
            };
            let parsed = match parse_archive_file(std::path::Path::new(&file)) {
                Ok(p) => p,
                Err(e) => return Ok(json!({ "error": format!("cannot read archive: {e}") })),
            };
            let outcome = engine.ingest_conversation(&project, "claude", parsed).await?;
            Ok(serde_json::to_value(outcome)?)
        }
        "ingest_all" => {
            let mut ingested = 0usize;
            let mut deduplicated = 0usize;
            let mut facts = 0usize;
            for path in engine.discover_chat_archives() {
                let Ok(parsed) = parse_archive_file(&path) else {
                    continue;
                };
                match engine.ingest_conversation(&project, "claude", parsed).await {
                    Ok(outcome) if outcome.deduplicated => deduplicated += 1,
                    Ok(outcome) => {
                        ingested += 1;
                        facts += outcome.facts_extracted;
                    }
                    Err(e) => tracing::warn!(path = %path.display(), "Ingest failed: {}", e),
                }
            }
            Ok(json!({
                "ingested": ingested,
                "deduplicated": deduplicated,
                "facts_extracted": facts,
            }))
        }
        "list" => {
            let conversations = engine
                .pool
                .run(move |conn| {
                    db::list_conversations_sync(
                        conn,
                        &project,
                        limit.unwrap_or(20).clamp(1, 100) as usize,
                    )
                })
                .await?;
            let items: Vec<Value> = conversations
                .into_iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "title": c.title,
                        "source": c.source,
                        "ingested_at": c.ingested_at,
                    })
                })
                .collect();
            Ok(json!({ "conversations": items }))
        }
        "extract" => {
            let Some(conversation_id) = conversation_id else {
                return Ok(json!({ "error": "extract requires conversation_id" }));
            };
            let extracted = engine
                .extract_facts_from_conversation(&project, &conversation_id)
                .await?;
            Ok(json!({ "facts_extracted": extracted }))
        }
        "summarize" => {
            let Some(conversation_id) = conversation_id else {
                return Ok(json!({ "error": "summarize requires conversation_id" }));
            };
            let summary = engine
                .summarize_conversation(&project, &conversation_id, detailed.unwrap_or(false))
                .await?;
            Ok(json!({ "summary": summary }))
        }
        "summarize_batch" => {
            let summarized = engine
                .summarize_batch(&project, limit.unwrap_or(20).clamp(1, 100) as usize)
                .await?;
            Ok(json!({ "summarized": summarized }))
        }
        "topics" => {
            let Some(conversation_id) = conversation_id else {
                return Ok(json!({ "error": "topics requires conversation_id" }));
            };
            let topics = engine
                .extract_conversation_topics(
                    &project,
                    &conversation_id,
                    limit.unwrap_or(10).clamp(1, 50) as usize,
                )
                .await?;
            let items: Vec<Value> = topics
                .into_iter()
                .map(|(topic, frequency)| json!({ "topic": topic, "frequency": frequency }))
                .collect();
            Ok(json!({ "topics": items }))
        }
        "search_summaries" => {
            let Some(query) = query else {
                return Ok(json!({ "error": "search_summaries requires query" }));
            };
            let hits = engine
                .pool
                .run(move |conn| {
                    db::search_summaries_sync(
                        conn,
                        &project,
                        &query,
                        limit.unwrap_or(20).clamp(1, 100) as usize,
                    )
                })
                .await?;
            let items: Vec<Value> = hits
                .into_iter()
                .map(|(conversation, level, summary)| {
                    json!({ "conversation_id": conversation, "level": level, "summary": summary })
                })
                .collect();
            Ok(json!({ "summaries": items }))
        }
        "cleanup" => {
            let report = engine.cleanup_garbage_facts(&project).await?;
            Ok(serde_json::to_value(report)?)
        }
        other => Ok(unknown_action("chat", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_engine;

    #[tokio::test]
    async fn test_ingest_from_file_and_list() {
        let engine = test_engine().await;
        engine.set_project_id("demo".to_string()).await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");
        std::fs::write(
            &path,
            r#"{"type":"user","sessionId":"s1","message":{"content":"what storage"}}
{"type":"assistant","sessionId":"s1","message":{"content":[{"type":"text","text":"The project standardized on sqlite with WAL journaling enabled"}]}}"#,
        )
        .unwrap();

        let out = dispatch(
            &engine,
            "ingest".into(),
            Some(path.display().to_string()),
            None,
            None,
            None,
            None,
        )
        .await
        .unwrap();
        assert_eq!(out["deduplicated"], false);
        assert_eq!(out["messages"], 2);

        let listed = dispatch(&engine, "list".into(), None, None, None, None, None)
            .await
            .unwrap();
        assert_eq!(listed["conversations"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_args_are_error_values() {
        let engine = test_engine().await;
        for action in ["ingest", "extract", "summarize", "topics", "search_summaries"] {
            let out = dispatch(&engine, action.into(), None, None, None, None, None)
                .await
                .unwrap();
            assert!(out["error"].is_string(), "{action} should complain");
        }
    }
}
