// tools/memory.rs
// Memory CRUD and search tool handlers.

use engram_types::MemoryType;
use serde_json::{Value, json};

use crate::engine::Engine;
use crate::error::{EngramError, Result};
use crate::memory::{StoreParams, scoring};

fn parse_type(s: Option<&str>) -> Result<MemoryType> {
    match s {
        None => Ok(MemoryType::default()),
        Some(raw) => MemoryType::parse(raw).ok_or_else(|| {
            EngramError::InvalidInput(format!(
                "memory_type '{raw}' is not one of fact/decision/preference/procedure/note/observation/event"
            ))
        }),
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn store(
    engine: &Engine,
    content: String,
    memory_type: Option<String>,
    tags: Option<Vec<String>>,
    importance: Option<f64>,
    confidence: Option<f64>,
) -> Result<Value> {
    let project = engine.project_id().await;
    let outcome = engine
        .store_memory(
            &project,
            StoreParams {
                content,
                memory_type: parse_type(memory_type.as_deref())?,
                tags: tags.unwrap_or_default(),
                importance,
                confidence,
            },
        )
        .await?;
    Ok(json!({
        "memory": outcome.memory,
        "contradictions": outcome.contradictions,
    }))
}

pub async fn recall(engine: &Engine, id: String) -> Result<Value> {
    match engine.recall_memory(&id).await? {
        Some(outcome) => Ok(json!({
            "memory": outcome.memory,
            "effective_confidence": outcome.effective_confidence,
            "retention": outcome.retention,
            "unresolved_contradictions": outcome.unresolved_contradictions,
        })),
        None => Ok(json!({ "error": "memory not found", "id": id })),
    }
}

pub async fn search(
    engine: &Engine,
    query: String,
    limit: Option<i64>,
    confidence_threshold: Option<f64>,
) -> Result<Value> {
    let project = engine.project_id().await;
    let k = limit.unwrap_or(10).clamp(1, 100) as usize;
    let threshold = confidence_threshold.unwrap_or(0.0).clamp(0.0, 1.0);
    let hits = engine.hybrid_search(&query, &project, k, threshold).await?;
    let count = hits.len();
    Ok(json!({ "results": hits, "count": count }))
}

#[allow(clippy::too_many_arguments)]
pub async fn update(
    engine: &Engine,
    id: String,
    content: Option<String>,
    memory_type: Option<String>,
    tags: Option<Vec<String>>,
    importance: Option<f64>,
    confidence: Option<f64>,
) -> Result<Value> {
    let memory_type = match memory_type {
        Some(raw) => Some(parse_type(Some(&raw))?),
        None => None,
    };
    match engine
        .update_memory(&id, content, memory_type, tags, importance, confidence)
        .await?
    {
        Some(outcome) => Ok(json!({
            "memory": outcome.memory,
            "contradictions": outcome.contradictions,
        })),
        None => Ok(json!({ "error": "memory not found", "id": id })),
    }
}

pub async fn delete(engine: &Engine, id: String, permanent: Option<bool>) -> Result<Value> {
    let permanent = permanent.unwrap_or(false);
    let existed = engine.delete_memory(&id, permanent).await?;
    if existed {
        Ok(json!({ "deleted": id, "permanent": permanent }))
    } else {
        Ok(json!({ "error": "memory not found", "id": id }))
    }
}

pub async fn list(
    engine: &Engine,
    memory_type: Option<String>,
    tag: Option<String>,
    include_deleted: Option<bool>,
    limit: Option<i64>,
    offset: Option<i64>,
) -> Result<Value> {
    let project = engine.project_id().await;
    let rows = engine
        .list_memories(
            &project,
            memory_type,
            tag,
            include_deleted.unwrap_or(false),
            limit.unwrap_or(20).clamp(1, 100) as usize,
            offset.unwrap_or(0).max(0) as usize,
        )
        .await?;
    let now = chrono::Utc::now();
    let items: Vec<Value> = rows
        .into_iter()
        .map(|(memory, effective)| {
            let level = scoring::retention_level(&memory, now);
            json!({
                "memory": memory,
                "effective_confidence": effective,
                "retention_level": level,
            })
        })
        .collect();
    Ok(json!({ "memories": items }))
}

/// Decay report for one memory.
pub async fn retention(engine: &Engine, id: String) -> Result<Value> {
    let row = {
        let id = id.clone();
        engine
            .pool
            .run(move |conn| crate::db::get_memory_sync(conn, &id))
            .await?
    };
    match row {
        Some(memory) => {
            let now = chrono::Utc::now();
            Ok(json!({
                "id": memory.id,
                "effective_confidence": scoring::effective_confidence(&memory, now),
                "retention": scoring::retention(&memory, now),
                "retention_level": scoring::retention_level(&memory, now),
                "strength": memory.strength,
                "access_count": memory.access_count,
            }))
        }
        None => Ok(json!({ "error": "memory not found", "id": id })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_engine;

    #[tokio::test]
    async fn test_store_and_recall_via_handlers() {
        let engine = test_engine().await;
        engine.set_project_id("demo".to_string()).await;

        let stored = store(
            &engine,
            "handler-level fact".to_string(),
            Some("decision".to_string()),
            Some(vec!["x".to_string()]),
            None,
            None,
        )
        .await
        .unwrap();
        let id = stored["memory"]["id"].as_str().unwrap().to_string();

        let recalled = recall(&engine, id).await.unwrap();
        assert_eq!(recalled["memory"]["content"], "handler-level fact");
        assert_eq!(recalled["memory"]["memory_type"], "decision");
    }

    #[tokio::test]
    async fn test_invalid_type_rejected() {
        let engine = test_engine().await;
        let err = store(&engine, "x".repeat(30), Some("belief".to_string()), None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngramError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_recall_missing_is_error_value() {
        let engine = test_engine().await;
        let value = recall(&engine, "deadbeefdeadbeefdeadbeefdeadbeef".to_string())
            .await
            .unwrap();
        assert!(value["error"].is_string());
    }
}
