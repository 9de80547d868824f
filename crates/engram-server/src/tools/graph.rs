// tools/graph.rs
// Entity and edge tools, both fanning out on `action`.

use serde_json::{Value, json};

use crate::db;
use crate::engine::Engine;
use crate::error::Result;
use crate::utils::new_id;

use super::unknown_action;

#[allow(clippy::too_many_arguments)]
pub async fn entity_dispatch(
    engine: &Engine,
    action: String,
    name: Option<String>,
    entity_type: Option<String>,
    observations: Option<Vec<String>>,
    query: Option<String>,
    relation_type: Option<String>,
    to_name: Option<String>,
    parent_type: Option<String>,
    description: Option<String>,
) -> Result<Value> {
    let project = engine.project_id().await;

    match action.as_str() {
        "create" => {
            let Some(name) = name else {
                return Ok(json!({ "error": "create requires name" }));
            };
            let entity_type = entity_type.unwrap_or_else(|| "concept".to_string());
            let observations = observations.unwrap_or_default();
            let guard = engine.lock.acquire().await?;
            let result = engine
                .pool
                .run(move |conn| {
                    db::create_entity_sync(conn, &project, &name, &entity_type, &observations)
                })
                .await;
            guard.release();
            Ok(json!({ "entity": result? }))
        }
        "get" => {
            let Some(name) = name else {
                return Ok(json!({ "error": "get requires name" }));
            };
            let entity = engine
                .pool
                .run(move |conn| db::get_entity_sync(conn, &project, &name))
                .await?;
            match entity {
                Some(e) => Ok(json!({ "entity": e })),
                None => Ok(json!({ "error": "entity not found" })),
            }
        }
        "search" => {
            let q = query.unwrap_or_default();
            let entities = engine
                .pool
                .run(move |conn| db::search_entities_sync(conn, &project, &q, 50))
                .await?;
            Ok(json!({ "entities": entities }))
        }
        "observe" => {
            let (Some(name), Some(observations)) = (name, observations) else {
                return Ok(json!({ "error": "observe requires name and observations" }));
            };
            let guard = engine.lock.acquire().await?;
            let result = engine
                .pool
                .run(move |conn| db::observe_entity_sync(conn, &project, &name, &observations))
                .await;
            guard.release();
            match result? {
                Some(e) => Ok(json!({ "entity": e })),
                None => Ok(json!({ "error": "entity not found" })),
            }
        }
        "delete" => {
            let Some(name) = name else {
                return Ok(json!({ "error": "delete requires name" }));
            };
            let guard = engine.lock.acquire().await?;
            let result = engine
                .pool
                .run(move |conn| db::delete_entity_sync(conn, &project, &name))
                .await;
            guard.release();
            Ok(json!({ "deleted": result? }))
        }
        "link" => {
            let (Some(from), Some(relation), Some(to)) = (name, relation_type, to_name) else {
                return Ok(json!({ "error": "link requires name, relation_type and to_name" }));
            };
            let guard = engine.lock.acquire().await?;
            let result = engine
                .pool
                .run(move |conn| db::link_entities_sync(conn, &project, &from, &relation, &to))
                .await;
            guard.release();
            match result? {
                Some(link) => Ok(json!({ "relation": link })),
                None => Ok(json!({ "error": "both entities must exist" })),
            }
        }
        "types" => {
            // With a name, registers a new type; without, lists the hierarchy
            if let Some(name) = name {
                let guard = engine.lock.acquire().await?;
                let result = engine
                    .pool
                    .run(move |conn| {
                        db::add_entity_type_sync(
                            conn,
                            &name,
                            parent_type.as_deref(),
                            description.as_deref(),
                        )
                    })
                    .await;
                guard.release();
                if result? {
                    Ok(json!({ "ok": true }))
                } else {
                    Ok(json!({ "error": "parent type does not exist" }))
                }
            } else {
                let types = engine
                    .pool
                    .run(db::list_entity_types_sync)
                    .await?;
                let items: Vec<Value> = types
                    .into_iter()
                    .map(|(name, parent, description)| {
                        json!({ "name": name, "parent_type": parent, "description": description })
                    })
                    .collect();
                Ok(json!({ "types": items }))
            }
        }
        other => Ok(unknown_action("entity", other)),
    }
}

/// Transitive search over an entity-type subtree.
pub async fn entity_hierarchy(
    engine: &Engine,
    entity_type: String,
    query: Option<String>,
    limit: Option<i64>,
) -> Result<Value> {
    let project = engine.project_id().await;
    let limit = limit.unwrap_or(50).clamp(1, 100) as usize;
    let entities = engine
        .pool
        .run(move |conn| {
            db::search_entities_by_type_hierarchy_sync(
                conn,
                &project,
                &entity_type,
                query.as_deref(),
                limit,
            )
        })
        .await?;
    Ok(json!({ "entities": entities }))
}

#[allow(clippy::too_many_arguments)]
pub async fn edge_dispatch(
    engine: &Engine,
    action: String,
    edge_id: Option<String>,
    from_id: Option<String>,
    to_id: Option<String>,
    relation_type: Option<String>,
    memory_id: Option<String>,
    as_of: Option<String>,
    confidence: Option<f64>,
) -> Result<Value> {
    let project = engine.project_id().await;

    match action.as_str() {
        "create" => {
            let (Some(from), Some(to), Some(relation)) = (from_id, to_id, relation_type) else {
                return Ok(json!({ "error": "create requires from_id, to_id and relation_type" }));
            };
            let id = new_id();
            let guard = engine.lock.acquire().await?;
            let result = {
                let id = id.clone();
                engine
                    .pool
                    .run(move |conn| {
                        db::create_edge_sync(
                            conn,
                            &id,
                            &project,
                            &from,
                            &to,
                            &relation,
                            confidence.unwrap_or(0.5).clamp(0.0, 1.0),
                            None,
                        )?;
                        db::get_edge_sync(conn, &id)
                    })
                    .await
            };
            guard.release();
            Ok(json!({ "edge": result? }))
        }
        "query" => {
            let edges = engine
                .pool
                .run(move |conn| {
                    db::query_edges_sync(
                        conn,
                        &project,
                        memory_id.as_deref(),
                        relation_type.as_deref(),
                        as_of.as_deref(),
                        100,
                    )
                })
                .await?;
            Ok(json!({ "edges": edges }))
        }
        "invalidate" => {
            let Some(id) = edge_id else {
                return Ok(json!({ "error": "invalidate requires edge_id" }));
            };
            let guard = engine.lock.acquire().await?;
            let result = {
                let id = id.clone();
                engine
                    .pool
                    .run(move |conn| db::invalidate_edge_sync(conn, &id))
                    .await
            };
            guard.release();
            // Second invalidation is a no-op, reported as already done
            Ok(json!({ "invalidated": id, "changed": result? }))
        }
        other => Ok(unknown_action("edge", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_engine;

    #[tokio::test]
    async fn test_entity_lifecycle() {
        let engine = test_engine().await;
        engine.set_project_id("demo".to_string()).await;

        entity_dispatch(
            &engine,
            "create".into(),
            Some("tokio".into()),
            Some("technology".into()),
            Some(vec!["async runtime".into()]),
            None,
            None,
            None,
            None,
            None,
        )
        .await
        .unwrap();

        let got = entity_dispatch(
            &engine, "get".into(), Some("tokio".into()), None, None, None, None, None, None, None,
        )
        .await
        .unwrap();
        assert_eq!(got["entity"]["name"], "tokio");

        let deleted = entity_dispatch(
            &engine, "delete".into(), Some("tokio".into()), None, None, None, None, None, None,
            None,
        )
        .await
        .unwrap();
        assert_eq!(deleted["deleted"], true);
    }

    #[tokio::test]
    async fn test_edge_invalidate_idempotent() {
        let engine = test_engine().await;
        engine.set_project_id("demo".to_string()).await;

        let created = edge_dispatch(
            &engine,
            "create".into(),
            None,
            Some("a".into()),
            Some("b".into()),
            Some("confirms".into()),
            None,
            None,
            None,
        )
        .await
        .unwrap();
        let id = created["edge"]["id"].as_str().unwrap().to_string();

        let first = edge_dispatch(
            &engine, "invalidate".into(), Some(id.clone()), None, None, None, None, None, None,
        )
        .await
        .unwrap();
        assert_eq!(first["changed"], true);

        let second = edge_dispatch(
            &engine, "invalidate".into(), Some(id), None, None, None, None, None, None,
        )
        .await
        .unwrap();
        assert_eq!(second["changed"], false);
    }

    #[tokio::test]
    async fn test_unknown_actions() {
        let engine = test_engine().await;
        let out = entity_dispatch(
            &engine, "merge".into(), None, None, None, None, None, None, None, None,
        )
        .await
        .unwrap();
        assert!(out["error"].is_string());

        let out = edge_dispatch(&engine, "drop".into(), None, None, None, None, None, None, None)
            .await
            .unwrap();
        assert!(out["error"].is_string());
    }
}
