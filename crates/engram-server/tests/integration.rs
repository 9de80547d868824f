// End-to-end scenarios against a full in-memory engine.

use std::sync::Arc;

use engram::background::consolidation::run_consolidation;
use engram::config::EngramConfig;
use engram::engine::Engine;
use engram::ingest::parse_archive;
use engram::memory::StoreParams;
use engram_types::MemoryType;

async fn engine() -> Arc<Engine> {
    let config = EngramConfig {
        embedding_dimensions: 4,
        ..Default::default()
    };
    let engine = Engine::open_in_memory(config).await.unwrap();
    engine.set_project_id("demo".to_string()).await;
    engine
}

fn params(content: &str, importance: f64) -> StoreParams {
    StoreParams {
        content: content.to_string(),
        memory_type: MemoryType::Fact,
        tags: vec![],
        importance: Some(importance),
        confidence: None,
    }
}

#[tokio::test]
async fn scenario_store_and_immediate_recall() {
    let engine = engine().await;

    let stored = engine
        .store_memory(
            "demo",
            StoreParams {
                content: "SQLite uses WAL for concurrent readers".to_string(),
                memory_type: MemoryType::Fact,
                tags: vec!["sqlite".into(), "wal".into()],
                importance: None,
                confidence: None,
            },
        )
        .await
        .unwrap();

    let recalled = engine
        .recall_memory(&stored.memory.id)
        .await
        .unwrap()
        .expect("fresh memory must recall");

    assert_eq!(recalled.memory.content, "SQLite uses WAL for concurrent readers");
    assert_eq!(recalled.memory.tags, vec!["sqlite", "wal"]);
    assert_eq!(recalled.memory.access_count, 1);
    assert!(recalled.memory.confidence >= 0.55);
    assert!(recalled.memory.strength >= 1.0);
}

#[tokio::test]
async fn scenario_negation_contradiction() {
    let engine = engine().await;

    engine
        .store_memory("demo", params("The deployment is complete", 0.5))
        .await
        .unwrap();
    let second = engine
        .store_memory("demo", params("The deployment is not complete", 0.5))
        .await
        .unwrap();

    assert!(!second.contradictions.is_empty());
    let conflict = &second.contradictions[0];
    assert!(conflict.confidence >= 0.5);
    assert!(matches!(
        conflict.kind,
        engram_types::ContradictionKind::Negation | engram_types::ContradictionKind::Factual
    ));

    let edges = engine
        .pool
        .run(|conn| engram::db::live_contradiction_edges_sync(conn, "demo"))
        .await
        .unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].relation_type, "potential_contradiction");
}

#[tokio::test]
async fn scenario_hybrid_search_fusion() {
    let engine = engine().await;

    let m1 = engine
        .store_memory("demo", params("Qdrant is our vector store", 0.8))
        .await
        .unwrap();
    let m2 = engine
        .store_memory(
            "demo",
            params("We use sqlite-vec as a fallback vector store", 0.5),
        )
        .await
        .unwrap();
    engine
        .store_memory("demo", params("Lunch is at noon", 0.5))
        .await
        .unwrap();

    let hits = engine
        .hybrid_search("vector store", "demo", 10, 0.0)
        .await
        .unwrap();

    assert!(hits.len() >= 2);
    assert_eq!(hits[0].id, m1.memory.id);
    assert_eq!(hits[1].id, m2.memory.id);
    assert!(hits[0].combined_score > hits[1].combined_score);
    // M3 has no keyword overlap and no semantic signal here
    assert!(hits.iter().all(|h| !h.content.contains("Lunch")));
}

#[tokio::test]
async fn scenario_write_lock_fifo() {
    let engine = engine().await;
    let order: Arc<std::sync::Mutex<Vec<char>>> = Arc::new(std::sync::Mutex::new(Vec::new()));

    let guard = engine.lock.acquire().await.unwrap();
    order.lock().unwrap().push('A');

    let mut handles = Vec::new();
    for (i, letter) in ['B', 'C'].into_iter().enumerate() {
        let lock = engine.lock.clone();
        let order = order.clone();
        handles.push(tokio::spawn(async move {
            let guard = lock.acquire().await.unwrap();
            if letter == 'B' {
                tokio::time::sleep(std::time::Duration::from_millis(15)).await;
            }
            order.lock().unwrap().push(letter);
            guard.release();
        }));
        while engine.lock.stats().queue_depth < i + 1 {
            tokio::task::yield_now().await;
        }
    }

    guard.release();
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec!['A', 'B', 'C']);

    let stats = engine.lock.stats();
    assert_eq!(stats.active, 0);
    assert_eq!(stats.queue_depth, 0);
}

#[tokio::test]
async fn scenario_consolidation_strengthening() {
    let engine = engine().await;

    for (id, count) in [("m0", 0i64), ("m1", 1), ("m5", 5), ("m10", 10)] {
        let id = id.to_string();
        engine
            .pool
            .run(move |conn| {
                conn.execute(
                    "INSERT INTO memories (id, project_id, content, memory_type, access_count, confidence)
                     VALUES (?1, 'demo', 'row ' || ?1, 'fact', ?2, 0.5)",
                    rusqlite::params![id, count],
                )
            })
            .await
            .unwrap();
    }

    let report = run_consolidation(&engine).await.unwrap();
    assert!(!report.skipped);
    assert_eq!(report.strengthened, 2);

    let bumped: Vec<(String, f64)> = engine
        .pool
        .run(|conn| {
            let mut stmt = conn.prepare("SELECT id, confidence FROM memories ORDER BY id")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok::<_, rusqlite::Error>(rows)
        })
        .await
        .unwrap();
    for (id, confidence) in bumped {
        let expected = if id == "m5" || id == "m10" { 0.55 } else { 0.5 };
        assert!((confidence - expected).abs() < 1e-9, "{id}");
    }

    let log_rows: i64 = engine
        .pool
        .run(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM scratchpad WHERE key LIKE 'consolidation_log_%'",
                [],
                |row| row.get(0),
            )
        })
        .await
        .unwrap();
    assert_eq!(log_rows, 1);
}

#[tokio::test]
async fn scenario_chat_ingest_dedup_and_quality() {
    let engine = engine().await;

    let archive = r#"{"type":"user","sessionId":"fixture","message":{"content":"status?"}}
{"type":"assistant","sessionId":"fixture","message":{"content":[{"type":"text","text":"to find where r"}]}}"#;

    // Two identical conversations: one persisted
    let first = engine
        .ingest_conversation("demo", "claude", parse_archive(archive))
        .await
        .unwrap();
    let second = engine
        .ingest_conversation("demo", "claude", parse_archive(archive))
        .await
        .unwrap();
    assert!(!first.deduplicated);
    assert!(second.deduplicated);

    let conversations: i64 = engine
        .pool
        .run(|conn| conn.query_row("SELECT COUNT(*) FROM conversations", [], |r| r.get(0)))
        .await
        .unwrap();
    assert_eq!(conversations, 1);

    // The truncated fragment produced zero facts
    assert_eq!(first.facts_extracted, 0);

    // And the garbage sweep deletes nothing net-new
    let report = engine.cleanup_garbage_facts("demo").await.unwrap();
    assert_eq!(report.auto_facts_deleted, 0);
    assert_eq!(report.stopword_entities_deleted, 0);
    assert_eq!(report.definite_garbage_deleted, 0);
}

#[tokio::test]
async fn scenario_backup_restore_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let source = Engine::open_in_memory(EngramConfig {
        embedding_dimensions: 4,
        backup_dir: dir.path().to_path_buf(),
        ..Default::default()
    })
    .await
    .unwrap();
    source
        .store_memory("demo", params("survives the round trip", 0.5))
        .await
        .unwrap();

    let path = engram::backup::create_backup(&source, true).await.unwrap();

    let target = Engine::open_in_memory(EngramConfig {
        embedding_dimensions: 4,
        ..Default::default()
    })
    .await
    .unwrap();
    let report =
        engram::backup::restore_backup(&target, &path, engram::backup::RestoreMode::Replace)
            .await
            .unwrap();
    assert_eq!(report.restored, 1);

    let listed = target
        .list_memories("demo", None, None, true, 10, 0)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].0.content, "survives the round trip");
}
