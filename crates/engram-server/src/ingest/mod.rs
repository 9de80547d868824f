// crates/engram-server/src/ingest/mod.rs
// Conversation ingestion: archive discovery, hash dedup, fact extraction
// behind the quality gate, summaries and topics.

pub mod parser;
pub mod quality;

use std::path::PathBuf;

use walkdir::WalkDir;

use crate::db;
use crate::engine::Engine;
use crate::error::Result;
use crate::utils::{new_id, truncate};

pub use parser::{ParsedConversation, parse_archive, parse_archive_file};

/// Candidate fact length bounds in chars.
const FACT_MIN_CHARS: usize = 20;
const FACT_MAX_CHARS: usize = 300;

/// Confidence assigned to auto-extracted facts, by convention.
pub const EXTRACTED_CONFIDENCE: f64 = 0.7;

/// Outcome of one archive ingest.
#[derive(Debug, serde::Serialize)]
pub struct IngestOutcome {
    pub conversation_id: Option<String>,
    pub deduplicated: bool,
    pub messages: usize,
    pub facts_extracted: usize,
}

/// Counts from a garbage sweep.
#[derive(Debug, Default, serde::Serialize)]
pub struct GarbageReport {
    pub auto_facts_deleted: usize,
    pub stopword_entities_deleted: usize,
    pub definite_garbage_deleted: usize,
}

/// The garbage sweep body, shared with the consolidation cycle (which runs
/// it inside its own transaction while already holding the write lock).
pub(crate) fn cleanup_garbage_sync(
    conn: &rusqlite::Connection,
    project_id: &str,
) -> rusqlite::Result<GarbageReport> {
    let mut report = GarbageReport::default();

    let auto_sourced = db::auto_sourced_memory_ids_sync(conn, project_id)?;
    let auto_ids: std::collections::HashSet<String> =
        auto_sourced.iter().map(|(id, _)| id.clone()).collect();
    for (id, content) in &auto_sourced {
        if !quality::is_quality_fact(content) {
            db::soft_delete_memory_sync(conn, id)?;
            report.auto_facts_deleted += 1;
        }
    }

    let entities: Vec<(String, String)> = {
        let mut stmt = conn.prepare("SELECT id, name FROM entities WHERE project_id = ?1")?;
        let rows = stmt
            .query_map([project_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    };
    for (id, name) in &entities {
        if quality::is_stopword_name(name) {
            conn.execute(
                "DELETE FROM entity_relations WHERE from_entity = ?1 OR to_entity = ?1",
                [id],
            )?;
            conn.execute("DELETE FROM entities WHERE id = ?1", [id])?;
            report.stopword_entities_deleted += 1;
        }
    }

    let manual = db::list_memories_sync(conn, project_id, None, None, false, 1000, 0)?;
    for memory in &manual {
        if auto_ids.contains(&memory.id) {
            continue;
        }
        if quality::is_definite_garbage(&memory.content) {
            db::soft_delete_memory_sync(conn, &memory.id)?;
            report.definite_garbage_deleted += 1;
        }
    }

    Ok(report)
}

/// Split assistant prose into sentence-sized fact candidates.
fn sentence_candidates(text: &str) -> Vec<String> {
    text.split(['\n'])
        .flat_map(|line| line.split(". "))
        .map(|s| s.trim().trim_end_matches('.').to_string())
        .filter(|s| s.len() >= FACT_MIN_CHARS && s.len() <= FACT_MAX_CHARS)
        .collect()
}

impl Engine {
    /// Archive files under the configured chat directory, newest first.
    pub fn discover_chat_archives(&self) -> Vec<PathBuf> {
        let Some(root) = &self.config.chat_dir else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = WalkDir::new(root)
            .max_depth(4)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "jsonl"))
            .map(|e| e.into_path())
            .collect();
        files.sort_by_key(|p| {
            std::cmp::Reverse(
                std::fs::metadata(p)
                    .and_then(|m| m.modified())
                    .ok(),
            )
        });
        files
    }

    /// Persist a parsed conversation, deduplicating by (source, session id)
    /// and by content hash, then extract facts from it.
    pub async fn ingest_conversation(
        &self,
        project_id: &str,
        source: &str,
        parsed: ParsedConversation,
    ) -> Result<IngestOutcome> {
        let session_id = parsed
            .source_session_id
            .clone()
            .unwrap_or_else(|| parsed.content_hash.clone());

        // Dedup before writing anything
        let duplicate = {
            let source = source.to_string();
            let session = session_id.clone();
            let hash = parsed.content_hash.clone();
            self.pool
                .run(move |conn| {
                    Ok::<_, rusqlite::Error>(
                        db::find_conversation_sync(conn, &source, &session)?.is_some()
                            || db::conversation_hash_exists_sync(conn, &hash)?,
                    )
                })
                .await?
        };
        if duplicate {
            tracing::debug!(session = %session_id, "Conversation already ingested");
            return Ok(IngestOutcome {
                conversation_id: None,
                deduplicated: true,
                messages: 0,
                facts_extracted: 0,
            });
        }

        let conversation_id = new_id();
        let message_count = parsed.messages.len();

        let guard = self.lock.acquire().await?;
        {
            let conversation_id = conversation_id.clone();
            let project = project_id.to_string();
            let source = source.to_string();
            let session = session_id.clone();
            let parsed = parsed.clone();
            let result = self
                .pool
                .run(move |conn| {
                    let tx = conn.unchecked_transaction()?;
                    db::insert_conversation_sync(
                        &tx,
                        &conversation_id,
                        &project,
                        &source,
                        &session,
                        parsed.title.as_deref(),
                        &parsed.content_hash,
                        parsed.started_at.as_deref(),
                    )?;
                    for (seq, message) in parsed.messages.iter().enumerate() {
                        let message_id = new_id();
                        db::insert_message_sync(
                            &tx,
                            &message_id,
                            &conversation_id,
                            seq as i64,
                            &message.role,
                            &message.content,
                            message.timestamp.as_deref(),
                        )?;
                        for (tool_seq, tool_use) in message.tool_uses.iter().enumerate() {
                            db::insert_tool_use_sync(
                                &tx,
                                &new_id(),
                                &message_id,
                                tool_seq as i64,
                                &tool_use.tool_name,
                                tool_use.input.as_deref(),
                                tool_use.output.as_deref(),
                            )?;
                        }
                    }
                    tx.commit()?;
                    Ok::<_, rusqlite::Error>(())
                })
                .await;
            guard.release();
            result?;
        }

        let facts_extracted = self
            .extract_facts_from_conversation(project_id, &conversation_id)
            .await?;

        Ok(IngestOutcome {
            conversation_id: Some(conversation_id),
            deduplicated: false,
            messages: message_count,
            facts_extracted,
        })
    }

    /// Run candidate extraction over the conversation's assistant outputs.
    /// Rejects duplicates and quality failures; survivors become memories
    /// tagged `auto` with a memory_sources link.
    pub async fn extract_facts_from_conversation(
        &self,
        project_id: &str,
        conversation_id: &str,
    ) -> Result<usize> {
        let messages = {
            let conversation = conversation_id.to_string();
            self.pool
                .run(move |conn| db::conversation_messages_sync(conn, &conversation))
                .await?
        };

        let candidates: Vec<String> = messages
            .iter()
            .filter(|m| m.role == "assistant")
            .flat_map(|m| sentence_candidates(&m.content))
            .filter(|c| quality::is_quality_fact(c))
            .collect();
        if candidates.is_empty() {
            return Ok(0);
        }

        let guard = self.lock.acquire().await?;
        let stored = {
            let project = project_id.to_string();
            let conversation = conversation_id.to_string();
            let result = self
                .pool
                .run(move |conn| {
                    let tx = conn.unchecked_transaction()?;
                    let mut stored = 0usize;
                    for candidate in &candidates {
                        if db::is_duplicate_content_sync(&tx, &project, candidate)? {
                            continue;
                        }
                        let memory_id = new_id();
                        db::insert_memory_sync(
                            &tx,
                            db::InsertMemoryParams {
                                id: &memory_id,
                                project_id: &project,
                                content: candidate,
                                memory_type: engram_types::MemoryType::Fact,
                                tags: &["auto".to_string()],
                                importance: 0.5,
                                confidence: EXTRACTED_CONFIDENCE,
                                embedding: None,
                            },
                        )?;
                        db::insert_memory_source_sync(&tx, &memory_id, &conversation, None)?;
                        stored += 1;
                    }
                    tx.commit()?;
                    Ok::<_, rusqlite::Error>(stored)
                })
                .await;
            guard.release();
            result?
        };

        if stored > 0 {
            tracing::info!(conversation = conversation_id, facts = stored, "Facts extracted");
        }
        Ok(stored)
    }

    /// Three-strategy garbage sweep, soft-delete only:
    /// auto facts failing quality, stop-word entities, and manual memories
    /// that are definitely garbage.
    pub async fn cleanup_garbage_facts(&self, project_id: &str) -> Result<GarbageReport> {
        let guard = self.lock.acquire().await?;
        let project = project_id.to_string();
        let result = self
            .pool
            .run(move |conn| {
                let tx = conn.unchecked_transaction()?;
                let report = cleanup_garbage_sync(&tx, &project)?;
                tx.commit()?;
                Ok::<_, rusqlite::Error>(report)
            })
            .await;
        guard.release();
        Ok(result?)
    }

    /// Produce and persist a brief or detailed extractive summary.
    pub async fn summarize_conversation(
        &self,
        project_id: &str,
        conversation_id: &str,
        detailed: bool,
    ) -> Result<String> {
        let messages = {
            let conversation = conversation_id.to_string();
            self.pool
                .run(move |conn| db::conversation_messages_sync(conn, &conversation))
                .await?
        };
        if messages.is_empty() {
            return Err(crate::error::EngramError::NotFound(format!(
                "conversation {conversation_id}"
            )));
        }

        let user_count = messages.iter().filter(|m| m.role == "user").count();
        let assistant_count = messages.len() - user_count;
        let opening = messages
            .iter()
            .find(|m| m.role == "user")
            .map(|m| truncate(&m.content, 120))
            .unwrap_or_default();

        let summary = if detailed {
            let mut lines = vec![format!(
                "Conversation with {user_count} user and {assistant_count} assistant messages."
            )];
            for message in messages.iter().take(10) {
                if !message.content.is_empty() {
                    lines.push(format!("{}: {}", message.role, truncate(&message.content, 100)));
                }
            }
            lines.join("\n")
        } else {
            format!(
                "{opening} ({user_count} prompts, {assistant_count} replies)"
            )
        };

        let level = if detailed { "detailed" } else { "brief" };
        {
            let id = new_id();
            let project = project_id.to_string();
            let conversation = conversation_id.to_string();
            let level = level.to_string();
            let summary = summary.clone();
            let guard = self.lock.acquire().await?;
            let result = self
                .pool
                .run(move |conn| {
                    db::insert_summary_sync(conn, &id, &project, &conversation, &level, &summary)
                })
                .await;
            guard.release();
            result?;
        }
        Ok(summary)
    }

    /// Summarize every conversation in the project that has no summary yet.
    pub async fn summarize_batch(&self, project_id: &str, limit: usize) -> Result<usize> {
        let conversations = {
            let project = project_id.to_string();
            self.pool
                .run(move |conn| db::list_conversations_sync(conn, &project, limit))
                .await?
        };

        let mut summarized = 0;
        for conversation in conversations {
            let has_summary = {
                let id = conversation.id.clone();
                self.pool
                    .run(move |conn| {
                        conn.query_row(
                            "SELECT COUNT(*) FROM conversation_summaries WHERE conversation_id = ?1",
                            [&id],
                            |row| row.get::<_, i64>(0),
                        )
                    })
                    .await?
                    > 0
            };
            if has_summary {
                continue;
            }
            if self
                .summarize_conversation(project_id, &conversation.id, false)
                .await
                .is_ok()
            {
                summarized += 1;
            }
        }
        Ok(summarized)
    }

    /// Top-N term frequencies over the conversation, stop-words filtered.
    pub async fn extract_conversation_topics(
        &self,
        project_id: &str,
        conversation_id: &str,
        top_n: usize,
    ) -> Result<Vec<(String, i64)>> {
        let messages = {
            let conversation = conversation_id.to_string();
            self.pool
                .run(move |conn| db::conversation_messages_sync(conn, &conversation))
                .await?
        };

        let mut frequencies: std::collections::HashMap<String, i64> =
            std::collections::HashMap::new();
        for message in &messages {
            for word in message.content.split_whitespace() {
                let word = word
                    .trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase();
                if word.len() <= 3 {
                    continue;
                }
                if crate::contradiction::lexical::STOP_WORDS.contains(&word.as_str()) {
                    continue;
                }
                *frequencies.entry(word).or_insert(0) += 1;
            }
        }

        let mut topics: Vec<(String, i64)> = frequencies.into_iter().collect();
        topics.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        topics.truncate(top_n);

        {
            let project = project_id.to_string();
            let conversation = conversation_id.to_string();
            let topics = topics.clone();
            let guard = self.lock.acquire().await?;
            let result = self
                .pool
                .run(move |conn| {
                    for (topic, frequency) in &topics {
                        db::insert_topic_sync(
                            conn,
                            &new_id(),
                            &project,
                            &conversation,
                            topic,
                            *frequency,
                        )?;
                    }
                    Ok::<_, rusqlite::Error>(())
                })
                .await;
            guard.release();
            result?;
        }

        Ok(topics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_engine;

    fn archive(session: &str, assistant_text: &str) -> String {
        format!(
            r#"{{"type":"user","sessionId":"{session}","message":{{"content":"what did we decide"}}}}
{{"type":"assistant","sessionId":"{session}","message":{{"content":[{{"type":"text","text":"{assistant_text}"}}]}}}}"#
        )
    }

    #[tokio::test]
    async fn test_ingest_dedup_by_session_and_hash() {
        let engine = test_engine().await;
        let data = archive("sess-1", "The team standardized on Postgres for storage going forward");

        let first = engine
            .ingest_conversation("demo", "claude", parse_archive(&data))
            .await
            .unwrap();
        assert!(!first.deduplicated);
        assert_eq!(first.messages, 2);

        // Identical archive again: deduplicated, nothing persisted
        let second = engine
            .ingest_conversation("demo", "claude", parse_archive(&data))
            .await
            .unwrap();
        assert!(second.deduplicated);

        let conversations = engine
            .pool
            .run(|conn| db::list_conversations_sync(conn, "demo", 10))
            .await
            .unwrap();
        assert_eq!(conversations.len(), 1);
    }

    #[tokio::test]
    async fn test_quality_reject_stores_no_facts() {
        let engine = test_engine().await;
        // Truncated fragment fails the quality gate
        let data = archive("sess-2", "to find where r");
        let outcome = engine
            .ingest_conversation("demo", "claude", parse_archive(&data))
            .await
            .unwrap();
        assert_eq!(outcome.facts_extracted, 0);

        // And the sweep deletes nothing net-new
        let report = engine.cleanup_garbage_facts("demo").await.unwrap();
        assert_eq!(report.auto_facts_deleted, 0);
        assert_eq!(report.definite_garbage_deleted, 0);
    }

    #[tokio::test]
    async fn test_fact_extraction_and_source_link() {
        let engine = test_engine().await;
        let data = archive(
            "sess-3",
            "The team standardized on Postgres for primary storage going forward",
        );
        let outcome = engine
            .ingest_conversation("demo", "claude", parse_archive(&data))
            .await
            .unwrap();
        assert_eq!(outcome.facts_extracted, 1);

        let listed = engine.list_memories("demo", None, None, false, 10, 0).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0.tags, vec!["auto"]);
        assert!((listed[0].0.confidence - EXTRACTED_CONFIDENCE).abs() < 1e-9);

        let sourced = engine
            .pool
            .run(|conn| db::auto_sourced_memory_ids_sync(conn, "demo"))
            .await
            .unwrap();
        assert_eq!(sourced.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_fact_not_stored_twice() {
        let engine = test_engine().await;
        let text = "The team standardized on Postgres for primary storage going forward";
        engine
            .ingest_conversation("demo", "claude", parse_archive(&archive("sess-a", text)))
            .await
            .unwrap();
        // Different session, same fact content
        let outcome = engine
            .ingest_conversation(
                "demo",
                "claude",
                parse_archive(&format!(
                    r#"{{"type":"user","sessionId":"sess-b","message":{{"content":"again"}}}}
{{"type":"assistant","sessionId":"sess-b","message":{{"content":[{{"type":"text","text":"{text}"}}]}}}}"#
                )),
            )
            .await
            .unwrap();
        assert_eq!(outcome.facts_extracted, 0);
    }

    #[tokio::test]
    async fn test_summaries_and_search() {
        let engine = test_engine().await;
        let data = archive("sess-4", "We migrated the ingestion pipeline to the new parser module");
        let outcome = engine
            .ingest_conversation("demo", "claude", parse_archive(&data))
            .await
            .unwrap();
        let conversation_id = outcome.conversation_id.unwrap();

        let brief = engine
            .summarize_conversation("demo", &conversation_id, false)
            .await
            .unwrap();
        assert!(brief.contains("1 prompts"));

        let detailed = engine
            .summarize_conversation("demo", &conversation_id, true)
            .await
            .unwrap();
        assert!(detailed.contains("assistant:"));

        let hits = engine
            .pool
            .run(|conn| db::search_summaries_sync(conn, "demo", "prompts", 10))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_topics_frequency_order() {
        let engine = test_engine().await;
        let data = archive(
            "sess-5",
            "Postgres replication and Postgres backups need Postgres tuning while Redis stays cache only",
        );
        let outcome = engine
            .ingest_conversation("demo", "claude", parse_archive(&data))
            .await
            .unwrap();
        let conversation_id = outcome.conversation_id.unwrap();

        let topics = engine
            .extract_conversation_topics("demo", &conversation_id, 5)
            .await
            .unwrap();
        assert_eq!(topics[0].0, "postgres");
        assert_eq!(topics[0].1, 3);
    }

    #[tokio::test]
    async fn test_cleanup_deletes_stopword_entities_and_garbage() {
        let engine = test_engine().await;
        engine
            .pool
            .run(|conn| {
                db::create_entity_sync(conn, "demo", "The", "concept", &[])?;
                db::create_entity_sync(conn, "demo", "Tokio", "technology", &[])?;
                Ok::<_, rusqlite::Error>(())
            })
            .await
            .unwrap();
        // A manually stored row that is definitely garbage
        engine
            .pool
            .run(|conn| {
                db::insert_memory_sync(
                    conn,
                    db::InsertMemoryParams {
                        id: "gggggggggggggggggggggggggggggggg",
                        project_id: "demo",
                        content: "| a | b |",
                        memory_type: engram_types::MemoryType::Note,
                        tags: &[],
                        importance: 0.5,
                        confidence: 0.5,
                        embedding: None,
                    },
                )
            })
            .await
            .unwrap();

        let report = engine.cleanup_garbage_facts("demo").await.unwrap();
        assert_eq!(report.stopword_entities_deleted, 1);
        assert_eq!(report.definite_garbage_deleted, 1);

        let survivors = engine
            .pool
            .run(|conn| db::search_entities_sync(conn, "demo", "Tokio", 10))
            .await
            .unwrap();
        assert_eq!(survivors.len(), 1);
    }
}
