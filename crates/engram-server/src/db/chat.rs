// db/chat.rs
// Ingested conversation store: conversations own messages, messages own
// tool uses; memory_sources links extracted memories back to their origin.

use rusqlite::{Connection, OptionalExtension, Row};

/// A persisted conversation header.
#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub id: String,
    pub project_id: String,
    pub source: String,
    pub source_session_id: String,
    pub title: Option<String>,
    pub content_hash: String,
    pub started_at: Option<String>,
    pub ingested_at: String,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub seq: i64,
    pub role: String,
    pub content: String,
    pub created_at: Option<String>,
}

fn parse_conversation_row(row: &Row) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        source: row.get(2)?,
        source_session_id: row.get(3)?,
        title: row.get(4)?,
        content_hash: row.get(5)?,
        started_at: row.get(6)?,
        ingested_at: row.get(7)?,
    })
}

const CONVERSATION_COLUMNS: &str =
    "id, project_id, source, source_session_id, title, content_hash, started_at, ingested_at";

/// Look up a conversation by its dedup key.
pub fn find_conversation_sync(
    conn: &Connection,
    source: &str,
    source_session_id: &str,
) -> rusqlite::Result<Option<ConversationRow>> {
    conn.query_row(
        &format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             WHERE source = ?1 AND source_session_id = ?2"
        ),
        rusqlite::params![source, source_session_id],
        parse_conversation_row,
    )
    .optional()
}

/// Whether any conversation with this content hash already exists (identical
/// archives re-discovered under a different session id).
pub fn conversation_hash_exists_sync(
    conn: &Connection,
    content_hash: &str,
) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM conversations WHERE content_hash = ?1",
        [content_hash],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

#[allow(clippy::too_many_arguments)]
pub fn insert_conversation_sync(
    conn: &Connection,
    id: &str,
    project_id: &str,
    source: &str,
    source_session_id: &str,
    title: Option<&str>,
    content_hash: &str,
    started_at: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO conversations (id, project_id, source, source_session_id, title, content_hash, started_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![id, project_id, source, source_session_id, title, content_hash, started_at],
    )?;
    Ok(())
}

pub fn insert_message_sync(
    conn: &Connection,
    id: &str,
    conversation_id: &str,
    seq: i64,
    role: &str,
    content: &str,
    created_at: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO messages (id, conversation_id, seq, role, content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![id, conversation_id, seq, role, content, created_at],
    )?;
    Ok(())
}

pub fn insert_tool_use_sync(
    conn: &Connection,
    id: &str,
    message_id: &str,
    seq: i64,
    tool_name: &str,
    input: Option<&str>,
    output: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO tool_uses (id, message_id, seq, tool_name, input, output)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![id, message_id, seq, tool_name, input, output],
    )?;
    Ok(())
}

/// Ordered messages of a conversation.
pub fn conversation_messages_sync(
    conn: &Connection,
    conversation_id: &str,
) -> rusqlite::Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, seq, role, content, created_at
         FROM messages WHERE conversation_id = ?1 ORDER BY seq",
    )?;
    let rows = stmt.query_map([conversation_id], |row| {
        Ok(MessageRow {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            seq: row.get(2)?,
            role: row.get(3)?,
            content: row.get(4)?,
            created_at: row.get(5)?,
        })
    })?;
    rows.collect()
}

pub fn list_conversations_sync(
    conn: &Connection,
    project_id: &str,
    limit: usize,
) -> rusqlite::Result<Vec<ConversationRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations
         WHERE project_id = ?1 ORDER BY ingested_at DESC LIMIT ?2"
    ))?;
    let rows = stmt.query_map(
        rusqlite::params![project_id, limit as i64],
        parse_conversation_row,
    )?;
    rows.collect()
}

/// Link a memory back to the conversation (and optionally message) it came from.
pub fn insert_memory_source_sync(
    conn: &Connection,
    memory_id: &str,
    conversation_id: &str,
    message_id: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO memory_sources (memory_id, conversation_id, message_id)
         VALUES (?1, ?2, ?3)",
        rusqlite::params![memory_id, conversation_id, message_id],
    )?;
    Ok(())
}

/// Ids of live memories that were auto-extracted from conversations.
pub fn auto_sourced_memory_ids_sync(
    conn: &Connection,
    project_id: &str,
) -> rusqlite::Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.content FROM memories m
         JOIN memory_sources s ON s.memory_id = m.id
         WHERE m.project_id = ?1 AND m.deleted_at IS NULL",
    )?;
    let rows = stmt.query_map([project_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

pub fn insert_summary_sync(
    conn: &Connection,
    id: &str,
    project_id: &str,
    conversation_id: &str,
    level: &str,
    summary: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO conversation_summaries (id, project_id, conversation_id, level, summary)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![id, project_id, conversation_id, level, summary],
    )?;
    Ok(())
}

/// Text search across stored summaries.
pub fn search_summaries_sync(
    conn: &Connection,
    project_id: &str,
    query: &str,
    limit: usize,
) -> rusqlite::Result<Vec<(String, String, String)>> {
    let pattern = format!(
        "%{}%",
        query.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
    );
    let mut stmt = conn.prepare(
        "SELECT conversation_id, level, summary FROM conversation_summaries
         WHERE project_id = ?1 AND summary LIKE ?2 ESCAPE '\\'
         ORDER BY created_at DESC
         LIMIT ?3",
    )?;
    let rows = stmt.query_map(
        rusqlite::params![project_id, pattern, limit as i64],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;
    rows.collect()
}

pub fn insert_topic_sync(
    conn: &Connection,
    id: &str,
    project_id: &str,
    conversation_id: &str,
    topic: &str,
    frequency: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO conversation_topics (id, project_id, conversation_id, topic, frequency)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![id, project_id, conversation_id, topic, frequency],
    )?;
    Ok(())
}

pub fn conversation_topics_sync(
    conn: &Connection,
    conversation_id: &str,
) -> rusqlite::Result<Vec<(String, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT topic, frequency FROM conversation_topics
         WHERE conversation_id = ?1 ORDER BY frequency DESC",
    )?;
    let rows = stmt.query_map([conversation_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_connection;

    fn insert_conversation(conn: &Connection, id: &str, session: &str, hash: &str) {
        insert_conversation_sync(conn, id, "demo", "claude", session, Some("t"), hash, None)
            .unwrap();
    }

    #[test]
    fn test_dedup_key_lookup() {
        let conn = setup_test_connection();
        insert_conversation(&conn, "c1", "sess-1", "hash-1");

        assert!(find_conversation_sync(&conn, "claude", "sess-1").unwrap().is_some());
        assert!(find_conversation_sync(&conn, "claude", "sess-2").unwrap().is_none());
        assert!(conversation_hash_exists_sync(&conn, "hash-1").unwrap());

        // Same (source, session) again violates the unique constraint
        let dup = insert_conversation_sync(
            &conn, "c2", "demo", "claude", "sess-1", None, "hash-2", None,
        );
        assert!(dup.is_err());
    }

    #[test]
    fn test_messages_ordered_by_seq() {
        let conn = setup_test_connection();
        insert_conversation(&conn, "c1", "sess-1", "hash-1");
        insert_message_sync(&conn, "m2", "c1", 2, "assistant", "second", None).unwrap();
        insert_message_sync(&conn, "m1", "c1", 1, "user", "first", None).unwrap();

        let messages = conversation_messages_sync(&conn, "c1").unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "first");
        assert_eq!(messages[1].content, "second");
    }

    #[test]
    fn test_memory_source_links_auto_facts() {
        let conn = setup_test_connection();
        insert_conversation(&conn, "c1", "sess-1", "hash-1");
        conn.execute(
            "INSERT INTO memories (id, project_id, content, memory_type) VALUES ('m1', 'demo', 'extracted fact', 'fact')",
            [],
        )
        .unwrap();
        insert_memory_source_sync(&conn, "m1", "c1", None).unwrap();
        // Idempotent
        insert_memory_source_sync(&conn, "m1", "c1", None).unwrap();

        let sourced = auto_sourced_memory_ids_sync(&conn, "demo").unwrap();
        assert_eq!(sourced.len(), 1);
        assert_eq!(sourced[0].0, "m1");
    }

    #[test]
    fn test_summary_search() {
        let conn = setup_test_connection();
        insert_conversation(&conn, "c1", "sess-1", "hash-1");
        insert_summary_sync(&conn, "s1", "demo", "c1", "brief", "discussed the deploy pipeline").unwrap();
        insert_summary_sync(&conn, "s2", "demo", "c1", "detailed", "unrelated topic").unwrap();

        let hits = search_summaries_sync(&conn, "demo", "deploy", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].1, "brief");
    }
}
