// search/keyword.rs
// FTS5-powered keyword search over memory content with a LIKE fallback

use engram_types::Memory;
use rusqlite::Connection;

use crate::config::GLOBAL_PROJECT;
use crate::db::{MEMORY_COLUMNS, parse_memory_row};

/// Build FTS5 query from user input: prefix match on the last term, OR across
/// the rest, special characters stripped.
pub fn build_fts_query(query: &str) -> String {
    let terms: Vec<&str> = query.split_whitespace().filter(|t| !t.is_empty()).collect();

    if terms.is_empty() {
        return String::new();
    }

    if terms.len() == 1 {
        let cleaned = escape_fts_term(terms[0]);
        if cleaned.is_empty() {
            return String::new();
        }
        return format!("{}*", cleaned);
    }

    let mut query_parts: Vec<String> = Vec::new();
    for (i, term) in terms.iter().enumerate() {
        let cleaned = escape_fts_term(term);
        if cleaned.is_empty() {
            continue;
        }
        if i == terms.len() - 1 {
            query_parts.push(format!("{}*", cleaned));
        } else {
            query_parts.push(cleaned);
        }
    }

    query_parts.join(" OR ")
}

/// Strip FTS5 special characters (" - * ( ) ^) for safe querying.
fn escape_fts_term(term: &str) -> String {
    term.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect()
}

/// Fraction of query terms present in the content (case-insensitive).
pub fn keyword_score(query: &str, content: &str) -> f64 {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|t| escape_fts_term(t).to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    if terms.is_empty() {
        return 0.0;
    }
    let haystack = content.to_lowercase();
    let matched = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
    matched as f64 / terms.len() as f64
}

/// Keyword search: FTS5 BM25 first, escaped-LIKE fallback when FTS returns
/// nothing (partial tokens, unusual input). Returns live rows with their
/// keyword score. An empty query returns no rows.
pub fn keyword_search_sync(
    conn: &Connection,
    query: &str,
    project_id: &str,
    limit: usize,
) -> rusqlite::Result<Vec<(Memory, f64)>> {
    let fts_query = build_fts_query(query);
    if fts_query.is_empty() {
        return Ok(Vec::new());
    }

    let fts_results = fts5_search(conn, &fts_query, project_id, limit)?;
    let results = if fts_results.is_empty() {
        like_search(conn, query, project_id, limit)?
    } else {
        fts_results
    };

    Ok(results
        .into_iter()
        .map(|m| {
            let score = keyword_score(query, &m.content);
            (m, score)
        })
        .collect())
}

fn fts5_search(
    conn: &Connection,
    fts_query: &str,
    project_id: &str,
    limit: usize,
) -> rusqlite::Result<Vec<Memory>> {
    let sql = format!(
        "SELECT {MEMORY_COLUMNS} FROM memories
         WHERE rowid IN (
             SELECT rowid FROM memories_fts WHERE memories_fts MATCH ?1
             ORDER BY bm25(memories_fts)
             LIMIT ?2
         )
         AND (project_id = ?3 OR project_id = ?4)
         AND deleted_at IS NULL"
    );
    let mut stmt = conn.prepare(&sql)?;
    let collected: rusqlite::Result<Vec<Memory>> = stmt
        .query_map(
            rusqlite::params![fts_query, (limit * 4) as i64, project_id, GLOBAL_PROJECT],
            parse_memory_row,
        )
        .and_then(|rows| rows.collect());
    match collected {
        Ok(rows) => Ok(rows),
        Err(e) => {
            // Malformed MATCH input degrades to the LIKE path
            tracing::debug!("FTS query failed ({}), falling back to LIKE", e);
            Ok(Vec::new())
        }
    }
}

fn like_search(
    conn: &Connection,
    query: &str,
    project_id: &str,
    limit: usize,
) -> rusqlite::Result<Vec<Memory>> {
    fn escape_like(s: &str) -> String {
        s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
    }

    let keywords: Vec<String> = query
        .split_whitespace()
        .filter(|w| w.len() > 2)
        .take(5)
        .map(|w| format!("%{}%", escape_like(w)))
        .collect();
    if keywords.is_empty() {
        return Ok(Vec::new());
    }

    let where_clauses: Vec<String> = (0..keywords.len())
        .map(|i| format!("content LIKE ?{} ESCAPE '\\'", 3 + i))
        .collect();
    let sql = format!(
        "SELECT {MEMORY_COLUMNS} FROM memories
         WHERE (project_id = ?1 OR project_id = ?2)
           AND deleted_at IS NULL
           AND ({})
         ORDER BY updated_at DESC
         LIMIT {}",
        where_clauses.join(" OR "),
        limit
    );

    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    params.push(Box::new(project_id.to_string()));
    params.push(Box::new(GLOBAL_PROJECT.to_string()));
    for kw in &keywords {
        params.push(Box::new(kw.clone()));
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(params), parse_memory_row)?;
    rows.collect()
}
