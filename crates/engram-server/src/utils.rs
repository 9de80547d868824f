// crates/engram-server/src/utils.rs
// Small shared helpers: truncation, id generation, error sanitization

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

/// Max chars of an error message that cross the MCP wire.
const ERROR_TEXT_MAX: usize = 200;

/// Convert a path to a display string without lossy surprises on Unix.
pub fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Truncate a string to `max_len` chars, appending an ellipsis when cut.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len).collect();
        format!("{}...", cut)
    }
}

/// Truncate at a char boundary without allocating when the string fits.
pub fn truncate_at_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Truncate to a char count (not bytes), no ellipsis. Used where a budget is
/// specified in characters, e.g. search-result summaries.
pub fn truncate_to_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Generate a new opaque 128-bit identifier rendered as 32 lowercase hex chars.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Re-insert hyphens into a 32-hex id for services that want UUID form.
/// Returns None if the input is not 32 hex chars.
pub fn hex_to_hyphenated(id: &str) -> Option<String> {
    uuid::Uuid::parse_str(id).ok().map(|u| u.to_string())
}

/// Normalize an id that may arrive hyphenated back to the canonical 32-hex form.
pub fn normalize_id(id: &str) -> String {
    match uuid::Uuid::parse_str(id) {
        Ok(u) => u.simple().to_string(),
        Err(_) => id.to_string(),
    }
}

static ABS_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    // Unix absolute paths and Windows drive paths
    Regex::new(r"(/[\w.@~-]+(?:/[\w.@~-]+)+|[A-Za-z]:\\[^\s'\x22]+)").expect("static regex")
});

/// Sanitize error text for the wire: strip absolute paths, cap length.
pub fn sanitize_error_text(msg: &str) -> String {
    let replaced = ABS_PATH_RE.replace_all(msg, "[path]");
    truncate(&replaced, ERROR_TEXT_MAX)
}

/// Current timestamp in the SQLite `datetime('now')` format (UTC).
pub fn now_sqlite() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Parse a SQLite-format timestamp back into a UTC datetime.
pub fn parse_sqlite_ts(ts: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|n| n.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short() {
        assert_eq!(truncate("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_long() {
        assert_eq!(truncate("hello world", 5), "hello...");
    }

    #[test]
    fn test_truncate_at_boundary_multibyte() {
        let s = "héllo";
        // 'é' is 2 bytes starting at index 1; cutting at 2 must back off to 1
        assert_eq!(truncate_at_boundary(s, 2), "h");
        assert_eq!(truncate_at_boundary(s, 10), s);
    }

    #[test]
    fn test_truncate_to_chars_counts_chars_not_bytes() {
        let s = "héllo";
        // 3 chars regardless of the 2-byte 'é'
        assert_eq!(truncate_to_chars(s, 3), "hél");
        assert_eq!(truncate_to_chars(s, 5), s);
        assert_eq!(truncate_to_chars(s, 10), s);
        assert_eq!(truncate_to_chars("", 3), "");
    }

    #[test]
    fn test_new_id_is_32_hex() {
        let id = new_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, id.to_lowercase());
    }

    #[test]
    fn test_id_hyphenation_round_trip() {
        let id = new_id();
        let hyph = hex_to_hyphenated(&id).unwrap();
        assert_eq!(hyph.len(), 36);
        assert_eq!(normalize_id(&hyph), id);
    }

    #[test]
    fn test_normalize_id_passthrough() {
        assert_eq!(normalize_id("not-a-uuid"), "not-a-uuid");
    }

    #[test]
    fn test_sanitize_strips_paths() {
        let msg = "failed to open /home/user/.engram/memories.db: permission denied";
        let out = sanitize_error_text(msg);
        assert!(!out.contains("/home/user"));
        assert!(out.contains("[path]"));
    }

    #[test]
    fn test_sanitize_caps_length() {
        let msg = "x".repeat(500);
        let out = sanitize_error_text(&msg);
        assert!(out.chars().count() <= ERROR_TEXT_MAX + 3);
    }

    #[test]
    fn test_now_sqlite_parses_back() {
        let now = now_sqlite();
        assert!(parse_sqlite_ts(&now).is_some());
    }
}
