// ingest/quality.rs
// Fact quality classifiers: explicit rule tables + regex, unit-tested per
// rule. These gate what auto-extraction is allowed to store, and what the
// garbage sweep may delete.

use std::sync::LazyLock;

use regex::Regex;

use crate::contradiction::lexical::STOP_WORDS;

/// Leading words that mark a mid-sentence fragment, not a standalone fact.
const CONNECTIVE_STARTS: &[&str] = &[
    "and", "or", "but", "so", "then", "which", "that", "because", "however", "although", "though",
    "since", "while", "whereas", "also", "additionally", "furthermore", "otherwise", "meanwhile",
];

/// Meta-commentary openers: the assistant talking about its own process.
const META_STARTS: &[&str] = &[
    "let me", "let's", "i'll", "i will", "i'm going", "i am going", "now i", "first i", "next i",
    "i need to", "i should", "we'll", "we will",
];

static GIT_LOG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{7,40}\s").expect("static regex"));

static COLON_BOUNDARY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":[A-Z]").expect("static regex"));

static TRAILING_CODE_OPENER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`[A-Za-z_][A-Za-z0-9_.:]*$").expect("static regex"));

fn words(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

fn significant_words(text: &str) -> Vec<String> {
    words(text)
        .into_iter()
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

fn stopword_ratio(text: &str) -> f64 {
    let all = words(text);
    if all.is_empty() {
        return 1.0;
    }
    let stops = all
        .iter()
        .filter(|w| STOP_WORDS.contains(&w.as_str()))
        .count();
    stops as f64 / all.len() as f64
}

/// Multi-rule quality gate for auto-extracted facts. A candidate must pass
/// every rule to be stored.
pub fn is_quality_fact(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return false;
    }

    // Too little substance
    if significant_words(trimmed).len() < 4 {
        return false;
    }
    if stopword_ratio(trimmed) > 0.5 {
        return false;
    }

    // Mid-sentence fragment
    let lower = trimmed.to_lowercase();
    if let Some(first) = words(trimmed).first()
        && CONNECTIVE_STARTS.contains(&first.as_str())
    {
        return false;
    }

    // Markdown table / git log / code fragments
    if trimmed.starts_with('|') || trimmed.contains("|---") || trimmed.contains("| ---") {
        return false;
    }
    if GIT_LOG_RE.is_match(&lower) {
        return false;
    }
    if trimmed.starts_with('`') || trimmed.contains("```") {
        return false;
    }

    // Meta-commentary about process, not knowledge
    if META_STARTS.iter().any(|m| lower.starts_with(m)) {
        return false;
    }

    // Malformed sentence boundary (":Sentence-starts-here")
    if trimmed.starts_with(':') || COLON_BOUNDARY_RE.is_match(trimmed) {
        return false;
    }

    // Truncated ending on a bare `identifier opener
    if TRAILING_CODE_OPENER_RE.is_match(trimmed) {
        return false;
    }

    true
}

/// Much stricter classifier for deleting manually-stored memories: only
/// content that cannot possibly be a fact.
pub fn is_definite_garbage(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return true;
    }
    // Nothing but punctuation or markup
    if words(trimmed).is_empty() {
        return true;
    }
    if significant_words(trimmed).len() < 2 && trimmed.len() < 20 {
        return true;
    }
    if trimmed.starts_with('|') && trimmed.ends_with('|') {
        return true;
    }
    if GIT_LOG_RE.is_match(&trimmed.to_lowercase()) {
        return true;
    }
    if trimmed.starts_with("```") {
        return true;
    }
    false
}

/// Whether an entity name is a bare stop-word (deleted by the sweep).
pub fn is_stopword_name(name: &str) -> bool {
    let lower = name.trim().to_lowercase();
    STOP_WORDS.contains(&lower.as_str())
}
