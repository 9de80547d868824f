// ingest/parser.rs
// Parses line-delimited JSON chat archives into structured conversations.
//
// Archive format (one JSON object per line):
//   - user:      human prompt (string content) or tool_result (array content)
//   - assistant: text and tool_use content blocks
//   - summary / progress / system: metadata records, skipped
// Unknown record types and unparseable lines are counted, never fatal.

use std::io::{self, BufRead};
use std::path::Path;

use serde::Deserialize;
use sha2::{Digest, Sha256};

/// One tool invocation inside an assistant message.
#[derive(Debug, Clone)]
pub struct ParsedToolUse {
    pub tool_name: String,
    pub input: Option<String>,
    pub output: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ParsedMessage {
    pub role: String,
    pub content: String,
    pub timestamp: Option<String>,
    pub tool_uses: Vec<ParsedToolUse>,
}

/// A fully parsed archive file.
#[derive(Debug, Clone, Default)]
pub struct ParsedConversation {
    pub source_session_id: Option<String>,
    pub title: Option<String>,
    pub started_at: Option<String>,
    pub messages: Vec<ParsedMessage>,
    pub parse_errors: u64,
    /// Hash over the raw archive bytes, for content-level dedup.
    pub content_hash: String,
}

impl ParsedConversation {
    /// Concatenated assistant text, the fact-extraction input.
    pub fn assistant_texts(&self) -> Vec<&str> {
        self.messages
            .iter()
            .filter(|m| m.role == "assistant" && !m.content.is_empty())
            .map(|m| m.content.as_str())
            .collect()
    }
}

#[derive(Deserialize)]
struct RawEntry {
    #[serde(rename = "type")]
    entry_type: Option<String>,
    timestamp: Option<String>,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    message: Option<RawMessage>,
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    content: serde_json::Value,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: Option<String>,
    text: Option<String>,
    name: Option<String>,
    input: Option<serde_json::Value>,
    content: Option<serde_json::Value>,
}

/// Parse an archive file from disk.
pub fn parse_archive_file(path: &Path) -> io::Result<ParsedConversation> {
    let data = std::fs::read_to_string(path)?;
    Ok(parse_archive(&data))
}

/// Parse archive content from a string.
pub fn parse_archive(data: &str) -> ParsedConversation {
    let mut conversation = ParsedConversation {
        content_hash: format!("{:x}", Sha256::digest(data.as_bytes())),
        ..Default::default()
    };

    let reader = io::BufReader::new(data.as_bytes());
    for line in reader.lines() {
        let Ok(line) = line else {
            conversation.parse_errors += 1;
            continue;
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let entry: RawEntry = match serde_json::from_str(trimmed) {
            Ok(e) => e,
            Err(_) => {
                conversation.parse_errors += 1;
                continue;
            }
        };

        if conversation.source_session_id.is_none()
            && let Some(ref sid) = entry.session_id
        {
            conversation.source_session_id = Some(sid.clone());
        }
        if conversation.started_at.is_none()
            && let Some(ref ts) = entry.timestamp
        {
            conversation.started_at = Some(ts.clone());
        }

        match entry.entry_type.as_deref() {
            Some("user") => process_user_entry(&entry, &mut conversation),
            Some("assistant") => process_assistant_entry(&entry, &mut conversation),
            _ => {}
        }
    }

    // First user prompt doubles as the title
    if conversation.title.is_none() {
        conversation.title = conversation
            .messages
            .iter()
            .find(|m| m.role == "user")
            .map(|m| crate::utils::truncate(&m.content, 80));
    }

    conversation
}

fn process_user_entry(entry: &RawEntry, conversation: &mut ParsedConversation) {
    let Some(message) = &entry.message else {
        return;
    };

    // String content is a human prompt; array content is tool results,
    // which attach as outputs to the latest assistant tool uses.
    match &message.content {
        serde_json::Value::String(text) => {
            conversation.messages.push(ParsedMessage {
                role: "user".to_string(),
                content: text.clone(),
                timestamp: entry.timestamp.clone(),
                tool_uses: Vec::new(),
            });
        }
        serde_json::Value::Array(blocks) => {
            for block in blocks {
                let Ok(cb) = serde_json::from_value::<ContentBlock>(block.clone()) else {
                    continue;
                };
                if cb.block_type.as_deref() == Some("tool_result")
                    && let Some(output) = cb.content
                    && let Some(last_assistant) = conversation
                        .messages
                        .iter_mut()
                        .rev()
                        .find(|m| m.role == "assistant")
                    && let Some(pending) = last_assistant
                        .tool_uses
                        .iter_mut()
                        .find(|t| t.output.is_none())
                {
                    pending.output = Some(stringify(&output));
                }
            }
        }
        _ => {}
    }
}

fn process_assistant_entry(entry: &RawEntry, conversation: &mut ParsedConversation) {
    let Some(message) = &entry.message else {
        return;
    };

    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_uses: Vec<ParsedToolUse> = Vec::new();

    if let Some(blocks) = message.content.as_array() {
        for block in blocks {
            let Ok(cb) = serde_json::from_value::<ContentBlock>(block.clone()) else {
                continue;
            };
            match cb.block_type.as_deref() {
                Some("text") => {
                    if let Some(text) = cb.text {
                        text_parts.push(text);
                    }
                }
                Some("tool_use") => {
                    if let Some(name) = cb.name {
                        tool_uses.push(ParsedToolUse {
                            tool_name: name,
                            input: cb.input.as_ref().map(stringify),
                            output: None,
                        });
                    }
                }
                _ => {}
            }
        }
    } else if let Some(text) = message.content.as_str() {
        text_parts.push(text.to_string());
    }

    conversation.messages.push(ParsedMessage {
        role: "assistant".to_string(),
        content: text_parts.join("\n"),
        timestamp: entry.timestamp.clone(),
        tool_uses,
    });
}

fn stringify(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
