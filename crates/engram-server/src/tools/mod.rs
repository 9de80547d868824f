// crates/engram-server/src/tools/mod.rs
// Tool handler implementations. Each returns a JSON value; the MCP layer
// serializes, sanitizes errors, and logs the call.

pub mod backup;
pub mod chat;
pub mod contradictions;
pub mod graph;
pub mod memory;
pub mod project;
pub mod scheduled;
pub mod scratch;
pub mod session;
pub mod system;

use serde_json::{Value, json};

/// Unknown sub-actions return `{error}` - they do not raise an error frame.
pub fn unknown_action(tool: &str, action: &str) -> Value {
    json!({ "error": format!("unknown {tool} action '{action}'") })
}
