// crates/engram-server/src/config/mod.rs
// Configuration: environment knobs and project detection

mod env;
mod project;

pub use env::{EngramConfig, VectorBackendKind, parse_bool_env};
pub use project::{detect_project_id, sanitize_project_id};

/// Reserved namespace visible to every project.
pub const GLOBAL_PROJECT: &str = "global";
