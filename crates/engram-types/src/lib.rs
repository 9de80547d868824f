// crates/engram-types/src/lib.rs

//! Shared data contracts between the Engram server and its clients.
//!
//! This crate provides the core domain model for:
//! - **Memories**: free-text knowledge atoms with confidence/strength/decay
//! - **Edges**: typed, bi-temporal relations between memories
//! - **Entities**: named graph nodes with observations
//! - **Scheduled tasks** and **contradiction resolutions**
//!
//! These types are designed to work across native and WASM builds,
//! with no native-only dependencies allowed.

use serde::{Deserialize, Serialize};

// ===================================================
// MEMORY
// ===================================================

/// Closed vocabulary of memory types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    Fact,
    Decision,
    Preference,
    Procedure,
    Note,
    Observation,
    Event,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fact => "fact",
            Self::Decision => "decision",
            Self::Preference => "preference",
            Self::Procedure => "procedure",
            Self::Note => "note",
            Self::Observation => "observation",
            Self::Event => "event",
        }
    }

    /// Parse from the stored string form. Unknown strings are rejected so the
    /// closed vocabulary stays closed.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fact" => Some(Self::Fact),
            "decision" => Some(Self::Decision),
            "preference" => Some(Self::Preference),
            "procedure" => Some(Self::Procedure),
            "note" => Some(Self::Note),
            "observation" => Some(Self::Observation),
            "event" => Some(Self::Event),
            _ => None,
        }
    }
}

impl Default for MemoryType {
    fn default() -> Self {
        Self::Fact
    }
}

/// A single stored memory as it crosses the wire.
///
/// The embedding itself never leaves the server; `has_embedding` reports
/// whether the vector index covers this row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// 32-char lowercase hex identifier.
    pub id: String,
    pub project_id: String,
    pub content: String,
    pub memory_type: MemoryType,
    #[serde(default)]
    pub tags: Vec<String>,
    pub importance: f64,
    pub strength: f64,
    pub access_count: i64,
    pub confidence: f64,
    pub source_count: i64,
    pub contradiction_count: i64,
    pub created_at: String,
    pub last_accessed: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
    pub has_embedding: bool,
}

/// Bucketed effective confidence, used in listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionLevel {
    High,
    Medium,
    Low,
    Uncertain,
}

impl RetentionLevel {
    /// Bucket an effective-confidence scalar.
    pub fn from_confidence(c: f64) -> Self {
        if c >= 0.8 {
            Self::High
        } else if c >= 0.5 {
            Self::Medium
        } else if c >= 0.3 {
            Self::Low
        } else {
            Self::Uncertain
        }
    }
}

// ===================================================
// EDGES
// ===================================================

/// A typed, bi-temporal relation between two memories.
///
/// Edges are never mutated after creation; invalidation sets `valid_to` once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub project_id: String,
    pub from_id: String,
    pub to_id: String,
    pub relation_type: String,
    pub valid_from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<String>,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

// ===================================================
// ENTITIES
// ===================================================

/// A named node in the project knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub entity_type: String,
    #[serde(default)]
    pub observations: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A typed relation between two entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRelation {
    pub id: String,
    pub project_id: String,
    pub from_entity: String,
    pub to_entity: String,
    pub relation_type: String,
    pub created_at: String,
}

// ===================================================
// SCHEDULED TASKS
// ===================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Triggered,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Triggered => "triggered",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "triggered" => Some(Self::Triggered),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Terminal states accept repeated complete/cancel calls as no-ops.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub schedule: String,
    pub next_run: String,
    pub status: TaskStatus,
    pub recurring: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<String>,
    pub created_at: String,
}

// ===================================================
// CONTRADICTIONS
// ===================================================

/// How a detected contradiction was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionKind {
    Semantic,
    Factual,
    Negation,
    Antonym,
    Temporal,
    EntityConflict,
}

impl ContradictionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Factual => "factual",
            Self::Negation => "negation",
            Self::Antonym => "antonym",
            Self::Temporal => "temporal",
            Self::EntityConflict => "entity_conflict",
        }
    }
}

/// What the engine recommends doing about a contradiction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    Flag,
    Replace,
    Merge,
    KeepBoth,
}

/// A single detected conflict between new content and an existing memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contradiction {
    /// Id of the existing memory in conflict.
    pub id: String,
    pub kind: ContradictionKind,
    pub similarity: f64,
    pub confidence: f64,
    pub explanation: String,
    pub suggested_action: SuggestedAction,
    /// Truncated content of the conflicting memory.
    pub preview: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionType {
    Pending,
    KeepFirst,
    KeepSecond,
    KeepBoth,
    Merge,
    DeleteBoth,
}

impl ResolutionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::KeepFirst => "keep_first",
            Self::KeepSecond => "keep_second",
            Self::KeepBoth => "keep_both",
            Self::Merge => "merge",
            Self::DeleteBoth => "delete_both",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "keep_first" => Some(Self::KeepFirst),
            "keep_second" => Some(Self::KeepSecond),
            "keep_both" => Some(Self::KeepBoth),
            "merge" => Some(Self::Merge),
            "delete_both" => Some(Self::DeleteBoth),
            _ => None,
        }
    }
}

/// A pending or resolved conflict between two stored memories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContradictionResolution {
    pub id: String,
    pub project_id: String,
    pub memory_a: String,
    pub memory_b: String,
    pub edge_id: String,
    pub resolution_type: ResolutionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chosen_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<String>,
}

// ===================================================
// SEARCH
// ===================================================

/// One hybrid-search hit, scored and summarized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub content: String,
    pub content_truncated: bool,
    pub memory_type: MemoryType,
    pub keyword_score: f64,
    pub semantic_score: f64,
    pub combined_score: f64,
    pub confidence: f64,
    pub importance: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_type_round_trip() {
        for t in [
            MemoryType::Fact,
            MemoryType::Decision,
            MemoryType::Preference,
            MemoryType::Procedure,
            MemoryType::Note,
            MemoryType::Observation,
            MemoryType::Event,
        ] {
            assert_eq!(MemoryType::parse(t.as_str()), Some(t));
        }
        assert_eq!(MemoryType::parse("belief"), None);
    }

    #[test]
    fn test_memory_type_serde_lowercase() {
        let json = serde_json::to_string(&MemoryType::Decision).unwrap();
        assert_eq!(json, "\"decision\"");
        let back: MemoryType = serde_json::from_str("\"procedure\"").unwrap();
        assert_eq!(back, MemoryType::Procedure);
    }

    #[test]
    fn test_retention_level_buckets() {
        assert_eq!(RetentionLevel::from_confidence(0.95), RetentionLevel::High);
        assert_eq!(RetentionLevel::from_confidence(0.8), RetentionLevel::High);
        assert_eq!(RetentionLevel::from_confidence(0.6), RetentionLevel::Medium);
        assert_eq!(RetentionLevel::from_confidence(0.4), RetentionLevel::Low);
        assert_eq!(
            RetentionLevel::from_confidence(0.1),
            RetentionLevel::Uncertain
        );
    }

    #[test]
    fn test_task_status_terminal() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Triggered.is_terminal());
    }

    #[test]
    fn test_resolution_type_round_trip() {
        for r in [
            ResolutionType::Pending,
            ResolutionType::KeepFirst,
            ResolutionType::KeepSecond,
            ResolutionType::KeepBoth,
            ResolutionType::Merge,
            ResolutionType::DeleteBoth,
        ] {
            assert_eq!(ResolutionType::parse(r.as_str()), Some(r));
        }
    }

    #[test]
    fn test_edge_optional_fields_skipped() {
        let edge = Edge {
            id: "e1".into(),
            project_id: "demo".into(),
            from_id: "a".into(),
            to_id: "b".into(),
            relation_type: "confirms".into(),
            valid_from: "2026-01-01 00:00:00".into(),
            valid_to: None,
            confidence: 0.9,
            metadata: None,
        };
        let json = serde_json::to_string(&edge).unwrap();
        assert!(!json.contains("valid_to"));
        assert!(!json.contains("metadata"));
    }
}
