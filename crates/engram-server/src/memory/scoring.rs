// memory/scoring.rs
// Pure decay math: effective confidence and Ebbinghaus-style retention.

use engram_types::{Memory, RetentionLevel};

use crate::utils::parse_sqlite_ts;

/// Confidence boost applied on every recall.
pub const RECENT_ACCESS_BOOST: f64 = 0.05;
/// Confidence lost per day since last access.
pub const DECAY_PER_DAY: f64 = 0.005;
/// Confidence gained per extra source confirmation.
pub const CONFIRMATION_BONUS: f64 = 0.05;
/// Confidence lost per recorded contradiction.
pub const CONTRADICTION_PENALTY: f64 = 0.1;
/// Flat bonus for high-importance memories.
pub const IMPORTANCE_BOOST: f64 = 0.1;
/// Importance above which the boost applies.
pub const IMPORTANCE_THRESHOLD: f64 = 0.7;
/// Forgetting-curve steepness.
pub const RETENTION_K: f64 = 0.5;
/// Memories below this retention are hidden from default listings.
pub const RETENTION_HIDE_THRESHOLD: f64 = 0.1;

fn hours_since_access(memory: &Memory, now: chrono::DateTime<chrono::Utc>) -> f64 {
    parse_sqlite_ts(&memory.last_accessed)
        .map(|t| (now - t).num_seconds().max(0) as f64 / 3600.0)
        .unwrap_or(0.0)
}

/// Effective confidence: stored confidence adjusted for time decay,
/// confirmations, contradictions, and importance, clamped to [0, 1].
pub fn effective_confidence(memory: &Memory, now: chrono::DateTime<chrono::Utc>) -> f64 {
    let days = hours_since_access(memory, now) / 24.0;
    let adjusted = memory.confidence - days * DECAY_PER_DAY
        + (memory.source_count - 1).max(0) as f64 * CONFIRMATION_BONUS
        - memory.contradiction_count as f64 * CONTRADICTION_PENALTY
        + if memory.importance > IMPORTANCE_THRESHOLD {
            IMPORTANCE_BOOST
        } else {
            0.0
        };
    adjusted.clamp(0.0, 1.0)
}

/// Bucketed effective confidence.
pub fn retention_level(memory: &Memory, now: chrono::DateTime<chrono::Utc>) -> RetentionLevel {
    RetentionLevel::from_confidence(effective_confidence(memory, now))
}

/// Ebbinghaus-style retention: exp(-hours * k / (strength * 24)).
pub fn retention(memory: &Memory, now: chrono::DateTime<chrono::Utc>) -> f64 {
    let hours = hours_since_access(memory, now);
    let strength = memory.strength.max(0.1);
    (-hours * RETENTION_K / (strength * 24.0)).exp()
}

/// Whether a memory still shows in default listings.
pub fn is_retained(memory: &Memory, now: chrono::DateTime<chrono::Utc>) -> bool {
    retention(memory, now) > RETENTION_HIDE_THRESHOLD
}
