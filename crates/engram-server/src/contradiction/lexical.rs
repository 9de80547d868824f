// contradiction/lexical.rs
// Pure lexical contradiction screens: negation, antonyms, numeric drift, and
// entity-attribute conflicts. Explicit tables + regex rules, no model calls.

use std::sync::LazyLock;

use engram_types::ContradictionKind;
use regex::Regex;

/// A lexical screen verdict for a candidate pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenHit {
    pub kind: ContradictionKind,
    pub confidence: f64,
    pub explanation: String,
}

/// Common English stop-words stripped before subject comparison.
pub const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "am", "do", "does", "did",
    "have", "has", "had", "will", "would", "shall", "should", "can", "could", "may", "might",
    "must", "to", "of", "in", "on", "at", "by", "for", "with", "about", "from", "into", "over",
    "under", "and", "or", "but", "if", "then", "else", "so", "as", "that", "this", "these",
    "those", "it", "its", "we", "our", "they", "their", "you", "your", "he", "she", "his", "her",
    "i", "my", "me", "us", "them", "there", "here", "when", "where", "how", "what", "which", "who",
    "not", "no", "never", "very", "just", "also", "too", "than", "now", "still", "yet",
];

/// Tokens that flip the polarity of a sentence.
const NEGATION_TOKENS: &[&str] = &[
    "not", "never", "no", "cannot", "isnt", "arent", "wasnt", "werent", "wont", "cant", "dont",
    "doesnt", "didnt", "shouldnt", "couldnt", "wouldnt", "nothing", "none", "neither",
];

/// Curated antonym pairs across common axes.
const ANTONYM_PAIRS: &[(&str, &str)] = &[
    ("true", "false"),
    ("alive", "dead"),
    ("hot", "cold"),
    ("success", "failure"),
    ("succeeded", "failed"),
    ("increase", "decrease"),
    ("increased", "decreased"),
    ("increasing", "decreasing"),
    ("enabled", "disabled"),
    ("enable", "disable"),
    ("on", "off"),
    ("open", "closed"),
    ("up", "down"),
    ("fast", "slow"),
    ("high", "low"),
    ("always", "never"),
    ("complete", "incomplete"),
    ("finished", "unfinished"),
    ("working", "broken"),
    ("stable", "unstable"),
    ("safe", "unsafe"),
    ("allowed", "forbidden"),
    ("public", "private"),
    ("synchronous", "asynchronous"),
    ("deprecated", "supported"),
    ("passing", "failing"),
    ("online", "offline"),
    ("before", "after"),
    ("new", "old"),
    ("start", "stop"),
    ("started", "stopped"),
];

/// Lowercased word tokens, contractions flattened ("isn't" -> "isnt").
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .replace('\u{2019}', "'")
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .map(|w| w.replace('\'', ""))
        .filter(|w| !w.is_empty())
        .collect()
}

/// Tokens minus stop-words; what two statements must share to be "about the
/// same thing".
pub fn subject_tokens(tokens: &[String]) -> Vec<String> {
    tokens
        .iter()
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .filter(|t| !NEGATION_TOKENS.contains(&t.as_str()))
        .cloned()
        .collect()
}

fn has_negation(tokens: &[String]) -> bool {
    // "no longer" counts even though "longer" alone does not
    tokens.iter().any(|t| NEGATION_TOKENS.contains(&t.as_str()))
        || tokens.windows(2).any(|w| w[0] == "no" && w[1] == "longer")
}

/// Jaccard-style overlap between two subject-token sets.
fn subject_overlap(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let matched = a.iter().filter(|t| b.contains(t)).count();
    let smaller = a.len().min(b.len());
    matched as f64 / smaller as f64
}

/// Subjects are considered the same when at least half of the smaller
/// token set overlaps.
const SUBJECT_MATCH_THRESHOLD: f64 = 0.5;

/// Direct negation: same subject, exactly one side negated.
pub fn check_negation(new_content: &str, existing: &str) -> Option<ScreenHit> {
    let new_tokens = tokenize(new_content);
    let old_tokens = tokenize(existing);

    let new_negated = has_negation(&new_tokens);
    let old_negated = has_negation(&old_tokens);
    if new_negated == old_negated {
        return None;
    }

    let new_subject = subject_tokens(&new_tokens);
    let old_subject = subject_tokens(&old_tokens);
    if subject_overlap(&new_subject, &old_subject) < SUBJECT_MATCH_THRESHOLD {
        return None;
    }

    Some(ScreenHit {
        kind: ContradictionKind::Negation,
        confidence: 0.8,
        explanation: "one statement negates the other on the same subject".to_string(),
    })
}

/// Antonym conflict: same subject, one side carries word A, the other its
/// curated opposite.
pub fn check_antonym(new_content: &str, existing: &str) -> Option<ScreenHit> {
    let new_tokens = tokenize(new_content);
    let old_tokens = tokenize(existing);

    let pair = ANTONYM_PAIRS.iter().find(|(a, b)| {
        (new_tokens.iter().any(|t| t == a) && old_tokens.iter().any(|t| t == b))
            || (new_tokens.iter().any(|t| t == b) && old_tokens.iter().any(|t| t == a))
    })?;

    // The rest of the statements must still be about the same thing
    let strip = |tokens: &[String]| -> Vec<String> {
        subject_tokens(tokens)
            .into_iter()
            .filter(|t| t != pair.0 && t != pair.1)
            .collect()
    };
    let new_subject = strip(&new_tokens);
    let old_subject = strip(&old_tokens);
    if subject_overlap(&new_subject, &old_subject) < SUBJECT_MATCH_THRESHOLD {
        return None;
    }

    Some(ScreenHit {
        kind: ContradictionKind::Antonym,
        confidence: 0.7,
        explanation: format!("opposing terms '{}' vs '{}'", pair.0, pair.1),
    })
}

static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+(?:\.\d+)?)\s*([a-zA-Z%]+)?").expect("static regex")
});

/// A `(context, value, unit?)` triple extracted from a statement.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericClaim {
    pub context: Vec<String>,
    pub value: f64,
    pub unit: Option<String>,
}

/// Extract numeric claims: each number with its optional unit, sharing the
/// statement's stop-word-stripped, number-free tokens as context.
pub fn extract_numeric_claims(text: &str) -> Vec<NumericClaim> {
    let tokens = tokenize(text);
    let context: Vec<String> = subject_tokens(&tokens)
        .into_iter()
        .filter(|t| t.parse::<f64>().is_err())
        .collect();

    NUMBER_RE
        .captures_iter(text)
        .filter_map(|cap| {
            let value: f64 = cap.get(1)?.as_str().parse().ok()?;
            let unit = cap
                .get(2)
                .map(|m| m.as_str().to_lowercase())
                .filter(|u| !STOP_WORDS.contains(&u.as_str()));
            Some(NumericClaim {
                context: context.clone(),
                value,
                unit,
            })
        })
        .collect()
}

/// Numeric drift: matching contexts and units but values differing by more
/// than 10%. Confidence scales with the relative delta, capped at 0.9.
pub fn check_numeric(new_content: &str, existing: &str) -> Option<ScreenHit> {
    let new_claims = extract_numeric_claims(new_content);
    let old_claims = extract_numeric_claims(existing);

    for new_claim in &new_claims {
        for old_claim in &old_claims {
            if new_claim.unit != old_claim.unit {
                continue;
            }
            if subject_overlap(&new_claim.context, &old_claim.context) < SUBJECT_MATCH_THRESHOLD {
                continue;
            }
            let max = new_claim.value.abs().max(old_claim.value.abs());
            if max == 0.0 {
                continue;
            }
            let delta = (new_claim.value - old_claim.value).abs() / max;
            if delta > 0.10 {
                let confidence = (0.5 + delta * 0.5).min(0.9);
                return Some(ScreenHit {
                    kind: ContradictionKind::Factual,
                    confidence,
                    explanation: format!(
                        "values differ by {:.0}% ({} vs {})",
                        delta * 100.0,
                        new_claim.value,
                        old_claim.value
                    ),
                });
            }
        }
    }
    None
}

static ATTRIBUTE_RES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"(?i)([\w][\w .-]*?)'s\s+([\w]+)\s+is\s+([\w][\w .-]*)").expect("static"),
            "",
        ),
        (
            Regex::new(r"(?i)([\w][\w .-]*?)\s+lives\s+in\s+([\w][\w .-]*)").expect("static"),
            "location",
        ),
        (
            Regex::new(r"(?i)([\w][\w .-]*?)\s+works\s+at\s+([\w][\w .-]*)").expect("static"),
            "employer",
        ),
        (
            Regex::new(r"(?i)([\w][\w .-]*?)\s+is\s+located\s+in\s+([\w][\w .-]*)").expect("static"),
            "location",
        ),
    ]
});

/// An `(entity, attribute, value)` triple.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeClaim {
    pub entity: String,
    pub attribute: String,
    pub value: String,
}

fn norm_fragment(s: &str) -> String {
    s.trim().trim_end_matches('.').to_lowercase()
}

/// Extract attribute claims from "X's A is V" / "X lives in V" patterns.
pub fn extract_attribute_claims(text: &str) -> Vec<AttributeClaim> {
    let mut claims = Vec::new();
    for (re, fixed_attribute) in ATTRIBUTE_RES.iter() {
        for cap in re.captures_iter(text) {
            let claim = if fixed_attribute.is_empty() {
                AttributeClaim {
                    entity: norm_fragment(&cap[1]),
                    attribute: norm_fragment(&cap[2]),
                    value: norm_fragment(&cap[3]),
                }
            } else {
                AttributeClaim {
                    entity: norm_fragment(&cap[1]),
                    attribute: fixed_attribute.to_string(),
                    value: norm_fragment(&cap[2]),
                }
            };
            if !claim.entity.is_empty() && !claim.value.is_empty() {
                claims.push(claim);
            }
        }
    }
    claims
}

/// Entity-attribute conflict: same (entity, attribute) with different values.
pub fn check_entity_attribute(new_content: &str, existing: &str) -> Option<ScreenHit> {
    let new_claims = extract_attribute_claims(new_content);
    let old_claims = extract_attribute_claims(existing);

    for new_claim in &new_claims {
        for old_claim in &old_claims {
            if new_claim.entity == old_claim.entity
                && new_claim.attribute == old_claim.attribute
                && new_claim.value != old_claim.value
            {
                return Some(ScreenHit {
                    kind: ContradictionKind::EntityConflict,
                    confidence: 0.75,
                    explanation: format!(
                        "{} {}: '{}' vs '{}'",
                        new_claim.entity, new_claim.attribute, new_claim.value, old_claim.value
                    ),
                });
            }
        }
    }
    None
}

/// Run every screen on a pair, returning the strongest hit.
pub fn screen_pair(new_content: &str, existing: &str) -> Option<ScreenHit> {
    let hits = [
        check_negation(new_content, existing),
        check_antonym(new_content, existing),
        check_numeric(new_content, existing),
        check_entity_attribute(new_content, existing),
    ];
    hits.into_iter()
        .flatten()
        .max_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap_or(std::cmp::Ordering::Equal))
}
