//! Pairwise conflict detection: similarity scoring, band classification,
//! contradiction/update-cue pattern matching.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::ErrorKind;
use crate::model::Memory;

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ConflictError {
    #[error("audit entry not found: {0}")]
    AuditEntryNotFound(String),
    #[error("rollback payload malformed: {0}")]
    MalformedRollback(String),
}

impl ConflictError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConflictError::AuditEntryNotFound(_) => ErrorKind::NotFound,
            ConflictError::MalformedRollback(_) => ErrorKind::DbError,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConflictError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictKind {
    ExactDuplicate,
    Contradiction,
    UpdateNeeded,
    MergeCandidate,
    TemporalOverlap,
    RelatedMemory,
}

impl ConflictKind {
    pub fn default_action(&self) -> &'static str {
        match self {
            ConflictKind::ExactDuplicate => "update_timestamp",
            ConflictKind::Contradiction => "resolve_contradiction",
            ConflictKind::UpdateNeeded => "update_memory",
            ConflictKind::MergeCandidate => "merge_memories",
            ConflictKind::TemporalOverlap => "check_temporal_conflict",
            ConflictKind::RelatedMemory => "link_memories",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            ConflictKind::ExactDuplicate | ConflictKind::RelatedMemory => Severity::Low,
            ConflictKind::UpdateNeeded
            | ConflictKind::MergeCandidate
            | ConflictKind::TemporalOverlap => Severity::Medium,
            ConflictKind::Contradiction => Severity::High,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Conflict {
    pub existing_id: String,
    pub kind: ConflictKind,
    pub severity: Severity,
    pub similarity: f64,
    pub suggested_action: &'static str,
}

const EXACT_DUPLICATE_THRESHOLD: f64 = 0.95;
const CONTRADICTION_BAND: f64 = 0.60;
const RELATED_THRESHOLD: f64 = 0.40;
const TEMPORAL_OVERLAP_HOURS: i64 = 2;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static PUNCTUATION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s]").unwrap());

fn normalize(text: &str) -> String {
    let lower = text.to_lowercase();
    let no_punct = PUNCTUATION.replace_all(&lower, "");
    WHITESPACE
        .replace_all(no_punct.trim(), " ")
        .trim()
        .to_string()
}

/// LCS-based approximation of `difflib.SequenceMatcher.ratio`: `2*M/T` where
/// `M` is the longest common subsequence length and `T` the combined length.
fn sequence_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let (n, m) = (a.len(), b.len());
    let mut dp = vec![0u32; m + 1];
    for i in 1..=n {
        let mut prev_diag = 0u32;
        for j in 1..=m {
            let tmp = dp[j];
            if a[i - 1] == b[j - 1] {
                dp[j] = prev_diag + 1;
            } else {
                dp[j] = dp[j].max(dp[j - 1]);
            }
            prev_diag = tmp;
        }
    }
    let lcs = dp[m] as f64;
    2.0 * lcs / (n + m) as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ConflictEntityType {
    Person,
    Location,
    Organization,
    Date,
    Time,
}

static CD_PERSON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][a-z]+ [A-Z][a-z]+\b").unwrap());
static CD_LOCATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:in|at|from)\s+([A-Z][a-z]+)").unwrap());
static CD_ORG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z][A-Za-z]+ (?:Inc|Corp|Company|University|LLC)\b").unwrap()
});
static CD_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}|\d{1,2}/\d{1,2}/\d{2,4}").unwrap());
static CD_TIME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{1,2}:\d{2}(?:\s?[ap]m)?").unwrap());

fn entities_by_type(text: &str) -> Vec<(ConflictEntityType, HashSet<String>)> {
    let mut person = HashSet::new();
    for m in CD_PERSON_RE.find_iter(text) {
        person.insert(m.as_str().to_lowercase());
    }
    let mut location = HashSet::new();
    for caps in CD_LOCATION_RE.captures_iter(text) {
        if let Some(g) = caps.get(1) {
            location.insert(g.as_str().to_lowercase());
        }
    }
    let mut organization = HashSet::new();
    for m in CD_ORG_RE.find_iter(text) {
        organization.insert(m.as_str().to_lowercase());
    }
    let mut date = HashSet::new();
    for m in CD_DATE_RE.find_iter(text) {
        date.insert(m.as_str().to_string());
    }
    let mut time = HashSet::new();
    for m in CD_TIME_RE.find_iter(text) {
        time.insert(m.as_str().to_lowercase());
    }
    vec![
        (ConflictEntityType::Person, person),
        (ConflictEntityType::Location, location),
        (ConflictEntityType::Organization, organization),
        (ConflictEntityType::Date, date),
        (ConflictEntityType::Time, time),
    ]
}

/// Mean, over entity types both texts have any entities of, of
/// `|intersection| / |union|`. `0.0` if neither has any typed entity.
fn entity_jaccard(a: &str, b: &str) -> f64 {
    let ea = entities_by_type(a);
    let eb = entities_by_type(b);
    let mut scores = Vec::new();
    for ((_, set_a), (_, set_b)) in ea.iter().zip(eb.iter()) {
        if set_a.is_empty() && set_b.is_empty() {
            continue;
        }
        let intersection = set_a.intersection(set_b).count();
        let union = set_a.union(set_b).count();
        if union > 0 {
            scores.push(intersection as f64 / union as f64);
        }
    }
    if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    }
}

/// `1.0` on exact normalized-text equality; otherwise
/// `0.7 * sequence_ratio + 0.3 * entity_jaccard`.
pub fn calculate_similarity(a: &str, b: &str) -> f64 {
    let (na, nb) = (normalize(a), normalize(b));
    if na == nb {
        return 1.0;
    }
    0.7 * sequence_ratio(&na, &nb) + 0.3 * entity_jaccard(&na, &nb)
}

const CONTRADICTION_PAIRS: &[(&[&str], &[&str])] = &[
    (&["like", "love", "enjoy"], &["dislike", "hate", "don't like", "don't enjoy"]),
    (&["married"], &["single", "divorced"]),
    (&["employed", "works at", "works for"], &["unemployed", "out of work"]),
    (&["lives in", "lives at"], &["moved away", "moved from"]),
];

fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| text.contains(n))
}

/// Pattern-based: one text matches one side of a pair, the other text the
/// opposite side.
fn is_contradiction(a: &str, b: &str) -> bool {
    let (la, lb) = (a.to_lowercase(), b.to_lowercase());
    CONTRADICTION_PAIRS.iter().any(|(positive, negative)| {
        (contains_any(&la, positive) && contains_any(&lb, negative))
            || (contains_any(&lb, positive) && contains_any(&la, negative))
    })
}

const UPDATE_CUES: &[&str] = &[
    "now works at",
    "moved to",
    "recently",
    "currently",
    "updated",
    "changed",
    "new",
    "latest",
];

fn looks_like_update(candidate: &Memory, existing: &Memory) -> bool {
    candidate.created_at > existing.created_at
        && contains_any(&candidate.content.to_lowercase(), UPDATE_CUES)
}

fn temporal_overlap(candidate: &Memory, existing: &Memory) -> bool {
    let diff = (candidate.created_at - existing.created_at).num_hours().abs();
    diff <= TEMPORAL_OVERLAP_HOURS
}

fn classify(candidate: &Memory, existing: &Memory, similarity: f64) -> Option<ConflictKind> {
    if similarity >= EXACT_DUPLICATE_THRESHOLD {
        return Some(ConflictKind::ExactDuplicate);
    }
    if similarity >= CONTRADICTION_BAND {
        if is_contradiction(&candidate.content, &existing.content) {
            return Some(ConflictKind::Contradiction);
        }
        if looks_like_update(candidate, existing) {
            return Some(ConflictKind::UpdateNeeded);
        }
        return Some(ConflictKind::MergeCandidate);
    }
    if temporal_overlap(candidate, existing) {
        return Some(ConflictKind::TemporalOverlap);
    }
    if similarity >= RELATED_THRESHOLD {
        return Some(ConflictKind::RelatedMemory);
    }
    None
}

/// Compares `candidate` against every memory in `existing` (assumed to
/// already be scoped to one user's storage), returning conflicts sorted
/// `(severity desc, similarity desc)`.
pub fn detect_conflicts(candidate: &Memory, existing: &[Memory]) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    for other in existing {
        if other.memory_id == candidate.memory_id {
            continue;
        }
        let similarity = calculate_similarity(&candidate.content, &other.content);
        if let Some(kind) = classify(candidate, other, similarity) {
            conflicts.push(Conflict {
                existing_id: other.memory_id.clone(),
                kind,
                severity: kind.severity(),
                similarity,
                suggested_action: kind.default_action(),
            });
        }
    }
    conflicts.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then(b.similarity.partial_cmp(&a.similarity).unwrap())
    });
    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Memory, MemoryType};

    fn memory(content: &str) -> Memory {
        Memory::new(content.to_string(), MemoryType::Personal)
    }

    #[test]
    fn identical_normalized_text_is_exact_duplicate() {
        let sim = calculate_similarity("I love pizza!", "i love pizza");
        assert_eq!(sim, 1.0);
    }

    #[test]
    fn contradiction_pair_detected() {
        assert!(is_contradiction("I am married", "I am single now"));
        assert!(!is_contradiction("I like pizza", "I like sushi"));
    }

    #[test]
    fn classify_exact_duplicate_band() {
        let candidate = memory("I love hiking on weekends");
        let existing = memory("I love hiking on weekends");
        let conflicts = detect_conflicts(&candidate, &[existing]);
        assert_eq!(conflicts[0].kind, ConflictKind::ExactDuplicate);
    }

    #[test]
    fn self_comparison_is_skipped() {
        let candidate = memory("hello there");
        let mut same = memory("hello there");
        same.memory_id = candidate.memory_id.clone();
        assert!(detect_conflicts(&candidate, &[same]).is_empty());
    }
}
