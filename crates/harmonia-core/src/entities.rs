//! Entity Extractor: ordered regex sweep producing typed entities with
//! confidence, plus relationship extraction.
//!
//! Grounded in `original_source/src/processing/entity_extractor.py`.

use regex::Regex;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    Person,
    Organization,
    Location,
    Skill,
    Temporal,
    Technology,
    Food,
    Hobby,
    Financial,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "person",
            EntityType::Organization => "organization",
            EntityType::Location => "location",
            EntityType::Skill => "skill",
            EntityType::Temporal => "temporal",
            EntityType::Technology => "technology",
            EntityType::Food => "food",
            EntityType::Hobby => "hobby",
            EntityType::Financial => "financial",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub entity_type: EntityType,
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct Relationship {
    pub kind: String,
    pub text: String,
    pub confidence: f64,
}

static PERSON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][a-z]+ [A-Z][a-z]+\b").unwrap());
static ORG_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z][A-Za-z&]+(?: [A-Z][A-Za-z&]+)* (?:Inc|Corp|Company|University|LLC|Ltd)\b")
        .unwrap()
});
static ORG_CONTEXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bworks?\s+(?:at|for)\s+([A-Z][A-Za-z&.]+(?:\s+[A-Z][A-Za-z&.]+)*)").unwrap()
});
static LOCATION_CONTEXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:in|at|from)\s+([A-Z][a-z]+(?:\s[A-Z][a-z]+)*)\b").unwrap()
});
static SKILL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:good at|skilled in|expert in)\s+([a-zA-Z][a-zA-Z\s]{2,30})").unwrap()
});
static TEMPORAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(today|tomorrow|yesterday|next week|last week|\d{1,2}/\d{1,2}/\d{2,4}|\d{4}-\d{2}-\d{2})\b").unwrap()
});
static TECH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(Python|JavaScript|Rust|Java|Kubernetes|Docker|React|SQL|VS Code|TypeScript|Go|C\+\+)\b").unwrap()
});
static FOOD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(pizza|sushi|coffee|tea|pasta|tacos|burgers|salad)\b").unwrap()
});
static HOBBY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(hiking|painting|gaming|reading|cycling|photography|cooking|gardening)\b").unwrap()
});
static FINANCIAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\d+(?:,\d{3})*(?:\.\d{2})?").unwrap());

const PERSON_EXCLUDE: &[&str] = &["New York", "Los Angeles", "San Francisco"];
const LOCATION_SUFFIXES: &[&str] = &["City", "Town", "Street", "Avenue", "County"];

fn length_penalty(text: &str) -> f64 {
    if text.len() < 3 {
        -0.1
    } else {
        0.0
    }
}

fn push_candidate(out: &mut Vec<Entity>, entity_type: EntityType, text: &str, start: usize, base: f64) {
    let mut confidence = base + length_penalty(text);
    if matches!(
        entity_type,
        EntityType::Person | EntityType::Organization | EntityType::Location
    ) && text.chars().next().map(char::is_uppercase).unwrap_or(false)
    {
        confidence += 0.05;
    }
    confidence = confidence.clamp(0.0, 1.0);
    out.push(Entity {
        entity_type,
        text: text.to_string(),
        start,
        end: start + text.len(),
        confidence,
    });
}

/// Ordered regex sweep; overlapping matches are deduplicated keeping the
/// higher-confidence entity; the final list is sorted by start offset.
pub fn extract_entities(text: &str) -> Vec<Entity> {
    let mut candidates = Vec::new();

    for m in PERSON_RE.find_iter(text) {
        if PERSON_EXCLUDE.contains(&m.as_str()) {
            continue;
        }
        push_candidate(&mut candidates, EntityType::Person, m.as_str(), m.start(), 0.7);
    }
    for m in ORG_SUFFIX_RE.find_iter(text) {
        push_candidate(&mut candidates, EntityType::Organization, m.as_str(), m.start(), 0.75);
    }
    for caps in ORG_CONTEXT_RE.captures_iter(text) {
        if let Some(g) = caps.get(1) {
            push_candidate(&mut candidates, EntityType::Organization, g.as_str(), g.start(), 0.85);
        }
    }
    for caps in LOCATION_CONTEXT_RE.captures_iter(text) {
        if let Some(g) = caps.get(1) {
            let is_known_suffix = LOCATION_SUFFIXES.iter().any(|s| g.as_str().ends_with(s));
            let base = if is_known_suffix { 0.8 } else { 0.7 };
            push_candidate(&mut candidates, EntityType::Location, g.as_str(), g.start(), base);
        }
    }
    for caps in SKILL_RE.captures_iter(text) {
        if let Some(g) = caps.get(1) {
            push_candidate(&mut candidates, EntityType::Skill, g.as_str().trim(), g.start(), 0.65);
        }
    }
    for m in TEMPORAL_RE.find_iter(text) {
        push_candidate(&mut candidates, EntityType::Temporal, m.as_str(), m.start(), 0.8);
    }
    for m in TECH_RE.find_iter(text) {
        push_candidate(&mut candidates, EntityType::Technology, m.as_str(), m.start(), 0.75);
    }
    for m in FOOD_RE.find_iter(text) {
        push_candidate(&mut candidates, EntityType::Food, m.as_str(), m.start(), 0.6);
    }
    for m in HOBBY_RE.find_iter(text) {
        push_candidate(&mut candidates, EntityType::Hobby, m.as_str(), m.start(), 0.6);
    }
    for m in FINANCIAL_RE.find_iter(text) {
        push_candidate(&mut candidates, EntityType::Financial, m.as_str(), m.start(), 0.7);
    }

    dedup_overlaps(candidates)
}

fn dedup_overlaps(mut candidates: Vec<Entity>) -> Vec<Entity> {
    candidates.sort_by_key(|e| e.start);
    let mut kept: Vec<Entity> = Vec::new();
    for cand in candidates {
        if let Some(last) = kept.last_mut() {
            if cand.start < last.end && cand.end > last.start {
                if cand.confidence > last.confidence {
                    *last = cand;
                }
                continue;
            }
        }
        kept.push(cand);
    }
    kept.sort_by_key(|e| e.start);
    kept
}

const RELATIONSHIP_WORDS: &[(&str, &str)] = &[
    ("family", "family"),
    ("friend", "friend"),
    ("colleague", "colleague"),
    ("manager", "manager"),
];

/// Explicit relationship keyword matches, plus a proximity heuristic: two
/// `person` entities within 50 characters yield `mentioned_together`.
pub fn extract_relationships(text: &str, entities: &[Entity]) -> Vec<Relationship> {
    let lower = text.to_lowercase();
    let mut out = Vec::new();

    for (needle, kind) in RELATIONSHIP_WORDS {
        if lower.contains(needle) {
            out.push(Relationship {
                kind: kind.to_string(),
                text: needle.to_string(),
                confidence: 0.7,
            });
        }
    }

    let people: Vec<&Entity> = entities
        .iter()
        .filter(|e| e.entity_type == EntityType::Person)
        .collect();
    for pair in people.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let distance = b.start.saturating_sub(a.end);
        if distance <= 50 {
            let confidence = (0.8 - distance as f64 / 100.0).max(0.3);
            out.push(Relationship {
                kind: "mentioned_together".to_string(),
                text: format!("{} / {}", a.text, b.text),
                confidence,
            });
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_person_and_organization() {
        let entities = extract_entities("My name is John Smith, I work at Google, and I have a cat");
        assert!(entities.iter().any(|e| e.entity_type == EntityType::Person));
        assert!(entities
            .iter()
            .any(|e| e.entity_type == EntityType::Organization && e.text == "Google"));
    }

    #[test]
    fn dedup_keeps_higher_confidence_on_overlap() {
        let entities = extract_entities("I work at Google Inc");
        let orgs: Vec<_> = entities
            .iter()
            .filter(|e| e.entity_type == EntityType::Organization)
            .collect();
        assert_eq!(orgs.len(), 1);
    }

    #[test]
    fn proximity_heuristic_links_two_people() {
        let text = "John Smith met Jane Doe";
        let entities = extract_entities(text);
        let rels = extract_relationships(text, &entities);
        assert!(rels.iter().any(|r| r.kind == "mentioned_together"));
    }
}
