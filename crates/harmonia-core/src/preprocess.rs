//! Preprocessor: pure-function cleanup, complexity scoring, and extraction
//! gatekeeping over a raw message.
//!
//! Grounded in `original_source/src/processing/preprocessor.py`.

use crate::model::MemoryType;
use regex::Regex;
use std::sync::LazyLock;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static REPEATED_PUNCT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([!?.,;:])\1+").unwrap());

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());
static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\+?1[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b").unwrap()
});
static SSN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());
static CARD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\d[ -]?){13,16}\b").unwrap());

static TEMPORAL_WORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(today|tomorrow|yesterday|tonight|next|last|ago|monday|tuesday|wednesday|thursday|friday|saturday|sunday|january|february|march|april|may|june|july|august|september|october|november|december|\d{1,2}/\d{1,2}/\d{2,4}|\d{4}-\d{2}-\d{2})\b").unwrap()
});

const POSITIVE_WORDS: [&str; 14] = [
    "love", "happy", "great", "excellent", "wonderful", "amazing", "good", "best", "enjoy",
    "glad", "excited", "fantastic", "awesome", "pleased",
];
const NEGATIVE_WORDS: [&str; 14] = [
    "hate", "sad", "terrible", "awful", "bad", "worst", "angry", "upset", "disappointed",
    "annoyed", "frustrated", "horrible", "dislike", "miserable",
];

#[derive(Debug, Clone)]
pub struct PreprocessedMessage {
    pub cleaned_text: String,
    pub word_count: usize,
    pub char_count: usize,
    pub language: String,
    pub has_pii: bool,
    pub positive_ratio: f64,
    pub negative_ratio: f64,
    pub neutral_ratio: f64,
    pub has_temporal_markers: bool,
    pub complexity_score: f64,
    pub punctuation_ratio: f64,
}

impl Default for PreprocessedMessage {
    fn default() -> Self {
        PreprocessedMessage {
            cleaned_text: String::new(),
            word_count: 0,
            char_count: 0,
            language: "en".to_string(),
            has_pii: false,
            positive_ratio: 0.0,
            negative_ratio: 0.0,
            neutral_ratio: 1.0,
            has_temporal_markers: false,
            complexity_score: 0.0,
            punctuation_ratio: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMode {
    Strict,
    Moderate,
    Permissive,
}

impl ExtractionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMode::Strict => "strict",
            ExtractionMode::Moderate => "moderate",
            ExtractionMode::Permissive => "permissive",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractionHints {
    pub mode: ExtractionMode,
    pub suggested_types: Vec<MemoryType>,
    pub focus_areas: Vec<String>,
    pub confidence_adjustment: f64,
}

/// Collapse whitespace, straighten curly quotes, collapse repeated punctuation.
pub fn clean_text(raw: &str) -> String {
    let straightened = raw
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace(['\u{201C}', '\u{201D}'], "\"");
    let collapsed_punct = REPEATED_PUNCT.replace_all(&straightened, "$1");
    WHITESPACE
        .replace_all(collapsed_punct.trim(), " ")
        .to_string()
}

fn detect_pii(text: &str) -> bool {
    EMAIL_RE.is_match(text) || PHONE_RE.is_match(text) || SSN_RE.is_match(text) || CARD_RE.is_match(text)
}

fn sentiment_ratios(words: &[&str]) -> (f64, f64, f64) {
    if words.is_empty() {
        return (0.0, 0.0, 1.0);
    }
    let lower: Vec<String> = words.iter().map(|w| w.to_lowercase()).collect();
    let pos = lower
        .iter()
        .filter(|w| POSITIVE_WORDS.contains(&w.as_str()))
        .count();
    let neg = lower
        .iter()
        .filter(|w| NEGATIVE_WORDS.contains(&w.as_str()))
        .count();
    let total = words.len() as f64;
    let pos_ratio = pos as f64 / total;
    let neg_ratio = neg as f64 / total;
    (pos_ratio, neg_ratio, (1.0 - pos_ratio - neg_ratio).max(0.0))
}

/// `0.3 * avg_word_length_norm + 0.4 * entity_density_norm + 0.3 * punctuation_density_norm`.
fn complexity_score(cleaned: &str, words: &[&str], punctuation_ratio: f64) -> f64 {
    if words.is_empty() {
        return 0.0;
    }
    let avg_word_len = words.iter().map(|w| w.len()).sum::<usize>() as f64 / words.len() as f64;
    let avg_word_len_norm = (avg_word_len / 10.0).min(1.0);

    // Entity density proxy: count of capitalized tokens (mid-sentence) and digit runs,
    // capped at roughly 1 per 5 words.
    let entity_like = words
        .iter()
        .filter(|w| w.chars().next().map(char::is_uppercase).unwrap_or(false) || w.chars().any(|c| c.is_ascii_digit()))
        .count();
    let entity_density = entity_like as f64 / words.len() as f64;
    let entity_density_norm = (entity_density / 0.2).min(1.0);

    let punctuation_density_norm = (punctuation_ratio / 0.3).min(1.0);
    let _ = cleaned;

    0.3 * avg_word_len_norm + 0.4 * entity_density_norm + 0.3 * punctuation_density_norm
}

fn punctuation_ratio(text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }
    let punct = text.chars().filter(|c| c.is_ascii_punctuation()).count();
    punct as f64 / text.chars().count() as f64
}

pub fn preprocess(raw: &str) -> PreprocessedMessage {
    let cleaned = clean_text(raw);
    let words: Vec<&str> = cleaned.split_whitespace().collect();
    let punct_ratio = punctuation_ratio(&cleaned);
    let (pos, neg, neutral) = sentiment_ratios(&words);

    PreprocessedMessage {
        word_count: words.len(),
        char_count: cleaned.chars().count(),
        language: "en".to_string(),
        has_pii: detect_pii(&cleaned),
        positive_ratio: pos,
        negative_ratio: neg,
        neutral_ratio: neutral,
        has_temporal_markers: TEMPORAL_WORD_RE.is_match(&cleaned),
        complexity_score: complexity_score(&cleaned, &words, punct_ratio),
        punctuation_ratio: punct_ratio,
        cleaned_text: cleaned,
    }
}

/// `word_count < 3`, `punctuation_ratio > 0.5`, or `complexity_score < 0.1` ⇒ do not extract.
pub fn should_extract(msg: &PreprocessedMessage) -> bool {
    !(msg.word_count < 3 || msg.punctuation_ratio > 0.5 || msg.complexity_score < 0.1)
}

pub fn extraction_hints(msg: &PreprocessedMessage) -> ExtractionHints {
    let mode = if msg.complexity_score < 0.3 {
        ExtractionMode::Strict
    } else if msg.complexity_score < 0.8 {
        ExtractionMode::Moderate
    } else {
        ExtractionMode::Permissive
    };

    let confidence_adjustment = match mode {
        ExtractionMode::Strict => -0.1,
        ExtractionMode::Moderate => 0.0,
        ExtractionMode::Permissive => 0.1,
    };

    let mut suggested_types = Vec::new();
    let mut focus_areas = Vec::new();
    if msg.has_temporal_markers {
        suggested_types.push(MemoryType::Temporal);
        focus_areas.push("temporal".to_string());
    }
    if msg.positive_ratio > 0.0 || msg.negative_ratio > 0.0 {
        suggested_types.push(MemoryType::Emotional);
        focus_areas.push("sentiment".to_string());
    }
    if msg.has_pii {
        focus_areas.push("pii_present".to_string());
    }

    ExtractionHints {
        mode,
        suggested_types,
        focus_areas,
        confidence_adjustment,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_curly_quotes_and_repeated_punctuation() {
        let cleaned = clean_text("I\u{2019}m so excited!!!   really");
        assert_eq!(cleaned, "I'm so excited! really");
    }

    #[test]
    fn gate_rejects_short_messages() {
        let msg = preprocess("hi there");
        assert!(!should_extract(&msg));
    }

    #[test]
    fn gate_allows_substantive_messages() {
        let msg = preprocess("My name is John Smith, I work at Google, and I have a cat.");
        assert!(should_extract(&msg));
    }

    #[test]
    fn detects_email_as_pii() {
        let msg = preprocess("reach me at jane.doe@example.com anytime");
        assert!(msg.has_pii);
    }

    #[test]
    fn extraction_mode_tracks_complexity_bands() {
        let low = PreprocessedMessage {
            complexity_score: 0.05,
            ..Default::default()
        };
        assert_eq!(extraction_hints(&low).mode.as_str(), "strict");
        let high = PreprocessedMessage {
            complexity_score: 0.9,
            ..Default::default()
        };
        assert_eq!(extraction_hints(&high).mode.as_str(), "permissive");
    }
}
