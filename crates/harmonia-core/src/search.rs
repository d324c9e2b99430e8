//! Search Engine: FTS query building, BM25 re-ranking, filtering,
//! pagination, and export formats.
//!
//! Grounded in `original_source/src/search/search_engine.py`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::model::{Memory, MemoryType};
use crate::storage::{ListFilters, Storage, StorageError};

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;
const CORPUS_CACHE_TTL: Duration = Duration::from_secs(300);
const RECENCY_WINDOW_DAYS: i64 = 30;
const MIN_RECENCY_FLOOR: f64 = 0.1;
const CATEGORY_BOOST_FACTOR: f64 = 1.2;
const SNIPPET_LEAD: usize = 50;
const SNIPPET_WINDOW: usize = 200;
const MAX_QUERY_LEN: usize = 1000;

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("search query must not be empty")]
    EmptyQuery,
    #[error("search query exceeds {MAX_QUERY_LEN} characters")]
    QueryTooLong,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("unknown export format: {0}")]
    UnknownFormat(String),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SearchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SearchError::EmptyQuery | SearchError::QueryTooLong | SearchError::UnknownFormat(_) => {
                ErrorKind::Validation
            }
            SearchError::Storage(e) => e.kind(),
            SearchError::Csv(_) | SearchError::Json(_) => ErrorKind::DbError,
        }
    }
}

pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Debug, Clone)]
pub struct ParsedQuery {
    /// Flattened search terms: whitespace-split words plus quoted phrases,
    /// FTS-unsafe characters already stripped.
    pub tokens: Vec<String>,
}

/// Trim, preserve quoted phrases, strip FTS-unsafe characters (`'`, `(`,
/// `)`, `^`), drop an unmatched trailing quote, reject empty or >1000-char
/// queries.
pub fn parse_query(raw: &str) -> Result<ParsedQuery> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SearchError::EmptyQuery);
    }
    if trimmed.chars().count() > MAX_QUERY_LEN {
        return Err(SearchError::QueryTooLong);
    }

    let quote_count = trimmed.matches('"').count();
    let working = if quote_count % 2 == 1 {
        let idx = trimmed.rfind('"').unwrap();
        let mut s = trimmed.to_string();
        s.remove(idx);
        s
    } else {
        trimmed.to_string()
    };

    let mut phrases = Vec::new();
    let mut rest = String::new();
    let mut in_quote = false;
    let mut current = String::new();
    for c in working.chars() {
        if c == '"' {
            if in_quote {
                let phrase = current.trim().to_string();
                if !phrase.is_empty() {
                    phrases.push(phrase);
                }
                current.clear();
            }
            in_quote = !in_quote;
        } else if in_quote {
            current.push(c);
        } else {
            rest.push(c);
        }
    }

    let cleaned_rest: String = rest.chars().filter(|c| !"'()^".contains(*c)).collect();
    let mut tokens: Vec<String> = cleaned_rest
        .split_whitespace()
        .map(str::to_string)
        .collect();
    tokens.extend(phrases);

    if tokens.is_empty() {
        return Err(SearchError::EmptyQuery);
    }
    Ok(ParsedQuery { tokens })
}

/// A single token as-is; multiple tokens become
/// `(t1 OR t2 OR …) OR "t1 t2 …"` so either a keyword hit or the whole
/// phrase matches.
pub fn build_fts_query(parsed: &ParsedQuery) -> String {
    if parsed.tokens.len() == 1 {
        return quote_if_phrase(&parsed.tokens[0]);
    }
    let or_clause = parsed
        .tokens
        .iter()
        .map(|t| quote_if_phrase(t))
        .collect::<Vec<_>>()
        .join(" OR ");
    let phrase_clause = parsed.tokens.join(" ");
    format!("({or_clause}) OR \"{phrase_clause}\"")
}

fn quote_if_phrase(token: &str) -> String {
    if token.contains(' ') {
        format!("\"{token}\"")
    } else {
        token.to_string()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub raw: String,
    pub category: Option<MemoryType>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub min_confidence: Option<f64>,
    pub max_confidence: Option<f64>,
    pub limit: i64,
    pub offset: i64,
    pub boost_recent: bool,
    pub boost_categories: Vec<MemoryType>,
}

impl SearchQuery {
    pub fn new(raw: impl Into<String>) -> Self {
        SearchQuery {
            raw: raw.into(),
            limit: 20,
            offset: 0,
            ..Default::default()
        }
    }

    fn passes(&self, m: &Memory) -> bool {
        if let Some(cat) = self.category {
            if m.category != cat {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if m.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if m.created_at > before {
                return false;
            }
        }
        if let Some(min) = self.min_confidence {
            if m.confidence_score.unwrap_or(0.0) < min {
                return false;
            }
        }
        if let Some(max) = self.max_confidence {
            if m.confidence_score.unwrap_or(1.0) > max {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct SearchResultItem {
    pub memory: Memory,
    pub score: f64,
    pub snippet: String,
    pub highlights: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SearchPage {
    pub items: Vec<SearchResultItem>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub has_more: bool,
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

struct CorpusStats {
    total_docs: i64,
    avg_doc_len: f64,
    /// Tokenized content, kept around to compute per-term document
    /// frequency without re-tokenizing on every call.
    tokenized: Vec<Vec<String>>,
    computed_at: Instant,
}

/// BM25 re-ranker with a lazily-refreshed, 5-minute-cached corpus
/// statistics snapshot. One instance is meant to be reused across calls
/// for the same user's storage (but is safe to share more widely; the
/// cache simply refreshes whenever the corpus it last saw goes stale).
pub struct SearchEngine {
    corpus: Mutex<Option<CorpusStats>>,
}

impl Default for SearchEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchEngine {
    pub fn new() -> Self {
        SearchEngine {
            corpus: Mutex::new(None),
        }
    }

    fn refresh_corpus(&self, storage: &Storage) -> Result<()> {
        let mut guard = self.corpus.lock().unwrap();
        let stale = match &*guard {
            Some(c) => c.computed_at.elapsed() > CORPUS_CACHE_TTL,
            None => true,
        };
        if !stale {
            return Ok(());
        }
        let memories = storage.all_active_memories()?;
        let tokenized: Vec<Vec<String>> = memories.iter().map(|m| tokenize(&m.content)).collect();
        let total_docs = tokenized.len() as i64;
        let avg_doc_len = if tokenized.is_empty() {
            0.0
        } else {
            tokenized.iter().map(|t| t.len()).sum::<usize>() as f64 / tokenized.len() as f64
        };
        *guard = Some(CorpusStats {
            total_docs,
            avg_doc_len,
            tokenized,
            computed_at: Instant::now(),
        });
        Ok(())
    }

    /// `k1=1.2, b=0.75` summed over query terms, using document frequency
    /// computed against the cached corpus snapshot.
    fn bm25(&self, doc_tokens: &[String], terms: &[String]) -> f64 {
        let guard = self.corpus.lock().unwrap();
        let Some(stats) = guard.as_ref() else { return 0.0 };
        if stats.total_docs == 0 {
            return 0.0;
        }
        let doc_len = doc_tokens.len() as f64;
        let mut score = 0.0;
        for term in terms {
            let term_lower = term.to_lowercase();
            let query_words: Vec<&str> = term_lower.split_whitespace().collect();
            for word in query_words {
                let df = stats
                    .tokenized
                    .iter()
                    .filter(|doc| doc.iter().any(|t| t == word))
                    .count() as f64;
                if df == 0.0 {
                    continue;
                }
                let tf = doc_tokens.iter().filter(|t| t.as_str() == word).count() as f64;
                if tf == 0.0 {
                    continue;
                }
                let idf = (((stats.total_docs as f64 - df + 0.5) / (df + 0.5)).ln()).max(0.01);
                let denom = tf + BM25_K1 * (1.0 - BM25_B + BM25_B * doc_len / stats.avg_doc_len.max(1.0));
                score += idf * (tf * (BM25_K1 + 1.0)) / denom;
            }
        }
        score
    }

    /// For memories ≤30 days old, `1 + max(0.1, 1 - (days_old/30)*0.5)` —
    /// up to +100% at day 0, decaying to +10% at the 30-day cliff.
    fn recency_multiplier(&self, memory: &Memory) -> f64 {
        let age_days = (Utc::now() - memory.created_at).num_days();
        if age_days < 0 || age_days > RECENCY_WINDOW_DAYS {
            return 1.0;
        }
        let fraction = 1.0 - (age_days as f64 / RECENCY_WINDOW_DAYS as f64) * 0.5;
        1.0 + fraction.max(MIN_RECENCY_FLOOR)
    }

    fn score(&self, memory: &Memory, terms: &[String], query: &SearchQuery) -> f64 {
        let doc_tokens = tokenize(&memory.content);
        let mut score = self.bm25(&doc_tokens, terms);
        score *= memory.confidence_score.unwrap_or(1.0);
        if query.boost_recent {
            score *= self.recency_multiplier(memory);
        }
        if query.boost_categories.contains(&memory.category) {
            score *= CATEGORY_BOOST_FACTOR;
        }
        score
    }

    /// Full-text search: parse, build the FTS query, fetch a generously
    /// sized candidate window, apply filters, re-rank by BM25, paginate.
    pub fn search(&self, storage: &Storage, query: &SearchQuery) -> Result<SearchPage> {
        let parsed = parse_query(&query.raw)?;
        let fts_query = build_fts_query(&parsed);

        let candidate_limit = (query.offset + query.limit).max(200).min(2000);
        let hits = storage.fts_search(&fts_query, candidate_limit)?;

        let mut candidates = Vec::with_capacity(hits.len());
        for (id, _rank) in hits {
            if let Some(m) = storage.get_memory(&id)? {
                if query.passes(&m) {
                    candidates.push(m);
                }
            }
        }

        self.refresh_corpus(storage)?;

        let mut scored: Vec<(Memory, f64)> = candidates
            .into_iter()
            .map(|m| {
                let s = self.score(&m, &parsed.tokens, query);
                (m, s)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let total = scored.len() as i64;
        let limit = query.limit.max(0);
        let offset = query.offset.max(0);
        let page: Vec<(Memory, f64)> = scored
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();

        let items: Vec<SearchResultItem> = page
            .into_iter()
            .map(|(memory, score)| {
                let snippet = make_snippet(&memory.content, &parsed.tokens);
                let highlights = highlight_terms(&memory.content, &parsed.tokens);
                SearchResultItem {
                    memory,
                    score,
                    snippet,
                    highlights,
                }
            })
            .collect();

        let has_more = offset + items.len() as i64 < total;
        Ok(SearchPage {
            items,
            total,
            limit,
            offset,
            has_more,
        })
    }

    /// Listing reuses the filter/sort/pagination path but skips FTS/BM25.
    pub fn list(&self, storage: &Storage, filters: &ListFilters) -> Result<SearchPage> {
        let (memories, total) = storage.list_memories(filters)?;
        let page_len = memories.len() as i64;
        let items = memories
            .into_iter()
            .map(|memory| SearchResultItem {
                memory,
                score: 0.0,
                snippet: String::new(),
                highlights: Vec::new(),
            })
            .collect();
        Ok(SearchPage {
            items,
            total,
            limit: filters.limit,
            offset: filters.offset,
            has_more: filters.offset + page_len < total,
        })
    }
}

/// A ~200-char window starting 50 chars before the first matched query
/// term (clamped to 0), ellipsized at either truncated end.
fn make_snippet(content: &str, terms: &[String]) -> String {
    let chars: Vec<char> = content.chars().collect();
    if chars.len() <= SNIPPET_WINDOW {
        return content.to_string();
    }

    let lower = content.to_lowercase();
    let byte_pos = terms
        .iter()
        .filter_map(|t| lower.find(&t.to_lowercase()))
        .min();

    let char_pos = match byte_pos {
        Some(b) => content
            .char_indices()
            .position(|(i, _)| i >= b)
            .unwrap_or(0),
        None => 0,
    };

    let start = char_pos.saturating_sub(SNIPPET_LEAD);
    let end = (start + SNIPPET_WINDOW).min(chars.len());
    let window: String = chars[start..end].iter().collect();

    let prefix = if start > 0 { "..." } else { "" };
    let suffix = if end < chars.len() { "..." } else { "" };
    format!("{prefix}{window}{suffix}")
}

fn highlight_terms(content: &str, terms: &[String]) -> Vec<String> {
    let lower = content.to_lowercase();
    terms
        .iter()
        .filter(|t| lower.contains(&t.to_lowercase()))
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
    Markdown,
    Text,
}

impl ExportFormat {
    pub fn parse(s: &str) -> Result<ExportFormat> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            "text" | "txt" => Ok(ExportFormat::Text),
            other => Err(SearchError::UnknownFormat(other.to_string())),
        }
    }
}

/// The exported shape of a memory record; round-trips through JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRecord {
    pub memory_id: String,
    pub content: String,
    pub category: String,
    pub confidence_score: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

fn to_record(m: &Memory, user_id: &str, include_metadata: bool) -> ExportRecord {
    ExportRecord {
        memory_id: m.memory_id.clone(),
        content: m.content.clone(),
        category: m.category.as_str().to_string(),
        confidence_score: m.confidence_score,
        timestamp: m.timestamp,
        created_at: m.created_at,
        updated_at: m.updated_at,
        user_id: include_metadata.then(|| user_id.to_string()),
        original_message: include_metadata.then(|| m.original_message.clone()).flatten(),
        metadata: include_metadata.then(|| m.metadata.clone()),
    }
}

pub fn export(
    memories: &[Memory],
    format: ExportFormat,
    user_id: &str,
    include_metadata: bool,
) -> Result<String> {
    match format {
        ExportFormat::Json => export_json(memories, user_id, include_metadata),
        ExportFormat::Csv => export_csv(memories, user_id, include_metadata),
        ExportFormat::Markdown => Ok(export_markdown(memories, true)),
        ExportFormat::Text => Ok(export_markdown(memories, false)),
    }
}

pub fn export_json(memories: &[Memory], user_id: &str, include_metadata: bool) -> Result<String> {
    let records: Vec<ExportRecord> = memories
        .iter()
        .map(|m| to_record(m, user_id, include_metadata))
        .collect();
    Ok(serde_json::to_string_pretty(&records)?)
}

/// Parses a JSON export back into records, for round-trip verification.
pub fn import_json(raw: &str) -> Result<Vec<ExportRecord>> {
    Ok(serde_json::from_str(raw)?)
}

fn export_csv(memories: &[Memory], user_id: &str, include_metadata: bool) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let mut header = vec![
        "memory_id",
        "content",
        "category",
        "confidence_score",
        "created_at",
        "updated_at",
    ];
    if include_metadata {
        header.extend(["user_id", "original_message", "metadata"]);
    }
    writer.write_record(&header)?;

    for m in memories {
        let mut row = vec![
            m.memory_id.clone(),
            m.content.clone(),
            m.category.as_str().to_string(),
            m.confidence_score.map(|c| c.to_string()).unwrap_or_default(),
            m.created_at.to_rfc3339(),
            m.updated_at.to_rfc3339(),
        ];
        if include_metadata {
            row.push(user_id.to_string());
            row.push(m.original_message.clone().unwrap_or_default());
            row.push(serde_json::to_string(&m.metadata).unwrap_or_default());
        }
        writer.write_record(&row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| SearchError::Csv(csv::Error::from(e.into_error())))?;
    Ok(String::from_utf8_lossy(&bytes).to_string())
}

fn export_markdown(memories: &[Memory], markdown_syntax: bool) -> String {
    let mut out = String::new();
    if markdown_syntax {
        out.push_str("# Exported Memories\n\n");
    } else {
        out.push_str("Exported Memories\n\n");
    }
    for m in memories {
        if markdown_syntax {
            out.push_str(&format!("## {}\n\n", m.category));
            out.push_str(&format!("- **Content**: {}\n", m.content));
            out.push_str(&format!(
                "- **Confidence**: {:.2}\n",
                m.confidence_score.unwrap_or(0.0)
            ));
            out.push_str(&format!("- **Created**: {}\n\n", m.created_at.to_rfc3339()));
        } else {
            out.push_str(&format!("[{}] {}\n", m.category, m.content));
            out.push_str(&format!(
                "  confidence={:.2} created={}\n\n",
                m.confidence_score.unwrap_or(0.0),
                m.created_at.to_rfc3339()
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemoryType;
    use crate::storage::Storage;

    fn memory(content: &str, category: MemoryType) -> Memory {
        Memory::new(content.to_string(), category)
    }

    #[test]
    fn parse_query_rejects_empty_and_too_long() {
        assert!(matches!(parse_query(""), Err(SearchError::EmptyQuery)));
        let long = "a".repeat(1001);
        assert!(matches!(parse_query(&long), Err(SearchError::QueryTooLong)));
    }

    #[test]
    fn parse_query_drops_unmatched_quote() {
        let parsed = parse_query("hello \"world").unwrap();
        assert!(parsed.tokens.contains(&"hello".to_string()));
    }

    #[test]
    fn parse_query_strips_unsafe_characters() {
        let parsed = parse_query("foo(bar)^baz'qux").unwrap();
        assert!(parsed.tokens.iter().all(|t| !t.contains(['(', ')', '^', '\''])));
    }

    #[test]
    fn build_fts_query_single_token_is_bare() {
        let parsed = ParsedQuery { tokens: vec!["rust".to_string()] };
        assert_eq!(build_fts_query(&parsed), "rust");
    }

    #[test]
    fn build_fts_query_multi_token_or_and_phrase() {
        let parsed = ParsedQuery {
            tokens: vec!["rust".to_string(), "programming".to_string()],
        };
        let q = build_fts_query(&parsed);
        assert!(q.contains("rust OR programming"));
        assert!(q.contains("\"rust programming\""));
    }

    #[test]
    fn bm25_ranks_matching_document_higher() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path().join("harmonia.db")).unwrap();
        let mut a = memory("I enjoy programming in Rust every day", MemoryType::Skill);
        a.confidence_score = Some(0.9);
        let mut b = memory("I enjoy cooking pasta every day", MemoryType::Skill);
        b.confidence_score = Some(0.9);
        storage.create_memory(&a).unwrap();
        storage.create_memory(&b).unwrap();

        let engine = SearchEngine::new();
        let query = SearchQuery {
            raw: "programming".to_string(),
            limit: 10,
            ..Default::default()
        };
        let page = engine.search(&storage, &query).unwrap();
        assert!(!page.items.is_empty());
        assert_eq!(page.items[0].memory.memory_id, a.memory_id);
    }

    #[test]
    fn json_export_round_trips() {
        let memories = vec![memory("Loves hiking", MemoryType::Preference)];
        let json = export_json(&memories, "alice", true).unwrap();
        let records = import_json(&json).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content, "Loves hiking");
        assert_eq!(records[0].user_id.as_deref(), Some("alice"));
    }

    #[test]
    fn all_export_formats_produce_nonempty_payload() {
        let memories = vec![memory("Has a cat", MemoryType::Personal)];
        for fmt in [
            ExportFormat::Json,
            ExportFormat::Csv,
            ExportFormat::Markdown,
            ExportFormat::Text,
        ] {
            let out = export(&memories, fmt, "alice", false).unwrap();
            assert!(!out.is_empty());
        }
    }
}
