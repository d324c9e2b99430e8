//! Shared SQL-adjacent helpers: sort-column allow-listing and query text
//! cleaning, grounded in `original_source/src/db/manager.py` and
//! `db/user_db_manager.py`.

use std::sync::LazyLock;

/// Allow-listed sort columns, avoiding SQL built from an unvalidated column name.
pub const ALLOWED_SORT_COLUMNS: &[&str] =
    &["created_at", "updated_at", "timestamp", "confidence_score"];

pub fn validate_sort_column(column: &str) -> &'static str {
    ALLOWED_SORT_COLUMNS
        .iter()
        .find(|&&c| c == column)
        .copied()
        .unwrap_or("created_at")
}

static ISO_DATETIME: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\d{4}-\d{2}-\d{2}([T ]\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:?\d{2})?)?")
        .unwrap()
});

/// Strip ISO-8601 datetime-shaped substrings and the characters `<>()"'-`,
/// then collapse whitespace, grounded in `user_db_manager.py::search_memories`.
pub fn clean_search_query(raw: &str) -> String {
    let stripped_dates = ISO_DATETIME.replace_all(raw, " ");
    let cleaned: String = stripped_dates
        .chars()
        .filter(|c| !"<>()\"'-".contains(*c))
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_sort_column_falls_back() {
        assert_eq!(validate_sort_column("memory_id; DROP TABLE memories"), "created_at");
        assert_eq!(validate_sort_column("confidence_score"), "confidence_score");
    }

    #[test]
    fn cleans_dates_and_unsafe_chars() {
        let cleaned = clean_search_query("meeting on 2024-01-05T10:00:00Z with (Bob)");
        assert!(!cleaned.contains("2024"));
        assert!(!cleaned.contains('('));
    }
}
