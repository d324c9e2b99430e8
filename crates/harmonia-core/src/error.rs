//! Unified error type for `harmonia-core`.
//!
//! Each component defines its own `thiserror`-derived error enum at its seam
//! (`StorageError`, `RouterError`, ...); this top-level `Error` unifies them
//! with `#[from]` conversions so callers can use `?` across component
//! boundaries, tagged with the §7 error kind so the HTTP layer can map it to
//! a status code and stable error-code string without re-deriving the
//! taxonomy. Matches the teacher's own split between library-internal
//! `thiserror` and binary-level `anyhow`.

use crate::conflict::detect::ConflictError;
use crate::llm::LlmError;
use crate::router::RouterError;
use crate::storage::StorageError;

pub type Result<T> = std::result::Result<T, Error>;

/// Stable error-kind taxonomy from spec.md §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Duplicate,
    ConflictUserRequired,
    LlmUnavailable,
    LlmModelMissing,
    ExtractionParseError,
    DbBusy,
    DbError,
    RateLimited,
    Auth,
}

impl ErrorKind {
    /// The stable code string from SPEC_FULL.md §6.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Duplicate => "DUPLICATE",
            ErrorKind::ConflictUserRequired => "CONFLICT_USER_REQUIRED",
            ErrorKind::LlmUnavailable => "LLM_UNAVAILABLE",
            ErrorKind::LlmModelMissing => "LLM_MODEL_MISSING",
            ErrorKind::ExtractionParseError => "EXTRACTION_PARSE_ERROR",
            ErrorKind::DbBusy => "DB_BUSY",
            ErrorKind::DbError => "DB_ERROR",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::Auth => "AUTH",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Duplicate => 409,
            ErrorKind::ConflictUserRequired => 409,
            ErrorKind::LlmUnavailable | ErrorKind::LlmModelMissing => 503,
            ErrorKind::ExtractionParseError => 422,
            ErrorKind::DbBusy => 503,
            ErrorKind::DbError => 500,
            ErrorKind::RateLimited => 429,
            ErrorKind::Auth => 401,
        }
    }
}

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("conflict requires user intervention: {0}")]
    ConflictUserRequired(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    Search(#[from] crate::search::SearchError),

    #[error("extraction parse error: {0}")]
    ExtractionParseError(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Duplicate(_) => ErrorKind::Duplicate,
            Error::ConflictUserRequired(_) => ErrorKind::ConflictUserRequired,
            Error::ExtractionParseError(_) => ErrorKind::ExtractionParseError,
            Error::Storage(e) => e.kind(),
            Error::Router(e) => e.kind(),
            Error::Llm(e) => e.kind(),
            Error::Conflict(_) => ErrorKind::DbError,
            Error::Search(e) => e.kind(),
        }
    }
}
