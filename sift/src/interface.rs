//! Sift Public Interface
//!
//! Records, errors and the store seams shared by every layer of the
//! resolution pipeline. Callers (widgets, templates, the CLI) only need
//! what is defined here plus `SearchEngine`.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// ENUMS
// ═══════════════════════════════════════════════════════════════════════════════

/// Result ordering requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    Score,
    Date,
}

/// Text-matching strategy executed against the document store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchMode {
    /// Relevance-ranked full-text match, any term may match
    FulltextNatural,
    /// Full-text match requiring every term
    FulltextBoolean,
    /// Case-insensitive substring match per term, no ranking
    TermMatch,
}

impl MatchMode {
    pub fn is_fulltext(&self) -> bool {
        !matches!(self, MatchMode::TermMatch)
    }
}

/// Why a page has (or lacks) rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageStatus {
    /// Input normalized to nothing; the caller should prompt for a term
    EmptyQuery,
    /// The fallback chain ran to completion without a match
    NoResults,
    Results,
}

// ═══════════════════════════════════════════════════════════════════════════════
// RECORDS (Structs)
// ═══════════════════════════════════════════════════════════════════════════════

/// One row returned by the document store.
///
/// `score` units depend on the strategy that produced the row and are not
/// comparable across strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMatch {
    pub id: i64,
    pub score: f64,
    pub timestamp: Option<i64>,
}

/// The complete ranked result list for one canonical query.
///
/// Never mutated after construction; pages are slices of `matches`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSet {
    pub search_query: String,
    /// Ordering the rows were produced in
    #[serde(default)]
    pub order: SortOrder,
    /// Strategy that produced the rows
    #[serde(default)]
    pub mode: Option<MatchMode>,
    pub matches: Vec<RawMatch>,
}

impl MatchSet {
    pub fn new(search_query: impl Into<String>, matches: Vec<RawMatch>) -> Self {
        Self {
            search_query: search_query.into(),
            order: SortOrder::Score,
            mode: None,
            matches,
        }
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Highest raw score in the set, 0 when empty
    pub fn top_score(&self) -> f64 {
        crate::paging::top_score(&self.matches)
    }
}

/// A page row carrying both raw and relative scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredMatch {
    pub document_id: i64,
    pub raw_score: f64,
    pub relative_score: f64,
    pub timestamp: Option<i64>,
}

/// One page of a resolved query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPage {
    pub status: PageStatus,
    /// Canonical query the page was resolved for
    pub search_query: String,
    pub total_row_count: usize,
    pub limit_used: usize,
    /// Offset of the first row of this page within the full MatchSet
    pub offset: usize,
    pub top_score: f64,
    /// Strategy that produced the rows; `None` for empty queries
    pub mode: Option<MatchMode>,
    pub rows: Vec<ScoredMatch>,
}

impl ResultPage {
    pub(crate) fn empty_query(limit_used: usize) -> Self {
        Self {
            status: PageStatus::EmptyQuery,
            search_query: String::new(),
            total_row_count: 0,
            limit_used,
            offset: 0,
            top_score: 0.0,
            mode: None,
            rows: Vec::new(),
        }
    }

    pub fn is_empty_query(&self) -> bool {
        self.status == PageStatus::EmptyQuery
    }

    /// 1-based (first, last) row numbers shown on this page, for "Results 11 to 20 of 25"
    pub fn display_range(&self) -> Option<(usize, usize)> {
        if self.rows.is_empty() {
            return None;
        }
        Some((self.offset + 1, self.offset + self.rows.len()))
    }

    /// Offset of the following page, if any rows remain
    pub fn next_offset(&self) -> Option<usize> {
        self.offset
            .checked_add(self.limit_used)
            .filter(|&next| next < self.total_row_count)
    }

    /// Offset of the preceding page, if this is not the first
    pub fn previous_offset(&self) -> Option<usize> {
        (self.offset > 0).then(|| self.offset.saturating_sub(self.limit_used))
    }
}

/// A stored document as exposed by the document store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default = "default_status")]
    pub status: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default = "now_unix")]
    pub published_at: i64,
}

fn default_kind() -> String {
    "post".to_string()
}

fn default_status() -> String {
    PUBLISHED_STATUS.to_string()
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Status value of documents visible to search
pub const PUBLISHED_STATUS: &str = "publish";

impl Document {
    /// A published document of the given kind, timestamped now
    pub fn new(kind: impl Into<String>, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: None,
            kind: kind.into(),
            status: default_status(),
            title: title.into(),
            body: body.into(),
            published_at: now_unix(),
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn published_at(mut self, timestamp: i64) -> Self {
        self.published_at = timestamp;
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Document-store failure (StoreUnavailable)
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] crate::database::DatabaseError),
    #[error("Store task failed: {0}")]
    Task(String),
    #[error("Query cancelled")]
    Cancelled,
}

/// Cache-store failure (CacheUnavailable). Never surfaced by `resolve`.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),
    #[error("Cache entry could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Error type returned to callers of the engine
#[derive(Debug, Error)]
pub enum SiftError {
    #[error("Document store unavailable: {0}")]
    Store(#[from] StoreError),
    #[error("Document store timed out after {after:?} during {stage}")]
    Timeout { stage: &'static str, after: Duration },
    #[error("Malformed settings: {0}")]
    Settings(#[from] crate::settings::SettingsError),
}

impl From<crate::database::DatabaseError> for SiftError {
    fn from(e: crate::database::DatabaseError) -> Self {
        SiftError::Store(StoreError::Database(e))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STORE INTERFACES
// ═══════════════════════════════════════════════════════════════════════════════

/// The persistent document store consumed by the engine.
///
/// Implementations execute already-built queries; strategy choice and
/// escalation belong to the engine.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    async fn query_by_fulltext(
        &self,
        query: &crate::builder::FulltextQuery,
    ) -> Result<Vec<RawMatch>, StoreError>;

    async fn query_by_term_match(
        &self,
        query: &crate::builder::TermMatchQuery,
    ) -> Result<Vec<RawMatch>, StoreError>;
}

/// Key-value store used to memoize MatchSets
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Remove every key starting with `prefix`. Returns the number removed.
    async fn clear_prefix(&self, prefix: &str) -> Result<u64, CacheError>;
}
