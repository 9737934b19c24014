//! Strategy selection and query building
//!
//! Pure and stateless: given a normalized query, a strategy and an ordering,
//! produce the query the document store executes. Escalation between
//! strategies is decided by the engine, never here.

use crate::database::FOLD_FUNCTION;
use crate::interface::{DocumentStore, MatchMode, RawMatch, SortOrder, StoreError, PUBLISHED_STATUS};
use crate::query::SearchQuery;
use crate::settings::SearchSettings;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::Value;

/// Score assigned to every term-match row (no ranking is attempted)
pub const TERM_MATCH_SCORE: f64 = 1.0;

/// Runs of letters and digits, mirroring FTS5's unicode61 token characters
static FTS_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+").unwrap());

/// Full-text query against the weighted title/body index
#[derive(Debug, Clone, PartialEq)]
pub struct FulltextQuery {
    pub tokens: Vec<String>,
    /// Require every token instead of ranking any-token matches
    pub boolean: bool,
    pub weight_title: f64,
    pub weight_content: f64,
    pub order: SortOrder,
    pub allowed_kinds: Vec<String>,
}

/// Substring query: every term must appear in the title or the body
#[derive(Debug, Clone, PartialEq)]
pub struct TermMatchQuery {
    pub terms: Vec<String>,
    pub order: SortOrder,
    pub allowed_kinds: Vec<String>,
}

/// A built query, ready for a `DocumentStore`
#[derive(Debug, Clone, PartialEq)]
pub enum StoreQuery {
    Fulltext(FulltextQuery),
    TermMatch(TermMatchQuery),
}

impl StoreQuery {
    pub fn mode(&self) -> MatchMode {
        match self {
            StoreQuery::Fulltext(q) if q.boolean => MatchMode::FulltextBoolean,
            StoreQuery::Fulltext(_) => MatchMode::FulltextNatural,
            StoreQuery::TermMatch(_) => MatchMode::TermMatch,
        }
    }

    /// True when nothing could match (no tokens or terms), so the store need not be asked
    pub fn is_unsatisfiable(&self) -> bool {
        match self {
            StoreQuery::Fulltext(q) => q.tokens.is_empty() || q.allowed_kinds.is_empty(),
            StoreQuery::TermMatch(q) => q.terms.is_empty() || q.allowed_kinds.is_empty(),
        }
    }

    pub async fn execute(&self, store: &dyn DocumentStore) -> Result<Vec<RawMatch>, StoreError> {
        if self.is_unsatisfiable() {
            return Ok(Vec::new());
        }
        match self {
            StoreQuery::Fulltext(q) => store.query_by_fulltext(q).await,
            StoreQuery::TermMatch(q) => store.query_by_term_match(q).await,
        }
    }
}

/// Pick the strategy for a query: term-split queries always use term match,
/// full-text queries use boolean mode when requested.
pub fn select_mode(query: &SearchQuery, boolean: bool) -> MatchMode {
    if !query.is_fulltext() {
        MatchMode::TermMatch
    } else if boolean {
        MatchMode::FulltextBoolean
    } else {
        MatchMode::FulltextNatural
    }
}

pub fn build_query(
    query: &SearchQuery,
    mode: MatchMode,
    order: SortOrder,
    settings: &SearchSettings,
) -> StoreQuery {
    let allowed_kinds = settings.allowed_kinds();
    match mode {
        MatchMode::FulltextNatural | MatchMode::FulltextBoolean => StoreQuery::Fulltext(FulltextQuery {
            tokens: fulltext_tokens(query.canonical()),
            boolean: mode == MatchMode::FulltextBoolean,
            weight_title: settings.weight_title as f64,
            weight_content: settings.weight_content as f64,
            order,
            allowed_kinds,
        }),
        MatchMode::TermMatch => {
            let terms = if query.terms().is_empty() {
                query.canonical().split_whitespace().map(str::to_string).collect()
            } else {
                query.terms().to_vec()
            };
            StoreQuery::TermMatch(TermMatchQuery {
                terms,
                order,
                allowed_kinds,
            })
        }
    }
}

/// Distinct index tokens of a full-text query, in first-seen order
pub fn fulltext_tokens(canonical: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for m in FTS_TOKEN.find_iter(canonical) {
        let token = m.as_str().to_lowercase();
        if !tokens.contains(&token) {
            tokens.push(token);
        }
    }
    tokens
}

// ─────────────────────────────────────────────────────────────────────────────
// SQLite rendering
// ─────────────────────────────────────────────────────────────────────────────

impl FulltextQuery {
    /// FTS5 MATCH expression; tokens are quoted so none is read as an operator
    pub fn match_expression(&self) -> String {
        let joiner = if self.boolean { " AND " } else { " OR " };
        self.tokens
            .iter()
            .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(joiner)
    }

    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let mut params: Vec<Value> = vec![
            Value::Text(self.match_expression()),
            Value::Text(PUBLISHED_STATUS.to_string()),
        ];
        let kinds = kind_placeholders(&self.allowed_kinds, &mut params);

        // bm25() is negative-is-better; negate so larger means more relevant
        let sql = format!(
            r#"SELECT id, score, published_at FROM (
                   SELECT d.id AS id,
                          -bm25(documents_fts, {wt:?}, {wc:?}) AS score,
                          d.published_at AS published_at
                   FROM documents_fts
                   JOIN documents d ON d.id = documents_fts.rowid
                   WHERE documents_fts MATCH ?1 AND d.status = ?2 AND d.kind IN ({kinds})
               )
               WHERE score > 0
               ORDER BY {order}"#,
            wt = self.weight_title,
            wc = self.weight_content,
            kinds = kinds,
            order = order_clause(self.order),
        );
        (sql, params)
    }
}

impl TermMatchQuery {
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let mut params: Vec<Value> = vec![Value::Text(PUBLISHED_STATUS.to_string())];
        let kinds = kind_placeholders(&self.allowed_kinds, &mut params);

        let mut term_clauses = Vec::with_capacity(self.terms.len());
        for term in &self.terms {
            params.push(Value::Text(format!("%{}%", escape_like(&term.to_lowercase()))));
            let n = params.len();
            term_clauses.push(format!(
                r"({fold}(title) LIKE ?{n} ESCAPE '\' OR {fold}(body) LIKE ?{n} ESCAPE '\')",
                fold = FOLD_FUNCTION,
            ));
        }

        let sql = format!(
            r#"SELECT id, {score:?} AS score, published_at
               FROM documents
               WHERE status = ?1 AND kind IN ({kinds}) AND {terms}
               ORDER BY {order}"#,
            score = TERM_MATCH_SCORE,
            kinds = kinds,
            terms = term_clauses.join(" AND "),
            order = order_clause(self.order),
        );
        (sql, params)
    }
}

fn kind_placeholders(kinds: &[String], params: &mut Vec<Value>) -> String {
    let mut placeholders = Vec::with_capacity(kinds.len());
    for kind in kinds {
        params.push(Value::Text(kind.clone()));
        placeholders.push(format!("?{}", params.len()));
    }
    placeholders.join(",")
}

fn order_clause(order: SortOrder) -> &'static str {
    match order {
        SortOrder::Score => "score DESC, id ASC",
        SortOrder::Date => "published_at DESC, id ASC",
    }
}

/// Escape LIKE wildcards so terms match literally
fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}
