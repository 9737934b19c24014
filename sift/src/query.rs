//! Query normalization
//!
//! Turns raw user input into a canonical query. Full-text eligible input is
//! passed through (the full-text index tokenizes it); everything else is
//! cleaned of quotes and commas and split into terms for substring matching.

use crate::settings::SearchSettings;
use once_cell::sync::Lazy;
use regex::Regex;

/// Words must be longer than this for full-text search to be worth using
pub const FULLTEXT_MIN_WORD_LEN: usize = 3;

static COMMA_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s+").unwrap());

/// Quote characters and their HTML entities, stripped outright
const QUOTE_SEQUENCES: [&str; 5] = ["&quot;", "&#039;", "&#39;", "\"", "'"];

/// A normalized search query
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchQuery {
    canonical: String,
    terms: Vec<String>,
    fulltext: bool,
}

impl SearchQuery {
    /// Canonical form used for matching, cache keys and cache validation
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// Terms for substring matching; empty for full-text queries
    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    /// Whether the query goes to the full-text index
    pub fn is_fulltext(&self) -> bool {
        self.fulltext
    }

    pub fn is_empty(&self) -> bool {
        self.canonical.is_empty()
    }
}

/// Normalize raw input according to the full-text settings.
///
/// Full-text is used only when enabled and at least one word is longer than
/// three characters; otherwise the term-splitting path runs.
pub fn normalize(raw: &str, settings: &SearchSettings) -> SearchQuery {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return SearchQuery::default();
    }

    if settings.use_fulltext && is_fulltext_eligible(trimmed) {
        return SearchQuery {
            canonical: trimmed.to_string(),
            terms: Vec::new(),
            fulltext: true,
        };
    }

    normalize_terms(raw)
}

/// The term-splitting path, regardless of settings.
pub fn normalize_terms(raw: &str) -> SearchQuery {
    let mut cleaned = raw.trim().to_string();
    for quote in QUOTE_SEQUENCES {
        cleaned = cleaned.replace(quote, "");
    }
    let cleaned = COMMA_SPACE.replace_all(&cleaned, " ").replace(',', " ");

    let terms: Vec<String> = cleaned.split_whitespace().map(str::to_string).collect();
    SearchQuery {
        canonical: terms.join(" "),
        terms,
        fulltext: false,
    }
}

fn is_fulltext_eligible(query: &str) -> bool {
    query
        .split_whitespace()
        .any(|word| word.chars().count() > FULLTEXT_MIN_WORD_LEN)
}
