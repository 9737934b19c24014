//! SearchEngine - query resolution with strategy fallback
//!
//! Resolution is a small state machine:
//!
//! ```text
//! CacheLookup ──hit──────────────────────────────────────────────▶ Done
//!      │ miss
//!      ▼
//! TryFulltext ──rows (or term-split query)───────────────────────▶ Done
//!      │ empty
//!      ▼
//! TryBoolean ───rows─────────────────────────────────────────────▶ Done
//!      │ empty
//!      ▼
//! TryTermMatch ─────────────────────────────────────(terminal)───▶ Done
//! ```
//!
//! Fresh results are cached under the key of the originally requested
//! canonical query, even when the term-match fallback re-normalized it.
//! The engine is the only place strategies escalate; the builder and the
//! stores are stateless per call.

use crate::builder::{build_query, select_mode, StoreQuery};
use crate::cache::{KeyDeriver, ResultCache};
use crate::interface::{
    CacheStore, DocumentStore, MatchMode, MatchSet, PageStatus, RawMatch, ResultPage, SiftError, SortOrder,
};
use crate::paging::{page_window, score_window};
use crate::query::{normalize, normalize_terms, SearchQuery};
use crate::settings::SearchSettings;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on a single document-store call
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// Engine knobs that are not search settings
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    pub store_timeout: Duration,
    pub cache_ttl: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            store_timeout: DEFAULT_STORE_TIMEOUT,
            cache_ttl: crate::cache::DEFAULT_TTL,
        }
    }
}

/// Post-processing of the full result list before scoring and paging.
///
/// Receives the canonical query and the MatchSet rows and returns the rows
/// to page over. The cached MatchSet is never altered.
pub trait ResultPostProcessor: Send + Sync {
    fn process(&self, search_query: &str, matches: &[RawMatch]) -> Vec<RawMatch>;
}

impl<F> ResultPostProcessor for F
where
    F: Fn(&str, &[RawMatch]) -> Vec<RawMatch> + Send + Sync,
{
    fn process(&self, search_query: &str, matches: &[RawMatch]) -> Vec<RawMatch> {
        self(search_query, matches)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    CacheLookup,
    TryFulltext,
    TryBoolean,
    TryTermMatch,
}

impl Stage {
    fn name(self) -> &'static str {
        match self {
            Stage::CacheLookup => "cache lookup",
            Stage::TryFulltext => "primary search",
            Stage::TryBoolean => "boolean fallback",
            Stage::TryTermMatch => "term-match fallback",
        }
    }
}

/// Resolves raw search input into ranked, cached, paginated results.
///
/// Settings are validated once at construction and only read afterwards.
#[derive(Clone)]
pub struct SearchEngine {
    settings: Arc<SearchSettings>,
    store: Arc<dyn DocumentStore>,
    cache: ResultCache,
    options: EngineOptions,
    post_processor: Option<Arc<dyn ResultPostProcessor>>,
}

impl SearchEngine {
    /// Build an engine. Caching is active only when a cache store is given
    /// and `settings.cache_enabled` is set.
    pub fn new(
        settings: SearchSettings,
        store: Arc<dyn DocumentStore>,
        cache_store: Option<Arc<dyn CacheStore>>,
    ) -> Result<Self, SiftError> {
        settings.validate()?;
        let cache = match cache_store {
            Some(cache_store) => ResultCache::new(cache_store, settings.cache_enabled),
            None => ResultCache::disabled(),
        };
        Ok(Self {
            settings: Arc::new(settings),
            store,
            cache,
            options: EngineOptions::default(),
            post_processor: None,
        })
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.cache = self.cache.with_ttl(options.cache_ttl);
        self.options = options;
        self
    }

    pub fn with_key_deriver(mut self, deriver: KeyDeriver) -> Self {
        self.cache = self.cache.with_key_deriver(deriver);
        self
    }

    pub fn with_post_processor(mut self, processor: Arc<dyn ResultPostProcessor>) -> Self {
        self.post_processor = Some(processor);
        self
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Resolve one page of results.
    ///
    /// `limit` of `None` (or zero) uses the configured default. Input that
    /// normalizes to nothing returns an `EmptyQuery` page without touching
    /// the store.
    pub async fn resolve(
        &self,
        raw_query: &str,
        page_offset: i64,
        limit: Option<usize>,
        order: SortOrder,
    ) -> Result<ResultPage, SiftError> {
        let limit = limit.filter(|&l| l > 0).unwrap_or(self.settings.limit);

        let query = normalize(raw_query, &self.settings);
        if query.is_empty() {
            tracing::debug!("empty query, nothing to resolve");
            return Ok(ResultPage::empty_query(limit));
        }

        let set = self.match_set(raw_query, &query, order).await?;
        let matches = match &self.post_processor {
            Some(processor) => processor.process(&set.search_query, &set.matches),
            None => set.matches.clone(),
        };
        let view = MatchSet { matches, ..set };

        let window = page_window(view.len(), limit, page_offset);
        let rows = score_window(&view, window);

        Ok(ResultPage {
            status: if view.is_empty() { PageStatus::NoResults } else { PageStatus::Results },
            search_query: view.search_query.clone(),
            total_row_count: view.len(),
            limit_used: limit,
            offset: window.start.max(0) as usize,
            top_score: view.top_score(),
            mode: view.mode,
            rows,
        })
    }

    /// The complete MatchSet for a normalized query, from cache or the store
    pub async fn match_set(
        &self,
        raw_query: &str,
        query: &SearchQuery,
        order: SortOrder,
    ) -> Result<MatchSet, SiftError> {
        let mut stage = Stage::CacheLookup;
        let mut primary_mode: Option<MatchMode> = None;

        let (mode, matches) = loop {
            match stage {
                Stage::CacheLookup => {
                    if let Some(set) = self.cache.get(query.canonical(), order).await {
                        tracing::debug!(query = %query.canonical(), rows = set.len(), "cache hit");
                        return Ok(set);
                    }
                    tracing::debug!(query = %query.canonical(), "cache miss");
                    stage = Stage::TryFulltext;
                }
                Stage::TryFulltext => {
                    let mode = select_mode(query, self.settings.boolean_mode);
                    let rows = self.run_stage(stage, build_query(query, mode, order, &self.settings)).await?;
                    // term-split queries have nothing to escalate to
                    if !rows.is_empty() || mode == MatchMode::TermMatch {
                        break (mode, rows);
                    }
                    primary_mode = Some(mode);
                    stage = Stage::TryBoolean;
                }
                Stage::TryBoolean => {
                    if primary_mode == Some(MatchMode::FulltextBoolean) {
                        stage = Stage::TryTermMatch;
                        continue;
                    }
                    let mode = MatchMode::FulltextBoolean;
                    let rows = self.run_stage(stage, build_query(query, mode, order, &self.settings)).await?;
                    if !rows.is_empty() {
                        break (mode, rows);
                    }
                    stage = Stage::TryTermMatch;
                }
                Stage::TryTermMatch => {
                    let fallback = normalize_terms(raw_query);
                    let mode = MatchMode::TermMatch;
                    let rows = self.run_stage(stage, build_query(&fallback, mode, order, &self.settings)).await?;
                    break (mode, rows);
                }
            }
        };

        let set = MatchSet {
            search_query: query.canonical().to_string(),
            order,
            mode: Some(mode),
            matches,
        };
        self.cache.set(&set).await;
        Ok(set)
    }

    async fn run_stage(&self, stage: Stage, built: StoreQuery) -> Result<Vec<RawMatch>, SiftError> {
        let after = self.options.store_timeout;
        let rows = match tokio::time::timeout(after, built.execute(self.store.as_ref())).await {
            Ok(Ok(rows)) => rows,
            Ok(Err(e)) => {
                tracing::warn!(stage = stage.name(), error = %e, "document store failed");
                return Err(SiftError::Store(e));
            }
            Err(_) => {
                tracing::warn!(stage = stage.name(), ?after, "document store timed out");
                return Err(SiftError::Timeout { stage: stage.name(), after });
            }
        };
        tracing::debug!(stage = stage.name(), mode = ?built.mode(), rows = rows.len(), "strategy executed");
        Ok(rows)
    }

    /// Forget the cached results for one raw query
    pub async fn invalidate(&self, raw_query: &str) {
        let query = normalize(raw_query, &self.settings);
        if !query.is_empty() {
            self.cache.invalidate(query.canonical()).await;
        }
    }

    /// Forget every cached result (after documents change)
    pub async fn clear_cache(&self) -> u64 {
        self.cache.clear().await
    }
}
