//! Sift - related-content search over a document store
//!
//! Turns free-text search input into ranked, paginated results. Queries are
//! normalized, matched through SQLite FTS5 with a fallback chain
//! (natural → boolean → term match), memoized in a result cache and scored
//! relative to the best match.
//!
//! Entry point is [`SearchEngine::resolve`].

pub mod builder;
pub mod cache;
pub mod database;
pub mod engine;
pub mod interface;
pub mod paging;
pub mod present;
pub mod query;
pub mod settings;
mod store;

pub use cache::{MemoryCache, ResultCache, SqliteCache};
pub use engine::{EngineOptions, ResultPostProcessor, SearchEngine};
pub use interface::*;
pub use present::{assemble, ResultRow};
pub use settings::{SearchSettings, SettingsError};
pub use store::SqliteStore;
