//! SqliteStore - the SQLite-backed `DocumentStore`
//!
//! Async Cancellation Architecture:
//! Store queries run on blocking threads. When the caller drops the future
//! (for example because the engine's timeout elapsed), a DropGuard triggers a
//! CancellationToken and the database layer interrupts the running statement.

use crate::builder::{FulltextQuery, TermMatchQuery};
use crate::database::{Database, DatabaseError};
use crate::interface::{Document, DocumentStore, RawMatch, StoreError};
use once_cell::sync::Lazy;
use rusqlite::types::Value;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Global fallback Tokio runtime for when the store is driven outside any runtime context.
/// Shared across all SqliteStore instances and never dropped.
static FALLBACK_RUNTIME: Lazy<tokio::runtime::Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("sift-fallback")
        .enable_all()
        .build()
        .expect("Failed to create fallback tokio runtime")
});

/// RAII guard that cancels a token when dropped.
struct DropGuard {
    token: CancellationToken,
}

impl DropGuard {
    fn new(token: CancellationToken) -> Self {
        Self { token }
    }
}

impl Drop for DropGuard {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Document store over a pooled SQLite database
///
/// Concurrency Model:
/// - Database uses r2d2 connection pool (concurrent reads, no mutex blocking)
/// - Queries run on spawn_blocking threads and are interrupted when their future is dropped
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        Ok(Self::from_database(Arc::new(Database::open(path)?)))
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Ok(Self::from_database(Arc::new(Database::open_in_memory()?)))
    }

    pub fn from_database(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Shared handle to the underlying database (for the SQLite cache store)
    pub fn database(&self) -> Arc<Database> {
        Arc::clone(&self.db)
    }

    pub fn insert_document(&self, doc: &Document) -> Result<i64, DatabaseError> {
        self.db.insert_document(doc)
    }

    pub fn insert_documents(&self, docs: &[Document]) -> Result<Vec<i64>, DatabaseError> {
        self.db.insert_documents(docs)
    }

    pub fn fetch_documents_by_ids(&self, ids: &[i64]) -> Result<Vec<Document>, DatabaseError> {
        self.db.fetch_documents_by_ids(ids)
    }

    /// Get a tokio runtime handle - uses current runtime if available, otherwise global fallback
    fn runtime_handle(&self) -> tokio::runtime::Handle {
        tokio::runtime::Handle::try_current()
            .unwrap_or_else(|_| FALLBACK_RUNTIME.handle().clone())
    }

    async fn run(&self, sql: String, params: Vec<Value>) -> Result<Vec<RawMatch>, StoreError> {
        let token = CancellationToken::new();
        let _guard = DropGuard::new(token.clone());

        let runtime = self.runtime_handle();
        let runtime_for_closure = runtime.clone();
        let db = Arc::clone(&self.db);

        let handle = runtime.spawn_blocking(move || {
            db.run_match_query(&sql, params, &token, &runtime_for_closure)
        });

        match handle.await {
            Ok(Ok(rows)) => Ok(rows),
            Ok(Err(DatabaseError::Interrupted)) => Err(StoreError::Cancelled),
            Ok(Err(e)) => Err(StoreError::Database(e)),
            Err(join_error) => Err(StoreError::Task(join_error.to_string())),
        }
    }
}

#[async_trait::async_trait]
impl DocumentStore for SqliteStore {
    async fn query_by_fulltext(&self, query: &FulltextQuery) -> Result<Vec<RawMatch>, StoreError> {
        let (sql, params) = query.to_sql();
        self.run(sql, params).await
    }

    async fn query_by_term_match(&self, query: &TermMatchQuery) -> Result<Vec<RawMatch>, StoreError> {
        let (sql, params) = query.to_sql();
        self.run(sql, params).await
    }
}
