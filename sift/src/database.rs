//! SQLite database layer for document storage
//!
//! `documents` holds the content; an external-content FTS5 table indexes
//! title and body and is kept in sync by triggers. A small `cache_entries`
//! table backs the persistent result cache.
//! Uses r2d2 connection pooling to allow concurrent reads without mutex blocking.

use crate::interface::{Document, RawMatch};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::Value;
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("Query interrupted")]
    Interrupted,
    #[error("Document {0} not found")]
    NotFound(i64),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

const DOCUMENT_COLUMNS: &str = "id, kind, status, title, body, published_at";

/// SQL scalar that lowercases its argument with full Unicode case mapping.
/// Built-in LIKE only folds ASCII.
pub const FOLD_FUNCTION: &str = "sift_fold";

fn register_functions(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        FOLD_FUNCTION,
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let text: String = ctx.get(0)?;
            Ok(text.to_lowercase())
        },
    )
}

/// Thread-safe database wrapper using connection pooling
///
/// Uses r2d2 connection pool for concurrent read access.
/// WAL mode enables readers to proceed without blocking each other.
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open or create a database at the given path with connection pooling
    pub fn open<P: AsRef<Path>>(path: P) -> DatabaseResult<Self> {
        let manager = SqliteConnectionManager::file(path)
            .with_init(|conn| {
                conn.execute_batch("
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA busy_timeout=5000;
                    PRAGMA cache_size=-32000;
                ")?;
                register_functions(conn)
            });

        let pool = Pool::builder()
            .max_size(8)
            .build(manager)?;

        let db = Self { pool };
        db.setup_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (tests and benchmarks)
    pub fn open_in_memory() -> DatabaseResult<Self> {
        let manager = SqliteConnectionManager::memory().with_init(|conn| register_functions(conn));

        // In-memory needs single connection to maintain state
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)?;

        let db = Self { pool };
        db.setup_schema()?;
        Ok(db)
    }

    /// Get a connection from the pool
    fn get_conn(&self) -> DatabaseResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn setup_schema(&self) -> DatabaseResult<()> {
        let conn = self.get_conn()?;

        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                published_at INTEGER NOT NULL
            );

            CREATE VIRTUAL TABLE IF NOT EXISTS documents_fts USING fts5(
                title,
                body,
                content='documents',
                content_rowid='id'
            );

            CREATE TRIGGER IF NOT EXISTS documents_ai AFTER INSERT ON documents BEGIN
                INSERT INTO documents_fts(rowid, title, body) VALUES (new.id, new.title, new.body);
            END;

            CREATE TRIGGER IF NOT EXISTS documents_ad AFTER DELETE ON documents BEGIN
                INSERT INTO documents_fts(documents_fts, rowid, title, body)
                VALUES ('delete', old.id, old.title, old.body);
            END;

            CREATE TRIGGER IF NOT EXISTS documents_au AFTER UPDATE ON documents BEGIN
                INSERT INTO documents_fts(documents_fts, rowid, title, body)
                VALUES ('delete', old.id, old.title, old.body);
                INSERT INTO documents_fts(rowid, title, body) VALUES (new.id, new.title, new.body);
            END;

            CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                expires_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_documents_published ON documents(published_at);
            CREATE INDEX IF NOT EXISTS idx_documents_kind_status ON documents(kind, status);
        "#)?;

        tracing::info!("database schema ready");
        Ok(())
    }

    /// Get total number of documents
    pub fn count_documents(&self) -> DatabaseResult<u64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Insert a document and return its ID. Any `id` on the input is ignored.
    pub fn insert_document(&self, doc: &Document) -> DatabaseResult<i64> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO documents (kind, status, title, body, published_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![doc.kind, doc.status, doc.title, doc.body, doc.published_at],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert many documents in one transaction. Returns the new IDs in input order.
    pub fn insert_documents(&self, docs: &[Document]) -> DatabaseResult<Vec<i64>> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        let mut ids = Vec::with_capacity(docs.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO documents (kind, status, title, body, published_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for doc in docs {
                stmt.execute(params![doc.kind, doc.status, doc.title, doc.body, doc.published_at])?;
                ids.push(tx.last_insert_rowid());
            }
        }
        tx.commit()?;
        Ok(ids)
    }

    /// Replace every field of an existing document
    pub fn update_document(&self, id: i64, doc: &Document) -> DatabaseResult<()> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            "UPDATE documents SET kind = ?1, status = ?2, title = ?3, body = ?4, published_at = ?5 WHERE id = ?6",
            params![doc.kind, doc.status, doc.title, doc.body, doc.published_at, id],
        )?;
        if changed == 0 {
            return Err(DatabaseError::NotFound(id));
        }
        Ok(())
    }

    pub fn delete_document(&self, id: i64) -> DatabaseResult<()> {
        let conn = self.get_conn()?;
        conn.execute("DELETE FROM documents WHERE id = ?1", [id])?;
        Ok(())
    }

    /// Fetch documents by IDs, preserving the order of the input IDs
    pub fn fetch_documents_by_ids(&self, ids: &[i64]) -> DatabaseResult<Vec<Document>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.get_conn()?;
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("SELECT {} FROM documents WHERE id IN ({})", DOCUMENT_COLUMNS, placeholders);

        let mut stmt = conn.prepare(&sql)?;
        let params: Vec<Value> = ids.iter().map(|&id| id.into()).collect();
        let docs: Vec<Document> = stmt
            .query_map(rusqlite::params_from_iter(params), Self::row_to_document)?
            .collect::<Result<Vec<_>, _>>()?;

        // Re-sort to match input ID order
        let id_to_doc: std::collections::HashMap<i64, Document> = docs
            .into_iter()
            .filter_map(|doc| doc.id.map(|id| (id, doc)))
            .collect();

        Ok(ids.iter().filter_map(|id| id_to_doc.get(id).cloned()).collect())
    }

    /// Run a built match query with SQLite C-level interrupt support.
    ///
    /// The statement is interrupted as soon as `token` is cancelled, which
    /// surfaces as `DatabaseError::Interrupted`.
    pub fn run_match_query(
        &self,
        sql: &str,
        params: Vec<Value>,
        token: &CancellationToken,
        runtime: &tokio::runtime::Handle,
    ) -> DatabaseResult<Vec<RawMatch>> {
        use tokio_util::task::AbortOnDropHandle;

        if token.is_cancelled() {
            return Err(DatabaseError::Interrupted);
        }

        let conn = self.get_conn()?;
        let interrupt_handle = conn.get_interrupt_handle();

        let token_clone = token.clone();
        let watcher = runtime.spawn(async move {
            token_clone.cancelled().await;
            interrupt_handle.interrupt();
        });
        let _abort_guard = AbortOnDropHandle::new(watcher);

        let run = || -> rusqlite::Result<Vec<RawMatch>> {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
                Ok(RawMatch {
                    id: row.get(0)?,
                    score: row.get(1)?,
                    timestamp: row.get(2)?,
                })
            })?;
            rows.collect()
        };

        match run() {
            Ok(rows) => Ok(rows),
            Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == rusqlite::ffi::ErrorCode::OperationInterrupted => {
                Err(DatabaseError::Interrupted)
            }
            Err(e) => Err(e.into()),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Cache entries
    // ─────────────────────────────────────────────────────────────────────────────

    /// Value for `key` unless it expired at or before `now`
    pub fn cache_get(&self, key: &str, now: i64) -> DatabaseResult<Option<Vec<u8>>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM cache_entries WHERE key = ?1 AND expires_at > ?2",
                params![key, now],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn cache_set(&self, key: &str, value: &[u8], expires_at: i64) -> DatabaseResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO cache_entries (key, value, expires_at) VALUES (?1, ?2, ?3)",
            params![key, value, expires_at],
        )?;
        Ok(())
    }

    pub fn cache_delete(&self, key: &str) -> DatabaseResult<()> {
        let conn = self.get_conn()?;
        conn.execute("DELETE FROM cache_entries WHERE key = ?1", [key])?;
        Ok(())
    }

    /// Delete every entry whose key starts with `prefix`
    pub fn cache_clear_prefix(&self, prefix: &str) -> DatabaseResult<u64> {
        let conn = self.get_conn()?;
        // substr comparison avoids LIKE wildcard handling
        let removed = conn.execute(
            "DELETE FROM cache_entries WHERE substr(key, 1, length(?1)) = ?1",
            [prefix],
        )?;
        Ok(removed as u64)
    }

    /// Drop entries that expired at or before `now`
    pub fn cache_purge_expired(&self, now: i64) -> DatabaseResult<u64> {
        let conn = self.get_conn()?;
        let removed = conn.execute("DELETE FROM cache_entries WHERE expires_at <= ?1", [now])?;
        Ok(removed as u64)
    }

    fn row_to_document(row: &rusqlite::Row) -> rusqlite::Result<Document> {
        Ok(Document {
            id: Some(row.get(0)?),
            kind: row.get(1)?,
            status: row.get(2)?,
            title: row.get(3)?,
            body: row.get(4)?,
            published_at: row.get(5)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{build_query, StoreQuery};
    use crate::interface::{MatchMode, SortOrder};
    use crate::query::{normalize, normalize_terms};
    use crate::settings::SearchSettings;

    fn run(db: &Database, query: &StoreQuery) -> Vec<RawMatch> {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (sql, params) = match query {
            StoreQuery::Fulltext(q) => q.to_sql(),
            StoreQuery::TermMatch(q) => q.to_sql(),
        };
        db.run_match_query(&sql, params, &CancellationToken::new(), runtime.handle())
            .unwrap()
    }

    fn seeded() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.insert_documents(&[
            Document::new("post", "Tomato growing guide", "Water tomatoes every morning").published_at(100),
            Document::new("post", "Basil basics", "Basil pairs well with tomato sauce").published_at(200),
            Document::new("page", "About the garden", "We grow vegetables").published_at(300),
            Document::new("post", "Draft tomato notes", "tomato tomato").published_at(400).with_status("draft"),
            Document::new("attachment", "Tomato photo", "tomato").published_at(500),
        ])
        .unwrap();
        db
    }

    #[test]
    fn test_insert_and_fetch_preserves_order() {
        let db = seeded();
        assert_eq!(db.count_documents().unwrap(), 5);

        let docs = db.fetch_documents_by_ids(&[3, 1]).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].title, "About the garden");
        assert_eq!(docs[1].title, "Tomato growing guide");
    }

    #[test]
    fn test_fulltext_natural_filters_status_and_kind() {
        let db = seeded();
        let settings = SearchSettings::default();
        let q = normalize("tomato", &settings);
        // "tomato" is six characters, so the query stays on the full-text path
        let query = build_query(&q, MatchMode::FulltextNatural, SortOrder::Score, &settings);

        let rows = run(&db, &query);
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids.len(), 2, "draft and attachment must be excluded: {:?}", ids);
        assert!(ids.contains(&1) && ids.contains(&2));
        assert!(rows.iter().all(|r| r.score > 0.0));
        assert!(rows[0].score >= rows[1].score);
    }

    #[test]
    fn test_title_weight_changes_ranking() {
        let db = Database::open_in_memory().unwrap();
        let title_hit = db.insert_document(&Document::new("post", "Compost", "nothing to see")).unwrap();
        let body_hit = db.insert_document(&Document::new("post", "Nothing", "compost compost here")).unwrap();

        let title_heavy = SearchSettings { weight_title: 50, weight_content: 1, ..Default::default() };
        let q = normalize("compost", &title_heavy);
        let rows = run(&db, &build_query(&q, MatchMode::FulltextNatural, SortOrder::Score, &title_heavy));
        assert_eq!(rows[0].id, title_hit);

        let body_heavy = SearchSettings { weight_title: 1, weight_content: 50, ..Default::default() };
        let rows = run(&db, &build_query(&q, MatchMode::FulltextNatural, SortOrder::Score, &body_heavy));
        assert_eq!(rows[0].id, body_hit);
    }

    #[test]
    fn test_zero_weight_column_is_excluded() {
        let db = Database::open_in_memory().unwrap();
        db.insert_document(&Document::new("post", "Compost", "unrelated")).unwrap();
        let settings = SearchSettings { weight_title: 0, weight_content: 1, ..Default::default() };
        let q = normalize("compost", &settings);
        let rows = run(&db, &build_query(&q, MatchMode::FulltextNatural, SortOrder::Score, &settings));
        assert!(rows.is_empty());
    }

    #[test]
    fn test_boolean_requires_all_terms() {
        let db = seeded();
        let settings = SearchSettings::default();
        let q = normalize("tomato basil", &settings);

        let natural = run(&db, &build_query(&q, MatchMode::FulltextNatural, SortOrder::Score, &settings));
        assert_eq!(natural.len(), 2);

        let boolean = run(&db, &build_query(&q, MatchMode::FulltextBoolean, SortOrder::Score, &settings));
        assert_eq!(boolean.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_term_match_is_case_insensitive_substring() {
        let db = seeded();
        let settings = SearchSettings::default();
        let q = normalize_terms("TOMAT grow");
        let rows = run(&db, &build_query(&q, MatchMode::TermMatch, SortOrder::Score, &settings));
        assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1]);
        assert_eq!(rows[0].score, crate::builder::TERM_MATCH_SCORE);
    }

    #[test]
    fn test_term_match_folds_non_ascii_case() {
        let db = Database::open_in_memory().unwrap();
        let upper = db.insert_document(&Document::new("post", "ÉTÉ plans", "Straße")).unwrap();
        db.insert_document(&Document::new("post", "Winter plans", "nothing")).unwrap();
        let settings = SearchSettings::default();

        let rows = run(&db, &build_query(&normalize_terms("été"), MatchMode::TermMatch, SortOrder::Score, &settings));
        assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![upper]);

        let rows = run(&db, &build_query(&normalize_terms("STRAßE"), MatchMode::TermMatch, SortOrder::Score, &settings));
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_file_database_registers_fold_function() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = Database::open(dir.path().join("fold.sqlite")).unwrap();
        let conn = db.get_conn().unwrap();
        let folded: String = conn.query_row("SELECT sift_fold('ÀÉÎ')", [], |row| row.get(0)).unwrap();
        assert_eq!(folded, "àéî");
    }

    #[test]
    fn test_term_match_ties_break_by_id_and_date_order() {
        let db = seeded();
        let settings = SearchSettings::default();
        let q = normalize_terms("a");

        let by_score = run(&db, &build_query(&q, MatchMode::TermMatch, SortOrder::Score, &settings));
        let ids: Vec<i64> = by_score.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        let by_date = run(&db, &build_query(&q, MatchMode::TermMatch, SortOrder::Date, &settings));
        let ids: Vec<i64> = by_date.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
        assert_eq!(by_date[0].timestamp, Some(300));
    }

    #[test]
    fn test_update_and_delete_keep_index_in_sync() {
        let db = seeded();
        let settings = SearchSettings::default();

        db.update_document(2, &Document::new("post", "Mint", "fresh leaves").published_at(200)).unwrap();
        let q = normalize("basil", &settings);
        assert!(run(&db, &build_query(&q, MatchMode::FulltextNatural, SortOrder::Score, &settings)).is_empty());

        db.delete_document(1).unwrap();
        let q = normalize("tomatoes", &settings);
        assert!(run(&db, &build_query(&q, MatchMode::FulltextNatural, SortOrder::Score, &settings)).is_empty());

        assert!(matches!(
            db.update_document(99, &Document::new("post", "x", "y")),
            Err(DatabaseError::NotFound(99))
        ));
    }

    #[test]
    fn test_cancelled_token_interrupts() {
        let db = seeded();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let result = db.run_match_query("SELECT id, 1.0, published_at FROM documents", Vec::new(), &token, runtime.handle());
        assert!(matches!(result, Err(DatabaseError::Interrupted)));
    }

    #[test]
    fn test_cache_entries_expire_and_clear_by_prefix() {
        let db = Database::open_in_memory().unwrap();
        db.cache_set("bs_one", b"1", 1_000).unwrap();
        db.cache_set("bs_two", b"2", 2_000).unwrap();
        db.cache_set("other", b"3", 2_000).unwrap();

        assert_eq!(db.cache_get("bs_one", 999).unwrap(), Some(b"1".to_vec()));
        assert_eq!(db.cache_get("bs_one", 1_000).unwrap(), None);

        assert_eq!(db.cache_purge_expired(1_500).unwrap(), 1);
        assert_eq!(db.cache_clear_prefix("bs_").unwrap(), 1);
        assert_eq!(db.cache_get("other", 0).unwrap(), Some(b"3".to_vec()));

        db.cache_delete("other").unwrap();
        assert_eq!(db.cache_get("other", 0).unwrap(), None);
    }
}
