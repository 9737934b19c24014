//! Command-line front end for a sift document database.
//!
//! Usage:
//!     sift --db site.sqlite add --kind post --title "Pruning roses" --body "..."
//!     sift --db site.sqlite import documents.json
//!     sift --db site.sqlite search pruning roses --offset 10 --by-date
//!     sift --db site.sqlite clear-cache
//!
//! Set RUST_LOG=sift=debug to trace strategy fallback.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sift::{assemble, Document, SearchEngine, SearchSettings, SortOrder, SqliteCache, SqliteStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the SQLite database (created if missing)
    #[arg(short, long, global = true, default_value = "sift.sqlite")]
    db: PathBuf,

    /// JSON settings file; defaults are used when omitted
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve one page of results for a query
    Search {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,

        /// Zero-based offset of the first row
        #[arg(short, long, default_value_t = 0)]
        offset: i64,

        /// Page size (defaults to the configured limit)
        #[arg(short, long)]
        limit: Option<usize>,

        /// Newest first instead of most relevant first
        #[arg(long)]
        by_date: bool,

        /// Print the page as JSON
        #[arg(long)]
        json: bool,

        /// Per-call store timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Add a single document
    Add {
        #[arg(short, long, default_value = "post")]
        kind: String,

        #[arg(short, long)]
        title: String,

        #[arg(short, long, default_value = "")]
        body: String,

        #[arg(long, default_value = "publish")]
        status: String,

        /// Publication time as a unix timestamp (defaults to now)
        #[arg(long)]
        published: Option<i64>,
    },
    /// Import a JSON array of documents
    Import { path: PathBuf },
    /// Drop every cached result
    ClearCache,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sift=info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let settings = match &args.settings {
        Some(path) => SearchSettings::from_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => SearchSettings::default(),
    };

    let store = SqliteStore::open(&args.db)
        .with_context(|| format!("Failed to open database {}", args.db.display()))?;
    let cache = Arc::new(SqliteCache::new(store.database()));
    let engine = SearchEngine::new(settings, Arc::new(store.clone()), Some(cache.clone()))
        .context("Invalid settings")?;

    match args.command {
        Command::Search { query, offset, limit, by_date, json, timeout } => {
            let query = query.join(" ");
            let order = if by_date { SortOrder::Date } else { SortOrder::Score };
            let engine = match timeout {
                Some(secs) => engine.with_options(sift::EngineOptions {
                    store_timeout: Duration::from_secs(secs),
                    ..Default::default()
                }),
                None => engine,
            };
            let page = engine.resolve(&query, offset, limit, order).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&page)?);
                return Ok(());
            }
            if page.is_empty_query() {
                println!("Please enter a search term.");
                return Ok(());
            }
            let Some((first, last)) = page.display_range() else {
                println!("No results for \"{}\".", page.search_query);
                return Ok(());
            };

            println!(
                "Results {} to {} of {} for \"{}\"",
                first, last, page.total_row_count, page.search_query
            );
            let rows = assemble(&page);
            let ids: Vec<i64> = rows.iter().map(|r| r.document_id).collect();
            let docs = store.fetch_documents_by_ids(&ids)?;
            for row in &rows {
                let title = docs
                    .iter()
                    .find(|doc| doc.id == Some(row.document_id))
                    .map_or("(deleted)", |doc| doc.title.as_str());
                println!("{:>4}. [{:>3}%] {} (#{})", row.position, row.relevance_percent(), title, row.document_id);
            }
            if let Some(next) = page.next_offset() {
                println!("More: --offset {}", next);
            }
        }
        Command::Add { kind, title, body, status, published } => {
            let mut doc = Document::new(kind, title, body).with_status(status);
            if let Some(ts) = published {
                doc = doc.published_at(ts);
            }
            let id = store.insert_document(&doc)?;
            let cleared = engine.clear_cache().await;
            println!("Added document #{} (cleared {} cached results)", id, cleared);
        }
        Command::Import { path } => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let docs: Vec<Document> = serde_json::from_str(&raw).context("Expected a JSON array of documents")?;
            let ids = store.insert_documents(&docs)?;
            let cleared = engine.clear_cache().await;
            println!("Imported {} documents (cleared {} cached results)", ids.len(), cleared);
        }
        Command::ClearCache => {
            let cleared = engine.clear_cache().await;
            let purged = cache.purge_expired()?;
            println!("Cleared {} cached results ({} expired entries purged)", cleared, purged);
        }
    }

    Ok(())
}
