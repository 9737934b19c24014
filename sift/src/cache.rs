//! Result cache
//!
//! Memoizes MatchSets under a short key derived from the canonical query.
//! Keys are lossy, so a hit is only honored when the stored canonical query
//! equals the requested one. Cache failures never fail a resolution: they
//! are logged and treated as a miss.

use crate::database::Database;
use crate::interface::{CacheError, CacheStore, MatchSet, SortOrder};
use chrono::Utc;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Prefix of every key written by the result cache
pub const CACHE_NAMESPACE: &str = "bs_";
/// Maximum cache key length, namespace included
pub const MAX_KEY_LEN: usize = 40;
/// Lifetime of a cached MatchSet
pub const DEFAULT_TTL: Duration = Duration::from_secs(7200);

static KEY_DISALLOWED: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9\-]").unwrap());

/// Replacement for the default key derivation. Its output is still
/// truncated to `MAX_KEY_LEN`.
pub type KeyDeriver = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Default cache key: spaces removed, anything outside `[A-Za-z0-9-]`
/// stripped, namespaced and truncated to 40 characters.
pub fn key_for(canonical_query: &str) -> String {
    let compact = canonical_query.replace(' ', "");
    let sanitized = KEY_DISALLOWED.replace_all(&compact, "");
    truncate_key(format!("{}{}", CACHE_NAMESPACE, sanitized))
}

fn truncate_key(mut key: String) -> String {
    if key.len() > MAX_KEY_LEN {
        let mut end = MAX_KEY_LEN;
        while !key.is_char_boundary(end) {
            end -= 1;
        }
        key.truncate(end);
    }
    key
}

// ─────────────────────────────────────────────────────────────────────────────
// Cache stores
// ─────────────────────────────────────────────────────────────────────────────

/// Process-local cache store
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Vec<u8>, i64)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live (unexpired) entry count
    pub fn len(&self) -> usize {
        let now = Utc::now().timestamp_millis();
        self.entries.lock().values().filter(|(_, expires)| *expires > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove expired entries. Returns how many were dropped.
    pub fn purge_expired(&self) -> u64 {
        let now = Utc::now().timestamp_millis();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, (_, expires)| *expires > now);
        (before - entries.len()) as u64
    }
}

/// `now + ttl`, saturating instead of overflowing
fn expiry_after(now: i64, ttl: i64) -> i64 {
    now.saturating_add(ttl)
}

#[async_trait::async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = Utc::now().timestamp_millis();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((value, expires)) if *expires > now => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let now = Utc::now().timestamp_millis();
        let expires = expiry_after(now, i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX));
        let mut entries = self.entries.lock();
        entries.retain(|_, (_, expires)| *expires > now);
        entries.insert(key.to_string(), (value, expires));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn clear_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }
}

/// Cache store persisted in the `cache_entries` table of a database
#[derive(Clone)]
pub struct SqliteCache {
    db: Arc<Database>,
}

impl SqliteCache {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Remove expired rows. Returns how many were dropped.
    pub fn purge_expired(&self) -> Result<u64, CacheError> {
        self.db
            .cache_purge_expired(Utc::now().timestamp())
            .map_err(|e| CacheError::Backend(e.to_string()))
    }
}

#[async_trait::async_trait]
impl CacheStore for SqliteCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.db
            .cache_get(key, Utc::now().timestamp())
            .map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let expires_at = expiry_after(Utc::now().timestamp(), i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX));
        self.db
            .cache_set(key, &value, expires_at)
            .map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.db.cache_delete(key).map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn clear_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        self.db
            .cache_clear_prefix(prefix)
            .map_err(|e| CacheError::Backend(e.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ResultCache
// ─────────────────────────────────────────────────────────────────────────────

/// MatchSet cache over any `CacheStore`, honoring the settings' enable flag
#[derive(Clone)]
pub struct ResultCache {
    store: Option<Arc<dyn CacheStore>>,
    ttl: Duration,
    key_deriver: Option<KeyDeriver>,
}

impl ResultCache {
    pub fn new(store: Arc<dyn CacheStore>, enabled: bool) -> Self {
        Self {
            store: enabled.then_some(store),
            ttl: DEFAULT_TTL,
            key_deriver: None,
        }
    }

    /// A cache that always misses
    pub fn disabled() -> Self {
        Self {
            store: None,
            ttl: DEFAULT_TTL,
            key_deriver: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_key_deriver(mut self, deriver: KeyDeriver) -> Self {
        self.key_deriver = Some(deriver);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub fn key_for(&self, canonical_query: &str) -> String {
        match &self.key_deriver {
            Some(derive) => truncate_key(derive(canonical_query)),
            None => key_for(canonical_query),
        }
    }

    /// Cached MatchSet for `canonical_query`, if present and computed for
    /// exactly that query in the same order
    pub async fn get(&self, canonical_query: &str, order: SortOrder) -> Option<MatchSet> {
        let store = self.store.as_ref()?;
        let key = self.key_for(canonical_query);

        let bytes = match store.get(&key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cache read failed, continuing uncached");
                return None;
            }
        };

        let set: MatchSet = match serde_json::from_slice(&bytes).map_err(CacheError::from) {
            Ok(set) => set,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "discarding undecodable cache entry");
                return None;
            }
        };

        if set.search_query != canonical_query {
            tracing::debug!(key = %key, stored = %set.search_query, "cache key collision, ignoring entry");
            return None;
        }
        if set.order != order {
            tracing::debug!(key = %key, "cached rows were ordered differently, ignoring entry");
            return None;
        }
        Some(set)
    }

    /// Store `set` under the key of its own canonical query
    pub async fn set(&self, set: &MatchSet) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let key = self.key_for(&set.search_query);

        let bytes = match serde_json::to_vec(set) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "could not encode MatchSet for cache");
                return;
            }
        };
        if let Err(e) = store.set(&key, bytes, self.ttl).await {
            tracing::warn!(key = %key, error = %e, "cache write failed");
        }
    }

    /// Drop the cached entry for one canonical query
    pub async fn invalidate(&self, canonical_query: &str) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let key = self.key_for(canonical_query);
        if let Err(e) = store.delete(&key).await {
            tracing::warn!(key = %key, error = %e, "cache delete failed");
        }
    }

    /// Drop every cached result. Returns how many entries were removed.
    pub async fn clear(&self) -> u64 {
        let Some(store) = self.store.as_ref() else {
            return 0;
        };
        match store.clear_prefix(CACHE_NAMESPACE).await {
            Ok(removed) => {
                tracing::info!(removed, "cleared result cache");
                removed
            }
            Err(e) => {
                tracing::warn!(error = %e, "cache clear failed");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::RawMatch;

    /// Cache store whose every call fails
    struct BrokenCache;

    #[async_trait::async_trait]
    impl CacheStore for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            Err(CacheError::Backend("down".into()))
        }
        async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Backend("down".into()))
        }
        async fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Backend("down".into()))
        }
        async fn clear_prefix(&self, _prefix: &str) -> Result<u64, CacheError> {
            Err(CacheError::Backend("down".into()))
        }
    }

    fn sample(query: &str) -> MatchSet {
        MatchSet::new(
            query,
            vec![
                RawMatch { id: 4, score: 2.5, timestamp: Some(1_700_000_000) },
                RawMatch { id: 9, score: 0.5, timestamp: None },
            ],
        )
    }

    #[test]
    fn test_key_for_sanitizes_and_prefixes() {
        assert_eq!(key_for("cats toy"), "bs_catstoy");
        assert_eq!(key_for("C++ & rust-lang!"), "bs_Crust-lang");
        assert_eq!(key_for(""), "bs_");
    }

    #[test]
    fn test_key_for_is_bounded_and_deterministic() {
        let long = "the quick brown fox jumps over the lazy dog again and again";
        let key = key_for(long);
        assert_eq!(key.len(), MAX_KEY_LEN);
        assert_eq!(key, key_for(long));
        assert!(key[CACHE_NAMESPACE.len()..].chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    }

    #[test]
    fn test_custom_deriver_is_truncated_on_char_boundary() {
        let cache = ResultCache::new(Arc::new(MemoryCache::new()), true)
            .with_key_deriver(Arc::new(|q: &str| format!("custom_{}", "é".repeat(q.len() + 40))));
        let key = cache.key_for("abc");
        assert!(key.len() <= MAX_KEY_LEN);
        assert!(key.starts_with("custom_"));
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = ResultCache::new(Arc::new(MemoryCache::new()), true);
        let set = sample("tomato garden");
        cache.set(&set).await;
        assert_eq!(cache.get("tomato garden", SortOrder::Score).await, Some(set));
    }

    #[tokio::test]
    async fn test_colliding_key_is_not_a_hit() {
        let cache = ResultCache::new(Arc::new(MemoryCache::new()), true);
        cache.set(&sample("cats, toy")).await;
        // "cats toy" derives the same key but is a different canonical query
        assert_eq!(key_for("cats, toy"), key_for("cats toy"));
        assert_eq!(cache.get("cats toy", SortOrder::Score).await, None);
    }

    #[tokio::test]
    async fn test_order_mismatch_is_not_a_hit() {
        let cache = ResultCache::new(Arc::new(MemoryCache::new()), true);
        cache.set(&sample("tomato")).await;
        assert!(cache.get("tomato", SortOrder::Score).await.is_some());
        assert_eq!(cache.get("tomato", SortOrder::Date).await, None);
    }

    #[tokio::test]
    async fn test_disabled_cache_never_hits() {
        let store = Arc::new(MemoryCache::new());
        let cache = ResultCache::new(store.clone(), false);
        cache.set(&sample("q")).await;
        assert!(store.is_empty());
        assert_eq!(cache.get("q", SortOrder::Score).await, None);
        assert_eq!(ResultCache::disabled().get("q", SortOrder::Score).await, None);
    }

    #[tokio::test]
    async fn test_expired_entry_misses() {
        let cache = ResultCache::new(Arc::new(MemoryCache::new()), true).with_ttl(Duration::from_millis(0));
        cache.set(&sample("q")).await;
        assert_eq!(cache.get("q", SortOrder::Score).await, None);
    }

    #[tokio::test]
    async fn test_memory_cache_reclaims_expired_entries() {
        let store = MemoryCache::new();
        for i in 0..1000 {
            store.set(&format!("bs_{}", i), b"x".to_vec(), Duration::ZERO).await.unwrap();
        }
        assert!(store.is_empty());
        // each write sweeps what expired before it
        assert!(store.entries.lock().len() <= 1);

        store.set("bs_live", b"y".to_vec(), DEFAULT_TTL).await.unwrap();
        store.entries.lock().insert("bs_stale".to_string(), (b"z".to_vec(), 0));
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.entries.lock().len(), 1);
        assert_eq!(store.get("bs_live").await.unwrap(), Some(b"y".to_vec()));
    }

    #[tokio::test]
    async fn test_huge_ttl_saturates() {
        let store = MemoryCache::new();
        store.set("bs_forever", b"x".to_vec(), Duration::MAX).await.unwrap();
        assert_eq!(store.get("bs_forever").await.unwrap(), Some(b"x".to_vec()));
        assert_eq!(store.entries.lock()["bs_forever"].1, i64::MAX);

        let db = Arc::new(Database::open_in_memory().unwrap());
        let sqlite = SqliteCache::new(db);
        sqlite.set("bs_forever", b"x".to_vec(), Duration::MAX).await.unwrap();
        assert_eq!(sqlite.get("bs_forever").await.unwrap(), Some(b"x".to_vec()));
    }

    #[tokio::test]
    async fn test_broken_store_degrades_to_miss() {
        let cache = ResultCache::new(Arc::new(BrokenCache), true);
        cache.set(&sample("q")).await;
        assert_eq!(cache.get("q", SortOrder::Score).await, None);
        cache.invalidate("q").await;
        assert_eq!(cache.clear().await, 0);
    }

    #[tokio::test]
    async fn test_undecodable_entry_misses() {
        let store = Arc::new(MemoryCache::new());
        store.set(&key_for("q"), b"not json".to_vec(), DEFAULT_TTL).await.unwrap();
        let cache = ResultCache::new(store, true);
        assert_eq!(cache.get("q", SortOrder::Score).await, None);
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let store = Arc::new(MemoryCache::new());
        store.set("unrelated", b"x".to_vec(), DEFAULT_TTL).await.unwrap();
        let cache = ResultCache::new(store.clone(), true);

        cache.set(&sample("alpha")).await;
        cache.set(&sample("beta")).await;
        cache.invalidate("alpha").await;
        assert_eq!(cache.get("alpha", SortOrder::Score).await, None);
        assert!(cache.get("beta", SortOrder::Score).await.is_some());

        assert_eq!(cache.clear().await, 1);
        assert_eq!(store.len(), 1, "keys outside the namespace survive");
    }

    #[tokio::test]
    async fn test_sqlite_cache_round_trip() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let cache = ResultCache::new(Arc::new(SqliteCache::new(db)), true);
        let set = sample("persisted query");
        cache.set(&set).await;
        assert_eq!(cache.get("persisted query", SortOrder::Score).await, Some(set));
        assert_eq!(cache.clear().await, 1);
        assert_eq!(cache.get("persisted query", SortOrder::Score).await, None);
    }
}
