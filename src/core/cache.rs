//! Time-bounded memoization of gateway results.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::core::error::PipelineError;
use crate::core::gateway::ProviderGateway;
use crate::core::query::Query;
use crate::core::result::FetchResult;

/// Default time-to-live for cached results.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug)]
struct CacheEntry {
    query: Query,
    result: Arc<FetchResult>,
    /// `None` when the TTL reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|expires_at| now < expires_at)
    }
}

// One slot per key. Holding the slot lock across the gateway call keeps a
// single fetch in flight per key while other keys proceed.
type Slot = Arc<Mutex<Option<CacheEntry>>>;

/// Wraps a gateway and memoizes its results, failures included, for a TTL.
///
/// Expiry is checked lazily on lookup; expired entries are replaced in
/// place and nothing is swept in the background.
pub struct ResultCache<G: ProviderGateway> {
    gateway: G,
    default_ttl: Duration,
    entries: Mutex<HashMap<String, Slot>>,
}

impl<G: ProviderGateway> ResultCache<G> {
    pub fn new(gateway: G) -> Self {
        Self::with_default_ttl(gateway, DEFAULT_TTL)
    }

    pub fn with_default_ttl(gateway: G, default_ttl: Duration) -> Self {
        Self {
            gateway,
            default_ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Returns the live result for `query`, calling the gateway at most once
    /// when there is none. Invalid queries are rejected without touching
    /// the cache.
    #[instrument(name = "CacheLookup", skip(self, query), fields(key = %query.cache_key()))]
    pub async fn get_or_fetch(
        &self,
        query: &Query,
        ttl: Duration,
    ) -> Result<Arc<FetchResult>, PipelineError> {
        self.gateway.validate(query)?;

        let key = query.cache_key();
        let slot = {
            let mut entries = self.entries.lock().await;
            Arc::clone(entries.entry(key.clone()).or_default())
        };

        let mut entry = slot.lock().await;
        match entry.as_ref() {
            Some(cached) if cached.is_live(Instant::now()) => {
                debug!("Cache HIT for key: {}", key);
                return Ok(Arc::clone(&cached.result));
            }
            Some(_) => debug!("Cache entry expired for key: {}", key),
            None => debug!("Cache MISS for key: {}", key),
        }

        let fetched = match self.gateway.fetch(query).await {
            Ok(fetched) => fetched,
            Err(e) => {
                let vacant = entry.is_none();
                drop(entry);
                if vacant {
                    self.discard_vacant(&key, &slot).await;
                }
                return Err(e);
            }
        };
        let result = Arc::new(fetched);
        if let Some(diagnostic) = result.diagnostic() {
            warn!(%diagnostic, "Caching failed result for key: {}", key);
        }

        *entry = Some(CacheEntry {
            query: query.clone(),
            result: Arc::clone(&result),
            expires_at: Instant::now().checked_add(ttl),
        });
        debug!("Cache PUT for key: {}", key);
        Ok(result)
    }

    // Drops a slot that never received an entry, unless another caller has
    // already queued on it.
    async fn discard_vacant(&self, key: &str, slot: &Slot) {
        let mut entries = self.entries.lock().await;
        let vacant = entries.get(key).is_some_and(|current| {
            Arc::ptr_eq(current, slot) && current.try_lock().is_ok_and(|e| e.is_none())
        });
        if vacant {
            entries.remove(key);
            debug!("Cache DISCARD for key: {}", key);
        }
    }

    /// Same as [`get_or_fetch`](Self::get_or_fetch) with the default TTL.
    pub async fn get_or_fetch_default(
        &self,
        query: &Query,
    ) -> Result<Arc<FetchResult>, PipelineError> {
        self.get_or_fetch(query, self.default_ttl).await
    }

    /// Looks up a live entry without ever calling the gateway.
    pub async fn get(&self, query: &Query) -> Option<Arc<FetchResult>> {
        let slot = {
            let entries = self.entries.lock().await;
            entries.get(&query.cache_key()).cloned()?
        };
        let entry = slot.lock().await;
        entry
            .as_ref()
            .filter(|e| e.is_live(Instant::now()))
            .map(|e| Arc::clone(&e.result))
    }

    /// Queries currently held, live or expired. Waits for any fetch in
    /// flight on a key before reading its entry.
    pub async fn queries(&self) -> Vec<Query> {
        let slots: Vec<Slot> = self.entries.lock().await.values().cloned().collect();
        let mut queries = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Some(entry) = slot.lock().await.as_ref() {
                queries.push(entry.query.clone());
            }
        }
        queries
    }

    pub async fn len(&self) -> usize {
        let entries = self.entries.lock().await;
        entries
            .values()
            .filter(|slot| slot.try_lock().map_or(true, |e| e.is_some()))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn invalidate(&self, query: &Query) {
        let key = query.cache_key();
        let mut entries = self.entries.lock().await;
        entries.remove(&key);
        debug!("Cache REMOVE for key: {}", key);
    }

    pub async fn clear(&self) {
        let mut entries = self.entries.lock().await;
        entries.clear();
        debug!("Cache CLEAR");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::gateway::{SYMBOL_PARAM, require_symbol};
    use crate::core::table::{Column, Table};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    struct MockGateway {
        call_count: AtomicUsize,
        delay: Duration,
    }

    impl MockGateway {
        fn new() -> Self {
            Self {
                call_count: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }

        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::new()
            }
        }

        fn calls(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProviderGateway for MockGateway {
        fn validate(&self, query: &Query) -> Result<(), PipelineError> {
            require_symbol(query).map(|_| ())
        }

        async fn fetch(&self, query: &Query) -> Result<FetchResult, PipelineError> {
            self.validate(query)?;
            self.call_count.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }
            if query.param(SYMBOL_PARAM) == Some("REJECT") {
                return Err(PipelineError::invalid_query("rejected upstream"));
            }
            if query.param(SYMBOL_PARAM) == Some("AAPL") {
                let table = Table::new(vec![Column::floats("close", [Some(150.0)])]).unwrap();
                Ok(FetchResult::success("mock", table))
            } else {
                Ok(FetchResult::failure("mock", "Unknown symbol"))
            }
        }
    }

    fn query(symbol: &str) -> Query {
        Query::new("mock", "equity.price.historical").with_param(SYMBOL_PARAM, symbol)
    }

    #[tokio::test]
    async fn test_second_call_within_ttl_is_cached() {
        let cache = ResultCache::new(MockGateway::new());

        let first = cache.get_or_fetch(&query("AAPL"), DEFAULT_TTL).await.unwrap();
        assert!(first.is_success());
        assert_eq!(cache.gateway().calls(), 1);

        let second = cache.get_or_fetch(&query("AAPL"), DEFAULT_TTL).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.gateway().calls(), 1);

        // Different key goes to the gateway
        let _ = cache.get_or_fetch(&query("MSFT"), DEFAULT_TTL).await.unwrap();
        assert_eq!(cache.gateway().calls(), 2);
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_parameter_order_shares_entry() {
        let cache = ResultCache::new(MockGateway::new());
        let a = query("AAPL").with_param("start_date", "2024-01-01");
        let b = Query::new("mock", "equity.price.historical")
            .with_param("start_date", "2024-01-01")
            .with_param(SYMBOL_PARAM, "AAPL");

        cache.get_or_fetch(&a, DEFAULT_TTL).await.unwrap();
        cache.get_or_fetch(&b, DEFAULT_TTL).await.unwrap();
        assert_eq!(cache.gateway().calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_results_are_cached() {
        let cache = ResultCache::new(MockGateway::new());

        let first = cache.get_or_fetch(&query("GOOG"), DEFAULT_TTL).await.unwrap();
        assert_eq!(first.diagnostic(), Some("Unknown symbol"));

        let second = cache.get_or_fetch(&query("GOOG"), DEFAULT_TTL).await.unwrap();
        assert!(!second.is_success());
        assert_eq!(cache.gateway().calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_results_expire_like_successes() {
        let cache = ResultCache::new(MockGateway::new());
        let ttl = Duration::from_millis(10);

        cache.get_or_fetch(&query("GOOG"), ttl).await.unwrap();
        cache.get_or_fetch(&query("AAPL"), ttl).await.unwrap();
        assert_eq!(cache.gateway().calls(), 2);

        sleep(Duration::from_millis(20)).await;
        assert!(cache.get(&query("GOOG")).await.is_none());
        assert!(cache.get(&query("AAPL")).await.is_none());

        cache.get_or_fetch(&query("GOOG"), ttl).await.unwrap();
        cache.get_or_fetch(&query("AAPL"), ttl).await.unwrap();
        assert_eq!(cache.gateway().calls(), 4);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refetched_once_and_replaced() {
        let cache = ResultCache::new(MockGateway::new());
        let ttl = Duration::from_millis(10);

        cache.get_or_fetch(&query("AAPL"), ttl).await.unwrap();
        sleep(Duration::from_millis(20)).await;

        cache.get_or_fetch(&query("AAPL"), ttl).await.unwrap();
        cache.get_or_fetch(&query("AAPL"), ttl).await.unwrap();
        assert_eq!(cache.gateway().calls(), 2);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_invalid_query_never_reaches_cache() {
        let cache = ResultCache::new(MockGateway::new());
        let invalid = Query::new("mock", "equity.price.historical");

        let result = cache.get_or_fetch(&invalid, DEFAULT_TTL).await;
        assert!(matches!(result, Err(PipelineError::InvalidQuery(_))));
        assert_eq!(cache.gateway().calls(), 0);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let cache = ResultCache::new(MockGateway::new());

        cache.get_or_fetch_default(&query("AAPL")).await.unwrap();
        cache.get_or_fetch_default(&query("MSFT")).await.unwrap();
        assert_eq!(cache.queries().await.len(), 2);

        cache.invalidate(&query("AAPL")).await;
        assert!(cache.get(&query("AAPL")).await.is_none());
        assert!(cache.get(&query("MSFT")).await.is_some());

        cache.get_or_fetch_default(&query("AAPL")).await.unwrap();
        assert_eq!(cache.gateway().calls(), 3);

        cache.clear().await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_fetch() {
        let cache = ResultCache::new(MockGateway::with_delay(Duration::from_millis(30)));
        let q = query("AAPL");

        let (a, b, c) = tokio::join!(
            cache.get_or_fetch(&q, DEFAULT_TTL),
            cache.get_or_fetch(&q, DEFAULT_TTL),
            cache.get_or_fetch(&q, DEFAULT_TTL),
        );
        assert!(a.unwrap().is_success());
        assert!(b.unwrap().is_success());
        assert!(c.unwrap().is_success());
        assert_eq!(cache.gateway().calls(), 1);
    }

    #[tokio::test]
    async fn test_unbounded_ttl_never_expires() {
        let cache = ResultCache::with_default_ttl(MockGateway::new(), Duration::MAX);

        let first = cache.get_or_fetch_default(&query("AAPL")).await.unwrap();
        let second = cache.get_or_fetch_default(&query("AAPL")).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.gateway().calls(), 1);
        assert!(cache.get(&query("AAPL")).await.is_some());
    }

    #[tokio::test]
    async fn test_fetch_error_leaves_no_slot_behind() {
        let cache = ResultCache::new(MockGateway::new());

        let result = cache.get_or_fetch_default(&query("REJECT")).await;
        assert!(matches!(result, Err(PipelineError::InvalidQuery(_))));
        assert_eq!(cache.gateway().calls(), 1);
        assert!(cache.entries.lock().await.is_empty());
        assert!(cache.queries().await.is_empty());
    }
}
