//! Cache: expiring store fronted by single-flight loading

use std::time::Duration;

use tracing::{debug, trace};
use ttlstore::{Expiration, ExpiringStore};

use crate::config::{default_cleanup_interval, CacheConfig};
use crate::error::Result;
use crate::flight::{FlightGroup, DEFAULT_SHARDS};
use crate::stats::CacheStats;

/// In-memory cache with a fixed TTL and deduplicated loading.
///
/// `V` is the cached value type, `E` the error type loaders return. Both are
/// cloned out to every caller that shares a load, so wrap non-`Clone` errors
/// in an `Arc`.
pub struct Cache<V, E> {
    /// Entries with their deadlines
    store: ExpiringStore<V>,

    /// Loads currently running
    flights: FlightGroup<V, E>,

    /// Cache statistics
    stats: CacheStats,

    /// TTL for every entry; zero means entries never expire
    ttl: Duration,
}

impl<V, E> Cache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone,
{
    /// Create a cache whose entries expire `ttl` after they are written.
    ///
    /// Expired entries are swept every `2 * ttl`. A zero `ttl` keeps entries
    /// until they are deleted.
    pub fn new(ttl: Duration) -> Self {
        Self::build(ttl, default_cleanup_interval(ttl), DEFAULT_SHARDS)
    }

    /// Create a cache from a configuration
    ///
    /// # Returns
    /// * `Result<Cache>` - `Error::InvalidConfig` if the configuration is out of range
    pub fn with_config(config: &CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(
            config.ttl(),
            config.cleanup_interval(),
            config.shards,
        ))
    }

    fn build(ttl: Duration, cleanup_interval: Option<Duration>, shards: usize) -> Self {
        debug!(
            ttl_ms = ttl.as_millis() as u64,
            cleanup_interval = ?cleanup_interval,
            shards,
            "creating cache"
        );

        Self {
            store: ExpiringStore::new(ttl, cleanup_interval),
            flights: FlightGroup::with_shards(shards),
            stats: CacheStats::new(),
            ttl,
        }
    }

    /// Return the cached value for `key`, or run `loader` to produce it.
    ///
    /// Concurrent misses on the same key share one `loader` call: the first
    /// caller runs it, the rest block until it returns and get a clone of its
    /// result. A successful value is stored before any of them return. An
    /// error is handed to every one of them and nothing is stored, so the
    /// next call loads again.
    pub fn get_or_load<F>(&self, key: &str, loader: F) -> std::result::Result<V, E>
    where
        F: FnOnce() -> std::result::Result<V, E>,
    {
        if let Some(value) = self.store.get(key) {
            self.stats.record_hit();
            return Ok(value);
        }
        self.stats.record_miss();
        self.load_through(key, loader)
    }

    /// Miss path of `get_or_load`.
    ///
    /// The store is checked again once this caller owns the flight: a caller
    /// that missed just before a previous load stored its value, and
    /// registered just after that load finished, must not load a second time.
    fn load_through<F>(&self, key: &str, loader: F) -> std::result::Result<V, E>
    where
        F: FnOnce() -> std::result::Result<V, E>,
    {
        let mut ran_loader = false;
        let (result, _) = self.flights.run_shared(key, || {
            if let Some(value) = self.store.get(key) {
                return Ok(value);
            }
            ran_loader = true;
            self.stats.record_load();

            let result = loader();
            match &result {
                Ok(value) => self.store.set(key, value.clone(), Expiration::Default),
                Err(_) => self.stats.record_load_failure(),
            }
            result
        });

        if !ran_loader {
            self.stats.record_shared();
        }
        result
    }

    /// Get the cached value for `key` without loading. Not counted in stats.
    pub fn get(&self, key: &str) -> Option<V> {
        self.store.get(key)
    }

    /// Store `value` under `key` with the cache TTL.
    ///
    /// Does not wait for or cancel a load running for `key`; whichever write
    /// lands last wins.
    pub fn set(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        trace!(key = %key, "manual set");
        self.store.set(key, value, Expiration::Default);
        self.stats.record_set();
    }

    /// Remove `key`. A load running for `key` still stores its value.
    pub fn delete(&self, key: &str) {
        trace!(key, "delete");
        self.store.delete(key);
    }

    /// Remove every entry. Running loads still store their values.
    pub fn clear_all(&self) {
        debug!(entries = self.store.item_count(), "clearing cache");
        self.store.flush();
    }

    /// Number of entries held, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.store.item_count()
    }

    /// Check if the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a load for `key` is currently running
    pub fn is_loading(&self, key: &str) -> bool {
        self.flights.in_flight(key)
    }

    /// Entry TTL
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get cache statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Stop the background sweep. The cache stays usable; expired entries
    /// are still never returned.
    pub fn close(&self) {
        self.store.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::{Arc, Barrier};
    use std::thread;

    use crate::error::Error;

    type TestCache = Cache<String, String>;

    fn counting_loader<'a>(
        calls: &'a AtomicUsize,
        value: &'static str,
    ) -> impl FnOnce() -> std::result::Result<String, String> + 'a {
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(value.to_string())
        }
    }

    #[test]
    fn test_cache_load_then_hit() {
        let cache = TestCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);

        assert_eq!(cache.get_or_load("k", counting_loader(&calls, "v")), Ok("v".to_string()));
        assert_eq!(cache.get_or_load("k", counting_loader(&calls, "w")), Ok("v".to_string()));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
        assert_eq!(cache.stats().loads(), 1);
    }

    #[test]
    fn test_cache_dedup_concurrent_misses() {
        const CALLERS: usize = 32;
        let cache = Arc::new(TestCache::new(Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(CALLERS));

        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.get_or_load("k", || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(100));
                        Ok("loaded".to_string())
                    })
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), Ok("loaded".to_string()));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().loads(), 1);
        assert_eq!(cache.stats().shared() + cache.stats().hits(), CALLERS as u64 - 1);
        assert!(!cache.is_loading("k"));
    }

    #[test]
    fn test_cache_dedup_instant_loader_many_rounds() {
        const CALLERS: usize = 32;
        const ROUNDS: usize = 200;
        let cache = Arc::new(TestCache::new(Duration::from_secs(60)));

        for round in 0..ROUNDS {
            cache.clear_all();
            let calls = Arc::new(AtomicUsize::new(0));
            let barrier = Arc::new(Barrier::new(CALLERS));

            let handles: Vec<_> = (0..CALLERS)
                .map(|_| {
                    let cache = Arc::clone(&cache);
                    let calls = Arc::clone(&calls);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        cache.get_or_load("k", || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok(format!("round {round}"))
                        })
                    })
                })
                .collect();

            for handle in handles {
                assert_eq!(handle.join().unwrap(), Ok(format!("round {round}")));
            }
            assert_eq!(calls.load(Ordering::SeqCst), 1, "round {round}");
        }
    }

    #[test]
    fn test_cache_miss_path_rechecks_store() {
        let cache = TestCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);

        // Value stored by a load that finished after this caller's fast-path miss
        cache.set("k", "stored".to_string());
        let value = cache.load_through("k", counting_loader(&calls, "again"));

        assert_eq!(value, Ok("stored".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(cache.stats().loads(), 0);
    }

    #[test]
    fn test_cache_distinct_keys_load_in_parallel() {
        let cache = Arc::new(TestCache::new(Duration::from_secs(60)));
        let (a_started_tx, a_started_rx) = mpsc::channel();
        let (b_done_tx, b_done_rx) = mpsc::channel();

        let a = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                cache.get_or_load("a", || {
                    a_started_tx.send(()).unwrap();
                    b_done_rx
                        .recv_timeout(Duration::from_secs(5))
                        .map(|_| "a".to_string())
                        .map_err(|e| e.to_string())
                })
            })
        };

        a_started_rx.recv().unwrap();
        assert!(cache.is_loading("a"));
        assert_eq!(cache.get_or_load("b", || Ok("b".to_string())), Ok("b".to_string()));
        b_done_tx.send(()).unwrap();

        assert_eq!(a.join().unwrap(), Ok("a".to_string()));
        assert_eq!(cache.get("a"), Some("a".to_string()));
    }

    #[test]
    fn test_cache_ttl_expiry_reloads() {
        let cache = TestCache::new(Duration::from_millis(50));
        let calls = AtomicUsize::new(0);

        cache.set("k", "v".to_string());
        thread::sleep(Duration::from_millis(100));

        assert_eq!(cache.get_or_load("k", counting_loader(&calls, "fresh")), Ok("fresh".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cache_manual_set_bypasses_loader() {
        let cache = TestCache::new(Duration::from_secs(60));
        cache.set("k", "v".to_string());

        let value = cache.get_or_load("k", || panic!("loader must not run on a hit"));

        assert_eq!(value, Ok("v".to_string()));
        assert_eq!(cache.stats().sets(), 1);
        assert_eq!(cache.stats().loads(), 0);
    }

    #[test]
    fn test_cache_delete_forces_load() {
        let cache = TestCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);

        cache.set("k", "v".to_string());
        cache.delete("k");
        cache.delete("never-set");

        assert_eq!(cache.get_or_load("k", counting_loader(&calls, "x")), Ok("x".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cache_failure_not_cached() {
        let cache = TestCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);

        let failed = cache.get_or_load("k", || Err("E".to_string()));
        assert_eq!(failed, Err("E".to_string()));
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());

        assert_eq!(cache.get_or_load("k", counting_loader(&calls, "y")), Ok("y".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().load_failures(), 1);
        assert_eq!(cache.stats().loads(), 2);
    }

    #[test]
    fn test_cache_failure_shared_by_waiters() {
        let cache = Arc::new(TestCache::new(Duration::from_secs(60)));
        let (started_tx, started_rx) = mpsc::channel();

        let leader = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                cache.get_or_load("k", || {
                    started_tx.send(()).unwrap();
                    thread::sleep(Duration::from_millis(100));
                    Err("down".to_string())
                })
            })
        };

        started_rx.recv().unwrap();
        let joined = cache.get_or_load("k", || Ok("unused".to_string()));

        assert_eq!(joined, Err("down".to_string()));
        assert_eq!(leader.join().unwrap(), Err("down".to_string()));
        assert_eq!(cache.stats().loads(), 1);
        assert_eq!(cache.stats().shared(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_clear_all_forces_reload() {
        let cache = TestCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);

        cache.set("a", "1".to_string());
        cache.set("b", "2".to_string());
        cache.clear_all();
        assert!(cache.is_empty());

        assert_eq!(cache.get_or_load("a", counting_loader(&calls, "a2")), Ok("a2".to_string()));
        assert_eq!(cache.get_or_load("b", counting_loader(&calls, "b2")), Ok("b2".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cache_delete_does_not_cancel_load() {
        let cache = Arc::new(TestCache::new(Duration::from_secs(60)));
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let leader = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                cache.get_or_load("k", || {
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Ok("loaded".to_string())
                })
            })
        };

        started_rx.recv().unwrap();
        cache.delete("k");
        cache.clear_all();
        release_tx.send(()).unwrap();

        assert_eq!(leader.join().unwrap(), Ok("loaded".to_string()));
        assert_eq!(cache.get("k"), Some("loaded".to_string()));
    }

    #[test]
    fn test_cache_load_overwrites_concurrent_set() {
        let cache = Arc::new(TestCache::new(Duration::from_secs(60)));
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let leader = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                cache.get_or_load("k", || {
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Ok("from-load".to_string())
                })
            })
        };

        started_rx.recv().unwrap();
        cache.set("k", "manual".to_string());
        assert_eq!(cache.get("k"), Some("manual".to_string()));
        release_tx.send(()).unwrap();
        leader.join().unwrap().unwrap();

        // Last writer wins
        assert_eq!(cache.get("k"), Some("from-load".to_string()));
    }

    #[test]
    fn test_cache_zero_ttl_never_expires() {
        let cache = TestCache::new(Duration::ZERO);
        cache.set("k", "v".to_string());
        thread::sleep(Duration::from_millis(20));

        assert_eq!(cache.get("k"), Some("v".to_string()));
    }

    #[test]
    fn test_cache_with_config() {
        let config = CacheConfig {
            ttl_ms: 40,
            cleanup_interval_ms: Some(5),
            shards: 4,
        };
        let cache = TestCache::with_config(&config).unwrap();
        assert_eq!(cache.ttl(), Duration::from_millis(40));

        cache.set("k", "v".to_string());
        thread::sleep(Duration::from_millis(150));

        // Swept, not just hidden
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_cache_with_invalid_config() {
        let config = CacheConfig {
            shards: 0,
            ..CacheConfig::default()
        };
        assert!(matches!(
            TestCache::with_config(&config),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_cache_close_keeps_expiry_semantics() {
        let cache = TestCache::new(Duration::from_millis(10));
        cache.close();

        cache.set("k", "v".to_string());
        thread::sleep(Duration::from_millis(50));

        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.get_or_load("k", || Ok("again".to_string())),
            Ok("again".to_string())
        );
    }
}
