//! Expiring store implementation
//!
//! Items live in a single `RwLock`ed map. Expired items are hidden from
//! every read as soon as their deadline passes; physical removal happens in
//! `delete_expired`, which the janitor thread runs on an interval.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use ahash::RandomState;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::janitor::Janitor;

/// How long an item stays visible after it is written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Expiration {
    /// Use the store's default TTL
    #[default]
    Default,

    /// Never expire
    Never,

    /// Expire after the given duration
    After(Duration),
}

/// Callback run with each item removed by `delete` or `delete_expired`
pub type EvictionCallback<V> = Arc<dyn Fn(&str, V) + Send + Sync>;

struct Item<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> Item<V> {
    #[inline]
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if now >= at)
    }
}

struct Shared<V> {
    items: RwLock<HashMap<String, Item<V>, RandomState>>,
    on_evicted: RwLock<Option<EvictionCallback<V>>>,
    default_ttl: Option<Duration>,
}

impl<V> Shared<V> {
    fn expires_at(&self, expiration: Expiration) -> Option<Instant> {
        let ttl = match expiration {
            Expiration::Default => self.default_ttl,
            Expiration::Never => None,
            Expiration::After(ttl) => Some(ttl),
        };
        // A deadline past what Instant can represent is as good as never
        ttl.and_then(|ttl| Instant::now().checked_add(ttl))
    }

    fn delete_expired(&self) -> usize {
        let now = Instant::now();
        let evicted: Vec<(String, V)> = {
            let mut items = self.items.write();
            let expired: Vec<String> = items
                .iter()
                .filter(|(_, item)| item.is_expired(now))
                .map(|(key, _)| key.clone())
                .collect();

            expired
                .into_iter()
                .filter_map(|key| items.remove(&key).map(|item| (key, item.value)))
                .collect()
        };

        let count = evicted.len();
        if count > 0 {
            debug!(count, "removed expired items");
        }

        let callback = self.on_evicted.read().clone();
        if let Some(callback) = callback {
            for (key, value) in evicted {
                callback(key.as_str(), value);
            }
        }

        count
    }
}

/// Thread-safe key/value store where every item carries a deadline.
///
/// `get` never returns an item whose deadline has passed, whether or not
/// the janitor has physically removed it yet.
pub struct ExpiringStore<V> {
    shared: Arc<Shared<V>>,
    janitor: Mutex<Option<Janitor>>,
}

impl<V> ExpiringStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a store
    ///
    /// # Arguments
    /// * `default_ttl` - TTL applied by `Expiration::Default`; zero means never expire
    /// * `cleanup_interval` - How often the janitor removes expired items;
    ///   `None` or zero disables the janitor
    pub fn new(default_ttl: Duration, cleanup_interval: Option<Duration>) -> Self {
        let shared = Arc::new(Shared {
            items: RwLock::new(HashMap::with_hasher(RandomState::new())),
            on_evicted: RwLock::new(None),
            default_ttl: (!default_ttl.is_zero()).then_some(default_ttl),
        });

        let janitor = cleanup_interval
            .filter(|interval| !interval.is_zero())
            .and_then(|interval| {
                let weak: Weak<Shared<V>> = Arc::downgrade(&shared);
                Janitor::start(interval, move || match weak.upgrade() {
                    Some(shared) => {
                        shared.delete_expired();
                        true
                    }
                    None => false,
                })
            });

        Self {
            shared,
            janitor: Mutex::new(janitor),
        }
    }

    /// Get a live item
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let items = self.shared.items.read();
        match items.get(key) {
            Some(item) if !item.is_expired(now) => Some(item.value.clone()),
            _ => None,
        }
    }

    /// Get a live item together with its deadline (`None` = never expires)
    pub fn get_with_expiration(&self, key: &str) -> Option<(V, Option<Instant>)> {
        let now = Instant::now();
        let items = self.shared.items.read();
        match items.get(key) {
            Some(item) if !item.is_expired(now) => Some((item.value.clone(), item.expires_at)),
            _ => None,
        }
    }

    /// Insert or overwrite an item
    pub fn set(&self, key: impl Into<String>, value: V, expiration: Expiration) {
        let key = key.into();
        let expires_at = self.shared.expires_at(expiration);
        trace!(key = %key, "set");
        self.shared
            .items
            .write()
            .insert(key, Item { value, expires_at });
    }

    /// Insert or overwrite an item with the default TTL
    pub fn set_default(&self, key: impl Into<String>, value: V) {
        self.set(key, value, Expiration::Default);
    }

    /// Insert an item only if no live item exists under the key
    pub fn add(&self, key: impl Into<String>, value: V, expiration: Expiration) -> Result<()> {
        let key = key.into();
        let expires_at = self.shared.expires_at(expiration);
        let now = Instant::now();

        let mut items = self.shared.items.write();
        if matches!(items.get(&key), Some(item) if !item.is_expired(now)) {
            return Err(Error::AlreadyExists(key));
        }
        items.insert(key, Item { value, expires_at });
        Ok(())
    }

    /// Overwrite an item only if a live item exists under the key
    pub fn replace(&self, key: impl Into<String>, value: V, expiration: Expiration) -> Result<()> {
        let key = key.into();
        let expires_at = self.shared.expires_at(expiration);
        let now = Instant::now();

        let mut items = self.shared.items.write();
        match items.get_mut(&key) {
            Some(item) if !item.is_expired(now) => {
                *item = Item { value, expires_at };
                Ok(())
            }
            _ => Err(Error::NotFound(key)),
        }
    }

    /// Remove an item. Absent keys are a no-op.
    pub fn delete(&self, key: &str) {
        let removed = self.shared.items.write().remove(key);
        if let Some(item) = removed {
            let callback = self.shared.on_evicted.read().clone();
            if let Some(callback) = callback {
                callback(key, item.value);
            }
        }
    }

    /// Physically remove every expired item, returning how many were removed
    pub fn delete_expired(&self) -> usize {
        self.shared.delete_expired()
    }

    /// Remove every item. The eviction callback is not run.
    pub fn flush(&self) {
        self.shared.items.write().clear();
    }

    /// Snapshot of all live items
    pub fn items(&self) -> Vec<(String, V)> {
        let now = Instant::now();
        self.shared
            .items
            .read()
            .iter()
            .filter(|(_, item)| !item.is_expired(now))
            .map(|(key, item)| (key.clone(), item.value.clone()))
            .collect()
    }

    /// Number of items held, including expired ones not yet removed
    pub fn item_count(&self) -> usize {
        self.shared.items.read().len()
    }

    /// Register the callback run for items removed by `delete` or
    /// `delete_expired`. Replaces any previous callback.
    pub fn on_evicted<F>(&self, callback: F)
    where
        F: Fn(&str, V) + Send + Sync + 'static,
    {
        *self.shared.on_evicted.write() = Some(Arc::new(callback));
    }

    /// TTL applied by `Expiration::Default` (`None` = never expire)
    pub fn default_ttl(&self) -> Option<Duration> {
        self.shared.default_ttl
    }

    /// Whether a janitor thread is running
    pub fn has_janitor(&self) -> bool {
        self.janitor.lock().is_some()
    }

    /// Stop the janitor. Expired items stay hidden but are no longer
    /// removed in the background.
    pub fn close(&self) {
        let janitor = self.janitor.lock().take();
        drop(janitor);
    }
}
