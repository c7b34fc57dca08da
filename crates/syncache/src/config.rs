//! Cache configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::flight::DEFAULT_SHARDS;

/// Default entry TTL (5 minutes)
pub const DEFAULT_TTL_MS: u64 = 5 * 60 * 1000;

/// Cache configuration.
///
/// Every field has a default, so a partial JSON document is enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL in milliseconds for every entry; 0 means entries never expire
    pub ttl_ms: u64,

    /// How often expired entries are swept, in milliseconds.
    /// Defaults to twice the TTL.
    pub cleanup_interval_ms: Option<u64>,

    /// Number of shards in the in-flight load registry, rounded up to a
    /// power of two
    pub shards: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: DEFAULT_TTL_MS,
            cleanup_interval_ms: None,
            shards: DEFAULT_SHARDS,
        }
    }
}

impl CacheConfig {
    /// Configuration with the given TTL and defaults for everything else
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            ..Self::default()
        }
    }

    /// Entry TTL
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Sweep interval; `None` when there is nothing to sweep
    pub fn cleanup_interval(&self) -> Option<Duration> {
        match self.cleanup_interval_ms {
            Some(ms) => Some(Duration::from_millis(ms)),
            None => default_cleanup_interval(self.ttl()),
        }
    }

    /// Check that every value is usable
    pub fn validate(&self) -> Result<()> {
        if self.shards == 0 {
            return Err(Error::InvalidConfig("shards must be at least 1".to_string()));
        }
        if self.cleanup_interval_ms == Some(0) {
            return Err(Error::InvalidConfig(
                "cleanup_interval_ms must be positive (omit it to use the default)".to_string(),
            ));
        }
        Ok(())
    }
}

/// Sweep every two TTLs; entries that never expire need no sweep
pub(crate) fn default_cleanup_interval(ttl: Duration) -> Option<Duration> {
    if ttl.is_zero() {
        None
    } else {
        Some(ttl.saturating_mul(2))
    }
}
