//! # syncache
//!
//! In-process TTL cache with single-flight loading.
//!
//! ## Architecture
//! - **Store**: `ttlstore::ExpiringStore` holds values with their deadlines
//! - **Flights**: `FlightGroup` runs at most one loader per key at a time
//! - **Cache**: checks the store, and on a miss loads through the flight
//!   group, storing the value before any waiting caller returns
//!
//! ```
//! use std::time::Duration;
//! use syncache::Cache;
//!
//! let cache: Cache<String, String> = Cache::new(Duration::from_secs(120));
//!
//! let greeting = cache.get_or_load("greeting", || Ok("Hello, world!".to_string()));
//! assert_eq!(greeting.as_deref(), Ok("Hello, world!"));
//!
//! cache.set("message", "Hi again!".to_string());
//! let message = cache.get_or_load("message", || Ok("never loaded".to_string()));
//! assert_eq!(message.as_deref(), Ok("Hi again!"));
//! ```

#![warn(missing_docs)]

mod cache;
mod config;
mod error;
mod flight;
mod stats;

pub use cache::Cache;
pub use config::{CacheConfig, DEFAULT_TTL_MS};
pub use error::{Error, Result};
pub use flight::{FlightGroup, DEFAULT_SHARDS};
pub use stats::{CacheStats, StatsSnapshot};
