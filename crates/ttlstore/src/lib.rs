//! # ttlstore
//!
//! Thread-safe in-memory key/value store with per-item expiration.
//!
//! ## Architecture
//! - **HashMap**: AHash keyed map behind a `parking_lot::RwLock`
//! - **Lazy expiry**: reads skip items whose deadline has passed
//! - **Janitor**: background thread that physically removes expired items
//!
//! ```
//! use std::time::Duration;
//! use ttlstore::{Expiration, ExpiringStore};
//!
//! let store = ExpiringStore::new(Duration::from_secs(60), Some(Duration::from_secs(120)));
//! store.set("greeting", "hello".to_string(), Expiration::Default);
//! assert_eq!(store.get("greeting").as_deref(), Some("hello"));
//! ```

#![warn(missing_docs)]

mod error;
mod janitor;
mod store;

pub use error::{Error, Result};
pub use store::{EvictionCallback, Expiration, ExpiringStore};
