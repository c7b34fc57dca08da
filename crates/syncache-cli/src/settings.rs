//! Cache configuration for the CLI: optional JSON file plus flag overrides

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use syncache::CacheConfig;

/// Load the cache configuration
///
/// # Arguments
/// * `path` - JSON file with `CacheConfig` fields; defaults when `None`
/// * `ttl_ms` - Overrides the file's TTL when given
pub fn load(path: Option<&Path>, ttl_ms: Option<u64>) -> Result<CacheConfig> {
    let mut config = match path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing config file {}", path.display()))?
        }
        None => CacheConfig::default(),
    };

    if let Some(ttl_ms) = ttl_ms {
        config.ttl_ms = ttl_ms;
    }

    config.validate()?;
    Ok(config)
}
