//! Subcommand implementations

use std::sync::Barrier;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, ensure, Result};
use syncache::{Cache, CacheConfig, StatsSnapshot};
use tracing::{debug, info};

/// Walk through the basic cache operations, printing each result
pub fn demo(config: &CacheConfig) -> Result<()> {
    let cache: Cache<String, String> = Cache::with_config(config)?;

    // Miss: the loader runs and its value is cached
    let greeting = cache
        .get_or_load("greeting", || {
            info!("loading greeting");
            Ok("Hello, world!".to_string())
        })
        .map_err(anyhow::Error::msg)?;
    println!("{greeting}");

    // Hit: a manual set is returned without calling the loader
    cache.set("message", "Hi again!".to_string());
    let message = cache
        .get_or_load("message", || Ok("This won't be called".to_string()))
        .map_err(anyhow::Error::msg)?;
    println!("{message}");

    cache.delete("message");
    info!(
        greeting_cached = cache.get("greeting").is_some(),
        message_cached = cache.get("message").is_some(),
        "demo finished"
    );

    Ok(())
}

/// Shape of a stampede run
#[derive(Debug, Clone, Copy)]
pub struct StampedeOptions {
    /// Threads calling `get_or_load` at once
    pub callers: usize,
    /// Distinct keys the callers are spread over
    pub keys: usize,
    /// Time each loader takes
    pub load_time: Duration,
}

/// Release `callers` threads at the same moment against `keys` missing keys
/// and report the cache statistics afterwards. Each key should load once.
pub fn stampede(config: &CacheConfig, options: StampedeOptions) -> Result<StatsSnapshot> {
    ensure!(options.callers > 0, "--callers must be at least 1");
    ensure!(options.keys > 0, "--keys must be at least 1");

    let cache: Cache<String, String> = Cache::with_config(config)?;
    let barrier = Barrier::new(options.callers);

    info!(
        callers = options.callers,
        keys = options.keys,
        load_ms = options.load_time.as_millis() as u64,
        "starting stampede"
    );

    thread::scope(|scope| {
        let handles: Vec<_> = (0..options.callers)
            .map(|i| {
                let cache = &cache;
                let barrier = &barrier;
                scope.spawn(move || {
                    let key = format!("key-{}", i % options.keys);
                    barrier.wait();
                    cache.get_or_load(&key, || {
                        debug!(key = %key, caller = i, "running loader");
                        thread::sleep(options.load_time);
                        Ok(format!("value for {key}"))
                    })
                })
            })
            .collect();

        for handle in handles {
            match handle.join() {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(anyhow!(e)),
                Err(_) => bail!("caller thread panicked"),
            }
        }
        Ok(())
    })?;

    let stats = cache.stats().snapshot();
    info!(loads = stats.loads, shared = stats.shared, hits = stats.hits, "stampede finished");
    Ok(stats)
}
