//! Single-flight load coordination
//!
//! A `FlightGroup` makes sure that, among callers asking for the same key at
//! the same time, only the first one runs its loader. Everyone else parks on
//! that call's condvar and receives a clone of the result.
//!
//! The registry of in-flight calls is a sharded `DashMap`, and each call has
//! its own lock and condvar, so waiting on one key never holds anything
//! another key needs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ahash::RandomState;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

/// Default number of registry shards
pub const DEFAULT_SHARDS: usize = 16;

enum Outcome<V, E> {
    Pending,
    Done(Result<V, E>),
    Panicked,
}

/// One in-flight load
struct Call<V, E> {
    outcome: Mutex<Outcome<V, E>>,
    done: Condvar,
    /// Callers that joined instead of running the loader
    dups: AtomicUsize,
}

impl<V, E> Call<V, E> {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(Outcome::Pending),
            done: Condvar::new(),
            dups: AtomicUsize::new(0),
        }
    }

    fn publish(&self, outcome: Outcome<V, E>) {
        *self.outcome.lock() = outcome;
        self.done.notify_all();
    }
}

impl<V: Clone, E: Clone> Call<V, E> {
    fn wait(&self, key: &str) -> Result<V, E> {
        let mut outcome = self.outcome.lock();
        while matches!(*outcome, Outcome::Pending) {
            self.done.wait(&mut outcome);
        }

        match &*outcome {
            Outcome::Done(result) => result.clone(),
            Outcome::Panicked => panic!("in-flight load for key {key:?} panicked"),
            Outcome::Pending => unreachable!("woken before the load finished"),
        }
    }
}

/// Deduplicates concurrent loads per key
pub struct FlightGroup<V, E> {
    calls: DashMap<String, Arc<Call<V, E>>, RandomState>,
}

impl<V, E> FlightGroup<V, E> {
    /// Create a group with `DEFAULT_SHARDS` registry shards
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    /// Create a group with the given number of registry shards, rounded up
    /// to a power of two no smaller than 2
    pub fn with_shards(shards: usize) -> Self {
        let shards = shards.max(2).next_power_of_two();
        Self {
            calls: DashMap::with_hasher_and_shard_amount(RandomState::new(), shards),
        }
    }

    /// Publish the outcome and deregister the call, unless `forget` already
    /// replaced it with a newer one.
    fn complete(&self, key: &str, call: &Arc<Call<V, E>>, outcome: Outcome<V, E>) {
        call.publish(outcome);
        self.calls
            .remove_if(key, |_, current| Arc::ptr_eq(current, call));
    }

    /// Deregister the in-flight load for `key`, if any.
    ///
    /// Callers already waiting still get that load's result; the next call
    /// for `key` starts a new load. Returns whether a load was registered.
    pub fn forget(&self, key: &str) -> bool {
        let forgotten = self.calls.remove(key).is_some();
        if forgotten {
            debug!(key, "forgot in-flight load");
        }
        forgotten
    }

    /// Whether a load for `key` is currently running
    pub fn in_flight(&self, key: &str) -> bool {
        self.calls.contains_key(key)
    }

    /// Number of loads currently running
    pub fn in_flight_count(&self) -> usize {
        self.calls.len()
    }
}

impl<V: Clone, E: Clone> FlightGroup<V, E> {
    /// Run `loader` for `key` unless a load for `key` is already running, in
    /// which case block until it finishes and return its result.
    pub fn run<F>(&self, key: &str, loader: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        self.run_shared(key, loader).0
    }

    /// Like `run`, also reporting whether the result went to more than one
    /// caller.
    ///
    /// # Panics
    /// Panics if the loader of the load this call joined panicked.
    pub fn run_shared<F>(&self, key: &str, loader: F) -> (Result<V, E>, bool)
    where
        F: FnOnce() -> Result<V, E>,
    {
        // The entry guard is dropped before anyone blocks on the call
        let (call, leader) = match self.calls.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                let call = Arc::clone(entry.get());
                call.dups.fetch_add(1, Ordering::Relaxed);
                (call, false)
            }
            Entry::Vacant(entry) => {
                let call = Arc::new(Call::new());
                entry.insert(Arc::clone(&call));
                (call, true)
            }
        };

        if !leader {
            trace!(key, "joining in-flight load");
            return (call.wait(key), true);
        }

        debug!(key, "starting load");
        let mut guard = Leader {
            group: self,
            key,
            call: &call,
            finished: false,
        };
        let result = loader();
        guard.finish(Outcome::Done(result.clone()));

        let dups = call.dups.load(Ordering::Relaxed);
        debug!(key, ok = result.is_ok(), waiters = dups, "load finished");
        (result, dups > 0)
    }
}

impl<V, E> Default for FlightGroup<V, E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Completes the call on behalf of the caller running the loader, including
/// when the loader unwinds.
struct Leader<'a, V, E> {
    group: &'a FlightGroup<V, E>,
    key: &'a str,
    call: &'a Arc<Call<V, E>>,
    finished: bool,
}

impl<V, E> Leader<'_, V, E> {
    fn finish(&mut self, outcome: Outcome<V, E>) {
        self.finished = true;
        self.group.complete(self.key, self.call, outcome);
    }
}

impl<V, E> Drop for Leader<'_, V, E> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(key = self.key, "loader panicked, releasing waiters");
            self.finish(Outcome::Panicked);
        }
    }
}
