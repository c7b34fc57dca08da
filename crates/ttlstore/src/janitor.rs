//! Background sweeper for expired items

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Stop flag shared between the store and its janitor thread
#[derive(Default)]
struct Signal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

/// Handle to a running janitor thread.
///
/// Dropping the handle stops the thread and waits for it to exit.
pub(crate) struct Janitor {
    signal: Arc<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl Janitor {
    /// Spawn a thread that calls `sweep` every `interval` until stopped or
    /// until `sweep` returns `false`.
    ///
    /// Returns `None` if the thread could not be spawned.
    pub(crate) fn start<F>(interval: Duration, sweep: F) -> Option<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let signal = Arc::new(Signal::default());
        let thread_signal = Arc::clone(&signal);

        let spawned = thread::Builder::new()
            .name("ttlstore-janitor".to_string())
            .spawn(move || run(&thread_signal, interval, sweep));

        match spawned {
            Ok(handle) => {
                debug!(interval_ms = interval.as_millis() as u64, "janitor started");
                Some(Self {
                    signal,
                    handle: Some(handle),
                })
            }
            Err(e) => {
                warn!(error = %e, "could not spawn janitor, expired items are only hidden lazily");
                None
            }
        }
    }

    fn stop(&mut self) {
        *self.signal.stopped.lock() = true;
        self.signal.cond.notify_one();

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("janitor thread panicked");
            }
            debug!("janitor stopped");
        }
    }
}

impl Drop for Janitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<F>(signal: &Signal, interval: Duration, mut sweep: F)
where
    F: FnMut() -> bool,
{
    let mut stopped = signal.stopped.lock();
    while !*stopped {
        let timed_out = signal.cond.wait_for(&mut stopped, interval).timed_out();
        if timed_out && !*stopped {
            // The stop flag stays writable while the sweep holds the store lock
            let keep_going = MutexGuard::unlocked(&mut stopped, || sweep());
            if !keep_going {
                break;
            }
        }
    }
}
