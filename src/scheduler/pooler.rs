use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Condvar, Mutex, PoisonError},
    time::Duration,
};

use log::{debug, error, trace};

use super::WorkerPool;

/// Cancellation flag the periodic loop sleeps on.
#[derive(Default)]
struct Cancel {
    stopped: Mutex<bool>,
    signal: Condvar,
}

impl Cancel {
    fn set(&self, stopped: bool) {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner) = stopped;
        self.signal.notify_all();
    }

    fn is_set(&self) -> bool {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps for `interval` unless cancelled first. Returns whether the loop
    /// should end.
    fn sleep(&self, interval: Duration) -> bool {
        let stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        let (stopped, _) = self
            .signal
            .wait_timeout_while(stopped, interval, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *stopped
    }
}

/// Periodic task on a single-worker pool.
///
/// The worker runs one loop: invoke the callback, wait `interval`, repeat,
/// until [`stop`](Self::stop) raises the cancellation flag. Iterations never
/// overlap. A panicking callback is logged and the loop carries on.
///
/// `stop` wakes a sleeping loop immediately; it only has to wait for a
/// callback that is already running.
pub struct Pooler {
    name: String,
    interval: Duration,
    pool: WorkerPool<()>,
    cancel: Arc<Cancel>,
}

impl Pooler {
    pub fn new<F>(name: impl Into<String>, interval: Duration, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let name = name.into();
        let cancel = Arc::new(Cancel::default());

        let task = name.clone();
        let flag = Arc::clone(&cancel);
        let pool = WorkerPool::new(1, move |()| {
            while !flag.is_set() {
                trace!("running periodic task '{task}'");
                if catch_unwind(AssertUnwindSafe(&callback)).is_err() {
                    error!("periodic task '{task}' panicked, continuing");
                }
                if flag.sleep(interval) {
                    break;
                }
            }
            debug!("periodic task '{task}' stopped");
        });

        Self {
            name,
            interval,
            pool,
            cancel,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.pool.is_running()
    }

    /// Starts the loop; the first run happens right away.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }

        debug!("starting periodic task '{}' every {:?}", self.name, self.interval);
        self.cancel.set(false);
        self.pool.start();
        self.pool.put(());
    }

    /// Cancels the loop and joins its worker.
    pub fn stop(&mut self) {
        if !self.is_running() {
            return;
        }

        self.cancel.set(true);
        self.pool.stop();
    }
}

impl Drop for Pooler {
    fn drop(&mut self) {
        self.stop();
    }
}
