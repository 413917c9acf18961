use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, mpsc},
    thread,
    time::Duration,
};

use log::{debug, error, trace, warn};

/// Default number of workers in a pool.
pub const DEFAULT_WORKERS: usize = 4;

type Callback<T> = Arc<dyn Fn(T) + Send + Sync + 'static>;
type FinishHandler = Box<dyn FnOnce() + Send + 'static>;

/// Queue entry. `Terminate` is the poison pill.
enum Job<T> {
    Run(T),
    Terminate,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Number of workers that have not exited yet.
#[derive(Default)]
struct Live {
    count: Mutex<usize>,
    exited: Condvar,
}

impl Live {
    fn enter(&self) {
        *lock(&self.count) += 1;
    }

    fn leave(&self) {
        let mut count = lock(&self.count);
        *count = count.saturating_sub(1);
        self.exited.notify_all();
    }
}

/// Fixed-size pool of workers consuming values from a shared FIFO queue.
///
/// Every dequeued value is handed to the pool's callback. Values can be queued
/// before the pool is started; they are processed once workers exist.
pub struct WorkerPool<T: Send + 'static> {
    size: usize,
    callback: Callback<T>,
    sender: mpsc::Sender<Job<T>>,
    receiver: Arc<Mutex<mpsc::Receiver<Job<T>>>>,
    workers: Vec<Worker>,
    live: Arc<Live>,
    on_finish: Option<FinishHandler>,
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new<F>(size: usize, callback: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        assert!(size > 0);

        let (sender, receiver) = mpsc::channel();
        Self {
            size,
            callback: Arc::new(callback),
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            workers: Vec::with_capacity(size),
            live: Arc::new(Live::default()),
            on_finish: None,
        }
    }

    /// Pool with [`DEFAULT_WORKERS`] workers.
    pub fn with_default_size<F>(callback: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self::new(DEFAULT_WORKERS, callback)
    }

    /// Registers a handler run once [`stop`](Self::stop) has joined every worker.
    pub fn on_finish<F>(&mut self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_finish = Some(Box::new(f));
    }

    pub fn is_running(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Spawns the workers. Calling it on a running pool does nothing.
    pub fn start(&mut self) {
        if self.is_running() {
            warn!("worker pool already started");
            return;
        }

        for id in 0..self.size {
            self.live.enter();
            self.workers.push(Worker::new(
                id,
                Arc::clone(&self.receiver),
                Arc::clone(&self.callback),
                Arc::clone(&self.live),
            ));
        }
        debug!("started {} workers", self.size);
    }

    /// Queues `value` for the next free worker.
    pub fn put(&self, value: T) {
        if self.sender.send(Job::Run(value)).is_err() {
            error!("worker queue is closed");
        }
    }

    /// Queues `value` once `delay` has elapsed, without blocking the caller.
    pub fn put_after(&self, value: T, delay: Duration) {
        let sender = self.sender.clone();
        thread::spawn(move || {
            thread::sleep(delay);
            if sender.send(Job::Run(value)).is_err() {
                debug!("delayed job dropped, worker queue is closed");
            }
        });
    }

    /// Queues one poison pill per worker and joins them all.
    ///
    /// Values queued before the call are processed first. Runs the finish
    /// handler, if any, once every worker has exited.
    pub fn stop(&mut self) {
        if !self.is_running() {
            return;
        }

        for _ in &self.workers {
            if self.sender.send(Job::Terminate).is_err() {
                error!("worker queue is closed");
            }
        }

        for worker in self.workers.drain(..) {
            debug!("shutting down worker {}", worker.id);

            if worker.thread.join().is_err() {
                error!("worker {} panicked", worker.id);
            }
        }

        if let Some(on_finish) = self.on_finish.take() {
            on_finish();
        }
    }

    /// Blocks until every worker has exited, without asking them to.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let count = lock(&self.live.count);

        match timeout {
            None => {
                let _count = self
                    .live
                    .exited
                    .wait_while(count, |n| *n > 0)
                    .unwrap_or_else(PoisonError::into_inner);
                true
            }
            Some(timeout) => {
                let (_count, res) = self
                    .live
                    .exited
                    .wait_timeout_while(count, timeout, |n| *n > 0)
                    .unwrap_or_else(PoisonError::into_inner);
                !res.timed_out()
            }
        }
    }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug)]
struct Worker {
    id: usize,
    thread: thread::JoinHandle<()>,
}

impl Worker {
    fn new<T: Send + 'static>(
        id: usize,
        receiver: Arc<Mutex<mpsc::Receiver<Job<T>>>>,
        callback: Callback<T>,
        live: Arc<Live>,
    ) -> Self {
        let thread = thread::spawn(move || {
            loop {
                let job = lock(&*receiver).recv();
                match job {
                    Ok(Job::Run(value)) => {
                        trace!("worker {id} handling a job");
                        if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
                            error!("worker {id} job panicked");
                        }
                    }
                    Ok(Job::Terminate) => {
                        debug!("worker {id} terminating");
                        break;
                    }
                    Err(_) => {
                        debug!("worker {id} disconnected");
                        break;
                    }
                }
            }
            live.leave();
        });

        Self { id, thread }
    }
}
