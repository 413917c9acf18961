//! Thread-based job scheduling.
//!
//! [`WorkerPool`] runs a fixed number of OS threads against one FIFO queue and
//! hands every queued value to a shared callback. Workers stop when they dequeue
//! a poison pill, so [`WorkerPool::stop`] always drains what was queued before
//! it. [`Pooler`] builds a periodic task on a one-worker pool; the session
//! manager runs its accept and reap loops on two of them.
mod pool;
mod pooler;

pub use pool::{DEFAULT_WORKERS, WorkerPool};
pub use pooler::Pooler;
