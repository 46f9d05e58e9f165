//! Bounded execution pool for claimed jobs.
//!
//! Each tenant executor owns one pool: a fixed number of dedicated OS threads fed from a
//! fixed-length queue. Submissions never grow the queue; callers either get the job back
//! (`SubmitError::Full`) or block and retry on their own schedule.

mod native;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::job::Job;

pub use native::ExecutionPool;

/// Errors that can occur when using an [`ExecutionPool`].
#[derive(Debug)]
pub enum PoolError {
    /// The job queue is full; no more jobs can be accepted right now.
    QueueFull,

    /// The pool has been shut down.
    PoolShutdown,

    /// Configuration validation failed.
    InvalidConfig(String),

    /// Internal error (worker thread could not be spawned, etc.).
    Internal(String),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "job queue is full"),
            Self::PoolShutdown => write!(f, "pool has been shut down"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for PoolError {}

/// A rejected submission. The job is handed back untouched, lock included.
#[derive(Debug)]
pub enum SubmitError {
    /// The queue had no free slot.
    Full(Job),
    /// The pool no longer accepts work.
    Shutdown(Job),
}

impl SubmitError {
    /// Recover the rejected job.
    #[must_use]
    pub fn into_job(self) -> Job {
        match self {
            Self::Full(job) | Self::Shutdown(job) => job,
        }
    }
}

impl From<&SubmitError> for PoolError {
    fn from(value: &SubmitError) -> Self {
        match value {
            SubmitError::Full(_) => Self::QueueFull,
            SubmitError::Shutdown(_) => Self::PoolShutdown,
        }
    }
}

/// How a job run ended, as reported by the job runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Handler succeeded and the job was removed.
    Succeeded,
    /// Handler failed; the job will be retried after its backoff.
    Retrying,
    /// Handler failed and the job ran out of retries.
    Dead,
    /// The outcome could not be recorded; the lease sweep will recover the job.
    Abandoned,
}

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Number of worker threads.
    pub worker_count: usize,

    /// Queue length the pool was built with.
    pub queue_capacity: usize,

    /// Currently executing jobs.
    pub active_jobs: u64,

    /// Jobs waiting in the queue.
    pub queued_jobs: u64,

    /// Jobs whose handler succeeded.
    pub completed_jobs: u64,

    /// Jobs whose handler failed (retrying or dead).
    pub failed_jobs: u64,

    /// Jobs accepted into the queue.
    pub submitted_jobs: u64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub active_jobs: AtomicU64,
    pub queued_jobs: AtomicU64,
    pub completed_jobs: AtomicU64,
    pub failed_jobs: AtomicU64,
    pub submitted_jobs: AtomicU64,
}

impl PoolCounters {
    /// Get a snapshot of current statistics.
    pub fn snapshot(&self, worker_count: usize, queue_capacity: usize) -> PoolStats {
        PoolStats {
            worker_count,
            queue_capacity,
            active_jobs: self.active_jobs.load(Ordering::Relaxed),
            queued_jobs: self.queued_jobs.load(Ordering::Relaxed),
            completed_jobs: self.completed_jobs.load(Ordering::Relaxed),
            failed_jobs: self.failed_jobs.load(Ordering::Relaxed),
            submitted_jobs: self.submitted_jobs.load(Ordering::Relaxed),
        }
    }

    /// Account for a finished run.
    pub fn record(&self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Succeeded => {
                self.completed_jobs.fetch_add(1, Ordering::Relaxed);
            }
            JobOutcome::Retrying | JobOutcome::Dead => {
                self.failed_jobs.fetch_add(1, Ordering::Relaxed);
            }
            JobOutcome::Abandoned => {}
        }
    }
}
