//! Native implementation of `ExecutionPool` using OS threads.
//!
//! Every worker owns a single-threaded tokio runtime, so async handlers run to
//! completion on the worker without touching the caller's runtime.
//!
//! # Design Principles
//!
//! - **No polling**: workers block on the channel; shutdown drops the sender
//! - **Fixed footprint**: worker count and queue length are set at construction
//! - **Crash-safe shutdown**: queued jobs are dropped with their locks intact

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::ExecutorConfig;
use crate::core::job::Job;
use crate::core::runner::JobRunner;

use super::{PoolCounters, PoolError, PoolStats, SubmitError};

/// Bounded pool of worker threads executing claimed jobs.
pub struct ExecutionPool {
    /// Name used for worker threads and log fields.
    name: String,

    worker_count: usize,

    queue_capacity: usize,

    shutdown_wait: Duration,

    /// Job sender (to workers). Option allows clean shutdown by dropping.
    job_tx: Mutex<Option<Sender<Job>>>,

    /// Pool statistics counters (lock-free atomics).
    counters: Arc<PoolCounters>,

    /// Shutdown flag; workers check it before starting each job.
    shutdown: Arc<AtomicBool>,

    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ExecutionPool {
    /// Spawn `config.pool_size` workers reading from a queue of `config.queue_size` slots.
    ///
    /// # Errors
    ///
    /// `PoolError::InvalidConfig` for a zero pool or queue size, `PoolError::Internal`
    /// if a worker thread cannot be spawned.
    pub fn new(
        name: &str,
        config: &ExecutorConfig,
        runner: Arc<dyn JobRunner>,
    ) -> Result<Self, PoolError> {
        if config.pool_size == 0 {
            return Err(PoolError::InvalidConfig("pool_size must be greater than 0".into()));
        }
        if config.queue_size == 0 {
            return Err(PoolError::InvalidConfig("queue_size must be greater than 0".into()));
        }

        let (job_tx, job_rx) = bounded::<Job>(config.queue_size);
        let counters = Arc::new(PoolCounters::default());
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(config.pool_size);
        for worker_id in 0..config.pool_size {
            let spawned = spawn_worker(
                name,
                worker_id,
                job_rx.clone(),
                Arc::clone(&runner),
                Arc::clone(&counters),
                Arc::clone(&shutdown),
                config.thread_stack_size,
            );
            match spawned {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    shutdown.store(true, Ordering::Release);
                    drop(job_tx);
                    for worker in workers {
                        let _ = worker.join();
                    }
                    return Err(PoolError::Internal(format!(
                        "failed to spawn worker thread: {e}"
                    )));
                }
            }
        }

        info!(
            pool = name,
            worker_count = config.pool_size,
            queue_size = config.queue_size,
            "execution pool started"
        );

        Ok(Self {
            name: name.to_owned(),
            worker_count: config.pool_size,
            queue_capacity: config.queue_size,
            shutdown_wait: config.shutdown_wait(),
            job_tx: Mutex::new(Some(job_tx)),
            counters,
            shutdown,
            workers: Mutex::new(workers),
        })
    }

    /// Enqueue a job without blocking.
    ///
    /// # Errors
    ///
    /// Hands the job back as `SubmitError::Full` when no queue slot is free and as
    /// `SubmitError::Shutdown` once the pool stopped accepting work.
    pub fn try_submit(&self, job: Job) -> Result<(), SubmitError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(SubmitError::Shutdown(job));
        }

        let job_tx = self.job_tx.lock();
        let Some(tx) = job_tx.as_ref() else {
            return Err(SubmitError::Shutdown(job));
        };

        let job_id = job.id;
        // Counted before sending so a fast worker never decrements below zero.
        self.counters.queued_jobs.fetch_add(1, Ordering::Relaxed);
        let rejected = match tx.try_send(job) {
            Ok(()) => {
                self.counters.submitted_jobs.fetch_add(1, Ordering::Relaxed);
                debug!(pool = %self.name, job_id = %job_id, "job queued");
                return Ok(());
            }
            Err(TrySendError::Full(job)) => SubmitError::Full(job),
            Err(TrySendError::Disconnected(job)) => SubmitError::Shutdown(job),
        };
        self.counters.queued_jobs.fetch_sub(1, Ordering::Relaxed);
        Err(rejected)
    }

    /// Free queue slots. Zero once the pool is shut down.
    #[must_use]
    pub fn remaining_capacity(&self) -> usize {
        if self.shutdown.load(Ordering::Acquire) {
            return 0;
        }
        self.job_tx
            .lock()
            .as_ref()
            .map_or(0, |tx| self.queue_capacity.saturating_sub(tx.len()))
    }

    /// Whether the pool stopped accepting work.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot(self.worker_count, self.queue_capacity)
    }

    /// Stop accepting work and wait for in-flight jobs.
    ///
    /// Jobs still queued are dropped without touching their locks; the expired-lock
    /// sweep makes them acquirable again. Workers that have not finished within the
    /// configured shutdown wait are detached. Calling this twice is a no-op.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        info!(pool = %self.name, "shutting down execution pool");

        {
            let mut job_tx = self.job_tx.lock();
            *job_tx = None;
        }

        let deadline = Instant::now() + self.shutdown_wait;
        let mut workers = self.workers.lock();
        let worker_count = workers.len();

        for (idx, worker) in workers.drain(..).enumerate() {
            let (tx, rx) = bounded::<bool>(1);
            let joiner = thread::Builder::new()
                .name(format!("{}-joiner-{idx}", self.name))
                .spawn(move || {
                    let _ = tx.send(worker.join().is_ok());
                });
            if let Err(e) = joiner {
                warn!(pool = %self.name, worker_id = idx, error = %e, "could not wait for worker");
                continue;
            }

            match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                Ok(true) => debug!(pool = %self.name, worker_id = idx, "worker joined"),
                Ok(false) => warn!(pool = %self.name, worker_id = idx, "worker panicked"),
                Err(_) => warn!(
                    pool = %self.name,
                    worker_id = idx,
                    "worker still busy after shutdown wait, detaching"
                ),
            }
        }

        info!(pool = %self.name, worker_count, "execution pool shut down");
    }
}

impl Drop for ExecutionPool {
    fn drop(&mut self) {
        // Signal only; joining here could hang on a stuck handler.
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            let mut job_tx = self.job_tx.lock();
            *job_tx = None;
            debug!(pool = %self.name, "execution pool dropped without explicit shutdown");
        }
    }
}

fn spawn_worker(
    name: &str,
    worker_id: usize,
    job_rx: Receiver<Job>,
    runner: Arc<dyn JobRunner>,
    counters: Arc<PoolCounters>,
    shutdown: Arc<AtomicBool>,
    stack_size: usize,
) -> std::io::Result<JoinHandle<()>> {
    let pool = name.to_owned();
    thread::Builder::new()
        .name(format!("{name}-job-worker-{worker_id}"))
        .stack_size(stack_size)
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!(pool = %pool, worker_id, error = %e, "failed to create worker runtime");
                    return;
                }
            };

            // Returns Err once the sender is dropped and the queue is drained.
            while let Ok(job) = job_rx.recv() {
                counters.queued_jobs.fetch_sub(1, Ordering::Relaxed);

                if shutdown.load(Ordering::Acquire) {
                    debug!(
                        pool = %pool,
                        worker_id,
                        job_id = %job.id,
                        "abandoning queued job on shutdown"
                    );
                    continue;
                }

                counters.active_jobs.fetch_add(1, Ordering::Relaxed);
                let job_id = job.id;
                debug!(pool = %pool, worker_id, job_id = %job_id, "worker executing job");

                let outcome = rt.block_on(runner.run(job));

                counters.active_jobs.fetch_sub(1, Ordering::Relaxed);
                counters.record(outcome);
                debug!(pool = %pool, worker_id, job_id = %job_id, ?outcome, "worker finished job");
            }

            debug!(pool = %pool, worker_id, "worker thread exiting");
        })
}
