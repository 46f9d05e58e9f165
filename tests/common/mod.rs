//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::bail;
use async_trait::async_trait;
use parking_lot::Mutex;
use prometheus_job_executor::config::ExecutorConfig;
use prometheus_job_executor::core::{AppResult, Job, JobHandler};
use prometheus_job_executor::util::init_tracing;

/// Poll `cond` every few milliseconds until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Short intervals so loops cycle quickly in tests. Also installs logging once.
pub fn fast_config() -> ExecutorConfig {
    init_tracing();
    ExecutorConfig {
        max_async_jobs_due_per_acquisition: 5,
        max_timer_jobs_per_acquisition: 5,
        default_async_job_acquire_wait_time_ms: 10,
        default_timer_job_acquire_wait_time_ms: 10,
        async_job_lock_time_ms: 60_000,
        timer_lock_time_ms: 60_000,
        default_queue_size_full_wait_time_ms: 10,
        retry_wait_time_ms: 20,
        reset_expired_jobs_interval_ms: 20,
        reset_expired_jobs_page_size: 10,
        pool_size: 2,
        queue_size: 10,
        default_job_retries: 3,
        seconds_to_wait_on_shutdown: 5,
        thread_stack_size: 2 * 1024 * 1024,
    }
}

/// Records every job it runs; fails the first `failures` runs.
///
/// Clones share state, so a test keeps one clone and registers another.
#[derive(Clone)]
pub struct RecordingHandler {
    job_type: String,
    failures: Arc<AtomicUsize>,
    runs: Arc<Mutex<Vec<Job>>>,
}

impl RecordingHandler {
    pub fn new(job_type: &str) -> Self {
        Self::failing(job_type, 0)
    }

    pub fn failing(job_type: &str, failures: usize) -> Self {
        Self {
            job_type: job_type.to_owned(),
            failures: Arc::new(AtomicUsize::new(failures)),
            runs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn runs(&self) -> Vec<Job> {
        self.runs.lock().clone()
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().len()
    }
}

#[async_trait]
impl JobHandler for RecordingHandler {
    fn job_type(&self) -> &str {
        &self.job_type
    }

    async fn execute(&self, job: &Job) -> AppResult<()> {
        self.runs.lock().push(job.clone());
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            bail!("simulated failure of job {}", job.id);
        }
        Ok(())
    }
}

/// Blocks every run until the gate opens. Clones share state.
#[derive(Clone, Default)]
pub struct GatedHandler {
    open: Arc<AtomicBool>,
    started: Arc<AtomicUsize>,
    finished: Arc<AtomicUsize>,
}

impl GatedHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobHandler for GatedHandler {
    fn job_type(&self) -> &str {
        "gated"
    }

    async fn execute(&self, _job: &Job) -> AppResult<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        while !self.open.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
