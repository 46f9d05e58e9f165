//! Background loops of a tenant executor.
//!
//! Three loops run per started executor:
//!
//! - **due jobs**: claims unlocked async jobs and feeds them to the execution pool
//! - **timer jobs**: same for timer jobs whose trigger time has passed
//! - **expired locks**: clears leases whose owner presumably crashed
//!
//! Each loop is a plain [`AcquisitionLoop`] value driven by its own thread. A cycle
//! returns how long to wait before the next one, which is how the due and timer loops
//! drain a backlog without pausing (full batch) and back off when idle (partial batch).

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::core::error::{SchedulerError, StoreError};
use crate::core::executor::ExecutorCore;
use crate::core::job::Job;
use crate::core::worker_pool::{ExecutionPool, SubmitError};
use crate::util::clock::now_ms;

/// Stop signal shared by the loops of one executor run.
///
/// Loops observe it at the top of each cycle and while waiting; waiting wakes early
/// when the signal is raised.
#[derive(Default)]
pub struct LoopSignal {
    stopped: Mutex<bool>,
    condvar: Condvar,
}

impl LoopSignal {
    /// Fresh, un-raised signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal and wake every waiting loop.
    pub fn stop(&self) {
        *self.stopped.lock() = true;
        self.condvar.notify_all();
    }

    /// Whether the signal has been raised.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }

    /// Wait up to `timeout`. Returns `true` if the signal is raised.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.condvar.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}

/// Everything a loop needs during one executor run.
pub struct LoopContext {
    core: Arc<ExecutorCore>,
    pool: Arc<ExecutionPool>,
    signal: LoopSignal,
}

impl LoopContext {
    pub(crate) fn new(core: Arc<ExecutorCore>, pool: Arc<ExecutionPool>) -> Self {
        Self {
            core,
            pool,
            signal: LoopSignal::new(),
        }
    }

    /// Executor state shared with the job runner.
    #[must_use]
    pub fn core(&self) -> &ExecutorCore {
        &self.core
    }

    /// Execution pool of this run.
    #[must_use]
    pub fn pool(&self) -> &ExecutionPool {
        &self.pool
    }

    /// Stop signal of this run.
    #[must_use]
    pub const fn signal(&self) -> &LoopSignal {
        &self.signal
    }

    /// Submit a claimed job, waiting while the pool queue is full.
    ///
    /// Returns `false` if the run is stopping or the pool is shut down; the job is then
    /// abandoned with its lock intact.
    pub fn submit_blocking(&self, job: Job) -> bool {
        let mut job = job;
        loop {
            match self.pool.try_submit(job) {
                Ok(()) => return true,
                Err(SubmitError::Full(rejected)) => {
                    let wait = self.core.config().default_queue_size_full_wait_time();
                    debug!(
                        tenant_id = %self.core.tenant_id(),
                        job_id = %rejected.id,
                        wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                        "execution queue full, waiting"
                    );
                    if self.signal.wait(wait.max(Duration::from_millis(1))) {
                        return false;
                    }
                    job = rejected;
                }
                Err(SubmitError::Shutdown(rejected)) => {
                    debug!(
                        tenant_id = %self.core.tenant_id(),
                        job_id = %rejected.id,
                        "pool shut down, leaving job locked"
                    );
                    return false;
                }
            }
        }
    }
}

/// One background loop of a tenant executor.
pub trait AcquisitionLoop: Send + 'static {
    /// Short name, used for the thread name and log fields.
    fn name(&self) -> &'static str;

    /// Run one cycle and return how long to wait before the next.
    ///
    /// # Errors
    ///
    /// A failed cycle is logged by the driver, which then waits [`backoff`](Self::backoff).
    fn run_cycle(&mut self, ctx: &LoopContext) -> Result<Duration, SchedulerError>;

    /// Wait applied after a failed cycle.
    fn backoff(&self, ctx: &LoopContext) -> Duration;
}

/// Claims due async jobs in batches of `max_async_jobs_due_per_acquisition`.
#[derive(Debug, Default)]
pub struct AcquireDueJobsLoop;

impl AcquisitionLoop for AcquireDueJobsLoop {
    fn name(&self) -> &'static str {
        "async-jobs-due"
    }

    fn run_cycle(&mut self, ctx: &LoopContext) -> Result<Duration, SchedulerError> {
        let cfg = ctx.core().config();
        acquire_batch(
            ctx,
            cfg.max_async_jobs_due_per_acquisition,
            cfg.default_async_job_acquire_wait_time(),
            |max| {
                ctx.core().store().lock_next_due_jobs(
                    ctx.core().tenant_id(),
                    max,
                    now_ms(),
                    ctx.core().lock_owner(),
                    cfg.async_job_lock_time(),
                )
            },
        )
    }

    fn backoff(&self, ctx: &LoopContext) -> Duration {
        ctx.core().config().default_async_job_acquire_wait_time()
    }
}

/// Claims timer jobs whose trigger time has passed.
#[derive(Debug, Default)]
pub struct AcquireTimerJobsLoop;

impl AcquisitionLoop for AcquireTimerJobsLoop {
    fn name(&self) -> &'static str {
        "timer-jobs"
    }

    fn run_cycle(&mut self, ctx: &LoopContext) -> Result<Duration, SchedulerError> {
        let cfg = ctx.core().config();
        acquire_batch(
            ctx,
            cfg.max_timer_jobs_per_acquisition,
            cfg.default_timer_job_acquire_wait_time(),
            |max| {
                ctx.core().store().lock_next_timer_jobs(
                    ctx.core().tenant_id(),
                    max,
                    now_ms(),
                    ctx.core().lock_owner(),
                    cfg.timer_lock_time(),
                )
            },
        )
    }

    fn backoff(&self, ctx: &LoopContext) -> Duration {
        ctx.core().config().default_timer_job_acquire_wait_time()
    }
}

/// Clears leases that elapsed without completion, one page per pass.
#[derive(Debug, Default)]
pub struct ResetExpiredJobsLoop;

impl AcquisitionLoop for ResetExpiredJobsLoop {
    fn name(&self) -> &'static str {
        "reset-expired-jobs"
    }

    fn run_cycle(&mut self, ctx: &LoopContext) -> Result<Duration, SchedulerError> {
        let cfg = ctx.core().config();
        let store = ctx.core().store();
        let expired = store.find_expired_locks(
            ctx.core().tenant_id(),
            now_ms(),
            cfg.reset_expired_jobs_page_size,
        )?;

        let mut reset = 0usize;
        for job in &expired {
            if store.clear_lock(job)? {
                reset += 1;
            }
        }
        if reset > 0 {
            info!(tenant_id = %ctx.core().tenant_id(), reset, "reset expired job locks");
        }

        // A full page means more may be waiting.
        if !expired.is_empty() && expired.len() >= cfg.reset_expired_jobs_page_size {
            Ok(Duration::ZERO)
        } else {
            Ok(cfg.reset_expired_jobs_interval())
        }
    }

    fn backoff(&self, ctx: &LoopContext) -> Duration {
        ctx.core().config().reset_expired_jobs_interval()
    }
}

fn acquire_batch(
    ctx: &LoopContext,
    batch_size: usize,
    idle_wait: Duration,
    claim: impl FnOnce(usize) -> Result<Vec<Job>, StoreError>,
) -> Result<Duration, SchedulerError> {
    let capacity = ctx.pool().remaining_capacity();
    if capacity == 0 {
        return Ok(ctx.core().config().default_queue_size_full_wait_time());
    }

    let max = batch_size.min(capacity);
    let jobs = claim(max)?;
    let acquired = jobs.len();
    debug!(tenant_id = %ctx.core().tenant_id(), acquired, max, "acquisition cycle");

    for job in jobs {
        if !ctx.submit_blocking(job) {
            return Ok(Duration::ZERO);
        }
    }

    if acquired < max {
        Ok(idle_wait)
    } else {
        Ok(Duration::ZERO)
    }
}

/// Drive `acquisition_loop` on a dedicated thread until the context's signal is raised.
pub(crate) fn spawn_loop(
    mut acquisition_loop: Box<dyn AcquisitionLoop>,
    ctx: Arc<LoopContext>,
) -> std::io::Result<JoinHandle<()>> {
    let thread_name = format!("{}-{}", ctx.core().tenant_id(), acquisition_loop.name());
    thread::Builder::new().name(thread_name).spawn(move || {
        let name = acquisition_loop.name();
        let tenant_id = ctx.core().tenant_id().clone();
        info!(tenant_id = %tenant_id, loop_name = name, "acquisition loop started");

        while !ctx.signal().is_stopped() {
            let wait = match acquisition_loop.run_cycle(&ctx) {
                Ok(wait) => wait,
                Err(e) => {
                    warn!(
                        tenant_id = %tenant_id,
                        loop_name = name,
                        error = %e,
                        "acquisition cycle failed, backing off"
                    );
                    acquisition_loop.backoff(&ctx)
                }
            };
            if ctx.signal().wait(wait) {
                break;
            }
        }

        info!(tenant_id = %tenant_id, loop_name = name, "acquisition loop stopped");
    })
}
