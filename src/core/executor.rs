//! Single-tenant asynchronous job executor.
//!
//! An [`AsyncExecutor`] owns, while running, three acquisition loops and one bounded
//! [`ExecutionPool`]. All of them share an [`ExecutorCore`]: the tenant, the lock
//! owner, the store, the handler registry and the live configuration.
//!
//! # Lifecycle
//!
//! ```text
//! Stopped -> Starting -> Running -> ShuttingDown -> Stopped
//! ```
//!
//! Shutdown stops the loops first, then drains the pool. Jobs that were queued but
//! not started keep their locks; the expired-lock sweep recovers them later.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ExecutorConfig;
use crate::core::acquisition::{
    spawn_loop, AcquireDueJobsLoop, AcquireTimerJobsLoop, AcquisitionLoop, LoopContext,
    ResetExpiredJobsLoop,
};
use crate::core::error::SchedulerError;
use crate::core::handler::JobHandlerRegistry;
use crate::core::job::{Job, JobKind};
use crate::core::job_manager::JobManager;
use crate::core::runner::{ExecuteJobRunner, JobRunner};
use crate::core::store::JobStore;
use crate::core::worker_pool::{ExecutionPool, PoolStats};
use crate::util::clock::now_ms;
use crate::util::serde::{new_lock_owner, TenantId};

/// Lifecycle state of an [`AsyncExecutor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ExecutorState {
    /// Not running; `start()` may be called.
    Stopped = 0,
    /// Loops and pool are being created.
    Starting = 1,
    /// Loops are acquiring and the pool is executing.
    Running = 2,
    /// Loops are stopping and the pool is draining.
    ShuttingDown = 3,
}

impl ExecutorState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::ShuttingDown,
            _ => Self::Stopped,
        }
    }
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::ShuttingDown => "shutting_down",
        };
        f.write_str(label)
    }
}

/// State shared by the loops, the job runner and the executor handle.
pub struct ExecutorCore {
    tenant_id: TenantId,
    lock_owner: String,
    store: Arc<dyn JobStore>,
    handlers: Arc<JobHandlerRegistry>,
    config: RwLock<ExecutorConfig>,
}

impl ExecutorCore {
    /// Core for `tenant_id` with a fresh lock owner.
    pub fn new(
        tenant_id: TenantId,
        config: ExecutorConfig,
        store: Arc<dyn JobStore>,
        handlers: Arc<JobHandlerRegistry>,
    ) -> Self {
        Self {
            tenant_id,
            lock_owner: new_lock_owner(),
            store,
            handlers,
            config: RwLock::new(config),
        }
    }

    /// Tenant served by this executor.
    #[must_use]
    pub const fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Identifier written into every lock this executor takes.
    #[must_use]
    pub fn lock_owner(&self) -> &str {
        &self.lock_owner
    }

    /// Shared job store.
    #[must_use]
    pub fn store(&self) -> &dyn JobStore {
        self.store.as_ref()
    }

    /// Handlers available to the job runner.
    #[must_use]
    pub fn handlers(&self) -> &JobHandlerRegistry {
        &self.handlers
    }

    /// Snapshot of the current configuration.
    #[must_use]
    pub fn config(&self) -> ExecutorConfig {
        self.config.read().clone()
    }

    fn update_config<F>(&self, update: F) -> Result<(), SchedulerError>
    where
        F: FnOnce(&mut ExecutorConfig),
    {
        let mut config = self.config.write();
        let mut next = config.clone();
        update(&mut next);
        next.validate().map_err(SchedulerError::InvalidConfig)?;
        *config = next;
        Ok(())
    }
}

/// Factory for the parts of an executor run.
///
/// Every method has a default, so an implementation only overrides what it changes.
pub trait ExecutorComponents: Send + Sync + 'static {
    /// Loop claiming due async jobs.
    fn due_jobs_loop(&self) -> Box<dyn AcquisitionLoop> {
        Box::new(AcquireDueJobsLoop)
    }

    /// Loop claiming timer jobs.
    fn timer_jobs_loop(&self) -> Box<dyn AcquisitionLoop> {
        Box::new(AcquireTimerJobsLoop)
    }

    /// Loop clearing expired locks.
    fn reset_expired_jobs_loop(&self) -> Box<dyn AcquisitionLoop> {
        Box::new(ResetExpiredJobsLoop)
    }

    /// Runner executing claimed jobs on pool workers.
    fn job_runner(&self, core: Arc<ExecutorCore>) -> Arc<dyn JobRunner> {
        Arc::new(ExecuteJobRunner::new(core))
    }
}

/// The standard loops and runner.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultComponents;

impl ExecutorComponents for DefaultComponents {}

struct RunningExecutor {
    ctx: Arc<LoopContext>,
    loops: Vec<JoinHandle<()>>,
}

/// Executor for the jobs of one tenant.
pub struct AsyncExecutor {
    core: Arc<ExecutorCore>,
    components: Arc<dyn ExecutorComponents>,
    state: AtomicU8,
    /// Held across start and shutdown so they never interleave.
    run: Mutex<Option<RunningExecutor>>,
}

impl AsyncExecutor {
    /// Executor with the standard components.
    pub fn new(
        tenant_id: impl Into<TenantId>,
        config: ExecutorConfig,
        store: Arc<dyn JobStore>,
        handlers: Arc<JobHandlerRegistry>,
    ) -> Self {
        Self::with_components(tenant_id, config, store, handlers, Arc::new(DefaultComponents))
    }

    /// Executor with custom loops or runner.
    pub fn with_components(
        tenant_id: impl Into<TenantId>,
        config: ExecutorConfig,
        store: Arc<dyn JobStore>,
        handlers: Arc<JobHandlerRegistry>,
        components: Arc<dyn ExecutorComponents>,
    ) -> Self {
        Self {
            core: Arc::new(ExecutorCore::new(tenant_id.into(), config, store, handlers)),
            components,
            state: AtomicU8::new(ExecutorState::Stopped as u8),
            run: Mutex::new(None),
        }
    }

    /// Tenant served by this executor.
    #[must_use]
    pub fn tenant_id(&self) -> &TenantId {
        self.core.tenant_id()
    }

    /// Identifier written into every lock this executor takes.
    #[must_use]
    pub fn lock_owner(&self) -> &str {
        self.core.lock_owner()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ExecutorState {
        ExecutorState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ExecutorState) {
        self.state.store(state as u8, Ordering::Release);
        debug!(tenant_id = %self.core.tenant_id(), %state, "executor state changed");
    }

    /// Start the pool and the three loops. No-op when already running.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the configuration does not validate, `Pool` or `Lifecycle` if
    /// threads cannot be created. The executor is left stopped on error.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut run = self.run.lock();
        if run.is_some() {
            return Ok(());
        }

        self.set_state(ExecutorState::Starting);
        match self.launch() {
            Ok(running) => {
                *run = Some(running);
                self.set_state(ExecutorState::Running);
                info!(
                    tenant_id = %self.core.tenant_id(),
                    lock_owner = %self.core.lock_owner(),
                    "async executor started"
                );
                Ok(())
            }
            Err(e) => {
                self.set_state(ExecutorState::Stopped);
                warn!(
                    tenant_id = %self.core.tenant_id(),
                    error = %e,
                    "async executor failed to start"
                );
                Err(e)
            }
        }
    }

    fn launch(&self) -> Result<RunningExecutor, SchedulerError> {
        let config = self.core.config();
        config.validate().map_err(SchedulerError::InvalidConfig)?;

        let runner = self.components.job_runner(Arc::clone(&self.core));
        let pool = ExecutionPool::new(self.core.tenant_id().as_str(), &config, runner)?;
        let ctx = Arc::new(LoopContext::new(Arc::clone(&self.core), Arc::new(pool)));

        let loops = [
            self.components.due_jobs_loop(),
            self.components.timer_jobs_loop(),
            self.components.reset_expired_jobs_loop(),
        ];
        let mut handles = Vec::with_capacity(loops.len());
        for acquisition_loop in loops {
            let name = acquisition_loop.name();
            match spawn_loop(acquisition_loop, Arc::clone(&ctx)) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    ctx.signal().stop();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    ctx.pool().shutdown();
                    return Err(SchedulerError::Lifecycle(format!(
                        "failed to spawn {name} loop: {e}"
                    )));
                }
            }
        }

        Ok(RunningExecutor { ctx, loops: handles })
    }

    /// Stop the loops, then drain the pool. No-op when not running.
    ///
    /// # Errors
    ///
    /// `Lifecycle` if a loop thread panicked. Teardown still completes.
    pub fn shutdown(&self) -> Result<(), SchedulerError> {
        let mut run = self.run.lock();
        let Some(running) = run.take() else {
            return Ok(());
        };

        self.set_state(ExecutorState::ShuttingDown);
        info!(tenant_id = %self.core.tenant_id(), "shutting down async executor");

        running.ctx.signal().stop();
        let mut panicked = 0usize;
        for handle in running.loops {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        running.ctx.pool().shutdown();

        self.set_state(ExecutorState::Stopped);
        info!(tenant_id = %self.core.tenant_id(), "async executor shut down");

        if panicked > 0 {
            return Err(SchedulerError::Lifecycle(format!(
                "{panicked} acquisition loop(s) of tenant {} panicked",
                self.core.tenant_id()
            )));
        }
        Ok(())
    }

    fn running_context(&self) -> Option<Arc<LoopContext>> {
        self.run.lock().as_ref().map(|running| Arc::clone(&running.ctx))
    }

    /// Claim `job` and hand it straight to the pool, bypassing the loops.
    ///
    /// Returns `Ok(false)` when the executor is not running, the job is not claimable or
    /// the pool queue is full; the job then stays with acquisition.
    ///
    /// # Errors
    ///
    /// `TenantMismatch` for a job of another tenant, `Store` if the claim fails.
    pub fn execute_job(&self, job: &Job) -> Result<bool, SchedulerError> {
        if &job.tenant_id != self.core.tenant_id() {
            return Err(SchedulerError::TenantMismatch {
                expected: self.core.tenant_id().clone(),
                actual: job.tenant_id.clone(),
            });
        }
        let Some(ctx) = self.running_context() else {
            return Ok(false);
        };
        if ctx.pool().remaining_capacity() == 0 {
            return Ok(false);
        }

        let config = self.core.config();
        let lock_time = match job.kind {
            JobKind::Async => config.async_job_lock_time(),
            JobKind::Timer => config.timer_lock_time(),
        };
        let store = self.core.store();
        let Some(claimed) = store.lock_job(
            self.core.tenant_id(),
            &job.id,
            now_ms(),
            self.core.lock_owner(),
            lock_time,
        )?
        else {
            return Ok(false);
        };

        match ctx.pool().try_submit(claimed) {
            Ok(()) => Ok(true),
            Err(rejected) => {
                let claimed = rejected.into_job();
                debug!(
                    tenant_id = %self.core.tenant_id(),
                    job_id = %claimed.id,
                    "pool rejected job, releasing claim"
                );
                store.clear_lock(&claimed)?;
                Ok(false)
            }
        }
    }

    /// Free slots in the pool queue. Zero when not running.
    #[must_use]
    pub fn remaining_capacity(&self) -> usize {
        self.running_context()
            .map_or(0, |ctx| ctx.pool().remaining_capacity())
    }

    /// Pool statistics of the current run, if running.
    #[must_use]
    pub fn stats(&self) -> Option<PoolStats> {
        self.running_context().map(|ctx| ctx.pool().stats())
    }

    /// Snapshot of the current configuration.
    #[must_use]
    pub fn config(&self) -> ExecutorConfig {
        self.core.config()
    }

    /// Apply `update` to the configuration. Loops see the result on their next cycle.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the updated configuration does not validate; nothing changes.
    pub fn update_config<F>(&self, update: F) -> Result<(), SchedulerError>
    where
        F: FnOnce(&mut ExecutorConfig),
    {
        self.core.update_config(update)
    }

    /// Replace the whole configuration.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if `config` does not validate.
    pub fn set_config(&self, config: ExecutorConfig) -> Result<(), SchedulerError> {
        self.core.update_config(|current| *current = config)
    }

    /// Job manager scoped to this executor's tenant.
    #[must_use]
    pub fn job_manager(&self) -> JobManager {
        JobManager::new(
            self.core.tenant_id().clone(),
            Arc::clone(&self.core.store),
            self.core.config().default_job_retries,
        )
    }
}

impl Drop for AsyncExecutor {
    fn drop(&mut self) {
        // Signal only; joining here could block on a slow store call. The pool goes
        // away once the last loop lets go of the context.
        if let Some(running) = self.run.get_mut().take() {
            running.ctx.signal().stop();
        }
    }
}

impl fmt::Debug for AsyncExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncExecutor")
            .field("tenant_id", self.core.tenant_id())
            .field("lock_owner", &self.core.lock_owner())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::store::InMemoryJobStore;
    use serde_json::json;

    fn executor(store: Arc<InMemoryJobStore>) -> AsyncExecutor {
        let config = ExecutorConfig {
            pool_size: 1,
            queue_size: 2,
            seconds_to_wait_on_shutdown: 1,
            ..ExecutorConfig::default()
        };
        AsyncExecutor::new("acme", config, store, Arc::new(JobHandlerRegistry::new()))
    }

    #[test]
    fn state_round_trips_through_u8() {
        for state in [
            ExecutorState::Stopped,
            ExecutorState::Starting,
            ExecutorState::Running,
            ExecutorState::ShuttingDown,
        ] {
            assert_eq!(ExecutorState::from_u8(state as u8), state);
        }
        assert_eq!(ExecutorState::ShuttingDown.to_string(), "shutting_down");
    }

    #[test]
    fn execute_job_rejects_foreign_tenant() {
        let executor = executor(Arc::new(InMemoryJobStore::new()));
        let job = Job::new_async(TenantId::from("globex"), "a", json!({}), 1);
        assert!(matches!(
            executor.execute_job(&job),
            Err(SchedulerError::TenantMismatch { .. })
        ));
    }

    #[test]
    fn stopped_executor_has_no_capacity_and_declines_jobs() {
        let store = Arc::new(InMemoryJobStore::new());
        let executor = executor(Arc::clone(&store));
        let job = Job::new_async(TenantId::from("acme"), "a", json!({}), 1);
        store.insert(job.clone()).unwrap();

        assert_eq!(executor.state(), ExecutorState::Stopped);
        assert_eq!(executor.remaining_capacity(), 0);
        assert!(!executor.execute_job(&job).unwrap());
        assert!(executor.stats().is_none());
        assert_eq!(store.locked_count(), 0);
    }

    #[test]
    fn invalid_update_leaves_config_untouched() {
        let executor = executor(Arc::new(InMemoryJobStore::new()));
        let err = executor
            .update_config(|cfg| cfg.max_async_jobs_due_per_acquisition = 0)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidConfig(_)));
        assert_eq!(executor.config().max_async_jobs_due_per_acquisition, 1);

        executor
            .update_config(|cfg| cfg.max_async_jobs_due_per_acquisition = 5)
            .unwrap();
        assert_eq!(executor.config().max_async_jobs_due_per_acquisition, 5);
    }

    #[test]
    fn start_and_shutdown_are_idempotent() {
        let executor = executor(Arc::new(InMemoryJobStore::new()));
        executor.start().unwrap();
        executor.start().unwrap();
        assert_eq!(executor.state(), ExecutorState::Running);
        assert_eq!(executor.remaining_capacity(), 2);

        executor.shutdown().unwrap();
        executor.shutdown().unwrap();
        assert_eq!(executor.state(), ExecutorState::Stopped);
    }

    #[test]
    fn each_executor_gets_its_own_lock_owner() {
        let store = Arc::new(InMemoryJobStore::new());
        let a = executor(Arc::clone(&store));
        let b = executor(store);
        assert_ne!(a.lock_owner(), b.lock_owner());
    }
}
