//! Multi-tenant facade over per-tenant executors.
//!
//! The dispatcher owns one [`AsyncExecutor`] per tenant. Tenant-scoped calls take a
//! [`TenantContext`] and are routed to that tenant's executor; configuration setters are
//! broadcast to every registered executor and recorded in the dispatcher's own copy,
//! which seeds executors added later.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::ExecutorConfig;
use crate::core::error::SchedulerError;
use crate::core::executor::AsyncExecutor;
use crate::core::handler::JobHandlerRegistry;
use crate::core::job::Job;
use crate::core::job_manager::JobManager;
use crate::core::store::JobStore;
use crate::core::tenant::{TenantContext, TenantDescriptor};
use crate::util::serde::TenantId;

/// Creates the executor of a newly added tenant.
pub trait TenantExecutorFactory: Send + Sync + 'static {
    /// Build a stopped executor for `tenant_id`.
    fn create_executor(
        &self,
        tenant_id: &TenantId,
        config: ExecutorConfig,
        store: Arc<dyn JobStore>,
        handlers: Arc<JobHandlerRegistry>,
    ) -> AsyncExecutor;
}

/// Builds executors with the standard components.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultExecutorFactory;

impl TenantExecutorFactory for DefaultExecutorFactory {
    fn create_executor(
        &self,
        tenant_id: &TenantId,
        config: ExecutorConfig,
        store: Arc<dyn JobStore>,
        handlers: Arc<JobHandlerRegistry>,
    ) -> AsyncExecutor {
        AsyncExecutor::new(tenant_id.clone(), config, store, handlers)
    }
}

fn duration_ms(value: Duration) -> u64 {
    u64::try_from(value.as_millis()).unwrap_or(u64::MAX)
}

/// Generates a per-tenant getter and a broadcast setter for a count field.
macro_rules! size_setting {
    ($(#[$doc:meta])* $field:ident, $setter:ident, $ty:ty) => {
        $(#[$doc])*
        ///
        /// # Errors
        ///
        /// Fails when the context names no registered tenant.
        pub fn $field(&self, ctx: &TenantContext) -> Result<$ty, SchedulerError> {
            Ok(self.determine_executor(ctx)?.config().$field)
        }

        /// Broadcast a new value to every registered executor.
        ///
        /// # Errors
        ///
        /// `InvalidConfig` if the value does not validate; nothing changes then.
        pub fn $setter(&self, value: $ty) -> Result<(), SchedulerError> {
            self.broadcast(|cfg| cfg.$field = value)
        }
    };
}

/// Generates a per-tenant getter and a broadcast setter for a millisecond field.
macro_rules! duration_setting {
    ($(#[$doc:meta])* $getter:ident, $setter:ident, $field:ident) => {
        $(#[$doc])*
        ///
        /// # Errors
        ///
        /// Fails when the context names no registered tenant.
        pub fn $getter(&self, ctx: &TenantContext) -> Result<Duration, SchedulerError> {
            Ok(self.determine_executor(ctx)?.config().$getter())
        }

        /// Broadcast a new value to every registered executor.
        ///
        /// # Errors
        ///
        /// `InvalidConfig` if the value does not validate; nothing changes then.
        pub fn $setter(&self, value: Duration) -> Result<(), SchedulerError> {
            let millis = duration_ms(value);
            self.broadcast(|cfg| cfg.$field = millis)
        }
    };
}

/// Routes scheduler operations to the executor of the calling tenant.
pub struct TenantExecutorDispatcher {
    store: Arc<dyn JobStore>,
    handlers: Arc<JobHandlerRegistry>,
    factory: Arc<dyn TenantExecutorFactory>,
    config: RwLock<ExecutorConfig>,
    executors: RwLock<HashMap<TenantId, Arc<AsyncExecutor>>>,
    active: AtomicBool,
    auto_activate: AtomicBool,
    /// Serializes aggregate start and shutdown.
    lifecycle: Mutex<()>,
    /// Orders tenant registration against configuration broadcasts.
    registration: Mutex<()>,
}

impl TenantExecutorDispatcher {
    /// Dispatcher creating executors with [`DefaultExecutorFactory`].
    pub fn new(
        config: ExecutorConfig,
        store: Arc<dyn JobStore>,
        handlers: Arc<JobHandlerRegistry>,
    ) -> Self {
        Self::with_factory(config, store, handlers, Arc::new(DefaultExecutorFactory))
    }

    /// Dispatcher creating executors with `factory`.
    pub fn with_factory(
        config: ExecutorConfig,
        store: Arc<dyn JobStore>,
        handlers: Arc<JobHandlerRegistry>,
        factory: Arc<dyn TenantExecutorFactory>,
    ) -> Self {
        Self {
            store,
            handlers,
            factory,
            config: RwLock::new(config),
            executors: RwLock::new(HashMap::new()),
            active: AtomicBool::new(false),
            auto_activate: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
            registration: Mutex::new(()),
        }
    }

    /// Create, configure and register the executor of `tenant_id`, replacing any
    /// existing one. The replaced executor is shut down.
    ///
    /// # Errors
    ///
    /// `Lifecycle` if the factory built an executor for another tenant or `start`
    /// fails; `InvalidConfig` if the stored configuration does not validate.
    pub fn add_tenant_executor(
        &self,
        tenant_id: impl Into<TenantId>,
        start: bool,
    ) -> Result<(), SchedulerError> {
        let tenant_id = tenant_id.into();
        // Held until the executor is visible to broadcasts.
        let registration = self.registration.lock();
        let config = self.config();
        let executor = self.factory.create_executor(
            &tenant_id,
            config.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.handlers),
        );
        if executor.tenant_id() != &tenant_id {
            return Err(SchedulerError::Lifecycle(format!(
                "factory built an executor for tenant {} instead of {tenant_id}",
                executor.tenant_id()
            )));
        }
        executor.set_config(config)?;

        let executor = Arc::new(executor);
        let replaced = self
            .executors
            .write()
            .insert(tenant_id.clone(), Arc::clone(&executor));
        drop(registration);
        info!(tenant_id = %tenant_id, replaced = replaced.is_some(), "tenant executor added");

        if let Some(old) = replaced {
            if let Err(e) = old.shutdown() {
                warn!(
                    tenant_id = %tenant_id,
                    error = %e,
                    "replaced executor did not shut down cleanly"
                );
            }
        }
        if start {
            executor.start()?;
        }
        Ok(())
    }

    /// Shut down and unregister the executor of `tenant_id`.
    ///
    /// # Errors
    ///
    /// `UnknownTenant` if no executor is registered; `Lifecycle` from its shutdown.
    pub fn remove_tenant_executor(&self, tenant_id: &TenantId) -> Result<(), SchedulerError> {
        let removed = self
            .executors
            .write()
            .remove(tenant_id)
            .ok_or_else(|| SchedulerError::UnknownTenant(tenant_id.to_string()))?;
        info!(tenant_id = %tenant_id, "tenant executor removed");
        removed.shutdown()
    }

    /// Registered tenants, sorted.
    #[must_use]
    pub fn tenant_ids(&self) -> Vec<TenantId> {
        let mut ids: Vec<_> = self.executors.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Executor of `tenant_id`, without going through a context.
    #[must_use]
    pub fn tenant_executor(&self, tenant_id: &TenantId) -> Option<Arc<AsyncExecutor>> {
        self.executors.read().get(tenant_id).cloned()
    }

    /// Registered tenants with their executor state, sorted by tenant.
    #[must_use]
    pub fn tenants(&self) -> Vec<TenantDescriptor> {
        let mut tenants: Vec<_> = self
            .executors
            .read()
            .iter()
            .map(|(tenant_id, executor)| TenantDescriptor {
                tenant_id: tenant_id.clone(),
                state: executor.state(),
            })
            .collect();
        tenants.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        tenants
    }

    /// Executor of the tenant named by `ctx`.
    ///
    /// # Errors
    ///
    /// `NoTenantInContext` for an unscoped context, `UnknownTenant` if the tenant has
    /// no registered executor.
    pub fn determine_executor(
        &self,
        ctx: &TenantContext,
    ) -> Result<Arc<AsyncExecutor>, SchedulerError> {
        let tenant_id = ctx.require_tenant()?;
        self.tenant_executor(tenant_id)
            .ok_or_else(|| SchedulerError::UnknownTenant(tenant_id.to_string()))
    }

    /// Hand `job` to the executor of the calling tenant.
    ///
    /// # Errors
    ///
    /// Routing errors, plus whatever [`AsyncExecutor::execute_job`] reports.
    pub fn execute_job(&self, ctx: &TenantContext, job: &Job) -> Result<bool, SchedulerError> {
        self.determine_executor(ctx)?.execute_job(job)
    }

    /// Free pool slots of the calling tenant's executor.
    ///
    /// # Errors
    ///
    /// Routing errors.
    pub fn remaining_capacity(&self, ctx: &TenantContext) -> Result<usize, SchedulerError> {
        Ok(self.determine_executor(ctx)?.remaining_capacity())
    }

    /// Lock owner of the calling tenant's executor.
    ///
    /// # Errors
    ///
    /// Routing errors.
    pub fn lock_owner(&self, ctx: &TenantContext) -> Result<String, SchedulerError> {
        Ok(self.determine_executor(ctx)?.lock_owner().to_owned())
    }

    /// Always fails: there is no single job manager across tenants. Use
    /// [`AsyncExecutor::job_manager`] on a specific tenant's executor.
    ///
    /// # Errors
    ///
    /// Always `Unsupported`.
    pub fn job_manager(&self) -> Result<JobManager, SchedulerError> {
        Err(SchedulerError::Unsupported(
            "job manager is per tenant; resolve the tenant executor first",
        ))
    }

    /// Start every registered executor.
    ///
    /// Every tenant is attempted; the dispatcher becomes active only if all started.
    ///
    /// # Errors
    ///
    /// The first start error encountered.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let _guard = self.lifecycle.lock();
        let mut first_error = None;
        for executor in self.executors_snapshot() {
            if let Err(e) = executor.start() {
                warn!(
                    tenant_id = %executor.tenant_id(),
                    error = %e,
                    "tenant executor failed to start"
                );
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        self.active.store(true, Ordering::Release);
        info!(tenants = self.executors.read().len(), "dispatcher started");
        Ok(())
    }

    /// Shut down every registered executor. Calling this twice is harmless.
    ///
    /// # Errors
    ///
    /// The first shutdown error encountered; all executors are still stopped.
    pub fn shutdown(&self) -> Result<(), SchedulerError> {
        let _guard = self.lifecycle.lock();
        let mut first_error = None;
        for executor in self.executors_snapshot() {
            if let Err(e) = executor.shutdown() {
                warn!(
                    tenant_id = %executor.tenant_id(),
                    error = %e,
                    "tenant executor shutdown failed"
                );
                first_error.get_or_insert(e);
            }
        }
        if self.active.swap(false, Ordering::AcqRel) {
            info!("dispatcher shut down");
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Whether the dispatcher has been started and not shut down since.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Whether the embedding application should start the dispatcher on boot.
    #[must_use]
    pub fn auto_activate(&self) -> bool {
        self.auto_activate.load(Ordering::Acquire)
    }

    /// Record the auto-activation preference.
    pub fn set_auto_activate(&self, auto_activate: bool) {
        self.auto_activate.store(auto_activate, Ordering::Release);
    }

    /// The stored configuration handed to executors created from now on.
    #[must_use]
    pub fn config(&self) -> ExecutorConfig {
        self.config.read().clone()
    }

    /// Replace the whole configuration on the dispatcher and every executor.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if `config` does not validate.
    pub fn set_config(&self, config: ExecutorConfig) -> Result<(), SchedulerError> {
        self.broadcast(|cfg| *cfg = config.clone())
    }

    size_setting!(
        /// Due jobs claimed per acquisition cycle by the calling tenant.
        max_async_jobs_due_per_acquisition,
        set_max_async_jobs_due_per_acquisition,
        usize
    );
    size_setting!(
        /// Timer jobs claimed per acquisition cycle by the calling tenant.
        max_timer_jobs_per_acquisition,
        set_max_timer_jobs_per_acquisition,
        usize
    );
    size_setting!(
        /// Expired locks cleared per sweep pass by the calling tenant.
        reset_expired_jobs_page_size,
        set_reset_expired_jobs_page_size,
        usize
    );
    size_setting!(
        /// Worker threads of the calling tenant's pool. Changes apply on next start.
        pool_size,
        set_pool_size,
        usize
    );
    size_setting!(
        /// Queue length of the calling tenant's pool. Changes apply on next start.
        queue_size,
        set_queue_size,
        usize
    );

    duration_setting!(
        /// Wait after a partial due-job batch.
        default_async_job_acquire_wait_time,
        set_default_async_job_acquire_wait_time,
        default_async_job_acquire_wait_time_ms
    );
    duration_setting!(
        /// Wait after a partial timer-job batch.
        default_timer_job_acquire_wait_time,
        set_default_timer_job_acquire_wait_time,
        default_timer_job_acquire_wait_time_ms
    );
    duration_setting!(
        /// Lease on claimed due jobs.
        async_job_lock_time,
        set_async_job_lock_time,
        async_job_lock_time_ms
    );
    duration_setting!(
        /// Lease on claimed timer jobs.
        timer_lock_time,
        set_timer_lock_time,
        timer_lock_time_ms
    );
    duration_setting!(
        /// Wait before retrying a submission into a full queue.
        default_queue_size_full_wait_time,
        set_default_queue_size_full_wait_time,
        default_queue_size_full_wait_time_ms
    );
    duration_setting!(
        /// Delay before a failed job is retried.
        retry_wait_time,
        set_retry_wait_time,
        retry_wait_time_ms
    );
    duration_setting!(
        /// Interval of the expired-lock sweep.
        reset_expired_jobs_interval,
        set_reset_expired_jobs_interval,
        reset_expired_jobs_interval_ms
    );

    fn executors_snapshot(&self) -> Vec<Arc<AsyncExecutor>> {
        self.executors.read().values().cloned().collect()
    }

    /// Apply `update` to the stored configuration, then to every registered executor.
    fn broadcast<F>(&self, update: F) -> Result<(), SchedulerError>
    where
        F: Fn(&mut ExecutorConfig),
    {
        let _registration = self.registration.lock();
        {
            let mut stored = self.config.write();
            let mut next = stored.clone();
            update(&mut next);
            next.validate().map_err(SchedulerError::InvalidConfig)?;
            *stored = next;
        }

        let executors = self.executors_snapshot();
        for executor in &executors {
            executor.update_config(&update)?;
        }
        debug!(executors = executors.len(), "configuration broadcast");
        Ok(())
    }
}
