//! Executor and scheduler configuration structures.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::AppResult;
use crate::util::serde::TenantId;

const ENV_PREFIX: &str = "ASYNC_EXECUTOR_";

/// Tunables of a single-tenant executor.
///
/// Every executor holds its own copy; the dispatcher broadcasts changes to all of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Due jobs claimed per acquisition cycle.
    pub max_async_jobs_due_per_acquisition: usize,
    /// Timer jobs claimed per acquisition cycle.
    pub max_timer_jobs_per_acquisition: usize,
    /// Wait after a partial due-job batch.
    pub default_async_job_acquire_wait_time_ms: u64,
    /// Wait after a partial timer-job batch.
    pub default_timer_job_acquire_wait_time_ms: u64,
    /// Lease granted on claimed due jobs.
    pub async_job_lock_time_ms: u64,
    /// Lease granted on claimed timer jobs.
    pub timer_lock_time_ms: u64,
    /// Wait before retrying a submission into a full pool queue.
    pub default_queue_size_full_wait_time_ms: u64,
    /// Delay before a failed job becomes visible again.
    pub retry_wait_time_ms: u64,
    /// Interval of the expired-lock sweep.
    pub reset_expired_jobs_interval_ms: u64,
    /// Jobs reset per sweep pass.
    pub reset_expired_jobs_page_size: usize,
    /// Worker threads in the execution pool.
    pub pool_size: usize,
    /// Queued jobs the execution pool accepts beyond running ones.
    pub queue_size: usize,
    /// Retries given to jobs created through a job manager.
    pub default_job_retries: u32,
    /// How long shutdown waits for in-flight jobs.
    pub seconds_to_wait_on_shutdown: u64,
    /// Stack size for pool worker threads.
    pub thread_stack_size: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_async_jobs_due_per_acquisition: 1,
            max_timer_jobs_per_acquisition: 1,
            default_async_job_acquire_wait_time_ms: 10_000,
            default_timer_job_acquire_wait_time_ms: 10_000,
            async_job_lock_time_ms: 5 * 60 * 1000,
            timer_lock_time_ms: 5 * 60 * 1000,
            default_queue_size_full_wait_time_ms: 100,
            retry_wait_time_ms: 500,
            reset_expired_jobs_interval_ms: 60_000,
            reset_expired_jobs_page_size: 3,
            pool_size: num_cpus::get().clamp(2, 10),
            queue_size: 100,
            default_job_retries: 3,
            seconds_to_wait_on_shutdown: 60,
            thread_stack_size: 2 * 1024 * 1024,
        }
    }
}

impl ExecutorConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_async_jobs_due_per_acquisition == 0 {
            return Err("max_async_jobs_due_per_acquisition must be greater than 0".into());
        }
        if self.max_timer_jobs_per_acquisition == 0 {
            return Err("max_timer_jobs_per_acquisition must be greater than 0".into());
        }
        if self.async_job_lock_time_ms == 0 || self.timer_lock_time_ms == 0 {
            return Err("lock times must be greater than 0".into());
        }
        if self.reset_expired_jobs_page_size == 0 {
            return Err("reset_expired_jobs_page_size must be greater than 0".into());
        }
        if self.pool_size == 0 {
            return Err("pool_size must be greater than 0".into());
        }
        if self.queue_size == 0 {
            return Err("queue_size must be greater than 0".into());
        }
        if self.default_job_retries == 0 {
            return Err("default_job_retries must be greater than 0".into());
        }
        Ok(())
    }

    /// Defaults overlaid with `ASYNC_EXECUTOR_*` environment variables.
    ///
    /// A `.env` file in the working directory is loaded first if present.
    /// Variable names are the upper-cased field names, e.g.
    /// `ASYNC_EXECUTOR_MAX_ASYNC_JOBS_DUE_PER_ACQUISITION`.
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();
        overlay(
            &mut cfg.max_async_jobs_due_per_acquisition,
            "MAX_ASYNC_JOBS_DUE_PER_ACQUISITION",
        )?;
        overlay(&mut cfg.max_timer_jobs_per_acquisition, "MAX_TIMER_JOBS_PER_ACQUISITION")?;
        overlay(
            &mut cfg.default_async_job_acquire_wait_time_ms,
            "DEFAULT_ASYNC_JOB_ACQUIRE_WAIT_TIME_MS",
        )?;
        overlay(
            &mut cfg.default_timer_job_acquire_wait_time_ms,
            "DEFAULT_TIMER_JOB_ACQUIRE_WAIT_TIME_MS",
        )?;
        overlay(&mut cfg.async_job_lock_time_ms, "ASYNC_JOB_LOCK_TIME_MS")?;
        overlay(&mut cfg.timer_lock_time_ms, "TIMER_LOCK_TIME_MS")?;
        overlay(
            &mut cfg.default_queue_size_full_wait_time_ms,
            "DEFAULT_QUEUE_SIZE_FULL_WAIT_TIME_MS",
        )?;
        overlay(&mut cfg.retry_wait_time_ms, "RETRY_WAIT_TIME_MS")?;
        overlay(&mut cfg.reset_expired_jobs_interval_ms, "RESET_EXPIRED_JOBS_INTERVAL_MS")?;
        overlay(&mut cfg.reset_expired_jobs_page_size, "RESET_EXPIRED_JOBS_PAGE_SIZE")?;
        overlay(&mut cfg.pool_size, "POOL_SIZE")?;
        overlay(&mut cfg.queue_size, "QUEUE_SIZE")?;
        overlay(&mut cfg.default_job_retries, "DEFAULT_JOB_RETRIES")?;
        overlay(&mut cfg.seconds_to_wait_on_shutdown, "SECONDS_TO_WAIT_ON_SHUTDOWN")?;
        overlay(&mut cfg.thread_stack_size, "THREAD_STACK_SIZE")?;
        cfg.validate().map_err(anyhow::Error::msg)?;
        Ok(cfg)
    }

    /// Lease granted on claimed due jobs.
    #[must_use]
    pub const fn async_job_lock_time(&self) -> Duration {
        Duration::from_millis(self.async_job_lock_time_ms)
    }

    /// Lease granted on claimed timer jobs.
    #[must_use]
    pub const fn timer_lock_time(&self) -> Duration {
        Duration::from_millis(self.timer_lock_time_ms)
    }

    /// Wait after a partial due-job batch.
    #[must_use]
    pub const fn default_async_job_acquire_wait_time(&self) -> Duration {
        Duration::from_millis(self.default_async_job_acquire_wait_time_ms)
    }

    /// Wait after a partial timer-job batch.
    #[must_use]
    pub const fn default_timer_job_acquire_wait_time(&self) -> Duration {
        Duration::from_millis(self.default_timer_job_acquire_wait_time_ms)
    }

    /// Wait before retrying a submission into a full pool queue.
    #[must_use]
    pub const fn default_queue_size_full_wait_time(&self) -> Duration {
        Duration::from_millis(self.default_queue_size_full_wait_time_ms)
    }

    /// Delay before a failed job becomes visible again.
    #[must_use]
    pub const fn retry_wait_time(&self) -> Duration {
        Duration::from_millis(self.retry_wait_time_ms)
    }

    /// Interval of the expired-lock sweep.
    #[must_use]
    pub const fn reset_expired_jobs_interval(&self) -> Duration {
        Duration::from_millis(self.reset_expired_jobs_interval_ms)
    }

    /// How long shutdown waits for in-flight jobs.
    #[must_use]
    pub const fn shutdown_wait(&self) -> Duration {
        Duration::from_secs(self.seconds_to_wait_on_shutdown)
    }
}

fn overlay<T>(field: &mut T, name: &str) -> AppResult<()>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let key = format!("{ENV_PREFIX}{name}");
    if let Ok(raw) = env::var(&key) {
        *field = raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: `{raw}`"))?;
    }
    Ok(())
}

/// Root scheduler configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Configuration handed to every tenant executor.
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Tenants registered at build time.
    #[serde(default)]
    pub tenants: Vec<TenantId>,
    /// Start the dispatcher as soon as it is built.
    #[serde(default)]
    pub auto_activate: bool,
}

impl SchedulerConfig {
    /// Validate the executor configuration and tenant list.
    pub fn validate(&self) -> Result<(), String> {
        self.executor.validate()?;
        let mut seen = std::collections::HashSet::new();
        for tenant in &self.tenants {
            if tenant.as_str().is_empty() {
                return Err("tenant ids must not be empty".into());
            }
            if !seen.insert(tenant) {
                return Err(format!("tenant `{tenant}` listed twice"));
            }
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}
