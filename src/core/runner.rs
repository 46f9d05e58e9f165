//! Execution of a single claimed job on a pool worker.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error, warn};

use crate::core::error::AppResult;
use crate::core::executor::ExecutorCore;
use crate::core::job::{FailureOutcome, Job};
use crate::core::worker_pool::JobOutcome;
use crate::util::clock::{after_ms, now_ms};

/// Runs a claimed job and records its outcome in the store.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    /// Execute `job`, which is locked by the owning executor.
    async fn run(&self, job: Job) -> JobOutcome;
}

/// Default runner: resolve the handler by job type, execute it, record the result.
pub struct ExecuteJobRunner {
    core: Arc<ExecutorCore>,
}

impl ExecuteJobRunner {
    /// Runner bound to an executor's store, handlers and configuration.
    #[must_use]
    pub const fn new(core: Arc<ExecutorCore>) -> Self {
        Self { core }
    }

    async fn invoke_handler(&self, job: &Job) -> AppResult<()> {
        let Some(handler) = self.core.handlers().get(&job.job_type) else {
            return Err(anyhow!("no handler registered for job type `{}`", job.job_type));
        };
        match AssertUnwindSafe(handler.execute(job)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(anyhow!("handler panicked: {}", panic_message(panic.as_ref()))),
        }
    }
}

#[async_trait]
impl JobRunner for ExecuteJobRunner {
    async fn run(&self, job: Job) -> JobOutcome {
        let tenant_id = self.core.tenant_id();
        let store = self.core.store();

        match self.invoke_handler(&job).await {
            Ok(()) => match store.mark_succeeded(&job) {
                Ok(()) => {
                    debug!(
                        tenant_id = %tenant_id,
                        job_id = %job.id,
                        job_type = %job.job_type,
                        "job succeeded"
                    );
                    JobOutcome::Succeeded
                }
                Err(e) => {
                    warn!(
                        tenant_id = %tenant_id,
                        job_id = %job.id,
                        error = %e,
                        "could not record job success"
                    );
                    JobOutcome::Abandoned
                }
            },
            Err(failure) => {
                let detail = format!("{failure:#}");
                let retry_at = after_ms(now_ms(), self.core.config().retry_wait_time());
                match store.mark_failed(&job, &detail, retry_at) {
                    Ok(FailureOutcome::Retry { retries_remaining }) => {
                        warn!(
                            tenant_id = %tenant_id,
                            job_id = %job.id,
                            job_type = %job.job_type,
                            retries_remaining,
                            error = %detail,
                            "job failed, scheduled for retry"
                        );
                        JobOutcome::Retrying
                    }
                    Ok(FailureOutcome::Dead) => {
                        error!(
                            tenant_id = %tenant_id,
                            job_id = %job.id,
                            job_type = %job.job_type,
                            error = %detail,
                            "job failed with no retries left"
                        );
                        JobOutcome::Dead
                    }
                    Err(e) => {
                        warn!(
                            tenant_id = %tenant_id,
                            job_id = %job.id,
                            error = %e,
                            "could not record job failure"
                        );
                        JobOutcome::Abandoned
                    }
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
