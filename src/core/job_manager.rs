//! Tenant-scoped job creation and inspection.

use std::fmt;
use std::sync::Arc;

use crate::core::error::StoreError;
use crate::core::job::Job;
use crate::core::store::JobStore;
use crate::util::serde::{JobId, TenantId};

/// Creates and inspects jobs of one tenant.
///
/// Obtained from [`AsyncExecutor::job_manager`](crate::core::AsyncExecutor::job_manager).
#[derive(Clone)]
pub struct JobManager {
    tenant_id: TenantId,
    store: Arc<dyn JobStore>,
    default_retries: u32,
}

impl JobManager {
    /// Manager writing jobs of `tenant_id` into `store`.
    pub fn new(tenant_id: TenantId, store: Arc<dyn JobStore>, default_retries: u32) -> Self {
        Self {
            tenant_id,
            store,
            default_retries,
        }
    }

    /// Tenant this manager is bound to.
    #[must_use]
    pub const fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Create an async job that is due immediately.
    pub fn create_async_job(
        &self,
        job_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<Job, StoreError> {
        let job = Job::new_async(self.tenant_id.clone(), job_type, payload, self.default_retries);
        self.store.insert(job.clone())?;
        Ok(job)
    }

    /// Create a timer job firing at `due_at_ms`.
    pub fn create_timer_job(
        &self,
        job_type: impl Into<String>,
        payload: serde_json::Value,
        due_at_ms: u128,
    ) -> Result<Job, StoreError> {
        let job = Job::new_timer(
            self.tenant_id.clone(),
            job_type,
            payload,
            due_at_ms,
            self.default_retries,
        );
        self.store.insert(job.clone())?;
        Ok(job)
    }

    /// Look up a job of this tenant. Jobs of other tenants are not visible.
    pub fn find(&self, job_id: &JobId) -> Result<Option<Job>, StoreError> {
        Ok(self
            .store
            .find(job_id)?
            .filter(|job| job.tenant_id == self.tenant_id))
    }

    /// Dead jobs of this tenant.
    pub fn dead_jobs(&self) -> Result<Vec<Job>, StoreError> {
        self.store.find_dead_jobs(&self.tenant_id)
    }

    /// Release the lock held on `job` so acquisition can claim it again.
    ///
    /// Returns `false` if the lock changed since `job` was read.
    pub fn unacquire(&self, job: &Job) -> Result<bool, StoreError> {
        if job.tenant_id != self.tenant_id {
            return Err(StoreError::TenantMismatch {
                job: job.id,
                expected: self.tenant_id.clone(),
            });
        }
        self.store.clear_lock(job)
    }
}

impl fmt::Debug for JobManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobManager")
            .field("tenant_id", &self.tenant_id)
            .field("default_retries", &self.default_retries)
            .finish_non_exhaustive()
    }
}
