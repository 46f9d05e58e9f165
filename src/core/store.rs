//! The persistent job store the scheduler runs against.

use std::time::Duration;

use crate::core::error::StoreError;
use crate::core::job::{FailureOutcome, Job};
use crate::util::serde::{JobId, TenantId};

/// Lockable, tenant-scoped collection of due and timer jobs.
///
/// Every claim must be atomic with respect to the store: the scheduler never relies on
/// in-process mutual exclusion, so two executors (possibly in different processes)
/// racing for the same job must see exactly one claim succeed.
pub trait JobStore: Send + Sync {
    /// Persist a new job.
    fn insert(&self, job: Job) -> Result<(), StoreError>;

    /// Look up a job by identifier.
    fn find(&self, job_id: &JobId) -> Result<Option<Job>, StoreError>;

    /// Dead jobs of a tenant, for operator inspection.
    fn find_dead_jobs(&self, tenant_id: &TenantId) -> Result<Vec<Job>, StoreError>;

    /// Claim up to `max_count` unlocked due async jobs of `tenant_id`.
    ///
    /// Each returned job carries `owner` and a lock expiring at `now_ms + lock_duration`.
    fn lock_next_due_jobs(
        &self,
        tenant_id: &TenantId,
        max_count: usize,
        now_ms: u128,
        owner: &str,
        lock_duration: Duration,
    ) -> Result<Vec<Job>, StoreError>;

    /// Claim up to `max_count` unlocked timer jobs of `tenant_id` whose trigger time has passed.
    fn lock_next_timer_jobs(
        &self,
        tenant_id: &TenantId,
        max_count: usize,
        now_ms: u128,
        owner: &str,
        lock_duration: Duration,
    ) -> Result<Vec<Job>, StoreError>;

    /// Claim a single job. `Ok(None)` signals contention and is not an error.
    fn lock_job(
        &self,
        tenant_id: &TenantId,
        job_id: &JobId,
        now_ms: u128,
        owner: &str,
        lock_duration: Duration,
    ) -> Result<Option<Job>, StoreError>;

    /// Up to `page_size` jobs of `tenant_id` whose lease elapsed at or before `now_ms`.
    fn find_expired_locks(
        &self,
        tenant_id: &TenantId,
        now_ms: u128,
        page_size: usize,
    ) -> Result<Vec<Job>, StoreError>;

    /// Clear the lock recorded on `job`, provided it is still the one observed.
    ///
    /// Returns `false` when the job is gone or was re-locked in the meantime.
    fn clear_lock(&self, job: &Job) -> Result<bool, StoreError>;

    /// Remove a successfully executed job.
    fn mark_succeeded(&self, job: &Job) -> Result<(), StoreError>;

    /// Record a handler failure: decrement retries and release the lock, making the
    /// job visible again at `retry_at_ms`, or finalize it as dead.
    fn mark_failed(
        &self,
        job: &Job,
        error: &str,
        retry_at_ms: u128,
    ) -> Result<FailureOutcome, StoreError>;
}
