//! Error types for scheduler operations.

use thiserror::Error;

use crate::core::worker_pool::PoolError;
use crate::util::serde::{JobId, TenantId};

/// Errors produced by a [`JobStore`](crate::core::JobStore) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// No job with this identifier exists.
    #[error("job {0} not found")]
    NotFound(JobId),
    /// A job with this identifier already exists.
    #[error("job {0} already exists")]
    Duplicate(JobId),
    /// The caller's lock on the job is no longer the one on record.
    #[error("lock on job {0} was lost")]
    LockLost(JobId),
    /// The job belongs to another tenant.
    #[error("job {job} does not belong to tenant {expected}")]
    TenantMismatch {
        /// Job that was addressed.
        job: JobId,
        /// Tenant the caller is scoped to.
        expected: TenantId,
    },
}

/// Errors produced by scheduler components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No executor is registered for the tenant.
    #[error("tenant not found: {0}")]
    UnknownTenant(String),
    /// A tenant-scoped operation was invoked without a tenant.
    #[error("no tenant set in context")]
    NoTenantInContext,
    /// Operation is ambiguous at the aggregate level.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    /// A job was handed to the executor of another tenant.
    #[error("job of tenant {actual} submitted to executor of tenant {expected}")]
    TenantMismatch {
        /// Tenant owning the executor.
        expected: TenantId,
        /// Tenant owning the job.
        actual: TenantId,
    },
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Start or shutdown could not complete.
    #[error("lifecycle error: {0}")]
    Lifecycle(String),
    /// Execution pool failure.
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),
    /// Job store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Application-facing result using anyhow for higher-level contexts.
///
/// Job handlers return this so they can attach context freely.
pub type AppResult<T> = Result<T, anyhow::Error>;
