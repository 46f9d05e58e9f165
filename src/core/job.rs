//! Job records as seen by the scheduler.

use serde::{Deserialize, Serialize};

use crate::util::clock::now_ms;
use crate::util::serde::{new_job_id, JobId, TenantId};

/// Which acquisition queue a job belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Due as soon as it is visible; picked up by the due-job loop.
    Async,
    /// Fires at its trigger time; picked up by the timer-job loop.
    Timer,
}

/// Persisted job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Eligible for acquisition once due and unlocked.
    Executable,
    /// Retries exhausted; kept for operator inspection only.
    Dead,
}

/// Result of recording a handler failure against a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// The job will become acquirable again at its retry-visible-at time.
    Retry {
        /// Retries left after this failure.
        retries_remaining: u32,
    },
    /// The job is terminal.
    Dead,
}

/// Unit of work owned by exactly one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Job identifier.
    pub id: JobId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Acquisition queue.
    pub kind: JobKind,
    /// Handler discriminator.
    pub job_type: String,
    /// Opaque handler input.
    pub payload: serde_json::Value,
    /// Due/trigger time; `None` means due now.
    pub due_at_ms: Option<u128>,
    /// Current lock owner.
    pub lock_owner: Option<String>,
    /// Lease deadline of the current lock.
    pub lock_expires_at_ms: Option<u128>,
    /// Retries left before the job becomes dead.
    pub retries_remaining: u32,
    /// Detail of the most recent failure.
    pub last_failure: Option<String>,
    /// Persisted state.
    pub state: JobState,
    /// Creation time.
    pub created_at_ms: u128,
}

impl Job {
    /// Build an async job that is due immediately.
    ///
    /// A job created without retries is dead from the start.
    pub fn new_async(
        tenant_id: TenantId,
        job_type: impl Into<String>,
        payload: serde_json::Value,
        retries: u32,
    ) -> Self {
        Self {
            id: new_job_id(),
            tenant_id,
            kind: JobKind::Async,
            job_type: job_type.into(),
            payload,
            due_at_ms: None,
            lock_owner: None,
            lock_expires_at_ms: None,
            retries_remaining: retries,
            last_failure: None,
            state: if retries == 0 {
                JobState::Dead
            } else {
                JobState::Executable
            },
            created_at_ms: now_ms(),
        }
    }

    /// Build a timer job firing at `due_at_ms`.
    pub fn new_timer(
        tenant_id: TenantId,
        job_type: impl Into<String>,
        payload: serde_json::Value,
        due_at_ms: u128,
        retries: u32,
    ) -> Self {
        Self {
            kind: JobKind::Timer,
            due_at_ms: Some(due_at_ms),
            ..Self::new_async(tenant_id, job_type, payload, retries)
        }
    }

    /// Whether both lock fields are set.
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.lock_owner.is_some() && self.lock_expires_at_ms.is_some()
    }

    /// Whether the lease on this job has elapsed at `now_ms`.
    #[must_use]
    pub fn lock_expired(&self, now_ms: u128) -> bool {
        self.is_locked() && self.lock_expires_at_ms.is_some_and(|t| t <= now_ms)
    }

    /// Whether the job is dead.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.state == JobState::Dead
    }

    /// Whether the due-job loop may claim this job at `now_ms`.
    #[must_use]
    pub fn is_acquirable_as_due(&self, now_ms: u128) -> bool {
        self.kind == JobKind::Async
            && self.is_live()
            && self.due_at_ms.is_none_or(|t| t <= now_ms)
    }

    /// Whether the timer-job loop may claim this job at `now_ms`.
    #[must_use]
    pub fn is_acquirable_as_timer(&self, now_ms: u128) -> bool {
        self.kind == JobKind::Timer
            && self.is_live()
            && self.due_at_ms.is_some_and(|t| t <= now_ms)
    }

    /// Whether a single-job claim may take this job at `now_ms`.
    #[must_use]
    pub fn is_acquirable(&self, now_ms: u128) -> bool {
        match self.kind {
            JobKind::Async => self.is_acquirable_as_due(now_ms),
            JobKind::Timer => self.is_acquirable_as_timer(now_ms),
        }
    }

    fn is_live(&self) -> bool {
        self.state == JobState::Executable && self.retries_remaining > 0 && !self.is_locked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tenant() -> TenantId {
        TenantId::from("acme")
    }

    #[test]
    fn fresh_async_job_is_due_now() {
        let job = Job::new_async(tenant(), "mail", json!({}), 3);
        assert!(!job.is_locked());
        assert!(job.is_acquirable_as_due(0));
        assert!(!job.is_acquirable_as_timer(u128::MAX));
    }

    #[test]
    fn timer_waits_for_trigger_time() {
        let job = Job::new_timer(tenant(), "escalate", json!(null), 5_000, 3);
        assert!(!job.is_acquirable(4_999));
        assert!(job.is_acquirable(5_000));
        assert!(!job.is_acquirable_as_due(10_000));
    }

    #[test]
    fn locked_requires_both_fields() {
        let mut job = Job::new_async(tenant(), "mail", json!({}), 3);
        job.lock_owner = Some("owner".into());
        assert!(!job.is_locked());
        job.lock_expires_at_ms = Some(100);
        assert!(job.is_locked());
        assert!(!job.lock_expired(99));
        assert!(job.lock_expired(100));
        assert!(!job.is_acquirable(1_000));
    }

    #[test]
    fn job_without_retries_starts_dead() {
        let job = Job::new_async(tenant(), "mail", json!({}), 0);
        assert!(job.is_dead());
        assert!(Job::new_timer(tenant(), "escalate", json!(null), 5, 0).is_dead());
        assert!(!Job::new_async(tenant(), "mail", json!({}), 1).is_dead());
    }

    #[test]
    fn exhausted_or_dead_jobs_are_never_acquirable() {
        let mut job = Job::new_async(tenant(), "mail", json!({}), 0);
        assert!(!job.is_acquirable(u128::MAX));
        job.state = JobState::Executable;
        assert!(!job.is_acquirable(u128::MAX));
        job.retries_remaining = 2;
        job.state = JobState::Dead;
        assert!(!job.is_acquirable(u128::MAX));
    }
}
