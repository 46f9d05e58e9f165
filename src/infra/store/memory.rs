//! In-memory job store.
//!
//! One mutex guards the whole job table, so each claim is a single critical section:
//! select candidates, stamp the lock, return copies. Candidates are taken in due-time
//! order, oldest first within the same due time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::core::error::StoreError;
use crate::core::events::{JobEvent, JobEventKind, JobEventSink};
use crate::core::job::{FailureOutcome, Job, JobState};
use crate::core::store::JobStore;
use crate::util::clock::after_ms;
use crate::util::serde::{JobId, TenantId};

/// Job store keeping every record in process memory.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
    events: Option<Arc<dyn JobEventSink>>,
}

impl InMemoryJobStore {
    /// Empty store without event dispatch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty store publishing job events to `sink`.
    #[must_use]
    pub fn with_event_sink(sink: Arc<dyn JobEventSink>) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            events: Some(sink),
        }
    }

    /// Number of stored jobs, dead ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Whether the store holds no jobs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Number of jobs currently carrying a lock.
    #[must_use]
    pub fn locked_count(&self) -> usize {
        self.jobs.lock().values().filter(|job| job.is_locked()).count()
    }

    /// All jobs of a tenant, in no particular order.
    #[must_use]
    pub fn jobs_of(&self, tenant_id: &TenantId) -> Vec<Job> {
        self.jobs
            .lock()
            .values()
            .filter(|job| &job.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    fn publish(&self, events: Vec<(JobEventKind, Job)>) {
        let Some(sink) = self.events.as_ref() else {
            return;
        };
        if !sink.is_enabled() {
            return;
        }
        for (kind, job) in events {
            sink.dispatch(JobEvent::for_job(kind, &job));
        }
    }

    fn lock_matching(
        &self,
        tenant_id: &TenantId,
        max_count: usize,
        owner: &str,
        lock_expires_at_ms: u128,
        acquirable: impl Fn(&Job) -> bool,
    ) -> Vec<Job> {
        let mut jobs = self.jobs.lock();
        let mut candidates: Vec<&mut Job> = jobs
            .values_mut()
            .filter(|job| &job.tenant_id == tenant_id && acquirable(job))
            .collect();
        candidates.sort_by_key(|job| (job.due_at_ms.unwrap_or(0), job.created_at_ms));

        candidates
            .into_iter()
            .take(max_count)
            .map(|job| {
                job.lock_owner = Some(owner.to_owned());
                job.lock_expires_at_ms = Some(lock_expires_at_ms);
                job.clone()
            })
            .collect()
    }
}

/// The stored job must still carry the lock the caller observed, or no lock at all.
fn check_lease(stored: &Job, observed: &Job) -> Result<(), StoreError> {
    let same_lease = stored.lock_owner == observed.lock_owner
        && stored.lock_expires_at_ms == observed.lock_expires_at_ms;
    if stored.is_locked() && !same_lease {
        return Err(StoreError::LockLost(observed.id));
    }
    Ok(())
}

impl JobStore for InMemoryJobStore {
    fn insert(&self, job: Job) -> Result<(), StoreError> {
        {
            let mut jobs = self.jobs.lock();
            if jobs.contains_key(&job.id) {
                return Err(StoreError::Duplicate(job.id));
            }
            jobs.insert(job.id, job.clone());
        }
        debug!(
            tenant_id = %job.tenant_id,
            job_id = %job.id,
            job_type = %job.job_type,
            "job inserted"
        );
        self.publish(vec![
            (JobEventKind::Created, job.clone()),
            (JobEventKind::Initialized, job),
        ]);
        Ok(())
    }

    fn find(&self, job_id: &JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.lock().get(job_id).cloned())
    }

    fn find_dead_jobs(&self, tenant_id: &TenantId) -> Result<Vec<Job>, StoreError> {
        Ok(self
            .jobs
            .lock()
            .values()
            .filter(|job| &job.tenant_id == tenant_id && job.is_dead())
            .cloned()
            .collect())
    }

    fn lock_next_due_jobs(
        &self,
        tenant_id: &TenantId,
        max_count: usize,
        now_ms: u128,
        owner: &str,
        lock_duration: Duration,
    ) -> Result<Vec<Job>, StoreError> {
        let expires = after_ms(now_ms, lock_duration);
        Ok(self.lock_matching(tenant_id, max_count, owner, expires, |job| {
            job.is_acquirable_as_due(now_ms)
        }))
    }

    fn lock_next_timer_jobs(
        &self,
        tenant_id: &TenantId,
        max_count: usize,
        now_ms: u128,
        owner: &str,
        lock_duration: Duration,
    ) -> Result<Vec<Job>, StoreError> {
        let expires = after_ms(now_ms, lock_duration);
        Ok(self.lock_matching(tenant_id, max_count, owner, expires, |job| {
            job.is_acquirable_as_timer(now_ms)
        }))
    }

    fn lock_job(
        &self,
        tenant_id: &TenantId,
        job_id: &JobId,
        now_ms: u128,
        owner: &str,
        lock_duration: Duration,
    ) -> Result<Option<Job>, StoreError> {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(job_id) else {
            return Ok(None);
        };
        if &job.tenant_id != tenant_id {
            return Err(StoreError::TenantMismatch {
                job: *job_id,
                expected: tenant_id.clone(),
            });
        }
        if !job.is_acquirable(now_ms) {
            return Ok(None);
        }
        job.lock_owner = Some(owner.to_owned());
        job.lock_expires_at_ms = Some(after_ms(now_ms, lock_duration));
        Ok(Some(job.clone()))
    }

    fn find_expired_locks(
        &self,
        tenant_id: &TenantId,
        now_ms: u128,
        page_size: usize,
    ) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.lock();
        let mut expired: Vec<&Job> = jobs
            .values()
            .filter(|job| &job.tenant_id == tenant_id && job.lock_expired(now_ms))
            .collect();
        expired.sort_by_key(|job| job.lock_expires_at_ms);
        Ok(expired.into_iter().take(page_size).cloned().collect())
    }

    fn clear_lock(&self, job: &Job) -> Result<bool, StoreError> {
        let cleared = {
            let mut jobs = self.jobs.lock();
            match jobs.get_mut(&job.id) {
                Some(stored)
                    if stored.is_locked()
                        && stored.lock_owner == job.lock_owner
                        && stored.lock_expires_at_ms == job.lock_expires_at_ms =>
                {
                    stored.lock_owner = None;
                    stored.lock_expires_at_ms = None;
                    Some(stored.clone())
                }
                _ => None,
            }
        };
        match cleared {
            Some(stored) => {
                self.publish(vec![(JobEventKind::LockReset, stored)]);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn mark_succeeded(&self, job: &Job) -> Result<(), StoreError> {
        let removed = {
            let mut jobs = self.jobs.lock();
            let stored = jobs.get(&job.id).ok_or(StoreError::NotFound(job.id))?;
            check_lease(stored, job)?;
            jobs.remove(&job.id)
        };
        if let Some(removed) = removed {
            self.publish(vec![(JobEventKind::Deleted, removed)]);
        }
        Ok(())
    }

    fn mark_failed(
        &self,
        job: &Job,
        error: &str,
        retry_at_ms: u128,
    ) -> Result<FailureOutcome, StoreError> {
        let (outcome, snapshot) = {
            let mut jobs = self.jobs.lock();
            let stored = jobs.get_mut(&job.id).ok_or(StoreError::NotFound(job.id))?;
            check_lease(stored, job)?;

            stored.retries_remaining = stored.retries_remaining.saturating_sub(1);
            stored.last_failure = Some(error.to_owned());
            stored.lock_owner = None;
            stored.lock_expires_at_ms = None;
            stored.due_at_ms = Some(retry_at_ms);

            let outcome = if stored.retries_remaining == 0 {
                stored.state = JobState::Dead;
                FailureOutcome::Dead
            } else {
                FailureOutcome::Retry {
                    retries_remaining: stored.retries_remaining,
                }
            };
            (outcome, stored.clone())
        };

        let kind = match outcome {
            FailureOutcome::Dead => JobEventKind::DeadLettered,
            FailureOutcome::Retry { .. } => JobEventKind::Updated,
        };
        self.publish(vec![(kind, snapshot)]);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::InMemoryEventSink;
    use serde_json::json;
    use std::sync::Barrier;
    use std::thread;

    const LEASE: Duration = Duration::from_secs(60);

    fn acme() -> TenantId {
        TenantId::from("acme")
    }

    fn async_job(tenant: TenantId, retries: u32) -> Job {
        Job::new_async(tenant, "mail", json!({}), retries)
    }

    #[test]
    fn test_concurrent_claims_are_exclusive() {
        let store = Arc::new(InMemoryJobStore::new());
        let job = async_job(acme(), 3);
        let id = job.id;
        store.insert(job).unwrap();

        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    store
                        .lock_job(&acme(), &id, 10, &format!("owner-{i}"), LEASE)
                        .unwrap()
                        .is_some()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_batch_claim_respects_max_and_order() {
        let store = InMemoryJobStore::new();
        let mut late = async_job(acme(), 3);
        late.due_at_ms = Some(50);
        let early = async_job(acme(), 3);
        let early_id = early.id;
        let mut later = async_job(acme(), 3);
        later.due_at_ms = Some(70);
        store.insert(late).unwrap();
        store.insert(early).unwrap();
        store.insert(later).unwrap();

        let first = store.lock_next_due_jobs(&acme(), 1, 100, "a", LEASE).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].lock_owner.as_deref(), Some("a"));
        assert_eq!(first[0].lock_expires_at_ms, Some(60_100));
        assert_eq!(first[0].id, early_id);

        let rest = store.lock_next_due_jobs(&acme(), 10, 100, "b", LEASE).unwrap();
        assert_eq!(rest.len(), 2);
        assert!(store.lock_next_due_jobs(&acme(), 10, 100, "c", LEASE).unwrap().is_empty());
    }

    #[test]
    fn test_tenants_are_isolated() {
        let store = InMemoryJobStore::new();
        let globex = TenantId::from("globex");
        let foreign = async_job(globex.clone(), 3);
        let foreign_id = foreign.id;
        store.insert(foreign).unwrap();

        assert!(store.lock_next_due_jobs(&acme(), 10, 100, "a", LEASE).unwrap().is_empty());
        assert!(matches!(
            store.lock_job(&acme(), &foreign_id, 100, "a", LEASE),
            Err(StoreError::TenantMismatch { .. })
        ));
        assert_eq!(store.lock_next_due_jobs(&globex, 10, 100, "g", LEASE).unwrap().len(), 1);
    }

    #[test]
    fn test_timer_jobs_wait_for_trigger() {
        let store = InMemoryJobStore::new();
        store
            .insert(Job::new_timer(acme(), "remind", json!({}), 500, 3))
            .unwrap();

        assert!(store.lock_next_due_jobs(&acme(), 5, 1_000, "a", LEASE).unwrap().is_empty());
        assert!(store.lock_next_timer_jobs(&acme(), 5, 499, "a", LEASE).unwrap().is_empty());
        assert_eq!(store.lock_next_timer_jobs(&acme(), 5, 500, "a", LEASE).unwrap().len(), 1);
    }

    #[test]
    fn test_failures_count_down_to_dead() {
        let store = InMemoryJobStore::new();
        let job = async_job(acme(), 2);
        let id = job.id;
        store.insert(job).unwrap();

        let claimed = store.lock_job(&acme(), &id, 0, "a", LEASE).unwrap().unwrap();
        assert_eq!(
            store.mark_failed(&claimed, "boom", 1_000).unwrap(),
            FailureOutcome::Retry { retries_remaining: 1 }
        );

        // not visible before the retry time
        assert!(store.lock_job(&acme(), &id, 999, "a", LEASE).unwrap().is_none());
        let claimed = store.lock_job(&acme(), &id, 1_000, "a", LEASE).unwrap().unwrap();
        assert_eq!(store.mark_failed(&claimed, "boom again", 2_000).unwrap(), FailureOutcome::Dead);

        let dead = store.find_dead_jobs(&acme()).unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].last_failure.as_deref(), Some("boom again"));
        assert!(store.lock_job(&acme(), &id, u128::MAX, "a", LEASE).unwrap().is_none());
    }

    #[test]
    fn test_lost_lease_is_reported() {
        let store = InMemoryJobStore::new();
        let job = async_job(acme(), 3);
        let id = job.id;
        store.insert(job).unwrap();

        let stale = store
            .lock_job(&acme(), &id, 0, "a", Duration::from_millis(10))
            .unwrap()
            .unwrap();
        let expired = store.find_expired_locks(&acme(), 10, 5).unwrap();
        assert!(store.clear_lock(&expired[0]).unwrap());
        let fresh = store.lock_job(&acme(), &id, 20, "b", LEASE).unwrap().unwrap();

        assert!(matches!(store.mark_succeeded(&stale), Err(StoreError::LockLost(_))));
        assert!(matches!(store.mark_failed(&stale, "x", 0), Err(StoreError::LockLost(_))));
        // a stale clear never frees the new lease
        assert!(!store.clear_lock(&stale).unwrap());

        store.mark_succeeded(&fresh).unwrap();
        assert!(store.is_empty());
        assert!(matches!(store.mark_succeeded(&fresh), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_expired_locks_only_past_deadline() {
        let store = InMemoryJobStore::new();
        for expires in [100u128, 200, 300] {
            let mut job = async_job(acme(), 3);
            job.lock_owner = Some("crashed".into());
            job.lock_expires_at_ms = Some(expires);
            store.insert(job).unwrap();
        }

        assert!(store.find_expired_locks(&acme(), 99, 10).unwrap().is_empty());
        let page = store.find_expired_locks(&acme(), 250, 1).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].lock_expires_at_ms, Some(100));
        assert_eq!(store.find_expired_locks(&acme(), 250, 10).unwrap().len(), 2);
    }

    #[test]
    fn test_events_follow_job_lifecycle() {
        let sink = Arc::new(InMemoryEventSink::new(32));
        let store = InMemoryJobStore::with_event_sink(sink.clone());
        let job = async_job(acme(), 2);
        let id = job.id;
        store.insert(job).unwrap();

        let claimed = store.lock_job(&acme(), &id, 0, "a", LEASE).unwrap().unwrap();
        store.mark_failed(&claimed, "boom", 0).unwrap();
        let claimed = store.lock_job(&acme(), &id, 0, "a", LEASE).unwrap().unwrap();
        store.mark_failed(&claimed, "boom", 0).unwrap();

        let other = async_job(acme(), 1);
        let other_id = other.id;
        store.insert(other).unwrap();
        let claimed = store.lock_job(&acme(), &other_id, 0, "a", LEASE).unwrap().unwrap();
        assert!(store.clear_lock(&claimed).unwrap());
        let claimed = store.lock_job(&acme(), &other_id, 0, "a", LEASE).unwrap().unwrap();
        store.mark_succeeded(&claimed).unwrap();

        let kinds: Vec<_> = sink.events().into_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                JobEventKind::Created,
                JobEventKind::Initialized,
                JobEventKind::Updated,
                JobEventKind::DeadLettered,
                JobEventKind::Created,
                JobEventKind::Initialized,
                JobEventKind::LockReset,
                JobEventKind::Deleted,
            ]
        );
    }
}
