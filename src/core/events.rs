//! Job lifecycle events.
//!
//! Stores that mutate job records publish these to an optional sink so observers can
//! follow creation, failure and removal. The scheduler itself never reads them.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::job::Job;
use crate::util::clock::now_ms;
use crate::util::serde::{JobId, TenantId};

/// What happened to a job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    /// Record inserted.
    Created,
    /// Record inserted and ready for acquisition.
    Initialized,
    /// Record changed after a handler failure.
    Updated,
    /// Retries exhausted.
    DeadLettered,
    /// Expired lease cleared by the sweep.
    LockReset,
    /// Record removed after success.
    Deleted,
}

/// A single job event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    /// Event kind.
    pub kind: JobEventKind,
    /// Related job.
    pub job_id: JobId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Handler discriminator of the job.
    pub job_type: String,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
}

impl JobEvent {
    /// Build an event for `job`, stamped now.
    #[must_use]
    pub fn for_job(kind: JobEventKind, job: &Job) -> Self {
        Self {
            kind,
            job_id: job.id,
            tenant_id: job.tenant_id.clone(),
            job_type: job.job_type.clone(),
            created_at_ms: now_ms(),
        }
    }
}

/// Receiver of job events.
pub trait JobEventSink: Send + Sync {
    /// Whether events should be built and dispatched at all.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Record an event.
    fn dispatch(&self, event: JobEvent);
}

/// Bounded in-memory sink for testing and dev.
pub struct InMemoryEventSink {
    events: Mutex<VecDeque<JobEvent>>,
    max_events: usize,
}

impl InMemoryEventSink {
    /// Create a sink that keeps the most recent `max_events` events.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events.min(1024))),
            max_events,
        }
    }

    /// Snapshot of stored events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<JobEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Events of a single kind.
    #[must_use]
    pub fn events_of(&self, kind: JobEventKind) -> Vec<JobEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }
}

impl JobEventSink for InMemoryEventSink {
    fn is_enabled(&self) -> bool {
        self.max_events > 0
    }

    fn dispatch(&self, event: JobEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}
