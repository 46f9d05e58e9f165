//! Core scheduling abstractions: jobs, the store contract, executors and the dispatcher.

pub mod acquisition;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod executor;
pub mod handler;
pub mod job;
pub mod job_manager;
pub mod runner;
pub mod store;
pub mod tenant;
pub mod worker_pool;

pub use acquisition::{
    AcquireDueJobsLoop, AcquireTimerJobsLoop, AcquisitionLoop, LoopContext, LoopSignal,
    ResetExpiredJobsLoop,
};
pub use dispatcher::{DefaultExecutorFactory, TenantExecutorDispatcher, TenantExecutorFactory};
pub use error::{AppResult, SchedulerError, StoreError};
pub use events::{InMemoryEventSink, JobEvent, JobEventKind, JobEventSink};
pub use executor::{
    AsyncExecutor, DefaultComponents, ExecutorComponents, ExecutorCore, ExecutorState,
};
pub use handler::{JobHandler, JobHandlerRegistry};
pub use job::{FailureOutcome, Job, JobKind, JobState};
pub use job_manager::JobManager;
pub use runner::{ExecuteJobRunner, JobRunner};
pub use store::JobStore;
pub use tenant::{TenantContext, TenantDescriptor};
pub use worker_pool::{ExecutionPool, JobOutcome, PoolError, PoolStats, SubmitError};
