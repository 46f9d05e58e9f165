//! # Prometheus Job Executor
//!
//! A multi-tenant asynchronous job scheduler.
//!
//! Each tenant gets its own executor that continuously discovers due and timer jobs in
//! a shared job store, claims them with an exclusive lease, runs them on a bounded pool
//! of worker threads, and recovers work abandoned by crashed lock owners. A dispatcher
//! routes calls to the right tenant's executor and keeps their configuration in sync.
//!
//! ## Key Features
//!
//! - **Atomic lease claims**: the store is the only source of mutual exclusion
//! - **Adaptive polling**: full batches retry at once, partial batches back off
//! - **Backpressure**: acquisition waits while the pool queue is full
//! - **Retry with backoff**: failed jobs come back after a delay until retries run out
//! - **Crash recovery**: an expired-lock sweep releases leases of dead owners
//! - **Explicit tenant scoping**: every tenant-scoped call takes a [`core::TenantContext`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_job_executor::config::ExecutorConfig;
//! use prometheus_job_executor::core::{
//!     JobHandlerRegistry, TenantContext, TenantExecutorDispatcher,
//! };
//! use prometheus_job_executor::infra::InMemoryJobStore;
//!
//! let store = Arc::new(InMemoryJobStore::new());
//! let handlers = Arc::new(JobHandlerRegistry::new().with(SendMail));
//! let dispatcher = TenantExecutorDispatcher::new(ExecutorConfig::default(), store, handlers);
//!
//! dispatcher.add_tenant_executor("acme", false)?;
//! dispatcher.start()?;
//!
//! let ctx = TenantContext::for_tenant("acme");
//! let jobs = dispatcher.determine_executor(&ctx)?.job_manager();
//! jobs.create_async_job("send_mail", serde_json::json!({ "to": "ops@acme.test" }))?;
//!
//! dispatcher.shutdown()?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions: jobs, store contract, executors, dispatcher.
pub mod core;
/// Configuration models for executors and the dispatcher.
pub mod config;
/// Builders to construct scheduler components from configuration.
pub mod builders;
/// Infrastructure adapters for job storage.
pub mod infra;
/// Shared utilities.
pub mod util;
