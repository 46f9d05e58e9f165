//! Job handler trait and type-discriminator resolution.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::error::AppResult;
use crate::core::job::Job;

/// Business logic for one job type.
///
/// Handlers run on an execution-pool worker thread inside that worker's
/// single-threaded tokio runtime, so blocking here only occupies one pool slot.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_job_executor::core::{AppResult, Job, JobHandler};
///
/// struct SendMail;
///
/// #[async_trait]
/// impl JobHandler for SendMail {
///     fn job_type(&self) -> &str {
///         "send-mail"
///     }
///
///     async fn execute(&self, job: &Job) -> AppResult<()> {
///         let to = job.payload["to"].as_str().unwrap_or_default();
///         tracing::info!(to, "sending mail");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Discriminator this handler serves.
    fn job_type(&self) -> &str;

    /// Execute the job. An `Err` counts as a failed attempt.
    async fn execute(&self, job: &Job) -> AppResult<()>;
}

/// Handlers keyed by job type.
#[derive(Default, Clone)]
pub struct JobHandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobHandlerRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own job type, replacing any previous one.
    pub fn register(&mut self, handler: impl JobHandler) -> &mut Self {
        let handler: Arc<dyn JobHandler> = Arc::new(handler);
        self.handlers.insert(handler.job_type().to_owned(), handler);
        self
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, handler: impl JobHandler) -> Self {
        self.register(handler);
        self
    }

    /// Resolve the handler for a job type.
    #[must_use]
    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    /// Registered job types.
    #[must_use]
    pub fn job_types(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}
