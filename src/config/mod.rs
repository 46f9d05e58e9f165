//! Configuration models for executors and the tenant dispatcher.

pub mod executor;

pub use executor::{ExecutorConfig, SchedulerConfig};
