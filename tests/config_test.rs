//! Tests for configuration parsing and validation

use std::time::Duration;

use prometheus_job_executor::config::{ExecutorConfig, SchedulerConfig};
use prometheus_job_executor::util::TenantId;

#[test]
fn test_executor_defaults() {
    let cfg = ExecutorConfig::default();
    assert_eq!(cfg.max_async_jobs_due_per_acquisition, 1);
    assert_eq!(cfg.max_timer_jobs_per_acquisition, 1);
    assert_eq!(cfg.default_async_job_acquire_wait_time(), Duration::from_secs(10));
    assert_eq!(cfg.default_timer_job_acquire_wait_time(), Duration::from_secs(10));
    assert_eq!(cfg.async_job_lock_time(), Duration::from_secs(300));
    assert_eq!(cfg.timer_lock_time(), Duration::from_secs(300));
    assert_eq!(cfg.default_queue_size_full_wait_time(), Duration::from_millis(100));
    assert_eq!(cfg.retry_wait_time(), Duration::from_millis(500));
    assert_eq!(cfg.reset_expired_jobs_interval(), Duration::from_secs(60));
    assert_eq!(cfg.reset_expired_jobs_page_size, 3);
    assert_eq!(cfg.queue_size, 100);
    assert_eq!(cfg.shutdown_wait(), Duration::from_secs(60));
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_executor_config_rejects_zero_values() {
    let cases: [fn(&mut ExecutorConfig); 8] = [
        |c| c.max_async_jobs_due_per_acquisition = 0,
        |c| c.max_timer_jobs_per_acquisition = 0,
        |c| c.async_job_lock_time_ms = 0,
        |c| c.timer_lock_time_ms = 0,
        |c| c.reset_expired_jobs_page_size = 0,
        |c| c.pool_size = 0,
        |c| c.queue_size = 0,
        |c| c.default_job_retries = 0,
    ];
    for break_it in cases {
        let mut cfg = ExecutorConfig::default();
        break_it(&mut cfg);
        assert!(cfg.validate().is_err(), "accepted {cfg:?}");
    }
}

#[test]
fn test_scheduler_config_from_json_fills_defaults() {
    let cfg = SchedulerConfig::from_json_str(
        r#"{
            "executor": { "max_async_jobs_due_per_acquisition": 8, "queue_size": 16 },
            "tenants": ["acme", "globex"],
            "auto_activate": true
        }"#,
    )
    .unwrap();

    assert_eq!(cfg.executor.max_async_jobs_due_per_acquisition, 8);
    assert_eq!(cfg.executor.queue_size, 16);
    assert_eq!(cfg.executor.retry_wait_time_ms, 500);
    assert_eq!(cfg.tenants, vec![TenantId::from("acme"), TenantId::from("globex")]);
    assert!(cfg.auto_activate);
}

#[test]
fn test_scheduler_config_empty_document() {
    let cfg = SchedulerConfig::from_json_str("{}").unwrap();
    assert!(cfg.tenants.is_empty());
    assert!(!cfg.auto_activate);
    assert_eq!(cfg.executor, ExecutorConfig::default());
}

#[test]
fn test_scheduler_config_rejects_bad_tenants() {
    assert!(SchedulerConfig::from_json_str(r#"{ "tenants": ["acme", "acme"] }"#)
        .unwrap_err()
        .contains("twice"));
    assert!(SchedulerConfig::from_json_str(r#"{ "tenants": [""] }"#).is_err());
}

#[test]
fn test_scheduler_config_rejects_invalid_json() {
    let err = SchedulerConfig::from_json_str("{ not json").unwrap_err();
    assert!(err.starts_with("parse error"));

    let err = SchedulerConfig::from_json_str(r#"{ "executor": { "pool_size": 0 } }"#).unwrap_err();
    assert!(err.contains("pool_size"));
}

#[test]
fn test_executor_config_from_env() {
    std::env::set_var("ASYNC_EXECUTOR_MAX_TIMER_JOBS_PER_ACQUISITION", "4");
    std::env::set_var("ASYNC_EXECUTOR_RETRY_WAIT_TIME_MS", "1500");
    let cfg = ExecutorConfig::from_env().unwrap();
    std::env::remove_var("ASYNC_EXECUTOR_MAX_TIMER_JOBS_PER_ACQUISITION");
    std::env::remove_var("ASYNC_EXECUTOR_RETRY_WAIT_TIME_MS");

    assert_eq!(cfg.max_timer_jobs_per_acquisition, 4);
    assert_eq!(cfg.retry_wait_time(), Duration::from_millis(1500));
    assert_eq!(cfg.queue_size, 100);
}
