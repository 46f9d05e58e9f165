//! Builder assembling a dispatcher from scheduler configuration.

use std::sync::Arc;

use tracing::info;

use crate::config::SchedulerConfig;
use crate::core::{
    JobHandlerRegistry, JobStore, SchedulerError, TenantExecutorDispatcher, TenantExecutorFactory,
};

/// Build a dispatcher with one executor per configured tenant.
///
/// Executors are registered stopped; the dispatcher is started when
/// `cfg.auto_activate` is set.
pub fn build_dispatcher(
    cfg: &SchedulerConfig,
    store: Arc<dyn JobStore>,
    handlers: Arc<JobHandlerRegistry>,
    factory: Arc<dyn TenantExecutorFactory>,
) -> Result<TenantExecutorDispatcher, SchedulerError> {
    cfg.validate()
        .map_err(|e| SchedulerError::InvalidConfig(format!("config invalid: {e}")))?;

    let dispatcher =
        TenantExecutorDispatcher::with_factory(cfg.executor.clone(), store, handlers, factory);
    dispatcher.set_auto_activate(cfg.auto_activate);

    for tenant_id in &cfg.tenants {
        dispatcher.add_tenant_executor(tenant_id.clone(), false)?;
    }

    if cfg.auto_activate {
        dispatcher.start()?;
    }

    info!(
        tenants = cfg.tenants.len(),
        active = dispatcher.is_active(),
        "dispatcher built"
    );
    Ok(dispatcher)
}
