//! Tenant scoping for dispatcher calls.

use serde::{Deserialize, Serialize};

use crate::core::error::SchedulerError;
use crate::core::executor::ExecutorState;
use crate::util::serde::TenantId;

/// The tenant a caller is operating as.
///
/// Passed explicitly to every tenant-scoped dispatcher call instead of being read
/// from thread-local state, so there is no set/clear pair to get wrong.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: Option<TenantId>,
}

impl TenantContext {
    /// Context scoped to `tenant_id`.
    pub fn for_tenant(tenant_id: impl Into<TenantId>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
        }
    }

    /// Context without a tenant.
    #[must_use]
    pub const fn unscoped() -> Self {
        Self { tenant_id: None }
    }

    /// Current tenant, if any.
    #[must_use]
    pub const fn tenant_id(&self) -> Option<&TenantId> {
        self.tenant_id.as_ref()
    }

    /// Current tenant, or [`SchedulerError::NoTenantInContext`].
    pub fn require_tenant(&self) -> Result<&TenantId, SchedulerError> {
        self.tenant_id.as_ref().ok_or(SchedulerError::NoTenantInContext)
    }
}

/// A registered tenant and the state of its executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantDescriptor {
    /// Tenant identifier.
    pub tenant_id: TenantId,
    /// Lifecycle state of the tenant's executor.
    pub state: ExecutorState,
}

impl TenantDescriptor {
    /// Whether the tenant's executor is running.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.state == ExecutorState::Running
    }
}
