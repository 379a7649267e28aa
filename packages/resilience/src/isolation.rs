//! Call-time resolution of limiter partition keys.

use cirrus_core::{PrincipalAccessor, TenantAccessor};

use crate::configuration::IsolationMode;
use crate::error::ResilienceError;

/// Registry partition key derived from the ambient identity of the calling
/// task.
///
/// Two calls with equal keys (and the same configuration identifier) share
/// one limiter instance; calls with different keys get independent
/// instances.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IsolationKey {
    tenant: Option<String>,
    principal: Option<String>,
}

impl IsolationKey {
    /// Resolves the key for `mode` from the current accessors.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::IsolationKeyUnavailable`] when the mode
    /// requires a tenant or principal and none can be resolved.
    pub fn resolve(mode: IsolationMode) -> Result<Self, ResilienceError> {
        let key = match mode {
            IsolationMode::NoIsolation => Self { tenant: None, principal: None },
            IsolationMode::Tenant => Self {
                tenant: Some(current_tenant_id(mode)?),
                principal: None,
            },
            IsolationMode::User => Self {
                tenant: None,
                principal: Some(current_principal_id(mode)?),
            },
            IsolationMode::TenantAndUser => Self {
                tenant: Some(current_tenant_id(mode)?),
                principal: Some(current_principal_id(mode)?),
            },
        };
        Ok(key)
    }

    /// Tenant component of the key, if the mode partitions by tenant.
    #[must_use]
    pub fn tenant(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    /// Principal component of the key, if the mode partitions by user.
    #[must_use]
    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }
}

fn current_tenant_id(mode: IsolationMode) -> Result<String, ResilienceError> {
    TenantAccessor::try_current_tenant()
        .map(|tenant| tenant.id)
        .ok_or(ResilienceError::IsolationKeyUnavailable { mode, missing: "tenant" })
}

fn current_principal_id(mode: IsolationMode) -> Result<String, ResilienceError> {
    PrincipalAccessor::try_current_principal()
        .map(|principal| principal.id)
        .ok_or(ResilienceError::IsolationKeyUnavailable { mode, missing: "principal" })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cirrus_core::{property_keys, Principal, Property, Tenant, ThreadContext, ThreadContextExecutor};

    use super::*;

    fn identity_context(tenant: &str, principal: &str) -> Arc<ThreadContext> {
        let context = ThreadContext::new();
        context.set_property(property_keys::TENANT, Property::of_value(Tenant::new(tenant)));
        context.set_property(
            property_keys::PRINCIPAL,
            Property::of_value(Principal::new(principal)),
        );
        Arc::new(context)
    }

    #[test]
    fn no_isolation_needs_no_identity() {
        let key = IsolationKey::resolve(IsolationMode::NoIsolation).unwrap();
        assert_eq!(key.tenant(), None);
        assert_eq!(key.principal(), None);
    }

    #[test]
    fn tenant_mode_uses_current_tenant() {
        let key = ThreadContextExecutor::using(identity_context("t1", "u1"))
            .execute(|| IsolationKey::resolve(IsolationMode::Tenant))
            .unwrap()
            .unwrap();
        assert_eq!(key.tenant(), Some("t1"));
        assert_eq!(key.principal(), None);
    }

    #[test]
    fn tenant_and_user_mode_uses_both() {
        let key = ThreadContextExecutor::using(identity_context("t1", "u1"))
            .execute(|| IsolationKey::resolve(IsolationMode::TenantAndUser))
            .unwrap()
            .unwrap();
        assert_eq!(key.tenant(), Some("t1"));
        assert_eq!(key.principal(), Some("u1"));
    }

    #[test]
    fn missing_identity_is_rejected_for_strict_modes() {
        let err = ThreadContextExecutor::from_new_context()
            .execute(|| IsolationKey::resolve(IsolationMode::User))
            .unwrap()
            .unwrap_err();
        assert!(matches!(
            err,
            ResilienceError::IsolationKeyUnavailable { missing: "principal", .. }
        ));
    }
}
