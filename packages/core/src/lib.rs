//! Cirrus Core — thread-context propagation and accessor facades for
//! cloud-deployed services.
//!
//! A [`ThreadContext`] carries the ambient state of one logical request
//! (tenant, principal, auth token, custom properties). The
//! [`ThreadContextExecutor`] installs a context for the duration of a unit
//! of work, across both synchronous closures and futures, while the
//! accessor facades ([`TenantAccessor`], [`PrincipalAccessor`],
//! [`AuthTokenAccessor`]) let downstream code read that state without
//! knowing which task or request it runs in.

pub mod auth_token;
pub mod connectivity;
pub mod context;
pub mod executor;
pub mod listener;
pub mod principal;
pub mod property;
pub mod tenant;

pub use auth_token::{
    set_auth_token_facade, AuthToken, AuthTokenAccessError, AuthTokenAccessor, AuthTokenFacade,
};
pub use connectivity::{
    outbound_proxy_binding_or_err, CloudPlatformError, DefaultDestination, Destination,
    ProxyConfiguration,
};
pub use context::{property_keys, ThreadContext};
pub use executor::{
    spawn_with_context, ThreadContextAccessError, ThreadContextAccessor, ThreadContextExecutionError,
    ThreadContextExecutor,
};
pub use listener::ThreadContextListener;
pub use principal::{
    set_principal_facade, Principal, PrincipalAccessError, PrincipalAccessor, PrincipalFacade,
};
pub use property::{Property, PropertyAccessError};
pub use tenant::{set_tenant_facade, Tenant, TenantAccessError, TenantAccessor, TenantFacade};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
