//! Tenant model and the tenant accessor facade.
//!
//! The default resolution strategy checks, in order:
//!
//! 1. a [`Tenant`] property already stored on the current context (fast
//!    path, computed once per scope),
//! 2. the current auth token's claims (`app_tid`, falling back to the
//!    legacy `zid` and `zone_uuid` claims; the subdomain comes from the
//!    issuer URL's first host label),
//! 3. failure.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};

use crate::auth_token::AuthToken;
use crate::context::{property_keys, ThreadContext};
use crate::executor::ThreadContextAccessor;
use crate::property::PropertyAccessError;

// ---------------------------------------------------------------------------
// Tenant
// ---------------------------------------------------------------------------

/// The logical customer/subaccount identity associated with the current
/// request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    /// Unique tenant identifier.
    pub id: String,
    /// The tenant's subaccount subdomain, when known.
    pub subdomain: Option<String>,
}

impl Tenant {
    /// Creates a tenant without a subdomain.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), subdomain: None }
    }

    /// Creates a tenant with a known subdomain.
    #[must_use]
    pub fn with_subdomain(id: impl Into<String>, subdomain: impl Into<String>) -> Self {
        Self { id: id.into(), subdomain: Some(subdomain.into()) }
    }
}

// ---------------------------------------------------------------------------
// TenantAccessError
// ---------------------------------------------------------------------------

/// Errors raised when no tenant can be resolved for the current task.
#[derive(Debug, thiserror::Error)]
pub enum TenantAccessError {
    /// No thread context is active at all.
    #[error("no thread context is associated with the current task")]
    NoCurrentContext,
    /// A context is active but no tenant could be determined from it.
    #[error("no tenant is available in the current context: {reason}")]
    NotAvailable {
        /// Why no tenant could be determined.
        reason: String,
    },
    /// The tenant property exists but its resolution failed; the failure
    /// is cached on the context for the remainder of the scope.
    #[error("tenant resolution failed")]
    ResolutionFailed {
        #[source]
        source: PropertyAccessError,
    },
}

// ---------------------------------------------------------------------------
// Facade SPI
// ---------------------------------------------------------------------------

/// Strategy for resolving the current [`Tenant`]. Swappable process-wide
/// via [`set_tenant_facade`].
pub trait TenantFacade: Send + Sync {
    /// Resolves the tenant for the calling task.
    ///
    /// # Errors
    ///
    /// Returns a [`TenantAccessError`] describing why no tenant is
    /// available.
    fn try_current_tenant(&self) -> Result<Tenant, TenantAccessError>;
}

static TENANT_FACADE: ArcSwapOption<Box<dyn TenantFacade>> = ArcSwapOption::const_empty();

/// Replaces the process-wide tenant resolution strategy. Passing `None`
/// restores the default strategy.
pub fn set_tenant_facade(facade: Option<Box<dyn TenantFacade>>) {
    TENANT_FACADE.store(facade.map(Arc::new));
}

/// Default strategy: context property first, then token-claim derivation.
#[derive(Debug, Default)]
pub struct DefaultTenantFacade;

impl TenantFacade for DefaultTenantFacade {
    fn try_current_tenant(&self) -> Result<Tenant, TenantAccessError> {
        let context = ThreadContextAccessor::current_context()
            .map_err(|_| TenantAccessError::NoCurrentContext)?;
        match context.get_property_value::<Tenant>(property_keys::TENANT) {
            Ok(tenant) => Ok((*tenant).clone()),
            // No property at all (e.g., default listeners were skipped):
            // derive directly, without caching.
            Err(PropertyAccessError::Missing { .. }) => derive_from_context(&context),
            Err(source) => Err(TenantAccessError::ResolutionFailed { source }),
        }
    }
}

/// Derives the tenant from the auth-token property of `context`.
pub(crate) fn derive_from_context(context: &ThreadContext) -> Result<Tenant, TenantAccessError> {
    let token = context
        .get_property_value::<AuthToken>(property_keys::AUTH_TOKEN)
        .map_err(|err| TenantAccessError::NotAvailable {
            reason: format!("no auth token to derive the tenant from ({err})"),
        })?;
    derive_from_token(&token)
}

/// Derives the tenant from token claims: id from `app_tid`, falling back
/// to the legacy `zid` and `zone_uuid` claims; subdomain from the issuer.
pub(crate) fn derive_from_token(token: &AuthToken) -> Result<Tenant, TenantAccessError> {
    let id = token
        .string_claim("app_tid")
        .or_else(|| token.string_claim("zid"))
        .or_else(|| token.string_claim("zone_uuid"))
        .ok_or_else(|| TenantAccessError::NotAvailable {
            reason: "auth token carries no app_tid, zid, or zone_uuid claim".to_string(),
        })?;
    Ok(Tenant {
        id: id.to_string(),
        subdomain: token.issuer().and_then(issuer_subdomain),
    })
}

/// Extracts the first host label of the issuer URL, e.g. `"acme"` from
/// `https://acme.auth.example.com`. Hosts without a domain part (such as
/// `localhost`) yield no subdomain.
fn issuer_subdomain(issuer: &str) -> Option<String> {
    let uri: http::Uri = issuer.parse().ok()?;
    let host = uri.host()?;
    if !host.contains('.') {
        return None;
    }
    host.split('.').next().map(ToString::to_string)
}

// ---------------------------------------------------------------------------
// TenantAccessor
// ---------------------------------------------------------------------------

/// Process-wide lookup point for the ambient tenant.
pub struct TenantAccessor;

impl TenantAccessor {
    /// Returns the current tenant.
    ///
    /// # Errors
    ///
    /// Returns a [`TenantAccessError`] when no tenant can be resolved. The
    /// error chain states whether no context was active at all or a context
    /// was present but resolution failed.
    pub fn current_tenant() -> Result<Tenant, TenantAccessError> {
        match TENANT_FACADE.load_full() {
            Some(facade) => facade.try_current_tenant(),
            None => DefaultTenantFacade.try_current_tenant(),
        }
    }

    /// Returns the current tenant, treating absence as a normal branch.
    #[must_use]
    pub fn try_current_tenant() -> Option<Tenant> {
        Self::current_tenant().ok()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
