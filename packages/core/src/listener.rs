//! Context lifecycle listeners.
//!
//! Listeners are invoked by the [`ThreadContextExecutor`], not by the
//! container itself: begin hooks run in registration order before the
//! wrapped work starts, end hooks run in reverse order after it finishes on
//! every exit path. A begin failure aborts the execution attempt before the
//! work runs.
//!
//! Calling back into an accessor facade from within `on_context_begin` is
//! unsupported: the context is only partially initialized at that point and
//! the result of such a lookup is unspecified.
//!
//! [`ThreadContextExecutor`]: crate::executor::ThreadContextExecutor

use std::sync::Arc;

use anyhow::anyhow;

use crate::auth_token::AuthToken;
use crate::context::{property_keys, ThreadContext};
use crate::property::Property;
use crate::{principal, tenant};

// ---------------------------------------------------------------------------
// ThreadContextListener trait
// ---------------------------------------------------------------------------

/// Lifecycle hook pair around one executor scope.
pub trait ThreadContextListener: Send + Sync {
    /// Short name used in error and log messages.
    fn name(&self) -> &'static str;

    /// Called after the context became current, before the work runs. An
    /// error aborts the execution attempt; the work never runs on a
    /// half-initialized context.
    ///
    /// # Errors
    ///
    /// Implementations return an error to veto the scope.
    fn on_context_begin(&self, context: &ThreadContext) -> anyhow::Result<()>;

    /// Called after the work finished, while the context is still current.
    /// Must not fail; implementations log their own problems.
    fn on_context_end(&self, context: &ThreadContext) {
        let _ = context;
    }
}

/// The standard listeners registered by every executor unless
/// [`without_default_listeners`] is used. Order matters: the token slot
/// must exist before tenant and principal derivation read it.
///
/// [`without_default_listeners`]: crate::executor::ThreadContextExecutor::without_default_listeners
#[must_use]
pub(crate) fn default_listeners() -> Vec<Arc<dyn ThreadContextListener>> {
    vec![
        Arc::new(AuthTokenPropagationListener),
        Arc::new(TenantPropagationListener),
        Arc::new(PrincipalPropagationListener),
    ]
}

// ---------------------------------------------------------------------------
// Default listeners
// ---------------------------------------------------------------------------

/// Ensures the context has an auth-token slot. A forked context already
/// carries its parent's token; a fresh context gets a slot whose resolution
/// fails once and is then cached, so repeated token lookups within the
/// scope never recompute.
#[derive(Debug, Default)]
pub struct AuthTokenPropagationListener;

impl ThreadContextListener for AuthTokenPropagationListener {
    fn name(&self) -> &'static str {
        "auth-token"
    }

    fn on_context_begin(&self, context: &ThreadContext) -> anyhow::Result<()> {
        context.set_property_if_absent(property_keys::AUTH_TOKEN, || {
            Property::of_lazy::<AuthToken, _>(|| {
                Err(anyhow!("no auth token was provided to this context"))
            })
        });
        Ok(())
    }
}

/// Installs a lazy tenant slot that derives the tenant from the owning
/// container's auth-token slot on first read. The token slot is captured
/// at install time, so the derivation stays bound to this container even
/// when a different context is current at read time. Both the derived
/// tenant and a derivation failure are cached on the container for the
/// remainder of the scope.
#[derive(Debug, Default)]
pub struct TenantPropagationListener;

impl ThreadContextListener for TenantPropagationListener {
    fn name(&self) -> &'static str {
        "tenant"
    }

    fn on_context_begin(&self, context: &ThreadContext) -> anyhow::Result<()> {
        let token_slot = context.get_property(property_keys::AUTH_TOKEN);
        context.set_property_if_absent(property_keys::TENANT, || {
            Property::of_lazy(move || {
                let token = resolve_token(token_slot)
                    .map_err(|err| anyhow!("no auth token to derive the tenant from ({err})"))?;
                tenant::derive_from_token(&token).map_err(anyhow::Error::from)
            })
        });
        Ok(())
    }
}

/// Installs a lazy principal slot, analogous to the tenant listener.
#[derive(Debug, Default)]
pub struct PrincipalPropagationListener;

impl ThreadContextListener for PrincipalPropagationListener {
    fn name(&self) -> &'static str {
        "principal"
    }

    fn on_context_begin(&self, context: &ThreadContext) -> anyhow::Result<()> {
        let token_slot = context.get_property(property_keys::AUTH_TOKEN);
        context.set_property_if_absent(property_keys::PRINCIPAL, || {
            Property::of_lazy(move || {
                let token = resolve_token(token_slot)
                    .map_err(|err| anyhow!("no auth token to derive the principal from ({err})"))?;
                principal::derive_from_token(&token).map_err(anyhow::Error::from)
            })
        });
        Ok(())
    }
}

/// Resolves a captured auth-token slot. `None` means the container carried
/// no token slot at install time.
fn resolve_token(slot: Option<Arc<Property>>) -> anyhow::Result<Arc<AuthToken>> {
    let slot = slot.ok_or_else(|| anyhow!("the context carries no auth token slot"))?;
    slot.get::<AuthToken>().map_err(anyhow::Error::from)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
