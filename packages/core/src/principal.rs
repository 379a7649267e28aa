//! Principal model and the principal accessor facade.
//!
//! Mirrors the tenant facade: context property first, then derivation from
//! the current auth token (`user_name` claim, falling back to `sub`).

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth_token::AuthToken;
use crate::context::{property_keys, ThreadContext};
use crate::executor::ThreadContextAccessor;
use crate::property::PropertyAccessError;

/// The authenticated end-user identity associated with the current request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Unique identifier of the authenticated entity.
    pub id: String,
    /// Roles assigned to this principal for authorization checks.
    pub roles: Vec<String>,
}

impl Principal {
    /// Creates a principal without roles.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), roles: Vec::new() }
    }
}

/// Errors raised when no principal can be resolved for the current task.
#[derive(Debug, thiserror::Error)]
pub enum PrincipalAccessError {
    /// No thread context is active at all.
    #[error("no thread context is associated with the current task")]
    NoCurrentContext,
    /// A context is active but no principal could be determined from it.
    #[error("no principal is available in the current context: {reason}")]
    NotAvailable {
        /// Why no principal could be determined.
        reason: String,
    },
    /// The principal property exists but its resolution failed.
    #[error("principal resolution failed")]
    ResolutionFailed {
        #[source]
        source: PropertyAccessError,
    },
}

/// Strategy for resolving the current [`Principal`]. Swappable process-wide
/// via [`set_principal_facade`].
pub trait PrincipalFacade: Send + Sync {
    /// Resolves the principal for the calling task.
    ///
    /// # Errors
    ///
    /// Returns a [`PrincipalAccessError`] describing why no principal is
    /// available.
    fn try_current_principal(&self) -> Result<Principal, PrincipalAccessError>;
}

static PRINCIPAL_FACADE: ArcSwapOption<Box<dyn PrincipalFacade>> = ArcSwapOption::const_empty();

/// Replaces the process-wide principal resolution strategy. Passing `None`
/// restores the default strategy.
pub fn set_principal_facade(facade: Option<Box<dyn PrincipalFacade>>) {
    PRINCIPAL_FACADE.store(facade.map(Arc::new));
}

/// Default strategy: context property first, then token-claim derivation.
#[derive(Debug, Default)]
pub struct DefaultPrincipalFacade;

impl PrincipalFacade for DefaultPrincipalFacade {
    fn try_current_principal(&self) -> Result<Principal, PrincipalAccessError> {
        let context = ThreadContextAccessor::current_context()
            .map_err(|_| PrincipalAccessError::NoCurrentContext)?;
        match context.get_property_value::<Principal>(property_keys::PRINCIPAL) {
            Ok(principal) => Ok((*principal).clone()),
            Err(PropertyAccessError::Missing { .. }) => derive_from_context(&context),
            Err(source) => Err(PrincipalAccessError::ResolutionFailed { source }),
        }
    }
}

/// Derives the principal from the auth-token property of `context`.
pub(crate) fn derive_from_context(
    context: &ThreadContext,
) -> Result<Principal, PrincipalAccessError> {
    let token = context
        .get_property_value::<AuthToken>(property_keys::AUTH_TOKEN)
        .map_err(|err| PrincipalAccessError::NotAvailable {
            reason: format!("no auth token to derive the principal from ({err})"),
        })?;
    derive_from_token(&token)
}

/// Derives the principal from token claims: id from `user_name`, falling
/// back to `sub`; roles from the `scope` claim when present.
pub(crate) fn derive_from_token(token: &AuthToken) -> Result<Principal, PrincipalAccessError> {
    let id = token
        .string_claim("user_name")
        .or_else(|| token.string_claim("sub"))
        .ok_or_else(|| PrincipalAccessError::NotAvailable {
            reason: "auth token carries no user_name or sub claim".to_string(),
        })?;
    let roles = token
        .claims()
        .get("scope")
        .and_then(Value::as_array)
        .map(|scopes| {
            scopes
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default();
    Ok(Principal { id: id.to_string(), roles })
}

/// Process-wide lookup point for the ambient principal.
pub struct PrincipalAccessor;

impl PrincipalAccessor {
    /// Returns the current principal.
    ///
    /// # Errors
    ///
    /// Returns a [`PrincipalAccessError`] when no principal can be
    /// resolved.
    pub fn current_principal() -> Result<Principal, PrincipalAccessError> {
        match PRINCIPAL_FACADE.load_full() {
            Some(facade) => facade.try_current_principal(),
            None => DefaultPrincipalFacade.try_current_principal(),
        }
    }

    /// Returns the current principal, treating absence as a normal branch.
    #[must_use]
    pub fn try_current_principal() -> Option<Principal> {
        Self::current_principal().ok()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::{Mutex, MutexGuard};

    use super::*;
    use crate::executor::ThreadContextExecutor;
    use crate::property::Property;

    static FACADE_LOCK: Mutex<()> = Mutex::new(());

    fn facade_lock() -> MutexGuard<'static, ()> {
        FACADE_LOCK.lock()
    }

    fn scoped<T: Send>(context: ThreadContext, work: impl FnOnce() -> T + Send) -> T {
        ThreadContextExecutor::using(Arc::new(context))
            .execute(work)
            .unwrap()
    }

    #[test]
    fn empty_context_yields_no_principal() {
        let _guard = facade_lock();
        let principal = scoped(ThreadContext::new(), PrincipalAccessor::try_current_principal);
        assert!(principal.is_none());
    }

    #[test]
    fn stored_principal_property_wins_over_token() {
        let _guard = facade_lock();
        let context = ThreadContext::new();
        context.set_property(
            property_keys::PRINCIPAL,
            Property::of_value(Principal::new("stored-user")),
        );

        let principal = scoped(context, || PrincipalAccessor::current_principal().unwrap());
        assert_eq!(principal.id, "stored-user");
    }

    #[test]
    fn principal_is_derived_from_token_claims() {
        let _guard = facade_lock();
        let token = AuthToken::from_claims(
            serde_json::json!({
                "user_name": "jdoe",
                "scope": ["read", "write"],
            })
            .as_object()
            .unwrap()
            .clone(),
        );
        let context = ThreadContext::new();
        context.set_property(property_keys::AUTH_TOKEN, Property::of_confidential_value(token));

        let principal = scoped(context, || PrincipalAccessor::current_principal().unwrap());
        assert_eq!(principal.id, "jdoe");
        assert_eq!(principal.roles, vec!["read", "write"]);
    }

    #[test]
    fn sub_claim_is_the_fallback_identifier() {
        let token = AuthToken::from_claims(
            serde_json::json!({ "sub": "client-credentials-app" })
                .as_object()
                .unwrap()
                .clone(),
        );
        let principal = derive_from_token(&token).unwrap();
        assert_eq!(principal.id, "client-credentials-app");
        assert!(principal.roles.is_empty());
    }

    #[test]
    fn facade_can_be_swapped_and_reset() {
        struct FixedPrincipalFacade;
        impl PrincipalFacade for FixedPrincipalFacade {
            fn try_current_principal(&self) -> Result<Principal, PrincipalAccessError> {
                Ok(Principal::new("fixed"))
            }
        }

        let _guard = facade_lock();
        set_principal_facade(Some(Box::new(FixedPrincipalFacade)));
        let swapped = PrincipalAccessor::current_principal();
        set_principal_facade(None);

        assert_eq!(swapped.unwrap().id, "fixed");
        assert!(matches!(
            PrincipalAccessor::current_principal(),
            Err(PrincipalAccessError::NoCurrentContext)
        ));
    }
}
