//! Decoded bearer tokens and the auth-token accessor facade.
//!
//! An [`AuthToken`] is a *decoded* JWT: signature validation is the job of
//! the platform gateway in front of the application, this library only
//! reads claims (tenant, principal) out of tokens it is handed.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::Value;

use crate::context::property_keys;
use crate::executor::ThreadContextAccessor;
use crate::property::PropertyAccessError;

// ---------------------------------------------------------------------------
// AuthToken
// ---------------------------------------------------------------------------

/// A decoded bearer token carrying tenant and principal claims.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthToken {
    claims: serde_json::Map<String, Value>,
}

impl AuthToken {
    /// Decodes a raw JWT string without verifying its signature.
    ///
    /// # Errors
    ///
    /// Returns [`AuthTokenAccessError::Malformed`] if the string is not a
    /// structurally valid JWT.
    pub fn decode(raw: &str) -> Result<Self, AuthTokenAccessError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let decoded = jsonwebtoken::decode::<serde_json::Map<String, Value>>(
            raw,
            &DecodingKey::from_secret(&[]),
            &validation,
        )
        .map_err(|source| AuthTokenAccessError::Malformed { source })?;
        Ok(Self { claims: decoded.claims })
    }

    /// Builds a token directly from a claim map. Mainly useful in tests and
    /// for platform facades that receive pre-decoded tokens.
    #[must_use]
    pub fn from_claims(claims: serde_json::Map<String, Value>) -> Self {
        Self { claims }
    }

    /// The `iss` claim, if present.
    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        self.string_claim("iss")
    }

    /// The `aud` claim. The claim may be a single string or an array of
    /// strings; both forms are returned as a list.
    #[must_use]
    pub fn audience(&self) -> Vec<String> {
        match self.claims.get("aud") {
            Some(Value::String(aud)) => vec![aud.clone()],
            Some(Value::Array(auds)) => auds
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Returns the named claim if it is a string.
    #[must_use]
    pub fn string_claim(&self, name: &str) -> Option<&str> {
        self.claims.get(name).and_then(Value::as_str)
    }

    /// All claims of the token.
    #[must_use]
    pub fn claims(&self) -> &serde_json::Map<String, Value> {
        &self.claims
    }
}

// ---------------------------------------------------------------------------
// AuthTokenAccessError
// ---------------------------------------------------------------------------

/// Errors raised when no auth token can be resolved for the current task.
#[derive(Debug, thiserror::Error)]
pub enum AuthTokenAccessError {
    /// No thread context is active; nothing to look a token up in.
    #[error("no thread context is associated with the current task")]
    NoCurrentContext,
    /// A context is active but holds no token.
    #[error("no auth token is available in the current context: {reason}")]
    NotAvailable {
        /// Why no token could be determined.
        reason: String,
    },
    /// A token slot exists but its resolution failed earlier; the failure
    /// is cached on the context for the remainder of the scope.
    #[error("auth token resolution failed")]
    ResolutionFailed {
        #[source]
        source: PropertyAccessError,
    },
    /// The raw token string could not be decoded.
    #[error("auth token is not a valid JWT")]
    Malformed {
        #[source]
        source: jsonwebtoken::errors::Error,
    },
}

// ---------------------------------------------------------------------------
// Facade SPI
// ---------------------------------------------------------------------------

/// Strategy for resolving the current [`AuthToken`]. Swappable process-wide
/// via [`set_auth_token_facade`] so tests and platform integrations can
/// substitute their own resolution without touching call sites.
pub trait AuthTokenFacade: Send + Sync {
    /// Resolves the token for the calling task.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthTokenAccessError`] describing why no token is
    /// available.
    fn try_current_token(&self) -> Result<AuthToken, AuthTokenAccessError>;
}

static AUTH_TOKEN_FACADE: ArcSwapOption<Box<dyn AuthTokenFacade>> = ArcSwapOption::const_empty();

/// Replaces the process-wide token resolution strategy. Passing `None`
/// restores the default strategy.
pub fn set_auth_token_facade(facade: Option<Box<dyn AuthTokenFacade>>) {
    AUTH_TOKEN_FACADE.store(facade.map(Arc::new));
}

/// Default strategy: read the token property of the current context.
#[derive(Debug, Default)]
pub struct DefaultAuthTokenFacade;

impl AuthTokenFacade for DefaultAuthTokenFacade {
    fn try_current_token(&self) -> Result<AuthToken, AuthTokenAccessError> {
        let context = ThreadContextAccessor::current_context()
            .map_err(|_| AuthTokenAccessError::NoCurrentContext)?;
        match context.get_property_value::<AuthToken>(property_keys::AUTH_TOKEN) {
            Ok(token) => Ok((*token).clone()),
            Err(PropertyAccessError::Missing { .. }) => Err(AuthTokenAccessError::NotAvailable {
                reason: "no auth token property is set on the current context".to_string(),
            }),
            Err(source) => Err(AuthTokenAccessError::ResolutionFailed { source }),
        }
    }
}

// ---------------------------------------------------------------------------
// AuthTokenAccessor
// ---------------------------------------------------------------------------

/// Process-wide lookup point for the ambient auth token.
pub struct AuthTokenAccessor;

impl AuthTokenAccessor {
    /// Returns the current token.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthTokenAccessError`] when no token can be resolved.
    pub fn current_token() -> Result<AuthToken, AuthTokenAccessError> {
        match AUTH_TOKEN_FACADE.load_full() {
            Some(facade) => facade.try_current_token(),
            None => DefaultAuthTokenFacade.try_current_token(),
        }
    }

    /// Returns the current token, treating absence as a normal branch.
    #[must_use]
    pub fn try_current_token() -> Option<AuthToken> {
        Self::current_token().ok()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
