//! Error taxonomy of the resilience layer.
//!
//! Limiter rejections keep their own variants all the way to the caller;
//! the decorators never swallow or translate them.

use std::time::Duration;

use cirrus_core::ThreadContextExecutionError;

use crate::configuration::IsolationMode;

/// Errors surfaced by decorated callables and limiter lookups.
#[derive(Debug, thiserror::Error)]
pub enum ResilienceError {
    /// A limiter was requested for a sub-configuration that is disabled.
    /// This is a programmer error and is never retried.
    #[error("resilience configuration '{identifier}' is invalid: {reason}")]
    Misconfigured {
        /// Configuration identifier.
        identifier: String,
        /// What is wrong with the configuration.
        reason: &'static str,
    },
    /// The configured isolation mode requires an identity that cannot be
    /// resolved for the calling task.
    #[error("isolation mode {mode:?} requires a current {missing}, but none could be resolved")]
    IsolationKeyUnavailable {
        /// The configured isolation mode.
        mode: IsolationMode,
        /// Which identity was missing ("tenant" or "principal").
        missing: &'static str,
    },
    /// All bulkhead permits are taken and none became free within the
    /// configured wait duration.
    #[error("bulkhead '{identifier}' is full")]
    BulkheadFull {
        /// Configuration identifier.
        identifier: String,
    },
    /// The rate limit was exhausted and no refresh happened within the
    /// configured timeout.
    #[error("rate limiter '{identifier}' does not permit further calls")]
    RequestNotPermitted {
        /// Configuration identifier.
        identifier: String,
    },
    /// The call did not finish within the configured deadline.
    #[error("call '{identifier}' did not finish within {timeout:?}")]
    TimedOut {
        /// Configuration identifier.
        identifier: String,
        /// The deadline that was exceeded.
        timeout: Duration,
    },
    /// Installing the forked thread context on the worker task failed.
    #[error("context propagation onto the worker task failed")]
    ContextPropagation(#[from] ThreadContextExecutionError),
    /// The deadline-bounded task panicked.
    #[error("call '{identifier}' panicked")]
    TaskPanicked {
        /// Configuration identifier.
        identifier: String,
    },
}
