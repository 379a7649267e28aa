//! Deadline enforcement for decorated calls.
//!
//! The work runs on its own spawned task so the deadline fires even while
//! the work is stuck between suspension points. The spawned task gets a
//! fork of the caller's thread context installed, so tenant, principal,
//! and token lookups inside the work resolve the same ambient identity as
//! the calling task.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, warn};

use cirrus_core::ThreadContextExecutor;

use crate::configuration::{ResilienceConfiguration, TimeLimiterConfiguration};
use crate::error::ResilienceError;
use crate::isolation::IsolationKey;
use crate::ResilientCall;

// ---------------------------------------------------------------------------
// TimeLimiter
// ---------------------------------------------------------------------------

/// A single named deadline enforcer.
#[derive(Debug)]
pub struct TimeLimiter {
    identifier: String,
    timeout_duration: Duration,
    cancel_running_future: bool,
}

impl TimeLimiter {
    fn new(identifier: &str, config: &TimeLimiterConfiguration) -> Self {
        Self {
            identifier: identifier.to_string(),
            timeout_duration: config.timeout_duration(),
            cancel_running_future: config.cancel_running_future(),
        }
    }

    /// Identifier this limiter was created for.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// The enforced deadline.
    #[must_use]
    pub fn timeout_duration(&self) -> Duration {
        self.timeout_duration
    }

    /// Runs `callable` on a spawned task with the caller's context forked
    /// onto it, failing if it does not finish within the deadline.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::TimedOut`] when the deadline passes,
    /// [`ResilienceError::TaskPanicked`] when the work panics, or a
    /// context-propagation error if a begin listener rejected the forked
    /// context.
    pub async fn call<T, F, Fut>(&self, callable: F) -> Result<T, ResilienceError>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let executor = ThreadContextExecutor::from_current_or_new_context();
        let mut handle = tokio::spawn(executor.execute_async(async move { callable().await }));

        match tokio::time::timeout(self.timeout_duration, &mut handle).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(propagation))) => Err(propagation.into()),
            Ok(Err(join_error)) => {
                warn!(identifier = %self.identifier, %join_error, "deadline-bounded task failed");
                Err(ResilienceError::TaskPanicked { identifier: self.identifier.clone() })
            }
            Err(_elapsed) => {
                if self.cancel_running_future {
                    handle.abort();
                }
                Err(ResilienceError::TimedOut {
                    identifier: self.identifier.clone(),
                    timeout: self.timeout_duration,
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// TimeLimiterProvider
// ---------------------------------------------------------------------------

/// Registry of [`TimeLimiter`] instances, keyed by isolation key and
/// configuration identifier.
#[derive(Debug, Clone, Default)]
pub struct TimeLimiterProvider {
    registry: Arc<DashMap<(IsolationKey, String), Arc<TimeLimiter>>>,
}

impl TimeLimiterProvider {
    /// Creates a provider with an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns (creating if absent) the limiter selected by the
    /// configuration's identifier and isolation mode.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::Misconfigured`] when the time-limiter
    /// sub-configuration is disabled, or an isolation-key resolution
    /// error.
    pub fn time_limiter(
        &self,
        config: &ResilienceConfiguration,
    ) -> Result<Arc<TimeLimiter>, ResilienceError> {
        let sub = config.time_limiter_configuration();
        if !sub.is_enabled() {
            return Err(ResilienceError::Misconfigured {
                identifier: config.identifier().to_string(),
                reason: "cannot fetch a time limiter from a disabled time limiter configuration",
            });
        }
        let key = (
            IsolationKey::resolve(config.isolation_mode())?,
            config.identifier().to_string(),
        );
        let limiter = self
            .registry
            .entry(key)
            .or_insert_with(|| {
                debug!(identifier = config.identifier(), "creating time limiter");
                Arc::new(TimeLimiter::new(config.identifier(), sub))
            })
            .value()
            .clone();
        Ok(limiter)
    }

    /// Runs `callable` under the configured deadline. A disabled
    /// sub-configuration is a transparent passthrough on the calling task,
    /// with no spawn and no deadline.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::TimedOut`] when the deadline passes, or
    /// a lookup error.
    pub async fn call<T, F, Fut>(
        &self,
        callable: F,
        config: &ResilienceConfiguration,
    ) -> Result<T, ResilienceError>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        if !config.time_limiter_configuration().is_enabled() {
            return Ok(callable().await);
        }
        let limiter = self.time_limiter(config)?;
        limiter.call(callable).await
    }

    /// Wraps `callable` so each invocation runs under the configured
    /// deadline. The isolation key and the caller's context are resolved
    /// when the returned callable is invoked, not when it is created.
    pub fn decorate_callable<T, F, Fut>(
        &self,
        callable: F,
        config: &ResilienceConfiguration,
    ) -> impl FnOnce() -> ResilientCall<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let provider = self.clone();
        let config = config.clone();
        move || Box::pin(async move { provider.call(callable, &config).await })
    }

    /// Drops every cached limiter. Intended for test isolation.
    pub fn clear(&self) {
        self.registry.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
