//! Composition of all limiter stages into one decorator.
//!
//! Stage order is fixed: the rate limiter gates admission first, then a
//! bulkhead permit is taken and held for the whole call, then the time
//! limiter enforces the deadline on the work itself. Disabled stages are
//! skipped entirely.

use std::future::Future;
use std::sync::OnceLock;

use tracing::debug;

use crate::bulkhead::BulkheadProvider;
use crate::configuration::ResilienceConfiguration;
use crate::error::ResilienceError;
use crate::rate_limiter::RateLimiterProvider;
use crate::time_limiter::TimeLimiterProvider;
use crate::ResilientCall;

static GLOBAL_DECORATOR: OnceLock<ResilienceDecorator> = OnceLock::new();

// ---------------------------------------------------------------------------
// ResilienceDecorator
// ---------------------------------------------------------------------------

/// Applies a [`ResilienceConfiguration`] to async callables.
///
/// Limiter instances live in the decorator's provider registries, so
/// repeated calls with the same configuration identifier and isolation key
/// share state. Most applications use the process-wide [`global`]
/// decorator; independent instances exist for tests and embedded setups.
///
/// [`global`]: ResilienceDecorator::global
#[derive(Debug, Clone, Default)]
pub struct ResilienceDecorator {
    bulkheads: BulkheadProvider,
    rate_limiters: RateLimiterProvider,
    time_limiters: TimeLimiterProvider,
}

impl ResilienceDecorator {
    /// Creates a decorator with empty limiter registries.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide decorator instance.
    #[must_use]
    pub fn global() -> &'static Self {
        GLOBAL_DECORATOR.get_or_init(Self::new)
    }

    /// Bulkhead registry of this decorator.
    #[must_use]
    pub fn bulkheads(&self) -> &BulkheadProvider {
        &self.bulkheads
    }

    /// Rate-limiter registry of this decorator.
    #[must_use]
    pub fn rate_limiters(&self) -> &RateLimiterProvider {
        &self.rate_limiters
    }

    /// Time-limiter registry of this decorator.
    #[must_use]
    pub fn time_limiters(&self) -> &TimeLimiterProvider {
        &self.time_limiters
    }

    /// Runs `callable` under every enabled stage of `config`.
    ///
    /// With every stage disabled this is a plain invocation on the calling
    /// task: no spawn, no permits, no deadline.
    ///
    /// # Errors
    ///
    /// Returns the rejecting stage's error unchanged:
    /// [`ResilienceError::RequestNotPermitted`],
    /// [`ResilienceError::BulkheadFull`], or
    /// [`ResilienceError::TimedOut`]. Isolation-key resolution and context
    /// propagation errors surface the same way.
    pub async fn execute<T, F, Fut>(
        &self,
        callable: F,
        config: &ResilienceConfiguration,
    ) -> Result<T, ResilienceError>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        if config.rate_limiter_configuration().is_enabled() {
            self.rate_limiters.rate_limiter(config)?.acquire().await?;
        }

        // The permit spans the whole call, including time spent inside the
        // time limiter, so concurrent occupancy is what the bulkhead sees.
        let _permit = if config.bulkhead_configuration().is_enabled() {
            Some(self.bulkheads.bulkhead(config)?.acquire().await?)
        } else {
            None
        };

        self.time_limiters.call(callable, config).await
    }

    /// Wraps `callable` so invoking the result applies every enabled stage
    /// of `config`. Limiters and the isolation key are resolved per
    /// invocation.
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
        let decorator = self.clone();
        let config = config.clone();
        move || Box::pin(async move { decorator.execute(callable, &config).await })
    }

    /// Drops every cached limiter in all three registries. Subsequent
    /// calls start from fresh limiter state.
    pub fn clear_all_limiters(&self) {
        debug!("clearing all cached limiters");
        self.bulkheads.clear();
        self.rate_limiters.clear();
        self.time_limiters.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
