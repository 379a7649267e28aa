//! Fixed-window rate limiter.
//!
//! Each limiter tracks one window of `limit_refresh_period` length. A call
//! consumes one permit from the current window; when the window is
//! exhausted, callers wait for the next refresh up to their configured
//! timeout and are rejected if the refresh falls beyond it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::configuration::{RateLimiterConfiguration, ResilienceConfiguration};
use crate::error::ResilienceError;
use crate::isolation::IsolationKey;
use crate::ResilientCall;

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Window {
    opened_at: Instant,
    used: u32,
}

/// A single named fixed-window limiter.
#[derive(Debug)]
pub struct RateLimiter {
    identifier: String,
    limit_for_period: u32,
    limit_refresh_period: Duration,
    timeout_duration: Duration,
    window: Mutex<Window>,
}

impl RateLimiter {
    fn new(identifier: &str, config: &RateLimiterConfiguration) -> Self {
        Self {
            identifier: identifier.to_string(),
            limit_for_period: config.limit_for_period(),
            limit_refresh_period: config.limit_refresh_period(),
            timeout_duration: config.timeout_duration(),
            window: Mutex::new(Window { opened_at: Instant::now(), used: 0 }),
        }
    }

    /// Identifier this limiter was created for.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Consumes one permit, waiting for the next window refresh if the
    /// current window is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::RequestNotPermitted`] when no permit
    /// becomes available within the configured timeout.
    pub async fn acquire(&self) -> Result<(), ResilienceError> {
        let deadline = Instant::now() + self.timeout_duration;
        loop {
            let next_refresh = {
                let mut window = self.window.lock();
                let now = Instant::now();
                if now.duration_since(window.opened_at) >= self.limit_refresh_period {
                    window.opened_at = now;
                    window.used = 0;
                }
                if window.used < self.limit_for_period {
                    window.used += 1;
                    return Ok(());
                }
                window.opened_at + self.limit_refresh_period
            };
            if next_refresh > deadline {
                return Err(ResilienceError::RequestNotPermitted {
                    identifier: self.identifier.clone(),
                });
            }
            tokio::time::sleep_until(next_refresh).await;
        }
    }
}

// ---------------------------------------------------------------------------
// RateLimiterProvider
// ---------------------------------------------------------------------------

/// Registry of [`RateLimiter`] instances, keyed by isolation key and
/// configuration identifier.
#[derive(Debug, Clone, Default)]
pub struct RateLimiterProvider {
    registry: Arc<DashMap<(IsolationKey, String), Arc<RateLimiter>>>,
}

impl RateLimiterProvider {
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
    /// Returns [`ResilienceError::Misconfigured`] when the rate-limiter
    /// sub-configuration is disabled, or an isolation-key resolution
    /// error.
    pub fn rate_limiter(
        &self,
        config: &ResilienceConfiguration,
    ) -> Result<Arc<RateLimiter>, ResilienceError> {
        let sub = config.rate_limiter_configuration();
        if !sub.is_enabled() {
            return Err(ResilienceError::Misconfigured {
                identifier: config.identifier().to_string(),
                reason: "cannot fetch a rate limiter from a disabled rate limiter configuration",
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
                debug!(identifier = config.identifier(), "creating rate limiter");
                Arc::new(RateLimiter::new(config.identifier(), sub))
            })
            .value()
            .clone();
        Ok(limiter)
    }

    /// Runs `callable` after consuming one permit. A disabled
    /// sub-configuration is a transparent passthrough.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::RequestNotPermitted`] when the limit is
    /// exhausted, or a lookup error.
    pub async fn call<T, F, Fut>(
        &self,
        callable: F,
        config: &ResilienceConfiguration,
    ) -> Result<T, ResilienceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if !config.rate_limiter_configuration().is_enabled() {
            return Ok(callable().await);
        }
        let limiter = self.rate_limiter(config)?;
        limiter.acquire().await?;
        Ok(callable().await)
    }

    /// Wraps `callable` so each invocation consumes a rate permit first.
    /// The isolation key is resolved when the returned callable is
    /// invoked, not when it is created.
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
