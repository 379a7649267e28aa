//! Fault-tolerance decorators for cirrus services.
//!
//! A [`ResilienceConfiguration`] describes the policy for one logical call
//! site: a bulkhead bounding concurrency, a fixed-window rate limiter, and
//! a time limiter enforcing a deadline, each independently switchable and
//! optionally partitioned per tenant or user. [`ResilienceDecorator`]
//! applies the policy to async callables; limiter state is shared across
//! calls through per-provider registries.
//!
//! Deadline-bounded work runs on a spawned task carrying a fork of the
//! caller's thread context, so the ambient tenant, principal, and token
//! from `cirrus-core` remain visible inside the decorated work.

pub mod bulkhead;
pub mod configuration;
pub mod decorator;
pub mod error;
pub mod isolation;
pub mod rate_limiter;
pub mod time_limiter;

pub use bulkhead::{Bulkhead, BulkheadProvider};
pub use configuration::{
    BulkheadConfiguration, IsolationMode, RateLimiterConfiguration, ResilienceConfiguration,
    TimeLimiterConfiguration,
};
pub use decorator::ResilienceDecorator;
pub use error::ResilienceError;
pub use isolation::IsolationKey;
pub use rate_limiter::{RateLimiter, RateLimiterProvider};
pub use time_limiter::{TimeLimiter, TimeLimiterProvider};

/// Boxed future produced by decorated callables.
pub type ResilientCall<T> = futures_util::future::BoxFuture<'static, Result<T, ResilienceError>>;

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        let config = crate::ResilienceConfiguration::of("smoke");
        assert_eq!(config.identifier(), "smoke");
    }
}
