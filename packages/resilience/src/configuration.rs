//! Immutable, builder-style resilience configuration.
//!
//! A [`ResilienceConfiguration`] names a logical call site (`identifier`),
//! selects an [`IsolationMode`], and carries one sub-configuration per
//! limiter. Each sub-configuration can be disabled independently; a
//! disabled stage makes the corresponding decorator a transparent
//! passthrough.

use std::time::Duration;

/// Partitioning granularity for limiter instances.
///
/// The partition key itself (current tenant/principal id) is resolved via
/// the accessor facades at call time, not stored in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationMode {
    /// One process-wide limiter per identifier.
    NoIsolation,
    /// One limiter per tenant and identifier; requires a current tenant.
    Tenant,
    /// One limiter per principal and identifier; requires a current
    /// principal.
    User,
    /// One limiter per tenant+principal pair and identifier.
    TenantAndUser,
}

// ---------------------------------------------------------------------------
// BulkheadConfiguration
// ---------------------------------------------------------------------------

/// Concurrency limit for simultaneous in-flight calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkheadConfiguration {
    enabled: bool,
    max_concurrent_calls: u32,
    max_wait_duration: Duration,
}

impl BulkheadConfiguration {
    /// Default number of concurrent calls.
    pub const DEFAULT_MAX_CONCURRENT_CALLS: u32 = 50;

    /// Enabled configuration admitting `max_concurrent_calls` at once,
    /// rejecting immediately when full.
    #[must_use]
    pub fn of(max_concurrent_calls: u32) -> Self {
        Self {
            enabled: true,
            max_concurrent_calls,
            max_wait_duration: Duration::ZERO,
        }
    }

    /// Disabled configuration; the bulkhead stage becomes a passthrough.
    #[must_use]
    pub fn disabled() -> Self {
        Self { enabled: false, ..Self::default() }
    }

    /// How long an excess call may wait for a permit before being
    /// rejected. Zero means reject immediately.
    #[must_use]
    pub fn with_max_wait_duration(mut self, duration: Duration) -> Self {
        self.max_wait_duration = duration;
        self
    }

    /// Whether this stage is active.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Maximum simultaneous in-flight calls.
    #[must_use]
    pub fn max_concurrent_calls(&self) -> u32 {
        self.max_concurrent_calls
    }

    /// Maximum time to wait for a free permit.
    #[must_use]
    pub fn max_wait_duration(&self) -> Duration {
        self.max_wait_duration
    }
}

impl Default for BulkheadConfiguration {
    fn default() -> Self {
        Self::of(Self::DEFAULT_MAX_CONCURRENT_CALLS)
    }
}

// ---------------------------------------------------------------------------
// RateLimiterConfiguration
// ---------------------------------------------------------------------------

/// Fixed-window rate limit: at most `limit_for_period` calls per
/// `limit_refresh_period`, with callers willing to wait up to
/// `timeout_duration` for the next window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterConfiguration {
    enabled: bool,
    timeout_duration: Duration,
    limit_refresh_period: Duration,
    limit_for_period: u32,
}

impl RateLimiterConfiguration {
    /// Enabled configuration with the given window parameters.
    #[must_use]
    pub fn of(
        timeout_duration: Duration,
        limit_refresh_period: Duration,
        limit_for_period: u32,
    ) -> Self {
        Self {
            enabled: true,
            timeout_duration,
            limit_refresh_period,
            limit_for_period,
        }
    }

    /// Disabled configuration; the rate-limiter stage becomes a
    /// passthrough.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            timeout_duration: Duration::ZERO,
            limit_refresh_period: Duration::from_secs(1),
            limit_for_period: u32::MAX,
        }
    }

    /// Whether this stage is active.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Maximum time a caller waits for the next window.
    #[must_use]
    pub fn timeout_duration(&self) -> Duration {
        self.timeout_duration
    }

    /// Length of one rate window.
    #[must_use]
    pub fn limit_refresh_period(&self) -> Duration {
        self.limit_refresh_period
    }

    /// Permitted calls per window.
    #[must_use]
    pub fn limit_for_period(&self) -> u32 {
        self.limit_for_period
    }
}

impl Default for RateLimiterConfiguration {
    fn default() -> Self {
        Self::disabled()
    }
}

// ---------------------------------------------------------------------------
// TimeLimiterConfiguration
// ---------------------------------------------------------------------------

/// Deadline for one call, with optional cancellation of the running work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeLimiterConfiguration {
    enabled: bool,
    timeout_duration: Duration,
    cancel_running_future: bool,
}

impl TimeLimiterConfiguration {
    /// Default deadline.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Enabled configuration with the given deadline, cancelling the
    /// running work on timeout.
    #[must_use]
    pub fn of(timeout_duration: Duration) -> Self {
        Self {
            enabled: true,
            timeout_duration,
            cancel_running_future: true,
        }
    }

    /// Disabled configuration; the time-limiter stage becomes a
    /// passthrough.
    #[must_use]
    pub fn disabled() -> Self {
        Self { enabled: false, ..Self::default() }
    }

    /// Whether the running work is cancelled when the deadline passes.
    /// Cancellation stops the task at its next suspension point; it does
    /// not interrupt blocking work that never yields.
    #[must_use]
    pub fn with_cancel_running_future(mut self, cancel: bool) -> Self {
        self.cancel_running_future = cancel;
        self
    }

    /// Whether this stage is active.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The deadline for one call.
    #[must_use]
    pub fn timeout_duration(&self) -> Duration {
        self.timeout_duration
    }

    /// Whether timed-out work is cancelled.
    #[must_use]
    pub fn cancel_running_future(&self) -> bool {
        self.cancel_running_future
    }
}

impl Default for TimeLimiterConfiguration {
    fn default() -> Self {
        Self::of(Self::DEFAULT_TIMEOUT)
    }
}

// ---------------------------------------------------------------------------
// ResilienceConfiguration
// ---------------------------------------------------------------------------

/// Complete fault-tolerance policy for one logical call site.
///
/// Identifiers are also registry keys: two configurations with the same
/// identifier and isolation key share the same underlying limiter
/// instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResilienceConfiguration {
    identifier: String,
    isolation_mode: IsolationMode,
    bulkhead: BulkheadConfiguration,
    rate_limiter: RateLimiterConfiguration,
    time_limiter: TimeLimiterConfiguration,
}

impl ResilienceConfiguration {
    /// Standard configuration: default bulkhead and time limiter, no rate
    /// limiter, no isolation.
    #[must_use]
    pub fn of(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            isolation_mode: IsolationMode::NoIsolation,
            bulkhead: BulkheadConfiguration::default(),
            rate_limiter: RateLimiterConfiguration::disabled(),
            time_limiter: TimeLimiterConfiguration::default(),
        }
    }

    /// Configuration with every stage disabled; decorating with it is a
    /// no-op.
    #[must_use]
    pub fn empty(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            isolation_mode: IsolationMode::NoIsolation,
            bulkhead: BulkheadConfiguration::disabled(),
            rate_limiter: RateLimiterConfiguration::disabled(),
            time_limiter: TimeLimiterConfiguration::disabled(),
        }
    }

    /// Selects the limiter partitioning granularity.
    #[must_use]
    pub fn with_isolation_mode(mut self, mode: IsolationMode) -> Self {
        self.isolation_mode = mode;
        self
    }

    /// Replaces the bulkhead stage.
    #[must_use]
    pub fn with_bulkhead_configuration(mut self, config: BulkheadConfiguration) -> Self {
        self.bulkhead = config;
        self
    }

    /// Replaces the rate-limiter stage.
    #[must_use]
    pub fn with_rate_limiter_configuration(mut self, config: RateLimiterConfiguration) -> Self {
        self.rate_limiter = config;
        self
    }

    /// Replaces the time-limiter stage.
    #[must_use]
    pub fn with_time_limiter_configuration(mut self, config: TimeLimiterConfiguration) -> Self {
        self.time_limiter = config;
        self
    }

    /// Registry identifier of this call site.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Configured partitioning granularity.
    #[must_use]
    pub fn isolation_mode(&self) -> IsolationMode {
        self.isolation_mode
    }

    /// Bulkhead stage settings.
    #[must_use]
    pub fn bulkhead_configuration(&self) -> &BulkheadConfiguration {
        &self.bulkhead
    }

    /// Rate-limiter stage settings.
    #[must_use]
    pub fn rate_limiter_configuration(&self) -> &RateLimiterConfiguration {
        &self.rate_limiter
    }

    /// Time-limiter stage settings.
    #[must_use]
    pub fn time_limiter_configuration(&self) -> &TimeLimiterConfiguration {
        &self.time_limiter
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_configuration_enables_bulkhead_and_time_limiter() {
        let config = ResilienceConfiguration::of("my-call");
        assert_eq!(config.identifier(), "my-call");
        assert_eq!(config.isolation_mode(), IsolationMode::NoIsolation);
        assert!(config.bulkhead_configuration().is_enabled());
        assert!(!config.rate_limiter_configuration().is_enabled());
        assert!(config.time_limiter_configuration().is_enabled());
    }

    #[test]
    fn empty_configuration_disables_everything() {
        let config = ResilienceConfiguration::empty("noop");
        assert!(!config.bulkhead_configuration().is_enabled());
        assert!(!config.rate_limiter_configuration().is_enabled());
        assert!(!config.time_limiter_configuration().is_enabled());
    }

    #[test]
    fn builder_replaces_stages() {
        let config = ResilienceConfiguration::of("call")
            .with_isolation_mode(IsolationMode::Tenant)
            .with_bulkhead_configuration(
                BulkheadConfiguration::of(3).with_max_wait_duration(Duration::from_millis(10)),
            )
            .with_rate_limiter_configuration(RateLimiterConfiguration::of(
                Duration::ZERO,
                Duration::from_secs(1),
                100,
            ))
            .with_time_limiter_configuration(
                TimeLimiterConfiguration::of(Duration::from_secs(5))
                    .with_cancel_running_future(false),
            );

        assert_eq!(config.isolation_mode(), IsolationMode::Tenant);
        assert_eq!(config.bulkhead_configuration().max_concurrent_calls(), 3);
        assert_eq!(
            config.bulkhead_configuration().max_wait_duration(),
            Duration::from_millis(10)
        );
        assert_eq!(config.rate_limiter_configuration().limit_for_period(), 100);
        assert!(!config.time_limiter_configuration().cancel_running_future());
    }
}
