//! Bulkhead: bounds the number of simultaneous in-flight calls per
//! identifier and isolation key.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::configuration::{BulkheadConfiguration, ResilienceConfiguration};
use crate::error::ResilienceError;
use crate::isolation::IsolationKey;
use crate::ResilientCall;

// ---------------------------------------------------------------------------
// Bulkhead
// ---------------------------------------------------------------------------

/// A single named concurrency limiter.
///
/// Permits are semaphore slots held for the duration of one call. With a
/// zero wait duration excess calls are rejected immediately; otherwise
/// they queue up to the configured wait before being rejected.
#[derive(Debug)]
pub struct Bulkhead {
    identifier: String,
    semaphore: Arc<Semaphore>,
    max_wait_duration: Duration,
}

impl Bulkhead {
    fn new(identifier: &str, config: &BulkheadConfiguration) -> Self {
        Self {
            identifier: identifier.to_string(),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_calls() as usize)),
            max_wait_duration: config.max_wait_duration(),
        }
    }

    /// Identifier this bulkhead was created for.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Currently free permits.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Acquires a permit, waiting up to the configured duration.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::BulkheadFull`] when no permit became
    /// available in time.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, ResilienceError> {
        let full = || ResilienceError::BulkheadFull { identifier: self.identifier.clone() };
        if self.max_wait_duration.is_zero() {
            return Arc::clone(&self.semaphore)
                .try_acquire_owned()
                .map_err(|_| full());
        }
        match tokio::time::timeout(
            self.max_wait_duration,
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) | Err(_) => Err(full()),
        }
    }
}

// ---------------------------------------------------------------------------
// BulkheadProvider
// ---------------------------------------------------------------------------

/// Registry of [`Bulkhead`] instances, keyed by isolation key and
/// configuration identifier. Instances are created lazily and shared for
/// the provider's lifetime; `DashMap::entry` gives atomic insert-if-absent
/// under concurrent first access.
#[derive(Debug, Clone, Default)]
pub struct BulkheadProvider {
    registry: Arc<DashMap<(IsolationKey, String), Arc<Bulkhead>>>,
}

impl BulkheadProvider {
    /// Creates a provider with an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns (creating if absent) the bulkhead selected by the
    /// configuration's identifier and isolation mode.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::Misconfigured`] when the bulkhead
    /// sub-configuration is disabled, or an isolation-key resolution
    /// error.
    pub fn bulkhead(
        &self,
        config: &ResilienceConfiguration,
    ) -> Result<Arc<Bulkhead>, ResilienceError> {
        let sub = config.bulkhead_configuration();
        if !sub.is_enabled() {
            return Err(ResilienceError::Misconfigured {
                identifier: config.identifier().to_string(),
                reason: "cannot fetch a bulkhead from a disabled bulkhead configuration",
            });
        }
        let key = (
            IsolationKey::resolve(config.isolation_mode())?,
            config.identifier().to_string(),
        );
        let bulkhead = self
            .registry
            .entry(key)
            .or_insert_with(|| {
                debug!(identifier = config.identifier(), "creating bulkhead");
                Arc::new(Bulkhead::new(config.identifier(), sub))
            })
            .value()
            .clone();
        Ok(bulkhead)
    }

    /// Runs `callable` under the configured bulkhead. A disabled
    /// sub-configuration is a transparent passthrough.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::BulkheadFull`] when no permit is
    /// available, or a lookup error.
    pub async fn call<T, F, Fut>(
        &self,
        callable: F,
        config: &ResilienceConfiguration,
    ) -> Result<T, ResilienceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if !config.bulkhead_configuration().is_enabled() {
            return Ok(callable().await);
        }
        let bulkhead = self.bulkhead(config)?;
        let _permit = bulkhead.acquire().await?;
        Ok(callable().await)
    }

    /// Wraps `callable` so each invocation acquires a bulkhead permit
    /// first. The isolation key is resolved when the returned callable is
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

    /// Drops every cached bulkhead. Intended for test isolation.
    pub fn clear(&self) {
        self.registry.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_concurrent: u32) -> ResilienceConfiguration {
        ResilienceConfiguration::empty("bulkhead-test")
            .with_bulkhead_configuration(BulkheadConfiguration::of(max_concurrent))
    }

    #[tokio::test]
    async fn allows_calls_under_limit() {
        let provider = BulkheadProvider::new();
        let result = provider.call(|| async { 21 * 2 }, &config(10)).await.unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn rejects_when_full() {
        let provider = BulkheadProvider::new();
        let config = config(1);

        // Occupy the single permit.
        let bulkhead = provider.bulkhead(&config).unwrap();
        let _held = bulkhead.acquire().await.unwrap();

        let err = provider.call(|| async {}, &config).await.unwrap_err();
        assert!(matches!(err, ResilienceError::BulkheadFull { .. }));
    }

    #[tokio::test]
    async fn waiting_call_proceeds_once_permit_frees_up() {
        let provider = BulkheadProvider::new();
        let config = ResilienceConfiguration::empty("waiting").with_bulkhead_configuration(
            BulkheadConfiguration::of(1).with_max_wait_duration(Duration::from_secs(5)),
        );

        let bulkhead = provider.bulkhead(&config).unwrap();
        let held = bulkhead.acquire().await.unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(held);
        });

        let result = provider.call(|| async { "ran" }, &config).await.unwrap();
        assert_eq!(result, "ran");
    }

    #[tokio::test]
    async fn disabled_configuration_is_passthrough() {
        let provider = BulkheadProvider::new();
        let config = ResilienceConfiguration::empty("disabled");
        let result = provider.call(|| async { 7 }, &config).await.unwrap();
        assert_eq!(result, 7);
        // Passthrough never touches the registry.
        assert!(provider.registry.is_empty());
    }

    #[tokio::test]
    async fn fetching_a_disabled_bulkhead_is_a_misconfiguration() {
        let provider = BulkheadProvider::new();
        let err = provider
            .bulkhead(&ResilienceConfiguration::empty("disabled"))
            .unwrap_err();
        assert!(matches!(err, ResilienceError::Misconfigured { .. }));
    }

    #[tokio::test]
    async fn same_identifier_shares_one_instance() {
        let provider = BulkheadProvider::new();
        let config = config(10);
        let first = provider.bulkhead(&config).unwrap();
        let second = provider.bulkhead(&config).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn different_identifiers_get_independent_instances() {
        let provider = BulkheadProvider::new();
        let first = provider.bulkhead(&config(10)).unwrap();
        let second = provider
            .bulkhead(
                &ResilienceConfiguration::empty("other")
                    .with_bulkhead_configuration(BulkheadConfiguration::of(10)),
            )
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn decorated_callable_resolves_lazily() {
        let provider = BulkheadProvider::new();
        let decorated = provider.decorate_callable(|| async { 1 }, &config(10));
        assert!(provider.registry.is_empty());
        assert_eq!(decorated().await.unwrap(), 1);
        assert_eq!(provider.registry.len(), 1);
    }
}
