//! The thread context container: an insertion-ordered bag of named
//! [`Property`] slots representing one logical unit of ambient execution
//! state (tenant, principal, auth token, custom properties).
//!
//! A `ThreadContext` is owned by one execution scope at a time. It becomes
//! "current" for a task only while a [`ThreadContextExecutor`] scope is
//! active and is restored to its previous owner when that scope ends.
//! Containers are not meant for concurrent mutation from several scopes at
//! once; the interior locks exist so listeners can populate the container
//! during context-begin while accessor reads hold shared references.
//!
//! [`ThreadContextExecutor`]: crate::executor::ThreadContextExecutor

use std::any::Any;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::property::{Property, PropertyAccessError};

/// Well-known property keys used by the default listeners and facades.
pub mod property_keys {
    /// Key under which the current [`Tenant`](crate::tenant::Tenant) is stored.
    pub const TENANT: &str = "cirrus.tenant";
    /// Key under which the current [`Principal`](crate::principal::Principal) is stored.
    pub const PRINCIPAL: &str = "cirrus.principal";
    /// Key under which the current [`AuthToken`](crate::auth_token::AuthToken) is stored.
    pub const AUTH_TOKEN: &str = "cirrus.auth-token";
}

// ---------------------------------------------------------------------------
// ThreadContext
// ---------------------------------------------------------------------------

/// Insertion-ordered mapping from `String` keys to [`Property`] slots.
///
/// Keys are unique; setting an existing key replaces the stored slot without
/// triggering resolution of either the old or the new property.
#[derive(Debug, Default)]
pub struct ThreadContext {
    properties: RwLock<Vec<(String, Arc<Property>)>>,
}

impl ThreadContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `property` under `key`, replacing any existing slot.
    pub fn set_property(&self, key: impl Into<String>, property: Arc<Property>) {
        let key = key.into();
        let mut properties = self.properties.write();
        if let Some(entry) = properties.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = property;
        } else {
            properties.push((key, property));
        }
    }

    /// Stores the property produced by `make` under `key` unless a slot for
    /// `key` already exists. Used by listeners to avoid clobbering values
    /// that were forked from a parent context.
    pub fn set_property_if_absent(&self, key: impl Into<String>, make: impl FnOnce() -> Arc<Property>) {
        let key = key.into();
        let mut properties = self.properties.write();
        if !properties.iter().any(|(k, _)| *k == key) {
            properties.push((key, make()));
        }
    }

    /// Removes and returns the slot stored under `key`.
    pub fn remove_property(&self, key: &str) -> Option<Arc<Property>> {
        let mut properties = self.properties.write();
        let index = properties.iter().position(|(k, _)| k == key)?;
        Some(properties.remove(index).1)
    }

    /// Returns the slot stored under `key` without resolving it.
    #[must_use]
    pub fn get_property(&self, key: &str) -> Option<Arc<Property>> {
        self.properties
            .read()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, p)| p.clone())
    }

    /// Resolves and returns the value stored under `key`.
    ///
    /// Triggers lazy resolution on first read; a resolution failure is
    /// cached on the property and returned unchanged on subsequent reads.
    ///
    /// # Errors
    ///
    /// Returns [`PropertyAccessError::Missing`] if no slot exists for `key`,
    /// otherwise any error reported by [`Property::get`].
    pub fn get_property_value<T: Any + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Arc<T>, PropertyAccessError> {
        let property = self
            .get_property(key)
            .ok_or_else(|| PropertyAccessError::Missing { key: key.to_string() })?;
        property.get::<T>()
    }

    /// Returns all keys in insertion order.
    #[must_use]
    pub fn property_keys(&self) -> Vec<String> {
        self.properties.read().iter().map(|(k, _)| k.clone()).collect()
    }

    /// Forks this context into a new, independently owned container.
    ///
    /// The key set is copied; the `Property` slots themselves are shared via
    /// `Arc`, so a resolution outcome cached in one container is visible in
    /// the fork (and vice versa), while key insertion/removal stays fully
    /// independent. The fork is an exclusive-ownership copy, not a live view.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        Self {
            properties: RwLock::new(self.properties.read().clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_keep_insertion_order() {
        let context = ThreadContext::new();
        context.set_property("b", Property::of_value(2_u32));
        context.set_property("a", Property::of_value(1_u32));
        context.set_property("c", Property::of_value(3_u32));
        assert_eq!(context.property_keys(), vec!["b", "a", "c"]);
    }

    #[test]
    fn set_replaces_existing_key_in_place() {
        let context = ThreadContext::new();
        context.set_property("key", Property::of_value("old".to_string()));
        context.set_property("other", Property::of_value(0_u32));
        context.set_property("key", Property::of_value("new".to_string()));

        assert_eq!(context.property_keys(), vec!["key", "other"]);
        assert_eq!(
            *context.get_property_value::<String>("key").unwrap(),
            "new"
        );
    }

    #[test]
    fn set_if_absent_keeps_existing_value() {
        let context = ThreadContext::new();
        context.set_property("key", Property::of_value(1_u32));
        context.set_property_if_absent("key", || Property::of_value(2_u32));
        assert_eq!(*context.get_property_value::<u32>("key").unwrap(), 1);
    }

    #[test]
    fn missing_key_is_reported() {
        let context = ThreadContext::new();
        let err = context.get_property_value::<u32>("absent").unwrap_err();
        assert!(matches!(err, PropertyAccessError::Missing { .. }));
    }

    #[test]
    fn remove_property_returns_slot() {
        let context = ThreadContext::new();
        context.set_property("key", Property::of_value(1_u32));
        assert!(context.remove_property("key").is_some());
        assert!(context.get_property("key").is_none());
        assert!(context.remove_property("key").is_none());
    }

    #[test]
    fn duplicate_shares_slots_but_not_keys() {
        let context = ThreadContext::new();
        context.set_property("shared", Property::of_value(1_u32));

        let fork = context.duplicate();
        fork.set_property("own", Property::of_value(2_u32));
        context.remove_property("shared");

        // Key mutations are independent.
        assert!(context.get_property("own").is_none());
        assert_eq!(*fork.get_property_value::<u32>("shared").unwrap(), 1);
    }

    #[test]
    fn duplicate_shares_cached_resolution() {
        let context = ThreadContext::new();
        context.set_property("lazy", Property::of_lazy(|| Ok(7_u32)));
        let fork = context.duplicate();

        assert_eq!(*fork.get_property_value::<u32>("lazy").unwrap(), 7);
        // Resolution in the fork is visible through the original slot.
        assert!(context.get_property("lazy").unwrap().is_resolved());
    }
}
