//! Lazily evaluated, failure-caching property slots for [`ThreadContext`].
//!
//! A [`Property`] holds one type-erased value that is either supplied eagerly
//! or computed on first access. Resolution happens at most once: both a
//! successful value and a resolution failure are cached for the lifetime of
//! the `Property`, so repeated reads never re-run an expensive or failing
//! supplier (e.g., re-parsing a malformed token on every accessor call).
//!
//! [`ThreadContext`]: crate::context::ThreadContext

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::Mutex;

/// Type-erased property value shared between a container and its readers.
type PropertyValue = Arc<dyn Any + Send + Sync>;

/// Deferred computation producing a property value.
type PropertySupplier = Box<dyn FnOnce() -> anyhow::Result<PropertyValue> + Send>;

// ---------------------------------------------------------------------------
// PropertyAccessError
// ---------------------------------------------------------------------------

/// Errors observed when reading a property value.
///
/// The error is `Clone` so a cached resolution failure can be handed out to
/// every subsequent reader without re-running the supplier.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PropertyAccessError {
    /// No property is stored under the requested key.
    #[error("no property stored under key '{key}'")]
    Missing {
        /// The requested container key.
        key: String,
    },
    /// The supplier of a lazy property returned an error. The failure is
    /// sticky: the same error instance is returned on every read.
    #[error("property resolution failed: {0}")]
    ResolutionFailed(Arc<anyhow::Error>),
    /// The property holds a value of a different type than requested.
    #[error("property holds a value of a different type (expected {expected})")]
    TypeMismatch {
        /// Type name the caller asked for.
        expected: &'static str,
    },
}

// ---------------------------------------------------------------------------
// Property
// ---------------------------------------------------------------------------

/// Internal slot state. Transitions `Lazy -> Resolved` exactly once, under
/// the slot mutex, so concurrent first access runs the supplier at most once
/// (compute-and-cache, not memoize-after-race).
enum Slot {
    Lazy(PropertySupplier),
    Resolved(Result<PropertyValue, PropertyAccessError>),
}

/// A single named slot of a [`ThreadContext`].
///
/// Holds either a resolved value, a cached resolution failure, or a pending
/// supplier that is invoked on first read. Once resolved (success or
/// failure), the outcome is immutable.
///
/// [`ThreadContext`]: crate::context::ThreadContext
pub struct Property {
    slot: Mutex<Slot>,
    /// Confidential properties never expose their value via `Debug`.
    confidential: bool,
}

impl Property {
    /// Creates a property from an already computed value.
    pub fn of_value<T: Any + Send + Sync>(value: T) -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Slot::Resolved(Ok(Arc::new(value)))),
            confidential: false,
        })
    }

    /// Creates a property from an already computed value whose content must
    /// not appear in logs (e.g., an auth token).
    pub fn of_confidential_value<T: Any + Send + Sync>(value: T) -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Slot::Resolved(Ok(Arc::new(value)))),
            confidential: true,
        })
    }

    /// Creates a property whose value is computed on first read.
    ///
    /// The supplier is invoked at most once. Its outcome, including a
    /// failure, is cached for the lifetime of the property.
    pub fn of_lazy<T, F>(supplier: F) -> Arc<Self>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        Arc::new(Self {
            slot: Mutex::new(Slot::Lazy(Box::new(move || {
                supplier().map(|value| Arc::new(value) as PropertyValue)
            }))),
            confidential: false,
        })
    }

    /// Returns the property value, resolving the supplier on first access.
    ///
    /// # Errors
    ///
    /// Returns [`PropertyAccessError::ResolutionFailed`] with the cached
    /// failure if the supplier returned an error (now or on an earlier
    /// read), or [`PropertyAccessError::TypeMismatch`] if the stored value
    /// is not a `T`.
    pub fn get<T: Any + Send + Sync>(&self) -> Result<Arc<T>, PropertyAccessError> {
        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Lazy(_)) {
            // Placeholder stays in place if the supplier panics, keeping the
            // slot in a resolved (failed) state rather than poisoned.
            let placeholder = Slot::Resolved(Err(PropertyAccessError::ResolutionFailed(Arc::new(
                anyhow!("property supplier panicked"),
            ))));
            let Slot::Lazy(supplier) = std::mem::replace(&mut *slot, placeholder) else {
                unreachable!("slot state checked above");
            };
            let outcome = supplier()
                .map_err(|err| PropertyAccessError::ResolutionFailed(Arc::new(err)));
            *slot = Slot::Resolved(outcome);
        }

        let Slot::Resolved(outcome) = &*slot else {
            unreachable!("slot is resolved after first access");
        };
        outcome
            .clone()?
            .downcast::<T>()
            .map_err(|_| PropertyAccessError::TypeMismatch {
                expected: std::any::type_name::<T>(),
            })
    }

    /// Whether the property has been resolved (successfully or not).
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Resolved(_))
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.confidential {
            return f.write_str("Property(<confidential>)");
        }
        match &*self.slot.lock() {
            Slot::Lazy(_) => f.write_str("Property(<unresolved>)"),
            Slot::Resolved(Ok(_)) => f.write_str("Property(<resolved>)"),
            Slot::Resolved(Err(err)) => write!(f, "Property(<failed: {err}>)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
