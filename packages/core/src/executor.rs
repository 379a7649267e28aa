//! Context-propagation executor.
//!
//! [`ThreadContextExecutor`] runs a unit of work with a [`ThreadContext`]
//! installed as the task's current context, invoking registered
//! [`ThreadContextListener`]s around it:
//!
//! 1. **Acquire**: the container is given explicitly, forked from the
//!    caller's current context, or created fresh.
//! 2. **Begin**: listeners run in registration order; the first failure
//!    aborts the call before the work starts.
//! 3. **Run**: the work executes with the container current.
//! 4. **End**: listeners run in reverse order on every exit path (normal
//!    return, work failure, panic, future cancellation), then the previous
//!    current context is restored.
//!
//! Storage is a tokio task-local, so nested scopes shadow and restore the
//! outer container with strict stack discipline and concurrently running
//! tasks never observe each other's context.

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::context::ThreadContext;
use crate::listener::{default_listeners, ThreadContextListener};

tokio::task_local! {
    static CURRENT_CONTEXT: Arc<ThreadContext>;
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure to resolve the current task's [`ThreadContext`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum ThreadContextAccessError {
    /// The calling task is not inside any executor scope.
    #[error("no thread context is associated with the current task")]
    NoCurrentContext,
}

/// Failures raised by [`ThreadContextExecutor::execute`] itself. Errors of
/// the wrapped work are not translated; they travel through the generic
/// return value untouched.
#[derive(Debug, thiserror::Error)]
pub enum ThreadContextExecutionError {
    /// A listener failed during context-begin. The work never ran.
    #[error("context listener '{listener}' failed during context begin")]
    ListenerBeginFailed {
        /// Name of the failing listener.
        listener: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

// ---------------------------------------------------------------------------
// ThreadContextAccessor
// ---------------------------------------------------------------------------

/// Read access to the current task's [`ThreadContext`].
pub struct ThreadContextAccessor;

impl ThreadContextAccessor {
    /// Returns the context current for this task.
    ///
    /// # Errors
    ///
    /// Returns [`ThreadContextAccessError::NoCurrentContext`] when the task
    /// is not executing inside a [`ThreadContextExecutor`] scope.
    pub fn current_context() -> Result<Arc<ThreadContext>, ThreadContextAccessError> {
        CURRENT_CONTEXT
            .try_with(Arc::clone)
            .map_err(|_| ThreadContextAccessError::NoCurrentContext)
    }

    /// Returns the context current for this task, or `None`.
    #[must_use]
    pub fn try_current_context() -> Option<Arc<ThreadContext>> {
        Self::current_context().ok()
    }
}

// ---------------------------------------------------------------------------
// End guard
// ---------------------------------------------------------------------------

/// Runs end listeners in reverse begin order when dropped.
///
/// Living in a drop guard makes the end phase unconditional: it fires on
/// normal return, on work failure, while unwinding from a panic, and when
/// an async scope is dropped mid-flight (cancellation). Only listeners
/// whose begin hook succeeded are ended, keeping begin/end in matched
/// pairs.
struct EndGuard<'a> {
    listeners: &'a [Arc<dyn ThreadContextListener>],
    context: &'a ThreadContext,
    begun: usize,
}

impl<'a> EndGuard<'a> {
    fn begin(
        listeners: &'a [Arc<dyn ThreadContextListener>],
        context: &'a ThreadContext,
    ) -> Result<Self, ThreadContextExecutionError> {
        let mut guard = Self { listeners, context, begun: 0 };
        for listener in listeners {
            listener.on_context_begin(context).map_err(|err| {
                ThreadContextExecutionError::ListenerBeginFailed {
                    listener: listener.name(),
                    source: err.into(),
                }
            })?;
            guard.begun += 1;
        }
        Ok(guard)
    }
}

impl Drop for EndGuard<'_> {
    fn drop(&mut self) {
        for listener in self.listeners[..self.begun].iter().rev() {
            // A panicking end listener must not replace the work's result,
            // and must not abort the process when this drop already runs
            // during unwinding from the work's own panic.
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.on_context_end(self.context);
            }));
            if outcome.is_err() {
                warn!(listener = listener.name(), "context listener panicked during context end");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ThreadContextExecutor
// ---------------------------------------------------------------------------

/// Executes closures or futures within a [`ThreadContext`] scope.
///
/// ```
/// use cirrus_core::{ThreadContextExecutor, TenantAccessor};
///
/// let tenant = ThreadContextExecutor::from_new_context()
///     .execute(TenantAccessor::try_current_tenant)
///     .unwrap();
/// assert!(tenant.is_none()); // fresh context carries no tenant
/// ```
pub struct ThreadContextExecutor {
    context: Arc<ThreadContext>,
    listeners: Vec<Arc<dyn ThreadContextListener>>,
}

impl ThreadContextExecutor {
    fn with_context(context: Arc<ThreadContext>) -> Self {
        Self { context, listeners: default_listeners() }
    }

    /// Uses a new, empty context.
    #[must_use]
    pub fn from_new_context() -> Self {
        Self::with_context(Arc::new(ThreadContext::new()))
    }

    /// Forks the caller's current context.
    ///
    /// # Errors
    ///
    /// Returns [`ThreadContextAccessError::NoCurrentContext`] when the
    /// calling task has no current context.
    pub fn from_current_context() -> Result<Self, ThreadContextAccessError> {
        let current = ThreadContextAccessor::current_context()?;
        Ok(Self::with_context(Arc::new(current.duplicate())))
    }

    /// Forks the caller's current context if one exists, otherwise starts
    /// from a new, empty context. This is the variant used when handing
    /// work to another task so it inherits the caller's ambient state.
    #[must_use]
    pub fn from_current_or_new_context() -> Self {
        match ThreadContextAccessor::try_current_context() {
            Some(current) => Self::with_context(Arc::new(current.duplicate())),
            None => Self::from_new_context(),
        }
    }

    /// Uses the given context directly, without copying. The caller keeps
    /// ownership and may continue to observe the container after the scope
    /// ends, including properties set by listeners during the scope.
    #[must_use]
    pub fn using(context: Arc<ThreadContext>) -> Self {
        Self::with_context(context)
    }

    /// Drops the standard tenant/principal/token listeners, leaving only
    /// listeners added explicitly afterwards.
    #[must_use]
    pub fn without_default_listeners(mut self) -> Self {
        self.listeners.clear();
        self
    }

    /// Registers an additional listener. Begin order is registration
    /// order; end order is the exact reverse.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn ThreadContextListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Registers several listeners at once.
    #[must_use]
    pub fn with_listeners(
        mut self,
        listeners: impl IntoIterator<Item = Arc<dyn ThreadContextListener>>,
    ) -> Self {
        self.listeners.extend(listeners);
        self
    }

    /// The context this executor will install.
    #[must_use]
    pub fn context(&self) -> &Arc<ThreadContext> {
        &self.context
    }

    /// Runs `work` synchronously with this executor's context current.
    ///
    /// The work's own result, fallible or not, is returned unchanged inside
    /// `Ok`; this method only fails if a begin listener fails, in which
    /// case the work never ran.
    ///
    /// # Errors
    ///
    /// Returns [`ThreadContextExecutionError::ListenerBeginFailed`] if a
    /// listener rejected the context.
    pub fn execute<T>(&self, work: impl FnOnce() -> T) -> Result<T, ThreadContextExecutionError> {
        CURRENT_CONTEXT.sync_scope(Arc::clone(&self.context), || {
            let _guard = EndGuard::begin(&self.listeners, &self.context)?;
            Ok(work())
        })
    }

    /// Runs `work` with this executor's context current across all of the
    /// future's suspension points.
    ///
    /// End listeners also run if the returned future is dropped before
    /// completion, so cancelled scopes are cleaned up like finished ones.
    ///
    /// # Errors
    ///
    /// Returns [`ThreadContextExecutionError::ListenerBeginFailed`] if a
    /// listener rejected the context; the work never ran.
    pub async fn execute_async<F>(self, work: F) -> Result<F::Output, ThreadContextExecutionError>
    where
        F: Future,
    {
        let context = Arc::clone(&self.context);
        let listeners = self.listeners;
        CURRENT_CONTEXT
            .scope(Arc::clone(&context), async move {
                let _guard = EndGuard::begin(&listeners, &context)?;
                Ok(work.await)
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// Task spawning
// ---------------------------------------------------------------------------

/// Spawns `work` onto the tokio runtime with a fork of the caller's current
/// context installed, so accessor lookups inside the task resolve the same
/// ambient tenant/principal/token as the spawning task.
pub fn spawn_with_context<F>(work: F) -> JoinHandle<Result<F::Output, ThreadContextExecutionError>>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let executor = ThreadContextExecutor::from_current_or_new_context();
    debug!(properties = ?executor.context().property_keys(), "spawning task with forked context");
    tokio::spawn(executor.execute_async(work))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::context::ThreadContext;
    use crate::property::Property;

    /// Listener that records its begin/end invocations in a shared log.
    struct RecordingListener {
        id: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_begin: bool,
    }

    impl RecordingListener {
        fn new(id: &'static str, log: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self { id, log, fail_begin: false })
        }

        fn failing(id: &'static str, log: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self { id, log, fail_begin: true })
        }
    }

    impl ThreadContextListener for RecordingListener {
        fn name(&self) -> &'static str {
            self.id
        }

        fn on_context_begin(&self, _context: &ThreadContext) -> anyhow::Result<()> {
            self.log.lock().push(format!("begin:{}", self.id));
            if self.fail_begin {
                anyhow::bail!("listener {} rejected the context", self.id);
            }
            Ok(())
        }

        fn on_context_end(&self, _context: &ThreadContext) {
            self.log.lock().push(format!("end:{}", self.id));
        }
    }

    /// Listener whose end hook always panics.
    struct ExplodingEndListener;

    impl ThreadContextListener for ExplodingEndListener {
        fn name(&self) -> &'static str {
            "exploding"
        }

        fn on_context_begin(&self, _context: &ThreadContext) -> anyhow::Result<()> {
            Ok(())
        }

        fn on_context_end(&self, _context: &ThreadContext) {
            panic!("end hook exploded");
        }
    }

    fn bare_executor() -> ThreadContextExecutor {
        ThreadContextExecutor::from_new_context().without_default_listeners()
    }

    #[test]
    fn no_context_outside_scope() {
        assert!(ThreadContextAccessor::try_current_context().is_none());
        assert!(matches!(
            ThreadContextAccessor::current_context(),
            Err(ThreadContextAccessError::NoCurrentContext)
        ));
    }

    #[test]
    fn execute_installs_and_removes_context() {
        let result = bare_executor()
            .execute(|| ThreadContextAccessor::try_current_context().is_some())
            .unwrap();
        assert!(result);
        assert!(ThreadContextAccessor::try_current_context().is_none());
    }

    #[test]
    fn nested_scopes_restore_outer_context_lifo() {
        let outer = Arc::new(ThreadContext::new());
        outer.set_property("depth", Property::of_value(0_u32));

        ThreadContextExecutor::using(Arc::clone(&outer))
            .without_default_listeners()
            .execute(|| {
                let inner = Arc::new(ThreadContext::new());
                inner.set_property("depth", Property::of_value(1_u32));

                ThreadContextExecutor::using(inner)
                    .without_default_listeners()
                    .execute(|| {
                        let current = ThreadContextAccessor::current_context().unwrap();
                        assert_eq!(*current.get_property_value::<u32>("depth").unwrap(), 1);
                    })
                    .unwrap();

                // Inner scope ended: the outer container is current again.
                let current = ThreadContextAccessor::current_context().unwrap();
                assert_eq!(*current.get_property_value::<u32>("depth").unwrap(), 0);
                assert!(Arc::ptr_eq(&current, &outer));
            })
            .unwrap();
    }

    #[test]
    fn listeners_end_in_reverse_begin_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        bare_executor()
            .with_listener(RecordingListener::new("a", log.clone()))
            .with_listener(RecordingListener::new("b", log.clone()))
            .with_listener(RecordingListener::new("c", log.clone()))
            .execute(|| ())
            .unwrap();

        assert_eq!(
            *log.lock(),
            vec!["begin:a", "begin:b", "begin:c", "end:c", "end:b", "end:a"]
        );
    }

    #[test]
    fn listeners_end_even_when_work_panics() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let executor = bare_executor()
            .with_listener(RecordingListener::new("a", log.clone()))
            .with_listener(RecordingListener::new("b", log.clone()));

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            executor.execute(|| panic!("boom")).unwrap();
        }));
        assert!(outcome.is_err());
        assert_eq!(
            *log.lock(),
            vec!["begin:a", "begin:b", "end:b", "end:a"]
        );
    }

    #[test]
    fn panicking_end_listener_does_not_mask_the_work_result() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let result = bare_executor()
            .with_listener(RecordingListener::new("a", log.clone()))
            .with_listener(Arc::new(ExplodingEndListener))
            .execute(|| 42_u32)
            .unwrap();

        assert_eq!(result, 42);
        // "exploding" ends first (reverse order); its panic is contained
        // and the remaining listeners still end.
        assert_eq!(*log.lock(), vec!["begin:a", "end:a"]);
    }

    #[test]
    fn panicking_end_listener_during_work_panic_does_not_abort() {
        // The work's own panic is already unwinding when the guard drops;
        // a second panic from the end hook would abort the process.
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _: Result<(), _> = bare_executor()
                .with_listener(Arc::new(ExplodingEndListener))
                .execute(|| panic!("work failed"));
        }));
        // The work's panic is the one that surfaces.
        assert!(outcome.is_err());
    }

    #[test]
    fn begin_failure_aborts_before_work_and_ends_begun_listeners() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let ran = Arc::new(Mutex::new(false));
        let ran_flag = ran.clone();

        let err = bare_executor()
            .with_listener(RecordingListener::new("ok", log.clone()))
            .with_listener(RecordingListener::failing("bad", log.clone()))
            .with_listener(RecordingListener::new("never", log.clone()))
            .execute(move || *ran_flag.lock() = true)
            .unwrap_err();

        assert!(matches!(
            err,
            ThreadContextExecutionError::ListenerBeginFailed { listener: "bad", .. }
        ));
        assert!(!*ran.lock());
        // "bad" began (and failed) but only "ok" completed begin, so only
        // "ok" is ended.
        assert_eq!(*log.lock(), vec!["begin:ok", "begin:bad", "end:ok"]);
    }

    #[tokio::test]
    async fn async_scope_spans_await_points() {
        let context = Arc::new(ThreadContext::new());
        context.set_property("marker", Property::of_value("here".to_string()));

        let marker = ThreadContextExecutor::using(context)
            .without_default_listeners()
            .execute_async(async {
                tokio::task::yield_now().await;
                let current = ThreadContextAccessor::current_context().unwrap();
                (*current.get_property_value::<String>("marker").unwrap()).clone()
            })
            .await
            .unwrap();
        assert_eq!(marker, "here");
    }

    #[tokio::test]
    async fn cancelled_async_scope_still_ends_listeners() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let fut = bare_executor()
            .with_listener(RecordingListener::new("a", log.clone()))
            .execute_async(async {
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            });

        let handle = tokio::spawn(fut);
        tokio::task::yield_now().await;
        handle.abort();
        let _ = handle.await;

        assert_eq!(*log.lock(), vec!["begin:a", "end:a"]);
    }

    #[tokio::test]
    async fn spawn_with_context_forks_callers_context() {
        let context = Arc::new(ThreadContext::new());
        context.set_property("tenant-ish", Property::of_value("t1".to_string()));

        let value = ThreadContextExecutor::using(context)
            .without_default_listeners()
            .execute_async(async {
                spawn_with_context(async {
                    let current = ThreadContextAccessor::current_context().unwrap();
                    (*current.get_property_value::<String>("tenant-ish").unwrap()).clone()
                })
                .await
                .unwrap()
                .unwrap()
            })
            .await
            .unwrap();
        assert_eq!(value, "t1");
    }

    #[test]
    fn using_keeps_caller_ownership_of_container() {
        let context = Arc::new(ThreadContext::new());
        ThreadContextExecutor::using(Arc::clone(&context))
            .without_default_listeners()
            .execute(|| {
                ThreadContextAccessor::current_context()
                    .unwrap()
                    .set_property("set-inside", Property::of_value(1_u32));
            })
            .unwrap();

        // Mutations made during the scope remain visible afterwards.
        assert_eq!(*context.get_property_value::<u32>("set-inside").unwrap(), 1);
    }
}
