use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::{ConfigError, SourceError};

/// The contract between a store and the external system feeding it.
///
/// A store invokes [`open`](Source::open) exactly once per activation, i.e.
/// on every transition from zero observers to one, and never concurrently
/// for the same store.  The implementation should begin delivering data
/// through the provided [`SourceSink`] and return a [`Teardown`] that stops
/// the delivery when invoked.
///
/// Delivery may happen synchronously from within `open` itself; the store
/// accepts pushes before `open` has returned.  Anything pushed through a
/// sink belonging to an activation that has since been torn down is
/// discarded.
pub trait Source<T>: Send + Sync + 'static {
    fn open(&self, sink: SourceSink<T>) -> Result<Teardown, SourceError>;
}

/// Closures of the right shape act as sources directly, mirroring the
/// start-notifier style of callback APIs this crate fronts.
impl<T, F> Source<T> for F
where
    F: Fn(SourceSink<T>) -> Result<Teardown, SourceError> + Send + Sync + 'static,
{
    fn open(&self, sink: SourceSink<T>) -> Result<Teardown, SourceError> {
        (self)(sink)
    }
}

/// Push channel handed to a [`Source`] on open.
///
/// Cloneable and callable from any thread; each call is delivered whole to
/// the owning store in call order.  The sink is bound to the activation it
/// was created for, so holding on to one past teardown is harmless.
pub struct SourceSink<T> {
    deliver: Arc<dyn Fn(Result<T, SourceError>) + Send + Sync>,
}

impl<T> Clone for SourceSink<T> {
    fn clone(&self) -> Self {
        Self {
            deliver: Arc::clone(&self.deliver),
        }
    }
}

impl<T: 'static> SourceSink<T> {
    pub(crate) fn new(deliver: Arc<dyn Fn(Result<T, SourceError>) + Send + Sync>) -> Self {
        Self { deliver }
    }

    /// Deliver the next value.
    pub fn next(&self, value: T) {
        (self.deliver)(Ok(value));
    }

    /// Report a source failure.  The store surfaces it as error state; the
    /// subscription itself stays open and later values are still accepted.
    pub fn error(&self, error: SourceError) {
        (self.deliver)(Err(error));
    }

    /// Derive a sink accepting `U`, translating every value with `f` before
    /// delivery.  Errors pass through unchanged.
    ///
    /// This is how the specialized stores feed their raw backend event
    /// types into a store holding a processed value type.
    pub fn map<U, F>(&self, f: F) -> SourceSink<U>
    where
        U: 'static,
        F: Fn(U) -> T + Send + Sync + 'static,
    {
        let deliver = Arc::clone(&self.deliver);
        SourceSink {
            deliver: Arc::new(move |event: Result<U, SourceError>| deliver(event.map(&f))),
        }
    }
}

/// Close capability returned by [`Source::open`].
///
/// Runs its close action at most once: either explicitly through
/// [`run`](Teardown::run) or implicitly when dropped, so an abandoned
/// activation can never leak the backend subscription.
pub struct Teardown {
    close: Option<Box<dyn FnOnce() + Send>>,
}

impl Teardown {
    pub fn new(close: impl FnOnce() + Send + 'static) -> Self {
        Self {
            close: Some(Box::new(close)),
        }
    }

    /// A teardown with nothing to close, for sources that finish delivering
    /// before `open` returns.
    pub fn noop() -> Self {
        Self { close: None }
    }

    pub(crate) fn run(mut self) {
        if let Some(close) = self.close.take() {
            close();
        }
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        if let Some(close) = self.close.take() {
            close();
        }
    }
}

/// Adapter exposing a one-shot asynchronous operation as a [`Source`].
///
/// Every activation invokes the factory for a fresh future and spawns it on
/// the runtime captured at construction; the future's outcome is delivered
/// as a single value or error push.  Teardown aborts an operation that has
/// not finished, so an observerless store stops paying for the work.
pub struct FutureSource<F> {
    factory: F,
    handle: Handle,
}

impl<F> FutureSource<F> {
    /// Fails with [`ConfigError::RuntimeUnavailable`] when called outside a
    /// tokio runtime, as there would be nowhere to run the operation.
    pub fn new(factory: F) -> Result<Self, ConfigError> {
        let handle = Handle::try_current().map_err(|_| ConfigError::RuntimeUnavailable)?;
        Ok(Self { factory, handle })
    }
}

impl<T, F, Fut> Source<T> for FutureSource<F>
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, SourceError>> + Send + 'static,
{
    fn open(&self, sink: SourceSink<T>) -> Result<Teardown, SourceError> {
        let fut = (self.factory)();
        let task: JoinHandle<()> = self.handle.spawn(async move {
            match fut.await {
                Ok(value) => sink.next(value),
                Err(error) => sink.error(error),
            }
        });
        Ok(Teardown::new(move || task.abort()))
    }
}

mod debug {
    use super::*;
    use std::fmt;

    impl<T> fmt::Debug for SourceSink<T> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("SourceSink").finish_non_exhaustive()
        }
    }

    impl fmt::Debug for Teardown {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Teardown")
                .field("armed", &self.close.is_some())
                .finish()
        }
    }

    impl<F> fmt::Debug for FutureSource<F> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("FutureSource").finish_non_exhaustive()
        }
    }
}
