use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Instant;

use futures::Stream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::error::{ConfigError, SourceError, StoreError};
use crate::options::{FallbackBuilder, StoreConfig};
use crate::source::{Source, SourceSink, Teardown};
use crate::timeout::TimeoutGuard;
use crate::trace::{default_collector, TraceCollector};

/// Immutable view of a store's state at one point in time.
///
/// Observers receive a fresh snapshot with every push and may hold on to it
/// for as long as they like; nothing in it changes after delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    /// Last pushed value, or the configured seed before any push.
    pub value: Option<T>,
    /// True from construction until the first push of the store's life,
    /// never true again afterwards.
    pub loading: bool,
    /// Error carried by the most recent event; cleared by the next
    /// successful push.
    pub error: Option<StoreError>,
}

/// The event kinds feeding a store: a value from the source, an error from
/// the source, the timeout guard's deadline elapsing, and the one-off
/// replay owed to a freshly registered observer.  All of them go through
/// the same serialized dispatch path, so no replay can overtake or trail a
/// concurrent push.
enum Event<T> {
    Value(T),
    Error(SourceError),
    TimeoutElapsed,
    Replay(Arc<ObserverEntry<T>>),
}

enum Applied {
    Value,
    Error,
}

struct ObserverEntry<T> {
    id: u64,
    cancelled: AtomicBool,
    callback: Box<dyn Fn(&Snapshot<T>) + Send + Sync>,
}

struct State<T> {
    value: Option<T>,
    loading: bool,
    error: Option<StoreError>,
    observers: Vec<Arc<ObserverEntry<T>>>,
    next_observer_id: u64,
    /// Present iff the current activation opened successfully and has not
    /// been closed; consuming it is the only way to close the source.
    teardown: Option<Teardown>,
    /// Bumped on every activation and deactivation.  Sink deliveries and
    /// guard deadlines carry the cycle they were created in; anything from
    /// a closed cycle is dropped.
    cycle: u64,
    /// Set while `Source::open` is running outside the lock, so concurrent
    /// subscribers neither open a second time nor tear down an activation
    /// that has not finished opening.
    opening: bool,
    /// Set while a fan-out is in flight; events arriving meanwhile queue in
    /// `pending` and are dispatched in arrival order afterwards.
    dispatching: bool,
    pending: VecDeque<(u64, Event<T>)>,
    guard: TimeoutGuard,
    trace_open: bool,
    activated_at: Option<Instant>,
}

impl<T: Clone> State<T> {
    fn snapshot(&self) -> Snapshot<T> {
        Snapshot {
            value: self.value.clone(),
            loading: self.loading,
            error: self.error.clone(),
        }
    }
}

/// Lazily activated, multi-subscriber observable container over a
/// push-based [`Source`].
///
/// The store is inert at construction.  The first observer opens the source
/// and arms the timeout guard; every push from the source updates the state
/// and fans an immutable [`Snapshot`] out to all observers in registration
/// order; when the last observer leaves, the source is closed again.  The
/// state itself survives deactivation, so a later observer still sees the
/// last known value until a fresh activation pushes over it.
///
/// Cloning the store is cheap and yields a handle to the same container.
pub struct Store<T> {
    inner: Arc<StoreInner<T>>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Store<T> {
    /// Build a store over `source`.
    ///
    /// Fails with [`ConfigError::RuntimeUnavailable`] when a timeout is
    /// configured but no tokio runtime is reachable to run the guard timer
    /// on; everything else about the configuration is accepted as-is.
    pub fn new(source: impl Source<T>, config: StoreConfig<T>) -> Result<Self, ConfigError> {
        let runtime = match config.effective_timeout() {
            Some(_) => Some(Handle::try_current().map_err(|_| ConfigError::RuntimeUnavailable)?),
            None => None,
        };
        Ok(Self::assemble(Box::new(source), config, runtime))
    }

    pub(crate) fn assemble(
        source: Box<dyn Source<T>>,
        config: StoreConfig<T>,
        runtime: Option<Handle>,
    ) -> Self {
        let timeout = config.effective_timeout();
        Self {
            inner: Arc::new(StoreInner {
                source,
                collector: config.collector.unwrap_or_else(default_collector),
                trace_id: config.trace_id,
                once: config.once,
                log: config.log,
                fallback: config.fallback,
                state: Mutex::new(State {
                    value: config.start_with,
                    loading: true,
                    error: None,
                    observers: Vec::new(),
                    next_observer_id: 0,
                    teardown: None,
                    cycle: 0,
                    opening: false,
                    dispatching: false,
                    pending: VecDeque::new(),
                    guard: TimeoutGuard::new(timeout, runtime),
                    trace_open: false,
                    activated_at: None,
                }),
            }),
        }
    }

    /// Register an observer.
    ///
    /// If this is the first observer, the source is opened and the guard
    /// armed before registration.  The callback is then invoked once right
    /// away with the current snapshot, so a late subscriber sees the last
    /// known state without waiting for the next push.
    pub fn subscribe<F>(&self, on_update: F) -> ObserverHandle
    where
        F: Fn(&Snapshot<T>) + Send + Sync + 'static,
    {
        self.inner.activate_if_first();
        let (entry, cycle) = {
            let mut state = self.inner.lock_state();
            let id = state.next_observer_id;
            state.next_observer_id += 1;
            let entry = Arc::new(ObserverEntry {
                id,
                cancelled: AtomicBool::new(false),
                callback: Box::new(on_update),
            });
            state.observers.push(Arc::clone(&entry));
            (entry, state.cycle)
        };
        self.inner.process(cycle, Event::Replay(Arc::clone(&entry)));
        let inner = Arc::clone(&self.inner);
        ObserverHandle {
            cancel: Arc::new(move || {
                if !entry.cancelled.swap(true, Ordering::AcqRel) {
                    inner.remove_observer(entry.id);
                }
            }),
        }
    }

    /// Read the current state without blocking or registering anything.
    pub fn get(&self) -> Snapshot<T> {
        self.inner.lock_state().snapshot()
    }

    /// Observe the store as an asynchronous stream of snapshots.
    ///
    /// The current snapshot is yielded first, then one per push.  Dropping
    /// the stream unsubscribes, exactly like dropping an
    /// [`ObserverHandle`].
    pub fn updates(&self) -> Updates<T> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = self.subscribe(move |snapshot: &Snapshot<T>| {
            let _ = sender.send(snapshot.clone());
        });
        Updates {
            receiver,
            _handle: handle,
        }
    }
}

pub(crate) struct StoreInner<T> {
    source: Box<dyn Source<T>>,
    collector: Arc<dyn TraceCollector>,
    trace_id: Option<String>,
    once: bool,
    log: bool,
    fallback: Option<FallbackBuilder>,
    state: Mutex<State<T>>,
}

impl<T> StoreInner<T> {
    fn lock_state(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone + Send + Sync + 'static> StoreInner<T> {
    /// Open the source if this subscription transitions the observer count
    /// from zero to one.  The open call itself runs outside the state lock,
    /// so a source that pushes synchronously cannot deadlock; its pushes
    /// land as ordinary events of the new cycle.
    fn activate_if_first(self: &Arc<Self>) {
        let cycle = {
            let mut state = self.lock_state();
            if !state.observers.is_empty() || state.opening || state.teardown.is_some() {
                return;
            }
            state.opening = true;
            state.cycle += 1;
            let cycle = state.cycle;
            state.activated_at = Some(Instant::now());
            state.trace_open = self.trace_id.is_some();
            let weak = Arc::downgrade(self);
            state.guard.arm(cycle, move || {
                if let Some(inner) = weak.upgrade() {
                    inner.process(cycle, Event::TimeoutElapsed);
                }
            });
            cycle
        };
        if let Some(trace_id) = &self.trace_id {
            self.collector.start(trace_id);
        }
        tracing::debug!(cycle, "opening source");
        let weak = Arc::downgrade(self);
        let sink = SourceSink::new(Arc::new(move |delivery: Result<T, SourceError>| {
            if let Some(inner) = weak.upgrade() {
                let event = match delivery {
                    Ok(value) => Event::Value(value),
                    Err(error) => Event::Error(error),
                };
                inner.process(cycle, event);
            }
        }));
        match self.source.open(sink) {
            Ok(teardown) => {
                let stale = {
                    let mut state = self.lock_state();
                    state.opening = false;
                    if state.cycle == cycle {
                        state.teardown = Some(teardown);
                        None
                    } else {
                        // everyone left, or once mode already closed the
                        // cycle, while open was still running
                        Some(teardown)
                    }
                };
                if let Some(teardown) = stale {
                    teardown.run();
                }
            }
            Err(error) => {
                self.lock_state().opening = false;
                self.process(cycle, Event::Error(error));
            }
        }
    }

    /// Entry point for all three event kinds.  Events arriving while a
    /// fan-out is in flight (a source pushing from within an observer
    /// callback, or another thread) are queued and dispatched afterwards,
    /// keeping deliveries whole and in order.
    fn process(self: &Arc<Self>, cycle: u64, event: Event<T>) {
        let mut current = {
            let mut state = self.lock_state();
            if state.dispatching {
                state.pending.push_back((cycle, event));
                return;
            }
            state.dispatching = true;
            Some((cycle, event))
        };
        while let Some((cycle, event)) = current {
            self.dispatch(cycle, event);
            let mut state = self.lock_state();
            current = state.pending.pop_front();
            if current.is_none() {
                state.dispatching = false;
            }
        }
    }

    fn dispatch(self: &Arc<Self>, cycle: u64, event: Event<T>) {
        let mut state = self.lock_state();
        let applied = match event {
            // replays are not cycle-gated: a late subscriber is owed the
            // current snapshot no matter what happened to the activation
            // in the meantime
            Event::Replay(entry) => {
                let snapshot = state.snapshot();
                drop(state);
                deliver(&entry, &snapshot);
                return;
            }
            _ if state.cycle != cycle => {
                tracing::trace!(cycle, current = state.cycle, "dropping event from closed activation");
                return;
            }
            Event::Value(value) => {
                state.guard.disarm();
                state.value = Some(value);
                state.error = None;
                Applied::Value
            }
            Event::Error(error) => {
                state.guard.disarm();
                state.error = Some(StoreError::Source(error));
                Applied::Error
            }
            Event::TimeoutElapsed => {
                if !state.guard.try_fire(cycle) {
                    return;
                }
                let error = match &self.fallback {
                    Some(build) => build(),
                    None => StoreError::Timeout {
                        limit: state.guard.limit().unwrap_or_default(),
                    },
                };
                state.error = Some(error);
                Applied::Error
            }
        };
        state.loading = false;
        let snapshot = state.snapshot();
        let observers = state.observers.clone();
        let trace_elapsed = if state.trace_open {
            state.trace_open = false;
            state.activated_at.map(|started| started.elapsed())
        } else {
            None
        };
        drop(state);

        if self.log {
            match applied {
                Applied::Value => tracing::debug!(cycle, "value push"),
                Applied::Error => tracing::debug!(cycle, error = ?snapshot.error, "error push"),
            }
        }
        for entry in &observers {
            deliver(entry, &snapshot);
        }
        if let (Some(elapsed), Some(trace_id)) = (trace_elapsed, &self.trace_id) {
            self.collector.stop(trace_id, elapsed);
        }
        if matches!(applied, Applied::Value) && self.once {
            self.close_source(cycle);
        }
    }

    /// Forced close for once mode: the source goes away, observers stay,
    /// state freezes at the delivered value.
    fn close_source(self: &Arc<Self>, cycle: u64) {
        let teardown = {
            let mut state = self.lock_state();
            if state.cycle != cycle {
                return;
            }
            state.cycle += 1;
            state.guard.deactivate();
            state.trace_open = false;
            state.teardown.take()
        };
        if let Some(teardown) = teardown {
            tracing::debug!(cycle, "closing source after first value");
            teardown.run();
        }
        // with no teardown stored yet, the bumped cycle makes the opener
        // close it as soon as open returns
    }

    fn remove_observer(self: &Arc<Self>, id: u64) {
        let teardown = {
            let mut state = self.lock_state();
            state.observers.retain(|entry| entry.id != id);
            if !state.observers.is_empty() || state.opening {
                return;
            }
            state.cycle += 1;
            state.guard.deactivate();
            state.trace_open = false;
            state.activated_at = None;
            state.teardown.take()
        };
        if let Some(teardown) = teardown {
            tracing::debug!("closing source, last observer gone");
            teardown.run();
        }
    }
}

fn deliver<T>(entry: &ObserverEntry<T>, snapshot: &Snapshot<T>) {
    if entry.cancelled.load(Ordering::Acquire) {
        return;
    }
    if catch_unwind(AssertUnwindSafe(|| (entry.callback)(snapshot))).is_err() {
        tracing::warn!(observer = entry.id, "observer callback panicked");
    }
}

/// Unsubscribe capability returned by [`Store::subscribe`].
///
/// Unsubscribing removes the observer immediately; when it was the last
/// one, the source is closed in the same call.  Explicit unsubscription is
/// idempotent, and dropping the handle unsubscribes as well.
#[must_use = "dropping an ObserverHandle unsubscribes immediately"]
pub struct ObserverHandle {
    cancel: Arc<dyn Fn() + Send + Sync>,
}

impl ObserverHandle {
    pub fn unsubscribe(&self) {
        (self.cancel)();
    }
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        (self.cancel)();
    }
}

/// Stream of snapshots backing [`Store::updates`].
///
/// Never terminates on its own; it ends when dropped, which also removes
/// the underlying observer.
pub struct Updates<T> {
    receiver: mpsc::UnboundedReceiver<Snapshot<T>>,
    _handle: ObserverHandle,
}

impl<T> Stream for Updates<T> {
    type Item = Snapshot<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

mod debug {
    use super::*;
    use std::fmt;

    impl<T: fmt::Debug> fmt::Debug for Store<T> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let state = self.inner.lock_state();
            f.debug_struct("Store")
                .field("value", &state.value)
                .field("loading", &state.loading)
                .field("error", &state.error)
                .field("observers", &state.observers.len())
                .field("active", &state.teardown.is_some())
                .finish()
        }
    }

    impl fmt::Debug for ObserverHandle {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("ObserverHandle").finish_non_exhaustive()
        }
    }

    impl<T> fmt::Debug for Updates<T> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Updates").finish_non_exhaustive()
        }
    }
}
