use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use crate::error::{SourceError, StoreError};
use crate::options::{StoreConfig, TaskOptions};
use crate::source::{Source, SourceSink, Teardown};
use crate::store::{ObserverHandle, Snapshot, Store, Updates};
use crate::trace::{default_collector, TraceCollector};

/// Event pushed by a task source.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent<P, R> {
    /// The operation advanced.
    Progress(P),
    /// Terminal success: the closing progress snapshot plus the result.
    Completed(P, R),
    /// Terminal failure.
    Failed(SourceError),
}

/// Conventional progress payload for transfer-shaped tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub bytes_transferred: u64,
    pub total_bytes: u64,
}

impl TransferProgress {
    /// Completed fraction in `0.0..=1.0`; zero while the total is unknown.
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            self.bytes_transferred as f64 / self.total_bytes as f64
        }
    }
}

/// Observable container over a single long-running operation.
///
/// The source pushes any number of [`TaskEvent::Progress`] events and then
/// exactly one terminal event.  Progress lands as ordinary value pushes;
/// [`TaskEvent::Failed`] as an error push; [`TaskEvent::Completed`] as a
/// final value push, after which [`result`](TaskStore::result) yields the
/// settled outcome for the rest of the store's life.  Events arriving
/// after the terminal one are a source bug: they are ignored with a debug
/// note, never re-surfaced, since there is no next state to move to.
pub struct TaskStore<P, R> {
    store: Store<P>,
    settled: Arc<OnceLock<Result<R, StoreError>>>,
}

impl<P, R> Clone for TaskStore<P, R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            settled: Arc::clone(&self.settled),
        }
    }
}

impl<P, R> TaskStore<P, R>
where
    P: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    pub fn new(source: impl Source<TaskEvent<P, R>>, options: TaskOptions) -> Self {
        Self::build(source, options, default_collector())
    }

    /// Like [`new`](Self::new) with an explicit trace collector; the
    /// session factories use this to share theirs.
    pub fn with_collector(
        source: impl Source<TaskEvent<P, R>>,
        options: TaskOptions,
        collector: Arc<dyn TraceCollector>,
    ) -> Self {
        Self::build(source, options, collector)
    }

    fn build(
        source: impl Source<TaskEvent<P, R>>,
        options: TaskOptions,
        collector: Arc<dyn TraceCollector>,
    ) -> Self {
        let settled = Arc::new(OnceLock::new());
        let adapted = TaskSource {
            inner: source,
            settled: Arc::clone(&settled),
            terminal: Arc::new(AtomicBool::new(false)),
            collector: Arc::clone(&collector),
            trace_id: options.trace_id,
        };
        // the task measures its own span, from open to terminal event, so
        // no trace_id is handed to the inner store
        let config = StoreConfig {
            log: options.log,
            collector: Some(collector),
            ..StoreConfig::default()
        };
        Self {
            store: Store::assemble(Box::new(adapted), config, None),
            settled,
        }
    }

    /// Settled outcome: `None` until the terminal event, then the result
    /// or error for the rest of the store's life.  Never blocks.
    pub fn result(&self) -> Option<Result<R, StoreError>> {
        self.settled.get().cloned()
    }

    /// See [`Store::subscribe`].
    pub fn subscribe<F>(&self, on_update: F) -> ObserverHandle
    where
        F: Fn(&Snapshot<P>) + Send + Sync + 'static,
    {
        self.store.subscribe(on_update)
    }

    /// See [`Store::get`].
    pub fn get(&self) -> Snapshot<P> {
        self.store.get()
    }

    /// See [`Store::updates`].
    pub fn updates(&self) -> Updates<P> {
        self.store.updates()
    }
}

/// Splits task events into the store's value/error channels, records the
/// settled outcome, and drops everything after the terminal event.
struct TaskSource<S, R> {
    inner: S,
    settled: Arc<OnceLock<Result<R, StoreError>>>,
    terminal: Arc<AtomicBool>,
    collector: Arc<dyn TraceCollector>,
    trace_id: Option<String>,
}

impl<S, P, R> Source<P> for TaskSource<S, R>
where
    S: Source<TaskEvent<P, R>>,
    P: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    fn open(&self, sink: SourceSink<P>) -> Result<Teardown, SourceError> {
        let settled = Arc::clone(&self.settled);
        let terminal = Arc::clone(&self.terminal);
        let collector = Arc::clone(&self.collector);
        let trace_id = self.trace_id.clone();
        if let Some(id) = &trace_id {
            if !terminal.load(Ordering::Acquire) {
                collector.start(id);
            }
        }
        let started = Instant::now();
        let deliver = move |event: Result<TaskEvent<P, R>, SourceError>| {
            if terminal.load(Ordering::Acquire) {
                tracing::debug!("task event after terminal state ignored");
                return;
            }
            match event {
                Ok(TaskEvent::Progress(progress)) => sink.next(progress),
                Ok(TaskEvent::Completed(progress, result)) => {
                    if terminal.swap(true, Ordering::AcqRel) {
                        return;
                    }
                    let _ = settled.set(Ok(result));
                    sink.next(progress);
                    if let Some(id) = &trace_id {
                        collector.stop(id, started.elapsed());
                    }
                }
                Ok(TaskEvent::Failed(error)) | Err(error) => {
                    if terminal.swap(true, Ordering::AcqRel) {
                        return;
                    }
                    let _ = settled.set(Err(StoreError::Source(error.clone())));
                    sink.error(error);
                    if let Some(id) = &trace_id {
                        collector.stop(id, started.elapsed());
                    }
                }
            }
        };
        self.inner.open(SourceSink::new(Arc::new(deliver)))
    }
}

mod debug {
    use super::*;
    use std::fmt;

    impl<P: fmt::Debug, R> fmt::Debug for TaskStore<P, R> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("TaskStore")
                .field("store", &self.store)
                .field("settled", &self.settled.get().is_some())
                .finish()
        }
    }
}
