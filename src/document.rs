use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{ConfigError, SourceError};
use crate::options::{DocumentOptions, StoreConfig};
use crate::source::{Source, SourceSink, Teardown};
use crate::store::{ObserverHandle, Snapshot, Store, Updates};
use crate::trace::TraceCollector;

/// JSON object shape a document source delivers per event.
pub type Document = Map<String, Value>;

/// Observable container over a single remote document.
///
/// The source pushes `Some(document)` while the document exists and `None`
/// when it is missing or was deleted.  A missing document is surfaced as
/// [`Value::Null`], which is a real push, distinct from "no value yet".
/// The one exception: if the very first event of the store's life reports
/// a missing document and `start_with` is configured, the configured value
/// is delivered in its place, so a freshly created view has something to
/// show while the document is still being written.
#[derive(Clone)]
pub struct DocumentStore {
    store: Store<Value>,
}

impl DocumentStore {
    pub fn new(
        source: impl Source<Option<Document>>,
        options: DocumentOptions,
    ) -> Result<Self, ConfigError> {
        Self::build(source, options, None)
    }

    /// Like [`new`](Self::new) with an explicit trace collector; the
    /// session factories use this to share theirs.
    pub fn with_collector(
        source: impl Source<Option<Document>>,
        options: DocumentOptions,
        collector: Arc<dyn TraceCollector>,
    ) -> Result<Self, ConfigError> {
        Self::build(source, options, Some(collector))
    }

    fn build(
        source: impl Source<Option<Document>>,
        options: DocumentOptions,
        collector: Option<Arc<dyn TraceCollector>>,
    ) -> Result<Self, ConfigError> {
        let config = StoreConfig {
            start_with: options.start_with.clone(),
            timeout: options.timeout,
            once: options.once,
            trace_id: options.trace_id,
            log: options.log,
            fallback: None,
            collector,
        };
        let adapted = DocumentSource {
            inner: source,
            start_with: options.start_with,
            first: Arc::new(AtomicBool::new(true)),
        };
        Ok(Self {
            store: Store::new(adapted, config)?,
        })
    }

    /// See [`Store::subscribe`].
    pub fn subscribe<F>(&self, on_update: F) -> ObserverHandle
    where
        F: Fn(&Snapshot<Value>) + Send + Sync + 'static,
    {
        self.store.subscribe(on_update)
    }

    /// See [`Store::get`].
    pub fn get(&self) -> Snapshot<Value> {
        self.store.get()
    }

    /// See [`Store::updates`].
    pub fn updates(&self) -> Updates<Value> {
        self.store.updates()
    }
}

/// Translates raw document events into the store's value type and keeps
/// the first-event bookkeeping for the `start_with` redelivery.  The flag
/// spans the store's whole life, not one activation: once any event has
/// been seen, a later missing document always reads as null.
struct DocumentSource<S> {
    inner: S,
    start_with: Option<Value>,
    first: Arc<AtomicBool>,
}

impl<S: Source<Option<Document>>> Source<Value> for DocumentSource<S> {
    fn open(&self, sink: SourceSink<Value>) -> Result<Teardown, SourceError> {
        let first = Arc::clone(&self.first);
        let start_with = self.start_with.clone();
        let deliver = move |event: Result<Option<Document>, SourceError>| {
            let was_first = first.swap(false, Ordering::AcqRel);
            match event {
                Ok(Some(document)) => sink.next(Value::Object(document)),
                Ok(None) => match &start_with {
                    Some(seed) if was_first => sink.next(seed.clone()),
                    _ => sink.next(Value::Null),
                },
                Err(error) => sink.error(error),
            }
        };
        self.inner.open(SourceSink::new(Arc::new(deliver)))
    }
}

mod debug {
    use super::*;
    use std::fmt;

    impl fmt::Debug for DocumentStore {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("DocumentStore")
                .field("store", &self.store)
                .finish()
        }
    }
}
