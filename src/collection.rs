use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::document::Document;
use crate::error::ConfigError;
use crate::options::{CollectionOptions, StoreConfig};
use crate::source::{Source, SourceSink};
use crate::store::{ObserverHandle, Snapshot, Store, Updates};
use crate::trace::TraceCollector;

/// One item as delivered by a collection source: the backend's id for it,
/// the backend path it lives under, and the document data itself.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDoc {
    pub id: String,
    pub path: String,
    pub data: Document,
}

impl SourceDoc {
    pub fn new(id: impl Into<String>, path: impl Into<String>, data: Document) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            data,
        }
    }
}

/// First/last-item metadata, recomputed wholesale with every batch.  Empty
/// for an empty batch; for a single item, first and last are that item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchMeta {
    pub first: Option<Value>,
    pub last: Option<Value>,
}

impl BatchMeta {
    fn from_items(items: &[Value]) -> Self {
        Self {
            first: items.first().cloned(),
            last: items.last().cloned(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_none() && self.last.is_none()
    }
}

/// Value pushed by a [`CollectionStore`]: the processed items together with
/// their metadata, so every snapshot is coherent on its own.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub items: Vec<Value>,
    pub meta: BatchMeta,
}

/// Observable container over a list-shaped source.
///
/// The value is always a whole [`Batch`]; an empty batch is a valid push,
/// distinct from "no value yet".  Each item's backend id and path are
/// merged into its JSON object under the configured `id_field` and
/// `ref_field` keys, overriding data the item itself carried under those
/// keys.  With `once` set, the source is closed right after the first
/// batch was delivered; observers stay registered and the batch freezes.
#[derive(Clone)]
pub struct CollectionStore {
    store: Store<Batch>,
}

impl CollectionStore {
    pub fn new(
        source: impl Source<Vec<SourceDoc>>,
        options: CollectionOptions,
    ) -> Result<Self, ConfigError> {
        Self::build(source, options, None)
    }

    /// Like [`new`](Self::new) with an explicit trace collector; the
    /// session factories use this to share theirs.
    pub fn with_collector(
        source: impl Source<Vec<SourceDoc>>,
        options: CollectionOptions,
        collector: Arc<dyn TraceCollector>,
    ) -> Result<Self, ConfigError> {
        Self::build(source, options, Some(collector))
    }

    fn build(
        source: impl Source<Vec<SourceDoc>>,
        options: CollectionOptions,
        collector: Option<Arc<dyn TraceCollector>>,
    ) -> Result<Self, ConfigError> {
        options.validate()?;
        let CollectionOptions {
            start_with,
            timeout,
            once,
            trace_id,
            log,
            id_field,
            ref_field,
        } = options;
        let config = StoreConfig {
            // seeded items are taken as-is, with no metadata derived
            start_with: start_with.map(|items| Batch {
                items,
                meta: BatchMeta::default(),
            }),
            timeout,
            once,
            trace_id,
            log,
            fallback: None,
            collector,
        };
        let adapted = move |sink: SourceSink<Batch>| {
            let id_field = id_field.clone();
            let ref_field = ref_field.clone();
            // fresh per activation: its first batch is the new query
            let seen = Arc::new(AtomicBool::new(false));
            source.open(sink.map(move |docs: Vec<SourceDoc>| {
                let update = seen.swap(true, Ordering::AcqRel);
                to_batch(docs, &id_field, &ref_field, log, update)
            }))
        };
        Ok(Self {
            store: Store::new(adapted, config)?,
        })
    }

    /// See [`Store::subscribe`].
    pub fn subscribe<F>(&self, on_update: F) -> ObserverHandle
    where
        F: Fn(&Snapshot<Batch>) + Send + Sync + 'static,
    {
        self.store.subscribe(on_update)
    }

    /// See [`Store::get`].
    pub fn get(&self) -> Snapshot<Batch> {
        self.store.get()
    }

    /// See [`Store::updates`].
    pub fn updates(&self) -> Updates<Batch> {
        self.store.updates()
    }
}

fn to_batch(
    docs: Vec<SourceDoc>,
    id_field: &Option<String>,
    ref_field: &Option<String>,
    log: bool,
    update: bool,
) -> Batch {
    let items: Vec<Value> = docs
        .into_iter()
        .map(|doc| merge_fields(doc, id_field, ref_field))
        .collect();
    if log {
        let query = if update { "updated" } else { "new" };
        tracing::debug!(hits = items.len(), query, "collection batch");
    }
    let meta = BatchMeta::from_items(&items);
    Batch { items, meta }
}

fn merge_fields(doc: SourceDoc, id_field: &Option<String>, ref_field: &Option<String>) -> Value {
    let SourceDoc { id, path, mut data } = doc;
    if let Some(field) = id_field {
        data.insert(field.clone(), Value::String(id));
    }
    if let Some(field) = ref_field {
        data.insert(field.clone(), Value::String(path));
    }
    Value::Object(data)
}

mod debug {
    use super::*;
    use std::fmt;

    impl fmt::Debug for CollectionStore {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("CollectionStore")
                .field("store", &self.store)
                .finish()
        }
    }
}
