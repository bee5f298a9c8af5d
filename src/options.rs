use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::{ConfigError, StoreError};
use crate::trace::TraceCollector;

/// Builds the error a silent activation settles with when the timeout guard
/// fires.  When absent, [`StoreError::Timeout`] is synthesized.
pub type FallbackBuilder = Arc<dyn Fn() -> StoreError + Send + Sync>;

/// Configuration for a core [`Store`](crate::store::Store).
///
/// Every field has an inert default: no seed value, no timeout guard, keep
/// the source open past the first value, no tracing, quiet.  The specialized
/// stores assemble one of these from their own option records.
pub struct StoreConfig<T> {
    /// Value exposed before any push.
    pub start_with: Option<T>,
    /// Time a fresh activation may stay silent before the guard synthesizes
    /// an error push.  `None` and a zero duration both disable the guard.
    pub timeout: Option<Duration>,
    /// Close the source right after the first value push, leaving observers
    /// registered and state frozen.
    pub once: bool,
    /// Identifier reported to the [`TraceCollector`]; absent disables the
    /// measurement entirely.
    pub trace_id: Option<String>,
    /// Emit a `tracing` debug event for every push.
    pub log: bool,
    /// Error built when the timeout guard fires.
    pub fallback: Option<FallbackBuilder>,
    /// Collector receiving trace spans; a `tracing`-backed one is used when
    /// absent.
    pub collector: Option<Arc<dyn TraceCollector>>,
}

impl<T> Default for StoreConfig<T> {
    fn default() -> Self {
        Self {
            start_with: None,
            timeout: None,
            once: false,
            trace_id: None,
            log: false,
            fallback: None,
            collector: None,
        }
    }
}

impl<T> StoreConfig<T> {
    /// The timeout with the disabled spellings collapsed: zero means no
    /// guard, same as absent.
    pub(crate) fn effective_timeout(&self) -> Option<Duration> {
        self.timeout.filter(|limit| !limit.is_zero())
    }
}

/// Options accepted by [`DocumentStore`](crate::document::DocumentStore).
#[derive(Debug, Clone, Default)]
pub struct DocumentOptions {
    /// Value exposed before any push, and redelivered in place of null if
    /// the first event of the store's life reports a missing document.
    pub start_with: Option<Value>,
    pub timeout: Option<Duration>,
    /// Close the source after the first document event.
    pub once: bool,
    pub trace_id: Option<String>,
    pub log: bool,
}

/// Options accepted by [`CollectionStore`](crate::collection::CollectionStore).
#[derive(Debug, Clone)]
pub struct CollectionOptions {
    /// Items exposed before any push.  Seeded items are taken as-is: no
    /// id/ref merge and no metadata are derived from them.
    pub start_with: Option<Vec<Value>>,
    pub timeout: Option<Duration>,
    /// Close the source after the first batch.
    pub once: bool,
    pub trace_id: Option<String>,
    pub log: bool,
    /// Key under which each item's backend id is merged into its JSON
    /// object, overriding an existing entry.  `None` skips the merge.
    pub id_field: Option<String>,
    /// Key under which each item's backend path is merged, likewise.
    pub ref_field: Option<String>,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            start_with: None,
            timeout: None,
            once: false,
            trace_id: None,
            log: false,
            id_field: Some("id".to_owned()),
            ref_field: Some("ref".to_owned()),
        }
    }
}

impl CollectionOptions {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        match (&self.id_field, &self.ref_field) {
            (Some(id), Some(reference)) if id == reference => {
                Err(ConfigError::ConflictingFieldNames { field: id.clone() })
            }
            _ => Ok(()),
        }
    }
}

/// Options accepted by [`TaskStore`](crate::task::TaskStore).
///
/// Tasks run until their own terminal event, so there is no timeout or
/// once mode to configure.
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    pub trace_id: Option<String>,
    pub log: bool,
}

mod debug {
    use super::*;
    use std::fmt;

    impl<T: fmt::Debug> fmt::Debug for StoreConfig<T> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("StoreConfig")
                .field("start_with", &self.start_with)
                .field("timeout", &self.timeout)
                .field("once", &self.once)
                .field("trace_id", &self.trace_id)
                .field("log", &self.log)
                .field("fallback", &self.fallback.is_some())
                .field("collector", &self.collector.is_some())
                .finish()
        }
    }
}
