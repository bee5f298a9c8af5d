//! This crate provides lazily activated, multi-subscriber observable stores
//! over push-based data sources.  A store stays inert until somebody
//! observes it, opens its source exactly once for the first observer,
//! shares that single subscription among everyone who joins later, and
//! closes it again when the last observer leaves.  Every push updates a
//! coherent value/loading/error triple that is fanned out to observers as
//! an immutable snapshot, and an optional timeout guard bounds how long a
//! silent source can keep observers waiting.
//!
//! ## Use case
//!
//! Backends with live subscriptions - document watches, query listeners,
//! auth-state callbacks, resumable uploads - hand out data through
//! callbacks that start firing the moment the listener is registered and
//! keep firing until it is removed.  Consuming that shape directly from
//! application or UI state code means every consumer reimplements the same
//! bookkeeping: open the listener on first use, share it, track whether
//! data has arrived yet, remember the last error, close the listener when
//! nobody cares anymore, and put a bound on sources that never answer.
//!
//! The stores here centralize that bookkeeping behind one contract.  The
//! backend specifics stay outside: anything able to deliver values through
//! a [`SourceSink`] and hand back a [`Teardown`] can feed a store, which is
//! the whole [`Source`] trait.  On top of the core [`Store`] there are
//! specializations for single documents ([`DocumentStore`]), for
//! list-shaped queries with first/last metadata ([`CollectionStore`]), and
//! for one-off long-running operations with progress and a settled result
//! ([`TaskStore`]), plus a [`Session`] context that owns the identity
//! container an application would otherwise keep in a global.
//!
//! # Example
//!
//! ```
//! use std::sync::{Arc, Mutex};
//!
//! use pushstore::{
//!     CollectionOptions, CollectionStore, SourceDoc, SourceError, SourceSink, Teardown,
//! };
//! use serde_json::{json, Map};
//!
//! // A source delivering one batch synchronously on open.  A real one
//! // would register a backend listener here and deliver on every change,
//! // returning a teardown that removes the listener.
//! let source = |sink: SourceSink<Vec<SourceDoc>>| -> Result<Teardown, SourceError> {
//!     let mut data = Map::new();
//!     data.insert("title".to_owned(), json!("first post"));
//!     sink.next(vec![SourceDoc::new("p1", "posts/p1", data)]);
//!     Ok(Teardown::noop())
//! };
//!
//! let posts = CollectionStore::new(source, CollectionOptions::default())?;
//!
//! // Nothing has been opened yet; the first subscriber activates the
//! // source, and the snapshot fan-out starts from there.
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink_log = Arc::clone(&seen);
//! let handle = posts.subscribe(move |snapshot| {
//!     sink_log.lock().unwrap().push(snapshot.clone());
//! });
//!
//! let snapshot = posts.get();
//! assert!(!snapshot.loading);
//! let batch = snapshot.value.expect("the batch arrived during open");
//! assert_eq!(batch.items[0]["id"], json!("p1"));
//! assert_eq!(batch.items[0]["title"], json!("first post"));
//!
//! // Last observer gone: the source is closed on the spot.
//! handle.unsubscribe();
//! # Ok::<(), pushstore::ConfigError>(())
//! ```

pub mod collection;
pub mod document;
pub mod error;
pub mod options;
pub mod session;
pub mod source;
pub mod store;
pub mod task;
mod timeout;
pub mod trace;


pub use collection::{Batch, BatchMeta, CollectionStore, SourceDoc};
pub use document::{Document, DocumentStore};
pub use error::{ConfigError, SourceError, StoreError};
pub use options::{CollectionOptions, DocumentOptions, FallbackBuilder, StoreConfig, TaskOptions};
pub use session::{Identity, IdentityStore, Session};
pub use source::{FutureSource, Source, SourceSink, Teardown};
pub use store::{ObserverHandle, Snapshot, Store, Updates};
pub use task::{TaskEvent, TaskStore, TransferProgress};
pub use trace::{NoopCollector, TraceCollector, TracingCollector};
