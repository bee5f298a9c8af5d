use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::collection::{CollectionStore, SourceDoc};
use crate::document::{Document, DocumentStore};
use crate::error::ConfigError;
use crate::options::{CollectionOptions, DocumentOptions, StoreConfig, TaskOptions};
use crate::source::Source;
use crate::store::Store;
use crate::task::{TaskEvent, TaskStore};
use crate::trace::{default_collector, TraceCollector};

/// Authenticated principal as pushed by an identity source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// The session's identity container: a plain store over identity-or-null
/// pushes, with the usual lazy lifecycle and nothing list- or
/// timeout-shaped on top.
pub type IdentityStore = Store<Option<Identity>>;

/// Explicit per-application context owning the identity container and the
/// shared trace collector.
///
/// Construct one at application start and hand it to whoever needs it;
/// cloning is cheap and every clone points at the same containers.  There
/// is deliberately no global "current user" anywhere in this crate.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    collector: Arc<dyn TraceCollector>,
    identity: IdentityStore,
}

impl Session {
    /// Build a session over a push source of identity-or-null.
    ///
    /// The source is opened lazily, once somebody observes
    /// [`identity`](Self::identity); a typical implementation pushes the
    /// currently known principal synchronously on open and every change
    /// afterwards.
    pub fn new(identity_source: impl Source<Option<Identity>>) -> Self {
        Self::with_collector(identity_source, default_collector())
    }

    pub fn with_collector(
        identity_source: impl Source<Option<Identity>>,
        collector: Arc<dyn TraceCollector>,
    ) -> Self {
        let config = StoreConfig {
            collector: Some(Arc::clone(&collector)),
            ..StoreConfig::default()
        };
        let identity = Store::assemble(Box::new(identity_source), config, None);
        Self {
            inner: Arc::new(SessionInner {
                collector,
                identity,
            }),
        }
    }

    /// The shared identity container.
    pub fn identity(&self) -> IdentityStore {
        self.inner.identity.clone()
    }

    /// Build a document store wired to this session's trace collector.
    pub fn document(
        &self,
        source: impl Source<Option<Document>>,
        options: DocumentOptions,
    ) -> Result<DocumentStore, ConfigError> {
        DocumentStore::with_collector(source, options, Arc::clone(&self.inner.collector))
    }

    /// Build a collection store wired to this session's trace collector.
    pub fn collection(
        &self,
        source: impl Source<Vec<SourceDoc>>,
        options: CollectionOptions,
    ) -> Result<CollectionStore, ConfigError> {
        CollectionStore::with_collector(source, options, Arc::clone(&self.inner.collector))
    }

    /// Build a task store wired to this session's trace collector.
    pub fn task<P, R>(
        &self,
        source: impl Source<TaskEvent<P, R>>,
        options: TaskOptions,
    ) -> TaskStore<P, R>
    where
        P: Clone + Send + Sync + 'static,
        R: Clone + Send + Sync + 'static,
    {
        TaskStore::with_collector(source, options, Arc::clone(&self.inner.collector))
    }
}

mod debug {
    use super::*;
    use std::fmt;

    impl fmt::Debug for Session {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Session")
                .field("identity", &self.inner.identity)
                .finish()
        }
    }
}
