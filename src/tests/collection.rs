use std::sync::{Arc, Mutex};

use serde_json::Map;
use tracing::field::{Field, Visit};
use tracing::{span, Event, Metadata, Subscriber};

use super::Feed;
use crate::collection::{CollectionStore, SourceDoc};
use crate::options::CollectionOptions;

/// Subscriber double collecting the `query` field of every emitted event.
#[derive(Clone, Default)]
struct LogSpy {
    queries: Arc<Mutex<Vec<String>>>,
}

impl Subscriber for LogSpy {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        true
    }

    fn new_span(&self, _span: &span::Attributes<'_>) -> span::Id {
        span::Id::from_u64(1)
    }

    fn record(&self, _span: &span::Id, _values: &span::Record<'_>) {}

    fn record_follows_from(&self, _span: &span::Id, _follows: &span::Id) {}

    fn event(&self, event: &Event<'_>) {
        struct QueryVisitor<'a>(&'a Mutex<Vec<String>>);

        impl Visit for QueryVisitor<'_> {
            fn record_str(&mut self, field: &Field, value: &str) {
                if field.name() == "query" {
                    self.0.lock().unwrap().push(value.to_owned());
                }
            }

            fn record_debug(&mut self, _field: &Field, _value: &dyn std::fmt::Debug) {}
        }

        event.record(&mut QueryVisitor(&self.queries));
    }

    fn enter(&self, _span: &span::Id) {}

    fn exit(&self, _span: &span::Id) {}
}

#[test]
fn log_distinguishes_new_from_updated_query() {
    let spy = LogSpy::default();
    let queries = Arc::clone(&spy.queries);

    tracing::subscriber::with_default(spy, || {
        let feed = Feed::<Vec<SourceDoc>>::new();
        let options = CollectionOptions {
            log: true,
            ..CollectionOptions::default()
        };
        let store = CollectionStore::new(feed.source(), options).unwrap();

        let sub = store.subscribe(|_| {});
        feed.push(vec![SourceDoc::new("a", "posts/a", Map::new())]);
        feed.push(vec![SourceDoc::new("b", "posts/b", Map::new())]);
        assert_eq!(queries.lock().unwrap().as_slice(), ["new", "updated"]);

        // a fresh activation is a fresh query
        sub.unsubscribe();
        let _sub = store.subscribe(|_| {});
        feed.push(vec![]);
        assert_eq!(
            queries.lock().unwrap().as_slice(),
            ["new", "updated", "new"],
        );
    });
}
