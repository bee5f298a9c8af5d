use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Map;

use pushstore::{
    CollectionOptions, Identity, Session, Snapshot, SourceDoc, SourceError, SourceSink,
    TaskEvent, TaskOptions, Teardown, TraceCollector, TransferProgress,
};

/// Scripted identity source: remembers the current activation's sink and
/// counts opens.
struct Feed {
    sink: Arc<Mutex<Option<SourceSink<Option<Identity>>>>>,
    opens: Arc<AtomicUsize>,
}

impl Feed {
    fn new() -> Self {
        Self {
            sink: Arc::new(Mutex::new(None)),
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn source(
        &self,
    ) -> impl Fn(SourceSink<Option<Identity>>) -> Result<Teardown, SourceError> + Send + Sync + 'static
    {
        let slot = Arc::clone(&self.sink);
        let opens = Arc::clone(&self.opens);
        move |sink| {
            opens.fetch_add(1, Ordering::SeqCst);
            *slot.lock().unwrap() = Some(sink);
            Ok(Teardown::noop())
        }
    }

    fn push(&self, identity: Option<Identity>) {
        self.sink
            .lock()
            .unwrap()
            .as_ref()
            .expect("source was never opened")
            .next(identity);
    }
}

/// Collector double recording start/stop calls in order.
#[derive(Default)]
struct RecordingCollector {
    events: Mutex<Vec<String>>,
}

impl RecordingCollector {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl TraceCollector for RecordingCollector {
    fn start(&self, trace_id: &str) {
        self.events.lock().unwrap().push(format!("start {trace_id}"));
    }

    fn stop(&self, trace_id: &str, _elapsed: Duration) {
        self.events.lock().unwrap().push(format!("stop {trace_id}"));
    }
}

fn alice() -> Identity {
    Identity {
        uid: "u-alice".to_owned(),
        display_name: Some("Alice".to_owned()),
        email: None,
    }
}

#[tokio::test]
async fn identity_opens_lazily_and_pushes_identity_or_null() {
    let feed = Feed::new();
    let session = Session::new(feed.source());
    assert_eq!(feed.opens.load(Ordering::SeqCst), 0);

    let identity = session.identity();
    assert_eq!(
        feed.opens.load(Ordering::SeqCst),
        0,
        "taking the handle must not activate",
    );

    let _sub = identity.subscribe(|_| {});
    assert_eq!(feed.opens.load(Ordering::SeqCst), 1);
    assert!(identity.get().loading);

    feed.push(Some(alice()));
    assert_eq!(identity.get().value, Some(Some(alice())));

    // sign-out is a real push of null, distinct from "no value yet"
    feed.push(None);
    let snapshot = identity.get();
    assert!(!snapshot.loading);
    assert_eq!(snapshot.value, Some(None));
}

#[tokio::test]
async fn clones_share_the_identity_container() {
    let feed = Feed::new();
    let session = Session::new(feed.source());

    let _first = session.identity().subscribe(|_| {});
    let other = session.clone();
    let _second = other.identity().subscribe(|_| {});
    assert_eq!(
        feed.opens.load(Ordering::SeqCst),
        1,
        "one container, one activation, however many clones",
    );

    feed.push(Some(alice()));
    assert_eq!(other.identity().get().value, Some(Some(alice())));
}

#[tokio::test]
async fn collection_trace_span_runs_from_activation_to_first_batch() -> anyhow::Result<()> {
    let collector = Arc::new(RecordingCollector::default());
    let feed = Feed::new();
    let session = Session::with_collector(feed.source(), collector.clone());

    let slot: Arc<Mutex<Option<SourceSink<Vec<SourceDoc>>>>> = Arc::new(Mutex::new(None));
    let sink_slot = Arc::clone(&slot);
    let posts = session.collection(
        move |sink: SourceSink<Vec<SourceDoc>>| -> Result<Teardown, SourceError> {
            *sink_slot.lock().unwrap() = Some(sink);
            Ok(Teardown::noop())
        },
        CollectionOptions {
            trace_id: Some("posts".to_owned()),
            ..CollectionOptions::default()
        },
    )?;

    assert!(collector.events().is_empty());
    let _sub = posts.subscribe(|_| {});
    assert_eq!(collector.events(), ["start posts"]);

    let sink = slot.lock().unwrap().clone().expect("query opened");
    sink.next(vec![SourceDoc::new("p1", "posts/p1", Map::new())]);
    assert_eq!(collector.events(), ["start posts", "stop posts"]);

    // later batches are outside the measured span
    sink.next(vec![]);
    assert_eq!(collector.events(), ["start posts", "stop posts"]);
    Ok(())
}

#[tokio::test]
async fn task_trace_span_runs_to_the_terminal_event() {
    let collector = Arc::new(RecordingCollector::default());
    let feed = Feed::new();
    let session = Session::with_collector(feed.source(), collector.clone());

    type Event = TaskEvent<TransferProgress, String>;
    let slot: Arc<Mutex<Option<SourceSink<Event>>>> = Arc::new(Mutex::new(None));
    let sink_slot = Arc::clone(&slot);
    let upload = session.task(
        move |sink: SourceSink<Event>| -> Result<Teardown, SourceError> {
            *sink_slot.lock().unwrap() = Some(sink);
            Ok(Teardown::noop())
        },
        TaskOptions {
            trace_id: Some("upload".to_owned()),
            ..TaskOptions::default()
        },
    );

    let _sub = upload.subscribe(|_: &Snapshot<TransferProgress>| {});
    assert_eq!(collector.events(), ["start upload"]);

    let sink = slot.lock().unwrap().clone().expect("task opened");
    sink.next(TaskEvent::Progress(TransferProgress {
        bytes_transferred: 10,
        total_bytes: 100,
    }));
    assert_eq!(
        collector.events(),
        ["start upload"],
        "progress does not end the span",
    );

    sink.next(TaskEvent::Completed(
        TransferProgress {
            bytes_transferred: 100,
            total_bytes: 100,
        },
        "objects/a".to_owned(),
    ));
    assert_eq!(collector.events(), ["start upload", "stop upload"]);
}
