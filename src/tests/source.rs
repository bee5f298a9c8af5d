use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use tokio::time::timeout;

use crate::error::{ConfigError, SourceError};
use crate::options::StoreConfig;
use crate::source::{FutureSource, SourceSink, Teardown};
use crate::store::Store;

#[test]
fn teardown_runs_its_close_once() {
    let closes = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&closes);
    let teardown = Teardown::new(move || {
        count.fetch_add(1, Ordering::SeqCst);
    });

    teardown.run();
    assert_eq!(closes.load(Ordering::SeqCst), 1, "run consumes the close");
}

#[test]
fn teardown_runs_on_drop() {
    let closes = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&closes);
    let teardown = Teardown::new(move || {
        count.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(closes.load(Ordering::SeqCst), 0);
    drop(teardown);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn sink_map_translates_values_and_passes_errors_through() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let sink: SourceSink<String> = SourceSink::new(Arc::new(
        move |event: Result<String, SourceError>| {
            log.lock().unwrap().push(event);
        },
    ));

    let mapped: SourceSink<u32> = sink.map(|n: u32| n.to_string());
    mapped.next(7);
    mapped.error(SourceError::new("boom"));

    assert_eq!(
        seen.lock().unwrap().as_slice(),
        [Ok("7".to_owned()), Err(SourceError::new("boom"))],
    );
}

#[test]
fn closures_act_as_sources() {
    let source = |sink: SourceSink<u32>| -> Result<Teardown, SourceError> {
        sink.next(1);
        Ok(Teardown::noop())
    };
    let store = Store::new(source, StoreConfig::default()).unwrap();

    let _sub = store.subscribe(|_| {});
    assert_eq!(store.get().value, Some(1));
}

#[test]
fn future_source_requires_a_runtime() {
    let result = FutureSource::new(|| async { Ok::<u32, SourceError>(1) });
    assert_eq!(result.err(), Some(ConfigError::RuntimeUnavailable));
}

#[tokio::test]
async fn future_source_delivers_the_outcome() -> anyhow::Result<()> {
    let source = FutureSource::new(|| async { Ok::<u32, SourceError>(21) })
        .expect("inside a runtime");
    let store = Store::new(source, StoreConfig::default())?;

    let mut updates = store.updates();
    let replay = updates.next().await.expect("replay snapshot");
    assert!(replay.loading);

    let pushed = timeout(Duration::from_millis(100), updates.next())
        .await?
        .expect("outcome snapshot");
    assert_eq!(pushed.value, Some(21));
    assert!(!pushed.loading);
    Ok(())
}

#[tokio::test]
async fn future_source_failure_lands_as_error_push() -> anyhow::Result<()> {
    let source = FutureSource::new(|| async {
        Err::<u32, _>(SourceError::new("fetch failed"))
    })
    .expect("inside a runtime");
    let store = Store::new(source, StoreConfig::default())?;

    let mut updates = store.updates();
    let _replay = updates.next().await;
    let pushed = timeout(Duration::from_millis(100), updates.next())
        .await?
        .expect("error snapshot");
    assert!(!pushed.loading);
    assert_eq!(
        pushed.error.as_ref().map(|e| e.to_string()),
        Some("source error: fetch failed".to_owned()),
    );
    Ok(())
}

#[tokio::test]
async fn future_source_spawns_once_per_activation() -> anyhow::Result<()> {
    let calls = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&calls);
    let source = FutureSource::new(move || {
        count.fetch_add(1, Ordering::SeqCst);
        // never resolves; teardown aborts it
        std::future::pending::<Result<u32, SourceError>>()
    })
    .expect("inside a runtime");
    let store = Store::new(source, StoreConfig::default())?;

    let first = store.subscribe(|_| {});
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    first.unsubscribe();

    let _second = store.subscribe(|_| {});
    assert_eq!(calls.load(Ordering::SeqCst), 2, "fresh future per activation");
    Ok(())
}
