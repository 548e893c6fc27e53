//! Job pages poured into a ResultStore through StoreSink.

mod common;

use std::sync::Arc;

use common::{recorder, ScriptedTransport, Step};
use jobstream_core::{
    Intention, JobState, PageSize, ResultStore, StoreError, StreamingDecoder,
};
use jobstream_jobs::{JobDispatcher, StoreSink};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

#[tokio::test]
async fn test_pages_land_in_slot_in_order() {
    let transport = ScriptedTransport::new();
    transport
        .on(Intention::Start, Step::Reply(json!({ "id": "job-1" })))
        .on(Intention::Continue, Step::page(json!("[1,2,3]"), false))
        .on(Intention::Continue, Step::page(json!([4, 5]), true));

    let store = Arc::new(ResultStore::new());
    store.append("reports", "q1", vec![json!("stale")]);

    let (downstream, seen) = recorder();
    let (callback, sink) = StoreSink::attach(
        &store,
        StreamingDecoder::new(2).unwrap(),
        "reports",
        "q1",
        Some(downstream),
    )
    .unwrap();
    assert_eq!(store.size("reports", "q1"), 0);

    let dispatcher = JobDispatcher::new("export", transport.clone());
    let job = dispatcher.request_with_callback(json!({}), PageSize::default(), callback);
    assert_eq!(job.wait().await, JobState::Done);

    let report = sink.finished().await;
    assert_eq!(report.elements, 5);
    assert_eq!(report.terminal, JobState::Done);
    assert_eq!(report.error, None);
    assert_eq!(
        *store.get("reports", "q1"),
        vec![json!(1), json!(2), json!(3), json!(4), json!(5)]
    );
    assert_eq!(seen.lock().unwrap().len(), 2);
    assert_eq!(store.writer_of("reports", "q1"), None);
}

#[tokio::test]
async fn test_second_sink_on_same_slot_is_busy() {
    let store: Arc<ResultStore<Value>> = Arc::new(ResultStore::new());
    let decoder = StreamingDecoder::new(10).unwrap();

    let (_callback, _sink) =
        StoreSink::attach(&store, decoder.clone(), "reports", "q1", None).unwrap();
    let err = StoreSink::attach(&store, decoder.clone(), "reports", "q1", None)
        .err()
        .expect("slot is leased");
    assert!(matches!(err, StoreError::WriterBusy { .. }));

    // Other slots are unaffected.
    assert!(StoreSink::attach(&store, decoder, "reports", "q2", None).is_ok());
}

#[tokio::test]
async fn test_decode_failure_keeps_partial_batches() {
    let transport = ScriptedTransport::new();
    transport
        .on(Intention::Start, Step::Reply(json!({ "id": "job-2" })))
        .on(Intention::Continue, Step::page(json!("[1,2,3,4,5,oops]"), false))
        .on(Intention::Continue, Step::page(json!([6]), true));

    let store = Arc::new(ResultStore::new());
    let (callback, sink) = StoreSink::attach(
        &store,
        StreamingDecoder::new(2).unwrap(),
        "reports",
        "broken",
        None,
    )
    .unwrap();

    let job = JobDispatcher::new("export", transport.clone()).request_with_callback(
        json!({}),
        PageSize::default(),
        callback,
    );
    assert_eq!(job.wait().await, JobState::Done);

    let report = sink.finished().await;
    assert_eq!(report.terminal, JobState::Done);
    assert_eq!(report.elements, 4);
    assert!(report.error.is_some());
    assert_eq!(
        *store.get("reports", "broken"),
        vec![json!(1), json!(2), json!(3), json!(4)]
    );
}

#[tokio::test]
async fn test_failed_job_reports_error() {
    let transport = ScriptedTransport::new();
    transport
        .on(Intention::Start, Step::Reply(json!({ "id": "job-3" })))
        .on(Intention::Continue, Step::page(json!([1]), false))
        .on(
            Intention::Continue,
            Step::Reply(json!({ "load": null, "finish": false, "error": "disk full" })),
        );

    let store = Arc::new(ResultStore::new());
    let (callback, sink) =
        StoreSink::attach(&store, StreamingDecoder::new(8).unwrap(), "reports", "q3", None)
            .unwrap();
    let job = JobDispatcher::new("export", transport.clone()).request_with_callback(
        json!({}),
        PageSize::default(),
        callback,
    );
    assert_eq!(job.wait().await, JobState::Fail);

    let report = sink.finished().await;
    assert_eq!(report.terminal, JobState::Fail);
    assert_eq!(report.elements, 1);
    assert_eq!(report.error.as_deref(), Some("Remote job error: disk full"));
    assert_eq!(*store.get("reports", "q3"), vec![json!(1)]);
}

#[tokio::test]
async fn test_completion_only_page_adds_nothing() {
    let transport = ScriptedTransport::new();
    transport
        .on(Intention::Start, Step::Reply(json!({ "id": "job-4" })))
        .on(Intention::Continue, Step::page(json!([1, 2]), false))
        .on(
            Intention::Continue,
            Step::Reply(json!({ "finish": true, "error": null })),
        );

    let store = Arc::new(ResultStore::new());
    let (callback, sink) =
        StoreSink::attach(&store, StreamingDecoder::new(8).unwrap(), "reports", "q4", None)
            .unwrap();
    let job = JobDispatcher::new("export", transport.clone()).request_with_callback(
        json!({}),
        PageSize::default(),
        callback,
    );
    assert_eq!(job.wait().await, JobState::Done);

    let report = sink.finished().await;
    assert_eq!(report.terminal, JobState::Done);
    assert_eq!(report.elements, 2);
    assert_eq!(report.error, None);
    assert_eq!(*store.get("reports", "q4"), vec![json!(1), json!(2)]);
}
