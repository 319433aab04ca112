//! Router tests
//!
//! Fan-out to both paths, short-circuit on transform failure, independence
//! of the two deliveries, and the drain-on-close run loop.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::json;
use tally_protocol::OutboundEvent;
use tally_sinks::{
    ArchiveError, Archiver, ArchiverConfig, Destinations, MemoryObjectStore, RetryPolicy,
    StaticCatalog,
};
use tally_workflow::{
    BusPublisher, ChannelTransport, ExecutionStatus, ExecutorConfig, MemoryRecordStore,
    RecordStore, StepRetryPolicy, WorkflowExecutor,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::Router;

struct Fixture {
    router: Router,
    archiver: Archiver,
    store: Arc<MemoryRecordStore>,
    bus: mpsc::Receiver<OutboundEvent>,
}

fn fixture(archiver_config: ArchiverConfig) -> Fixture {
    let destinations = Destinations::new(
        Arc::new(MemoryObjectStore::new("primary")),
        Arc::new(MemoryObjectStore::new("backup")),
        Arc::new(MemoryObjectStore::new("error")),
    );
    let archiver = Archiver::new(archiver_config, destinations, &StaticCatalog::default()).unwrap();

    let store = Arc::new(MemoryRecordStore::new());
    let (transport, bus) = ChannelTransport::new(64);
    let executor = WorkflowExecutor::new(
        store.clone(),
        Arc::new(BusPublisher::new(Arc::new(transport))),
        ExecutorConfig::default().with_retry(StepRetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
        }),
    );

    let router = Router::new(archiver.handle(), Arc::new(executor), CancellationToken::new());
    Fixture {
        router,
        archiver,
        store,
        bus,
    }
}

fn inbound(id: &str, time: &str, initiated_at: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": id,
        "time": time,
        "source": "payments",
        "detail-type": "transaction-initiated",
        "detail": {
            "customer-id": "cust-42",
            "initiated-at": initiated_at,
            "from-account": "A1",
            "to-account": "A2",
            "transaction-amount": "125.50"
        }
    }))
    .unwrap()
}

fn valid(id: &str) -> Vec<u8> {
    inbound(id, "2024-03-05T14:07:01Z", "2024-03-05T14:07:00Z")
}

// ============================================================================
// Dispatch
// ============================================================================

#[tokio::test]
async fn test_dispatch_delivers_to_both_paths() {
    let mut f = fixture(ArchiverConfig::default());

    let dispatch = f.router.dispatch(&valid("tx-1")).unwrap();
    assert_eq!(dispatch.transaction_id, "tx-1");
    assert!(dispatch.archived());

    let report = dispatch.report().await.unwrap();
    assert!(report.is_success());

    assert_eq!(f.archiver.handle().pending_records(), 1);
    let record = f.store.get("tx-1").await.unwrap().unwrap();
    assert_eq!(record.total_amount.to_string(), "125.50");
    assert_eq!(record.source_account, "A1");
    assert_eq!(record.destination_account, "A2");

    let envelope = f.bus.recv().await.unwrap();
    assert_eq!(envelope.detail.transaction_id, "tx-1");
    assert_eq!(envelope.detail.total_amount.to_string(), "125.50");

    let snap = f.router.metrics().snapshot();
    assert_eq!(snap.events_received, 1);
    assert_eq!(snap.archive_ok, 1);
    assert_eq!(snap.workflows_started, 1);
    assert_eq!(snap.workflows_succeeded, 1);
}

#[tokio::test]
async fn test_transform_failure_reaches_neither_path() {
    let f = fixture(ArchiverConfig::default());

    let raw = serde_json::to_vec(&json!({
        "id": "tx-1",
        "time": "2024-03-05T14:07:01Z",
        "detail": { "customer-id": "cust-42" }
    }))
    .unwrap();
    assert!(f.router.dispatch(&raw).is_err());
    assert!(f.router.dispatch(b"not json").is_err());

    assert_eq!(f.archiver.handle().pending_records(), 0);
    assert!(f.store.is_empty());

    let snap = f.router.metrics().snapshot();
    assert_eq!(snap.events_received, 2);
    assert_eq!(snap.transform_failures, 2);
    assert_eq!(snap.workflows_started, 0);
}

#[tokio::test]
async fn test_archive_backpressure_does_not_block_workflow() {
    let f = fixture(ArchiverConfig::default().with_queue_capacity(1));

    let first = f.router.dispatch(&valid("tx-1")).unwrap();
    let second = f.router.dispatch(&valid("tx-2")).unwrap();

    assert!(first.archived());
    assert!(matches!(second.archive, Err(ArchiveError::Backpressure { .. })));

    assert!(first.report().await.unwrap().is_success());
    assert!(second.report().await.unwrap().is_success());
    assert_eq!(f.store.len(), 2);

    let snap = f.router.metrics().snapshot();
    assert_eq!(snap.archive_failed, 1);
    assert_eq!(snap.backpressure_events, 1);
}

#[tokio::test]
async fn test_closed_archiver_does_not_block_workflow() {
    let f = fixture(ArchiverConfig::default());
    f.archiver.handle().close();

    let dispatch = f.router.dispatch(&valid("tx-1")).unwrap();
    assert!(matches!(dispatch.archive, Err(ArchiveError::Closed)));
    assert!(dispatch.report().await.unwrap().is_success());
    assert_eq!(f.router.metrics().backpressure_events(), 0);
}

#[tokio::test]
async fn test_workflow_failure_does_not_affect_archive() {
    let f = fixture(ArchiverConfig::default());
    f.store.fail_next(100);

    let dispatch = f.router.dispatch(&valid("tx-1")).unwrap();
    assert!(dispatch.archived());

    let report = dispatch.report().await.unwrap();
    assert_eq!(report.status, ExecutionStatus::Failed);
    assert_eq!(f.archiver.handle().pending_records(), 1);
    assert_eq!(f.router.metrics().snapshot().workflows_failed, 1);
}

#[tokio::test]
async fn test_time_anomaly_is_counted_not_rejected() {
    let f = fixture(ArchiverConfig::default());

    // received one minute before it was requested
    let raw = inbound("tx-1", "2024-03-05T14:06:00Z", "2024-03-05T14:07:00Z");
    let dispatch = f.router.dispatch(&raw).unwrap();

    assert!(dispatch.archived());
    assert!(dispatch.report().await.unwrap().is_success());
    assert_eq!(f.router.metrics().snapshot().time_anomalies, 1);
}

// ============================================================================
// Run loop
// ============================================================================

#[tokio::test]
async fn test_run_drains_and_waits_for_executions() {
    let f = fixture(ArchiverConfig::default());
    let metrics = f.router.handle();
    let (tx, rx) = mpsc::channel(16);

    let router_task = tokio::spawn(f.router.run(rx));
    for id in ["tx-1", "tx-2", "tx-3"] {
        tx.send(Bytes::from(valid(id))).await.unwrap();
    }
    tx.send(Bytes::from_static(b"{}")).await.unwrap();
    drop(tx);

    let snapshot = router_task.await.unwrap();
    assert_eq!(snapshot.events_received, 4);
    assert_eq!(snapshot.transform_failures, 1);
    assert_eq!(snapshot.archive_ok, 3);
    assert_eq!(snapshot.workflows_succeeded, 3);
    assert_eq!(snapshot.workflows_in_flight(), 0);
    assert_eq!(metrics.snapshot(), snapshot);

    assert_eq!(f.store.len(), 3);
    assert_eq!(f.archiver.handle().pending_records(), 3);
}

fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::from_millis(5),
    }
}

#[tokio::test]
async fn test_run_retries_refused_events_until_archived() {
    let f = fixture(
        ArchiverConfig::default()
            .with_flush_interval(Duration::from_secs(3600))
            .with_queue_capacity(2),
    );
    let archive = f.archiver.handle();
    let stop_archiver = CancellationToken::new();
    let archiver_task = tokio::spawn(f.archiver.run(stop_archiver.clone()));

    let router = f.router.with_archive_retry(fast_retry(10));
    let handle = router.handle();
    let (tx, rx) = mpsc::channel(16);
    let router_task = tokio::spawn(router.run(rx));
    for i in 0..5 {
        tx.send(Bytes::from(valid(&format!("tx-{i}")))).await.unwrap();
    }
    drop(tx);

    let snapshot = router_task.await.unwrap();
    assert_eq!(snapshot.workflows_succeeded, 5);
    assert_eq!(snapshot.archive_retained, 0);
    assert_eq!(snapshot.archive_retried, snapshot.backpressure_events);
    assert!(handle.take_unarchived().is_empty());
    assert_eq!(f.store.len(), 5);

    stop_archiver.cancel();
    let archived = archiver_task.await.unwrap();
    assert_eq!(archived.rows_converted, 5);
    assert!(archive.take_failed_batches().is_empty());
}

#[tokio::test]
async fn test_run_retains_events_after_retries_exhausted() {
    let f = fixture(ArchiverConfig::default().with_queue_capacity(1));
    let router = f.router.with_archive_retry(fast_retry(2));
    let handle = router.handle();
    let (tx, rx) = mpsc::channel(16);

    let router_task = tokio::spawn(router.run(rx));
    tx.send(Bytes::from(valid("tx-1"))).await.unwrap();
    tx.send(Bytes::from(valid("tx-2"))).await.unwrap();
    drop(tx);

    let snapshot = router_task.await.unwrap();
    assert_eq!(snapshot.archive_ok, 1);
    assert_eq!(snapshot.archive_retained, 1);

    // nobody flushes, so the second event is never accepted but never lost
    let unarchived = handle.take_unarchived();
    assert_eq!(unarchived.len(), 1);
    assert_eq!(unarchived[0].event.transaction_id, "tx-2");
    assert_eq!(unarchived[0].event.total_amount.to_string(), "125.50");
    assert!(unarchived[0].error.contains("queue full"));
    assert!(handle.take_unarchived().is_empty());

    // the workflow path still ran for both
    assert_eq!(f.store.len(), 2);
    assert_eq!(f.archiver.handle().metrics().snapshot().records_rejected, 3);
}

#[tokio::test]
async fn test_run_retains_events_when_archiver_closed() {
    let f = fixture(ArchiverConfig::default());
    f.archiver.handle().close();
    let router = f.router.with_archive_retry(fast_retry(3));
    let handle = router.handle();
    let (tx, rx) = mpsc::channel(16);

    let router_task = tokio::spawn(router.run(rx));
    tx.send(Bytes::from(valid("tx-1"))).await.unwrap();
    drop(tx);

    let snapshot = router_task.await.unwrap();
    assert_eq!(snapshot.archive_retained, 1);
    assert_eq!(snapshot.archive_retried, 0);
    // closed is never retried
    assert_eq!(f.archiver.handle().metrics().snapshot().records_rejected, 1);
    assert_eq!(handle.take_unarchived().len(), 1);
}
