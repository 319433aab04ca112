//! Tests for the workflow executor

use super::*;

use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::TimeZone;
use rust_decimal::Decimal;

use crate::error::{PublishError, RecordStoreError};
use crate::publisher::{BusPublisher, ChannelTransport};
use crate::store::{FileRecordStore, MemoryRecordStore};

// =============================================================================
// Fixtures
// =============================================================================

fn event(id: &str) -> TransactionEvent {
    TransactionEvent {
        transaction_id: id.into(),
        customer_id: "cust-1".into(),
        received_datetime: Utc.with_ymd_and_hms(2024, 3, 5, 14, 0, 1).unwrap(),
        requested_datetime: Utc.with_ymd_and_hms(2024, 3, 5, 14, 0, 0).unwrap(),
        source_account: "A1".into(),
        destination_account: "A2".into(),
        total_amount: Decimal::from_str("125.50").unwrap(),
    }
}

fn fast_config() -> ExecutorConfig {
    ExecutorConfig::default().with_retry(StepRetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
    })
}

type CallLog = Arc<Mutex<Vec<String>>>;

/// Store wrapper that records each call in a shared log
struct LoggingStore {
    inner: MemoryRecordStore,
    log: CallLog,
}

#[async_trait]
impl RecordStore for LoggingStore {
    fn name(&self) -> &str {
        "logging"
    }

    async fn put(&self, key: &str, record: &TransactionEvent) -> Result<(), RecordStoreError> {
        self.log.lock().push(format!("put:{key}"));
        self.inner.put(key, record).await
    }

    async fn get(&self, key: &str) -> Result<Option<TransactionEvent>, RecordStoreError> {
        self.inner.get(key).await
    }
}

/// Publisher that records calls and fails a configurable number of times
#[derive(Default)]
struct RecordingPublisher {
    log: CallLog,
    published: Mutex<Vec<ProcessedEvent>>,
    fail_remaining: AtomicU32,
}

impl RecordingPublisher {
    fn with_log(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    fn fail_next(&self, count: u32) {
        self.fail_remaining.store(count, Ordering::SeqCst);
    }

    fn published(&self) -> Vec<ProcessedEvent> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    fn name(&self) -> &str {
        "recording"
    }

    async fn publish(&self, event: &ProcessedEvent) -> Result<(), PublishError> {
        self.log.lock().push(format!("publish:{}", event.transaction_id));
        let fail = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(PublishError::Transport("bus unavailable".into()));
        }
        self.published.lock().push(event.clone());
        Ok(())
    }
}

struct Fixture {
    store: Arc<MemoryRecordStore>,
    publisher: Arc<RecordingPublisher>,
    executor: WorkflowExecutor,
}

fn fixture(config: ExecutorConfig) -> Fixture {
    let store = Arc::new(MemoryRecordStore::new());
    let publisher = Arc::new(RecordingPublisher::default());
    let executor = WorkflowExecutor::new(store.clone(), publisher.clone(), config);
    Fixture {
        store,
        publisher,
        executor,
    }
}

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test]
async fn test_write_then_publish() {
    let log: CallLog = Arc::default();
    let store = Arc::new(LoggingStore {
        inner: MemoryRecordStore::new(),
        log: log.clone(),
    });
    let publisher = Arc::new(RecordingPublisher::with_log(log.clone()));
    let executor = WorkflowExecutor::new(store.clone(), publisher.clone(), fast_config());

    let input = event("tx-1");
    let report = executor.execute(&input, &CancellationToken::new()).await;

    assert!(report.is_success());
    assert_eq!(report.final_step, Step::Done);
    assert_eq!(
        report.steps(),
        vec![Step::Start, Step::WriteRecord, Step::PublishProcessed, Step::Done]
    );
    assert_eq!(*log.lock(), vec!["put:tx-1", "publish:tx-1"]);

    let stored = store.get("tx-1").await.unwrap().unwrap();
    assert_eq!(stored, input);
    assert_eq!(publisher.published(), vec![ProcessedEvent::from(&input)]);
    assert_eq!(publisher.published()[0].total_amount.to_string(), "125.50");
}

#[tokio::test]
async fn test_execute_is_idempotent() {
    let f = fixture(fast_config());
    let input = event("tx-1");
    let cancel = CancellationToken::new();

    assert!(f.executor.execute(&input, &cancel).await.is_success());
    assert!(f.executor.execute(&input, &cancel).await.is_success());

    assert_eq!(f.store.len(), 1);
    assert_eq!(f.store.get("tx-1").await.unwrap(), Some(input));

    let metrics = f.executor.metrics();
    assert_eq!(metrics.executions_started, 2);
    assert_eq!(metrics.executions_succeeded, 2);
    assert_eq!(metrics.records_written, 2);
}

#[tokio::test]
async fn test_publishes_over_bus() {
    let (transport, mut bus) = ChannelTransport::new(8);
    let store = Arc::new(MemoryRecordStore::new());
    let publisher = Arc::new(BusPublisher::new(Arc::new(transport)).with_bus("payments"));
    let executor = WorkflowExecutor::new(store, publisher, fast_config());

    let input = event("tx-1");
    let report = executor.execute(&input, &CancellationToken::new()).await;
    assert!(report.is_success());

    let envelope = bus.recv().await.unwrap();
    assert_eq!(envelope.bus, "payments");
    assert_eq!(envelope.detail_type, ProcessedEvent::DETAIL_TYPE);
    assert_eq!(envelope.detail.source_account, "A1");
    assert_eq!(envelope.detail.destination_account, "A2");
}

// =============================================================================
// Failures and retries
// =============================================================================

#[tokio::test]
async fn test_write_failure_skips_publish() {
    let f = fixture(fast_config());
    f.store.fail_next(10);

    let report = f.executor.execute(&event("tx-1"), &CancellationToken::new()).await;

    assert_eq!(report.status, ExecutionStatus::Failed);
    assert_eq!(report.failed_step, Some(Step::WriteRecord));
    assert!(matches!(
        report.error,
        Some(WorkflowStepError::WriteRecordFailed { attempts: 3, .. })
    ));
    assert_eq!(f.store.put_attempts(), 3);
    assert!(f.publisher.published().is_empty());
    assert!(f.executor.pending().is_empty());
    assert!(report.entry(Step::PublishProcessed).is_none());
}

#[tokio::test]
async fn test_invalid_key_fails_without_retry() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileRecordStore::new(dir.path()));
    let publisher = Arc::new(RecordingPublisher::default());
    // retrying would sleep for seconds
    let config = ExecutorConfig::default().with_retry(StepRetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_secs(5),
    });
    let executor = WorkflowExecutor::new(store, publisher.clone(), config);

    let started = Instant::now();
    let report = executor.execute(&event("tx/1"), &CancellationToken::new()).await;

    assert_eq!(report.status, ExecutionStatus::Failed);
    assert!(matches!(
        report.error,
        Some(WorkflowStepError::WriteRecordFailed { attempts: 1, .. })
    ));
    assert_eq!(report.entry(Step::WriteRecord).unwrap().attempts, 1);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(publisher.published().is_empty());
    assert_eq!(executor.metrics().step_retries, 0);
}

#[tokio::test]
async fn test_closed_bus_fails_publish_without_retry() {
    let (transport, bus) = ChannelTransport::new(8);
    drop(bus);
    let store = Arc::new(MemoryRecordStore::new());
    let publisher = Arc::new(BusPublisher::new(Arc::new(transport)));
    let config = ExecutorConfig::default().with_retry(StepRetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_secs(5),
    });
    let executor = WorkflowExecutor::new(store.clone(), publisher, config);

    let report = executor.execute(&event("tx-1"), &CancellationToken::new()).await;

    assert_eq!(report.status, ExecutionStatus::Failed);
    assert!(matches!(
        report.error,
        Some(WorkflowStepError::PublishFailed { attempts: 1, .. })
    ));
    // the record stays written and the publish is parked for replay
    assert_eq!(store.len(), 1);
    assert_eq!(executor.pending(), vec!["tx-1".to_string()]);
}

#[tokio::test]
async fn test_transient_write_failure_is_retried() {
    let f = fixture(fast_config());
    f.store.fail_next(2);

    let report = f.executor.execute(&event("tx-1"), &CancellationToken::new()).await;

    assert!(report.is_success());
    assert_eq!(report.entry(Step::WriteRecord).unwrap().attempts, 3);
    assert_eq!(report.entry(Step::PublishProcessed).unwrap().attempts, 1);
    assert_eq!(f.executor.metrics().step_retries, 2);
}

#[tokio::test]
async fn test_publish_failure_parks_event() {
    let f = fixture(fast_config());
    f.publisher.fail_next(3);

    let report = f.executor.execute(&event("tx-1"), &CancellationToken::new()).await;

    assert_eq!(report.status, ExecutionStatus::Failed);
    assert_eq!(report.failed_step, Some(Step::PublishProcessed));
    assert!(matches!(
        report.error,
        Some(WorkflowStepError::PublishFailed { attempts: 3, .. })
    ));
    // record is not unwound
    assert_eq!(f.store.len(), 1);
    assert_eq!(f.executor.pending(), vec!["tx-1".to_string()]);

    let retried = f.executor.retry_publish("tx-1").await.unwrap();
    assert!(retried.is_success());
    assert_eq!(retried.steps(), vec![Step::PublishProcessed, Step::Done]);
    assert_eq!(f.store.put_attempts(), 1);
    assert_eq!(f.publisher.published().len(), 1);
    assert!(f.executor.pending().is_empty());
    assert_eq!(f.executor.metrics().publish_replays, 1);
}

#[tokio::test]
async fn test_retry_publish_unknown_id() {
    let f = fixture(fast_config());
    let err = f.executor.retry_publish("nope").await.unwrap_err();
    assert!(matches!(err, WorkflowError::NotPending(id) if id == "nope"));
}

#[tokio::test]
async fn test_failed_retry_publish_stays_parked() {
    let f = fixture(fast_config());
    f.publisher.fail_next(6);

    f.executor.execute(&event("tx-1"), &CancellationToken::new()).await;
    let retried = f.executor.retry_publish("tx-1").await.unwrap();

    assert_eq!(retried.status, ExecutionStatus::Failed);
    assert_eq!(f.executor.pending(), vec!["tx-1".to_string()]);
}

#[tokio::test]
async fn test_invalid_event_fails_at_start() {
    let f = fixture(fast_config());
    let mut input = event("tx-1");
    input.customer_id.clear();

    let report = f.executor.execute(&input, &CancellationToken::new()).await;

    assert_eq!(report.status, ExecutionStatus::Failed);
    assert_eq!(report.failed_step, Some(Step::Start));
    assert!(matches!(report.error, Some(WorkflowStepError::InvalidEvent { .. })));
    assert_eq!(f.store.put_attempts(), 0);
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_cancel_before_write_leaves_no_effect() {
    let f = fixture(fast_config());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = f.executor.execute(&event("tx-1"), &cancel).await;

    assert_eq!(report.status, ExecutionStatus::Cancelled);
    assert!(f.store.is_empty());
    assert!(f.publisher.published().is_empty());
    assert!(f.executor.pending().is_empty());
    assert_eq!(f.executor.metrics().executions_cancelled, 1);
}

#[tokio::test]
async fn test_cancel_during_write_backoff() {
    let f = fixture(fast_config().with_retry(StepRetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_secs(30),
    }));
    f.store.fail_next(1);
    let cancel = CancellationToken::new();

    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        })
    };
    let report = f.executor.execute(&event("tx-1"), &cancel).await;
    canceller.await.unwrap();

    assert_eq!(report.status, ExecutionStatus::Cancelled);
    assert_eq!(report.entry(Step::WriteRecord).unwrap().attempts, 1);
    assert!(f.store.is_empty());
}

/// Store that cancels the execution while its write is in flight
struct CancellingStore {
    inner: MemoryRecordStore,
    cancel: CancellationToken,
}

#[async_trait]
impl RecordStore for CancellingStore {
    fn name(&self) -> &str {
        "cancelling"
    }

    async fn put(&self, key: &str, record: &TransactionEvent) -> Result<(), RecordStoreError> {
        self.cancel.cancel();
        self.inner.put(key, record).await
    }

    async fn get(&self, key: &str) -> Result<Option<TransactionEvent>, RecordStoreError> {
        self.inner.get(key).await
    }
}

#[tokio::test]
async fn test_cancel_after_write_parks_publish() {
    let cancel = CancellationToken::new();
    let store = Arc::new(CancellingStore {
        inner: MemoryRecordStore::new(),
        cancel: cancel.clone(),
    });
    let publisher = Arc::new(RecordingPublisher::default());
    let executor = WorkflowExecutor::new(store.clone(), publisher.clone(), fast_config());

    let report = executor.execute(&event("tx-1"), &cancel).await;

    assert_eq!(report.status, ExecutionStatus::PendingPublish);
    assert_eq!(report.final_step, Step::PublishProcessed);
    assert!(store.get("tx-1").await.unwrap().is_some());
    assert!(publisher.published().is_empty());
    assert_eq!(executor.pending(), vec!["tx-1".to_string()]);

    let replayed = executor.replay_pending().await;
    assert_eq!(replayed.len(), 1);
    assert!(replayed[0].is_success());
    assert_eq!(publisher.published().len(), 1);
    assert!(executor.pending().is_empty());
}

// =============================================================================
// Audit window
// =============================================================================

#[tokio::test]
async fn test_audit_window_evicts_oldest() {
    let f = fixture(fast_config().with_audit_window(2));
    let cancel = CancellationToken::new();

    for id in ["tx-1", "tx-2", "tx-3"] {
        f.executor.execute(&event(id), &cancel).await;
    }

    let ids: Vec<String> = f
        .executor
        .recent_reports()
        .into_iter()
        .map(|r| r.transaction_id)
        .collect();
    assert_eq!(ids, vec!["tx-2", "tx-3"]);
}

#[tokio::test]
async fn test_zero_audit_window_keeps_nothing() {
    let f = fixture(fast_config().with_audit_window(0));
    f.executor.execute(&event("tx-1"), &CancellationToken::new()).await;
    assert!(f.executor.recent_reports().is_empty());
}
