//! Tests for the batch archiver

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use arrow::array::{Array, Decimal128Array, StringArray};
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use rust_decimal::Decimal;
use tally_protocol::TransactionEvent;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::catalog::StaticCatalog;
use crate::store::MemoryObjectStore;
use crate::util::decode_lz4_lines;

// =============================================================================
// Helpers
// =============================================================================

struct Fixture {
    archiver: Archiver,
    primary: Arc<MemoryObjectStore>,
    backup: Arc<MemoryObjectStore>,
    error: Arc<MemoryObjectStore>,
}

impl Fixture {
    fn new(config: ArchiverConfig) -> Self {
        let primary = Arc::new(MemoryObjectStore::new("primary"));
        let backup = Arc::new(MemoryObjectStore::new("backup"));
        let error = Arc::new(MemoryObjectStore::new("error"));
        let destinations = Destinations::new(primary.clone(), backup.clone(), error.clone());
        let archiver =
            Archiver::new(config, destinations, &StaticCatalog::default()).unwrap();
        Self {
            archiver,
            primary,
            backup,
            error,
        }
    }

    fn handle(&self) -> ArchiverHandle {
        self.archiver.handle()
    }
}

fn fast_config() -> ArchiverConfig {
    ArchiverConfig::default().with_retry(RetryPolicy {
        max_retries: 1,
        base_delay: Duration::from_millis(1),
    })
}

fn flush_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 5, 14, 27, 9).unwrap()
}

fn event(id: &str, amount: &str) -> TransactionEvent {
    TransactionEvent {
        transaction_id: id.to_string(),
        customer_id: "cust-1".to_string(),
        received_datetime: Utc.with_ymd_and_hms(2024, 3, 5, 14, 0, 1).unwrap(),
        requested_datetime: Utc.with_ymd_and_hms(2024, 3, 5, 14, 0, 0).unwrap(),
        source_account: "A1".to_string(),
        destination_account: "A2".to_string(),
        total_amount: Decimal::from_str(amount).unwrap(),
    }
}

fn read_parquet(body: Bytes) -> Vec<arrow::array::RecordBatch> {
    ParquetRecordBatchReaderBuilder::try_new(body)
        .unwrap()
        .build()
        .unwrap()
        .map(|b| b.unwrap())
        .collect()
}

fn parquet_rows(store: &MemoryObjectStore) -> usize {
    store
        .keys()
        .iter()
        .filter(|k| k.ends_with(".parquet"))
        .map(|k| {
            read_parquet(store.get(k).unwrap())
                .iter()
                .map(|b| b.num_rows())
                .sum::<usize>()
        })
        .sum()
}

fn jsonl_lines(store: &MemoryObjectStore, key: &str) -> Vec<serde_json::Value> {
    decode_lz4_lines(&store.get(key).unwrap())
        .unwrap()
        .iter()
        .map(|l| serde_json::from_slice(l).unwrap())
        .collect()
}

// =============================================================================
// Flush layout
// =============================================================================

#[tokio::test]
async fn test_partition_from_flush_time() {
    let fx = Fixture::new(fast_config());
    let handle = fx.handle();
    for i in 0..3 {
        handle.append(&event(&format!("tx-{i}"), "10.00")).unwrap();
    }

    let report = handle.flush_at(flush_time()).await;
    assert!(report.is_success());

    let prefix = "transactions/year=2024/month=03/day=05/hour=14/";
    let keys = fx.primary.keys();
    assert_eq!(keys.len(), 1);
    assert!(keys[0].starts_with(prefix), "unexpected key {}", keys[0]);
    assert!(keys[0].contains("-2024-03-05-14-27-09-"));
    assert!(keys[0].ends_with(".parquet"));
    assert_eq!(parquet_rows(&fx.primary), 3);

    let backup_keys = fx.backup.keys();
    assert_eq!(backup_keys.len(), 1);
    assert!(backup_keys[0].starts_with(prefix));
    assert!(backup_keys[0].ends_with(".jsonl.lz4"));
    assert!(fx.error.is_empty());
}

#[tokio::test]
async fn test_parquet_values_preserved() {
    let fx = Fixture::new(fast_config());
    let handle = fx.handle();
    handle.append(&event("tx-1", "125.50")).unwrap();
    handle.flush_at(flush_time()).await;

    let key = &fx.primary.keys()[0];
    let batches = read_parquet(fx.primary.get(key).unwrap());
    let batch = &batches[0];

    let ids = batch
        .column_by_name("transaction_id")
        .unwrap()
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap();
    assert_eq!(ids.value(0), "tx-1");

    let amounts = batch
        .column_by_name("total_amount")
        .unwrap()
        .as_any()
        .downcast_ref::<Decimal128Array>()
        .unwrap();
    assert_eq!(amounts.precision(), 18);
    assert_eq!(amounts.scale(), 2);
    assert_eq!(amounts.value_as_string(0), "125.50");
    assert!(!amounts.is_null(0));
}

#[tokio::test]
async fn test_backup_holds_raw_records() {
    let fx = Fixture::new(fast_config());
    let handle = fx.handle();
    let raw = event("tx-1", "1.00").to_json_bytes().unwrap();
    handle.append_record(raw.clone()).unwrap();
    handle.append_record(&b"{\"not\":\"a transaction\"}"[..]).unwrap();
    handle.flush_at(flush_time()).await;

    let key = &fx.backup.keys()[0];
    let lines = decode_lz4_lines(&fx.backup.get(key).unwrap()).unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], raw);
    assert_eq!(lines[1], b"{\"not\":\"a transaction\"}".to_vec());
}

#[tokio::test]
async fn test_empty_flush_writes_nothing() {
    let fx = Fixture::new(fast_config());
    let report = fx.handle().flush_at(flush_time()).await;
    assert!(report.is_empty());
    assert!(report.is_success());
    assert!(fx.primary.is_empty());
    assert!(fx.backup.is_empty());
}

#[tokio::test]
async fn test_sequence_numbers_increase() {
    let fx = Fixture::new(fast_config());
    let handle = fx.handle();

    handle.append(&event("tx-1", "1")).unwrap();
    let first = handle.flush_at(flush_time()).await;
    handle.append(&event("tx-2", "1")).unwrap();
    let second = handle.flush_at(flush_time()).await;

    let a = first.primary().unwrap().seq;
    let b = second.primary().unwrap().seq;
    assert!(b > a);
    assert_eq!(fx.primary.len(), 2);
}

// =============================================================================
// Conversion isolation
// =============================================================================

#[tokio::test]
async fn test_conversion_failure_isolated() {
    let fx = Fixture::new(fast_config());
    let handle = fx.handle();

    for i in 0..9 {
        handle.append(&event(&format!("tx-{i}"), "5.25")).unwrap();
    }
    let mut bad: serde_json::Value =
        serde_json::from_slice(&event("tx-bad", "1").to_json_bytes().unwrap()).unwrap();
    bad["total_amount"] = serde_json::json!("twelve");
    handle.append_record(serde_json::to_vec(&bad).unwrap()).unwrap();

    let report = handle.flush_at(flush_time()).await;
    assert!(report.is_success());
    let primary = report.primary().unwrap();
    assert_eq!(primary.records, 10);
    assert_eq!(primary.converted, 9);
    assert_eq!(primary.rejected, 1);
    assert_eq!(parquet_rows(&fx.primary), 9);

    let error_keys = fx
        .error
        .keys_with_prefix("transactionserror/conversion/year=2024/month=03/day=05/hour=14/");
    assert_eq!(error_keys.len(), 1);
    let lines = jsonl_lines(&fx.error, &error_keys[0]);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["error_type"], "conversion");
    assert_eq!(lines[0]["table"], "transactions");
    assert!(
        lines[0]["error_message"]
            .as_str()
            .unwrap()
            .contains("total_amount")
    );
    let raw: serde_json::Value =
        serde_json::from_str(lines[0]["raw_data"].as_str().unwrap()).unwrap();
    assert_eq!(raw["transaction_id"], "tx-bad");

    let snapshot = handle.metrics().snapshot();
    assert_eq!(snapshot.rows_converted, 9);
    assert_eq!(snapshot.conversion_errors, 1);
}

#[tokio::test]
async fn test_negative_record_goes_to_error_stream() {
    let fx = Fixture::new(fast_config());
    let handle = fx.handle();

    handle.append(&event("tx-ok", "5.00")).unwrap();
    let mut negative: serde_json::Value =
        serde_json::from_slice(&event("tx-neg", "1").to_json_bytes().unwrap()).unwrap();
    negative["total_amount"] = serde_json::json!("-5.00");
    handle.append_record(serde_json::to_vec(&negative).unwrap()).unwrap();

    let report = handle.flush_at(flush_time()).await;
    assert!(report.is_success());
    assert_eq!(report.converted(), 1);
    assert_eq!(report.rejected(), 1);
    assert_eq!(parquet_rows(&fx.primary), 1);

    let error_keys = fx
        .error
        .keys_with_prefix("transactionserror/conversion/year=2024/month=03/day=05/hour=14/");
    assert_eq!(error_keys.len(), 1);
    let lines = jsonl_lines(&fx.error, &error_keys[0]);
    assert!(
        lines[0]["error_message"]
            .as_str()
            .unwrap()
            .contains("non-negative")
    );
}

#[tokio::test]
async fn test_all_records_rejected_writes_no_parquet() {
    let fx = Fixture::new(fast_config());
    let handle = fx.handle();
    handle.append_record(&b"[]"[..]).unwrap();
    handle.append_record(&b"garbage"[..]).unwrap();

    let report = handle.flush_at(flush_time()).await;
    assert!(report.is_success());
    assert_eq!(report.rejected(), 2);
    assert!(fx.primary.is_empty());
    assert_eq!(fx.error.len(), 1);
}

// =============================================================================
// Backpressure and lifecycle
// =============================================================================

#[tokio::test]
async fn test_backpressure_at_capacity() {
    let fx = Fixture::new(fast_config().with_queue_capacity(3));
    let handle = fx.handle();

    for i in 0..3 {
        handle.append(&event(&format!("tx-{i}"), "1")).unwrap();
    }
    let err = handle.append(&event("tx-overflow", "1")).unwrap_err();
    assert!(err.is_backpressure());
    assert!(matches!(err, ArchiveError::Backpressure { capacity: 3 }));
    assert_eq!(handle.pending_records(), 3);

    let snapshot = handle.metrics().snapshot();
    assert_eq!(snapshot.records_appended, 3);
    assert_eq!(snapshot.records_rejected, 1);

    // nothing was dropped: the three accepted records are all written
    handle.flush_at(flush_time()).await;
    assert_eq!(parquet_rows(&fx.primary), 3);
    handle.append(&event("tx-overflow", "1")).unwrap();
}

#[tokio::test]
async fn test_append_validates_event() {
    let fx = Fixture::new(fast_config());
    let mut bad = event("tx-1", "1");
    bad.customer_id = String::new();
    let err = fx.handle().append(&bad).unwrap_err();
    assert!(matches!(err, ArchiveError::InvalidEvent(_)));
    assert_eq!(fx.handle().pending_records(), 0);
}

#[tokio::test]
async fn test_shutdown_flushes_and_closes() {
    let fx = Fixture::new(fast_config());
    let handle = fx.handle();
    handle.append(&event("tx-1", "1")).unwrap();

    let snapshot = handle.shutdown().await;
    assert_eq!(snapshot.records_appended, 1);
    assert_eq!(snapshot.rows_converted, 1);
    assert_eq!(fx.primary.len(), 1);

    assert!(handle.is_closed());
    assert!(matches!(
        handle.append(&event("tx-2", "1")),
        Err(ArchiveError::Closed)
    ));
}

#[test]
fn test_unknown_table() {
    let destinations = Destinations::new(
        Arc::new(MemoryObjectStore::new("p")),
        Arc::new(MemoryObjectStore::new("b")),
        Arc::new(MemoryObjectStore::new("e")),
    );
    let result = Archiver::new(
        ArchiverConfig::default().with_table("ledger"),
        destinations,
        &StaticCatalog::empty(),
    );
    assert!(matches!(result, Err(ArchiveError::UnknownTable(t)) if t == "ledger"));
}

// =============================================================================
// Destination failures
// =============================================================================

#[tokio::test]
async fn test_requeue_then_success_overwrites_same_key() {
    let fx = Fixture::new(fast_config());
    let handle = fx.handle();
    handle.append(&event("tx-1", "1")).unwrap();

    // two failures exhaust max_retries = 1
    fx.primary.fail_next(2);
    let first = handle.flush_at(flush_time()).await;
    let primary = first.primary().unwrap();
    assert!(matches!(primary.outcome, BatchOutcome::Requeued { .. }));
    assert_eq!(handle.requeued_batches(), 1);
    assert!(fx.primary.is_empty());

    // a later flush keeps the original partition and key
    let later = Utc.with_ymd_and_hms(2024, 3, 5, 16, 0, 0).unwrap();
    let second = handle.flush_at(later).await;
    assert_eq!(second.batches.len(), 1);
    let retried = &second.batches[0];
    assert!(retried.retry);
    assert!(retried.is_written());
    assert_eq!(retried.partition, Partition::from_flush_time(flush_time()));

    let keys = fx.primary.keys();
    assert_eq!(keys.len(), 1);
    assert!(keys[0].contains("hour=14/"));
    assert_eq!(handle.requeued_batches(), 0);

    let snapshot = handle.metrics().snapshot();
    assert_eq!(snapshot.batches_requeued, 1);
    assert_eq!(snapshot.fatal_failures, 0);
    assert!(snapshot.write_retries >= 1);
}

#[tokio::test]
async fn test_requeue_then_fatal_keeps_batch() {
    let fx = Fixture::new(fast_config());
    let handle = fx.handle();
    handle.append(&event("tx-1", "1")).unwrap();
    handle.append(&event("tx-2", "1")).unwrap();

    fx.primary.fail_next(100);
    let first = handle.flush_at(flush_time()).await;
    assert!(!first.is_success());
    let second = handle.flush_at(flush_time()).await;
    assert!(matches!(
        second.batches[0].outcome,
        BatchOutcome::Failed { .. }
    ));

    let failed = handle.take_failed_batches();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].kind, BatchKind::Primary);
    assert_eq!(failed[0].records.len(), 2);
    assert!(failed[0].error.contains("primary"));
    assert!(handle.take_failed_batches().is_empty());

    let snapshot = handle.metrics().snapshot();
    assert_eq!(snapshot.fatal_failures, 1);
    // backup stream was unaffected
    assert_eq!(fx.backup.len(), 1);
}

#[tokio::test]
async fn test_backup_failure_diverts_to_error_stream() {
    let fx = Fixture::new(fast_config());
    let handle = fx.handle();
    handle.append(&event("tx-1", "1")).unwrap();
    handle.append(&event("tx-2", "1")).unwrap();

    fx.backup.fail_next(100);
    let report = handle.flush_at(flush_time()).await;
    assert!(report.is_success());
    let backup = report.backup().unwrap();
    assert!(backup.diverted);

    let keys = fx
        .error
        .keys_with_prefix("transactionserror/backup/year=2024/month=03/day=05/hour=14/");
    assert_eq!(keys.len(), 1);
    let lines = jsonl_lines(&fx.error, &keys[0]);
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|l| l["error_type"] == "backup"));

    assert_eq!(parquet_rows(&fx.primary), 2);
    assert_eq!(handle.metrics().snapshot().backup_diversions, 1);
}

#[tokio::test]
async fn test_shutdown_retries_requeued_batch() {
    let fx = Fixture::new(fast_config());
    let handle = fx.handle();
    handle.append(&event("tx-1", "1")).unwrap();

    fx.primary.fail_next(2);
    let snapshot = handle.shutdown().await;
    assert_eq!(snapshot.batches_requeued, 1);
    assert_eq!(snapshot.fatal_failures, 0);
    assert_eq!(handle.requeued_batches(), 0);
    assert_eq!(parquet_rows(&fx.primary), 1);
}

// =============================================================================
// Backup threshold and flush loop
// =============================================================================

#[tokio::test]
async fn test_backup_only_flush() {
    let fx = Fixture::new(fast_config().with_backup_flush_size_bytes(1));
    let handle = fx.handle();
    handle.append(&event("tx-1", "1")).unwrap();

    let report = handle.flush_backup_at(flush_time()).await;
    assert_eq!(report.batches.len(), 1);
    assert_eq!(report.batches[0].kind, BatchKind::Backup);

    assert_eq!(fx.backup.len(), 1);
    assert!(fx.primary.is_empty());
    assert_eq!(handle.pending_records(), 1);

    // the next main flush has no backup left to drain
    let report = handle.flush_at(flush_time()).await;
    assert!(report.backup().is_none());
    assert_eq!(report.primary().unwrap().converted, 1);
    assert_eq!(fx.backup.len(), 1);
}

async fn wait_for(store: &MemoryObjectStore, count: usize) {
    for _ in 0..200 {
        if store.len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("store {} never reached {count} objects", store.name());
}

#[tokio::test]
async fn test_run_flushes_on_size_threshold() {
    let fx = Fixture::new(
        fast_config()
            .with_flush_interval(Duration::from_secs(3600))
            .with_flush_size_bytes(1),
    );
    let handle = fx.handle();
    let primary = fx.primary.clone();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(fx.archiver.run(cancel.clone()));

    handle.append(&event("tx-1", "1")).unwrap();
    wait_for(&primary, 1).await;

    cancel.cancel();
    let snapshot = task.await.unwrap();
    assert_eq!(snapshot.rows_converted, 1);
    assert!(handle.is_closed());
}

#[tokio::test]
async fn test_run_drains_backup_on_its_own_threshold() {
    let fx = Fixture::new(
        fast_config()
            .with_flush_interval(Duration::from_secs(3600))
            .with_backup_flush_size_bytes(1),
    );
    let handle = fx.handle();
    let backup = fx.backup.clone();
    let primary = fx.primary.clone();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(fx.archiver.run(cancel.clone()));

    handle.append(&event("tx-1", "1")).unwrap();
    wait_for(&backup, 1).await;
    assert!(primary.is_empty());
    assert_eq!(handle.pending_records(), 1);

    cancel.cancel();
    task.await.unwrap();
    // final flush writes the pending batch
    assert_eq!(primary.len(), 1);
}

#[tokio::test]
async fn test_run_flushes_when_batch_reaches_capacity() {
    let fx = Fixture::new(
        fast_config()
            .with_flush_interval(Duration::from_secs(3600))
            .with_queue_capacity(2),
    );
    let handle = fx.handle();
    let primary = fx.primary.clone();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(fx.archiver.run(cancel.clone()));

    handle.append(&event("tx-1", "1")).unwrap();
    handle.append(&event("tx-2", "1")).unwrap();
    wait_for(&primary, 1).await;
    assert_eq!(handle.pending_records(), 0);
    handle.append(&event("tx-3", "1")).unwrap();

    cancel.cancel();
    let snapshot = task.await.unwrap();
    assert_eq!(snapshot.rows_converted, 3);
    assert_eq!(snapshot.records_rejected, 0);
}

#[tokio::test]
async fn test_run_flushes_on_interval() {
    let fx = Fixture::new(fast_config().with_flush_interval(Duration::from_millis(50)));
    let handle = fx.handle();
    let primary = fx.primary.clone();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(fx.archiver.run(cancel.clone()));

    handle.append(&event("tx-1", "1")).unwrap();
    wait_for(&primary, 1).await;
    assert_eq!(handle.pending_records(), 0);

    cancel.cancel();
    let snapshot = task.await.unwrap();
    assert_eq!(snapshot.batches_flushed, 2);
}
