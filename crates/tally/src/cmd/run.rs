//! Run command - ingest inbound events through both pipeline paths
//!
//! Reads JSON-lines envelopes from a file or stdin and feeds them to the
//! router. When input is exhausted or a shutdown signal arrives, ingestion
//! stops, in-flight workflow executions drain, parked publishes are replayed
//! once, and the archiver performs its final flush.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Args;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tally_config::{BusConfig, BusTransportKind, Config, ParquetCompression, WorkflowConfig};
use tally_pipeline::{PipelineError, Router, RouterMetricsSnapshot};
use tally_sinks::{
    Archiver, ArchiverMetricsSnapshot, Compression, Destinations, LocalObjectStore, RetryPolicy,
    StaticCatalog,
};
use tally_workflow::{
    BusPublisher, ChannelTransport, ExecutorConfig, ExecutorMetricsSnapshot, FileRecordStore,
    MemoryRecordStore, Publisher, RecordStore, StdoutTransport, StepRetryPolicy,
    WorkflowExecutor,
};

/// Bus channel capacity when the channel transport is selected
const BUS_CHANNEL_SIZE: usize = 1024;

/// Run command arguments
#[derive(Args, Debug)]
pub struct RunArgs {
    /// JSON-lines file of inbound events, or `-` for stdin
    #[arg(short, long, default_value = "-")]
    pub input: String,
}

/// Run the pipeline until input is exhausted or a shutdown signal arrives
pub async fn run(args: RunArgs, config: Config) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        input = %args.input,
        table = %config.archiver.table,
        "tally starting"
    );

    let stop_archiver = CancellationToken::new();
    let cancel_workflows = CancellationToken::new();

    // OLAP path
    let archiver = build_archiver(&config)?;
    let archiver_handle = archiver.handle();
    let archiver_task = tokio::spawn(archiver.run(stop_archiver.clone()));

    // OLTP path
    let (publisher, bus_task) = build_publisher(&config.bus);
    let executor = Arc::new(build_executor(&config.workflow, publisher));

    let router = Router::new(
        archiver_handle.clone(),
        Arc::clone(&executor),
        cancel_workflows.clone(),
    )
    .with_archive_retry(RetryPolicy {
        max_retries: config.ingest.archive_max_retries,
        base_delay: config.ingest.archive_retry_delay,
    });
    let router_handle = router.handle();
    let (tx, rx) = mpsc::channel(config.ingest.channel_size);
    let mut router_task = tokio::spawn(router.run(rx));

    // A signal stops ingestion and cancels in-flight executions
    let ingested = tokio::select! {
        result = ingest(&args.input, tx) => result,
        _ = wait_for_shutdown() => {
            info!("shutdown signal received, stopping ingestion");
            cancel_workflows.cancel();
            Ok(0)
        }
    };
    if let Err(e) = &ingested {
        error!(error = %e, "ingestion failed, shutting down");
    }

    info!("waiting for router to drain...");
    let router_snapshot = tokio::select! {
        result = &mut router_task => result,
        _ = wait_for_shutdown(), if !cancel_workflows.is_cancelled() => {
            warn!("shutdown signal received, cancelling in-flight workflow executions");
            cancel_workflows.cancel();
            (&mut router_task).await
        }
    }
    .context("router task failed")?;

    if !executor.pending().is_empty() && !cancel_workflows.is_cancelled() {
        let replayed = executor.replay_pending().await;
        info!(
            replayed = replayed.len(),
            still_pending = executor.pending().len(),
            "replayed parked publishes"
        );
    }
    let still_pending = executor.pending();
    let executor_snapshot = executor.metrics();
    drop(executor);

    info!("waiting for archiver to flush...");
    stop_archiver.cancel();
    let archiver_snapshot = archiver_task.await.context("archiver task failed")?;

    if let Some(task) = bus_task
        && let Err(e) = task.await
    {
        warn!(error = %e, "bus drain task failed");
    }

    print_summary(&router_snapshot, &executor_snapshot, &archiver_snapshot);

    for id in &still_pending {
        warn!(transaction_id = %id, "processed event was never published");
    }

    let unarchived = router_handle.take_unarchived();
    for entry in &unarchived {
        error!(
            transaction_id = %entry.event.transaction_id,
            error = %entry.error,
            record = %String::from_utf8_lossy(&entry.event.to_json_bytes().unwrap_or_default()),
            "event was never archived"
        );
    }

    let failed = archiver_handle.take_failed_batches();
    for batch in &failed {
        error!(
            seq = batch.seq,
            kind = %batch.kind,
            partition = %batch.partition,
            records = batch.records.len(),
            error = %batch.error,
            "archive batch lost"
        );
    }
    if !failed.is_empty() || !unarchived.is_empty() {
        anyhow::bail!(
            "{} archive batches could not be written, {} events were never archived",
            failed.len(),
            unarchived.len()
        );
    }
    ingested?;

    info!("tally shutdown complete");
    Ok(())
}

// =============================================================================
// Wiring
// =============================================================================

fn build_archiver(config: &Config) -> Result<Archiver> {
    let archiver = &config.archiver;
    let destinations = Destinations::new(
        Arc::new(LocalObjectStore::new(&archiver.destinations.primary)),
        Arc::new(LocalObjectStore::new(&archiver.destinations.backup)),
        Arc::new(LocalObjectStore::new(&archiver.destinations.error)),
    );
    let compression = match archiver.compression {
        ParquetCompression::Snappy => Compression::Snappy,
        ParquetCompression::Lz4 => Compression::Lz4,
        ParquetCompression::Zstd => Compression::Zstd,
        ParquetCompression::None => Compression::None,
    };

    let sink_config = tally_sinks::ArchiverConfig::default()
        .with_table(archiver.table.clone())
        .with_flush_interval(archiver.flush_interval)
        .with_flush_size_bytes(archiver.flush_size_bytes)
        .with_backup_flush_size_bytes(archiver.backup_flush_size_bytes)
        .with_queue_capacity(archiver.queue_capacity)
        .with_compression(compression)
        .with_retry(RetryPolicy {
            max_retries: archiver.retry.max_retries,
            base_delay: archiver.retry.base_delay,
        });

    Archiver::new(sink_config, destinations, &StaticCatalog::default())
        .context("failed to create archiver")
}

fn build_publisher(bus: &BusConfig) -> (Arc<dyn Publisher>, Option<JoinHandle<()>>) {
    let (transport, task): (Arc<dyn tally_workflow::BusTransport>, _) = match bus.transport {
        BusTransportKind::Stdout => (Arc::new(StdoutTransport::stdout()), None),
        BusTransportKind::Channel => {
            let (transport, mut receiver) = ChannelTransport::new(BUS_CHANNEL_SIZE);
            let task = tokio::spawn(async move {
                while let Some(envelope) = receiver.recv().await {
                    debug!(
                        bus = %envelope.bus,
                        detail_type = %envelope.detail_type,
                        transaction_id = %envelope.detail.transaction_id,
                        "bus event"
                    );
                }
            });
            (Arc::new(transport), Some(task))
        }
    };

    let publisher = BusPublisher::new(transport)
        .with_bus(bus.name.clone())
        .with_source(bus.source.clone())
        .with_detail_type(bus.detail_type.clone());
    (Arc::new(publisher), task)
}

fn build_executor(workflow: &WorkflowConfig, publisher: Arc<dyn Publisher>) -> WorkflowExecutor {
    let store: Arc<dyn RecordStore> = match &workflow.record_store {
        Some(dir) => Arc::new(FileRecordStore::new(dir)),
        None => {
            info!("no record store configured, keeping records in memory");
            Arc::new(MemoryRecordStore::new())
        }
    };
    let config = ExecutorConfig::default()
        .with_retry(StepRetryPolicy {
            max_attempts: workflow.retry.max_attempts,
            base_delay: workflow.retry.base_delay,
        })
        .with_audit_window(workflow.audit_window);
    WorkflowExecutor::new(store, publisher, config)
}

// =============================================================================
// Ingestion
// =============================================================================

/// Feed non-blank input lines to the router until EOF
async fn ingest(input: &str, tx: mpsc::Sender<Bytes>) -> Result<u64> {
    let reader: Box<dyn AsyncBufRead + Unpin + Send> = if input == "-" {
        Box::new(BufReader::new(tokio::io::stdin()))
    } else {
        let path = PathBuf::from(input);
        let file = File::open(&path)
            .await
            .with_context(|| format!("failed to open input {}", path.display()))?;
        Box::new(BufReader::new(file))
    };

    let mut lines = reader.lines();
    let mut count = 0u64;
    while let Some(line) = lines.next_line().await.context("failed to read input")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        tx.send(Bytes::copy_from_slice(line.as_bytes()))
            .await
            .map_err(|_| PipelineError::ShuttingDown)?;
        count += 1;
    }

    info!(events = count, "input exhausted");
    Ok(count)
}

// =============================================================================
// Shutdown
// =============================================================================

/// Resolves on the first shutdown signal; never resolves if handlers fail
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn print_summary(
    router: &RouterMetricsSnapshot,
    executor: &ExecutorMetricsSnapshot,
    archiver: &ArchiverMetricsSnapshot,
) {
    info!(
        events_received = router.events_received,
        transform_failures = router.transform_failures,
        time_anomalies = router.time_anomalies,
        archive_ok = router.archive_ok,
        backpressure_events = router.backpressure_events,
        archive_retried = router.archive_retried,
        archive_retained = router.archive_retained,
        workflows_succeeded = executor.executions_succeeded,
        workflows_failed = executor.executions_failed,
        workflows_cancelled = executor.executions_cancelled,
        publishes_parked = executor.publishes_parked,
        publish_replays = executor.publish_replays,
        batches_flushed = archiver.batches_flushed,
        rows_converted = archiver.rows_converted,
        conversion_errors = archiver.conversion_errors,
        bytes_written = archiver.bytes_written(),
        fatal_failures = archiver.fatal_failures,
        "run summary"
    );
}
