//! Object encoding and retried destination writes

use std::borrow::Cow;

use arrow::array::RecordBatch;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use serde::Serialize;

use super::batch::{Destination, ErrorOutputType};
use super::metrics::ArchiverMetrics;
use crate::error::{ArchiveError, DestinationWriteError};
use crate::store::ObjectStore;
use crate::util::{Compression, RetryPolicy, encode_lz4_lines, retry_with_backoff};

/// Extension of Parquet objects
pub(crate) const PARQUET_EXT: &str = "parquet";

/// Extension of compressed JSON-lines objects
pub(crate) const JSONL_LZ4_EXT: &str = "jsonl.lz4";

/// Encode a record batch as a single Parquet object
pub(crate) fn encode_parquet(
    batch: &RecordBatch,
    compression: Compression,
) -> Result<Bytes, ArchiveError> {
    let props = compression.writer_properties();
    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;

    Ok(Bytes::from(buf))
}

/// Encode raw records as LZ4-framed JSON lines
pub(crate) fn encode_raw_lines(records: &[Bytes]) -> Result<Bytes, ArchiveError> {
    let body = encode_lz4_lines(records.iter().map(|r| &r[..]))?;
    Ok(Bytes::from(body))
}

/// One line of the error stream
#[derive(Debug, Serialize)]
struct ErrorLine<'a> {
    error_type: &'static str,
    error_message: &'a str,
    raw_data: Cow<'a, str>,
    table: &'a str,
}

/// Encode diverted records as tagged, LZ4-framed JSON lines
///
/// `entries` pairs each raw record with the message explaining why it was
/// diverted.
pub(crate) fn encode_error_lines<'a, I>(
    table: &str,
    error_type: ErrorOutputType,
    entries: I,
) -> Result<Bytes, ArchiveError>
where
    I: IntoIterator<Item = (&'a [u8], &'a str)>,
{
    let lines = entries
        .into_iter()
        .map(|(raw, message)| {
            serde_json::to_vec(&ErrorLine {
                error_type: error_type.as_str(),
                error_message: message,
                raw_data: String::from_utf8_lossy(raw),
                table,
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ArchiveError::Encode(e.to_string()))?;

    let body = encode_lz4_lines(lines.iter().map(Vec::as_slice))?;
    Ok(Bytes::from(body))
}

/// Put an object, retrying with backoff
///
/// Returns the number of bytes written. Retries beyond the first attempt are
/// counted in `metrics`.
pub(crate) async fn put_with_retry(
    store: &dyn ObjectStore,
    destination: Destination,
    key: &str,
    body: Bytes,
    policy: &RetryPolicy,
    metrics: &ArchiverMetrics,
) -> Result<u64, DestinationWriteError> {
    let len = body.len() as u64;
    let mut attempts = 0u32;

    let result = retry_with_backoff(policy, destination.as_str(), || {
        attempts += 1;
        store.put(key, body.clone())
    })
    .await;

    metrics.record_retries(u64::from(attempts.saturating_sub(1)));

    match result {
        Ok(()) => {
            metrics.record_bytes(destination, len);
            tracing::debug!(
                destination = destination.as_str(),
                store = store.name(),
                key,
                bytes = len,
                "object written"
            );
            Ok(len)
        }
        Err(e) => Err(DestinationWriteError {
            destination: destination.as_str(),
            key: key.to_string(),
            attempts: e.attempts,
            source: e.last_error,
        }),
    }
}
