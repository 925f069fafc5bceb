use std::time::Duration;

use collector_api::Record;
use collector_engine::{Dispatcher, EngineError};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;

/// Resubmissions of a record refused with queue-full before it is given up.
const QUEUE_FULL_RETRIES: u32 = 3;
const QUEUE_FULL_PAUSE: Duration = Duration::from_millis(100);

#[derive(Debug, Default, Clone, Serialize)]
pub struct IngestStats {
    pub lines: u64,
    pub accepted: u64,
    /// Lines that are not a JSON record envelope.
    pub malformed: u64,
    /// Records the dispatcher refused (routing, decode, queue-full).
    pub rejected: u64,
}

/// Submit every newline-delimited JSON record from `reader` until EOF or
/// cancellation.
pub async fn pump<Rd>(
    reader: Rd,
    dispatcher: &Dispatcher,
    token: &CancellationToken,
) -> Result<IngestStats, std::io::Error>
where
    Rd: AsyncBufRead + Unpin,
{
    let mut stats = IngestStats::default();
    let mut lines = reader.lines();

    loop {
        let line = tokio::select! {
            _ = token.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        stats.lines += 1;

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: Record = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                stats.malformed += 1;
                tracing::warn!(line = stats.lines, error = %e, "skipping malformed record");
                continue;
            }
        };

        match submit(dispatcher, record).await {
            Ok(()) => stats.accepted += 1,
            Err(e) => {
                stats.rejected += 1;
                tracing::debug!(line = stats.lines, error = %e, "record rejected");
            }
        }
    }

    Ok(stats)
}

async fn submit(dispatcher: &Dispatcher, record: Record) -> Result<(), EngineError> {
    let mut attempt = 0;
    loop {
        match dispatcher.submit(record.clone()).await {
            Err(e) if e.is_retryable() && attempt < QUEUE_FULL_RETRIES => {
                attempt += 1;
                tracing::debug!(kind = %record.kind, attempt, "queue full, resubmitting");
                tokio::time::sleep(QUEUE_FULL_PAUSE).await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use collector_api::NoCache;
    use collector_engine::{StorageRegistry, WorkerProvider, WorkerRegistration, WorkerSettings};
    use collector_model::Instance;
    use storage_memory::MemoryBackend;
    use tokio::io::BufReader;

    use super::*;

    #[tokio::test]
    async fn counts_each_outcome() {
        let backend = MemoryBackend::new();
        let storage = StorageRegistry::builder("memory")
            .bind_from::<Instance, _>(&backend)
            .build()
            .unwrap();
        let mut provider = WorkerProvider::new();
        provider
            .register::<Instance>(WorkerRegistration::new(1), WorkerSettings::default())
            .unwrap();
        let collector = provider
            .start(&storage, Arc::new(NoCache), CancellationToken::new())
            .unwrap();

        let input = concat!(
            r#"{"type":"instance","payload":{"instance_id":1,"heartbeat_time":10}}"#,
            "\n",
            "\n",
            "not json\n",
            r#"{"type":"segment","payload":{}}"#,
            "\n",
            r#"{"type":"instance","payload":{"instance_id":1,"heartbeat_time":15}}"#,
            "\n",
        );
        let dispatcher = collector.dispatcher();
        let stats = pump(BufReader::new(input.as_bytes()), &dispatcher, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!((stats.lines, stats.accepted, stats.malformed, stats.rejected), (5, 2, 1, 1));

        collector.shutdown().await;
        let row = backend.table::<Instance>().get("1").await.unwrap();
        assert_eq!(row.heartbeat_time, 15);
    }

    #[tokio::test]
    async fn stops_on_cancel() {
        let storage = StorageRegistry::builder("memory").build().unwrap();
        let collector = WorkerProvider::new()
            .start(&storage, Arc::new(NoCache), CancellationToken::new())
            .unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let (_writer, reader) = tokio::io::duplex(64);
        let stats = pump(BufReader::new(reader), &collector.dispatcher(), &token)
            .await
            .unwrap();
        assert_eq!(stats.lines, 0);
    }
}
