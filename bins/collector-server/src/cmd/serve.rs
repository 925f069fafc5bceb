use std::sync::Arc;

use collector_api::StorageBackend;
use collector_engine::{BackendKind, Collector, CollectorConfig, DispatcherStats, StaticCache};
use serde::Serialize;
use storage_file::FileBackend;
use storage_memory::MemoryBackend;
use tokio::io::{AsyncBufRead, BufReader};
use tokio_util::sync::CancellationToken;

use crate::catalog::{self, Plan};
use crate::cli::ServeArgs;
use crate::error::ServerError;
use crate::ingest::{self, IngestStats};

#[derive(Serialize)]
struct Summary {
    ingest: IngestStats,
    pipeline: DispatcherStats,
}

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("collector-server starting");

    // --- Load config ---
    let config = CollectorConfig::load(&args.config)?;
    tracing::info!(config = %args.config.display(), backend = config.storage.backend.as_str(), "loaded config");

    let plans = catalog::plan(&config)?;
    let cache = Arc::new(StaticCache::from_tables(&config.cache));
    tracing::info!(workers = plans.len(), cache_entries = cache.len(), "resolved worker plan");

    // --- Start workers on the configured backend ---
    let token = CancellationToken::new();
    let collector = match config.storage.backend {
        BackendKind::Memory => start(&MemoryBackend::new(), &plans, cache, token.clone())?,
        BackendKind::File => {
            let data_dir = config.storage.data_dir.clone().unwrap_or_default();
            start(&FileBackend::new(data_dir), &plans, cache, token.clone())?
        }
    };

    // --- Ctrl+C stops ingestion; EOF does the same ---
    let signal_token = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = signal_token.cancelled() => {}
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => tracing::info!("shutting down..."),
                    Err(e) => tracing::error!(error = %e, "failed to listen for Ctrl+C"),
                }
                signal_token.cancel();
            }
        }
    });

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &args.input {
        Some(path) => Box::new(BufReader::new(tokio::fs::File::open(path).await?)),
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let dispatcher = collector.dispatcher();
    let ingest = ingest::pump(reader, &dispatcher, &token).await;

    // Flush whatever was accepted even if the input failed midway.
    let pipeline = collector.shutdown().await;
    let ingest = ingest?;
    tracing::info!(
        lines = ingest.lines,
        accepted = ingest.accepted,
        rejected = ingest.rejected,
        "collector-server stopped"
    );

    println!("{}", serde_json::to_string_pretty(&Summary { ingest, pipeline })?);
    Ok(())
}

fn start<B: StorageBackend>(
    backend: &B,
    plans: &[Plan],
    cache: Arc<StaticCache>,
    token: CancellationToken,
) -> Result<Collector, ServerError> {
    backend.init()?;
    let (storage, provider) = catalog::wire(backend, plans)?;
    Ok(provider.start(&storage, cache, token)?)
}
