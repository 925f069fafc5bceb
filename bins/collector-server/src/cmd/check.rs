use collector_engine::{BackendKind, CollectorConfig};
use storage_file::FileBackend;
use storage_memory::MemoryBackend;

use crate::catalog;
use crate::cli::CheckArgs;
use crate::error::ServerError;

/// Load the configuration, resolve the worker plan and wire it against the
/// configured backend without starting anything.
pub fn run(args: CheckArgs) -> Result<(), ServerError> {
    let config = CollectorConfig::load(&args.config)?;
    let plans = catalog::plan(&config)?;

    let storage = match config.storage.backend {
        BackendKind::Memory => catalog::wire(&MemoryBackend::new(), &plans)?.0,
        BackendKind::File => {
            let data_dir = config.storage.data_dir.clone().unwrap_or_default();
            catalog::wire(&FileBackend::new(data_dir), &plans)?.0
        }
    };

    tracing::info!(config = %args.config.display(), ?storage, "configuration is valid");
    println!("{}", serde_json::to_string_pretty(&plans)?);
    Ok(())
}
