//! CLI command dispatch and handlers
//!
//! Routes parsed CLI arguments to the appropriate command handler and holds
//! the setup shared by every command that opens a store.

pub mod repair;
pub mod run;
pub mod status;
pub mod validate;
pub mod version;

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cli::args::{Cli, Commands, StoreArgs};
use crate::clock::SystemClock;
use crate::config::EngineConfig;
use crate::config::loader::{ConfigLoader, LoaderOptions, default_config_path};
use crate::engine::Engine;
use crate::error::RoomkeeperError;
use crate::observability::EventSink;
use crate::store::{DurableStore, JsonFileStore};

/// Dispatch a parsed CLI invocation to the appropriate command handler.
///
/// # Errors
///
/// Returns an error if the dispatched command handler fails.
pub async fn dispatch(cli: Cli, cancel: CancellationToken) -> Result<(), RoomkeeperError> {
    match cli.command {
        Commands::Run(args) => run::run(&args, cancel).await,
        Commands::Status(args) => status::run(&args).await,
        Commands::Repair(args) => repair::run(&args).await,
        Commands::ForceClear(args) => repair::force_clear(&args).await,
        Commands::Validate(args) => validate::run(&args),
        Commands::Version(args) => {
            version::run(&args);
            Ok(())
        }
    }
}

/// Loads the engine configuration.
///
/// An explicit `--config` must exist. Without one, the default path is
/// used if present and built-in defaults otherwise.
///
/// # Errors
///
/// Returns a config error if the file cannot be loaded or is invalid.
pub fn load_config(path: Option<&Path>) -> Result<Arc<EngineConfig>, RoomkeeperError> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let fallback = default_config_path();
            if !fallback.exists() {
                tracing::debug!("no configuration file; using defaults");
                return Ok(Arc::new(EngineConfig::default()));
            }
            fallback
        }
    };

    tracing::info!(config = %path.display(), "loading configuration");
    let loaded = ConfigLoader::new(LoaderOptions::default()).load(&path)?;
    for warning in &loaded.warnings {
        tracing::warn!(
            location = warning.location.as_deref().unwrap_or("<unknown>"),
            "{}",
            warning.message
        );
    }
    Ok(loaded.config)
}

/// Builds an engine over the JSON store named by `args`.
///
/// # Errors
///
/// Returns an error if the configuration or the store cannot be opened.
pub async fn open_engine(
    args: &StoreArgs,
    sink: Arc<dyn EventSink>,
) -> Result<Engine, RoomkeeperError> {
    let config = load_config(args.config.as_deref())?;
    let store = JsonFileStore::open(&args.store).await?;
    tracing::debug!(store = %store.path().display(), "store opened");
    Ok(Engine::new(
        config,
        Arc::new(store) as Arc<dyn DurableStore>,
        sink,
        Arc::new(SystemClock),
    ))
}
