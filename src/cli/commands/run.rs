//! `run` command handler
//!
//! Activates the requested rooms, starts their drivers and the cache flush
//! loop, then waits for cancellation and shuts down with a final flush.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cli::args::RunArgs;
use crate::error::RoomkeeperError;
use crate::observability::EventSink;
use crate::observability::events::EventEmitter;
use crate::store::RoomId;

use super::open_engine;

/// Drives rooms until `cancel` fires.
///
/// # Errors
///
/// Returns an error if setup fails, a room cannot be activated, or the
/// final flush loses changes.
pub async fn run(args: &RunArgs, cancel: CancellationToken) -> Result<(), RoomkeeperError> {
    if let Some(port) = args.metrics_port {
        crate::observability::init_metrics(Some(port))?;
        tracing::info!(port, "Prometheus metrics endpoint started");
    }

    let emitter = match &args.events_file {
        Some(path) => EventEmitter::from_file(path)?,
        None => EventEmitter::stderr(),
    };
    let engine = open_engine(&args.store, Arc::new(emitter) as Arc<dyn EventSink>).await?;

    let rooms: Vec<RoomId> = args.rooms.iter().map(RoomId::new).collect();
    let flusher = engine.start_flush_task(cancel.clone());

    if let Err(e) = engine.start(&rooms).await {
        cancel.cancel();
        join_flusher(flusher).await;
        engine.shutdown("startup failed").await;
        return Err(e.into());
    }

    cancel.cancelled().await;
    tracing::info!("shutdown requested");
    join_flusher(flusher).await;

    let failures = engine.shutdown("signal").await;
    match failures.into_iter().next() {
        Some((_, error)) => Err(error.into()),
        None => Ok(()),
    }
}

/// Waits for the maintenance task. Returns `false` if it panicked or was
/// aborted.
async fn join_flusher(flusher: JoinHandle<()>) -> bool {
    match flusher.await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "flush task failed; relying on shutdown flush");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn panicked_flusher_is_reported_not_propagated() {
        let handle: JoinHandle<()> = tokio::spawn(async { panic!("flush loop crashed") });
        assert!(!join_flusher(handle).await);
    }

    #[tokio::test]
    async fn finished_flusher_joins_cleanly() {
        assert!(join_flusher(tokio::spawn(async {})).await);
    }
}
