//! `repair` and `force-clear` command handlers.

use std::sync::Arc;

use crate::cli::args::{ForceClearArgs, OutputFormat, RepairArgs};
use crate::error::RoomkeeperError;
use crate::observability::{EventEmitter, EventSink};
use crate::store::RoomId;

use super::open_engine;

/// Repairs one room or every stored room.
///
/// A sweep with failed rooms still prints its full report before
/// returning an error.
///
/// # Errors
///
/// Returns an error if the store cannot be opened, a single-room repair
/// fails, or any room of a sweep failed.
pub async fn run(args: &RepairArgs) -> Result<(), RoomkeeperError> {
    let sink: Arc<dyn EventSink> = Arc::new(EventEmitter::stderr());
    let engine = open_engine(&args.store, sink).await?;

    if let Some(room) = &args.room {
        let outcome = engine.repair().repair(&RoomId::new(room.as_str())).await?;
        match args.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
            OutputFormat::Human => {
                if outcome.repaired {
                    println!("{}: repaired", outcome.room);
                    for action in &outcome.actions {
                        println!("  - {action}");
                    }
                } else {
                    println!("{}: healthy", outcome.room);
                }
                for warning in &outcome.warnings {
                    println!("  warning: {warning}");
                }
            }
        }
        return Ok(());
    }

    let report = engine.repair().repair_all().await;
    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Human => {
            println!(
                "checked {} room(s): {} repaired, {} failed",
                report.checked,
                report.repaired.len(),
                report.failed.len()
            );
            for room in &report.repaired {
                println!("  repaired {room}");
            }
            for failure in &report.failed {
                println!("  failed {}: {}", failure.room, failure.error);
            }
            for warning in &report.warnings {
                println!("  warning: {warning}");
            }
        }
    }

    if report.failed.is_empty() {
        Ok(())
    } else {
        Err(RoomkeeperError::RepairIncomplete {
            failed: report.failed.len(),
        })
    }
}

/// Removes the running break of one room.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or the room cannot be
/// loaded or flushed.
pub async fn force_clear(args: &ForceClearArgs) -> Result<(), RoomkeeperError> {
    let engine = open_engine(&args.store, Arc::new(EventEmitter::noop())).await?;
    let room = RoomId::new(args.room.as_str());
    let actions = engine.repair().force_clear_break(&room).await?;
    if actions.is_empty() {
        println!("{room}: nothing to clear");
    } else {
        println!("{room}: {}", actions.join(", "));
    }
    Ok(())
}
