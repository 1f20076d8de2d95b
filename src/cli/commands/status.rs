//! `status` command handler.

use std::sync::Arc;

use crate::cli::args::{OutputFormat, StatusArgs};
use crate::clock::format_timestamp;
use crate::error::RoomkeeperError;
use crate::observability::EventEmitter;
use crate::repair::{RoomStatus, StatusSource};
use crate::store::RoomId;

use super::open_engine;

/// Prints the status of one room, or of every stored room.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or read.
pub async fn run(args: &StatusArgs) -> Result<(), RoomkeeperError> {
    let engine = open_engine(&args.store, Arc::new(EventEmitter::noop())).await?;

    let rooms = match &args.room {
        Some(room) => vec![RoomId::new(room.as_str())],
        None => engine.cache().store().room_ids().await?,
    };

    let mut statuses = Vec::with_capacity(rooms.len());
    for room in &rooms {
        statuses.push(engine.repair().status(room).await?);
    }

    match args.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&statuses)?);
        }
        OutputFormat::Human => {
            if statuses.is_empty() {
                println!("no rooms");
            }
            for status in &statuses {
                println!("{}", render(status));
            }
        }
    }
    Ok(())
}

/// One-line human summary of a room.
#[must_use]
pub fn render(status: &RoomStatus) -> String {
    let mut line = format!("{}: ", status.room);
    match (status.source, status.phase, &status.session_error) {
        (StatusSource::Missing, _, _) => line.push_str("not found"),
        (_, _, Some(error)) => line.push_str(&format!("unreadable session ({error})")),
        (_, None, None) => line.push_str("no session"),
        (_, Some(phase), None) => {
            line.push_str(&format!("{phase} cycle={}", status.cycle_count.unwrap_or(0)));
            if let Some(deadline) = status.phase_deadline {
                line.push_str(&format!(" until {}", format_timestamp(deadline)));
            }
            if status.break_record.is_some() != phase.is_break() {
                line.push_str(" [inconsistent]");
            }
        }
    }
    if let Some(holder) = &status.lock_holder {
        line.push_str(&format!(" locked-by={holder}"));
    }
    if let Some(instance) = &status.instance {
        line.push_str(&format!(" instance={instance}"));
    }
    line
}
