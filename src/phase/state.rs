//! Room session representation
//!
//! A session lives inside the room's cached document under four fields.
//! Every other field of the document is opaque to the phase engine.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::clock::Timestamp;
use crate::error::StoreError;
use crate::store::{Document, FieldPatch, RoomId};

/// Document field holding the current [`Phase`].
pub const FIELD_PHASE: &str = "phase";
/// Document field holding the current phase's deadline.
pub const FIELD_DEADLINE: &str = "phaseDeadline";
/// Document field counting completed breaks.
pub const FIELD_CYCLE_COUNT: &str = "cycleCount";
/// Document field holding the running [`BreakRecord`].
pub const FIELD_BREAK: &str = "break";

/// Phase of a room's cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Players are playing.
    Active,
    /// A regular break.
    ShortBreak,
    /// The extended break taken every few cycles.
    LongBreak,
}

impl Phase {
    /// Stored representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::ShortBreak => "SHORT_BREAK",
            Self::LongBreak => "LONG_BREAK",
        }
    }

    /// Returns `true` for either break phase.
    #[must_use]
    pub const fn is_break(self) -> bool {
        matches!(self, Self::ShortBreak | Self::LongBreak)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The break currently in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakRecord {
    /// Which break.
    pub kind: Phase,
    /// When it began.
    pub started_at: Timestamp,
    /// When it is due to end.
    pub ends_at: Timestamp,
}

/// Typed view of the session fields of a room document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSession {
    /// Owning room.
    pub room: RoomId,
    /// Current phase.
    pub phase: Phase,
    /// When the current phase ends.
    pub phase_deadline: Timestamp,
    /// Breaks completed so far.
    pub cycle_count: u64,
    /// Running break, if any.
    pub break_record: Option<BreakRecord>,
}

impl RoomSession {
    /// Fresh session: ACTIVE, no completed cycles.
    #[must_use]
    pub const fn new(room: RoomId, deadline: Timestamp) -> Self {
        Self {
            room,
            phase: Phase::Active,
            phase_deadline: deadline,
            cycle_count: 0,
            break_record: None,
        }
    }

    /// Parses the session out of `doc`.
    ///
    /// Returns `Ok(None)` when the document has no phase yet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] when a session field is present but
    /// unreadable.
    pub fn from_document(room: &RoomId, doc: &Document) -> Result<Option<Self>, StoreError> {
        let Some(raw_phase) = doc.get(FIELD_PHASE) else {
            return Ok(None);
        };
        let corrupt = |reason: String| StoreError::Corrupt {
            room: room.clone(),
            reason,
        };

        let phase: Phase = serde_json::from_value(raw_phase.clone())
            .map_err(|e| corrupt(format!("{FIELD_PHASE}: {e}")))?;

        let phase_deadline = doc
            .get(FIELD_DEADLINE)
            .and_then(Value::as_i64)
            .ok_or_else(|| corrupt(format!("{FIELD_DEADLINE} missing or not an integer")))?;

        let cycle_count = match doc.get(FIELD_CYCLE_COUNT) {
            None | Some(Value::Null) => 0,
            Some(v) => v
                .as_u64()
                .ok_or_else(|| corrupt(format!("{FIELD_CYCLE_COUNT} is not a count")))?,
        };

        let break_record = match doc.get(FIELD_BREAK) {
            None | Some(Value::Null) => None,
            Some(v) => Some(
                serde_json::from_value(v.clone())
                    .map_err(|e| corrupt(format!("{FIELD_BREAK}: {e}")))?,
            ),
        };

        Ok(Some(Self {
            room: room.clone(),
            phase,
            phase_deadline,
            cycle_count,
            break_record,
        }))
    }

    /// Field patch writing every session field. An absent break record is
    /// not part of the patch; callers delete [`FIELD_BREAK`] separately.
    #[must_use]
    pub fn to_patch(&self) -> FieldPatch {
        let mut patch = FieldPatch::new();
        patch.insert(FIELD_PHASE.to_string(), json!(self.phase));
        patch.insert(FIELD_DEADLINE.to_string(), json!(self.phase_deadline));
        patch.insert(FIELD_CYCLE_COUNT.to_string(), json!(self.cycle_count));
        if let Some(record) = &self.break_record {
            patch.insert(FIELD_BREAK.to_string(), json!(record));
        }
        patch
    }

    /// Returns `true` when phase and break record disagree: a break phase
    /// without a record, a record outside a break, or a record of the other
    /// kind.
    #[must_use]
    pub fn is_inconsistent(&self) -> bool {
        match (&self.break_record, self.phase.is_break()) {
            (None, false) => false,
            (Some(record), true) => record.kind != self.phase,
            _ => true,
        }
    }
}
