//! Structured event stream.
//!
//! Discrete, typed events emitted while rooms run. Events are serialized as
//! newline-delimited JSON (JSONL) with a monotonically increasing sequence
//! number.
//!
//! The phase engine reports through the [`EventSink`] trait; the CLI wires
//! an [`EventEmitter`] and tests use a [`RecordingSink`].

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::clock::Timestamp;
use crate::phase::Phase;
use crate::store::RoomId;

// ---------------------------------------------------------------------------
// Event variants
// ---------------------------------------------------------------------------

/// A discrete event.
///
/// Tagged with `"type"` when serialized so consumers can dispatch on it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    /// The engine started driving rooms.
    EngineStarted {
        /// When the engine started.
        timestamp: DateTime<Utc>,
        /// Rooms being driven.
        rooms: Vec<RoomId>,
    },

    /// The engine stopped.
    EngineStopped {
        /// When the engine stopped.
        timestamp: DateTime<Utc>,
        /// Human-readable stop reason.
        reason: String,
    },

    /// A room-scoped message (announcements and the like).
    RoomEvent {
        /// When the message was logged.
        timestamp: DateTime<Utc>,
        /// Room the message belongs to.
        room: RoomId,
        /// Message text.
        message: String,
        /// Whether players should see it.
        is_public: bool,
        /// Free-form details.
        metadata: serde_json::Value,
    },

    /// A room moved to another phase.
    PhaseChanged {
        /// When the transition was applied.
        timestamp: DateTime<Utc>,
        /// Room that transitioned.
        room: RoomId,
        /// Previous phase.
        from: Phase,
        /// New phase.
        to: Phase,
        /// Completed cycles after the transition.
        cycle_count: u64,
        /// Deadline of the new phase, epoch milliseconds.
        deadline: Timestamp,
    },

    /// An operator repair changed a room.
    RepairApplied {
        /// When the repair ran.
        timestamp: DateTime<Utc>,
        /// Repaired room.
        room: RoomId,
        /// What was done, in order.
        actions: Vec<String>,
    },
}

/// Converts an engine timestamp into a `chrono` time for event payloads.
#[must_use]
pub fn event_time(ts: Timestamp) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Destination for room events. Fire and forget: implementations never fail
/// the caller.
pub trait EventSink: Send + Sync + std::fmt::Debug {
    /// Logs a room-scoped message.
    fn log_event(
        &self,
        room: &RoomId,
        message: &str,
        is_public: bool,
        metadata: serde_json::Value,
    );

    /// Records a structured lifecycle event. Ignored by default.
    fn emit(&self, event: Event) {
        let _ = event;
    }
}

// ---------------------------------------------------------------------------
// Envelope (adds sequence number via serde flatten)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct EventEnvelope {
    sequence: u64,
    #[serde(flatten)]
    event: Event,
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Thread-safe, buffered JSONL event writer.
///
/// Serialization or I/O failures are dropped; a broken event stream must
/// not stop room processing.
pub struct EventEmitter {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Creates an emitter that writes to the given writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            sequence: AtomicU64::new(0),
        }
    }

    /// Creates an emitter that writes to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    /// Creates an emitter that discards everything.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// Creates an emitter that appends to the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be opened.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Writes one event as a JSONL line.
    pub fn write(&self, event: Event) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let envelope = EventEnvelope {
            sequence: seq,
            event,
        };

        if let Ok(mut w) = self.writer.lock()
            && let Ok(line) = serde_json::to_string(&envelope)
        {
            let _ = writeln!(w, "{line}");
            let _ = w.flush();
        }
    }

    /// Number of events written so far.
    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

impl EventSink for EventEmitter {
    fn log_event(
        &self,
        room: &RoomId,
        message: &str,
        is_public: bool,
        metadata: serde_json::Value,
    ) {
        self.write(Event::RoomEvent {
            timestamp: Utc::now(),
            room: room.clone(),
            message: message.to_string(),
            is_public,
            metadata,
        });
    }

    fn emit(&self, event: Event) {
        self.write(event);
    }
}

// ---------------------------------------------------------------------------
// Recording sink
// ---------------------------------------------------------------------------

/// One call to [`EventSink::log_event`].
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedEvent {
    /// Room the message was logged for.
    pub room: RoomId,
    /// Message text.
    pub message: String,
    /// Public flag as passed.
    pub is_public: bool,
    /// Metadata as passed.
    pub metadata: serde_json::Value,
}

/// In-memory sink that keeps everything it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    logged: Mutex<Vec<LoggedEvent>>,
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every logged message, in order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn logged(&self) -> Vec<LoggedEvent> {
        self.logged.lock().expect("recording lock poisoned").clone()
    }

    /// Messages logged for `room`.
    #[must_use]
    pub fn messages(&self, room: &RoomId) -> Vec<String> {
        self.logged()
            .into_iter()
            .filter(|e| &e.room == room)
            .map(|e| e.message)
            .collect()
    }

    /// How many times exactly `message` was logged for `room`.
    #[must_use]
    pub fn count(&self, room: &RoomId, message: &str) -> usize {
        self.messages(room).iter().filter(|m| *m == message).count()
    }

    /// Every structured event, in order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("recording lock poisoned").clone()
    }
}

impl EventSink for RecordingSink {
    fn log_event(
        &self,
        room: &RoomId,
        message: &str,
        is_public: bool,
        metadata: serde_json::Value,
    ) {
        if let Ok(mut logged) = self.logged.lock() {
            logged.push(LoggedEvent {
                room: room.clone(),
                message: message.to_string(),
                is_public,
                metadata,
            });
        }
    }

    fn emit(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex as StdMutex};

    use super::*;

    #[derive(Clone)]
    struct TestWriter(Arc<StdMutex<Vec<u8>>>);

    impl TestWriter {
        fn new() -> Self {
            Self(Arc::new(StdMutex::new(Vec::new())))
        }

        fn lines(&self) -> Vec<serde_json::Value> {
            let buf = self.0.lock().unwrap();
            String::from_utf8_lossy(&buf)
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect()
        }
    }

    impl Write for TestWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn phase_change_serializes_with_tag() {
        let event = Event::PhaseChanged {
            timestamp: event_time(1_000),
            room: RoomId::new("r1"),
            from: Phase::Active,
            to: Phase::ShortBreak,
            cycle_count: 2,
            deadline: 301_000,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "PhaseChanged");
        assert_eq!(json["room"], "r1");
        assert_eq!(json["to"], "SHORT_BREAK");
        assert_eq!(json["timestamp"], "1970-01-01T00:00:01Z");
    }

    #[test]
    fn emitter_writes_sequenced_jsonl() {
        let tw = TestWriter::new();
        let emitter = EventEmitter::new(Box::new(tw.clone()));
        let room = RoomId::new("r1");

        emitter.log_event(&room, "break started", true, serde_json::json!({"kind": "SHORT_BREAK"}));
        emitter.emit(Event::EngineStopped {
            timestamp: Utc::now(),
            reason: "signal".into(),
        });

        let lines = tw.lines();
        assert_eq!(emitter.event_count(), 2);
        assert_eq!(lines[0]["sequence"], 0);
        assert_eq!(lines[0]["type"], "RoomEvent");
        assert_eq!(lines[0]["message"], "break started");
        assert_eq!(lines[0]["metadata"]["kind"], "SHORT_BREAK");
        assert_eq!(lines[1]["sequence"], 1);
        assert_eq!(lines[1]["type"], "EngineStopped");
    }

    #[test]
    fn from_file_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        {
            let emitter = EventEmitter::from_file(&path).unwrap();
            emitter.log_event(&RoomId::new("a"), "one", false, serde_json::Value::Null);
        }
        {
            let emitter = EventEmitter::from_file(&path).unwrap();
            emitter.log_event(&RoomId::new("a"), "two", false, serde_json::Value::Null);
        }
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn recording_sink_counts_per_room() {
        let sink = RecordingSink::new();
        let a = RoomId::new("a");
        let b = RoomId::new("b");
        sink.log_event(&a, "break started", true, serde_json::Value::Null);
        sink.log_event(&b, "break started", true, serde_json::Value::Null);
        sink.log_event(&a, "break ended", true, serde_json::Value::Null);

        assert_eq!(sink.count(&a, "break started"), 1);
        assert_eq!(sink.messages(&a), vec!["break started", "break ended"]);
        assert!(sink.events().is_empty());
    }
}
