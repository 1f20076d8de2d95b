//! Shared integration-test harness: an engine over an in-memory store, a
//! manual clock and a recording sink, plus helpers for running the binary.

#![allow(dead_code)]

use std::path::Path;
use std::process::Output;
use std::sync::Arc;
use std::time::Duration;

use roomkeeper::config::EngineConfig;
use roomkeeper::observability::{EventSink, RecordingSink};
use roomkeeper::store::{Document, DurableStore, MemoryStore};
use roomkeeper::{Engine, ManualClock, RoomId};

/// Default active phase length in milliseconds.
pub const ACTIVE_MS: i64 = 25 * 60 * 1000;
/// Default short break length in milliseconds.
pub const SHORT_MS: i64 = 5 * 60 * 1000;

/// An engine with every collaborator exposed.
pub struct TestEngine {
    pub engine: Engine,
    pub store: Arc<MemoryStore>,
    pub sink: Arc<RecordingSink>,
    pub clock: Arc<ManualClock>,
}

impl TestEngine {
    /// Default configuration with fast cache retries, clock at `now`.
    pub fn new(now: i64) -> Self {
        let mut config = EngineConfig::default();
        config.cache.retry.max_attempts = 2;
        config.cache.retry.base_delay = Duration::from_millis(5);
        Self::with_config(config, now)
    }

    pub fn with_config(config: EngineConfig, now: i64) -> Self {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::new());
        let clock = Arc::new(ManualClock::new(now));
        let engine = Engine::new(
            Arc::new(config),
            Arc::clone(&store) as Arc<dyn DurableStore>,
            Arc::clone(&sink) as Arc<dyn EventSink>,
            Arc::clone(&clock) as _,
        );
        Self {
            engine,
            store,
            sink,
            clock,
        }
    }

    /// Seeds the store with a JSON object document.
    pub fn seed(&self, room: &RoomId, value: serde_json::Value) {
        let serde_json::Value::Object(doc) = value else {
            panic!("seed documents must be objects");
        };
        self.store.insert(room.clone(), doc);
    }

    /// Stored document for `room`.
    pub fn stored(&self, room: &RoomId) -> Document {
        self.store.get(room).expect("room not in store")
    }
}

/// Runs the `roomkeeper` binary with `args` and waits for it.
pub fn roomkeeper(args: &[&str]) -> Output {
    std::process::Command::new(env!("CARGO_BIN_EXE_roomkeeper"))
        .args(args)
        .env_remove("ROOMKEEPER_CONFIG")
        .env_remove("ROOMKEEPER_STORE")
        .env_remove("ROOMKEEPER_LOG_LEVEL")
        .output()
        .expect("failed to run roomkeeper")
}

/// Path as `&str`, for argument lists.
pub fn arg(path: &Path) -> &str {
    path.to_str().expect("non-UTF-8 path")
}
