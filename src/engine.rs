//! Engine wiring
//!
//! Builds every service from one [`EngineConfig`] and hands out shared
//! handles. The phase engine and the repair facade see the same cache, lock
//! table, instance table, dedup window and timer registry.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::WriteBackCache;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::coord::{DedupWindow, InstanceManager, IntervalRegistry, SessionLockManager};
use crate::error::{CacheError, PhaseError};
use crate::observability::events::{Event, EventSink, event_time};
use crate::phase::PhaseEngine;
use crate::repair::RepairFacade;
use crate::store::{DurableStore, RoomId};

/// Shared handles to the per-room services.
#[derive(Debug, Clone)]
pub struct RoomServices {
    /// Write-back cache; the only path to the store.
    pub cache: Arc<WriteBackCache>,
    /// Advisory session locks.
    pub locks: Arc<SessionLockManager>,
    /// Single-writer registrations.
    pub instances: Arc<InstanceManager>,
    /// Duplicate suppression.
    pub dedup: Arc<DedupWindow>,
    /// Named per-room timers.
    pub timers: Arc<IntervalRegistry>,
    /// Event destination.
    pub sink: Arc<dyn EventSink>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

impl RoomServices {
    /// Builds fresh services from `config`.
    #[must_use]
    pub fn new(
        config: &EngineConfig,
        store: Arc<dyn DurableStore>,
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cache: Arc::new(WriteBackCache::new(
                store,
                config.cache.retry.clone(),
                Arc::clone(&clock),
            )),
            locks: Arc::new(SessionLockManager::new(
                config.locks.clone(),
                Arc::clone(&clock),
            )),
            instances: Arc::new(InstanceManager::new(
                config.instances.clone(),
                Arc::clone(&clock),
            )),
            dedup: Arc::new(DedupWindow::new(config.dedup.clone(), Arc::clone(&clock))),
            timers: Arc::new(IntervalRegistry::new()),
            sink,
            clock,
        }
    }
}

/// Fully wired room engine.
#[derive(Debug)]
pub struct Engine {
    config: Arc<EngineConfig>,
    services: RoomServices,
    phases: Arc<PhaseEngine>,
    repair: RepairFacade,
}

impl Engine {
    /// Wires every service over `store`.
    #[must_use]
    pub fn new(
        config: Arc<EngineConfig>,
        store: Arc<dyn DurableStore>,
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let services = RoomServices::new(&config, store, sink, clock);
        let phases = PhaseEngine::new(config.phases.clone(), services.clone());
        let repair = RepairFacade::new(
            config.repair.clone(),
            services.clone(),
            Arc::clone(&phases),
        );
        Self {
            config,
            services,
            phases,
            repair,
        }
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared service handles.
    #[must_use]
    pub const fn services(&self) -> &RoomServices {
        &self.services
    }

    /// The phase state machine.
    #[must_use]
    pub const fn phases(&self) -> &Arc<PhaseEngine> {
        &self.phases
    }

    /// Operator repair operations.
    #[must_use]
    pub const fn repair(&self) -> &RepairFacade {
        &self.repair
    }

    /// The write-back cache.
    #[must_use]
    pub const fn cache(&self) -> &Arc<WriteBackCache> {
        &self.services.cache
    }

    /// The session lock table.
    #[must_use]
    pub const fn locks(&self) -> &Arc<SessionLockManager> {
        &self.services.locks
    }

    /// The instance registration table.
    #[must_use]
    pub const fn instances(&self) -> &Arc<InstanceManager> {
        &self.services.instances
    }

    /// The dedup window.
    #[must_use]
    pub const fn dedup(&self) -> &Arc<DedupWindow> {
        &self.services.dedup
    }

    /// The timer registry.
    #[must_use]
    pub const fn timers(&self) -> &Arc<IntervalRegistry> {
        &self.services.timers
    }

    /// Activates and starts driving every room in `rooms`.
    ///
    /// # Errors
    ///
    /// Returns the first activation failure; rooms before it keep running.
    pub async fn start(&self, rooms: &[RoomId]) -> Result<(), PhaseError> {
        let now = self.services.clock.now();
        for room in rooms {
            self.phases.activate(room, now).await?;
            self.phases.start_room(room);
        }
        self.services.sink.emit(Event::EngineStarted {
            timestamp: event_time(now),
            rooms: rooms.to_vec(),
        });
        info!(rooms = rooms.len(), "engine started");
        Ok(())
    }

    /// Spawns the background maintenance loop.
    ///
    /// Every `cache.flush_interval` the cache is flushed and expired dedup
    /// entries are purged. On cancellation the cache gets a final flush and
    /// the returned handle completes once it is done.
    #[must_use]
    pub fn start_flush_task(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let interval = self.config.cache.flush_interval;
        let flusher = self.services.cache.start_flush_task(interval, cancel.clone());
        let dedup = Arc::clone(&self.services.dedup);
        tokio::spawn(async move {
            let period = interval.max(Duration::from_millis(1));
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let purged = dedup.purge_expired();
                        if purged > 0 {
                            debug!(purged, remaining = dedup.len(), "purged expired dedup entries");
                        }
                    }
                }
            }
            if let Err(e) = flusher.await {
                warn!(error = %e, "cache flush task did not finish cleanly");
            }
        })
    }

    /// Cancels every timer and flushes every dirty room.
    ///
    /// Returns the rooms whose final flush failed.
    pub async fn shutdown(&self, reason: &str) -> Vec<(RoomId, CacheError)> {
        self.services.timers.shutdown();
        let failures = self.services.cache.flush_all().await;
        for (room, error) in &failures {
            warn!(%room, %error, "unflushed changes lost at shutdown");
        }
        self.services.sink.emit(Event::EngineStopped {
            timestamp: event_time(self.services.clock.now()),
            reason: reason.to_string(),
        });
        info!(reason, "engine stopped");
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::observability::RecordingSink;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn start_then_shutdown_persists_sessions() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::new());
        let engine = Engine::new(
            Arc::new(EngineConfig::default()),
            Arc::clone(&store) as Arc<dyn DurableStore>,
            Arc::clone(&sink) as Arc<dyn EventSink>,
            Arc::new(ManualClock::new(5_000)),
        );
        let rooms = vec![RoomId::new("a"), RoomId::new("b")];

        engine.start(&rooms).await.unwrap();
        assert_eq!(engine.timers().len(), 2);
        assert!(store.get(&rooms[0]).is_none());

        assert!(engine.shutdown("test").await.is_empty());
        assert!(engine.timers().is_empty());
        for room in &rooms {
            assert_eq!(
                store.get(room).unwrap().get("phase"),
                Some(&json!("ACTIVE"))
            );
        }

        let events = sink.events();
        assert!(matches!(events.first(), Some(Event::EngineStarted { rooms, .. }) if rooms.len() == 2));
        assert!(matches!(events.last(), Some(Event::EngineStopped { reason, .. }) if reason == "test"));
    }

    #[tokio::test(start_paused = true)]
    async fn maintenance_loop_keeps_dedup_bounded() {
        let clock = Arc::new(ManualClock::new(0));
        let engine = Engine::new(
            Arc::new(EngineConfig::default()),
            Arc::new(MemoryStore::new()),
            Arc::new(RecordingSink::new()),
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        let cancel = CancellationToken::new();
        let task = engine.start_flush_task(cancel.clone());
        let room = RoomId::new("a");
        let phases = engine.phases();
        phases.activate(&room, 0).await.unwrap();

        for _ in 0..20 {
            let session = phases.session(&room).await.unwrap().unwrap();
            clock.set(session.phase_deadline);
            phases.process(&room).await.unwrap();
            let session = phases.session(&room).await.unwrap().unwrap();
            clock.set(session.phase_deadline);
            phases.process(&room).await.unwrap();
            assert!(engine.dedup().len() >= 4);

            clock.advance(Duration::from_secs(60));
            tokio::time::sleep(Duration::from_secs(31)).await;
            assert_eq!(engine.dedup().len(), 0);
        }
        assert_eq!(phases.session(&room).await.unwrap().unwrap().cycle_count, 20);

        cancel.cancel();
        task.await.unwrap();
    }
}
