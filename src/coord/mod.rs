//! Per-room coordination primitives
//!
//! Each primitive is a service object owning one keyed table, built once per
//! [`Engine`](crate::Engine) and shared by `Arc`.
//!
//! # Architecture
//!
//! - [`SessionLockManager`]: advisory per-room lock with stale eviction
//! - [`InstanceManager`]: single-writer registration around multi-step work
//! - [`DedupWindow`]: TTL suppression of repeated events
//! - [`IntervalRegistry`]: named, cancellable per-room periodic timers
//! - [`BackoffPolicy`]: bounded exponential retry

pub mod backoff;
pub mod dedup;
pub mod instance;
pub mod lock;
pub mod timers;

pub use backoff::{BackoffPolicy, RetryError};
pub use dedup::DedupWindow;
pub use instance::{InstanceClaim, InstanceManager, InstanceRegistration};
pub use lock::{LockDebugInfo, LockRecord, SessionLockGuard, SessionLockManager};
pub use timers::{IntervalRegistry, TimerCallback, TimerHandle};
