//! `roomkeeper` - per-room session engine
//!
//! Runs many independent rooms inside one process. Each room cycles through
//! an active phase and two kinds of break. The crate provides the
//! coordination primitives that keep concurrent triggers for the same room
//! from corrupting its state (advisory locks, single-writer instances,
//! named timers, duplicate suppression, a write-back cache) and the phase
//! engine built on top of them.

pub mod cache;
pub mod cli;
pub mod clock;
pub mod config;
pub mod coord;
pub mod engine;
pub mod error;
pub mod observability;
pub mod phase;
pub mod repair;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use engine::Engine;
pub use store::{Document, RoomId};
