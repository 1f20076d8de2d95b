//! Phase state machine
//!
//! Each room cycles ACTIVE → SHORT_BREAK | LONG_BREAK → ACTIVE. The
//! [`PhaseEngine`] drives the cycle on top of the coordination primitives in
//! [`crate::coord`] and reads and writes the session only through the
//! write-back cache.

pub mod engine;
pub mod policy;
pub mod state;

pub use engine::{PhaseEngine, TickOutcome};
pub use policy::{BreakPolicy, EveryNth};
pub use state::{BreakRecord, Phase, RoomSession};
