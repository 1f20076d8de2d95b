//! Observability module
//!
//! Logging, metrics, and the structured event stream for monitoring room
//! sessions.

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{Event, EventEmitter, EventSink, LoggedEvent, RecordingSink};
pub use logging::{LogFormat, init_logging};
pub use metrics::init_metrics;
