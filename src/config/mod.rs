//! Configuration module
//!
//! Loads and validates the engine configuration: phase durations,
//! coordination timeouts, dedup windows, cache flushing and repair margins.

pub mod duration;
pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{ConfigLimits, ConfigLoader, LoadResult, LoadWarning, LoaderOptions};
pub use schema::*;
pub use validation::{ValidationResult, Validator};
