//! Prometheus metrics.
//!
//! Coordination primitives record their counters directly with the
//! `metrics` macros; this module installs the recorder, describes the
//! series, and hosts the helpers whose labels need sanitizing.

use std::sync::atomic::{AtomicBool, Ordering};

use metrics::{counter, describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::KNOWN_DEDUP_CATEGORIES;
use crate::error::RoomkeeperError;

/// Guard to prevent double-initialization of the metrics recorder.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initializes the global metrics recorder.
///
/// With `Some(port)` a Prometheus HTTP listener is bound on
/// `127.0.0.1:<port>`; with `None` the recorder is installed without an
/// endpoint.
///
/// # Errors
///
/// Returns `RoomkeeperError::Io` if the recorder or listener cannot be
/// installed.
pub fn init_metrics(port: Option<u16>) -> Result<(), RoomkeeperError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| RoomkeeperError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        "roomkeeper_phase_transitions_total",
        "Phase transitions applied, by kind"
    );
    describe_counter!(
        "roomkeeper_dedup_suppressed_total",
        "Events suppressed as duplicates, by category"
    );
    describe_counter!(
        "roomkeeper_lock_evictions_total",
        "Session locks evicted, by reason"
    );
    describe_counter!(
        "roomkeeper_instance_takeovers_total",
        "Orphaned instance registrations taken over"
    );
    describe_counter!(
        "roomkeeper_cache_flushes_total",
        "Cache flushes, by result"
    );
    describe_counter!(
        "roomkeeper_store_retries_total",
        "Store calls retried after a transient failure"
    );
    describe_gauge!("roomkeeper_rooms_cached", "Rooms with a live cache entry");
    describe_gauge!("roomkeeper_timers_active", "Registered interval timers");
}

/// Records a suppressed duplicate.
///
/// Categories are caller-supplied, so unknown ones share one label.
pub fn record_dedup_suppressed(category: &str) {
    counter!(
        "roomkeeper_dedup_suppressed_total",
        "category" => sanitize_category_label(category)
    )
    .increment(1);
}

/// Records an applied phase transition (`"break_start"`, `"break_end"`,
/// `"activate"`, `"repair"`).
pub fn record_phase_transition(kind: &'static str) {
    counter!("roomkeeper_phase_transitions_total", "kind" => kind).increment(1);
}

fn sanitize_category_label(category: &str) -> &'static str {
    KNOWN_DEDUP_CATEGORIES
        .iter()
        .find(|known| **known == category)
        .copied()
        .unwrap_or("__other__")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_categories_keep_their_label() {
        assert_eq!(sanitize_category_label("break"), "break");
        assert_eq!(sanitize_category_label("transition"), "transition");
    }

    #[test]
    fn unknown_categories_are_bucketed() {
        assert_eq!(sanitize_category_label("user-supplied-123"), "__other__");
    }

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_dedup_suppressed("break");
        record_dedup_suppressed("nope");
        record_phase_transition("break_start");
    }
}
