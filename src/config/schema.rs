//! Configuration schema types
//!
//! Every section and field has a default, so an empty YAML mapping is a
//! valid configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::duration;
use crate::coord::BackoffPolicy;

// ============================================================================
// Top-Level Configuration
// ============================================================================

/// Root engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Phase cycle timing
    pub phases: PhaseConfig,

    /// Advisory session locks
    pub locks: LockConfig,

    /// Single-writer instance registrations
    pub instances: InstanceConfig,

    /// Duplicate suppression windows
    pub dedup: DedupConfig,

    /// Write-back cache
    pub cache: CacheConfig,

    /// Operator repair thresholds
    pub repair: RepairConfig,
}

// ============================================================================
// Phases
// ============================================================================

/// Phase cycle timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PhaseConfig {
    /// Length of the ACTIVE phase.
    #[serde(with = "duration")]
    pub active: Duration,

    /// Length of a short break.
    #[serde(with = "duration")]
    pub short_break: Duration,

    /// Length of a long break.
    #[serde(with = "duration")]
    pub long_break: Duration,

    /// Every Nth break is a long one.
    pub long_break_every: u32,

    /// How far past its deadline a phase may run before an overdue warning.
    #[serde(with = "duration")]
    pub overdue_grace: Duration,

    /// Period of the per-room driver tick.
    #[serde(with = "duration")]
    pub tick_interval: Duration,

    /// Period of the break-scoped poller that ends breaks promptly.
    #[serde(with = "duration")]
    pub break_poll_interval: Duration,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            active: Duration::from_secs(25 * 60),
            short_break: Duration::from_secs(5 * 60),
            long_break: Duration::from_secs(15 * 60),
            long_break_every: 4,
            overdue_grace: Duration::from_secs(30),
            tick_interval: Duration::from_secs(1),
            break_poll_interval: Duration::from_secs(5),
        }
    }
}

// ============================================================================
// Coordination
// ============================================================================

/// Advisory session lock timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LockConfig {
    /// How long `acquire` waits before evicting the holder.
    #[serde(with = "duration")]
    pub acquire_timeout: Duration,

    /// Age after which a held lock counts as abandoned.
    #[serde(with = "duration")]
    pub stale_after: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(5),
            stale_after: Duration::from_secs(10),
        }
    }
}

/// Instance registration timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstanceConfig {
    /// Age after which a registration may be taken over.
    #[serde(with = "duration")]
    pub stale_after: Duration,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(60),
        }
    }
}

/// Categories the engine itself emits under.
pub const KNOWN_DEDUP_CATEGORIES: [&str; 3] = ["transition", "break", "announce"];

/// Duplicate suppression windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DedupConfig {
    /// Window for categories without an explicit entry.
    #[serde(with = "duration")]
    pub default_ttl: Duration,

    /// Per-category windows.
    #[serde(with = "duration::map")]
    pub ttl: BTreeMap<String, Duration>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        let ttl = BTreeMap::from([
            ("transition".to_string(), Duration::from_secs(20)),
            ("break".to_string(), Duration::from_secs(20)),
            ("announce".to_string(), Duration::from_secs(10)),
        ]);
        Self {
            default_ttl: Duration::from_secs(5),
            ttl,
        }
    }
}

impl DedupConfig {
    /// Window length for `category`.
    #[must_use]
    pub fn ttl_for(&self, category: &str) -> Duration {
        self.ttl.get(category).copied().unwrap_or(self.default_ttl)
    }
}

// ============================================================================
// Cache & Repair
// ============================================================================

/// Write-back cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Background flush cadence.
    #[serde(with = "duration")]
    pub flush_interval: Duration,

    /// Retry schedule for store reads and writes.
    pub retry: BackoffPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(30),
            retry: BackoffPolicy::default(),
        }
    }
}

/// Repair thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepairConfig {
    /// How far past its deadline a break must be before repair resets it.
    #[serde(with = "duration")]
    pub overdue_margin: Duration,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            overdue_margin: Duration::from_secs(10 * 60),
        }
    }
}
