//! Configuration validation
//!
//! Runs after deserialization on the typed `EngineConfig`. All issues are
//! collected so an operator sees every problem in one pass.

use std::time::Duration;

use crate::config::schema::{EngineConfig, KNOWN_DEDUP_CATEGORIES};
use crate::coord::BackoffPolicy;
use crate::error::{Severity, ValidationIssue};

// ============================================================================
// Public API
// ============================================================================

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Validation errors (prevent loading).
    pub errors: Vec<ValidationIssue>,

    /// Validation warnings (informational).
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Returns `true` if there are any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns `true` if validation passed (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Configuration validator.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Validator {
    /// Creates a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a configuration and returns every issue found.
    pub fn validate(&mut self, config: &EngineConfig) -> ValidationResult {
        self.errors.clear();
        self.warnings.clear();

        self.validate_phases(config);
        self.validate_coordination(config);
        self.validate_dedup(config);
        self.validate_backoff("cache.retry", &config.cache.retry);
        self.require_positive("cache.flush_interval", config.cache.flush_interval);
        self.require_positive("repair.overdue_margin", config.repair.overdue_margin);

        ValidationResult {
            errors: std::mem::take(&mut self.errors),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    // ========================================================================
    // Sections
    // ========================================================================

    fn validate_phases(&mut self, config: &EngineConfig) {
        let phases = &config.phases;
        self.require_positive("phases.active", phases.active);
        self.require_positive("phases.short_break", phases.short_break);
        self.require_positive("phases.long_break", phases.long_break);
        self.require_positive("phases.tick_interval", phases.tick_interval);
        self.require_positive("phases.break_poll_interval", phases.break_poll_interval);

        if phases.long_break_every == 0 {
            self.add_error("phases.long_break_every", "must be at least 1");
        }

        if phases.long_break < phases.short_break {
            self.add_warning(
                "phases.long_break",
                "long break is shorter than the short break",
            );
        }
        if phases.short_break > phases.active {
            self.add_warning(
                "phases.short_break",
                "short break is longer than the active phase",
            );
        }
        if !phases.short_break.is_zero() && phases.tick_interval > phases.short_break {
            self.add_warning(
                "phases.tick_interval",
                "tick interval exceeds the short break; breaks will overrun",
            );
        }
    }

    fn validate_coordination(&mut self, config: &EngineConfig) {
        self.require_positive("locks.acquire_timeout", config.locks.acquire_timeout);
        self.require_positive("locks.stale_after", config.locks.stale_after);
        self.require_positive("instances.stale_after", config.instances.stale_after);

        if config.locks.stale_after < config.locks.acquire_timeout {
            self.add_warning(
                "locks.stale_after",
                "locks go stale before a waiter would time out",
            );
        }
    }

    fn validate_dedup(&mut self, config: &EngineConfig) {
        self.require_positive("dedup.default_ttl", config.dedup.default_ttl);

        for (category, ttl) in &config.dedup.ttl {
            let path = format!("dedup.ttl.{category}");
            self.require_positive(&path, *ttl);

            if !KNOWN_DEDUP_CATEGORIES.contains(&category.as_str()) {
                let message = suggest_category(category).map_or_else(
                    || format!("unknown dedup category '{category}'"),
                    |hint| format!("unknown dedup category '{category}', did you mean '{hint}'?"),
                );
                self.add_warning(&path, &message);
            }
        }
    }

    fn validate_backoff(&mut self, path: &str, policy: &BackoffPolicy) {
        if policy.max_attempts == 0 {
            self.add_error(&format!("{path}.max_attempts"), "must be at least 1");
        }
        if !policy.multiplier.is_finite() || policy.multiplier < 1.0 {
            self.add_error(
                &format!("{path}.multiplier"),
                "must be a finite number of at least 1.0",
            );
        }
        if policy.max_delay < policy.base_delay {
            self.add_warning(
                &format!("{path}.max_delay"),
                "max delay is below the base delay; every retry uses max delay",
            );
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn require_positive(&mut self, path: &str, value: Duration) {
        if value.is_zero() {
            self.add_error(path, "must be greater than zero");
        }
    }

    /// Adds an error to the collection.
    fn add_error(&mut self, path: &str, message: &str) {
        self.errors.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Error,
        });
    }

    /// Adds a warning to the collection.
    fn add_warning(&mut self, path: &str, message: &str) {
        self.warnings.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Warning,
        });
    }
}

/// Closest known dedup category, if any is within edit distance 3.
fn suggest_category(input: &str) -> Option<&'static str> {
    KNOWN_DEDUP_CATEGORIES
        .iter()
        .map(|name| (*name, strsim::damerau_levenshtein(input, name)))
        .filter(|(_, dist)| *dist <= 3)
        .min_by_key(|(_, dist)| *dist)
        .map(|(name, _)| name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(config: &EngineConfig) -> ValidationResult {
        Validator::new().validate(config)
    }

    #[test]
    fn defaults_are_clean() {
        let result = validate(&EngineConfig::default());
        assert!(result.is_valid(), "{:?}", result.errors);
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[test]
    fn zero_durations_are_errors() {
        let mut config = EngineConfig::default();
        config.phases.active = Duration::ZERO;
        config.locks.acquire_timeout = Duration::ZERO;
        let result = validate(&config);
        let paths: Vec<_> = result.errors.iter().map(|e| e.path.as_str()).collect();
        assert!(paths.contains(&"phases.active"));
        assert!(paths.contains(&"locks.acquire_timeout"));
    }

    #[test]
    fn long_break_every_zero() {
        let mut config = EngineConfig::default();
        config.phases.long_break_every = 0;
        assert!(validate(&config).has_errors());
    }

    #[test]
    fn bad_backoff() {
        let mut config = EngineConfig::default();
        config.cache.retry.multiplier = 0.5;
        config.cache.retry.max_attempts = 0;
        let result = validate(&config);
        assert_eq!(result.errors.len(), 2);
    }

    #[test]
    fn stale_lock_shorter_than_timeout_warns() {
        let mut config = EngineConfig::default();
        config.locks.stale_after = Duration::from_secs(1);
        let result = validate(&config);
        assert!(result.is_valid());
        assert_eq!(result.warnings[0].path, "locks.stale_after");
    }

    #[test]
    fn unknown_category_gets_suggestion() {
        let mut config = EngineConfig::default();
        config
            .dedup
            .ttl
            .insert("brake".to_string(), Duration::from_secs(3));
        let result = validate(&config);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].message.contains("did you mean 'break'"));
    }

    #[test]
    fn suggestion_distance_cutoff() {
        assert_eq!(suggest_category("transitoin"), Some("transition"));
        assert_eq!(suggest_category("completely-different"), None);
    }
}
