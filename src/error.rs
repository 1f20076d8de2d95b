//! Error types for `roomkeeper`
//!
//! One enum per concern, aggregated into [`RoomkeeperError`] which also maps
//! every failure onto a process exit code.

use std::path::PathBuf;
use thiserror::Error;

use crate::store::RoomId;

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `roomkeeper` CLI operations.
///
/// These codes follow Unix conventions.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error (invalid YAML, validation failure)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied)
    pub const IO_ERROR: i32 = 3;

    /// Durable store error (unavailable, corrupt document)
    pub const STORE_ERROR: i32 = 4;

    /// Phase engine error (aborted transition)
    pub const PHASE_ERROR: i32 = 5;

    /// Usage error (invalid arguments, missing required options)
    pub const USAGE_ERROR: i32 = 64;

    /// Interrupted by SIGINT (Ctrl+C)
    pub const INTERRUPTED: i32 = 130;

    /// Terminated by SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `roomkeeper` operations.
#[derive(Debug, Error)]
pub enum RoomkeeperError {
    /// Configuration loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Durable store error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Write-back cache error
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Phase engine error
    #[error(transparent)]
    Phase(#[from] PhaseError),

    /// A repair sweep left rooms unrepaired
    #[error("{failed} room(s) could not be repaired")]
    RepairIncomplete {
        /// Rooms whose repair failed
        failed: usize,
    },

    /// Invalid command-line usage
    #[error("usage error: {0}")]
    Usage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl RoomkeeperError {
    /// Returns the appropriate exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Yaml(_) => ExitCode::CONFIG_ERROR,
            Self::Store(_) | Self::Cache(_) | Self::Json(_) => ExitCode::STORE_ERROR,
            Self::Phase(_) | Self::RepairIncomplete { .. } => ExitCode::PHASE_ERROR,
            Self::Usage(_) => ExitCode::USAGE_ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
        }
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing failed
    #[error("parse error in {path}: {message}")]
    ParseError {
        /// Path to the configuration file
        path: PathBuf,
        /// Line number where the error occurred (if available)
        line: Option<usize>,
        /// Error message from the parser
        message: String,
    },

    /// Configuration validation failed
    #[error("validation failed for {path}")]
    ValidationError {
        /// Path to the configuration file
        path: String,
        /// List of validation issues found
        errors: Vec<ValidationIssue>,
    },

    /// Referenced configuration file not found
    #[error("file not found: {path}")]
    MissingFile {
        /// Path to the missing file
        path: PathBuf,
    },

    /// Field has an invalid value
    #[error("invalid value for '{field}': got '{value}', expected {expected}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The actual value provided
        value: String,
        /// Description of what was expected
        expected: String,
    },

    /// Environment variable referenced in configuration is not set
    #[error("environment variable '{var}' not set ({message})")]
    EnvVarNotSet {
        /// Name of the environment variable
        var: String,
        /// Message supplied with `${VAR:?message}`
        message: String,
    },
}

// ============================================================================
// Validation Types
// ============================================================================

/// A single validation issue found during configuration validation.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Dotted path to the problematic field (e.g., "phases.short_break")
    pub path: String,
    /// Description of the validation issue
    pub message: String,
    /// Severity level of the issue
    pub severity: Severity,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {} at {}", prefix, self.message, self.path)
    }
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Error - validation failure that prevents configuration from being used
    Error,
    /// Warning - potential issue that does not prevent configuration loading
    Warning,
}

// ============================================================================
// Store Errors
// ============================================================================

/// Durable store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached (connection refused, backend down)
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store did not answer in time
    #[error("store operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A stored document could not be interpreted
    #[error("corrupt document for room {room}: {reason}")]
    Corrupt {
        /// Room whose document is corrupt
        room: RoomId,
        /// What was wrong with it
        reason: String,
    },

    /// I/O error from a file-backed store
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error from a file-backed store
    #[error("store JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns `true` for failures worth retrying with backoff.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_) | Self::Io(_))
    }
}

// ============================================================================
// Cache Errors
// ============================================================================

/// Write-back cache failures.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The store failed after all retries were spent
    #[error("store operation for room {room} failed after {attempts} attempt(s): {source}")]
    Store {
        /// Room being loaded or flushed
        room: RoomId,
        /// Attempts made, including the first
        attempts: u32,
        /// The last store error
        #[source]
        source: StoreError,
    },

    /// A field path was empty or malformed
    #[error("invalid field path '{0}'")]
    InvalidPath(String),
}

// ============================================================================
// Phase Errors
// ============================================================================

/// Phase engine failures.
#[derive(Debug, Error)]
pub enum PhaseError {
    /// A transition was aborted and rolled back
    #[error("{transition} for room {room} aborted: {source}")]
    TransitionAborted {
        /// Room whose transition failed
        room: RoomId,
        /// Transition kind (e.g. "break end")
        transition: &'static str,
        /// Underlying cache failure
        #[source]
        source: CacheError,
    },

    /// Reading the room session failed
    #[error(transparent)]
    Cache(#[from] CacheError),
}
