//! Error taxonomy for sweep generation and log analysis.
//!
//! Errors fall into two groups. Configuration errors indicate an operator or
//! programming mistake and abort the whole invocation. Per-iteration errors
//! only invalidate the analysis of one iteration; the batch logs a warning and
//! moves on. Use [`SweepError::is_recoverable`] to tell them apart.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the iteration-space engine and the analysis pipeline.
#[derive(Debug, Error)]
pub enum SweepError {
    /// A requested worker count is larger than the machine configuration allows.
    #[error("cannot have {requested} clients, greater than max {max}")]
    ConfigurationExceeded { requested: usize, max: usize },

    /// A path or display string was requested before a trial was assigned.
    #[error("trial is not set for iteration {0}")]
    TrialNotSet(String),

    /// A host is not one of the clients taking part in the iteration.
    #[error("host {host} not found in client options {candidates:?}")]
    HostNotFound {
        host: String,
        candidates: Vec<String>,
    },

    /// The number of axis values does not match the axis header.
    #[error("axis count mismatch: expected {expected} axis columns, found {found}")]
    AxisMismatch { expected: usize, found: usize },

    /// A parameter value is outside the domain the sweep can express.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// A log file expected for the iteration does not exist.
    #[error("log file {0:?} does not exist")]
    MissingLogFile(PathBuf),

    /// A log line matched a known prefix but not its full template.
    #[error("could not parse {path:?}: {line:?}")]
    ParseMismatch { path: PathBuf, line: String },

    /// The per-thread statistics file has no record for the thread.
    #[error("no statistics for thread {thread} in {path:?}")]
    MissingThreadStats { path: PathBuf, thread: usize },

    /// Every latency log of the iteration was empty.
    #[error("no latency samples available")]
    NoLatencyData,
}

impl SweepError {
    /// Whether the error only affects a single iteration's analysis.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SweepError::MissingLogFile(_)
                | SweepError::ParseMismatch { .. }
                | SweepError::MissingThreadStats { .. }
                | SweepError::NoLatencyData
        )
    }
}
