//! # Sweep Bench Library
//!
//! Parameter-sweep driver and results aggregation for network
//! throughput/latency benchmarks. The packet generators and echo servers are
//! external programs; this crate decides what to run, where each run writes
//! its logs, and how those logs become summary tables.
//!
//! ## Supported Benchmarks
//!
//! - **Scatter-gather echo (`sg`)**: segment size × segment count × copy mode
//! - **mlx5 datapath echo (`mlx5`)**: adds worker threads, working-set size,
//!   busy cycles and receive packet size
//! - **Key-value store (`kv`)**: serialization system, value sizes, traces and
//!   zero-copy pinning parameters
//!
//! ## Architecture Overview
//!
//! - `rate`: client rate specifications (`2@300000,1@100000`)
//! - `iteration`: one configuration point and its on-disk identity
//! - `space`: sweep tables and lazy enumeration of iterations
//! - `program`: argument sets for the external server and client programs
//! - `parser`: readers for stdout, per-thread statistics and latency logs
//! - `metrics`: N-way latency merge and nearest-rank percentiles
//! - `analysis`: logs of one trial folder to one per-trial row
//! - `summary`: per-trial rows to one knee row per configuration
//! - `results`: CSV tables and where they live
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use sweep_bench::{AnalysisConfig, SummaryAnalyzer, TrialTable};
//! use std::path::Path;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = AnalysisConfig::default();
//!     let trials = TrialTable::read_csv(Path::new("results/trials.csv"))?;
//!     let summary = SummaryAnalyzer::new(config.saturation_threshold).summarize(&trials);
//!     summary.write_csv(Path::new("results/summary.csv"))?;
//!     Ok(())
//! }
//! ```

/// Per-trial analysis of benchmark logs
///
/// Sums offered and achieved load over every client (and thread), merges
/// the latency samples of all workers and reports the trial as one row.
/// Iterations with missing or malformed logs are skipped with a warning.
pub mod analysis;

/// Command-line interface
///
/// Subcommands `plan`, `analyze` and `summarize`, plus the literal
/// parameters of an individual run.
pub mod cli;

/// Machine description and analysis thresholds
pub mod config;

pub mod error;

/// Iterations, their folder layout and trial resumption
pub mod iteration;

pub mod logging;

/// Latency merging and percentile statistics
///
/// Per-worker latency logs are sorted independently and merged with a
/// binary heap. Percentiles follow the nearest-rank rule.
pub mod metrics;

/// Log file readers
pub mod parser;

/// External program arguments
///
/// Explicit server and client argument sets, validated at construction and
/// rendered as `--flag=value` vectors.
pub mod program;

pub mod rate;

/// CSV output and the results folder layout
pub mod results;

/// Sweep tables and iteration enumeration
pub mod space;

/// Knee extraction across trials
pub mod summary;

pub mod utils;

pub use analysis::{TrialAnalyzer, TrialRow};
pub use config::{AnalysisConfig, MachineConfig};
pub use error::SweepError;
pub use iteration::{Benchmark, Iteration, IterationKey};
pub use metrics::{LatencyMerger, LatencySummary};
pub use parser::LogParser;
pub use program::{ClientArgs, PlanEntry, RunContext, ServerArgs};
pub use rate::RateSpec;
pub use results::{KneeRow, ResultsManager, SummaryTable, TrialTable};
pub use space::{ExperimentKind, IterationSpace, LoopingVariable, SweepTables};
pub use summary::SummaryAnalyzer;

/// The current version of sweep-bench
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
///
/// The observed constants of the benchmark cluster. Everything here can be
/// overridden from the command line or the sweep tables.
pub mod defaults {
    /// Fraction of the lowest latency samples dropped from each worker log
    ///
    /// The first requests of a run hit warm caches on an idle server and
    /// report unrealistically low latency.
    pub const STRIP_THRESHOLD: f64 = 0.03;

    /// Minimum achieved/offered ratio for an offered rate to count as
    /// sustained
    pub const SATURATION_THRESHOLD: f64 = 0.95;

    /// Trials per configuration in a sweep
    pub const NUM_TRIALS: usize = 3;

    /// Physical link capacity in Gbps
    pub const LINK_CEILING_GBPS: f64 = 88.0;

    /// Step by which a rate is lowered while it exceeds the link ceiling
    pub const RATE_STEP_PPS: u64 = 10_000;

    /// Seconds each client sends for
    pub const RUN_TIME_SECS: u64 = 30;

    /// Worker threads per client in an individual run
    pub const NUM_THREADS: usize = 1;

    /// Working-set array size of an individual mlx5 run
    pub const ARRAY_SIZE: usize = 65536;

    /// Per-trial CSV inside the results folder
    pub const TRIALS_FILE: &str = "trials.csv";

    /// Summary CSV inside the results folder
    pub const SUMMARY_FILE: &str = "summary.csv";
}
