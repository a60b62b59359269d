use crate::iteration::{
    Benchmark, CopyMode, KvParams, Mlx5Params, ScatterGatherParams, ZccParams,
};
use crate::rate::RateSpec;
use crate::space::{size_distr_avg, ExperimentKind, IndividualRequest, KvTraces, LoopingVariable};
use crate::utils::validate_positive;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Sweep Bench - parameter sweeps and results aggregation for network benchmarks
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,

    /// Verbose output
    #[clap(short = 'v', long, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Also write log output to this file
    #[clap(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print one JSON line per iteration with the program arguments to run it
    Plan {
        #[clap(flatten)]
        experiment: ExperimentArgs,

        /// Seconds each client sends for
        #[clap(short = 't', long, default_value_t = crate::defaults::RUN_TIME_SECS)]
        time: u64,
    },

    /// Parse trial logs into the per-trial CSV
    Analyze {
        #[clap(flatten)]
        experiment: ExperimentArgs,

        /// Per-trial CSV, relative to the results folder
        #[clap(short = 'o', long, default_value = crate::defaults::TRIALS_FILE)]
        output: PathBuf,

        /// Fraction of the lowest latency samples dropped per log
        #[clap(long, default_value_t = crate::defaults::STRIP_THRESHOLD)]
        strip_threshold: f64,

        /// Log offered/achieved load and latency per host and thread
        #[clap(long, default_value_t = false)]
        print_stats: bool,
    },

    /// Reduce the per-trial CSV to one knee row per configuration
    Summarize {
        /// Results folder
        #[clap(short = 'f', long)]
        folder: PathBuf,

        /// Per-trial CSV, relative to the results folder
        #[clap(short = 'i', long, default_value = crate::defaults::TRIALS_FILE)]
        input: PathBuf,

        /// Summary CSV, relative to the results folder
        #[clap(short = 'o', long, default_value = crate::defaults::SUMMARY_FILE)]
        output: PathBuf,

        /// Minimum achieved/offered ratio for a rate to count towards the knee
        #[clap(long, default_value_t = crate::defaults::SATURATION_THRESHOLD)]
        saturation_threshold: f64,
    },
}

/// Whether to run one configuration or a whole sweep
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum ExpType {
    #[clap(name = "individual")]
    Individual,

    #[clap(name = "sweep")]
    Sweep,
}

/// Options selecting the iterations of an experiment
#[derive(clap::Args, Debug, Clone)]
pub struct ExperimentArgs {
    /// Benchmark variant
    #[clap(short = 'e', long, value_enum, help_heading = "Experiment")]
    pub experiment: ExperimentKind,

    /// Results folder
    #[clap(short = 'f', long, help_heading = "Experiment")]
    pub folder: PathBuf,

    /// Machine configuration (JSON)
    #[clap(short = 'c', long, help_heading = "Experiment")]
    pub config: PathBuf,

    /// Sweep tables (JSON); built-in tables when omitted
    #[clap(long, help_heading = "Experiment")]
    pub sweep_config: Option<PathBuf>,

    #[clap(long, value_enum, default_value_t = ExpType::Individual, help_heading = "Experiment")]
    pub exp_type: ExpType,

    /// Primary axis of an mlx5 sweep
    #[clap(long, value_enum, default_value_t = LoopingVariable::TotalSize, help_heading = "Experiment")]
    pub looping_variable: LoopingVariable,

    /// Re-analyse the finished trials of an individual configuration
    #[clap(long, default_value_t = false, help_heading = "Experiment")]
    pub analysis_only: bool,

    #[clap(flatten)]
    pub individual: IndividualArgs,
}

impl ExperimentArgs {
    /// Traces are only needed by the key-value store.
    pub fn kv_traces(&self) -> Option<KvTraces> {
        match (&self.individual.load_trace, &self.individual.access_trace) {
            (Some(load), Some(access)) => Some(KvTraces {
                load_trace: load.clone(),
                access_trace: access.clone(),
            }),
            _ => None,
        }
    }
}

/// Literal parameters of an individual run
#[derive(clap::Args, Debug, Clone)]
pub struct IndividualArgs {
    /// Client rates as count@rate pairs, e.g. 2@300000,1@100000
    #[clap(long, help_heading = "Individual")]
    pub rates: Option<RateSpec>,

    /// Bytes per segment
    #[clap(long, help_heading = "Individual")]
    pub segment_size: Option<usize>,

    /// Segments per message
    #[clap(long, alias = "num-mbufs", help_heading = "Individual")]
    pub num_segments: Option<usize>,

    /// Server copies payloads out of receive buffers
    #[clap(long, default_value_t = false, help_heading = "Individual")]
    pub with_copy: bool,

    /// Client sends the message as one contiguous buffer
    #[clap(long, default_value_t = false, help_heading = "Individual")]
    pub as_one: bool,

    #[clap(long, default_value_t = crate::defaults::NUM_THREADS, help_heading = "Individual")]
    pub num_threads: usize,

    #[clap(long, default_value_t = crate::defaults::ARRAY_SIZE, help_heading = "Individual")]
    pub array_size: usize,

    #[clap(long, default_value_t = 0, help_heading = "Individual")]
    pub busy_cycles: u64,

    /// Size of the packet the server reads; 0 for the small default
    #[clap(long, default_value_t = 0, help_heading = "Individual")]
    pub recv_size: usize,

    /// Serialization system under test (kv)
    #[clap(long, help_heading = "Key-value")]
    pub system: Option<String>,

    /// Total bytes of values per request (kv)
    #[clap(long, help_heading = "Key-value")]
    pub total_size: Option<usize>,

    #[clap(long, default_value_t = 1, help_heading = "Key-value")]
    pub num_keys: usize,

    #[clap(long, default_value_t = 1, help_heading = "Key-value")]
    pub num_values: usize,

    #[clap(long, help_heading = "Key-value")]
    pub load_trace: Option<String>,

    #[clap(long, help_heading = "Key-value")]
    pub access_trace: Option<String>,

    #[clap(long, default_value_t = 0, help_heading = "Key-value")]
    pub pinning_limit: usize,

    #[clap(long, default_value_t = 0, help_heading = "Key-value")]
    pub pinning_segment_size: usize,

    #[clap(long, default_value_t = false, help_heading = "Key-value")]
    pub register_at_start: bool,

    #[clap(long, default_value_t = 0, help_heading = "Key-value")]
    pub pinning_frequency: usize,
}

fn required<T: Clone>(value: &Option<T>, name: &str) -> Result<T> {
    value
        .clone()
        .with_context(|| format!("--{} is required for individual runs", name))
}

impl IndividualArgs {
    /// Build the request for one configuration of `kind`.
    pub fn request(&self, kind: ExperimentKind) -> Result<IndividualRequest> {
        let rates = required(&self.rates, "rates")?;
        let copy = CopyMode {
            with_copy: self.with_copy,
            as_one: self.as_one,
        };
        let benchmark = match kind {
            ExperimentKind::ScatterGather => {
                let segment_size = required(&self.segment_size, "segment-size")?;
                let num_mbufs = required(&self.num_segments, "num-segments")?;
                validate_positive("segment_size", segment_size)?;
                validate_positive("num_segments", num_mbufs)?;
                // Zero-copy and one-buffer zero-copy share a results folder.
                if copy.as_one && !copy.with_copy {
                    anyhow::bail!("--as-one requires --with-copy for scatter-gather runs");
                }
                Benchmark::ScatterGather(ScatterGatherParams {
                    segment_size,
                    num_mbufs,
                    copy,
                })
            }
            ExperimentKind::Mlx5 => {
                let segment_size = required(&self.segment_size, "segment-size")?;
                let num_segments = required(&self.num_segments, "num-segments")?;
                validate_positive("segment_size", segment_size)?;
                validate_positive("num_segments", num_segments)?;
                validate_positive("num_threads", self.num_threads)?;
                Benchmark::Mlx5(Mlx5Params {
                    segment_size,
                    num_segments,
                    copy,
                    num_threads: self.num_threads,
                    array_size: self.array_size,
                    busy_cycles: self.busy_cycles,
                    recv_pkt_size: self.recv_size,
                })
            }
            ExperimentKind::KvStore => {
                let total_size = required(&self.total_size, "total-size")?;
                validate_positive("num_values", self.num_values)?;
                validate_positive("num_threads", self.num_threads)?;
                let value_size = total_size / self.num_values;
                let size_distr = format!("UniformOverSizes-{}", value_size);
                Benchmark::KvStore(KvParams {
                    system: required(&self.system, "system")?,
                    avg_size: size_distr_avg(&size_distr)?,
                    size_distr,
                    num_keys: self.num_keys,
                    num_values: self.num_values,
                    num_threads: self.num_threads,
                    load_trace: required(&self.load_trace, "load-trace")?,
                    access_trace: required(&self.access_trace, "access-trace")?,
                    zcc: ZccParams {
                        pinning_limit: self.pinning_limit,
                        segment_size: self.pinning_segment_size,
                        register_at_start: self.register_at_start,
                        pinning_frequency: self.pinning_frequency,
                    },
                })
            }
        };
        Ok(IndividualRequest { rates, benchmark })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("sweep-bench").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_individual_scatter_gather() {
        let args = parse(&[
            "plan", "-e", "sg", "-f", "/results", "-c", "machine.json",
            "--rates", "2@300000", "--segment-size", "512", "--num-mbufs", "4",
        ]);
        let Command::Plan { experiment, time } = args.command else {
            panic!("expected plan");
        };
        assert_eq!(time, crate::defaults::RUN_TIME_SECS);
        assert_eq!(experiment.exp_type, ExpType::Individual);
        let request = experiment.individual.request(experiment.experiment).unwrap();
        assert_eq!(request.benchmark.total_size(), 2048);
        assert_eq!(request.rates.to_string(), "2@300000");
    }

    #[test]
    fn test_scatter_gather_one_buffer_needs_copy() {
        let base = [
            "plan", "-e", "sg", "-f", "r", "-c", "m.json",
            "--rates", "1@1000", "--segment-size", "512", "--num-mbufs", "2", "--as-one",
        ];
        let Command::Plan { experiment, .. } = parse(&base).command else {
            panic!("expected plan");
        };
        let err = experiment.individual.request(ExperimentKind::ScatterGather).unwrap_err();
        assert!(err.to_string().contains("--with-copy"));

        let mut with_copy = base.to_vec();
        with_copy.push("--with-copy");
        let Command::Plan { experiment, .. } = parse(&with_copy).command else {
            panic!("expected plan");
        };
        assert!(experiment.individual.request(ExperimentKind::ScatterGather).is_ok());
    }

    #[test]
    fn test_individual_requires_parameters() {
        let args = parse(&["analyze", "-e", "mlx5", "-f", "r", "-c", "m.json", "--rates", "1@10"]);
        let Command::Analyze { experiment, .. } = args.command else {
            panic!("expected analyze");
        };
        let err = experiment.individual.request(ExperimentKind::Mlx5).unwrap_err();
        assert!(err.to_string().contains("--segment-size"));
    }

    #[test]
    fn test_kv_request_derives_size_distribution() {
        let args = parse(&[
            "plan", "-e", "kv", "-f", "r", "-c", "m.json", "--rates", "1@10000",
            "--system", "cornflakes", "--total-size", "4096", "--num-values", "2",
            "--load-trace", "load", "--access-trace", "access",
        ]);
        let Command::Plan { experiment, .. } = args.command else {
            panic!("expected plan");
        };
        assert!(experiment.kv_traces().is_some());
        let request = experiment.individual.request(ExperimentKind::KvStore).unwrap();
        match request.benchmark {
            Benchmark::KvStore(p) => {
                assert_eq!(p.size_distr, "UniformOverSizes-2048");
                assert_eq!(p.avg_size, 2048);
            }
            other => panic!("unexpected benchmark {:?}", other),
        }
    }

    #[test]
    fn test_bad_rate_spec_rejected_by_parser() {
        let result = Args::try_parse_from([
            "sweep-bench", "plan", "-e", "sg", "-f", "r", "-c", "m.json", "--rates", "fast",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_summarize_defaults() {
        let args = parse(&["summarize", "-f", "/results"]);
        let Command::Summarize {
            input,
            output,
            saturation_threshold,
            ..
        } = args.command
        else {
            panic!("expected summarize");
        };
        assert_eq!(input, PathBuf::from(crate::defaults::TRIALS_FILE));
        assert_eq!(output, PathBuf::from(crate::defaults::SUMMARY_FILE));
        assert_eq!(saturation_threshold, 0.95);
    }
}
