//! Sweep enumeration.
//!
//! [`IterationSpace`] turns a sweep definition into the iterations to run.
//! The axis value lists and the max-rate lookup live in [`SweepTables`],
//! which is plain data injected at construction so sweeps can be defined and
//! tested without touching global state.
//!
//! Two modes exist:
//! - **individual**: one iteration from literal parameters; its trial is the
//!   number of trials already on disk, so re-running resumes the series.
//! - **sweep**: the nested product of trials and axis values, each iteration
//!   carrying an explicit trial index. Iterations are produced lazily.

use crate::defaults;
use crate::error::SweepError;
use crate::iteration::{
    count_finished_trials, Benchmark, CopyMode, Iteration, KvParams, Mlx5Params,
    ScatterGatherParams, ZccParams, KV_AXES, MLX5_AXES, SCATTER_GATHER_AXES,
};
use crate::rate::RateSpec;
use crate::utils::tput_gbps;
use anyhow::{Context, Result};
use clap::ValueEnum;
use itertools::iproduct;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Which benchmark variant a sweep drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum ExperimentKind {
    /// Scatter-gather echo server
    #[clap(name = "sg")]
    ScatterGather,

    /// Multi-threaded mlx5 datapath echo
    #[clap(name = "mlx5")]
    Mlx5,

    /// Key-value store over zero-copy serialization
    #[clap(name = "kv")]
    KvStore,
}

impl std::fmt::Display for ExperimentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExperimentKind::ScatterGather => write!(f, "ScatterGather"),
            ExperimentKind::Mlx5 => write!(f, "Mlx5Bench"),
            ExperimentKind::KvStore => write!(f, "KvStoreBench"),
        }
    }
}

impl ExperimentKind {
    /// Axis columns of this variant, identical to [`Benchmark::axis_names`]
    /// of any of its iterations.
    pub fn axis_names(self) -> &'static [&'static str] {
        match self {
            ExperimentKind::ScatterGather => SCATTER_GATHER_AXES,
            ExperimentKind::Mlx5 => MLX5_AXES,
            ExperimentKind::KvStore => KV_AXES,
        }
    }
}

/// Primary axis of an mlx5 sweep.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum LoopingVariable {
    /// Working-set array size crossed with total message size
    #[clap(name = "array_total_size")]
    ArrayTotalSize,

    /// Total message size
    #[clap(name = "total_size")]
    TotalSize,

    /// Number of scatter-gather segments
    #[clap(name = "num_segments")]
    NumSegments,

    /// Size of the packet read by the server
    #[clap(name = "recv_size")]
    RecvSize,
}

/// Link ceiling and rate step shared by every sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimits {
    /// Physical link capacity the offered load must stay under.
    pub link_ceiling_gbps: f64,
    /// Amount subtracted from a rate while it exceeds the ceiling.
    pub rate_step: u64,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            link_ceiling_gbps: defaults::LINK_CEILING_GBPS,
            rate_step: defaults::RATE_STEP_PPS,
        }
    }
}

impl RateLimits {
    /// A zero step never leaves the ceiling loop; a non-positive ceiling
    /// admits no rate at all.
    pub fn validate(&self) -> Result<(), SweepError> {
        if self.rate_step == 0 {
            return Err(SweepError::InvalidParameter {
                name: "rate_step",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.link_ceiling_gbps.is_nan() || self.link_ceiling_gbps <= 0.0 {
            return Err(SweepError::InvalidParameter {
                name: "link_ceiling_gbps",
                reason: format!("must be positive, got {}", self.link_ceiling_gbps),
            });
        }
        Ok(())
    }

    /// Offered rate for `percent` of `max_rate`, stepped down while the
    /// resulting load for `message_size` bytes exceeds the link ceiling.
    pub fn derive_rate(&self, max_rate: u64, percent: f64, message_size: usize) -> u64 {
        let mut rate = ((percent / 100.0) * max_rate as f64) as u64;
        while tput_gbps(rate as f64, message_size) > self.link_ceiling_gbps && rate > self.rate_step {
            rate -= self.rate_step;
        }
        if tput_gbps(rate as f64, message_size) > self.link_ceiling_gbps {
            // Below one step: jump straight to the largest rate the link carries.
            rate = (self.link_ceiling_gbps * 1e9 / (message_size as f64 * 8.0)) as u64;
        }
        rate.max(1)
    }
}

/// Axis values of the scatter-gather sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScatterGatherTables {
    pub segment_sizes: Vec<usize>,
    pub max_segments: usize,
    pub max_rate: u64,
}

impl Default for ScatterGatherTables {
    fn default() -> Self {
        let mut segment_sizes = vec![64, 128];
        segment_sizes.extend((256..=8192).step_by(256));
        Self {
            segment_sizes,
            max_segments: 32,
            max_rate: 100_000,
        }
    }
}

/// Axis values of the mlx5 sweeps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Mlx5Tables {
    pub num_threads: usize,
    pub num_clients: usize,
    /// Array size used when array size is not the looping variable.
    pub base_array_size: usize,
    pub array_sizes: Vec<usize>,
    pub recv_sizes: Vec<usize>,
    pub recv_size_segments: Vec<usize>,
    pub recv_size_total_sizes: Vec<usize>,
    pub complete_total_sizes: Vec<usize>,
    pub total_sizes: Vec<usize>,
    pub complete_segments: Vec<usize>,
    pub segments: Vec<usize>,
    /// Knee rate per total message size, measured at the smallest working set.
    pub max_rates: BTreeMap<usize, u64>,
    /// Offered load as a percentage of the max rate.
    pub sample_percentages: Vec<u32>,
}

impl Default for Mlx5Tables {
    fn default() -> Self {
        Self {
            num_threads: 4,
            num_clients: 3,
            base_array_size: 65536,
            // L1 = 32K, L2 = 1024K, L3 ~ 14080K
            array_sizes: vec![65536, 819200, 4096000, 65536000, 655360000],
            recv_sizes: vec![256, 512, 1024, 2048, 4096],
            recv_size_segments: vec![2],
            recv_size_total_sizes: vec![256, 4096],
            complete_total_sizes: vec![256, 512, 1024, 2048, 4096],
            total_sizes: vec![256, 4096],
            complete_segments: vec![1, 2, 4, 8, 16, 32],
            segments: vec![1],
            max_rates: BTreeMap::from([
                (256, 425000),
                (512, 400000),
                (1024, 375000),
                (2048, 350000),
                (4096, 225000),
                (8192, 150000),
            ]),
            sample_percentages: vec![
                10, 30, 40, 45, 50, 53, 55, 57, 60, 63, 66, 69, 72, 75, 78, 81, 83, 85, 88, 91,
                93, 95, 100,
            ],
        }
    }
}

/// One zero-copy parameter set and the max rate measured for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvMaxRate {
    pub zcc: ZccParams,
    pub max_rate: u64,
}

/// Axis values of the key-value store sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KvTables {
    pub num_threads: usize,
    pub num_clients: usize,
    /// Fractions of the max rate, e.g. `0.5` for half.
    pub rate_percentages: Vec<f64>,
    pub num_values: usize,
    pub num_keys: usize,
    pub size_distr: String,
    pub systems: Vec<String>,
    pub max_rates: Vec<KvMaxRate>,
}

impl Default for KvTables {
    fn default() -> Self {
        Self {
            num_threads: 1,
            num_clients: 1,
            rate_percentages: vec![0.25, 0.5, 0.75, 1.0],
            num_values: 1,
            num_keys: 1,
            size_distr: "UniformOverSizes-4096".to_string(),
            systems: vec!["cornflakes-dynamic".to_string()],
            max_rates: vec![KvMaxRate {
                zcc: ZccParams {
                    pinning_limit: 0,
                    segment_size: 0,
                    register_at_start: true,
                    pinning_frequency: 0,
                },
                max_rate: 100_000,
            }],
        }
    }
}

/// Every table a sweep draws from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepTables {
    pub num_trials: usize,
    pub limits: RateLimits,
    pub scatter_gather: ScatterGatherTables,
    pub mlx5: Mlx5Tables,
    pub kv: KvTables,
}

impl Default for SweepTables {
    fn default() -> Self {
        Self {
            num_trials: defaults::NUM_TRIALS,
            limits: RateLimits::default(),
            scatter_gather: ScatterGatherTables::default(),
            mlx5: Mlx5Tables::default(),
            kv: KvTables::default(),
        }
    }
}

impl SweepTables {
    /// Load tables from a JSON file; missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading sweep tables {:?}", path))?;
        let mut tables: SweepTables = serde_json::from_str(&text)
            .with_context(|| format!("parsing sweep tables {:?}", path))?;
        if tables.num_trials == 0 {
            tables.num_trials = defaults::NUM_TRIALS;
        }
        tables
            .limits
            .validate()
            .with_context(|| format!("invalid limits in {:?}", path))?;
        Ok(tables)
    }
}

/// Average value size of a size distribution such as `UniformOverSizes-4096`.
pub fn size_distr_avg(size_distr: &str) -> Result<usize, SweepError> {
    size_distr
        .rsplit('-')
        .next()
        .and_then(|n| n.parse::<usize>().ok())
        .filter(|&n| n > 0)
        .ok_or_else(|| SweepError::InvalidParameter {
            name: "size_distr",
            reason: format!("cannot derive an average size from {:?}", size_distr),
        })
}

/// Traces replayed by the key-value store; supplied per invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvTraces {
    pub load_trace: String,
    pub access_trace: String,
}

/// Literal parameters of a single iteration.
#[derive(Debug, Clone)]
pub struct IndividualRequest {
    pub rates: RateSpec,
    pub benchmark: Benchmark,
}

const COPY_ON_OFF: [CopyMode; 2] = [CopyMode::ZERO_COPY, CopyMode::WITH_COPY];

const SG_COPY_MODES: [CopyMode; 3] = [
    CopyMode::ZERO_COPY,
    CopyMode::WITH_COPY,
    CopyMode::WITH_COPY_ONE_BUFFER,
];

/// Enumerates the iterations of one experiment.
pub struct IterationSpace {
    kind: ExperimentKind,
    tables: SweepTables,
    max_clients: usize,
}

impl IterationSpace {
    pub fn new(kind: ExperimentKind, tables: SweepTables, max_clients: usize) -> Self {
        Self {
            kind,
            tables,
            max_clients,
        }
    }

    pub fn kind(&self) -> ExperimentKind {
        self.kind
    }

    pub fn tables(&self) -> &SweepTables {
        &self.tables
    }

    /// One iteration from literal parameters, trial resolved from disk.
    ///
    /// With `analysis_only`, returns one iteration per finished trial instead,
    /// so completed runs can be re-analysed.
    pub fn individual(
        &self,
        request: IndividualRequest,
        folder: &Path,
        analysis_only: bool,
    ) -> Result<Vec<Iteration>> {
        request.rates.check_capacity(self.max_clients)?;
        let iteration = Iteration::new(request.rates, request.benchmark);
        let parent = iteration.parent_path(folder);
        let finished = count_finished_trials(&parent)
            .with_context(|| format!("counting trials under {:?}", parent))?;
        debug!("{} trials finished under {:?}", finished, parent);

        if analysis_only {
            return Ok((0..finished)
                .map(|trial| iteration.clone().with_trial(trial))
                .collect());
        }
        Ok(vec![iteration.with_trial(finished)])
    }

    /// Lazily enumerate a full sweep.
    ///
    /// Worker counts are checked against the machine before anything is
    /// produced, so a sweep either fails up front or yields every iteration.
    pub fn sweep<'a>(
        &'a self,
        looping: LoopingVariable,
        traces: Option<&'a KvTraces>,
    ) -> Result<Box<dyn Iterator<Item = Iteration> + 'a>, SweepError> {
        self.tables.limits.validate()?;
        match self.kind {
            ExperimentKind::ScatterGather => {
                RateSpec::uniform(self.tables.scatter_gather.max_rate, 1)?
                    .check_capacity(self.max_clients)?;
                Ok(Box::new(self.scatter_gather_sweep()))
            }
            ExperimentKind::Mlx5 => {
                let t = &self.tables.mlx5;
                if t.num_clients > self.max_clients {
                    return Err(SweepError::ConfigurationExceeded {
                        requested: t.num_clients,
                        max: self.max_clients,
                    });
                }
                self.check_max_rates(looping)?;
                self.check_segments(looping)?;
                Ok(self.mlx5_sweep(looping))
            }
            ExperimentKind::KvStore => {
                let t = &self.tables.kv;
                if t.num_clients > self.max_clients {
                    return Err(SweepError::ConfigurationExceeded {
                        requested: t.num_clients,
                        max: self.max_clients,
                    });
                }
                let traces = traces.ok_or(SweepError::InvalidParameter {
                    name: "load_trace",
                    reason: "key-value sweeps need load and access traces".to_string(),
                })?;
                let avg_size = size_distr_avg(&t.size_distr)?;
                Ok(Box::new(self.kv_sweep(traces, avg_size)))
            }
        }
    }

    fn scatter_gather_sweep(&self) -> impl Iterator<Item = Iteration> + '_ {
        let t = &self.tables.scatter_gather;
        iproduct!(
            0..self.tables.num_trials,
            t.segment_sizes.iter(),
            1..=t.max_segments,
            SG_COPY_MODES.iter()
        )
        .map(move |(trial, &segment_size, num_mbufs, &copy)| {
            let rate = self
                .tables
                .limits
                .derive_rate(t.max_rate, 100.0, segment_size * num_mbufs);
            Iteration::new(
                single_group(rate, 1),
                Benchmark::ScatterGather(ScatterGatherParams {
                    segment_size,
                    num_mbufs,
                    copy,
                }),
            )
            .with_trial(trial)
        })
    }

    /// Every total size the looping variable visits must have a max rate.
    fn check_max_rates(&self, looping: LoopingVariable) -> Result<(), SweepError> {
        let t = &self.tables.mlx5;
        let sizes = match looping {
            LoopingVariable::RecvSize => &t.recv_size_total_sizes,
            LoopingVariable::TotalSize => &t.complete_total_sizes,
            LoopingVariable::NumSegments | LoopingVariable::ArrayTotalSize => &t.total_sizes,
        };
        match sizes.iter().find(|size| !t.max_rates.contains_key(size)) {
            Some(size) => Err(SweepError::InvalidParameter {
                name: "max_rates",
                reason: format!("no max rate for total size {}", size),
            }),
            None => Ok(()),
        }
    }

    /// Segment counts divide the total size, so zero is rejected up front.
    fn check_segments(&self, looping: LoopingVariable) -> Result<(), SweepError> {
        let t = &self.tables.mlx5;
        let segments = match looping {
            LoopingVariable::RecvSize => &t.recv_size_segments,
            LoopingVariable::NumSegments => &t.complete_segments,
            LoopingVariable::TotalSize | LoopingVariable::ArrayTotalSize => &t.segments,
        };
        if segments.contains(&0) {
            return Err(SweepError::InvalidParameter {
                name: "segments",
                reason: "segment counts must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    fn mlx5_iteration(
        &self,
        trial: usize,
        total_size: usize,
        percent: u32,
        copy: CopyMode,
        num_segments: usize,
        array_size: usize,
        recv_pkt_size: usize,
    ) -> Iteration {
        let t = &self.tables.mlx5;
        let max_rate = t.max_rates.get(&total_size).copied().unwrap_or_default();
        let rate = self
            .tables
            .limits
            .derive_rate(max_rate, f64::from(percent), total_size);
        Iteration::new(
            single_group(rate, t.num_clients),
            Benchmark::Mlx5(Mlx5Params {
                segment_size: total_size / num_segments,
                num_segments,
                copy,
                num_threads: t.num_threads,
                array_size,
                busy_cycles: 0,
                recv_pkt_size,
            }),
        )
        .with_trial(trial)
    }

    fn mlx5_sweep(&self, looping: LoopingVariable) -> Box<dyn Iterator<Item = Iteration> + '_> {
        let t = &self.tables.mlx5;
        let trials = 0..self.tables.num_trials;
        match looping {
            LoopingVariable::RecvSize => Box::new(
                iproduct!(
                    trials,
                    t.recv_size_total_sizes.iter(),
                    t.recv_sizes.iter(),
                    t.sample_percentages.iter(),
                    COPY_ON_OFF.iter(),
                    t.recv_size_segments.iter()
                )
                .map(move |(trial, &total, &recv, &pct, &copy, &segs)| {
                    self.mlx5_iteration(trial, total, pct, copy, segs, t.base_array_size, recv)
                }),
            ),
            LoopingVariable::TotalSize => Box::new(
                iproduct!(
                    trials,
                    t.complete_total_sizes.iter(),
                    t.sample_percentages.iter(),
                    COPY_ON_OFF.iter(),
                    t.segments.iter()
                )
                .map(move |(trial, &total, &pct, &copy, &segs)| {
                    self.mlx5_iteration(trial, total, pct, copy, segs, t.base_array_size, 0)
                }),
            ),
            LoopingVariable::NumSegments => Box::new(
                iproduct!(
                    trials,
                    t.total_sizes.iter(),
                    t.sample_percentages.iter(),
                    COPY_ON_OFF.iter(),
                    t.complete_segments.iter()
                )
                .map(move |(trial, &total, &pct, &copy, &segs)| {
                    self.mlx5_iteration(trial, total, pct, copy, segs, t.base_array_size, 0)
                }),
            ),
            LoopingVariable::ArrayTotalSize => Box::new(
                iproduct!(
                    trials,
                    t.array_sizes.iter(),
                    t.total_sizes.iter(),
                    t.sample_percentages.iter(),
                    COPY_ON_OFF.iter(),
                    t.segments.iter()
                )
                .map(move |(trial, &array, &total, &pct, &copy, &segs)| {
                    self.mlx5_iteration(trial, total, pct, copy, segs, array, 0)
                }),
            ),
        }
    }

    fn kv_sweep<'a>(
        &'a self,
        traces: &'a KvTraces,
        avg_size: usize,
    ) -> impl Iterator<Item = Iteration> + 'a {
        let t = &self.tables.kv;
        iproduct!(
            0..self.tables.num_trials,
            t.systems.iter(),
            t.rate_percentages.iter(),
            t.max_rates.iter()
        )
        .map(move |(trial, system, &fraction, max)| {
            let rate = self.tables.limits.derive_rate(
                max.max_rate,
                fraction * 100.0,
                avg_size * t.num_values,
            );
            Iteration::new(
                single_group(rate, t.num_clients),
                Benchmark::KvStore(KvParams {
                    system: system.clone(),
                    size_distr: t.size_distr.clone(),
                    avg_size,
                    num_keys: t.num_keys,
                    num_values: t.num_values,
                    num_threads: t.num_threads,
                    load_trace: traces.load_trace.clone(),
                    access_trace: traces.access_trace.clone(),
                    zcc: max.zcc.clone(),
                }),
            )
            .with_trial(trial)
        })
    }
}

/// Rate spec for a derived rate; derived rates are always at least 1.
fn single_group(rate: u64, count: usize) -> RateSpec {
    RateSpec::from_positive(rate, count)
}
