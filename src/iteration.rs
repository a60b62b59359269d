//! Iterations and their on-disk identity.
//!
//! An [`Iteration`] is one point of a benchmark sweep: the rate spec, the
//! variant-specific axis values and the trial index. [`IterationKey`] turns an
//! iteration into its hierarchical folder path and flat display string. The
//! mapping is a pure function of the axis values, which is what allows an
//! interrupted sweep to be resumed by counting the `trial_*` folders that
//! already exist under an iteration's parent path.

use crate::error::SweepError;
use crate::rate::RateSpec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Prefix of the trailing per-trial folder.
pub const TRIAL_PREFIX: &str = "trial_";

/// Whether the server copies payloads, and whether the client sends the
/// payload as one contiguous buffer instead of scattered segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CopyMode {
    pub with_copy: bool,
    pub as_one: bool,
}

impl CopyMode {
    pub const ZERO_COPY: CopyMode = CopyMode {
        with_copy: false,
        as_one: false,
    };
    pub const WITH_COPY: CopyMode = CopyMode {
        with_copy: true,
        as_one: false,
    };
    pub const WITH_COPY_ONE_BUFFER: CopyMode = CopyMode {
        with_copy: true,
        as_one: true,
    };

    /// Folder segment naming all four combinations.
    pub fn segment(&self) -> &'static str {
        match (self.with_copy, self.as_one) {
            (true, true) => "with_copy_one_buffer",
            (true, false) => "with_copy",
            (false, true) => "zero_copy_one_buffer",
            (false, false) => "zero_copy",
        }
    }

    /// Segment layout actually sent on the wire: `as_one` collapses all
    /// segments into a single buffer of the total size.
    pub fn wire_layout(&self, segment_size: usize, num_segments: usize) -> (usize, usize) {
        if self.as_one {
            (segment_size * num_segments, 1)
        } else {
            (segment_size, num_segments)
        }
    }
}

/// Axis values of the scatter-gather echo benchmark.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScatterGatherParams {
    pub segment_size: usize,
    pub num_mbufs: usize,
    pub copy: CopyMode,
}

/// Axis values of the multi-threaded mlx5 datapath benchmark.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mlx5Params {
    pub segment_size: usize,
    pub num_segments: usize,
    pub copy: CopyMode,
    pub num_threads: usize,
    pub array_size: usize,
    pub busy_cycles: u64,
    /// Size of the packet the server reads; 0 means the small default.
    pub recv_pkt_size: usize,
}

/// Zero-copy tuning knobs of the key-value store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ZccParams {
    pub pinning_limit: usize,
    pub segment_size: usize,
    pub register_at_start: bool,
    pub pinning_frequency: usize,
}

impl ZccParams {
    pub fn subfolder(&self) -> String {
        format!(
            "pinlimit_{}/pinsegsize_{}/register_{}/pinfreq_{}",
            self.pinning_limit,
            self.segment_size,
            u8::from(self.register_at_start),
            self.pinning_frequency
        )
    }
}

/// Axis values of the key-value store benchmark.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KvParams {
    /// Serialization system under test.
    pub system: String,
    pub size_distr: String,
    pub avg_size: usize,
    pub num_keys: usize,
    pub num_values: usize,
    pub num_threads: usize,
    pub load_trace: String,
    pub access_trace: String,
    pub zcc: ZccParams,
}

/// The benchmark variant an iteration belongs to, with its axis values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "benchmark", rename_all = "snake_case")]
pub enum Benchmark {
    ScatterGather(ScatterGatherParams),
    Mlx5(Mlx5Params),
    KvStore(KvParams),
}

pub(crate) const SCATTER_GATHER_AXES: &[&str] = &["segment_size", "num_mbufs", "with_copy", "as_one"];

pub(crate) const MLX5_AXES: &[&str] = &[
    "segment_size",
    "num_segments",
    "with_copy",
    "as_one",
    "array_size",
    "busy_cycles",
    "recv_size",
    "num_threads",
    "num_clients",
];

pub(crate) const KV_AXES: &[&str] = &[
    "system",
    "size_distr",
    "avg_size",
    "num_keys",
    "num_values",
    "num_threads",
    "num_clients",
    "load_trace",
    "access_trace",
    "pinning_limit",
    "zcc_segment_size",
    "register_at_start",
    "pinning_frequency",
];

impl Benchmark {
    /// CSV axis column names, in output order.
    pub fn axis_names(&self) -> &'static [&'static str] {
        match self {
            Benchmark::ScatterGather(_) => SCATTER_GATHER_AXES,
            Benchmark::Mlx5(_) => MLX5_AXES,
            Benchmark::KvStore(_) => KV_AXES,
        }
    }

    /// Worker threads per client host.
    pub fn num_threads(&self) -> usize {
        match self {
            Benchmark::ScatterGather(_) => 1,
            Benchmark::Mlx5(p) => p.num_threads,
            Benchmark::KvStore(p) => p.num_threads,
        }
    }

    /// Bytes carried by one request.
    pub fn total_size(&self) -> usize {
        match self {
            Benchmark::ScatterGather(p) => p.segment_size * p.num_mbufs,
            Benchmark::Mlx5(p) => p.segment_size * p.num_segments,
            Benchmark::KvStore(p) => p.avg_size * p.num_values,
        }
    }
}

/// One configuration point of a sweep.
///
/// Everything except `trial` is fixed at construction. The trial is assigned
/// when the iteration is scheduled, either explicitly or by counting the
/// trials already on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Iteration {
    rates: RateSpec,
    benchmark: Benchmark,
    trial: Option<usize>,
}

impl Iteration {
    pub fn new(rates: RateSpec, benchmark: Benchmark) -> Self {
        Self {
            rates,
            benchmark,
            trial: None,
        }
    }

    pub fn with_trial(mut self, trial: usize) -> Self {
        self.trial = Some(trial);
        self
    }

    pub fn set_trial(&mut self, trial: usize) {
        self.trial = Some(trial);
    }

    pub fn rates(&self) -> &RateSpec {
        &self.rates
    }

    pub fn benchmark(&self) -> &Benchmark {
        &self.benchmark
    }

    /// The assigned trial; reading it before assignment is a usage error.
    pub fn trial(&self) -> Result<usize, SweepError> {
        self.trial
            .ok_or_else(|| SweepError::TrialNotSet(self.parent_segments().join("/")))
    }

    pub fn num_clients(&self) -> usize {
        self.rates.total_workers()
    }

    pub fn num_threads(&self) -> usize {
        self.benchmark.num_threads()
    }

    pub fn total_size(&self) -> usize {
        self.benchmark.total_size()
    }

    pub fn client_rate_string(&self) -> String {
        self.rates.to_string()
    }

    /// Per-axis folder segments in their fixed on-disk order, trial excluded.
    pub fn parent_segments(&self) -> Vec<String> {
        let rates = self.client_rate_string();
        match &self.benchmark {
            Benchmark::ScatterGather(p) => {
                // The scatter-gather server only has a one-buffer mode when copying.
                let copy = if p.copy.with_copy {
                    p.copy.segment()
                } else {
                    CopyMode::ZERO_COPY.segment()
                };
                vec![
                    format!("segmentsize_{}", p.segment_size),
                    format!("mbufs_{}", p.num_mbufs),
                    rates,
                    copy.to_string(),
                ]
            }
            Benchmark::Mlx5(p) => {
                let recv = if p.recv_pkt_size == 0 {
                    "recv_size_small".to_string()
                } else {
                    format!("recv_size_{}", p.recv_pkt_size)
                };
                vec![
                    format!("segmentsize_{}", p.segment_size),
                    format!("mbufs_{}", p.num_segments),
                    format!("arraysize_{}", p.array_size),
                    recv,
                    format!("busycycles_{}", p.busy_cycles),
                    rates,
                    format!("threads_{}", p.num_threads),
                    p.copy.segment().to_string(),
                ]
            }
            Benchmark::KvStore(p) => vec![
                p.system.clone(),
                p.zcc.subfolder(),
                format!("size_{}", p.size_distr),
                format!("keys_{}", p.num_keys),
                format!("values_{}", p.num_values),
                rates,
                format!("{}_threads", p.num_threads),
            ],
        }
    }

    /// Folder holding every trial of this configuration.
    pub fn parent_path(&self, root: &Path) -> PathBuf {
        self.parent_segments()
            .iter()
            .fold(root.to_path_buf(), |path, segment| path.join(segment))
    }

    /// Axis values rendered for the per-trial CSV, aligned with
    /// [`Benchmark::axis_names`].
    pub fn axis_values(&self) -> Vec<String> {
        match &self.benchmark {
            Benchmark::ScatterGather(p) => vec![
                p.segment_size.to_string(),
                p.num_mbufs.to_string(),
                p.copy.with_copy.to_string(),
                p.copy.as_one.to_string(),
            ],
            Benchmark::Mlx5(p) => vec![
                p.segment_size.to_string(),
                p.num_segments.to_string(),
                p.copy.with_copy.to_string(),
                p.copy.as_one.to_string(),
                p.array_size.to_string(),
                p.busy_cycles.to_string(),
                p.recv_pkt_size.to_string(),
                p.num_threads.to_string(),
                self.num_clients().to_string(),
            ],
            Benchmark::KvStore(p) => vec![
                p.system.clone(),
                p.size_distr.clone(),
                p.avg_size.to_string(),
                p.num_keys.to_string(),
                p.num_values.to_string(),
                p.num_threads.to_string(),
                self.num_clients().to_string(),
                p.load_trace.clone(),
                p.access_trace.clone(),
                p.zcc.pinning_limit.to_string(),
                p.zcc.segment_size.to_string(),
                p.zcc.register_at_start.to_string(),
                p.zcc.pinning_frequency.to_string(),
            ],
        }
    }

    /// Identity of this iteration; fails if no trial is assigned.
    pub fn key(&self) -> Result<IterationKey, SweepError> {
        Ok(IterationKey {
            segments: self.parent_segments(),
            trial: self.trial()?,
        })
    }
}

/// Canonical identity of a scheduled iteration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IterationKey {
    segments: Vec<String>,
    trial: usize,
}

impl IterationKey {
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn trial(&self) -> usize {
        self.trial
    }

    pub fn trial_segment(&self) -> String {
        format!("{}{}", TRIAL_PREFIX, self.trial)
    }

    pub fn parent_path(&self, root: &Path) -> PathBuf {
        self.segments
            .iter()
            .fold(root.to_path_buf(), |path, segment| path.join(segment))
    }

    pub fn full_path(&self, root: &Path) -> PathBuf {
        self.parent_path(root).join(self.trial_segment())
    }
}

impl fmt::Display for IterationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            write!(f, "{}, ", segment)?;
        }
        write!(f, "{}", self.trial_segment())
    }
}

/// Number of `trial_*` folders under `parent`; a missing folder counts as zero.
pub fn count_finished_trials(parent: &Path) -> std::io::Result<usize> {
    let entries = match std::fs::read_dir(parent) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut count = 0;
    for entry in entries {
        let entry = entry?;
        let is_trial = entry
            .file_name()
            .to_str()
            .and_then(|name| name.strip_prefix(TRIAL_PREFIX))
            .map_or(false, |idx| idx.parse::<usize>().is_ok());
        if is_trial && entry.file_type()?.is_dir() {
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sg_iteration() -> Iteration {
        Iteration::new(
            RateSpec::uniform(300000, 2).unwrap(),
            Benchmark::ScatterGather(ScatterGatherParams {
                segment_size: 512,
                num_mbufs: 4,
                copy: CopyMode::ZERO_COPY,
            }),
        )
    }

    fn mlx5_iteration() -> Iteration {
        Iteration::new(
            RateSpec::uniform(50000, 3).unwrap(),
            Benchmark::Mlx5(Mlx5Params {
                segment_size: 256,
                num_segments: 2,
                copy: CopyMode::WITH_COPY,
                num_threads: 4,
                array_size: 65536,
                busy_cycles: 0,
                recv_pkt_size: 0,
            }),
        )
    }

    #[test]
    fn test_total_size_and_rate_string() {
        let it = sg_iteration();
        assert_eq!(it.total_size(), 2048);
        assert_eq!(it.client_rate_string(), "2@300000");
    }

    #[test]
    fn test_trial_required_for_key() {
        let it = sg_iteration();
        assert!(matches!(it.trial(), Err(SweepError::TrialNotSet(_))));
        assert!(matches!(it.key(), Err(SweepError::TrialNotSet(_))));
    }

    #[test]
    fn test_scatter_gather_paths() {
        let it = sg_iteration().with_trial(2);
        let key = it.key().unwrap();
        let root = Path::new("/results");
        assert_eq!(
            key.parent_path(root),
            PathBuf::from("/results/segmentsize_512/mbufs_4/2@300000/zero_copy")
        );
        assert_eq!(
            key.full_path(root),
            PathBuf::from("/results/segmentsize_512/mbufs_4/2@300000/zero_copy/trial_2")
        );
        assert_eq!(key.parent_path(root), it.parent_path(root));
        assert_eq!(
            key.to_string(),
            "segmentsize_512, mbufs_4, 2@300000, zero_copy, trial_2"
        );
    }

    #[test]
    fn test_mlx5_segment_order() {
        let it = mlx5_iteration();
        assert_eq!(
            it.parent_segments(),
            vec![
                "segmentsize_256",
                "mbufs_2",
                "arraysize_65536",
                "recv_size_small",
                "busycycles_0",
                "3@50000",
                "threads_4",
                "with_copy",
            ]
        );
        assert_eq!(it.axis_values().len(), it.benchmark().axis_names().len());
    }

    #[test]
    fn test_trials_share_parent_path() {
        let a = mlx5_iteration().with_trial(0).key().unwrap();
        let b = mlx5_iteration().with_trial(1).key().unwrap();
        assert_eq!(a.segments(), b.segments());
        assert_ne!(a.full_path(Path::new("r")), b.full_path(Path::new("r")));
    }

    #[test]
    fn test_copy_mode_segments() {
        assert_eq!(CopyMode::ZERO_COPY.segment(), "zero_copy");
        assert_eq!(CopyMode::WITH_COPY.segment(), "with_copy");
        assert_eq!(CopyMode::WITH_COPY_ONE_BUFFER.segment(), "with_copy_one_buffer");
        let zc_one = CopyMode {
            with_copy: false,
            as_one: true,
        };
        assert_eq!(zc_one.segment(), "zero_copy_one_buffer");
        assert_eq!(zc_one.wire_layout(256, 4), (1024, 1));
        assert_eq!(CopyMode::WITH_COPY.wire_layout(256, 4), (256, 4));
    }

    #[test]
    fn test_count_finished_trials_resumes() {
        let dir = TempDir::new().unwrap();
        let it = sg_iteration();
        let parent = it.parent_path(dir.path());
        assert_eq!(count_finished_trials(&parent).unwrap(), 0);

        for n in 0..4 {
            let key = it.clone().with_trial(n).key().unwrap();
            std::fs::create_dir_all(key.full_path(dir.path())).unwrap();
            assert_eq!(count_finished_trials(&parent).unwrap(), n + 1);
        }

        // Stray files and unrelated folders are ignored.
        std::fs::write(parent.join("trial_notes.txt"), "x").unwrap();
        std::fs::create_dir_all(parent.join("plots")).unwrap();
        assert_eq!(count_finished_trials(&parent).unwrap(), 4);
    }
}
