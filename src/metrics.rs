//! Latency merging and percentile statistics.
//!
//! Each worker thread writes its own latency log. The logs are sorted
//! independently, so the combined distribution is produced with an N-way
//! heap merge instead of a full re-sort.
//!
//! Percentiles use the nearest-rank rule: percentile `k` of a sorted
//! sequence of length `n` is the element at 0-based index
//! `ceil(k / 100 * n) - 1`, clamped to `[0, n - 1]`. For `1..=100` this gives
//! p50 = 50, p99 = 99 and p99.9 = 100.

use crate::error::SweepError;
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Summary statistics over a merged latency distribution, in the unit of
/// the input samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub mean: f64,
    pub median: f64,
    pub p99: f64,
    pub p999: f64,
    pub samples: usize,
}

impl LatencySummary {
    /// Compute the summary of an already sorted sequence.
    pub fn from_sorted(sorted: &[f64]) -> Result<Self, SweepError> {
        if sorted.is_empty() {
            return Err(SweepError::NoLatencyData);
        }
        let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
        Ok(Self {
            mean,
            median: nearest_rank(sorted, 50.0),
            p99: nearest_rank(sorted, 99.0),
            p999: nearest_rank(sorted, 99.9),
            samples: sorted.len(),
        })
    }
}

/// Nearest-rank percentile of a non-empty sorted slice.
fn nearest_rank(sorted: &[f64], k: f64) -> f64 {
    let n = sorted.len();
    let rank = (k * n as f64 / 100.0).ceil() as usize;
    sorted[rank.saturating_sub(1).min(n - 1)]
}

/// Percentile `k` (0..=100) of a sorted slice, `None` when empty.
pub fn percentile(sorted: &[f64], k: f64) -> Option<f64> {
    if sorted.is_empty() {
        None
    } else {
        Some(nearest_rank(sorted, k))
    }
}

/// Drop the lowest `fraction` of a sorted slice.
///
/// Removes `floor(fraction * n)` leading samples, which discards warm-up
/// artifacts at the low end of the distribution.
pub fn strip_low_fraction(sorted: &[f64], fraction: f64) -> &[f64] {
    let strip = ((sorted.len() as f64) * fraction).floor() as usize;
    &sorted[strip.min(sorted.len())..]
}

/// Heap entry ordered by sample value, then by source list for stability.
#[derive(Debug, Clone, Copy)]
struct HeapEntry {
    value: f64,
    list: usize,
    pos: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value
            .total_cmp(&other.value)
            .then(self.list.cmp(&other.list))
    }
}

/// Merge independently sorted sequences into one sorted sequence.
///
/// Runs in O(total × log N) for N inputs. Empty inputs are skipped.
pub fn merge_sorted(lists: &[Vec<f64>]) -> Vec<f64> {
    let total = lists.iter().map(Vec::len).sum();
    let mut merged = Vec::with_capacity(total);
    let mut heap: BinaryHeap<Reverse<HeapEntry>> = lists
        .iter()
        .enumerate()
        .filter_map(|(list, samples)| {
            samples.first().map(|&value| {
                Reverse(HeapEntry {
                    value,
                    list,
                    pos: 0,
                })
            })
        })
        .collect();

    while let Some(Reverse(entry)) = heap.pop() {
        merged.push(entry.value);
        let next = entry.pos + 1;
        if let Some(&value) = lists[entry.list].get(next) {
            heap.push(Reverse(HeapEntry {
                value,
                list: entry.list,
                pos: next,
            }));
        }
    }
    merged
}

/// Collects the per-worker latency sequences of one iteration.
#[derive(Debug, Default)]
pub struct LatencyMerger {
    workers: Vec<Vec<f64>>,
}

impl LatencyMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one worker's samples. Unsorted input is sorted first.
    pub fn add_worker(&mut self, mut samples: Vec<f64>) {
        if !samples.windows(2).all(|w| w[0] <= w[1]) {
            samples.sort_by(f64::total_cmp);
        }
        self.workers.push(samples);
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Globally sorted sequence of every worker's samples.
    pub fn merged(&self) -> Vec<f64> {
        merge_sorted(&self.workers)
    }

    /// Summary over the merged sequence; `NoLatencyData` if all are empty.
    pub fn summary(&self) -> Result<LatencySummary, SweepError> {
        LatencySummary::from_sorted(&self.merged())
    }
}
