//! Knee extraction over the per-trial table.
//!
//! Rows are grouped by their axis values (every column except the trial
//! measurements). For each group:
//!
//! - latency floor: mean and population standard deviation of `p99` and
//!   `median` over the rows at the group's lowest offered rate;
//! - knee: rows are clustered by offered rate, each cluster is reduced to the
//!   mean and standard deviation of its achieved load and the mean achieved
//!   fraction. Clusters below the saturation threshold are dropped and the
//!   cluster with the highest mean achieved load wins. The first maximum in
//!   table order wins ties, and the reported deviation is that cluster's own.
//!
//! Packets per second and Gbps are maximised independently. A group whose
//! clusters are all saturated reports NaN for its knee.

use crate::results::{KneeRow, SummaryTable, TrialMeasurement, TrialTable};
use crate::utils::mean_and_std;
use std::collections::HashMap;
use tracing::debug;

/// Cross-trial aggregate of one offered rate within a group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateCluster {
    pub offered_load_pps: f64,
    pub offered_load_gbps: f64,
    pub achieved_pps_mean: f64,
    pub achieved_pps_sd: f64,
    pub achieved_gbps_mean: f64,
    pub achieved_gbps_sd: f64,
    pub percent_achieved: f64,
}

impl RateCluster {
    fn from_trials(trials: &[&TrialMeasurement]) -> Self {
        let column = |f: fn(&TrialMeasurement) -> f64| -> Vec<f64> {
            trials.iter().map(|m| f(m)).collect()
        };
        let (achieved_pps_mean, achieved_pps_sd) = mean_and_std(&column(|m| m.achieved_load_pps));
        let (achieved_gbps_mean, achieved_gbps_sd) =
            mean_and_std(&column(|m| m.achieved_load_gbps));
        let (percent_achieved, _) = mean_and_std(&column(|m| m.percent_achieved_rate));
        Self {
            offered_load_pps: trials[0].offered_load_pps,
            offered_load_gbps: trials[0].offered_load_gbps,
            achieved_pps_mean,
            achieved_pps_sd,
            achieved_gbps_mean,
            achieved_gbps_sd,
            percent_achieved,
        }
    }
}

/// Groups trial rows by configuration and extracts the knee of each.
#[derive(Debug, Clone, Copy)]
pub struct SummaryAnalyzer {
    saturation_threshold: f64,
}

impl SummaryAnalyzer {
    pub fn new(saturation_threshold: f64) -> Self {
        Self {
            saturation_threshold,
        }
    }

    /// One summary row per distinct axis tuple, in order of first appearance.
    pub fn summarize(&self, table: &TrialTable) -> SummaryTable {
        let rows = group_in_order(&table.records, |r| &r.axis_values)
            .into_iter()
            .map(|(axis_values, records)| {
                let trials: Vec<&TrialMeasurement> =
                    records.iter().map(|r| &r.measurement).collect();
                self.knee_row(axis_values.clone(), &trials)
            })
            .collect();
        SummaryTable {
            axis_names: table.axis_names.clone(),
            rows,
        }
    }

    fn knee_row(&self, axis_values: Vec<String>, trials: &[&TrialMeasurement]) -> KneeRow {
        let min_rate = trials
            .iter()
            .map(|m| m.offered_load_pps)
            .fold(f64::INFINITY, f64::min);
        let floor: Vec<&&TrialMeasurement> = trials
            .iter()
            .filter(|m| m.offered_load_pps == min_rate)
            .collect();
        let (mp99, p99sd) = mean_and_std(&floor.iter().map(|m| m.p99).collect::<Vec<_>>());
        let (mmedian, mediansd) =
            mean_and_std(&floor.iter().map(|m| m.median).collect::<Vec<_>>());

        let clusters: Vec<RateCluster> = self
            .clusters(trials)
            .into_iter()
            .filter(|c| c.percent_achieved >= self.saturation_threshold)
            .collect();
        if clusters.is_empty() {
            debug!("{:?}: every offered rate is saturated", axis_values);
        }
        let (maxtputpps, maxtputppssd) =
            first_max(&clusters, |c| (c.achieved_pps_mean, c.achieved_pps_sd));
        let (maxtputgbps, maxtputgbpssd) =
            first_max(&clusters, |c| (c.achieved_gbps_mean, c.achieved_gbps_sd));

        KneeRow {
            axis_values,
            mp99,
            p99sd,
            mmedian,
            mediansd,
            maxtputpps,
            maxtputgbps,
            maxtputppssd,
            maxtputgbpssd,
        }
    }

    /// Per offered rate aggregates of one group, unfiltered.
    pub fn clusters(&self, trials: &[&TrialMeasurement]) -> Vec<RateCluster> {
        group_in_order(trials, |m| {
            (m.offered_load_pps.to_bits(), m.offered_load_gbps.to_bits())
        })
        .into_iter()
        .map(|(_, members)| {
            let members: Vec<&TrialMeasurement> = members.into_iter().copied().collect();
            RateCluster::from_trials(&members)
        })
        .collect()
    }
}

/// `(value, sd)` of the first cluster with the highest value, NaN if none.
fn first_max(clusters: &[RateCluster], pick: impl Fn(&RateCluster) -> (f64, f64)) -> (f64, f64) {
    clusters
        .iter()
        .map(pick)
        .fold(None, |best: Option<(f64, f64)>, candidate| match best {
            Some(b) if b.0 >= candidate.0 => Some(b),
            _ => Some(candidate),
        })
        .unwrap_or((f64::NAN, f64::NAN))
}

/// Group items by key, keeping groups and their members in input order.
fn group_in_order<'a, T, K, F>(items: &'a [T], key: F) -> Vec<(K, Vec<&'a T>)>
where
    K: std::hash::Hash + Eq + Clone,
    F: Fn(&'a T) -> K,
{
    let mut index: HashMap<K, usize> = HashMap::new();
    let mut groups: Vec<(K, Vec<&'a T>)> = Vec::new();
    for item in items {
        let k = key(item);
        match index.get(&k) {
            Some(&i) => groups[i].1.push(item),
            None => {
                index.insert(k.clone(), groups.len());
                groups.push((k, vec![item]));
            }
        }
    }
    groups
}
