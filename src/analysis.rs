//! Per-trial analysis.
//!
//! Turns the logs of one trial folder into a [`TrialRow`]: summed offered and
//! achieved load over every client host (and every worker thread where the
//! variant has them), plus latency statistics over the merged samples of all
//! workers.
//!
//! Scatter-gather clients report through their stdout and a single latency
//! log. The mlx5 and key-value clients write a JSON statistics record and a
//! latency log per thread.

use crate::config::AnalysisConfig;
use crate::error::SweepError;
use crate::iteration::{Benchmark, Iteration};
use crate::metrics::{LatencyMerger, LatencySummary};
use crate::parser::{
    latency_log_path, stdout_log_path, thread_latency_log_path, thread_stats_path, LogParser,
};
use crate::utils::{format_latency_us, format_message_rate, tput_gbps};
use std::path::Path;
use tracing::{info, warn};

/// Offered and achieved load, summed over workers.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoadTotals {
    pub offered_pps: f64,
    pub offered_gbps: f64,
    pub achieved_pps: f64,
    pub achieved_gbps: f64,
    pub retries: u64,
}

impl LoadTotals {
    fn add(&mut self, other: &LoadTotals) {
        self.offered_pps += other.offered_pps;
        self.offered_gbps += other.offered_gbps;
        self.achieved_pps += other.achieved_pps;
        self.achieved_gbps += other.achieved_gbps;
        self.retries += other.retries;
    }

    pub fn percent_achieved(&self) -> f64 {
        self.achieved_pps / self.offered_pps
    }
}

/// One row of the per-trial CSV.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialRow {
    pub axis_names: &'static [&'static str],
    pub axis_values: Vec<String>,
    pub load: LoadTotals,
    /// Latency in the unit the clients logged.
    pub latency: LatencySummary,
}

impl TrialRow {
    pub fn percent_achieved_rate(&self) -> f64 {
        self.load.percent_achieved()
    }
}

/// Analyses trial folders under a results root.
pub struct TrialAnalyzer {
    parser: LogParser,
    client_hosts: Vec<String>,
    print_stats: bool,
}

impl TrialAnalyzer {
    /// `client_hosts` are the candidate clients in rate assignment order.
    pub fn new(config: &AnalysisConfig, client_hosts: Vec<String>, print_stats: bool) -> Self {
        Self {
            parser: LogParser::new(config.strip_threshold),
            client_hosts,
            print_stats,
        }
    }

    /// Analyse one iteration. Recoverable errors mean the row is skipped.
    pub fn analyze_iteration(&self, root: &Path, iteration: &Iteration) -> Result<TrialRow, SweepError> {
        let folder = iteration.key()?.full_path(root);
        iteration.rates().check_capacity(self.client_hosts.len())?;
        let clients = iteration.rates().iteration_clients(&self.client_hosts);

        let mut merger = LatencyMerger::new();
        let mut totals = LoadTotals::default();
        match iteration.benchmark() {
            Benchmark::ScatterGather(_) => {
                for host in clients {
                    let host_load = self.stdout_host(&folder, iteration, clients, host, &mut merger)?;
                    totals.add(&host_load);
                }
            }
            Benchmark::Mlx5(_) | Benchmark::KvStore(_) => {
                for host in clients {
                    for thread in 0..iteration.num_threads() {
                        let thread_load =
                            self.thread_stats_host(&folder, host, thread, &mut merger)?;
                        totals.add(&thread_load);
                    }
                }
            }
        }

        let latency = merger.summary()?;
        if self.print_stats {
            log_stats("Total Stats", &totals, &latency);
        }
        Ok(TrialRow {
            axis_names: iteration.benchmark().axis_names(),
            axis_values: iteration.axis_values(),
            load: totals,
            latency,
        })
    }

    fn stdout_host(
        &self,
        folder: &Path,
        iteration: &Iteration,
        clients: &[String],
        host: &str,
        merger: &mut LatencyMerger,
    ) -> Result<LoadTotals, SweepError> {
        let run = self.parser.parse_stdout_log(&stdout_log_path(folder, host))?;
        let latencies = self.parser.parse_latency_log(&latency_log_path(folder, host))?;
        if latencies.is_empty() {
            return Err(SweepError::NoLatencyData);
        }

        let size = iteration.total_size();
        let offered = iteration.rates().find_rate(clients, host)? as f64;
        let achieved = run.achieved_rate();
        let load = LoadTotals {
            offered_pps: offered,
            offered_gbps: tput_gbps(offered, size),
            achieved_pps: achieved,
            achieved_gbps: tput_gbps(achieved, size),
            retries: 0,
        };
        if self.print_stats {
            log_stats(&format!("Client {}", host), &load, &LatencySummary::from_sorted(&latencies)?);
        }
        merger.add_worker(latencies);
        Ok(load)
    }

    fn thread_stats_host(
        &self,
        folder: &Path,
        host: &str,
        thread: usize,
        merger: &mut LatencyMerger,
    ) -> Result<LoadTotals, SweepError> {
        let latencies = self
            .parser
            .parse_latency_log(&thread_latency_log_path(folder, host, thread))?;
        if latencies.is_empty() {
            return Err(SweepError::NoLatencyData);
        }
        let stats = self
            .parser
            .read_thread_stats(&thread_stats_path(folder, host), thread)?;
        let load = LoadTotals {
            offered_pps: stats.offered_load_pps,
            offered_gbps: stats.offered_load_gbps,
            achieved_pps: stats.achieved_load_pps,
            achieved_gbps: stats.achieved_load_gbps,
            retries: stats.retries,
        };
        if self.print_stats {
            log_stats(
                &format!("Client {}, Thread {}", host, thread),
                &load,
                &LatencySummary::from_sorted(&latencies)?,
            );
        }
        merger.add_worker(latencies);
        Ok(load)
    }

    /// Analyse a batch, skipping iterations whose logs are missing or bad.
    ///
    /// Only fatal errors abort the batch.
    pub fn analyze_all<'a, I>(&self, root: &Path, iterations: I) -> Result<Vec<TrialRow>, SweepError>
    where
        I: IntoIterator<Item = &'a Iteration>,
    {
        let mut rows = Vec::new();
        let mut skipped = 0;
        for iteration in iterations {
            match self.analyze_iteration(root, iteration) {
                Ok(row) => rows.push(row),
                Err(e) if e.is_recoverable() => {
                    skipped += 1;
                    warn!("Skipping {}: {}", iteration.key()?, e);
                }
                Err(e) => return Err(e),
            }
        }
        info!("Analysed {} trials, skipped {}", rows.len(), skipped);
        Ok(rows)
    }
}

fn log_stats(label: &str, load: &LoadTotals, latency: &LatencySummary) {
    info!(
        "{}: offered load: {} | {:.4} Gbps, achieved load: {} | {:.4} Gbps, \
         percentage achieved rate: {:.4}, retries: {}, avg latency: {}, p99: {}, p999: {}, median: {}",
        label,
        format_message_rate(load.offered_pps),
        load.offered_gbps,
        format_message_rate(load.achieved_pps),
        load.achieved_gbps,
        load.percent_achieved(),
        load.retries,
        format_latency_us(latency.mean),
        format_latency_us(latency.p99),
        format_latency_us(latency.p999),
        format_latency_us(latency.median),
    );
}
