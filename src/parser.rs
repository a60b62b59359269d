//! Readers for the logs the benchmark programs leave in a trial folder.
//!
//! Three sources are understood:
//! - the client's free-text stdout, from which the run time and packet
//!   counts are taken;
//! - `{host}.threads.log`, a JSON array with one statistics record per
//!   worker thread;
//! - latency logs, one floating point sample per line.
//!
//! Every failure here is a [`SweepError`] for which `is_recoverable()` holds:
//! the caller skips the iteration and keeps going.

use crate::error::SweepError;
use crate::metrics::strip_low_fraction;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

const RUN_PREFIX: &str = "Ran for ";
const RECEIVED_PREFIX: &str = "Num fully received: ";

/// Stdout log of a client host.
pub fn stdout_log_path(folder: &Path, host: &str) -> PathBuf {
    folder.join(format!("{}.log", host))
}

/// Single latency log of a scatter-gather client host.
pub fn latency_log_path(folder: &Path, host: &str) -> PathBuf {
    folder.join(format!("{}.latency.log", host))
}

/// Latency log of one worker thread.
pub fn thread_latency_log_path(folder: &Path, host: &str, thread: usize) -> PathBuf {
    folder.join(format!("{}.latency-t{}.log", host, thread))
}

/// Per-thread statistics of a client host.
pub fn thread_stats_path(folder: &Path, host: &str) -> PathBuf {
    folder.join(format!("{}.threads.log", host))
}

/// Facts reported on a client's stdout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClientRunInfo {
    /// Seconds the client was sending.
    pub total_time: f64,
    pub pkts_sent: u64,
    /// Absent when the client did not print its receive summary.
    pub pkts_received: Option<u64>,
}

impl ClientRunInfo {
    /// Packets per second actually sent.
    pub fn achieved_rate(&self) -> f64 {
        self.pkts_sent as f64 / self.total_time
    }
}

/// One worker thread's record in `{host}.threads.log`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThreadStats {
    pub offered_load_pps: f64,
    pub offered_load_gbps: f64,
    pub achieved_load_pps: f64,
    pub achieved_load_gbps: f64,
    pub retries: u64,
}

/// `Ran for {seconds} seconds, sent {count} packets.`
pub fn parse_run_line(line: &str) -> Option<(f64, u64)> {
    let rest = line.strip_prefix(RUN_PREFIX)?;
    let (time, rest) = rest.split_once(" seconds, sent ")?;
    let sent = rest.strip_suffix(" packets.")?;
    Some((time.trim().parse().ok()?, sent.trim().parse().ok()?))
}

/// `Num fully received: {count}, packets per bucket: {..}, total_count: {..}.`
pub fn parse_received_line(line: &str) -> Option<u64> {
    let rest = line.strip_prefix(RECEIVED_PREFIX)?;
    let (received, rest) = rest.split_once(", packets per bucket: ")?;
    if !rest.contains(", total_count: ") || !rest.ends_with('.') {
        return None;
    }
    received.trim().parse().ok()
}

/// Parses the logs of one trial folder.
#[derive(Debug, Clone, Copy)]
pub struct LogParser {
    strip_threshold: f64,
}

impl LogParser {
    pub fn new(strip_threshold: f64) -> Self {
        Self { strip_threshold }
    }

    /// Read a client's stdout log.
    ///
    /// Lines starting with a known prefix must match their full template;
    /// any other line is ignored. The run line is required.
    pub fn parse_stdout_log(&self, path: &Path) -> Result<ClientRunInfo, SweepError> {
        let text = read_log(path)?;
        let mismatch = |line: &str| SweepError::ParseMismatch {
            path: path.to_path_buf(),
            line: line.to_string(),
        };

        let mut run = None;
        let mut pkts_received = None;
        for line in text.lines().map(str::trim) {
            if line.starts_with(RUN_PREFIX) {
                run = Some(parse_run_line(line).ok_or_else(|| mismatch(line))?);
            } else if line.starts_with(RECEIVED_PREFIX) {
                pkts_received = Some(parse_received_line(line).ok_or_else(|| mismatch(line))?);
            }
        }

        let (total_time, pkts_sent) = run.ok_or_else(|| mismatch("<missing run summary>"))?;
        if total_time <= 0.0 {
            return Err(mismatch("<non-positive run time>"));
        }
        Ok(ClientRunInfo {
            total_time,
            pkts_sent,
            pkts_received,
        })
    }

    /// Statistics of `thread` from a host's threads log.
    pub fn read_thread_stats(&self, path: &Path, thread: usize) -> Result<ThreadStats, SweepError> {
        let text = read_log(path)?;
        let records: Vec<ThreadStats> =
            serde_json::from_str(&text).map_err(|e| SweepError::ParseMismatch {
                path: path.to_path_buf(),
                line: e.to_string(),
            })?;
        records
            .get(thread)
            .copied()
            .ok_or_else(|| SweepError::MissingThreadStats {
                path: path.to_path_buf(),
                thread,
            })
    }

    /// Sorted latency samples of one log with the low-end outliers removed.
    pub fn parse_latency_log(&self, path: &Path) -> Result<Vec<f64>, SweepError> {
        let text = read_log(path)?;
        let mut samples = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                line.parse::<f64>().map_err(|_| SweepError::ParseMismatch {
                    path: path.to_path_buf(),
                    line: line.to_string(),
                })
            })
            .collect::<Result<Vec<f64>, SweepError>>()?;
        samples.sort_by(f64::total_cmp);

        let kept = strip_low_fraction(&samples, self.strip_threshold).len();
        let stripped = samples.len() - kept;
        debug!("{:?}: {} samples, stripped {}", path, samples.len(), stripped);
        samples.drain(..stripped);
        Ok(samples)
    }
}

fn read_log(path: &Path) -> Result<String, SweepError> {
    std::fs::read_to_string(path).map_err(|_| SweepError::MissingLogFile(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_run_line() {
        assert_eq!(
            parse_run_line("Ran for 30.5 seconds, sent 3050000 packets."),
            Some((30.5, 3050000))
        );
        assert_eq!(parse_run_line("Ran for 30.5 seconds, sent many packets."), None);
        assert_eq!(parse_run_line("Ran for 30.5 seconds"), None);
    }

    #[test]
    fn test_parse_received_line() {
        assert_eq!(
            parse_received_line(
                "Num fully received: 2999000, packets per bucket: {0: 10, 1: 20}, total_count: 3000000."
            ),
            Some(2999000)
        );
        assert_eq!(parse_received_line("Num fully received: 10"), None);
    }

    #[test]
    fn test_stdout_log() {
        let dir = TempDir::new().unwrap();
        let path = stdout_log_path(dir.path(), "client1");
        std::fs::write(
            &path,
            "starting client\n\
             Ran for 10 seconds, sent 1000000 packets.\n\
             Num fully received: 999000, packets per bucket: [], total_count: 1000000.\n",
        )
        .unwrap();

        let info = LogParser::new(0.03).parse_stdout_log(&path).unwrap();
        assert_eq!(info.total_time, 10.0);
        assert_eq!(info.pkts_sent, 1000000);
        assert_eq!(info.pkts_received, Some(999000));
        assert_eq!(info.achieved_rate(), 100000.0);
    }

    #[test]
    fn test_stdout_log_failures_are_recoverable() {
        let dir = TempDir::new().unwrap();
        let parser = LogParser::new(0.03);

        let missing = parser
            .parse_stdout_log(&stdout_log_path(dir.path(), "nobody"))
            .unwrap_err();
        assert!(matches!(missing, SweepError::MissingLogFile(_)));
        assert!(missing.is_recoverable());

        let path = stdout_log_path(dir.path(), "client1");
        std::fs::write(&path, "Ran for ten seconds, sent 5 packets.\n").unwrap();
        let err = parser.parse_stdout_log(&path).unwrap_err();
        assert!(matches!(err, SweepError::ParseMismatch { .. }));
        assert!(err.is_recoverable());

        std::fs::write(&path, "no summary here\n").unwrap();
        assert!(matches!(
            parser.parse_stdout_log(&path),
            Err(SweepError::ParseMismatch { .. })
        ));
    }

    #[test]
    fn test_read_thread_stats() {
        let dir = TempDir::new().unwrap();
        let path = thread_stats_path(dir.path(), "client1");
        std::fs::write(
            &path,
            r#"[
                {"offered_load_pps": 100.0, "offered_load_gbps": 0.1,
                 "achieved_load_pps": 90.0, "achieved_load_gbps": 0.09, "retries": 2},
                {"offered_load_pps": 200.0, "offered_load_gbps": 0.2,
                 "achieved_load_pps": 180.0, "achieved_load_gbps": 0.18, "retries": 0}
            ]"#,
        )
        .unwrap();

        let parser = LogParser::new(0.03);
        let stats = parser.read_thread_stats(&path, 1).unwrap();
        assert_eq!(stats.offered_load_pps, 200.0);
        assert_eq!(stats.retries, 0);
        assert!(matches!(
            parser.read_thread_stats(&path, 2),
            Err(SweepError::MissingThreadStats { thread: 2, .. })
        ));

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            parser.read_thread_stats(&path, 0),
            Err(SweepError::ParseMismatch { .. })
        ));
    }

    #[test]
    fn test_latency_log_sorted_and_stripped() {
        let dir = TempDir::new().unwrap();
        let path = thread_latency_log_path(dir.path(), "client1", 0);
        let body: String = (1..=100).rev().map(|v| format!("{}\n", v)).collect();
        std::fs::write(&path, body).unwrap();

        let samples = LogParser::new(0.03).parse_latency_log(&path).unwrap();
        assert_eq!(samples.len(), 97);
        assert_eq!(samples[0], 4.0);
        assert_eq!(samples[96], 100.0);

        let unstripped = LogParser::new(0.0).parse_latency_log(&path).unwrap();
        assert_eq!(unstripped.len(), 100);

        std::fs::write(&path, "12.5\nabc\n").unwrap();
        assert!(matches!(
            LogParser::new(0.0).parse_latency_log(&path),
            Err(SweepError::ParseMismatch { .. })
        ));
    }
}
