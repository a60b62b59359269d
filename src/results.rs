//! CSV output of the analysis pipeline.
//!
//! Two tables are written. The per-trial table has one row per analysed
//! trial: the axis columns of the variant followed by [`TRIAL_COLUMNS`]. The
//! summary table has one row per configuration: the same axis columns
//! followed by [`SUMMARY_COLUMNS`].
//!
//! The per-trial table is also read back for summarising, so the reader does
//! not know the variant: every column before `offered_load_pps` is an axis.

use crate::analysis::TrialRow;
use crate::error::SweepError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Measurement columns of the per-trial table, after the axis columns.
pub const TRIAL_COLUMNS: [&str; 9] = [
    "offered_load_pps",
    "offered_load_gbps",
    "achieved_load_pps",
    "achieved_load_gbps",
    "percent_achieved_rate",
    "avg",
    "median",
    "p99",
    "p999",
];

/// Columns of the summary table, after the axis columns.
pub const SUMMARY_COLUMNS: [&str; 8] = [
    "mp99",
    "p99sd",
    "mmedian",
    "mediansd",
    "maxtputpps",
    "maxtputgbps",
    "maxtputppssd",
    "maxtputgbpssd",
];

/// Measurements of one trial, as stored in the per-trial table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrialMeasurement {
    pub offered_load_pps: f64,
    pub offered_load_gbps: f64,
    pub achieved_load_pps: f64,
    pub achieved_load_gbps: f64,
    pub percent_achieved_rate: f64,
    pub avg: f64,
    pub median: f64,
    pub p99: f64,
    pub p999: f64,
}

impl TrialMeasurement {
    fn to_fields(self) -> [f64; 9] {
        [
            self.offered_load_pps,
            self.offered_load_gbps,
            self.achieved_load_pps,
            self.achieved_load_gbps,
            self.percent_achieved_rate,
            self.avg,
            self.median,
            self.p99,
            self.p999,
        ]
    }

    fn from_fields(f: &[f64]) -> Self {
        Self {
            offered_load_pps: f[0],
            offered_load_gbps: f[1],
            achieved_load_pps: f[2],
            achieved_load_gbps: f[3],
            percent_achieved_rate: f[4],
            avg: f[5],
            median: f[6],
            p99: f[7],
            p999: f[8],
        }
    }
}

impl From<&TrialRow> for TrialMeasurement {
    fn from(row: &TrialRow) -> Self {
        Self {
            offered_load_pps: row.load.offered_pps,
            offered_load_gbps: row.load.offered_gbps,
            achieved_load_pps: row.load.achieved_pps,
            achieved_load_gbps: row.load.achieved_gbps,
            percent_achieved_rate: row.percent_achieved_rate(),
            avg: row.latency.mean,
            median: row.latency.median,
            p99: row.latency.p99,
            p999: row.latency.p999,
        }
    }
}

/// One row of the per-trial table.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialRecord {
    pub axis_values: Vec<String>,
    pub measurement: TrialMeasurement,
}

/// The per-trial table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrialTable {
    pub axis_names: Vec<String>,
    pub records: Vec<TrialRecord>,
}

impl TrialTable {
    pub fn new(axis_names: Vec<String>) -> Self {
        Self {
            axis_names,
            records: Vec::new(),
        }
    }

    /// Append a record, checking it has one value per axis.
    pub fn push(&mut self, axis_values: Vec<String>, measurement: TrialMeasurement) -> Result<(), SweepError> {
        if axis_values.len() != self.axis_names.len() {
            return Err(SweepError::AxisMismatch {
                expected: self.axis_names.len(),
                found: axis_values.len(),
            });
        }
        self.records.push(TrialRecord {
            axis_values,
            measurement,
        });
        Ok(())
    }

    /// Build the table from analysed rows of a variant with `axis_names`.
    ///
    /// The axis columns come from the variant, not the rows, so a batch where
    /// every iteration was skipped still writes the full header.
    pub fn from_rows(axis_names: &[&str], rows: &[TrialRow]) -> Result<Self, SweepError> {
        let mut table = Self::new(axis_names.iter().map(|s| s.to_string()).collect());
        for row in rows {
            if row.axis_names != axis_names {
                return Err(SweepError::AxisMismatch {
                    expected: axis_names.len(),
                    found: row.axis_names.len(),
                });
            }
            table.push(row.axis_values.clone(), TrialMeasurement::from(row))?;
        }
        Ok(table)
    }

    pub fn header(&self) -> Vec<String> {
        self.axis_names
            .iter()
            .cloned()
            .chain(TRIAL_COLUMNS.iter().map(|s| s.to_string()))
            .collect()
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("creating {:?}", path))?;
        writer.write_record(self.header())?;
        for record in &self.records {
            let measured = record.measurement.to_fields();
            let fields = record
                .axis_values
                .iter()
                .cloned()
                .chain(measured.iter().map(|v| v.to_string()));
            writer.write_record(fields)?;
        }
        writer.flush()?;
        debug!("Wrote {} trial rows to {:?}", self.records.len(), path);
        Ok(())
    }

    pub fn read_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("opening {:?}", path))?;
        let header = reader.headers()?.clone();
        let split = header
            .iter()
            .position(|name| name == TRIAL_COLUMNS[0])
            .with_context(|| format!("{:?} has no {} column", path, TRIAL_COLUMNS[0]))?;
        let measured: Vec<&str> = header.iter().skip(split).collect();
        if measured != TRIAL_COLUMNS {
            anyhow::bail!("{:?}: unexpected measurement columns {:?}", path, measured);
        }

        let mut table = Self::new(header.iter().take(split).map(str::to_string).collect());
        for (line, record) in reader.records().enumerate() {
            let record = record?;
            let fields = record
                .iter()
                .skip(split)
                .map(|v| v.trim().parse::<f64>())
                .collect::<Result<Vec<f64>, _>>()
                .with_context(|| format!("{:?}: bad number in row {}", path, line + 1))?;
            if fields.len() != TRIAL_COLUMNS.len() {
                anyhow::bail!("{:?}: row {} has {} measurements", path, line + 1, fields.len());
            }
            let axis_values = record.iter().take(split).map(str::to_string).collect();
            table.push(axis_values, TrialMeasurement::from_fields(&fields))?;
        }
        Ok(table)
    }
}

/// One row of the summary table.
#[derive(Debug, Clone, PartialEq)]
pub struct KneeRow {
    pub axis_values: Vec<String>,
    pub mp99: f64,
    pub p99sd: f64,
    pub mmedian: f64,
    pub mediansd: f64,
    pub maxtputpps: f64,
    pub maxtputgbps: f64,
    pub maxtputppssd: f64,
    pub maxtputgbpssd: f64,
}

impl KneeRow {
    fn fields(&self) -> [f64; 8] {
        [
            self.mp99,
            self.p99sd,
            self.mmedian,
            self.mediansd,
            self.maxtputpps,
            self.maxtputgbps,
            self.maxtputppssd,
            self.maxtputgbpssd,
        ]
    }
}

/// The summary table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SummaryTable {
    pub axis_names: Vec<String>,
    pub rows: Vec<KneeRow>,
}

impl SummaryTable {
    pub fn header(&self) -> Vec<String> {
        self.axis_names
            .iter()
            .cloned()
            .chain(SUMMARY_COLUMNS.iter().map(|s| s.to_string()))
            .collect()
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("creating {:?}", path))?;
        writer.write_record(self.header())?;
        for row in &self.rows {
            let measured = row.fields();
            let fields = row
                .axis_values
                .iter()
                .cloned()
                .chain(measured.iter().map(|v| v.to_string()));
            writer.write_record(fields)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Where the tables of one results folder live.
pub struct ResultsManager {
    trials_file: PathBuf,
    summary_file: PathBuf,
}

impl ResultsManager {
    /// Tables named relative to `folder` unless given as absolute paths.
    pub fn new(folder: &Path, trials_file: &Path, summary_file: &Path) -> Self {
        Self {
            trials_file: folder.join(trials_file),
            summary_file: folder.join(summary_file),
        }
    }

    pub fn trials_file(&self) -> &Path {
        &self.trials_file
    }

    pub fn summary_file(&self) -> &Path {
        &self.summary_file
    }

    pub fn write_trials(&self, table: &TrialTable) -> Result<()> {
        table.write_csv(&self.trials_file)?;
        info!(
            "Wrote {} trial rows to {:?}",
            table.records.len(),
            self.trials_file
        );
        Ok(())
    }

    pub fn read_trials(&self) -> Result<TrialTable> {
        TrialTable::read_csv(&self.trials_file)
    }

    pub fn write_summary(&self, table: &SummaryTable) -> Result<()> {
        table.write_csv(&self.summary_file)?;
        info!(
            "Wrote {} summary rows to {:?}",
            table.rows.len(),
            self.summary_file
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn measurement(offered: f64, achieved: f64) -> TrialMeasurement {
        TrialMeasurement {
            offered_load_pps: offered,
            offered_load_gbps: offered * 1e-6,
            achieved_load_pps: achieved,
            achieved_load_gbps: achieved * 1e-6,
            percent_achieved_rate: achieved / offered,
            avg: 12000.5,
            median: 11000.0,
            p99: 20000.0,
            p999: 25000.0,
        }
    }

    #[test]
    fn test_trial_table_header() {
        let table = TrialTable::new(vec!["segment_size".to_string(), "num_mbufs".to_string()]);
        assert_eq!(
            table.header().join(","),
            "segment_size,num_mbufs,offered_load_pps,offered_load_gbps,achieved_load_pps,\
             achieved_load_gbps,percent_achieved_rate,avg,median,p99,p999"
        );
    }

    #[test]
    fn test_push_checks_axis_count() {
        let mut table = TrialTable::new(vec!["segment_size".to_string()]);
        assert!(matches!(
            table.push(vec!["1".to_string(), "2".to_string()], measurement(1.0, 1.0)),
            Err(SweepError::AxisMismatch { expected: 1, found: 2 })
        ));
    }

    #[test]
    fn test_trial_table_survives_disk() {
        let dir = TempDir::new().unwrap();
        let results = ResultsManager::new(dir.path(), Path::new("trials.csv"), Path::new("summary.csv"));

        let mut table = TrialTable::new(vec!["system".to_string(), "with_copy".to_string()]);
        table
            .push(vec!["redis".to_string(), "true".to_string()], measurement(1000.0, 990.0))
            .unwrap();
        table
            .push(vec!["redis".to_string(), "false".to_string()], measurement(2000.0, 1500.0))
            .unwrap();
        results.write_trials(&table).unwrap();

        let back = results.read_trials().unwrap();
        assert_eq!(back, table);
    }

    #[test]
    fn test_read_rejects_foreign_csv() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("other.csv");
        std::fs::write(&path, "a,b\n1,2\n").unwrap();
        assert!(TrialTable::read_csv(&path).is_err());
    }

    #[test]
    fn test_all_skipped_batch_keeps_axis_columns() {
        let dir = TempDir::new().unwrap();
        let results = ResultsManager::new(dir.path(), Path::new("trials.csv"), Path::new("summary.csv"));
        let axes = ["segment_size", "num_mbufs", "with_copy", "as_one"];

        let table = TrialTable::from_rows(&axes, &[]).unwrap();
        assert_eq!(table.header().len(), axes.len() + TRIAL_COLUMNS.len());
        results.write_trials(&table).unwrap();

        let back = results.read_trials().unwrap();
        assert_eq!(back.axis_names, axes);
        assert!(back.records.is_empty());
    }

    #[test]
    fn test_summary_table_written() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("summary.csv");
        let table = SummaryTable {
            axis_names: vec!["segment_size".to_string()],
            rows: vec![KneeRow {
                axis_values: vec!["512".to_string()],
                mp99: 20.0,
                p99sd: 1.5,
                mmedian: 10.0,
                mediansd: 0.5,
                maxtputpps: 250000.0,
                maxtputgbps: 1.024,
                maxtputppssd: 5.0,
                maxtputgbpssd: 0.0,
            }],
        };
        table.write_csv(&path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "512,20,1.5,10,0.5,250000,1.024,5,0");
    }

    #[test]
    fn test_summary_header() {
        let table = SummaryTable {
            axis_names: vec!["segment_size".to_string()],
            rows: Vec::new(),
        };
        assert_eq!(
            table.header().join(","),
            "segment_size,mp99,p99sd,mmedian,mediansd,maxtputpps,maxtputgbps,maxtputppssd,maxtputgbpssd"
        );
    }
}
