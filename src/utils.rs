//! # Utility Functions and Helper Module
//!
//! Small numeric and formatting helpers shared by sweep generation and
//! results analysis.
//!
//! ## Key Functionality Categories
//!
//! - **Throughput conversion**: packets/s and message size to Gbps
//! - **Statistics**: population mean and standard deviation
//! - **Formatting**: human-readable rates and latencies for log output
//! - **Validation**: input parameter checks with clear error messages
//!
//! ## Usage Examples
//!
//! ```rust
//! use sweep_bench::utils::*;
//!
//! // 1M packets/s of 1250 bytes is 10 Gbps
//! assert_eq!(tput_gbps(1_000_000.0, 1250), 10.0);
//!
//! let (mean, std_dev) = mean_and_std(&[2.0, 4.0]);
//! assert_eq!(mean, 3.0);
//! assert_eq!(std_dev, 1.0);
//! ```

use anyhow::Result;

/// Convert a packet rate and a message size into gigabits per second
///
/// ## Parameters
/// - `pps`: Packets (requests) per second
/// - `message_size`: Bytes per packet
///
/// ## Returns
/// Throughput in Gbps (`pps * bytes * 8 / 1e9`)
///
/// ## Usage Context
///
/// Used both when deriving sweep rates (to keep the offered load under the
/// link ceiling) and when reporting offered/achieved load of a trial.
pub fn tput_gbps(pps: f64, message_size: usize) -> f64 {
    pps * (message_size as f64) * 8.0 / 1e9
}

/// Mean and population standard deviation of `values`
///
/// Returns `(NaN, NaN)` for an empty slice so that a missing group shows up
/// as `NaN` in the summary instead of a misleading zero.
pub fn mean_and_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let count = values.len() as f64;
    let mean = values.iter().sum::<f64>() / count;
    let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / count;
    (mean, variance.sqrt())
}

/// Format a message rate for log output
///
/// ## Examples
///
/// ```rust
/// # use sweep_bench::utils::format_message_rate;
/// assert_eq!(format_message_rate(500.0), "500 req/s");
/// assert_eq!(format_message_rate(1500.0), "1.50K req/s");
/// assert_eq!(format_message_rate(1500000.0), "1.50M req/s");
/// ```
pub fn format_message_rate(per_second: f64) -> String {
    if per_second < 1_000.0 {
        format!("{:.0} req/s", per_second)
    } else if per_second < 1_000_000.0 {
        format!("{:.2}K req/s", per_second / 1_000.0)
    } else {
        format!("{:.2}M req/s", per_second / 1_000_000.0)
    }
}

/// Format a latency recorded in nanoseconds as microseconds
pub fn format_latency_us(latency_ns: f64) -> String {
    format!("{:.4} μs", latency_ns / 1_000.0)
}

/// Validate that a size-like sweep parameter is non-zero
///
/// ## Returns
/// - `Ok(())`: Value is usable
/// - `Err(anyhow::Error)`: Value is zero, with the parameter name in the message
pub fn validate_positive(name: &str, value: usize) -> Result<()> {
    if value == 0 {
        anyhow::bail!("{} cannot be zero", name);
    }
    Ok(())
}

/// Validate that a fraction lies in `[0, 1]`
///
/// Used for the outlier strip fraction and the saturation threshold.
pub fn validate_fraction(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        anyhow::bail!("{} must be within [0, 1], got {}", name, value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test Gbps conversion against hand-computed values
    #[test]
    fn test_tput_gbps() {
        assert_eq!(tput_gbps(1_000_000.0, 1250), 10.0);
        assert_eq!(tput_gbps(0.0, 4096), 0.0);
        assert!((tput_gbps(100_000.0, 2048) - 1.6384).abs() < 1e-9);
    }

    /// Population convention: a single sample has zero spread
    #[test]
    fn test_mean_and_std() {
        assert_eq!(mean_and_std(&[7.0]), (7.0, 0.0));
        let (mean, std_dev) = mean_and_std(&[]);
        assert!(mean.is_nan());
        assert!(std_dev.is_nan());
    }

    #[test]
    fn test_format_message_rate() {
        assert_eq!(format_message_rate(500.0), "500 req/s");
        assert_eq!(format_message_rate(1500.0), "1.50K req/s");
        assert_eq!(format_message_rate(1500000.0), "1.50M req/s");
        assert_eq!(format_latency_us(1500.0), "1.5000 μs");
    }

    #[test]
    fn test_validation() {
        assert!(validate_positive("segment_size", 1).is_ok());
        assert!(validate_positive("segment_size", 0).is_err());
        assert!(validate_fraction("strip", 0.03).is_ok());
        assert!(validate_fraction("strip", 1.5).is_err());
        assert!(validate_fraction("strip", -0.1).is_err());
    }
}
