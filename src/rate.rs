//! Client rate specifications.
//!
//! A [`RateSpec`] describes how many client workers send at which rate. The
//! canonical string form is `"{count}@{rate}"` pairs joined by commas, so
//! `2@300000,1@100000` means two clients at 300k packets/s and one client at
//! 100k packets/s. Order is significant: host `i` of an iteration is matched
//! to the `i`-th entry of the expanded rate list.

use crate::error::SweepError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One `(rate, count)` entry of a rate specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RateGroup {
    /// Packets per second sent by each worker in the group.
    pub rate: u64,
    /// Number of workers sending at `rate`.
    pub count: usize,
}

/// Ordered list of rate groups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct RateSpec {
    groups: Vec<RateGroup>,
}

impl RateSpec {
    /// Build a rate spec, rejecting empty specs and zero rates or counts.
    pub fn new(groups: Vec<RateGroup>) -> Result<Self, SweepError> {
        if groups.is_empty() {
            return Err(SweepError::InvalidParameter {
                name: "client_rates",
                reason: "at least one rate group is required".to_string(),
            });
        }
        if let Some(bad) = groups.iter().find(|g| g.rate == 0 || g.count == 0) {
            return Err(SweepError::InvalidParameter {
                name: "client_rates",
                reason: format!("rate and count must be positive, got {}@{}", bad.count, bad.rate),
            });
        }
        Ok(Self { groups })
    }

    /// `count` workers all sending at `rate`.
    pub fn uniform(rate: u64, count: usize) -> Result<Self, SweepError> {
        Self::new(vec![RateGroup { rate, count }])
    }

    /// Single group from derived values, clamped to at least one.
    pub(crate) fn from_positive(rate: u64, count: usize) -> Self {
        Self {
            groups: vec![RateGroup {
                rate: rate.max(1),
                count: count.max(1),
            }],
        }
    }

    pub fn groups(&self) -> &[RateGroup] {
        &self.groups
    }

    /// Total number of workers across all groups.
    pub fn total_workers(&self) -> usize {
        self.groups.iter().map(|g| g.count).sum()
    }

    /// Fail if these rates need more workers than `max` hosts.
    pub fn check_capacity(&self, max: usize) -> Result<(), SweepError> {
        let requested = self.total_workers();
        if requested > max {
            return Err(SweepError::ConfigurationExceeded { requested, max });
        }
        Ok(())
    }

    /// One rate per worker, in spec order.
    pub fn expand(&self) -> Vec<u64> {
        self.groups
            .iter()
            .flat_map(|g| std::iter::repeat(g.rate).take(g.count))
            .collect()
    }

    /// Sum of per-worker rates, saturating at `u64::MAX`.
    pub fn total_rate(&self) -> u64 {
        self.groups
            .iter()
            .map(|g| g.rate.saturating_mul(g.count as u64))
            .fold(0, u64::saturating_add)
    }

    /// The leading `total_workers()` hosts of `possible_hosts`.
    pub fn iteration_clients<'a>(&self, possible_hosts: &'a [String]) -> &'a [String] {
        let n = self.total_workers().min(possible_hosts.len());
        &possible_hosts[..n]
    }

    /// Rate assigned to `host`, matched by its position in `clients`.
    pub fn find_rate(&self, clients: &[String], host: &str) -> Result<u64, SweepError> {
        let rates = self.expand();
        clients
            .iter()
            .position(|candidate| candidate == host)
            .and_then(|idx| rates.get(idx).copied())
            .ok_or_else(|| SweepError::HostNotFound {
                host: host.to_string(),
                candidates: clients.to_vec(),
            })
    }
}

impl fmt::Display for RateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, group) in self.groups.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}@{}", group.count, group.rate)?;
        }
        Ok(())
    }
}

impl FromStr for RateSpec {
    type Err = SweepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| SweepError::InvalidParameter {
            name: "client_rates",
            reason,
        };
        let groups = s
            .split(',')
            .map(|part| {
                let (count, rate) = part
                    .trim()
                    .split_once('@')
                    .ok_or_else(|| invalid(format!("expected count@rate, got {:?}", part)))?;
                let count = count
                    .parse::<usize>()
                    .map_err(|e| invalid(format!("bad count {:?}: {}", count, e)))?;
                let rate = rate
                    .parse::<u64>()
                    .map_err(|e| invalid(format!("bad rate {:?}: {}", rate, e)))?;
                Ok(RateGroup { rate, count })
            })
            .collect::<Result<Vec<_>, SweepError>>()?;
        Self::new(groups)
    }
}

impl From<RateSpec> for String {
    fn from(spec: RateSpec) -> Self {
        spec.to_string()
    }
}

impl TryFrom<String> for RateSpec {
    type Error = SweepError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_total_workers_matches_group_counts() {
        let spec = RateSpec::new(vec![
            RateGroup { rate: 300000, count: 2 },
            RateGroup { rate: 100000, count: 1 },
        ])
        .unwrap();
        assert_eq!(spec.total_workers(), 3);
        assert_eq!(spec.expand(), vec![300000, 300000, 100000]);
        assert_eq!(spec.total_rate(), 700000);
    }

    #[test]
    fn test_total_rate_saturates_on_huge_rates() {
        let spec: RateSpec = format!("2@{},1@5", u64::MAX / 2 + 1).parse().unwrap();
        assert_eq!(spec.total_rate(), u64::MAX);
    }

    #[test]
    fn test_string_form() {
        let spec = RateSpec::new(vec![
            RateGroup { rate: 300000, count: 2 },
            RateGroup { rate: 100000, count: 1 },
        ])
        .unwrap();
        assert_eq!(spec.to_string(), "2@300000,1@100000");
        assert_eq!("2@300000,1@100000".parse::<RateSpec>().unwrap(), spec);
    }

    #[test]
    fn test_rejects_malformed_and_degenerate_specs() {
        assert!("".parse::<RateSpec>().is_err());
        assert!("2x300".parse::<RateSpec>().is_err());
        assert!("0@300".parse::<RateSpec>().is_err());
        assert!(RateSpec::uniform(0, 1).is_err());
        assert!(RateSpec::new(Vec::new()).is_err());
    }

    #[test]
    fn test_find_rate_by_position() {
        let spec = RateSpec::new(vec![
            RateGroup { rate: 300000, count: 2 },
            RateGroup { rate: 100000, count: 1 },
        ])
        .unwrap();
        let all = hosts(&["client1", "client2", "client3", "client4"]);
        let clients = spec.iteration_clients(&all);
        assert_eq!(clients.len(), 3);
        assert_eq!(spec.find_rate(clients, "client2").unwrap(), 300000);
        assert_eq!(spec.find_rate(clients, "client3").unwrap(), 100000);
        assert!(matches!(
            spec.find_rate(clients, "client4"),
            Err(SweepError::HostNotFound { .. })
        ));
    }

    #[test]
    fn test_check_capacity() {
        let spec = RateSpec::uniform(1000, 4).unwrap();
        assert!(spec.check_capacity(4).is_ok());
        assert!(matches!(
            spec.check_capacity(3),
            Err(SweepError::ConfigurationExceeded { requested: 4, max: 3 })
        ));
    }

    #[test]
    fn test_serde_uses_string_form() {
        let spec = RateSpec::uniform(300000, 2).unwrap();
        let json = serde_json::to_string(&spec).unwrap();
        assert_eq!(json, "\"2@300000\"");
        let back: RateSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }
}
