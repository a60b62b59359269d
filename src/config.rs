//! Machine and analysis configuration.

use crate::defaults;
use crate::error::SweepError;
use crate::utils::validate_fraction;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Addresses of one host taking part in the experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub ip: String,
    pub mac: String,
}

/// DPDK initialisation arguments shared by the datapath programs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DpdkConfig {
    #[serde(default)]
    pub eal_init: Vec<String>,
    #[serde(default)]
    pub pci_addr: String,
}

/// Description of the cluster a sweep runs on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Upper bound on client hosts any iteration may use.
    pub max_clients: usize,
    /// Checkout of the benchmark programs on every host.
    pub cornflakes_dir: PathBuf,
    pub hosts: BTreeMap<String, HostInfo>,
    pub server_hosts: Vec<String>,
    /// Candidate client hosts, in the order rates are assigned.
    pub client_hosts: Vec<String>,
    #[serde(default)]
    pub dpdk: Option<DpdkConfig>,
}

impl MachineConfig {
    /// Load and validate a JSON machine description.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading machine config {:?}", path))?;
        let config: MachineConfig = serde_json::from_str(&text)
            .with_context(|| format!("parsing machine config {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Every listed server and client must have addresses, and there must be
    /// a server and enough clients for `max_clients`.
    pub fn validate(&self) -> Result<(), SweepError> {
        if self.server_hosts.is_empty() {
            return Err(SweepError::InvalidParameter {
                name: "server_hosts",
                reason: "at least one server host is required".to_string(),
            });
        }
        if self.max_clients > self.client_hosts.len() {
            return Err(SweepError::ConfigurationExceeded {
                requested: self.max_clients,
                max: self.client_hosts.len(),
            });
        }
        for host in self.server_hosts.iter().chain(&self.client_hosts) {
            self.host(host)?;
        }
        Ok(())
    }

    pub fn host(&self, name: &str) -> Result<&HostInfo, SweepError> {
        self.hosts.get(name).ok_or_else(|| SweepError::HostNotFound {
            host: name.to_string(),
            candidates: self.hosts.keys().cloned().collect(),
        })
    }

    /// The server every iteration runs against.
    pub fn server(&self) -> &str {
        self.server_hosts.first().map(String::as_str).unwrap_or_default()
    }
}

/// Thresholds applied while turning logs into summaries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Fraction of the lowest latency samples dropped per worker log.
    pub strip_threshold: f64,
    /// Minimum achieved/offered ratio for a rate to count towards the knee.
    pub saturation_threshold: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            strip_threshold: defaults::STRIP_THRESHOLD,
            saturation_threshold: defaults::SATURATION_THRESHOLD,
        }
    }
}

impl AnalysisConfig {
    pub fn new(strip_threshold: f64, saturation_threshold: f64) -> Result<Self> {
        validate_fraction("strip_threshold", strip_threshold)?;
        validate_fraction("saturation_threshold", saturation_threshold)?;
        Ok(Self {
            strip_threshold,
            saturation_threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MACHINE_JSON: &str = r#"{
        "max_clients": 2,
        "cornflakes_dir": "/opt/cornflakes",
        "hosts": {
            "server": { "ip": "10.0.0.1", "mac": "aa:bb:cc:dd:ee:01" },
            "client1": { "ip": "10.0.0.2", "mac": "aa:bb:cc:dd:ee:02" },
            "client2": { "ip": "10.0.0.3", "mac": "aa:bb:cc:dd:ee:03" }
        },
        "server_hosts": ["server"],
        "client_hosts": ["client1", "client2"]
    }"#;

    #[test]
    fn test_machine_config_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("machine.json");
        std::fs::write(&path, MACHINE_JSON).unwrap();

        let config = MachineConfig::from_file(&path).unwrap();
        assert_eq!(config.max_clients, 2);
        assert_eq!(config.server(), "server");
        assert_eq!(config.host("client2").unwrap().ip, "10.0.0.3");
        assert!(config.dpdk.is_none());
        assert!(matches!(
            config.host("client9"),
            Err(SweepError::HostNotFound { .. })
        ));
    }

    #[test]
    fn test_machine_config_rejects_unknown_hosts() {
        let mut config: MachineConfig = serde_json::from_str(MACHINE_JSON).unwrap();
        config.client_hosts.push("client3".to_string());
        assert!(matches!(
            config.validate(),
            Err(SweepError::HostNotFound { .. })
        ));

        let mut config: MachineConfig = serde_json::from_str(MACHINE_JSON).unwrap();
        config.max_clients = 3;
        assert!(matches!(
            config.validate(),
            Err(SweepError::ConfigurationExceeded { requested: 3, max: 2 })
        ));
    }

    #[test]
    fn test_analysis_config_defaults_and_validation() {
        let config = AnalysisConfig::default();
        assert_eq!(config.strip_threshold, 0.03);
        assert_eq!(config.saturation_threshold, 0.95);
        assert!(AnalysisConfig::new(0.0, 0.9).is_ok());
        assert!(AnalysisConfig::new(1.2, 0.9).is_err());
    }
}
