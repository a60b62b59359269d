//! Arguments for the external server and client programs.
//!
//! Each iteration runs one server and one client per participating host. The
//! argument sets are explicit structs validated at construction; `render()`
//! turns them into `--flag=value` vectors for the runner.

use crate::config::MachineConfig;
use crate::error::SweepError;
use crate::iteration::{Benchmark, Iteration};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Everything shared by the programs of one invocation.
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    pub machine: &'a MachineConfig,
    /// Results root; each trial writes below its own full path.
    pub root: &'a Path,
    pub run_time_secs: u64,
    pub random_seed: i64,
}

impl<'a> RunContext<'a> {
    pub fn new(machine: &'a MachineConfig, root: &'a Path, run_time_secs: u64) -> Result<Self, SweepError> {
        if run_time_secs == 0 {
            return Err(SweepError::InvalidParameter {
                name: "time",
                reason: "run time must be at least one second".to_string(),
            });
        }
        Ok(Self {
            machine,
            root,
            run_time_secs,
            random_seed: chrono::Utc::now().timestamp(),
        })
    }
}

/// Addresses of the server every program talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ServerEndpoint {
    ip: String,
    mac: String,
}

impl ServerEndpoint {
    fn resolve(machine: &MachineConfig) -> Result<Self, SweepError> {
        let info = machine.host(machine.server())?;
        Ok(Self {
            ip: info.ip.clone(),
            mac: info.mac.clone(),
        })
    }
}

fn flag(name: &str, value: impl std::fmt::Display) -> String {
    format!("--{}={}", name, value)
}

/// Flags describing the message layout, shared by both sides.
fn layout_flags(benchmark: &Benchmark, args: &mut Vec<String>) {
    match benchmark {
        Benchmark::ScatterGather(p) => {
            let (segment_size, num_mbufs) = p.copy.wire_layout(p.segment_size, p.num_mbufs);
            args.push(flag("segment_size", segment_size));
            args.push(flag("num_mbufs", num_mbufs));
            if p.copy.with_copy {
                args.push("--with_copy".to_string());
            }
        }
        Benchmark::Mlx5(p) => {
            let (segment_size, num_segments) = p.copy.wire_layout(p.segment_size, p.num_segments);
            args.push(flag("segment_size", segment_size));
            args.push(flag("num_segments", num_segments));
            args.push(flag("array_size", p.array_size));
            args.push(flag("busy_cycles", p.busy_cycles));
            if p.copy.with_copy {
                args.push("--with_copy".to_string());
            }
        }
        Benchmark::KvStore(p) => {
            args.push(flag("system", &p.system));
            args.push(flag("num_keys", p.num_keys));
            args.push(flag("num_values", p.num_values));
        }
    }
}

fn dpdk_flags(machine: &MachineConfig, benchmark: &Benchmark, args: &mut Vec<String>) {
    if let (Benchmark::Mlx5(_), Some(dpdk)) = (benchmark, &machine.dpdk) {
        args.push(flag("config_eal", dpdk.eal_init.join(" ")));
        args.push(flag("pci_addr", &dpdk.pci_addr));
    }
}

/// Arguments of the server program.
#[derive(Debug, Clone)]
pub struct ServerArgs {
    host: String,
    endpoint: ServerEndpoint,
    cornflakes_dir: PathBuf,
    folder: PathBuf,
    benchmark: Benchmark,
    num_machines: usize,
    random_seed: i64,
}

impl ServerArgs {
    pub fn new(iteration: &Iteration, ctx: &RunContext<'_>) -> Result<Self, SweepError> {
        let key = iteration.key()?;
        Ok(Self {
            host: ctx.machine.server().to_string(),
            endpoint: ServerEndpoint::resolve(ctx.machine)?,
            cornflakes_dir: ctx.machine.cornflakes_dir.clone(),
            folder: key.full_path(ctx.root),
            benchmark: iteration.benchmark().clone(),
            num_machines: iteration.num_clients(),
            random_seed: ctx.random_seed,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn render(&self, machine: &MachineConfig) -> Vec<String> {
        let mut args = vec![
            flag("cornflakes_dir", self.cornflakes_dir.display()),
            flag("server_ip", &self.endpoint.ip),
            flag("folder", self.folder.display()),
        ];
        dpdk_flags(machine, &self.benchmark, &mut args);
        layout_flags(&self.benchmark, &mut args);
        match &self.benchmark {
            Benchmark::ScatterGather(_) => {}
            Benchmark::Mlx5(p) => {
                args.push(flag("server_mac", &self.endpoint.mac));
                args.push(flag("num_threads", p.num_threads));
                args.push(flag("num_machines", self.num_machines));
                args.push(flag("random_seed", self.random_seed));
                if p.recv_pkt_size != 0 {
                    args.push("--read_incoming_packet".to_string());
                }
            }
            Benchmark::KvStore(p) => {
                args.push(flag("load_trace", &p.load_trace));
                args.push(flag("pinning_limit", p.zcc.pinning_limit));
                args.push(flag("pinning_segment_size", p.zcc.segment_size));
                args.push(flag("pinning_frequency", p.zcc.pinning_frequency));
                if p.zcc.register_at_start {
                    args.push("--register_at_start".to_string());
                }
            }
        }
        args
    }
}

/// Arguments of the client program on one host.
#[derive(Debug, Clone)]
pub struct ClientArgs {
    host: String,
    host_id: usize,
    client_ip: String,
    endpoint: ServerEndpoint,
    cornflakes_dir: PathBuf,
    folder: PathBuf,
    benchmark: Benchmark,
    rate: u64,
    run_time_secs: u64,
    num_machines: usize,
    random_seed: i64,
}

impl ClientArgs {
    /// Fails with `HostNotFound` unless `host` is one of the iteration's
    /// clients and has addresses in the machine config.
    pub fn new(iteration: &Iteration, host: &str, ctx: &RunContext<'_>) -> Result<Self, SweepError> {
        let key = iteration.key()?;
        let clients = iteration.rates().iteration_clients(&ctx.machine.client_hosts);
        let rate = iteration.rates().find_rate(clients, host)?;
        let host_id = clients
            .iter()
            .position(|c| c == host)
            .unwrap_or_default();
        Ok(Self {
            host: host.to_string(),
            host_id,
            client_ip: ctx.machine.host(host)?.ip.clone(),
            endpoint: ServerEndpoint::resolve(ctx.machine)?,
            cornflakes_dir: ctx.machine.cornflakes_dir.clone(),
            folder: key.full_path(ctx.root),
            benchmark: iteration.benchmark().clone(),
            rate,
            run_time_secs: ctx.run_time_secs,
            num_machines: iteration.num_clients(),
            random_seed: ctx.random_seed,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn rate(&self) -> u64 {
        self.rate
    }

    pub fn render(&self, machine: &MachineConfig) -> Vec<String> {
        let mut args = vec![
            flag("cornflakes_dir", self.cornflakes_dir.display()),
            flag("server_ip", &self.endpoint.ip),
            flag("server_mac", &self.endpoint.mac),
            flag("host_ip", &self.client_ip),
            flag("host_id", self.host_id),
            flag("rate", self.rate),
            flag("time", self.run_time_secs),
            flag("folder", self.folder.display()),
        ];
        dpdk_flags(machine, &self.benchmark, &mut args);
        layout_flags(&self.benchmark, &mut args);
        match &self.benchmark {
            Benchmark::ScatterGather(_) => {
                args.push(flag("latency_log", format!("{}.latency.log", self.host)));
            }
            Benchmark::Mlx5(p) => {
                args.push(flag("num_threads", p.num_threads));
                args.push(flag("num_machines", self.num_machines));
                args.push(flag("random_seed", self.random_seed));
                args.push(flag("latency_log", format!("{}.latency.log", self.host)));
                args.push(flag("threads_log", format!("{}.threads.log", self.host)));
                if p.recv_pkt_size != 0 {
                    args.push("--has_send_packet_size".to_string());
                    args.push(flag("send_packet_size", p.recv_pkt_size));
                }
            }
            Benchmark::KvStore(p) => {
                args.push(flag("num_threads", p.num_threads));
                args.push(flag("num_machines", self.num_machines));
                args.push(flag("size_distr", &p.size_distr));
                args.push(flag("value_size", p.avg_size));
                args.push(flag("queries", &p.access_trace));
                args.push(flag("latency_log", format!("{}.latency.log", self.host)));
                args.push(flag("threads_log", format!("{}.threads.log", self.host)));
            }
        }
        args
    }
}

/// One line of the `plan` output.
#[derive(Debug, Clone, Serialize)]
pub struct PlanEntry {
    pub key: String,
    pub folder: PathBuf,
    pub iteration: Iteration,
    pub server_host: String,
    pub server: Vec<String>,
    pub clients: BTreeMap<String, Vec<String>>,
}

impl PlanEntry {
    pub fn new(iteration: &Iteration, ctx: &RunContext<'_>) -> Result<Self, SweepError> {
        let key = iteration.key()?;
        let server = ServerArgs::new(iteration, ctx)?;
        let clients = iteration
            .rates()
            .iteration_clients(&ctx.machine.client_hosts)
            .iter()
            .map(|host| {
                ClientArgs::new(iteration, host, ctx)
                    .map(|args| (host.clone(), args.render(ctx.machine)))
            })
            .collect::<Result<BTreeMap<_, _>, SweepError>>()?;
        Ok(Self {
            key: key.to_string(),
            folder: key.full_path(ctx.root),
            iteration: iteration.clone(),
            server_host: server.host().to_string(),
            server: server.render(ctx.machine),
            clients,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostInfo;
    use crate::iteration::{CopyMode, Mlx5Params, ScatterGatherParams};
    use crate::rate::{RateGroup, RateSpec};

    fn machine() -> MachineConfig {
        let mut hosts = BTreeMap::new();
        for (i, name) in ["server", "client1", "client2", "client3"].iter().enumerate() {
            hosts.insert(
                name.to_string(),
                HostInfo {
                    ip: format!("10.0.0.{}", i + 1),
                    mac: format!("aa:bb:cc:dd:ee:0{}", i + 1),
                },
            );
        }
        MachineConfig {
            max_clients: 3,
            cornflakes_dir: PathBuf::from("/opt/cornflakes"),
            hosts,
            server_hosts: vec!["server".to_string()],
            client_hosts: vec!["client1".to_string(), "client2".to_string(), "client3".to_string()],
            dpdk: None,
        }
    }

    fn sg_iteration() -> Iteration {
        Iteration::new(
            RateSpec::new(vec![
                RateGroup { rate: 300000, count: 2 },
                RateGroup { rate: 100000, count: 1 },
            ])
            .unwrap(),
            Benchmark::ScatterGather(ScatterGatherParams {
                segment_size: 512,
                num_mbufs: 4,
                copy: CopyMode::WITH_COPY_ONE_BUFFER,
            }),
        )
        .with_trial(0)
    }

    #[test]
    fn test_client_args_rates_by_position() {
        let machine = machine();
        let ctx = RunContext::new(&machine, Path::new("/results"), 30).unwrap();
        let it = sg_iteration();

        let first = ClientArgs::new(&it, "client1", &ctx).unwrap();
        let third = ClientArgs::new(&it, "client3", &ctx).unwrap();
        assert_eq!(first.rate(), 300000);
        assert_eq!(third.rate(), 100000);

        let args = third.render(&machine);
        assert!(args.contains(&"--rate=100000".to_string()));
        assert!(args.contains(&"--host_id=2".to_string()));
        assert!(args.contains(&"--host_ip=10.0.0.4".to_string()));
        // One-buffer mode sends a single segment of the total size.
        assert!(args.contains(&"--segment_size=2048".to_string()));
        assert!(args.contains(&"--num_mbufs=1".to_string()));
        assert!(args.contains(&"--with_copy".to_string()));
        assert!(args.contains(&"--latency_log=client3.latency.log".to_string()));
    }

    #[test]
    fn test_client_args_rejects_non_participant() {
        let machine = machine();
        let ctx = RunContext::new(&machine, Path::new("/results"), 30).unwrap();
        let it = Iteration::new(RateSpec::uniform(1000, 1).unwrap(), sg_iteration().benchmark().clone())
            .with_trial(0);
        assert!(matches!(
            ClientArgs::new(&it, "client2", &ctx),
            Err(SweepError::HostNotFound { .. })
        ));
    }

    #[test]
    fn test_args_require_trial() {
        let machine = machine();
        let ctx = RunContext::new(&machine, Path::new("/results"), 30).unwrap();
        let it = Iteration::new(RateSpec::uniform(1000, 1).unwrap(), sg_iteration().benchmark().clone());
        assert!(matches!(
            ServerArgs::new(&it, &ctx),
            Err(SweepError::TrialNotSet(_))
        ));
    }

    #[test]
    fn test_zero_run_time_rejected() {
        let machine = machine();
        assert!(RunContext::new(&machine, Path::new("/results"), 0).is_err());
    }

    #[test]
    fn test_mlx5_server_args() {
        let machine = machine();
        let ctx = RunContext::new(&machine, Path::new("/results"), 30).unwrap();
        let it = Iteration::new(
            RateSpec::uniform(50000, 2).unwrap(),
            Benchmark::Mlx5(Mlx5Params {
                segment_size: 256,
                num_segments: 2,
                copy: CopyMode::ZERO_COPY,
                num_threads: 4,
                array_size: 65536,
                busy_cycles: 0,
                recv_pkt_size: 512,
            }),
        )
        .with_trial(1);
        let args = ServerArgs::new(&it, &ctx).unwrap().render(&machine);
        assert!(args.contains(&"--num_machines=2".to_string()));
        assert!(args.contains(&"--read_incoming_packet".to_string()));
        assert!(!args.contains(&"--with_copy".to_string()));
        assert!(args.contains(&format!(
            "--folder={}",
            it.key().unwrap().full_path(Path::new("/results")).display()
        )));
    }

    #[test]
    fn test_plan_entry_covers_every_client() {
        let machine = machine();
        let ctx = RunContext::new(&machine, Path::new("/results"), 30).unwrap();
        let entry = PlanEntry::new(&sg_iteration(), &ctx).unwrap();
        assert_eq!(entry.server_host, "server");
        assert_eq!(
            entry.clients.keys().cloned().collect::<Vec<_>>(),
            vec!["client1", "client2", "client3"]
        );
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"benchmark\":\"scatter_gather\""));
        assert!(json.contains("trial_0"));
    }
}
