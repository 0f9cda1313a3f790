//! Scripted mesh used by the integration tests.
//!
//! `MeshSim` answers the control-plane and client CLIs the way a small,
//! healthy mesh would, with knobs to break individual pieces.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use meshcheck_core::{
    FleetBootstrap, HarnessConfig, HealthCheck, RunContext, RunLifecycle, RunReport,
};
use meshcheck_provision::fakes::FakeProvisioner;
use meshcheck_provision::{Environment, ExecOutput};

pub const KEY: &str = "9f3c0b7d2e5a41c8";

#[derive(Default)]
struct SimState {
    namespace_exists: bool,
    credential_expired: bool,
    joined: BTreeMap<String, Ipv4Addr>,
    blocked: HashSet<(String, String)>,
    /// Nodes whose status only shows themselves.
    isolated: HashSet<String>,
    /// What `tailscale ip` prints instead of the assigned address.
    reported_address: HashMap<String, String>,
    /// Joined nodes the control plane leaves out of `nodes list`.
    unlisted: HashSet<String>,
    /// Nodes whose `tailscale status` fails.
    status_down: HashSet<String>,
}

#[derive(Default)]
pub struct MeshSim {
    state: Mutex<SimState>,
}

impl MeshSim {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn expire_credential(&self) {
        self.state().credential_expired = true;
    }

    pub fn precreate_namespace(&self) {
        self.state().namespace_exists = true;
    }

    /// Every probe from `src` to `dst` times out.
    pub fn block(&self, src: &str, dst: &str) {
        self.state()
            .blocked
            .insert((src.to_string(), dst.to_string()));
    }

    pub fn isolate(&self, host: &str) {
        self.state().isolated.insert(host.to_string());
    }

    /// `host` reports `raw` as its own address.
    pub fn bad_address(&self, host: &str, raw: &str) {
        self.state()
            .reported_address
            .insert(host.to_string(), raw.to_string());
    }

    pub fn drop_from_listing(&self, host: &str) {
        self.state().unlisted.insert(host.to_string());
    }

    pub fn fail_status(&self, host: &str) {
        self.state().status_down.insert(host.to_string());
    }

    pub fn joined(&self) -> Vec<String> {
        self.state().joined.keys().cloned().collect()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }

    pub fn provisioner(self: &Arc<Self>) -> Arc<FakeProvisioner> {
        let sim = self.clone();
        Arc::new(FakeProvisioner::with_exec_handler(move |env, argv| sim.handle(env, argv)))
    }

    fn handle(&self, env: &Environment, argv: &[String]) -> ExecOutput {
        let args: Vec<&str> = argv.iter().map(String::as_str).collect();
        let mut state = self.state();

        match args.as_slice() {
            ["headscale", "namespaces", "create", _] => {
                if state.namespace_exists {
                    ExecOutput::failed(1, "Error: Namespace already exists")
                } else {
                    state.namespace_exists = true;
                    ExecOutput::ok("Namespace created\n")
                }
            }
            ["headscale", "-n", _, "preauthkeys", "create", "--reusable", "--expiration", _] => {
                ExecOutput::ok(&format!("{}\n", KEY))
            }
            ["headscale", "-n", _, "nodes", "list"] => {
                let mut out = String::from("ID | Name | NodeKey | Namespace | IP addresses\n");
                let listed = state
                    .joined
                    .iter()
                    .filter(|(h, _)| !state.unlisted.contains(*h));
                for (i, (host, ip)) in listed.enumerate() {
                    out.push_str(&format!("{} | {} | [abc] | test | {}\n", i + 1, host, ip));
                }
                ExecOutput::ok(&out)
            }
            ["tailscale", "up", "-login-server", server, "--authkey", key, "--hostname", host] => {
                if *server != "http://headscale:8080" {
                    return ExecOutput::failed(1, "could not reach login server");
                }
                if *key != KEY || state.credential_expired {
                    return ExecOutput::failed(1, "backend error: invalid key: key expired");
                }
                let next = state.joined.len() as u8 + 1;
                state
                    .joined
                    .entry(host.to_string())
                    .or_insert(Ipv4Addr::new(100, 64, 0, next));
                ExecOutput::ok("")
            }
            ["tailscale", "ip"] => match state.joined.get(&env.name) {
                Some(_) if state.reported_address.contains_key(&env.name) => {
                    ExecOutput::ok(&format!("{}\n", state.reported_address[&env.name]))
                }
                Some(ip) => ExecOutput::ok(&format!("{}\n", ip)),
                None => ExecOutput::failed(1, "not logged in"),
            },
            ["tailscale", "status"] if state.status_down.contains(&env.name) => {
                ExecOutput::failed(1, "failed to connect to local tailscaled")
            }
            ["tailscale", "status"] => {
                let mut out = String::new();
                for (host, ip) in &state.joined {
                    if state.isolated.contains(&env.name) && *host != env.name {
                        continue;
                    }
                    out.push_str(&format!("{}  {}  test  linux  -\n", ip, host));
                }
                ExecOutput::ok(&out)
            }
            ["tailscale", "ping", .., addr] => {
                let dst = state
                    .joined
                    .iter()
                    .find(|(_, ip)| ip.to_string() == *addr)
                    .map(|(h, _)| h.clone());
                let Some(dst) = dst else {
                    return ExecOutput::failed(1, "no such peer");
                };
                if state.blocked.contains(&(env.name.clone(), dst.clone())) {
                    return ExecOutput {
                        stdout: "ping timed out\n".to_string(),
                        stderr: format!("no reply from {} after 20 attempts", dst),
                        exit_code: 1,
                    };
                }
                ExecOutput::ok(&format!(
                    "pong from {} ({}) via 172.18.0.4:41641 in 2ms\n",
                    dst, addr
                ))
            }
            _ => ExecOutput::failed(127, "command not found"),
        }
    }
}

/// Small fleet with a short readiness window, logs under `dir`.
pub fn config(nodes: usize, versions: &[&str], dir: &Path) -> HarnessConfig {
    let mut cfg = HarnessConfig::default();
    cfg.clients.count = nodes;
    cfg.clients.versions = versions.iter().map(|v| v.to_string()).collect();
    cfg.readiness.deadline_secs = 5;
    cfg.readiness.initial_backoff_ms = 100;
    cfg.convergence.poll_deadline_secs = 5;
    cfg.convergence.poll_interval_ms = 100;
    cfg.diagnostics.log_dir = dir.join("test_output");
    cfg
}

/// Run the whole lifecycle and hand back the report and the drained context.
pub async fn run(
    cfg: HarnessConfig,
    provisioner: Arc<FakeProvisioner>,
    health: Arc<dyn HealthCheck>,
    workdir: &Path,
) -> (RunReport, RunContext) {
    let mut ctx = RunContext::new(Arc::new(cfg), provisioner);
    let lifecycle = RunLifecycle::new(FleetBootstrap::new(health, workdir));
    let report = lifecycle.run(&mut ctx).await;
    (report, ctx)
}
