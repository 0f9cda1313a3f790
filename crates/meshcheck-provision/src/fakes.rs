//! In-memory provisioner (testing only)
//!
//! `FakeProvisioner` satisfies the [`Provisioner`] contract without touching
//! a container runtime. Exec results come from a caller-supplied handler, so
//! tests can script what each node answers; every call is journaled so tests
//! can assert on ordering.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ProvisionError;
use crate::spec::{BuildSpec, Environment, ExecOutput, LogOutput, Network, RestartPolicy, RunSpec};
use crate::{ProvisionResult, Provisioner};

/// Scripted answer to an exec: receives the target environment and argv.
pub type ExecHandler = Arc<dyn Fn(&Environment, &[String]) -> ExecOutput + Send + Sync>;

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionCall {
    BuildAndRun { name: String, image: String },
    Exec { name: String, argv: Vec<String> },
    FetchLogs { name: String },
    Remove { name: String },
    CreateNetwork { name: String },
    CloseNetwork { name: String },
}

#[derive(Default)]
struct FakeState {
    running: BTreeMap<String, Environment>,
    networks: BTreeMap<String, Network>,
    journal: Vec<ProvisionCall>,
    logs: HashMap<String, LogOutput>,
    fail_start: HashSet<String>,
    fail_remove: HashSet<String>,
    start_delay: HashMap<String, Duration>,
    next_id: u64,
}

/// In-memory [`Provisioner`].
pub struct FakeProvisioner {
    state: Mutex<FakeState>,
    handler: ExecHandler,
}

impl Default for FakeProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeProvisioner {
    /// Every exec succeeds with empty output.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            handler: Arc::new(|_, _| ExecOutput::ok("")),
        }
    }

    /// Answer execs with `handler`.
    pub fn with_exec_handler<F>(handler: F) -> Self
    where
        F: Fn(&Environment, &[String]) -> ExecOutput + Send + Sync + 'static,
    {
        Self {
            state: Mutex::new(FakeState::default()),
            handler: Arc::new(handler),
        }
    }

    /// Make `build_and_run` fail for the container called `name`.
    pub fn fail_start_of(&self, name: &str) {
        self.state().fail_start.insert(name.to_string());
    }

    /// Make `remove` fail for the container called `name`.
    pub fn fail_remove_of(&self, name: &str) {
        self.state().fail_remove.insert(name.to_string());
    }

    /// Keep `build_and_run` of `name` pending for `delay` after the
    /// container is already running, like a slow port lookup would.
    pub fn delay_start_of(&self, name: &str, delay: Duration) {
        self.state().start_delay.insert(name.to_string(), delay);
    }

    /// Logs returned by `fetch_logs` for `name`.
    pub fn set_logs(&self, name: &str, logs: LogOutput) {
        self.state().logs.insert(name.to_string(), logs);
    }

    /// All calls so far, in order.
    pub fn journal(&self) -> Vec<ProvisionCall> {
        self.state().journal.clone()
    }

    /// Exec calls so far whose argv contains `needle`.
    pub fn execs_containing(&self, needle: &str) -> Vec<(String, Vec<String>)> {
        self.state()
            .journal
            .iter()
            .filter_map(|call| match call {
                ProvisionCall::Exec { name, argv } if argv.iter().any(|a| a == needle) => {
                    Some((name.clone(), argv.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Names of containers that are still running.
    pub fn running(&self) -> Vec<String> {
        self.state().running.keys().cloned().collect()
    }

    /// Names of networks that still exist.
    pub fn networks(&self) -> Vec<String> {
        self.state().networks.keys().cloned().collect()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start(
        &self,
        build: &BuildSpec,
        run: &RunSpec,
    ) -> ProvisionResult<(Environment, Option<Duration>)> {
        let mut state = self.state();
        state.journal.push(ProvisionCall::BuildAndRun {
            name: run.name.clone(),
            image: build.tag.clone(),
        });

        if state.fail_start.contains(&run.name) {
            return Err(ProvisionError::Start {
                name: run.name.clone(),
                message: "injected start failure".to_string(),
            });
        }
        if state.running.contains_key(&run.name) {
            return Err(ProvisionError::Start {
                name: run.name.clone(),
                message: format!("container name {} is already in use", run.name),
            });
        }
        if let Some(network) = &run.network {
            if !state.networks.contains_key(network) {
                return Err(ProvisionError::Start {
                    name: run.name.clone(),
                    message: format!("network {} not found", network),
                });
            }
        }

        state.next_id += 1;
        let id = format!("fake-{:04}", state.next_id);
        let mut ports = BTreeMap::new();
        for (offset, binding) in run.port_bindings.iter().enumerate() {
            let host = binding
                .host_port
                .clone()
                .unwrap_or_else(|| (32768 + offset).to_string());
            ports.insert(binding.container_port.clone(), host);
        }

        let env = Environment {
            id,
            name: run.name.clone(),
            image: build.tag.clone(),
            network: run.network.clone(),
            ports,
            mounts: run.mounts.clone(),
            command: run.command.clone(),
        };
        state.running.insert(run.name.clone(), env.clone());
        Ok((env, state.start_delay.get(&run.name).copied()))
    }

    fn remove_named(&self, name: &str) -> ProvisionResult<()> {
        let mut state = self.state();
        state.journal.push(ProvisionCall::Remove {
            name: name.to_string(),
        });
        if state.fail_remove.contains(name) {
            return Err(ProvisionError::Remove {
                name: name.to_string(),
                message: "injected removal failure".to_string(),
            });
        }
        state.running.remove(name);
        Ok(())
    }
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    async fn build_and_run(
        &self,
        build: &BuildSpec,
        run: &RunSpec,
        _restart: RestartPolicy,
    ) -> ProvisionResult<Environment> {
        let (env, delay) = self.start(build, run)?;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(env)
    }

    async fn exec(&self, env: &Environment, argv: &[String]) -> ProvisionResult<ExecOutput> {
        {
            let mut state = self.state();
            state.journal.push(ProvisionCall::Exec {
                name: env.name.clone(),
                argv: argv.to_vec(),
            });
            if !state.running.contains_key(&env.name) {
                return Err(ProvisionError::Exec {
                    name: env.name.clone(),
                    message: "no such container".to_string(),
                });
            }
        }
        // Handler runs outside the lock so it may be slow or re-entrant.
        Ok((self.handler)(env, argv))
    }

    async fn fetch_logs(&self, env: &Environment) -> ProvisionResult<LogOutput> {
        let mut state = self.state();
        state.journal.push(ProvisionCall::FetchLogs {
            name: env.name.clone(),
        });
        if !state.running.contains_key(&env.name) {
            return Err(ProvisionError::Logs {
                name: env.name.clone(),
                message: "no such container".to_string(),
            });
        }
        Ok(state.logs.get(&env.name).cloned().unwrap_or_default())
    }

    async fn remove(&self, env: &Environment) -> ProvisionResult<()> {
        self.remove_named(&env.name)
    }

    async fn remove_by_name(&self, name: &str) -> ProvisionResult<()> {
        self.remove_named(name)
    }

    async fn create_network(&self, name: &str) -> ProvisionResult<Network> {
        let mut state = self.state();
        state.journal.push(ProvisionCall::CreateNetwork {
            name: name.to_string(),
        });
        if state.networks.contains_key(name) {
            return Err(ProvisionError::Network {
                name: name.to_string(),
                message: "network already exists".to_string(),
            });
        }
        let network = Network {
            id: format!("net-{}", name),
            name: name.to_string(),
        };
        state.networks.insert(name.to_string(), network.clone());
        Ok(network)
    }

    async fn close_network(&self, network: &Network) -> ProvisionResult<()> {
        let mut state = self.state();
        state.journal.push(ProvisionCall::CloseNetwork {
            name: network.name.clone(),
        });
        if state.running.values().any(|e| e.network.as_deref() == Some(network.name.as_str())) {
            return Err(ProvisionError::Network {
                name: network.name.clone(),
                message: "network has active endpoints".to_string(),
            });
        }
        state.networks.remove(&network.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::PortBinding;

    fn run_spec(name: &str, network: &str) -> RunSpec {
        RunSpec {
            name: name.to_string(),
            network: Some(network.to_string()),
            port_bindings: vec![PortBinding::new("8080/tcp", None)],
            ..Default::default()
        }
    }

    async fn start_in(
        fake: &FakeProvisioner,
        name: &str,
        network: &str,
    ) -> ProvisionResult<Environment> {
        let build = BuildSpec::new("Dockerfile", ".", "img");
        fake.build_and_run(&build, &run_spec(name, network), RestartPolicy::ephemeral()).await
    }

    #[tokio::test]
    async fn test_lifecycle_roundtrip() {
        let fake = FakeProvisioner::new();
        let net = fake.create_network("mesh").await.unwrap();
        let env = start_in(&fake, "a", "mesh").await.unwrap();

        assert_eq!(env.host_port("8080/tcp"), Some("32768"));
        assert_eq!(fake.running(), vec!["a".to_string()]);

        // Network busy while the container is attached.
        assert!(fake.close_network(&net).await.is_err());

        fake.remove(&env).await.unwrap();
        fake.close_network(&net).await.unwrap();
        assert!(fake.running().is_empty());
        assert!(fake.networks().is_empty());
    }

    #[tokio::test]
    async fn test_exec_uses_handler_and_journals() {
        let fake = FakeProvisioner::with_exec_handler(|env, argv| {
            ExecOutput::ok(&format!("{}:{}\n", env.name, argv.join(" ")))
        });
        fake.create_network("mesh").await.unwrap();
        let env = start_in(&fake, "a", "mesh").await.unwrap();

        let out = fake.exec(&env, &["tailscale".to_string(), "ip".to_string()]).await.unwrap();
        assert_eq!(out.stdout, "a:tailscale ip\n");
        assert_eq!(fake.execs_containing("ip").len(), 1);
    }

    #[tokio::test]
    async fn test_remove_by_name() {
        let fake = FakeProvisioner::new();
        let net = fake.create_network("mesh").await.unwrap();
        start_in(&fake, "a", "mesh").await.unwrap();

        fake.remove_by_name("a").await.unwrap();
        // Unknown names are already gone.
        fake.remove_by_name("never-started").await.unwrap();
        assert!(fake.running().is_empty());
        fake.close_network(&net).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_start_is_running_while_pending() {
        let fake = Arc::new(FakeProvisioner::new());
        fake.create_network("mesh").await.unwrap();
        fake.delay_start_of("a", Duration::from_secs(20));

        let starting = {
            let fake = fake.clone();
            tokio::spawn(async move { start_in(&fake, "a", "mesh").await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fake.running(), vec!["a".to_string()]);
        assert!(!starting.is_finished());

        starting.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_start_without_network_fails() {
        let fake = FakeProvisioner::new();
        let err = start_in(&fake, "a", "missing").await.unwrap_err();
        assert!(matches!(err, ProvisionError::Start { .. }));
    }

    #[tokio::test]
    async fn test_exec_after_remove_is_transport_error() {
        let fake = FakeProvisioner::new();
        fake.create_network("mesh").await.unwrap();
        let env = start_in(&fake, "a", "mesh").await.unwrap();
        fake.remove(&env).await.unwrap();

        let err = fake.exec(&env, &["true".to_string()]).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Exec { .. }));
    }
}
