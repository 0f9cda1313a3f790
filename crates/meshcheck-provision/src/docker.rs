//! Docker-compatible CLI backend.
//!
//! Every operation shells out to the configured binary (`docker` by
//! default; `podman` accepts the same arguments) and maps its exit status
//! into [`ProvisionError`].

use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::ProvisionError;
use crate::spec::{BuildSpec, Environment, ExecOutput, LogOutput, Network, RestartPolicy, RunSpec};
use crate::{ProvisionResult, Provisioner};

/// Provisioner that drives a container CLI through `tokio::process`.
#[derive(Debug, Clone)]
pub struct DockerCli {
    bin: String,
    /// Upper bound for build/run/network calls; exec is left unbounded here
    /// and bounded by the caller when needed.
    op_timeout: Option<Duration>,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    /// Create a backend using `bin` as the container CLI
    pub fn new(bin: &str) -> Self {
        Self {
            bin: bin.to_string(),
            op_timeout: None,
        }
    }

    /// Bound image builds, container starts and network calls.
    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = Some(timeout);
        self
    }

    /// The CLI binary in use.
    pub fn bin(&self) -> &str {
        &self.bin
    }

    async fn run_cli(
        &self,
        operation: &str,
        args: &[String],
        bounded: bool,
    ) -> ProvisionResult<Output> {
        debug!(bin = %self.bin, ?args, "container cli");

        let child = Command::new(&self.bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ProvisionError::CliNotFound(self.bin.clone()),
                _ => ProvisionError::Io(e),
            })?;

        let output = match self.op_timeout.filter(|_| bounded) {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| ProvisionError::Timeout {
                    operation: operation.to_string(),
                    secs: limit.as_secs(),
                })??,
            None => child.wait_with_output().await?,
        };

        Ok(output)
    }

    /// `rm -f target`; a container that is already gone counts as removed.
    async fn force_remove(&self, target: &str, name: &str) -> ProvisionResult<()> {
        let args = vec!["rm".to_string(), "-f".to_string(), target.to_string()];
        let output = self.run_cli("rm", &args, true).await?;
        if output.status.success() {
            return Ok(());
        }

        let message = stderr_of(&output);
        // Auto-removal may have beaten us to it.
        if is_missing_container(&message) {
            debug!(name = %name, "Container already gone");
            return Ok(());
        }
        Err(ProvisionError::Remove {
            name: name.to_string(),
            message,
        })
    }

    async fn host_port(&self, env: &Environment, container_port: &str) -> ProvisionResult<String> {
        let args = vec!["port".to_string(), env.id.clone(), container_port.to_string()];
        let output = self.run_cli("port", &args, true).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        if !output.status.success() {
            return Err(ProvisionError::PortNotBound {
                name: env.name.clone(),
                port: container_port.to_string(),
            });
        }

        parse_port_output(&stdout).ok_or_else(|| ProvisionError::PortNotBound {
            name: env.name.clone(),
            port: container_port.to_string(),
        })
    }
}

#[async_trait]
impl Provisioner for DockerCli {
    async fn build_and_run(
        &self,
        build: &BuildSpec,
        run: &RunSpec,
        restart: RestartPolicy,
    ) -> ProvisionResult<Environment> {
        info!(image = %build.tag, "Building image");
        let output = self.run_cli("build", &build_args(build), true).await?;
        if !output.status.success() {
            return Err(ProvisionError::Build {
                image: build.tag.clone(),
                message: stderr_of(&output),
            });
        }

        info!(name = %run.name, image = %build.tag, "Starting container");
        let output = self
            .run_cli("run", &run_args(&build.tag, run, restart), true)
            .await?;
        if !output.status.success() {
            return Err(ProvisionError::Start {
                name: run.name.clone(),
                message: stderr_of(&output),
            });
        }

        let mut env = Environment {
            id: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            name: run.name.clone(),
            image: build.tag.clone(),
            network: run.network.clone(),
            ports: Default::default(),
            mounts: run.mounts.clone(),
            command: run.command.clone(),
        };

        for binding in &run.port_bindings {
            match self.host_port(&env, &binding.container_port).await {
                Ok(host) => {
                    env.ports.insert(binding.container_port.clone(), host);
                }
                Err(e) => {
                    // The container is already up; do not leak it.
                    if let Err(remove_err) = self.remove(&env).await {
                        warn!(
                            name = %env.name,
                            error = %remove_err,
                            "Could not remove half-started container"
                        );
                    }
                    return Err(e);
                }
            }
        }

        Ok(env)
    }

    async fn exec(&self, env: &Environment, argv: &[String]) -> ProvisionResult<ExecOutput> {
        let mut args = Vec::with_capacity(argv.len() + 2);
        args.push("exec".to_string());
        args.push(env.id.clone());
        args.extend(argv.iter().cloned());

        let output = self
            .run_cli("exec", &args, false)
            .await
            .map_err(|e| ProvisionError::Exec {
                name: env.name.clone(),
                message: e.to_string(),
            })?;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().map(i64::from).unwrap_or(-1),
        })
    }

    async fn fetch_logs(&self, env: &Environment) -> ProvisionResult<LogOutput> {
        let args = vec!["logs".to_string(), env.id.clone()];
        let output = self.run_cli("logs", &args, true).await?;

        // `logs` replays the container's stdout and stderr onto our own.
        if !output.status.success() {
            return Err(ProvisionError::Logs {
                name: env.name.clone(),
                message: stderr_of(&output),
            });
        }

        Ok(LogOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn remove(&self, env: &Environment) -> ProvisionResult<()> {
        self.force_remove(&env.id, &env.name).await
    }

    async fn remove_by_name(&self, name: &str) -> ProvisionResult<()> {
        self.force_remove(name, name).await
    }

    async fn create_network(&self, name: &str) -> ProvisionResult<Network> {
        let args = vec!["network".to_string(), "create".to_string(), name.to_string()];
        let output = self.run_cli("network create", &args, true).await?;
        if !output.status.success() {
            return Err(ProvisionError::Network {
                name: name.to_string(),
                message: stderr_of(&output),
            });
        }

        Ok(Network {
            id: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            name: name.to_string(),
        })
    }

    async fn close_network(&self, network: &Network) -> ProvisionResult<()> {
        let args = vec!["network".to_string(), "rm".to_string(), network.name.clone()];
        let output = self.run_cli("network rm", &args, true).await?;
        if !output.status.success() {
            return Err(ProvisionError::Network {
                name: network.name.clone(),
                message: stderr_of(&output),
            });
        }
        Ok(())
    }
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

fn is_missing_container(stderr: &str) -> bool {
    stderr.contains("No such container") || stderr.contains("no such container")
}

/// Arguments for `build`.
pub(crate) fn build_args(build: &BuildSpec) -> Vec<String> {
    let dockerfile = if build.dockerfile.is_absolute() {
        build.dockerfile.clone()
    } else {
        build.context_dir.join(&build.dockerfile)
    };

    let mut args = vec![
        "build".to_string(),
        "-f".to_string(),
        dockerfile.display().to_string(),
        "-t".to_string(),
        build.tag.clone(),
    ];
    for (name, value) in &build.build_args {
        args.push("--build-arg".to_string());
        args.push(format!("{}={}", name, value));
    }
    args.push(build.context_dir.display().to_string());
    args
}

/// Arguments for `run`.
pub(crate) fn run_args(image: &str, run: &RunSpec, restart: RestartPolicy) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        run.name.clone(),
        "--hostname".to_string(),
        run.name.clone(),
    ];

    if let Some(network) = &run.network {
        args.push("--network".to_string());
        args.push(network.clone());
    }
    for mount in &run.mounts {
        args.push("-v".to_string());
        args.push(mount.as_volume_arg());
    }
    for binding in &run.port_bindings {
        args.push("-p".to_string());
        args.push(binding.as_publish_arg());
    }
    for (key, value) in &run.env {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }

    args.push("--restart".to_string());
    args.push(if restart.auto_restart { "unless-stopped" } else { "no" }.to_string());
    if restart.auto_remove {
        args.push("--rm".to_string());
    }

    args.push(image.to_string());
    args.extend(run.command.iter().cloned());
    args
}

/// Extract the host port from `port` output such as `0.0.0.0:8080\n[::]:8080`.
pub(crate) fn parse_port_output(stdout: &str) -> Option<String> {
    let line = stdout.lines().map(str::trim).find(|l| !l.is_empty())?;
    let (_, port) = line.rsplit_once(':')?;
    if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(port.to_string())
}
